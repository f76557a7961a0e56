mod dispatch;
mod render;

#[cfg(test)]
mod tests;

use anyhow::Result;
use clap::Parser;

use crate::dispatch::{run, Cli};

fn main() -> Result<()> {
    let cli = Cli::parse();
    run(cli)
}
