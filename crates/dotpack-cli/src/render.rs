use std::io::IsTerminal;
use std::time::Duration;

use anstyle::{AnsiColor, Style};
use indicatif::{ProgressBar, ProgressStyle};

fn color_enabled() -> bool {
    std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none()
}

fn colorize(style: Style, text: &str) -> String {
    if color_enabled() {
        format!("{}{}{}", style.render(), text, style.render_reset())
    } else {
        text.to_string()
    }
}

pub fn status_line(label: &str, message: &str) -> String {
    let style = Style::new().bold().fg_color(Some(AnsiColor::Green.into()));
    format!("{} {}", colorize(style, label), message)
}

pub fn warning_line(message: &str) -> String {
    let style = Style::new().bold().fg_color(Some(AnsiColor::Yellow.into()));
    format!("{} {}", colorize(style, "warning:"), message)
}

pub fn error_line(message: &str) -> String {
    let style = Style::new().bold().fg_color(Some(AnsiColor::Red.into()));
    format!("{} {}", colorize(style, "error:"), message)
}

pub fn section(title: &str) {
    println!("{}", colorize(Style::new().bold(), title));
}

/// Source / Package / Description columns, padded to the widest cell.
pub fn package_table(rows: &[(String, String, String)]) -> Vec<String> {
    let headers = ("Source", "Package", "Description");
    let source_width = rows
        .iter()
        .map(|(source, _, _)| source.len())
        .chain([headers.0.len()])
        .max()
        .unwrap_or(0);
    let package_width = rows
        .iter()
        .map(|(_, package, _)| package.len())
        .chain([headers.1.len()])
        .max()
        .unwrap_or(0);

    let mut lines = Vec::with_capacity(rows.len() + 2);
    lines.push(format!(
        "{:<source_width$}  {:<package_width$}  {}",
        headers.0, headers.1, headers.2
    ));
    lines.push(format!(
        "{}  {}  {}",
        "-".repeat(source_width),
        "-".repeat(package_width),
        "-".repeat(headers.2.len())
    ));
    for (source, package, description) in rows {
        lines.push(format!(
            "{source:<source_width$}  {package:<package_width$}  {description}"
        ));
    }
    lines
}

pub fn plan_progress(total: u64, label: &str) -> ProgressBar {
    let progress_bar = ProgressBar::new(total.max(1));
    if let Ok(style) = ProgressStyle::with_template(
        "{spinner:.cyan.bold} {msg:<24} [{bar:20.cyan/blue}] {pos:>3}/{len:3}",
    ) {
        progress_bar.set_style(style.progress_chars("=>-"));
    }
    progress_bar.set_message(label.to_string());
    progress_bar.enable_steady_tick(Duration::from_millis(80));
    progress_bar
}
