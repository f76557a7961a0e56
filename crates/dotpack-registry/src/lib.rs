mod discover;
mod source_store;

pub use discover::{discover, Catalog, DiscoveryWarning, Package};
pub use source_store::{default_sources, SourceRecord, SourceStore};

#[cfg(test)]
mod tests;
