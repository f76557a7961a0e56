use std::fs;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use dotpack_core::Action;
use serde::{Deserialize, Serialize};

use crate::layout::StateLayout;

/// One install-phase action that actually ran, with enough information to
/// replay its inverse at uninstall time: the action tag, the target paths
/// in their original (unexpanded) argument shape, and the synthesized
/// inverse action if the mapping defines one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutedAction {
    pub action: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inverse: Option<Action>,
}

/// The persisted proof that a package is installed: where its archived
/// snapshot lives and what ran, in declaration order. Created at
/// successful install completion, deleted at uninstall completion, and the
/// only record a later invocation has of what to reverse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstalledRecord {
    pub name: String,
    pub archive_dir: String,
    #[serde(default)]
    pub executed: Vec<ExecutedAction>,
    pub installed_at_unix: u64,
}

pub fn write_install_record(layout: &StateLayout, record: &InstalledRecord) -> Result<PathBuf> {
    let dir = layout.installed_state_dir();
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create install state directory: {}", dir.display()))?;

    let path = layout.record_path(&record.name);
    let payload = serde_json::to_string_pretty(record)
        .with_context(|| format!("failed to serialize install record: {}", path.display()))?;
    fs::write(&path, payload.as_bytes())
        .with_context(|| format!("failed to write install record: {}", path.display()))?;
    Ok(path)
}

pub fn read_install_record(layout: &StateLayout, name: &str) -> Result<Option<InstalledRecord>> {
    let path = layout.record_path(name);
    if !path.exists() {
        return Ok(None);
    }

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read install record: {}", path.display()))?;
    let record = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse install record: {}", path.display()))?;
    Ok(Some(record))
}

pub fn read_install_records(layout: &StateLayout) -> Result<Vec<InstalledRecord>> {
    let dir = layout.installed_state_dir();
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut records = Vec::new();
    for entry in fs::read_dir(&dir)
        .with_context(|| format!("failed to read install state directory: {}", dir.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }

        let path = entry.path();
        if path.extension().and_then(|value| value.to_str()) != Some("json") {
            continue;
        }

        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read install record: {}", path.display()))?;
        let record: InstalledRecord = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse install record: {}", path.display()))?;
        records.push(record);
    }

    records.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(records)
}

pub fn remove_install_record(layout: &StateLayout, name: &str) -> Result<()> {
    let path = layout.record_path(name);
    if path.exists() {
        fs::remove_file(&path)
            .with_context(|| format!("failed to remove install record: {}", path.display()))?;
    }
    Ok(())
}

pub fn is_installed(layout: &StateLayout, name: &str) -> bool {
    layout.record_path(name).exists()
}

pub fn installed_names(layout: &StateLayout) -> Result<Vec<String>> {
    Ok(read_install_records(layout)?
        .into_iter()
        .map(|record| record.name)
        .collect())
}

/// Indicator lock around the persisted state, so two invocations cannot
/// interleave installs. Released on drop.
#[derive(Debug)]
pub struct StateLock {
    path: PathBuf,
}

impl StateLock {
    pub fn acquire(layout: &StateLayout) -> Result<Self> {
        layout.ensure_base_dirs()?;
        let path = layout.lock_path();

        let mut handle = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(handle) => handle,
            Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&path).unwrap_or_default();
                anyhow::bail!(
                    "the install state is locked by {}; another invocation running? if not, remove {}",
                    holder.trim(),
                    path.display()
                );
            }
            Err(error) => {
                return Err(error).with_context(|| {
                    format!("failed to create state lock: {}", path.display())
                });
            }
        };

        let _ = writeln!(handle, "pid {}", std::process::id());
        Ok(Self { path })
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
