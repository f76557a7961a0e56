use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dotpack_core::ActionKind;
use sha2::{Digest, Sha256};

use crate::fs_utils::{copy_path, remove_path_if_exists};
use crate::layout::StateLayout;

/// Per-package archive of pre-install file state. Entries are keyed by the
/// target path exactly as the descriptor wrote it (unexpanded), hashed so
/// arbitrary absolute paths map to flat archive filenames.
#[derive(Debug)]
pub struct BackupManager {
    backup_dir: PathBuf,
    saved_this_install: BTreeSet<String>,
}

impl BackupManager {
    /// Opens the archive for an install run, creating the directory.
    pub fn for_package(layout: &StateLayout, name: &str) -> Result<Self> {
        let backup_dir = layout.backup_dir(name);
        fs::create_dir_all(&backup_dir).with_context(|| {
            format!("failed creating backup directory {}", backup_dir.display())
        })?;
        Ok(Self {
            backup_dir,
            saved_this_install: BTreeSet::new(),
        })
    }

    /// Opens an existing archive read-mostly, for uninstall restores.
    pub fn open(layout: &StateLayout, name: &str) -> Self {
        Self {
            backup_dir: layout.backup_dir(name),
            saved_this_install: BTreeSet::new(),
        }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.backup_dir.join(hex::encode(digest))
    }

    pub fn has_entry(&self, key: &str) -> bool {
        self.entry_path(key).exists()
    }

    /// Archives the current content of `real_path` under `key` before a
    /// destructive install effect. First writer wins: once a backup for
    /// the exact target exists, re-running the same action does not save
    /// an already-modified copy over the true original. Returns whether a
    /// new backup was written.
    pub fn save_if_exists(&mut self, key: &str, real_path: &Path) -> Result<bool> {
        if real_path.symlink_metadata().is_err() {
            return Ok(false);
        }
        if self.saved_this_install.contains(key) || self.has_entry(key) {
            return Ok(false);
        }

        let entry = self.entry_path(key);
        copy_path(real_path, &entry).with_context(|| {
            format!(
                "failed archiving previous content of {}",
                real_path.display()
            )
        })?;
        self.saved_this_install.insert(key.to_string());
        Ok(true)
    }

    /// Copies the archived content for `key` back to `real_path`. A
    /// missing archive entry is a no-op, reported by the `false` return,
    /// never an error.
    pub fn restore(&self, key: &str, real_path: &Path) -> Result<bool> {
        let entry = self.entry_path(key);
        if !entry.exists() {
            return Ok(false);
        }

        remove_path_if_exists(real_path)
            .with_context(|| format!("failed clearing {}", real_path.display()))?;
        if let Some(parent) = real_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed creating {}", parent.display()))?;
        }
        copy_path(&entry, real_path)
            .with_context(|| format!("failed restoring {}", real_path.display()))?;
        Ok(true)
    }
}

/// The explicit, total mapping from an executed install action to its
/// synthesized uninstall counterpart. `targets` is the action's computed
/// target list in original argument shape. A `None` means the action has
/// no automatic inverse, which is a deliberate case of the mapping, not a
/// gap.
pub fn synthesize_inverse(executed: &ActionKind, targets: &[String]) -> Option<ActionKind> {
    match executed {
        ActionKind::Copy { .. } | ActionKind::Symlink { .. } => Some(ActionKind::Remove {
            file: None,
            files: Some(targets.to_vec()),
            r#where: None,
        }),
        ActionKind::CopyTree { .. } => targets.first().map(|target| ActionKind::RemoveTree {
            dir: target.clone(),
        }),
        ActionKind::MakeDirs { .. } => Some(ActionKind::RemoveDirs {
            dirs: targets.to_vec(),
        }),
        ActionKind::Remove { .. } | ActionKind::Replace { .. } => Some(ActionKind::Restore {
            file: None,
            files: Some(targets.to_vec()),
        }),
        ActionKind::RemoveDirs { .. }
        | ActionKind::RemoveTree { .. }
        | ActionKind::Restore { .. }
        | ActionKind::Print { .. }
        | ActionKind::Shell { .. }
        | ActionKind::ShellAll { .. }
        | ActionKind::ShellAny { .. }
        | ActionKind::GitClone { .. }
        | ActionKind::CopyResource { .. } => None,
    }
}

/// Snapshots the package's descriptor directory into the archive at the
/// moment install completes, so uninstall always operates on the exact
/// resources used to install, independent of later source-tree changes.
pub fn archive_package_snapshot(
    layout: &StateLayout,
    name: &str,
    package_dir: &Path,
) -> Result<PathBuf> {
    let snapshot_dir = layout.snapshot_dir(name);
    remove_path_if_exists(&snapshot_dir).with_context(|| {
        format!("failed clearing stale snapshot {}", snapshot_dir.display())
    })?;
    crate::fs_utils::copy_dir_recursive(package_dir, &snapshot_dir)?;
    Ok(snapshot_dir)
}
