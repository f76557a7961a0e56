use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Directory layout of the per-user persisted state: install records,
/// backup archives and session scratch space all live under one root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateLayout {
    state_root: PathBuf,
}

impl StateLayout {
    pub fn new(state_root: impl Into<PathBuf>) -> Self {
        Self {
            state_root: state_root.into(),
        }
    }

    pub fn state_root(&self) -> &Path {
        &self.state_root
    }

    pub fn state_dir(&self) -> PathBuf {
        self.state_root.join("state")
    }

    pub fn installed_state_dir(&self) -> PathBuf {
        self.state_dir().join("installed")
    }

    pub fn record_path(&self, name: &str) -> PathBuf {
        self.installed_state_dir().join(format!("{name}.json"))
    }

    pub fn archives_dir(&self) -> PathBuf {
        self.state_dir().join("archives")
    }

    /// Everything preserved for one installed package: file backups and
    /// the descriptor-directory snapshot.
    pub fn package_archive_dir(&self, name: &str) -> PathBuf {
        self.archives_dir().join(name)
    }

    pub fn backup_dir(&self, name: &str) -> PathBuf {
        self.package_archive_dir(name).join("backup")
    }

    pub fn snapshot_dir(&self, name: &str) -> PathBuf {
        self.package_archive_dir(name).join("package")
    }

    pub fn tmp_state_dir(&self) -> PathBuf {
        self.state_dir().join("tmp")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir().join(".lock")
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [
            self.state_dir(),
            self.installed_state_dir(),
            self.archives_dir(),
            self.tmp_state_dir(),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

pub fn default_user_state_root() -> Result<PathBuf> {
    if cfg!(windows) {
        let app_data = std::env::var("LOCALAPPDATA")
            .context("LOCALAPPDATA is not set; cannot resolve Windows state root")?;
        return Ok(PathBuf::from(app_data).join("Dotpack"));
    }

    let home = std::env::var("HOME").context("HOME is not set; cannot resolve state root")?;
    Ok(PathBuf::from(home)
        .join(".local")
        .join("share")
        .join("dotpack"))
}
