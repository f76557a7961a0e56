use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::fs_utils::unique_suffix;
use crate::layout::StateLayout;

/// The ephemeral scratch space of one invocation: a shared `$SESSION_DIR`
/// plus one `$TEMPORARY_DIR` per package that runs a prepare phase. All of
/// it lives under the state layout's tmp dir and is destroyed when the
/// invocation (or the package's install) completes.
#[derive(Debug)]
pub struct Session {
    session_dir: PathBuf,
    package_dirs: BTreeMap<String, PathBuf>,
}

impl Session {
    pub fn create(layout: &StateLayout) -> Result<Self> {
        let session_dir = layout
            .tmp_state_dir()
            .join(format!("session-{}-{}", std::process::id(), unique_suffix()));
        fs::create_dir_all(&session_dir).with_context(|| {
            format!("failed creating session directory {}", session_dir.display())
        })?;
        Ok(Self {
            session_dir,
            package_dirs: BTreeMap::new(),
        })
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    /// The package's prepare scratch directory, created on first use and
    /// stable for the rest of the invocation.
    pub fn package_temp_dir(&mut self, package: &str) -> Result<PathBuf> {
        if let Some(existing) = self.package_dirs.get(package) {
            return Ok(existing.clone());
        }

        let dir = self.session_dir.join(format!("{package}-prepare"));
        fs::create_dir_all(&dir).with_context(|| {
            format!("failed creating package temp directory {}", dir.display())
        })?;
        self.package_dirs.insert(package.to_string(), dir.clone());
        Ok(dir)
    }

    /// Drops a package's scratch directory once its install phase is done.
    pub fn cleanup_package(&mut self, package: &str) {
        if let Some(dir) = self.package_dirs.remove(package) {
            let _ = fs::remove_dir_all(dir);
        }
    }

    /// Removes the whole session tree. Errors are deliberately swallowed:
    /// scratch cleanup must never fail an otherwise successful run.
    pub fn cleanup(self) {
        let _ = fs::remove_dir_all(&self.session_dir);
    }
}
