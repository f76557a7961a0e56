use std::collections::BTreeSet;
use std::process::Command;

use anyhow::Result;
use dotpack_core::{apply_transformers, ConditionContext, Phase, Transformer};
use dotpack_registry::Package;

use crate::backup::{archive_package_snapshot, BackupManager};
use crate::fs_utils::current_unix_timestamp;
use crate::interpreter::{execute_phase, PhaseContext};
use crate::layout::StateLayout;
use crate::session::Session;
use crate::state::{is_installed, write_install_record, InstalledRecord};
use crate::vars::VarExpander;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallStatus {
    Installed,
    AlreadyInstalled,
    /// The package requires elevated privileges the session does not hold.
    /// Reported and skipped; the rest of the plan continues.
    SkippedNoSuperuser,
    /// A dependency failed (or was skipped) earlier in this run.
    SkippedFailedDependency { dependency: String },
}

/// Runs one package's prepare and install phases and persists its record.
/// The caller drives the plan order and collects failures; a failure here
/// aborts only this package.
pub fn install_package(
    layout: &StateLayout,
    session: &mut Session,
    package: &Package,
    transformers: &[Transformer],
    ctx: &ConditionContext,
    failed: &BTreeSet<String>,
) -> Result<InstallStatus> {
    if !package.is_support() && is_installed(layout, &package.name) {
        return Ok(InstallStatus::AlreadyInstalled);
    }
    if let Some(dependency) = package
        .dependency_names()
        .into_iter()
        .find(|dependency| failed.contains(dependency))
    {
        return Ok(InstallStatus::SkippedFailedDependency { dependency });
    }
    if package.descriptor.superuser && !ctx.superuser_allowed() {
        return Ok(InstallStatus::SkippedNoSuperuser);
    }

    let mut expander = VarExpander::new();
    expander.register("SESSION_DIR", session.session_dir().display().to_string());
    expander.register("PACKAGE_DIR", package.directory.display().to_string());

    let mut backup = BackupManager::for_package(layout, &package.name)?;

    if !package.descriptor.prepare.is_empty() {
        let temp_dir = session.package_temp_dir(&package.name)?;
        expander.register("TEMPORARY_DIR", temp_dir.display().to_string());

        let prepare_ctx = PhaseContext {
            package: &package.name,
            phase: Phase::Prepare,
            base_dir: &temp_dir,
            package_dir: &package.directory,
            expander: &expander,
            conditions: ctx,
        };
        execute_phase(&prepare_ctx, &package.descriptor.prepare, &mut backup)?;
    }

    let install_actions = apply_transformers(package.descriptor.install.clone(), transformers);
    let install_ctx = PhaseContext {
        package: &package.name,
        phase: Phase::Install,
        base_dir: &package.directory,
        package_dir: &package.directory,
        expander: &expander,
        conditions: ctx,
    };
    let executed = execute_phase(&install_ctx, &install_actions, &mut backup)?;

    session.cleanup_package(&package.name);

    // A support package's life ends with the run: no snapshot, no record.
    if package.is_support() {
        return Ok(InstallStatus::Installed);
    }

    archive_package_snapshot(layout, &package.name, &package.directory)?;
    write_install_record(
        layout,
        &InstalledRecord {
            name: package.name.clone(),
            archive_dir: layout
                .package_archive_dir(&package.name)
                .display()
                .to_string(),
            executed,
            installed_at_unix: current_unix_timestamp(),
        },
    )?;

    Ok(InstallStatus::Installed)
}

/// Asks `sudo` once whether the user can elevate; the answer is cached in
/// the session's `ConditionContext` for the rest of the run.
pub fn probe_superuser() -> bool {
    if cfg!(windows) {
        return false;
    }

    eprintln!("Testing access to the 'sudo' command, please enter your password as prompted.");
    eprintln!("If you don't have superuser access, please press Ctrl-D.");
    Command::new("sudo")
        .args(["-p", "[sudo] password for dotpack: ", "true"])
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}
