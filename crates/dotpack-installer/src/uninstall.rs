use std::fs;

use anyhow::{Context, Result};
use dotpack_core::{Action, ConditionContext, PackageDescriptor, Phase, DESCRIPTOR_FILE_NAME};

use crate::backup::BackupManager;
use crate::fs_utils::remove_path_if_exists;
use crate::interpreter::{execute_phase, PhaseContext};
use crate::layout::StateLayout;
use crate::session::Session;
use crate::state::{read_install_record, remove_install_record};
use crate::vars::VarExpander;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UninstallStatus {
    Uninstalled,
    NotInstalled,
}

/// Reverses one package: the archived descriptor's explicit uninstall
/// directives run first, then the synthesized inverse actions in reverse
/// execution order. `$PACKAGE_DIR` is bound to the archived snapshot, so
/// the run uses the exact resources that installed the package. The record
/// and archive are deleted only after everything succeeded.
pub fn uninstall_package(
    layout: &StateLayout,
    session: &mut Session,
    name: &str,
    ctx: &ConditionContext,
) -> Result<UninstallStatus> {
    let Some(record) = read_install_record(layout, name)? else {
        return Ok(UninstallStatus::NotInstalled);
    };

    let snapshot_dir = layout.snapshot_dir(name);
    let descriptor = load_snapshot_descriptor(layout, name)?;

    let mut expander = VarExpander::new();
    expander.register("SESSION_DIR", session.session_dir().display().to_string());
    expander.register("PACKAGE_DIR", snapshot_dir.display().to_string());

    let mut backup = BackupManager::open(layout, name);

    let mut actions: Vec<Action> = descriptor.uninstall.clone();
    actions.extend(
        record
            .executed
            .iter()
            .rev()
            .filter_map(|executed| executed.inverse.clone()),
    );

    let phase_ctx = PhaseContext {
        package: name,
        phase: Phase::Uninstall,
        base_dir: &snapshot_dir,
        package_dir: &snapshot_dir,
        expander: &expander,
        conditions: ctx,
    };
    execute_phase(&phase_ctx, &actions, &mut backup)?;

    remove_install_record(layout, name)?;
    let archive_dir = layout.package_archive_dir(name);
    remove_path_if_exists(&archive_dir)
        .with_context(|| format!("failed removing archive {}", archive_dir.display()))?;

    Ok(UninstallStatus::Uninstalled)
}

/// The descriptor as archived at install time. A missing snapshot (stale
/// state) degrades to "synthesized inverses only" instead of failing the
/// uninstall outright.
fn load_snapshot_descriptor(layout: &StateLayout, name: &str) -> Result<PackageDescriptor> {
    let descriptor_path = layout.snapshot_dir(name).join(DESCRIPTOR_FILE_NAME);
    if !descriptor_path.is_file() {
        return Ok(PackageDescriptor::default());
    }

    let content = fs::read_to_string(&descriptor_path)
        .with_context(|| format!("failed reading {}", descriptor_path.display()))?;
    PackageDescriptor::from_toml_str(&content)
        .with_context(|| format!("invalid archived descriptor {}", descriptor_path.display()))
}
