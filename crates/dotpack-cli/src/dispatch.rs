use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::Command;

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgGroup, CommandFactory, Parser};
use clap_complete::Shell;
use dotpack_core::{ConditionContext, PackageDescriptor, Transformer, DESCRIPTOR_FILE_NAME};
use dotpack_installer::{
    default_user_state_root, install_package, installed_names, is_installed, probe_superuser,
    uninstall_package, InstallStatus, Session, StateLayout, StateLock, UninstallStatus,
};
use dotpack_registry::{discover, Catalog, SourceStore};
use dotpack_resolver::{expand_requests, plan};

use crate::render;

#[derive(Parser, Debug)]
#[command(name = "dotpack")]
#[command(about = "Declarative environment provisioning from package descriptors", long_about = None)]
#[command(group(ArgGroup::new("mode").args(["list", "install", "uninstall", "edit_sources"])))]
pub struct Cli {
    /// Packages to handle; 'group.*' selects every package under a group.
    #[arg(value_name = "package")]
    pub package_names: Vec<String>,

    /// List visible packages, or report status for the named ones. This is
    /// the default action when no package names are given.
    #[arg(short = 'l', long)]
    pub list: bool,

    /// Install the named packages and their dependencies. This is the
    /// default action when at least one package name is given.
    #[arg(short = 'i', long)]
    pub install: bool,

    /// Uninstall the named packages by replaying inverse actions.
    #[arg(short = 'u', long)]
    pub uninstall: bool,

    /// Open the source-root configuration in $EDITOR.
    #[arg(long)]
    pub edit_sources: bool,

    /// Only load packages from the named configured source.
    #[arg(long, value_name = "name")]
    pub source: Option<String>,

    /// Enable a named transformer for this run (e.g. copies-as-symlinks).
    #[arg(short = 'X', long = "transform", value_name = "name")]
    pub transformers: Vec<String>,

    /// Emit a shell completion script on stdout and exit.
    #[arg(long, value_name = "shell")]
    pub completions: Option<Shell>,

    /// Override the per-user state root.
    #[arg(long, value_name = "dir", hide = true)]
    pub state_root: Option<PathBuf>,
}

enum Mode {
    List,
    Install,
    Uninstall,
}

pub fn run(cli: Cli) -> Result<()> {
    if let Some(shell) = cli.completions {
        clap_complete::generate(shell, &mut Cli::command(), "dotpack", &mut std::io::stdout());
        return Ok(());
    }

    let state_root = match &cli.state_root {
        Some(root) => root.clone(),
        None => default_user_state_root()?,
    };
    let layout = StateLayout::new(&state_root);
    let store = SourceStore::new(&state_root);

    if cli.edit_sources {
        return edit_sources(&store);
    }

    let mode = if cli.uninstall {
        Mode::Uninstall
    } else if cli.install {
        Mode::Install
    } else if cli.list || cli.package_names.is_empty() {
        Mode::List
    } else {
        Mode::Install
    };

    if matches!(mode, Mode::Uninstall) && cli.source.is_some() {
        bail!("'--source' has no effect for uninstall");
    }

    let transformers = parse_transformers(&cli.transformers)?;

    let mut sources = store.list_sources()?;
    if let Some(selected) = &cli.source {
        sources.retain(|source| &source.name == selected);
        if sources.is_empty() {
            bail!("the package source '{selected}' is not configured");
        }
    }

    let catalog = discover(&sources)?;
    for warning in catalog.warnings() {
        eprintln!(
            "{}",
            render::warning_line(&format!(
                "source '{}': {} ({})",
                warning.source,
                warning.message,
                warning.location.display()
            ))
        );
    }

    match mode {
        Mode::List => run_list(&layout, &catalog, &cli.package_names),
        Mode::Install => run_install(&layout, &catalog, &cli.package_names, &transformers),
        Mode::Uninstall => run_uninstall(&layout, &catalog, &cli.package_names),
    }
}

pub(crate) fn parse_transformers(names: &[String]) -> Result<Vec<Transformer>> {
    names
        .iter()
        .map(|name| {
            Transformer::parse(name).ok_or_else(|| anyhow!("unknown transformer '{name}'"))
        })
        .collect()
}

fn edit_sources(store: &SourceStore) -> Result<()> {
    let path = store.materialize()?;
    let editor = std::env::var("EDITOR").unwrap_or_else(|_| {
        if cfg!(windows) {
            "notepad".to_string()
        } else {
            "vi".to_string()
        }
    });

    let status = Command::new(&editor)
        .arg(&path)
        .status()
        .with_context(|| format!("failed launching editor '{editor}'"))?;
    if !status.success() {
        bail!("editor '{editor}' exited with a non-zero status");
    }

    // Surface syntax errors now instead of at the next invocation.
    store.list_sources().map(|_| ())
}

fn run_list(layout: &StateLayout, catalog: &Catalog, patterns: &[String]) -> Result<()> {
    let ctx = ConditionContext::default();
    let visible = catalog.visible_names(&ctx);
    let selection: Vec<String> = if patterns.is_empty() {
        visible.iter().map(|name| name.to_string()).collect()
    } else {
        expand_requests(&visible, patterns)?
    };

    let mut rows = Vec::new();
    for name in &selection {
        match catalog.resolve(name) {
            Some(package) if package.is_visible(&ctx) => {
                if package.is_support() {
                    continue;
                }
                let source = if is_installed(layout, name) {
                    "INSTALLED".to_string()
                } else {
                    package.source.clone()
                };
                rows.push((source, name.clone(), package.descriptor.description.clone()));
            }
            _ => rows.push((
                "???".to_string(),
                name.clone(),
                "this package does not exist".to_string(),
            )),
        }
    }

    // Installed packages whose source has vanished are still worth
    // listing: their archived snapshot is all we know about them.
    if patterns.is_empty() {
        for name in installed_names(layout)? {
            if catalog.resolve(&name).is_some() {
                continue;
            }
            let description = snapshot_description(layout, &name).unwrap_or_default();
            rows.push(("INSTALLED".to_string(), name, description));
        }
    }

    rows.sort_by(|left, right| left.1.cmp(&right.1));
    for line in render::package_table(&rows) {
        println!("{line}");
    }
    Ok(())
}

fn snapshot_description(layout: &StateLayout, name: &str) -> Option<String> {
    let descriptor_path = layout.snapshot_dir(name).join(DESCRIPTOR_FILE_NAME);
    let content = std::fs::read_to_string(descriptor_path).ok()?;
    PackageDescriptor::from_toml_str(&content)
        .ok()
        .map(|descriptor| descriptor.description)
}

/// Decides the session's condition answers: probe for elevation only when
/// a package in the tentative plan requires or suggests it. The answer is
/// cached for the whole run.
fn session_conditions(
    catalog: &Catalog,
    requested: &[String],
    permissive: &ConditionContext,
) -> Result<ConditionContext> {
    let tentative = plan(catalog, requested, permissive)?;

    let requires: Vec<&str> = tentative
        .iter()
        .filter(|package| package.descriptor.superuser)
        .map(|package| package.name.as_str())
        .collect();
    let suggests: Vec<&str> = tentative
        .iter()
        .filter(|package| !package.descriptor.superuser && package.descriptor.suggests_superuser())
        .map(|package| package.name.as_str())
        .collect();

    if requires.is_empty() && suggests.is_empty() {
        return Ok(ConditionContext::default());
    }

    if !requires.is_empty() {
        println!(
            "The following packages REQUIRE superuser access to be managed:\n\t{}",
            requires.join(" ")
        );
    }
    if !suggests.is_empty() {
        println!(
            "The following packages take additional optional steps with superuser access:\n\t{}",
            suggests.join(" ")
        );
    }

    Ok(ConditionContext::new(probe_superuser()))
}

fn run_install(
    layout: &StateLayout,
    catalog: &Catalog,
    patterns: &[String],
    transformers: &[Transformer],
) -> Result<()> {
    if patterns.is_empty() {
        bail!("specify at least one package to install");
    }

    let permissive = ConditionContext::new(true);
    let visible = catalog.visible_names(&permissive);
    let expanded = expand_requests(&visible, patterns)?;

    let mut to_install = Vec::new();
    for name in expanded {
        if is_installed(layout, &name) {
            println!("{name} is already installed -- skipping.");
        } else {
            to_install.push(name);
        }
    }
    if to_install.is_empty() {
        println!("No packages need to be installed.");
        return Ok(());
    }

    let ctx = session_conditions(catalog, &to_install, &permissive)?;
    let planned = plan(catalog, &to_install, &ctx)?;

    layout.ensure_base_dirs()?;
    let _lock = StateLock::acquire(layout)?;
    let mut session = Session::create(layout)?;

    let plan_names: Vec<&str> = planned.iter().map(|package| package.name.as_str()).collect();
    render::section(&format!("Will install: {}", plan_names.join(" ")));

    let progress = render::plan_progress(planned.len() as u64, "installing");
    let mut failed: BTreeSet<String> = BTreeSet::new();
    let mut hard_failures = 0usize;
    for package in &planned {
        progress.set_message(package.name.clone());
        match install_package(layout, &mut session, package, transformers, &ctx, &failed) {
            Ok(InstallStatus::Installed) => {
                progress.println(render::status_line("installed", &package.name));
            }
            Ok(InstallStatus::AlreadyInstalled) => {
                progress.println(render::status_line(
                    "unchanged",
                    &format!("{} is already installed", package.name),
                ));
            }
            Ok(InstallStatus::SkippedNoSuperuser) => {
                failed.insert(package.name.clone());
                progress.println(render::warning_line(&format!(
                    "won't install '{}': superuser access was not granted",
                    package.name
                )));
            }
            Ok(InstallStatus::SkippedFailedDependency { dependency }) => {
                failed.insert(package.name.clone());
                progress.println(render::warning_line(&format!(
                    "won't install '{}': dependency '{dependency}' failed to install",
                    package.name
                )));
            }
            Err(error) => {
                hard_failures += 1;
                failed.insert(package.name.clone());
                progress.println(render::error_line(&format!("{error:#}")));
            }
        }
        progress.inc(1);
    }
    progress.finish_and_clear();
    session.cleanup();

    if hard_failures > 0 {
        bail!("{hard_failures} package(s) failed to install");
    }
    Ok(())
}

fn run_uninstall(layout: &StateLayout, catalog: &Catalog, patterns: &[String]) -> Result<()> {
    if patterns.is_empty() {
        bail!("specify at least one package to uninstall");
    }

    let permissive = ConditionContext::new(true);
    let visible = catalog.visible_names(&permissive);
    let expanded = expand_requests(&visible, patterns)?;

    let mut to_remove = Vec::new();
    for name in expanded {
        if !is_installed(layout, &name) {
            println!("{name} is not installed -- nothing to uninstall.");
        } else {
            to_remove.push(name);
        }
    }
    if to_remove.is_empty() {
        println!("No packages need to be removed.");
        return Ok(());
    }

    let installed = installed_names(layout)?;
    // Installed packages whose source vanished cannot be planned; they
    // are uninstalled standalone from their archived snapshot.
    let known: Vec<String> = to_remove
        .iter()
        .filter(|name| catalog.resolve(name).is_some())
        .cloned()
        .collect();
    let ctx = if known.is_empty() {
        ConditionContext::default()
    } else {
        session_conditions(catalog, &known, &permissive)?
    };
    let order = uninstall_order(catalog, &to_remove, &installed, &ctx)?;

    layout.ensure_base_dirs()?;
    let _lock = StateLock::acquire(layout)?;
    let mut session = Session::create(layout)?;

    render::section(&format!("Will remove: {}", order.join(" ")));

    let progress = render::plan_progress(order.len() as u64, "removing");
    let mut hard_failures = 0usize;
    for name in &order {
        progress.set_message(name.clone());
        match uninstall_package(layout, &mut session, name, &ctx) {
            Ok(UninstallStatus::Uninstalled) => {
                progress.println(render::status_line("removed", name));
            }
            // Dependencies that were never persisted (support packages,
            // or packages this run did not install) fall through quietly.
            Ok(UninstallStatus::NotInstalled) => {}
            Err(error) => {
                hard_failures += 1;
                progress.println(render::error_line(&format!("{error:#}")));
            }
        }
        progress.inc(1);
    }
    progress.finish_and_clear();
    session.cleanup();

    if hard_failures > 0 {
        bail!("{hard_failures} package(s) failed to uninstall");
    }
    Ok(())
}

/// The removal order for a request: the requested dependency closure in
/// reverse install order, with installed dependents of anything in the
/// removal set pulled to the front (they must go first), and installed
/// packages that no longer resolve in any source handled standalone.
pub(crate) fn uninstall_order(
    catalog: &Catalog,
    requested: &[String],
    installed: &[String],
    ctx: &ConditionContext,
) -> Result<Vec<String>> {
    let (known, orphaned): (Vec<String>, Vec<String>) = requested
        .iter()
        .cloned()
        .partition(|name| catalog.resolve(name).is_some());

    let mut order: Vec<String> = orphaned;
    if !known.is_empty() {
        let planned = plan(catalog, &known, ctx)?;
        order.extend(planned.iter().rev().map(|package| package.name.clone()));
    }

    let mut removal: BTreeSet<String> = order.iter().cloned().collect();
    loop {
        let mut added = false;
        for name in installed {
            if removal.contains(name) {
                continue;
            }
            let Some(package) = catalog.resolve(name) else {
                continue;
            };
            if package
                .dependency_names()
                .iter()
                .any(|dependency| removal.contains(dependency))
            {
                order.insert(0, name.clone());
                removal.insert(name.clone());
                added = true;
            }
        }
        if !added {
            break;
        }
    }

    Ok(order)
}
