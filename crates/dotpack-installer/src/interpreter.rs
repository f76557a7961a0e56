use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use dotpack_core::{Action, ActionKind, ConditionContext, Phase};

use crate::backup::{synthesize_inverse, BackupManager};
use crate::fs_utils::{
    copy_dir_recursive, is_confined_relative_path, relative_path_from, remove_file_if_exists,
    symlink_path,
};
use crate::state::ExecutedAction;
use crate::vars::VarExpander;

/// Everything one phase run needs: which package, which phase, the
/// directory relative source paths resolve against, the live (or
/// archived) resource directory, and the session-wide variable bindings
/// and condition answers.
pub struct PhaseContext<'a> {
    pub package: &'a str,
    pub phase: Phase,
    pub base_dir: &'a Path,
    pub package_dir: &'a Path,
    pub expander: &'a VarExpander,
    pub conditions: &'a ConditionContext,
}

/// Runs the actions of one phase in declared order. An action whose
/// conditions are unsatisfied is skipped silently; the first real failure
/// aborts the phase, naming the package, phase and action index. Returns
/// the executed-action records of the install phase (empty for the other
/// phases).
pub fn execute_phase(
    ctx: &PhaseContext,
    actions: &[Action],
    backup: &mut BackupManager,
) -> Result<Vec<ExecutedAction>> {
    let mut executed = Vec::new();

    for (index, action) in actions.iter().enumerate() {
        if !ctx.conditions.satisfies(&action.only_if, &action.not_if) {
            continue;
        }

        let record = run_action(ctx, action, backup).with_context(|| {
            format!(
                "package '{}': {} action #{} ({}) failed",
                ctx.package,
                ctx.phase.as_str(),
                index + 1,
                action.kind.tag()
            )
        })?;
        if ctx.phase == Phase::Install {
            executed.extend(record);
        }
    }

    Ok(executed)
}

#[derive(Clone, Copy)]
enum CopyMode {
    Copy,
    Symlink { relative: bool },
}

fn run_action(
    ctx: &PhaseContext,
    action: &Action,
    backup: &mut BackupManager,
) -> Result<Option<ExecutedAction>> {
    match &action.kind {
        ActionKind::Copy {
            file,
            files,
            to,
            from,
            prefix,
        } => copy_or_symlink(
            ctx,
            backup,
            &action.kind,
            CopyMode::Copy,
            file,
            files,
            to,
            from,
            prefix,
        ),
        ActionKind::Symlink {
            file,
            files,
            to,
            from,
            prefix,
            relative,
        } => copy_or_symlink(
            ctx,
            backup,
            &action.kind,
            CopyMode::Symlink {
                relative: *relative,
            },
            file,
            files,
            to,
            from,
            prefix,
        ),
        ActionKind::CopyTree { dir, to } => copy_tree(ctx, &action.kind, dir, to),
        ActionKind::MakeDirs { dirs } => make_dirs(ctx, &action.kind, dirs),
        ActionKind::Remove {
            file,
            files,
            r#where,
        } => remove_files(ctx, backup, &action.kind, file, files, r#where),
        ActionKind::RemoveDirs { dirs } => {
            remove_dirs(ctx, dirs);
            Ok(None)
        }
        ActionKind::RemoveTree { dir } => remove_tree(ctx, backup, &action.kind, dir),
        ActionKind::Replace {
            at,
            with_file,
            with_files,
            from,
            prefix,
        } => replace(ctx, backup, &action.kind, at, with_file, with_files, from, prefix),
        ActionKind::Restore { file, files } => {
            restore_files(ctx, backup, file, files)?;
            Ok(None)
        }
        ActionKind::Print { message } => {
            println!("MESSAGE FROM '{}':\n\t{}", ctx.package, message);
            Ok(None)
        }
        ActionKind::Shell { command } => {
            if !run_shell(ctx, command)? {
                return Err(anyhow!("command exited with a non-zero status: {command}"));
            }
            Ok(None)
        }
        ActionKind::ShellAll { commands } => {
            for command in commands {
                if !run_shell(ctx, command)? {
                    return Err(anyhow!(
                        "command exited with a non-zero status: {command}"
                    ));
                }
            }
            Ok(None)
        }
        ActionKind::ShellAny { commands } => {
            for command in commands {
                if run_shell(ctx, command)? {
                    return Ok(None);
                }
            }
            Err(anyhow!("every alternative command exited with a non-zero status"))
        }
        ActionKind::GitClone { repository } => {
            git_clone(ctx, repository)?;
            Ok(None)
        }
        ActionKind::CopyResource { path } => {
            copy_resource(ctx, path)?;
            Ok(None)
        }
    }
}

/// Expands a source argument and resolves it against `from` (when given)
/// and the phase base directory (when still relative).
fn source_path(ctx: &PhaseContext, from: &Option<String>, raw: &str) -> PathBuf {
    let mut expanded = PathBuf::from(ctx.expander.expand(raw));
    if let Some(from) = from {
        expanded = PathBuf::from(ctx.expander.expand(from)).join(expanded);
    }
    if expanded.is_absolute() {
        expanded
    } else {
        ctx.base_dir.join(expanded)
    }
}

fn absolute_target(ctx: &PhaseContext, raw: &str, argument: &str) -> Result<PathBuf> {
    let expanded = ctx.expander.expand(raw);
    let path = PathBuf::from(&expanded);
    if !path.is_absolute() {
        return Err(anyhow!(
            "'{argument}' must expand to an absolute path, got '{expanded}'"
        ));
    }
    Ok(path)
}

fn single_or_list<'a>(
    file: &'a Option<String>,
    files: &'a Option<Vec<String>>,
) -> Vec<&'a String> {
    match (file, files) {
        (Some(single), _) => vec![single],
        (None, Some(list)) => list.iter().collect(),
        (None, None) => Vec::new(),
    }
}

fn file_name_of(path: &Path) -> Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| anyhow!("path '{}' has no file name", path.display()))
}

#[allow(clippy::too_many_arguments)]
fn copy_or_symlink(
    ctx: &PhaseContext,
    backup: &mut BackupManager,
    kind: &ActionKind,
    mode: CopyMode,
    file: &Option<String>,
    files: &Option<Vec<String>>,
    to: &str,
    from: &Option<String>,
    prefix: &Option<String>,
) -> Result<Option<ExecutedAction>> {
    let to_path = absolute_target(ctx, to, "to")?;
    let files_mode = files.is_some();
    if files_mode && !to_path.is_dir() {
        return Err(anyhow!(
            "'to' must be an existing directory when handling multiple files"
        ));
    }

    let mut targets = Vec::new();
    for raw in single_or_list(file, files) {
        let source = source_path(ctx, from, raw);
        let source_is_dir = source.is_dir();

        // Copying into an existing directory keeps the source name; a
        // symlink does too unless the source itself is a directory, in
        // which case 'to' is the full link path.
        let append_name = match mode {
            CopyMode::Copy => to_path.is_dir(),
            CopyMode::Symlink { .. } => !source_is_dir && to_path.is_dir(),
        };
        let (target, target_key) = if append_name || prefix.is_some() {
            let named = format!(
                "{}{}",
                prefix.as_deref().unwrap_or(""),
                file_name_of(&source)?
            );
            (
                to_path.join(&named),
                PathBuf::from(to).join(&named).display().to_string(),
            )
        } else {
            (to_path.clone(), to.to_string())
        };

        if ctx.phase == Phase::Install {
            backup.save_if_exists(&target_key, &target)?;
        }

        match mode {
            CopyMode::Copy => {
                if source_is_dir {
                    return Err(anyhow!(
                        "'{}' is a directory; use 'copy-tree' for trees",
                        source.display()
                    ));
                }
                fs::copy(&source, &target).with_context(|| {
                    format!(
                        "failed copying {} to {}",
                        source.display(),
                        target.display()
                    )
                })?;
            }
            CopyMode::Symlink { relative } => {
                if target
                    .symlink_metadata()
                    .map(|metadata| !metadata.is_dir())
                    .unwrap_or(false)
                {
                    remove_file_if_exists(&target).with_context(|| {
                        format!("failed clearing previous link {}", target.display())
                    })?;
                }
                let points_to = if relative {
                    let anchor = target.parent().unwrap_or_else(|| Path::new("/"));
                    relative_path_from(anchor, &source)
                } else {
                    source.clone()
                };
                symlink_path(&points_to, &target)?;
            }
        }

        targets.push(target_key);
    }

    let inverse = synthesize_inverse(kind, &targets).map(Action::new);
    Ok(Some(ExecutedAction {
        action: kind.tag().to_string(),
        targets,
        inverse,
    }))
}

fn copy_tree(
    ctx: &PhaseContext,
    kind: &ActionKind,
    dir: &str,
    to: &str,
) -> Result<Option<ExecutedAction>> {
    let source = source_path(ctx, &None, dir);
    let to_path = absolute_target(ctx, to, "to")?;
    if to_path.exists() {
        return Err(anyhow!(
            "'to' must not exist yet when copying a tree: {}",
            to_path.display()
        ));
    }

    copy_dir_recursive(&source, &to_path)?;

    let targets = vec![to.to_string()];
    let inverse = synthesize_inverse(kind, &targets).map(Action::new);
    Ok(Some(ExecutedAction {
        action: kind.tag().to_string(),
        targets,
        inverse,
    }))
}

fn make_dirs(
    ctx: &PhaseContext,
    kind: &ActionKind,
    dirs: &[String],
) -> Result<Option<ExecutedAction>> {
    let mut targets = Vec::new();

    for raw in dirs {
        // Record the parent chain levels that do not exist yet, innermost
        // first, before creating anything: exactly those directories are
        // this action's to-undo surface.
        let mut created_chain = Vec::new();
        let mut current = Path::new(raw.as_str());
        loop {
            let as_text = current.as_os_str().to_string_lossy().to_string();
            if as_text.is_empty() || as_text == "/" {
                break;
            }
            let expanded_level = PathBuf::from(ctx.expander.expand(&as_text));
            let level_path = if expanded_level.is_absolute() {
                expanded_level
            } else {
                ctx.base_dir.join(expanded_level)
            };
            if !level_path.exists() {
                created_chain.push(as_text);
            }
            match current.parent() {
                Some(parent) => current = parent,
                None => break,
            }
        }

        let expanded = PathBuf::from(ctx.expander.expand(raw));
        let path = if expanded.is_absolute() {
            expanded
        } else {
            ctx.base_dir.join(expanded)
        };
        fs::create_dir_all(&path)
            .with_context(|| format!("failed creating directories {}", path.display()))?;

        targets.extend(created_chain);
    }

    let inverse = synthesize_inverse(kind, &targets).map(Action::new);
    Ok(Some(ExecutedAction {
        action: kind.tag().to_string(),
        targets,
        inverse,
    }))
}

fn remove_files(
    ctx: &PhaseContext,
    backup: &mut BackupManager,
    kind: &ActionKind,
    file: &Option<String>,
    files: &Option<Vec<String>>,
    r#where: &Option<String>,
) -> Result<Option<ExecutedAction>> {
    let where_path = match r#where {
        Some(raw) => {
            let path = absolute_target(ctx, raw, "where")?;
            if !path.is_dir() {
                return Err(anyhow!("'where' must be an existing directory when given"));
            }
            Some(path)
        }
        None => None,
    };

    let mut targets = Vec::new();
    for raw in single_or_list(file, files) {
        let expanded = ctx.expander.expand(raw);
        let (real, key) = match (&where_path, r#where) {
            (Some(base), Some(where_raw)) => (
                base.join(&expanded),
                PathBuf::from(where_raw).join(raw).display().to_string(),
            ),
            _ => {
                let path = PathBuf::from(&expanded);
                if !path.is_absolute() {
                    return Err(anyhow!(
                        "without 'where', every file must expand to an absolute path, got '{expanded}'"
                    ));
                }
                (path, raw.clone())
            }
        };

        if ctx.phase == Phase::Install {
            backup.save_if_exists(&key, &real)?;
        }

        // Delete files and symlinks; directories are remove-tree's
        // business, missing paths are fine.
        if real
            .symlink_metadata()
            .map(|metadata| !metadata.is_dir())
            .unwrap_or(false)
        {
            fs::remove_file(&real)
                .with_context(|| format!("failed deleting {}", real.display()))?;
        }

        targets.push(key);
    }

    let inverse = synthesize_inverse(kind, &targets).map(Action::new);
    Ok(Some(ExecutedAction {
        action: kind.tag().to_string(),
        targets,
        inverse,
    }))
}

/// Best effort by design: a still-populated directory is the user's data,
/// not a failure.
fn remove_dirs(ctx: &PhaseContext, dirs: &[String]) {
    for raw in dirs {
        let expanded = PathBuf::from(ctx.expander.expand(raw));
        let path = if expanded.is_absolute() {
            expanded
        } else {
            ctx.base_dir.join(expanded)
        };
        if let Err(error) = fs::remove_dir(&path) {
            eprintln!(
                "warning: could not remove directory '{}': {}",
                path.display(),
                error
            );
        }
    }
}

fn remove_tree(
    ctx: &PhaseContext,
    backup: &mut BackupManager,
    kind: &ActionKind,
    dir: &str,
) -> Result<Option<ExecutedAction>> {
    let expanded = PathBuf::from(ctx.expander.expand(dir));
    let path = if expanded.is_absolute() {
        expanded
    } else {
        ctx.base_dir.join(expanded)
    };
    if !path.is_dir() {
        return Err(anyhow!(
            "'dir' must be an existing directory: {}",
            path.display()
        ));
    }

    if ctx.phase == Phase::Install {
        backup.save_if_exists(dir, &path)?;
    }
    fs::remove_dir_all(&path)
        .with_context(|| format!("failed removing tree {}", path.display()))?;

    let targets = vec![dir.to_string()];
    let inverse = synthesize_inverse(kind, &targets).map(Action::new);
    Ok(Some(ExecutedAction {
        action: kind.tag().to_string(),
        targets,
        inverse,
    }))
}

#[allow(clippy::too_many_arguments)]
fn replace(
    ctx: &PhaseContext,
    backup: &mut BackupManager,
    kind: &ActionKind,
    at: &str,
    with_file: &Option<String>,
    with_files: &Option<Vec<String>>,
    from: &Option<String>,
    prefix: &Option<String>,
) -> Result<Option<ExecutedAction>> {
    let at_path = absolute_target(ctx, at, "at")?;
    let files_mode = with_files.is_some();
    if files_mode && !at_path.is_dir() {
        return Err(anyhow!(
            "'at' must be an existing directory when replacing multiple files"
        ));
    }

    let mut targets = Vec::new();
    for raw in single_or_list(with_file, with_files) {
        let source = source_path(ctx, from, raw);

        let (target, target_key) = if at_path.is_dir() {
            let named = format!(
                "{}{}",
                prefix.as_deref().unwrap_or(""),
                file_name_of(&source)?
            );
            (
                at_path.join(&named),
                PathBuf::from(at).join(&named).display().to_string(),
            )
        } else {
            (at_path.clone(), at.to_string())
        };

        if ctx.phase == Phase::Install {
            backup.save_if_exists(&target_key, &target)?;
        }
        fs::copy(&source, &target).with_context(|| {
            format!(
                "failed copying {} over {}",
                source.display(),
                target.display()
            )
        })?;

        targets.push(target_key);
    }

    let inverse = synthesize_inverse(kind, &targets).map(Action::new);
    Ok(Some(ExecutedAction {
        action: kind.tag().to_string(),
        targets,
        inverse,
    }))
}

fn restore_files(
    ctx: &PhaseContext,
    backup: &BackupManager,
    file: &Option<String>,
    files: &Option<Vec<String>>,
) -> Result<()> {
    for raw in single_or_list(file, files) {
        let expanded = ctx.expander.expand(raw);
        let real = PathBuf::from(&expanded);
        if !real.is_absolute() {
            return Err(anyhow!(
                "every restored file must expand to an absolute path, got '{expanded}'"
            ));
        }

        if !backup.restore(raw, &real)? {
            eprintln!(
                "warning: no backup found for '{}' in package '{}', leaving it as-is",
                expanded, ctx.package
            );
        }
    }
    Ok(())
}

fn run_shell(ctx: &PhaseContext, command_raw: &str) -> Result<bool> {
    let command = ctx.expander.expand(command_raw);

    let mut invocation = if cfg!(windows) {
        let mut invocation = Command::new("cmd");
        invocation.arg("/C").arg(&command);
        invocation
    } else {
        let mut invocation = Command::new("sh");
        invocation.arg("-c").arg(&command);
        invocation
    };
    invocation.current_dir(ctx.base_dir);
    for (key, value) in ctx.expander.bindings() {
        invocation.env(key, value);
    }

    let status = invocation
        .status()
        .with_context(|| format!("failed spawning shell for: {command}"))?;
    Ok(status.success())
}

fn git_clone(ctx: &PhaseContext, repository: &str) -> Result<()> {
    let repository = ctx.expander.expand(repository);
    let status = Command::new("git")
        .args(["clone", &repository, "--origin", "upstream", "--depth", "1"])
        .current_dir(ctx.base_dir)
        .status()
        .with_context(|| format!("failed spawning git clone for '{repository}'"))?;
    if !status.success() {
        return Err(anyhow!("git clone of '{repository}' failed"));
    }
    Ok(())
}

fn copy_resource(ctx: &PhaseContext, path: &str) -> Result<()> {
    let relative = PathBuf::from(path);
    if !is_confined_relative_path(&relative) {
        return Err(anyhow!(
            "'path' must stay inside the package directory: {path}"
        ));
    }
    if relative.as_os_str().is_empty() || relative == Path::new(".") {
        return Err(anyhow!("resource-copying the entire package directory is forbidden"));
    }

    let source = ctx.package_dir.join(&relative);
    let target = ctx.base_dir.join(&relative);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed creating {}", parent.display()))?;
    }

    if source.is_file() {
        fs::copy(&source, &target).with_context(|| {
            format!(
                "failed copying resource {} to {}",
                source.display(),
                target.display()
            )
        })?;
    } else if source.is_dir() {
        copy_dir_recursive(&source, &target)?;
    } else {
        return Err(anyhow!(
            "no such resource '{path}' relative to the package directory"
        ));
    }
    Ok(())
}
