use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};

pub fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    if path.symlink_metadata().is_ok() {
        fs::remove_file(path)?;
    }
    Ok(())
}

/// Removes whatever sits at `path`, file, symlink or tree. Missing paths
/// are not an error.
pub fn remove_path_if_exists(path: &Path) -> io::Result<()> {
    let Ok(metadata) = path.symlink_metadata() else {
        return Ok(());
    };
    if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Copies a file or a whole tree. The destination's parent must already
/// exist; an existing destination file is overwritten.
pub fn copy_path(source: &Path, destination: &Path) -> Result<()> {
    if source.is_dir() {
        copy_dir_recursive(source, destination)
    } else {
        fs::copy(source, destination).map(|_| ()).with_context(|| {
            format!(
                "failed copying file from {} to {}",
                source.display(),
                destination.display()
            )
        })
    }
}

pub fn copy_dir_recursive(source_root: &Path, destination_root: &Path) -> Result<()> {
    if !source_root.is_dir() {
        anyhow::bail!(
            "source location is not a directory: {}",
            source_root.display()
        );
    }

    fs::create_dir_all(destination_root).with_context(|| {
        format!("failed creating directory {}", destination_root.display())
    })?;

    let mut queue: VecDeque<(PathBuf, PathBuf)> = VecDeque::new();
    queue.push_back((source_root.to_path_buf(), destination_root.to_path_buf()));

    while let Some((from_dir, to_dir)) = queue.pop_front() {
        for entry in fs::read_dir(&from_dir)
            .with_context(|| format!("failed reading directory {}", from_dir.display()))?
        {
            let entry = entry?;
            let from_path = entry.path();
            let to_path = to_dir.join(entry.file_name());
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                fs::create_dir_all(&to_path)
                    .with_context(|| format!("failed creating directory {}", to_path.display()))?;
                queue.push_back((from_path, to_path));
            } else if file_type.is_file() {
                fs::copy(&from_path, &to_path).with_context(|| {
                    format!(
                        "failed copying file from {} to {}",
                        from_path.display(),
                        to_path.display()
                    )
                })?;
            } else if file_type.is_symlink() {
                let points_to = fs::read_link(&from_path).with_context(|| {
                    format!("failed reading symlink {}", from_path.display())
                })?;
                symlink_path(&points_to, &to_path)?;
            }
        }
    }

    Ok(())
}

#[cfg(unix)]
pub fn symlink_path(points_to: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(points_to, link).with_context(|| {
        format!(
            "failed creating symlink {} -> {}",
            link.display(),
            points_to.display()
        )
    })
}

#[cfg(windows)]
pub fn symlink_path(points_to: &Path, link: &Path) -> Result<()> {
    let result = if points_to.is_dir() {
        std::os::windows::fs::symlink_dir(points_to, link)
    } else {
        std::os::windows::fs::symlink_file(points_to, link)
    };
    result.with_context(|| {
        format!(
            "failed creating symlink {} -> {}",
            link.display(),
            points_to.display()
        )
    })
}

/// The path of `target` relative to `base` (both assumed absolute),
/// stepping up with `..` where the trees diverge.
pub fn relative_path_from(base: &Path, target: &Path) -> PathBuf {
    let base_components: Vec<Component> = base.components().collect();
    let target_components: Vec<Component> = target.components().collect();

    let mut shared = 0;
    while shared < base_components.len()
        && shared < target_components.len()
        && base_components[shared] == target_components[shared]
    {
        shared += 1;
    }

    let mut relative = PathBuf::new();
    for _ in shared..base_components.len() {
        relative.push("..");
    }
    for component in &target_components[shared..] {
        relative.push(component.as_os_str());
    }

    if relative.as_os_str().is_empty() {
        relative.push(".");
    }
    relative
}

/// True when the path stays inside the directory it is joined to: relative
/// and free of `..` components.
pub fn is_confined_relative_path(path: &Path) -> bool {
    !path.is_absolute()
        && !path
            .components()
            .any(|component| matches!(component, Component::ParentDir))
}

pub fn current_unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub fn unique_suffix() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}
