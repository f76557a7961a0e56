use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::condition::Condition;

/// One ordered action list of a package descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Prepare,
    Install,
    Uninstall,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Prepare => "prepare",
            Self::Install => "install",
            Self::Uninstall => "uninstall",
        }
    }
}

/// A single entry of a phase action list: the typed operation plus the
/// per-action condition gates and transformer opt-outs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(flatten)]
    pub kind: ActionKind,
    #[serde(default, rename = "if", skip_serializing_if = "Vec::is_empty")]
    pub only_if: Vec<Condition>,
    #[serde(default, rename = "if-not", skip_serializing_if = "Vec::is_empty")]
    pub not_if: Vec<Condition>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub transform: BTreeMap<String, bool>,
}

impl Action {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            only_if: Vec::new(),
            not_if: Vec::new(),
            transform: BTreeMap::new(),
        }
    }

    /// Whether the per-action `transform` table switches the named
    /// transformer off for this action.
    pub fn transformer_opted_out(&self, transformer_id: &str) -> bool {
        self.transform.get(transformer_id) == Some(&false)
    }

    /// Whether any string argument of the action mentions `needle`
    /// (used to keep transformers away from session-scoped paths).
    pub fn mentions(&self, needle: &str) -> bool {
        self.kind
            .argument_strings()
            .iter()
            .any(|argument| argument.contains(needle))
    }

    /// Shape checks that the serde decode cannot express: exclusive
    /// argument pairs, prefix applicability and phase restrictions.
    /// A descriptor carrying an invalid action is rejected before any
    /// action of the package runs.
    pub fn validate(&self, phase: Phase) -> Result<()> {
        let tag = self.kind.tag();
        match &self.kind {
            ActionKind::Copy {
                file,
                files,
                prefix,
                ..
            }
            | ActionKind::Symlink {
                file,
                files,
                prefix,
                ..
            } => {
                require_one_of(tag, "file", file, "files", files)?;
                if file.is_some() && prefix.is_some() {
                    return Err(anyhow!(
                        "'{tag}' with a single 'file' must spell the full destination in 'to' instead of using 'prefix'"
                    ));
                }
            }
            ActionKind::Replace {
                with_file,
                with_files,
                ..
            } => {
                require_one_of(tag, "with-file", with_file, "with-files", with_files)?;
            }
            ActionKind::Remove { file, files, .. } | ActionKind::Restore { file, files } => {
                require_one_of(tag, "file", file, "files", files)?;
            }
            ActionKind::MakeDirs { dirs } | ActionKind::RemoveDirs { dirs } => {
                if dirs.is_empty() {
                    return Err(anyhow!("'{tag}' must name at least one directory"));
                }
            }
            ActionKind::ShellAll { commands } | ActionKind::ShellAny { commands } => {
                if commands.is_empty() {
                    return Err(anyhow!("'{tag}' must name at least one command"));
                }
            }
            ActionKind::GitClone { .. } | ActionKind::CopyResource { .. } => {
                if phase != Phase::Prepare {
                    return Err(anyhow!(
                        "'{tag}' is only valid in the prepare phase, not in '{}'",
                        phase.as_str()
                    ));
                }
            }
            ActionKind::CopyTree { .. }
            | ActionKind::RemoveTree { .. }
            | ActionKind::Print { .. }
            | ActionKind::Shell { .. } => {}
        }
        Ok(())
    }
}

fn require_one_of(
    tag: &str,
    single_key: &str,
    single: &Option<String>,
    multi_key: &str,
    multi: &Option<Vec<String>>,
) -> Result<()> {
    match (single, multi) {
        (Some(_), Some(_)) => Err(anyhow!(
            "'{tag}' must specify either '{single_key}' or '{multi_key}', not both"
        )),
        (None, None) => Err(anyhow!(
            "'{tag}' must specify one of '{single_key}' or '{multi_key}'"
        )),
        (None, Some(values)) if values.is_empty() => {
            Err(anyhow!("'{tag}' lists no entries under '{multi_key}'"))
        }
        _ => Ok(()),
    }
}

/// Closed set of operations a descriptor may request. Unknown `action`
/// tags or wrongly shaped arguments fail the descriptor decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum ActionKind {
    #[serde(rename_all = "kebab-case")]
    Copy {
        #[serde(skip_serializing_if = "Option::is_none")]
        file: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        files: Option<Vec<String>>,
        to: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        prefix: Option<String>,
    },
    #[serde(rename_all = "kebab-case")]
    CopyTree { dir: String, to: String },
    #[serde(rename_all = "kebab-case")]
    MakeDirs { dirs: Vec<String> },
    #[serde(rename_all = "kebab-case")]
    Remove {
        #[serde(skip_serializing_if = "Option::is_none")]
        file: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        files: Option<Vec<String>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        r#where: Option<String>,
    },
    #[serde(rename_all = "kebab-case")]
    RemoveDirs { dirs: Vec<String> },
    #[serde(rename_all = "kebab-case")]
    RemoveTree { dir: String },
    #[serde(rename_all = "kebab-case")]
    Replace {
        at: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        with_file: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        with_files: Option<Vec<String>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        prefix: Option<String>,
    },
    #[serde(rename_all = "kebab-case")]
    Restore {
        #[serde(skip_serializing_if = "Option::is_none")]
        file: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        files: Option<Vec<String>>,
    },
    #[serde(rename_all = "kebab-case")]
    Symlink {
        #[serde(skip_serializing_if = "Option::is_none")]
        file: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        files: Option<Vec<String>>,
        to: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        prefix: Option<String>,
        #[serde(default)]
        relative: bool,
    },
    #[serde(rename_all = "kebab-case")]
    Print { message: String },
    #[serde(rename_all = "kebab-case")]
    Shell { command: String },
    #[serde(rename_all = "kebab-case")]
    ShellAll { commands: Vec<String> },
    #[serde(rename_all = "kebab-case")]
    ShellAny { commands: Vec<String> },
    #[serde(rename_all = "kebab-case")]
    GitClone { repository: String },
    #[serde(rename_all = "kebab-case")]
    CopyResource { path: String },
}

impl ActionKind {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Copy { .. } => "copy",
            Self::CopyTree { .. } => "copy-tree",
            Self::MakeDirs { .. } => "make-dirs",
            Self::Remove { .. } => "remove",
            Self::RemoveDirs { .. } => "remove-dirs",
            Self::RemoveTree { .. } => "remove-tree",
            Self::Replace { .. } => "replace",
            Self::Restore { .. } => "restore",
            Self::Symlink { .. } => "symlink",
            Self::Print { .. } => "print",
            Self::Shell { .. } => "shell",
            Self::ShellAll { .. } => "shell-all",
            Self::ShellAny { .. } => "shell-any",
            Self::GitClone { .. } => "git-clone",
            Self::CopyResource { .. } => "copy-resource",
        }
    }

    /// Every string argument the action carries, for substring scans.
    pub fn argument_strings(&self) -> Vec<&str> {
        fn push_option<'a>(arguments: &mut Vec<&'a str>, value: &'a Option<String>) {
            if let Some(value) = value.as_deref() {
                arguments.push(value);
            }
        }

        let mut arguments: Vec<&str> = Vec::new();
        match self {
            Self::Copy {
                file,
                files,
                to,
                from,
                prefix,
            }
            | Self::Symlink {
                file,
                files,
                to,
                from,
                prefix,
                ..
            } => {
                push_option(&mut arguments, file);
                if let Some(files) = files {
                    arguments.extend(files.iter().map(String::as_str));
                }
                arguments.push(to);
                push_option(&mut arguments, from);
                push_option(&mut arguments, prefix);
            }
            Self::CopyTree { dir, to } => {
                arguments.push(dir);
                arguments.push(to);
            }
            Self::MakeDirs { dirs } | Self::RemoveDirs { dirs } => {
                arguments.extend(dirs.iter().map(String::as_str));
            }
            Self::Remove {
                file,
                files,
                r#where,
            } => {
                push_option(&mut arguments, file);
                if let Some(files) = files {
                    arguments.extend(files.iter().map(String::as_str));
                }
                push_option(&mut arguments, r#where);
            }
            Self::RemoveTree { dir } => arguments.push(dir),
            Self::Replace {
                at,
                with_file,
                with_files,
                from,
                prefix,
            } => {
                arguments.push(at);
                push_option(&mut arguments, with_file);
                if let Some(files) = with_files {
                    arguments.extend(files.iter().map(String::as_str));
                }
                push_option(&mut arguments, from);
                push_option(&mut arguments, prefix);
            }
            Self::Restore { file, files } => {
                push_option(&mut arguments, file);
                if let Some(files) = files {
                    arguments.extend(files.iter().map(String::as_str));
                }
            }
            Self::Print { message } => arguments.push(message),
            Self::Shell { command } => arguments.push(command),
            Self::ShellAll { commands } | Self::ShellAny { commands } => {
                arguments.extend(commands.iter().map(String::as_str));
            }
            Self::GitClone { repository } => arguments.push(repository),
            Self::CopyResource { path } => arguments.push(path),
        }
        arguments
    }
}
