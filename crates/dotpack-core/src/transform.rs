use crate::action::{Action, ActionKind};

/// Globally enabled rewrite rules over install action lists. A closed set:
/// a new transformer is a new variant with its own applicability predicate
/// and rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transformer {
    /// Rewrites `copy` and `copy-tree` actions into equivalent `symlink`
    /// actions pointing at the original source path, so the deployed file
    /// can be edited in place and versioned back to the source tree.
    CopiesAsSymlinks,
}

impl Transformer {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "copies-as-symlinks" => Some(Self::CopiesAsSymlinks),
            _ => None,
        }
    }

    pub fn id(self) -> &'static str {
        match self {
            Self::CopiesAsSymlinks => "copies-as-symlinks",
        }
    }

    fn applies_to(self, kind: &ActionKind) -> bool {
        match self {
            Self::CopiesAsSymlinks => {
                matches!(kind, ActionKind::Copy { .. } | ActionKind::CopyTree { .. })
            }
        }
    }

    fn rewrite(self, action: Action) -> Action {
        match self {
            Self::CopiesAsSymlinks => rewrite_copy_as_symlink(action),
        }
    }
}

/// Applies every enabled transformer, in order, to each action. An action
/// is left untouched when the transformer does not apply to its type, when
/// the action opts out by transformer name, or when the action mentions the
/// prepare scratch directory (a symlink into it would dangle once the
/// session ends).
pub fn apply_transformers(actions: Vec<Action>, enabled: &[Transformer]) -> Vec<Action> {
    actions
        .into_iter()
        .map(|mut action| {
            for transformer in enabled {
                if !transformer.applies_to(&action.kind) {
                    continue;
                }
                let opted_out = action.transformer_opted_out(transformer.id());
                action.transform.remove(transformer.id());
                if opted_out || action.mentions("$TEMPORARY_DIR") {
                    continue;
                }
                action = transformer.rewrite(action);
            }
            action
        })
        .collect()
}

fn rewrite_copy_as_symlink(action: Action) -> Action {
    let kind = match action.kind {
        ActionKind::Copy {
            file,
            files,
            to,
            from,
            prefix,
        } => ActionKind::Symlink {
            file,
            files,
            to,
            from,
            prefix,
            relative: true,
        },
        ActionKind::CopyTree { dir, to } => ActionKind::Symlink {
            file: Some(dir),
            files: None,
            to,
            from: None,
            prefix: None,
            relative: true,
        },
        other => other,
    };
    Action { kind, ..action }
}
