use serde::{Deserialize, Serialize};

/// Closed set of condition names a descriptor may gate on. Extending the
/// predicate registry means adding a variant here, never accepting an
/// arbitrary string at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    Superuser,
}

impl Condition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Superuser => "superuser",
        }
    }
}

/// Session-wide answers to the condition predicates. Built once per
/// invocation and shared read-only by every package afterwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConditionContext {
    superuser_allowed: bool,
}

impl ConditionContext {
    pub fn new(superuser_allowed: bool) -> Self {
        Self { superuser_allowed }
    }

    pub fn superuser_allowed(&self) -> bool {
        self.superuser_allowed
    }

    pub fn evaluate(&self, condition: Condition) -> bool {
        match condition {
            Condition::Superuser => self.superuser_allowed,
        }
    }

    /// True iff every condition in `positive` holds and none in `negative`
    /// does. Empty lists always pass.
    pub fn satisfies(&self, positive: &[Condition], negative: &[Condition]) -> bool {
        positive.iter().all(|condition| self.evaluate(*condition))
            && !negative.iter().any(|condition| self.evaluate(*condition))
    }
}
