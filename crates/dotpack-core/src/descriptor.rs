use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::action::{Action, Phase};
use crate::condition::Condition;
use crate::transform::Transformer;

/// The file each package directory must carry for the directory to count
/// as a package.
pub const DESCRIPTOR_FILE_NAME: &str = "package.toml";

/// Decoded `package.toml`: metadata, dependency declarations and the three
/// phase action lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PackageDescriptor {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(default = "default_true")]
    pub depend_on_parent: bool,
    #[serde(default)]
    pub superuser: bool,
    #[serde(default)]
    pub support: bool,
    #[serde(default, rename = "if", skip_serializing_if = "Vec::is_empty")]
    pub only_if: Vec<Condition>,
    #[serde(default, rename = "if-not", skip_serializing_if = "Vec::is_empty")]
    pub not_if: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prepare: Vec<Action>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub install: Vec<Action>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uninstall: Vec<Action>,
}

fn default_true() -> bool {
    true
}

impl PackageDescriptor {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let descriptor: Self =
            toml::from_str(input).context("failed to parse package descriptor")?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).context("failed to serialize package descriptor")
    }

    fn validate(&self) -> Result<()> {
        if self.support && !self.uninstall.is_empty() {
            return Err(anyhow!(
                "a support package must not declare an 'uninstall' section"
            ));
        }

        for (phase, actions) in [
            (Phase::Prepare, &self.prepare),
            (Phase::Install, &self.install),
            (Phase::Uninstall, &self.uninstall),
        ] {
            for (index, action) in actions.iter().enumerate() {
                action.validate(phase).with_context(|| {
                    format!("invalid '{}' action #{}", phase.as_str(), index + 1)
                })?;
                for transformer_id in action.transform.keys() {
                    if Transformer::parse(transformer_id).is_none() {
                        return Err(anyhow!(
                            "'{}' action #{} configures unknown transformer '{}'",
                            phase.as_str(),
                            index + 1,
                            transformer_id
                        ));
                    }
                }
            }
        }

        Ok(())
    }

    /// Whether the descriptor mentions the superuser condition anywhere,
    /// meaning the run may want the privilege probe without the package
    /// strictly requiring it.
    pub fn suggests_superuser(&self) -> bool {
        let mentions = |conditions: &[Condition]| conditions.contains(&Condition::Superuser);
        if mentions(&self.only_if) || mentions(&self.not_if) {
            return true;
        }
        self.prepare
            .iter()
            .chain(self.install.iter())
            .chain(self.uninstall.iter())
            .any(|action| mentions(&action.only_if) || mentions(&action.not_if))
    }
}
