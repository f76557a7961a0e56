use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// One prioritized filesystem location searched for packages. Lower
/// priority values are searched first and shadow later sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub name: String,
    pub directory: String,
    pub priority: u32,
}

impl SourceRecord {
    /// The configured directory with a leading `~` expanded against the
    /// user's home directory.
    pub fn resolved_directory(&self) -> PathBuf {
        if let Some(rest) = self.directory.strip_prefix("~/") {
            if let Some(home) = home_dir() {
                return home.join(rest);
            }
        }
        PathBuf::from(&self.directory)
    }
}

fn home_dir() -> Option<PathBuf> {
    if cfg!(windows) {
        std::env::var("USERPROFILE").ok().map(PathBuf::from)
    } else {
        std::env::var("HOME").ok().map(PathBuf::from)
    }
}

/// The source list a fresh setup starts from.
pub fn default_sources() -> Vec<SourceRecord> {
    vec![SourceRecord {
        name: "my-packages".to_string(),
        directory: "~/dotpack/packages".to_string(),
        priority: 10,
    }]
}

/// Persisted source-root configuration, `sources.toml` under the state
/// root.
#[derive(Debug, Clone)]
pub struct SourceStore {
    state_root: PathBuf,
}

impl SourceStore {
    pub fn new(state_root: impl Into<PathBuf>) -> Self {
        Self {
            state_root: state_root.into(),
        }
    }

    pub fn sources_file_path(&self) -> PathBuf {
        self.state_root.join("sources.toml")
    }

    pub fn add_source(&self, source: SourceRecord) -> Result<()> {
        validate_source_name(&source.name)?;

        let mut state = self.load_state()?;
        if state
            .sources
            .iter()
            .any(|existing| existing.name == source.name)
        {
            anyhow::bail!("source '{}' already exists", source.name);
        }

        state.sources.push(source);
        sort_sources(&mut state.sources);
        self.save_state(&state)
    }

    pub fn remove_source(&self, name: &str) -> Result<()> {
        let mut state = self.load_state()?;
        let before = state.sources.len();
        state.sources.retain(|source| source.name != name);
        if state.sources.len() == before {
            anyhow::bail!("source '{}' not found", name);
        }

        sort_sources(&mut state.sources);
        self.save_state(&state)
    }

    /// The configured sources in priority order. A missing configuration
    /// file yields the built-in default list without persisting it.
    pub fn list_sources(&self) -> Result<Vec<SourceRecord>> {
        let path = self.sources_file_path();
        if !path.exists() {
            let mut sources = default_sources();
            sort_sources(&mut sources);
            return Ok(sources);
        }

        let mut state = self.load_state()?;
        sort_sources(&mut state.sources);
        Ok(state.sources)
    }

    /// Writes the current source list out so the user has a file to edit,
    /// returning its path.
    pub fn materialize(&self) -> Result<PathBuf> {
        let path = self.sources_file_path();
        if !path.exists() {
            let state = SourceStateFile {
                version: state_file_version(),
                sources: self.list_sources()?,
            };
            self.save_state(&state)?;
        }
        Ok(path)
    }

    fn load_state(&self) -> Result<SourceStateFile> {
        let path = self.sources_file_path();
        if !path.exists() {
            return Ok(SourceStateFile {
                version: state_file_version(),
                sources: default_sources(),
            });
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed reading source list: {}", path.display()))?;
        let mut state: SourceStateFile = toml::from_str(&content)
            .with_context(|| format!("failed parsing source list: {}", path.display()))?;
        sort_sources(&mut state.sources);
        Ok(state)
    }

    fn save_state(&self, state: &SourceStateFile) -> Result<()> {
        fs::create_dir_all(&self.state_root).with_context(|| {
            format!("failed creating state root: {}", self.state_root.display())
        })?;

        let path = self.sources_file_path();
        let mut state = state.clone();
        sort_sources(&mut state.sources);
        let content = toml::to_string(&state)
            .with_context(|| format!("failed serializing source list: {}", path.display()))?;
        fs::write(&path, content)
            .with_context(|| format!("failed writing source list: {}", path.display()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SourceStateFile {
    #[serde(default = "state_file_version")]
    version: u32,
    #[serde(default)]
    sources: Vec<SourceRecord>,
}

fn state_file_version() -> u32 {
    1
}

fn sort_sources(sources: &mut [SourceRecord]) {
    sources.sort_by(|left, right| {
        left.priority
            .cmp(&right.priority)
            .then_with(|| left.name.cmp(&right.name))
    });
}

fn validate_source_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 64 {
        anyhow::bail!("invalid source name: must not be empty or overlong");
    }

    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        anyhow::bail!("invalid source name: '{name}'");
    };

    let first_is_valid = first.is_ascii_lowercase() || first.is_ascii_digit();
    let rest_is_valid =
        chars.all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '_');
    if !first_is_valid || !rest_is_valid {
        anyhow::bail!("invalid source name: '{name}'");
    }

    Ok(())
}
