use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dotpack_core::{ConditionContext, PackageDescriptor, DESCRIPTOR_FILE_NAME};

use crate::source_store::SourceRecord;

/// A package discovered under one source root: the dotted logical name,
/// the owning source, and the decoded descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Package {
    pub name: String,
    pub source: String,
    pub priority: u32,
    pub directory: PathBuf,
    pub descriptor: PackageDescriptor,
}

impl Package {
    /// Support packages install only as dependencies and leave no
    /// persisted state. Any `internal` name segment forces the flag.
    pub fn is_support(&self) -> bool {
        self.descriptor.support || self.name.split('.').any(|segment| segment == "internal")
    }

    /// The dotted-path parent name, if the package is not top-level.
    pub fn parent(&self) -> Option<String> {
        self.name
            .rsplit_once('.')
            .map(|(parent, _)| parent.to_string())
    }

    /// Explicit dependencies plus the implicit parent edge. Whether the
    /// parent actually resolves to a package is the resolver's business.
    pub fn dependency_names(&self) -> Vec<String> {
        let mut names = self.descriptor.dependencies.clone();
        if self.descriptor.depend_on_parent {
            if let Some(parent) = self.parent() {
                names.push(parent);
            }
        }
        names
    }

    /// Package-level condition gate. An unsatisfied package is invisible:
    /// it cannot be listed, requested, or pulled in as a dependency.
    pub fn is_visible(&self, ctx: &ConditionContext) -> bool {
        ctx.satisfies(&self.descriptor.only_if, &self.descriptor.not_if)
    }
}

/// A descriptor that could not be decoded. Reported, but never aborts
/// discovery of sibling packages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryWarning {
    pub source: String,
    pub location: PathBuf,
    pub message: String,
}

/// Every package resolvable in this invocation, keyed by logical name,
/// first-source-wins.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    packages: BTreeMap<String, Package>,
    warnings: Vec<DiscoveryWarning>,
}

impl Catalog {
    pub fn resolve(&self, name: &str) -> Option<&Package> {
        self.packages.get(name)
    }

    pub fn packages(&self) -> impl Iterator<Item = &Package> {
        self.packages.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.packages.keys().map(String::as_str)
    }

    /// Names resolvable under the given session conditions.
    pub fn visible_names(&self, ctx: &ConditionContext) -> Vec<&str> {
        self.packages
            .values()
            .filter(|package| package.is_visible(ctx))
            .map(|package| package.name.as_str())
            .collect()
    }

    pub fn warnings(&self) -> &[DiscoveryWarning] {
        &self.warnings
    }
}

/// Walks every source root in priority order and maps the directory
/// hierarchy to dotted logical package names. The first source to define
/// a name wins; later definitions are shadowed entirely.
pub fn discover(sources: &[SourceRecord]) -> Result<Catalog> {
    let mut catalog = Catalog::default();

    let mut ordered: Vec<&SourceRecord> = sources.iter().collect();
    ordered.sort_by(|left, right| {
        left.priority
            .cmp(&right.priority)
            .then_with(|| left.name.cmp(&right.name))
    });

    for source in ordered {
        let root = source.resolved_directory();
        if !root.is_dir() {
            catalog.warnings.push(DiscoveryWarning {
                source: source.name.clone(),
                location: root.clone(),
                message: "source directory does not exist".to_string(),
            });
            continue;
        }

        scan_root(source, &root, &mut catalog)?;
    }

    Ok(catalog)
}

fn scan_root(source: &SourceRecord, root: &Path, catalog: &mut Catalog) -> Result<()> {
    let mut queue: VecDeque<PathBuf> = VecDeque::new();
    queue.push_back(root.to_path_buf());

    while let Some(dir) = queue.pop_front() {
        for entry in fs::read_dir(&dir)
            .with_context(|| format!("failed reading source directory {}", dir.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }

            let path = entry.path();
            let segment = entry.file_name().to_string_lossy().to_string();
            // Names with a dot cannot be represented in the dotted logical
            // hierarchy; dot-prefixed directories (VCS metadata) included.
            if segment.contains('.') {
                continue;
            }
            queue.push_back(path.clone());

            let descriptor_path = path.join(DESCRIPTOR_FILE_NAME);
            if !descriptor_path.is_file() {
                continue;
            }

            let Some(logical_name) = logical_name_for(root, &path) else {
                continue;
            };
            if catalog.packages.contains_key(&logical_name) {
                // Shadowed by an earlier source (or an earlier duplicate).
                continue;
            }

            match load_package(source, &logical_name, &path, &descriptor_path) {
                Ok(package) => {
                    catalog.packages.insert(logical_name, package);
                }
                Err(error) => catalog.warnings.push(DiscoveryWarning {
                    source: source.name.clone(),
                    location: descriptor_path,
                    message: format!("{error:#}"),
                }),
            }
        }
    }

    Ok(())
}

fn logical_name_for(root: &Path, package_dir: &Path) -> Option<String> {
    let relative = package_dir.strip_prefix(root).ok()?;
    let segments: Vec<String> = relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy().to_string())
        .collect();
    if segments.is_empty() {
        return None;
    }
    Some(segments.join("."))
}

fn load_package(
    source: &SourceRecord,
    logical_name: &str,
    directory: &Path,
    descriptor_path: &Path,
) -> Result<Package> {
    let content = fs::read_to_string(descriptor_path)
        .with_context(|| format!("failed reading {}", descriptor_path.display()))?;
    let descriptor = PackageDescriptor::from_toml_str(&content)
        .with_context(|| format!("invalid descriptor {}", descriptor_path.display()))?;

    Ok(Package {
        name: logical_name.to_string(),
        source: source.name.clone(),
        priority: source.priority,
        directory: directory.to_path_buf(),
        descriptor,
    })
}
