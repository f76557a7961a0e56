use std::collections::HashSet;

use anyhow::{anyhow, Result};

const GLOBBERS: [&str; 2] = ["*", "__ALL__"];

/// Expands `group.*` / `group.__ALL__` patterns against the currently
/// resolvable names: the group package itself plus every name under it,
/// sorted. Plain names pass through untouched; the result keeps the first
/// occurrence of every name.
pub fn expand_requests(available: &[&str], patterns: &[String]) -> Result<Vec<String>> {
    let mut expanded = Vec::new();

    for pattern in patterns {
        let Some(group) = glob_prefix(pattern)? else {
            expanded.push(pattern.clone());
            continue;
        };

        let mut matched: Vec<String> = available
            .iter()
            .copied()
            .filter(|name| {
                *name == group
                    || name
                        .strip_prefix(&group)
                        .is_some_and(|rest| rest.starts_with('.'))
            })
            .map(str::to_string)
            .collect();
        matched.sort();
        expanded.extend(matched);
    }

    let mut seen = HashSet::new();
    expanded.retain(|name| seen.insert(name.clone()));
    Ok(expanded)
}

/// The group name a glob pattern covers, or None for a plain package name.
fn glob_prefix(pattern: &str) -> Result<Option<String>> {
    let Some(globber) = GLOBBERS
        .iter()
        .find(|globber| pattern.ends_with(*globber))
    else {
        return Ok(None);
    };

    let stem = &pattern[..pattern.len() - globber.len()];
    let Some(group) = stem.strip_suffix('.') else {
        return Err(anyhow!(
            "glob pattern '{pattern}' needs a closing '.' before the '{globber}'"
        ));
    };
    if group.is_empty() {
        return Err(anyhow!("glob pattern '{pattern}' names no package tree"));
    }
    if GLOBBERS.iter().any(|globber| group.contains(globber)) {
        return Err(anyhow!(
            "glob pattern '{pattern}' must not contain more than one glob"
        ));
    }

    Ok(Some(group.to_string()))
}
