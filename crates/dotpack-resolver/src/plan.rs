use std::collections::{BTreeMap, BTreeSet};

use anyhow::{anyhow, Result};
use dotpack_core::ConditionContext;
use dotpack_registry::{Catalog, Package};

/// Builds the dependency-ordered installation plan for the requested
/// logical names: the transitive closure of explicit dependencies plus the
/// implicit parent edge, topologically sorted.
///
/// The order is deterministic: among packages whose dependencies are all
/// placed, ties break by first-requested order, then lexicographic name.
/// The whole plan fails on an unknown package, a condition-gated
/// dependency, a support package requested directly, or a dependency
/// cycle — no partial order is ever returned.
pub fn plan<'a>(
    catalog: &'a Catalog,
    requested: &[String],
    ctx: &ConditionContext,
) -> Result<Vec<&'a Package>> {
    for name in requested {
        let package = catalog
            .resolve(name)
            .ok_or_else(|| anyhow!("unknown package '{name}'"))?;
        if !package.is_visible(ctx) {
            return Err(anyhow!(
                "package '{name}' is gated by an unsatisfied condition"
            ));
        }
        if package.is_support() {
            return Err(anyhow!(
                "'{name}' is a support package and cannot be a direct target; it only installs as a dependency of another package"
            ));
        }
    }

    let dependencies = collect_closure(catalog, requested, ctx)?;
    detect_cycles(&dependencies)?;
    let order = deterministic_topo_order(&dependencies, requested);

    Ok(order
        .iter()
        .filter_map(|name| catalog.resolve(name))
        .collect())
}

/// Edge map `package -> direct dependencies` over the closure of the
/// requested names. Explicit dependencies must resolve and be visible; the
/// implicit parent edge is forgiven when the parent is not a real package.
fn collect_closure(
    catalog: &Catalog,
    requested: &[String],
    ctx: &ConditionContext,
) -> Result<BTreeMap<String, BTreeSet<String>>> {
    let mut dependencies: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut pending: Vec<String> = requested.to_vec();

    while let Some(name) = pending.pop() {
        if dependencies.contains_key(&name) {
            continue;
        }
        let package = catalog
            .resolve(&name)
            .ok_or_else(|| anyhow!("unknown package '{name}'"))?;

        let mut edges = BTreeSet::new();
        for dependency in &package.descriptor.dependencies {
            let resolved = catalog.resolve(dependency).ok_or_else(|| {
                anyhow!("unknown package '{dependency}' (dependency of '{name}')")
            })?;
            if !resolved.is_visible(ctx) {
                return Err(anyhow!(
                    "package '{dependency}' (dependency of '{name}') is gated by an unsatisfied condition"
                ));
            }
            edges.insert(dependency.clone());
        }

        if package.descriptor.depend_on_parent {
            if let Some(parent) = package.parent() {
                if let Some(resolved) = catalog.resolve(&parent) {
                    if !resolved.is_visible(ctx) {
                        return Err(anyhow!(
                            "package '{parent}' (parent of '{name}') is gated by an unsatisfied condition"
                        ));
                    }
                    edges.insert(parent);
                }
            }
        }

        pending.extend(edges.iter().cloned());
        dependencies.insert(name, edges);
    }

    Ok(dependencies)
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// Depth-first traversal flagging back-edges. Reports the names on the
/// offending path so the user can see the loop.
fn detect_cycles(dependencies: &BTreeMap<String, BTreeSet<String>>) -> Result<()> {
    let mut marks: BTreeMap<String, Mark> = dependencies
        .keys()
        .map(|name| (name.clone(), Mark::Unvisited))
        .collect();
    let mut path: Vec<String> = Vec::new();

    for start in dependencies.keys() {
        if marks.get(start) == Some(&Mark::Unvisited) {
            visit(start, dependencies, &mut marks, &mut path)?;
        }
    }

    Ok(())
}

fn visit(
    name: &str,
    dependencies: &BTreeMap<String, BTreeSet<String>>,
    marks: &mut BTreeMap<String, Mark>,
    path: &mut Vec<String>,
) -> Result<()> {
    marks.insert(name.to_string(), Mark::OnStack);
    path.push(name.to_string());

    if let Some(edges) = dependencies.get(name) {
        for next in edges {
            match marks.get(next).copied().unwrap_or(Mark::Done) {
                Mark::OnStack => {
                    let position = path
                        .iter()
                        .position(|entry| entry == next)
                        .unwrap_or(0);
                    let mut cycle: Vec<&str> =
                        path[position..].iter().map(String::as_str).collect();
                    cycle.push(next.as_str());
                    return Err(anyhow!(
                        "dependency cycle detected involving: {}",
                        cycle.join(" -> ")
                    ));
                }
                Mark::Unvisited => visit(next, dependencies, marks, path)?,
                Mark::Done => {}
            }
        }
    }

    path.pop();
    marks.insert(name.to_string(), Mark::Done);
    Ok(())
}

fn deterministic_topo_order(
    dependencies: &BTreeMap<String, BTreeSet<String>>,
    requested: &[String],
) -> Vec<String> {
    let rank = |name: &str| -> usize {
        requested
            .iter()
            .position(|requested_name| requested_name == name)
            .unwrap_or(usize::MAX)
    };

    let mut reverse: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
    for (name, edges) in dependencies {
        in_degree.insert(name.as_str(), edges.len());
        reverse.entry(name.as_str()).or_default();
        for dependency in edges {
            reverse
                .entry(dependency.as_str())
                .or_default()
                .insert(name.as_str());
        }
    }

    let mut ready: BTreeSet<(usize, &str)> = in_degree
        .iter()
        .filter_map(|(name, degree)| (*degree == 0).then_some((rank(name), *name)))
        .collect();
    let mut ordered = Vec::with_capacity(dependencies.len());

    while let Some((_, next)) = ready.pop_first() {
        ordered.push(next.to_string());
        if let Some(dependents) = reverse.get(next) {
            for dependent in dependents {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        ready.insert((rank(dependent), *dependent));
                    }
                }
            }
        }
    }

    ordered
}
