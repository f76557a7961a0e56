use super::*;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use dotpack_core::ConditionContext;
use dotpack_registry::{discover, Catalog, SourceRecord};

static TEST_ROOT_COUNTER: AtomicU64 = AtomicU64::new(0);

fn test_root() -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let sequence = TEST_ROOT_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut path = std::env::temp_dir();
    path.push(format!(
        "dotpack-resolver-tests-{}-{}-{}",
        std::process::id(),
        nanos,
        sequence
    ));
    fs::create_dir_all(&path).expect("must create test root");
    path
}

fn write_package(root: &Path, relative: &str, descriptor: &str) {
    let dir = root.join(relative);
    fs::create_dir_all(&dir).expect("must create package dir");
    fs::write(dir.join("package.toml"), descriptor).expect("must write descriptor");
}

fn catalog_from(root: &Path) -> Catalog {
    discover(&[SourceRecord {
        name: "main".to_string(),
        directory: root.display().to_string(),
        priority: 10,
    }])
    .expect("must discover")
}

fn names(order: &[&dotpack_registry::Package]) -> Vec<String> {
    order.iter().map(|package| package.name.clone()).collect()
}

fn requested(entries: &[&str]) -> Vec<String> {
    entries.iter().map(|entry| entry.to_string()).collect()
}

#[test]
fn expands_group_glob_to_sorted_members() {
    let available = vec!["editor", "shell", "shell.bash", "shell.zsh", "shellac"];
    let expanded =
        expand_requests(&available, &requested(&["shell.*"])).expect("must expand");
    assert_eq!(expanded, vec!["shell", "shell.bash", "shell.zsh"]);
}

#[test]
fn expands_all_marker_like_star() {
    let available = vec!["shell", "shell.bash"];
    let expanded =
        expand_requests(&available, &requested(&["shell.__ALL__"])).expect("must expand");
    assert_eq!(expanded, vec!["shell", "shell.bash"]);
}

#[test]
fn plain_names_pass_through_and_deduplicate() {
    let available = vec!["shell", "shell.bash"];
    let expanded = expand_requests(
        &available,
        &requested(&["editor", "shell.*", "shell.bash", "editor"]),
    )
    .expect("must expand");
    assert_eq!(expanded, vec!["editor", "shell", "shell.bash"]);
}

#[test]
fn glob_must_follow_a_dot() {
    let available = vec!["shell"];
    let error = expand_requests(&available, &requested(&["shell*"]))
        .expect_err("must reject");
    assert!(format!("{error:#}").contains("closing"), "{error:#}");
}

#[test]
fn glob_rejects_multiple_globbers() {
    let available = vec!["shell"];
    let error = expand_requests(&available, &requested(&["*.shell.*"]))
        .expect_err("must reject");
    assert!(format!("{error:#}").contains("more than one glob"), "{error:#}");
}

#[test]
fn plan_places_dependencies_first() {
    let root = test_root();
    write_package(&root, "a", "dependencies = [\"b\"]\n");
    write_package(&root, "b", "description = \"b\"\n");

    let catalog = catalog_from(&root);
    let order = plan(&catalog, &requested(&["a"]), &ConditionContext::default())
        .expect("must plan");
    assert_eq!(names(&order), vec!["b", "a"]);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn plan_orders_transitive_chain() {
    let root = test_root();
    write_package(&root, "app", "dependencies = [\"lib\"]\n");
    write_package(&root, "lib", "dependencies = [\"base\"]\n");
    write_package(&root, "base", "description = \"base\"\n");

    let catalog = catalog_from(&root);
    let order = plan(&catalog, &requested(&["app"]), &ConditionContext::default())
        .expect("must plan");
    assert_eq!(names(&order), vec!["base", "lib", "app"]);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn plan_adds_implicit_parent_dependency() {
    let root = test_root();
    write_package(&root, "shell", "description = \"shell\"\n");
    write_package(&root, "shell/bash", "description = \"bash\"\n");

    let catalog = catalog_from(&root);
    let order = plan(
        &catalog,
        &requested(&["shell.bash"]),
        &ConditionContext::default(),
    )
    .expect("must plan");
    assert_eq!(names(&order), vec!["shell", "shell.bash"]);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn plan_honors_depend_on_parent_false() {
    let root = test_root();
    write_package(&root, "shell", "description = \"shell\"\n");
    write_package(&root, "shell/zsh", "depend-on-parent = false\n");

    let catalog = catalog_from(&root);
    let order = plan(
        &catalog,
        &requested(&["shell.zsh"]),
        &ConditionContext::default(),
    )
    .expect("must plan");
    assert_eq!(names(&order), vec!["shell.zsh"]);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn plan_forgives_parent_that_is_not_a_package() {
    let root = test_root();
    // 'tools' is a plain namespace directory without a descriptor.
    write_package(&root, "tools/git", "description = \"git\"\n");

    let catalog = catalog_from(&root);
    let order = plan(
        &catalog,
        &requested(&["tools.git"]),
        &ConditionContext::default(),
    )
    .expect("must plan");
    assert_eq!(names(&order), vec!["tools.git"]);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn plan_breaks_ties_by_request_order_then_name() {
    let root = test_root();
    write_package(&root, "zeta", "description = \"z\"\n");
    write_package(&root, "alpha", "description = \"a\"\n");
    write_package(&root, "mid", "description = \"m\"\n");

    let catalog = catalog_from(&root);
    let order = plan(
        &catalog,
        &requested(&["zeta", "mid", "alpha"]),
        &ConditionContext::default(),
    )
    .expect("must plan");
    // All three are ready immediately; request order wins over name order.
    assert_eq!(names(&order), vec!["zeta", "mid", "alpha"]);

    // Dependencies pulled in without being requested sort by name after
    // every requested package of the same readiness.
    let order = plan(
        &catalog,
        &requested(&["mid"]),
        &ConditionContext::default(),
    )
    .expect("must plan");
    assert_eq!(names(&order), vec!["mid"]);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn plan_is_reproducible_for_identical_input() {
    let root = test_root();
    write_package(&root, "a", "dependencies = [\"c\", \"b\"]\n");
    write_package(&root, "b", "description = \"b\"\n");
    write_package(&root, "c", "description = \"c\"\n");

    let catalog = catalog_from(&root);
    let first = names(
        &plan(&catalog, &requested(&["a"]), &ConditionContext::default()).expect("must plan"),
    );
    let second = names(
        &plan(&catalog, &requested(&["a"]), &ConditionContext::default()).expect("must plan"),
    );
    assert_eq!(first, second);
    assert_eq!(first, vec!["b", "c", "a"]);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn plan_fails_on_cycle_with_no_partial_order() {
    let root = test_root();
    write_package(&root, "a", "dependencies = [\"b\"]\n");
    write_package(&root, "b", "dependencies = [\"c\"]\n");
    write_package(&root, "c", "dependencies = [\"a\"]\n");

    let catalog = catalog_from(&root);
    let error = plan(&catalog, &requested(&["a"]), &ConditionContext::default())
        .expect_err("must fail");
    assert!(
        format!("{error:#}").contains("dependency cycle detected"),
        "{error:#}"
    );

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn plan_fails_on_unknown_requested_package() {
    let root = test_root();
    write_package(&root, "a", "description = \"a\"\n");

    let catalog = catalog_from(&root);
    let error = plan(
        &catalog,
        &requested(&["missing"]),
        &ConditionContext::default(),
    )
    .expect_err("must fail");
    assert!(format!("{error:#}").contains("unknown package 'missing'"), "{error:#}");

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn plan_fails_on_unknown_dependency_naming_the_dependent() {
    let root = test_root();
    write_package(&root, "a", "dependencies = [\"ghost\"]\n");

    let catalog = catalog_from(&root);
    let error = plan(&catalog, &requested(&["a"]), &ConditionContext::default())
        .expect_err("must fail");
    let message = format!("{error:#}");
    assert!(message.contains("unknown package 'ghost'"), "{message}");
    assert!(message.contains("dependency of 'a'"), "{message}");

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn plan_rejects_support_package_as_direct_target() {
    let root = test_root();
    write_package(&root, "internal/helper", "description = \"helper\"\n");
    write_package(&root, "app", "dependencies = [\"internal.helper\"]\n");

    let catalog = catalog_from(&root);
    let error = plan(
        &catalog,
        &requested(&["internal.helper"]),
        &ConditionContext::default(),
    )
    .expect_err("must fail");
    assert!(format!("{error:#}").contains("support package"), "{error:#}");

    // The same package is perfectly fine as a dependency.
    let order = plan(&catalog, &requested(&["app"]), &ConditionContext::default())
        .expect("must plan");
    assert_eq!(names(&order), vec!["internal.helper", "app"]);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn plan_fails_when_dependency_is_condition_gated() {
    let root = test_root();
    write_package(&root, "system", "if = [\"superuser\"]\n");
    write_package(&root, "app", "dependencies = [\"system\"]\n");

    let catalog = catalog_from(&root);
    let error = plan(&catalog, &requested(&["app"]), &ConditionContext::new(false))
        .expect_err("must fail");
    assert!(
        format!("{error:#}").contains("unsatisfied condition"),
        "{error:#}"
    );

    // With the condition satisfied the same plan succeeds.
    let order = plan(&catalog, &requested(&["app"]), &ConditionContext::new(true))
        .expect("must plan");
    assert_eq!(names(&order), vec!["system", "app"]);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn plan_fails_when_requested_package_is_condition_gated() {
    let root = test_root();
    write_package(&root, "system", "if = [\"superuser\"]\n");

    let catalog = catalog_from(&root);
    let error = plan(
        &catalog,
        &requested(&["system"]),
        &ConditionContext::new(false),
    )
    .expect_err("must fail");
    assert!(
        format!("{error:#}").contains("unsatisfied condition"),
        "{error:#}"
    );

    let _ = fs::remove_dir_all(&root);
}
