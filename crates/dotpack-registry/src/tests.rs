use super::*;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use dotpack_core::ConditionContext;

static TEST_ROOT_COUNTER: AtomicU64 = AtomicU64::new(0);

fn test_root() -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let sequence = TEST_ROOT_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut path = std::env::temp_dir();
    path.push(format!(
        "dotpack-registry-tests-{}-{}-{}",
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

fn source(name: &str, directory: &Path, priority: u32) -> SourceRecord {
    SourceRecord {
        name: name.to_string(),
        directory: directory.display().to_string(),
        priority,
    }
}

#[test]
fn discovers_dotted_names_from_hierarchy() {
    let root = test_root();
    write_package(&root, "shell", "description = \"shell\"\n");
    write_package(&root, "shell/bash", "description = \"bash\"\n");
    write_package(&root, "tools/git", "description = \"git\"\n");

    let catalog = discover(&[source("main", &root, 10)]).expect("must discover");
    let names: Vec<&str> = catalog.names().collect();
    assert_eq!(names, vec!["shell", "shell.bash", "tools.git"]);

    let bash = catalog.resolve("shell.bash").expect("must resolve");
    assert_eq!(bash.source, "main");
    assert_eq!(bash.directory, root.join("shell/bash"));
    assert_eq!(bash.parent().as_deref(), Some("shell"));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn directories_without_descriptor_are_namespaces_only() {
    let root = test_root();
    write_package(&root, "tools/git", "description = \"git\"\n");

    let catalog = discover(&[source("main", &root, 10)]).expect("must discover");
    assert!(catalog.resolve("tools").is_none());
    assert!(catalog.resolve("tools.git").is_some());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn earlier_source_shadows_later_definitions_entirely() {
    let personal = test_root();
    let shared = test_root();
    write_package(&personal, "shell", "description = \"personal shell\"\n");
    write_package(
        &shared,
        "shell",
        "description = \"shared shell\"\ndependencies = [\"tools.git\"]\n",
    );
    write_package(&shared, "tools/git", "description = \"git\"\n");

    let catalog = discover(&[
        source("personal", &personal, 10),
        source("shared", &shared, 20),
    ])
    .expect("must discover");

    let shell = catalog.resolve("shell").expect("must resolve");
    assert_eq!(shell.source, "personal");
    assert_eq!(shell.descriptor.description, "personal shell");
    // Shadowing is whole-package: the shared definition's dependencies do
    // not leak into the winning one.
    assert!(shell.descriptor.dependencies.is_empty());
    // Names unique to the later source still resolve.
    assert!(catalog.resolve("tools.git").is_some());

    let _ = fs::remove_dir_all(&personal);
    let _ = fs::remove_dir_all(&shared);
}

#[test]
fn malformed_descriptor_is_reported_but_does_not_abort_discovery() {
    let root = test_root();
    write_package(&root, "good", "description = \"fine\"\n");
    write_package(&root, "bad", "action = [ this is not toml\n");

    let catalog = discover(&[source("main", &root, 10)]).expect("must discover");
    assert!(catalog.resolve("good").is_some());
    assert!(catalog.resolve("bad").is_none());
    assert_eq!(catalog.warnings().len(), 1);
    assert_eq!(catalog.warnings()[0].source, "main");

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn missing_source_directory_is_a_warning() {
    let root = test_root();
    let gone = root.join("nope");

    let catalog = discover(&[source("main", &gone, 10)]).expect("must discover");
    assert_eq!(catalog.names().count(), 0);
    assert_eq!(catalog.warnings().len(), 1);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn internal_name_segment_forces_support() {
    let root = test_root();
    write_package(&root, "internal/helper", "description = \"helper\"\n");
    write_package(&root, "tools/internal", "description = \"helper\"\n");
    write_package(&root, "tools/internals", "description = \"not support\"\n");

    let catalog = discover(&[source("main", &root, 10)]).expect("must discover");
    assert!(catalog.resolve("internal.helper").expect("resolves").is_support());
    assert!(catalog.resolve("tools.internal").expect("resolves").is_support());
    assert!(!catalog.resolve("tools.internals").expect("resolves").is_support());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn condition_gated_package_is_invisible_without_grant() {
    let root = test_root();
    write_package(&root, "system", "description = \"root only\"\nif = [\"superuser\"]\n");
    write_package(&root, "user", "description = \"anyone\"\n");

    let catalog = discover(&[source("main", &root, 10)]).expect("must discover");

    let denied = ConditionContext::new(false);
    let granted = ConditionContext::new(true);
    assert_eq!(catalog.visible_names(&denied), vec!["user"]);
    assert_eq!(catalog.visible_names(&granted), vec!["system", "user"]);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn dependency_names_include_parent_unless_disabled() {
    let root = test_root();
    write_package(&root, "shell", "description = \"shell\"\n");
    write_package(
        &root,
        "shell/bash",
        "dependencies = [\"tools.git\"]\n",
    );
    write_package(
        &root,
        "shell/zsh",
        "depend-on-parent = false\n",
    );

    let catalog = discover(&[source("main", &root, 10)]).expect("must discover");
    assert_eq!(
        catalog.resolve("shell.bash").expect("resolves").dependency_names(),
        vec!["tools.git".to_string(), "shell".to_string()]
    );
    assert!(catalog
        .resolve("shell.zsh")
        .expect("resolves")
        .dependency_names()
        .is_empty());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn source_store_round_trip() {
    let root = test_root();
    let store = SourceStore::new(&root);

    store
        .add_source(SourceRecord {
            name: "work".to_string(),
            directory: "/srv/dotfiles".to_string(),
            priority: 20,
        })
        .expect("must add");
    store
        .add_source(SourceRecord {
            name: "personal".to_string(),
            directory: "~/dotfiles".to_string(),
            priority: 10,
        })
        .expect("must add");

    let listed = store.list_sources().expect("must list");
    let names: Vec<&str> = listed.iter().map(|source| source.name.as_str()).collect();
    assert_eq!(names, vec!["personal", "work"]);

    store.remove_source("work").expect("must remove");
    let listed = store.list_sources().expect("must list");
    assert_eq!(listed.len(), 1);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn source_store_rejects_duplicates_and_bad_names() {
    let root = test_root();
    let store = SourceStore::new(&root);

    store
        .add_source(SourceRecord {
            name: "main".to_string(),
            directory: "/tmp/pkgs".to_string(),
            priority: 10,
        })
        .expect("must add");

    let duplicate = store.add_source(SourceRecord {
        name: "main".to_string(),
        directory: "/elsewhere".to_string(),
        priority: 20,
    });
    assert!(duplicate.is_err());

    let invalid = store.add_source(SourceRecord {
        name: "Has Spaces".to_string(),
        directory: "/tmp".to_string(),
        priority: 30,
    });
    assert!(invalid.is_err());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn missing_sources_file_yields_defaults() {
    let root = test_root();
    let store = SourceStore::new(root.join("never-written"));

    let listed = store.list_sources().expect("must list");
    assert_eq!(listed, default_sources());

    let _ = fs::remove_dir_all(&root);
}
