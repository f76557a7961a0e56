use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use clap::Parser;
use dotpack_core::{ConditionContext, Transformer};
use dotpack_installer::{is_installed, StateLayout};
use dotpack_registry::{discover, Catalog, SourceRecord};

use crate::dispatch::{parse_transformers, run, uninstall_order, Cli};
use crate::render::package_table;

static TEST_ROOT_COUNTER: AtomicU64 = AtomicU64::new(0);

fn test_root() -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let sequence = TEST_ROOT_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut path = std::env::temp_dir();
    path.push(format!(
        "dotpack-cli-tests-{}-{}-{}",
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

fn cli_for(state_root: &Path, arguments: &[&str]) -> Cli {
    let mut full = vec!["dotpack"];
    full.extend_from_slice(arguments);
    full.push("--state-root");
    let state_root = state_root.display().to_string();
    full.push(&state_root);
    Cli::parse_from(full)
}

fn configure_source(state_root: &Path, package_root: &Path) {
    fs::create_dir_all(state_root).expect("must create state root");
    fs::write(
        state_root.join("sources.toml"),
        format!(
            "version = 1\n\n[[sources]]\nname = \"main\"\ndirectory = \"{}\"\npriority = 10\n",
            package_root.display()
        ),
    )
    .expect("must write sources.toml");
}

#[test]
fn mode_flags_are_mutually_exclusive() {
    let conflicting = Cli::try_parse_from(["dotpack", "--list", "--uninstall", "shell"]);
    assert!(conflicting.is_err());

    let fine = Cli::try_parse_from(["dotpack", "--uninstall", "shell"]);
    assert!(fine.is_ok());
}

#[test]
fn transformer_arguments_parse_by_name() {
    let parsed = parse_transformers(&["copies-as-symlinks".to_string()])
        .expect("known transformer must parse");
    assert_eq!(parsed, vec![Transformer::CopiesAsSymlinks]);

    let unknown = parse_transformers(&["inline-everything".to_string()]);
    assert!(unknown.is_err());
}

#[test]
fn package_table_pads_columns() {
    let rows = vec![
        (
            "main".to_string(),
            "shell.bash".to_string(),
            "Bash configuration".to_string(),
        ),
        (
            "INSTALLED".to_string(),
            "editor".to_string(),
            "Editor of choice".to_string(),
        ),
    ];

    let lines = package_table(&rows);
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("Source"));
    assert!(lines[2].contains("shell.bash"));
    assert!(lines[3].starts_with("INSTALLED  editor"));
    // Both data lines align the package column.
    let column = lines[2].find("shell.bash").expect("present");
    assert_eq!(lines[3].find("editor").expect("present"), column);
}

#[test]
fn uninstall_order_reverses_the_install_plan() {
    let root = test_root();
    write_package(&root, "a", "dependencies = [\"b\"]\n");
    write_package(&root, "b", "description = \"b\"\n");

    let catalog = catalog_from(&root);
    let installed = vec!["a".to_string(), "b".to_string()];
    let order = uninstall_order(
        &catalog,
        &["a".to_string()],
        &installed,
        &ConditionContext::default(),
    )
    .expect("must order");
    assert_eq!(order, vec!["a", "b"]);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn uninstall_order_pulls_installed_dependents_first() {
    let root = test_root();
    write_package(&root, "lib", "description = \"lib\"\n");
    write_package(&root, "app", "dependencies = [\"lib\"]\n");

    let catalog = catalog_from(&root);
    let installed = vec!["app".to_string(), "lib".to_string()];
    let order = uninstall_order(
        &catalog,
        &["lib".to_string()],
        &installed,
        &ConditionContext::default(),
    )
    .expect("must order");
    assert_eq!(order, vec!["app", "lib"]);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn uninstall_order_keeps_orphaned_packages_standalone() {
    let root = test_root();
    write_package(&root, "present", "description = \"present\"\n");

    let catalog = catalog_from(&root);
    let installed = vec!["present".to_string(), "vanished".to_string()];
    let order = uninstall_order(
        &catalog,
        &["vanished".to_string(), "present".to_string()],
        &installed,
        &ConditionContext::default(),
    )
    .expect("must order");
    assert_eq!(order, vec!["vanished", "present"]);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn install_and_uninstall_flow_round_trips() {
    let root = test_root();
    let package_root = root.join("packages");
    let state_root = root.join("state-root");
    let scratch = root.join("scratch");
    fs::create_dir_all(scratch.join("xdir")).expect("must create scratch");

    // 'a' depends on 'b'; 'b' copies a file into a shared directory.
    write_package(
        &package_root,
        "b",
        &format!(
            "description = \"b\"\n\n[[install]]\naction = \"copy\"\nfile = \"f\"\nto = \"{}\"\n",
            scratch.join("xdir").join("f").display()
        ),
    );
    fs::write(package_root.join("b").join("f"), "from b").expect("must write resource");
    write_package(
        &package_root,
        "a",
        &format!(
            "description = \"a\"\ndependencies = [\"b\"]\n\n[[install]]\naction = \"copy\"\nfile = \"marker\"\nto = \"{}\"\n",
            scratch.join("a-marker").display()
        ),
    );
    fs::write(package_root.join("a").join("marker"), "from a").expect("must write resource");

    configure_source(&state_root, &package_root);
    let layout = StateLayout::new(&state_root);

    run(cli_for(&state_root, &["a"])).expect("install must succeed");

    assert!(is_installed(&layout, "a"));
    assert!(is_installed(&layout, "b"));
    assert_eq!(
        fs::read_to_string(scratch.join("xdir").join("f")).expect("must read"),
        "from b"
    );
    assert_eq!(
        fs::read_to_string(scratch.join("a-marker")).expect("must read"),
        "from a"
    );

    run(cli_for(&state_root, &["--uninstall", "a"])).expect("uninstall must succeed");

    // Reverse order: 'a' went first, then 'b''s synthesized removal.
    assert!(!is_installed(&layout, "a"));
    assert!(!is_installed(&layout, "b"));
    assert!(!scratch.join("xdir").join("f").exists());
    assert!(!scratch.join("a-marker").exists());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn listing_marks_installed_packages() {
    let root = test_root();
    let package_root = root.join("packages");
    let state_root = root.join("state-root");

    write_package(&package_root, "tools/git", "description = \"Git setup\"\n");
    write_package(
        &package_root,
        "tools/internal",
        "description = \"support glue\"\n",
    );
    configure_source(&state_root, &package_root);

    // Listing is exercised for the side-effect free path: it must not
    // create any state beyond the discovery walk.
    run(cli_for(&state_root, &[])).expect("listing must succeed");
    run(cli_for(&state_root, &["--list", "tools.*"])).expect("filtered listing must succeed");

    let layout = StateLayout::new(&state_root);
    assert!(!is_installed(&layout, "tools.git"));

    let _ = fs::remove_dir_all(&root);
}
