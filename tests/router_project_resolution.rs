//! `Router`/`ProjectRegistry` resolution from a TOML project file
//! (spec.md §4.K): alias normalization, explicit repo lists, and
//! first-match repo-to-project lookup.

use nexus_orchestrator::{ProjectRegistry, Router};

fn write_projects_toml(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("projects.toml");
    std::fs::write(
        &path,
        r#"
[projects.nexus]
workspace = "nexus-workspace"
repos = ["acme/nexus-core", "acme/nexus-web"]
aliases = ["core", "nexus-orchestrator"]

[projects.billing]
workspace = "billing-workspace"
repos = ["acme/billing-service"]
"#,
    )
    .unwrap();
    path
}

#[test]
fn alias_and_case_normalize_to_the_canonical_project_key() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = write_projects_toml(dir.path());
    let registry = ProjectRegistry::load(&path).unwrap();

    assert_eq!(registry.normalize_project_key("NEXUS").unwrap(), "nexus");
    assert_eq!(registry.normalize_project_key("Core").unwrap(), "nexus");
    assert_eq!(registry.normalize_project_key("  nexus-orchestrator  ").unwrap(), "nexus");
    assert_eq!(registry.normalize_project_key("unknown-project").unwrap(), "unknown-project");
}

#[test]
fn resolve_project_for_repo_matches_explicit_repo_lists() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = write_projects_toml(dir.path());
    let registry = ProjectRegistry::load(&path).unwrap();
    let router = Router::new(registry, dir.path());

    assert_eq!(
        router.resolve_project_for_repo("acme/nexus-web").unwrap(),
        Some("nexus".to_string())
    );
    assert_eq!(
        router.resolve_project_for_repo("acme/billing-service").unwrap(),
        Some("billing".to_string())
    );
    assert_eq!(router.resolve_project_for_repo("acme/unrelated").unwrap(), None);
}

#[test]
fn registry_reloads_after_the_file_changes_on_disk() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = write_projects_toml(dir.path());
    let registry = ProjectRegistry::load(&path).unwrap();
    assert_eq!(registry.all().unwrap().len(), 2);

    // mtime-based reload only fires on a real change; sleep a tick so the
    // second write gets a distinguishable mtime on coarse filesystems.
    std::thread::sleep(std::time::Duration::from_millis(1100));
    std::fs::write(
        &path,
        r#"
[projects.nexus]
workspace = "nexus-workspace"
repos = ["acme/nexus-core"]
"#,
    )
    .unwrap();

    let projects = registry.all().unwrap();
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0].0, "nexus");
}

#[test]
fn duplicate_alias_across_projects_is_rejected_at_load() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("projects.toml");
    std::fs::write(
        &path,
        r#"
[projects.nexus]
workspace = "a"
aliases = ["shared"]

[projects.billing]
workspace = "b"
aliases = ["shared"]
"#,
    )
    .unwrap();

    let err = ProjectRegistry::load(&path).unwrap_err();
    assert!(err.to_string().contains("shared"));
}
