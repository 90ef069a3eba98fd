//! Identity invariants: canonical names, label collapse, resolver prefix
//! matching.

use clawker_core::naming;
use clawker_core::registry::ProjectRegistry;
use clawker_core::resolver;
use tempfile::TempDir;

#[test]
fn anonymous_project_yields_two_segment_names_and_no_project_label() {
    assert_eq!(naming::container_name("", "ralph"), "clawker.ralph");
    let labels = naming::base_labels("", "ralph");
    assert_eq!(labels.get("managed").map(String::as_str), Some("true"));
    assert_eq!(labels.get("agent").map(String::as_str), Some("ralph"));
    assert!(!labels.contains_key("project"));
}

#[test]
fn named_project_yields_three_segment_names_and_project_label() {
    assert_eq!(
        naming::container_name("myapp", "ralph"),
        "clawker.myapp.ralph"
    );
    let labels = naming::base_labels("myapp", "ralph");
    assert_eq!(labels.get("managed").map(String::as_str), Some("true"));
    assert_eq!(labels.get("project").map(String::as_str), Some("myapp"));
    assert_eq!(labels.get("agent").map(String::as_str), Some("ralph"));
}

#[test]
fn volume_and_network_names_follow_the_container_scheme() {
    assert_eq!(
        naming::volume_name("myapp", "ralph", "config"),
        "clawker.myapp.ralph-config"
    );
    assert_eq!(naming::network_name(), "clawker-net");
    assert_eq!(naming::image_tag("myapp"), "clawker-myapp:latest");
}

#[test]
fn resolver_matches_nested_workdir_but_not_parent() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("a").join("b");
    let nested = root.join("c").join("d");
    std::fs::create_dir_all(&nested).unwrap();

    let mut registry = ProjectRegistry::default();
    registry.register("ab", &root, true).unwrap();

    let hit = resolver::resolve(&nested, &registry, false).unwrap();
    assert_eq!(hit.project, "ab");

    let parent = tmp.path().join("a");
    assert!(resolver::resolve(&parent, &registry, false).is_err());
    let anonymous = resolver::resolve(&parent, &registry, true).unwrap();
    assert_eq!(anonymous.project, "");
}

#[test]
fn registry_survives_save_and_reload() {
    let tmp = TempDir::new().unwrap();
    let registry_path = tmp.path().join("registry").join("projects.yaml");
    let root = tmp.path().join("proj");
    std::fs::create_dir_all(&root).unwrap();

    let mut registry = ProjectRegistry::default();
    registry.register("proj", &root, false).unwrap();
    registry.save(&registry_path).unwrap();

    let loaded = ProjectRegistry::load(&registry_path).unwrap();
    let resolution = resolver::resolve(&root, &loaded, false).unwrap();
    assert_eq!(resolution.project, "proj");
    let config = resolver::load_config(&resolution).unwrap();
    assert_eq!(config.project, resolution.project);
}
