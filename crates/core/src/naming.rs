//! Canonical names and label sets for managed resources
//!
//! Every object clawker creates (container, volume, network, image) carries
//! an identity derived from the `(project, agent)` pair. These are pure
//! functions; the engine layer merges the label sets into every create call
//! and the filter sets into every list call.

use std::collections::HashMap;

/// Name prefix for every managed resource
pub const NAME_PREFIX: &str = "clawker";

/// Label marking a resource as managed by clawker; always `"true"`
pub const LABEL_MANAGED: &str = "managed";
/// Label carrying the project slug; omitted for anonymous projects
pub const LABEL_PROJECT: &str = "project";
/// Label carrying the agent name
pub const LABEL_AGENT: &str = "agent";
/// Label carrying the config version an image was built from
pub const LABEL_VERSION: &str = "version";

/// Canonical container name: `clawker.<project>.<agent>`.
///
/// Empty segments collapse, so an anonymous project yields the two-segment
/// form `clawker.<agent>`.
pub fn container_name(project: &str, agent: &str) -> String {
    join_dotted(&[NAME_PREFIX, project, agent])
}

/// Canonical volume name: `clawker.<project>.<agent>-<purpose>`
pub fn volume_name(project: &str, agent: &str, purpose: &str) -> String {
    format!("{}-{}", container_name(project, agent), purpose)
}

/// The single shared network all managed containers join
pub fn network_name() -> String {
    format!("{NAME_PREFIX}-net")
}

/// Generated image tag for a project: `clawker-<project>:latest`
pub fn image_tag(project: &str) -> String {
    if project.is_empty() {
        format!("{NAME_PREFIX}:latest")
    } else {
        format!("{NAME_PREFIX}-{project}:latest")
    }
}

/// Identity labels for a container.
///
/// The `project` key is omitted (not set to the empty string) when the
/// project is anonymous.
pub fn base_labels(project: &str, agent: &str) -> HashMap<String, String> {
    let mut labels = HashMap::new();
    labels.insert(LABEL_MANAGED.to_string(), "true".to_string());
    if !project.is_empty() {
        labels.insert(LABEL_PROJECT.to_string(), project.to_string());
    }
    labels.insert(LABEL_AGENT.to_string(), agent.to_string());
    labels
}

/// Identity labels for a built image
pub fn image_labels(project: &str, version: &str) -> HashMap<String, String> {
    let mut labels = HashMap::new();
    labels.insert(LABEL_MANAGED.to_string(), "true".to_string());
    if !project.is_empty() {
        labels.insert(LABEL_PROJECT.to_string(), project.to_string());
    }
    if !version.is_empty() {
        labels.insert(LABEL_VERSION.to_string(), version.to_string());
    }
    labels
}

/// The filter entry every list/prune call must carry
pub fn managed_filter() -> (String, Vec<String>) {
    (
        "label".to_string(),
        vec![format!("{LABEL_MANAGED}=true")],
    )
}

/// Whether an image reference belongs to the Alpine family.
///
/// Matches `alpine`, `alpine:3.20`, `library/alpine`, and `-alpine` tag
/// suffixes such as `node:22-alpine`.
pub fn is_alpine_image(reference: &str) -> bool {
    let without_tag = reference.split(':').next().unwrap_or(reference);
    let repo = without_tag.rsplit('/').next().unwrap_or(without_tag);
    if repo == "alpine" {
        return true;
    }
    match reference.split_once(':') {
        Some((_, tag)) => tag == "alpine" || tag.contains("alpine"),
        None => false,
    }
}

fn join_dotted(segments: &[&str]) -> String {
    segments
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_name_with_project() {
        assert_eq!(container_name("myapp", "ralph"), "clawker.myapp.ralph");
    }

    #[test]
    fn test_container_name_empty_project_collapses() {
        assert_eq!(container_name("", "ralph"), "clawker.ralph");
    }

    #[test]
    fn test_volume_name() {
        assert_eq!(
            volume_name("myapp", "ralph", "config"),
            "clawker.myapp.ralph-config"
        );
        assert_eq!(volume_name("", "ralph", "history"), "clawker.ralph-history");
    }

    #[test]
    fn test_network_name_fixed() {
        assert_eq!(network_name(), "clawker-net");
    }

    #[test]
    fn test_image_tag() {
        assert_eq!(image_tag("myapp"), "clawker-myapp:latest");
        assert_eq!(image_tag(""), "clawker:latest");
    }

    #[test]
    fn test_labels_with_project() {
        let labels = base_labels("myapp", "ralph");
        assert_eq!(labels.get(LABEL_MANAGED), Some(&"true".to_string()));
        assert_eq!(labels.get(LABEL_PROJECT), Some(&"myapp".to_string()));
        assert_eq!(labels.get(LABEL_AGENT), Some(&"ralph".to_string()));
    }

    #[test]
    fn test_labels_empty_project_omits_key() {
        let labels = base_labels("", "ralph");
        assert_eq!(labels.get(LABEL_MANAGED), Some(&"true".to_string()));
        assert_eq!(labels.get(LABEL_AGENT), Some(&"ralph".to_string()));
        assert!(!labels.contains_key(LABEL_PROJECT));
    }

    #[test]
    fn test_image_labels_include_version() {
        let labels = image_labels("myapp", "3");
        assert_eq!(labels.get(LABEL_VERSION), Some(&"3".to_string()));
    }

    #[test]
    fn test_managed_filter_shape() {
        let (key, values) = managed_filter();
        assert_eq!(key, "label");
        assert_eq!(values, vec!["managed=true".to_string()]);
    }

    #[test]
    fn test_is_alpine_image() {
        assert!(is_alpine_image("alpine"));
        assert!(is_alpine_image("alpine:3.20"));
        assert!(is_alpine_image("library/alpine:edge"));
        assert!(is_alpine_image("node:22-alpine"));
        assert!(!is_alpine_image("debian:bookworm-slim"));
        assert!(!is_alpine_image("ubuntu"));
    }
}
