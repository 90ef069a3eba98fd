//! Image builder pipeline: firewall domain computation, Dockerfile
//! rendering, and build-context assembly.

use clawker_core::config::{parse_config, FirewallConfig};
use clawker_core::dockerfile;
use clawker_core::firewall;
use clawker_core::build_context;
use std::io::Read;

#[test]
fn firewall_additive_merge_is_sorted_and_deduplicated() {
    let config = FirewallConfig {
        enable: true,
        add_domains: vec!["banana.com".to_string()],
        remove_domains: vec!["mango.com".to_string()],
        override_domains: Vec::new(),
    };
    let result = firewall::resolve_domains(&["zebra.com", "apple.com", "mango.com"], &config);
    assert_eq!(result, vec!["apple.com", "banana.com", "zebra.com"]);
}

#[test]
fn firewall_override_keeps_user_order() {
    let config = FirewallConfig {
        enable: true,
        add_domains: vec!["added.com".to_string()],
        remove_domains: vec!["removed.com".to_string()],
        override_domains: vec!["custom.com".to_string(), "another.com".to_string()],
    };
    let result = firewall::resolve_domains(&["zebra.com"], &config);
    assert_eq!(result, vec!["custom.com", "another.com"]);
}

#[test]
fn rendered_dockerfile_round_trips_through_the_parser() {
    let config = parse_config(
        r#"
build:
  instructions:
    env:
      LANG: C.UTF-8
    expose: ["9000"]
    args:
      REV: abc123
    workdir: /workspace/svc
    user_run:
      - make fetch-deps
    root_run:
      - install -d /opt/tools
"#,
    )
    .unwrap();

    let first = dockerfile::render(&config, "debian:bookworm-slim").unwrap();
    let parsed = dockerfile::parse_instructions(&first);

    // Re-render with the parsed instructions substituted back in.
    let mut reparsed_config = parse_config("{}").unwrap();
    reparsed_config.build.instructions = parsed;
    let second = dockerfile::render(&reparsed_config, "debian:bookworm-slim").unwrap();

    assert_eq!(first, second);
}

#[test]
fn build_context_tar_carries_executable_scripts_and_allowlist() {
    let config = parse_config(
        "security:\n  firewall:\n    add_domains: [internal.example]\n",
    )
    .unwrap();
    let context = build_context::assemble(&config, "debian:bookworm-slim").unwrap();

    let mut archive = tar::Archive::new(context.tar.as_slice());
    let mut saw_entrypoint = false;
    let mut saw_allowlist = false;
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        let path = entry.path().unwrap().to_string_lossy().into_owned();
        match path.as_str() {
            "entrypoint.sh" => {
                assert_eq!(entry.header().mode().unwrap(), 0o755);
                saw_entrypoint = true;
            }
            "allowed-domains.txt" => {
                let mut text = String::new();
                entry.read_to_string(&mut text).unwrap();
                assert!(text.lines().any(|l| l == "internal.example"));
                // additive mode output is sorted
                let lines: Vec<&str> = text.lines().collect();
                let mut sorted = lines.clone();
                sorted.sort_unstable();
                assert_eq!(lines, sorted);
                saw_allowlist = true;
            }
            _ => {}
        }
    }
    assert!(saw_entrypoint);
    assert!(saw_allowlist);
}

#[test]
fn alpine_and_debian_render_family_specific_package_installs() {
    let config = parse_config("build:\n  packages: [ripgrep]\n").unwrap();

    let debian = dockerfile::render(&config, "node:22-bookworm").unwrap();
    assert!(debian.contains("apt-get install"));
    assert!(debian.contains("ripgrep"));

    let mut alpine_config = parse_config("build:\n  packages: [ripgrep]\n").unwrap();
    alpine_config.build.image = "alpine:3.20".to_string();
    let alpine = dockerfile::render(&alpine_config, "alpine:3.20").unwrap();
    assert!(alpine.contains("apk add --no-cache"));
    assert!(!alpine.contains("apt-get"));
}
