//! Egress firewall domain set computation
//!
//! The firewall init script restricts container egress to a deterministic
//! domain allowlist. Additive mode starts from the built-in defaults,
//! applies additions and removals, then dedupes and sorts so repeated
//! builds are reproducible. Override mode bypasses all of that and uses the
//! user's list in the user's order.

use crate::config::FirewallConfig;
use std::collections::BTreeSet;

/// Domains reachable from a sandboxed container by default
pub const DEFAULT_ALLOWED_DOMAINS: &[&str] = &[
    "api.anthropic.com",
    "statsig.anthropic.com",
    "sentry.io",
    "github.com",
    "api.github.com",
    "objects.githubusercontent.com",
    "raw.githubusercontent.com",
    "registry.npmjs.org",
    "crates.io",
    "static.crates.io",
    "index.crates.io",
    "pypi.org",
    "files.pythonhosted.org",
];

/// Compute the final allowlist for a firewall configuration
pub fn allowed_domains(config: &FirewallConfig) -> Vec<String> {
    resolve_domains(DEFAULT_ALLOWED_DOMAINS, config)
}

/// Compute the allowlist from an explicit default set.
///
/// Override mode preserves the user's order byte-for-byte; additive mode
/// returns a sorted, duplicate-free list.
pub fn resolve_domains(defaults: &[&str], config: &FirewallConfig) -> Vec<String> {
    if !config.override_domains.is_empty() {
        return config.override_domains.clone();
    }

    let mut domains: BTreeSet<String> = defaults.iter().map(|d| d.to_string()).collect();
    for domain in &config.add_domains {
        domains.insert(domain.clone());
    }
    for domain in &config.remove_domains {
        domains.remove(domain);
    }
    domains.into_iter().collect()
}
