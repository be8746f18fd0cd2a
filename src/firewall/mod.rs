//! Firewall rule compiler
//!
//! Compiles authorization sets into a complete rules file for one of two
//! backends. Output is a pure function of the input: each user's networks
//! are sorted before emission, so the same sets always produce the same
//! bytes and an unchanged file never triggers a reload.

pub mod apply;
pub mod iptables;
pub mod nftables;

use std::path::Path;
use thiserror::Error;

use crate::access::AuthorizationSet;
use crate::config::{FirewallConfig, FirewallType};

pub use apply::{Reloader, ShellReloader, SyncOutcome, apply_rules};
pub use iptables::IpTables;
pub use nftables::NfTables;

#[derive(Error, Debug)]
pub enum FirewallError {
    #[error("Failed to write rules file {path}: {source}")]
    WriteError {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to read rules file {path}: {source}")]
    ReadError {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to run reload command `{command}`: {message}")]
    ReloadError { command: String, message: String },
    #[error("Reload command `{command}` exited with {status}: {output}")]
    ReloadFailed {
        command: String,
        status: String,
        output: String,
    },
}

/// The configured firewall backend
#[derive(Debug, Clone)]
pub enum Backend {
    NfTables(NfTables),
    IpTables(IpTables),
}

impl Backend {
    pub fn from_config(config: &FirewallConfig) -> Self {
        match config.kind {
            FirewallType::Nftables => Backend::NfTables(NfTables::new(&config.nftables)),
            FirewallType::Iptables => Backend::IpTables(IpTables::new(&config.iptables)),
        }
    }

    pub fn generate_rules(&self, sets: &[AuthorizationSet]) -> String {
        match self {
            Backend::NfTables(nft) => nft.generate_rules(sets),
            Backend::IpTables(ipt) => ipt.generate_rules(sets),
        }
    }

    pub fn rules_file(&self) -> &Path {
        match self {
            Backend::NfTables(nft) => nft.rules_file(),
            Backend::IpTables(ipt) => ipt.rules_file(),
        }
    }

    pub fn reload_command(&self) -> &str {
        match self {
            Backend::NfTables(nft) => nft.reload_command(),
            Backend::IpTables(ipt) => ipt.reload_command(),
        }
    }

    pub fn kind(&self) -> FirewallType {
        match self {
            Backend::NfTables(_) => FirewallType::Nftables,
            Backend::IpTables(_) => FirewallType::Iptables,
        }
    }
}

/// Banner at the top of every generated file
fn banner(dialect: &str) -> String {
    format!(
        "# Auto-generated VPN user rules ({})\n\
         # Do not edit manually - changes will be overwritten\n\n",
        dialect
    )
}

/// `# username` line; control characters are escaped so a username can
/// never end the comment and start a rule of its own.
fn comment(username: &str) -> String {
    let mut line = String::from("# ");
    for c in username.chars() {
        if c.is_control() {
            line.extend(c.escape_default());
        } else {
            line.push(c);
        }
    }
    line.push('\n');
    line
}

/// A user's networks in emission order: sorted, no duplicates
fn sorted_networks(set: &AuthorizationSet) -> Vec<&str> {
    let mut networks: Vec<&str> = set.networks.iter().map(String::as_str).collect();
    networks.sort_unstable();
    networks.dedup();
    networks
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::directory::fake::identity;

    pub(crate) fn set(username: &str, address: &str, networks: &[&str]) -> AuthorizationSet {
        AuthorizationSet {
            identity: identity(&format!("id-{}", username), username, Some(address)),
            tunnel_address: address.to_string(),
            default_route: false,
            networks: networks.iter().map(|n| n.to_string()).collect(),
        }
    }

    #[test]
    fn test_comment_stays_on_one_line() {
        assert_eq!(comment("alice"), "# alice\n");
        assert_eq!(
            comment("eve\nip saddr 0.0.0.0/0 accept\r"),
            "# eve\\nip saddr 0.0.0.0/0 accept\\r\n"
        );
    }

    #[test]
    fn test_backend_from_config() {
        let mut config = FirewallConfig::default();
        let backend = Backend::from_config(&config);
        assert_eq!(backend.kind(), FirewallType::Nftables);
        assert_eq!(backend.rules_file(), config.nftables.rules_file.as_path());
        assert_eq!(backend.reload_command(), config.nftables.reload_command);

        config.kind = FirewallType::Iptables;
        let backend = Backend::from_config(&config);
        assert_eq!(backend.kind(), FirewallType::Iptables);
        assert_eq!(backend.rules_file(), config.iptables.rules_file.as_path());
        assert_eq!(backend.reload_command(), config.iptables.reload_command);
    }

    #[test]
    fn test_sorted_networks() {
        let s = set("alice", "10.8.0.2", &["192.168.1.0/24", "10.0.0.0/8", "10.0.0.0/8"]);
        assert_eq!(sorted_networks(&s), vec!["10.0.0.0/8", "192.168.1.0/24"]);
    }

    #[test]
    fn test_generation_is_order_independent() {
        let config = FirewallConfig::default();
        let forward = vec![
            set("alice", "10.8.0.2", &["10.0.0.0/8", "172.16.0.0/12", "192.168.1.0/24"]),
            set("bob", "10.8.0.3", &["10.1.0.0/16"]),
        ];
        let shuffled = vec![
            set("alice", "10.8.0.2", &["192.168.1.0/24", "10.0.0.0/8", "172.16.0.0/12"]),
            set("bob", "10.8.0.3", &["10.1.0.0/16"]),
        ];

        for kind in [FirewallType::Nftables, FirewallType::Iptables] {
            let backend = Backend::from_config(&FirewallConfig {
                kind,
                ..config.clone()
            });
            let first = backend.generate_rules(&forward);
            assert_eq!(first, backend.generate_rules(&forward));
            assert_eq!(first, backend.generate_rules(&shuffled));
        }
    }
}
