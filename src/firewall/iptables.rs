//! iptables-restore rule generation
//!
//! Rules live in a dedicated filter-table chain that is flushed before the
//! per-user rules are appended, so the file always describes the whole
//! chain.

use std::path::{Path, PathBuf};

use super::{banner, comment, sorted_networks};
use crate::access::AuthorizationSet;
use crate::config::{DEFAULT_CHAIN_NAME, IpTablesConfig};

#[derive(Debug, Clone)]
pub struct IpTables {
    chain_name: String,
    rules_file: PathBuf,
    reload_command: String,
}

impl IpTables {
    pub fn new(config: &IpTablesConfig) -> Self {
        let chain_name = if config.chain_name.is_empty() {
            DEFAULT_CHAIN_NAME.to_string()
        } else {
            config.chain_name.clone()
        };
        Self {
            chain_name,
            rules_file: config.rules_file.clone(),
            reload_command: config.reload_command.clone(),
        }
    }

    pub fn chain_name(&self) -> &str {
        &self.chain_name
    }

    pub fn generate_rules(&self, sets: &[AuthorizationSet]) -> String {
        let chain = &self.chain_name;
        let mut rules = banner("iptables");
        rules.push_str("*filter\n");
        rules.push_str(&format!(":{} - [0:0]\n", chain));
        rules.push_str(&format!("-F {}\n", chain));

        for set in sets {
            let networks = sorted_networks(set);
            if networks.is_empty() {
                continue;
            }
            rules.push_str(&comment(set.username()));
            for network in networks {
                rules.push_str(&format!(
                    "-A {} -s {} -d {} -j ACCEPT\n",
                    chain, set.tunnel_address, network
                ));
            }
        }

        rules.push_str("COMMIT\n");
        rules
    }

    pub fn rules_file(&self) -> &Path {
        &self.rules_file
    }

    pub fn reload_command(&self) -> &str {
        &self.reload_command
    }
}
