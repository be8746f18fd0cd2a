//! nftables rule generation
//!
//! One rule per user; the user's destinations form a single anonymous set.

use std::path::{Path, PathBuf};

use super::{banner, comment, sorted_networks};
use crate::access::AuthorizationSet;
use crate::config::NfTablesConfig;

#[derive(Debug, Clone)]
pub struct NfTables {
    rules_file: PathBuf,
    reload_command: String,
}

impl NfTables {
    pub fn new(config: &NfTablesConfig) -> Self {
        Self {
            rules_file: config.rules_file.clone(),
            reload_command: config.reload_command.clone(),
        }
    }

    pub fn generate_rules(&self, sets: &[AuthorizationSet]) -> String {
        let mut rules = banner("nftables");

        for set in sets {
            let networks = sorted_networks(set);
            if networks.is_empty() {
                continue;
            }
            rules.push_str(&comment(set.username()));
            rules.push_str(&format!(
                "ip saddr {} ip daddr {{ {} }} accept\n",
                set.tunnel_address,
                networks.join(", ")
            ));
        }

        rules
    }

    pub fn rules_file(&self) -> &Path {
        &self.rules_file
    }

    pub fn reload_command(&self) -> &str {
        &self.reload_command
    }
}
