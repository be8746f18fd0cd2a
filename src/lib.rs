//! OpenVPN access sync - directory-driven access control for OpenVPN
//!
//! This crate connects an OpenVPN server to an access-directory service.
//! OpenVPN runs it as a hook script for every client connection; a timer
//! runs it periodically to rebuild the server's firewall rules.
//!
//! # Architecture
//!
//! - `config`: Configuration file handling (TOML + environment overrides)
//! - `directory`: HTTP client for the access directory (identities, routes, sessions)
//! - `access`: Route aggregation into per-user authorization sets
//! - `firewall`: nftables/iptables rule compilation and reload
//! - `session`: Session ledger bookkeeping between connect and disconnect
//! - `openvpn`: Hook environment parsing and hook entry points
//!
//! # Usage
//!
//! In the OpenVPN server configuration:
//! ```text
//! script-security 2
//! client-connect "/usr/local/bin/openvpn-access-sync connect"
//! client-disconnect "/usr/local/bin/openvpn-access-sync disconnect"
//! auth-user-pass-verify "/usr/local/bin/openvpn-access-sync login" via-file
//! ```
//!
//! And from a systemd timer or cron:
//! ```text
//! openvpn-access-sync firewall
//! ```

pub mod access;
pub mod config;
pub mod directory;
pub mod firewall;
pub mod openvpn;
pub mod session;

pub use config::Config;
pub use directory::{Directory, DirectoryClient};
pub use openvpn::HookError;
