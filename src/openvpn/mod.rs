//! OpenVPN hook integration
//!
//! OpenVPN runs this binary as `client-connect`, `client-disconnect` and
//! `auth-user-pass-verify` scripts, passing client details through
//! environment variables. The firewall sync runs from a timer instead.

pub mod env;
pub mod hooks;
pub mod push;

pub use env::{AuthFile, ConnectEnv, DisconnectEnv, EnvError};
pub use hooks::{
    FirewallRun, HookError, connect_directory, handle_connect, handle_disconnect, handle_firewall,
    handle_login, run_connect, run_disconnect, run_firewall_sync, run_login,
};
pub use push::render_client_config;
