//! OpenVPN hook environment parsing
//!
//! OpenVPN describes the client to its hook scripts through environment
//! variables (and, for `auth-user-pass-verify via-file`, a credentials
//! file). This module turns those into typed values.
//!
//! # Key Variables
//!
//! | Variable | Example | Hook |
//! |----------|---------|------|
//! | `common_name` | `alice` | connect, disconnect |
//! | `trusted_ip` / `trusted_ip6` | `203.0.113.7` | connect |
//! | `trusted_port` | `51820` | connect |
//! | `ifconfig_pool_remote_ip` | `10.8.0.6` | connect |
//! | `bytes_received` / `bytes_sent` | `1048576` | disconnect |

use secrecy::SecretString;
use std::env;
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use thiserror::Error;

use crate::session::ClientEndpoint;

#[derive(Error, Debug)]
pub enum EnvError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid IP address in {var}: {value}")]
    InvalidIp { var: String, value: String },
    #[error("Failed to read credentials file {path}: {source}")]
    AuthFileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Credentials file {0} must hold a username and a password line")]
    AuthFileMalformed(String),
}

/// Variables available to the `client-connect` hook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectEnv {
    /// Certificate common name, used as the directory username
    pub common_name: String,
    /// Client's public address (`trusted_ip`, else `trusted_ip6`)
    pub client_address: Option<IpAddr>,
    pub client_port: String,
    /// Address OpenVPN picked from its pool, if any
    pub pool_address: Option<String>,
}

impl ConnectEnv {
    pub fn from_env() -> Result<Self, EnvError> {
        Self::from_env_fn(|key| env::var(key))
    }

    /// Parse environment using a custom getter (for testing)
    pub fn from_env_fn<F>(get_var: F) -> Result<Self, EnvError>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let common_name = required(&get_var, "common_name")?;

        let client_address = match optional(&get_var, "trusted_ip") {
            Some(value) => Some(parse_ip("trusted_ip", value)?),
            None => match optional(&get_var, "trusted_ip6") {
                Some(value) => Some(parse_ip("trusted_ip6", value)?),
                None => None,
            },
        };

        Ok(Self {
            common_name,
            client_address,
            client_port: optional(&get_var, "trusted_port").unwrap_or_default(),
            pool_address: optional(&get_var, "ifconfig_pool_remote_ip"),
        })
    }

    pub fn client_endpoint(&self) -> ClientEndpoint {
        ClientEndpoint {
            address: self
                .client_address
                .map(|ip| ip.to_string())
                .unwrap_or_default(),
            port: self.client_port.clone(),
        }
    }
}

/// Variables available to the `client-disconnect` hook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectEnv {
    pub common_name: String,
    pub bytes_received: i64,
    pub bytes_sent: i64,
}

impl DisconnectEnv {
    pub fn from_env() -> Result<Self, EnvError> {
        Self::from_env_fn(|key| env::var(key))
    }

    /// Parse environment using a custom getter (for testing).
    ///
    /// Missing or unparsable counters count as zero.
    pub fn from_env_fn<F>(get_var: F) -> Result<Self, EnvError>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let counter = |key: &str| {
            optional(&get_var, key)
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(0)
        };

        Ok(Self {
            common_name: required(&get_var, "common_name")?,
            bytes_received: counter("bytes_received"),
            bytes_sent: counter("bytes_sent"),
        })
    }
}

/// Credentials handed over by `auth-user-pass-verify via-file`
pub struct AuthFile {
    pub username: String,
    pub password: SecretString,
}

impl AuthFile {
    pub fn read(path: &Path) -> Result<Self, EnvError> {
        let content = fs::read_to_string(path).map_err(|source| EnvError::AuthFileRead {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content)
            .ok_or_else(|| EnvError::AuthFileMalformed(path.display().to_string()))
    }

    /// Username on the first line, password on the second
    pub fn parse(content: &str) -> Option<Self> {
        let mut lines = content.lines();
        let username = lines.next()?.trim();
        let password = lines.next()?.trim_end_matches('\r');
        if username.is_empty() || password.is_empty() {
            return None;
        }
        Some(Self {
            username: username.to_string(),
            password: SecretString::from(password.to_string()),
        })
    }
}

fn required<F>(get_var: &F, key: &str) -> Result<String, EnvError>
where
    F: Fn(&str) -> Result<String, env::VarError>,
{
    optional(get_var, key).ok_or_else(|| EnvError::MissingVar(key.to_string()))
}

/// Unset and blank variables are treated alike
fn optional<F>(get_var: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Result<String, env::VarError>,
{
    get_var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_ip(var: &str, value: String) -> Result<IpAddr, EnvError> {
    value.parse().map_err(|_| EnvError::InvalidIp {
        var: var.to_string(),
        value,
    })
}
