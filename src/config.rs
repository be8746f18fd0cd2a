//! Configuration handling for the OpenVPN access hooks
//!
//! Settings come from a TOML file, then environment overrides, then
//! defaults. The result is validated once before any hook does work.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/openvpn/client/config.toml";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SESSION_DIR: &str = "/var/run/openvpn";
pub const DEFAULT_STATIC_NETMASK: &str = "255.255.255.0";
pub const DEFAULT_CHAIN_NAME: &str = "VPN_USERS";

pub const ENV_CONFIG_PATH: &str = "OPENVPN_CLIENT_CONFIG";
pub const ENV_API_BASE_URL: &str = "OPENVPN_API_BASE_URL";
pub const ENV_API_TOKEN: &str = "OPENVPN_API_TOKEN";
pub const ENV_API_USERNAME: &str = "OPENVPN_API_USERNAME";
pub const ENV_API_PASSWORD: &str = "OPENVPN_API_PASSWORD";
pub const ENV_API_TIMEOUT: &str = "OPENVPN_API_TIMEOUT";
pub const ENV_SESSION_DIR: &str = "OPENVPN_SESSION_DIR";
pub const ENV_FIREWALL_TYPE: &str = "OPENVPN_FIREWALL_TYPE";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
    #[error("Failed to write config file: {0}")]
    WriteError(#[from] std::io::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub openvpn: OpenVpnConfig,
    #[serde(default)]
    pub firewall: FirewallConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub base_url: String,
    /// Static API token. Takes precedence over the service account.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(default = "default_timeout", with = "duration_str")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenVpnConfig {
    #[serde(default = "default_session_dir")]
    pub session_dir: PathBuf,
    /// Netmask sent with `ifconfig-push` for statically addressed users
    #[serde(default = "default_static_netmask")]
    pub static_netmask: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FirewallType {
    Nftables,
    Iptables,
}

impl std::str::FromStr for FirewallType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nftables" => Ok(FirewallType::Nftables),
            "iptables" => Ok(FirewallType::Iptables),
            other => Err(ConfigError::Invalid(format!(
                "firewall.type must be 'nftables' or 'iptables', got '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for FirewallType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FirewallType::Nftables => f.write_str("nftables"),
            FirewallType::Iptables => f.write_str("iptables"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallConfig {
    #[serde(rename = "type", default = "default_firewall_type")]
    pub kind: FirewallType,
    #[serde(default)]
    pub nftables: NfTablesConfig,
    #[serde(default)]
    pub iptables: IpTablesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NfTablesConfig {
    pub rules_file: PathBuf,
    pub reload_command: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IpTablesConfig {
    pub chain_name: String,
    pub rules_file: PathBuf,
    pub reload_command: String,
}

/// How the directory client authenticates, resolved once from [`ApiConfig`]
#[derive(Debug, Clone)]
pub enum AuthMode {
    /// Static token sent on every request
    StaticToken(SecretString),
    /// Service account exchanged for a short-lived bearer token
    ServiceAccount {
        username: String,
        password: SecretString,
    },
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_session_dir() -> PathBuf {
    PathBuf::from(DEFAULT_SESSION_DIR)
}

fn default_static_netmask() -> String {
    DEFAULT_STATIC_NETMASK.to_string()
}

fn default_firewall_type() -> FirewallType {
    FirewallType::Nftables
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: String::new(),
            username: String::new(),
            password: String::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl Default for OpenVpnConfig {
    fn default() -> Self {
        Self {
            session_dir: default_session_dir(),
            static_netmask: default_static_netmask(),
        }
    }
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            kind: default_firewall_type(),
            nftables: NfTablesConfig::default(),
            iptables: IpTablesConfig::default(),
        }
    }
}

impl Default for NfTablesConfig {
    fn default() -> Self {
        Self {
            rules_file: PathBuf::from("/etc/nftables.d/openvpn-users.nft"),
            reload_command: "nft -f /etc/nftables.conf".to_string(),
        }
    }
}

impl Default for IpTablesConfig {
    fn default() -> Self {
        Self {
            chain_name: DEFAULT_CHAIN_NAME.to_string(),
            rules_file: PathBuf::from("/etc/iptables/openvpn-users.rules"),
            reload_command: "iptables-restore --noflush /etc/iptables/openvpn-users.rules"
                .to_string(),
        }
    }
}

// Credentials stay out of logs even before they become secrets.
impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &str| if v.is_empty() { "" } else { "[REDACTED]" };
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url)
            .field("token", &redact(&self.token))
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ApiConfig {
    /// Resolve the authentication mode. A static token wins over a
    /// service account when both are configured.
    pub fn auth_mode(&self) -> Result<AuthMode, ConfigError> {
        if !self.token.is_empty() {
            return Ok(AuthMode::StaticToken(SecretString::from(self.token.clone())));
        }
        if !self.username.is_empty() && !self.password.is_empty() {
            return Ok(AuthMode::ServiceAccount {
                username: self.username.clone(),
                password: SecretString::from(self.password.clone()),
            });
        }
        Err(ConfigError::Invalid(
            "api.token or api.username/password is required".to_string(),
        ))
    }

    pub fn base_url(&self) -> Result<Url, ConfigError> {
        if self.base_url.is_empty() {
            return Err(ConfigError::Invalid("api.base_url is required".to_string()));
        }
        Url::parse(&self.base_url)
            .map_err(|e| ConfigError::Invalid(format!("api.base_url is not a valid URL: {}", e)))
    }
}

impl Config {
    /// Load the config file, apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::read(path)?;
        config.apply_env_overrides(|key| env::var(key))?;
        config.validate()?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply `OPENVPN_*` overrides using a custom getter (for testing)
    pub fn apply_env_overrides<F>(&mut self, get_var: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let get = |key: &str| get_var(key).ok().filter(|v| !v.is_empty());

        if let Some(v) = get(ENV_API_BASE_URL) {
            self.api.base_url = v;
        }
        if let Some(v) = get(ENV_API_TOKEN) {
            self.api.token = v;
        }
        if let Some(v) = get(ENV_API_USERNAME) {
            self.api.username = v;
        }
        if let Some(v) = get(ENV_API_PASSWORD) {
            self.api.password = v;
        }
        if let Some(timeout) = get(ENV_API_TIMEOUT).and_then(|v| humantime::parse_duration(&v).ok())
        {
            self.api.timeout = timeout;
        }
        if let Some(v) = get(ENV_SESSION_DIR) {
            self.openvpn.session_dir = PathBuf::from(v);
        }
        if let Some(v) = get(ENV_FIREWALL_TYPE) {
            self.firewall.kind = v.parse()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.api.base_url()?;
        self.api.auth_mode()?;
        if self.api.timeout.is_zero() {
            return Err(ConfigError::Invalid("api.timeout must be positive".to_string()));
        }
        Ok(())
    }
}

/// Resolve the config path: CLI argument, then environment, then default.
pub fn resolve_config_path(cli_path: Option<&Path>) -> PathBuf {
    resolve_config_path_with(cli_path, |key| env::var(key))
}

fn resolve_config_path_with<F>(cli_path: Option<&Path>, get_var: F) -> PathBuf
where
    F: Fn(&str) -> Result<String, env::VarError>,
{
    if let Some(path) = cli_path {
        return path.to_path_buf();
    }
    match get_var(ENV_CONFIG_PATH) {
        Ok(path) if !path.is_empty() => PathBuf::from(path),
        _ => PathBuf::from(DEFAULT_CONFIG_PATH),
    }
}

/// Serde adapter for human-readable durations such as `"10s"`
mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
