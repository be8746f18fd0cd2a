//! Hook entry points
//!
//! One function per OpenVPN hook. Each `handle_*` function reads what
//! OpenVPN handed over, builds a directory client from configuration and
//! delegates to a `run_*` function that takes its collaborators as
//! arguments, so the control flow can be exercised without a server.
//!
//! OpenVPN only looks at the exit status: any `HookError` returned here
//! becomes exit code 1 in `main`.

use chrono::{DateTime, Utc};
use std::fs;
use std::future::Future;
use std::io::Write;
use std::path::Path;
use thiserror::Error;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::access::{collect_all, resolve_user};
use crate::config::{AuthMode, Config, ConfigError};
use crate::directory::{Directory, DirectoryClient, DirectoryError, DirectoryTransport};
use crate::firewall::{Backend, FirewallError, Reloader, ShellReloader, SyncOutcome, apply_rules};
use crate::openvpn::env::{AuthFile, ConnectEnv, DisconnectEnv, EnvError};
use crate::openvpn::push::render_client_config;
use crate::session::{
    ByteCounters, CorrelationStore, FileStore, SessionCoordinator, SessionError, SessionState,
};

#[derive(Error, Debug)]
pub enum HookError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Environment parsing failed: {0}")]
    Env(#[from] EnvError),
    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
    #[error("Firewall error: {0}")]
    Firewall(#[from] FirewallError),
    #[error("Failed to write client config {path}: {source}")]
    ClientConfigWrite {
        path: String,
        source: std::io::Error,
    },
    #[error("Access denied for {username}: {reason}")]
    AccessDenied { username: String, reason: String },
}

/// Build an authenticated directory client from configuration.
pub async fn connect_directory(config: &Config) -> Result<DirectoryClient, HookError> {
    let mode = config.api.auth_mode()?;
    let transport = DirectoryTransport::new(config.api.base_url()?, config.api.timeout)?;
    Ok(DirectoryClient::connect(transport, &mode).await?)
}

/// `client-connect`: authorize the client, write its push config and open
/// a remote session.
pub async fn handle_connect(config: &Config, client_config_file: &Path) -> Result<(), HookError> {
    let env = ConnectEnv::from_env()?;
    let span = info_span!("connect", user = %env.common_name);

    async {
        let directory = connect_directory(config).await?;
        let sessions = SessionCoordinator::new(FileStore::new(&config.openvpn.session_dir));
        run_connect(
            &directory,
            &sessions,
            &env,
            client_config_file,
            &config.openvpn.static_netmask,
            Utc::now(),
        )
        .await
        .map(|_| ())
    }
    .instrument(span)
    .await
}

/// Connect flow against any directory and store.
///
/// Lookup, admission, route resolution and the config write are fatal;
/// session bookkeeping is not.
pub async fn run_connect<D: Directory, S: CorrelationStore>(
    directory: &D,
    sessions: &SessionCoordinator<S>,
    env: &ConnectEnv,
    client_config_file: &Path,
    static_netmask: &str,
    now: DateTime<Utc>,
) -> Result<SessionState, HookError> {
    let identity = directory.find_user_by_username(&env.common_name).await?;
    if !identity.is_admissible_at(now) {
        let reason = if identity.is_active {
            "outside account validity window"
        } else {
            "account is inactive"
        };
        return Err(HookError::AccessDenied {
            username: identity.username,
            reason: reason.to_string(),
        });
    }

    let set = resolve_user(directory, identity, env.pool_address.as_deref()).await?;
    info!(
        "Authorized {} network(s) for {} at {}{}",
        set.networks.len(),
        set.username(),
        set.tunnel_address,
        if set.default_route { " (default route)" } else { "" }
    );

    let content = render_client_config(&set, static_netmask);
    write_client_config(client_config_file, &content)?;
    debug!("Wrote client config {}", client_config_file.display());

    Ok(sessions.open(directory, &set, &env.client_endpoint()).await)
}

/// `client-disconnect`: close the remote session recorded at connect.
pub async fn handle_disconnect(config: &Config) -> Result<(), HookError> {
    let env = DisconnectEnv::from_env()?;
    let span = info_span!("disconnect", user = %env.common_name);

    // Resolve everything config-related up front so the lazy client
    // factory can only fail with directory errors.
    let mode = config.api.auth_mode()?;
    let base_url = config.api.base_url()?;
    let timeout = config.api.timeout;
    let sessions = SessionCoordinator::new(FileStore::new(&config.openvpn.session_dir));

    run_disconnect(&sessions, &env, move || async move {
        let transport = DirectoryTransport::new(base_url, timeout)?;
        DirectoryClient::connect(transport, &mode).await
    })
    .instrument(span)
    .await
    .map(|_| ())
}

pub async fn run_disconnect<S, D, F, Fut>(
    sessions: &SessionCoordinator<S>,
    env: &DisconnectEnv,
    directory: F,
) -> Result<SessionState, HookError>
where
    S: CorrelationStore,
    D: Directory,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<D, DirectoryError>>,
{
    let counters = ByteCounters {
        received: env.bytes_received,
        sent: env.bytes_sent,
    };
    Ok(sessions.close(&env.common_name, counters, directory).await?)
}

/// Result of one firewall sync
#[derive(Debug)]
pub struct FirewallRun {
    pub users: usize,
    pub rules: String,
    /// `None` for a dry run
    pub outcome: Option<SyncOutcome>,
}

/// Periodic firewall sync. A dry run prints the compiled rules to stdout.
pub async fn handle_firewall(config: &Config, dry_run: bool) -> Result<(), HookError> {
    let span = info_span!("firewall", dry_run);

    async {
        let directory = connect_directory(config).await?;
        let backend = Backend::from_config(&config.firewall);
        let run = run_firewall_sync(&directory, &backend, &ShellReloader::new(), dry_run).await?;

        if dry_run {
            print!("{}", run.rules);
        }
        Ok::<(), HookError>(())
    }
    .instrument(span)
    .await
}

pub async fn run_firewall_sync<D: Directory, R: Reloader>(
    directory: &D,
    backend: &Backend,
    reloader: &R,
    dry_run: bool,
) -> Result<FirewallRun, HookError> {
    // Without the full listing we cannot know who to keep; leave the
    // current rules in place.
    let identities = directory.get_all_active_users().await?;
    let sets = collect_all(directory, &identities).await;
    info!(
        "Compiling {} rules for {} of {} active users",
        backend.kind(),
        sets.len(),
        identities.len()
    );

    let rules = backend.generate_rules(&sets);
    let outcome = if dry_run {
        None
    } else {
        Some(apply_rules(
            backend.rules_file(),
            &rules,
            backend.reload_command(),
            reloader,
        )?)
    };

    Ok(FirewallRun {
        users: sets.len(),
        rules,
        outcome,
    })
}

/// `auth-user-pass-verify via-file`: check a user's own credentials.
pub async fn handle_login(config: &Config, auth_file: &Path) -> Result<(), HookError> {
    let auth = AuthFile::read(auth_file)?;
    let span = info_span!("login", user = %auth.username);

    async {
        let mode = config.api.auth_mode()?;
        let transport = DirectoryTransport::new(config.api.base_url()?, config.api.timeout)?;
        run_login(&transport, &mode, &auth).await
    }
    .instrument(span)
    .await
}

pub async fn run_login(
    transport: &DirectoryTransport,
    mode: &AuthMode,
    auth: &AuthFile,
) -> Result<(), HookError> {
    let response = transport
        .validate_user(mode, &auth.username, &auth.password)
        .await?;

    if response.valid {
        info!("Credentials accepted for {}", auth.username);
        return Ok(());
    }

    let reason = match response.status {
        Some(429) => {
            warn!("Login for {} rate limited or account locked", auth.username);
            "too many attempts".to_string()
        }
        _ if !response.message.is_empty() => response.message,
        _ => "invalid credentials".to_string(),
    };
    Err(HookError::AccessDenied {
        username: auth.username.clone(),
        reason,
    })
}

/// OpenVPN reads the file back as the server user, so it stays world-readable.
fn write_client_config(path: &Path, content: &str) -> Result<(), HookError> {
    let io_err = |source: std::io::Error| HookError::ClientConfigWrite {
        path: path.display().to_string(),
        source,
    };

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o644);
    }

    let mut file = options.open(path).map_err(io_err)?;
    file.write_all(content.as_bytes()).map_err(io_err)?;
    Ok(())
}
