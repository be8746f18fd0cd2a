use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{Subscriber, error, info};
use tracing_subscriber::EnvFilter;

use openvpn_access_sync::config::{self, ConfigError};
use openvpn_access_sync::{Config, HookError, openvpn};

#[derive(Parser)]
#[command(name = "openvpn-access-sync")]
#[command(about = "Directory-driven access control hooks for OpenVPN")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: $OPENVPN_CLIENT_CONFIG or /etc/openvpn/client/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// client-connect hook
    ///
    /// Reads `common_name`, `trusted_ip`, `trusted_port` and
    /// `ifconfig_pool_remote_ip` from the environment and writes the
    /// per-client config OpenVPN passes as the first argument.
    Connect {
        /// Per-client config file to write
        client_config_file: PathBuf,
    },
    /// client-disconnect hook
    ///
    /// Reads `common_name`, `bytes_received` and `bytes_sent` from the
    /// environment and closes the session opened at connect.
    Disconnect,
    /// Rebuild firewall rules from every active user's routes
    Firewall {
        /// Print the rules instead of writing and reloading them
        #[arg(long)]
        dry_run: bool,
    },
    /// auth-user-pass-verify hook (via-file)
    Login {
        /// File holding the username and password on two lines
        auth_file: PathBuf,
    },
    /// Generate default config file
    Init {
        /// Where to write it (default: the resolved config path)
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let subscriber = build_subscriber(cli.verbose, cli.json);
    tracing::subscriber::set_global_default(subscriber)?;

    if let Err(e) = run(cli).await {
        error!("{}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Hooks log to stderr; OpenVPN folds it into its own log and stdout
/// stays free for dry-run output. `RUST_LOG` overrides the level.
fn build_subscriber(verbose: bool, json: bool) -> Box<dyn Subscriber + Send + Sync> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        Box::new(builder.json().finish())
    } else {
        Box::new(builder.finish())
    }
}

async fn run(cli: Cli) -> Result<(), HookError> {
    let config_path = config::resolve_config_path(cli.config.as_deref());
    let load = || Config::load(&config_path);

    match cli.command {
        Commands::Connect { client_config_file } => {
            openvpn::handle_connect(&load()?, &client_config_file).await
        }
        Commands::Disconnect => openvpn::handle_disconnect(&load()?).await,
        Commands::Firewall { dry_run } => openvpn::handle_firewall(&load()?, dry_run).await,
        Commands::Login { auth_file } => openvpn::handle_login(&load()?, &auth_file).await,
        Commands::Init { path } => {
            let path = path.unwrap_or_else(|| config_path.clone());
            if path.exists() {
                return Err(ConfigError::Invalid(format!(
                    "{} already exists, not overwriting",
                    path.display()
                ))
                .into());
            }
            Config::default().save(&path)?;
            info!("Generated default config");
            println!("Created default config: {}", path.display());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_hook_commands() {
        let cli = Cli::try_parse_from([
            "openvpn-access-sync",
            "--json",
            "-c",
            "/tmp/config.toml",
            "connect",
            "/tmp/ccd",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/config.toml")));
        assert!(matches!(cli.command, Commands::Connect { .. }));

        let cli = Cli::try_parse_from(["openvpn-access-sync", "firewall", "--dry-run"]).unwrap();
        assert!(matches!(cli.command, Commands::Firewall { dry_run: true }));
    }

    #[test]
    fn test_subscribers_build_in_both_formats() {
        for json in [false, true] {
            let subscriber = build_subscriber(true, json);
            tracing::subscriber::with_default(subscriber, || {
                info!(json, "Subscriber installed");
            });
        }
    }
}
