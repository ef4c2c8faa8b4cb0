#![deny(unsafe_code)]

//! haltd CLI: runs the halt service and talks to it.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use haltd_config::AppConfig;
use haltd_core::{ClientOptions, Daemon, IpcClient};

/// haltd: power off this machine on request from unprivileged callers.
#[derive(Parser)]
#[command(name = "haltd", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "haltd.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the halt service in the foreground.
    Serve,

    /// Send one raw command line and print the response.
    Send {
        /// Command text, e.g. PING, DRYRUN or SHUTDOWN.
        command: String,
    },

    /// Check that the service answers.
    Ping,

    /// Ask the service to power off this machine (`client.dry_run` decides
    /// between DRYRUN and SHUTDOWN unless overridden).
    Request {
        /// Send DRYRUN regardless of configuration.
        #[arg(long, overrides_with = "no_dry_run")]
        dry_run: bool,

        /// Send SHUTDOWN regardless of configuration.
        #[arg(long, overrides_with = "dry_run")]
        no_dry_run: bool,

        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Validate and display configuration.
    Config {
        /// Show the resolved configuration.
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config).await?;
    init_tracing(cli.verbose, &config.logging.level);
    if !cli.config.exists() {
        info!(path = %cli.config.display(), "Config file not found, using defaults");
    }

    match cli.command {
        Commands::Serve => cmd_serve(config).await?,
        Commands::Send { command } => cmd_send(&config, &command).await?,
        Commands::Ping => cmd_send(&config, "PING").await?,
        Commands::Request {
            dry_run,
            no_dry_run,
            yes,
        } => {
            let dry_run = resolve_dry_run(config.client.dry_run, dry_run, no_dry_run);
            cmd_request(&config, dry_run, yes).await?
        }
        Commands::Config { show } => cmd_config(&cli.config, &config, show)?,
    }

    Ok(())
}

/// `RUST_LOG` wins, then `-v`, then the configured level.
fn init_tracing(verbose: u8, configured: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity_filter(verbose, configured)));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn verbosity_filter(verbose: u8, configured: &str) -> &str {
    match verbose {
        0 => configured,
        1 => "debug",
        _ => "trace",
    }
}

async fn cmd_serve(config: AppConfig) -> Result<()> {
    info!("Starting haltd service");
    let daemon = Daemon::new(config);
    daemon.run().await?;
    Ok(())
}

async fn cmd_send(config: &AppConfig, command: &str) -> Result<()> {
    let client = IpcClient::new(ClientOptions::from(&config.client));
    let response = client
        .send(command)
        .await
        .with_context(|| format!("Failed to contact service on {}", client.path()))?;
    println!("{response}");
    Ok(())
}

async fn cmd_request(config: &AppConfig, dry_run: bool, yes: bool) -> Result<()> {
    let command = request_command(dry_run);

    if config.client.confirm && !yes {
        let prompt = if dry_run {
            "Send a dry-run shutdown request? [y/N] "
        } else {
            "Power off this machine now? [y/N] "
        };
        if !confirm(prompt).await? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let client = IpcClient::new(ClientOptions::from(&config.client));
    match client.send(command).await {
        Ok(response) => {
            println!("Service response: {response}");
            Ok(())
        }
        Err(e) => bail!("Failed to contact service on {}: {e}", client.path()),
    }
}

/// Command-line flags win over the configured toggle.
fn resolve_dry_run(configured: bool, dry_run: bool, no_dry_run: bool) -> bool {
    if dry_run {
        true
    } else if no_dry_run {
        false
    } else {
        configured
    }
}

fn request_command(dry_run: bool) -> &'static str {
    if dry_run { "DRYRUN" } else { "SHUTDOWN" }
}

async fn confirm(prompt: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut answer = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut answer)
        .await?;
    Ok(is_affirmative(&answer))
}

fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn cmd_config(config_path: &Path, config: &AppConfig, show: bool) -> Result<()> {
    if show {
        let toml_str = toml::to_string_pretty(config).context("TOML error")?;
        println!("{toml_str}");
    } else if config_path.exists() {
        println!("Configuration at '{}' is valid.", config_path.display());
    } else {
        println!(
            "No configuration at '{}'; defaults are valid.",
            config_path.display()
        );
    }
    Ok(())
}

/// File if present, else defaults; `HALTD_*` overrides on top.
async fn load_config(path: &Path) -> Result<AppConfig> {
    let config = if path.exists() {
        AppConfig::load(path)
            .await
            .with_context(|| format!("loading {}", path.display()))?
    } else {
        AppConfig::default()
    };
    Ok(config.with_process_env()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_request_flags() {
        let cli = Cli::parse_from(["haltd", "request", "--no-dry-run", "-y"]);
        match cli.command {
            Commands::Request {
                dry_run,
                no_dry_run,
                yes,
            } => {
                assert!(!dry_run);
                assert!(no_dry_run);
                assert!(yes);
            }
            _ => panic!("expected request"),
        }
    }

    #[test]
    fn test_send_takes_raw_command() {
        let cli = Cli::parse_from(["haltd", "-c", "/etc/haltd.toml", "send", "dryrun"]);
        assert_eq!(cli.config, PathBuf::from("/etc/haltd.toml"));
        assert!(matches!(cli.command, Commands::Send { command } if command == "dryrun"));
    }

    #[test]
    fn test_request_command_follows_dry_run_toggle() {
        assert_eq!(request_command(true), "DRYRUN");
        assert_eq!(request_command(false), "SHUTDOWN");
    }

    #[test]
    fn test_last_dry_run_flag_wins() {
        let cli = Cli::parse_from(["haltd", "request", "--no-dry-run", "--dry-run"]);
        match cli.command {
            Commands::Request {
                dry_run,
                no_dry_run,
                ..
            } => assert_eq!((dry_run, no_dry_run), (true, false)),
            _ => panic!("expected request"),
        }
    }

    #[test]
    fn test_configured_dry_run_selects_command() {
        let mut config = AppConfig::default();
        assert!(config.client.dry_run);
        let dry_run = resolve_dry_run(config.client.dry_run, false, false);
        assert_eq!(request_command(dry_run), "DRYRUN");

        config.client.dry_run = false;
        let dry_run = resolve_dry_run(config.client.dry_run, false, false);
        assert_eq!(request_command(dry_run), "SHUTDOWN");
    }

    #[test]
    fn test_flags_override_configured_dry_run() {
        assert!(!resolve_dry_run(true, false, true));
        assert!(resolve_dry_run(false, true, false));
    }

    #[test]
    fn test_is_affirmative() {
        assert!(is_affirmative("y\n"));
        assert!(is_affirmative(" YES "));
        assert!(!is_affirmative("\n"));
        assert!(!is_affirmative("no"));
        assert!(!is_affirmative("yep"));
    }

    #[test]
    fn test_verbosity_filter() {
        assert_eq!(verbosity_filter(0, "warn"), "warn");
        assert_eq!(verbosity_filter(1, "warn"), "debug");
        assert_eq!(verbosity_filter(3, "warn"), "trace");
    }
}
