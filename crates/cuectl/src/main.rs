//! cuectl - push show files into QLab and pull them back out
//!
//! Subcommands:
//! - `cuectl plan <source>` - Show what a push would do, without writing
//! - `cuectl push <source>` - Reconcile and apply a show file
//! - `cuectl pull` - Dump the live workspace as a show file
//! - `cuectl ping` - Check that QLab answers

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use cuesync::ResolutionChoice;

mod commands;
mod prompt;

#[derive(Parser)]
#[command(name = "cuectl")]
#[command(about = "Sync show descriptions with a QLab workspace")]
#[command(version)]
struct Cli {
    /// Config file, used in place of ./cuesync.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// QLab host (overrides config)
    #[arg(long, global = true, env = "CUESYNC_HOST")]
    host: Option<String>,

    /// QLab OSC port (overrides config)
    #[arg(long, global = true, env = "CUESYNC_PORT")]
    port: Option<u16>,

    /// Workspace passcode
    #[arg(long, global = true, env = "CUESYNC_PASSCODE", hide_env_values = true)]
    passcode: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the verdict for every cue without touching the workspace
    Plan {
        /// Show file (JSON)
        source: PathBuf,
    },

    /// Reconcile a show file and apply it to the workspace
    Push {
        /// Show file (JSON)
        source: PathBuf,

        /// How to settle cues edited on both sides
        #[arg(short, long, value_enum, default_value = "ask")]
        policy: Policy,

        /// Log writes instead of sending them
        #[arg(long)]
        dry_run: bool,

        /// Take cue numbers from cues that already hold them
        #[arg(long)]
        force_numbers: bool,
    },

    /// Write the live workspace out as a show file
    Pull {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Test connectivity to QLab
    Ping,
}

/// Conflict policy for `push`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Policy {
    /// Prompt for each conflict
    Ask,
    /// Source file wins
    Source,
    /// Live workspace wins
    Remote,
    /// Leave conflicting cues alone
    Skip,
}

impl Policy {
    /// The fixed answer for this policy, or `None` when the user decides.
    fn choice(self) -> Option<ResolutionChoice> {
        match self {
            Policy::Ask => None,
            Policy::Source => Some(ResolutionChoice::UseSource),
            Policy::Remote => Some(ResolutionChoice::KeepRemote),
            Policy::Skip => Some(ResolutionChoice::Skip),
        }
    }
}

/// Loads config and folds the connection flags over it.
fn load_config(cli: &Cli) -> Result<cueconf::CueConfig> {
    let mut config = cueconf::CueConfig::load_from(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(host) = &cli.host {
        config.connection.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.connection.port = port;
    }
    if let Some(passcode) = &cli.passcode {
        config.connection.passcode = Some(passcode.clone());
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    // Logs go to stderr so `pull` output stays clean
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.telemetry.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Plan { source } => commands::plan(&config, &source).await,
        Commands::Push {
            source,
            policy,
            dry_run,
            force_numbers,
        } => {
            let opts = commands::PushOptions {
                choice: policy.choice(),
                dry_run: dry_run || config.sync.dry_run,
                force_numbers: force_numbers || config.sync.force_cue_numbers,
            };
            commands::push(&config, &source, opts).await
        }
        Commands::Pull { out } => commands::pull(&config, out.as_deref()).await,
        Commands::Ping => commands::ping(&config).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn push_defaults_to_asking() {
        let cli = parse(&["cuectl", "push", "show.json"]);
        match cli.command {
            Commands::Push {
                source,
                policy,
                dry_run,
                force_numbers,
            } => {
                assert_eq!(source, PathBuf::from("show.json"));
                assert_eq!(policy, Policy::Ask);
                assert!(!dry_run);
                assert!(!force_numbers);
            }
            _ => panic!("expected push"),
        }
    }

    #[test]
    fn push_flags_parse() {
        let cli = parse(&[
            "cuectl",
            "push",
            "show.json",
            "--policy",
            "remote",
            "--dry-run",
            "--force-numbers",
        ]);
        match cli.command {
            Commands::Push {
                policy,
                dry_run,
                force_numbers,
                ..
            } => {
                assert_eq!(policy, Policy::Remote);
                assert!(dry_run);
                assert!(force_numbers);
            }
            _ => panic!("expected push"),
        }
    }

    #[test]
    fn unknown_policy_is_rejected() {
        assert!(Cli::try_parse_from(["cuectl", "push", "show.json", "--policy", "merge"]).is_err());
    }

    #[test]
    fn policies_map_to_choices() {
        assert_eq!(Policy::Ask.choice(), None);
        assert_eq!(Policy::Source.choice(), Some(ResolutionChoice::UseSource));
        assert_eq!(Policy::Remote.choice(), Some(ResolutionChoice::KeepRemote));
        assert_eq!(Policy::Skip.choice(), Some(ResolutionChoice::Skip));
    }

    #[test]
    fn global_flags_work_after_the_subcommand() {
        let cli = parse(&["cuectl", "ping", "--host", "10.0.0.20", "--port", "53001"]);
        assert_eq!(cli.host.as_deref(), Some("10.0.0.20"));
        assert_eq!(cli.port, Some(53001));
        assert!(matches!(cli.command, Commands::Ping));
    }

    #[test]
    fn flags_override_the_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cuesync.toml");
        std::fs::write(&path, "[connection]\nhost = \"10.0.0.5\"\nport = 53000\n").unwrap();

        let cli = parse(&[
            "cuectl",
            "--config",
            path.to_str().unwrap(),
            "--port",
            "53535",
            "--passcode",
            "4321",
            "ping",
        ]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.connection.port, 53535);
        assert_eq!(config.connection.passcode.as_deref(), Some("4321"));
        if std::env::var("CUESYNC_HOST").is_err() {
            assert_eq!(config.connection.host, "10.0.0.5");
        }
    }
}
