use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use branchwatch::daemon::is_daemon_running;
use branchwatch::journal::Journal;
use branchwatch::notify::render_event;
use branchwatch::{Config, Daemon, EventKind};

#[derive(Parser)]
#[command(name = "branchwatch")]
#[command(about = "Remote git repository branch monitor")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Local repository whose remotes seed the monitored set
        #[arg(short, long)]
        repository: Option<String>,
    },

    /// Run a single poll cycle and print the events
    Once {
        /// Emit events as JSON instead of console lines
        #[arg(long)]
        json: bool,
    },

    /// List the repositories that would be monitored
    Repos,

    /// Show journalled events
    Events {
        /// Only events of this kind (e.g. "branch_force_updated")
        #[arg(long)]
        kind: Option<String>,

        /// Maximum number of entries to show
        #[arg(long, default_value = "50")]
        limit: u32,

        /// Mark everything shown as seen
        #[arg(long)]
        ack: bool,
    },

    /// Run as daemon
    Daemon {
        #[command(subcommand)]
        daemon_command: DaemonCommands,
    },
}

#[derive(Subcommand)]
enum DaemonCommands {
    /// Start daemon
    Start {
        /// Run in foreground (don't daemonize)
        #[arg(long)]
        foreground: bool,
    },

    /// Stop running daemon
    Stop,

    /// Show daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose)?;
    info!("Starting branchwatch v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(cli.config)?;

    match cli.command {
        Commands::Init { repository } => cmd_init(repository, &config),
        Commands::Once { json } => cmd_once(json, &config).await,
        Commands::Repos => cmd_repos(&config).await,
        Commands::Events { kind, limit, ack } => cmd_events(kind, limit, ack),
        Commands::Daemon { daemon_command } => cmd_daemon(daemon_command, &config).await,
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    Ok(())
}

/// Load configuration from specified path or default location
fn load_config(config_path: Option<std::path::PathBuf>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load(&path),
        None => Config::load_or_default(),
    }
}

/// Write a fresh configuration file
fn cmd_init(repository: Option<String>, config: &Config) -> Result<()> {
    let mut new_config = config.clone();
    if let Some(repository) = repository {
        new_config.local_repository = repository;
    }

    let config_path = Config::default_config_path()?;
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    new_config.save(&config_path)?;

    println!("✅ Configuration written to {:?}", config_path);
    println!("   Local repository: {}", new_config.local_repository);
    println!("   Poll interval: {}", new_config.poll.interval);
    println!("   Next: add forks or snoozed entries, then run 'branchwatch once'");

    Ok(())
}

/// Run a single poll cycle in the foreground
async fn cmd_once(json: bool, config: &Config) -> Result<()> {
    let daemon = Daemon::new(config.clone())?;
    let events = daemon.run_once().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&events)?);
    } else if events.is_empty() {
        println!("No branch activity since the last cycle");
    }
    // Non-JSON output already went through the console notifier

    Ok(())
}

/// Show which repositories the next cycle would probe
async fn cmd_repos(config: &Config) -> Result<()> {
    use branchwatch::tracker::Tracker;
    use branchwatch::GitClient;
    use std::sync::Arc;

    let git = Arc::new(GitClient::new(std::path::PathBuf::from(
        &config.local_repository,
    )));
    let tracker = Tracker::new(Arc::new(config.clone()), git);
    let repositories = tracker.monitored_repositories().await;

    println!("Monitored repositories ({}):", repositories.len());
    for repo in repositories {
        println!("  📁 {} [{}] {}", repo.friendly_name, repo.origin.as_str(), repo.url);
    }

    Ok(())
}

/// Show journalled events
fn cmd_events(kind: Option<String>, limit: u32, ack: bool) -> Result<()> {
    let kind = match kind.as_deref() {
        Some(s) => match EventKind::parse(s) {
            Some(kind) => Some(kind),
            None => anyhow::bail!("Unknown event kind '{}'", s),
        },
        None => None,
    };

    let journal = Journal::open()?;
    let entries = journal.recent(kind, Some(limit))?;

    if entries.is_empty() {
        println!("No journalled events");
        return Ok(());
    }

    for entry in &entries {
        let marker = if entry.acknowledged { " " } else { "*" };
        println!(
            "{} {}  {}",
            marker,
            entry.recorded_at.format("%Y-%m-%d %H:%M"),
            render_event(&entry.event)
        );
    }

    if ack {
        let count = journal.acknowledge_all()?;
        println!("\n✅ Acknowledged {} event(s)", count);
    }

    Ok(())
}

/// Handle daemon commands
async fn cmd_daemon(daemon_command: DaemonCommands, config: &Config) -> Result<()> {
    match daemon_command {
        DaemonCommands::Start { foreground } => {
            println!("🚀 Starting branchwatch daemon...");

            if is_daemon_running(config)? {
                println!("⚠️  Daemon is already running!");
                println!("   Use 'branchwatch daemon stop' to stop it first");
                return Ok(());
            }

            let mut daemon = Daemon::new(config.clone())?;

            if foreground {
                println!("🖥️  Running in foreground mode (Ctrl+C to stop)");
                daemon.run().await?;
            } else {
                #[cfg(unix)]
                {
                    daemon.daemonize()?;
                    daemon.run().await?;
                }

                #[cfg(not(unix))]
                {
                    println!("❌ Background daemon mode not supported on this platform");
                    println!("   Use --foreground to run in foreground mode");
                }
            }
        }

        DaemonCommands::Stop => {
            println!("🛑 Stopping branchwatch daemon...");

            if !is_daemon_running(config)? {
                println!("⚠️  No daemon appears to be running");
                return Ok(());
            }

            let daemon = Daemon::new(config.clone())?;
            daemon.stop()?;

            println!("✅ Daemon stop signal sent");
        }

        DaemonCommands::Status => {
            println!("📊 branchwatch Daemon Status");

            if is_daemon_running(config)? {
                println!("   🟢 Status: Running");
                println!("   🔄 Poll interval: {}", config.poll.interval);
                if !config.daemon.log_file.is_empty() {
                    println!("   📄 Log file: {}", config.daemon.log_file);
                }
            } else {
                println!("   🔴 Status: Not running");
                println!("   💡 Use 'branchwatch daemon start' to start the daemon");
            }
        }
    }

    Ok(())
}
