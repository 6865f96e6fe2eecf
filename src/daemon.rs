//! Daemon Infrastructure - Background service for periodic repository polling
//!
//! Runs the tracking engine on a fixed interval with PID file management
//! and graceful shutdown handling. Cycles never overlap: the loop awaits
//! each cycle before the next tick is honored.

use crate::classify::ClassifiedEvent;
use crate::config::Config;
use crate::git::GitClient;
use crate::journal::Journal;
use crate::notify::{deliver_all, ConsoleNotifier, Notifier};
use crate::tracker::Tracker;
use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

/// Daemon state and control
pub struct Daemon {
    config: Arc<Config>,
    tracker: Tracker,
    notifiers: Vec<Box<dyn Notifier>>,
    journal: Option<Journal>,
    shutdown_sender: broadcast::Sender<()>,
    is_running: Arc<AtomicBool>,
    pid_file_path: Option<PathBuf>,
}

impl Daemon {
    /// Create a new daemon instance
    pub fn new(config: Config) -> Result<Self> {
        let config = Arc::new(config);

        let git = Arc::new(GitClient::new(PathBuf::from(&config.local_repository)));
        let tracker = Tracker::new(config.clone(), git);

        let mut notifiers: Vec<Box<dyn Notifier>> = Vec::new();
        if config.notifications.console {
            notifiers.push(Box::new(ConsoleNotifier::new(&config.notifications.stream)));
        }

        let journal = match Journal::open() {
            Ok(journal) => Some(journal),
            Err(e) => {
                warn!("Event journal unavailable, history disabled: {:#}", e);
                None
            }
        };

        let (shutdown_sender, _) = broadcast::channel(1);
        let is_running = Arc::new(AtomicBool::new(false));

        let pid_file_path = if !config.daemon.pid_file.is_empty() {
            Some(PathBuf::from(&config.daemon.pid_file))
        } else {
            None
        };

        Ok(Self {
            config,
            tracker,
            notifiers,
            journal,
            shutdown_sender,
            is_running,
            pid_file_path,
        })
    }

    /// Start the daemon in the foreground
    pub async fn run(&mut self) -> Result<()> {
        info!("Starting branchwatch daemon");

        self.write_pid_file().context("Failed to write PID file")?;
        self.is_running.store(true, Ordering::SeqCst);

        let shutdown_receiver = self.shutdown_sender.subscribe();
        let is_running = self.is_running.clone();

        let shutdown_sender = self.shutdown_sender.clone();
        tokio::spawn(async move {
            Self::wait_for_shutdown_signal().await;
            info!("Shutdown signal received, stopping daemon...");
            is_running.store(false, Ordering::SeqCst);
            let _ = shutdown_sender.send(());
        });

        let result = self.daemon_loop(shutdown_receiver).await;

        self.cleanup().context("Failed to cleanup daemon")?;

        result
    }

    /// Start the daemon as a background service (Unix platforms)
    #[cfg(unix)]
    pub fn daemonize(&self) -> Result<()> {
        use daemonize::Daemonize;

        let log_file = if !self.config.daemon.log_file.is_empty() {
            let path = PathBuf::from(&self.config.daemon.log_file);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).context("Failed to create log directory")?;
            }
            Some(std::fs::File::create(&path).context("Failed to create log file")?)
        } else {
            None
        };

        let mut daemonize = Daemonize::new();

        if let Some(pid_path) = &self.pid_file_path {
            daemonize = daemonize.pid_file(pid_path);
        }

        if let Some(log_file) = log_file {
            daemonize = daemonize.stdout(log_file.try_clone()?).stderr(log_file);
        }

        daemonize.start().context("Failed to daemonize process")?;

        info!("branchwatch daemon started as background service");
        Ok(())
    }

    /// Stop a running daemon by sending a shutdown signal
    pub fn stop(&self) -> Result<()> {
        info!("Sending shutdown signal to daemon");

        if let Some(pid_file) = &self.pid_file_path {
            if pid_file.exists() {
                let pid_str = fs::read_to_string(pid_file).context("Failed to read PID file")?;

                let pid: u32 = pid_str.trim().parse().context("Invalid PID in PID file")?;

                #[cfg(unix)]
                {
                    use nix::sys::signal::{self, Signal};
                    use nix::unistd::Pid;

                    let pid = Pid::from_raw(pid as i32);
                    signal::kill(pid, Signal::SIGTERM)
                        .context("Failed to send SIGTERM to daemon process")?;
                }

                #[cfg(not(unix))]
                {
                    warn!("Daemon stop not implemented for this platform");
                }

                info!("Shutdown signal sent to daemon process {}", pid);
            } else {
                warn!("PID file not found, daemon may not be running");
            }
        } else {
            warn!("No PID file configured, cannot stop daemon");
        }

        Ok(())
    }

    /// Run one poll cycle and fan the events out
    pub async fn run_once(&self) -> Result<Vec<ClassifiedEvent>> {
        let summary = self.tracker.run_cycle().await?;

        if let Some(journal) = &self.journal {
            if let Err(e) = journal.record_all(&summary.events) {
                warn!("Could not journal cycle events: {:#}", e);
            }
            // Acknowledged history older than this is noise
            match journal.cleanup(90) {
                Ok(0) => {}
                Ok(removed) => debug!("Pruned {} old journal entries", removed),
                Err(e) => warn!("Journal cleanup failed: {:#}", e),
            }
        }

        deliver_all(&self.notifiers, &summary.events).await;

        Ok(summary.events)
    }

    /// Main daemon loop - runs periodic poll cycles
    async fn daemon_loop(&self, mut shutdown_receiver: broadcast::Receiver<()>) -> Result<()> {
        let interval_secs = self
            .config
            .poll_interval_secs()
            .context("Failed to parse poll interval")?;
        let poll_interval = Duration::from_secs(interval_secs);
        let mut interval_timer = interval(poll_interval);

        info!("Daemon loop started with interval: {:?}", poll_interval);

        loop {
            tokio::select! {
                _ = shutdown_receiver.recv() => {
                    info!("Shutdown signal received in daemon loop");
                    break;
                }

                _ = interval_timer.tick() => {
                    if !self.is_running.load(Ordering::SeqCst) {
                        break;
                    }

                    debug!("Starting scheduled poll cycle");
                    if let Err(e) = self.run_once().await {
                        error!("Poll cycle failed: {:?}", e);
                    }
                }
            }
        }

        info!("Daemon loop exiting");
        Ok(())
    }

    /// Wait for shutdown signals (SIGTERM, SIGINT, Ctrl+C)
    async fn wait_for_shutdown_signal() {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

            tokio::select! {
                _ = tokio::signal::ctrl_c() => debug!("Ctrl+C received"),
                _ = sigterm.recv() => debug!("SIGTERM received"),
            }
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            debug!("Ctrl+C received");
        }
    }

    /// Write PID file for daemon process management
    fn write_pid_file(&self) -> Result<()> {
        if let Some(pid_file) = &self.pid_file_path {
            let pid = std::process::id();

            if let Some(parent) = pid_file.parent() {
                fs::create_dir_all(parent).context("Failed to create PID file directory")?;
            }

            fs::write(pid_file, pid.to_string()).context("Failed to write PID file")?;

            info!("PID file written: {} (PID: {})", pid_file.display(), pid);
        }

        Ok(())
    }

    /// Remove PID file and perform cleanup
    fn cleanup(&self) -> Result<()> {
        if let Some(pid_file) = &self.pid_file_path {
            if pid_file.exists() {
                fs::remove_file(pid_file).context("Failed to remove PID file")?;
                info!("PID file removed: {}", pid_file.display());
            }
        }

        self.is_running.store(false, Ordering::SeqCst);
        info!("Daemon cleanup completed");
        Ok(())
    }
}

/// Check if daemon is currently running by checking PID file
pub fn is_daemon_running(config: &Config) -> Result<bool> {
    if !config.daemon.pid_file.is_empty() {
        let pid_file = PathBuf::from(&config.daemon.pid_file);

        if pid_file.exists() {
            let pid_str = fs::read_to_string(&pid_file).context("Failed to read PID file")?;

            let pid: u32 = pid_str.trim().parse().context("Invalid PID in PID file")?;

            #[cfg(unix)]
            {
                use nix::errno::Errno;
                use nix::sys::signal;
                use nix::unistd::Pid;

                let pid = Pid::from_raw(pid as i32);
                match signal::kill(pid, None) {
                    Ok(_) => return Ok(true),
                    Err(Errno::ESRCH) => {
                        // Stale PID file
                        let _ = fs::remove_file(&pid_file);
                        return Ok(false);
                    }
                    Err(_) => return Ok(true),
                }
            }

            #[cfg(not(unix))]
            {
                return Ok(true);
            }
        }
    }

    Ok(false)
}
