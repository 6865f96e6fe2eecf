use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure for branchwatch
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Path to the local git repository branchwatch operates on.
    /// Its configured remotes seed the monitored set, and its object
    /// database is where fetched commits land.
    pub local_repository: String,

    /// Polling behavior
    #[serde(default)]
    pub poll: PollConfig,

    /// Additional fork repositories to monitor
    #[serde(default)]
    pub forks: Vec<ForkConfig>,

    /// Repositories excluded from monitoring. Entries are matched against
    /// repository URLs, first literally and then as a regular expression.
    #[serde(default)]
    pub snoozed: Vec<String>,

    /// Notification settings
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Daemon configuration
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Polling configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PollConfig {
    /// Interval between poll cycles ("60s", "5m", "1h")
    #[serde(default = "default_interval")]
    pub interval: String,

    /// Maximum repositories probed in parallel
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Also track tag refs, not just branch heads
    #[serde(default)]
    pub include_tags: bool,

    /// Ref namespace tracking refs are created under
    #[serde(default = "default_namespace")]
    pub bookmark_namespace: String,
}

/// A fork repository to monitor alongside the known remotes
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ForkConfig {
    pub url: String,
    pub name: String,
}

/// Notification configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NotificationConfig {
    /// Print events to the console
    #[serde(default = "default_true")]
    pub console: bool,

    /// Console stream: "stdout" or "stderr"
    #[serde(default = "default_stream")]
    pub stream: String,
}

/// Daemon configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DaemonConfig {
    /// PID file location
    #[serde(default = "default_pid_file")]
    pub pid_file: String,

    /// Log file location
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_interval() -> String {
    "60s".to_string()
}
fn default_max_parallel() -> usize {
    4
}
fn default_namespace() -> String {
    "refs/branchwatch".to_string()
}
fn default_true() -> bool {
    true
}
fn default_stream() -> String {
    "stdout".to_string()
}
fn default_pid_file() -> String {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        format!("{}/branchwatch.pid", runtime_dir)
    } else {
        "/tmp/branchwatch.pid".to_string()
    }
}
fn default_log_file() -> String {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        format!("{}/branchwatch/daemon.log", data_home)
    } else if let Ok(home) = std::env::var("HOME") {
        format!("{}/.local/share/branchwatch/daemon.log", home)
    } else {
        "/tmp/branchwatch-daemon.log".to_string()
    }
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            max_parallel: default_max_parallel(),
            include_tags: false,
            bookmark_namespace: default_namespace(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            console: default_true(),
            stream: default_stream(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            pid_file: default_pid_file(),
            log_file: default_log_file(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from the default location or create a default config
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            let config = Self::default();

            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
            }

            config.save(&config_path)?;

            tracing::info!("Created default configuration at: {:?}", config_path);
            Ok(config)
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.expand_paths()?;
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("branchwatch").join("config.yml"))
    }

    /// Expand environment variables in configuration paths
    pub fn expand_paths(&mut self) -> Result<()> {
        self.local_repository = shellexpand::full(&self.local_repository)
            .context("Failed to expand local_repository path")?
            .into_owned();

        self.daemon.pid_file = shellexpand::full(&self.daemon.pid_file)
            .context("Failed to expand pid_file path")?
            .into_owned();

        self.daemon.log_file = shellexpand::full(&self.daemon.log_file)
            .context("Failed to expand log_file path")?
            .into_owned();

        Ok(())
    }

    /// Reject settings the rest of the system cannot work with.
    /// Malformed required settings are fatal at startup.
    pub fn validate(&self) -> Result<()> {
        if self.local_repository.trim().is_empty() {
            anyhow::bail!("local_repository must be set");
        }

        if self.poll.max_parallel == 0 {
            anyhow::bail!("poll.max_parallel must be at least 1");
        }

        if !self.poll.bookmark_namespace.starts_with("refs/") {
            anyhow::bail!(
                "poll.bookmark_namespace must live under refs/ (got '{}')",
                self.poll.bookmark_namespace
            );
        }

        for fork in &self.forks {
            if fork.url.trim().is_empty() || fork.name.trim().is_empty() {
                anyhow::bail!("fork entries require both url and name");
            }
        }

        parse_interval(&self.poll.interval)
            .with_context(|| format!("Invalid poll.interval '{}'", self.poll.interval))?;

        Ok(())
    }

    /// Poll interval in seconds
    pub fn poll_interval_secs(&self) -> Result<u64> {
        parse_interval(&self.poll.interval)
    }
}

/// Parse duration strings like "30s", "5m", "1h", "2d" into seconds.
pub fn parse_interval(interval: &str) -> Result<u64> {
    let interval = interval.trim().to_lowercase();

    if let Some(value) = interval.strip_suffix('s') {
        value.parse::<u64>().context("Invalid seconds value")
    } else if let Some(value) = interval.strip_suffix('m') {
        value
            .parse::<u64>()
            .ok()
            .and_then(|v| v.checked_mul(60))
            .context("Invalid minutes value")
    } else if let Some(value) = interval.strip_suffix('h') {
        value
            .parse::<u64>()
            .ok()
            .and_then(|v| v.checked_mul(3600))
            .context("Invalid hours value")
    } else if let Some(value) = interval.strip_suffix('d') {
        value
            .parse::<u64>()
            .ok()
            .and_then(|v| v.checked_mul(86400))
            .context("Invalid days value")
    } else {
        interval
            .parse::<u64>()
            .context("Invalid interval format. Use format like '30s', '5m', '1h'")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            local_repository: "${HOME}/dev/monitor.git".to_string(),
            poll: PollConfig::default(),
            forks: Vec::new(),
            snoozed: Vec::new(),
            notifications: NotificationConfig::default(),
            daemon: DaemonConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tempfile::TempDir;

    fn setup_test_config_dir() -> (TempDir, PathBuf) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_dir = temp_dir.path().join("branchwatch");
        std::fs::create_dir_all(&config_dir).expect("Failed to create config dir");
        (temp_dir, config_dir)
    }

    #[test]
    fn test_config_default_values() {
        let config = Config::default();

        assert_eq!(config.poll.interval, "60s");
        assert_eq!(config.poll.max_parallel, 4);
        assert!(!config.poll.include_tags);
        assert_eq!(config.poll.bookmark_namespace, "refs/branchwatch");
        assert!(config.forks.is_empty());
        assert!(config.snoozed.is_empty());
        assert!(config.notifications.console);
    }

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval("30s").unwrap(), 30);
        assert_eq!(parse_interval("5m").unwrap(), 300);
        assert_eq!(parse_interval("1h").unwrap(), 3600);
        assert_eq!(parse_interval("2d").unwrap(), 172800);
        assert_eq!(parse_interval("90").unwrap(), 90);
        assert!(parse_interval("soon").is_err());
    }

    #[test]
    fn test_parse_interval_rejects_overflowing_values() {
        // Parseable digits whose unit multiplication would wrap u64
        assert!(parse_interval("300000000000000000h").is_err());
        assert!(parse_interval("18446744073709551615m").is_err());
        assert!(parse_interval("18446744073709551615d").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let mut config = Config::default();
        config.poll.max_parallel = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.poll.bookmark_namespace = "bookmarks".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.local_repository = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.forks.push(ForkConfig {
            url: "https://github.com/fan/project".to_string(),
            name: "".to_string(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_expand_paths() {
        env::set_var("TEST_BRANCHWATCH_HOME", "/test/home");

        let mut config = Config::default();
        config.local_repository = "${TEST_BRANCHWATCH_HOME}/monitor.git".to_string();

        config.expand_paths().expect("Failed to expand paths");

        assert_eq!(config.local_repository, "/test/home/monitor.git");

        env::remove_var("TEST_BRANCHWATCH_HOME");
    }

    #[test]
    fn test_config_load_nonexistent_file() {
        let nonexistent_path = Path::new("/nonexistent/path/config.yml");
        let result = Config::load(nonexistent_path);
        assert!(result.is_err());
    }

    #[test]
    fn test_config_save_and_load() {
        let (_temp_dir, config_dir) = setup_test_config_dir();
        let config_path = config_dir.join("config.yml");

        let mut config = Config::default();
        config.local_repository = "/srv/monitor.git".to_string();
        config.poll.interval = "5m".to_string();
        config.poll.include_tags = true;
        config.forks.push(ForkConfig {
            url: "https://github.com/fan/project".to_string(),
            name: "fan".to_string(),
        });
        config.snoozed.push("https://github.com/noisy/repo".to_string());

        config.save(&config_path).expect("Failed to save config");

        let loaded = Config::load(&config_path).expect("Failed to load config");

        assert_eq!(loaded.local_repository, "/srv/monitor.git");
        assert_eq!(loaded.poll.interval, "5m");
        assert!(loaded.poll.include_tags);
        assert_eq!(loaded.forks.len(), 1);
        assert_eq!(loaded.forks[0].name, "fan");
        assert_eq!(loaded.snoozed.len(), 1);
    }

    #[test]
    fn test_config_default_path_xdg() {
        let default_path = Config::default_config_path().expect("Failed to get default path");
        assert!(default_path.to_string_lossy().contains("branchwatch"));
        assert!(default_path.to_string_lossy().ends_with("config.yml"));
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml_content = r#"
local_repository: "/srv/monitor.git"
poll:
  interval: "2m"
  max_parallel: 8
  include_tags: true
forks:
  - url: "https://github.com/fan/project"
    name: "fan"
snoozed:
  - "https://github.com/noisy/.*"
notifications:
  console: true
  stream: "stderr"
logging:
  level: "debug"
"#;

        let config: Config = serde_yaml::from_str(yaml_content).expect("Failed to parse YAML");

        assert_eq!(config.local_repository, "/srv/monitor.git");
        assert_eq!(config.poll.interval, "2m");
        assert_eq!(config.poll.max_parallel, 8);
        assert!(config.poll.include_tags);
        assert_eq!(config.forks[0].url, "https://github.com/fan/project");
        assert_eq!(config.snoozed[0], "https://github.com/noisy/.*");
        assert_eq!(config.notifications.stream, "stderr");
        assert_eq!(config.logging.level, "debug");
    }
}
