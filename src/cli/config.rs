// ABOUTME: Configuration management for the conductor binary
// ABOUTME: Handles loading and merging configuration from files and CONDUCTOR_* environment variables

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::context::TaskDefaults;
use crate::workflows::MaxAttempts;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub task_defaults: TaskDefaults,

    /// Per-attempt time limit; unset means no limit
    #[serde(default, with = "humantime_serde")]
    pub task_timeout: Option<Duration>,

    /// 0 means unbounded
    #[serde(default)]
    pub max_concurrent_tasks: usize,

    /// Program spawned for each operation attempt; defaults to this binary
    #[serde(default)]
    pub worker_program: Option<PathBuf>,

    #[serde(default)]
    pub workdir: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            task_defaults: TaskDefaults::default(),
            task_timeout: None,
            max_concurrent_tasks: 0,
            worker_program: None,
            workdir: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file path or default locations
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => Some(p),
            None => Self::find_config_file(),
        };

        let mut config = match config_path {
            Some(path) if path.exists() => {
                let contents = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                serde_yaml::from_str(&contents)
                    .with_context(|| format!("Invalid config {}", path.display()))?
            }
            _ => Config::default(),
        };

        config.merge_env()?;
        Ok(config)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let local = [
            PathBuf::from("conductor.yaml"),
            PathBuf::from("conductor.yml"),
            PathBuf::from(".conductor.yaml"),
        ];
        if let Some(path) = local.into_iter().find(|p| p.exists()) {
            return Some(path);
        }

        dirs::home_dir()
            .map(|home| home.join(".conductor").join("config.yaml"))
            .filter(|p| p.exists())
    }

    /// Merge environment variables into configuration
    fn merge_env(&mut self) -> Result<()> {
        if let Ok(level) = std::env::var("CONDUCTOR_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("CONDUCTOR_LOG_FORMAT") {
            self.logging.format = format;
        }

        if let Ok(max_tasks) = std::env::var("CONDUCTOR_MAX_CONCURRENT") {
            self.max_concurrent_tasks = max_tasks
                .parse()
                .context("CONDUCTOR_MAX_CONCURRENT must be a non-negative integer")?;
        }
        if let Ok(timeout) = std::env::var("CONDUCTOR_TASK_TIMEOUT") {
            self.task_timeout = Some(
                humantime::parse_duration(&timeout)
                    .context("CONDUCTOR_TASK_TIMEOUT must be a duration like '30s'")?,
            );
        }

        if let Ok(attempts) = std::env::var("CONDUCTOR_MAX_ATTEMPTS") {
            self.task_defaults.max_attempts =
                attempts.parse::<MaxAttempts>().map_err(|e| {
                    anyhow::anyhow!(
                        "CONDUCTOR_MAX_ATTEMPTS must be a positive integer, -1 or 'infinite': {}",
                        e
                    )
                })?;
        }
        if let Ok(interval) = std::env::var("CONDUCTOR_RETRY_INTERVAL") {
            self.task_defaults.retry_interval = humantime::parse_duration(&interval)
                .context("CONDUCTOR_RETRY_INTERVAL must be a duration like '5s'")?;
        }
        if let Ok(ignore) = std::env::var("CONDUCTOR_IGNORE_FAILURE") {
            self.task_defaults.ignore_failure = ignore
                .parse()
                .context("CONDUCTOR_IGNORE_FAILURE must be 'true' or 'false'")?;
        }

        if let Ok(program) = std::env::var("CONDUCTOR_WORKER_PROGRAM") {
            self.worker_program = Some(PathBuf::from(program));
        }
        if let Ok(workdir) = std::env::var("CONDUCTOR_WORKDIR") {
            self.workdir = Some(PathBuf::from(workdir));
        }

        Ok(())
    }
}
