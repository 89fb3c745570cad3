// ABOUTME: Main application orchestration for the conductor CLI
// ABOUTME: Coordinates between CLI arguments, configuration, logging setup and command execution

use anyhow::Result;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use super::commands;
use super::{Args, Commands, Config};

pub struct App {
    config: Config,
}

impl App {
    /// Create a new application instance
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Initialize logging based on configuration
    ///
    /// Logs always go to stderr; a worker's stdout carries only its outcome.
    pub fn init_logging(&self, verbose: bool, no_color: bool) -> Result<()> {
        let log_level = if verbose {
            "debug"
        } else {
            &self.config.logging.level
        };

        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

        let builder = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_ansi(!no_color)
            .with_target(false);

        let installed = match self.config.logging.format.as_str() {
            "compact" => builder.compact().try_init(),
            _ => builder.try_init(),
        };
        if let Err(e) = installed {
            return Err(anyhow::anyhow!("Failed to initialize logging: {}", e));
        }

        debug!("Logging initialized with level: {}", log_level);
        Ok(())
    }

    /// Run the application with parsed arguments
    pub async fn run(&self, args: Args) -> Result<()> {
        let worker = matches!(args.command, Commands::Worker);
        self.init_logging(args.verbose, args.no_color || worker)?;

        if !worker {
            debug!("Starting conductor v{}", env!("CARGO_PKG_VERSION"));
        }

        match args.command {
            Commands::Worker => commands::worker().await,
            Commands::InitDb { db, topology } => commands::init_db(db, topology).await,
            Commands::ExecuteOperation(options) => {
                commands::execute_operation(options, &self.config).await
            }
            Commands::Operations => commands::list_operations(),
        }
    }

    /// Parse arguments, load configuration and run
    pub async fn main() -> Result<()> {
        let args = Args::parse_args();
        let config = Config::load(args.config.clone())?;
        Self::new(config).run(args).await
    }
}
