// ABOUTME: Command line argument definitions and parsing using Clap
// ABOUTME: Defines the main CLI structure and subcommands for conductor

use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;

use crate::model::Properties;
use crate::workflows::MaxAttempts;

#[derive(Parser)]
#[command(name = "conductor")]
#[command(about = "Runs dependency-ordered operation task graphs against a deployment")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Path to configuration file")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Disable colored output")]
    pub no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one operation attempt described by a JSON request on stdin
    Worker,

    /// Create a model database, optionally loading a deployment topology into it
    InitDb {
        #[arg(long, help = "Path to the SQLite model database")]
        db: PathBuf,

        #[arg(long, help = "YAML file with a deployment and its topology")]
        topology: Option<PathBuf>,
    },

    /// Run an operation on the node instances of a deployment
    ExecuteOperation(ExecuteOperationArgs),

    /// List the operation mappings this binary can run
    Operations,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ExecuteOperationArgs {
    #[arg(long, help = "Path to the SQLite model database")]
    pub db: PathBuf,

    #[arg(long, help = "Deployment id or name")]
    pub deployment: String,

    #[arg(long, help = "Operation name as declared on the node templates")]
    pub operation: String,

    #[arg(long = "node-id", help = "Only instances of these nodes")]
    pub node_ids: Vec<String>,

    #[arg(long = "node-instance-id", help = "Only these node instances (id or name)")]
    pub node_instance_ids: Vec<String>,

    #[arg(long = "type-name", help = "Only instances whose node derives from these types")]
    pub type_names: Vec<String>,

    #[arg(long, help = "Run instances after the instances they depend on")]
    pub dependency_order: bool,

    #[arg(short = 'I', long = "input", help = "Operation input (key=value, value may be JSON)")]
    pub inputs: Vec<String>,

    #[arg(long, help = "Forward allow_kwargs_override to the operation")]
    pub allow_kwargs_override: Option<bool>,

    #[arg(
        long,
        allow_hyphen_values = true,
        help = "Attempts per task: a positive count, -1 or 'infinite' (overrides config)"
    )]
    pub max_attempts: Option<MaxAttempts>,

    #[arg(long, value_parser = humantime::parse_duration, help = "Delay between attempts, e.g. 5s")]
    pub retry_interval: Option<std::time::Duration>,

    #[arg(long, help = "Keep going when a task exhausts its attempts")]
    pub ignore_failure: bool,

    #[arg(long, help = "Directory for resource storage")]
    pub resources: Option<PathBuf>,

    #[arg(long, help = "Run operations inside this process instead of worker processes")]
    pub in_process: bool,

    #[arg(long, help = "Maximum number of concurrent operation attempts")]
    pub max_concurrent: Option<usize>,

    #[arg(short, long, help = "Write the execution report as JSON to this file")]
    pub output: Option<PathBuf>,
}

impl Args {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Parse operation inputs from key=value format
    ///
    /// Values that parse as JSON keep their JSON type; anything else is a string.
    pub fn parse_inputs(inputs: &[String]) -> anyhow::Result<Properties> {
        let mut parsed = Properties::new();

        for input in inputs {
            let Some((key, value)) = input.split_once('=') else {
                return Err(anyhow::anyhow!(
                    "Invalid input format '{}'. Expected 'key=value'",
                    input
                ));
            };
            let value = serde_json::from_str(value)
                .unwrap_or_else(|_| Value::String(value.to_string()));
            parsed.insert(key.to_string(), value);
        }

        Ok(parsed)
    }
}
