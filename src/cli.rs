//! CLI argument parsing using clap v4
//!
//! Defines the command-line interface for collbench. Size, data type and
//! packet strings are kept as text here and parsed by the harness so that
//! bad values surface as configuration errors with their own exit code.

use clap::{Args, Parser, Subcommand};

/// collbench - correctness and latency harness for collective operations
///
/// Forms a rank group, verifies an all-reduce or all-gather execution plan
/// against locally computed results, then times it with captured graph
/// replay.
#[derive(Parser, Debug)]
#[command(name = "collbench")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Verify and time an execution plan
    Run(RunArgs),

    /// Show the network endpoint this host would publish
    Endpoint {
        /// Path to configuration file
        #[arg(short, long, env = "COLLBENCH_CONFIG")]
        config: Option<String>,

        /// Only consider this interface
        #[arg(short, long)]
        interface: Option<String>,
    },

    /// Display version and build information
    Version,

    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

/// Arguments of `collbench run`
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file
    #[arg(short, long, env = "COLLBENCH_CONFIG")]
    pub config: Option<String>,

    /// Execution plan name; names containing "allgather" select all-gather
    #[arg(short = 'n', long = "execution_plan_name")]
    pub execution_plan_name: String,

    /// Path of the execution plan file
    #[arg(short = 'p', long = "execution_plan_path")]
    pub execution_plan_path: String,

    /// Per-rank message size in bytes (suffixes K, M, G)
    #[arg(long)]
    pub size: String,

    /// Largest size of a sweep starting at --size
    #[arg(long = "max_size")]
    pub max_size: Option<String>,

    /// Multiplier between consecutive sweep sizes
    #[arg(long = "step_factor")]
    pub step_factor: Option<u64>,

    /// Run the collective in place
    #[arg(long = "in_place")]
    pub in_place: bool,

    /// Element type: float16, float32 or int32
    #[arg(long, default_value = "float16")]
    pub dtype: String,

    /// Packet framing: LL8 or LL16
    #[arg(long = "packet_type", default_value = "LL16")]
    pub packet_type: String,

    /// Seed for input generation, identical on every rank
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Number of ranks to run
    #[arg(long = "world_size")]
    pub world_size: Option<usize>,

    /// Collective calls captured per graph
    #[arg(long)]
    pub iterations: Option<u32>,

    /// Timed launches of the captured graph
    #[arg(long)]
    pub replays: Option<u32>,

    /// Cross-rank latency aggregation: rank0, avg, min or max
    #[arg(long)]
    pub aggregation: Option<String>,

    /// Write a JSON report to this file
    #[arg(short, long)]
    pub output: Option<String>,
}

/// Configuration subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Display the current configuration
    Show {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Initialize a new configuration file
    Init {
        /// Path where to create the config file
        #[arg(short, long)]
        path: Option<String>,

        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: Option<String>,
    },
}
