//! collbench - correctness and latency harness for collective operations
//!
//! This is the main entry point for the collbench binary.
//! Ranks agree on a rendezvous address, verify an execution plan against
//! locally computed results, then time it with captured graph replay.

mod bench;
mod cli;
mod cluster;
mod collective;
mod config;
mod device;
mod error;
mod launch;
mod logging;
mod net;
mod types;
mod version;

use clap::Parser;
use tracing::info;

use crate::bench::RunReport;
use crate::cli::{Cli, Commands, RunArgs};
use crate::config::BenchConfig;
use crate::error::Result;
use crate::launch::Launcher;
use crate::logging::LogGuards;
use crate::net::SystemInterfaces;

fn main() {
    // Parse CLI arguments first (before logging, so we know verbosity)
    let cli = Cli::parse();

    if let Err(e) = dispatch(cli) {
        eprint!("{}", e.format_for_terminal());
        std::process::exit(e.exit_code());
    }
}

fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Version => {
            version::print_version();
            Ok(())
        }
        Commands::Config { subcommand } => {
            // Config commands use minimal logging
            logging::init_simple(tracing::Level::WARN)?;
            handle_config_command(subcommand)
        }
        Commands::Endpoint { config, interface } => {
            logging::init_simple(if cli.verbose > 0 {
                tracing::Level::DEBUG
            } else {
                tracing::Level::WARN
            })?;
            let config = BenchConfig::load(config.as_deref())?;
            let endpoint = launch::resolve_endpoint(&config, interface, &SystemInterfaces)?;
            println!("{}", endpoint);
            Ok(())
        }
        Commands::Run(args) => {
            let mut config = BenchConfig::load(args.config.as_deref())?;
            launch::apply_run_overrides(&mut config, &args)?;

            // The guards must be kept alive for the lifetime of the run
            let _log_guards = init_logging_from_config(&config, cli.verbose, cli.quiet)?;
            run_benchmark(config, &args)
        }
    }
}

fn init_logging_from_config(config: &BenchConfig, verbose: u8, quiet: bool) -> Result<LogGuards> {
    logging::init_logging(&config.logging, verbose, quiet)
}

/// Run every case of the sweep and report rank 0's results
fn run_benchmark(config: BenchConfig, args: &RunArgs) -> Result<()> {
    let build = version::build_info();
    info!(
        version = %build.full_version(),
        profile = %build.profile,
        "Starting collbench"
    );
    if !build.is_optimized() {
        tracing::warn!("Debug build; latencies are not representative");
    }

    let world_size = config.cluster.world_size;
    let cases = launch::build_cases(args, config.benchmark.step_factor, world_size)?;
    let launcher = Launcher::new(config, args.seed, cases);
    let reports = launcher.run()?;

    launch::print_table(&reports);

    if let Some(path) = launcher.report_path() {
        RunReport::new(world_size, "loopback", reports).save(&path)?;
        println!("\nReport written to {}", path.display());
    }

    Ok(())
}

fn handle_config_command(subcommand: cli::ConfigSubcommand) -> Result<()> {
    use cli::ConfigSubcommand;

    match subcommand {
        ConfigSubcommand::Show { config } => {
            let cfg = BenchConfig::load(config.as_deref())?;
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
        ConfigSubcommand::Init { path, force } => {
            let path = config::init_config(path.as_deref(), force)?;
            println!("Configuration written to {}", path.display());
        }
        ConfigSubcommand::Validate { config } => {
            BenchConfig::load(config.as_deref())?;
            println!("Configuration is valid.");
        }
    }

    Ok(())
}
