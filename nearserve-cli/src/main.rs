//! Nearserve CLI - dispatch gateway and utilities.
//!
//! This binary provides a command-line interface to the nearserve library:
//! the `serve` command runs the TCP dispatch gateway, `distance` is a
//! one-shot great-circle calculation.

use clap::{Parser, Subcommand};
use std::process;

mod commands;
mod protocol;

use commands::distance::DistanceArgs;
use commands::serve::ServeArgs;

#[derive(Parser)]
#[command(name = "nearserve")]
#[command(version = nearserve::VERSION)]
#[command(about = "Real-time proximity dispatch for home services", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run the dispatch gateway.
    Serve(ServeArgs),
    /// Compute the great-circle distance between two points.
    Distance(DistanceArgs),
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        CliCommand::Serve(args) => {
            let _guard = match nearserve::logging::init_logging(
                nearserve::logging::default_log_dir(),
                nearserve::logging::default_log_file(),
            ) {
                Ok(guard) => guard,
                Err(error) => {
                    eprintln!("failed to initialize logging: {error}");
                    process::exit(1);
                }
            };

            let runtime = match tokio::runtime::Runtime::new() {
                Ok(runtime) => runtime,
                Err(error) => {
                    eprintln!("failed to start runtime: {error}");
                    process::exit(1);
                }
            };
            runtime.block_on(commands::serve::run(args))
        }
        CliCommand::Distance(args) => commands::distance::run(args),
    };

    if let Err(error) = result {
        eprintln!("error: {error}");
        process::exit(1);
    }
}
