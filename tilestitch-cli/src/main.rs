//! tilestitch CLI - AOI tile pipeline from the command line.
//!
//! Exposes the pipeline stages as subcommands: partition an AOI into an
//! overlapping grid, stylize or repair a tile layer through a regeneration
//! backend, flatten a layer into a mosaic, and inspect the run ledger.

mod commands;
mod error;

use clap::{Parser, Subcommand};
use commands::{ledger, mosaic, partition, repair, stylize};
use error::CliError;
use tilestitch::logging::{default_log_dir, default_log_file, init_logging};

#[derive(Parser)]
#[command(name = "tilestitch")]
#[command(version = tilestitch::VERSION)]
#[command(about = "Partition, regenerate and composite AOI tile grids", long_about = None)]
struct Cli {
    /// Log directory
    #[arg(long, global = true, default_value = default_log_dir())]
    log_dir: String,

    /// Log file name
    #[arg(long, global = true, default_value = default_log_file())]
    log_file: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Split an AOI bounding box into an overlapping tile grid
    Partition(partition::PartitionArgs),
    /// Flatten a tile layer into a single mosaic image
    Mosaic(mosaic::MosaicArgs),
    /// Regenerate the seams between adjacent tiles of a layer
    Repair(repair::RepairArgs),
    /// Re-render every tile of a layer through a regeneration backend
    Stylize(stylize::StylizeArgs),
    /// Inspect and verify a run's artifact ledger
    Ledger(ledger::LedgerArgs),
}

fn main() {
    let cli = Cli::parse();

    let _guard = match init_logging(&cli.log_dir, &cli.log_file) {
        Ok(guard) => guard,
        Err(e) => CliError::LoggingInit(e.to_string()).exit(),
    };

    let result = match &cli.command {
        Command::Partition(args) => partition::run(args),
        Command::Mosaic(args) => mosaic::run(args),
        Command::Repair(args) => repair::run(args),
        Command::Stylize(args) => stylize::run(args),
        Command::Ledger(args) => ledger::run(args),
    };

    if let Err(e) = result {
        e.exit();
    }
}
