//! `stylize` - re-render every tile of a layer through a backend.

use super::{open_ledger, parse_color};
use crate::error::CliError;
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use tilestitch::layer::LayerDir;
use tilestitch::regen::{FillRegenerator, GenParams, IdentityRegenerator, Regenerator};
use tilestitch::stylize::{stylize_layer, write_report, StylizeConfig};
use tokio_util::sync::CancellationToken;

use super::repair::BackendArg;

#[derive(Debug, Args)]
pub struct StylizeArgs {
    /// Input tile layer directory
    #[arg(long)]
    pub layer: PathBuf,

    /// Output layer directory (created; input is never modified)
    #[arg(long)]
    pub output: PathBuf,

    /// Offline regeneration backend
    #[arg(long, value_enum, default_value = "identity")]
    pub backend: BackendArg,

    /// Fill color for the fill backend, as #RRGGBB
    #[arg(long, default_value = "#808080")]
    pub fill_color: String,

    /// Concurrent backend calls
    #[arg(long, default_value = "2")]
    pub concurrency: usize,

    /// Denoise strength
    #[arg(long, default_value = "0.35")]
    pub strength: f64,

    /// Inference steps
    #[arg(long, default_value = "16")]
    pub steps: u32,

    /// Seed base; the tile index is added per tile
    #[arg(long, default_value = "0")]
    pub seed: u64,

    /// Report JSON path (defaults to <output>/stylize.json)
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Register the report in this run ledger
    #[arg(long)]
    pub ledger: Option<PathBuf>,
}

pub fn run(args: &StylizeArgs) -> Result<(), CliError> {
    let input = LayerDir::open(&args.layer)?;
    let ledger = open_ledger(&args.ledger)?;

    let params = GenParams::default()
        .with_strength(args.strength)
        .with_steps(args.steps);
    let config = StylizeConfig::default()
        .with_concurrency(args.concurrency)
        .with_params(params)
        .with_seed_base(args.seed);

    let backend: Arc<dyn Regenerator> = match args.backend {
        BackendArg::Identity => Arc::new(IdentityRegenerator),
        BackendArg::Fill => Arc::new(FillRegenerator::new(parse_color(&args.fill_color)?)),
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::InvalidArgument(format!("failed to start runtime: {e}")))?;

    let (_out_layer, report) = runtime.block_on(stylize_layer(
        &input,
        &args.output,
        backend,
        &config,
        CancellationToken::new(),
    ))?;

    let report_path = args
        .report
        .clone()
        .unwrap_or_else(|| args.output.join("stylize.json"));
    write_report(&report, &report_path, ledger.as_ref())?;

    println!(
        "Stylized {} of {} tile(s); {} failed",
        report.tiles_processed,
        report.tiles_total,
        report.failed.len()
    );
    Ok(())
}
