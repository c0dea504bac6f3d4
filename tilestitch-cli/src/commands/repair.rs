//! `repair` - regenerate seams between adjacent tiles.
//!
//! Ships two offline backends so the full orchestration can run without
//! any generative model attached: `identity` (no-op, exercises the
//! plumbing) and `fill` (paints the regenerated bands a solid color,
//! making the write-back geometry visible).

use super::{open_ledger, parse_color};
use crate::error::CliError;
use clap::{Args, ValueEnum};
use std::path::PathBuf;
use tilestitch::regen::{FillRegenerator, GenParams, IdentityRegenerator, Regenerator};
use tilestitch::seam::{repair_layer, write_report, RepairConfig};
use tilestitch::layer::LayerDir;

#[derive(Debug, Clone, ValueEnum)]
pub enum BackendArg {
    /// Return patches unchanged
    Identity,
    /// Paint masked bands a solid color
    Fill,
}

#[derive(Debug, Args)]
pub struct RepairArgs {
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

    /// Context px on each side around a seam (0 = auto from the margins)
    #[arg(long, default_value = "0")]
    pub seam_context: u32,

    /// Inpaint mask half-width in px
    #[arg(long, default_value = "16")]
    pub mask_half: u32,

    /// Writeback half-width into each tile in px
    #[arg(long, default_value = "20")]
    pub write_half: u32,

    /// Cap on repaired seams (0 = all)
    #[arg(long, default_value = "0")]
    pub max_seams: u32,

    /// Abort once this fraction of seams has failed
    #[arg(long, default_value = "0.5")]
    pub max_failure_rate: f64,

    /// Score above which a repaired seam is flagged
    #[arg(long, default_value = "0.25")]
    pub suspicion_threshold: f64,

    /// Skip the intersection pass
    #[arg(long)]
    pub no_intersections: bool,

    /// Prompt forwarded to the backend
    #[arg(
        long,
        default_value = "isometric pixel art city, crisp pixels, clean edges, game art"
    )]
    pub prompt: String,

    /// Negative prompt forwarded to the backend
    #[arg(long, default_value = "blurry, low quality, artifacts, watermark, text, logo")]
    pub negative: String,

    /// Inpaint denoise strength
    #[arg(long, default_value = "0.2")]
    pub strength: f64,

    /// Inference steps
    #[arg(long, default_value = "16")]
    pub steps: u32,

    /// CFG guidance
    #[arg(long, default_value = "4.5")]
    pub guidance: f64,

    /// Seed base; the unit index is added per seam
    #[arg(long, default_value = "0")]
    pub seed: u64,

    /// Report JSON path (defaults to <output>/repair.json)
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Register the report in this run ledger
    #[arg(long)]
    pub ledger: Option<PathBuf>,
}

pub fn run(args: &RepairArgs) -> Result<(), CliError> {
    let input = LayerDir::open(&args.layer)?;
    let ledger = open_ledger(&args.ledger)?;

    let params = GenParams::default()
        .with_prompt(args.prompt.clone())
        .with_negative(args.negative.clone())
        .with_strength(args.strength)
        .with_steps(args.steps)
        .with_guidance(args.guidance);

    let config = RepairConfig::default()
        .with_seam_context(args.seam_context)
        .with_mask_half(args.mask_half)
        .with_write_half(args.write_half)
        .with_max_seams(args.max_seams)
        .with_max_failure_rate(args.max_failure_rate)
        .with_suspicion_threshold(args.suspicion_threshold)
        .with_intersection_pass(!args.no_intersections)
        .with_params(params)
        .with_seed_base(args.seed);

    let backend: Box<dyn Regenerator> = match args.backend {
        BackendArg::Identity => Box::new(IdentityRegenerator),
        BackendArg::Fill => Box::new(FillRegenerator::new(parse_color(&args.fill_color)?)),
    };

    let (_out_layer, report) = repair_layer(&input, &args.output, &*backend, &config, None)?;

    let report_path = args
        .report
        .clone()
        .unwrap_or_else(|| args.output.join("repair.json"));
    write_report(&report, &report_path, ledger.as_ref())?;

    println!(
        "Repaired {} of {} seam(s), {} intersection(s); {} skipped, {} failed, {} suspicious",
        report.seams_processed,
        report.seams_total,
        report.intersections_processed,
        report.seams_skipped,
        report.failed.len(),
        report.suspicious.len()
    );
    Ok(())
}
