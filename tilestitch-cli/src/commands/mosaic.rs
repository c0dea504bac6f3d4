//! `mosaic` - flatten a tile layer into a single image.

use super::{open_ledger, parse_color};
use crate::error::CliError;
use clap::{Args, ValueEnum};
use std::path::PathBuf;
use tilestitch::layer::LayerDir;
use tilestitch::mosaic::{compose_and_register, MosaicMode, MosaicOptions};

#[derive(Debug, Clone, ValueEnum)]
pub enum ModeArg {
    /// Paste each tile's core sub-rectangle edge to edge (lossless)
    Crop,
    /// Feather-blend across the overlap band
    Blend,
}

#[derive(Debug, Args)]
pub struct MosaicArgs {
    /// Input tile layer directory (expects 0/<x>/<y>.png + layer.json)
    #[arg(long)]
    pub layer: PathBuf,

    /// Output mosaic PNG path
    #[arg(long)]
    pub output: PathBuf,

    /// Compositing mode
    #[arg(long, value_enum, default_value = "crop")]
    pub mode: ModeArg,

    /// Feather ramp width in pixels (blend mode)
    #[arg(long, default_value = "16")]
    pub feather: u32,

    /// Canvas color under missing tiles, as #RRGGBB
    #[arg(long, default_value = "#000000")]
    pub bg: String,

    /// Fail on the first missing tile instead of counting it
    #[arg(long)]
    pub strict: bool,

    /// Report JSON path (defaults to the output path with .json)
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Register the outputs in this run ledger
    #[arg(long)]
    pub ledger: Option<PathBuf>,
}

pub fn run(args: &MosaicArgs) -> Result<(), CliError> {
    let layer = LayerDir::open(&args.layer)?;
    let ledger = open_ledger(&args.ledger)?;

    let mode = match args.mode {
        ModeArg::Crop => MosaicMode::Crop,
        ModeArg::Blend => MosaicMode::Blend,
    };
    let opts = MosaicOptions::new(mode)
        .with_feather(args.feather)
        .with_background(parse_color(&args.bg)?)
        .with_strict(args.strict);

    let report_path = args
        .report
        .clone()
        .unwrap_or_else(|| args.output.with_extension("json"));

    let report = compose_and_register(&layer, &opts, &args.output, &report_path, ledger.as_ref())?;

    println!(
        "Wrote {} ({}x{}, {} missing tile(s))",
        args.output.display(),
        report.mosaic_size[0],
        report.mosaic_size[1],
        report.missing.len()
    );
    Ok(())
}
