//! Tilestitch - overlapping tile grids, seamless mosaics and seam repair.
//!
//! This library is the core of a raster map-generation pipeline: it splits a
//! geographic area of interest (AOI) into an overlapping grid of tiles, keeps
//! a content-addressed ledger of every artifact a run produces, reassembles
//! per-tile imagery into a single mosaic, and repairs the visible boundaries
//! between tiles by driving an external pixel-regeneration collaborator.
//!
//! # High-Level Flow
//!
//! ```ignore
//! use tilestitch::coord::GeoBbox;
//! use tilestitch::grid::partition;
//! use tilestitch::layer::LayerDir;
//! use tilestitch::mosaic::{composite, MosaicOptions};
//!
//! let aoi = GeoBbox::new(69.103, 41.168, 69.397, 41.434)?;
//! let grid = partition(&aoi, 3, 0.1)?;
//!
//! // External stages render one PNG per tile into a layer directory,
//! // then the compositor stitches them back together.
//! let layer = LayerDir::open("runs/demo/layers/stylized")?;
//! let (image, report) = composite(&layer, &MosaicOptions::default())?;
//! ```
//!
//! The external render/stylize/inpaint models are not part of this crate;
//! they are reached through the [`regen::Regenerator`] trait boundary.

pub mod coord;
pub mod grid;
pub mod layer;
pub mod ledger;
pub mod logging;
pub mod mosaic;
pub mod regen;
pub mod seam;
pub mod stylize;

/// Version of the tilestitch library and CLI.
///
/// This is synchronized across all components in the workspace.
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
