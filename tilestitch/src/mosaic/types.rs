//! Mosaic compositor type definitions

use crate::layer::LayerError;
use crate::ledger::LedgerError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while compositing a mosaic.
#[derive(Debug, Error)]
pub enum MosaicError {
    /// An expected tile is absent and strict mode is on.
    #[error("missing tile ({x}, {y})")]
    MissingTile { x: u32, y: u32 },

    /// Tiles in the layer disagree on pixel dimensions.
    #[error("tile ({x}, {y}) is {got_w}x{got_h}, expected {want_w}x{want_h}")]
    TileSizeMismatch {
        x: u32,
        y: u32,
        got_w: u32,
        got_h: u32,
        want_w: u32,
        want_h: u32,
    },

    /// Tile images are smaller than twice the overlap margin.
    #[error("crop margin {margin}px leaves no core in a {size}px tile")]
    MarginTooLarge { margin: u32, size: u32 },

    /// Underlying layer failure.
    #[error(transparent)]
    Layer(#[from] LayerError),

    /// Ledger registration failure.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Output image encode failure.
    #[error("failed to write mosaic to {path}: {message}")]
    Encode { path: PathBuf, message: String },
}

/// How overlapping tile pixels are composited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MosaicMode {
    /// Paste each tile's core sub-rectangle edge to edge. Lossless and
    /// byte-stable across runs.
    Crop,
    /// Weighted average across the overlap band with a linear feather
    /// ramp per axis.
    Blend,
}

/// Compositing options.
#[derive(Debug, Clone, Copy)]
pub struct MosaicOptions {
    /// Compositing mode
    pub mode: MosaicMode,
    /// Feather ramp width in pixels (blend mode; clamped to the margin)
    pub feather: u32,
    /// Canvas color under missing tiles
    pub background: [u8; 3],
    /// Treat a missing tile as fatal instead of counting it
    pub strict: bool,
}

impl Default for MosaicOptions {
    fn default() -> Self {
        Self {
            mode: MosaicMode::Crop,
            feather: 16,
            background: [0, 0, 0],
            strict: false,
        }
    }
}

impl MosaicOptions {
    pub fn new(mode: MosaicMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Sets the feather ramp width in pixels.
    pub fn with_feather(mut self, feather: u32) -> Self {
        self.feather = feather;
        self
    }

    /// Sets the background color.
    pub fn with_background(mut self, rgb: [u8; 3]) -> Self {
        self.background = rgb;
        self
    }

    /// Makes a missing tile fatal.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }
}

/// Summary of one composite, serialized alongside the output image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MosaicReport {
    /// Grid size N
    pub grid: u32,
    /// Overlap fraction the tiles were rendered with
    pub overlap: f64,
    /// Tile image size `[w, h]` in pixels
    pub tile_size: [u32; 2],
    /// Per-side crop margin `[mx, my]` in pixels
    pub crop_margin_px: [u32; 2],
    /// Core (cropped) tile size `[w, h]` in pixels
    pub cropped_size: [u32; 2],
    /// Output mosaic size `[w, h]` in pixels
    pub mosaic_size: [u32; 2],
    /// Tiles absent from the layer, as `[x, y]` pairs
    pub missing: Vec<[u32; 2]>,
    /// Compositing mode used
    pub mode: MosaicMode,
    /// Feather width actually applied (0 in crop mode)
    pub feather: u32,
}
