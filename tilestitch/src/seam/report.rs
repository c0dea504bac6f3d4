//! Repair run reporting types.

use super::geometry::{IntersectionId, SeamId};
use super::score::SeamMetrics;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Why a seam or intersection was skipped rather than repaired.
///
/// Skips are expected operating conditions, never failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// One of the unit's tiles is absent from the layer
    MissingTiles,
    /// The core region collapses (margins meet or cross)
    InvalidCore,
    /// The context window is degenerate (e.g. zero overlap)
    InvalidContext,
    /// A cropped strip has no pixels
    EmptyPatch,
    /// The combined patch is too small to mask and write back
    TinyPatch,
    /// The configured seam cap was reached
    SeamCapReached,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::MissingTiles => "missing_tiles",
            SkipReason::InvalidCore => "invalid_core",
            SkipReason::InvalidContext => "invalid_context",
            SkipReason::EmptyPatch => "empty_patch",
            SkipReason::TinyPatch => "tiny_patch",
            SkipReason::SeamCapReached => "seam_cap_reached",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One seam whose regeneration failed after retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedSeam {
    pub seam: SeamId,
    pub error: String,
}

/// One repaired seam whose post-repair score crossed the suspicion
/// threshold. Advisory only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspiciousSeam {
    pub seam: SeamId,
    pub score: f64,
    /// Peak of the along-seam difference profile (per row for vertical
    /// seams, per column for horizontal), which flags a single bad
    /// scanline that the whole-strip mean would wash out
    pub profile_max: f64,
    pub metrics: SeamMetrics,
}

/// Summary of one repair run, serialized as the run report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairReport {
    /// Tiles copied from the input layer into the output layer
    pub copied_files: usize,
    /// Grid size N
    pub grid: u32,
    /// Tile image size `[w, h]` in pixels
    pub tile_size: [u32; 2],
    /// Overlap fraction of the layer
    pub overlap: f64,
    /// Per-side crop margin `[mx, my]` in pixels
    pub crop_margin_px: [u32; 2],
    /// Context half-width actually used (after auto mode)
    pub seam_context: u32,
    /// Configured mask half-width
    pub mask_half: u32,
    /// Configured write-back half-width
    pub write_half: u32,

    pub seams_total: u32,
    pub seams_processed: u32,
    pub seams_vertical_processed: u32,
    pub seams_horizontal_processed: u32,
    pub seams_skipped: u32,
    /// Skip counts keyed by reason
    pub skipped_reasons: BTreeMap<String, u32>,
    /// Seams whose regeneration failed (run continued)
    pub failed: Vec<FailedSeam>,
    /// Repaired seams flagged by the suspicion heuristic
    pub suspicious: Vec<SuspiciousSeam>,

    pub intersections_total: u32,
    pub intersections_processed: u32,
    pub intersections_skipped: u32,
    /// Intersections whose regeneration failed
    pub intersections_failed: Vec<FailedIntersection>,

    /// Denoise strength forwarded to the backend
    pub strength: f64,
    pub steps_requested: u32,
    pub steps_effective: u32,
    pub guidance: f64,
    pub seed_base: u64,
    pub duration_s: f64,
}

/// One intersection whose regeneration failed after retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedIntersection {
    pub intersection: IntersectionId,
    pub error: String,
}
