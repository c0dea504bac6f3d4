//! Seam repair orchestrator.
//!
//! Tile layers rendered per tile show visible discontinuities along tile
//! boundaries. This stage copies the input layer, then walks every seam
//! of the grid: it crops a context strip from each neighbor, hands the
//! combined patch to an external [`Regenerator`] with a mask over the
//! seam line, and commits only a narrow inner band of the result back
//! into each tile. Vertical seams run first, then horizontal, then the
//! four-tile intersections, so intersections have final authority over
//! corner pixels.
//!
//! Skips (missing tile, degenerate geometry, seam cap) are expected and
//! only counted. Regeneration failures are tolerated per unit, seams and
//! intersections alike, until the failure rate over all units crosses
//! the configured ceiling, which aborts the run.
//! After each write-back the repaired band is scored against the
//! neighbor's untouched copy of the same ground; high scores flag the
//! seam as suspicious in the report without failing anything.

mod geometry;
mod pool;
mod report;
mod score;
mod state;

pub use geometry::{
    auto_seam_context, enumerate_intersections, enumerate_seams, IntersectionId, SeamId, SeamKind,
};
pub use pool::TileBufferPool;
pub use report::{FailedIntersection, FailedSeam, RepairReport, SkipReason, SuspiciousSeam};
pub use score::{l1_profile_per_col, l1_profile_per_row, score_pair, ScoreWeights, SeamMetrics};
pub use state::{SeamState, UnitState};

use crate::layer::{crop_margin_px, LayerDir, LayerError};
use crate::ledger::{LedgerError, LedgerStore};
use crate::regen::{GenParams, RegenRequest, Regenerator};
use geometry::{plan_horizontal, plan_intersection, plan_vertical, radial_weights, BandParams, Rect, SeamPlan};
use image::imageops::{crop_imm, replace};
use image::{GrayImage, Luma, Rgb, RgbImage};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Seam offset added to the seed base for intersection units, keeping
/// their seeds disjoint from seam seeds.
const INTERSECTION_SEED_OFFSET: u64 = 100_000;

/// Errors that abort a repair run.
#[derive(Debug, Error)]
pub enum SeamError {
    /// Configuration rejected at construction.
    #[error("invalid repair configuration: {0}")]
    InvalidConfig(String),

    /// Regeneration failures crossed the configured ceiling.
    #[error("{failed} of {total} repair units failed regeneration (ceiling {ceiling})")]
    TooManyFailures {
        failed: u32,
        total: u32,
        ceiling: f64,
    },

    /// The run was cancelled between units.
    #[error("repair cancelled")]
    Cancelled,

    /// Layer I/O failure.
    #[error(transparent)]
    Layer(#[from] LayerError),

    /// Ledger registration failure.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Repair run configuration.
#[derive(Debug, Clone)]
pub struct RepairConfig {
    /// Context half-width in px either side of the seam; 0 picks an
    /// automatic width from the margins
    pub seam_context: u32,
    /// Mask half-width in px
    pub mask_half: u32,
    /// Write-back half-width in px (effective value never exceeds the mask)
    pub write_half: u32,
    /// Cap on repaired seams; 0 means no cap
    pub max_seams: u32,
    /// Fraction of seams allowed to fail before the run aborts
    pub max_failure_rate: f64,
    /// Score above which a repaired seam is flagged
    pub suspicion_threshold: f64,
    /// Suspicion metric weights
    pub weights: ScoreWeights,
    /// Run the intersection pass after seams
    pub intersection_pass: bool,
    /// Intersection patch half-size in px
    pub intersection_half: u32,
    /// Extra denoise strength for intersections
    pub intersection_boost: f64,
    /// Intersection steps; 0 means `max(steps, 14)`
    pub intersection_steps: u32,
    /// Generation parameters forwarded to the backend
    pub params: GenParams,
    /// Seed base; unit index is added per call
    pub seed_base: u64,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            seam_context: 0,
            mask_half: 16,
            write_half: 20,
            max_seams: 0,
            max_failure_rate: 0.5,
            suspicion_threshold: 0.25,
            weights: ScoreWeights::default(),
            intersection_pass: true,
            intersection_half: 120,
            intersection_boost: 0.08,
            intersection_steps: 0,
            params: GenParams::default(),
            seed_base: 0,
        }
    }
}

impl RepairConfig {
    pub fn with_seam_context(mut self, px: u32) -> Self {
        self.seam_context = px;
        self
    }

    pub fn with_mask_half(mut self, px: u32) -> Self {
        self.mask_half = px;
        self
    }

    pub fn with_write_half(mut self, px: u32) -> Self {
        self.write_half = px;
        self
    }

    pub fn with_max_seams(mut self, cap: u32) -> Self {
        self.max_seams = cap;
        self
    }

    pub fn with_max_failure_rate(mut self, rate: f64) -> Self {
        self.max_failure_rate = rate;
        self
    }

    pub fn with_suspicion_threshold(mut self, threshold: f64) -> Self {
        self.suspicion_threshold = threshold;
        self
    }

    pub fn with_intersection_pass(mut self, enabled: bool) -> Self {
        self.intersection_pass = enabled;
        self
    }

    pub fn with_params(mut self, params: GenParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_seed_base(mut self, seed: u64) -> Self {
        self.seed_base = seed;
        self
    }

    fn validate(&self) -> Result<(), SeamError> {
        if self.mask_half == 0 {
            return Err(SeamError::InvalidConfig("mask_half must be > 0".into()));
        }
        if self.write_half == 0 {
            return Err(SeamError::InvalidConfig("write_half must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.max_failure_rate) || !self.max_failure_rate.is_finite() {
            return Err(SeamError::InvalidConfig(
                "max_failure_rate must be in [0, 1]".into(),
            ));
        }
        if !self.suspicion_threshold.is_finite() || self.suspicion_threshold < 0.0 {
            return Err(SeamError::InvalidConfig(
                "suspicion_threshold must be >= 0".into(),
            ));
        }
        if !(0.0 < self.params.strength && self.params.strength <= 1.0) {
            return Err(SeamError::InvalidConfig(
                "strength must be in (0, 1]".into(),
            ));
        }
        if self.params.steps == 0 {
            return Err(SeamError::InvalidConfig("steps must be > 0".into()));
        }
        if self.intersection_half == 0 {
            return Err(SeamError::InvalidConfig(
                "intersection_half must be > 0".into(),
            ));
        }
        if !self.intersection_boost.is_finite() || self.intersection_boost < 0.0 {
            return Err(SeamError::InvalidConfig(
                "intersection_boost must be >= 0".into(),
            ));
        }
        Ok(())
    }
}

/// Mutable counters shared by the seam and intersection passes.
struct RunTally {
    processed_v: u32,
    processed_h: u32,
    skipped: BTreeMap<String, u32>,
    skipped_total: u32,
    failed: Vec<FailedSeam>,
    suspicious: Vec<SuspiciousSeam>,
}

impl RunTally {
    fn new() -> Self {
        Self {
            processed_v: 0,
            processed_h: 0,
            skipped: BTreeMap::new(),
            skipped_total: 0,
            failed: Vec::new(),
            suspicious: Vec::new(),
        }
    }

    fn skip(&mut self, reason: SkipReason) {
        self.skipped_total += 1;
        *self.skipped.entry(reason.as_str().to_string()).or_insert(0) += 1;
    }
}

/// Repairs every seam of `input`, writing the result to a new layer at
/// `out_root`. The input layer is never modified.
///
/// Pass a [`CancellationToken`] to allow aborting between units; the
/// output layer is still flushed with whatever was repaired so far only
/// on success - cancellation leaves no output layer tiles behind beyond
/// the initial copy.
#[instrument(skip_all, fields(input = %input.root().display()))]
pub fn repair_layer(
    input: &LayerDir,
    out_root: &Path,
    regen: &dyn Regenerator,
    config: &RepairConfig,
    cancel: Option<&CancellationToken>,
) -> Result<(LayerDir, RepairReport), SeamError> {
    config.validate()?;
    let started = Instant::now();

    let (out_layer, copied) = input.copy_to(out_root)?;
    let n = out_layer.grid();
    let overlap = out_layer.overlap();
    let (w, h) = out_layer.first_tile_size()?;
    let mx = crop_margin_px(w, overlap);
    let my = crop_margin_px(h, overlap);
    let seam_context = if config.seam_context > 0 {
        config.seam_context
    } else {
        auto_seam_context(mx, my)
    };
    let bands = BandParams {
        seam_context,
        mask_half: config.mask_half,
        write_half: config.write_half,
    };

    info!(
        grid = n,
        tile_w = w,
        tile_h = h,
        margin_x = mx,
        margin_y = my,
        seam_context,
        backend = regen.name(),
        "Starting seam repair"
    );

    let pool = TileBufferPool::load(&out_layer)?;
    let seams = enumerate_seams(n);
    let intersections = if config.intersection_pass {
        enumerate_intersections(n)
    } else {
        Vec::new()
    };
    let seams_total = seams.len() as u32;
    let intersections_total = intersections.len() as u32;

    // One failure budget spans both passes; a dead backend aborts the
    // run instead of grinding through every remaining unit.
    let units_total = seams_total + intersections_total;
    let ceiling = config.max_failure_rate * units_total as f64;

    let mut tally = RunTally::new();
    let mut processed = 0u32;

    for (idx, seam) in seams.iter().enumerate() {
        if cancel.is_some_and(|c| c.is_cancelled()) {
            return Err(SeamError::Cancelled);
        }

        let mut unit = UnitState::new(seam.to_string());
        if config.max_seams > 0 && processed >= config.max_seams {
            unit.advance(SeamState::Skipped(SkipReason::SeamCapReached));
            tally.skip(SkipReason::SeamCapReached);
            continue;
        }

        match repair_one_seam(
            *seam,
            idx as u64,
            (w, h, mx, my),
            bands,
            &pool,
            regen,
            config,
            &mut unit,
            &mut tally,
        ) {
            SeamOutcome::Written => processed += 1,
            SeamOutcome::Skipped | SeamOutcome::Failed => {}
        }

        if (tally.failed.len() as f64) > ceiling {
            return Err(SeamError::TooManyFailures {
                failed: tally.failed.len() as u32,
                total: units_total,
                ceiling: config.max_failure_rate,
            });
        }
    }

    // Intersections run strictly after both seam passes.
    let mut intersections_processed = 0u32;
    let mut intersections_skipped = 0u32;
    let mut intersections_failed: Vec<FailedIntersection> = Vec::new();

    for (idx, inter) in intersections.iter().enumerate() {
        if cancel.is_some_and(|c| c.is_cancelled()) {
            return Err(SeamError::Cancelled);
        }

        let mut unit = UnitState::new(inter.to_string());
        match repair_one_intersection(
            *inter,
            idx as u64,
            (w, h, mx, my),
            &pool,
            regen,
            config,
            &mut unit,
        ) {
            Ok(true) => intersections_processed += 1,
            Ok(false) => intersections_skipped += 1,
            Err(message) => {
                warn!(intersection = %inter, %message, "Intersection regeneration failed");
                intersections_failed.push(FailedIntersection {
                    intersection: *inter,
                    error: message,
                });
            }
        }

        let failed_units = tally.failed.len() + intersections_failed.len();
        if failed_units as f64 > ceiling {
            return Err(SeamError::TooManyFailures {
                failed: failed_units as u32,
                total: units_total,
                ceiling: config.max_failure_rate,
            });
        }
    }

    pool.flush(&out_layer)?;

    let report = RepairReport {
        copied_files: copied,
        grid: n,
        tile_size: [w, h],
        overlap,
        crop_margin_px: [mx, my],
        seam_context,
        mask_half: config.mask_half,
        write_half: config.write_half,
        seams_total,
        seams_processed: tally.processed_v + tally.processed_h,
        seams_vertical_processed: tally.processed_v,
        seams_horizontal_processed: tally.processed_h,
        seams_skipped: tally.skipped_total,
        skipped_reasons: tally.skipped,
        failed: tally.failed,
        suspicious: tally.suspicious,
        intersections_total,
        intersections_processed,
        intersections_skipped,
        intersections_failed,
        strength: config.params.strength,
        steps_requested: config.params.steps,
        steps_effective: config.params.effective_steps(),
        guidance: config.params.guidance,
        seed_base: config.seed_base,
        duration_s: started.elapsed().as_secs_f64(),
    };

    info!(
        processed = report.seams_processed,
        skipped = report.seams_skipped,
        failed = report.failed.len(),
        suspicious = report.suspicious.len(),
        intersections = report.intersections_processed,
        "Seam repair finished"
    );
    Ok((out_layer, report))
}

/// Writes the report JSON and registers it (and the output layer
/// metadata) in the ledger when one is given.
pub fn write_report(
    report: &RepairReport,
    path: &Path,
    ledger: Option<&LedgerStore>,
) -> Result<(), SeamError> {
    let mut bytes = serde_json::to_vec_pretty(report)
        .map_err(|e| SeamError::InvalidConfig(e.to_string()))?;
    bytes.push(b'\n');
    std::fs::write(path, bytes).map_err(|e| {
        SeamError::Ledger(LedgerError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    })?;

    if let Some(store) = ledger {
        store.upsert_output(path)?;
    }
    Ok(())
}

enum SeamOutcome {
    Written,
    Skipped,
    Failed,
}

#[allow(clippy::too_many_arguments)]
fn repair_one_seam(
    seam: SeamId,
    idx: u64,
    (w, h, mx, my): (u32, u32, u32, u32),
    bands: BandParams,
    pool: &TileBufferPool,
    regen: &dyn Regenerator,
    config: &RepairConfig,
    unit: &mut UnitState,
    tally: &mut RunTally,
) -> SeamOutcome {
    let (ax, ay) = (seam.x, seam.y);
    let (bx, by) = match seam.kind {
        SeamKind::Vertical => (seam.x + 1, seam.y),
        SeamKind::Horizontal => (seam.x, seam.y + 1),
    };

    let (Some(a_buf), Some(b_buf)) = (pool.get(ax, ay), pool.get(bx, by)) else {
        unit.advance(SeamState::Skipped(SkipReason::MissingTiles));
        tally.skip(SkipReason::MissingTiles);
        return SeamOutcome::Skipped;
    };

    let plan = match seam.kind {
        SeamKind::Vertical => plan_vertical(w, h, mx, my, bands),
        SeamKind::Horizontal => plan_horizontal(w, h, mx, my, bands),
    };
    let plan = match plan {
        Ok(p) => p,
        Err(reason) => {
            unit.advance(SeamState::Skipped(reason));
            tally.skip(reason);
            return SeamOutcome::Skipped;
        }
    };

    unit.advance(SeamState::Processing);

    // Crop phase: hold each lock only long enough to copy the strip out.
    let a_seg = {
        let a = a_buf.lock().expect("tile buffer mutex poisoned");
        crop_rect(&a, plan.a_crop)
    };
    let b_seg = {
        let b = b_buf.lock().expect("tile buffer mutex poisoned");
        crop_rect(&b, plan.b_crop)
    };

    let (pw, ph) = plan.patch_size;
    let mut patch = RgbImage::from_pixel(pw, ph, Rgb([128, 128, 128]));
    replace(&mut patch, &a_seg, 0, 0);
    let (bx_off, by_off) = match seam.kind {
        SeamKind::Vertical => (plan.split as i64, 0),
        SeamKind::Horizontal => (0, plan.split as i64),
    };
    replace(&mut patch, &b_seg, bx_off, by_off);

    let mut mask = GrayImage::new(pw, ph);
    fill_mask(&mut mask, plan.mask);

    let params = config
        .params
        .clone()
        .with_seed(config.seed_base.wrapping_add(idx));
    let request = RegenRequest::new(patch, params).with_mask(mask);

    // External call with no locks held.
    let out = match regen.regenerate(&request) {
        Ok(img) if img.dimensions() == (pw, ph) => img,
        Ok(img) => {
            let error = format!(
                "backend returned {}x{}, expected {pw}x{ph}",
                img.width(),
                img.height()
            );
            warn!(seam = %seam, %error, "Seam regeneration failed");
            unit.advance(SeamState::Failed);
            tally.failed.push(FailedSeam { seam, error });
            return SeamOutcome::Failed;
        }
        Err(e) => {
            warn!(seam = %seam, error = %e, "Seam regeneration failed");
            unit.advance(SeamState::Failed);
            tally.failed.push(FailedSeam {
                seam,
                error: e.to_string(),
            });
            return SeamOutcome::Failed;
        }
    };

    // Write-back phase: commit only the inner bands.
    {
        let mut a = a_buf.lock().expect("tile buffer mutex poisoned");
        let strip = crop_rect(&out, plan.a_patch_src);
        replace(&mut *a, &strip, plan.a_dest.0 as i64, plan.a_dest.1 as i64);
    }
    {
        let mut b = b_buf.lock().expect("tile buffer mutex poisoned");
        let strip = crop_rect(&out, plan.b_patch_src);
        replace(&mut *b, &strip, plan.b_dest.0 as i64, plan.b_dest.1 as i64);
    }
    unit.advance(SeamState::Written);
    match seam.kind {
        SeamKind::Vertical => tally.processed_v += 1,
        SeamKind::Horizontal => tally.processed_h += 1,
    }
    debug!(seam = %seam, "Seam written");

    score_repaired_seam(seam, plan, (w, h, mx, my), &a_buf, &b_buf, config, tally);
    SeamOutcome::Written
}

/// Scores the committed band against the neighbor's untouched rendering
/// of the same ground and flags the seam when either the weighted score
/// or the peak of the along-seam difference profile crosses the
/// threshold. The profile catches a single bad scanline whose
/// contribution to the whole-strip mean is negligible.
fn score_repaired_seam(
    seam: SeamId,
    plan: SeamPlan,
    (w, h, mx, my): (u32, u32, u32, u32),
    a_buf: &std::sync::Arc<std::sync::Mutex<RgbImage>>,
    b_buf: &std::sync::Arc<std::sync::Mutex<RgbImage>>,
    config: &RepairConfig,
    tally: &mut RunTally,
) {
    let band = match seam.kind {
        SeamKind::Vertical => plan.write_half.min(mx),
        SeamKind::Horizontal => plan.write_half.min(my),
    };
    if band == 0 {
        return;
    }

    // The repaired band in tile A and tile B's own rendering of the same
    // ground, which the write-back never touched.
    let (a_rect, b_rect) = match seam.kind {
        SeamKind::Vertical => (
            Rect { x0: w - mx - band, y0: plan.a_crop.y0, x1: w - mx, y1: plan.a_crop.y1 },
            Rect { x0: mx - band, y0: plan.b_crop.y0, x1: mx, y1: plan.b_crop.y1 },
        ),
        SeamKind::Horizontal => (
            Rect { x0: plan.a_crop.x0, y0: h - my - band, x1: plan.a_crop.x1, y1: h - my },
            Rect { x0: plan.b_crop.x0, y0: my - band, x1: plan.b_crop.x1, y1: my },
        ),
    };

    let a_strip = {
        let a = a_buf.lock().expect("tile buffer mutex poisoned");
        crop_rect(&a, a_rect)
    };
    let b_strip = {
        let b = b_buf.lock().expect("tile buffer mutex poisoned");
        crop_rect(&b, b_rect)
    };

    let (score, metrics) = score_pair(&a_strip, &b_strip, &config.weights);
    let profile = match seam.kind {
        SeamKind::Vertical => l1_profile_per_row(&a_strip, &b_strip),
        SeamKind::Horizontal => l1_profile_per_col(&a_strip, &b_strip),
    };
    let profile_max = profile.iter().copied().fold(0f32, f32::max) as f64;

    if score > config.suspicion_threshold || profile_max > config.suspicion_threshold {
        warn!(
            seam = %seam,
            score,
            profile_max,
            threshold = config.suspicion_threshold,
            "Suspicious seam"
        );
        tally.suspicious.push(SuspiciousSeam {
            seam,
            score,
            profile_max,
            metrics,
        });
    }
}

/// Repairs one four-tile intersection. `Ok(true)` = written,
/// `Ok(false)` = skipped, `Err` = regeneration failure.
#[allow(clippy::too_many_arguments)]
fn repair_one_intersection(
    inter: IntersectionId,
    idx: u64,
    (w, h, mx, my): (u32, u32, u32, u32),
    pool: &TileBufferPool,
    regen: &dyn Regenerator,
    config: &RepairConfig,
    unit: &mut UnitState,
) -> Result<bool, String> {
    let coords = [
        (inter.x, inter.y),
        (inter.x + 1, inter.y),
        (inter.x, inter.y + 1),
        (inter.x + 1, inter.y + 1),
    ];
    let bufs: Vec<_> = coords
        .iter()
        .filter_map(|&(x, y)| pool.get(x, y))
        .collect();
    if bufs.len() != 4 {
        unit.advance(SeamState::Skipped(SkipReason::MissingTiles));
        return Ok(false);
    }

    let plan = match plan_intersection(w, h, mx, my, config.intersection_half, config.write_half) {
        Ok(p) => p,
        Err(reason) => {
            unit.advance(SeamState::Skipped(reason));
            return Ok(false);
        }
    };

    unit.advance(SeamState::Processing);

    let (pw, ph) = plan.patch_size;
    let mut patch = RgbImage::new(pw, ph);
    for i in 0..4 {
        let quad = {
            let img = bufs[i].lock().expect("tile buffer mutex poisoned");
            crop_rect(&img, plan.crops[i])
        };
        let (ox, oy) = plan.patch_origins[i];
        replace(&mut patch, &quad, ox as i64, oy as i64);
    }

    let params = config
        .params
        .clone()
        .with_strength((config.params.strength + config.intersection_boost).min(1.0))
        .with_steps(if config.intersection_steps > 0 {
            config.intersection_steps
        } else {
            config.params.steps.max(14)
        })
        .with_seed(
            config
                .seed_base
                .wrapping_add(INTERSECTION_SEED_OFFSET)
                .wrapping_add(idx),
        );
    let request = RegenRequest::new(patch.clone(), params);

    let out = match regen.regenerate(&request) {
        Ok(img) => img,
        Err(e) => {
            unit.advance(SeamState::Failed);
            return Err(e.to_string());
        }
    };
    if out.dimensions() != (pw, ph) {
        unit.advance(SeamState::Failed);
        return Err(format!(
            "backend returned {}x{}, expected {pw}x{ph}",
            out.width(),
            out.height()
        ));
    }

    // Radial falloff: full trust in the regenerated center, none at the
    // patch rim.
    let weights = radial_weights(pw, ph);
    let mut blended = patch;
    for (x, y, px) in blended.enumerate_pixels_mut() {
        let t = weights[(y * pw + x) as usize];
        let new = out.get_pixel(x, y).0;
        for c in 0..3 {
            px.0[c] =
                (px.0[c] as f32 * (1.0 - t) + new[c] as f32 * t).round().clamp(0.0, 255.0) as u8;
        }
    }

    for i in 0..4 {
        let (src, dest) = plan.writes[i];
        let quad = crop_rect(&blended, src);
        let mut img = bufs[i].lock().expect("tile buffer mutex poisoned");
        replace(&mut *img, &quad, dest.0 as i64, dest.1 as i64);
    }
    unit.advance(SeamState::Written);
    debug!(intersection = %inter, "Intersection written");
    Ok(true)
}

fn crop_rect(img: &RgbImage, r: Rect) -> RgbImage {
    crop_imm(img, r.x0, r.y0, r.width(), r.height()).to_image()
}

fn fill_mask(mask: &mut GrayImage, band: Rect) {
    for y in band.y0..band.y1.min(mask.height()) {
        for x in band.x0..band.x1.min(mask.width()) {
            mask.put_pixel(x, y, Luma([255]));
        }
    }
}
