//! Per-tile stylize stage.
//!
//! Applies a [`Regenerator`] to every tile of a layer independently,
//! writing a new layer. Tiles have no data dependency on each other, so
//! the stage fans out on Tokio with a semaphore bounding how many
//! backend calls run at once. Each tile's work (PNG decode, the backend
//! call, PNG encode) is blocking, so it runs under `spawn_blocking`.
//!
//! The output layer starts as a full copy of the input; a tile that
//! fails regeneration or is cancelled simply keeps its input pixels and
//! is recorded in the report. Only layer-level I/O aborts the stage.

use crate::layer::{LayerDir, LayerError};
use crate::ledger::{LedgerError, LedgerStore};
use crate::regen::{GenParams, RegenRequest, Regenerator};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Errors that abort the stylize stage.
#[derive(Debug, Error)]
pub enum StylizeError {
    #[error("invalid stylize configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Layer(#[from] LayerError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Stylize stage configuration.
#[derive(Debug, Clone)]
pub struct StylizeConfig {
    /// Concurrent backend calls
    pub concurrency: usize,
    /// Generation parameters forwarded per tile
    pub params: GenParams,
    /// Seed base; the tile's row-major index is added per call
    pub seed_base: u64,
}

impl Default for StylizeConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            params: GenParams::default(),
            seed_base: 0,
        }
    }
}

impl StylizeConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
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

    fn validate(&self) -> Result<(), StylizeError> {
        if self.concurrency == 0 {
            return Err(StylizeError::InvalidConfig(
                "concurrency must be > 0".into(),
            ));
        }
        if !(0.0 < self.params.strength && self.params.strength <= 1.0) {
            return Err(StylizeError::InvalidConfig(
                "strength must be in (0, 1]".into(),
            ));
        }
        Ok(())
    }
}

/// One tile that kept its input pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedTile {
    pub x: u32,
    pub y: u32,
    pub error: String,
}

/// Summary of one stylize run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StylizeReport {
    pub grid: u32,
    pub tiles_total: u32,
    pub tiles_processed: u32,
    /// Tiles skipped by cancellation (input pixels kept)
    pub tiles_cancelled: u32,
    /// Tiles whose regeneration failed (input pixels kept)
    pub failed: Vec<FailedTile>,
    pub strength: f64,
    pub steps_requested: u32,
    pub steps_effective: u32,
    pub guidance: f64,
    pub seed_base: u64,
    pub duration_s: f64,
}

enum TileOutcome {
    Done { x: u32, y: u32 },
    Cancelled,
    Failed(FailedTile),
}

/// Stylizes every tile of `input` into a new layer at `out_root`.
///
/// Returns the output layer and the run report. The input layer is
/// never modified.
#[instrument(skip_all, fields(input = %input.root().display(), backend = regen.name()))]
pub async fn stylize_layer(
    input: &LayerDir,
    out_root: &Path,
    regen: Arc<dyn Regenerator>,
    config: &StylizeConfig,
    cancel: CancellationToken,
) -> Result<(LayerDir, StylizeReport), StylizeError> {
    config.validate()?;
    let started = Instant::now();

    let (out_layer, _copied) = input.copy_to(out_root)?;
    let n = out_layer.grid();
    let semaphore = Arc::new(Semaphore::new(config.concurrency));
    let mut tasks = JoinSet::new();
    let mut tiles_total = 0u32;

    for y in 0..n {
        for x in 0..n {
            if !input.has_tile(x, y) {
                continue;
            }
            tiles_total += 1;

            let semaphore = Arc::clone(&semaphore);
            let regen = Arc::clone(&regen);
            let cancel = cancel.clone();
            let out_layer = out_layer.clone();
            let params = config
                .params
                .clone()
                .with_seed(config.seed_base.wrapping_add((y * n + x) as u64));

            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("stylize semaphore closed");
                if cancel.is_cancelled() {
                    return TileOutcome::Cancelled;
                }

                tokio::task::spawn_blocking(move || stylize_tile(&out_layer, x, y, &*regen, params))
                    .await
                    .unwrap_or_else(|join_err| {
                        TileOutcome::Failed(FailedTile {
                            x,
                            y,
                            error: format!("task panicked: {join_err}"),
                        })
                    })
            });
        }
    }

    let mut tiles_processed = 0u32;
    let mut tiles_cancelled = 0u32;
    let mut failed = Vec::new();

    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(TileOutcome::Done { x, y }) => {
                debug!(x, y, "Tile stylized");
                tiles_processed += 1;
            }
            Ok(TileOutcome::Cancelled) => tiles_cancelled += 1,
            Ok(TileOutcome::Failed(f)) => {
                warn!(x = f.x, y = f.y, error = %f.error, "Tile kept input pixels");
                failed.push(f);
            }
            Err(join_err) => {
                warn!(error = %join_err, "Stylize task panicked");
            }
        }
    }

    let report = StylizeReport {
        grid: n,
        tiles_total,
        tiles_processed,
        tiles_cancelled,
        failed,
        strength: config.params.strength,
        steps_requested: config.params.steps,
        steps_effective: config.params.effective_steps(),
        guidance: config.params.guidance,
        seed_base: config.seed_base,
        duration_s: started.elapsed().as_secs_f64(),
    };

    info!(
        processed = report.tiles_processed,
        failed = report.failed.len(),
        cancelled = report.tiles_cancelled,
        "Stylize finished"
    );
    Ok((out_layer, report))
}

/// Blocking per-tile work: decode, regenerate, encode.
fn stylize_tile(
    layer: &LayerDir,
    x: u32,
    y: u32,
    regen: &dyn Regenerator,
    params: GenParams,
) -> TileOutcome {
    let fail = |error: String| TileOutcome::Failed(FailedTile { x, y, error });

    let tile = match layer.load_tile(x, y) {
        Ok(t) => t,
        Err(e) => return fail(e.to_string()),
    };
    let (w, h) = tile.dimensions();

    let request = RegenRequest::new(tile, params);
    let out = match regen.regenerate(&request) {
        Ok(img) if img.dimensions() == (w, h) => img,
        Ok(img) => {
            return fail(format!(
                "backend returned {}x{}, expected {w}x{h}",
                img.width(),
                img.height()
            ))
        }
        Err(e) => return fail(e.to_string()),
    };

    match layer.save_tile(x, y, &out) {
        Ok(()) => TileOutcome::Done { x, y },
        Err(e) => fail(e.to_string()),
    }
}

/// Writes the report JSON and registers it in the ledger when one is
/// given.
pub fn write_report(
    report: &StylizeReport,
    path: &Path,
    ledger: Option<&LedgerStore>,
) -> Result<(), StylizeError> {
    let mut bytes = serde_json::to_vec_pretty(report)
        .map_err(|e| StylizeError::InvalidConfig(e.to_string()))?;
    bytes.push(b'\n');
    std::fs::write(path, bytes).map_err(|e| {
        StylizeError::Ledger(LedgerError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    })?;

    if let Some(store) = ledger {
        store.upsert_output(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::LayerMeta;
    use crate::regen::{FillRegenerator, RegenError};
    use image::{Rgb, RgbImage};
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn make_layer(dir: &Path) -> LayerDir {
        let layer = LayerDir::create(dir, LayerMeta { grid: 2, overlap: 0.1 }).unwrap();
        for y in 0..2 {
            for x in 0..2 {
                layer
                    .save_tile(x, y, &RgbImage::from_pixel(16, 16, Rgb([50, 50, 50])))
                    .unwrap();
            }
        }
        layer
    }

    struct AlwaysFailing;

    impl Regenerator for AlwaysFailing {
        fn name(&self) -> &str {
            "always-failing"
        }

        fn regenerate(&self, _request: &RegenRequest) -> Result<RgbImage, RegenError> {
            Err(RegenError::Backend("boom".into()))
        }
    }

    /// Records the seed of every request it serves.
    struct SeedRecorder {
        seeds: Mutex<Vec<u64>>,
    }

    impl Regenerator for SeedRecorder {
        fn name(&self) -> &str {
            "seed-recorder"
        }

        fn regenerate(&self, request: &RegenRequest) -> Result<RgbImage, RegenError> {
            if let Some(seed) = request.params.seed {
                self.seeds.lock().unwrap().push(seed);
            }
            Ok(request.patch.clone())
        }
    }

    #[tokio::test]
    async fn test_stylize_rewrites_every_tile() {
        let dir = TempDir::new().unwrap();
        let input = make_layer(&dir.path().join("in"));

        let (out, report) = stylize_layer(
            &input,
            &dir.path().join("out"),
            Arc::new(FillRegenerator::new([200, 10, 10])),
            &StylizeConfig::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.tiles_total, 4);
        assert_eq!(report.tiles_processed, 4);
        assert!(report.failed.is_empty());
        for y in 0..2 {
            for x in 0..2 {
                assert_eq!(out.load_tile(x, y).unwrap().get_pixel(0, 0).0, [200, 10, 10]);
            }
        }
        // Input untouched.
        assert_eq!(input.load_tile(0, 0).unwrap().get_pixel(0, 0).0, [50, 50, 50]);
    }

    #[tokio::test]
    async fn test_failed_tile_keeps_input_pixels() {
        let dir = TempDir::new().unwrap();
        let input = make_layer(&dir.path().join("in"));

        let (out, report) = stylize_layer(
            &input,
            &dir.path().join("out"),
            Arc::new(AlwaysFailing),
            &StylizeConfig::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.tiles_processed, 0);
        assert_eq!(report.failed.len(), 4);
        assert_eq!(out.load_tile(1, 1).unwrap().get_pixel(0, 0).0, [50, 50, 50]);
    }

    #[tokio::test]
    async fn test_cancellation_keeps_input_pixels() {
        let dir = TempDir::new().unwrap();
        let input = make_layer(&dir.path().join("in"));

        let token = CancellationToken::new();
        token.cancel();
        let (out, report) = stylize_layer(
            &input,
            &dir.path().join("out"),
            Arc::new(FillRegenerator::new([200, 10, 10])),
            &StylizeConfig::default(),
            token,
        )
        .await
        .unwrap();

        assert_eq!(report.tiles_processed, 0);
        assert_eq!(report.tiles_cancelled, 4);
        assert_eq!(out.load_tile(0, 0).unwrap().get_pixel(0, 0).0, [50, 50, 50]);
    }

    #[tokio::test]
    async fn test_seed_per_tile_is_base_plus_index() {
        let dir = TempDir::new().unwrap();
        let input = make_layer(&dir.path().join("in"));
        let recorder = Arc::new(SeedRecorder {
            seeds: Mutex::new(Vec::new()),
        });

        let config = StylizeConfig::default().with_seed_base(1000);
        stylize_layer(
            &input,
            &dir.path().join("out"),
            Arc::clone(&recorder) as Arc<dyn Regenerator>,
            &config,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let mut seeds = recorder.seeds.lock().unwrap().clone();
        seeds.sort_unstable();
        assert_eq!(seeds, vec![1000, 1001, 1002, 1003]);
    }

    #[tokio::test]
    async fn test_zero_concurrency_rejected() {
        let dir = TempDir::new().unwrap();
        let input = make_layer(&dir.path().join("in"));

        let config = StylizeConfig::default().with_concurrency(0);
        let result = stylize_layer(
            &input,
            &dir.path().join("out"),
            Arc::new(FillRegenerator::new([1, 1, 1])),
            &config,
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(StylizeError::InvalidConfig(_))));
    }
}
