//! Integration tests for the full tile pipeline.
//!
//! These tests drive the stages end to end on small synthetic layers:
//! - AOI partitioning into an overlapping grid
//! - Stylize pass over every tile
//! - Seam repair with offline backends
//! - Mosaic compositing of the repaired layer
//! - Artifact registration in the run ledger

use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use tilestitch::coord::GeoBbox;
use tilestitch::grid::partition;
use tilestitch::layer::{crop_margin_px, LayerDir, LayerMeta};
use tilestitch::ledger::{hash_file, Aoi, LedgerDoc, LedgerStore};
use tilestitch::mosaic::{compose_and_register, composite, MosaicMode, MosaicOptions};
use tilestitch::regen::{FillRegenerator, IdentityRegenerator};
use tilestitch::seam::{repair_layer, RepairConfig};
use tilestitch::stylize::{stylize_layer, StylizeConfig};

const TILE: u32 = 48;
const GRID: u32 = 2;
const OVERLAP: f64 = 0.25;
const GRAY: [u8; 3] = [120, 120, 120];

/// Builds a GRID x GRID layer of uniform TILE x TILE tiles.
fn uniform_layer(root: &std::path::Path) -> LayerDir {
    let layer = LayerDir::create(
        root,
        LayerMeta {
            grid: GRID,
            overlap: OVERLAP,
        },
    )
    .unwrap();

    let img = image::RgbImage::from_pixel(TILE, TILE, image::Rgb(GRAY));
    for y in 0..GRID {
        for x in 0..GRID {
            layer.save_tile(x, y, &img).unwrap();
        }
    }
    layer
}

#[test]
fn test_partition_produces_overlapping_grid() {
    let bbox = GeoBbox::new(69.103, 41.168, 69.397, 41.434).unwrap();
    let grid = partition(&bbox, GRID, OVERLAP).unwrap();

    assert_eq!(grid.tiles.len(), (GRID * GRID) as usize);

    // Adjacent tiles share context: tile (0,0)'s rendered bbox extends
    // past tile (1,0)'s core, so both render the seam pixels.
    let left = grid.tile(0, 0).unwrap();
    let right = grid.tile(1, 0).unwrap();
    assert!(left.context_geo.east > right.core_geo.west);
    // Core boxes still tile the AOI exactly.
    assert!((left.core_geo.west - bbox.west).abs() < 1e-9);
    assert!((left.core_geo.east - right.core_geo.west).abs() < 1e-9);
    assert!((right.core_geo.east - bbox.east).abs() < 1e-9);
}

#[tokio::test]
async fn test_identity_pipeline_preserves_pixels() {
    let dir = TempDir::new().unwrap();
    let input = uniform_layer(&dir.path().join("base"));

    // Stylize every tile through the no-op backend.
    let config = StylizeConfig::default().with_concurrency(2);
    let (styled, stylize_report) = stylize_layer(
        &input,
        &dir.path().join("styled"),
        Arc::new(IdentityRegenerator),
        &config,
        CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(stylize_report.tiles_processed, GRID * GRID);
    assert!(stylize_report.failed.is_empty());

    // Repair all seams and the interior intersection, still a no-op.
    let (repaired, repair_report) = repair_layer(
        &styled,
        &dir.path().join("repaired"),
        &IdentityRegenerator,
        &RepairConfig::default(),
        None,
    )
    .unwrap();
    assert_eq!(repair_report.seams_total, 2 * GRID * (GRID - 1));
    assert_eq!(repair_report.seams_processed, repair_report.seams_total);
    assert_eq!(repair_report.intersections_processed, (GRID - 1) * (GRID - 1));
    assert!(repair_report.failed.is_empty());
    assert!(repair_report.suspicious.is_empty());

    // The flattened mosaic is uniform gray: no stage altered a pixel.
    let opts = MosaicOptions::new(MosaicMode::Crop);
    let (mosaic, report) = composite(&repaired, &opts).unwrap();

    let margin = crop_margin_px(TILE, OVERLAP);
    let cropped = TILE - 2 * margin;
    assert_eq!(report.mosaic_size, [GRID * cropped, GRID * cropped]);
    assert!(mosaic.pixels().all(|p| p.0 == GRAY));
}

#[test]
fn test_fill_repair_paints_seam_bands_only() {
    let dir = TempDir::new().unwrap();
    let input = uniform_layer(&dir.path().join("base"));

    let config = RepairConfig::default().with_intersection_pass(false);
    let (repaired, report) = repair_layer(
        &input,
        &dir.path().join("repaired"),
        &FillRegenerator::new([255, 0, 0]),
        &config,
        None,
    )
    .unwrap();
    assert_eq!(report.seams_processed, report.seams_total);
    assert_eq!(report.intersections_total, 0);

    let opts = MosaicOptions::new(MosaicMode::Crop);
    let (mosaic, _) = composite(&repaired, &opts).unwrap();

    // 48 px tiles at 0.25 overlap crop an 8 px margin; the written band
    // hugs each internal seam line (x = 32 and y = 32 in the mosaic) and
    // never reaches the outer edges.
    assert_eq!(mosaic.get_pixel(30, 10).0, [255, 0, 0]);
    assert_eq!(mosaic.get_pixel(45, 10).0, [255, 0, 0]);
    assert_eq!(mosaic.get_pixel(2, 10).0, GRAY);
    assert_eq!(mosaic.get_pixel(61, 10).0, GRAY);
    // Same band shape across the horizontal seam.
    assert_eq!(mosaic.get_pixel(10, 30).0, [255, 0, 0]);
    assert_eq!(mosaic.get_pixel(10, 2).0, GRAY);

    // The input layer was never touched.
    let original = input.load_tile(0, 0).unwrap();
    assert!(original.pixels().all(|p| p.0 == GRAY));
}

#[test]
fn test_mosaic_outputs_are_registered_in_ledger() {
    let dir = TempDir::new().unwrap();
    let layer = uniform_layer(&dir.path().join("base"));

    let bbox = GeoBbox::new(69.103, 41.168, 69.397, 41.434).unwrap();
    let store = LedgerStore::create(
        dir.path().join("run.json"),
        LedgerDoc::new("run-001", Aoi::new("tashkent", bbox)),
    )
    .unwrap();

    let output = dir.path().join("mosaic.png");
    let report_path = dir.path().join("mosaic.json");
    let opts = MosaicOptions::new(MosaicMode::Crop);
    compose_and_register(&layer, &opts, &output, &report_path, Some(&store)).unwrap();

    let doc = store.document();
    let recorded = doc.artifact("mosaic.png").expect("mosaic registered");
    assert_eq!(recorded.sha256, hash_file(&output).unwrap());
    assert_eq!(recorded.size, std::fs::metadata(&output).unwrap().len());
    assert!(doc.artifact("mosaic.json").is_some());

    // A reopened store sees the same document.
    let reopened = LedgerStore::open(dir.path().join("run.json")).unwrap();
    assert_eq!(reopened.document().artifacts.len(), 2);
}

#[test]
fn test_blend_mosaic_matches_crop_on_uniform_layer() {
    let dir = TempDir::new().unwrap();
    let layer = uniform_layer(&dir.path().join("base"));

    let (crop, _) = composite(&layer, &MosaicOptions::new(MosaicMode::Crop)).unwrap();
    let (blend, _) = composite(&layer, &MosaicOptions::new(MosaicMode::Blend)).unwrap();

    // On a uniform layer the feathered blend must reproduce the crop
    // result exactly; any drift means the weights do not normalize.
    assert_eq!(crop.dimensions(), blend.dimensions());
    for (a, b) in crop.pixels().zip(blend.pixels()) {
        assert_eq!(a, b);
    }
}
