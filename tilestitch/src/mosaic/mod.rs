//! Mosaic compositor.
//!
//! Flattens one tile layer into a single RGB image. Tiles were rendered
//! over their context bbox (core plus overlap margin), so adjacent images
//! share pixels; the compositor either crops each tile back to its core
//! and pastes edge to edge, or blends across the overlap band with a
//! linear feather ramp.
//!
//! Crop mode is lossless and byte-stable across runs. Blend mode
//! accumulates weighted pixels in f32 and normalizes by the weight sum,
//! so wherever two tiles overlap their weights sum to one and the output
//! is a true weighted average.

mod types;

pub use types::{MosaicError, MosaicMode, MosaicOptions, MosaicReport};

use crate::layer::{crop_margin_px, LayerDir};
use crate::ledger::LedgerStore;
use image::{Rgb, RgbImage};
use std::path::Path;
use tracing::{debug, info, instrument, warn};

/// Composites a layer into a single mosaic image.
#[instrument(skip(layer, opts), fields(root = %layer.root().display()))]
pub fn composite(
    layer: &LayerDir,
    opts: &MosaicOptions,
) -> Result<(RgbImage, MosaicReport), MosaicError> {
    let n = layer.grid();
    let overlap = layer.overlap();
    let (tw, th) = layer.first_tile_size().map_err(MosaicError::from)?;

    let mx = crop_margin_px(tw, overlap);
    let my = crop_margin_px(th, overlap);
    if 2 * mx >= tw {
        return Err(MosaicError::MarginTooLarge { margin: mx, size: tw });
    }
    if 2 * my >= th {
        return Err(MosaicError::MarginTooLarge { margin: my, size: th });
    }
    let (cw, ch) = (tw - 2 * mx, th - 2 * my);
    let (mw, mh) = (n * cw, n * ch);

    let mut missing = Vec::new();
    let mosaic = match opts.mode {
        MosaicMode::Crop => composite_crop(
            layer, n, (tw, th), (mx, my), (cw, ch), opts, &mut missing,
        )?,
        MosaicMode::Blend => composite_blend(
            layer, n, (tw, th), (mx, my), (cw, ch), opts, &mut missing,
        )?,
    };

    let feather = match opts.mode {
        MosaicMode::Crop => 0,
        MosaicMode::Blend => opts.feather.min(mx.max(my)),
    };
    let report = MosaicReport {
        grid: n,
        overlap,
        tile_size: [tw, th],
        crop_margin_px: [mx, my],
        cropped_size: [cw, ch],
        mosaic_size: [mw, mh],
        missing,
        mode: opts.mode,
        feather,
    };

    info!(
        grid = n,
        mosaic_w = mw,
        mosaic_h = mh,
        missing = report.missing.len(),
        mode = ?opts.mode,
        "Composited mosaic"
    );
    Ok((mosaic, report))
}

/// Composites, writes the PNG and its JSON report, and registers both in
/// the ledger when one is given.
///
/// Ledger keys are the output paths relative to the ledger document's
/// directory; registering an output outside that directory fails.
pub fn compose_and_register(
    layer: &LayerDir,
    opts: &MosaicOptions,
    output: &Path,
    report_path: &Path,
    ledger: Option<&LedgerStore>,
) -> Result<MosaicReport, MosaicError> {
    let (mosaic, report) = composite(layer, opts)?;

    mosaic.save(output).map_err(|e| MosaicError::Encode {
        path: output.to_path_buf(),
        message: e.to_string(),
    })?;

    let json = serde_json::to_vec_pretty(&report).map_err(|e| MosaicError::Encode {
        path: report_path.to_path_buf(),
        message: e.to_string(),
    })?;
    std::fs::write(report_path, json).map_err(|e| {
        MosaicError::Ledger(crate::ledger::LedgerError::Io {
            path: report_path.to_path_buf(),
            source: e,
        })
    })?;

    if let Some(store) = ledger {
        store.upsert_output(output)?;
        store.upsert_output(report_path)?;
    }
    Ok(report)
}

fn composite_crop(
    layer: &LayerDir,
    n: u32,
    (tw, th): (u32, u32),
    (mx, my): (u32, u32),
    (cw, ch): (u32, u32),
    opts: &MosaicOptions,
    missing: &mut Vec<[u32; 2]>,
) -> Result<RgbImage, MosaicError> {
    let mut out = RgbImage::from_pixel(n * cw, n * ch, Rgb(opts.background));

    for y in 0..n {
        for x in 0..n {
            let Some(tile) = load_checked(layer, x, y, (tw, th), opts, missing)? else {
                continue;
            };
            let (ox, oy) = (x * cw, y * ch);
            for v in 0..ch {
                for u in 0..cw {
                    out.put_pixel(ox + u, oy + v, *tile.get_pixel(mx + u, my + v));
                }
            }
            debug!(x, y, "Pasted tile core");
        }
    }
    Ok(out)
}

fn composite_blend(
    layer: &LayerDir,
    n: u32,
    (tw, th): (u32, u32),
    (mx, my): (u32, u32),
    (cw, ch): (u32, u32),
    opts: &MosaicOptions,
    missing: &mut Vec<[u32; 2]>,
) -> Result<RgbImage, MosaicError> {
    let (mw, mh) = ((n * cw) as usize, (n * ch) as usize);
    let mut acc = vec![0f32; mw * mh * 3];
    let mut wsum = vec![0f32; mw * mh];

    // Ramp from near-zero at the outer context edge to 1 at the inner
    // edge of the fade band. The nonzero floor keeps the weight sum
    // positive on AOI-edge pixels covered by a single tile.
    let fx = opts.feather.min(mx);
    let fy = opts.feather.min(my);
    let ramp = |i: u32, size: u32, fade: u32| -> f32 {
        let up = (i + 1) as f32 / (fade + 1) as f32;
        let down = (size - i) as f32 / (fade + 1) as f32;
        up.min(down).min(1.0)
    };

    for y in 0..n {
        for x in 0..n {
            let Some(tile) = load_checked(layer, x, y, (tw, th), opts, missing)? else {
                continue;
            };
            // Tile pixel (u, v) lands at core origin minus the margin.
            let bx = (x * cw) as i64 - mx as i64;
            let by = (y * ch) as i64 - my as i64;

            for v in 0..th {
                let gy = by + v as i64;
                if gy < 0 || gy >= mh as i64 {
                    continue;
                }
                let wy = ramp(v, th, fy);
                for u in 0..tw {
                    let gx = bx + u as i64;
                    if gx < 0 || gx >= mw as i64 {
                        continue;
                    }
                    let w = ramp(u, tw, fx) * wy;
                    let p = tile.get_pixel(u, v).0;
                    let idx = gy as usize * mw + gx as usize;
                    acc[idx * 3] += w * p[0] as f32;
                    acc[idx * 3 + 1] += w * p[1] as f32;
                    acc[idx * 3 + 2] += w * p[2] as f32;
                    wsum[idx] += w;
                }
            }
        }
    }

    let mut out = RgbImage::new(mw as u32, mh as u32);
    for gy in 0..mh {
        for gx in 0..mw {
            let idx = gy * mw + gx;
            let px = if wsum[idx] > 0.0 {
                let inv = 1.0 / wsum[idx];
                [
                    (acc[idx * 3] * inv).round().clamp(0.0, 255.0) as u8,
                    (acc[idx * 3 + 1] * inv).round().clamp(0.0, 255.0) as u8,
                    (acc[idx * 3 + 2] * inv).round().clamp(0.0, 255.0) as u8,
                ]
            } else {
                opts.background
            };
            out.put_pixel(gx as u32, gy as u32, Rgb(px));
        }
    }
    Ok(out)
}

/// Loads one tile, enforcing strictness and size agreement. Returns
/// `Ok(None)` for a missing tile in lenient mode, recording it.
fn load_checked(
    layer: &LayerDir,
    x: u32,
    y: u32,
    (tw, th): (u32, u32),
    opts: &MosaicOptions,
    missing: &mut Vec<[u32; 2]>,
) -> Result<Option<RgbImage>, MosaicError> {
    if !layer.has_tile(x, y) {
        if opts.strict {
            return Err(MosaicError::MissingTile { x, y });
        }
        warn!(x, y, "Tile missing, leaving background");
        missing.push([x, y]);
        return Ok(None);
    }
    let tile = layer.load_tile(x, y)?;
    if tile.width() != tw || tile.height() != th {
        return Err(MosaicError::TileSizeMismatch {
            x,
            y,
            got_w: tile.width(),
            got_h: tile.height(),
            want_w: tw,
            want_h: th,
        });
    }
    Ok(Some(tile))
}
