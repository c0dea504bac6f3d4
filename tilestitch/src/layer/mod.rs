//! Tile layer on-disk contract.
//!
//! A layer is one rendered stage's output for a whole grid: a directory of
//! PNGs addressed `0/<x>/<y>.png` (zoom fixed at 0), plus a small
//! `layer.json` metadata document recording the grid size and overlap
//! fraction used to produce it. The metadata lets the mosaic compositor and
//! seam repair orchestrator run without recomputing the original AOI or
//! grid parameters.
//!
//! Every tile image covers its tile's *context* bbox (core plus overlap
//! margin), so adjacent images share pixels along their boundary. The
//! per-side pixel margin of a context image is
//! `round(size_px * f / (1 + 2f))`: the render covered `1 + 2f` core
//! widths, of which `f` on each side is margin.

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Metadata file name inside a layer directory.
pub const METADATA_FILENAME: &str = "layer.json";

/// Errors raised by layer directory operations.
#[derive(Debug, Error)]
pub enum LayerError {
    /// The layer directory (or its `0/` tile root) does not exist.
    #[error("missing layer directory: {0}")]
    MissingLayer(PathBuf),

    /// An expected tile image is absent.
    #[error("missing tile ({x}, {y}) in layer {layer}")]
    MissingTile { x: u32, y: u32, layer: PathBuf },

    /// Metadata file unreadable or malformed.
    #[error("invalid layer metadata at {path}: {message}")]
    Metadata { path: PathBuf, message: String },

    /// Tile image disagrees with the layer's established pixel size.
    #[error("tile ({x}, {y}) is {got_w}x{got_h}, expected {want_w}x{want_h}")]
    TileSizeMismatch {
        x: u32,
        y: u32,
        got_w: u32,
        got_h: u32,
        want_w: u32,
        want_h: u32,
    },

    /// Tile image decode/encode failure.
    #[error("image error at {path}: {message}")]
    Image { path: PathBuf, message: String },

    /// Filesystem error.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Grid parameters recorded alongside a layer's tiles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayerMeta {
    /// Grid size N (layer holds N x N tiles)
    pub grid: u32,
    /// Overlap fraction the tiles were rendered with
    pub overlap: f64,
}

/// Handle to one tile layer directory.
#[derive(Debug, Clone)]
pub struct LayerDir {
    root: PathBuf,
    meta: LayerMeta,
}

impl LayerDir {
    /// Creates a new (empty) layer directory and writes its metadata.
    pub fn create(root: impl Into<PathBuf>, meta: LayerMeta) -> Result<Self, LayerError> {
        let root = root.into();
        fs::create_dir_all(root.join("0")).map_err(|e| LayerError::Io {
            path: root.clone(),
            source: e,
        })?;

        let meta_path = root.join(METADATA_FILENAME);
        let json = serde_json::to_vec_pretty(&meta).map_err(|e| LayerError::Metadata {
            path: meta_path.clone(),
            message: e.to_string(),
        })?;
        fs::write(&meta_path, json).map_err(|e| LayerError::Io {
            path: meta_path,
            source: e,
        })?;

        Ok(Self { root, meta })
    }

    /// Opens an existing layer directory.
    ///
    /// Reads `layer.json` when present; otherwise falls back to detecting
    /// the grid size from the `0/<x>/<y>.png` tree and assumes zero
    /// overlap (with a warning), so pre-metadata layers stay usable.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, LayerError> {
        let root = root.into();
        if !root.join("0").is_dir() {
            return Err(LayerError::MissingLayer(root));
        }

        let meta_path = root.join(METADATA_FILENAME);
        let meta = if meta_path.is_file() {
            let bytes = fs::read(&meta_path).map_err(|e| LayerError::Io {
                path: meta_path.clone(),
                source: e,
            })?;
            serde_json::from_slice(&bytes).map_err(|e| LayerError::Metadata {
                path: meta_path,
                message: e.to_string(),
            })?
        } else {
            let grid = detect_grid(&root)?;
            warn!(
                root = %root.display(),
                grid,
                "Layer has no metadata; detected grid size, assuming zero overlap"
            );
            LayerMeta { grid, overlap: 0.0 }
        };

        if meta.grid == 0 {
            return Err(LayerError::Metadata {
                path: root.join(METADATA_FILENAME),
                message: "grid size must be >= 1".into(),
            });
        }
        if !meta.overlap.is_finite() || !(0.0..0.49).contains(&meta.overlap) {
            return Err(LayerError::Metadata {
                path: root.join(METADATA_FILENAME),
                message: format!("overlap {} outside [0, 0.49)", meta.overlap),
            });
        }

        Ok(Self { root, meta })
    }

    /// The layer's root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Grid parameters of this layer.
    pub fn meta(&self) -> LayerMeta {
        self.meta
    }

    /// Grid size N.
    #[inline]
    pub fn grid(&self) -> u32 {
        self.meta.grid
    }

    /// Overlap fraction the layer was rendered with.
    #[inline]
    pub fn overlap(&self) -> f64 {
        self.meta.overlap
    }

    /// Path of the tile image at column `x`, row `y`.
    pub fn tile_path(&self, x: u32, y: u32) -> PathBuf {
        self.root.join("0").join(x.to_string()).join(format!("{y}.png"))
    }

    /// Returns true if the tile image exists on disk.
    pub fn has_tile(&self, x: u32, y: u32) -> bool {
        self.tile_path(x, y).is_file()
    }

    /// Loads a tile image as RGB.
    pub fn load_tile(&self, x: u32, y: u32) -> Result<RgbImage, LayerError> {
        let path = self.tile_path(x, y);
        if !path.is_file() {
            return Err(LayerError::MissingTile {
                x,
                y,
                layer: self.root.clone(),
            });
        }
        let img = image::open(&path).map_err(|e| LayerError::Image {
            path,
            message: e.to_string(),
        })?;
        Ok(img.to_rgb8())
    }

    /// Saves a tile image as PNG, creating parent directories as needed.
    pub fn save_tile(&self, x: u32, y: u32, img: &RgbImage) -> Result<(), LayerError> {
        let path = self.tile_path(x, y);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| LayerError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        img.save(&path).map_err(|e| LayerError::Image {
            path,
            message: e.to_string(),
        })?;
        Ok(())
    }

    /// Per-side context margin in pixels for a tile image axis of
    /// `size_px` pixels.
    pub fn margin_px(&self, size_px: u32) -> u32 {
        crop_margin_px(size_px, self.meta.overlap)
    }

    /// Pixel dimensions of the first tile found, scanning row-major.
    ///
    /// All tiles in a layer share one size; the first one stands in for
    /// the rest.
    pub fn first_tile_size(&self) -> Result<(u32, u32), LayerError> {
        for y in 0..self.meta.grid {
            for x in 0..self.meta.grid {
                if self.has_tile(x, y) {
                    let img = self.load_tile(x, y)?;
                    return Ok((img.width(), img.height()));
                }
            }
        }
        Err(LayerError::MissingTile {
            x: 0,
            y: 0,
            layer: self.root.clone(),
        })
    }

    /// Copies every tile PNG (and the metadata) into a new layer directory.
    ///
    /// Seam repair writes a fresh layer rather than mutating its input;
    /// this is the bulk copy that seeds it. Returns the new layer and the
    /// number of tiles copied.
    pub fn copy_to(&self, dst_root: impl Into<PathBuf>) -> Result<(LayerDir, usize), LayerError> {
        let dst = LayerDir::create(dst_root, self.meta)?;
        let mut copied = 0;

        for y in 0..self.meta.grid {
            for x in 0..self.meta.grid {
                let src = self.tile_path(x, y);
                if !src.is_file() {
                    continue;
                }
                let dst_path = dst.tile_path(x, y);
                if let Some(parent) = dst_path.parent() {
                    fs::create_dir_all(parent).map_err(|e| LayerError::Io {
                        path: parent.to_path_buf(),
                        source: e,
                    })?;
                }
                fs::copy(&src, &dst_path).map_err(|e| LayerError::Io {
                    path: dst_path,
                    source: e,
                })?;
                copied += 1;
            }
        }

        debug!(src = %self.root.display(), dst = %dst.root.display(), copied, "Copied layer");
        Ok((dst, copied))
    }
}

/// Per-side crop margin in pixels for a context image rendered with
/// fractional overlap `f` per side: `round(size_px * f / (1 + 2f))`.
pub fn crop_margin_px(size_px: u32, overlap: f64) -> u32 {
    if overlap <= 0.0 {
        return 0;
    }
    let frac = overlap / (1.0 + 2.0 * overlap);
    (size_px as f64 * frac).round() as u32
}

/// Detects the grid size from a `0/<x>/<y>.png` tree (max index + 1;
/// a dense 0..N-1 range is assumed).
fn detect_grid(root: &Path) -> Result<u32, LayerError> {
    let z0 = root.join("0");
    let entries = fs::read_dir(&z0).map_err(|e| LayerError::Io {
        path: z0.clone(),
        source: e,
    })?;

    let mut max_x: Option<u32> = None;
    let mut max_y: Option<u32> = None;

    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(x) = name.to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        if !entry.path().is_dir() {
            continue;
        }
        max_x = Some(max_x.map_or(x, |m| m.max(x)));

        let files = fs::read_dir(entry.path()).map_err(|e| LayerError::Io {
            path: entry.path(),
            source: e,
        })?;
        for file in files.flatten() {
            let name = file.file_name();
            let Some(stem) = name
                .to_str()
                .and_then(|s| s.strip_suffix(".png"))
                .and_then(|s| s.parse::<u32>().ok())
            else {
                continue;
            };
            max_y = Some(max_y.map_or(stem, |m| m.max(stem)));
        }
    }

    match (max_x, max_y) {
        (Some(x), Some(y)) => Ok(x.max(y) + 1),
        _ => Err(LayerError::MissingLayer(root.to_path_buf())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::TempDir;

    fn solid_tile(w: u32, h: u32, rgb: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(w, h, Rgb(rgb))
    }

    fn make_layer(dir: &Path, grid: u32, overlap: f64, size: u32) -> LayerDir {
        let layer = LayerDir::create(dir, LayerMeta { grid, overlap }).unwrap();
        for y in 0..grid {
            for x in 0..grid {
                let shade = (40 * (y * grid + x + 1)) as u8;
                layer
                    .save_tile(x, y, &solid_tile(size, size, [shade, shade, shade]))
                    .unwrap();
            }
        }
        layer
    }

    #[test]
    fn test_create_open_roundtrip() {
        let dir = TempDir::new().unwrap();
        make_layer(dir.path(), 3, 0.1, 32);

        let opened = LayerDir::open(dir.path()).unwrap();
        assert_eq!(opened.grid(), 3);
        assert!((opened.overlap() - 0.1).abs() < 1e-12);
        assert_eq!(opened.first_tile_size().unwrap(), (32, 32));
    }

    #[test]
    fn test_open_missing_layer() {
        let dir = TempDir::new().unwrap();
        let result = LayerDir::open(dir.path().join("nope"));
        assert!(matches!(result, Err(LayerError::MissingLayer(_))));
    }

    #[test]
    fn test_missing_tile_error() {
        let dir = TempDir::new().unwrap();
        let layer = LayerDir::create(dir.path(), LayerMeta { grid: 2, overlap: 0.0 }).unwrap();
        let result = layer.load_tile(1, 1);
        assert!(matches!(
            result,
            Err(LayerError::MissingTile { x: 1, y: 1, .. })
        ));
    }

    #[test]
    fn test_tile_roundtrip_preserves_pixels() {
        let dir = TempDir::new().unwrap();
        let layer = LayerDir::create(dir.path(), LayerMeta { grid: 1, overlap: 0.0 }).unwrap();
        let img = solid_tile(16, 16, [200, 30, 90]);
        layer.save_tile(0, 0, &img).unwrap();

        let back = layer.load_tile(0, 0).unwrap();
        assert_eq!(back, img);
    }

    #[test]
    fn test_grid_detection_without_metadata() {
        let dir = TempDir::new().unwrap();
        make_layer(dir.path(), 3, 0.0, 8);
        fs::remove_file(dir.path().join(METADATA_FILENAME)).unwrap();

        let opened = LayerDir::open(dir.path()).unwrap();
        assert_eq!(opened.grid(), 3);
        assert_eq!(opened.overlap(), 0.0);
    }

    #[test]
    fn test_crop_margin_px() {
        // overlap 0.1 over a 120px tile: 0.1/1.2 * 120 = 10
        assert_eq!(crop_margin_px(120, 0.1), 10);
        assert_eq!(crop_margin_px(120, 0.0), 0);
        // overlap 0.25 over 96px: 0.25/1.5 * 96 = 16
        assert_eq!(crop_margin_px(96, 0.25), 16);
    }

    #[test]
    fn test_copy_to_clones_tiles() {
        let dir = TempDir::new().unwrap();
        let src = make_layer(&dir.path().join("src"), 2, 0.1, 8);

        let (dst, copied) = src.copy_to(dir.path().join("dst")).unwrap();
        assert_eq!(copied, 4);
        assert_eq!(dst.grid(), 2);

        for y in 0..2 {
            for x in 0..2 {
                assert_eq!(dst.load_tile(x, y).unwrap(), src.load_tile(x, y).unwrap());
            }
        }
    }

    #[test]
    fn test_invalid_metadata_rejected() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("0")).unwrap();
        fs::write(
            dir.path().join(METADATA_FILENAME),
            br#"{"grid": 3, "overlap": 0.9}"#,
        )
        .unwrap();

        assert!(matches!(
            LayerDir::open(dir.path()),
            Err(LayerError::Metadata { .. })
        ));
    }
}
