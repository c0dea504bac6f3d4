//! In-memory tile buffers for a repair run.

use crate::layer::{LayerDir, LayerError};
use image::RgbImage;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Every tile of a layer loaded into shared, lockable buffers.
///
/// Each buffer carries its own mutex; repair holds a tile's lock only
/// for the brief crop and write-back phases, never across an external
/// regeneration call. Missing tiles are simply absent from the pool.
pub struct TileBufferPool {
    tiles: HashMap<(u32, u32), Arc<Mutex<RgbImage>>>,
}

impl TileBufferPool {
    /// Loads every existing tile of the layer.
    ///
    /// All repair geometry is planned from one tile size, so a tile that
    /// disagrees with the first loaded tile's dimensions is rejected
    /// rather than silently truncated at write-back.
    pub fn load(layer: &LayerDir) -> Result<Self, LayerError> {
        let mut tiles = HashMap::new();
        let mut expected: Option<(u32, u32)> = None;
        for y in 0..layer.grid() {
            for x in 0..layer.grid() {
                if layer.has_tile(x, y) {
                    let img = layer.load_tile(x, y)?;
                    let dims = img.dimensions();
                    match expected {
                        None => expected = Some(dims),
                        Some(want) if dims != want => {
                            return Err(LayerError::TileSizeMismatch {
                                x,
                                y,
                                got_w: dims.0,
                                got_h: dims.1,
                                want_w: want.0,
                                want_h: want.1,
                            });
                        }
                        Some(_) => {}
                    }
                    tiles.insert((x, y), Arc::new(Mutex::new(img)));
                }
            }
        }
        debug!(count = tiles.len(), "Loaded tile buffers");
        Ok(Self { tiles })
    }

    pub fn get(&self, x: u32, y: u32) -> Option<Arc<Mutex<RgbImage>>> {
        self.tiles.get(&(x, y)).cloned()
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        self.tiles.contains_key(&(x, y))
    }

    /// Writes every buffer back to the layer. Returns tiles written.
    pub fn flush(&self, layer: &LayerDir) -> Result<usize, LayerError> {
        let mut written = 0;
        for (&(x, y), buf) in &self.tiles {
            let img = buf.lock().expect("tile buffer mutex poisoned");
            layer.save_tile(x, y, &img)?;
            written += 1;
        }
        debug!(written, "Flushed tile buffers");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::LayerMeta;
    use image::Rgb;
    use tempfile::TempDir;

    #[test]
    fn test_load_mutate_flush() {
        let dir = TempDir::new().unwrap();
        let layer = LayerDir::create(dir.path(), LayerMeta { grid: 2, overlap: 0.0 }).unwrap();
        for y in 0..2 {
            for x in 0..2 {
                layer
                    .save_tile(x, y, &RgbImage::from_pixel(4, 4, Rgb([10, 10, 10])))
                    .unwrap();
            }
        }

        let pool = TileBufferPool::load(&layer).unwrap();
        {
            let buf = pool.get(1, 0).unwrap();
            let mut img = buf.lock().unwrap();
            img.put_pixel(0, 0, Rgb([250, 0, 0]));
        }
        assert_eq!(pool.flush(&layer).unwrap(), 4);

        let reloaded = layer.load_tile(1, 0).unwrap();
        assert_eq!(reloaded.get_pixel(0, 0).0, [250, 0, 0]);
        assert_eq!(layer.load_tile(0, 0).unwrap().get_pixel(0, 0).0, [10, 10, 10]);
    }

    #[test]
    fn test_stray_tile_size_rejected() {
        let dir = TempDir::new().unwrap();
        let layer = LayerDir::create(dir.path(), LayerMeta { grid: 2, overlap: 0.0 }).unwrap();
        for y in 0..2 {
            for x in 0..2 {
                layer
                    .save_tile(x, y, &RgbImage::from_pixel(4, 4, Rgb([10, 10, 10])))
                    .unwrap();
            }
        }
        layer
            .save_tile(1, 0, &RgbImage::from_pixel(3, 4, Rgb([10, 10, 10])))
            .unwrap();

        let result = TileBufferPool::load(&layer);
        assert!(matches!(
            result,
            Err(LayerError::TileSizeMismatch { x: 1, y: 0, got_w: 3, .. })
        ));
    }

    #[test]
    fn test_missing_tile_absent_from_pool() {
        let dir = TempDir::new().unwrap();
        let layer = LayerDir::create(dir.path(), LayerMeta { grid: 2, overlap: 0.0 }).unwrap();
        layer
            .save_tile(0, 0, &RgbImage::from_pixel(4, 4, Rgb([1, 1, 1])))
            .unwrap();

        let pool = TileBufferPool::load(&layer).unwrap();
        assert!(pool.contains(0, 0));
        assert!(!pool.contains(1, 1));
    }
}
