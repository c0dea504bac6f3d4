//! Seam and intersection geometry.
//!
//! All band math works in tile-image pixel coordinates. For a vertical
//! seam between tiles `(x, y)` and `(x+1, y)`, the shared core edge sits
//! at `w - mx` in the left image and at `mx` in the right image, where
//! `mx` is the per-side overlap margin. Both tiles rendered the same
//! ground either side of that line, which is what makes a combined patch
//! coherent enough to regenerate.
//!
//! Write-back is intentionally narrower than the mask: regenerated
//! pixels near the mask edge blend toward the untouched context, and
//! only the inner band is trusted enough to commit.

use super::report::SkipReason;
use serde::{Deserialize, Serialize};

/// Seam orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeamKind {
    #[serde(rename = "v")]
    Vertical,
    #[serde(rename = "h")]
    Horizontal,
}

/// Identifies one seam by its first (west or north) tile.
///
/// Vertical: between `(x, y)` and `(x+1, y)`. Horizontal: between
/// `(x, y)` and `(x, y+1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeamId {
    pub kind: SeamKind,
    pub x: u32,
    pub y: u32,
}

impl std::fmt::Display for SeamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let k = match self.kind {
            SeamKind::Vertical => "v",
            SeamKind::Horizontal => "h",
        };
        write!(f, "{k}({},{})", self.x, self.y)
    }
}

/// Identifies the four-tile corner shared by `(x, y)`, `(x+1, y)`,
/// `(x, y+1)` and `(x+1, y+1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntersectionId {
    pub x: u32,
    pub y: u32,
}

impl std::fmt::Display for IntersectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "x({},{})", self.x, self.y)
    }
}

/// Axis-aligned pixel rectangle, half-open on both axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl Rect {
    pub fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }
}

/// All seams of an N x N grid: every vertical seam first (north rows
/// first, west to east), then every horizontal seam.
pub fn enumerate_seams(n: u32) -> Vec<SeamId> {
    let mut seams = Vec::with_capacity((2 * n * n.saturating_sub(1)) as usize);
    for y in 0..n {
        for x in 0..n.saturating_sub(1) {
            seams.push(SeamId {
                kind: SeamKind::Vertical,
                x,
                y,
            });
        }
    }
    for y in 0..n.saturating_sub(1) {
        for x in 0..n {
            seams.push(SeamId {
                kind: SeamKind::Horizontal,
                x,
                y,
            });
        }
    }
    seams
}

/// All four-tile corners of an N x N grid, row-major.
pub fn enumerate_intersections(n: u32) -> Vec<IntersectionId> {
    let m = n.saturating_sub(1);
    let mut out = Vec::with_capacity((m * m) as usize);
    for y in 0..m {
        for x in 0..m {
            out.push(IntersectionId { x, y });
        }
    }
    out
}

/// Cropping, masking and write-back geometry for one seam.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeamPlan {
    /// Strip cropped from the first (west/north) tile
    pub a_crop: Rect,
    /// Strip cropped from the second (east/south) tile
    pub b_crop: Rect,
    /// Seam position along the cross axis, in patch coordinates
    pub split: u32,
    /// Effective mask half-width
    pub mask_half: u32,
    /// Effective write-back half-width (<= mask_half)
    pub write_half: u32,
    /// Patch region committed to the first tile
    pub a_patch_src: Rect,
    /// Patch region committed to the second tile
    pub b_patch_src: Rect,
    /// Destination origin in the first tile
    pub a_dest: (u32, u32),
    /// Destination origin in the second tile
    pub b_dest: (u32, u32),
    /// Mask band in patch coordinates
    pub mask: Rect,
    /// Combined patch size
    pub patch_size: (u32, u32),
}

/// Band parameters shared by both orientations.
#[derive(Debug, Clone, Copy)]
pub struct BandParams {
    pub seam_context: u32,
    pub mask_half: u32,
    pub write_half: u32,
}

/// Plans a vertical seam in `w x h` tile images with margins `(mx, my)`.
pub fn plan_vertical(
    w: u32,
    h: u32,
    mx: u32,
    my: u32,
    bands: BandParams,
) -> Result<SeamPlan, SkipReason> {
    if mx == 0 {
        return Err(SkipReason::InvalidContext);
    }
    let top = my;
    let bottom = h.saturating_sub(my);
    if bottom <= top {
        return Err(SkipReason::InvalidCore);
    }

    let sc = bands.seam_context as i64;
    let (w_i, mx_i) = (w as i64, mx as i64);
    let lc0 = (w_i - mx_i - sc).max(0) as u32;
    let lc1 = ((w_i - mx_i + sc).min(w_i)) as u32;
    let rc0 = (mx_i - sc).max(0) as u32;
    let rc1 = ((mx_i + sc).min(w_i)) as u32;
    if lc1 <= lc0 || rc1 <= rc0 {
        return Err(SkipReason::InvalidContext);
    }

    let patch_h = bottom - top;
    if patch_h == 0 {
        return Err(SkipReason::EmptyPatch);
    }
    let split = lc1 - lc0;
    let patch_w = split + (rc1 - rc0);

    let (mhalf, whalf) = clamp_halves(split, patch_w, bands)?;

    Ok(SeamPlan {
        a_crop: Rect { x0: lc0, y0: top, x1: lc1, y1: bottom },
        b_crop: Rect { x0: rc0, y0: top, x1: rc1, y1: bottom },
        split,
        mask_half: mhalf,
        write_half: whalf,
        a_patch_src: Rect { x0: split - whalf, y0: 0, x1: split, y1: patch_h },
        b_patch_src: Rect { x0: split, y0: 0, x1: split + whalf, y1: patch_h },
        a_dest: (w - mx - whalf, top),
        b_dest: (mx, top),
        mask: Rect {
            x0: split - mhalf,
            y0: 0,
            x1: (split + mhalf + 1).min(patch_w),
            y1: patch_h,
        },
        patch_size: (patch_w, patch_h),
    })
}

/// Plans a horizontal seam; the transpose of [`plan_vertical`].
pub fn plan_horizontal(
    w: u32,
    h: u32,
    mx: u32,
    my: u32,
    bands: BandParams,
) -> Result<SeamPlan, SkipReason> {
    if my == 0 {
        return Err(SkipReason::InvalidContext);
    }
    let left = mx;
    let right = w.saturating_sub(mx);
    if right <= left {
        return Err(SkipReason::InvalidCore);
    }

    let sc = bands.seam_context as i64;
    let (h_i, my_i) = (h as i64, my as i64);
    let tc0 = (h_i - my_i - sc).max(0) as u32;
    let tc1 = ((h_i - my_i + sc).min(h_i)) as u32;
    let bc0 = (my_i - sc).max(0) as u32;
    let bc1 = ((my_i + sc).min(h_i)) as u32;
    if tc1 <= tc0 || bc1 <= bc0 {
        return Err(SkipReason::InvalidContext);
    }

    let patch_w = right - left;
    if patch_w == 0 {
        return Err(SkipReason::EmptyPatch);
    }
    let split = tc1 - tc0;
    let patch_h = split + (bc1 - bc0);

    let (mhalf, whalf) = clamp_halves(split, patch_h, bands)?;

    Ok(SeamPlan {
        a_crop: Rect { x0: left, y0: tc0, x1: right, y1: tc1 },
        b_crop: Rect { x0: left, y0: bc0, x1: right, y1: bc1 },
        split,
        mask_half: mhalf,
        write_half: whalf,
        a_patch_src: Rect { x0: 0, y0: split - whalf, x1: patch_w, y1: split },
        b_patch_src: Rect { x0: 0, y0: split, x1: patch_w, y1: split + whalf },
        a_dest: (left, h - my - whalf),
        b_dest: (left, my),
        mask: Rect {
            x0: 0,
            y0: split - mhalf,
            x1: patch_w,
            y1: (split + mhalf + 1).min(patch_h),
        },
        patch_size: (patch_w, patch_h),
    })
}

/// Clamps the mask and write halves to the patch, enforcing
/// `write_half <= mask_half`.
fn clamp_halves(split: u32, patch_extent: u32, bands: BandParams) -> Result<(u32, u32), SkipReason> {
    let half_limit = split.min(patch_extent - split) as i64 - 1;
    if half_limit <= 0 {
        return Err(SkipReason::TinyPatch);
    }
    let limit = half_limit as u32;
    let mhalf = bands.mask_half.clamp(1, limit);
    let whalf = bands.write_half.clamp(1, limit).min(mhalf);
    Ok((mhalf, whalf))
}

/// Geometry for one four-tile intersection patch.
///
/// The patch is a `2*half` square assembled from each tile's own corner
/// quadrant; each tile then takes back only the `write_half` square
/// nearest the shared corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntersectionPlan {
    pub half: u32,
    pub write_half: u32,
    /// Source rects in the TL, TR, BL, BR tiles
    pub crops: [Rect; 4],
    /// Quadrant origins in the patch, same order
    pub patch_origins: [(u32, u32); 4],
    /// (patch source rect, tile destination origin), same order
    pub writes: [(Rect, (u32, u32)); 4],
    pub patch_size: (u32, u32),
}

/// Smallest usable intersection patch edge, matching the seam pass floor.
const MIN_INTERSECTION_PATCH: u32 = 16;

/// Plans an intersection in `w x h` tile images with margins `(mx, my)`.
pub fn plan_intersection(
    w: u32,
    h: u32,
    mx: u32,
    my: u32,
    half: u32,
    write_half: u32,
) -> Result<IntersectionPlan, SkipReason> {
    if mx == 0 || my == 0 {
        return Err(SkipReason::InvalidContext);
    }
    // The quadrant must fit on both sides of each tile's corner line.
    let max_half = (w - mx).min(h - my).min(w).min(h);
    let half = half.min(max_half);
    if 2 * half < MIN_INTERSECTION_PATCH {
        return Err(SkipReason::TinyPatch);
    }
    let wih = write_half.clamp(1, half);

    // Corner line sits at (w - mx, h - my) in the TL tile, (mx, h - my)
    // in the TR tile, and so on.
    let crops = [
        Rect { x0: w - mx - half, y0: h - my - half, x1: w - mx, y1: h - my },
        Rect { x0: mx, y0: h - my - half, x1: mx + half, y1: h - my },
        Rect { x0: w - mx - half, y0: my, x1: w - mx, y1: my + half },
        Rect { x0: mx, y0: my, x1: mx + half, y1: my + half },
    ];
    let patch_origins = [(0, 0), (half, 0), (0, half), (half, half)];
    let writes = [
        (
            Rect { x0: half - wih, y0: half - wih, x1: half, y1: half },
            (w - mx - wih, h - my - wih),
        ),
        (
            Rect { x0: half, y0: half - wih, x1: half + wih, y1: half },
            (mx, h - my - wih),
        ),
        (
            Rect { x0: half - wih, y0: half, x1: half, y1: half + wih },
            (w - mx - wih, my),
        ),
        (
            Rect { x0: half, y0: half, x1: half + wih, y1: half + wih },
            (mx, my),
        ),
    ];

    Ok(IntersectionPlan {
        half,
        write_half: wih,
        crops,
        patch_origins,
        writes,
        patch_size: (2 * half, 2 * half),
    })
}

/// Quadratic radial falloff weights for a `w x h` patch: 1 at the
/// center, 0 at radius `min(w, h) / 2`, row-major.
pub fn radial_weights(w: u32, h: u32) -> Vec<f32> {
    let cx = (w as f32 - 1.0) * 0.5;
    let cy = (h as f32 - 1.0) * 0.5;
    let r = (0.5 * w.min(h) as f32).max(1.0);
    let inv_r = 1.0 / r;

    let mut out = Vec::with_capacity((w * h) as usize);
    for y in 0..h {
        let dy = y as f32 - cy;
        for x in 0..w {
            let dx = x as f32 - cx;
            let t = (1.0 - (dx * dx + dy * dy).sqrt() * inv_r).max(0.0);
            out.push(t * t);
        }
    }
    out
}

/// Auto seam context: bounded by the margins, never below 8 px.
pub fn auto_seam_context(mx: u32, my: u32) -> u32 {
    mx.min(my).min(64).max(8)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BANDS: BandParams = BandParams {
        seam_context: 8,
        mask_half: 16,
        write_half: 20,
    };

    #[test]
    fn test_enumeration_order_vertical_first() {
        let seams = enumerate_seams(3);
        assert_eq!(seams.len(), 12);
        assert_eq!(seams[0], SeamId { kind: SeamKind::Vertical, x: 0, y: 0 });
        assert_eq!(seams[5], SeamId { kind: SeamKind::Vertical, x: 1, y: 2 });
        assert_eq!(seams[6], SeamId { kind: SeamKind::Horizontal, x: 0, y: 0 });
        assert_eq!(seams[11], SeamId { kind: SeamKind::Horizontal, x: 2, y: 1 });

        assert_eq!(enumerate_intersections(3).len(), 4);
        assert_eq!(enumerate_seams(1), vec![]);
    }

    #[test]
    fn test_vertical_plan_bands() {
        // 48px tiles, margin 8, context 8.
        let plan = plan_vertical(48, 48, 8, 8, BANDS).unwrap();

        assert_eq!(plan.a_crop, Rect { x0: 32, y0: 8, x1: 48, y1: 40 });
        assert_eq!(plan.b_crop, Rect { x0: 0, y0: 8, x1: 16, y1: 40 });
        assert_eq!(plan.split, 16);
        assert_eq!(plan.patch_size, (32, 32));
        // half_limit = min(16, 16) - 1 = 15; both halves clamp to it.
        assert_eq!(plan.mask_half, 15);
        assert_eq!(plan.write_half, 15);
        // Left tile takes patch columns just west of the seam.
        assert_eq!(plan.a_patch_src, Rect { x0: 1, y0: 0, x1: 16, y1: 32 });
        assert_eq!(plan.a_dest, (25, 8));
        assert_eq!(plan.b_dest, (8, 8));
    }

    #[test]
    fn test_write_half_never_exceeds_mask_half() {
        let bands = BandParams {
            seam_context: 8,
            mask_half: 4,
            write_half: 20,
        };
        let plan = plan_vertical(48, 48, 8, 8, bands).unwrap();
        assert_eq!(plan.mask_half, 4);
        assert_eq!(plan.write_half, 4);
        // Write band sits inside the mask band.
        assert!(plan.a_patch_src.x0 >= plan.mask.x0);
        assert!(plan.b_patch_src.x1 <= plan.mask.x1);
    }

    #[test]
    fn test_horizontal_plan_mirrors_vertical() {
        let plan = plan_horizontal(48, 48, 8, 8, BANDS).unwrap();
        assert_eq!(plan.a_crop, Rect { x0: 8, y0: 32, x1: 48, y1: 48 });
        assert_eq!(plan.b_crop, Rect { x0: 8, y0: 0, x1: 48, y1: 16 });
        assert_eq!(plan.patch_size, (40, 32));
        assert_eq!(plan.a_dest, (8, 25));
        assert_eq!(plan.b_dest, (8, 8));
    }

    #[test]
    fn test_zero_margin_is_degenerate_context() {
        assert_eq!(
            plan_vertical(48, 48, 0, 0, BANDS),
            Err(SkipReason::InvalidContext)
        );
        assert_eq!(
            plan_horizontal(48, 48, 8, 0, BANDS),
            Err(SkipReason::InvalidContext)
        );
        assert_eq!(
            plan_intersection(48, 48, 0, 8, 32, 20),
            Err(SkipReason::InvalidContext)
        );
    }

    #[test]
    fn test_collapsed_core_skips() {
        // Margins meet in the middle: no core rows left.
        assert_eq!(
            plan_vertical(48, 48, 8, 24, BANDS),
            Err(SkipReason::InvalidCore)
        );
    }

    #[test]
    fn test_tiny_patch_skips() {
        let bands = BandParams {
            seam_context: 1,
            mask_half: 16,
            write_half: 20,
        };
        assert_eq!(
            plan_vertical(48, 48, 8, 8, bands),
            Err(SkipReason::TinyPatch)
        );
    }

    #[test]
    fn test_intersection_plan_quadrants() {
        let plan = plan_intersection(48, 48, 8, 8, 32, 20).unwrap();
        // half clamps to w - mx = 40.
        assert_eq!(plan.half, 32);
        assert_eq!(plan.patch_size, (64, 64));
        assert_eq!(plan.write_half, 20);

        // TL quadrant reaches exactly to the corner line at (40, 40).
        assert_eq!(plan.crops[0], Rect { x0: 8, y0: 8, x1: 40, y1: 40 });
        // BR quadrant starts at its corner line (8, 8).
        assert_eq!(plan.crops[3], Rect { x0: 8, y0: 8, x1: 40, y1: 40 });
        // TL write-back hugs the corner from inside.
        assert_eq!(plan.writes[0].1, (20, 20));
        assert_eq!(plan.writes[3].1, (8, 8));
    }

    #[test]
    fn test_radial_weights_shape() {
        let w = radial_weights(9, 9);
        assert_eq!(w.len(), 81);
        // Center is full weight, corner is zero.
        assert!((w[4 * 9 + 4] - 1.0).abs() < 1e-4);
        assert_eq!(w[0], 0.0);
        // Monotone decrease along the center row.
        assert!(w[4 * 9 + 4] > w[4 * 9 + 6]);
        assert!(w[4 * 9 + 6] > w[4 * 9 + 8]);
    }

    #[test]
    fn test_auto_seam_context() {
        assert_eq!(auto_seam_context(8, 8), 8);
        assert_eq!(auto_seam_context(100, 100), 64);
        assert_eq!(auto_seam_context(2, 3), 8, "floors at 8");
    }
}
