//! Contrast-limited adaptive histogram equalization (CLAHE).
//!
//! The plane is cut into a grid of tiles (each `1/tile_divisor` of the image
//! size). Every tile gets a clipped, equalized lookup table and each pixel is
//! mapped by bilinear interpolation between the four nearest tile tables.
//! The output is rescaled to `[0, 1]`.

use ndarray::{Array2, ArrayView2, Axis};
use rayon::prelude::*;

use crate::config::ContrastConfig;

struct TileGrid {
    tile_h: usize,
    tile_w: usize,
    rows: usize,
    cols: usize,
}

impl TileGrid {
    fn new(height: usize, width: usize, divisor: usize) -> Self {
        let tile_h = (height / divisor).max(1);
        let tile_w = (width / divisor).max(1);
        Self {
            tile_h,
            tile_w,
            rows: height.div_ceil(tile_h),
            cols: width.div_ceil(tile_w),
        }
    }

    /// Fractional tile coordinate of a pixel, measured between tile centers.
    fn locate(position: usize, tile: usize, count: usize) -> (usize, usize, f32) {
        let f = ((position as f32 + 0.5) / tile as f32 - 0.5).clamp(0.0, (count - 1) as f32);
        let lo = f.floor() as usize;
        let hi = (lo + 1).min(count - 1);
        (lo, hi, f - lo as f32)
    }
}

fn clip_histogram(hist: &mut [usize], limit: usize) {
    let mut excess = 0usize;
    for count in hist.iter_mut() {
        if *count > limit {
            excess += *count - limit;
            *count = limit;
        }
    }

    let nbins = hist.len();
    let increment = excess / nbins;
    let residual = excess % nbins;
    for count in hist.iter_mut() {
        *count += increment;
    }
    // Spread what is left evenly over the range.
    for i in 0..residual {
        hist[i * nbins / residual] += 1;
    }
}

/// Equalize one plane with CLAHE.
///
/// A constant plane maps to zeros.
pub fn equalize_adapthist(plane: ArrayView2<f32>, config: &ContrastConfig) -> Array2<f32> {
    let (height, width) = plane.dim();
    let nbins = config.nbins.max(2);
    let divisor = config.tile_divisor.max(1);

    let (min, max) = plane
        .iter()
        .filter(|v| !v.is_nan())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if height == 0 || width == 0 || !(max - min > f32::EPSILON) {
        return Array2::zeros((height, width));
    }

    let span = max - min;
    let bins: Array2<usize> = plane.mapv(|v| {
        if v.is_nan() {
            return 0;
        }
        (((v - min) / span * nbins as f32) as usize).min(nbins - 1)
    });

    let grid = TileGrid::new(height, width, divisor);
    let mut maps = vec![0f32; grid.rows * grid.cols * nbins];

    for ty in 0..grid.rows {
        for tx in 0..grid.cols {
            let y0 = ty * grid.tile_h;
            let x0 = tx * grid.tile_w;
            let y1 = (y0 + grid.tile_h).min(height);
            let x1 = (x0 + grid.tile_w).min(width);

            let mut hist = vec![0usize; nbins];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[bins[[y, x]]] += 1;
                }
            }

            let pixels = (y1 - y0) * (x1 - x0);
            let limit = ((config.clip_limit * pixels as f32) as usize).max(1);
            clip_histogram(&mut hist, limit);

            let table = &mut maps[(ty * grid.cols + tx) * nbins..][..nbins];
            let total: usize = hist.iter().sum();
            let mut running = 0usize;
            for (slot, count) in table.iter_mut().zip(&hist) {
                running += count;
                *slot = running as f32 / total.max(1) as f32;
            }
        }
    }

    let mut out = Array2::<f32>::zeros((height, width));
    out.axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(y, mut row)| {
            let (ty0, ty1, wy) = TileGrid::locate(y, grid.tile_h, grid.rows);
            for x in 0..width {
                let (tx0, tx1, wx) = TileGrid::locate(x, grid.tile_w, grid.cols);
                let bin = bins[[y, x]];
                let lookup = |ty: usize, tx: usize| maps[(ty * grid.cols + tx) * nbins + bin];

                let top = lookup(ty0, tx0) * (1.0 - wx) + lookup(ty0, tx1) * wx;
                let bottom = lookup(ty1, tx0) * (1.0 - wx) + lookup(ty1, tx1) * wx;
                row[x] = top * (1.0 - wy) + bottom * wy;
            }
        });

    rescale_unit(out)
}

fn rescale_unit(mut plane: Array2<f32>) -> Array2<f32> {
    let (min, max) = plane
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if !(max - min > f32::EPSILON) {
        plane.fill(0.0);
        return plane;
    }
    plane.mapv_inplace(|v| (v - min) / (max - min));
    plane
}
