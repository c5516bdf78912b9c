//! Rolling-ball background estimation.
//!
//! The background under a pixel is the highest position a ball of the given
//! radius can reach from below without crossing the intensity surface:
//!
//! `background(p) = min over |o| <= r of image(p + o) + (r - sqrt(r^2 - |o|^2))`
//!
//! Offsets falling outside the image are ignored. The estimate never exceeds
//! the image itself, so `image - background` is non-negative.

use ndarray::{Array2, ArrayView2, Axis};
use rayon::prelude::*;

/// One kernel offset with the ball's height deficit at that offset.
#[derive(Debug, Clone, Copy)]
struct BallOffset {
    dy: isize,
    dx: isize,
    lift: f32,
}

fn ball_kernel(radius: f64) -> Vec<BallOffset> {
    let reach = radius.ceil() as isize;
    let r2 = radius * radius;
    let mut offsets = Vec::with_capacity(((2 * reach + 1) * (2 * reach + 1)) as usize);

    for dy in -reach..=reach {
        for dx in -reach..=reach {
            let d2 = (dy * dy + dx * dx) as f64;
            if d2 > r2 {
                continue;
            }
            offsets.push(BallOffset {
                dy,
                dx,
                lift: (radius - (r2 - d2).sqrt()) as f32,
            });
        }
    }

    offsets
}

/// Estimate the rolling-ball background of one plane.
///
/// A non-positive radius yields the plane itself (zero background after
/// subtraction). Rows are processed in parallel.
pub fn rolling_ball_background(plane: ArrayView2<f32>, radius: f64) -> Array2<f32> {
    let (height, width) = plane.dim();
    if radius <= 0.0 || height == 0 || width == 0 {
        return plane.to_owned();
    }

    let kernel = ball_kernel(radius);
    let mut background = Array2::<f32>::zeros((height, width));

    background
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(y, mut row)| {
            for x in 0..width {
                let mut lowest = f32::INFINITY;
                for k in &kernel {
                    let yy = y as isize + k.dy;
                    let xx = x as isize + k.dx;
                    if yy < 0 || xx < 0 || yy >= height as isize || xx >= width as isize {
                        continue;
                    }
                    let value = plane[[yy as usize, xx as usize]] + k.lift;
                    if value < lowest {
                        lowest = value;
                    }
                }
                row[x] = lowest;
            }
        });

    background
}

/// Subtract the rolling-ball background and clip into the 8-bit range.
///
/// Values are clipped to `[0, 255]` and truncated, matching a cast of the
/// clipped difference to `u8`.
pub fn subtract_background_u8(plane: ArrayView2<f32>, radius: f64) -> Array2<f32> {
    let background = rolling_ball_background(plane, radius);
    let mut out = plane.to_owned() - &background;
    out.mapv_inplace(|v| v.clamp(0.0, 255.0).trunc());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_kernel_is_a_disk() {
        let kernel = ball_kernel(2.0);
        // Lattice points with dy^2 + dx^2 <= 4
        assert_eq!(kernel.len(), 13);
        let center = kernel.iter().find(|k| k.dy == 0 && k.dx == 0).unwrap();
        assert_eq!(center.lift, 0.0);
        let rim = kernel.iter().find(|k| k.dy == 0 && k.dx == 2).unwrap();
        assert_eq!(rim.lift, 2.0);
    }

    #[test]
    fn test_flat_image_has_flat_background() {
        let plane = Array2::<f32>::from_elem((5, 5), 40.0);
        let background = rolling_ball_background(plane.view(), 3.0);
        assert!(background.iter().all(|&v| (v - 40.0).abs() < 1e-6));
    }

    #[test]
    fn test_background_never_exceeds_image() {
        let plane = array![
            [10.0f32, 12.0, 11.0, 10.0],
            [10.0, 90.0, 95.0, 10.0],
            [11.0, 92.0, 99.0, 12.0],
            [10.0, 10.0, 11.0, 10.0],
        ];
        let background = rolling_ball_background(plane.view(), 5.0);

        for (b, p) in background.iter().zip(plane.iter()) {
            assert!(b <= p);
        }
    }

    #[test]
    fn test_narrow_peak_is_kept() {
        let mut plane = Array2::<f32>::from_elem((9, 9), 20.0);
        plane[[4, 4]] = 120.0;

        let out = subtract_background_u8(plane.view(), 3.0);

        // The ball cannot enter a one-pixel spike; its nearest rim sits
        // 3 - sqrt(8) above the floor.
        assert_eq!(out[[4, 4]], 99.0);
        assert_eq!(out[[0, 0]], 0.0);
        assert_eq!(out[[4, 0]], 0.0);
    }

    #[test]
    fn test_subtraction_clips_to_u8_range() {
        let mut plane = Array2::<f32>::zeros((5, 5));
        plane[[2, 2]] = 1000.0;

        let out = subtract_background_u8(plane.view(), 2.0);
        assert_eq!(out[[2, 2]], 255.0);
    }

    #[test]
    fn test_zero_radius_removes_everything() {
        let plane = array![[3.0f32, 7.0], [1.0, 9.0]];
        let out = subtract_background_u8(plane.view(), 0.0);
        assert!(out.iter().all(|&v| v == 0.0));
    }
}
