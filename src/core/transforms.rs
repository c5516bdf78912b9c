//! Pixel transforms applied by the filter stages.
//!
//! Heavier kernels live in their own modules: [`super::background`] for the
//! rolling-ball estimate and [`super::contrast`] for adaptive equalization.

use image::{ImageBuffer, Luma};
use imageproc::filter::gaussian_blur_f32;
use ndarray::{Array2, Array3, ArrayView2};
use thiserror::Error;

use super::image::{Image, PixelData, PixelType};

/// Errors raised by pixel transforms.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("Gaussian sigma must be positive and finite, got {0}")]
    InvalidSigma(f32),

    #[error("Plane of {width}x{height} does not fit an image buffer")]
    PlaneSize { width: usize, height: usize },
}

/// Result type for transform operations.
pub type Result<T> = std::result::Result<T, TransformError>;

/// Linearly rescale the full dynamic range of `image` to `0..=255`.
///
/// Each sample becomes `round((x - min) / (max - min) * 255)`, with min and
/// max taken over every plane. A constant (or empty) image maps to zeros.
/// The result is always 8-bit.
pub fn normalize_to_u8(image: &Image) -> Image {
    let shape = image.shape();

    let (min, max) = match image.min_max() {
        Some(range) => range,
        None => return Image::new(PixelData::U8(Array3::zeros(shape))),
    };

    let span = max - min;
    if span <= f64::EPSILON {
        return Image::new(PixelData::U8(Array3::zeros(shape)));
    }
    let scaled = |x: f64| -> u8 {
        if x.is_nan() {
            return 0;
        }
        ((x - min) / span * 255.0).round().clamp(0.0, 255.0) as u8
    };

    let data = match image.data() {
        PixelData::U8(a) => a.mapv(|v| scaled(v as f64)),
        PixelData::U16(a) => a.mapv(|v| scaled(v as f64)),
        PixelData::F32(a) => a.mapv(|v| scaled(v as f64)),
    };

    Image::new(PixelData::U8(data))
}

/// Gaussian-smooth one plane.
pub fn gaussian_plane(plane: ArrayView2<f32>, sigma: f32) -> Result<Array2<f32>> {
    let (height, width) = plane.dim();
    let buffer: ImageBuffer<Luma<f32>, Vec<f32>> =
        ImageBuffer::from_raw(width as u32, height as u32, plane.iter().copied().collect())
            .ok_or(TransformError::PlaneSize { width, height })?;

    let blurred = gaussian_blur_f32(&buffer, sigma);

    Array2::from_shape_vec((height, width), blurred.into_raw())
        .map_err(|_| TransformError::PlaneSize { width, height })
}

/// Gaussian-smooth every plane of `image`, keeping its pixel type.
///
/// Smoothing is two-dimensional; planes of a stack are filtered
/// independently.
pub fn gaussian_smooth(image: &Image, sigma: f32) -> Result<Image> {
    if !(sigma.is_finite() && sigma > 0.0) {
        return Err(TransformError::InvalidSigma(sigma));
    }

    let mut failure = None;
    let smoothed = image.map_planes(image.pixel_type(), |plane| {
        match gaussian_plane(plane, sigma) {
            Ok(out) => out,
            Err(e) => {
                failure.get_or_insert(e);
                plane.to_owned()
            }
        }
    });

    match failure {
        Some(e) => Err(e),
        None => Ok(smoothed),
    }
}

/// Divide every sample by the largest absolute value, as `f32`.
///
/// An all-zero image is returned unchanged.
pub fn scale_by_max_abs(image: &Image) -> Image {
    let max_abs = image.max_abs() as f32;
    if max_abs == 0.0 {
        return Image::cast_from_f32(image.to_f32(), PixelType::F32);
    }
    Image::cast_from_f32(image.to_f32().mapv(|v| v / max_abs), PixelType::F32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u8_values(image: &Image) -> Vec<u8> {
        match image.data() {
            PixelData::U8(a) => a.iter().copied().collect(),
            other => panic!("expected u8 data, got {:?}", other),
        }
    }

    #[test]
    fn test_normalize_u16_full_range() {
        let image = Image::from_u16((1, 1, 5), vec![1000, 1500, 2000, 3000, 5000]).unwrap();
        let out = normalize_to_u8(&image);

        // (x - 1000) / 4000 * 255, rounded
        assert_eq!(u8_values(&out), vec![0, 32, 64, 128, 255]);
    }

    #[test]
    fn test_normalize_matches_formula() {
        let values: Vec<f32> = vec![-1.5, 0.0, 0.3, 2.7, 10.0];
        let image = Image::from_f32((1, 1, 5), values.clone()).unwrap();
        let out = normalize_to_u8(&image);

        let (min, max) = (-1.5f64, 10.0f64);
        let expected: Vec<u8> = values
            .iter()
            .map(|&x| ((x as f64 - min) / (max - min) * 255.0).round() as u8)
            .collect();
        assert_eq!(u8_values(&out), expected);
    }

    #[test]
    fn test_normalize_uses_global_range_across_planes() {
        let image = Image::from_u16((2, 1, 2), vec![0, 10, 20, 40]).unwrap();
        let out = normalize_to_u8(&image);
        assert_eq!(u8_values(&out), vec![0, 64, 128, 255]);
    }

    #[test]
    fn test_normalize_half_steps_round_up() {
        // 100 / 200 * 255 = 127.5 exactly
        let image = Image::from_u16((1, 1, 3), vec![0, 100, 200]).unwrap();
        assert_eq!(u8_values(&normalize_to_u8(&image)), vec![0, 128, 255]);

        let image = Image::from_u16((1, 1, 3), vec![0, 1, 2]).unwrap();
        assert_eq!(u8_values(&normalize_to_u8(&image)), vec![0, 128, 255]);
    }

    #[test]
    fn test_normalize_constant_image_is_zero() {
        let image = Image::from_u16((1, 2, 2), vec![700; 4]).unwrap();
        let out = normalize_to_u8(&image);

        assert_eq!(out.pixel_type(), PixelType::U8);
        assert_eq!(u8_values(&out), vec![0; 4]);
    }

    #[test]
    fn test_gaussian_keeps_type_and_mass() {
        let mut pixels = vec![0u16; 81];
        pixels[40] = 8100;
        let image = Image::from_u16((1, 9, 9), pixels).unwrap();

        let smoothed = gaussian_smooth(&image, 1.0).unwrap();

        assert_eq!(smoothed.pixel_type(), PixelType::U16);
        assert_eq!(smoothed.shape(), (1, 9, 9));
        let plane = smoothed.plane_f32(0).unwrap();
        assert!(plane[[4, 4]] < 8100.0);
        assert!(plane[[4, 5]] > 0.0);
        assert_eq!(plane[[4, 3]], plane[[4, 5]]);
    }

    #[test]
    fn test_gaussian_constant_plane_unchanged() {
        let image = Image::from_u8((1, 6, 6), vec![50; 36]).unwrap();
        let smoothed = gaussian_smooth(&image, 2.0).unwrap();
        assert_eq!(smoothed, image);
    }

    #[test]
    fn test_gaussian_rejects_bad_sigma() {
        let image = Image::from_u8((1, 2, 2), vec![0; 4]).unwrap();
        assert!(matches!(gaussian_smooth(&image, 0.0), Err(TransformError::InvalidSigma(_))));
        assert!(matches!(gaussian_smooth(&image, f32::NAN), Err(TransformError::InvalidSigma(_))));
    }

    #[test]
    fn test_scale_by_max_abs() {
        let image = Image::from_f32((1, 1, 3), vec![-4.0, 2.0, 1.0]).unwrap();
        let scaled = scale_by_max_abs(&image);
        assert_eq!(scaled.min_max(), Some((-1.0, 0.5)));

        let zeros = Image::from_u8((1, 1, 2), vec![0, 0]).unwrap();
        assert_eq!(scale_by_max_abs(&zeros).min_max(), Some((0.0, 0.0)));
    }
}
