//! In-memory image value shared by readers, filters, and writers.
//!
//! An [`Image`] is a stack of grayscale planes with shape
//! `(planes, height, width)` and one element type for the whole stack.

use ndarray::{Array2, Array3, ArrayView2, Axis};
use thiserror::Error;

/// Errors raised when building or converting images.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Pixel buffer of {len} elements does not match shape {shape:?}")]
    ShapeMismatch {
        len: usize,
        shape: (usize, usize, usize),
    },

    #[error("Plane index {index} out of range for {planes} planes")]
    PlaneOutOfRange { index: usize, planes: usize },
}

/// Result type for image operations.
pub type Result<T> = std::result::Result<T, ImageError>;

/// Element type of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelType {
    U8,
    U16,
    F32,
}

impl PixelType {
    /// Bits per sample.
    pub fn bits(self) -> u8 {
        match self {
            PixelType::U8 => 8,
            PixelType::U16 => 16,
            PixelType::F32 => 32,
        }
    }
}

/// Typed pixel storage, indexed `[plane, row, column]`.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelData {
    U8(Array3<u8>),
    U16(Array3<u16>),
    F32(Array3<f32>),
}

/// A grayscale image stack.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    data: PixelData,
}

impl Image {
    pub fn new(data: PixelData) -> Self {
        Self { data }
    }

    pub fn from_u8(shape: (usize, usize, usize), pixels: Vec<u8>) -> Result<Self> {
        let len = pixels.len();
        Array3::from_shape_vec(shape, pixels)
            .map(|a| Self::new(PixelData::U8(a)))
            .map_err(|_| ImageError::ShapeMismatch { len, shape })
    }

    pub fn from_u16(shape: (usize, usize, usize), pixels: Vec<u16>) -> Result<Self> {
        let len = pixels.len();
        Array3::from_shape_vec(shape, pixels)
            .map(|a| Self::new(PixelData::U16(a)))
            .map_err(|_| ImageError::ShapeMismatch { len, shape })
    }

    pub fn from_f32(shape: (usize, usize, usize), pixels: Vec<f32>) -> Result<Self> {
        let len = pixels.len();
        Array3::from_shape_vec(shape, pixels)
            .map(|a| Self::new(PixelData::F32(a)))
            .map_err(|_| ImageError::ShapeMismatch { len, shape })
    }

    #[inline]
    pub fn data(&self) -> &PixelData {
        &self.data
    }

    #[inline]
    pub fn into_data(self) -> PixelData {
        self.data
    }

    /// Shape as `(planes, height, width)`.
    pub fn shape(&self) -> (usize, usize, usize) {
        match &self.data {
            PixelData::U8(a) => a.dim(),
            PixelData::U16(a) => a.dim(),
            PixelData::F32(a) => a.dim(),
        }
    }

    #[inline]
    pub fn planes(&self) -> usize {
        self.shape().0
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.shape().1
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.shape().2
    }

    pub fn pixel_type(&self) -> PixelType {
        match &self.data {
            PixelData::U8(_) => PixelType::U8,
            PixelData::U16(_) => PixelType::U16,
            PixelData::F32(_) => PixelType::F32,
        }
    }

    /// Minimum and maximum sample over all planes, or `None` when empty.
    ///
    /// NaN samples are ignored.
    pub fn min_max(&self) -> Option<(f64, f64)> {
        fn fold<I: Iterator<Item = f64>>(values: I) -> Option<(f64, f64)> {
            values.filter(|v| !v.is_nan()).fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
        }

        match &self.data {
            PixelData::U8(a) => fold(a.iter().map(|&v| v as f64)),
            PixelData::U16(a) => fold(a.iter().map(|&v| v as f64)),
            PixelData::F32(a) => fold(a.iter().map(|&v| v as f64)),
        }
    }

    /// Largest absolute sample value, 0 for an empty image.
    pub fn max_abs(&self) -> f64 {
        self.min_max()
            .map(|(lo, hi)| lo.abs().max(hi.abs()))
            .unwrap_or(0.0)
    }

    /// Convert the whole stack to `f32`.
    pub fn to_f32(&self) -> Array3<f32> {
        match &self.data {
            PixelData::U8(a) => a.mapv(|v| v as f32),
            PixelData::U16(a) => a.mapv(|v| v as f32),
            PixelData::F32(a) => a.clone(),
        }
    }

    /// One plane converted to `f32`.
    pub fn plane_f32(&self, index: usize) -> Result<Array2<f32>> {
        let planes = self.planes();
        if index >= planes {
            return Err(ImageError::PlaneOutOfRange { index, planes });
        }

        Ok(match &self.data {
            PixelData::U8(a) => a.index_axis(Axis(0), index).mapv(|v| v as f32),
            PixelData::U16(a) => a.index_axis(Axis(0), index).mapv(|v| v as f32),
            PixelData::F32(a) => a.index_axis(Axis(0), index).to_owned(),
        })
    }

    /// Apply `f` to every plane (as `f32`) and cast back to `target`.
    pub fn map_planes<F>(&self, target: PixelType, mut f: F) -> Image
    where
        F: FnMut(ArrayView2<f32>) -> Array2<f32>,
    {
        let stack = self.to_f32();
        let (planes, height, width) = stack.dim();
        let mut out = Array3::<f32>::zeros((planes, height, width));

        for (src, mut dst) in stack.outer_iter().zip(out.outer_iter_mut()) {
            dst.assign(&f(src));
        }

        Image::cast_from_f32(out, target)
    }

    /// Cast an `f32` stack into `target`, rounding and saturating for
    /// integer types.
    pub fn cast_from_f32(stack: Array3<f32>, target: PixelType) -> Image {
        let data = match target {
            PixelType::U8 => PixelData::U8(stack.mapv(|v| saturate_round(v, u8::MAX as f32) as u8)),
            PixelType::U16 => {
                PixelData::U16(stack.mapv(|v| saturate_round(v, u16::MAX as f32) as u16))
            }
            PixelType::F32 => PixelData::F32(stack),
        };
        Image::new(data)
    }
}

#[inline]
fn saturate_round(v: f32, max: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        v.round().clamp(0.0, max)
    }
}
