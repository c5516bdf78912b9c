//! Multi-page grayscale TIFF reading and writing.
//!
//! Every page of a file becomes one plane of an [`Image`]; writing does the
//! reverse. Pages must share dimensions and sample type.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::ColorType;
use thiserror::Error;

use super::image::{Image, ImageError, PixelData};

/// Errors that can occur while reading or writing TIFF files.
#[derive(Debug, Error)]
pub enum TiffIoError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TIFF error on {path}: {source}")]
    Tiff {
        path: PathBuf,
        #[source]
        source: tiff::TiffError,
    },

    #[error("Unsupported TIFF layout in {path}: {detail}")]
    Unsupported { path: PathBuf, detail: String },

    #[error("Page {page} of {path} differs from the first page")]
    InconsistentPages { path: PathBuf, page: usize },

    #[error(transparent)]
    Image(#[from] ImageError),
}

/// Result type for TIFF operations.
pub type Result<T> = std::result::Result<T, TiffIoError>;

enum Samples {
    U8(Vec<u8>),
    U16(Vec<u16>),
    F32(Vec<f32>),
}

impl Samples {
    fn kind(&self) -> u8 {
        match self {
            Samples::U8(_) => 0,
            Samples::U16(_) => 1,
            Samples::F32(_) => 2,
        }
    }

    fn append(&mut self, other: Samples) -> bool {
        match (self, other) {
            (Samples::U8(a), Samples::U8(b)) => a.extend(b),
            (Samples::U16(a), Samples::U16(b)) => a.extend(b),
            (Samples::F32(a), Samples::F32(b)) => a.extend(b),
            _ => return false,
        }
        true
    }
}

/// Read every page of a grayscale TIFF into one image stack.
pub fn read_tiff(path: &Path) -> Result<Image> {
    let tiff_err = |e: tiff::TiffError| TiffIoError::Tiff {
        path: path.to_path_buf(),
        source: e,
    };

    let file = File::open(path).map_err(|e| TiffIoError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut decoder = Decoder::new(BufReader::new(file))
        .map_err(tiff_err)?
        .with_limits(Limits::unlimited());

    let mut pages = 0usize;
    let mut dims: Option<(u32, u32)> = None;
    let mut samples: Option<Samples> = None;

    loop {
        let page_dims = decoder.dimensions().map_err(tiff_err)?;
        match decoder.colortype().map_err(tiff_err)? {
            ColorType::Gray(_) => {}
            other => {
                return Err(TiffIoError::Unsupported {
                    path: path.to_path_buf(),
                    detail: format!("color type {:?}, expected grayscale", other),
                })
            }
        }

        let page = match decoder.read_image().map_err(tiff_err)? {
            DecodingResult::U8(v) => Samples::U8(v),
            DecodingResult::U16(v) => Samples::U16(v),
            DecodingResult::F32(v) => Samples::F32(v),
            DecodingResult::F64(v) => Samples::F32(v.into_iter().map(|x| x as f32).collect()),
            _ => {
                return Err(TiffIoError::Unsupported {
                    path: path.to_path_buf(),
                    detail: "sample format".to_string(),
                })
            }
        };

        match samples.as_mut() {
            Some(acc) => {
                if dims != Some(page_dims) || acc.kind() != page.kind() || !acc.append(page) {
                    return Err(TiffIoError::InconsistentPages {
                        path: path.to_path_buf(),
                        page: pages,
                    });
                }
            }
            None => {
                dims = Some(page_dims);
                samples = Some(page);
            }
        }
        pages += 1;

        if !decoder.more_images() {
            break;
        }
        decoder.next_image().map_err(tiff_err)?;
    }

    let (width, height) = dims.unwrap_or((0, 0));
    let shape = (pages, height as usize, width as usize);

    let image = match samples {
        Some(Samples::U8(v)) => Image::from_u8(shape, v)?,
        Some(Samples::U16(v)) => Image::from_u16(shape, v)?,
        Some(Samples::F32(v)) => Image::from_f32(shape, v)?,
        None => Image::from_u8((0, 0, 0), Vec::new())?,
    };

    Ok(image)
}

/// Write an image stack as a multi-page TIFF, one page per plane.
///
/// The file is created or truncated.
pub fn write_tiff(path: &Path, image: &Image) -> Result<()> {
    let tiff_err = |e: tiff::TiffError| TiffIoError::Tiff {
        path: path.to_path_buf(),
        source: e,
    };

    let file = File::create(path).map_err(|e| TiffIoError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut encoder = TiffEncoder::new(BufWriter::new(file)).map_err(tiff_err)?;

    let (_, height, width) = image.shape();
    let plane_len = height * width;
    let (w, h) = (width as u32, height as u32);

    match image.data() {
        PixelData::U8(a) => {
            let flat: Vec<u8> = a.iter().copied().collect();
            for plane in flat.chunks_exact(plane_len.max(1)) {
                encoder
                    .write_image::<colortype::Gray8>(w, h, plane)
                    .map_err(tiff_err)?;
            }
        }
        PixelData::U16(a) => {
            let flat: Vec<u16> = a.iter().copied().collect();
            for plane in flat.chunks_exact(plane_len.max(1)) {
                encoder
                    .write_image::<colortype::Gray16>(w, h, plane)
                    .map_err(tiff_err)?;
            }
        }
        PixelData::F32(a) => {
            let flat: Vec<f32> = a.iter().copied().collect();
            for plane in flat.chunks_exact(plane_len.max(1)) {
                encoder
                    .write_image::<colortype::Gray32Float>(w, h, plane)
                    .map_err(tiff_err)?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::image::PixelType;
    use tempfile::TempDir;

    #[test]
    fn test_multi_page_u16_preserved() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("stack.tiff");
        let pixels: Vec<u16> = (0..2 * 3 * 5).map(|v| v * 1000).collect();
        let image = Image::from_u16((2, 3, 5), pixels).unwrap();

        write_tiff(&path, &image).unwrap();
        let loaded = read_tiff(&path).unwrap();

        assert_eq!(loaded.shape(), (2, 3, 5));
        assert_eq!(loaded.pixel_type(), PixelType::U16);
        assert_eq!(loaded, image);
    }

    #[test]
    fn test_float_page_preserved() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("float.tif");
        let image = Image::from_f32((1, 2, 2), vec![0.0, 0.25, 0.5, 1.0]).unwrap();

        write_tiff(&path, &image).unwrap();
        let loaded = read_tiff(&path).unwrap();

        assert_eq!(loaded.pixel_type(), PixelType::F32);
        assert_eq!(loaded.min_max(), Some((0.0, 1.0)));
    }

    #[test]
    fn test_rgb_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("rgb.tiff");
        {
            let file = File::create(&path).unwrap();
            let mut encoder = TiffEncoder::new(BufWriter::new(file)).unwrap();
            encoder
                .write_image::<colortype::RGB8>(2, 1, &[1, 2, 3, 4, 5, 6])
                .unwrap();
        }

        let result = read_tiff(&path);
        assert!(matches!(result, Err(TiffIoError::Unsupported { .. })));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let temp_dir = TempDir::new().unwrap();
        let result = read_tiff(&temp_dir.path().join("missing.tiff"));
        assert!(matches!(result, Err(TiffIoError::Io { .. })));
    }
}
