//! Per-folder filter stages over TIFF images.
//!
//! Every stage works on the images directly inside one folder, in
//! lexicographic order. Results either replace the input in place
//! (Gaussian, contrast, 8-bit conversion) or go to a sibling folder
//! (background subtraction).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, info};
use thiserror::Error;

use crate::config::{BackgroundConfig, ContrastConfig};
use crate::core::background::subtract_background_u8;
use crate::core::contrast::equalize_adapthist;
use crate::core::files::{ensure_dir, file_name_string, list_files_with_extensions, move_into};
use crate::core::image::{Image, PixelType};
use crate::core::tiff_io::{read_tiff, write_tiff};
use crate::core::transforms::{gaussian_smooth, normalize_to_u8, scale_by_max_abs, TransformError};
use crate::visualization::{DisplaySurface, Panel};

/// Errors raised by filter stage parameters.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("Rolling ball radius must be positive and finite, got {0}")]
    InvalidRadius(f64),
}

/// Whether a stage shows and/or saves its results.
#[derive(Debug, Clone, Copy)]
pub struct FilterOptions {
    pub display: bool,
    pub save: bool,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            display: false,
            save: true,
        }
    }
}

/// What a filter stage did.
#[derive(Debug, Clone, Default)]
pub struct FilterReport {
    /// Images read and filtered.
    pub processed: Vec<PathBuf>,
    /// Files written with filtered data.
    pub saved: Vec<PathBuf>,
    /// Originals moved aside.
    pub moved: Vec<PathBuf>,
}

fn load(path: &Path) -> Result<Image> {
    read_tiff(path).with_context(|| format!("Failed to read image {}", path.display()))
}

fn save(path: &Path, image: &Image) -> Result<()> {
    write_tiff(path, image).with_context(|| format!("Failed to write image {}", path.display()))
}

/// Gaussian-smooth every image in `folder` with `sigma`.
///
/// With `save` the smoothed image overwrites the original, keeping its
/// pixel type.
pub fn apply_gaussian<S: AsRef<str>>(
    folder: &Path,
    extensions: &[S],
    sigma: f32,
    options: FilterOptions,
    display: &dyn DisplaySurface,
) -> Result<FilterReport> {
    if !(sigma.is_finite() && sigma > 0.0) {
        return Err(TransformError::InvalidSigma(sigma).into());
    }

    let mut report = FilterReport::default();
    for path in list_files_with_extensions(folder, extensions)? {
        let name = file_name_string(&path)?;
        let image = load(&path)?;
        let filtered = gaussian_smooth(&image, sigma)?;

        if options.display {
            display.show(
                &format!("Gaussian Filtered: {}", name),
                &[Panel {
                    title: "Gaussian Filtered",
                    image: &filtered,
                }],
            )?;
        }
        if options.save {
            save(&path, &filtered)?;
            report.saved.push(path.clone());
        }
        debug!("Gaussian filtered {}", path.display());
        report.processed.push(path);
    }

    info!(
        "Applied Gaussian filter (sigma {}) to {} images in {}",
        sigma,
        report.processed.len(),
        folder.display()
    );
    Ok(report)
}

/// Rolling-ball background subtraction for every image in `folder`.
///
/// The processed and unprocessed folders are created first. Results are
/// written as 8-bit into the processed folder (when saving) and every
/// original is moved into the unprocessed folder, so a second run finds
/// nothing left to do.
pub fn subtract_background<S: AsRef<str>>(
    folder: &Path,
    extensions: &[S],
    config: &BackgroundConfig,
    options: FilterOptions,
    display: &dyn DisplaySurface,
) -> Result<FilterReport> {
    let radius = config.radius;
    if !(radius.is_finite() && radius > 0.0) {
        return Err(FilterError::InvalidRadius(radius).into());
    }

    let processed_folder = folder.join(&config.processed_folder);
    let unprocessed_folder = folder.join(&config.unprocessed_folder);
    ensure_dir(&processed_folder)?;
    ensure_dir(&unprocessed_folder)?;

    let mut report = FilterReport::default();
    let images = list_files_with_extensions(folder, extensions)?;
    if images.is_empty() {
        info!("No TIFF files found in {}", folder.display());
        return Ok(report);
    }

    for path in images {
        let name = file_name_string(&path)?;
        let image = load(&path)?;
        let subtracted = image.map_planes(PixelType::U8, |plane| subtract_background_u8(plane, radius));

        if options.display {
            display.show(
                &format!("Background Subtracted: {}", name),
                &[Panel {
                    title: "Background Subtracted",
                    image: &subtracted,
                }],
            )?;
        }
        if options.save {
            let output = processed_folder.join(&name);
            save(&output, &subtracted)?;
            report.saved.push(output);
        }

        report.moved.push(move_into(&path, &unprocessed_folder)?);
        report.processed.push(path);
    }

    info!(
        "Background subtracted {} images in {} (radius {})",
        report.processed.len(),
        folder.display(),
        radius
    );
    Ok(report)
}

/// Adaptive histogram equalization for every image in `folder`.
///
/// Each image is scaled by its largest absolute value, equalized plane by
/// plane, and saved as 32-bit float in place.
pub fn optimize_contrast<S: AsRef<str>>(
    folder: &Path,
    extensions: &[S],
    config: &ContrastConfig,
    options: FilterOptions,
    display: &dyn DisplaySurface,
) -> Result<FilterReport> {
    let mut report = FilterReport::default();

    for path in list_files_with_extensions(folder, extensions)? {
        let name = file_name_string(&path)?;
        let image = load(&path)?;
        let scaled = scale_by_max_abs(&image);
        let optimized = scaled.map_planes(PixelType::F32, |plane| equalize_adapthist(plane, config));

        if options.display {
            display.show(
                &format!("Contrast Optimized: {}", name),
                &[
                    Panel {
                        title: "Original Image",
                        image: &image,
                    },
                    Panel {
                        title: "Optimized Image",
                        image: &optimized,
                    },
                ],
            )?;
        }
        if options.save {
            save(&path, &optimized)?;
            report.saved.push(path.clone());
        }
        report.processed.push(path);
    }

    info!(
        "Optimized contrast of {} images in {}",
        report.processed.len(),
        folder.display()
    );
    Ok(report)
}

/// Convert every image in `folder` to 8-bit in place by min-max scaling.
pub fn convert_to_8bit<S: AsRef<str>>(folder: &Path, extensions: &[S]) -> Result<FilterReport> {
    let mut report = FilterReport::default();

    for path in list_files_with_extensions(folder, extensions)? {
        let image = load(&path)?;
        save(&path, &normalize_to_u8(&image))?;
        report.saved.push(path.clone());
        report.processed.push(path);
    }

    info!("Converted all TIFF images in {} to 8-bit", folder.display());
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::image::PixelData;
    use crate::visualization::{self, NoDisplay};
    use std::cell::RefCell;
    use std::fs;
    use tempfile::TempDir;

    const TIFF: [&str; 2] = ["tiff", "tif"];

    #[derive(Default)]
    struct RecordingDisplay {
        shown: RefCell<Vec<(String, Vec<String>)>>,
    }

    impl DisplaySurface for RecordingDisplay {
        fn show(&self, title: &str, panels: &[Panel<'_>]) -> visualization::Result<()> {
            self.shown.borrow_mut().push((
                title.to_string(),
                panels.iter().map(|p| p.title.to_string()).collect(),
            ));
            Ok(())
        }
    }

    fn create_test_image(folder: &Path, name: &str, image: &Image) -> PathBuf {
        let path = folder.join(name);
        write_tiff(&path, image).unwrap();
        path
    }

    fn impulse(size: usize, value: u16) -> Image {
        let mut pixels = vec![0u16; size * size];
        pixels[(size / 2) * size + size / 2] = value;
        Image::from_u16((1, size, size), pixels).unwrap()
    }

    fn u8_values(image: &Image) -> Vec<u8> {
        match image.data() {
            PixelData::U8(a) => a.iter().copied().collect(),
            other => panic!("expected u8 data, got {:?}", other),
        }
    }

    #[test]
    fn test_gaussian_spreads_impulse_and_keeps_type() {
        let temp_dir = TempDir::new().unwrap();
        let path = create_test_image(temp_dir.path(), "a.tiff", &impulse(9, 1000));

        let report = apply_gaussian(
            temp_dir.path(),
            &TIFF,
            1.0,
            FilterOptions::default(),
            &NoDisplay,
        )
        .unwrap();

        assert_eq!(report.saved, vec![path.clone()]);
        let out = read_tiff(&path).unwrap();
        assert_eq!(out.pixel_type(), PixelType::U16);
        let plane = out.plane_f32(0).unwrap();
        assert!(plane[[4, 4]] < 1000.0);
        assert!(plane[[4, 5]] > 0.0);
        assert!(plane[[4, 5]] < plane[[4, 4]]);
    }

    #[test]
    fn test_gaussian_without_save_leaves_files_alone() {
        let temp_dir = TempDir::new().unwrap();
        let path = create_test_image(temp_dir.path(), "a.tif", &impulse(5, 7));
        let before = fs::read(&path).unwrap();
        let display = RecordingDisplay::default();

        let report = apply_gaussian(
            temp_dir.path(),
            &TIFF,
            2.0,
            FilterOptions {
                display: true,
                save: false,
            },
            &display,
        )
        .unwrap();

        assert!(report.saved.is_empty());
        assert_eq!(fs::read(&path).unwrap(), before);
        let shown = display.shown.borrow();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].0, "Gaussian Filtered: a.tif");
    }

    #[test]
    fn test_gaussian_rejects_bad_sigma() {
        let temp_dir = TempDir::new().unwrap();
        let result = apply_gaussian(
            temp_dir.path(),
            &TIFF,
            0.0,
            FilterOptions::default(),
            &NoDisplay,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_background_moves_originals_and_writes_results() {
        let temp_dir = TempDir::new().unwrap();
        let folder = temp_dir.path();
        let flat = Image::from_u8((1, 6, 6), vec![40; 36]).unwrap();
        create_test_image(folder, "a.tiff", &flat);
        create_test_image(folder, "b.tiff", &impulse(6, 90));
        let config = BackgroundConfig {
            radius: 2.0,
            ..BackgroundConfig::default()
        };

        let report =
            subtract_background(folder, &TIFF, &config, FilterOptions::default(), &NoDisplay)
                .unwrap();

        assert_eq!(report.processed.len(), 2);
        assert!(!folder.join("a.tiff").exists());
        assert!(folder.join("Unprocessed tiffs").join("a.tiff").exists());
        assert!(folder.join("Unprocessed tiffs").join("b.tiff").exists());

        let a = read_tiff(&folder.join("1_Background Subtraction").join("a.tiff")).unwrap();
        assert_eq!(a.pixel_type(), PixelType::U8);
        assert!(u8_values(&a).iter().all(|&v| v == 0));

        let b = read_tiff(&folder.join("1_Background Subtraction").join("b.tiff")).unwrap();
        // The nearest rim lifts the ball by 2 - sqrt(3) under the peak.
        assert_eq!(u8_values(&b).iter().copied().max(), Some(89));
    }

    #[test]
    fn test_background_second_run_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let folder = temp_dir.path();
        create_test_image(folder, "a.tiff", &impulse(4, 10));
        let config = BackgroundConfig::default();

        subtract_background(folder, &TIFF, &config, FilterOptions::default(), &NoDisplay).unwrap();
        let second =
            subtract_background(folder, &TIFF, &config, FilterOptions::default(), &NoDisplay)
                .unwrap();

        assert!(second.processed.is_empty());
        assert!(folder.join("Unprocessed tiffs").join("a.tiff").exists());
    }

    #[test]
    fn test_background_keeps_earlier_unprocessed_original() {
        let temp_dir = TempDir::new().unwrap();
        let folder = temp_dir.path();
        fs::create_dir_all(folder.join("Unprocessed tiffs")).unwrap();
        let earlier = create_test_image(&folder.join("Unprocessed tiffs"), "a.tiff", &impulse(4, 10));
        let before = fs::read(&earlier).unwrap();
        create_test_image(folder, "a.tiff", &impulse(4, 200));

        let result = subtract_background(
            folder,
            &TIFF,
            &BackgroundConfig::default(),
            FilterOptions::default(),
            &NoDisplay,
        );

        assert!(result.is_err());
        assert_eq!(fs::read(&earlier).unwrap(), before);
        assert!(folder.join("a.tiff").exists());
    }

    #[test]
    fn test_background_without_images_creates_folders() {
        let temp_dir = TempDir::new().unwrap();
        let folder = temp_dir.path();

        let report = subtract_background(
            folder,
            &TIFF,
            &BackgroundConfig::default(),
            FilterOptions::default(),
            &NoDisplay,
        )
        .unwrap();

        assert!(report.processed.is_empty());
        assert!(folder.join("1_Background Subtraction").is_dir());
        assert!(folder.join("Unprocessed tiffs").is_dir());
    }

    #[test]
    fn test_background_without_save_still_moves() {
        let temp_dir = TempDir::new().unwrap();
        let folder = temp_dir.path();
        create_test_image(folder, "a.tiff", &impulse(4, 10));

        let report = subtract_background(
            folder,
            &TIFF,
            &BackgroundConfig::default(),
            FilterOptions {
                display: false,
                save: false,
            },
            &NoDisplay,
        )
        .unwrap();

        assert!(report.saved.is_empty());
        assert_eq!(report.moved.len(), 1);
        assert!(!folder.join("1_Background Subtraction").join("a.tiff").exists());
        assert!(folder.join("Unprocessed tiffs").join("a.tiff").exists());
    }

    #[test]
    fn test_contrast_saves_unit_float_and_shows_both_panels() {
        let temp_dir = TempDir::new().unwrap();
        let pixels: Vec<u16> = (0..256).map(|i| (i * 13 % 400) as u16).collect();
        let path = create_test_image(
            temp_dir.path(),
            "c.tiff",
            &Image::from_u16((1, 16, 16), pixels).unwrap(),
        );
        let display = RecordingDisplay::default();

        optimize_contrast(
            temp_dir.path(),
            &TIFF,
            &ContrastConfig::default(),
            FilterOptions {
                display: true,
                save: true,
            },
            &display,
        )
        .unwrap();

        let out = read_tiff(&path).unwrap();
        assert_eq!(out.pixel_type(), PixelType::F32);
        let (lo, hi) = out.min_max().unwrap();
        assert!(lo >= 0.0 && hi <= 1.0);

        let shown = display.shown.borrow();
        assert_eq!(shown[0].1, vec!["Original Image", "Optimized Image"]);
    }

    #[test]
    fn test_convert_to_8bit_rescales_range() {
        let temp_dir = TempDir::new().unwrap();
        let path = create_test_image(
            temp_dir.path(),
            "d.tif",
            &Image::from_u16((1, 1, 3), vec![0, 100, 200]).unwrap(),
        );
        let constant = create_test_image(
            temp_dir.path(),
            "e.tif",
            &Image::from_u16((1, 1, 2), vec![500, 500]).unwrap(),
        );
        fs::write(temp_dir.path().join("notes.txt"), "keep").unwrap();

        let report = convert_to_8bit(temp_dir.path(), &TIFF).unwrap();

        assert_eq!(report.processed.len(), 2);
        assert_eq!(u8_values(&read_tiff(&path).unwrap()), vec![0, 128, 255]);
        assert_eq!(u8_values(&read_tiff(&constant).unwrap()), vec![0, 0]);
        assert_eq!(
            fs::read_to_string(temp_dir.path().join("notes.txt")).unwrap(),
            "keep"
        );
    }
}
