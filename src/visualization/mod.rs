//! Display surfaces for filter results.
//!
//! The filter stages hand their results to a [`DisplaySurface`]. Headless
//! runs use [`NoDisplay`]; [`PreviewWriter`] renders grayscale previews to
//! PNG files with the plotters bitmap backend.

use std::path::{Path, PathBuf};

use log::debug;
use plotters::prelude::*;
use plotters_bitmap::BitMapBackend;
use thiserror::Error;

use crate::core::image::Image;

/// Errors that can occur during visualization.
#[derive(Error, Debug)]
pub enum VisualizationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Plotting error: {0}")]
    PlottingError(String),

    #[error("Empty image")]
    EmptyImage,

    #[error("No panels to display")]
    NoPanels,
}

/// Result type for visualization operations.
pub type Result<T> = std::result::Result<T, VisualizationError>;

/// A titled image to show.
pub struct Panel<'a> {
    pub title: &'a str,
    pub image: &'a Image,
}

/// Somewhere filter results can be shown.
pub trait DisplaySurface {
    /// Show `panels` side by side under `title`.
    fn show(&self, title: &str, panels: &[Panel<'_>]) -> Result<()>;
}

/// Display surface for headless runs; shows nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDisplay;

impl DisplaySurface for NoDisplay {
    fn show(&self, title: &str, _panels: &[Panel<'_>]) -> Result<()> {
        debug!("Display disabled, skipping '{}'", title);
        Ok(())
    }
}

/// Writes one PNG per `show` call into a preview folder.
#[derive(Debug, Clone)]
pub struct PreviewWriter {
    folder: PathBuf,
    max_edge: u32,
}

impl PreviewWriter {
    pub fn new(folder: impl Into<PathBuf>, max_edge: u32) -> Self {
        Self {
            folder: folder.into(),
            max_edge: max_edge.max(1),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// File name for a preview titled `title`.
    pub fn preview_path(&self, title: &str) -> PathBuf {
        let safe: String = title
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
            .collect();
        self.folder.join(format!("{}.png", safe.trim_matches('_')))
    }
}

impl DisplaySurface for PreviewWriter {
    fn show(&self, title: &str, panels: &[Panel<'_>]) -> Result<()> {
        if panels.is_empty() {
            return Err(VisualizationError::NoPanels);
        }
        std::fs::create_dir_all(&self.folder)?;

        let grays: Vec<GrayPlane> = panels
            .iter()
            .map(|p| GrayPlane::from_image(p.image, self.max_edge))
            .collect::<Result<_>>()?;

        let panel_w = grays.iter().map(|g| g.width).max().unwrap_or(1);
        let panel_h = grays.iter().map(|g| g.height).max().unwrap_or(1);
        let total_w = panel_w * grays.len() as u32;

        let path = self.preview_path(title);
        let root = BitMapBackend::new(&path, (total_w, panel_h)).into_drawing_area();
        root.fill(&WHITE)
            .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

        let areas = root.split_evenly((1, grays.len()));
        for (area, gray) in areas.iter().zip(&grays) {
            for y in 0..gray.height {
                for x in 0..gray.width {
                    let v = gray.pixels[(y * gray.width + x) as usize];
                    area.draw_pixel((x as i32, y as i32), &RGBColor(v, v, v))
                        .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;
                }
            }
        }

        root.present()
            .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

        let names: Vec<&str> = panels.iter().map(|p| p.title).collect();
        debug!("Wrote preview {} ({})", path.display(), names.join(" | "));
        Ok(())
    }
}

/// First plane of an image, min-max scaled to 8-bit and decimated so the
/// longest edge fits `max_edge`.
struct GrayPlane {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl GrayPlane {
    fn from_image(image: &Image, max_edge: u32) -> Result<Self> {
        let (planes, height, width) = image.shape();
        if planes == 0 || height == 0 || width == 0 {
            return Err(VisualizationError::EmptyImage);
        }

        let plane = image
            .plane_f32(0)
            .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

        let (lo, hi) = plane
            .iter()
            .filter(|v| !v.is_nan())
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let span = if hi - lo > f32::EPSILON { hi - lo } else { 1.0 };

        let step = (height.max(width) as u32).div_ceil(max_edge).max(1) as usize;
        let out_h = height.div_ceil(step);
        let out_w = width.div_ceil(step);

        let mut pixels = Vec::with_capacity(out_h * out_w);
        for y in (0..height).step_by(step) {
            for x in (0..width).step_by(step) {
                let v = plane[[y, x]];
                let scaled = if v.is_nan() { 0.0 } else { (v - lo) / span * 255.0 };
                pixels.push(scaled.round().clamp(0.0, 255.0) as u8);
            }
        }

        Ok(Self {
            width: out_w as u32,
            height: out_h as u32,
            pixels,
        })
    }
}
