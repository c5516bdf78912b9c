//! Batch pipeline for fluorescence microscopy image folders.
//!
//! This crate provides tools for:
//! - Renaming raw acquisitions per folder and consolidating them into one collection
//! - Splitting multi-channel CZI files into single-channel TIFF stacks
//! - Gaussian smoothing, rolling-ball background subtraction, and CLAHE
//! - Converting images to 8-bit and flattening folder trees
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use microscopy_pipeline::{processors::rename_and_consolidate, ConsolidationConfig};
//!
//! let report = rename_and_consolidate(Path::new("acquisitions"), &ConsolidationConfig::default(), false).unwrap();
//! println!("copied {} files", report.copies.copied());
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod processors;
pub mod visualization;

pub use config::{
    BackgroundConfig, ConsolidationConfig, ContrastConfig, DisplayConfig, FlattenConfig,
    GaussianConfig, PipelineConfig, SplitConfig,
};
pub use crate::core::image::{Image, PixelData, PixelType};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
