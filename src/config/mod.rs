//! Configuration types for the microscopy pipeline.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for renaming source folders and consolidating them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationConfig {
    /// Name of the flat collection folder created under the root
    #[serde(default = "default_collection_folder")]
    pub collection_folder: String,

    /// Extensions (without dot) of the raw instrument files to rename
    #[serde(default = "default_source_extensions")]
    pub extensions: Vec<String>,
}

fn default_collection_folder() -> String {
    "All".to_string()
}

fn default_source_extensions() -> Vec<String> {
    vec!["czi".to_string()]
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            collection_folder: default_collection_folder(),
            extensions: default_source_extensions(),
        }
    }
}

/// Configuration for splitting multi-channel files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitConfig {
    /// Extensions of the multi-channel source files
    #[serde(default = "default_source_extensions")]
    pub extensions: Vec<String>,

    /// Folder (under the processed folder) receiving the originals
    #[serde(default = "default_split_archive")]
    pub archive_folder: String,

    /// Literal inserted between the source stem and the channel index
    #[serde(default = "default_channel_suffix")]
    pub channel_suffix: String,

    /// Extension of the written channel files
    #[serde(default = "default_output_extension")]
    pub output_extension: String,
}

fn default_split_archive() -> String {
    "0_Original CZI".to_string()
}

fn default_channel_suffix() -> String {
    "_C_".to_string()
}

fn default_output_extension() -> String {
    "tiff".to_string()
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            extensions: default_source_extensions(),
            archive_folder: default_split_archive(),
            channel_suffix: default_channel_suffix(),
            output_extension: default_output_extension(),
        }
    }
}

/// Configuration for Gaussian smoothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GaussianConfig {
    /// Standard deviation of the Gaussian kernel in pixels
    #[serde(default = "default_sigma")]
    pub sigma: f32,
}

fn default_sigma() -> f32 {
    1.0
}

impl Default for GaussianConfig {
    fn default() -> Self {
        Self {
            sigma: default_sigma(),
        }
    }
}

/// Configuration for rolling-ball background subtraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundConfig {
    /// Radius of the rolling ball in pixels
    #[serde(default = "default_radius")]
    pub radius: f64,

    /// Folder receiving the background-subtracted images
    #[serde(default = "default_processed_folder")]
    pub processed_folder: String,

    /// Folder receiving the original images
    #[serde(default = "default_unprocessed_folder")]
    pub unprocessed_folder: String,
}

fn default_radius() -> f64 {
    50.0
}

fn default_processed_folder() -> String {
    "1_Background Subtraction".to_string()
}

fn default_unprocessed_folder() -> String {
    "Unprocessed tiffs".to_string()
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            radius: default_radius(),
            processed_folder: default_processed_folder(),
            unprocessed_folder: default_unprocessed_folder(),
        }
    }
}

/// Configuration for adaptive histogram equalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContrastConfig {
    /// Clip limit as a fraction of the tile pixel count
    #[serde(default = "default_clip_limit")]
    pub clip_limit: f32,

    /// Number of histogram bins
    #[serde(default = "default_nbins")]
    pub nbins: usize,

    /// Tile size as a divisor of the image dimensions
    #[serde(default = "default_tile_divisor")]
    pub tile_divisor: usize,
}

fn default_clip_limit() -> f32 {
    0.01
}

fn default_nbins() -> usize {
    256
}

fn default_tile_divisor() -> usize {
    8
}

impl Default for ContrastConfig {
    fn default() -> Self {
        Self {
            clip_limit: default_clip_limit(),
            nbins: default_nbins(),
            tile_divisor: default_tile_divisor(),
        }
    }
}

/// Configuration for flattening a folder tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlattenConfig {
    /// Name of the flat output folder created under the root
    #[serde(default = "default_collection_folder")]
    pub output_folder: String,

    /// Extensions of the images to collect
    #[serde(default = "default_image_extensions")]
    pub extensions: Vec<String>,
}

impl Default for FlattenConfig {
    fn default() -> Self {
        Self {
            output_folder: default_collection_folder(),
            extensions: default_image_extensions(),
        }
    }
}

/// Configuration for the preview display surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Folder (under the processed folder) receiving preview PNGs
    #[serde(default = "default_preview_folder")]
    pub preview_folder: String,

    /// Maximum preview edge length in pixels
    #[serde(default = "default_preview_max_edge")]
    pub max_edge: u32,
}

fn default_preview_folder() -> String {
    "Previews".to_string()
}

fn default_preview_max_edge() -> u32 {
    1024
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            preview_folder: default_preview_folder(),
            max_edge: default_preview_max_edge(),
        }
    }
}

fn default_image_extensions() -> Vec<String> {
    vec!["tiff".to_string(), "tif".to_string()]
}

/// Main pipeline configuration combining all sub-configs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Extensions treated as images by the filter stages
    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,

    #[serde(default)]
    pub consolidation: ConsolidationConfig,

    #[serde(default)]
    pub split: SplitConfig,

    #[serde(default)]
    pub gaussian: GaussianConfig,

    #[serde(default)]
    pub background: BackgroundConfig,

    #[serde(default)]
    pub contrast: ContrastConfig,

    #[serde(default)]
    pub flatten: FlattenConfig,

    #[serde(default)]
    pub display: DisplayConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            image_extensions: default_image_extensions(),
            consolidation: ConsolidationConfig::default(),
            split: SplitConfig::default(),
            gaussian: GaussianConfig::default(),
            background: BackgroundConfig::default(),
            contrast: ContrastConfig::default(),
            flatten: FlattenConfig::default(),
            display: DisplayConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_folder_names() {
        let config = PipelineConfig::default();
        assert_eq!(config.consolidation.collection_folder, "All");
        assert_eq!(config.split.archive_folder, "0_Original CZI");
        assert_eq!(config.background.processed_folder, "1_Background Subtraction");
        assert_eq!(config.background.unprocessed_folder, "Unprocessed tiffs");
        assert_eq!(config.flatten.output_folder, "All");
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = "gaussian:\n  sigma: 2.5\nbackground:\n  radius: 20\n";
        let config: PipelineConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.gaussian.sigma, 2.5);
        assert_eq!(config.background.radius, 20.0);
        assert_eq!(config.background.unprocessed_folder, "Unprocessed tiffs");
        assert_eq!(config.image_extensions, vec!["tiff", "tif"]);
        assert_eq!(config.contrast.nbins, 256);
    }

    #[test]
    fn test_yaml_roundtrip_through_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("pipeline.yaml");

        let mut config = PipelineConfig::default();
        config.split.channel_suffix = "_ch".to_string();
        config.to_yaml(&path).unwrap();

        let loaded = PipelineConfig::from_yaml(&path).unwrap();
        assert_eq!(loaded.split.channel_suffix, "_ch");
        assert_eq!(loaded.display.preview_folder, "Previews");
    }
}
