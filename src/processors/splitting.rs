//! Splitting multi-channel acquisitions into single-channel TIFF files.
//!
//! Each matching source in a folder is decoded into its channels, written
//! as `{stem}{suffix}{index}.{ext}` next to the source, and finally every
//! source file is moved into an archive subfolder.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{error, info};

use crate::config::SplitConfig;
use crate::core::czi::CziFile;
use crate::core::files::{ensure_dir, list_files_with_extensions, move_into};
use crate::core::image::Image;
use crate::core::tiff_io::write_tiff;

/// Turns a multi-channel container into one image per channel.
pub trait ChannelDecoder {
    /// Decode `path` into its channels, in channel order.
    fn decode_channels(&self, path: &Path) -> Result<Vec<Image>>;
}

/// Decoder for Zeiss CZI files.
#[derive(Debug, Default, Clone, Copy)]
pub struct CziDecoder;

impl ChannelDecoder for CziDecoder {
    fn decode_channels(&self, path: &Path) -> Result<Vec<Image>> {
        let mut file = CziFile::open(path)?;
        Ok(file.channels()?)
    }
}

/// Channel files written for one source.
#[derive(Debug, Clone)]
pub struct FileSplit {
    pub source: PathBuf,
    pub outputs: Vec<PathBuf>,
}

/// A source that could not be decoded.
#[derive(Debug, Clone)]
pub struct SplitFailure {
    pub source: PathBuf,
    pub error: String,
}

/// Result of [`split_channels`].
#[derive(Debug, Clone, Default)]
pub struct SplitReport {
    pub archive_folder: PathBuf,
    pub split: Vec<FileSplit>,
    pub failed: Vec<SplitFailure>,
    pub archived: Vec<PathBuf>,
}

impl SplitReport {
    /// Total number of channel files written.
    pub fn channels_written(&self) -> usize {
        self.split.iter().map(|s| s.outputs.len()).sum()
    }
}

/// File name of channel `index` of a source with stem `stem`.
pub fn channel_output_name(stem: &str, index: usize, config: &SplitConfig) -> String {
    format!(
        "{}{}{}.{}",
        stem, config.channel_suffix, index, config.output_extension
    )
}

fn write_channels(
    folder: &Path,
    source: &Path,
    channels: &[Image],
    config: &SplitConfig,
) -> Result<Vec<PathBuf>> {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .with_context(|| format!("No file stem in {}", source.display()))?;

    let mut outputs = Vec::with_capacity(channels.len());
    for (index, channel) in channels.iter().enumerate() {
        let output = folder.join(channel_output_name(&stem, index, config));
        write_tiff(&output, channel)
            .with_context(|| format!("Failed to write channel {}", output.display()))?;
        outputs.push(output);
    }

    Ok(outputs)
}

/// Split every matching source in `folder` into per-channel TIFF files.
///
/// A source that fails to decode is logged and recorded; the remaining
/// sources are still processed. Write failures abort the run. After the
/// scan every matching source still in `folder` is moved into the archive
/// folder, whether it decoded or not. A source whose name is already taken
/// in the archive folder stops the sweep with an error and stays in place.
pub fn split_channels<D: ChannelDecoder + ?Sized>(
    folder: &Path,
    config: &SplitConfig,
    decoder: &D,
) -> Result<SplitReport> {
    let sources = list_files_with_extensions(folder, &config.extensions)?;
    let archive_folder = folder.join(&config.archive_folder);

    let mut report = SplitReport {
        archive_folder: archive_folder.clone(),
        ..SplitReport::default()
    };

    for source in &sources {
        match decoder.decode_channels(source) {
            Ok(channels) => {
                let outputs = write_channels(folder, source, &channels, config)?;
                info!(
                    "Split {} into {} channels",
                    source.display(),
                    outputs.len()
                );
                report.split.push(FileSplit {
                    source: source.clone(),
                    outputs,
                });
            }
            Err(e) => {
                error!("Failed to decode {}: {:#}", source.display(), e);
                report.failed.push(SplitFailure {
                    source: source.clone(),
                    error: format!("{:#}", e),
                });
            }
        }
    }

    ensure_dir(&archive_folder)?;
    for source in list_files_with_extensions(folder, &config.extensions)? {
        let archived = move_into(&source, &archive_folder)
            .with_context(|| format!("Failed to archive {}", source.display()))?;
        report.archived.push(archived);
    }
    info!(
        "Moved {} originals to {}",
        report.archived.len(),
        archive_folder.display()
    );

    Ok(report)
}
