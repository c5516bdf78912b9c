//! Flattening a folder tree of images into one output folder.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, info, warn};
use thiserror::Error;
use walkdir::WalkDir;

use crate::config::FlattenConfig;
use crate::core::files::{
    copy_if_absent, ensure_dir, file_name_string, has_extension, CopyOutcome, CopyRecord,
    CopyReport,
};

/// Errors specific to flattening.
#[derive(Debug, Error)]
pub enum FlattenError {
    #[error("Directory not found: {0}")]
    DirectoryNotFound(PathBuf),
}

/// Find every matching image under `root`, at any depth.
///
/// Traversal is depth-first with entries sorted by name, so the order is
/// stable between runs.
pub fn find_images<S: AsRef<str>>(root: &Path, extensions: &[S]) -> Result<Vec<PathBuf>> {
    let mut found = Vec::with_capacity(256);

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if entry.file_type().is_file() && has_extension(entry.path(), extensions) {
            found.push(entry.into_path());
        }
    }

    Ok(found)
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Copy every matching image under `root` into `root/{output_folder}`.
///
/// All sources are collected before the first copy, so files copied into
/// the output folder during the run are not picked up again. When several
/// sources share a file name the first one in traversal order wins; files
/// already in the output folder are skipped.
pub fn flatten_folder(root: &Path, config: &FlattenConfig, dry_run: bool) -> Result<CopyReport> {
    if !root.is_dir() {
        return Err(FlattenError::DirectoryNotFound(root.to_path_buf()).into());
    }

    let output = root.join(&config.output_folder);
    if !dry_run {
        ensure_dir(&output)?;
    }

    let sources = find_images(root, &config.extensions)?;
    debug!("Found {} images under {}", sources.len(), root.display());

    let mut report = CopyReport::default();
    let mut planned: HashSet<PathBuf> = HashSet::new();

    for source in sources {
        let destination = output.join(file_name_string(&source)?);

        let outcome = if same_file(&source, &destination) {
            CopyOutcome::SkippedSelf
        } else if dry_run && planned.contains(&destination) {
            CopyOutcome::SkippedExisting
        } else {
            copy_if_absent(&source, &destination, dry_run)?
        };

        match outcome {
            CopyOutcome::Copied => {
                if dry_run {
                    println!(
                        "Would copy {} -> {}",
                        source.display(),
                        destination.display()
                    );
                }
                planned.insert(destination.clone());
            }
            CopyOutcome::SkippedSelf => info!(
                "Skipping {} as it is already in {}",
                source.display(),
                output.display()
            ),
            CopyOutcome::SkippedConflict => warn!(
                "{} already exists with different content size; {} not copied",
                destination.display(),
                source.display()
            ),
            CopyOutcome::SkippedExisting => {
                debug!("{} already present, skipping", destination.display())
            }
        }

        report.records.push(CopyRecord {
            source,
            destination,
            outcome,
        });
    }

    info!(
        "Flattened {} into {} ({} copied, {} skipped)",
        root.display(),
        output.display(),
        report.copied(),
        report.skipped()
    );
    Ok(report)
}
