//! Renaming raw instrument files and consolidating them into one folder.
//!
//! Every immediate subfolder of a root is treated as one acquisition batch.
//! Its matching files are renamed to `{folder}_{NN}.{ext}` in lexicographic
//! order of their current names, then copied into a flat collection folder
//! (`All` by default) without ever overwriting an existing file.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, info, warn};
use thiserror::Error;

use crate::config::ConsolidationConfig;
use crate::core::files::{
    copy_if_absent, ensure_dir, file_name_string, list_files_with_extensions, list_subfolders,
    CopyOutcome, CopyRecord, CopyReport,
};

/// Errors specific to renaming and consolidation.
#[derive(Debug, Error)]
pub enum ConsolidationError {
    #[error("Root directory not found: {0}")]
    RootNotFound(PathBuf),

    #[error("Staging path already exists, refusing to overwrite: {0}")]
    StagingConflict(PathBuf),
}

/// One planned rename inside a source folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameStep {
    pub from: PathBuf,
    pub to: PathBuf,
}

impl RenameStep {
    #[inline]
    pub fn is_noop(&self) -> bool {
        self.from == self.to
    }
}

/// Outcome of renaming one source folder.
#[derive(Debug, Clone)]
pub struct RenameSummary {
    pub folder: PathBuf,
    /// Matching files found in the folder.
    pub files: usize,
    /// Files whose name changed (or would change, in a dry run).
    pub renamed: usize,
    /// The folder already carried exactly the canonical names.
    pub already_canonical: bool,
}

/// Result of [`rename_and_consolidate`].
#[derive(Debug, Clone)]
pub struct ConsolidationReport {
    pub collection: PathBuf,
    pub renames: Vec<RenameSummary>,
    pub copies: CopyReport,
}

impl ConsolidationReport {
    pub fn files_renamed(&self) -> usize {
        self.renames.iter().map(|r| r.renamed).sum()
    }
}

/// Canonical name of the `index`-th (1-based) file of `folder_name`.
///
/// The index is zero-padded to two digits; larger indices keep all digits.
pub fn canonical_name(folder_name: &str, index: usize, extension: &str) -> String {
    if extension.is_empty() {
        format!("{}_{:02}", folder_name, index)
    } else {
        format!("{}_{:02}.{}", folder_name, index, extension)
    }
}

/// Plan the renames of one source folder.
///
/// Matching files are sorted lexicographically by name and numbered from 1.
/// Each file keeps its own extension.
pub fn plan_renames<S: AsRef<str>>(folder: &Path, extensions: &[S]) -> Result<Vec<RenameStep>> {
    let folder_name = file_name_string(folder)?;
    let files = list_files_with_extensions(folder, extensions)?;

    let steps = files
        .into_iter()
        .enumerate()
        .map(|(i, from)| {
            let extension = from
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default();
            let to = folder.join(canonical_name(&folder_name, i + 1, &extension));
            RenameStep { from, to }
        })
        .collect();

    Ok(steps)
}

fn staging_path(target: &Path) -> Result<PathBuf> {
    let name = file_name_string(target)?;
    Ok(target.with_file_name(format!(".{}.renaming", name)))
}

fn rename(from: &Path, to: &Path) -> Result<()> {
    fs::rename(from, to)
        .with_context(|| format!("Failed to rename {} -> {}", from.display(), to.display()))
}

/// Rename the matching files of one folder to their canonical names.
///
/// A folder whose files already carry exactly the canonical name set is
/// left alone, so re-running never reshuffles names (this matters past 99
/// files, where `_100` sorts before `_11`). When a target name is still
/// held by a file waiting to be renamed, the folder is renamed through
/// temporary names so nothing is overwritten.
pub fn rename_folder_files<S: AsRef<str>>(
    folder: &Path,
    extensions: &[S],
    dry_run: bool,
) -> Result<RenameSummary> {
    let steps = plan_renames(folder, extensions)?;
    let sources: HashSet<&Path> = steps.iter().map(|s| s.from.as_path()).collect();

    let mut summary = RenameSummary {
        folder: folder.to_path_buf(),
        files: steps.len(),
        renamed: 0,
        already_canonical: false,
    };

    if steps.is_empty() {
        debug!("No matching files in {}", folder.display());
        return Ok(summary);
    }

    if steps.iter().all(|s| sources.contains(s.to.as_path())) {
        debug!("{} already uses canonical names", folder.display());
        summary.already_canonical = true;
        return Ok(summary);
    }

    let pending: Vec<&RenameStep> = steps.iter().filter(|s| !s.is_noop()).collect();
    summary.renamed = pending.len();

    if dry_run {
        for step in &pending {
            println!(
                "Would rename {} -> {}",
                step.from.display(),
                step.to.display()
            );
        }
        return Ok(summary);
    }

    let needs_staging = pending.iter().any(|s| sources.contains(s.to.as_path()));

    if needs_staging {
        debug!("Renaming {} through staging names", folder.display());
        let mut staged = Vec::with_capacity(pending.len());
        for step in &pending {
            let temp = staging_path(&step.to)?;
            if temp.exists() {
                return Err(ConsolidationError::StagingConflict(temp).into());
            }
            rename(&step.from, &temp)?;
            staged.push((temp, step.to.as_path()));
        }
        for (temp, to) in &staged {
            rename(temp, to)?;
        }
    } else {
        for step in &pending {
            rename(&step.from, &step.to)?;
        }
    }

    info!(
        "Renamed {} of {} files in {}",
        summary.renamed,
        summary.files,
        folder.display()
    );
    Ok(summary)
}

fn copy_files_into(
    collection: &Path,
    files: &[PathBuf],
    dry_run: bool,
    planned: &mut HashSet<PathBuf>,
    report: &mut CopyReport,
) -> Result<()> {
    for source in files {
        let destination = collection.join(file_name_string(source)?);

        let outcome = if dry_run && planned.contains(&destination) {
            CopyOutcome::SkippedExisting
        } else {
            copy_if_absent(source, &destination, dry_run)?
        };

        match outcome {
            CopyOutcome::Copied => {
                if dry_run {
                    println!(
                        "Would copy {} -> {}",
                        source.display(),
                        destination.display()
                    );
                } else {
                    debug!("Copied {} -> {}", source.display(), destination.display());
                }
                planned.insert(destination.clone());
            }
            CopyOutcome::SkippedConflict => warn!(
                "{} already exists with different size; {} not copied",
                destination.display(),
                source.display()
            ),
            _ => debug!("{} already present, skipping", destination.display()),
        }

        report.records.push(CopyRecord {
            source: source.clone(),
            destination,
            outcome,
        });
    }

    Ok(())
}

/// Copy the matching files of every source folder into the collection.
///
/// The collection folder is created if absent. Existing destination files
/// are never modified.
pub fn copy_into_collection(
    root: &Path,
    config: &ConsolidationConfig,
    dry_run: bool,
) -> Result<CopyReport> {
    let collection = root.join(&config.collection_folder);
    if !dry_run {
        ensure_dir(&collection)?;
    }

    let mut report = CopyReport::default();
    let mut planned = HashSet::new();

    for folder in list_subfolders(root, &[config.collection_folder.as_str()])? {
        let files = list_files_with_extensions(&folder, &config.extensions)?;
        copy_files_into(&collection, &files, dry_run, &mut planned, &mut report)?;
    }

    Ok(report)
}

/// Rename every source folder under `root`, then consolidate the renamed
/// files into the collection folder.
///
/// In a dry run nothing on disk changes; the copy listing uses the names
/// the files would have after renaming.
pub fn rename_and_consolidate(
    root: &Path,
    config: &ConsolidationConfig,
    dry_run: bool,
) -> Result<ConsolidationReport> {
    if !root.is_dir() {
        return Err(ConsolidationError::RootNotFound(root.to_path_buf()).into());
    }

    let folders = list_subfolders(root, &[config.collection_folder.as_str()])?;
    let collection = root.join(&config.collection_folder);

    let mut renames = Vec::with_capacity(folders.len());
    for folder in &folders {
        renames.push(rename_folder_files(folder, &config.extensions, dry_run)?);
    }

    let copies = if dry_run {
        let mut report = CopyReport::default();
        let mut planned = HashSet::new();
        for folder in &folders {
            let files: Vec<PathBuf> = plan_renames(folder, &config.extensions)?
                .into_iter()
                .map(|s| s.to)
                .collect();
            copy_files_into(&collection, &files, true, &mut planned, &mut report)?;
        }
        report
    } else {
        copy_into_collection(root, config, false)?
    };

    info!(
        "Consolidated {} folders into {} ({} copied, {} skipped)",
        folders.len(),
        collection.display(),
        copies.copied(),
        copies.skipped()
    );

    Ok(ConsolidationReport {
        collection,
        renames,
        copies,
    })
}
