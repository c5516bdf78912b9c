//! Command-line interface for the microscopy pipeline.

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::{BackgroundConfig, ContrastConfig, PipelineConfig};
use crate::core::writers::write_copy_report;
use crate::core::CopyReport;
use crate::processors::{self, CziDecoder, FilterOptions};
use crate::visualization::{DisplaySurface, NoDisplay, PreviewWriter};

#[derive(Parser)]
#[command(name = "microscopy-pipeline")]
#[command(about = "Batch utilities for microscopy image folders", version)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rename files in every subfolder and consolidate them into one folder
    Rename {
        /// Root directory whose subfolders hold the raw files
        root: PathBuf,
        /// Name of the collection folder
        #[arg(long)]
        collection: Option<String>,
        /// File extensions to rename (without dot)
        #[arg(short, long)]
        extensions: Vec<String>,
        /// Write a CSV report of every copy decision
        #[arg(long)]
        report: Option<PathBuf>,
        /// Preview changes without renaming or copying files
        #[arg(long)]
        dry_run: bool,
    },

    /// Split multi-channel CZI files into one TIFF per channel
    Split {
        /// Folder containing CZI files
        folder: PathBuf,
    },

    /// Gaussian-smooth every TIFF image in a folder
    Gaussian {
        /// Folder containing TIFF images
        folder: PathBuf,
        /// Standard deviation of the kernel
        #[arg(short, long)]
        sigma: Option<f32>,
        /// Write PNG previews of the results
        #[arg(long)]
        display: bool,
        /// Do not overwrite the images
        #[arg(long)]
        no_save: bool,
    },

    /// Rolling-ball background subtraction for every TIFF image in a folder
    SubtractBackground {
        /// Folder containing TIFF images
        folder: PathBuf,
        /// Rolling ball radius in pixels
        #[arg(short, long)]
        radius: Option<f64>,
        /// Write PNG previews of the results
        #[arg(long)]
        display: bool,
        /// Do not write the subtracted images
        #[arg(long)]
        no_save: bool,
    },

    /// Adaptive histogram equalization for every TIFF image in a folder
    OptimizeContrast {
        /// Folder containing TIFF images
        folder: PathBuf,
        /// Clip limit as a fraction of the tile pixel count
        #[arg(long)]
        clip_limit: Option<f32>,
        /// Write PNG previews of the results
        #[arg(long)]
        display: bool,
        /// Do not overwrite the images
        #[arg(long)]
        no_save: bool,
    },

    /// Convert every TIFF image in a folder to 8-bit
    #[command(name = "to-8bit")]
    To8Bit {
        /// Folder containing TIFF images
        folder: PathBuf,
    },

    /// Copy every TIFF image under a root into one flat folder
    Flatten {
        /// Root directory to search recursively
        root: PathBuf,
        /// Name of the output folder under the root
        #[arg(short, long)]
        output: Option<String>,
        /// Write a CSV report of every copy decision
        #[arg(long)]
        report: Option<PathBuf>,
        /// Preview changes without copying files
        #[arg(long)]
        dry_run: bool,
    },

    /// Write the default configuration as YAML
    InitConfig {
        /// Output YAML file
        path: PathBuf,
    },
}

/// Create a spinner for indeterminate operations
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Spinner for stages with a dry-run mode. Dry runs print their plan line
/// by line, so the spinner stays hidden.
fn stage_spinner(message: &str, dry_run: bool) -> ProgressBar {
    if dry_run {
        ProgressBar::hidden()
    } else {
        create_spinner(message)
    }
}

/// Print a summary box
fn print_summary(title: &str, items: &[(&str, String)]) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ {:<62} ║", title);
    println!("╠══════════════════════════════════════════════════════════════╣");
    for (key, value) in items {
        let display_value = if value.chars().count() > 39 {
            format!("{}...", value.chars().take(36).collect::<String>())
        } else {
            value.clone()
        };
        println!("║ {:<20}: {:<39} ║", key, display_value);
    }
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

/// Stop the spinner, log the failure, and exit with status 1.
fn fail(spinner: &ProgressBar, what: &str, e: anyhow::Error) -> ! {
    spinner.finish_and_clear();
    error!("{} failed: {:#}", what, e);
    std::process::exit(1);
}

fn write_report(path: Option<&Path>, report: &CopyReport) {
    if let Some(path) = path {
        match write_copy_report(path, report) {
            Ok(()) => info!("Wrote copy report to {}", path.display()),
            Err(e) => {
                error!("Failed to write copy report: {}", e);
                std::process::exit(1);
            }
        }
    }
}

fn display_surface(folder: &Path, display: bool, config: &PipelineConfig) -> Box<dyn DisplaySurface> {
    if display {
        Box::new(PreviewWriter::new(
            folder.join(&config.display.preview_folder),
            config.display.max_edge,
        ))
    } else {
        Box::new(NoDisplay)
    }
}

pub fn run() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity (must come first)
    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .format_timestamp_secs()
        .init();

    // Load config
    let config = match &cli.config {
        Some(path) => match PipelineConfig::from_yaml(path) {
            Ok(cfg) => {
                info!("Loaded config from: {}", path.display());
                cfg
            }
            Err(e) => {
                warn!("Failed to load config from {}: {}, using defaults", path.display(), e);
                PipelineConfig::default()
            }
        },
        None => PipelineConfig::default(),
    };

    // Dispatch to subcommands
    match cli.command {
        Commands::Rename { root, collection, extensions, report, dry_run } => {
            cmd_rename(&root, collection, extensions, report.as_deref(), dry_run, &config);
        }
        Commands::Split { folder } => {
            cmd_split(&folder, &config);
        }
        Commands::Gaussian { folder, sigma, display, no_save } => {
            let options = FilterOptions { display, save: !no_save };
            cmd_gaussian(&folder, sigma, options, &config);
        }
        Commands::SubtractBackground { folder, radius, display, no_save } => {
            let options = FilterOptions { display, save: !no_save };
            cmd_subtract_background(&folder, radius, options, &config);
        }
        Commands::OptimizeContrast { folder, clip_limit, display, no_save } => {
            let options = FilterOptions { display, save: !no_save };
            cmd_optimize_contrast(&folder, clip_limit, options, &config);
        }
        Commands::To8Bit { folder } => {
            cmd_to_8bit(&folder, &config);
        }
        Commands::Flatten { root, output, report, dry_run } => {
            cmd_flatten(&root, output, report.as_deref(), dry_run, &config);
        }
        Commands::InitConfig { path } => {
            cmd_init_config(&path);
        }
    }
}

fn cmd_rename(
    root: &Path,
    collection: Option<String>,
    extensions: Vec<String>,
    report_path: Option<&Path>,
    dry_run: bool,
    config: &PipelineConfig,
) {
    let start = Instant::now();

    let mut consolidation = config.consolidation.clone();
    if let Some(name) = collection {
        consolidation.collection_folder = name;
    }
    if !extensions.is_empty() {
        consolidation.extensions = extensions;
    }

    if dry_run {
        println!("DRY RUN: No files will be renamed or copied");
    }

    let spinner = stage_spinner("Renaming and consolidating files...", dry_run);

    match processors::rename_and_consolidate(root, &consolidation, dry_run) {
        Ok(result) => {
            spinner.finish_and_clear();
            write_report(report_path, &result.copies);

            let canonical = result.renames.iter().filter(|r| r.already_canonical).count();

            print_summary(
                "Rename and Consolidate Complete",
                &[
                    ("Root", root.display().to_string()),
                    ("Folders", result.renames.len().to_string()),
                    ("Files renamed", result.files_renamed().to_string()),
                    ("Already canonical", canonical.to_string()),
                    ("Collection", result.collection.display().to_string()),
                    ("Copied", result.copies.copied().to_string()),
                    ("Skipped", result.copies.skipped().to_string()),
                    ("Dry run", dry_run.to_string()),
                    ("Duration", format!("{:.2?}", start.elapsed())),
                ],
            );
        }
        Err(e) => fail(&spinner, "Rename", e),
    }
}

fn cmd_split(folder: &Path, config: &PipelineConfig) {
    let start = Instant::now();

    let spinner = create_spinner("Splitting CZI channels...");

    match processors::split_channels(folder, &config.split, &CziDecoder) {
        Ok(report) => {
            spinner.finish_and_clear();

            for failure in &report.failed {
                warn!("Not split: {} ({})", failure.source.display(), failure.error);
            }

            print_summary(
                "Channel Split Complete",
                &[
                    ("Folder", folder.display().to_string()),
                    ("Files split", report.split.len().to_string()),
                    ("Channels written", report.channels_written().to_string()),
                    ("Failed", report.failed.len().to_string()),
                    ("Archived", report.archived.len().to_string()),
                    ("Archive folder", report.archive_folder.display().to_string()),
                    ("Duration", format!("{:.2?}", start.elapsed())),
                ],
            );
        }
        Err(e) => fail(&spinner, "Split", e),
    }
}

fn cmd_gaussian(folder: &Path, sigma: Option<f32>, options: FilterOptions, config: &PipelineConfig) {
    let start = Instant::now();
    let sigma = sigma.unwrap_or(config.gaussian.sigma);
    let display = display_surface(folder, options.display, config);

    let spinner = create_spinner("Applying Gaussian filter...");

    match processors::apply_gaussian(folder, &config.image_extensions, sigma, options, display.as_ref()) {
        Ok(report) => {
            spinner.finish_and_clear();

            print_summary(
                "Gaussian Filter Complete",
                &[
                    ("Folder", folder.display().to_string()),
                    ("Sigma", sigma.to_string()),
                    ("Images processed", report.processed.len().to_string()),
                    ("Images saved", report.saved.len().to_string()),
                    ("Duration", format!("{:.2?}", start.elapsed())),
                ],
            );
        }
        Err(e) => fail(&spinner, "Gaussian filter", e),
    }
}

fn cmd_subtract_background(
    folder: &Path,
    radius: Option<f64>,
    options: FilterOptions,
    config: &PipelineConfig,
) {
    let start = Instant::now();

    let background = BackgroundConfig {
        radius: radius.unwrap_or(config.background.radius),
        ..config.background.clone()
    };
    let display = display_surface(folder, options.display, config);

    let spinner = create_spinner("Subtracting background...");

    match processors::subtract_background(
        folder,
        &config.image_extensions,
        &background,
        options,
        display.as_ref(),
    ) {
        Ok(report) => {
            spinner.finish_and_clear();

            print_summary(
                "Background Subtraction Complete",
                &[
                    ("Folder", folder.display().to_string()),
                    ("Radius", background.radius.to_string()),
                    ("Images processed", report.processed.len().to_string()),
                    ("Images saved", report.saved.len().to_string()),
                    ("Originals moved", report.moved.len().to_string()),
                    ("Duration", format!("{:.2?}", start.elapsed())),
                ],
            );
        }
        Err(e) => fail(&spinner, "Background subtraction", e),
    }
}

fn cmd_optimize_contrast(
    folder: &Path,
    clip_limit: Option<f32>,
    options: FilterOptions,
    config: &PipelineConfig,
) {
    let start = Instant::now();

    let contrast = ContrastConfig {
        clip_limit: clip_limit.unwrap_or(config.contrast.clip_limit),
        ..config.contrast.clone()
    };
    let display = display_surface(folder, options.display, config);

    let spinner = create_spinner("Optimizing contrast...");

    match processors::optimize_contrast(
        folder,
        &config.image_extensions,
        &contrast,
        options,
        display.as_ref(),
    ) {
        Ok(report) => {
            spinner.finish_and_clear();

            print_summary(
                "Contrast Optimization Complete",
                &[
                    ("Folder", folder.display().to_string()),
                    ("Clip limit", contrast.clip_limit.to_string()),
                    ("Images processed", report.processed.len().to_string()),
                    ("Images saved", report.saved.len().to_string()),
                    ("Duration", format!("{:.2?}", start.elapsed())),
                ],
            );
        }
        Err(e) => fail(&spinner, "Contrast optimization", e),
    }
}

fn cmd_to_8bit(folder: &Path, config: &PipelineConfig) {
    let start = Instant::now();

    let spinner = create_spinner("Converting images to 8-bit...");

    match processors::convert_to_8bit(folder, &config.image_extensions) {
        Ok(report) => {
            spinner.finish_and_clear();

            print_summary(
                "8-bit Conversion Complete",
                &[
                    ("Folder", folder.display().to_string()),
                    ("Images converted", report.saved.len().to_string()),
                    ("Duration", format!("{:.2?}", start.elapsed())),
                ],
            );
        }
        Err(e) => fail(&spinner, "8-bit conversion", e),
    }
}

fn cmd_flatten(
    root: &Path,
    output: Option<String>,
    report_path: Option<&Path>,
    dry_run: bool,
    config: &PipelineConfig,
) {
    let start = Instant::now();

    let mut flatten = config.flatten.clone();
    if let Some(name) = output {
        flatten.output_folder = name;
    }

    if dry_run {
        println!("DRY RUN: No files will be copied");
    }

    let spinner = stage_spinner("Collecting images...", dry_run);

    match processors::flatten_folder(root, &flatten, dry_run) {
        Ok(report) => {
            spinner.finish_and_clear();
            write_report(report_path, &report);

            print_summary(
                "Flatten Complete",
                &[
                    ("Root", root.display().to_string()),
                    ("Output", root.join(&flatten.output_folder).display().to_string()),
                    ("Images found", report.records.len().to_string()),
                    ("Copied", report.copied().to_string()),
                    ("Skipped", report.skipped().to_string()),
                    ("Dry run", dry_run.to_string()),
                    ("Duration", format!("{:.2?}", start.elapsed())),
                ],
            );
        }
        Err(e) => fail(&spinner, "Flatten", e),
    }
}

fn cmd_init_config(path: &Path) {
    match PipelineConfig::default().to_yaml(path) {
        Ok(()) => println!("Wrote configuration to {}", path.display()),
        Err(e) => {
            error!("Failed to write config to {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }
}
