//! Pipeline stages.

pub mod consolidation;
pub mod filters;
pub mod flattening;
pub mod splitting;

// Re-export key types for convenience
pub use consolidation::{
    canonical_name, copy_into_collection, plan_renames, rename_and_consolidate,
    rename_folder_files, ConsolidationError, ConsolidationReport, RenameStep, RenameSummary,
};
pub use filters::{
    apply_gaussian, convert_to_8bit, optimize_contrast, subtract_background, FilterError,
    FilterOptions, FilterReport,
};
pub use flattening::{find_images, flatten_folder, FlattenError};
pub use splitting::{
    channel_output_name, split_channels, ChannelDecoder, CziDecoder, FileSplit, SplitFailure,
    SplitReport,
};
