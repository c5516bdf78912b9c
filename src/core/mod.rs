//! Core data types, file primitives, image I/O, and pixel kernels.

pub mod background;
pub mod contrast;
pub mod czi;
pub mod files;
pub mod image;
pub mod tiff_io;
pub mod transforms;
pub mod writers;

pub use files::{CopyOutcome, CopyRecord, CopyReport, FileOpsError};
pub use image::{Image, PixelData, PixelType};
pub use writers::{write_copy_report, WriteError};
