//! Reader for Zeiss CZI (ZISRAW) multi-channel files.
//!
//! Only what the channel splitter needs is supported: uncompressed
//! grayscale subblocks (8-bit, 16-bit, 32-bit float) at full resolution.
//! Subblocks are grouped by their `C` coordinate; within a channel the
//! planes are ordered by `(T, Z)` and mosaic tiles are placed on a common
//! canvas by their `X`/`Y` start.
//!
//! All integers in the container are little-endian.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use log::debug;
use thiserror::Error;

use super::image::{Image, ImageError};

const SEGMENT_HEADER_LEN: u64 = 32;
const FILE_SEGMENT_ID: &str = "ZISRAWFILE";
const DIRECTORY_SEGMENT_ID: &str = "ZISRAWDIRECTORY";
const SUBBLOCK_SEGMENT_ID: &str = "ZISRAWSUBBLOCK";

/// Offset of the directory position inside the file header segment data.
const DIRECTORY_POSITION_OFFSET: u64 = 52;
/// Reserved bytes after the entry count in the directory segment.
const DIRECTORY_RESERVED_LEN: usize = 124;
/// Fixed part of a directory entry before its dimension entries.
const ENTRY_FIXED_LEN: usize = 32;
const DIMENSION_ENTRY_LEN: usize = 20;
/// Fixed part of a subblock segment before its directory entry.
const SUBBLOCK_FIXED_LEN: u64 = 16;
/// Minimum size of the subblock header area.
const SUBBLOCK_HEADER_MIN: u64 = 256;

/// Errors that can occur while decoding a CZI file.
#[derive(Debug, Error)]
pub enum CziError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Not a CZI file: expected segment {expected}, found {found:?}")]
    BadSegment { expected: &'static str, found: String },

    #[error("Malformed CZI directory entry: {0}")]
    BadEntry(String),

    #[error("Unsupported CZI pixel type {0}")]
    UnsupportedPixelType(i32),

    #[error("Unsupported CZI compression {0}")]
    UnsupportedCompression(i32),

    #[error("Channel {channel} mixes pixel types")]
    MixedPixelTypes { channel: i32 },

    #[error("Subblock data is {actual} bytes, expected {expected}")]
    DataSize { expected: u64, actual: u64 },

    #[error(transparent)]
    Image(#[from] ImageError),
}

/// Result type for CZI operations.
pub type Result<T> = std::result::Result<T, CziError>;

/// Pixel type of a subblock, as stored in the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CziPixelType {
    Gray8,
    Gray16,
    Gray32Float,
}

impl CziPixelType {
    fn from_code(code: i32) -> Result<Self> {
        match code {
            0 => Ok(CziPixelType::Gray8),
            1 => Ok(CziPixelType::Gray16),
            2 => Ok(CziPixelType::Gray32Float),
            other => Err(CziError::UnsupportedPixelType(other)),
        }
    }

    #[cfg(test)]
    fn code(self) -> i32 {
        match self {
            CziPixelType::Gray8 => 0,
            CziPixelType::Gray16 => 1,
            CziPixelType::Gray32Float => 2,
        }
    }

    /// Bytes per pixel.
    pub fn bytes(self) -> usize {
        match self {
            CziPixelType::Gray8 => 1,
            CziPixelType::Gray16 => 2,
            CziPixelType::Gray32Float => 4,
        }
    }
}

/// One dimension of a directory entry (e.g. `X`, `Y`, `C`, `Z`).
#[derive(Debug, Clone, PartialEq)]
pub struct DimensionEntry {
    pub dimension: String,
    pub start: i32,
    pub size: i32,
    pub stored_size: i32,
}

/// One subblock as listed in the file directory.
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    pub pixel_type: i32,
    pub file_position: u64,
    pub compression: i32,
    pub pyramid_type: u8,
    pub dimensions: Vec<DimensionEntry>,
}

impl DirectoryEntry {
    fn dimension(&self, name: &str) -> Option<&DimensionEntry> {
        self.dimensions.iter().find(|d| d.dimension == name)
    }

    /// Start coordinate along `name`, 0 when the dimension is absent.
    pub fn start(&self, name: &str) -> i32 {
        self.dimension(name).map_or(0, |d| d.start)
    }

    /// Full-resolution subblocks store as many pixels as they cover.
    pub fn is_full_resolution(&self) -> bool {
        let same = |name: &str| {
            self.dimension(name)
                .map_or(true, |d| d.stored_size == d.size)
        };
        self.pyramid_type == 0 && same("X") && same("Y")
    }

    fn extent(&self, name: &str) -> Result<(i32, usize)> {
        let dim = self
            .dimension(name)
            .ok_or_else(|| CziError::BadEntry(format!("missing {} dimension", name)))?;
        if dim.stored_size < 0 {
            return Err(CziError::BadEntry(format!("negative {} size", name)));
        }
        Ok((dim.start, dim.stored_size as usize))
    }

    fn encoded_len(&self) -> u64 {
        (ENTRY_FIXED_LEN + DIMENSION_ENTRY_LEN * self.dimensions.len()) as u64
    }
}

/// An open CZI file with its parsed subblock directory.
pub struct CziFile {
    reader: BufReader<File>,
    path: PathBuf,
    len: u64,
    entries: Vec<DirectoryEntry>,
}

impl CziFile {
    /// Open a CZI file and read its subblock directory.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| CziError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let len = file
            .metadata()
            .map_err(|e| CziError::Io {
                path: path.to_path_buf(),
                source: e,
            })?
            .len();

        let mut czi = Self {
            reader: BufReader::new(file),
            path: path.to_path_buf(),
            len,
            entries: Vec::new(),
        };

        czi.expect_segment(0, FILE_SEGMENT_ID)?;
        let mut header = [0u8; 8];
        czi.read_at(SEGMENT_HEADER_LEN + DIRECTORY_POSITION_OFFSET, &mut header)?;
        let directory_position = i64::from_le_bytes(header);
        if directory_position <= 0 {
            return Err(CziError::BadEntry("file has no subblock directory".to_string()));
        }

        czi.entries = czi.read_directory(directory_position as u64)?;
        debug!(
            "{}: {} subblocks in directory",
            czi.path.display(),
            czi.entries.len()
        );

        Ok(czi)
    }

    /// Subblock directory in file order.
    pub fn entries(&self) -> &[DirectoryEntry] {
        &self.entries
    }

    fn io_err(&self, e: std::io::Error) -> CziError {
        CziError::Io {
            path: self.path.clone(),
            source: e,
        }
    }

    fn read_at(&mut self, position: u64, buf: &mut [u8]) -> Result<()> {
        self.reader
            .seek(SeekFrom::Start(position))
            .and_then(|_| self.reader.read_exact(buf))
            .map_err(|e| CziError::Io {
                path: self.path.clone(),
                source: e,
            })
    }

    fn expect_segment(&mut self, position: u64, expected: &'static str) -> Result<()> {
        let mut header = [0u8; SEGMENT_HEADER_LEN as usize];
        self.read_at(position, &mut header)?;

        let id_bytes = &header[..16];
        let end = id_bytes.iter().position(|&b| b == 0).unwrap_or(16);
        let found = String::from_utf8_lossy(&id_bytes[..end]).into_owned();

        if found != expected {
            return Err(CziError::BadSegment { expected, found });
        }
        Ok(())
    }

    fn read_directory(&mut self, position: u64) -> Result<Vec<DirectoryEntry>> {
        self.expect_segment(position, DIRECTORY_SEGMENT_ID)?;

        let mut count_buf = [0u8; 4];
        self.read_at(position + SEGMENT_HEADER_LEN, &mut count_buf)?;
        let count = i32::from_le_bytes(count_buf);
        if count < 0 {
            return Err(CziError::BadEntry(format!("negative entry count {}", count)));
        }
        if count as u64 * ENTRY_FIXED_LEN as u64 > self.len {
            return Err(CziError::BadEntry(format!(
                "{} entries do not fit in a {} byte file",
                count, self.len
            )));
        }

        let mut reserved = [0u8; DIRECTORY_RESERVED_LEN];
        self.reader.read_exact(&mut reserved).map_err(|e| self.io_err(e))?;

        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let entry = read_entry(&mut self.reader).map_err(|e| match e {
                EntryReadError::Io(io) => CziError::Io {
                    path: self.path.clone(),
                    source: io,
                },
                EntryReadError::Bad(msg) => CziError::BadEntry(msg),
            })?;
            entries.push(entry);
        }

        Ok(entries)
    }

    /// Read the raw pixel bytes of one subblock.
    pub fn read_subblock_data(&mut self, entry: &DirectoryEntry) -> Result<Vec<u8>> {
        self.expect_segment(entry.file_position, SUBBLOCK_SEGMENT_ID)?;

        let data_start = entry.file_position + SEGMENT_HEADER_LEN;
        let mut fixed = [0u8; SUBBLOCK_FIXED_LEN as usize];
        self.read_at(data_start, &mut fixed)?;

        let metadata_size = i32::from_le_bytes([fixed[0], fixed[1], fixed[2], fixed[3]]);
        let data_size = i64::from_le_bytes([
            fixed[8], fixed[9], fixed[10], fixed[11], fixed[12], fixed[13], fixed[14], fixed[15],
        ]);
        if metadata_size < 0 || data_size < 0 {
            return Err(CziError::BadEntry("negative subblock sizes".to_string()));
        }

        let header_len = SUBBLOCK_HEADER_MIN.max(SUBBLOCK_FIXED_LEN + entry.encoded_len());
        let pixels_start = data_start + header_len + metadata_size as u64;

        // Sizes come from the file; never allocate past its end.
        let available = self.len.saturating_sub(pixels_start);
        if data_size as u64 > available {
            return Err(CziError::DataSize {
                expected: data_size as u64,
                actual: available,
            });
        }

        let mut data = vec![0u8; data_size as usize];
        self.read_at(pixels_start, &mut data)?;
        Ok(data)
    }

    /// Decode all full-resolution subblocks into one image per channel.
    ///
    /// Channels are returned in ascending `C` order.
    pub fn channels(&mut self) -> Result<Vec<Image>> {
        let mut by_channel: BTreeMap<i32, Vec<DirectoryEntry>> = BTreeMap::new();
        for entry in self.entries.iter().filter(|e| e.is_full_resolution()) {
            by_channel.entry(entry.start("C")).or_default().push(entry.clone());
        }

        let mut images = Vec::with_capacity(by_channel.len());
        for (channel, entries) in by_channel {
            images.push(self.assemble_channel(channel, &entries)?);
        }
        Ok(images)
    }

    fn assemble_channel(&mut self, channel: i32, entries: &[DirectoryEntry]) -> Result<Image> {
        let pixel_type = CziPixelType::from_code(entries[0].pixel_type)?;

        let mut planes: BTreeSet<(i32, i32)> = BTreeSet::new();
        let (mut x0, mut y0) = (i32::MAX, i32::MAX);
        let (mut x1, mut y1) = (i32::MIN, i32::MIN);

        for entry in entries {
            if entry.pixel_type != entries[0].pixel_type {
                return Err(CziError::MixedPixelTypes { channel });
            }
            if entry.compression != 0 {
                return Err(CziError::UnsupportedCompression(entry.compression));
            }
            let (xs, w) = entry.extent("X")?;
            let (ys, h) = entry.extent("Y")?;
            x0 = x0.min(xs);
            y0 = y0.min(ys);
            x1 = x1.max(end_of(xs, w, "X")?);
            y1 = y1.max(end_of(ys, h, "Y")?);
            planes.insert((entry.start("T"), entry.start("Z")));
        }

        let width = (x1 as i64 - x0 as i64).max(0) as usize;
        let height = (y1 as i64 - y0 as i64).max(0) as usize;
        let plane_index: BTreeMap<(i32, i32), usize> =
            planes.iter().enumerate().map(|(i, &key)| (key, i)).collect();
        let shape = (planes.len(), height, width);
        let bpp = pixel_type.bytes();

        // Assemble as raw little-endian bytes, then reinterpret once.
        let canvas_len = shape
            .0
            .checked_mul(height)
            .and_then(|n| n.checked_mul(width))
            .and_then(|n| n.checked_mul(bpp))
            .ok_or_else(|| {
                CziError::BadEntry(format!(
                    "channel {} canvas {}x{}x{} overflows",
                    channel, shape.0, height, width
                ))
            })?;
        let mut canvas: Vec<u8> = Vec::new();
        canvas.try_reserve_exact(canvas_len).map_err(|_| {
            CziError::BadEntry(format!(
                "channel {} canvas of {} bytes cannot be allocated",
                channel, canvas_len
            ))
        })?;
        canvas.resize(canvas_len, 0);

        for entry in entries {
            let (xs, w) = entry.extent("X")?;
            let (ys, h) = entry.extent("Y")?;
            let data = self.read_subblock_data(entry)?;

            let expected = (w as u64) * (h as u64) * bpp as u64;
            if (data.len() as u64) < expected {
                return Err(CziError::DataSize {
                    expected,
                    actual: data.len() as u64,
                });
            }

            let plane = plane_index[&(entry.start("T"), entry.start("Z"))];
            let col = (xs as i64 - x0 as i64) as usize;
            for row in 0..h {
                let dst_row = (ys as i64 - y0 as i64) as usize + row;
                let dst = ((plane * height + dst_row) * width + col) * bpp;
                let src = row * w * bpp;
                canvas[dst..dst + w * bpp].copy_from_slice(&data[src..src + w * bpp]);
            }
        }

        let image = match pixel_type {
            CziPixelType::Gray8 => Image::from_u8(shape, canvas)?,
            CziPixelType::Gray16 => Image::from_u16(
                shape,
                canvas
                    .chunks_exact(2)
                    .map(|b| u16::from_le_bytes([b[0], b[1]]))
                    .collect(),
            )?,
            CziPixelType::Gray32Float => Image::from_f32(
                shape,
                canvas
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect(),
            )?,
        };

        Ok(image)
    }
}

/// End coordinate of a tile, rejecting extents that leave the `i32` range.
fn end_of(start: i32, size: usize, name: &str) -> Result<i32> {
    i32::try_from(size)
        .ok()
        .and_then(|size| start.checked_add(size))
        .ok_or_else(|| CziError::BadEntry(format!("{} extent overflows", name)))
}

enum EntryReadError {
    Io(std::io::Error),
    Bad(String),
}

impl From<std::io::Error> for EntryReadError {
    fn from(e: std::io::Error) -> Self {
        EntryReadError::Io(e)
    }
}

fn read_entry<R: Read>(reader: &mut R) -> std::result::Result<DirectoryEntry, EntryReadError> {
    let mut fixed = [0u8; ENTRY_FIXED_LEN];
    reader.read_exact(&mut fixed)?;

    if &fixed[0..2] != b"DV" {
        return Err(EntryReadError::Bad(format!(
            "schema {:?}, expected \"DV\"",
            String::from_utf8_lossy(&fixed[0..2])
        )));
    }

    let le_i32 = |at: usize| i32::from_le_bytes([fixed[at], fixed[at + 1], fixed[at + 2], fixed[at + 3]]);

    let pixel_type = le_i32(2);
    let file_position = i64::from_le_bytes([
        fixed[6], fixed[7], fixed[8], fixed[9], fixed[10], fixed[11], fixed[12], fixed[13],
    ]);
    // fixed[14..18] is the file part, always 0 for single-file images.
    let compression = le_i32(18);
    let pyramid_type = fixed[22];
    let dimension_count = le_i32(28);

    if file_position < 0 || dimension_count < 0 {
        return Err(EntryReadError::Bad("negative position or dimension count".to_string()));
    }

    let mut dimensions = Vec::new();
    for _ in 0..dimension_count {
        let mut raw = [0u8; DIMENSION_ENTRY_LEN];
        reader.read_exact(&mut raw)?;

        let end = raw[..4].iter().position(|&b| b == 0).unwrap_or(4);
        let dim_i32 = |at: usize| i32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]]);

        dimensions.push(DimensionEntry {
            dimension: String::from_utf8_lossy(&raw[..end]).into_owned(),
            start: dim_i32(4),
            size: dim_i32(8),
            // raw[12..16] is the float start coordinate, unused here.
            stored_size: dim_i32(16),
        });
    }

    Ok(DirectoryEntry {
        pixel_type,
        file_position: file_position as u64,
        compression,
        pyramid_type,
        dimensions,
    })
}
