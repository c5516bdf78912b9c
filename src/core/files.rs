//! Directory enumeration and copy/move primitives shared by every stage.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur while listing, copying, or moving files.
#[derive(Debug, Error)]
pub enum FileOpsError {
    #[error("Failed to read directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to copy {from} -> {to}: {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move {from} -> {to}: {source}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Path has no file name: {0}")]
    NoFileName(PathBuf),

    #[error("Destination already exists: {0}")]
    DestinationExists(PathBuf),
}

/// Result type for file operations.
pub type Result<T> = std::result::Result<T, FileOpsError>;

/// Check whether `path` carries one of `extensions` (case-insensitive, no dot).
pub fn has_extension<S: AsRef<str>>(path: &Path, extensions: &[S]) -> bool {
    path.extension()
        .map(|ext| {
            extensions
                .iter()
                .any(|wanted| ext.eq_ignore_ascii_case(wanted.as_ref()))
        })
        .unwrap_or(false)
}

/// Return the final path component as a `String`.
pub fn file_name_string(path: &Path) -> Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| FileOpsError::NoFileName(path.to_path_buf()))
}

fn read_dir_paths(folder: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(folder).map_err(|e| FileOpsError::ReadDir {
        path: folder.to_path_buf(),
        source: e,
    })?;

    let mut paths = Vec::with_capacity(64);
    for entry in entries {
        let entry = entry.map_err(|e| FileOpsError::ReadDir {
            path: folder.to_path_buf(),
            source: e,
        })?;
        paths.push(entry.path());
    }

    // Byte order of the file names; this is the order renaming relies on.
    paths.sort();
    Ok(paths)
}

/// List the immediate subfolders of `root`, sorted by name.
///
/// Folders whose name equals one of `exclude` are left out.
pub fn list_subfolders(root: &Path, exclude: &[&str]) -> Result<Vec<PathBuf>> {
    let folders = read_dir_paths(root)?
        .into_iter()
        .filter(|path| path.is_dir())
        .filter(|path| {
            path.file_name()
                .map(|name| !exclude.iter().any(|ex| name == *ex))
                .unwrap_or(false)
        })
        .collect();

    Ok(folders)
}

/// List regular files directly inside `folder` whose extension matches.
///
/// The result is sorted lexicographically by file name.
pub fn list_files_with_extensions<S: AsRef<str>>(
    folder: &Path,
    extensions: &[S],
) -> Result<Vec<PathBuf>> {
    let files = read_dir_paths(folder)?
        .into_iter()
        .filter(|path| path.is_file() && has_extension(path, extensions))
        .collect();

    Ok(files)
}

/// Create `folder` (and parents) if it does not exist yet.
pub fn ensure_dir(folder: &Path) -> Result<()> {
    fs::create_dir_all(folder).map_err(|e| FileOpsError::CreateDir {
        path: folder.to_path_buf(),
        source: e,
    })
}

/// Copy a file and carry over its permissions and modification time.
pub fn copy_preserving_metadata(from: &Path, to: &Path) -> Result<()> {
    let copy_err = |e: std::io::Error| FileOpsError::Copy {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source: e,
    };

    // fs::copy already carries the permission bits.
    fs::copy(from, to).map_err(copy_err)?;

    let modified = fs::metadata(from).and_then(|m| m.modified()).map_err(copy_err)?;
    File::options()
        .write(true)
        .open(to)
        .and_then(|file| file.set_modified(modified))
        .map_err(copy_err)?;

    Ok(())
}

/// Move `from` into `folder`, keeping its file name.
///
/// Falls back to copy-and-delete when a plain rename fails, e.g. across
/// file systems. A file already present under the same name in `folder`
/// is an error and both files are left untouched. Returns the destination
/// path.
pub fn move_into(from: &Path, folder: &Path) -> Result<PathBuf> {
    let name = from
        .file_name()
        .ok_or_else(|| FileOpsError::NoFileName(from.to_path_buf()))?;
    let dest = folder.join(name);

    if fs::symlink_metadata(&dest).is_ok() {
        return Err(FileOpsError::DestinationExists(dest));
    }

    if fs::rename(from, &dest).is_err() {
        copy_preserving_metadata(from, &dest)?;
        fs::remove_file(from).map_err(|e| FileOpsError::Move {
            from: from.to_path_buf(),
            to: dest.clone(),
            source: e,
        })?;
    }

    Ok(dest)
}

/// What happened to a single copy request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyOutcome {
    /// The file was copied (or would be, in a dry run).
    Copied,
    /// The destination already existed with the same size.
    SkippedExisting,
    /// The destination already existed with a different size.
    SkippedConflict,
    /// Source and destination are the same file.
    SkippedSelf,
}

/// One copy decision, as written to the CSV report.
#[derive(Debug, Clone, Serialize)]
pub struct CopyRecord {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub outcome: CopyOutcome,
}

/// Copy decisions of a whole stage.
#[derive(Debug, Clone, Default)]
pub struct CopyReport {
    pub records: Vec<CopyRecord>,
}

impl CopyReport {
    /// Count the records with the given outcome.
    pub fn count(&self, outcome: CopyOutcome) -> usize {
        self.records.iter().filter(|r| r.outcome == outcome).count()
    }

    #[inline]
    pub fn copied(&self) -> usize {
        self.count(CopyOutcome::Copied)
    }

    /// Skipped copies of any kind.
    pub fn skipped(&self) -> usize {
        self.records.len() - self.copied()
    }
}

/// Copy `from` to `to` unless `to` already exists.
///
/// An existing destination is never touched. When its size differs from the
/// source the outcome is [`CopyOutcome::SkippedConflict`] so callers can
/// surface it; content is not compared.
pub fn copy_if_absent(from: &Path, to: &Path, dry_run: bool) -> Result<CopyOutcome> {
    if to.exists() {
        let source_len = fs::metadata(from).map(|m| m.len()).ok();
        let dest_len = fs::metadata(to).map(|m| m.len()).ok();

        return Ok(if source_len == dest_len {
            CopyOutcome::SkippedExisting
        } else {
            CopyOutcome::SkippedConflict
        });
    }

    if !dry_run {
        copy_preserving_metadata(from, to)?;
    }

    Ok(CopyOutcome::Copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(content).unwrap();
        path
    }

    #[test]
    fn test_has_extension_ignores_case() {
        let exts = ["tif", "tiff"];
        assert!(has_extension(Path::new("a/b.TIF"), &exts));
        assert!(has_extension(Path::new("b.tiff"), &exts));
        assert!(!has_extension(Path::new("b.czi"), &exts));
        assert!(!has_extension(Path::new("tiff"), &exts));
    }

    #[test]
    fn test_list_files_sorted_and_filtered() {
        let temp_dir = TempDir::new().unwrap();
        touch(temp_dir.path(), "b.czi", b"b");
        touch(temp_dir.path(), "a.czi", b"a");
        touch(temp_dir.path(), "notes.txt", b"n");
        fs::create_dir(temp_dir.path().join("dir.czi")).unwrap();

        let files = list_files_with_extensions(temp_dir.path(), &["czi"]).unwrap();
        let names: Vec<String> = files.iter().map(|p| file_name_string(p).unwrap()).collect();

        assert_eq!(names, vec!["a.czi", "b.czi"]);
    }

    #[test]
    fn test_list_subfolders_excludes() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir(temp_dir.path().join("B")).unwrap();
        fs::create_dir(temp_dir.path().join("A")).unwrap();
        fs::create_dir(temp_dir.path().join("All")).unwrap();
        touch(temp_dir.path(), "file.czi", b"x");

        let folders = list_subfolders(temp_dir.path(), &["All"]).unwrap();
        let names: Vec<String> = folders.iter().map(|p| file_name_string(p).unwrap()).collect();

        assert_eq!(names, vec!["A", "B"]);
    }

    #[test]
    fn test_list_missing_folder_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let result = list_files_with_extensions(&temp_dir.path().join("missing"), &["czi"]);
        assert!(matches!(result, Err(FileOpsError::ReadDir { .. })));
    }

    #[test]
    fn test_copy_preserves_modification_time() {
        let temp_dir = TempDir::new().unwrap();
        let src = touch(temp_dir.path(), "src.bin", b"payload");
        let old = std::time::SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_000_000);
        File::options().write(true).open(&src).unwrap().set_modified(old).unwrap();

        let dst = temp_dir.path().join("dst.bin");
        copy_preserving_metadata(&src, &dst).unwrap();

        assert_eq!(fs::read(&dst).unwrap(), b"payload");
        assert_eq!(fs::metadata(&dst).unwrap().modified().unwrap(), old);
    }

    #[test]
    fn test_copy_if_absent_never_overwrites() {
        let temp_dir = TempDir::new().unwrap();
        let src = touch(temp_dir.path(), "src.bin", b"new content");
        let same = touch(temp_dir.path(), "same.bin", b"old content");
        let different = touch(temp_dir.path(), "different.bin", b"old");

        assert_eq!(copy_if_absent(&src, &same, false).unwrap(), CopyOutcome::SkippedExisting);
        assert_eq!(copy_if_absent(&src, &different, false).unwrap(), CopyOutcome::SkippedConflict);
        assert_eq!(fs::read(&same).unwrap(), b"old content");
        assert_eq!(fs::read(&different).unwrap(), b"old");

        let fresh = temp_dir.path().join("fresh.bin");
        assert_eq!(copy_if_absent(&src, &fresh, true).unwrap(), CopyOutcome::Copied);
        assert!(!fresh.exists());
        assert_eq!(copy_if_absent(&src, &fresh, false).unwrap(), CopyOutcome::Copied);
        assert_eq!(fs::read(&fresh).unwrap(), b"new content");
    }

    #[test]
    fn test_move_into_folder() {
        let temp_dir = TempDir::new().unwrap();
        let src = touch(temp_dir.path(), "image.czi", b"raw");
        let archive = temp_dir.path().join("archive");
        ensure_dir(&archive).unwrap();

        let dest = move_into(&src, &archive).unwrap();

        assert_eq!(dest, archive.join("image.czi"));
        assert!(!src.exists());
        assert_eq!(fs::read(&dest).unwrap(), b"raw");
    }

    #[test]
    fn test_move_into_refuses_to_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("archive");
        ensure_dir(&archive).unwrap();
        let kept = touch(&archive, "image.czi", b"first acquisition");
        let src = touch(temp_dir.path(), "image.czi", b"second");

        let result = move_into(&src, &archive);

        assert!(matches!(result, Err(FileOpsError::DestinationExists(ref p)) if *p == kept));
        assert_eq!(fs::read(&kept).unwrap(), b"first acquisition");
        assert_eq!(fs::read(&src).unwrap(), b"second");
    }

    #[test]
    fn test_copy_report_counts() {
        let record = |outcome| CopyRecord {
            source: PathBuf::from("a"),
            destination: PathBuf::from("b"),
            outcome,
        };
        let report = CopyReport {
            records: vec![
                record(CopyOutcome::Copied),
                record(CopyOutcome::Copied),
                record(CopyOutcome::SkippedConflict),
                record(CopyOutcome::SkippedSelf),
            ],
        };

        assert_eq!(report.copied(), 2);
        assert_eq!(report.skipped(), 2);
        assert_eq!(report.count(CopyOutcome::SkippedConflict), 1);
    }
}
