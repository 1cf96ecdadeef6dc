//! Document reading with memory mapping support.
//!
//! Small files are read directly; files at or above 1 MiB are memory
//! mapped. Documents larger than the hard cap are rejected up front
//! rather than partially indexed.

// Memory mapping requires unsafe but is read-only here
#![allow(unsafe_code)]

use crate::error::Result;
use memmap2::Mmap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Threshold for using memory mapping (1 MiB).
const MMAP_THRESHOLD: u64 = 1024 * 1024;

/// Maximum document size to index (1 GiB).
const MAX_FILE_SIZE: u64 = 1024 * 1024 * 1024;

/// Document reader used by the indexing pipeline.
///
/// # Examples
///
/// ```no_run
/// use fastsearch::io::FileReader;
///
/// let reader = FileReader::open("notes.md").unwrap();
/// let content = reader.read_to_string().unwrap();
/// ```
pub struct FileReader {
    /// File handle.
    file: File,
    /// File size in bytes.
    size: u64,
    /// File path for error messages.
    path: String,
}

impl FileReader {
    /// Opens a document for reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the file doesn't exist, can't be opened, or
    /// exceeds the maximum indexable size.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let path_str = path_ref.to_string_lossy().to_string();

        if !path_ref.exists() {
            return Err(crate::Error::Io(format!("file not found: {path_str}")));
        }

        let file = File::open(path_ref)
            .map_err(|e| crate::Error::Io(format!("failed to open {path_str}: {e}")))?;

        let size = file
            .metadata()
            .map_err(|e| crate::Error::Io(format!("failed to stat {path_str}: {e}")))?
            .len();

        if size > MAX_FILE_SIZE {
            return Err(crate::Error::InvalidArgument(format!(
                "{path_str} is too large to index: {size} bytes (max {MAX_FILE_SIZE})"
            )));
        }

        Ok(Self {
            file,
            size,
            path: path_str,
        })
    }

    /// Returns the file size in bytes.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Reads the document as a UTF-8 string.
    ///
    /// Uses memory mapping for large files.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails or content is not valid UTF-8.
    pub fn read_to_string(&self) -> Result<String> {
        let bytes = if self.size >= MMAP_THRESHOLD {
            // Safety: read-only mapping of a file we hold open
            let mmap = unsafe {
                Mmap::map(&self.file)
                    .map_err(|e| crate::Error::Io(format!("mmap failed for {}: {e}", self.path)))?
            };
            mmap.to_vec()
        } else {
            let mut buffer = Vec::with_capacity(usize::try_from(self.size).unwrap_or(0));
            (&self.file)
                .read_to_end(&mut buffer)
                .map_err(|e| crate::Error::Io(format!("failed to read {}: {e}", self.path)))?;
            buffer
        };

        String::from_utf8(bytes)
            .map_err(|e| crate::Error::Io(format!("{} is not valid UTF-8: {e}", self.path)))
    }
}

/// Reads a document to string, automatically choosing the best method.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not valid UTF-8.
pub fn read_file<P: AsRef<Path>>(path: P) -> Result<String> {
    FileReader::open(path)?.read_to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_small_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"alpha beta gamma").unwrap();

        let content = read_file(tmp.path()).unwrap();
        assert_eq!(content, "alpha beta gamma");
    }

    #[test]
    fn test_read_large_file_uses_mmap() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        let body = "lorem ipsum ".repeat(100_000); // > 1 MiB
        tmp.write_all(body.as_bytes()).unwrap();

        let reader = FileReader::open(tmp.path()).unwrap();
        assert!(reader.size() >= MMAP_THRESHOLD);
        assert_eq!(reader.read_to_string().unwrap(), body);
    }

    #[test]
    fn test_missing_file() {
        let result = read_file("/nonexistent/fastsearch-test.txt");
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_utf8() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[0xff, 0xfe, 0x00]).unwrap();

        let result = read_file(tmp.path());
        assert!(result.is_err());
    }
}
