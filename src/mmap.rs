//! Storage backing for an opened database.
//!
//! A database reads from exactly one of: a read-only memory mapping, an
//! owned byte vector, or a caller-guaranteed static borrow (the C buffer
//! path). All query structures borrow from this storage, so it lives
//! exactly as long as the [`crate::Database`] that owns it and is released
//! on close along with everything derived from it.

use crate::error::{Error, Result};
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

/// Backing bytes for an open database.
#[derive(Debug)]
pub enum Storage {
    /// Bytes owned by the database (built in memory or copied in).
    Owned(Vec<u8>),
    /// Read-only memory mapping; unmapped on drop.
    Mapped(Mmap),
    /// Caller-provided buffer that must outlive the database handle. Used
    /// by the C `open_buffer` path.
    Static(&'static [u8]),
}

impl Storage {
    /// Open a file and map it read-only.
    pub fn map_file(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|source| Error::FileOpen {
            path: path.display().to_string(),
            source,
        })?;
        // Safety: the mapping is read-only; mutating the file behind a live
        // mapping is declared out of contract for database files.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|source| Error::FileOpen {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Storage::Mapped(mmap))
    }

    /// The full backing slice.
    pub fn as_slice(&self) -> &[u8] {
        match self {
            Storage::Owned(v) => v.as_slice(),
            Storage::Mapped(m) => &m[..],
            Storage::Static(s) => s,
        }
    }

    /// Size of the backing bytes.
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// True when the backing is zero bytes.
    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn map_file_roundtrip() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"mapped bytes").unwrap();
        file.flush().unwrap();

        let storage = Storage::map_file(file.path()).unwrap();
        assert_eq!(storage.as_slice(), b"mapped bytes");
        assert_eq!(storage.len(), 12);
    }

    #[test]
    fn missing_file_is_file_open_error() {
        let err = Storage::map_file(Path::new("/nonexistent/matchy.db")).unwrap_err();
        assert!(matches!(err, Error::FileOpen { .. }));
    }

    #[test]
    fn owned_storage() {
        let storage = Storage::Owned(vec![1, 2, 3]);
        assert_eq!(storage.as_slice(), &[1, 2, 3]);
        assert!(!storage.is_empty());
    }
}
