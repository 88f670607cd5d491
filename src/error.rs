//! Error types and stable status codes.
//!
//! Every failure in the library maps onto one of the stable integer status
//! codes exposed through the C surface. The Rust side works with [`Error`],
//! which keeps enough context for diagnostics; the boundary collapses it to
//! a [`Status`] with [`Error::status`].

use std::io;
use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for database operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The file could not be opened.
    #[error("failed to open {path}: {source}")]
    FileOpen {
        /// Path that was being opened.
        path: String,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The search trie references a node outside its own bounds.
    #[error("corrupt search trie: {0}")]
    CorruptSearchTrie(String),

    /// The metadata section is missing a field or has the wrong shape.
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    /// I/O failure outside of open.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An allocation-size limit was exceeded.
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// The file is not a database this library understands.
    #[error("unknown database format: {0}")]
    UnknownFormat(String),

    /// Malformed bytes in the data section, a pointer cycle, or an
    /// out-of-bounds pointer target.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// A `navigate` path names a key or index that does not exist.
    #[error("lookup path invalid: {0}")]
    LookupPathInvalid(String),

    /// A `navigate` path descends into a value that is not a map or array.
    #[error("lookup path does not match data: {0}")]
    LookupPathDoesNotMatchData(String),

    /// A trie record decoded to an impossible node number.
    #[error("invalid node number {0}")]
    InvalidNodeNumber(u32),

    /// An IPv6 key was queried against a v4-only database.
    #[error("IPv6 lookup in IPv4-only database: {0}")]
    Ipv6LookupInIpv4Database(String),

    /// A caller-supplied argument was rejected before any work happened.
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// The operation needs a record that the database does not hold.
    #[error("no data: {0}")]
    NoData(String),
}

impl Error {
    /// Collapse to the stable status code for the C boundary.
    pub fn status(&self) -> Status {
        match self {
            Error::FileOpen { .. } => Status::FileOpenError,
            Error::CorruptSearchTrie(_) => Status::CorruptSearchTree,
            Error::InvalidMetadata(_) => Status::InvalidMetadata,
            Error::Io(_) => Status::IoError,
            Error::OutOfMemory(_) => Status::OutOfMemory,
            Error::UnknownFormat(_) => Status::UnknownDbFormat,
            Error::InvalidData(_) => Status::InvalidData,
            Error::LookupPathInvalid(_) => Status::LookupPathInvalid,
            Error::LookupPathDoesNotMatchData(_) => Status::LookupPathDoesNotMatchData,
            Error::InvalidNodeNumber(_) => Status::InvalidNodeNumber,
            Error::Ipv6LookupInIpv4Database(_) => Status::Ipv6InIpv4Db,
            Error::InvalidParam(_) => Status::InvalidParam,
            Error::NoData(_) => Status::NoData,
        }
    }
}

/// Stable integer status codes.
///
/// The values are part of the external interface and never change; adapter
/// layers remap them to their own idioms.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Operation succeeded.
    Success = 0,
    /// File could not be opened.
    FileOpenError = 1,
    /// Search trie is structurally corrupt.
    CorruptSearchTree = 2,
    /// Metadata section is invalid.
    InvalidMetadata = 3,
    /// I/O error.
    IoError = 4,
    /// Out of memory.
    OutOfMemory = 5,
    /// Not a recognized database file.
    UnknownDbFormat = 6,
    /// Malformed data section bytes.
    InvalidData = 7,
    /// Lookup path names a missing key or index.
    LookupPathInvalid = 8,
    /// Lookup path descends into a scalar.
    LookupPathDoesNotMatchData = 9,
    /// Impossible trie node number.
    InvalidNodeNumber = 10,
    /// IPv6 key against a v4-only database.
    Ipv6InIpv4Db = 11,
    /// Rejected argument.
    InvalidParam = 12,
    /// No record for the request.
    NoData = 13,
}

impl Status {
    /// Human-readable description for a status code.
    ///
    /// Returns a static string; unknown codes get a fixed fallback.
    pub fn describe(code: i32) -> &'static str {
        match code {
            0 => "Success",
            1 => "Error opening database file",
            2 => "Corrupt search tree",
            3 => "Invalid metadata",
            4 => "I/O error",
            5 => "Out of memory",
            6 => "Unknown database format",
            7 => "Invalid or corrupt data",
            8 => "Invalid lookup path",
            9 => "Lookup path does not match data",
            10 => "Invalid node number",
            11 => "IPv6 lookup in IPv4-only database",
            12 => "Invalid parameter",
            13 => "No data for this entry",
            _ => "Unknown error code",
        }
    }
}
