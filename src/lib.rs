//! Matchy - read-optimized lookup database for IP prefixes and glob patterns
//!
//! Matchy stores two kinds of rules in one sealed, memory-mapped file and
//! answers both through one query engine:
//!
//! - **Prefix rules** (IP addresses and CIDR networks) resolved by
//!   longest-prefix match over a binary trie
//! - **Glob patterns** (`*`, `?`, `[...]`) resolved by an Aho-Corasick
//!   meta-word index with per-pattern confirmation
//!
//! Both kinds carry a structured payload (maps, arrays, strings, numbers)
//! stored once in a deduplicated, typed data section.
//!
//! # Quick start
//!
//! ```rust
//! use matchy::{Database, DatabaseBuilder};
//!
//! let mut builder = DatabaseBuilder::new();
//! builder.add_entry_json("1.2.3.0/24", r#"{"threat_level":"high"}"#)?;
//! builder.add_entry_json("*.evil.com", r#"{"category":"malware"}"#)?;
//! let bytes = builder.build()?;
//!
//! let db = Database::from_bytes(bytes)?;
//!
//! let answer = db.query("1.2.3.4")?;
//! assert!(answer.found);
//! assert_eq!(answer.prefix_len, 24);
//!
//! let hits = db.query_all_patterns("www.evil.com")?;
//! assert_eq!(hits.len(), 1);
//! # Ok::<(), matchy::Error>(())
//! ```
//!
//! # File layout
//!
//! ```text
//! ┌───────────────────────────────────────┐
//! │ header   magic · version · flags      │
//! │ metadata encoded map                  │
//! │ trie     node_count x 8 bytes         │
//! │ data     deduplicated typed values    │
//! │ patterns automaton · reverse map      │
//! │ footer   section table · CRC32       │
//! └───────────────────────────────────────┘
//! ```
//!
//! Opening validates the container and memory-maps it; no section is
//! parsed up front and queries read straight from the mapping. A sealed
//! file is immutable: all mutation happens in [`DatabaseBuilder`] before
//! [`DatabaseBuilder::save`].

#![warn(missing_docs)]
#![warn(clippy::all)]

mod automaton;
/// Database builder: classify keys, seal the file.
pub mod builder;
/// Stable C ABI.
pub mod c_api;
/// Unified query API.
pub mod database;
/// Error type and stable status codes.
pub mod error;
/// Container layout: header, sections, footer, checksum.
pub mod format;
/// Glob pattern grammar and matcher.
pub mod glob;
/// Lookup-key canonicalization.
pub mod key;
mod mmap;
/// Pattern index over the Aho-Corasick meta-word automaton.
pub mod pattern;
/// Search trie walker.
pub mod trie;
mod trie_builder;
/// Typed value codec for the data section.
pub mod value;

pub use crate::builder::{classify_key, DatabaseBuilder, EntryKind};
pub use crate::database::{Database, Entry, OpenOptions, PatternHit, QueryAnswer};
pub use crate::error::{Error, Result, Status};
pub use crate::glob::MatchMode;
pub use crate::value::{FlatEntry, RawValue, Value};

/// Library version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    #[test]
    fn version_is_wired() {
        assert!(!super::VERSION.is_empty());
    }
}
