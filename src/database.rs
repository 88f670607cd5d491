//! Unified read-only database: open, query, navigate, introspect.
//!
//! A [`Database`] owns its backing bytes (memory mapping or buffer) and a
//! section table; every query structure — trie walker, pattern index,
//! value decoder — is a borrowed view rebuilt on demand from those
//! sections, so opening does no parsing beyond validation and queries do
//! no allocation beyond their results.
//!
//! [`Entry`] handles borrow from the database and are valid only while it
//! is open; the borrow checker enforces exactly the lifetime rule the file
//! format requires.
//!
//! Concurrency: all query paths take `&self` and read immutable mapped
//! bytes. The optional LRU cache is behind a `Mutex`, so a `Database` can
//! be shared across threads freely.

use crate::error::{Error, Result};
use crate::format::{self, Layout};
use crate::key::{BitKey, V4_MAPPED_PREFIX_BITS};
use crate::mmap::Storage;
use crate::pattern::PatternIndex;
use crate::trie::SearchTrie;
use crate::value::{Decoder, FlatEntry, RawValue, Value};
use lru::LruCache;
use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, trace};

/// Options for [`Database::open_with_options`].
///
/// Construct with [`OpenOptions::default`] so code keeps compiling as
/// fields are added.
#[derive(Debug, Clone, Copy)]
pub struct OpenOptions {
    /// Capacity of the per-database query cache; 0 disables it.
    pub cache_capacity: u32,
    /// Skip the footer CRC and structural spot-checks. Only for files under
    /// the caller's control.
    pub trusted: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            cache_capacity: 1000,
            trusted: false,
        }
    }
}

/// Cached outcome of one key lookup.
#[derive(Debug, Clone, Copy)]
struct CachedAnswer {
    found: bool,
    prefix_len: u16,
    data_offset: u32,
}

/// Result of [`Database::query`].
#[derive(Debug)]
pub struct QueryAnswer<'a> {
    /// Whether any record matched.
    pub found: bool,
    /// Matched prefix length in bits (0 for pattern matches).
    pub prefix_len: u16,
    entry: Option<Entry<'a>>,
}

impl<'a> QueryAnswer<'a> {
    /// The matched entry; fails with the no-data status when nothing
    /// matched.
    pub fn entry(&self) -> Result<Entry<'a>> {
        self.entry
            .ok_or_else(|| Error::NoData("query found no record".to_string()))
    }
}

/// One pattern match from [`Database::query_all_patterns`].
#[derive(Debug)]
pub struct PatternHit<'a> {
    /// Dense lexicographic pattern ID.
    pub pattern_id: u32,
    /// The pattern string, borrowed from the mapping.
    pub pattern: &'a str,
    /// The pattern's payload.
    pub entry: Entry<'a>,
}

/// A borrowed handle to one payload in the data section.
///
/// Valid only while its database is open; copying is cheap.
#[derive(Debug, Clone, Copy)]
pub struct Entry<'a> {
    db: &'a Database,
    offset: u32,
}

impl<'a> Entry<'a> {
    /// Offset of the payload in the data section.
    pub fn data_offset(&self) -> u32 {
        self.offset
    }

    /// Decode the full payload.
    pub fn value(&self) -> Result<Value> {
        let (value, _) = self.db.decoder().read_value(self.offset as usize)?;
        Ok(value)
    }

    /// Walk a path of map keys / array indices and decode the value there.
    pub fn navigate(&self, path: &[&str]) -> Result<Value> {
        let decoder = self.db.decoder();
        let at = decoder.navigate(self.offset as usize, path)?;
        let (value, _) = decoder.read_value(at)?;
        Ok(value)
    }

    /// Prefix-order linearization of the payload.
    pub fn flatten(&self) -> Result<Vec<FlatEntry>> {
        self.db.decoder().flatten(self.offset as usize)
    }

    /// Prefix-order linearization with scalars borrowed from the mapping.
    pub fn flatten_raw(&self) -> Result<Vec<RawValue<'a>>> {
        self.db.decoder().flatten_raw(self.offset as usize)
    }

    /// Read the payload's head without materializing it.
    pub fn peek(&self) -> Result<RawValue<'a>> {
        self.db.decoder().peek(self.offset as usize)
    }

    /// Navigate a path and read the head of the value there; strings and
    /// bytes borrow from the mapping.
    pub fn peek_at(&self, path: &[&str]) -> Result<RawValue<'a>> {
        let decoder = self.db.decoder();
        let at = decoder.navigate(self.offset as usize, path)?;
        decoder.peek(at)
    }

    /// Serialize the payload to a JSON string.
    pub fn to_json(&self) -> Result<String> {
        let value = self.value()?;
        serde_json::to_string(&value.to_json())
            .map_err(|e| Error::InvalidData(format!("JSON serialization failed: {e}")))
    }
}

/// An opened, sealed, read-only lookup database.
pub struct Database {
    storage: Storage,
    layout: Layout,
    node_count: u32,
    cache: Option<Mutex<LruCache<Vec<u8>, CachedAnswer>>>,
}

impl Database {
    /// Open and memory-map a database file with default options.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_options(path, OpenOptions::default())
    }

    /// Open and memory-map a database file.
    pub fn open_with_options(path: impl AsRef<Path>, options: OpenOptions) -> Result<Self> {
        let storage = Storage::map_file(path.as_ref())?;
        let db = Self::from_storage(storage, options)?;
        debug!(
            path = %path.as_ref().display(),
            bytes = db.storage.len(),
            trusted = options.trusted,
            "database opened"
        );
        Ok(db)
    }

    /// Open a database over caller-provided bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::from_bytes_with_options(bytes, OpenOptions::default())
    }

    /// Open a database over caller-provided bytes with options.
    pub fn from_bytes_with_options(bytes: Vec<u8>, options: OpenOptions) -> Result<Self> {
        Self::from_storage(Storage::Owned(bytes), options)
    }

    /// Open a database over a borrowed buffer that outlives the handle.
    ///
    /// # Safety
    ///
    /// The caller must guarantee the buffer stays valid and unmodified for
    /// the lifetime of the returned database. This is the C `open_buffer`
    /// contract.
    pub unsafe fn from_static_buffer(
        bytes: &'static [u8],
        options: OpenOptions,
    ) -> Result<Self> {
        Self::from_storage(Storage::Static(bytes), options)
    }

    fn from_storage(storage: Storage, options: OpenOptions) -> Result<Self> {
        let layout = format::layout(storage.as_slice(), options.trusted)?;

        // Metadata is decoded once for the trie geometry; the map itself
        // stays in the mapping until `metadata()` is called.
        let buffer = storage.as_slice();
        let metadata_bytes = &buffer[layout.metadata.clone()];
        let (metadata, _) = Decoder::new(metadata_bytes).read_value(0).map_err(|e| {
            Error::InvalidMetadata(format!("metadata does not decode: {e}"))
        })?;
        let node_count = metadata_node_count(&metadata)?;
        if layout.flags.has_trie {
            let record_size = metadata_uint(&metadata, "record_size")?;
            if record_size != 32 {
                return Err(Error::InvalidMetadata(format!(
                    "record size {record_size} is not supported (only 32)"
                )));
            }
        }

        if !options.trusted {
            let trie = SearchTrie::new(&buffer[layout.trie.clone()], node_count);
            trie.validate(layout.data.len())?;
            if let Some(range) = &layout.patterns {
                PatternIndex::from_section(&buffer[range.clone()], false)?;
            }
            trace!(node_count, "structural validation passed");
        }

        let cache = NonZeroUsize::new(options.cache_capacity as usize)
            .map(|capacity| Mutex::new(LruCache::new(capacity)));

        Ok(Self {
            storage,
            layout,
            node_count,
            cache,
        })
    }

    /// Release the database.
    ///
    /// Dropping has the same effect; this name exists for symmetry with the
    /// C surface. Consuming the handle invalidates all entries at compile
    /// time.
    pub fn close(self) {}

    // -- queries ------------------------------------------------------------

    /// Query a textual key.
    ///
    /// Keys that parse as IP addresses walk the trie; everything else runs
    /// a pattern query and reports the first (lowest-ID) match. Use
    /// [`Database::query_all_patterns`] for the full match set.
    pub fn query(&self, key_text: &str) -> Result<QueryAnswer<'_>> {
        if let Ok(addr) = key_text.parse::<IpAddr>() {
            return self.query_ip(addr);
        }

        if let Some(hit) = self.cache_get(key_text.as_bytes()) {
            return Ok(self.answer_from_cache(hit));
        }
        let matches = self.query_all_patterns(key_text)?;
        let answer = match matches.first() {
            Some(hit) => CachedAnswer {
                found: true,
                prefix_len: 0,
                data_offset: hit.entry.offset,
            },
            None => CachedAnswer {
                found: false,
                prefix_len: 0,
                data_offset: 0,
            },
        };
        self.cache_put(key_text.as_bytes().to_vec(), answer);
        Ok(self.answer_from_cache(answer))
    }

    /// Query an IP address against the trie.
    pub fn query_ip(&self, addr: IpAddr) -> Result<QueryAnswer<'_>> {
        if !self.layout.flags.has_trie {
            return Ok(QueryAnswer {
                found: false,
                prefix_len: 0,
                entry: None,
            });
        }
        let key = BitKey::for_lookup(addr, self.layout.flags.v4_only)?;

        let mut cache_key = Vec::with_capacity(18);
        cache_key.push(0x00);
        cache_key.push(key.len());
        for i in 0..key.len() {
            cache_key.push(key.bit(i));
        }
        if let Some(hit) = self.cache_get(&cache_key) {
            return Ok(self.answer_from_cache(hit));
        }

        let trie = SearchTrie::new(self.trie_section(), self.node_count);
        let walked = trie.walk(&key)?;

        // Prefix lengths for v4 keys resolved inside the v6-mapped block
        // are reported in IPv4 terms.
        let rebase = |bits: u16| -> u16 {
            if key.v4_in_v6 && bits >= V4_MAPPED_PREFIX_BITS as u16 {
                bits - V4_MAPPED_PREFIX_BITS as u16
            } else {
                bits
            }
        };

        let answer = match walked.data_offset {
            Some(offset) => CachedAnswer {
                found: true,
                prefix_len: rebase(walked.prefix_len),
                data_offset: offset,
            },
            None => CachedAnswer {
                found: false,
                prefix_len: rebase(walked.prefix_len),
                data_offset: 0,
            },
        };
        self.cache_put(cache_key, answer);
        Ok(self.answer_from_cache(answer))
    }

    /// Find every pattern matching `text`, sorted by pattern ID.
    pub fn query_all_patterns(&self, text: &str) -> Result<Vec<PatternHit<'_>>> {
        let index = match self.pattern_index()? {
            Some(index) => index,
            None => return Ok(Vec::new()),
        };
        let matches = index.query_all(text)?;
        let mut hits = Vec::with_capacity(matches.len());
        for m in matches {
            hits.push(PatternHit {
                pattern_id: m.pattern_id,
                pattern: index.pattern_string(m.pattern_id)?,
                entry: Entry {
                    db: self,
                    offset: m.data_offset,
                },
            });
        }
        Ok(hits)
    }

    /// Re-create an entry handle from a data-section offset.
    ///
    /// The offset must have come from a query against this same database
    /// (the C surface round-trips offsets this way). A wrong offset does
    /// not break safety; decoding it simply fails.
    pub fn entry_at(&self, offset: u32) -> Entry<'_> {
        Entry { db: self, offset }
    }

    // -- introspection ------------------------------------------------------

    /// Decode the metadata map.
    pub fn metadata(&self) -> Result<Value> {
        let bytes = &self.storage.as_slice()[self.layout.metadata.clone()];
        let (value, _) = Decoder::new(bytes).read_value(0)?;
        Ok(value)
    }

    /// Container format version.
    pub fn format_version(&self) -> u32 {
        self.layout.version
    }

    /// True when the file carries a search trie.
    pub fn has_trie_data(&self) -> bool {
        self.layout.flags.has_trie
    }

    /// True when the file carries a pattern index.
    pub fn has_pattern_data(&self) -> bool {
        self.layout.flags.has_patterns
    }

    /// Human-readable database kind.
    pub fn kind(&self) -> &'static str {
        match (self.layout.flags.has_trie, self.layout.flags.has_patterns) {
            (true, true) => "combined prefix and pattern database",
            (true, false) => "prefix database",
            (false, true) => "pattern database",
            (false, false) => "empty database",
        }
    }

    /// Number of stored patterns (0 without a pattern index).
    pub fn pattern_count(&self) -> usize {
        match self.pattern_index() {
            Ok(Some(index)) => index.pattern_count(),
            _ => 0,
        }
    }

    /// The pattern string for a dense pattern ID.
    pub fn pattern_string(&self, pattern_id: u32) -> Result<&str> {
        let index = self
            .pattern_index()?
            .ok_or_else(|| Error::NoData("database has no pattern index".to_string()))?;
        index.pattern_string(pattern_id)
    }

    // -- internals ----------------------------------------------------------

    fn decoder(&self) -> Decoder<'_> {
        Decoder::new(&self.storage.as_slice()[self.layout.data.clone()])
    }

    fn trie_section(&self) -> &[u8] {
        &self.storage.as_slice()[self.layout.trie.clone()]
    }

    fn pattern_index(&self) -> Result<Option<PatternIndex<'_>>> {
        match &self.layout.patterns {
            // Validation ran at open for untrusted files; reopening the
            // view is a header read.
            Some(range) => Ok(Some(PatternIndex::from_section(
                &self.storage.as_slice()[range.clone()],
                true,
            )?)),
            None => Ok(None),
        }
    }

    fn answer_from_cache(&self, cached: CachedAnswer) -> QueryAnswer<'_> {
        QueryAnswer {
            found: cached.found,
            prefix_len: cached.prefix_len,
            entry: cached.found.then_some(Entry {
                db: self,
                offset: cached.data_offset,
            }),
        }
    }

    fn cache_get(&self, key: &[u8]) -> Option<CachedAnswer> {
        let cache = self.cache.as_ref()?;
        let mut guard = cache.lock().ok()?;
        guard.get(key).copied()
    }

    fn cache_put(&self, key: Vec<u8>, answer: CachedAnswer) {
        if let Some(cache) = &self.cache {
            if let Ok(mut guard) = cache.lock() {
                guard.put(key, answer);
            }
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("bytes", &self.storage.len())
            .field("kind", &self.kind())
            .field("node_count", &self.node_count)
            .field("cached", &self.cache.is_some())
            .finish()
    }
}

fn metadata_node_count(metadata: &Value) -> Result<u32> {
    Ok(metadata_uint(metadata, "node_count")? as u32)
}

fn metadata_uint(metadata: &Value, key: &str) -> Result<u64> {
    let map = match metadata {
        Value::Map(m) => m,
        _ => {
            return Err(Error::InvalidMetadata(
                "metadata is not a map".to_string(),
            ))
        }
    };
    match map.get(key) {
        Some(Value::Uint16(n)) => Ok(*n as u64),
        Some(Value::Uint32(n)) => Ok(*n as u64),
        Some(Value::Uint64(n)) => Ok(*n),
        Some(_) => Err(Error::InvalidMetadata(format!(
            "field {key:?} is not an unsigned integer"
        ))),
        None => Err(Error::InvalidMetadata(format!(
            "required field {key:?} missing"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::DatabaseBuilder;
    use std::collections::BTreeMap;

    fn payload(tag: &str) -> Value {
        let mut m = BTreeMap::new();
        m.insert("tag".to_string(), Value::String(tag.to_string()));
        Value::Map(m)
    }

    fn tagged(answer: &QueryAnswer<'_>) -> String {
        match answer.entry().unwrap().navigate(&["tag"]).unwrap() {
            Value::String(s) => s,
            other => panic!("expected string tag, got {other:?}"),
        }
    }

    fn build(entries: &[(&str, &str)]) -> Database {
        let mut builder = DatabaseBuilder::new();
        for (key, tag) in entries {
            builder.add_entry(key, payload(tag)).unwrap();
        }
        Database::from_bytes(builder.build().unwrap()).unwrap()
    }

    #[test]
    fn ip_query_hits_and_misses() {
        let db = build(&[("8.8.8.0/24", "dns"), ("10.0.0.0/8", "private")]);
        let answer = db.query("8.8.8.8").unwrap();
        assert!(answer.found);
        assert_eq!(answer.prefix_len, 24);
        assert_eq!(tagged(&answer), "dns");

        let answer = db.query("9.9.9.9").unwrap();
        assert!(!answer.found);
        assert!(answer.entry().is_err());
    }

    #[test]
    fn longest_prefix_wins() {
        let db = build(&[
            ("10.0.0.0/8", "outer"),
            ("10.1.0.0/16", "middle"),
            ("10.1.2.0/24", "inner"),
        ]);
        let answer = db.query("10.1.2.3").unwrap();
        assert_eq!(answer.prefix_len, 24);
        assert_eq!(tagged(&answer), "inner");

        let answer = db.query("10.1.9.9").unwrap();
        assert_eq!(answer.prefix_len, 16);
        assert_eq!(tagged(&answer), "middle");

        let answer = db.query("10.9.9.9").unwrap();
        assert_eq!(answer.prefix_len, 8);
        assert_eq!(tagged(&answer), "outer");
    }

    #[test]
    fn v6_database_serves_both_families() {
        let db = build(&[("2001:db8::/32", "doc"), ("8.8.8.0/24", "dns")]);
        let answer = db.query("2001:db8::1").unwrap();
        assert!(answer.found);
        assert_eq!(answer.prefix_len, 32);

        let answer = db.query("8.8.4.4").unwrap();
        assert!(!answer.found);
        let answer = db.query("8.8.8.1").unwrap();
        assert!(answer.found);
        assert_eq!(answer.prefix_len, 24);
    }

    #[test]
    fn v6_lookup_in_v4_only_database_fails() {
        let db = build(&[("1.2.3.0/24", "v4")]);
        let err = db.query("2001:db8::1").unwrap_err();
        assert!(matches!(err, Error::Ipv6LookupInIpv4Database(_)));
        // The v4-mapped form is fine.
        let answer = db.query("::ffff:1.2.3.4").unwrap();
        assert!(answer.found);
    }

    #[test]
    fn pattern_queries() {
        let db = build(&[("*.txt", "text"), ("*.log", "log"), ("test_*", "test")]);
        let hits = db.query_all_patterns("test_file.txt").unwrap();
        let patterns: Vec<&str> = hits.iter().map(|h| h.pattern).collect();
        assert_eq!(patterns, vec!["*.txt", "test_*"]);
        // Sorted by id.
        assert!(hits.windows(2).all(|w| w[0].pattern_id < w[1].pattern_id));

        let hits = db.query_all_patterns("nothing.rs").unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn unified_query_takes_first_pattern_match() {
        let db = build(&[("*.txt", "text"), ("hello", "greeting"), ("*world*", "world")]);
        let answer = db.query("hello_world").unwrap();
        assert!(answer.found);
        assert_eq!(answer.prefix_len, 0);
        assert_eq!(tagged(&answer), "world");

        let answer = db.query("nothing.rs").unwrap();
        assert!(!answer.found);
    }

    #[test]
    fn entry_to_json() {
        let db = build(&[("1.1.1.1", "one")]);
        let answer = db.query("1.1.1.1").unwrap();
        let json = answer.entry().unwrap().to_json().unwrap();
        assert_eq!(json, r#"{"tag":"one"}"#);
    }

    #[test]
    fn metadata_is_exposed() {
        let db = build(&[("1.1.1.1", "one")]);
        let metadata = db.metadata().unwrap();
        match metadata {
            Value::Map(m) => {
                assert!(matches!(m.get("node_count"), Some(Value::Uint32(_))));
                assert_eq!(m.get("record_size"), Some(&Value::Uint16(32)));
                assert_eq!(m.get("ip_version"), Some(&Value::Uint16(4)));
            }
            other => panic!("expected map, got {other:?}"),
        }
        assert_eq!(db.format_version(), crate::format::FORMAT_VERSION);
    }

    #[test]
    fn introspection() {
        let db = build(&[("1.1.1.1", "one"), ("*.txt", "text")]);
        assert!(db.has_trie_data());
        assert!(db.has_pattern_data());
        assert_eq!(db.kind(), "combined prefix and pattern database");
        assert_eq!(db.pattern_count(), 1);
        assert_eq!(db.pattern_string(0).unwrap(), "*.txt");
        assert!(db.pattern_string(7).is_err());

        let db = build(&[("*.txt", "text")]);
        assert_eq!(db.kind(), "pattern database");
        let answer = db.query("1.2.3.4").unwrap();
        assert!(!answer.found);
    }

    #[test]
    fn cache_does_not_change_answers() {
        let entries = [
            ("8.8.8.0/24", "dns"),
            ("10.0.0.0/8", "private"),
            ("*.txt", "text"),
        ];
        let mut builder = DatabaseBuilder::new();
        for (key, tag) in &entries {
            builder.add_entry(key, payload(tag)).unwrap();
        }
        let bytes = builder.build().unwrap();

        let cached = Database::from_bytes(bytes.clone()).unwrap();
        let uncached = Database::from_bytes_with_options(
            bytes,
            OpenOptions {
                cache_capacity: 0,
                trusted: false,
            },
        )
        .unwrap();

        for key in ["8.8.8.8", "10.2.3.4", "9.9.9.9", "file.txt", "8.8.8.8"] {
            let a = cached.query(key).unwrap();
            let b = uncached.query(key).unwrap();
            assert_eq!(a.found, b.found, "{key}");
            assert_eq!(a.prefix_len, b.prefix_len, "{key}");
            if a.found {
                assert_eq!(tagged(&a), tagged(&b), "{key}");
            }
        }
        // Interleave a different key, then re-ask: still the same answer.
        let before = cached.query("8.8.8.8").unwrap();
        cached.query("10.0.0.1").unwrap();
        let after = cached.query("8.8.8.8").unwrap();
        assert_eq!(before.prefix_len, after.prefix_len);
        assert_eq!(tagged(&before), tagged(&after));
    }

    #[test]
    fn trusted_open_skips_checksum() {
        let mut builder = DatabaseBuilder::new();
        builder.add_entry("1.1.1.1", payload("one")).unwrap();
        let mut bytes = builder.build().unwrap();
        // Flip a bit inside the data section so only the CRC notices.
        let layout = crate::format::layout(&bytes, true).unwrap();
        let victim = layout.data.end - 1;
        bytes[victim] ^= 0x01;

        assert!(Database::from_bytes(bytes.clone()).is_err());
        let db = Database::from_bytes_with_options(
            bytes,
            OpenOptions {
                cache_capacity: 0,
                trusted: true,
            },
        );
        assert!(db.is_ok());
    }

    #[test]
    fn database_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Database>();
    }
}
