//! Database builder.
//!
//! The builder accepts (key, payload) pairs, classifies each key as a
//! network or a glob pattern, and seals everything into one file: metadata,
//! trie, deduplicated data section, optional pattern section, footer.
//!
//! Build output is a pure function of the entry set (plus the build epoch,
//! which can be pinned): entries are sorted before anything is encoded, so
//! insertion order never leaks into the file bytes.

use crate::error::{Error, Result};
use crate::format::{self, FormatFlags};
use crate::glob::{GlobPattern, MatchMode};
use crate::key::{parse_network, BitKey};
use crate::pattern::PatternIndexBuilder;
use crate::trie_builder::TrieBuilder;
use crate::value::{Encoder, Value};
use std::collections::BTreeMap;
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// How a key was classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    /// An IP address or CIDR network.
    Network {
        /// Network address.
        addr: IpAddr,
        /// Prefix length in bits.
        prefix_len: u8,
    },
    /// A glob pattern (any key that does not parse as an address).
    Pattern(String),
}

/// Classify a key string the way [`DatabaseBuilder::add_entry`] does.
///
/// Anything that parses as an address or CIDR is a network; everything
/// else, wildcards or not, is a pattern.
pub fn classify_key(key: &str) -> EntryKind {
    match parse_network(key) {
        Some((addr, prefix_len)) => EntryKind::Network { addr, prefix_len },
        None => EntryKind::Pattern(key.to_string()),
    }
}

/// Accumulates entries and seals them into a database file.
pub struct DatabaseBuilder {
    networks: BTreeMap<(u128, u8), (IpAddr, u8, Value)>,
    patterns: BTreeMap<String, Value>,
    match_mode: MatchMode,
    database_type: Option<String>,
    description: BTreeMap<String, String>,
    build_epoch: Option<u64>,
}

impl DatabaseBuilder {
    /// Create an empty, case-sensitive builder.
    pub fn new() -> Self {
        Self {
            networks: BTreeMap::new(),
            patterns: BTreeMap::new(),
            match_mode: MatchMode::CaseSensitive,
            database_type: None,
            description: BTreeMap::new(),
            build_epoch: None,
        }
    }

    /// Set the pattern match mode (default: case-sensitive).
    pub fn with_match_mode(mut self, mode: MatchMode) -> Self {
        self.match_mode = mode;
        self
    }

    /// Set the database type string stored in the metadata.
    pub fn with_database_type(mut self, db_type: impl Into<String>) -> Self {
        self.database_type = Some(db_type.into());
        self
    }

    /// Add a description in the given language.
    pub fn with_description(
        mut self,
        language: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        self.description.insert(language.into(), text.into());
        self
    }

    /// Pin the build epoch instead of sampling the clock at build time.
    ///
    /// Two builds of the same entry set with the same pinned epoch produce
    /// byte-identical files.
    pub fn with_build_epoch(mut self, epoch: u64) -> Self {
        self.build_epoch = Some(epoch);
        self
    }

    /// Add an entry. The key is classified automatically; re-adding a key
    /// replaces its payload.
    pub fn add_entry(&mut self, key: &str, payload: Value) -> Result<()> {
        if key.is_empty() {
            return Err(Error::InvalidParam("empty key".to_string()));
        }
        match classify_key(key) {
            EntryKind::Network { addr, prefix_len } => {
                if prefix_len == 0 {
                    return Err(Error::InvalidParam(
                        "the /0 network cannot be stored".to_string(),
                    ));
                }
                // Sort key must match trie geometry, so map v4 the same way
                // the trie will. v4-only-ness is decided at build time;
                // full-width keys keep sorting stable either way.
                let bit_key = BitKey::for_network(addr, prefix_len, false)?;
                let sort_bits = sort_bits_of(&bit_key);
                self.networks
                    .insert((sort_bits, bit_key.len()), (addr, prefix_len, payload));
            }
            EntryKind::Pattern(pattern) => {
                GlobPattern::new(&pattern, self.match_mode)?;
                self.patterns.insert(pattern, payload);
            }
        }
        Ok(())
    }

    /// Add an entry whose payload is JSON text.
    pub fn add_entry_json(&mut self, key: &str, json: &str) -> Result<()> {
        let parsed: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| Error::InvalidData(format!("payload is not valid JSON: {e}")))?;
        self.add_entry(key, Value::from_json(&parsed)?)
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.networks.len() + self.patterns.len()
    }

    /// True when nothing has been added.
    pub fn is_empty(&self) -> bool {
        self.networks.is_empty() && self.patterns.is_empty()
    }

    /// Seal everything into the file bytes.
    pub fn build(&self) -> Result<Vec<u8>> {
        let has_trie = !self.networks.is_empty();
        let has_patterns = !self.patterns.is_empty();
        let v4_only = has_trie
            && self
                .networks
                .values()
                .all(|(addr, _, _)| addr.is_ipv4());

        // Payloads first; both index structures reference these offsets.
        let mut data = Encoder::new();

        let mut trie_builder = TrieBuilder::new();
        for ((_, _), (addr, prefix_len, payload)) in &self.networks {
            let offset = data.encode(payload);
            let key = BitKey::for_network(*addr, *prefix_len, v4_only)?;
            trie_builder.insert(&key, offset)?;
        }
        let (trie_bytes, node_count) = if has_trie {
            trie_builder.build()?
        } else {
            (Vec::new(), 0)
        };

        let pattern_section = if has_patterns {
            let mut index = PatternIndexBuilder::new(self.match_mode);
            for (pattern, payload) in &self.patterns {
                let offset = data.encode(payload);
                index.add(pattern, offset)?;
            }
            Some(index.build()?)
        } else {
            None
        };

        let metadata_bytes = self.encode_metadata(node_count, v4_only, has_patterns)?;
        let data_bytes = data.into_bytes();

        debug!(
            networks = self.networks.len(),
            patterns = self.patterns.len(),
            node_count,
            data_len = data_bytes.len(),
            "sealing database"
        );

        Ok(format::seal(
            &metadata_bytes,
            &trie_bytes,
            &data_bytes,
            pattern_section.as_deref(),
            FormatFlags {
                has_trie,
                has_patterns,
                v4_only,
            },
        ))
    }

    /// Build and write the file atomically.
    ///
    /// The bytes go to a sibling temporary file that is renamed into place
    /// on success and removed on failure, so a failed save never leaves a
    /// half-written database at `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let bytes = self.build()?;

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = Path::new(&tmp);

        if let Err(e) = fs::write(tmp, &bytes) {
            let _ = fs::remove_file(tmp);
            return Err(e.into());
        }
        if let Err(e) = fs::rename(tmp, path) {
            let _ = fs::remove_file(tmp);
            return Err(e.into());
        }
        debug!(path = %path.display(), bytes = bytes.len(), "database saved");
        Ok(())
    }

    fn encode_metadata(
        &self,
        node_count: u32,
        v4_only: bool,
        has_patterns: bool,
    ) -> Result<Vec<u8>> {
        let epoch = match self.build_epoch {
            Some(e) => e,
            None => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_err(|_| Error::InvalidMetadata("system clock before 1970".to_string()))?
                .as_secs(),
        };

        let db_type = self.database_type.clone().unwrap_or_else(|| {
            match (!self.networks.is_empty(), has_patterns) {
                (true, true) => "Matchy-Combined".to_string(),
                (false, true) => "Matchy-Pattern".to_string(),
                _ => "Matchy-Prefix".to_string(),
            }
        });

        let description: BTreeMap<String, Value> = if self.description.is_empty() {
            [(
                "en".to_string(),
                Value::String("Matchy prefix and pattern lookup database".to_string()),
            )]
            .into()
        } else {
            self.description
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect()
        };

        let mut meta = BTreeMap::new();
        meta.insert("node_count".to_string(), Value::Uint32(node_count));
        meta.insert("record_size".to_string(), Value::Uint16(32));
        meta.insert(
            "ip_version".to_string(),
            Value::Uint16(if v4_only { 4 } else { 6 }),
        );
        meta.insert("build_epoch".to_string(), Value::Uint64(epoch));
        meta.insert("database_type".to_string(), Value::String(db_type));
        meta.insert("description".to_string(), Value::Map(description));

        let mut encoder = Encoder::new();
        encoder.encode(&Value::Map(meta));
        Ok(encoder.into_bytes())
    }
}

impl Default for DatabaseBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Sort key for a network: full-width bits with the prefix masked in, so
/// ordering is by position in the address space, then by specificity.
fn sort_bits_of(key: &BitKey) -> u128 {
    let mut bits: u128 = 0;
    for i in 0..key.len() {
        bits |= (key.bit(i) as u128) << (127 - i as u32);
    }
    bits
}
