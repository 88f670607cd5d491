//! Pattern index: meta-word extraction, sealed sub-format, and queries.
//!
//! Each glob pattern contributes its meta-words (maximal literal runs) to
//! one shared Aho–Corasick automaton. A query makes a single automaton pass
//! over the input, unions the reverse-mapped candidate patterns for every
//! meta-word that occurred, adds the always-check patterns (those with no
//! meta-words at all), and confirms each candidate with a full glob match.
//! Results come back sorted by pattern ID.
//!
//! Pattern IDs are dense `[0, N)` in lexicographic byte order of the
//! pattern strings, assigned when the section is sealed; they are stable
//! across open/close of the same file.
//!
//! # Section layout
//!
//! ```text
//! [PatternSectionHeader]
//! [PatternEntry x pattern_count]      id = array index
//! [pattern strings, concatenated]
//! [always-check pattern IDs, u32 x n]
//! [ReverseSlot x meta_word_count]     meta-word id -> candidate list
//! [reverse pool, u32 x total]
//! [automaton buffer]
//! ```
//!
//! All offsets are byte offsets from the section base; fields are
//! native-endian PODs for little-endian hosts, like the automaton itself.

use crate::automaton::{node_count_of, AcBuilder, AcView};
use crate::error::{Error, Result};
use crate::glob::{extract_meta_words, GlobPattern, MatchMode};
use rustc_hash::FxHashSet;
use std::collections::BTreeMap;
use std::mem;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Magic bytes opening the pattern section.
pub const PATTERN_MAGIC: [u8; 4] = *b"MXPT";

/// Pattern section sub-format version.
pub const PATTERN_VERSION: u32 = 1;

/// Fixed header of the pattern section (64 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct PatternSectionHeader {
    /// Magic: `MXPT`.
    pub magic: [u8; 4],
    /// Sub-format version.
    pub version: u32,
    /// 0 = case-sensitive, 1 = case-insensitive.
    pub match_mode: u32,
    /// Number of patterns.
    pub pattern_count: u32,
    /// Offset of the `PatternEntry` array.
    pub entries_off: u32,
    /// Offset of the string pool.
    pub strings_off: u32,
    /// Length of the string pool.
    pub strings_len: u32,
    /// Offset of the always-check ID array.
    pub always_off: u32,
    /// Number of always-check patterns.
    pub always_count: u32,
    /// Number of distinct meta-words.
    pub word_count: u32,
    /// Offset of the `ReverseSlot` array.
    pub reverse_index_off: u32,
    /// Offset of the reverse-map ID pool.
    pub reverse_pool_off: u32,
    /// Number of IDs in the reverse-map pool.
    pub reverse_pool_count: u32,
    /// Offset of the automaton buffer.
    pub ac_off: u32,
    /// Length of the automaton buffer.
    pub ac_len: u32,
    /// Number of automaton nodes.
    pub ac_node_count: u32,
}

/// Per-pattern record; the pattern's ID is its index in this array.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct PatternEntry {
    /// Offset of the pattern string in the string pool.
    pub string_off: u32,
    /// Length of the pattern string in bytes.
    pub string_len: u32,
    /// Offset of the pattern's payload in the data section.
    pub data_off: u32,
}

/// Reverse-map slot for one meta-word.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct ReverseSlot {
    /// Byte offset of this word's candidate IDs in the pool.
    pub pool_off: u32,
    /// Number of candidate IDs.
    pub count: u32,
}

const HEADER_SIZE: usize = mem::size_of::<PatternSectionHeader>();
const ENTRY_SIZE: usize = mem::size_of::<PatternEntry>();
const SLOT_SIZE: usize = mem::size_of::<ReverseSlot>();

const _: () = assert!(HEADER_SIZE == 64);
const _: () = assert!(ENTRY_SIZE == 12);
const _: () = assert!(SLOT_SIZE == 8);

/// One confirmed pattern match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternMatch {
    /// Dense lexicographic pattern ID.
    pub pattern_id: u32,
    /// Offset of the pattern's payload in the data section.
    pub data_offset: u32,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Accumulates patterns and seals them into the section bytes.
pub struct PatternIndexBuilder {
    mode: MatchMode,
    /// pattern string -> payload offset; the map keeps insertion
    /// deduplicated and iteration lexicographic, which is exactly the
    /// sealed ID order.
    entries: BTreeMap<String, u32>,
}

impl PatternIndexBuilder {
    /// Create a builder for the given match mode.
    pub fn new(mode: MatchMode) -> Self {
        Self {
            mode,
            entries: BTreeMap::new(),
        }
    }

    /// Add a pattern with its payload offset.
    ///
    /// The pattern must parse under the glob grammar. Re-adding an existing
    /// pattern replaces its payload.
    pub fn add(&mut self, pattern: &str, data_offset: u32) -> Result<()> {
        if pattern.is_empty() {
            return Err(Error::InvalidParam("empty pattern".to_string()));
        }
        GlobPattern::new(pattern, self.mode)?;
        self.entries.insert(pattern.to_string(), data_offset);
        Ok(())
    }

    /// Number of distinct patterns added so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no patterns were added.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Seal the index into its section bytes.
    pub fn build(self) -> Result<Vec<u8>> {
        let fold = |word: Vec<u8>| match self.mode {
            MatchMode::CaseSensitive => word,
            MatchMode::CaseInsensitive => word.to_ascii_lowercase(),
        };

        // IDs follow BTreeMap iteration: lexicographic order.
        let patterns: Vec<(&String, u32)> =
            self.entries.iter().map(|(p, &off)| (p, off)).collect();

        let mut always_check: Vec<u32> = Vec::new();
        let mut word_to_patterns: BTreeMap<Vec<u8>, Vec<u32>> = BTreeMap::new();
        for (id, (pattern, _)) in patterns.iter().enumerate() {
            let words = extract_meta_words(pattern);
            if words.is_empty() {
                always_check.push(id as u32);
                continue;
            }
            for word in words {
                word_to_patterns
                    .entry(fold(word))
                    .or_default()
                    .push(id as u32);
            }
        }

        // Meta-word IDs follow the sorted word order; the same order feeds
        // the automaton so its word IDs line up with the reverse slots.
        let mut ac_builder = AcBuilder::new();
        for (word_id, word) in word_to_patterns.keys().enumerate() {
            ac_builder.add_word(word, word_id as u32);
        }
        let ac_buffer = if word_to_patterns.is_empty() {
            Vec::new()
        } else {
            ac_builder.build()
        };
        let ac_node_count = node_count_of(&ac_buffer);

        // String pool.
        let mut strings = Vec::new();
        let mut string_spans = Vec::with_capacity(patterns.len());
        for (pattern, _) in &patterns {
            string_spans.push((strings.len() as u32, pattern.len() as u32));
            strings.extend_from_slice(pattern.as_bytes());
        }

        // Reverse map pool.
        let mut slots = Vec::with_capacity(word_to_patterns.len());
        let mut pool: Vec<u32> = Vec::new();
        for ids in word_to_patterns.values() {
            let mut ids = ids.clone();
            ids.sort_unstable();
            ids.dedup();
            slots.push(ReverseSlot {
                pool_off: (pool.len() * mem::size_of::<u32>()) as u32,
                count: ids.len() as u32,
            });
            pool.extend(ids);
        }

        // Lay out the section.
        let entries_off = HEADER_SIZE;
        let strings_off = entries_off + patterns.len() * ENTRY_SIZE;
        let always_off = strings_off + strings.len();
        let reverse_index_off = always_off + always_check.len() * mem::size_of::<u32>();
        let reverse_pool_off = reverse_index_off + slots.len() * SLOT_SIZE;
        let ac_off = reverse_pool_off + pool.len() * mem::size_of::<u32>();
        let total = ac_off + ac_buffer.len();

        let header = PatternSectionHeader {
            magic: PATTERN_MAGIC,
            version: PATTERN_VERSION,
            match_mode: match self.mode {
                MatchMode::CaseSensitive => 0,
                MatchMode::CaseInsensitive => 1,
            },
            pattern_count: patterns.len() as u32,
            entries_off: entries_off as u32,
            strings_off: strings_off as u32,
            strings_len: strings.len() as u32,
            always_off: always_off as u32,
            always_count: always_check.len() as u32,
            word_count: word_to_patterns.len() as u32,
            reverse_index_off: reverse_index_off as u32,
            reverse_pool_off: reverse_pool_off as u32,
            reverse_pool_count: pool.len() as u32,
            ac_off: ac_off as u32,
            ac_len: ac_buffer.len() as u32,
            ac_node_count,
        };

        let mut section = Vec::with_capacity(total);
        section.extend_from_slice(header.as_bytes());
        for (i, (_, data_off)) in patterns.iter().enumerate() {
            let entry = PatternEntry {
                string_off: string_spans[i].0,
                string_len: string_spans[i].1,
                data_off: *data_off,
            };
            section.extend_from_slice(entry.as_bytes());
        }
        section.extend_from_slice(&strings);
        for id in &always_check {
            section.extend_from_slice(&id.to_le_bytes());
        }
        for slot in &slots {
            section.extend_from_slice(slot.as_bytes());
        }
        for id in &pool {
            section.extend_from_slice(&id.to_le_bytes());
        }
        section.extend_from_slice(&ac_buffer);
        debug_assert_eq!(section.len(), total);
        Ok(section)
    }
}

// ---------------------------------------------------------------------------
// Query view
// ---------------------------------------------------------------------------

/// Zero-copy view over a sealed pattern section.
pub struct PatternIndex<'a> {
    section: &'a [u8],
    header: PatternSectionHeader,
    mode: MatchMode,
}

impl<'a> PatternIndex<'a> {
    /// Restore the index from its section bytes by structural mapping.
    ///
    /// In untrusted mode every table is bounds-checked, pattern strings are
    /// re-validated as UTF-8 and as well-formed globs, and the automaton is
    /// structurally verified. Trusted mode only reads the header.
    pub fn from_section(section: &'a [u8], trusted: bool) -> Result<Self> {
        let (header, _) = PatternSectionHeader::read_from_prefix(section)
            .map_err(|_| Error::UnknownFormat("pattern section too small".to_string()))?;
        if header.magic != PATTERN_MAGIC {
            return Err(Error::UnknownFormat(
                "pattern section magic mismatch".to_string(),
            ));
        }
        if header.version != PATTERN_VERSION {
            return Err(Error::UnknownFormat(format!(
                "unsupported pattern section version {}",
                header.version
            )));
        }
        let mode = match header.match_mode {
            0 => MatchMode::CaseSensitive,
            1 => MatchMode::CaseInsensitive,
            other => {
                return Err(Error::UnknownFormat(format!(
                    "unknown match mode {other}"
                )))
            }
        };
        let index = Self {
            section,
            header,
            mode,
        };
        if !trusted {
            index.validate()?;
        }
        Ok(index)
    }

    fn validate(&self) -> Result<()> {
        let h = &self.header;
        let len = self.section.len();
        let end_of = |off: u32, count: u32, item: usize| -> Result<usize> {
            let end = off as usize + count as usize * item;
            if end > len {
                Err(Error::UnknownFormat(
                    "pattern section table out of bounds".to_string(),
                ))
            } else {
                Ok(end)
            }
        };
        end_of(h.entries_off, h.pattern_count, ENTRY_SIZE)?;
        end_of(h.strings_off, h.strings_len, 1)?;
        end_of(h.always_off, h.always_count, mem::size_of::<u32>())?;
        end_of(h.reverse_index_off, h.word_count, SLOT_SIZE)?;
        end_of(h.reverse_pool_off, h.reverse_pool_count, mem::size_of::<u32>())?;
        end_of(h.ac_off, h.ac_len, 1)?;

        for id in 0..h.pattern_count {
            let pattern = self.pattern_string(id)?;
            GlobPattern::new(pattern, self.mode)?;
        }
        for slot in 0..h.always_count {
            let id = self.read_u32(h.always_off as usize + slot as usize * 4)?;
            if id >= h.pattern_count {
                return Err(Error::UnknownFormat(format!(
                    "always-check pattern ID {id} out of range"
                )));
            }
        }
        for word_id in 0..h.word_count {
            let slot = self.reverse_slot(word_id)?;
            let pool_end = slot.pool_off as usize + slot.count as usize * 4;
            if pool_end > h.reverse_pool_count as usize * 4 {
                return Err(Error::UnknownFormat(
                    "reverse-map slot out of bounds".to_string(),
                ));
            }
            for i in 0..slot.count {
                let id = self.read_u32(
                    h.reverse_pool_off as usize + slot.pool_off as usize + i as usize * 4,
                )?;
                if id >= h.pattern_count {
                    return Err(Error::UnknownFormat(format!(
                        "reverse-map pattern ID {id} out of range"
                    )));
                }
            }
        }
        self.automaton().validate()
    }

    /// Number of stored patterns.
    pub fn pattern_count(&self) -> usize {
        self.header.pattern_count as usize
    }

    /// Match mode the section was sealed with.
    pub fn match_mode(&self) -> MatchMode {
        self.mode
    }

    /// The pattern string for an ID, borrowed from the section.
    pub fn pattern_string(&self, id: u32) -> Result<&'a str> {
        if id >= self.header.pattern_count {
            return Err(Error::InvalidParam(format!("pattern ID {id} out of range")));
        }
        let entry = self.entry(id)?;
        let start = self.header.strings_off as usize + entry.string_off as usize;
        let end = start + entry.string_len as usize;
        let bytes = self
            .section
            .get(start..end)
            .ok_or_else(|| Error::UnknownFormat("pattern string out of bounds".to_string()))?;
        std::str::from_utf8(bytes)
            .map_err(|_| Error::InvalidData("pattern string is not valid UTF-8".to_string()))
    }

    /// Payload offset for a pattern ID.
    pub fn data_offset(&self, id: u32) -> Result<u32> {
        Ok(self.entry(id)?.data_off)
    }

    /// Find every pattern that matches `text`, sorted by pattern ID.
    pub fn query_all(&self, text: &str) -> Result<Vec<PatternMatch>> {
        let mut candidates: FxHashSet<u32> = FxHashSet::default();

        if self.header.word_count > 0 {
            let folded;
            let scan_bytes: &[u8] = match self.mode {
                MatchMode::CaseSensitive => text.as_bytes(),
                MatchMode::CaseInsensitive => {
                    folded = text.as_bytes().to_ascii_lowercase();
                    &folded
                }
            };
            for word_id in self.automaton().find_words(scan_bytes)? {
                let slot = self.reverse_slot(word_id)?;
                for i in 0..slot.count {
                    candidates.insert(self.read_u32(
                        self.header.reverse_pool_off as usize
                            + slot.pool_off as usize
                            + i as usize * 4,
                    )?);
                }
            }
        }
        for slot in 0..self.header.always_count {
            candidates
                .insert(self.read_u32(self.header.always_off as usize + slot as usize * 4)?);
        }

        let mut ordered: Vec<u32> = candidates.into_iter().collect();
        ordered.sort_unstable();

        let mut matches = Vec::new();
        for id in ordered {
            let pattern = GlobPattern::new(self.pattern_string(id)?, self.mode)?;
            if pattern.matches(text) {
                matches.push(PatternMatch {
                    pattern_id: id,
                    data_offset: self.data_offset(id)?,
                });
            }
        }
        Ok(matches)
    }

    fn automaton(&self) -> AcView<'a> {
        let start = self.header.ac_off as usize;
        let end = (start + self.header.ac_len as usize).min(self.section.len());
        AcView::new(
            self.section.get(start..end).unwrap_or(&[]),
            self.header.ac_node_count,
        )
    }

    fn entry(&self, id: u32) -> Result<PatternEntry> {
        let offset = self.header.entries_off as usize + id as usize * ENTRY_SIZE;
        let slice = self
            .section
            .get(offset..)
            .ok_or_else(|| Error::UnknownFormat("pattern entry out of bounds".to_string()))?;
        PatternEntry::read_from_prefix(slice)
            .map(|(e, _)| e)
            .map_err(|_| Error::UnknownFormat("pattern entry truncated".to_string()))
    }

    fn reverse_slot(&self, word_id: u32) -> Result<ReverseSlot> {
        let offset = self.header.reverse_index_off as usize + word_id as usize * SLOT_SIZE;
        let slice = self
            .section
            .get(offset..)
            .ok_or_else(|| Error::UnknownFormat("reverse slot out of bounds".to_string()))?;
        ReverseSlot::read_from_prefix(slice)
            .map(|(s, _)| s)
            .map_err(|_| Error::UnknownFormat("reverse slot truncated".to_string()))
    }

    fn read_u32(&self, offset: usize) -> Result<u32> {
        let bytes = self
            .section
            .get(offset..offset + 4)
            .ok_or_else(|| Error::UnknownFormat("pattern section read out of bounds".to_string()))?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seal(patterns: &[&str]) -> Vec<u8> {
        let mut builder = PatternIndexBuilder::new(MatchMode::CaseSensitive);
        for (i, p) in patterns.iter().enumerate() {
            builder.add(p, i as u32 * 100).unwrap();
        }
        builder.build().unwrap()
    }

    fn ids(section: &[u8], text: &str) -> Vec<u32> {
        let index = PatternIndex::from_section(section, false).unwrap();
        index
            .query_all(text)
            .unwrap()
            .into_iter()
            .map(|m| m.pattern_id)
            .collect()
    }

    #[test]
    fn ids_are_lexicographic() {
        let section = seal(&["zebra", "alpha", "middle"]);
        let index = PatternIndex::from_section(&section, false).unwrap();
        assert_eq!(index.pattern_string(0).unwrap(), "alpha");
        assert_eq!(index.pattern_string(1).unwrap(), "middle");
        assert_eq!(index.pattern_string(2).unwrap(), "zebra");
    }

    #[test]
    fn glob_candidates_are_confirmed() {
        // Sorted: "*.log"=0, "*.txt"=1, "test_*"=2
        let section = seal(&["*.txt", "*.log", "test_*"]);
        assert_eq!(ids(&section, "test_file.txt"), vec![1, 2]);
        assert_eq!(ids(&section, "server.log"), vec![0]);
        assert_eq!(ids(&section, "nothing.rs"), Vec::<u32>::new());
    }

    #[test]
    fn literal_patterns_match_exactly() {
        let section = seal(&["*.txt", "hello", "*world*"]);
        let index = PatternIndex::from_section(&section, false).unwrap();
        assert_eq!(index.pattern_string(0).unwrap(), "*.txt");
        assert_eq!(index.pattern_string(1).unwrap(), "*world*");
        assert_eq!(index.pattern_string(2).unwrap(), "hello");

        // A literal pattern is not a substring rule.
        assert_eq!(ids(&section, "hello"), vec![2]);
        assert_eq!(ids(&section, "hello_world"), vec![1]);
        assert_eq!(ids(&section, "nothing.rs"), Vec::<u32>::new());
    }

    #[test]
    fn always_check_patterns_run_on_every_query() {
        let section = seal(&["*?*", "literal"]);
        // "*?*" matches any input of length >= 1 even though it has no
        // meta-words for the automaton.
        assert_eq!(ids(&section, "x"), vec![0]);
        assert_eq!(ids(&section, "literal"), vec![0, 1]);
    }

    #[test]
    fn shared_meta_words_map_to_all_owners() {
        let section = seal(&["a*.txt", "b*.txt"]);
        assert_eq!(ids(&section, "a_file.txt"), vec![0]);
        assert_eq!(ids(&section, "b_file.txt"), vec![1]);
    }

    #[test]
    fn case_insensitive_index() {
        let mut builder = PatternIndexBuilder::new(MatchMode::CaseInsensitive);
        builder.add("*.TXT", 0).unwrap();
        builder.add("Hello", 4).unwrap();
        let section = builder.build().unwrap();
        let index = PatternIndex::from_section(&section, false).unwrap();
        let matched: Vec<u32> = index
            .query_all("HELLO")
            .unwrap()
            .into_iter()
            .map(|m| m.pattern_id)
            .collect();
        assert_eq!(matched.len(), 1);
        let matched: Vec<u32> = index
            .query_all("file.txt")
            .unwrap()
            .into_iter()
            .map(|m| m.pattern_id)
            .collect();
        assert_eq!(matched.len(), 1);
    }

    #[test]
    fn data_offsets_survive_sealing() {
        let mut builder = PatternIndexBuilder::new(MatchMode::CaseSensitive);
        builder.add("bbb", 200).unwrap();
        builder.add("aaa", 100).unwrap();
        let section = builder.build().unwrap();
        let index = PatternIndex::from_section(&section, false).unwrap();
        // "aaa" sorts first and keeps its payload offset.
        assert_eq!(index.data_offset(0).unwrap(), 100);
        assert_eq!(index.data_offset(1).unwrap(), 200);
    }

    #[test]
    fn sealing_is_deterministic() {
        let a = seal(&["*.txt", "test_*", "he?lo", "*?*"]);
        let b = seal(&["*.txt", "test_*", "he?lo", "*?*"]);
        assert_eq!(a, b);
    }

    #[test]
    fn empty_index_answers_nothing() {
        let section = PatternIndexBuilder::new(MatchMode::CaseSensitive)
            .build()
            .unwrap();
        let index = PatternIndex::from_section(&section, false).unwrap();
        assert_eq!(index.pattern_count(), 0);
        assert!(index.query_all("anything").unwrap().is_empty());
    }

    #[test]
    fn truncated_section_is_rejected() {
        let section = seal(&["*.txt"]);
        let truncated = &section[..section.len() - 5];
        assert!(PatternIndex::from_section(truncated, false).is_err());
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut section = seal(&["*.txt"]);
        section[0] = b'X';
        assert!(PatternIndex::from_section(&section, false).is_err());
    }
}
