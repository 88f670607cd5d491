//! Offset-based Aho–Corasick automaton over meta-words.
//!
//! The automaton is a pure byte machine: it knows nothing about glob
//! semantics or case folding. The builder produces the serialized form
//! directly, and queries run against that same flat buffer, so a database
//! opened from disk never recompiles anything.
//!
//! # Layout
//!
//! ```text
//! [AcNode x node_count][AcEdge pools][output u32 pools]
//! ```
//!
//! Node `i` lives at byte offset `i * 16`. Edge and output pools are
//! referenced by byte offsets relative to the start of the automaton
//! buffer. Edges are sorted by byte for binary search. Fields are
//! native-endian PODs; the format targets little-endian hosts.

use crate::error::{Error, Result};
use std::collections::{BTreeMap, VecDeque};
use std::mem;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Serialized automaton node (16 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct AcNode {
    /// Failure link as a node index (root fails to itself).
    pub failure: u32,
    /// Byte offset of this node's edge array (0 with `edge_count == 0`
    /// means no edges).
    pub edges_off: u32,
    /// Number of outgoing edges.
    pub edge_count: u16,
    /// Number of word IDs reported at this node.
    pub output_count: u16,
    /// Byte offset of this node's output array.
    pub outputs_off: u32,
}

/// Serialized automaton edge (8 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct AcEdge {
    /// Input byte.
    pub byte: u8,
    /// Explicit padding.
    pub pad: [u8; 3],
    /// Target node index.
    pub target: u32,
}

const NODE_SIZE: usize = mem::size_of::<AcNode>();
const EDGE_SIZE: usize = mem::size_of::<AcEdge>();

const _: () = assert!(NODE_SIZE == 16);
const _: () = assert!(EDGE_SIZE == 8);

/// Build-time automaton state.
struct BuildState {
    /// Sorted transitions; `BTreeMap` keeps serialization deterministic.
    transitions: BTreeMap<u8, u32>,
    failure: u32,
    outputs: Vec<u32>,
}

impl BuildState {
    fn new() -> Self {
        Self {
            transitions: BTreeMap::new(),
            failure: 0,
            outputs: Vec::new(),
        }
    }
}

/// Incremental automaton builder.
///
/// Words are byte strings; each carries a caller-assigned word ID that the
/// scan reports back. Duplicate words are the caller's concern (the pattern
/// index deduplicates meta-words before adding them).
pub struct AcBuilder {
    states: Vec<BuildState>,
}

impl AcBuilder {
    /// Create a builder holding only the root state.
    pub fn new() -> Self {
        Self {
            states: vec![BuildState::new()],
        }
    }

    /// Insert a word with its ID.
    pub fn add_word(&mut self, word: &[u8], word_id: u32) {
        let mut current = 0u32;
        for &b in word {
            current = match self.states[current as usize].transitions.get(&b) {
                Some(&next) => next,
                None => {
                    let next = self.states.len() as u32;
                    self.states.push(BuildState::new());
                    self.states[current as usize].transitions.insert(b, next);
                    next
                }
            };
        }
        self.states[current as usize].outputs.push(word_id);
    }

    /// Compute failure links with the standard BFS and merge suffix
    /// outputs into each state, then serialize.
    pub fn build(mut self) -> Vec<u8> {
        let mut queue = VecDeque::new();

        let root_children: Vec<u32> = self.states[0].transitions.values().copied().collect();
        for child in root_children {
            self.states[child as usize].failure = 0;
            queue.push_back(child);
        }

        while let Some(state_id) = queue.pop_front() {
            let transitions: Vec<(u8, u32)> = self.states[state_id as usize]
                .transitions
                .iter()
                .map(|(&b, &t)| (b, t))
                .collect();

            for (byte, next) in transitions {
                queue.push_back(next);

                let mut fail = self.states[state_id as usize].failure;
                loop {
                    if let Some(&target) = self.states[fail as usize].transitions.get(&byte) {
                        if target != next {
                            self.states[next as usize].failure = target;
                        }
                        break;
                    }
                    if fail == 0 {
                        self.states[next as usize].failure = 0;
                        break;
                    }
                    fail = self.states[fail as usize].failure;
                }

                // Inherit outputs from the whole suffix chain so the scan
                // only has to look at the current state.
                let mut suffix = self.states[next as usize].failure;
                let mut inherited = Vec::new();
                while suffix != 0 {
                    inherited.extend_from_slice(&self.states[suffix as usize].outputs);
                    suffix = self.states[suffix as usize].failure;
                }
                self.states[next as usize].outputs.extend(inherited);
            }
        }

        self.serialize()
    }

    fn serialize(mut self) -> Vec<u8> {
        for state in &mut self.states {
            state.outputs.sort_unstable();
            state.outputs.dedup();
        }

        let node_count = self.states.len();
        let total_edges: usize = self.states.iter().map(|s| s.transitions.len()).sum();
        let total_outputs: usize = self.states.iter().map(|s| s.outputs.len()).sum();

        let nodes_len = node_count * NODE_SIZE;
        let edges_len = total_edges * EDGE_SIZE;
        let outputs_len = total_outputs * mem::size_of::<u32>();
        let mut buffer = Vec::with_capacity(nodes_len + edges_len + outputs_len);

        // Nodes first; pools follow in node order.
        let mut edge_cursor = nodes_len;
        let mut output_cursor = nodes_len + edges_len;
        for state in &self.states {
            let node = AcNode {
                failure: state.failure,
                edges_off: if state.transitions.is_empty() {
                    0
                } else {
                    edge_cursor as u32
                },
                edge_count: state.transitions.len() as u16,
                output_count: state.outputs.len() as u16,
                outputs_off: if state.outputs.is_empty() {
                    0
                } else {
                    output_cursor as u32
                },
            };
            buffer.extend_from_slice(node.as_bytes());
            edge_cursor += state.transitions.len() * EDGE_SIZE;
            output_cursor += state.outputs.len() * mem::size_of::<u32>();
        }
        for state in &self.states {
            for (&byte, &target) in &state.transitions {
                let edge = AcEdge {
                    byte,
                    pad: [0; 3],
                    target,
                };
                buffer.extend_from_slice(edge.as_bytes());
            }
        }
        for state in &self.states {
            for &word_id in &state.outputs {
                buffer.extend_from_slice(&word_id.to_le_bytes());
            }
        }
        buffer
    }
}

impl Default for AcBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Zero-copy view over a serialized automaton.
#[derive(Clone, Copy)]
pub struct AcView<'a> {
    data: &'a [u8],
    node_count: u32,
}

impl<'a> AcView<'a> {
    /// Wrap a serialized automaton buffer.
    pub fn new(data: &'a [u8], node_count: u32) -> Self {
        Self { data, node_count }
    }

    /// Structural validation for untrusted buffers: every node readable,
    /// every edge target and failure link in range, every pool in bounds.
    pub fn validate(&self) -> Result<()> {
        if self.node_count == 0 {
            return if self.data.is_empty() {
                Ok(())
            } else {
                Err(Error::UnknownFormat(
                    "automaton bytes without nodes".to_string(),
                ))
            };
        }
        let nodes_len = self.node_count as usize * NODE_SIZE;
        if nodes_len > self.data.len() {
            return Err(Error::UnknownFormat(format!(
                "automaton node array ({nodes_len} bytes) exceeds section ({} bytes)",
                self.data.len()
            )));
        }
        for index in 0..self.node_count {
            let node = self.node(index)?;
            if node.failure >= self.node_count {
                return Err(Error::UnknownFormat(format!(
                    "automaton failure link {} out of range",
                    node.failure
                )));
            }
            let edges_end = node.edges_off as usize + node.edge_count as usize * EDGE_SIZE;
            if node.edge_count > 0 && edges_end > self.data.len() {
                return Err(Error::UnknownFormat(
                    "automaton edge pool out of bounds".to_string(),
                ));
            }
            for slot in 0..node.edge_count {
                let edge = self.edge(node.edges_off, slot)?;
                if edge.target >= self.node_count {
                    return Err(Error::UnknownFormat(format!(
                        "automaton edge target {} out of range",
                        edge.target
                    )));
                }
            }
            let outputs_end =
                node.outputs_off as usize + node.output_count as usize * mem::size_of::<u32>();
            if node.output_count > 0 && outputs_end > self.data.len() {
                return Err(Error::UnknownFormat(
                    "automaton output pool out of bounds".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Scan `text` and collect the IDs of every word that occurs in it,
    /// sorted and deduplicated.
    pub fn find_words(&self, text: &[u8]) -> Result<Vec<u32>> {
        if self.node_count == 0 {
            return Ok(Vec::new());
        }
        let mut found = Vec::new();
        let mut state = 0u32;

        for &byte in text {
            loop {
                if let Some(next) = self.transition(state, byte)? {
                    state = next;
                    break;
                }
                if state == 0 {
                    break;
                }
                state = self.node(state)?.failure;
            }

            let node = self.node(state)?;
            if node.output_count > 0 {
                for slot in 0..node.output_count {
                    found.push(self.output(node.outputs_off, slot)?);
                }
            }
        }

        found.sort_unstable();
        found.dedup();
        Ok(found)
    }

    fn node(&self, index: u32) -> Result<AcNode> {
        let offset = index as usize * NODE_SIZE;
        let slice = self.data.get(offset..).ok_or_else(|| {
            Error::CorruptSearchTrie(format!("automaton node {index} out of bounds"))
        })?;
        AcNode::read_from_prefix(slice)
            .map(|(node, _)| node)
            .map_err(|_| Error::CorruptSearchTrie(format!("automaton node {index} truncated")))
    }

    fn edge(&self, edges_off: u32, slot: u16) -> Result<AcEdge> {
        let offset = edges_off as usize + slot as usize * EDGE_SIZE;
        let slice = self
            .data
            .get(offset..)
            .ok_or_else(|| Error::CorruptSearchTrie("automaton edge out of bounds".to_string()))?;
        AcEdge::read_from_prefix(slice)
            .map(|(edge, _)| edge)
            .map_err(|_| Error::CorruptSearchTrie("automaton edge truncated".to_string()))
    }

    fn output(&self, outputs_off: u32, slot: u16) -> Result<u32> {
        let offset = outputs_off as usize + slot as usize * mem::size_of::<u32>();
        let bytes = self
            .data
            .get(offset..offset + 4)
            .ok_or_else(|| Error::CorruptSearchTrie("automaton output out of bounds".to_string()))?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    /// Binary-search this node's sorted edge array.
    fn transition(&self, state: u32, byte: u8) -> Result<Option<u32>> {
        let node = self.node(state)?;
        let (mut lo, mut hi) = (0u16, node.edge_count);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let edge = self.edge(node.edges_off, mid)?;
            match edge.byte.cmp(&byte) {
                std::cmp::Ordering::Equal => return Ok(Some(edge.target)),
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
            }
        }
        Ok(None)
    }
}

/// Number of nodes in a buffer produced by [`AcBuilder::build`].
///
/// The pools follow the node array, so the count is recovered from the
/// first node's pool offsets; an empty buffer has zero nodes.
pub fn node_count_of(buffer: &[u8]) -> u32 {
    if buffer.is_empty() {
        return 0;
    }
    match AcNode::read_from_prefix(buffer) {
        Ok((root, _)) => {
            // Root's edges_off (or outputs_off, or the buffer end when the
            // automaton is a bare root) marks the end of the node array.
            let boundary = if root.edge_count > 0 {
                root.edges_off as usize
            } else if root.output_count > 0 {
                root.outputs_off as usize
            } else {
                buffer.len()
            };
            (boundary / NODE_SIZE) as u32
        }
        Err(_) => 0,
    }
}
