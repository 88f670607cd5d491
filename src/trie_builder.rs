//! Search trie construction.
//!
//! Networks are inserted one at a time into an arena of nodes. Inserting a
//! more-specific prefix under an existing data record splits the record into
//! a node whose children both inherit it; inserting a less-specific prefix
//! over an existing subtree backfills that subtree's empty slots without
//! touching the more-specific records already there.
//!
//! Before serialization the tree is canonicalized bottom-up: structurally
//! identical subtrees are hash-consed into one shared node, which turns the
//! tree into a DAG and shrinks the node array. Final node numbers are
//! assigned by a breadth-first pass from the root, so identical input sets
//! serialize to identical bytes.

use crate::error::{Error, Result};
use crate::key::BitKey;
use crate::trie::NODE_BYTES;
use rustc_hash::FxHashMap;

/// A child slot during construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Empty,
    Node(u32),
    /// Payload offset plus the prefix length that wrote it; the length
    /// decides which record survives when prefixes overlap and is dropped
    /// at serialization time.
    Data { offset: u32, prefix_len: u8 },
}

#[derive(Debug, Clone, Copy)]
struct BuildNode {
    left: Slot,
    right: Slot,
}

impl BuildNode {
    fn empty() -> Self {
        Self {
            left: Slot::Empty,
            right: Slot::Empty,
        }
    }

    fn get(&self, bit: u8) -> Slot {
        if bit == 0 {
            self.left
        } else {
            self.right
        }
    }

    fn set(&mut self, bit: u8, slot: Slot) {
        if bit == 0 {
            self.left = slot;
        } else {
            self.right = slot;
        }
    }
}

/// Canonical child slot after hash-consing; prefix lengths are gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum CanonSlot {
    Empty,
    Node(u32),
    Data(u32),
}

/// Arena-based trie builder.
pub struct TrieBuilder {
    nodes: Vec<BuildNode>,
}

impl TrieBuilder {
    /// Create a builder holding only the root.
    pub fn new() -> Self {
        Self {
            nodes: vec![BuildNode::empty()],
        }
    }

    /// Insert a network with its payload offset.
    pub fn insert(&mut self, key: &BitKey, data_offset: u32) -> Result<()> {
        if key.is_empty() {
            return Err(Error::InvalidParam(
                "zero-length prefix is not insertable".to_string(),
            ));
        }
        let prefix_len = key.len();
        let mut node = 0u32;

        for depth in 0..prefix_len {
            let bit = key.bit(depth);
            let slot = self.nodes[node as usize].get(bit);
            let last = depth + 1 == prefix_len;

            if last {
                match slot {
                    Slot::Empty => {
                        self.nodes[node as usize].set(
                            bit,
                            Slot::Data {
                                offset: data_offset,
                                prefix_len,
                            },
                        );
                    }
                    Slot::Data {
                        prefix_len: existing,
                        ..
                    } => {
                        // Equal-or-longer wins; an equal length here means
                        // the same network was inserted twice and the later
                        // payload replaces the earlier one.
                        if prefix_len >= existing {
                            self.nodes[node as usize].set(
                                bit,
                                Slot::Data {
                                    offset: data_offset,
                                    prefix_len,
                                },
                            );
                        }
                    }
                    Slot::Node(subtree) => {
                        // More-specific prefixes already live below; fill
                        // the gaps they left.
                        self.backfill(subtree, data_offset, prefix_len);
                    }
                }
                return Ok(());
            }

            match slot {
                Slot::Empty => {
                    let next = self.allocate();
                    self.nodes[node as usize].set(bit, Slot::Node(next));
                    node = next;
                }
                Slot::Node(next) => node = next,
                Slot::Data {
                    offset: existing_offset,
                    prefix_len: existing_len,
                } => {
                    // A shorter prefix terminates here; push it down one
                    // level so both halves keep matching it, then continue.
                    let next = self.allocate();
                    let inherited = Slot::Data {
                        offset: existing_offset,
                        prefix_len: existing_len,
                    };
                    self.nodes[next as usize].left = inherited;
                    self.nodes[next as usize].right = inherited;
                    self.nodes[node as usize].set(bit, Slot::Node(next));
                    node = next;
                }
            }
        }
        Ok(())
    }

    fn allocate(&mut self) -> u32 {
        let id = self.nodes.len() as u32;
        self.nodes.push(BuildNode::empty());
        id
    }

    /// Overlay a less-specific data record onto a subtree: empty slots take
    /// it, shorter-prefix records yield to it, longer-prefix records keep
    /// their more specific rule.
    fn backfill(&mut self, node: u32, data_offset: u32, prefix_len: u8) {
        for bit in 0..2u8 {
            match self.nodes[node as usize].get(bit) {
                Slot::Empty => self.nodes[node as usize].set(
                    bit,
                    Slot::Data {
                        offset: data_offset,
                        prefix_len,
                    },
                ),
                Slot::Data {
                    prefix_len: existing,
                    ..
                } => {
                    if prefix_len > existing {
                        self.nodes[node as usize].set(
                            bit,
                            Slot::Data {
                                offset: data_offset,
                                prefix_len,
                            },
                        );
                    }
                }
                Slot::Node(child) => self.backfill(child, data_offset, prefix_len),
            }
        }
    }

    /// Canonicalize, renumber, and serialize.
    ///
    /// Returns the trie section bytes and the node count.
    pub fn build(self) -> Result<(Vec<u8>, u32)> {
        let canonical = Canonicalizer::run(&self.nodes);
        let (order, final_ids) = bfs_order(&canonical);
        let node_count = order.len() as u32;

        let mut bytes = Vec::with_capacity(order.len() * NODE_BYTES);
        for &canon_id in &order {
            let (left, right) = canonical.nodes[canon_id as usize];
            for slot in [left, right] {
                let record = match slot {
                    CanonSlot::Empty => node_count,
                    CanonSlot::Node(id) => final_ids[&id],
                    CanonSlot::Data(offset) => node_count
                        .checked_add(1)
                        .and_then(|base| base.checked_add(offset))
                        .ok_or_else(|| {
                            Error::OutOfMemory(format!(
                                "data offset {offset} does not fit a 32-bit record"
                            ))
                        })?,
                };
                bytes.extend_from_slice(&record.to_be_bytes());
            }
        }
        Ok((bytes, node_count))
    }
}

impl Default for TrieBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Bottom-up hash-consing of identical subtrees.
struct Canonicalizer {
    /// Canonical nodes as (left, right) pairs; index = canonical id.
    nodes: Vec<(CanonSlot, CanonSlot)>,
    interned: FxHashMap<(CanonSlot, CanonSlot), u32>,
    /// Canonical id of the original root.
    root: u32,
}

impl Canonicalizer {
    fn run(nodes: &[BuildNode]) -> Self {
        let mut c = Self {
            nodes: Vec::new(),
            interned: FxHashMap::default(),
            root: 0,
        };
        let mut memo: FxHashMap<u32, u32> = FxHashMap::default();
        c.root = c.canonicalize(0, nodes, &mut memo);
        c
    }

    fn canonicalize(
        &mut self,
        node: u32,
        nodes: &[BuildNode],
        memo: &mut FxHashMap<u32, u32>,
    ) -> u32 {
        if let Some(&id) = memo.get(&node) {
            return id;
        }
        let build = nodes[node as usize];
        let left = self.canon_slot(build.left, nodes, memo);
        let right = self.canon_slot(build.right, nodes, memo);
        let key = (left, right);
        let id = match self.interned.get(&key) {
            Some(&id) => id,
            None => {
                let id = self.nodes.len() as u32;
                self.nodes.push(key);
                self.interned.insert(key, id);
                id
            }
        };
        memo.insert(node, id);
        id
    }

    fn canon_slot(
        &mut self,
        slot: Slot,
        nodes: &[BuildNode],
        memo: &mut FxHashMap<u32, u32>,
    ) -> CanonSlot {
        match slot {
            Slot::Empty => CanonSlot::Empty,
            Slot::Data { offset, .. } => CanonSlot::Data(offset),
            Slot::Node(child) => CanonSlot::Node(self.canonicalize(child, nodes, memo)),
        }
    }
}

/// Breadth-first numbering from the root so the root serializes as node 0
/// and layout is a pure function of the canonical DAG.
fn bfs_order(canonical: &Canonicalizer) -> (Vec<u32>, FxHashMap<u32, u32>) {
    let mut order = Vec::new();
    let mut final_ids = FxHashMap::default();
    let mut queue = std::collections::VecDeque::new();

    final_ids.insert(canonical.root, 0u32);
    order.push(canonical.root);
    queue.push_back(canonical.root);

    while let Some(canon_id) = queue.pop_front() {
        let (left, right) = canonical.nodes[canon_id as usize];
        for slot in [left, right] {
            if let CanonSlot::Node(child) = slot {
                if !final_ids.contains_key(&child) {
                    final_ids.insert(child, order.len() as u32);
                    order.push(child);
                    queue.push_back(child);
                }
            }
        }
    }
    (order, final_ids)
}
