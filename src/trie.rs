//! Search trie walker.
//!
//! The trie section is a contiguous array of nodes; each node is two 32-bit
//! big-endian records (left for bit 0, right for bit 1). A record is tagged
//! by value:
//!
//! - `record < node_count` — index of the next node
//! - `record == node_count` — empty: no rule covers this prefix
//! - `record > node_count` — data: payload at `record - node_count - 1`
//!   in the data section
//!
//! The walk consumes key bits MSB-first; the first data record encountered
//! wins and deeper bits are never consulted. Empty subtrees never fall back
//! to an ancestor.

use crate::error::{Error, Result};
use crate::key::BitKey;

/// Bytes per node: two 32-bit records.
pub const NODE_BYTES: usize = 8;

/// A decoded trie record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Record {
    /// Continue at this node index.
    SearchNode(u32),
    /// No rule covers this prefix.
    Empty,
    /// Payload at this data-section offset.
    Data(u32),
}

/// Outcome of one trie walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrieAnswer {
    /// Payload offset when a data record terminated the walk.
    pub data_offset: Option<u32>,
    /// Bits consumed: the matched prefix length on a hit, the depth at
    /// which the walk went empty otherwise.
    pub prefix_len: u16,
}

/// Read-only walker over a trie section.
pub struct SearchTrie<'a> {
    data: &'a [u8],
    node_count: u32,
}

impl<'a> SearchTrie<'a> {
    /// Wrap a trie section of `node_count` nodes.
    pub fn new(data: &'a [u8], node_count: u32) -> Self {
        Self { data, node_count }
    }

    /// Check that the section holds exactly the declared nodes and that
    /// every record is decodable. Used by the untrusted open path.
    pub fn validate(&self, data_section_len: usize) -> Result<()> {
        let expected = self.node_count as usize * NODE_BYTES;
        if self.data.len() != expected {
            return Err(Error::CorruptSearchTrie(format!(
                "trie section is {} bytes, expected {expected} for {} nodes",
                self.data.len(),
                self.node_count
            )));
        }
        for node in 0..self.node_count {
            for side in 0..2u8 {
                match self.record(node, side)? {
                    Record::SearchNode(_) | Record::Empty => {}
                    Record::Data(offset) => {
                        if offset as usize >= data_section_len {
                            return Err(Error::CorruptSearchTrie(format!(
                                "record at node {node} addresses data offset {offset} past \
                                 section end {data_section_len}"
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Walk the key's bits to the first data or empty record.
    pub fn walk(&self, key: &BitKey) -> Result<TrieAnswer> {
        if self.node_count == 0 {
            return Ok(TrieAnswer {
                data_offset: None,
                prefix_len: 0,
            });
        }
        let mut node = 0u32;
        for depth in 0..key.len() {
            match self.record(node, key.bit(depth))? {
                Record::SearchNode(next) => node = next,
                Record::Empty => {
                    return Ok(TrieAnswer {
                        data_offset: None,
                        prefix_len: depth as u16,
                    })
                }
                Record::Data(offset) => {
                    return Ok(TrieAnswer {
                        data_offset: Some(offset),
                        prefix_len: depth as u16 + 1,
                    })
                }
            }
        }
        // Every walk must resolve within the key's bit width; running out
        // of bits while still on nodes means the trie is deeper than the
        // declared width.
        Err(Error::CorruptSearchTrie(format!(
            "walk exhausted {} bits without resolving",
            key.len()
        )))
    }

    /// Decode one record of a node.
    fn record(&self, node: u32, side: u8) -> Result<Record> {
        if node >= self.node_count {
            return Err(Error::InvalidNodeNumber(node));
        }
        let offset = node as usize * NODE_BYTES + side as usize * 4;
        let bytes = self.data.get(offset..offset + 4).ok_or_else(|| {
            Error::CorruptSearchTrie(format!("node {node} outside trie section"))
        })?;
        let value = u32::from_be_bytes(bytes.try_into().unwrap());
        Ok(if value < self.node_count {
            Record::SearchNode(value)
        } else if value == self.node_count {
            Record::Empty
        } else {
            Record::Data(value - self.node_count - 1)
        })
    }
}
