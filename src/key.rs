//! Key canonicalization for trie lookups.
//!
//! Every prefix key becomes a fixed-width bit string: 128 bits for a
//! v6-capable database, 32 bits for a v4-only one. IPv4 addresses live in
//! the v6 trie at the IPv4-mapped position `::ffff:0:0/96`, so one trie
//! serves both families. The walker consumes bits MSB-first.

use crate::error::{Error, Result};
use std::net::{IpAddr, Ipv4Addr};

/// Width of a v4-only trie in bits.
pub const V4_BITS: u8 = 32;
/// Width of a v6 trie in bits.
pub const V6_BITS: u8 = 128;

/// Bit offset of the IPv4-mapped block inside a v6 trie.
pub const V4_MAPPED_PREFIX_BITS: u8 = 96;

/// A canonicalized lookup key: up to 128 bits stored MSB-first in the high
/// bits of a `u128`, plus the number of significant bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitKey {
    bits: u128,
    len: u8,
    /// Set when the key addresses the IPv4-mapped block of a v6 trie; the
    /// reported prefix length is then rebased to IPv4 terms.
    pub v4_in_v6: bool,
}

impl BitKey {
    /// Canonicalize an address for a full-width lookup.
    ///
    /// With `v4_only`, IPv6 inputs are accepted only in their IPv4-mapped
    /// form; anything else fails with the dedicated status.
    pub fn for_lookup(addr: IpAddr, v4_only: bool) -> Result<Self> {
        match (addr, v4_only) {
            (IpAddr::V4(v4), true) => Ok(Self {
                bits: (u32::from(v4) as u128) << 96,
                len: V4_BITS,
                v4_in_v6: false,
            }),
            (IpAddr::V6(v6), true) => match v6.to_ipv4_mapped() {
                Some(v4) => Ok(Self {
                    bits: (u32::from(v4) as u128) << 96,
                    len: V4_BITS,
                    v4_in_v6: false,
                }),
                None => Err(Error::Ipv6LookupInIpv4Database(v6.to_string())),
            },
            (IpAddr::V4(v4), false) => Ok(Self {
                bits: v4_mapped_bits(v4),
                len: V6_BITS,
                v4_in_v6: true,
            }),
            (IpAddr::V6(v6), false) => Ok(Self {
                bits: u128::from(v6),
                len: V6_BITS,
                v4_in_v6: v6.to_ipv4_mapped().is_some(),
            }),
        }
    }

    /// Canonicalize a network (address + prefix length) for insertion.
    pub fn for_network(addr: IpAddr, prefix_len: u8, v4_only: bool) -> Result<Self> {
        match addr {
            IpAddr::V4(v4) => {
                if prefix_len > V4_BITS {
                    return Err(Error::InvalidParam(format!(
                        "IPv4 prefix length {prefix_len} exceeds {V4_BITS}"
                    )));
                }
                if v4_only {
                    Ok(Self {
                        bits: (u32::from(v4) as u128) << 96,
                        len: prefix_len,
                        v4_in_v6: false,
                    })
                } else {
                    Ok(Self {
                        bits: v4_mapped_bits(v4),
                        len: V4_MAPPED_PREFIX_BITS + prefix_len,
                        v4_in_v6: true,
                    })
                }
            }
            IpAddr::V6(v6) => {
                if v4_only {
                    return Err(Error::Ipv6LookupInIpv4Database(v6.to_string()));
                }
                if prefix_len > V6_BITS {
                    return Err(Error::InvalidParam(format!(
                        "IPv6 prefix length {prefix_len} exceeds {V6_BITS}"
                    )));
                }
                Ok(Self {
                    bits: u128::from(v6),
                    len: prefix_len,
                    v4_in_v6: false,
                })
            }
        }
    }

    /// Number of significant bits.
    pub fn len(&self) -> u8 {
        self.len
    }

    /// True for the degenerate zero-length key (the `/0` network).
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bit `i` counted from the most significant end.
    pub fn bit(&self, i: u8) -> u8 {
        debug_assert!(i < 128);
        ((self.bits >> (127 - i)) & 1) as u8
    }
}

/// A v4 address placed at the IPv4-mapped position of the v6 space.
fn v4_mapped_bits(addr: Ipv4Addr) -> u128 {
    (0xffff_u128 << 32) | u32::from(addr) as u128
}

/// Parse a textual key as an address or CIDR network.
///
/// Returns `None` for anything that is not address-shaped; such keys are
/// pattern queries, not prefix queries.
pub fn parse_network(text: &str) -> Option<(IpAddr, u8)> {
    if let Ok(addr) = text.parse::<IpAddr>() {
        let width = if addr.is_ipv4() { V4_BITS } else { V6_BITS };
        return Some((addr, width));
    }
    let (addr_part, prefix_part) = text.split_once('/')?;
    let addr = addr_part.parse::<IpAddr>().ok()?;
    let prefix_len = prefix_part.parse::<u8>().ok()?;
    let width = if addr.is_ipv4() { V4_BITS } else { V6_BITS };
    (prefix_len <= width).then_some((addr, prefix_len))
}
