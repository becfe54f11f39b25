//! MMDB Search Tree Traversal
//!
//! The tree uses a compact binary representation where each node contains
//! two records (left and right) that point to either:
//! - Another node (continue traversal)
//! - A data section offset (found)
//! - A "not found" marker

use super::format::MmdbHeader;
use super::types::{IpVersion, RecordSize, DATA_SECTION_SEPARATOR_SIZE};
use crate::error::{CompactError, Result};
use std::net::IpAddr;

/// What a record points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordTarget {
    /// Inner node index
    Node(u32),
    /// Offset relative to the start of the data section
    Data(usize),
    /// No data for this half of the range
    Empty,
}

/// Result of an IP lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupResult {
    /// Offset into the data section (relative to data section start)
    pub data_offset: usize,
    /// Network prefix length in the family of the queried address
    pub prefix_len: u8,
}

/// Search tree over a borrowed file buffer
#[derive(Clone, Copy)]
pub struct SearchTree<'a> {
    /// The raw file data containing the tree
    data: &'a [u8],
    /// Parsed header information
    header: &'a MmdbHeader,
}

impl<'a> SearchTree<'a> {
    /// Create a new search tree
    pub fn new(data: &'a [u8], header: &'a MmdbHeader) -> Self {
        Self { data, header }
    }

    /// Parsed header
    pub fn header(&self) -> &'a MmdbHeader {
        self.header
    }

    /// True if the tree has no nodes (every address resolves to nothing)
    pub fn is_empty(&self) -> bool {
        self.header.node_count == 0
    }

    /// Read and classify one child record of `node`
    pub fn child(&self, node: u32, side: u8) -> Result<RecordTarget> {
        let record = self.read_record(node, side)?;
        self.classify(record, node)
    }

    /// Both children of `node`, left first
    pub fn children(&self, node: u32) -> Result<(RecordTarget, RecordTarget)> {
        Ok((self.child(node, 0)?, self.child(node, 1)?))
    }

    /// Look up an IP address
    ///
    /// IPv4 addresses in an IPv6 tree are looked up under `::/96`.
    pub fn lookup(&self, ip: IpAddr) -> Result<Option<LookupResult>> {
        let (bits, family_offset) = match (ip, self.header.ip_version) {
            (IpAddr::V4(v4), IpVersion::V4) => ((u32::from(v4) as u128) << 96, 0u8),
            (IpAddr::V4(v4), IpVersion::V6) => (u32::from(v4) as u128, 96u8),
            (IpAddr::V6(v6), IpVersion::V6) => (u128::from(v6), 0u8),
            (IpAddr::V6(v6), IpVersion::V4) => {
                return Err(CompactError::InvalidNetwork(format!(
                    "cannot look up IPv6 address {} in an IPv4 database",
                    v6
                )))
            }
        };

        Ok(self
            .lookup_bits(bits, self.header.ip_version.bit_count())?
            .map(|(data_offset, depth)| LookupResult {
                data_offset,
                prefix_len: depth.saturating_sub(family_offset),
            }))
    }

    /// Walk the top `bit_count` bits of `bits`
    ///
    /// Returns the data offset and the depth at which it was found.
    pub fn lookup_bits(&self, bits: u128, bit_count: u8) -> Result<Option<(usize, u8)>> {
        if self.is_empty() {
            return Ok(None);
        }

        let mut node = 0u32;
        for depth in 0..bit_count {
            let bit = ((bits >> (127 - depth as u32)) & 1) as u8;
            match self.child(node, bit)? {
                RecordTarget::Empty => return Ok(None),
                RecordTarget::Data(offset) => return Ok(Some((offset, depth + 1))),
                RecordTarget::Node(next) => node = next,
            }
        }

        Err(CompactError::malformed(
            self.node_offset(node),
            format!("search tree deeper than {} bits", bit_count),
        ))
    }

    /// Node reached by following 96 zero bits in an IPv6 tree
    ///
    /// This is the root of the IPv4 subtree; `None` if the walk ends early.
    pub fn ipv4_start_node(&self) -> Result<Option<u32>> {
        if self.header.ip_version != IpVersion::V6 || self.is_empty() {
            return Ok(None);
        }

        let mut node = 0u32;
        for _ in 0..96 {
            match self.child(node, 0)? {
                RecordTarget::Node(next) => node = next,
                _ => return Ok(None),
            }
        }
        Ok(Some(node))
    }

    fn node_offset(&self, node: u32) -> usize {
        node as usize * self.header.record_size.node_bytes()
    }

    /// Classify a raw record value
    ///
    /// Per the MaxMind DB format:
    /// - Record value < node_count is a node index
    /// - Record value == node_count means "no data"
    /// - Otherwise data_offset = (record_value - node_count) - 16
    fn classify(&self, record: u32, node: u32) -> Result<RecordTarget> {
        let node_count = self.header.node_count;
        if record < node_count {
            return Ok(RecordTarget::Node(record));
        }
        if record == node_count {
            return Ok(RecordTarget::Empty);
        }

        let biased = (record - node_count) as usize;
        let offset = biased.checked_sub(DATA_SECTION_SEPARATOR_SIZE).ok_or_else(|| {
            CompactError::malformed(
                self.node_offset(node),
                format!(
                    "record {} of node {} points into the data section separator",
                    record, node
                ),
            )
        })?;

        if offset >= self.header.data_section_len() {
            return Err(CompactError::malformed(
                self.node_offset(node),
                format!(
                    "record {} of node {} points to data offset {}, data section is {} bytes",
                    record,
                    node,
                    offset,
                    self.header.data_section_len()
                ),
            ));
        }

        Ok(RecordTarget::Data(offset))
    }

    /// Read a record from a node
    ///
    /// Each node contains two records. `side` determines which:
    /// - 0 = left record (for IP bit 0)
    /// - 1 = right record (for IP bit 1)
    fn read_record(&self, node: u32, side: u8) -> Result<u32> {
        if node >= self.header.node_count {
            return Err(CompactError::malformed(
                self.header.tree_size,
                format!(
                    "node index {} exceeds node count {}",
                    node, self.header.node_count
                ),
            ));
        }

        let node_bytes = self.header.record_size.node_bytes();
        let offset = self.node_offset(node);
        let bytes = self
            .data
            .get(offset..offset + node_bytes)
            .ok_or_else(|| {
                CompactError::malformed(offset, format!("node {} truncated", node))
            })?;

        Ok(match (self.header.record_size, side) {
            (RecordSize::Bits24, 0) => u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]),
            (RecordSize::Bits24, _) => u32::from_be_bytes([0, bytes[3], bytes[4], bytes[5]]),
            // Layout: [Left 24 bits][Middle 8 bits][Right 24 bits]
            // Middle byte contains 4 high bits of left + 4 high bits of right
            (RecordSize::Bits28, 0) => {
                u32::from_be_bytes([bytes[3] >> 4, bytes[0], bytes[1], bytes[2]])
            }
            (RecordSize::Bits28, _) => {
                u32::from_be_bytes([bytes[3] & 0x0F, bytes[4], bytes[5], bytes[6]])
            }
            (RecordSize::Bits32, 0) => u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            (RecordSize::Bits32, _) => u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        })
    }
}
