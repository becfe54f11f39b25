//! IP Tree Builder for MMDB Format
//!
//! Builds the binary search tree of an MMDB file in an arena. Leaves first
//! hold value references chosen by the caller; [`IpTreeBuilder::resolve_values`]
//! swaps them for data section offsets, and [`IpTreeBuilder::build`] lays the
//! arena out with the requested record size.

use crate::error::{CompactError, Result};
use crate::mmdb::{IpVersion, RecordSize, DATA_SECTION_SEPARATOR_SIZE};
use crate::network::{Network, IPV4_SUBTREE_PREFIX};

/// IP tree builder using arena allocation
pub struct IpTreeBuilder {
    /// All nodes in the tree (arena); index 0 is the root
    nodes: Vec<Node>,
    /// Address family of the tree (determines depth)
    ip_version: IpVersion,
    /// Set once leaves hold data offsets instead of value references
    resolved: bool,
}

/// A node in the IP tree
#[derive(Debug, Clone, Copy)]
struct Node {
    /// Left child (bit 0)
    left: NodePointer,
    /// Right child (bit 1)
    right: NodePointer,
}

/// Node pointer - another node, a data leaf, or nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodePointer {
    /// Index of another node
    Node(u32),
    /// Value reference (offset after resolution) and the prefix length that
    /// produced the leaf, used to keep the longest match while building
    Data(u32, u8),
    /// No data
    Empty,
}

impl IpTreeBuilder {
    /// Create a builder holding only the root node
    pub fn new(ip_version: IpVersion) -> Self {
        Self {
            nodes: vec![Node::EMPTY],
            ip_version,
            resolved: false,
        }
    }

    /// Reserve capacity for nodes to avoid reallocation
    pub fn reserve_nodes(&mut self, capacity: usize) {
        self.nodes.reserve(capacity.saturating_sub(self.nodes.len()));
    }

    /// Number of nodes allocated so far
    pub fn node_count(&self) -> u32 {
        self.nodes.len() as u32
    }

    /// Address family of the tree
    pub fn ip_version(&self) -> IpVersion {
        self.ip_version
    }

    /// Map `network` to the value reference `value`
    ///
    /// Later inserts of the same network replace earlier ones. A more
    /// specific network inserted under an existing leaf splits that leaf;
    /// a less specific one fills only the gaps around existing leaves.
    pub fn insert(&mut self, network: Network, value: u32) -> Result<()> {
        if self.resolved {
            return Err(CompactError::InvalidNetwork(format!(
                "cannot insert {} after values were resolved",
                network
            )));
        }
        let (bits, depth) = self.tree_path(network)?;

        if depth == 0 {
            self.fill_gaps(0, value, 0);
            return Ok(());
        }

        let mut node_id = 0u32;
        for level in 0..depth {
            let bit = ((bits >> (127 - level as u32)) & 1) as u8;
            let child = self.child(node_id, bit);

            if level + 1 == depth {
                match child {
                    NodePointer::Empty => {
                        self.set_child(node_id, bit, NodePointer::Data(value, depth));
                    }
                    NodePointer::Data(_, existing_depth) => {
                        if depth >= existing_depth {
                            self.set_child(node_id, bit, NodePointer::Data(value, depth));
                        }
                    }
                    NodePointer::Node(child_id) => self.fill_gaps(child_id, value, depth),
                }
                return Ok(());
            }

            node_id = match child {
                NodePointer::Node(child_id) => child_id,
                NodePointer::Empty => {
                    let new_id = self.allocate_node(Node::EMPTY)?;
                    self.set_child(node_id, bit, NodePointer::Node(new_id));
                    new_id
                }
                leaf @ NodePointer::Data(..) => {
                    // Split: both halves keep the enclosing leaf
                    let new_id = self.allocate_node(Node {
                        left: leaf,
                        right: leaf,
                    })?;
                    self.set_child(node_id, bit, NodePointer::Node(new_id));
                    new_id
                }
            };
        }

        Ok(())
    }

    /// Bits to follow and the tree depth of `network`
    fn tree_path(&self, network: Network) -> Result<(u128, u8)> {
        match self.ip_version {
            IpVersion::V6 => Ok((network.base(), network.prefix_len())),
            IpVersion::V4 if network.is_ipv4() => Ok((
                network.base() << IPV4_SUBTREE_PREFIX,
                network.prefix_len() - IPV4_SUBTREE_PREFIX,
            )),
            IpVersion::V4 => Err(CompactError::InvalidNetwork(format!(
                "{} does not fit in an IPv4 tree",
                network
            ))),
        }
    }

    fn child(&self, node_id: u32, bit: u8) -> NodePointer {
        let node = &self.nodes[node_id as usize];
        if bit == 0 {
            node.left
        } else {
            node.right
        }
    }

    fn set_child(&mut self, node_id: u32, bit: u8, pointer: NodePointer) {
        let node = &mut self.nodes[node_id as usize];
        if bit == 0 {
            node.left = pointer;
        } else {
            node.right = pointer;
        }
    }

    fn allocate_node(&mut self, node: Node) -> Result<u32> {
        let id = u32::try_from(self.nodes.len()).map_err(|_| {
            CompactError::CapacityExceeded(format!("more than {} tree nodes", u32::MAX))
        })?;
        self.nodes.push(node);
        Ok(id)
    }

    /// Point every empty or shorter leaf under `node_id` at `value`
    fn fill_gaps(&mut self, node_id: u32, value: u32, depth: u8) {
        for bit in 0..2u8 {
            match self.child(node_id, bit) {
                NodePointer::Empty => self.set_child(node_id, bit, NodePointer::Data(value, depth)),
                NodePointer::Data(_, existing_depth) if depth > existing_depth => {
                    self.set_child(node_id, bit, NodePointer::Data(value, depth))
                }
                NodePointer::Data(..) => {}
                NodePointer::Node(child_id) => self.fill_gaps(child_id, value, depth),
            }
        }
    }

    /// Replace value references with data section offsets
    ///
    /// Leaves are visited in node index order, left before right, so the
    /// data section is laid out in the order the tree references it.
    pub fn resolve_values<F>(&mut self, mut resolve: F) -> Result<()>
    where
        F: FnMut(u32) -> Result<u32>,
    {
        if self.resolved {
            return Ok(());
        }
        for node in &mut self.nodes {
            for pointer in [&mut node.left, &mut node.right] {
                if let NodePointer::Data(value, depth) = *pointer {
                    *pointer = NodePointer::Data(resolve(value)?, depth);
                }
            }
        }
        self.resolved = true;
        Ok(())
    }

    /// Largest record value the tree needs for a data section of `data_len` bytes
    pub fn max_record_value(&self, data_len: usize) -> u64 {
        self.nodes.len() as u64 + DATA_SECTION_SEPARATOR_SIZE as u64 + data_len as u64
    }

    /// Serialize the tree with `record_size`-bit records
    pub fn build(&self, record_size: RecordSize) -> Result<Vec<u8>> {
        if !self.resolved && self.nodes.iter().any(Node::has_data) {
            return Err(CompactError::InvalidNetwork(
                "tree built before its values were resolved".to_string(),
            ));
        }

        let node_count = self.node_count();
        let node_bytes = record_size.node_bytes();
        let mut tree = vec![0u8; self.nodes.len() * node_bytes];

        for (node, out) in self.nodes.iter().zip(tree.chunks_exact_mut(node_bytes)) {
            let left = pointer_value(node.left, node_count, record_size)?;
            let right = pointer_value(node.right, node_count, record_size)?;
            match record_size {
                RecordSize::Bits24 => write_24bit_node(out, left, right),
                RecordSize::Bits28 => write_28bit_node(out, left, right),
                RecordSize::Bits32 => write_32bit_node(out, left, right),
            }
        }

        Ok(tree)
    }
}

impl Node {
    const EMPTY: Node = Node {
        left: NodePointer::Empty,
        right: NodePointer::Empty,
    };

    fn has_data(&self) -> bool {
        matches!(self.left, NodePointer::Data(..)) || matches!(self.right, NodePointer::Data(..))
    }
}

/// Numeric record for a pointer: node index, `node_count` for empty, or
/// `node_count + 16 + offset` for data
fn pointer_value(pointer: NodePointer, node_count: u32, record_size: RecordSize) -> Result<u32> {
    let value = match pointer {
        NodePointer::Empty => node_count as u64,
        NodePointer::Node(id) => id as u64,
        NodePointer::Data(offset, _) => {
            node_count as u64 + DATA_SECTION_SEPARATOR_SIZE as u64 + offset as u64
        }
    };
    if value > record_size.max_value() {
        return Err(CompactError::CapacityExceeded(format!(
            "record value {} does not fit in {}-bit records",
            value,
            record_size.bits()
        )));
    }
    Ok(value as u32)
}

fn write_24bit_node(out: &mut [u8], left: u32, right: u32) {
    out[0..3].copy_from_slice(&left.to_be_bytes()[1..]);
    out[3..6].copy_from_slice(&right.to_be_bytes()[1..]);
}

/// Layout: [left low 24][left high 4 | right high 4][right low 24]
fn write_28bit_node(out: &mut [u8], left: u32, right: u32) {
    let left_bytes = left.to_be_bytes();
    let right_bytes = right.to_be_bytes();
    out[0..3].copy_from_slice(&left_bytes[1..]);
    out[3] = ((left_bytes[0] & 0x0F) << 4) | (right_bytes[0] & 0x0F);
    out[4..7].copy_from_slice(&right_bytes[1..]);
}

fn write_32bit_node(out: &mut [u8], left: u32, right: u32) {
    out[0..4].copy_from_slice(&left.to_be_bytes());
    out[4..8].copy_from_slice(&right.to_be_bytes());
}
