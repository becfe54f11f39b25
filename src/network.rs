//! Networks in a uniform 128-bit address space
//!
//! IPv4 networks live in the IPv4 subtree `::/96`, so `1.2.3.0/24` is
//! stored as `::1.2.3.0/120`. This is where MMDB IPv6 trees keep IPv4
//! data and where IPv4 lookups against such trees descend.

use crate::data_section::DataValue;
use crate::error::{CompactError, Result};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Bits above an IPv4 address in the 128-bit space
pub const IPV4_SUBTREE_PREFIX: u8 = 96;

/// A CIDR network: base address plus prefix length (0-128)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Network {
    base: u128,
    prefix_len: u8,
}

impl Network {
    /// The whole address space, `::/0`
    pub const ALL: Network = Network {
        base: 0,
        prefix_len: 0,
    };

    /// The IPv4 subtree, `::/96`
    pub const IPV4_SUBTREE: Network = Network {
        base: 0,
        prefix_len: IPV4_SUBTREE_PREFIX,
    };

    /// Create a network; host bits below the prefix must be zero
    pub fn new(base: u128, prefix_len: u8) -> Result<Self> {
        if prefix_len > 128 {
            return Err(CompactError::InvalidNetwork(format!(
                "prefix length {} exceeds 128",
                prefix_len
            )));
        }
        if base & host_mask(prefix_len) != 0 {
            return Err(CompactError::InvalidNetwork(format!(
                "{}/{} has host bits set",
                Ipv6Addr::from(base),
                prefix_len
            )));
        }
        Ok(Network { base, prefix_len })
    }

    /// Network from an address and a prefix length in that address's family
    pub fn from_ip(addr: IpAddr, prefix_len: u8) -> Result<Self> {
        match addr {
            IpAddr::V4(v4) => {
                if prefix_len > 32 {
                    return Err(CompactError::InvalidNetwork(format!(
                        "IPv4 prefix length {} exceeds 32",
                        prefix_len
                    )));
                }
                Network::new(u32::from(v4) as u128, IPV4_SUBTREE_PREFIX + prefix_len)
            }
            IpAddr::V6(v6) => Network::new(u128::from(v6), prefix_len),
        }
    }

    /// First address
    pub fn base(&self) -> u128 {
        self.base
    }

    /// Prefix length in the 128-bit space
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Last address covered
    pub fn last(&self) -> u128 {
        self.base | host_mask(self.prefix_len)
    }

    /// True if `addr` falls inside this network
    pub fn contains(&self, addr: u128) -> bool {
        addr & !host_mask(self.prefix_len) == self.base
    }

    /// True if `other` is this network or nested inside it
    pub fn covers(&self, other: &Network) -> bool {
        other.prefix_len >= self.prefix_len && self.contains(other.base)
    }

    /// True for networks inside `::/96`
    pub fn is_ipv4(&self) -> bool {
        Network::IPV4_SUBTREE.covers(self)
    }

    /// Enclosing network one bit shorter, `None` for `::/0`
    pub fn parent(&self) -> Option<Network> {
        let len = self.prefix_len.checked_sub(1)?;
        Some(Network {
            base: self.base & !host_mask(len),
            prefix_len: len,
        })
    }

    /// The other half of the parent network, `None` for `::/0`
    pub fn sibling(&self) -> Option<Network> {
        if self.prefix_len == 0 {
            return None;
        }
        Some(Network {
            base: self.base ^ branch_bit(self.prefix_len - 1),
            prefix_len: self.prefix_len,
        })
    }

    /// True if this is the lower (bit 0) half of its parent
    pub fn is_left_child(&self) -> bool {
        self.prefix_len > 0 && self.base & branch_bit(self.prefix_len - 1) == 0
    }

    /// Address bit taken at `depth` (0 is the most significant bit)
    pub fn bit(&self, depth: u8) -> u8 {
        ((self.base >> (127 - depth as u32)) & 1) as u8
    }

    /// Base address in its natural family
    pub fn ip(&self) -> IpAddr {
        if self.is_ipv4() {
            IpAddr::V4(Ipv4Addr::from(self.base as u32))
        } else {
            IpAddr::V6(Ipv6Addr::from(self.base))
        }
    }

    /// Prefix length in its natural family
    pub fn family_prefix_len(&self) -> u8 {
        if self.is_ipv4() {
            self.prefix_len - IPV4_SUBTREE_PREFIX
        } else {
            self.prefix_len
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ip(), self.family_prefix_len())
    }
}

impl FromStr for Network {
    type Err = CompactError;

    fn from_str(s: &str) -> Result<Self> {
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s, None),
        };
        let addr: IpAddr = addr
            .trim()
            .parse()
            .map_err(|e| CompactError::InvalidNetwork(format!("{}: {}", s, e)))?;
        let prefix_len = match prefix {
            Some(p) => p
                .trim()
                .parse::<u8>()
                .map_err(|e| CompactError::InvalidNetwork(format!("{}: {}", s, e)))?,
            None if addr.is_ipv4() => 32,
            None => 128,
        };
        Network::from_ip(addr, prefix_len)
    }
}

/// A network together with the record it resolves to
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// Covered address range
    pub network: Network,
    /// Attribute record for every address in the range
    pub record: DataValue,
}

impl Entry {
    /// Pair a network with its record
    pub fn new(network: Network, record: DataValue) -> Self {
        Self { network, record }
    }
}

/// Mask of the host bits below `prefix_len`
fn host_mask(prefix_len: u8) -> u128 {
    u128::MAX.checked_shr(prefix_len as u32).unwrap_or(0)
}

/// The single bit chosen at `depth`
fn branch_bit(depth: u8) -> u128 {
    1u128 << (127 - depth as u32)
}
