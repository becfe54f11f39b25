//! MMDB-specific Type Definitions
//!
//! Data values use the `DataValue` type from the `data_section` module.

use crate::error::{CompactError, Result};

/// MMDB metadata marker: "\xAB\xCD\xEFMaxMind.com"
pub const METADATA_MARKER: &[u8] = b"\xAB\xCD\xEFMaxMind.com";

/// Zero bytes between the search tree and the data section
pub const DATA_SECTION_SEPARATOR_SIZE: usize = 16;

/// The marker must appear within this many bytes of the end of the file
pub const METADATA_SEARCH_WINDOW: usize = 128 * 1024;

/// IP version
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpVersion {
    /// IPv4 only
    V4,
    /// IPv6 (may include IPv4 networks under ::/96)
    V6,
}

impl IpVersion {
    /// Parse the metadata `ip_version` field
    pub fn from_number(n: u64) -> Result<Self> {
        match n {
            4 => Ok(IpVersion::V4),
            6 => Ok(IpVersion::V6),
            other => Err(CompactError::UnsupportedIpVersion(other)),
        }
    }

    /// Value stored in the metadata `ip_version` field
    pub fn number(self) -> u16 {
        match self {
            IpVersion::V4 => 4,
            IpVersion::V6 => 6,
        }
    }

    /// Number of address bits the search tree branches on
    pub fn bit_count(self) -> u8 {
        match self {
            IpVersion::V4 => 32,
            IpVersion::V6 => 128,
        }
    }
}

/// Record size in bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RecordSize {
    /// 24-bit records (3 bytes per record, 6 bytes per node)
    Bits24 = 24,
    /// 28-bit records (3.5 bytes per record, 7 bytes per node)
    Bits28 = 28,
    /// 32-bit records (4 bytes per record, 8 bytes per node)
    Bits32 = 32,
}

impl RecordSize {
    /// All supported sizes, smallest first
    pub const ALL: [RecordSize; 3] = [RecordSize::Bits24, RecordSize::Bits28, RecordSize::Bits32];

    /// Get the size of a node (2 records) in bytes
    pub fn node_bytes(self) -> usize {
        match self {
            RecordSize::Bits24 => 6,
            RecordSize::Bits28 => 7,
            RecordSize::Bits32 => 8,
        }
    }

    /// Width of one record in bits
    pub fn bits(self) -> u16 {
        self as u16
    }

    /// Largest value a record of this size can hold
    pub fn max_value(self) -> u64 {
        (1u64 << self.bits()) - 1
    }

    /// Smallest record size able to hold `value`
    pub fn smallest_fitting(value: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|size| value <= size.max_value())
    }

    /// Create from bit size
    pub fn from_bits(bits: u64) -> Option<Self> {
        match bits {
            24 => Some(RecordSize::Bits24),
            28 => Some(RecordSize::Bits28),
            32 => Some(RecordSize::Bits32),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smallest_fitting() {
        assert_eq!(RecordSize::smallest_fitting(0), Some(RecordSize::Bits24));
        assert_eq!(
            RecordSize::smallest_fitting((1 << 24) - 1),
            Some(RecordSize::Bits24)
        );
        assert_eq!(RecordSize::smallest_fitting(1 << 24), Some(RecordSize::Bits28));
        assert_eq!(RecordSize::smallest_fitting(1 << 28), Some(RecordSize::Bits32));
        assert_eq!(
            RecordSize::smallest_fitting(u32::MAX as u64),
            Some(RecordSize::Bits32)
        );
        assert_eq!(RecordSize::smallest_fitting(1 << 32), None);
    }

    #[test]
    fn test_ip_version_numbers() {
        assert_eq!(IpVersion::from_number(4).unwrap(), IpVersion::V4);
        assert_eq!(IpVersion::from_number(6).unwrap().bit_count(), 128);
        assert!(matches!(
            IpVersion::from_number(5),
            Err(CompactError::UnsupportedIpVersion(5))
        ));
    }

    #[test]
    fn test_from_bits() {
        assert_eq!(RecordSize::from_bits(28).unwrap().node_bytes(), 7);
        assert!(RecordSize::from_bits(16).is_none());
    }
}
