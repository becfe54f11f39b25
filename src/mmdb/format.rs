//! MMDB Binary Format Parsing
//!
//! Locates the metadata block, decodes it, and derives the file layout:
//!
//! ```text
//! [search tree: node_count * node_bytes][16 zero bytes][data section][marker][metadata]
//! ```

use super::types::{
    IpVersion, RecordSize, DATA_SECTION_SEPARATOR_SIZE, METADATA_MARKER, METADATA_SEARCH_WINDOW,
};
use crate::data_section::{DataDecoder, DataValue};
use crate::error::{CompactError, Result};
use std::collections::BTreeMap;

/// MMDB file header - the fields needed to walk the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmdbHeader {
    /// Number of nodes in the search tree
    pub node_count: u32,
    /// Record size in bits (24, 28, or 32)
    pub record_size: RecordSize,
    /// IP version (4 or 6)
    pub ip_version: IpVersion,
    /// Size of the search tree in bytes
    pub tree_size: usize,
    /// Offset of the first data section byte
    pub data_section_start: usize,
    /// Offset one past the last data section byte (the metadata marker)
    pub data_section_end: usize,
}

impl MmdbHeader {
    /// Parse the file layout and metadata
    pub fn from_file(data: &[u8]) -> Result<(Self, Metadata)> {
        let marker_offset = find_metadata_marker(data)?;
        let metadata_offset = marker_offset + METADATA_MARKER.len();

        let decoder = DataDecoder::with_origin(&data[metadata_offset..], metadata_offset);
        let value = decoder.decode(0)?;
        let metadata = Metadata::from_value(&value, metadata_offset)?;

        let tree_size = (metadata.node_count as usize)
            .checked_mul(metadata.record_size.node_bytes())
            .ok_or_else(|| CompactError::malformed(metadata_offset, "node_count overflows"))?;
        let data_section_start = tree_size + DATA_SECTION_SEPARATOR_SIZE;

        if data_section_start > marker_offset {
            return Err(CompactError::malformed(
                marker_offset,
                format!(
                    "search tree of {} nodes ({} bytes) plus separator overruns the metadata marker",
                    metadata.node_count, tree_size
                ),
            ));
        }

        Ok((
            MmdbHeader {
                node_count: metadata.node_count,
                record_size: metadata.record_size,
                ip_version: metadata.ip_version,
                tree_size,
                data_section_start,
                data_section_end: marker_offset,
            },
            metadata,
        ))
    }

    /// Length of the data section in bytes
    pub fn data_section_len(&self) -> usize {
        self.data_section_end - self.data_section_start
    }
}

/// Decoded metadata block
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    /// Number of nodes in the search tree
    pub node_count: u32,
    /// Record width
    pub record_size: RecordSize,
    /// Address family of the tree
    pub ip_version: IpVersion,
    /// Format major version (2 for current files)
    pub binary_format_major_version: u16,
    /// Format minor version
    pub binary_format_minor_version: u16,
    /// Build time, seconds since the Unix epoch
    pub build_epoch: u64,
    /// Free-form database type name
    pub database_type: String,
    /// Locales the records carry names for
    pub languages: Vec<String>,
    /// Description keyed by language
    pub description: BTreeMap<String, String>,
}

impl Metadata {
    /// Build metadata from a decoded map
    ///
    /// `offset` is where the map starts in the file and is used for errors.
    pub fn from_value(value: &DataValue, offset: usize) -> Result<Self> {
        let map = value.as_map().ok_or_else(|| {
            CompactError::malformed(
                offset,
                format!("metadata must be a map, found {}", value.type_name()),
            )
        })?;

        let ip_version = IpVersion::from_number(required_uint(map, "ip_version", offset)?)?;

        let node_count = required_uint(map, "node_count", offset)?;
        let node_count = u32::try_from(node_count).map_err(|_| {
            CompactError::malformed(offset, format!("node_count {} exceeds u32", node_count))
        })?;

        let record_bits = required_uint(map, "record_size", offset)?;
        let record_size = RecordSize::from_bits(record_bits).ok_or_else(|| {
            CompactError::malformed(
                offset,
                format!("record_size must be 24, 28 or 32, found {}", record_bits),
            )
        })?;

        let languages = match map.get("languages") {
            Some(DataValue::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        };

        let description = match map.get("description") {
            Some(DataValue::Map(m)) => m
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect(),
            _ => BTreeMap::new(),
        };

        Ok(Metadata {
            node_count,
            record_size,
            ip_version,
            binary_format_major_version: optional_uint(map, "binary_format_major_version")
                .unwrap_or(2) as u16,
            binary_format_minor_version: optional_uint(map, "binary_format_minor_version")
                .unwrap_or(0) as u16,
            build_epoch: optional_uint(map, "build_epoch").unwrap_or(0),
            database_type: map
                .get("database_type")
                .and_then(DataValue::as_str)
                .unwrap_or_default()
                .to_string(),
            languages,
            description,
        })
    }

    /// Encode as the metadata map written after the marker
    pub fn to_value(&self) -> DataValue {
        let mut map = BTreeMap::new();
        map.insert(
            "binary_format_major_version".to_string(),
            DataValue::Uint16(self.binary_format_major_version),
        );
        map.insert(
            "binary_format_minor_version".to_string(),
            DataValue::Uint16(self.binary_format_minor_version),
        );
        map.insert("build_epoch".to_string(), DataValue::Uint64(self.build_epoch));
        map.insert(
            "database_type".to_string(),
            DataValue::String(self.database_type.clone()),
        );
        map.insert(
            "description".to_string(),
            DataValue::Map(
                self.description
                    .iter()
                    .map(|(k, v)| (k.clone(), DataValue::String(v.clone())))
                    .collect(),
            ),
        );
        map.insert(
            "ip_version".to_string(),
            DataValue::Uint16(self.ip_version.number()),
        );
        map.insert(
            "languages".to_string(),
            DataValue::Array(
                self.languages
                    .iter()
                    .map(|l| DataValue::String(l.clone()))
                    .collect(),
            ),
        );
        map.insert("node_count".to_string(), DataValue::Uint32(self.node_count));
        map.insert(
            "record_size".to_string(),
            DataValue::Uint16(self.record_size.bits()),
        );
        DataValue::Map(map)
    }
}

/// Find the metadata marker in MMDB file
///
/// The marker appears somewhere in the last 128KB of the file and the
/// metadata comes AFTER it. If there are several markers, the LAST one wins.
pub fn find_metadata_marker(data: &[u8]) -> Result<usize> {
    let search_start = data.len().saturating_sub(METADATA_SEARCH_WINDOW);

    memchr::memmem::rfind(&data[search_start..], METADATA_MARKER)
        .map(|pos| search_start + pos)
        .ok_or_else(|| {
            CompactError::malformed(
                search_start,
                format!(
                    "metadata marker not found in the last {} bytes",
                    data.len() - search_start
                ),
            )
        })
}

fn optional_uint(map: &BTreeMap<String, DataValue>, key: &str) -> Option<u64> {
    map.get(key).and_then(DataValue::as_u64)
}

fn required_uint(map: &BTreeMap<String, DataValue>, key: &str, offset: usize) -> Result<u64> {
    match map.get(key) {
        Some(value) => value.as_u64().ok_or_else(|| {
            CompactError::malformed(
                offset,
                format!(
                    "metadata field '{}' must be an unsigned integer, found {}",
                    key,
                    value.type_name()
                ),
            )
        }),
        None => Err(CompactError::malformed(
            offset,
            format!("required metadata field '{}' not found", key),
        )),
    }
}
