//! MMDB Database Builder
//!
//! Collects `(network, record)` pairs and emits a complete MMDB file:
//!
//! ```text
//! [search tree][16 zero bytes][data section][marker][metadata map]
//! ```
//!
//! Output depends only on the inserted pairs and the [`WriterOptions`]:
//! entries are sorted before insertion and the build epoch is an option,
//! never the wall clock.

use crate::data_section::{DataEncoder, DataValue};
use crate::error::{CompactError, Result};
use crate::ip_tree_builder::IpTreeBuilder;
use crate::mmdb::{IpVersion, Metadata, RecordSize, DATA_SECTION_SEPARATOR_SIZE, METADATA_MARKER};
use crate::network::Network;
use std::collections::BTreeMap;

/// Database-level settings written into the metadata block
#[derive(Debug, Clone, PartialEq)]
pub struct WriterOptions {
    /// Address family of the tree
    pub ip_version: IpVersion,
    /// `database_type` metadata field
    pub database_type: String,
    /// `languages` metadata field
    pub languages: Vec<String>,
    /// `description` metadata field, keyed by language
    pub description: BTreeMap<String, String>,
    /// `build_epoch` metadata field
    pub build_epoch: u64,
    /// Force a record width instead of picking the smallest that fits
    pub record_size: Option<RecordSize>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        let mut description = BTreeMap::new();
        description.insert(
            "en".to_string(),
            "Country-filtered IP geolocation database".to_string(),
        );
        Self {
            ip_version: IpVersion::V6,
            database_type: "ipinfo.lite".to_string(),
            languages: vec!["en".to_string()],
            description,
            build_epoch: 0,
            record_size: None,
        }
    }
}

/// Shape of a built database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildStats {
    /// Networks inserted
    pub networks: usize,
    /// Nodes in the search tree
    pub node_count: u32,
    /// Record width chosen
    pub record_size: RecordSize,
    /// Bytes in the data section
    pub data_section_size: usize,
    /// Records stored in the data section
    pub distinct_values: usize,
    /// Leaves that shared an already stored record
    pub reused_values: usize,
    /// Total file size
    pub file_size: usize,
}

/// MMDB database builder
pub struct MmdbBuilder {
    options: WriterOptions,
    entries: Vec<(Network, DataValue)>,
}

impl MmdbBuilder {
    /// Create an empty builder
    pub fn new(options: WriterOptions) -> Self {
        Self {
            options,
            entries: Vec::new(),
        }
    }

    /// Settings the database will be written with
    pub fn options(&self) -> &WriterOptions {
        &self.options
    }

    /// Queue a network and its record
    ///
    /// Networks are validated against the tree's address family at build
    /// time. When the same network is inserted twice the later record wins.
    pub fn insert(&mut self, network: Network, record: DataValue) {
        self.entries.push((network, record));
    }

    /// Number of queued networks
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing has been inserted
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build the database bytes
    pub fn build(self) -> Result<Vec<u8>> {
        self.build_with_stats().map(|(bytes, _)| bytes)
    }

    /// Build the database bytes and report its shape
    pub fn build_with_stats(self) -> Result<(Vec<u8>, BuildStats)> {
        let MmdbBuilder {
            options,
            mut entries,
        } = self;
        let networks = entries.len();

        // Stable sort: shorter prefixes first within a base, and later
        // duplicates still land after earlier ones
        entries.sort_by_key(|(network, _)| *network);

        let mut tree = IpTreeBuilder::new(options.ip_version);
        tree.reserve_nodes(networks.saturating_mul(2));
        let mut values = Vec::with_capacity(networks);
        for (network, record) in entries {
            let value_ref = u32::try_from(values.len()).map_err(|_| {
                CompactError::CapacityExceeded(format!("more than {} networks", u32::MAX))
            })?;
            tree.insert(network, value_ref)?;
            values.push(record);
        }

        let mut encoder = DataEncoder::new();
        let mut offsets: Vec<Option<u32>> = vec![None; values.len()];
        tree.resolve_values(|value_ref| {
            let slot = &mut offsets[value_ref as usize];
            match *slot {
                Some(offset) => Ok(offset),
                None => {
                    let offset = encoder.encode(&values[value_ref as usize])?;
                    *slot = Some(offset);
                    Ok(offset)
                }
            }
        })?;

        let data_section_size = encoder.size();
        let needed = tree.max_record_value(data_section_size);
        let record_size = match options.record_size {
            Some(size) if needed <= size.max_value() => size,
            Some(size) => {
                return Err(CompactError::CapacityExceeded(format!(
                    "{} nodes and {} data bytes do not fit in {}-bit records",
                    tree.node_count(),
                    data_section_size,
                    size.bits()
                )))
            }
            None => RecordSize::smallest_fitting(needed).ok_or_else(|| {
                CompactError::CapacityExceeded(format!(
                    "{} nodes and {} data bytes exceed 32-bit records",
                    tree.node_count(),
                    data_section_size
                ))
            })?,
        };

        let tree_bytes = tree.build(record_size)?;
        let distinct_values = encoder.distinct_values();
        let reused_values = encoder.reused();

        let metadata = Metadata {
            node_count: tree.node_count(),
            record_size,
            ip_version: options.ip_version,
            binary_format_major_version: 2,
            binary_format_minor_version: 0,
            build_epoch: options.build_epoch,
            database_type: options.database_type,
            languages: options.languages,
            description: options.description,
        };
        let metadata_bytes = DataEncoder::to_bytes(&metadata.to_value())?;

        let mut file = Vec::with_capacity(
            tree_bytes.len()
                + DATA_SECTION_SEPARATOR_SIZE
                + data_section_size
                + METADATA_MARKER.len()
                + metadata_bytes.len(),
        );
        file.extend_from_slice(&tree_bytes);
        file.extend_from_slice(&[0u8; DATA_SECTION_SEPARATOR_SIZE]);
        file.extend_from_slice(&encoder.into_bytes());
        file.extend_from_slice(METADATA_MARKER);
        file.extend_from_slice(&metadata_bytes);

        let stats = BuildStats {
            networks,
            node_count: metadata.node_count,
            record_size,
            data_section_size,
            distinct_values,
            reused_values,
            file_size: file.len(),
        };
        log::debug!(
            "Built MMDB: {} networks, {} nodes, {}-bit records, {} data bytes ({} distinct records, {} reused)",
            stats.networks,
            stats.node_count,
            record_size.bits(),
            data_section_size,
            distinct_values,
            reused_values
        );

        Ok((file, stats))
    }
}
