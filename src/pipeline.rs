//! The compaction pipeline
//!
//! ```text
//! source bytes -> MmdbReader walk -> RecordFilter -> normalize -> MmdbBuilder -> output
//! ```
//!
//! Every stage works on run-scoped buffers. The output file is written to a
//! temporary file next to the destination and renamed into place only after
//! the whole database has been built and re-read successfully.

use crate::config::{CompactConfig, PROGRESS_INTERVAL};
use crate::error::{CompactError, Result};
use crate::mmdb::RecordSize;
use crate::mmdb_builder::{MmdbBuilder, WriterOptions};
use crate::network::{Entry, Network};
use crate::normalizer::normalize_entries;
use crate::reader::{MmdbReader, Progress};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::time::Instant;

/// Outcome of a compaction run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactReport {
    /// Source networks kept, per target key (zero for keys with no match)
    pub counts: BTreeMap<String, u64>,
    /// Networks walked in the source
    pub total_networks: u64,
    /// Networks that passed the filter
    pub kept_networks: u64,
    /// Networks written after merging
    pub written_networks: u64,
    /// Nodes in the output search tree
    pub node_count: u32,
    /// Record width of the output
    pub record_size: RecordSize,
    /// Bytes in the output data section
    pub data_section_size: usize,
    /// Total output size in bytes
    pub output_size: usize,
}

impl CompactReport {
    /// Target keys that matched nothing
    pub fn missing_keys(&self) -> Vec<&str> {
        self.counts
            .iter()
            .filter(|&(_, &count)| count == 0)
            .map(|(key, _)| key.as_str())
            .collect()
    }
}

/// Compact `source` and return the new database bytes
pub fn compact_to_vec(source: &[u8], config: &CompactConfig) -> Result<(Vec<u8>, CompactReport)> {
    let config = config.clone().validate()?;
    let started = Instant::now();

    let reader = MmdbReader::from_source(source)?;
    let source_meta = reader.metadata();
    log::info!(
        "Source: {} (IPv{}, {} nodes, {}-bit records, {} bytes)",
        source_meta.database_type,
        source_meta.ip_version.number(),
        source_meta.node_count,
        source_meta.record_size.bits(),
        source.len()
    );
    log::info!(
        "Target countries: {}",
        config
            .targets
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    );

    let filter = config.filter();
    let ipv4_only = config.ipv4_only();
    let keep = |entry: &Entry| {
        (!ipv4_only || reaches_ipv4(&entry.network)) && filter.keep(&entry.record)
    };

    let (total_networks, mut kept) = if config.parallel {
        reader.par_networks(config.split_depth, keep)?
    } else {
        let progress = Progress::new(PROGRESS_INTERVAL);
        let mut total = 0u64;
        let mut kept = Vec::new();
        for entry in reader.networks()? {
            let entry = entry?;
            total += 1;
            progress.tick();
            if keep(&entry) {
                kept.push(entry);
            }
        }
        (total, kept)
    };
    if ipv4_only {
        // At most one walked network covers all of ::/96
        for entry in kept.iter_mut().filter(|e| !e.network.is_ipv4()) {
            log::debug!("Clipping {} to the IPv4 subtree", entry.network);
            entry.network = Network::IPV4_SUBTREE;
        }
    }

    let mut counts: BTreeMap<String, u64> =
        config.targets.iter().map(|key| (key.clone(), 0)).collect();
    for entry in &kept {
        if let Some(key) = filter.matched_key(&entry.record) {
            if let Some(count) = counts.get_mut(key) {
                *count += 1;
            }
        }
    }
    let kept_networks = kept.len() as u64;
    log::info!(
        "Source has {} networks, kept {}",
        total_networks,
        kept_networks
    );
    for (key, _) in counts.iter().filter(|&(_, &count)| count == 0) {
        log::warn!("No networks matched {}; output has no data for it", key);
    }

    let normalized = normalize_entries(kept);
    let written_networks = normalized.len() as u64;

    let options = WriterOptions {
        ip_version: config.output_ip_version,
        database_type: config.database_type.clone(),
        languages: if source_meta.languages.is_empty() {
            WriterOptions::default().languages
        } else {
            source_meta.languages.clone()
        },
        description: config.description.clone(),
        build_epoch: config.build_epoch.unwrap_or(source_meta.build_epoch),
        record_size: None,
    };
    let mut builder = MmdbBuilder::new(options);
    for entry in normalized {
        builder.insert(entry.network, entry.record);
    }
    let (bytes, stats) = builder.build_with_stats()?;

    // The output must open with the same reader
    let check = MmdbReader::from_source(&bytes[..])?;
    if check.header().node_count != stats.node_count {
        return Err(CompactError::malformed(
            check.header().data_section_end,
            format!(
                "output reports {} nodes, {} were written",
                check.header().node_count,
                stats.node_count
            ),
        ));
    }

    log::info!(
        "Built {} networks into {} bytes ({} nodes, {}-bit records) in {:.2?}",
        written_networks,
        bytes.len(),
        stats.node_count,
        stats.record_size.bits(),
        started.elapsed()
    );

    let report = CompactReport {
        counts,
        total_networks,
        kept_networks,
        written_networks,
        node_count: stats.node_count,
        record_size: stats.record_size,
        data_section_size: stats.data_section_size,
        output_size: bytes.len(),
    };
    Ok((bytes, report))
}

/// True if `network` holds IPv4 addresses: inside `::/96` or covering it
fn reaches_ipv4(network: &Network) -> bool {
    network.is_ipv4() || network.covers(&Network::IPV4_SUBTREE)
}

/// Compact `source` into a database file at `output_path`
///
/// The file is replaced atomically; on any error no file is left behind
/// and an existing file at `output_path` is untouched.
pub fn compact(
    source: &[u8],
    config: &CompactConfig,
    output_path: impl AsRef<Path>,
) -> Result<CompactReport> {
    let output_path = output_path.as_ref();
    let (bytes, report) = compact_to_vec(source, config)?;
    write_atomically(output_path, &bytes)?;
    log::info!(
        "Wrote {} ({:.2} MB)",
        output_path.display(),
        bytes.len() as f64 / 1024.0 / 1024.0
    );
    Ok(report)
}

/// Write `bytes` to a temporary file beside `path`, then rename it over `path`
pub fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let failure = |source: std::io::Error| CompactError::WriteFailure {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(failure)?;
    temp.write_all(bytes).map_err(failure)?;
    temp.as_file().sync_all().map_err(failure)?;
    temp.persist(path).map_err(|e| failure(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_section::DataValue;
    use crate::mmdb::IpVersion;

    fn record(code: &str) -> DataValue {
        let mut country = BTreeMap::new();
        country.insert("iso_code".to_string(), DataValue::from(code));
        let mut map = BTreeMap::new();
        map.insert("country".to_string(), DataValue::Map(country));
        DataValue::Map(map)
    }

    fn source(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = MmdbBuilder::new(WriterOptions {
            build_epoch: 1_650_000_000,
            ..WriterOptions::default()
        });
        for (net, code) in entries {
            builder.insert(net.parse().unwrap(), record(code));
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_counts_and_missing_keys() {
        let src = source(&[
            ("1.0.0.0/24", "CN"),
            ("2.0.0.0/24", "CN"),
            ("8.8.8.0/24", "US"),
            ("9.9.9.0/24", "DE"),
        ]);
        let config = CompactConfig::for_targets(["CN", "US", "SG"]);
        let (_, report) = compact_to_vec(&src, &config).unwrap();

        assert_eq!(report.counts["CN"], 2);
        assert_eq!(report.counts["US"], 1);
        assert_eq!(report.counts["SG"], 0);
        assert_eq!(report.missing_keys(), vec!["SG"]);
        assert_eq!(report.total_networks, 4);
        assert_eq!(report.kept_networks, 3);
    }

    #[test]
    fn test_build_epoch_follows_source() {
        let src = source(&[("1.0.0.0/24", "CN")]);
        let (bytes, _) = compact_to_vec(&src, &CompactConfig::for_targets(["CN"])).unwrap();
        let reader = MmdbReader::from_source(bytes).unwrap();
        assert_eq!(reader.metadata().build_epoch, 1_650_000_000);
        assert_eq!(reader.metadata().database_type, "ipinfo.lite");

        let config = CompactConfig {
            build_epoch: Some(42),
            ..CompactConfig::for_targets(["CN"])
        };
        let (bytes, _) = compact_to_vec(&src, &config).unwrap();
        let reader = MmdbReader::from_source(bytes).unwrap();
        assert_eq!(reader.metadata().build_epoch, 42);
    }

    #[test]
    fn test_native_ipv6_kept_by_default() {
        let src = source(&[("1.0.0.0/24", "JP"), ("2400:4000::/22", "JP")]);

        let (bytes, report) = compact_to_vec(&src, &CompactConfig::for_targets(["JP"])).unwrap();
        assert_eq!(report.kept_networks, 2);
        let reader = MmdbReader::from_source(bytes).unwrap();
        assert!(reader
            .lookup("2400:4000::1".parse().unwrap())
            .unwrap()
            .is_some());

        let config = CompactConfig {
            include_ipv6: false,
            ..CompactConfig::for_targets(["JP"])
        };
        let (bytes, report) = compact_to_vec(&src, &config).unwrap();
        assert_eq!(report.kept_networks, 1);
        let reader = MmdbReader::from_source(bytes).unwrap();
        assert!(reader
            .lookup("2400:4000::1".parse().unwrap())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_ipv4_only_clips_covering_network() {
        // ::/64 holds the whole IPv4 subtree
        let src = source(&[("::/64", "CN"), ("2400:4000::/22", "CN")]);

        let (bytes, report) = compact_to_vec(&src, &CompactConfig::for_targets(["CN"])).unwrap();
        assert_eq!(report.kept_networks, 2);
        let reader = MmdbReader::from_source(bytes).unwrap();
        assert_eq!(
            reader.lookup("1.2.3.4".parse().unwrap()).unwrap().unwrap().data,
            record("CN")
        );

        for config in [
            CompactConfig {
                include_ipv6: false,
                ..CompactConfig::for_targets(["CN"])
            },
            CompactConfig {
                output_ip_version: IpVersion::V4,
                ..CompactConfig::for_targets(["CN"])
            },
        ] {
            let (bytes, report) = compact_to_vec(&src, &config).unwrap();
            assert_eq!(report.kept_networks, 1);
            assert_eq!(report.written_networks, 1);
            let reader = MmdbReader::from_source(bytes).unwrap();
            let hit = reader.lookup("1.2.3.4".parse().unwrap()).unwrap().unwrap();
            assert_eq!(hit.data, record("CN"));
            let hit = reader.lookup("255.0.0.1".parse().unwrap()).unwrap().unwrap();
            assert_eq!(hit.data, record("CN"));
        }
    }

    #[test]
    fn test_sequential_and_parallel_agree() {
        let src = source(&[
            ("1.0.0.0/8", "XX"),
            ("1.2.3.0/24", "CN"),
            ("203.0.113.0/25", "JP"),
            ("203.0.113.128/25", "JP"),
        ]);
        let parallel = CompactConfig::for_targets(["CN", "JP"]);
        let sequential = CompactConfig {
            parallel: false,
            ..parallel.clone()
        };
        let (a, ra) = compact_to_vec(&src, &parallel).unwrap();
        let (b, rb) = compact_to_vec(&src, &sequential).unwrap();
        assert_eq!(a, b);
        assert_eq!(ra, rb);
    }

    #[test]
    fn test_invalid_config_fails_before_reading() {
        let config = CompactConfig::for_targets(Vec::<String>::new());
        let err = compact_to_vec(b"not a database", &config).unwrap_err();
        assert!(matches!(err, CompactError::InvalidConfig(_)));
    }

    #[test]
    fn test_malformed_source() {
        let err = compact_to_vec(b"not a database", &CompactConfig::default()).unwrap_err();
        assert!(err.is_source_error());
    }

    #[test]
    fn test_write_failure_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("missing-dir").join("out.mmdb");
        let err = write_atomically(&target, b"bytes").unwrap_err();
        assert!(matches!(err, CompactError::WriteFailure { .. }));
        assert!(!target.exists());
    }
}
