// End-to-end compaction scenarios: build a source database, compact it,
// and check the result through the reader.

use mmdb_compact::{
    compact, compact_to_vec, CompactConfig, CompactError, DataValue, Entry, IpVersion,
    MmdbBuilder, MmdbReader, RecordFilter, RecordSize, WriterOptions,
};
use std::collections::BTreeMap;

fn record(code: &str) -> DataValue {
    let mut country = BTreeMap::new();
    country.insert("iso_code".to_string(), DataValue::from(code));
    let mut map = BTreeMap::new();
    map.insert("country".to_string(), DataValue::Map(country));
    DataValue::Map(map)
}

fn flat_record(code: &str, name: &str) -> DataValue {
    let mut map = BTreeMap::new();
    map.insert("country".to_string(), DataValue::from(code));
    map.insert("country_name".to_string(), DataValue::from(name));
    DataValue::Map(map)
}

fn build_source(options: WriterOptions, entries: &[(&str, DataValue)]) -> Vec<u8> {
    let mut builder = MmdbBuilder::new(options);
    for (network, value) in entries {
        builder.insert(network.parse().unwrap(), value.clone());
    }
    builder.build().unwrap()
}

fn source(entries: &[(&str, &str)]) -> Vec<u8> {
    let entries: Vec<(&str, DataValue)> =
        entries.iter().map(|(n, c)| (*n, record(c))).collect();
    build_source(WriterOptions::default(), &entries)
}

fn all_entries(bytes: &[u8]) -> Vec<Entry> {
    let reader = MmdbReader::from_source(bytes).unwrap();
    let iter = reader.networks().unwrap();
    iter.collect::<mmdb_compact::Result<_>>().unwrap()
}

#[test]
fn test_nested_network_does_not_leak_parent_value() {
    let src = source(&[("1.0.0.0/8", "XX"), ("1.2.3.0/24", "CN")]);
    let (out, report) = compact_to_vec(&src, &CompactConfig::for_targets(["CN"])).unwrap();

    let reader = MmdbReader::from_source(&out[..]).unwrap();
    let hit = reader.lookup("1.2.3.4".parse().unwrap()).unwrap().unwrap();
    assert_eq!(hit.data, record("CN"));
    assert_eq!(hit.prefix_len, 24);
    assert!(reader.lookup("1.0.0.1".parse().unwrap()).unwrap().is_none());
    assert!(reader.lookup("1.255.0.1".parse().unwrap()).unwrap().is_none());

    assert_eq!(report.counts["CN"], 1);
    assert_eq!(report.written_networks, 1);
}

#[test]
fn test_sibling_networks_are_merged() {
    let src = source(&[("203.0.113.0/25", "JP"), ("203.0.113.128/25", "JP")]);
    let (out, report) = compact_to_vec(&src, &CompactConfig::for_targets(["JP"])).unwrap();

    assert_eq!(report.kept_networks, 2);
    assert_eq!(report.written_networks, 1);
    let entries = all_entries(&out);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].network.to_string(), "203.0.113.0/24");
    assert_eq!(entries[0].record, record("JP"));
}

#[test]
fn test_zero_matches_still_writes_valid_database() {
    let src = source(&[("1.2.3.0/24", "CN"), ("8.8.8.0/24", "US")]);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sg.mmdb");

    let report = compact(&src, &CompactConfig::for_targets(["SG"]), &path).unwrap();
    assert_eq!(report.counts["SG"], 0);
    assert_eq!(report.missing_keys(), vec!["SG"]);
    assert_eq!(report.written_networks, 0);

    let bytes = std::fs::read(&path).unwrap();
    let reader = MmdbReader::from_source(bytes).unwrap();
    assert_eq!(reader.metadata().node_count, 1);
    for ip in ["1.2.3.4", "8.8.8.8", "::1", "2001:db8::1"] {
        assert!(reader.lookup(ip.parse().unwrap()).unwrap().is_none());
    }
}

#[test]
fn test_filter_correctness_against_source_walk() {
    let src = source(&[
        ("1.0.0.0/24", "CN"),
        ("1.0.1.0/24", "HK"),
        ("1.0.2.0/23", "US"),
        ("5.0.0.0/8", "DE"),
        ("36.0.0.0/10", "CN"),
        ("100.64.0.0/10", "XX"),
        ("203.0.113.0/24", "JP"),
    ]);
    let config = CompactConfig::for_targets(["CN", "JP"]);
    let (out, _) = compact_to_vec(&src, &config).unwrap();

    let filter = RecordFilter::new(["CN", "JP"]);
    let source_reader = MmdbReader::from_source(&src[..]).unwrap();
    let out_reader = MmdbReader::from_source(&out[..]).unwrap();

    for entry in all_entries(&src) {
        let probe = entry.network.ip();
        let source_hit = source_reader.lookup(probe).unwrap().unwrap();
        let out_hit = out_reader.lookup(probe).unwrap();
        if filter.keep(&entry.record) {
            assert_eq!(out_hit.map(|h| h.data), Some(source_hit.data));
        } else {
            assert!(out_hit.is_none(), "{} should have been dropped", entry.network);
        }
    }
}

#[test]
fn test_output_is_deterministic() {
    let src = source(&[
        ("1.0.0.0/24", "CN"),
        ("1.0.1.0/24", "CN"),
        ("8.8.8.0/24", "US"),
        ("203.0.113.0/25", "JP"),
    ]);
    let config = CompactConfig::for_targets(["CN", "US", "JP"]);
    let (a, _) = compact_to_vec(&src, &config).unwrap();
    let (b, _) = compact_to_vec(&src, &config).unwrap();
    assert_eq!(a, b);

    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("a.mmdb");
    let second = dir.path().join("b.mmdb");
    compact(&src, &config, &first).unwrap();
    compact(&src, &config, &second).unwrap();
    assert_eq!(std::fs::read(first).unwrap(), std::fs::read(second).unwrap());
}

#[test]
fn test_recompacting_is_idempotent() {
    let src = source(&[
        ("1.0.0.0/25", "CN"),
        ("1.0.0.128/25", "CN"),
        ("1.0.1.0/24", "HK"),
        ("8.8.8.0/24", "US"),
        ("9.9.9.0/24", "CH"),
    ]);
    let config = CompactConfig::for_targets(["CN", "HK", "US"]);
    let (once, first) = compact_to_vec(&src, &config).unwrap();
    let (twice, second) = compact_to_vec(&once, &config).unwrap();

    assert_eq!(once, twice);
    assert_eq!(second.total_networks, first.written_networks);
    assert_eq!(second.kept_networks, second.total_networks);
    assert_eq!(second.written_networks, first.written_networks);
}

#[test]
fn test_identical_records_share_one_offset() {
    let src = source(&[
        ("1.0.0.0/24", "CN"),
        ("1.0.4.0/24", "CN"),
        ("1.0.16.0/24", "CN"),
        ("8.8.8.0/24", "US"),
    ]);
    let (out, report) = compact_to_vec(&src, &CompactConfig::for_targets(["CN", "US"])).unwrap();

    let single_cn = mmdb_compact::data_section::DataEncoder::to_bytes(&record("CN"))
        .unwrap()
        .len();
    let single_us = mmdb_compact::data_section::DataEncoder::to_bytes(&record("US"))
        .unwrap()
        .len();
    assert_eq!(report.data_section_size, single_cn + single_us);

    let reader = MmdbReader::from_source(&out[..]).unwrap();
    let header = reader.header();
    let tree = mmdb_compact::mmdb::SearchTree::new(reader.as_bytes(), header);
    let a = tree.lookup("1.0.0.1".parse().unwrap()).unwrap().unwrap();
    let b = tree.lookup("1.0.16.1".parse().unwrap()).unwrap().unwrap();
    assert_eq!(a.data_offset, b.data_offset);
}

#[test]
fn test_flat_records_and_extra_fields_survive() {
    let entries = vec![
        ("1.2.3.0/24", flat_record("CN", "China")),
        ("8.8.8.0/24", flat_record("US", "United States")),
    ];
    let src = build_source(WriterOptions::default(), &entries);
    let (out, _) = compact_to_vec(&src, &CompactConfig::for_targets(["CN"])).unwrap();

    let reader = MmdbReader::from_source(out).unwrap();
    let hit = reader.lookup("1.2.3.4".parse().unwrap()).unwrap().unwrap();
    assert_eq!(hit.data, flat_record("CN", "China"));
}

#[test]
fn test_ipv4_source_and_ipv4_output() {
    let options = WriterOptions {
        ip_version: IpVersion::V4,
        ..WriterOptions::default()
    };
    let entries = vec![("10.0.0.0/8", record("US")), ("11.0.0.0/8", record("CN"))];
    let src = build_source(options, &entries);

    // IPv4 source into the default IPv6 output
    let (out, _) = compact_to_vec(&src, &CompactConfig::for_targets(["US"])).unwrap();
    let reader = MmdbReader::from_source(&out[..]).unwrap();
    assert_eq!(reader.metadata().ip_version, IpVersion::V6);
    let hit = reader.lookup("10.1.2.3".parse().unwrap()).unwrap().unwrap();
    assert_eq!(hit.prefix_len, 8);

    // IPv4 source into an IPv4 output
    let config = CompactConfig {
        output_ip_version: IpVersion::V4,
        ..CompactConfig::for_targets(["US"])
    };
    let (out, _) = compact_to_vec(&src, &config).unwrap();
    let reader = MmdbReader::from_source(&out[..]).unwrap();
    assert_eq!(reader.metadata().ip_version, IpVersion::V4);
    assert_eq!(reader.metadata().node_count, 8);
    assert!(reader.lookup("11.0.0.1".parse().unwrap()).unwrap().is_none());
}

#[test]
fn test_gzip_source() {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    let src = source(&[("1.2.3.0/24", "CN")]);
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&src).unwrap();
    let gz = encoder.finish().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("source.mmdb.gz");
    std::fs::write(&path, gz).unwrap();

    let loaded = mmdb_compact::load_source(&path).unwrap();
    let (_, report) = compact_to_vec(loaded.as_ref(), &CompactConfig::for_targets(["CN"])).unwrap();
    assert_eq!(report.counts["CN"], 1);
}

#[test]
fn test_corrupt_source_leaves_no_output() {
    let mut src = source(&[("1.2.3.0/24", "CN"), ("8.8.8.0/24", "US")]);
    let reader = MmdbReader::from_source(&src[..]).unwrap();
    let node_count = reader.header().node_count;
    let bogus = node_count + 16 + reader.header().data_section_len() as u32 + 100;
    drop(reader);
    // Every right record points past the data section
    for node in 0..node_count as usize {
        let at = node * 6 + 3;
        src[at..at + 3].copy_from_slice(&bogus.to_be_bytes()[1..]);
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.mmdb");
    let err = compact(&src, &CompactConfig::for_targets(["CN"]), &path).unwrap_err();
    assert!(matches!(err, CompactError::MalformedSource { .. }));
    assert!(!path.exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_missing_marker_is_malformed() {
    let err = compact_to_vec(&[0u8; 64], &CompactConfig::default()).unwrap_err();
    match err {
        CompactError::MalformedSource { reason, .. } => assert!(reason.contains("metadata")),
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_smallest_record_size_is_chosen() {
    let src = source(&[("1.2.3.0/24", "CN")]);
    let (_, report) = compact_to_vec(&src, &CompactConfig::for_targets(["CN"])).unwrap();
    assert_eq!(report.record_size, RecordSize::Bits24);
}

#[test]
fn test_existing_output_is_replaced() {
    let src = source(&[("1.2.3.0/24", "CN")]);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.mmdb");
    std::fs::write(&path, b"old contents").unwrap();

    compact(&src, &CompactConfig::for_targets(["CN"]), &path).unwrap();
    let reader = MmdbReader::from_source(std::fs::read(&path).unwrap()).unwrap();
    assert!(reader.lookup("1.2.3.4".parse().unwrap()).unwrap().is_some());
}
