use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mmdb_compact::{
    compact_to_vec, normalize, CompactConfig, DataValue, MmdbBuilder, MmdbReader, Network,
    WriterOptions,
};
use std::collections::BTreeMap;
use std::hint::black_box;
use std::net::{IpAddr, Ipv4Addr};

const COUNTRIES: [&str; 8] = ["CN", "HK", "US", "JP", "SG", "DE", "FR", "BR"];

fn country_record(code: &str) -> DataValue {
    let mut country = BTreeMap::new();
    country.insert("iso_code".to_string(), DataValue::from(code));
    let mut names = BTreeMap::new();
    names.insert("en".to_string(), DataValue::from(format!("Country {}", code)));
    country.insert("names".to_string(), DataValue::Map(names));
    let mut map = BTreeMap::new();
    map.insert("country".to_string(), DataValue::Map(country));
    DataValue::Map(map)
}

fn slash24(i: u32) -> Network {
    Network::from_ip(IpAddr::V4(Ipv4Addr::from(0x0100_0000 + (i << 8))), 24)
        .expect("aligned /24")
}

/// /24 networks whose countries change every `run` networks
fn synthetic_source(count: u32, run: u32) -> Vec<u8> {
    let mut builder = MmdbBuilder::new(WriterOptions {
        build_epoch: 1_700_000_000,
        ..WriterOptions::default()
    });
    for i in 0..count {
        let code = COUNTRIES[((i / run) as usize) % COUNTRIES.len()];
        builder.insert(slash24(i), country_record(code));
    }
    builder.build().expect("synthetic source")
}

// End to end: decode, filter, merge and re-encode
fn bench_compact(c: &mut Criterion) {
    let mut group = c.benchmark_group("compact");
    group.sample_size(20);

    for count in [1_000u32, 10_000, 50_000] {
        let source = synthetic_source(count, 16);

        for parallel in [false, true] {
            let mut config = CompactConfig::for_targets(["CN", "HK", "US", "JP", "SG"]);
            config.parallel = parallel;
            let config = config.validate().expect("valid config");
            let name = if parallel { "parallel" } else { "sequential" };

            group.throughput(Throughput::Elements(count as u64));
            group.bench_with_input(BenchmarkId::new(name, count), &source, |b, source| {
                b.iter(|| {
                    let (bytes, report) = compact_to_vec(black_box(source), &config).unwrap();
                    black_box((bytes, report));
                });
            });
        }
    }

    group.finish();
}

// Walking the source tree alone
fn bench_walk(c: &mut Criterion) {
    let mut group = c.benchmark_group("walk");
    let source = synthetic_source(50_000, 16);
    let reader = MmdbReader::from_source(source.as_slice()).unwrap();

    group.throughput(Throughput::Elements(50_000));
    group.bench_function("networks", |b| {
        b.iter(|| {
            let count = reader.networks().unwrap().filter(|e| e.is_ok()).count();
            black_box(count);
        });
    });
    group.bench_function("par_networks", |b| {
        b.iter(|| {
            let (total, kept) = reader.par_networks(8, |_| true).unwrap();
            black_box((total, kept.len()));
        });
    });

    group.finish();
}

// Sibling merging on its own, with long and short runs of equal values
fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalize");

    for run in [1u32, 4, 64] {
        let items: Vec<(Network, u8)> = (0..65_536u32)
            .map(|i| (slash24(i), ((i / run) % 5) as u8))
            .collect();

        group.throughput(Throughput::Elements(items.len() as u64));
        group.bench_with_input(BenchmarkId::new("run", run), &items, |b, items| {
            b.iter(|| {
                let merged = normalize(black_box(items.clone()));
                black_box(merged);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_compact, bench_walk, bench_normalize);
criterion_main!(benches);
