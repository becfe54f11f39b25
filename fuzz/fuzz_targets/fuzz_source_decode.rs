#![no_main]
use libfuzzer_sys::fuzz_target;
use mmdb_compact::{compact_to_vec, CompactConfig, MmdbReader};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

fuzz_target!(|data: &[u8]| {
    // Garbage input must produce errors, never panics or hangs
    let Ok(reader) = MmdbReader::from_source(data) else {
        return;
    };

    let _ = reader.lookup(IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)));
    let _ = reader.lookup(IpAddr::V6(Ipv6Addr::LOCALHOST));

    if let Ok(iter) = reader.networks() {
        for entry in iter.take(4096) {
            if entry.is_err() {
                break;
            }
        }
    }

    let mut config = CompactConfig::for_targets(["CN", "US"]);
    config.parallel = false;
    if let Ok(config) = config.validate() {
        let _ = compact_to_vec(data, &config);
    }
});
