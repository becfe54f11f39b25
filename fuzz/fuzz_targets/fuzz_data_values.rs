#![no_main]
use libfuzzer_sys::fuzz_target;
use mmdb_compact::data_section::{DataDecoder, DataEncoder};

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    // Decode from every offset in the first few bytes; pointers and nested
    // containers must be bounds checked
    let decoder = DataDecoder::new(data);
    for offset in 0..data.len().min(16) {
        if let Ok(value) = decoder.decode(offset) {
            // Anything that decodes must encode and decode to the same value
            let Ok(bytes) = DataEncoder::to_bytes(&value) else {
                continue;
            };
            let again = DataDecoder::new(&bytes)
                .decode(0)
                .expect("re-encoded value decodes");
            match (&value, &again) {
                // NaN never compares equal
                (a, b) if a != a => assert!(b != b),
                (a, b) => assert_eq!(a, b),
            }
        }
    }
});
