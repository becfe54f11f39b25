//! MaxMind DB (MMDB) format
//!
//! The MMDB format uses a binary search tree for IP address lookups.
//! Data is stored in the MMDB data section format, handled by
//! `crate::data_section`.
//!
//! ## Architecture
//!
//! - **types**: MMDB-specific types and constants
//! - **format**: Metadata location, decoding and file layout
//! - **tree**: Search tree record access and lookups

pub mod format;
pub mod tree;
pub mod types;

pub use format::{find_metadata_marker, Metadata, MmdbHeader};
pub use tree::{LookupResult, RecordTarget, SearchTree};
pub use types::{
    IpVersion, RecordSize, DATA_SECTION_SEPARATOR_SIZE, METADATA_MARKER, METADATA_SEARCH_WINDOW,
};
