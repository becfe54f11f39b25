//! mmdb-compact - Country-filtered MaxMind DB compaction
//!
//! Reads an MMDB database (MaxMind DB format, as published by IPinfo and
//! MaxMind), keeps the networks whose country is in a target set, merges
//! sibling networks that carry the same record and writes a smaller MMDB
//! database that answers every lookup exactly as the source did for the
//! kept countries, and with "no data" everywhere else.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use mmdb_compact::{compact, load_source, CompactConfig};
//!
//! let source = load_source("ipinfo.country.mmdb")?;
//! let config = CompactConfig::for_targets(["CN", "JP"]);
//! let report = compact(source.as_ref(), &config, "ipinfo.lite.mmdb")?;
//!
//! for (country, count) in &report.counts {
//!     println!("{}: {}", country, count);
//! }
//! # Ok::<(), mmdb_compact::CompactError>(())
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌────────────┐   ┌──────────────┐
//! │ MmdbReader   │ → │ RecordFilter │ → │ normalize  │ → │ MmdbBuilder  │
//! │ tree walk    │   │ country code │   │ merge      │   │ tree + dedup │
//! └──────────────┘   └──────────────┘   └────────────┘   └──────────────┘
//! ```
//!
//! The output file layout is the standard MMDB one:
//!
//! ```text
//! [search tree][16 zero bytes][data section][\xAB\xCD\xEFMaxMind.com][metadata]
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Compaction settings
pub mod config;
/// Data section encoding/decoding
pub mod data_section;
/// Error types for compaction
pub mod error;
/// Country filter over records
pub mod filter;
/// IP tree builder for MMDB format
pub mod ip_tree_builder;
/// MMDB format implementation
pub mod mmdb;
/// MMDB database builder
pub mod mmdb_builder;
/// Networks in the 128-bit address space
pub mod network;
/// Merging of sibling networks
pub mod normalizer;
/// The compaction pipeline
pub mod pipeline;
/// Reading MMDB databases
pub mod reader;
/// Loading source files
pub mod source;

// Re-exports for Rust consumers

pub use crate::config::CompactConfig;
pub use crate::data_section::DataValue;
pub use crate::error::{CompactError, Result};
pub use crate::filter::RecordFilter;
pub use crate::mmdb::{IpVersion, Metadata, RecordSize};
pub use crate::mmdb_builder::{MmdbBuilder, WriterOptions};
pub use crate::network::{Entry, Network};
pub use crate::normalizer::normalize;
pub use crate::pipeline::{compact, compact_to_vec, CompactReport};
pub use crate::reader::{Lookup, MmdbReader};
pub use crate::source::{load_source, SourceBytes};

/// Library version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
        assert!(!VERSION.is_empty());
    }
}
