//! Compaction settings
//!
//! [`CompactConfig`] is an immutable value handed to the pipeline. It can be
//! built in code, loaded from JSON, or assembled from CLI flags; every path
//! goes through [`CompactConfig::validate`] before any source bytes are read.

use crate::error::{CompactError, Result};
use crate::filter::{RecordFilter, DEFAULT_COUNTRY_PATH};
use crate::mmdb::IpVersion;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

/// Countries kept when none are requested
pub const DEFAULT_COUNTRIES: [&str; 5] = ["CN", "HK", "US", "JP", "SG"];

/// Where the source database is downloaded from when no local file is given
pub const DEFAULT_SOURCE_URL: &str =
    "https://github.com/xream/geoip/releases/latest/download/ipinfo.country.mmdb";

/// Default `database_type` of the output
pub const DEFAULT_DATABASE_TYPE: &str = "ipinfo.lite";

/// Networks walked between progress log lines
pub const PROGRESS_INTERVAL: u64 = 500_000;

/// Settings for one compaction run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompactConfig {
    /// Country codes to keep
    pub targets: BTreeSet<String>,
    /// Keys leading to the country code inside each record
    pub country_path: Vec<String>,
    /// Keep native IPv6 networks as well as the IPv4 subtree
    ///
    /// When false (or when the output tree is IPv4), networks outside
    /// `::/96` are dropped and a network covering all of `::/96` is cut
    /// down to it.
    pub include_ipv6: bool,
    /// Address family of the output tree
    pub output_ip_version: IpVersion,
    /// `database_type` written to the output metadata
    pub database_type: String,
    /// Description written to the output metadata, keyed by language
    pub description: BTreeMap<String, String>,
    /// Build epoch of the output; the source's when unset
    pub build_epoch: Option<u64>,
    /// Walk the source tree on the rayon pool
    pub parallel: bool,
    /// Depth at which the parallel walk hands subtrees to workers
    pub split_depth: u8,
    /// Download location used by the CLI when no source file is given
    pub source_url: String,
}

impl Default for CompactConfig {
    fn default() -> Self {
        let mut description = BTreeMap::new();
        description.insert(
            "en".to_string(),
            "IPinfo country data restricted to selected countries".to_string(),
        );
        Self {
            targets: DEFAULT_COUNTRIES.iter().map(|c| c.to_string()).collect(),
            country_path: DEFAULT_COUNTRY_PATH.iter().map(|k| k.to_string()).collect(),
            include_ipv6: true,
            output_ip_version: IpVersion::V6,
            database_type: DEFAULT_DATABASE_TYPE.to_string(),
            description,
            build_epoch: None,
            parallel: true,
            split_depth: 8,
            source_url: DEFAULT_SOURCE_URL.to_string(),
        }
    }
}

impl CompactConfig {
    /// Default settings with a different target set
    pub fn for_targets<I, T>(targets: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        Self {
            targets: targets
                .into_iter()
                .map(|t| t.as_ref().trim().to_ascii_uppercase())
                .collect(),
            ..Self::default()
        }
    }

    /// Load settings from a JSON file; absent fields keep their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            CompactError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&content)
            .map_err(|e| CompactError::InvalidConfig(format!("{}: {}", path.display(), e)))
    }

    /// Parse settings from JSON text
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| CompactError::InvalidConfig(e.to_string()))?;
        config.validate()
    }

    /// Check the settings and canonicalise the target codes
    pub fn validate(mut self) -> Result<Self> {
        self.targets = self
            .targets
            .iter()
            .map(|t| t.trim().to_ascii_uppercase())
            .collect();

        if self.targets.is_empty() {
            return Err(CompactError::InvalidConfig(
                "at least one target country is required".to_string(),
            ));
        }
        if let Some(bad) = self
            .targets
            .iter()
            .find(|t| t.is_empty() || !t.chars().all(|c| c.is_ascii_alphanumeric()))
        {
            return Err(CompactError::InvalidConfig(format!(
                "invalid country code {:?}",
                bad
            )));
        }
        if self.country_path.is_empty() || self.country_path.iter().any(|k| k.is_empty()) {
            return Err(CompactError::InvalidConfig(
                "country path must be a non-empty list of non-empty keys".to_string(),
            ));
        }
        if self.split_depth > 128 {
            return Err(CompactError::InvalidConfig(format!(
                "split depth {} exceeds 128",
                self.split_depth
            )));
        }
        Ok(self)
    }

    /// True when only the IPv4 subtree is written
    pub fn ipv4_only(&self) -> bool {
        !self.include_ipv6 || self.output_ip_version == IpVersion::V4
    }

    /// The record filter these settings describe
    pub fn filter(&self) -> RecordFilter {
        RecordFilter::with_path(&self.targets, self.country_path.iter().cloned())
    }
}
