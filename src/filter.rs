//! Country filter over decoded records
//!
//! A record is kept when the string found at the country path is one of the
//! target codes. Both common layouts are understood:
//!
//! ```text
//! {"country": {"iso_code": "CN", ...}, ...}   nested, path country.iso_code
//! {"country": "CN", ...}                      flat, path stops at the string
//! ```

use crate::data_section::DataValue;
use std::collections::BTreeSet;

/// Default path to the country code inside a record
pub const DEFAULT_COUNTRY_PATH: [&str; 2] = ["country", "iso_code"];

/// Predicate selecting records by country code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFilter {
    targets: BTreeSet<String>,
    path: Vec<String>,
}

impl RecordFilter {
    /// Filter on `targets` using the default `country.iso_code` path
    pub fn new<I, T>(targets: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        Self::with_path(targets, DEFAULT_COUNTRY_PATH)
    }

    /// Filter on `targets` with a custom key path
    ///
    /// Target codes are upper-cased and trimmed.
    pub fn with_path<I, T, P, K>(targets: I, path: P) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
        P: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Self {
            targets: targets
                .into_iter()
                .map(|t| t.as_ref().trim().to_ascii_uppercase())
                .collect(),
            path: path.into_iter().map(Into::into).collect(),
        }
    }

    /// Target codes, sorted
    pub fn targets(&self) -> &BTreeSet<String> {
        &self.targets
    }

    /// Country code carried by `record`, if any
    pub fn country_code<'r>(&self, record: &'r DataValue) -> Option<&'r str> {
        record.as_map()?;
        let mut current = record;
        for key in &self.path {
            match current {
                DataValue::Map(map) => current = map.get(key)?,
                DataValue::String(_) => break,
                _ => return None,
            }
        }
        current.as_str()
    }

    /// The target code `record` matched, if any
    pub fn matched_key(&self, record: &DataValue) -> Option<&str> {
        let code = self.country_code(record)?;
        self.targets.get(code).map(String::as_str)
    }

    /// True iff the record's country is one of the targets
    pub fn keep(&self, record: &DataValue) -> bool {
        self.matched_key(record).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn nested(code: &str) -> DataValue {
        let mut country = BTreeMap::new();
        country.insert("iso_code".to_string(), DataValue::from(code));
        country.insert("name".to_string(), DataValue::from("Somewhere"));
        let mut map = BTreeMap::new();
        map.insert("country".to_string(), DataValue::Map(country));
        DataValue::Map(map)
    }

    fn flat(code: &str) -> DataValue {
        let mut map = BTreeMap::new();
        map.insert("country".to_string(), DataValue::from(code));
        map.insert("continent".to_string(), DataValue::from("AS"));
        DataValue::Map(map)
    }

    #[test]
    fn test_nested_layout() {
        let filter = RecordFilter::new(["CN", "JP"]);
        assert!(filter.keep(&nested("CN")));
        assert!(!filter.keep(&nested("US")));
        assert_eq!(filter.matched_key(&nested("JP")), Some("JP"));
    }

    #[test]
    fn test_flat_layout() {
        let filter = RecordFilter::new(["CN"]);
        assert!(filter.keep(&flat("CN")));
        assert!(!filter.keep(&flat("XX")));
    }

    #[test]
    fn test_targets_are_normalised() {
        let filter = RecordFilter::new([" cn", "Hk "]);
        let targets: Vec<&str> = filter.targets().iter().map(String::as_str).collect();
        assert_eq!(targets, vec!["CN", "HK"]);
        assert!(filter.keep(&nested("HK")));
    }

    #[test]
    fn test_missing_or_wrong_shape_is_dropped() {
        let filter = RecordFilter::new(["CN"]);
        assert!(!filter.keep(&DataValue::Map(BTreeMap::new())));
        assert!(!filter.keep(&DataValue::from("CN")));
        assert!(!filter.keep(&DataValue::Uint32(86)));

        let mut map = BTreeMap::new();
        map.insert("country".to_string(), DataValue::Uint16(156));
        assert!(!filter.keep(&DataValue::Map(map)));
    }

    #[test]
    fn test_custom_path() {
        let mut registered = BTreeMap::new();
        registered.insert("code".to_string(), DataValue::from("SG"));
        let mut map = BTreeMap::new();
        map.insert("registered".to_string(), DataValue::Map(registered));
        let record = DataValue::Map(map);

        let filter = RecordFilter::with_path(["SG"], ["registered", "code"]);
        assert!(filter.keep(&record));
        assert!(!RecordFilter::new(["SG"]).keep(&record));
    }
}
