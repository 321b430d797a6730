//! Splitting INFO fields into numeric and descriptive ones.

use std::collections::BTreeMap;

use crate::parser::MetricMap;

/// Partition of a [`MetricMap`]: every key lands in exactly one of the two maps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassifiedMetrics {
    /// Fields with a finite floating-point value.
    pub numeric: BTreeMap<String, f64>,
    /// All other fields, e.g. `mem_allocator:jemalloc-4.0.3` or `used_memory_human:7.30M`.
    pub non_numeric: BTreeMap<String, String>,
}

impl ClassifiedMetrics {
    /// Total number of classified fields.
    pub fn len(&self) -> usize {
        self.numeric.len() + self.non_numeric.len()
    }

    /// Checks whether no fields were classified.
    pub fn is_empty(&self) -> bool {
        self.numeric.is_empty() && self.non_numeric.is_empty()
    }
}

/// Parses a value as a number. `inf` / `nan` spellings are never meant as numbers by INFO,
/// so non-finite results are rejected.
pub fn parse_numeric(value: &str) -> Option<f64> {
    let number: f64 = value.parse().ok()?;
    number.is_finite().then_some(number)
}

/// Classifies all fields of `map`. Never fails.
pub fn classify(map: MetricMap) -> ClassifiedMetrics {
    let mut classified = ClassifiedMetrics::default();
    for (key, value) in map {
        if let Some(number) = parse_numeric(&value) {
            classified.numeric.insert(key, number);
        } else {
            classified.non_numeric.insert(key, value);
        }
    }
    classified
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::{parser::parse_section, testing::samples};

    #[test]
    fn classifying_mixed_map() {
        let map: MetricMap = [
            ("mem_allocator", "jemalloc-4.0.3"),
            ("used_memory", "862632"),
            ("mem_fragmentation_ratio", "8.87"),
            ("used_memory_rss_human", "7.30M"),
            ("maxmemory_policy", "noeviction"),
            ("tiny", "1e-3"),
        ]
        .into_iter()
        .collect();
        let classified = classify(map);

        assert_eq!(classified.numeric["used_memory"], 862_632.0);
        assert_eq!(classified.numeric["mem_fragmentation_ratio"], 8.87);
        assert_eq!(classified.numeric["tiny"], 0.001);
        assert_eq!(classified.non_numeric["mem_allocator"], "jemalloc-4.0.3");
        let non_numeric_keys: Vec<_> = classified.non_numeric.keys().map(String::as_str).collect();
        assert_eq!(
            non_numeric_keys,
            ["maxmemory_policy", "mem_allocator", "used_memory_rss_human"]
        );
    }

    #[test]
    fn special_float_spellings_are_not_numeric() {
        for value in ["inf", "-Infinity", "NaN", "", " 1", "0x10", "1,5"] {
            assert_eq!(parse_numeric(value), None, "{value:?}");
        }
        assert_eq!(parse_numeric("-2.5"), Some(-2.5));
        assert_eq!(parse_numeric("1.33470208e+10"), Some(13_347_020_800.0));
    }

    #[test]
    fn classification_is_a_partition() {
        let mut map = parse_section(samples::CLIENTS).unwrap();
        map.merge(parse_section(samples::MEMORY).unwrap());
        let original_keys: BTreeSet<_> = map.iter().map(|(key, _)| key.to_owned()).collect();

        let classified = classify(map);
        let numeric_keys: BTreeSet<_> = classified.numeric.keys().cloned().collect();
        let non_numeric_keys: BTreeSet<_> = classified.non_numeric.keys().cloned().collect();

        assert!(numeric_keys.is_disjoint(&non_numeric_keys));
        let union: BTreeSet<_> = numeric_keys.union(&non_numeric_keys).cloned().collect();
        assert_eq!(union, original_keys);
        assert_eq!(classified.len(), original_keys.len());
    }
}
