//! Parsers for the text returned by `INFO <section>`.
//!
//! A section reply looks like
//!
//! ```text
//! # Clients
//! connected_clients:3
//! blocked_clients:0
//!
//! ```
//!
//! i.e., a header comment, `key:value` lines and a trailing blank line. The keyspace section
//! uses `db<N>:keys=<k>,expires=<e>,avg_ttl=<t>` lines instead and has a dedicated parser.

use std::collections::HashMap;

use thiserror::Error;

/// Name of the keyspace section. It must never be passed to [`parse_section()`].
pub const KEYSPACE_SECTION: &str = "Keyspace";

/// What is wrong with a malformed line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseErrorReason {
    /// The line has no `:` delimiter.
    #[error("missing delimiter")]
    MissingDelimiter,
    /// The part before `:` is empty.
    #[error("empty key")]
    EmptyKey,
    /// A keyspace sub-field is not a `name=value` pair.
    #[error("keyspace field `{0}` is not a `name=value` pair")]
    MalformedField(String),
    /// A keyspace sub-field has an unexpected name.
    #[error("unknown keyspace field `{0}`")]
    UnknownField(String),
    /// A keyspace sub-field occurs more than once.
    #[error("duplicate keyspace field `{0}`")]
    DuplicateField(&'static str),
    /// A keyspace sub-field is absent.
    #[error("missing keyspace field `{0}`")]
    MissingField(&'static str),
    /// A keyspace counter is not a non-negative integer.
    #[error("invalid value `{value}` for keyspace field `{field}`")]
    InvalidInteger {
        /// Name of the sub-field.
        field: &'static str,
        /// Raw value.
        value: String,
    },
}

/// Error parsing raw section text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed line {line}: {reason}")]
pub struct ParseError {
    /// 1-based line number in the raw text; the header is line 1.
    pub line: usize,
    /// What is wrong with the line.
    pub reason: ParseErrorReason,
}

/// Insertion-ordered mapping from INFO field names to raw string values.
///
/// Inserting an existing key replaces its value but keeps its original position, which is
/// how several sections are merged into a single map.
#[derive(Debug, Clone, Default)]
pub struct MetricMap {
    entries: Vec<(String, String)>,
    index: HashMap<String, usize>,
}

impl PartialEq for MetricMap {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl MetricMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, returning the previous one for the same key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let key = key.into();
        let value = value.into();
        if let Some(&idx) = self.index.get(&key) {
            return Some(std::mem::replace(&mut self.entries[idx].1, value));
        }
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push((key, value));
        None
    }

    /// Gets the value for the specified key.
    pub fn get(&self, key: &str) -> Option<&str> {
        let idx = *self.index.get(key)?;
        Some(&self.entries[idx].1)
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Checks whether this map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over entries in insertion order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = (&str, &str)> + '_ {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Merges `other` into this map; values from `other` win.
    pub fn merge(&mut self, other: Self) {
        for (key, value) in other {
            self.insert(key, value);
        }
    }
}

impl IntoIterator for MetricMap {
    type Item = (String, String);
    type IntoIter = std::vec::IntoIter<(String, String)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MetricMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (key, value) in iter {
            map.insert(key, value);
        }
        map
    }
}

/// Counters reported for a single database in the keyspace section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyspaceRecord {
    /// Number of keys.
    pub keys: u64,
    /// Number of keys with an expiration.
    pub expires: u64,
    /// Average TTL of expiring keys in milliseconds.
    pub avg_ttl: u64,
}

/// Yields `(line_number, line)` for the body of a section: the header line and the trailing
/// blank terminator are dropped, CRLF is treated as LF.
fn body_lines(raw: &str) -> impl Iterator<Item = (usize, &str)> {
    let mut lines: Vec<_> = raw
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .enumerate()
        .skip(1)
        .collect();
    if lines.last().is_some_and(|(_, line)| line.is_empty()) {
        lines.pop();
    }
    lines
        .into_iter()
        .map(|(idx, line)| (idx + 1, line))
        // Multi-section replies (e.g., `INFO default`) contain blank separators and further headers.
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
}

/// Parses the raw text of a generic (non-keyspace) section.
///
/// # Errors
///
/// Returns an error for the first line without a `:` delimiter or with an empty key.
pub fn parse_section(raw: &str) -> Result<MetricMap, ParseError> {
    let mut map = MetricMap::new();
    for (line_number, line) in body_lines(raw) {
        let error = |reason| ParseError {
            line: line_number,
            reason,
        };
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| error(ParseErrorReason::MissingDelimiter))?;
        if key.is_empty() {
            return Err(error(ParseErrorReason::EmptyKey));
        }
        map.insert(key, value);
    }
    Ok(map)
}

/// Parses the raw text of the keyspace section into one record per reported database,
/// preserving the reported order.
///
/// # Errors
///
/// Returns an error for the first line that does not have exactly the `keys`, `expires`
/// and `avg_ttl` integer sub-fields.
pub fn parse_keyspace(raw: &str) -> Result<Vec<KeyspaceRecord>, ParseError> {
    body_lines(raw)
        .map(|(line_number, line)| {
            parse_keyspace_line(line).map_err(|reason| ParseError {
                line: line_number,
                reason,
            })
        })
        .collect()
}

fn parse_keyspace_line(line: &str) -> Result<KeyspaceRecord, ParseErrorReason> {
    let (_, counters) = line
        .split_once(':')
        .ok_or(ParseErrorReason::MissingDelimiter)?;

    let mut keys = None;
    let mut expires = None;
    let mut avg_ttl = None;
    for field in counters.split(',') {
        let (name, value) = field
            .split_once('=')
            .ok_or_else(|| ParseErrorReason::MalformedField(field.to_owned()))?;
        let (name, slot) = match name {
            "keys" => ("keys", &mut keys),
            "expires" => ("expires", &mut expires),
            "avg_ttl" => ("avg_ttl", &mut avg_ttl),
            _ => return Err(ParseErrorReason::UnknownField(name.to_owned())),
        };
        if slot.is_some() {
            return Err(ParseErrorReason::DuplicateField(name));
        }
        let value = value
            .parse::<u64>()
            .map_err(|_| ParseErrorReason::InvalidInteger {
                field: name,
                value: value.to_owned(),
            })?;
        *slot = Some(value);
    }

    Ok(KeyspaceRecord {
        keys: keys.ok_or(ParseErrorReason::MissingField("keys"))?,
        expires: expires.ok_or(ParseErrorReason::MissingField("expires"))?,
        avg_ttl: avg_ttl.ok_or(ParseErrorReason::MissingField("avg_ttl"))?,
    })
}
