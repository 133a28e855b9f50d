#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cells::{truncate_to_millis, CellVersion, RowMutation, SetCell, StoredRow};
use crate::table::ColumnFamilyName;
use crate::{ContractViolation, Validate};

pub const DATA_ROW_PREFIX: &str = "data#";
pub const VALUE_QUALIFIER: &str = "value";
pub const TIMESTAMP_QUALIFIER: &str = "timestamp";

/// Row keys are capped at 4 KiB by the store.
pub const MAX_ROW_KEY_BYTES: usize = 4 * 1024;

/// Time-ordered row identifier (UUID v7).
///
/// `Uuid::now_v7` keeps a process-wide counter, so identifiers generated by
/// one process are strictly increasing, and the lowercase hyphenated form
/// sorts the same way the integer does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowId(Uuid);

impl RowId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowKey(String);

impl RowKey {
    pub fn new(key: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(key.into());
        v.validate()?;
        Ok(v)
    }

    /// `data#<uuid>`
    pub fn data(id: &RowId) -> Self {
        Self(format!("{DATA_ROW_PREFIX}{id}"))
    }

    pub fn from_stored_bytes(key: &[u8]) -> Self {
        Self(String::from_utf8_lossy(key).into_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Validate for RowKey {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.0.is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "row_key",
                reason: "must not be empty",
            });
        }
        if self.0.len() > MAX_ROW_KEY_BYTES {
            return Err(ContractViolation::InvalidLength {
                field: "row_key",
                max: MAX_ROW_KEY_BYTES,
                got: self.0.len(),
            });
        }
        Ok(())
    }
}

/// A key prefix scanned as the half-open range `[prefix, range_end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowPrefix(Vec<u8>);

impl RowPrefix {
    pub fn new(prefix: impl Into<Vec<u8>>) -> Self {
        Self(prefix.into())
    }

    pub fn data() -> Self {
        Self(DATA_ROW_PREFIX.as_bytes().to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn matches(&self, key: &[u8]) -> bool {
        key.starts_with(&self.0)
    }

    /// Smallest key greater than every key carrying this prefix, or `None`
    /// when the range is unbounded (empty or all-0xFF prefix).
    pub fn range_end(&self) -> Option<Vec<u8>> {
        let mut end = self.0.clone();
        while let Some(last) = end.pop() {
            if last != u8::MAX {
                end.push(last + 1);
                return Some(end);
            }
        }
        None
    }
}

/// Renders an insertion time the way it is stored and returned:
/// RFC 3339, UTC, millisecond precision.
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|at| at.with_timezone(&Utc))
}

pub fn timestamp_micros_to_datetime(micros: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_micros(micros).single()
}

/// `family -> qualifier -> value`, the shape of a freshly inserted row.
pub type RowData = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    pub key: RowKey,
    pub data: RowData,
}

impl Row {
    /// Builds a fresh stats row for `id` inserted at `at`. The insertion
    /// time is kept at millisecond precision so that the returned row and
    /// the stored cells agree.
    pub fn new_stats_row(id: RowId, at: DateTime<Utc>) -> (Self, RowMutation) {
        let micros = truncate_to_millis(at.timestamp_micros());
        let at = timestamp_micros_to_datetime(micros).unwrap_or(at);
        let value = id.to_string();
        let timestamp = format_timestamp(&at);
        let key = RowKey::data(&id);
        let family = ColumnFamilyName::stats();

        let mutation = RowMutation {
            row_key: key.clone(),
            cells: vec![
                SetCell::new(family.clone(), VALUE_QUALIFIER, micros, value.as_bytes()),
                SetCell::new(family.clone(), TIMESTAMP_QUALIFIER, micros, timestamp.as_bytes()),
            ],
        };

        let mut stats = BTreeMap::new();
        stats.insert(VALUE_QUALIFIER.to_string(), value);
        stats.insert(TIMESTAMP_QUALIFIER.to_string(), timestamp);
        let mut data = RowData::new();
        data.insert(family.as_str().to_string(), stats);

        (Self { key, data }, mutation)
    }

    pub fn cell(&self, family: &str, qualifier: &str) -> Option<&str> {
        self.data.get(family)?.get(qualifier).map(String::as_str)
    }

    pub fn stats_value(&self) -> Option<&str> {
        self.cell(ColumnFamilyName::stats().as_str(), VALUE_QUALIFIER)
    }

    pub fn stats_timestamp(&self) -> Option<DateTime<Utc>> {
        self.cell(ColumnFamilyName::stats().as_str(), TIMESTAMP_QUALIFIER)
            .and_then(parse_timestamp)
    }
}

/// One stored version of a column as listed: value as UTF-8 (lossy), the
/// cell labels, and the write time in microseconds rendered as a decimal
/// string the way int64 travels in JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListedCell {
    pub value: String,
    pub labels: Vec<String>,
    pub timestamp: String,
}

impl ListedCell {
    fn from_version(version: &CellVersion) -> Self {
        Self {
            value: String::from_utf8_lossy(&version.value).into_owned(),
            labels: version.labels.clone(),
            timestamp: version.timestamp_micros.to_string(),
        }
    }

    pub fn timestamp_micros(&self) -> Option<i64> {
        self.timestamp.parse().ok()
    }

    pub fn written_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp_micros()
            .and_then(timestamp_micros_to_datetime)
    }
}

/// `family -> qualifier -> versions, newest first`.
pub type ListedRowData = BTreeMap<String, BTreeMap<String, Vec<ListedCell>>>;

/// A row as returned by a prefix scan, with every stored version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListedRow {
    pub key: RowKey,
    pub data: ListedRowData,
}

impl ListedRow {
    pub fn from_stored(stored: &StoredRow) -> Self {
        let data = stored
            .families
            .iter()
            .filter_map(|(family, columns)| {
                let cols: BTreeMap<String, Vec<ListedCell>> = columns
                    .iter()
                    .filter(|(_, versions)| !versions.is_empty())
                    .map(|(qualifier, versions)| {
                        (
                            String::from_utf8_lossy(qualifier).into_owned(),
                            versions.iter().map(ListedCell::from_version).collect(),
                        )
                    })
                    .collect();
                (!cols.is_empty()).then(|| (family.clone(), cols))
            })
            .collect();
        Self {
            key: RowKey::from_stored_bytes(&stored.key),
            data,
        }
    }

    pub fn newest(&self, family: &str, qualifier: &str) -> Option<&ListedCell> {
        self.data.get(family)?.get(qualifier)?.first()
    }

    pub fn stats_value(&self) -> Option<&str> {
        self.newest(ColumnFamilyName::stats().as_str(), VALUE_QUALIFIER)
            .map(|cell| cell.value.as_str())
    }

    /// Write time of the newest `stats:timestamp` cell.
    pub fn stats_written_at(&self) -> Option<DateTime<Utc>> {
        self.newest(ColumnFamilyName::stats().as_str(), TIMESTAMP_QUALIFIER)
            .and_then(ListedCell::written_at)
    }
}
