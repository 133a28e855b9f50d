#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use crate::row::RowKey;
use crate::table::ColumnFamilyName;
use crate::{ContractViolation, Validate};

/// Truncates a microsecond timestamp to the millisecond granularity the
/// store accepts for cell write times.
pub fn truncate_to_millis(timestamp_micros: i64) -> i64 {
    timestamp_micros - timestamp_micros.rem_euclid(1_000)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCell {
    pub family: ColumnFamilyName,
    pub qualifier: Vec<u8>,
    pub timestamp_micros: i64,
    pub value: Vec<u8>,
}

impl SetCell {
    pub fn new(
        family: ColumnFamilyName,
        qualifier: impl Into<Vec<u8>>,
        timestamp_micros: i64,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            family,
            qualifier: qualifier.into(),
            timestamp_micros: truncate_to_millis(timestamp_micros),
            value: value.into(),
        }
    }
}

/// All cells written to a single row in one durable call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowMutation {
    pub row_key: RowKey,
    pub cells: Vec<SetCell>,
}

impl Validate for RowMutation {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.row_key.validate()?;
        if self.cells.is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "row_mutation.cells",
                reason: "must contain at least one cell",
            });
        }
        for cell in &self.cells {
            if cell.timestamp_micros < 0 || cell.timestamp_micros % 1_000 != 0 {
                return Err(ContractViolation::InvalidValue {
                    field: "row_mutation.cells.timestamp_micros",
                    reason: "must be a non-negative millisecond timestamp",
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellVersion {
    pub timestamp_micros: i64,
    pub value: Vec<u8>,
    pub labels: Vec<String>,
}

/// A row as read back from the store. Versions of each column are kept
/// newest first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StoredRow {
    pub key: Vec<u8>,
    pub families: BTreeMap<String, BTreeMap<Vec<u8>, Vec<CellVersion>>>,
}

impl StoredRow {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            families: BTreeMap::new(),
        }
    }

    pub fn push_cell(&mut self, family: &str, qualifier: &[u8], version: CellVersion) {
        let versions = self
            .families
            .entry(family.to_string())
            .or_default()
            .entry(qualifier.to_vec())
            .or_default();
        let at = versions
            .iter()
            .position(|v| v.timestamp_micros < version.timestamp_micros)
            .unwrap_or(versions.len());
        versions.insert(at, version);
    }

    pub fn latest(&self, family: &str, qualifier: &[u8]) -> Option<&CellVersion> {
        self.families.get(family)?.get(qualifier)?.first()
    }

    pub fn is_empty(&self) -> bool {
        self.families
            .values()
            .all(|columns| columns.values().all(Vec::is_empty))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(ts: i64, value: &str) -> CellVersion {
        CellVersion {
            timestamp_micros: ts,
            value: value.as_bytes().to_vec(),
            labels: Vec::new(),
        }
    }

    #[test]
    fn at_cells_01_versions_are_newest_first() {
        let mut row = StoredRow::new("data#a");
        row.push_cell("stats", b"value", version(2_000, "mid"));
        row.push_cell("stats", b"value", version(1_000, "old"));
        row.push_cell("stats", b"value", version(3_000, "new"));
        assert_eq!(row.latest("stats", b"value").unwrap().value, b"new");
        let all = &row.families["stats"][b"value".as_slice()];
        let ts: Vec<i64> = all.iter().map(|v| v.timestamp_micros).collect();
        assert_eq!(ts, vec![3_000, 2_000, 1_000]);
    }

    #[test]
    fn at_cells_02_set_cell_truncates_to_millis() {
        let cell = SetCell::new(ColumnFamilyName::stats(), "value", 1_700_000_000_123_456, "x");
        assert_eq!(cell.timestamp_micros, 1_700_000_000_123_000);
        assert_eq!(truncate_to_millis(-1), -1_000);
    }

    #[test]
    fn at_cells_03_mutation_requires_cells() {
        let m = RowMutation {
            row_key: RowKey::new("data#x").unwrap(),
            cells: Vec::new(),
        };
        assert!(m.validate().is_err());
    }
}
