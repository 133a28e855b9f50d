#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use rowgate_contracts::cells::{CellVersion, RowMutation, StoredRow};
use rowgate_contracts::row::RowPrefix;
use rowgate_contracts::table::{ColumnFamilySpec, GcRule, TableId};
use rowgate_contracts::Validate;
use tracing::debug;

use crate::{StorageError, TableStore};

pub type MicrosClock = Arc<dyn Fn() -> i64 + Send + Sync>;

fn system_now_micros() -> i64 {
    Utc::now().timestamp_micros()
}

#[derive(Debug, Default)]
struct MemTable {
    families: BTreeMap<String, GcRule>,
    rows: BTreeMap<Vec<u8>, StoredRow>,
}

impl MemTable {
    fn expiry_cutoff(&self, family: &str, now_micros: i64) -> Option<i64> {
        let age = self.families.get(family)?.max_age()?;
        Some(now_micros.saturating_sub(age.as_micros()))
    }

    /// Copy of `row` without cells the GC rules have already expired.
    fn visible(&self, row: &StoredRow, now_micros: i64) -> StoredRow {
        let mut out = StoredRow::new(row.key.clone());
        for (family, columns) in &row.families {
            let cutoff = self.expiry_cutoff(family, now_micros);
            for (qualifier, versions) in columns {
                for v in versions {
                    if cutoff.is_some_and(|c| v.timestamp_micros < c) {
                        continue;
                    }
                    out.push_cell(family, qualifier, v.clone());
                }
            }
        }
        out
    }
}

/// Wide-column store kept in process memory.
///
/// Behaves like the managed store for everything the gateway relies on:
/// rows in key order, missing tables/families rejected, and age-based GC
/// applied passively (expired cells are never returned, and
/// [`InMemoryTableStore::collect_garbage`] reclaims them).
pub struct InMemoryTableStore {
    tables: Mutex<BTreeMap<TableId, MemTable>>,
    clock: MicrosClock,
}

impl Default for InMemoryTableStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryTableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTableStore").finish_non_exhaustive()
    }
}

impl InMemoryTableStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(system_now_micros))
    }

    pub fn with_clock(clock: MicrosClock) -> Self {
        Self {
            tables: Mutex::new(BTreeMap::new()),
            clock,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<TableId, MemTable>>, StorageError> {
        self.tables.lock().map_err(|_| StorageError::Backend {
            status: 500,
            message: "in-memory store lock poisoned".to_string(),
        })
    }

    /// Drops expired cells and rows left empty. Returns the number of
    /// cells removed.
    pub fn collect_garbage(&self) -> Result<usize, StorageError> {
        let now = (self.clock)();
        let mut tables = self.lock()?;
        let mut removed = 0usize;
        for table in tables.values_mut() {
            let cutoffs: BTreeMap<String, i64> = table
                .families
                .keys()
                .filter_map(|f| table.expiry_cutoff(f, now).map(|c| (f.clone(), c)))
                .collect();
            table.rows.retain(|_, row| {
                for (family, columns) in row.families.iter_mut() {
                    let Some(cutoff) = cutoffs.get(family) else {
                        continue;
                    };
                    for versions in columns.values_mut() {
                        let before = versions.len();
                        versions.retain(|v| v.timestamp_micros >= *cutoff);
                        removed += before - versions.len();
                    }
                    columns.retain(|_, versions| !versions.is_empty());
                }
                row.families.retain(|_, columns| !columns.is_empty());
                !row.is_empty()
            });
        }
        debug!(removed, "in-memory gc pass");
        Ok(removed)
    }
}

impl TableStore for InMemoryTableStore {
    fn table_exists(&self, table: &TableId) -> Result<bool, StorageError> {
        Ok(self.lock()?.contains_key(table))
    }

    fn create_table(&self, table: &TableId) -> Result<(), StorageError> {
        let mut tables = self.lock()?;
        if tables.contains_key(table) {
            return Err(StorageError::TableAlreadyExists {
                table: table.to_string(),
            });
        }
        tables.insert(table.clone(), MemTable::default());
        Ok(())
    }

    fn create_column_family(
        &self,
        table: &TableId,
        family: &ColumnFamilySpec,
    ) -> Result<(), StorageError> {
        family.name.validate()?;
        let mut tables = self.lock()?;
        let t = tables
            .get_mut(table)
            .ok_or_else(|| StorageError::TableNotFound {
                table: table.to_string(),
            })?;
        if t.families.contains_key(family.name.as_str()) {
            return Err(StorageError::ColumnFamilyAlreadyExists {
                table: table.to_string(),
                family: family.name.to_string(),
            });
        }
        t.families
            .insert(family.name.as_str().to_string(), family.gc_rule);
        Ok(())
    }

    fn delete_table(&self, table: &TableId) -> Result<(), StorageError> {
        self.lock()?
            .remove(table)
            .map(|_| ())
            .ok_or_else(|| StorageError::TableNotFound {
                table: table.to_string(),
            })
    }

    fn mutate_row(&self, table: &TableId, mutation: &RowMutation) -> Result<(), StorageError> {
        mutation.validate()?;
        let mut tables = self.lock()?;
        let t = tables
            .get_mut(table)
            .ok_or_else(|| StorageError::TableNotFound {
                table: table.to_string(),
            })?;
        if let Some(missing) = mutation
            .cells
            .iter()
            .find(|c| !t.families.contains_key(c.family.as_str()))
        {
            return Err(StorageError::ColumnFamilyNotFound {
                table: table.to_string(),
                family: missing.family.to_string(),
            });
        }

        let key = mutation.row_key.as_bytes().to_vec();
        let row = t
            .rows
            .entry(key.clone())
            .or_insert_with(|| StoredRow::new(key));
        for cell in &mutation.cells {
            // A write at an existing timestamp replaces that version.
            if let Some(versions) = row
                .families
                .get_mut(cell.family.as_str())
                .and_then(|cols| cols.get_mut(&cell.qualifier))
            {
                versions.retain(|v| v.timestamp_micros != cell.timestamp_micros);
            }
            row.push_cell(
                cell.family.as_str(),
                &cell.qualifier,
                CellVersion {
                    timestamp_micros: cell.timestamp_micros,
                    value: cell.value.clone(),
                    labels: Vec::new(),
                },
            );
        }
        Ok(())
    }

    fn read_rows(
        &self,
        table: &TableId,
        prefix: &RowPrefix,
    ) -> Result<Vec<StoredRow>, StorageError> {
        let now = (self.clock)();
        let tables = self.lock()?;
        let t = tables.get(table).ok_or_else(|| StorageError::TableNotFound {
            table: table.to_string(),
        })?;
        let rows = t
            .rows
            .range(prefix.as_bytes().to_vec()..)
            .take_while(|(key, _)| prefix.matches(key))
            .map(|(_, row)| t.visible(row, now))
            .filter(|row| !row.is_empty())
            .collect();
        Ok(rows)
    }
}
