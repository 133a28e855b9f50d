#![forbid(unsafe_code)]

pub mod http;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rowgate_bigtable::{BigtableConfig, BigtableRestClient};
use rowgate_contracts::row::{ListedRow, Row, RowId, RowPrefix};
use rowgate_contracts::table::{ColumnFamilySpec, TableId};
use rowgate_storage::{InMemoryTableStore, StorageError, TableStore};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_INSTANCE_ID: &str = "hono-bigtable";
pub const DEFAULT_TABLE_ID: &str = "hono";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("request task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableCreateOutcome {
    Created,
    AlreadyExists,
}

impl TableCreateOutcome {
    pub fn as_text(&self) -> &'static str {
        match self {
            TableCreateOutcome::Created => "table created",
            TableCreateOutcome::AlreadyExists => "table already exists",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableDeleteOutcome {
    Deleted,
    DidNotExist,
}

impl TableDeleteOutcome {
    pub fn as_text(&self) -> &'static str {
        match self {
            TableDeleteOutcome::Deleted => "table deleted",
            TableDeleteOutcome::DidNotExist => "table does not exist",
        }
    }
}

#[derive(Debug, Clone)]
pub enum BackendConfig {
    InMemory,
    Bigtable(BigtableConfig),
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub table: TableId,
    pub backend: BackendConfig,
}

/// The storage handle the gateway was built with, kept concrete so the
/// binary can attach backend-specific housekeeping.
#[derive(Debug, Clone)]
pub enum Backend {
    InMemory(Arc<InMemoryTableStore>),
    Bigtable(Arc<BigtableRestClient>),
}

impl Backend {
    pub fn connect(config: &BackendConfig) -> Result<Self, GatewayError> {
        Ok(match config {
            BackendConfig::InMemory => Backend::InMemory(Arc::new(InMemoryTableStore::new())),
            BackendConfig::Bigtable(bt) => {
                Backend::Bigtable(Arc::new(BigtableRestClient::new(bt.clone())?))
            }
        })
    }

    pub fn store(&self) -> Arc<dyn TableStore> {
        match self {
            Backend::InMemory(s) => s.clone(),
            Backend::Bigtable(c) => c.clone(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Backend::InMemory(_) => "memory",
            Backend::Bigtable(_) => "bigtable",
        }
    }
}

/// Table Administrator, Row Writer and Row Reader over one shared store
/// handle. Built once at startup and shared by every request; holds no
/// mutable state of its own.
pub struct GatewayRuntime {
    store: Arc<dyn TableStore>,
    table: TableId,
    family: ColumnFamilySpec,
}

impl std::fmt::Debug for GatewayRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayRuntime")
            .field("table", &self.table)
            .field("family", &self.family)
            .finish_non_exhaustive()
    }
}

impl GatewayRuntime {
    pub fn new(store: Arc<dyn TableStore>, table: TableId) -> Self {
        Self {
            store,
            table,
            family: ColumnFamilySpec::stats(),
        }
    }

    pub fn in_memory(table: TableId) -> Self {
        Self::new(Arc::new(InMemoryTableStore::new()), table)
    }

    pub fn table(&self) -> &TableId {
        &self.table
    }

    /// Creates the table and its stats family unless the table exists.
    ///
    /// The two calls are not atomic: if the family call fails the table is
    /// left without it and the error is returned as is. A create that loses
    /// a race with a concurrent create reports `AlreadyExists`.
    pub fn create_table(&self) -> Result<TableCreateOutcome, GatewayError> {
        if self.store.table_exists(&self.table)? {
            info!(table = %self.table, "table already exists");
            return Ok(TableCreateOutcome::AlreadyExists);
        }
        match self.store.create_table(&self.table) {
            Ok(()) => {}
            Err(StorageError::TableAlreadyExists { .. }) => {
                info!(table = %self.table, "table created concurrently");
                return Ok(TableCreateOutcome::AlreadyExists);
            }
            Err(err) => return Err(err.into()),
        }
        if let Err(err) = self.store.create_column_family(&self.table, &self.family) {
            warn!(
                table = %self.table,
                family = %self.family.name,
                error = %err,
                "table created without its column family"
            );
            return Err(err.into());
        }
        info!(table = %self.table, family = %self.family.name, "table created");
        Ok(TableCreateOutcome::Created)
    }

    /// Deletes the table and all of its rows if it exists.
    pub fn delete_table(&self) -> Result<TableDeleteOutcome, GatewayError> {
        if !self.store.table_exists(&self.table)? {
            info!(table = %self.table, "table does not exist");
            return Ok(TableDeleteOutcome::DidNotExist);
        }
        match self.store.delete_table(&self.table) {
            Ok(()) => {
                info!(table = %self.table, "table deleted");
                Ok(TableDeleteOutcome::Deleted)
            }
            Err(StorageError::TableNotFound { .. }) => {
                info!(table = %self.table, "table deleted concurrently");
                Ok(TableDeleteOutcome::DidNotExist)
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn insert_row(&self) -> Result<Row, GatewayError> {
        self.insert_row_at(RowId::generate(), Utc::now())
    }

    /// Writes one fresh stats row. No deduplication: every call writes a
    /// new key.
    pub fn insert_row_at(&self, id: RowId, at: DateTime<Utc>) -> Result<Row, GatewayError> {
        let (row, mutation) = Row::new_stats_row(id, at);
        self.store.mutate_row(&self.table, &mutation)?;
        debug!(table = %self.table, row_key = %row.key, "row inserted");
        Ok(row)
    }

    /// Every `data#` row, loaded in full, in store order.
    pub fn list_rows(&self) -> Result<Vec<ListedRow>, GatewayError> {
        let stored = self.store.read_rows(&self.table, &RowPrefix::data())?;
        debug!(table = %self.table, rows = stored.len(), "rows listed");
        Ok(stored.iter().map(ListedRow::from_stored).collect())
    }
}

pub fn runtime_from_config(config: &GatewayConfig) -> Result<(GatewayRuntime, Backend), GatewayError> {
    let backend = Backend::connect(&config.backend)?;
    let runtime = GatewayRuntime::new(backend.store(), config.table.clone());
    Ok((runtime, backend))
}
