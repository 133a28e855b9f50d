#![forbid(unsafe_code)]

pub mod error;
pub mod memory;

use rowgate_contracts::cells::{RowMutation, StoredRow};
use rowgate_contracts::row::RowPrefix;
use rowgate_contracts::table::{ColumnFamilySpec, TableId};

pub use error::StorageError;
pub use memory::InMemoryTableStore;

/// Handle to a wide-column table store.
///
/// One handle is created at startup and shared by every request, so
/// implementations must be safe to call concurrently. Table lifecycle calls
/// are not atomic with each other; callers that check existence before
/// creating must be ready for `TableAlreadyExists` / `TableNotFound`.
pub trait TableStore: Send + Sync {
    fn table_exists(&self, table: &TableId) -> Result<bool, StorageError>;

    fn create_table(&self, table: &TableId) -> Result<(), StorageError>;

    fn create_column_family(
        &self,
        table: &TableId,
        family: &ColumnFamilySpec,
    ) -> Result<(), StorageError>;

    /// Drops the table and all of its data.
    fn delete_table(&self, table: &TableId) -> Result<(), StorageError>;

    fn mutate_row(&self, table: &TableId, mutation: &RowMutation) -> Result<(), StorageError>;

    /// Every row whose key starts with `prefix`, in ascending key order.
    fn read_rows(&self, table: &TableId, prefix: &RowPrefix)
        -> Result<Vec<StoredRow>, StorageError>;
}
