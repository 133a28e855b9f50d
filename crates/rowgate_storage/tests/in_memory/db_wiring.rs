#![forbid(unsafe_code)]

use std::sync::Arc;
use std::thread;

use rowgate_contracts::cells::{RowMutation, SetCell};
use rowgate_contracts::row::{RowKey, RowPrefix};
use rowgate_contracts::table::{ColumnFamilyName, ColumnFamilySpec, TableId};
use rowgate_storage::{InMemoryTableStore, StorageError, TableStore};

const NOW_MICROS: i64 = 1_700_000_000_000_000;

fn table() -> TableId {
    TableId::new("hono").unwrap()
}

fn store_with_stats_table() -> InMemoryTableStore {
    let s = InMemoryTableStore::with_clock(Arc::new(|| NOW_MICROS));
    s.create_table(&table()).unwrap();
    s.create_column_family(&table(), &ColumnFamilySpec::stats())
        .unwrap();
    s
}

fn put(key: &str, value: &str, ts: i64) -> RowMutation {
    RowMutation {
        row_key: RowKey::new(key).unwrap(),
        cells: vec![SetCell::new(ColumnFamilyName::stats(), "value", ts, value)],
    }
}

#[test]
fn at_store_db_01_table_lifecycle() {
    let s = InMemoryTableStore::new();
    let t = table();
    assert!(!s.table_exists(&t).unwrap());
    s.create_table(&t).unwrap();
    assert!(s.table_exists(&t).unwrap());
    assert!(matches!(
        s.create_table(&t),
        Err(StorageError::TableAlreadyExists { .. })
    ));
    s.delete_table(&t).unwrap();
    assert!(!s.table_exists(&t).unwrap());
    assert!(matches!(
        s.delete_table(&t),
        Err(StorageError::TableNotFound { .. })
    ));
}

#[test]
fn at_store_db_02_mutation_requires_table_and_family() {
    let s = InMemoryTableStore::with_clock(Arc::new(|| NOW_MICROS));
    let t = table();
    assert!(matches!(
        s.mutate_row(&t, &put("data#a", "a", NOW_MICROS)),
        Err(StorageError::TableNotFound { .. })
    ));

    s.create_table(&t).unwrap();
    assert!(matches!(
        s.mutate_row(&t, &put("data#a", "a", NOW_MICROS)),
        Err(StorageError::ColumnFamilyNotFound { .. })
    ));
    assert!(s.read_rows(&t, &RowPrefix::data()).unwrap().is_empty());

    s.create_column_family(&t, &ColumnFamilySpec::stats())
        .unwrap();
    assert!(matches!(
        s.create_column_family(&t, &ColumnFamilySpec::stats()),
        Err(StorageError::ColumnFamilyAlreadyExists { .. })
    ));
    s.mutate_row(&t, &put("data#a", "a", NOW_MICROS)).unwrap();
    assert_eq!(s.read_rows(&t, &RowPrefix::data()).unwrap().len(), 1);
}

#[test]
fn at_store_db_03_prefix_scan_is_partitioned_and_ordered() {
    let s = store_with_stats_table();
    let t = table();
    for key in ["data#c", "meta#x", "data#a", "data$", "data", "data#b"] {
        s.mutate_row(&t, &put(key, key, NOW_MICROS)).unwrap();
    }
    let keys: Vec<Vec<u8>> = s
        .read_rows(&t, &RowPrefix::data())
        .unwrap()
        .into_iter()
        .map(|r| r.key)
        .collect();
    assert_eq!(
        keys,
        vec![b"data#a".to_vec(), b"data#b".to_vec(), b"data#c".to_vec()]
    );
}

#[test]
fn at_store_db_04_same_timestamp_overwrites_newer_adds_version() {
    let s = store_with_stats_table();
    let t = table();
    s.mutate_row(&t, &put("data#a", "first", NOW_MICROS)).unwrap();
    s.mutate_row(&t, &put("data#a", "second", NOW_MICROS)).unwrap();
    s.mutate_row(&t, &put("data#a", "third", NOW_MICROS + 1_000))
        .unwrap();

    let rows = s.read_rows(&t, &RowPrefix::data()).unwrap();
    let versions = &rows[0].families["stats"][b"value".as_slice()];
    let values: Vec<&[u8]> = versions.iter().map(|v| v.value.as_slice()).collect();
    assert_eq!(values, vec![b"third".as_slice(), b"second".as_slice()]);
}

#[test]
fn at_store_db_05_concurrent_writers_share_one_handle() {
    let s = Arc::new(store_with_stats_table());
    let handles: Vec<_> = (0..8)
        .map(|w| {
            let s = Arc::clone(&s);
            thread::spawn(move || {
                for i in 0..25 {
                    let key = format!("data#{w:02}-{i:03}");
                    s.mutate_row(&table(), &put(&key, &key, NOW_MICROS)).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(s.read_rows(&table(), &RowPrefix::data()).unwrap().len(), 200);
}

#[test]
fn at_store_db_06_delete_drops_rows() {
    let s = store_with_stats_table();
    let t = table();
    s.mutate_row(&t, &put("data#a", "a", NOW_MICROS)).unwrap();
    s.delete_table(&t).unwrap();
    s.create_table(&t).unwrap();
    s.create_column_family(&t, &ColumnFamilySpec::stats())
        .unwrap();
    assert!(s.read_rows(&t, &RowPrefix::data()).unwrap().is_empty());
}
