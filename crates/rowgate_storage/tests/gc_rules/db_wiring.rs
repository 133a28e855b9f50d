#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use rowgate_contracts::cells::{RowMutation, SetCell};
use rowgate_contracts::row::{RowKey, RowPrefix};
use rowgate_contracts::table::{
    ColumnFamilyName, ColumnFamilySpec, GcRule, MaxAge, TableId, STATS_MAX_AGE_SECONDS,
};
use rowgate_storage::{InMemoryTableStore, TableStore};

const START_MICROS: i64 = 1_700_000_000_000_000;
const DAY_MICROS: i64 = 86_400 * 1_000_000;

fn table() -> TableId {
    TableId::new("hono").unwrap()
}

fn store_at(now: Arc<AtomicI64>, family: ColumnFamilySpec) -> InMemoryTableStore {
    let s = InMemoryTableStore::with_clock(Arc::new(move || now.load(Ordering::SeqCst)));
    s.create_table(&table()).unwrap();
    s.create_column_family(&table(), &family).unwrap();
    s
}

fn put(s: &InMemoryTableStore, family: &ColumnFamilySpec, key: &str, ts: i64) {
    s.mutate_row(
        &table(),
        &RowMutation {
            row_key: RowKey::new(key).unwrap(),
            cells: vec![SetCell::new(family.name.clone(), "value", ts, key)],
        },
    )
    .unwrap();
}

#[test]
fn at_gc_db_01_cells_expire_after_five_days() {
    let now = Arc::new(AtomicI64::new(START_MICROS));
    let family = ColumnFamilySpec::stats();
    let s = store_at(now.clone(), family.clone());
    put(&s, &family, "data#old", START_MICROS);
    put(&s, &family, "data#new", START_MICROS + 3 * DAY_MICROS);

    now.store(START_MICROS + 4 * DAY_MICROS, Ordering::SeqCst);
    assert_eq!(s.read_rows(&table(), &RowPrefix::data()).unwrap().len(), 2);

    now.store(
        START_MICROS + STATS_MAX_AGE_SECONDS * 1_000_000 + 1_000,
        Ordering::SeqCst,
    );
    let rows = s.read_rows(&table(), &RowPrefix::data()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].key, b"data#new".to_vec());
}

#[test]
fn at_gc_db_02_collect_garbage_reclaims_expired_rows() {
    let now = Arc::new(AtomicI64::new(START_MICROS));
    let family = ColumnFamilySpec {
        name: ColumnFamilyName::new("short").unwrap(),
        gc_rule: GcRule::MaxAge(MaxAge::new(1, 0).unwrap()),
    };
    let s = store_at(now.clone(), family.clone());
    put(&s, &family, "data#a", START_MICROS);
    put(&s, &family, "data#b", START_MICROS + 2_000_000);

    now.store(START_MICROS + 2_500_000, Ordering::SeqCst);
    assert_eq!(s.collect_garbage().unwrap(), 1);
    let rows = s.read_rows(&table(), &RowPrefix::data()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].key, b"data#b".to_vec());
    assert_eq!(s.collect_garbage().unwrap(), 0);
}

#[test]
fn at_gc_db_03_system_clock_keeps_fresh_cells_and_expires_stale_ones() {
    let s = InMemoryTableStore::new();
    let family = ColumnFamilySpec::stats();
    s.create_table(&table()).unwrap();
    s.create_column_family(&table(), &family).unwrap();

    let now = chrono::Utc::now().timestamp_micros();
    put(&s, &family, "data#fresh", now);
    put(&s, &family, "data#stale", now - 6 * DAY_MICROS);

    let rows = s.read_rows(&table(), &RowPrefix::data()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].key, b"data#fresh".to_vec());
}
