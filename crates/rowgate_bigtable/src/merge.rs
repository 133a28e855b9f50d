#![forbid(unsafe_code)]

use rowgate_contracts::cells::{CellVersion, StoredRow};
use rowgate_storage::StorageError;

use crate::codec::CellChunk;

#[derive(Debug)]
struct PartialCell {
    family: String,
    qualifier: Vec<u8>,
    timestamp_micros: i64,
    labels: Vec<String>,
    value: Vec<u8>,
}

/// Reassembles read-rows chunks into whole rows.
///
/// A chunk names its row key only when a row starts and its family only
/// when the family changes; a value larger than one chunk is split across
/// chunks with `value_size` set on all but the last piece. A row becomes
/// visible only on `commit_row`, and `reset_row` discards everything
/// buffered for the row in progress.
#[derive(Debug, Default)]
pub struct RowMerger {
    rows: Vec<StoredRow>,
    current: Option<StoredRow>,
    family: Option<String>,
    qualifier: Option<Vec<u8>>,
    partial: Option<PartialCell>,
    last_key: Option<Vec<u8>>,
}

fn invalid(reason: &str) -> StorageError {
    StorageError::decode(format!("invalid read rows chunk: {reason}"))
}

impl RowMerger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: CellChunk) -> Result<(), StorageError> {
        if chunk.reset_row {
            return self.reset(&chunk);
        }

        match self.current.as_ref() {
            None => {
                let key = chunk
                    .row_key
                    .clone()
                    .filter(|k| !k.is_empty())
                    .ok_or_else(|| invalid("new row without a row key"))?;
                if chunk.family_name.is_none() || chunk.qualifier.is_none() {
                    return Err(invalid("new row without family and qualifier"));
                }
                if self.last_key.as_ref().is_some_and(|last| key <= *last) {
                    return Err(invalid("row keys out of order"));
                }
                self.current = Some(StoredRow::new(key));
            }
            Some(row) => {
                if chunk.row_key.as_ref().is_some_and(|k| *k != row.key) {
                    return Err(invalid("row key changed before commit"));
                }
            }
        }

        if let Some(family) = chunk.family_name.clone() {
            if chunk.qualifier.is_none() {
                return Err(invalid("family without qualifier"));
            }
            self.family = Some(family);
        }
        if let Some(qualifier) = chunk.qualifier.clone() {
            if self.family.is_none() {
                return Err(invalid("qualifier without family"));
            }
            self.qualifier = Some(qualifier);
        }

        match self.partial.as_mut() {
            Some(partial) => {
                if chunk.family_name.is_some() || chunk.qualifier.is_some() {
                    return Err(invalid("cell coordinates changed mid-value"));
                }
                partial.value.extend_from_slice(&chunk.value);
            }
            None => {
                let (Some(family), Some(qualifier)) = (&self.family, &self.qualifier) else {
                    return Err(invalid("cell without family and qualifier"));
                };
                self.partial = Some(PartialCell {
                    family: family.clone(),
                    qualifier: qualifier.clone(),
                    timestamp_micros: chunk.timestamp_micros,
                    labels: chunk.labels.clone(),
                    value: chunk.value.clone(),
                });
            }
        }

        if chunk.value_size > 0 {
            if chunk.commit_row {
                return Err(invalid("commit inside a split value"));
            }
            return Ok(());
        }
        self.finish_cell();

        if chunk.commit_row {
            if let Some(row) = self.current.take() {
                self.last_key = Some(row.key.clone());
                self.rows.push(row);
            }
            self.family = None;
            self.qualifier = None;
        }
        Ok(())
    }

    fn finish_cell(&mut self) {
        let (Some(cell), Some(row)) = (self.partial.take(), self.current.as_mut()) else {
            return;
        };
        row.push_cell(
            &cell.family,
            &cell.qualifier,
            CellVersion {
                timestamp_micros: cell.timestamp_micros,
                value: cell.value,
                labels: cell.labels,
            },
        );
    }

    fn reset(&mut self, chunk: &CellChunk) -> Result<(), StorageError> {
        if self.current.is_none() {
            return Err(invalid("reset with no row in progress"));
        }
        if chunk.row_key.is_some()
            || chunk.family_name.is_some()
            || chunk.qualifier.is_some()
            || !chunk.value.is_empty()
            || chunk.commit_row
        {
            return Err(invalid("reset chunk carries data"));
        }
        self.current = None;
        self.partial = None;
        self.family = None;
        self.qualifier = None;
        Ok(())
    }

    /// Committed rows in stream order. Fails if the stream stopped in the
    /// middle of a row.
    pub fn finish(self) -> Result<Vec<StoredRow>, StorageError> {
        if self.current.is_some() || self.partial.is_some() {
            return Err(invalid("stream ended before the last row was committed"));
        }
        Ok(self.rows)
    }
}

pub fn merge_chunks(
    chunks: impl IntoIterator<Item = CellChunk>,
) -> Result<Vec<StoredRow>, StorageError> {
    let mut merger = RowMerger::new();
    for chunk in chunks {
        merger.push(chunk)?;
    }
    merger.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(key: &str, qualifier: &str, ts: i64, value: &str) -> CellChunk {
        CellChunk {
            row_key: Some(key.as_bytes().to_vec()),
            family_name: Some("stats".to_string()),
            qualifier: Some(qualifier.as_bytes().to_vec()),
            timestamp_micros: ts,
            value: value.as_bytes().to_vec(),
            ..CellChunk::default()
        }
    }

    fn next(qualifier: &str, ts: i64, value: &str) -> CellChunk {
        CellChunk {
            qualifier: Some(qualifier.as_bytes().to_vec()),
            timestamp_micros: ts,
            value: value.as_bytes().to_vec(),
            ..CellChunk::default()
        }
    }

    fn commit(mut c: CellChunk) -> CellChunk {
        c.commit_row = true;
        c
    }

    #[test]
    fn at_bt_merge_01_two_rows_two_columns() {
        let rows = merge_chunks(vec![
            start("data#1", "value", 1_000, "1"),
            commit(next("timestamp", 1_000, "t1")),
            start("data#2", "value", 2_000, "2"),
            commit(next("timestamp", 2_000, "t2")),
        ])
        .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].key, b"data#1".to_vec());
        assert_eq!(rows[0].latest("stats", b"value").unwrap().value, b"1");
        assert_eq!(rows[0].latest("stats", b"timestamp").unwrap().value, b"t1");
        assert_eq!(rows[1].latest("stats", b"value").unwrap().value, b"2");
    }

    #[test]
    fn at_bt_merge_02_split_value_is_concatenated() {
        let mut first = start("data#1", "value", 1_000, "01890a5d-");
        first.value_size = 36;
        let mut middle = CellChunk {
            value: b"ac96-774b-".to_vec(),
            ..CellChunk::default()
        };
        middle.value_size = 36;
        let last = commit(CellChunk {
            value: b"bcce-b302099a8057".to_vec(),
            ..CellChunk::default()
        });
        let rows = merge_chunks(vec![first, middle, last]).unwrap();
        assert_eq!(
            rows[0].latest("stats", b"value").unwrap().value,
            b"01890a5d-ac96-774b-bcce-b302099a8057"
        );
        assert_eq!(rows[0].latest("stats", b"value").unwrap().timestamp_micros, 1_000);
    }

    #[test]
    fn at_bt_merge_03_reset_discards_row_in_progress() {
        let reset = CellChunk {
            reset_row: true,
            ..CellChunk::default()
        };
        let rows = merge_chunks(vec![
            start("data#1", "value", 1_000, "stale"),
            reset,
            commit(start("data#1", "value", 1_000, "fresh")),
        ])
        .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].latest("stats", b"value").unwrap().value, b"fresh");
    }

    #[test]
    fn at_bt_merge_04_multiple_versions_newest_first() {
        let rows = merge_chunks(vec![
            start("data#1", "value", 2_000, "new"),
            commit(CellChunk {
                timestamp_micros: 1_000,
                value: b"old".to_vec(),
                ..CellChunk::default()
            }),
        ])
        .unwrap();
        let versions = &rows[0].families["stats"][b"value".as_slice()];
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].value, b"new");
        assert_eq!(versions[1].value, b"old");
    }

    #[test]
    fn at_bt_merge_05_malformed_streams_rejected() {
        assert!(merge_chunks(vec![next("value", 1, "x")]).is_err());
        assert!(merge_chunks(vec![start("data#1", "value", 1, "x")]).is_err());
        assert!(merge_chunks(vec![
            commit(start("data#2", "value", 1, "x")),
            commit(start("data#1", "value", 1, "x")),
        ])
        .is_err());
        assert!(merge_chunks(vec![
            start("data#1", "value", 1, "x"),
            commit(start("data#2", "value", 1, "x")),
        ])
        .is_err());
        let reset = CellChunk {
            reset_row: true,
            ..CellChunk::default()
        };
        assert!(merge_chunks(vec![reset]).is_err());
        assert!(merge_chunks(Vec::new()).unwrap().is_empty());
    }
}
