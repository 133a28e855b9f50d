#![forbid(unsafe_code)]

//! JSON bodies of the Bigtable v2 REST surface.
//!
//! Bytes fields travel as standard base64 and int64 fields as decimal
//! strings, per the protobuf JSON mapping.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rowgate_contracts::cells::RowMutation;
use rowgate_contracts::row::RowPrefix;
use rowgate_contracts::table::{ColumnFamilySpec, GcRule, TableId};
use rowgate_storage::StorageError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub fn encode_bytes(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode_bytes(field: &str, raw: &str) -> Result<Vec<u8>, StorageError> {
    STANDARD
        .decode(raw)
        .map_err(|e| StorageError::decode(format!("{field} is not valid base64: {e}")))
}

#[derive(Debug, Serialize, Default)]
pub struct EmptyTable {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTableRequest<'a> {
    pub table_id: &'a str,
    pub table: EmptyTable,
}

impl<'a> CreateTableRequest<'a> {
    pub fn new(table: &'a TableId) -> Self {
        Self {
            table_id: table.as_str(),
            table: EmptyTable::default(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GcRuleBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_age: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnFamilyBody {
    pub gc_rule: GcRuleBody,
}

#[derive(Debug, Serialize)]
pub struct Modification<'a> {
    pub id: &'a str,
    pub create: ColumnFamilyBody,
}

#[derive(Debug, Serialize)]
pub struct ModifyColumnFamiliesRequest<'a> {
    pub modifications: Vec<Modification<'a>>,
}

impl<'a> ModifyColumnFamiliesRequest<'a> {
    pub fn create(family: &'a ColumnFamilySpec) -> Self {
        let gc_rule = match family.gc_rule {
            GcRule::MaxAge(age) => GcRuleBody {
                max_age: Some(age.to_proto_duration()),
            },
        };
        Self {
            modifications: vec![Modification {
                id: family.name.as_str(),
                create: ColumnFamilyBody { gc_rule },
            }],
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetCellBody {
    pub family_name: String,
    pub column_qualifier: String,
    pub timestamp_micros: String,
    pub value: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationBody {
    pub set_cell: SetCellBody,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MutateRowRequest {
    pub row_key: String,
    pub mutations: Vec<MutationBody>,
}

impl From<&RowMutation> for MutateRowRequest {
    fn from(m: &RowMutation) -> Self {
        Self {
            row_key: encode_bytes(m.row_key.as_bytes()),
            mutations: m
                .cells
                .iter()
                .map(|c| MutationBody {
                    set_cell: SetCellBody {
                        family_name: c.family.as_str().to_string(),
                        column_qualifier: encode_bytes(&c.qualifier),
                        timestamp_micros: c.timestamp_micros.to_string(),
                        value: encode_bytes(&c.value),
                    },
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowRangeBody {
    pub start_key_closed: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_key_open: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowSetBody {
    pub row_ranges: Vec<RowRangeBody>,
}

#[derive(Debug, Serialize)]
pub struct ReadRowsRequest {
    pub rows: RowSetBody,
}

impl ReadRowsRequest {
    pub fn prefix(prefix: &RowPrefix) -> Self {
        Self {
            rows: RowSetBody {
                row_ranges: vec![RowRangeBody {
                    start_key_closed: encode_bytes(prefix.as_bytes()),
                    end_key_open: prefix.range_end().as_deref().map(encode_bytes),
                }],
            },
        }
    }
}

/// int64 fields may arrive as JSON strings or numbers.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Int64Json {
    Num(i64),
    Str(String),
}

impl Int64Json {
    pub fn value(&self) -> Result<i64, StorageError> {
        match self {
            Int64Json::Num(n) => Ok(*n),
            Int64Json::Str(s) => s
                .parse()
                .map_err(|_| StorageError::decode(format!("invalid int64 '{s}'"))),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CellChunkBody {
    pub row_key: Option<String>,
    pub family_name: Option<String>,
    pub qualifier: Option<String>,
    pub timestamp_micros: Option<Int64Json>,
    #[serde(default)]
    pub labels: Vec<String>,
    pub value: Option<String>,
    #[serde(default)]
    pub value_size: i32,
    #[serde(default)]
    pub reset_row: bool,
    #[serde(default)]
    pub commit_row: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReadRowsResponseBody {
    #[serde(default)]
    pub chunks: Vec<CellChunkBody>,
}

/// A read-rows chunk with bytes fields decoded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CellChunk {
    pub row_key: Option<Vec<u8>>,
    pub family_name: Option<String>,
    pub qualifier: Option<Vec<u8>>,
    pub timestamp_micros: i64,
    pub labels: Vec<String>,
    pub value: Vec<u8>,
    pub value_size: i32,
    pub reset_row: bool,
    pub commit_row: bool,
}

impl TryFrom<CellChunkBody> for CellChunk {
    type Error = StorageError;

    fn try_from(body: CellChunkBody) -> Result<Self, Self::Error> {
        Ok(Self {
            row_key: body
                .row_key
                .as_deref()
                .map(|k| decode_bytes("rowKey", k))
                .transpose()?,
            family_name: body.family_name,
            qualifier: body
                .qualifier
                .as_deref()
                .map(|q| decode_bytes("qualifier", q))
                .transpose()?,
            timestamp_micros: body
                .timestamp_micros
                .as_ref()
                .map(Int64Json::value)
                .transpose()?
                .unwrap_or(0),
            labels: body.labels,
            value: body
                .value
                .as_deref()
                .map(|v| decode_bytes("value", v))
                .transpose()?
                .unwrap_or_default(),
            value_size: body.value_size,
            reset_row: body.reset_row,
            commit_row: body.commit_row,
        })
    }
}

/// Chunks of a read-rows reply. The streaming call comes back either as a
/// JSON array of response messages or as a single message.
pub fn decode_read_rows(raw: &str) -> Result<Vec<CellChunk>, StorageError> {
    let root: Value = serde_json::from_str(raw)
        .map_err(|e| StorageError::decode(format!("read rows response: {e}")))?;
    let messages = match root {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    };
    let mut chunks = Vec::new();
    for message in messages {
        let body: ReadRowsResponseBody = serde_json::from_value(message)
            .map_err(|e| StorageError::decode(format!("read rows message: {e}")))?;
        for chunk in body.chunks {
            chunks.push(CellChunk::try_from(chunk)?);
        }
    }
    Ok(chunks)
}

#[derive(Debug, Deserialize, Default)]
pub struct GoogleErrorBody {
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorEnvelope {
    error: GoogleErrorBody,
}

/// What a failed call was acting on; decides how `NOT_FOUND` and
/// `ALREADY_EXISTS` are reported.
#[derive(Debug, Clone, Copy)]
pub enum ErrorTarget<'a> {
    Table(&'a TableId),
    Family(&'a TableId, &'a str),
    Rows(&'a TableId),
}

impl ErrorTarget<'_> {
    fn table(&self) -> String {
        match self {
            ErrorTarget::Table(t) | ErrorTarget::Family(t, _) | ErrorTarget::Rows(t) => {
                t.to_string()
            }
        }
    }
}

pub fn parse_error_body(raw: &str) -> GoogleErrorBody {
    serde_json::from_str::<GoogleErrorEnvelope>(raw)
        .map(|e| e.error)
        .unwrap_or_else(|_| GoogleErrorBody {
            code: 0,
            message: raw.trim().to_string(),
            status: String::new(),
        })
}

pub fn map_status_error(http_status: u16, raw_body: &str, target: ErrorTarget<'_>) -> StorageError {
    let body = parse_error_body(raw_body);
    let status = body.status.clone();
    let table = target.table();
    match (status.as_str(), http_status) {
        ("NOT_FOUND", _) | (_, 404) => match target {
            ErrorTarget::Family(_, family) => StorageError::ColumnFamilyNotFound {
                table,
                family: family.to_string(),
            },
            ErrorTarget::Rows(_) if body.message.to_ascii_lowercase().contains("family") => {
                StorageError::ColumnFamilyNotFound {
                    table,
                    family: String::new(),
                }
            }
            _ => StorageError::TableNotFound { table },
        },
        ("ALREADY_EXISTS", _) | (_, 409) => match target {
            ErrorTarget::Family(_, family) => StorageError::ColumnFamilyAlreadyExists {
                table,
                family: family.to_string(),
            },
            _ => StorageError::TableAlreadyExists { table },
        },
        ("UNAUTHENTICATED", _) | ("PERMISSION_DENIED", _) | (_, 401) | (_, 403) => {
            StorageError::Unauthorized(body.message)
        }
        _ => StorageError::Backend {
            status: http_status,
            message: if body.message.is_empty() {
                body.status
            } else {
                body.message
            },
        },
    }
}
