#![forbid(unsafe_code)]

use rowgate_contracts::ContractViolation;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("table '{table}' not found")]
    TableNotFound { table: String },

    #[error("table '{table}' already exists")]
    TableAlreadyExists { table: String },

    #[error("column family '{family}' not found in table '{table}'")]
    ColumnFamilyNotFound { table: String, family: String },

    #[error("column family '{family}' already exists in table '{table}'")]
    ColumnFamilyAlreadyExists { table: String, family: String },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("backend error (status {status}): {message}")]
    Backend { status: u16, message: String },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("contract violation: {0}")]
    Contract(#[from] ContractViolation),
}

impl StorageError {
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }
}
