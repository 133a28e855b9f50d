#![forbid(unsafe_code)]

pub mod cells;
pub mod common;
pub mod row;
pub mod table;

pub use common::{ContractViolation, Validate};
