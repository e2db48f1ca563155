//! Table model and the cleaning operations a dataset session can apply.

use shared::protocol::RequestError;
use thiserror::Error;

pub mod codec;
pub mod ops;
pub mod table;

pub use codec::{read_csv, write_csv};
pub use ops::{apply_operation, clean_pipeline, AppliedOperation};
pub use table::{Cell, Column, Table};

#[derive(Debug, Error)]
pub enum CleaningError {
    #[error("no columns to parse from file")]
    EmptyInput,
    #[error("{0}")]
    Parse(String),
    #[error("failed to encode CSV: {0}")]
    Encode(String),
    #[error(transparent)]
    InvalidRequest(#[from] RequestError),
}

#[cfg(test)]
#[path = "tests/table_tests.rs"]
mod table_tests;

#[cfg(test)]
#[path = "tests/ops_tests.rs"]
mod ops_tests;
