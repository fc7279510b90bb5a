use thiserror::Error;

use crate::{
    db_types::{BulkTransferId, TransferId},
    traits::{DuplicateCheckStore, PositionStore, TimeoutStore, TransferRecordStore},
};

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Transfer {0} already exists")]
    TransferAlreadyExists(TransferId),
    #[error("Transfer {0} does not exist")]
    TransferNotFound(TransferId),
    #[error("Bulk transfer {0} does not exist")]
    BulkTransferNotFound(BulkTransferId),
    #[error("A duplicate check record for {0} already exists")]
    DuplicateCheckExists(String),
    #[error("Position for participant currency #{0} already exists")]
    PositionAlreadyExists(i64),
    #[error("Position for participant currency #{0} does not exist")]
    PositionNotFound(i64),
    #[error("Stored data could not be interpreted: {0}")]
    InvalidData(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::InvalidData(e.to_string())
    }
}

/// The highest level of behaviour for backends supporting the settlement engine.
///
/// A backend is a cheaply cloneable handle (typically wrapping a connection pool) that implements every store
/// contract. Clones share the same underlying storage, so a handle can be given to each worker.
#[allow(async_fn_in_trait)]
pub trait SettlementDatabase: Clone + DuplicateCheckStore + TransferRecordStore + TimeoutStore + PositionStore {
    /// The URL of the database
    fn url(&self) -> &str;

    /// Closes the database connection.
    async fn close(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}
