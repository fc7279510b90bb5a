//! # Storage contracts of the settlement core.
//!
//! This module defines the behaviour a database backend must expose in order to support the settlement engine.
//!
//! * [`SettlementDatabase`] is the top-level trait. It ties the individual stores together and owns the shared error
//!   type, [`StoreError`].
//! * [`DuplicateCheckStore`] detects resends and modified requests by identity and content hash.
//! * [`TransferRecordStore`] persists transfers, their state changes and fulfilments, and the bulk fulfilment
//!   aggregate with its per-transfer associations.
//! * [`TimeoutStore`] provides the watermark and the transactional expiry step used by the timeout sweep.
//! * [`PositionStore`] reads and writes participant positions atomically.
mod duplicate_check;
mod positions;
mod settlement_database;
mod timeouts;
mod transfer_records;

pub use duplicate_check::DuplicateCheckStore;
pub use positions::PositionStore;
pub use settlement_database::{SettlementDatabase, StoreError};
pub use timeouts::TimeoutStore;
pub use transfer_records::TransferRecordStore;
