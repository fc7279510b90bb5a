//! Settlement Engine
//!
//! The settlement core of a multilateral payment switch. It receives bulk fulfilment notifications over a partitioned,
//! at-least-once message bus, records the resulting transfer state transitions, neutralises resent and modified
//! requests, and reclaims transfers whose reservation has expired. The library is provider-agnostic; wiring it into
//! a process is left to the server crate.
//!
//! The library is divided into these sections:
//! 1. Storage contracts ([`mod@traits`]) and the data types that flow through them ([`mod@db_types`]). Backends
//!    implement [`SettlementDatabase`]. SQLite is the supported backend ([`SqliteDatabase`]).
//! 2. The event layer ([`mod@events`]): the streaming message envelope, the outbound [`events::EventPublisher`]
//!    seam, hook-based in-process producers and an in-process partitioned [`events::MessageBus`] with offset commits.
//! 3. The settlement APIs ([`mod@switch_api`]): [`BulkFulfilApi`] and [`TimeoutApi`].
//!
//! Exactly-once effect over an at-least-once transport rests on three things: the transactional duplicate check,
//! transfer states that only ever move forward into a terminal state, and committing the inbound offset only after
//! every resulting event has been published.
pub mod db_types;
pub mod events;
pub mod helpers;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod switch_api;
pub mod traits;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;
pub use switch_api::{
    BulkFulfilApi,
    BulkFulfilError,
    BulkFulfilOutcome,
    ErrorCode,
    SwitchError,
    SweepResult,
    TimeoutApi,
    TimeoutConfig,
};
pub use traits::{DuplicateCheckStore, PositionStore, SettlementDatabase, StoreError, TimeoutStore, TransferRecordStore};
