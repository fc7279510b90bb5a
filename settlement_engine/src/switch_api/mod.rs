//! # Settlement APIs
//!
//! The entry points that the hosting process drives.
//!
//! * [`BulkFulfilApi`] consumes inbound bulk fulfilment messages. It detects resends and modified requests, validates
//!   the request, records the bulk outcome and emits one correlated fulfil event per individual transfer before
//!   acknowledging the inbound message.
//! * [`TimeoutApi`] runs the watermark-bounded timeout sweep and routes the resulting expiry notifications.
//!
//! Both are generic over the storage backend ([`crate::traits::SettlementDatabase`]) and the outbound transport
//! ([`crate::events::EventPublisher`]).
mod bulk_fulfil_api;
mod errors;
mod fulfil_objects;
mod timeout_api;
mod validator;

pub use bulk_fulfil_api::{BulkFulfilApi, BulkFulfilOutcome, DEFAULT_PAGE_SIZE};
pub use errors::{ApiErrorObject, BulkFulfilError, ErrorCode, SwitchError};
pub use fulfil_objects::{individual_fulfil_message, BulkFulfilPayload, BulkFulfilRequest, IndividualFulfilBody};
pub use timeout_api::{SweepResult, TimeoutApi, TimeoutConfig};
pub use validator::{BulkFulfilValidator, FulfilmentValidator, ValidationResult};
