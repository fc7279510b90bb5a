use switch_common::Amount;

use crate::{db_types::ParticipantPosition, traits::StoreError};

/// Participant position persistence. The ledger rules that decide *what* to write live elsewhere; this store only
/// guarantees that each write is atomic.
#[allow(async_fn_in_trait)]
pub trait PositionStore {
    async fn fetch_position(&self, participant_currency_id: i64) -> Result<Option<ParticipantPosition>, StoreError>;

    async fn insert_position(
        &self,
        participant_currency_id: i64,
        value: Amount,
        reserved_value: Amount,
    ) -> Result<ParticipantPosition, StoreError>;

    /// Overwrites the position and stamps its change date.
    async fn update_position(
        &self,
        participant_currency_id: i64,
        value: Amount,
        reserved_value: Amount,
    ) -> Result<ParticipantPosition, StoreError>;

    /// Applies the deltas in a single atomic read-modify-write and returns the new position.
    async fn adjust_position(
        &self,
        participant_currency_id: i64,
        value_delta: Amount,
        reserved_delta: Amount,
    ) -> Result<ParticipantPosition, StoreError>;
}
