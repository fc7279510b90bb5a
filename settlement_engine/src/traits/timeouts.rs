use chrono::{DateTime, Duration, Utc};

use crate::{
    db_types::{ExpiredTransfer, TimeoutSegment, TransferStateChange},
    traits::StoreError,
};

/// Storage support for the periodic timeout sweep.
#[allow(async_fn_in_trait)]
pub trait TimeoutStore {
    /// Returns the sweep watermark, or `None` if no sweep has ever completed.
    async fn get_timeout_segment(&self) -> Result<Option<TimeoutSegment>, StoreError>;

    /// Removes tracking rows for transfers that have reached a terminal state. Returns the number of rows removed.
    async fn cleanup_transfer_timeout(&self) -> Result<u64, StoreError>;

    /// The most recent transfer state change, if any.
    async fn get_latest_transfer_state_change(&self) -> Result<Option<TransferStateChange>, StoreError>;

    /// In a single transaction:
    /// 1. starts tracking every transfer with a state change in `(interval_min, interval_max]` that is still awaiting
    ///    fulfilment. A transfer without an explicit expiration expires `default_expiry` after it was created.
    /// 2. advances the watermark to `interval_max`. `segment_id` is the id of the existing segment, or 0 if there is
    ///    none yet. The watermark never moves backwards.
    /// 3. moves every tracked transfer whose expiration is at or before `now` to its expired state.
    ///
    /// Returns the transfers that were expired by this call.
    async fn timeout_expire_reserved(
        &self,
        segment_id: i64,
        interval_min: i64,
        interval_max: i64,
        now: DateTime<Utc>,
        default_expiry: Duration,
    ) -> Result<Vec<ExpiredTransfer>, StoreError>;
}
