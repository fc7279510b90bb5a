use crate::{
    db_types::{DuplicateCheckKind, DuplicateCheckRecord, DuplicateCheckResult},
    traits::StoreError,
};

/// Records the content hash of every request identity seen by the switch.
///
/// Two independent identity spaces exist, selected by [`DuplicateCheckKind`]: individual transfers and bulk
/// transfers.
#[allow(async_fn_in_trait)]
pub trait DuplicateCheckStore {
    /// Atomically checks whether `identity` has been seen before and, if not, records `hash` for it.
    ///
    /// Of any number of concurrent callers presenting the same new identity, exactly one receives a first-seen
    /// result. Every other caller observes the winner's hash and gets either a resend or a modified-request
    /// result. An existing record is never changed.
    async fn check_and_insert(
        &self,
        kind: DuplicateCheckKind,
        identity: &str,
        hash: &str,
    ) -> Result<DuplicateCheckResult, StoreError>;

    /// Fetches the stored record for `identity`, if any.
    async fn fetch_duplicate_check(
        &self,
        kind: DuplicateCheckKind,
        identity: &str,
    ) -> Result<Option<DuplicateCheckRecord>, StoreError>;

    /// Inserts a record. Fails with [`StoreError::DuplicateCheckExists`] if the identity is already recorded.
    async fn save_duplicate_check(
        &self,
        kind: DuplicateCheckKind,
        identity: &str,
        hash: &str,
    ) -> Result<DuplicateCheckRecord, StoreError>;
}
