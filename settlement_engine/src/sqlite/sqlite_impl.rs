//! `SqliteDatabase` is a concrete implementation of a settlement engine backend.
//!
//! Unsurprisingly, it uses SQLite as the backend and implements all the traits defined in the [`traits`] module.
//! Every multi-statement operation runs inside a single transaction so that a failure leaves nothing half-written.
//!
//! [`traits`]: crate::traits
use std::{collections::VecDeque, fmt::Debug};

use chrono::{DateTime, Duration, Utc};
use futures_util::{stream, Stream};
use log::*;
use sqlx::SqlitePool;
use switch_common::Amount;

use super::db::{bulk_transfers, duplicate_checks, new_pool, positions, timeouts, transfers};
use crate::{
    db_types::{
        BulkProcessingState,
        BulkTransfer,
        BulkTransferAssociation,
        BulkTransferExtension,
        BulkTransferFulfilment,
        BulkTransferId,
        BulkTransferState,
        DuplicateCheckKind,
        DuplicateCheckRecord,
        DuplicateCheckResult,
        ExpiredTransfer,
        IndividualTransferFulfil,
        NewBulkFulfilment,
        NewTransfer,
        NewTransferFulfilment,
        ParticipantPosition,
        StateTransition,
        TimeoutSegment,
        Transfer,
        TransferFulfilment,
        TransferId,
        TransferInternalState,
        TransferState,
        TransferStateChange,
    },
    traits::{
        DuplicateCheckStore,
        PositionStore,
        SettlementDatabase,
        StoreError,
        TimeoutStore,
        TransferRecordStore,
    },
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl SettlementDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn close(&mut self) -> Result<(), StoreError> {
        self.pool.close().await;
        Ok(())
    }
}

impl DuplicateCheckStore for SqliteDatabase {
    async fn check_and_insert(
        &self,
        kind: DuplicateCheckKind,
        identity: &str,
        hash: &str,
    ) -> Result<DuplicateCheckResult, StoreError> {
        let mut tx = self.pool.begin().await?;
        let result = duplicate_checks::check_and_insert(kind, identity, hash, &mut tx).await?;
        tx.commit().await?;
        Ok(result)
    }

    async fn fetch_duplicate_check(
        &self,
        kind: DuplicateCheckKind,
        identity: &str,
    ) -> Result<Option<DuplicateCheckRecord>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        duplicate_checks::fetch_record(kind, identity, &mut conn).await
    }

    async fn save_duplicate_check(
        &self,
        kind: DuplicateCheckKind,
        identity: &str,
        hash: &str,
    ) -> Result<DuplicateCheckRecord, StoreError> {
        let mut conn = self.pool.acquire().await?;
        duplicate_checks::insert_record(kind, identity, hash, &mut conn).await
    }
}

impl TransferRecordStore for SqliteDatabase {
    async fn fetch_transfer(&self, transfer_id: &TransferId) -> Result<Option<Transfer>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        transfers::fetch_transfer(transfer_id, &mut conn).await
    }

    async fn save_transfer(&self, transfer: NewTransfer) -> Result<Transfer, StoreError> {
        let mut tx = self.pool.begin().await?;
        let transfer = transfers::insert_transfer(transfer, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Transfer {} from {} has been saved", transfer.transfer_id, transfer.payer_fsp);
        Ok(transfer)
    }

    async fn transition_transfer_state(
        &self,
        transfer_id: &TransferId,
        new_state: TransferInternalState,
        reason: &str,
    ) -> Result<StateTransition, StoreError> {
        let mut tx = self.pool.begin().await?;
        let result = transfers::transition_state(transfer_id, new_state, reason, &mut tx).await?;
        tx.commit().await?;
        Ok(result)
    }

    async fn destroy_transfer(&self, transfer_id: &TransferId) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        match transfers::delete_transfer(transfer_id, &mut conn).await? {
            0 => Err(StoreError::TransferNotFound(transfer_id.clone())),
            _ => Ok(()),
        }
    }

    async fn truncate_transfers(&self) -> Result<u64, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let n = transfers::delete_all_transfers(&mut conn).await?;
        info!("🗃️ {n} transfers removed");
        Ok(n)
    }

    async fn fetch_state_changes(&self, transfer_id: &TransferId) -> Result<Vec<TransferStateChange>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        transfers::fetch_state_changes(transfer_id, &mut conn).await
    }

    async fn save_transfer_fulfilment(
        &self,
        fulfilment: NewTransferFulfilment,
    ) -> Result<TransferFulfilment, StoreError> {
        let mut conn = self.pool.acquire().await?;
        transfers::insert_fulfilment(fulfilment, &mut conn).await
    }

    async fn fetch_transfer_fulfilments(
        &self,
        transfer_id: &TransferId,
    ) -> Result<Vec<TransferFulfilment>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        transfers::fetch_fulfilments(transfer_id, &mut conn).await
    }

    async fn bulk_fulfil(
        &self,
        fulfilment: NewBulkFulfilment,
        rejection: Option<String>,
    ) -> Result<BulkTransferState, StoreError> {
        let id = fulfilment.bulk_transfer_id.clone();
        let mut tx = self.pool.begin().await?;
        bulk_transfers::insert_bulk_transfer_if_absent(&id, &fulfilment.payer_fsp, &fulfilment.payee_fsp, &mut tx)
            .await?;
        let inserted = bulk_transfers::insert_bulk_fulfilment_if_absent(
            &id,
            fulfilment.completed_date,
            rejection.as_deref(),
            &mut tx,
        )
        .await?;
        let state = match inserted {
            Some(fulfilment_id) => {
                let (state, reason) = match rejection.as_deref() {
                    Some(reasons) => (BulkTransferState::Invalid, Some(reasons)),
                    None => {
                        let declared = fulfilment.declared_state.filter(|s| s.aborts_individual_transfers());
                        (declared.unwrap_or(BulkTransferState::Processing), None)
                    },
                };
                bulk_transfers::update_bulk_state(&id, state, reason, &mut tx).await?;
                for extension in &fulfilment.extensions {
                    bulk_transfers::insert_extension(&id, fulfilment_id, extension, &mut tx).await?;
                }
                debug!("🗃️ Bulk fulfilment {id} recorded. Bulk state is {state}");
                state
            },
            None => {
                let bulk = bulk_transfers::fetch_bulk_transfer(&id, &mut tx)
                    .await?
                    .ok_or_else(|| StoreError::BulkTransferNotFound(id.clone()))?;
                debug!("🗃️ Bulk fulfilment {id} was already recorded. Bulk state is {}", bulk.bulk_transfer_state);
                bulk.bulk_transfer_state
            },
        };
        tx.commit().await?;
        Ok(state)
    }

    async fn fetch_bulk_transfer(&self, bulk_transfer_id: &BulkTransferId) -> Result<Option<BulkTransfer>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        bulk_transfers::fetch_bulk_transfer(bulk_transfer_id, &mut conn).await
    }

    async fn fetch_bulk_fulfilment(
        &self,
        bulk_transfer_id: &BulkTransferId,
    ) -> Result<Option<BulkTransferFulfilment>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        bulk_transfers::fetch_bulk_fulfilment(bulk_transfer_id, &mut conn).await
    }

    async fn fetch_bulk_extensions(
        &self,
        bulk_transfer_id: &BulkTransferId,
    ) -> Result<Vec<BulkTransferExtension>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        bulk_transfers::fetch_extensions(bulk_transfer_id, &mut conn).await
    }

    async fn bulk_transfer_association_update(
        &self,
        transfer_id: &TransferId,
        bulk_transfer_id: &BulkTransferId,
        state: BulkProcessingState,
    ) -> Result<BulkTransferAssociation, StoreError> {
        let mut conn = self.pool.acquire().await?;
        bulk_transfers::upsert_association(transfer_id, bulk_transfer_id, state, &mut conn).await
    }

    async fn fetch_bulk_associations(
        &self,
        bulk_transfer_id: &BulkTransferId,
    ) -> Result<Vec<BulkTransferAssociation>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        bulk_transfers::fetch_associations(bulk_transfer_id, &mut conn).await
    }

    async fn stage_individual_fulfils(
        &self,
        message_id: &str,
        bulk_transfer_id: &BulkTransferId,
        individuals: &[IndividualTransferFulfil],
    ) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut staged = 0;
        for individual in individuals {
            if bulk_transfers::stage_individual(message_id, bulk_transfer_id, individual, &mut tx).await? {
                staged += 1;
            }
        }
        tx.commit().await?;
        trace!("🗃️ {staged} of {} individual fulfilments staged for message {message_id}", individuals.len());
        Ok(staged)
    }

    fn stream_individual_fulfils<'a>(
        &'a self,
        message_id: &'a str,
        page_size: i64,
    ) -> impl Stream<Item = Result<IndividualTransferFulfil, StoreError>> + Send + 'a {
        let page_size = page_size.max(1);
        stream::try_unfold(PageCursor::default(), move |cursor| {
            next_staged_fulfil(&self.pool, message_id, page_size, cursor)
        })
    }

    async fn record_individual_outcome(
        &self,
        bulk_transfer_id: &BulkTransferId,
        individual: &IndividualTransferFulfil,
        outcome: TransferState,
    ) -> Result<StateTransition, StoreError> {
        let transfer_id = &individual.transfer_id;
        let mut tx = self.pool.begin().await?;
        bulk_transfers::upsert_association(transfer_id, bulk_transfer_id, BulkProcessingState::Processing, &mut tx)
            .await?;
        let reason = format!("Bulk fulfilment {bulk_transfer_id}");
        let transition = transfers::transition_state(transfer_id, outcome.internal_state(), &reason, &mut tx).await?;
        if let StateTransition::Applied(_) = transition {
            let fulfilment = NewTransferFulfilment {
                transfer_id: transfer_id.clone(),
                fulfilment: individual.fulfilment.clone(),
                completed_date: Some(Utc::now()),
                is_valid: outcome == TransferState::Committed,
            };
            transfers::insert_fulfilment(fulfilment, &mut tx).await?;
            if let Some(error) = &individual.error_information {
                let change = transfers::latest_state_change_for(transfer_id, &mut tx).await?;
                let change_id = change.map(|c| c.transfer_state_change_id);
                transfers::insert_transfer_error(transfer_id, change_id, error, &mut tx).await?;
            }
        }
        tx.commit().await?;
        Ok(transition)
    }

    async fn is_bulk_fulfil_complete(&self, bulk_transfer_id: &BulkTransferId) -> Result<bool, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let fulfilment = bulk_transfers::fetch_bulk_fulfilment(bulk_transfer_id, &mut conn).await?;
        Ok(fulfilment.map(|f| f.processing_completed_date.is_some()).unwrap_or(false))
    }

    async fn mark_bulk_fulfil_complete(&self, bulk_transfer_id: &BulkTransferId) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        bulk_transfers::mark_processing_complete(bulk_transfer_id, &mut tx).await?;
        let pruned = bulk_transfers::delete_staged(bulk_transfer_id, &mut tx).await?;
        tx.commit().await?;
        trace!("🗃️ Bulk fulfilment {bulk_transfer_id} complete. {pruned} staged documents removed");
        Ok(())
    }

    async fn claim_bulk_fulfil(
        &self,
        bulk_transfer_id: &BulkTransferId,
        message_id: &str,
    ) -> Result<String, StoreError> {
        let mut conn = self.pool.acquire().await?;
        bulk_transfers::claim_processing(bulk_transfer_id, message_id, &mut conn).await
    }
}

impl TimeoutStore for SqliteDatabase {
    async fn get_timeout_segment(&self) -> Result<Option<TimeoutSegment>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        timeouts::fetch_segment(&mut conn).await
    }

    async fn cleanup_transfer_timeout(&self) -> Result<u64, StoreError> {
        let mut conn = self.pool.acquire().await?;
        timeouts::delete_terminal_timeouts(&mut conn).await
    }

    async fn get_latest_transfer_state_change(&self) -> Result<Option<TransferStateChange>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        transfers::latest_state_change(&mut conn).await
    }

    async fn timeout_expire_reserved(
        &self,
        segment_id: i64,
        interval_min: i64,
        interval_max: i64,
        now: DateTime<Utc>,
        default_expiry: Duration,
    ) -> Result<Vec<ExpiredTransfer>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let tracked = timeouts::track_window(interval_min, interval_max, default_expiry, &mut tx).await?;
        trace!("🕰️ {tracked} transfers in state changes ({interval_min}, {interval_max}] are now being tracked");
        timeouts::advance_segment(segment_id, interval_max, &mut tx).await?;
        let candidates = timeouts::fetch_expired(now, &mut tx).await?;
        let expired = timeouts::expire_transfers(candidates, &mut tx).await?;
        tx.commit().await?;
        Ok(expired)
    }
}

impl PositionStore for SqliteDatabase {
    async fn fetch_position(&self, participant_currency_id: i64) -> Result<Option<ParticipantPosition>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        positions::fetch_position(participant_currency_id, &mut conn).await
    }

    async fn insert_position(
        &self,
        participant_currency_id: i64,
        value: Amount,
        reserved_value: Amount,
    ) -> Result<ParticipantPosition, StoreError> {
        let mut conn = self.pool.acquire().await?;
        positions::insert_position(participant_currency_id, value, reserved_value, &mut conn).await
    }

    async fn update_position(
        &self,
        participant_currency_id: i64,
        value: Amount,
        reserved_value: Amount,
    ) -> Result<ParticipantPosition, StoreError> {
        let mut conn = self.pool.acquire().await?;
        positions::update_position(participant_currency_id, value, reserved_value, &mut conn).await
    }

    async fn adjust_position(
        &self,
        participant_currency_id: i64,
        value_delta: Amount,
        reserved_delta: Amount,
    ) -> Result<ParticipantPosition, StoreError> {
        let mut tx = self.pool.begin().await?;
        let position = positions::adjust_position(participant_currency_id, value_delta, reserved_delta, &mut tx).await?;
        tx.commit().await?;
        Ok(position)
    }
}

#[derive(Default)]
struct PageCursor {
    last_id: i64,
    buffer: VecDeque<IndividualTransferFulfil>,
    exhausted: bool,
}

async fn next_staged_fulfil(
    pool: &SqlitePool,
    message_id: &str,
    page_size: i64,
    mut cursor: PageCursor,
) -> Result<Option<(IndividualTransferFulfil, PageCursor)>, StoreError> {
    if cursor.buffer.is_empty() && !cursor.exhausted {
        let mut conn = pool.acquire().await?;
        let page = bulk_transfers::fetch_staged_page(message_id, cursor.last_id, page_size, &mut conn).await?;
        trace!("🗃️ Fetched a page of {} staged fulfilments for message {message_id}", page.len());
        cursor.exhausted = (page.len() as i64) < page_size;
        if let Some(last) = page.last() {
            cursor.last_id = last.individual_transfer_fulfil_id;
        }
        for staged in page {
            let individual = serde_json::from_str::<IndividualTransferFulfil>(&staged.payload)?;
            cursor.buffer.push_back(individual);
        }
    }
    Ok(cursor.buffer.pop_front().map(|individual| (individual, cursor)))
}

impl SqliteDatabase {
    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        trace!("🗃️ Creating new database connection pool");
        let pool = new_pool(url, max_connections).await?;
        let url = url.to_string();
        Ok(Self { url, pool })
    }

    /// Returns a reference to the database connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Applies any outstanding schema migrations.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./src/sqlite/migrations").run(&self.pool).await?;
        info!("🗃️ Database migrations complete");
        Ok(())
    }
}
