use futures_util::Stream;

use crate::{
    db_types::{
        BulkProcessingState,
        BulkTransfer,
        BulkTransferAssociation,
        BulkTransferExtension,
        BulkTransferFulfilment,
        BulkTransferId,
        BulkTransferState,
        IndividualTransferFulfil,
        NewBulkFulfilment,
        NewTransfer,
        NewTransferFulfilment,
        StateTransition,
        Transfer,
        TransferFulfilment,
        TransferId,
        TransferInternalState,
        TransferState,
        TransferStateChange,
    },
    traits::StoreError,
};

/// Persistence of transfers, bulk fulfilments and the links between them.
///
/// Transfer states only ever move forward: once a transfer is terminal (see
/// [`TransferInternalState::TERMINAL`]) no method in this trait will change it.
#[allow(async_fn_in_trait)]
pub trait TransferRecordStore {
    async fn fetch_transfer(&self, transfer_id: &TransferId) -> Result<Option<Transfer>, StoreError>;

    /// Inserts a new transfer in the `RECEIVED_PREPARE` state, along with its first state change record.
    async fn save_transfer(&self, transfer: NewTransfer) -> Result<Transfer, StoreError>;

    /// Moves a transfer to `new_state` unless it is already terminal. The transition and its audit record are written
    /// atomically.
    async fn transition_transfer_state(
        &self,
        transfer_id: &TransferId,
        new_state: TransferInternalState,
        reason: &str,
    ) -> Result<StateTransition, StoreError>;

    /// Removes a transfer and everything hanging off it.
    async fn destroy_transfer(&self, transfer_id: &TransferId) -> Result<(), StoreError>;

    /// Removes every transfer. Returns the number of transfers removed.
    async fn truncate_transfers(&self) -> Result<u64, StoreError>;

    /// The state change history of a transfer, oldest first.
    async fn fetch_state_changes(&self, transfer_id: &TransferId) -> Result<Vec<TransferStateChange>, StoreError>;

    async fn save_transfer_fulfilment(
        &self,
        fulfilment: NewTransferFulfilment,
    ) -> Result<TransferFulfilment, StoreError>;

    async fn fetch_transfer_fulfilments(&self, transfer_id: &TransferId)
        -> Result<Vec<TransferFulfilment>, StoreError>;

    /// Persists the aggregate outcome of a bulk fulfilment in one transaction: the bulk transfer record, its
    /// fulfilment record, a state change and any extensions.
    ///
    /// If `rejection` is given the request failed validation and the bulk is recorded as `INVALID` with the reasons.
    /// Otherwise the bulk moves to `PROCESSING`, or to the `REJECTED`/`INVALID` state the payee declared.
    ///
    /// Calling this again for a bulk that already has a fulfilment record leaves the stored data untouched. In all
    /// cases the stored bulk state is returned.
    async fn bulk_fulfil(
        &self,
        fulfilment: NewBulkFulfilment,
        rejection: Option<String>,
    ) -> Result<BulkTransferState, StoreError>;

    async fn fetch_bulk_transfer(&self, bulk_transfer_id: &BulkTransferId) -> Result<Option<BulkTransfer>, StoreError>;

    async fn fetch_bulk_fulfilment(
        &self,
        bulk_transfer_id: &BulkTransferId,
    ) -> Result<Option<BulkTransferFulfilment>, StoreError>;

    async fn fetch_bulk_extensions(
        &self,
        bulk_transfer_id: &BulkTransferId,
    ) -> Result<Vec<BulkTransferExtension>, StoreError>;

    /// Creates or updates the association between a transfer and a bulk transfer.
    async fn bulk_transfer_association_update(
        &self,
        transfer_id: &TransferId,
        bulk_transfer_id: &BulkTransferId,
        state: BulkProcessingState,
    ) -> Result<BulkTransferAssociation, StoreError>;

    async fn fetch_bulk_associations(
        &self,
        bulk_transfer_id: &BulkTransferId,
    ) -> Result<Vec<BulkTransferAssociation>, StoreError>;

    /// Stages the individual fulfilment documents carried by a bulk message, keyed by the message id. Staging the
    /// same document for the same message twice is a no-op. Returns the number of documents newly staged.
    async fn stage_individual_fulfils(
        &self,
        message_id: &str,
        bulk_transfer_id: &BulkTransferId,
        individuals: &[IndividualTransferFulfil],
    ) -> Result<u64, StoreError>;

    /// Streams the staged documents for `message_id` in staging order, fetching `page_size` documents at a time, so
    /// that arbitrarily large bulks are never held in memory at once.
    fn stream_individual_fulfils<'a>(
        &'a self,
        message_id: &'a str,
        page_size: i64,
    ) -> impl Stream<Item = Result<IndividualTransferFulfil, StoreError>> + Send + 'a;

    /// Records the outcome of one individual transfer of a bulk in a single transaction: the association is marked
    /// `PROCESSING`, and if the transfer exists and is not yet terminal it moves to the internal state for
    /// `outcome`, with its fulfilment and any error information recorded.
    async fn record_individual_outcome(
        &self,
        bulk_transfer_id: &BulkTransferId,
        individual: &IndividualTransferFulfil,
        outcome: TransferState,
    ) -> Result<StateTransition, StoreError>;

    /// Whether every individual event of the bulk fulfilment has been emitted.
    async fn is_bulk_fulfil_complete(&self, bulk_transfer_id: &BulkTransferId) -> Result<bool, StoreError>;

    /// Marks the bulk fulfilment as complete and removes its staged documents.
    async fn mark_bulk_fulfil_complete(&self, bulk_transfer_id: &BulkTransferId) -> Result<(), StoreError>;

    /// Gives the processing of a bulk fulfilment to the first inbound message that asks for it. Returns the id of the
    /// message that holds the claim, which is `message_id` only if that message won it, now or earlier.
    async fn claim_bulk_fulfil(
        &self,
        bulk_transfer_id: &BulkTransferId,
        message_id: &str,
    ) -> Result<String, StoreError>;
}
