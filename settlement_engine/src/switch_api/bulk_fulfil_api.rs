use std::fmt::Debug;

use futures_util::{pin_mut, StreamExt};
use log::*;

use crate::{
    db_types::{BulkTransferId, BulkTransferState, DuplicateCheckKind, Extension, StateTransition},
    events::{EventPublisher, InboundMessage, OffsetCommitter, OutboundEvent, Topic},
    switch_api::{
        errors::BulkFulfilError,
        fulfil_objects::{individual_fulfil_message, BulkFulfilRequest},
        validator::{BulkFulfilValidator, FulfilmentValidator},
    },
    traits::SettlementDatabase,
};

pub const DEFAULT_PAGE_SIZE: i64 = 100;

/// What happened to an inbound bulk fulfilment message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkFulfilOutcome {
    /// The bulk outcome was recorded and one fulfil event was emitted per individual transfer.
    Processed { bulk_transfer_id: BulkTransferId, bulk_state: BulkTransferState, emitted: usize },
    /// An exact resend of a bulk fulfilment that has already been processed, or is being processed by another
    /// message. Nothing was done.
    Resend { bulk_transfer_id: BulkTransferId },
    /// The request failed validation. It was recorded for audit and no individual events were emitted.
    Invalid { bulk_transfer_id: BulkTransferId, reasons: Vec<String> },
    /// The message arrived on a topic this processor does not consume, and was dropped.
    Dropped { topic: String },
}

/// `BulkFulfilApi` turns inbound bulk fulfilment messages into a persisted bulk outcome plus one fulfil event per
/// individual transfer.
///
/// Processing a message is safe to repeat. The inbound offset is only committed once every individual event has been
/// published, so a failure part way through leaves the message to be redelivered, and the redelivery resumes where
/// the failed attempt stopped.
pub struct BulkFulfilApi<B, P, V = BulkFulfilValidator> {
    db: B,
    publisher: P,
    validator: V,
    page_size: i64,
}

impl<B, P, V> Debug for BulkFulfilApi<B, P, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BulkFulfilApi")
    }
}

impl<B, P> BulkFulfilApi<B, P, BulkFulfilValidator> {
    pub fn new(db: B, publisher: P) -> Self {
        Self { db, publisher, validator: BulkFulfilValidator::default(), page_size: DEFAULT_PAGE_SIZE }
    }
}

impl<B, P, V> BulkFulfilApi<B, P, V> {
    pub fn with_validator<V2>(self, validator: V2) -> BulkFulfilApi<B, P, V2> {
        BulkFulfilApi { db: self.db, publisher: self.publisher, validator, page_size: self.page_size }
    }

    /// Sets how many individual transfers are read from the store at a time.
    pub fn with_page_size(mut self, page_size: i64) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn db(&self) -> &B {
        &self.db
    }
}

impl<B, P, V> BulkFulfilApi<B, P, V>
where
    B: SettlementDatabase,
    P: EventPublisher,
    V: FulfilmentValidator,
{
    /// Processes one inbound bulk fulfilment message and, when it is finished with, commits its offset through
    /// `committer`.
    ///
    /// Only one inbound message ever processes a given bulk: the first to claim it. Any other copy of the same bulk is
    /// acknowledged without effect, even while the claiming message is still in flight. A redelivery of the claiming
    /// message resumes its unfinished work.
    ///
    /// Errors leave the offset uncommitted so that the message is redelivered, except for
    /// [`BulkFulfilError::ModifiedRequest`], [`BulkFulfilError::Serialization`] and
    /// [`BulkFulfilError::UnrecordableId`]: redelivering those cannot succeed, so they are acknowledged before the
    /// error is returned.
    pub async fn process_bulk_fulfil<C: OffsetCommitter>(
        &self,
        inbound: &InboundMessage,
        committer: &C,
    ) -> Result<BulkFulfilOutcome, BulkFulfilError> {
        let (topic, partition, offset) = (&inbound.topic, inbound.partition, inbound.offset);
        debug!("📦️ bulkFulfil: message {} from {topic}[{partition}]@{offset}", inbound.value.id);
        if inbound.topic != Topic::BulkFulfil.name() {
            warn!("📦️ No consumer found for topic {}. Message {} is dropped", inbound.topic, inbound.value.id);
            return Ok(BulkFulfilOutcome::Dropped { topic: inbound.topic.clone() });
        }
        let letter = inbound.value.action().letter();
        let request = match BulkFulfilRequest::from_message(&inbound.value) {
            Ok(r) => r,
            Err(e) => {
                error!("📦️ callbackErrorGeneric--{letter}8. Message {} could not be read. {e}", inbound.value.id);
                acknowledge(committer, inbound).await?;
                return Err(e);
            },
        };
        let bulk_id = request.bulk_transfer_id().clone();

        info!("📦️ [{bulk_id}] dupCheck");
        let dup = self
            .db
            .check_and_insert(DuplicateCheckKind::BulkTransfer, bulk_id.as_str(), &request.hash)
            .await
            .map_err(BulkFulfilError::Persistence)?;
        if dup.is_modified_request() {
            error!("📦️ [{bulk_id}] callbackErrorModified1--{letter}4. Resubmitted with a different hash");
            info!("📦️ [{bulk_id}] notImplemented");
            acknowledge(committer, inbound).await?;
            return Err(BulkFulfilError::ModifiedRequest(bulk_id));
        }
        let owner =
            self.db.claim_bulk_fulfil(&bulk_id, &request.message_id).await.map_err(BulkFulfilError::Persistence)?;
        if owner != request.message_id {
            info!("📦️ [{bulk_id}] resend. Message {owner} handles this bulk fulfilment");
            info!("📦️ [{bulk_id}] notImplemented");
            acknowledge(committer, inbound).await?;
            return Ok(BulkFulfilOutcome::Resend { bulk_transfer_id: bulk_id });
        }
        if dup.is_resend() {
            info!("📦️ [{bulk_id}] resend");
            let complete = self.db.is_bulk_fulfil_complete(&bulk_id).await.map_err(BulkFulfilError::Persistence)?;
            if complete {
                info!("📦️ [{bulk_id}] notImplemented. The bulk fulfilment has already been processed");
                acknowledge(committer, inbound).await?;
                return Ok(BulkFulfilOutcome::Resend { bulk_transfer_id: bulk_id });
            }
            warn!("📦️ [{bulk_id}] A previous attempt at this bulk fulfilment did not complete. Resuming.");
        }

        let validation = self.validator.validate_bulk_fulfilment(&request.payload, &request.headers);
        let outcome = if validation.is_valid {
            info!("📦️ [{bulk_id}] isValid");
            self.fulfil_valid_bulk(inbound, request, letter).await?
        } else {
            error!("📦️ [{bulk_id}] validationFailed: {}", validation.reasons_text());
            info!("📦️ [{bulk_id}] saveInvalidRequest");
            let mut new_fulfilment = request.payload.to_new_bulk_fulfilment(&request.headers);
            new_fulfilment.extensions.retain(Extension::is_storable);
            let saved = self.db.bulk_fulfil(new_fulfilment, Some(validation.reasons_text())).await;
            if let Err(e) = saved {
                error!("📦️ [{bulk_id}] callbackErrorInternal2--{letter}7. {e}");
                return Err(BulkFulfilError::Persistence(e));
            }
            self.db.mark_bulk_fulfil_complete(&bulk_id).await.map_err(BulkFulfilError::Persistence)?;
            info!("📦️ [{bulk_id}] callbackErrorGeneric--{letter}8");
            info!("📦️ [{bulk_id}] notImplemented");
            BulkFulfilOutcome::Invalid { bulk_transfer_id: bulk_id, reasons: validation.reasons }
        };
        acknowledge(committer, inbound).await?;
        Ok(outcome)
    }

    async fn fulfil_valid_bulk(
        &self,
        inbound: &InboundMessage,
        mut request: BulkFulfilRequest,
        letter: &str,
    ) -> Result<BulkFulfilOutcome, BulkFulfilError> {
        let bulk_id = request.bulk_transfer_id().clone();
        info!("📦️ [{bulk_id}] saveBulkTransfer");
        let new_fulfilment = request.payload.to_new_bulk_fulfilment(&request.headers);
        // Once staged, the store is the only copy of the individual documents
        let individuals = std::mem::take(&mut request.payload.individual_transfer_results);
        let persisted = async {
            self.db.stage_individual_fulfils(&request.message_id, &bulk_id, &individuals).await?;
            self.db.bulk_fulfil(new_fulfilment, None).await
        }
        .await;
        drop(individuals);
        let bulk_state = match persisted {
            Ok(state) => state,
            Err(e) => {
                error!("📦️ [{bulk_id}] callbackErrorInternal1--{letter}5. {e}");
                return Err(BulkFulfilError::Persistence(e));
            },
        };
        debug!("📦️ [{bulk_id}] Bulk transfer is {bulk_state}");

        info!("📦️ [{bulk_id}] individualTransferFulfils");
        let emitted = self.emit_individual_fulfils(inbound, &request, bulk_state).await.map_err(|e| {
            error!("📦️ [{bulk_id}] callbackErrorInternal2--{letter}6. {e}");
            e
        })?;
        self.db.mark_bulk_fulfil_complete(&bulk_id).await.map_err(BulkFulfilError::Persistence)?;
        info!("📦️ [{bulk_id}] Bulk fulfilment complete. {emitted} individual transfer events emitted");
        Ok(BulkFulfilOutcome::Processed { bulk_transfer_id: bulk_id, bulk_state, emitted })
    }

    async fn emit_individual_fulfils(
        &self,
        inbound: &InboundMessage,
        request: &BulkFulfilRequest,
        bulk_state: BulkTransferState,
    ) -> Result<usize, BulkFulfilError> {
        let bulk_id = request.bulk_transfer_id();
        let stream = self.db.stream_individual_fulfils(&request.message_id, self.page_size);
        pin_mut!(stream);
        let mut emitted = 0;
        while let Some(individual) = stream.next().await {
            let individual = individual.map_err(BulkFulfilError::Streaming)?;
            let transfer_id = individual.transfer_id.clone();
            let derived = individual.derive_state(bulk_state);
            let transition = self
                .db
                .record_individual_outcome(bulk_id, &individual, derived)
                .await
                .map_err(BulkFulfilError::Streaming)?;
            let state = match transition {
                StateTransition::Applied(_) => derived,
                StateTransition::AlreadyTerminal(stored) => {
                    debug!("📦️ [{bulk_id}] Transfer {transfer_id} is already {stored}. Re-emitting that state");
                    stored.transfer_state()
                },
                StateTransition::UnknownTransfer => {
                    warn!("📦️ [{bulk_id}] Transfer {transfer_id} is not known to the switch");
                    derived
                },
            };
            let message = individual_fulfil_message(&inbound.value, &individual, state)?;
            let event = OutboundEvent::new(Topic::Fulfil, message).with_key(transfer_id.as_str());
            self.publisher.publish(event).await.map_err(BulkFulfilError::Publish)?;
            trace!("📦️ [{bulk_id}] Fulfil event for {transfer_id} ({state}) published");
            emitted += 1;
        }
        Ok(emitted)
    }
}

async fn acknowledge<C: OffsetCommitter>(committer: &C, inbound: &InboundMessage) -> Result<(), BulkFulfilError> {
    committer.commit(inbound).await.map_err(BulkFulfilError::Acknowledge)
}
