use std::fmt::Debug;

use chrono::{Duration, Utc};
use log::*;
use serde_json::Value;

use crate::{
    db_types::{ExpiredTransfer, TransferInternalState},
    events::{
        EventAction,
        EventMetadata,
        EventPublisher,
        EventState,
        EventType,
        Headers,
        Message,
        MessageContent,
        MessageMetadata,
        OutboundEvent,
        Topic,
        UriParams,
        TRANSFERS_CONTENT_TYPE,
    },
    switch_api::errors::{ErrorCode, SwitchError},
    traits::SettlementDatabase,
};

#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// How long a transfer without its own expiration date may wait for fulfilment.
    pub reservation_expiry: Duration,
    /// The switch's own participant identifier. Expiry notifications are sent in its name.
    pub hub_name: String,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { reservation_expiry: Duration::seconds(60), hub_name: "switch".to_string() }
    }
}

/// The report of one sweep.
#[derive(Debug, Clone, Default)]
pub struct SweepResult {
    pub interval_min: i64,
    pub interval_max: i64,
    /// The number of stale timeout tracking rows removed
    pub cleanup: u64,
    pub expired: Vec<ExpiredTransfer>,
}

/// `TimeoutApi` finds transfers whose reservation has run out, moves them to an expired state and tells the
/// interested parties.
pub struct TimeoutApi<B, P> {
    db: B,
    publisher: P,
    config: TimeoutConfig,
}

impl<B, P> Debug for TimeoutApi<B, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TimeoutApi")
    }
}

impl<B, P> TimeoutApi<B, P> {
    pub fn new(db: B, publisher: P, config: TimeoutConfig) -> Self {
        Self { db, publisher, config }
    }

    pub fn config(&self) -> &TimeoutConfig {
        &self.config
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }
}

impl<B, P> TimeoutApi<B, P>
where
    B: SettlementDatabase,
    P: EventPublisher,
{
    /// Runs one timeout sweep.
    ///
    /// Only state changes after the stored watermark are considered, and the watermark is advanced in the same
    /// transaction that expires the transfers. Running the sweep again straight away finds nothing new.
    ///
    /// Notifications are published after the transaction has committed. A failure to publish one notification does
    /// not stop the others; the first such failure is returned once they have all been attempted.
    pub async fn sweep(&self) -> Result<SweepResult, SwitchError> {
        let segment = self.db.get_timeout_segment().await?;
        let (segment_id, interval_min) = segment.map(|s| (s.segment_id, s.value)).unwrap_or((0, 0));
        let cleanup = self.db.cleanup_transfer_timeout().await?;
        let interval_max =
            self.db.get_latest_transfer_state_change().await?.map(|c| c.transfer_state_change_id).unwrap_or(0);
        trace!("🕰️ Sweeping state changes in ({interval_min}, {interval_max}]. {cleanup} stale timeouts removed");
        let expired = self
            .db
            .timeout_expire_reserved(segment_id, interval_min, interval_max, Utc::now(), self.config.reservation_expiry)
            .await?;
        if !expired.is_empty() {
            info!("🕰️ {} transfers have expired", expired.len());
        }
        let mut first_error = None;
        for transfer in &expired {
            let Some(event) = self.expiry_event(transfer) else {
                let (id, state) = (&transfer.transfer_id, transfer.transfer_state);
                warn!("🕰️ Transfer {id} expired into unexpected state {state}");
                continue;
            };
            let topic = event.topic;
            if let Err(e) = self.publisher.publish(event).await {
                error!("🕰️ Could not publish the {topic} expiry event for transfer {}. {e}", transfer.transfer_id);
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            return Err(SwitchError::reformat(e));
        }
        Ok(SweepResult { interval_min, interval_max, cleanup, expired })
    }

    /// Builds the notification for an expired transfer. Transfers that expired before fulfilment are reported to the
    /// payer by the switch. Transfers that expired while reserved go to position management, keyed by the payer, so
    /// that the reserved amount is released.
    pub fn expiry_event(&self, transfer: &ExpiredTransfer) -> Option<OutboundEvent> {
        let (topic, action) = match transfer.transfer_state {
            TransferInternalState::ExpiredPrepared => (Topic::Notification, EventAction::TimeoutReceived),
            TransferInternalState::ReservedTimeout => (Topic::Position, EventAction::TimeoutReserved),
            _ => return None,
        };
        let error = SwitchError::expired().to_api_error_object();
        let info = &error.error_information;
        let state = EventState::failure(ErrorCode::ExpiredError.numeric(), info.error_description.clone());
        let id = transfer.transfer_id.to_string();
        let headers = Headers::switch_defaults(&transfer.payer_fsp, "transfers", &self.config.hub_name);
        let payload = serde_json::to_value(&error).unwrap_or(Value::Null);
        let mut message = Message {
            id: id.clone(),
            from: transfer.payer_fsp.clone(),
            to: transfer.payee_fsp.clone(),
            content_type: TRANSFERS_CONTENT_TYPE.to_string(),
            content: MessageContent { headers, payload, uri_params: Some(UriParams { id: id.clone() }) },
            metadata: MessageMetadata {
                correlation_id: Some(id.clone()),
                event: EventMetadata::correlated(&id, EventType::Notification, action, state),
            },
        };
        let event = match topic {
            Topic::Notification => {
                message.to = std::mem::replace(&mut message.from, self.config.hub_name.clone());
                OutboundEvent::new(topic, message)
            },
            _ => OutboundEvent::new(topic, message).with_key(transfer.payer_fsp.clone()),
        };
        Some(event)
    }
}
