use std::{sync::Arc, time::Duration};

use log::*;
use settlement_engine::{
    events::{MessageBus, Topic},
    BulkFulfilApi,
    SqliteDatabase,
    SwitchError,
};
use tokio::{sync::watch, task::JoinHandle};

pub type SettlementBulkFulfilApi = BulkFulfilApi<SqliteDatabase, Arc<MessageBus>>;

/// How long a consumer waits before picking up a message that failed again.
const REDELIVERY_DELAY: Duration = Duration::from_secs(1);

/// The consumers of the inbound bulk fulfil topic. There is one per partition, so partitions make progress
/// independently while messages within a partition are handled strictly in order.
pub struct BulkFulfilWorkers {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl BulkFulfilWorkers {
    pub fn start(api: SettlementBulkFulfilApi, bus: Arc<MessageBus>) -> Self {
        let api = Arc::new(api);
        let (shutdown, signal) = watch::channel(false);
        let handles = (0..bus.partitions())
            .map(|partition| tokio::spawn(consume_partition(api.clone(), bus.clone(), partition, signal.clone())))
            .collect::<Vec<_>>();
        info!("📦️ {} bulk fulfil consumers started", handles.len());
        Self { shutdown, handles }
    }

    pub fn is_running(&self) -> bool {
        self.handles.iter().any(|h| !h.is_finished())
    }

    /// Stops every consumer. Messages that are being processed are finished first.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("📦️ A bulk fulfil consumer did not shut down cleanly. {e}");
            }
        }
        info!("📦️ Bulk fulfil consumers stopped");
    }
}

async fn consume_partition(
    api: Arc<SettlementBulkFulfilApi>,
    bus: Arc<MessageBus>,
    partition: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let topic = Topic::BulkFulfil.name();
    debug!("📦️ Consuming {topic}[{partition}]");
    loop {
        let inbound = tokio::select! {
            _ = shutdown.changed() => break,
            message = bus.next(&topic, partition) => message,
        };
        match api.process_bulk_fulfil(&inbound, bus.as_ref()).await {
            Ok(outcome) => debug!("📦️ {topic}[{partition}]@{}: {outcome:?}", inbound.offset),
            Err(e) => {
                let e = SwitchError::reformat(e);
                error!("📦️ {topic}[{partition}]@{} failed. {e}", inbound.offset);
                if bus.committed_offset(&topic, partition) > inbound.offset {
                    continue;
                }
                bus.rewind_to_committed(&topic, partition);
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(REDELIVERY_DELAY) => {},
                }
            },
        }
    }
    debug!("📦️ Consumer for {topic}[{partition}] has stopped");
}

#[cfg(test)]
mod test {
    use chrono::Utc;
    use serde_json::{json, Value};
    use settlement_engine::{
        db_types::{Amount, NewTransfer, TransferId, TransferInternalState},
        events::{
            EventAction,
            EventMetadata,
            EventState,
            EventType,
            Headers,
            Message,
            MessageContent,
            MessageMetadata,
            HEADER_CONTENT_TYPE,
            HEADER_DESTINATION,
            HEADER_SOURCE,
        },
        helpers::data_uri,
        test_utils::prepare_env::{drop_database, prepare_test_env, random_db_path},
        TransferRecordStore,
    };

    use super::*;

    const CONTENT_TYPE: &str = "application/vnd.interoperability.bulkTransfers+json;version=1.0";

    fn bulk_fulfil_message(message_id: &str, payload: Value) -> Message {
        let headers = Headers::default()
            .with(HEADER_SOURCE, "payeefsp")
            .with(HEADER_DESTINATION, "payerfsp")
            .with(HEADER_CONTENT_TYPE, CONTENT_TYPE);
        Message {
            id: message_id.to_string(),
            from: "payeefsp".to_string(),
            to: "payerfsp".to_string(),
            content_type: CONTENT_TYPE.to_string(),
            content: MessageContent {
                headers,
                payload: Value::String(data_uri::encode(payload.to_string(), CONTENT_TYPE)),
                uri_params: None,
            },
            metadata: MessageMetadata {
                correlation_id: None,
                event: EventMetadata {
                    id: format!("event-{message_id}"),
                    response_to: None,
                    event_type: EventType::Bulk,
                    action: EventAction::BulkCommit,
                    created_at: Utc::now(),
                    state: EventState::success(),
                },
            },
        }
    }

    fn committed(bus: &MessageBus) -> u64 {
        let topic = Topic::BulkFulfil.name();
        (0..bus.partitions()).map(|p| bus.committed_offset(&topic, p)).sum()
    }

    #[tokio::test]
    async fn workers_fulfil_bulks_from_every_partition() {
        let url = random_db_path();
        prepare_test_env(&url).await;
        let db = SqliteDatabase::new_with_url(&url, 5).await.unwrap();
        for id in ["T1", "T2"] {
            let transfer = NewTransfer::new(TransferId::from(id), "payerfsp", "payeefsp", Amount::from_units(20));
            db.save_transfer(transfer).await.unwrap();
            db.transition_transfer_state(&TransferId::from(id), TransferInternalState::Reserved, "test").await.unwrap();
        }
        let bus = Arc::new(MessageBus::new(2));
        let api = BulkFulfilApi::new(db.clone(), bus.clone()).with_page_size(1);
        let workers = BulkFulfilWorkers::start(api, bus.clone());
        assert!(workers.is_running());

        let inbound = Topic::BulkFulfil.name();
        let bulk = |bulk_id: &str, id: &str| {
            json!({"bulkTransferId": bulk_id, "individualTransferResults": [{"transferId": id, "fulfilment": "F"}]})
        };
        bus.produce(&inbound, Some("B1"), bulk_fulfil_message("m1", bulk("B1", "T1")));
        bus.produce(&inbound, Some("B2"), bulk_fulfil_message("m2", bulk("B2", "T2")));
        bus.produce(&inbound, None, bulk_fulfil_message("m3", json!("not a bulk fulfilment")));

        for _ in 0..50 {
            if committed(&bus) == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(committed(&bus), 3);
        workers.stop().await;

        assert_eq!(bus.messages(&Topic::Fulfil.name()).len(), 2);
        for id in ["T1", "T2"] {
            let transfer = db.fetch_transfer(&TransferId::from(id)).await.unwrap().unwrap();
            assert_eq!(transfer.transfer_state, TransferInternalState::Committed);
        }
        drop_database(&url).await;
    }

    #[tokio::test]
    async fn stopped_workers_leave_new_messages_alone() {
        let url = random_db_path();
        prepare_test_env(&url).await;
        let db = SqliteDatabase::new_with_url(&url, 5).await.unwrap();
        let bus = Arc::new(MessageBus::new(1));
        let workers = BulkFulfilWorkers::start(BulkFulfilApi::new(db, bus.clone()), bus.clone());
        workers.stop().await;
        let payload = json!({"bulkTransferId": "B1", "individualTransferResults": []});
        bus.produce(&Topic::BulkFulfil.name(), None, bulk_fulfil_message("m1", payload));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(committed(&bus), 0);
        drop_database(&url).await;
    }
}
