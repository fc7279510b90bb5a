use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
        Mutex,
    },
    time::Duration,
};

use chrono::Utc;
use log::*;
use serde_json::json;
use settlement_engine::{
    db_types::{Amount, NewTransfer, TransferId, TransferInternalState},
    events::{EventHandlers, EventHooks, MessageBus, OutboundEvent, Topic},
    test_utils::prepare_env::{setup, tear_down},
    BulkFulfilApi,
    BulkFulfilOutcome,
    ErrorCode,
    TimeoutApi,
    TimeoutConfig,
    TransferRecordStore,
};

use crate::support::messages::{bulk_fulfil_message, PAYEE, PAYER};

mod support;

#[derive(Default, Clone)]
struct HookCalled {
    events: Arc<Mutex<Vec<OutboundEvent>>>,
    called: Arc<AtomicUsize>,
}

impl HookCalled {
    fn called(&self, event: OutboundEvent) {
        self.events.lock().unwrap().push(event);
        let _ = self.called.fetch_add(1, Ordering::SeqCst);
    }

    fn count(&self) -> usize {
        self.called.load(Ordering::SeqCst)
    }

    async fn wait_for(&self, n: usize) {
        for _ in 0..100 {
            if self.count() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("Expected {n} hook calls, got {}", self.count());
    }
}

#[tokio::test]
async fn fulfil_hook_receives_every_individual_event() {
    let db = setup().await;
    for id in ["T1", "T2"] {
        db.save_transfer(NewTransfer::new(TransferId::from(id), PAYER, PAYEE, Amount::from_units(5))).await.unwrap();
    }
    let hook = HookCalled::default();
    let hook_copy = hook.clone();
    let mut hooks = EventHooks::default();
    hooks.on_fulfil(move |event| {
        info!("🪝️ Fulfil event for {}", event.message.id);
        let hook = hook_copy.clone();
        Box::pin(async move { hook.called(event) }) as Pin<Box<dyn Future<Output = ()> + Send>>
    });
    let handlers = EventHandlers::new(4, hooks);
    let producers = handlers.producers();
    handlers.start_handlers().await;

    let bus = MessageBus::new(1);
    let api = BulkFulfilApi::new(db.clone(), producers);
    let payload = json!({
        "bulkTransferId": "B1",
        "individualTransferResults": [
            { "transferId": "T1", "fulfilment": "F1" },
            { "transferId": "T2", "fulfilment": "F2" }
        ]
    });
    bus.produce(&Topic::BulkFulfil.name(), None, bulk_fulfil_message("m1", payload));
    let inbound = bus.poll(&Topic::BulkFulfil.name(), 0).unwrap();
    let outcome = api.process_bulk_fulfil(&inbound, &bus).await.unwrap();
    assert!(matches!(outcome, BulkFulfilOutcome::Processed { emitted: 2, .. }));
    hook.wait_for(2).await;
    let events = hook.events.lock().unwrap().clone();
    assert!(events.iter().all(|e| e.topic == Topic::Fulfil));
    let mut keys = events.iter().filter_map(|e| e.key.clone()).collect::<Vec<_>>();
    keys.sort();
    assert_eq!(keys, vec!["T1", "T2"]);
    tear_down(db).await;
}

#[tokio::test]
async fn timeout_without_a_position_hook_is_reported() {
    let db = setup().await;
    let expired = Utc::now() - chrono::Duration::hours(1);
    let transfer = NewTransfer::new(TransferId::from("T1"), PAYER, PAYEE, Amount::from_units(5));
    db.save_transfer(transfer.with_expiration_date(expired)).await.unwrap();
    db.transition_transfer_state(&"T1".into(), TransferInternalState::Reserved, "test").await.unwrap();

    let hook = HookCalled::default();
    let hook_copy = hook.clone();
    let mut hooks = EventHooks::default();
    hooks.on_notification(move |event| {
        let hook = hook_copy.clone();
        Box::pin(async move { hook.called(event) }) as Pin<Box<dyn Future<Output = ()> + Send>>
    });
    let handlers = EventHandlers::new(4, hooks);
    let producers = handlers.producers();
    handlers.start_handlers().await;

    let api = TimeoutApi::new(db.clone(), producers, TimeoutConfig::default());
    let err = api.sweep().await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InternalServerError);
    assert_eq!(hook.count(), 0);
    let transfer = db.fetch_transfer(&"T1".into()).await.unwrap().unwrap();
    assert_eq!(transfer.transfer_state, TransferInternalState::ReservedTimeout);
    tear_down(db).await;
}
