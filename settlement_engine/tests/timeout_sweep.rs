use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use serde_json::json;
use settlement_engine::{
    db_types::{Amount, NewTransfer, TransferId, TransferInternalState},
    events::{EventAction, EventPublisher, EventStatus, OutboundEvent, PublishError, Topic},
    test_utils::prepare_env::{setup, tear_down},
    ErrorCode,
    SqliteDatabase,
    TimeoutApi,
    TimeoutConfig,
    TimeoutStore,
    TransferRecordStore,
};

use crate::support::messages::{PAYEE, PAYER};

mod support;

#[derive(Default)]
struct RecordingPublisher {
    events: Mutex<Vec<OutboundEvent>>,
    fail: bool,
}

impl RecordingPublisher {
    fn failing() -> Self {
        Self { events: Mutex::new(vec![]), fail: true }
    }

    fn events(&self) -> Vec<OutboundEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: OutboundEvent) -> Result<(), PublishError> {
        if self.fail {
            return Err(PublishError::NoRoute(event.topic));
        }
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

fn config() -> TimeoutConfig {
    TimeoutConfig { reservation_expiry: Duration::seconds(3600), hub_name: "hub".to_string() }
}

async fn new_transfer(db: &SqliteDatabase, id: &str, expires_in: Option<Duration>, states: &[TransferInternalState]) {
    let mut transfer = NewTransfer::new(TransferId::from(id), PAYER, PAYEE, Amount::from_units(10));
    if let Some(d) = expires_in {
        transfer = transfer.with_expiration_date(Utc::now() + d);
    }
    db.save_transfer(transfer).await.unwrap();
    for state in states {
        db.transition_transfer_state(&TransferId::from(id), *state, "test").await.unwrap();
    }
}

async fn transfer_state(db: &SqliteDatabase, id: &str) -> TransferInternalState {
    db.fetch_transfer(&TransferId::from(id)).await.unwrap().unwrap().transfer_state
}

#[tokio::test]
async fn expiry_is_routed_by_phase() {
    let db = setup().await;
    let past = Some(Duration::hours(-1));
    new_transfer(&db, "T1", past, &[]).await;
    new_transfer(&db, "T2", past, &[TransferInternalState::Reserved]).await;
    new_transfer(&db, "T3", Some(Duration::hours(1)), &[TransferInternalState::Reserved]).await;
    new_transfer(&db, "T4", past, &[TransferInternalState::Reserved, TransferInternalState::Committed]).await;
    let api = TimeoutApi::new(db.clone(), RecordingPublisher::default(), config());

    let result = api.sweep().await.unwrap();
    assert_eq!(result.interval_min, 0);
    assert_eq!(result.interval_max, 8);
    let mut expired = result.expired.iter().map(|t| (t.transfer_id.as_str(), t.transfer_state)).collect::<Vec<_>>();
    expired.sort_by_key(|(id, _)| *id);
    assert_eq!(expired, vec![
        ("T1", TransferInternalState::ExpiredPrepared),
        ("T2", TransferInternalState::ReservedTimeout)
    ]);
    assert_eq!(transfer_state(&db, "T1").await, TransferInternalState::ExpiredPrepared);
    assert_eq!(transfer_state(&db, "T2").await, TransferInternalState::ReservedTimeout);
    assert_eq!(transfer_state(&db, "T3").await, TransferInternalState::Reserved);
    assert_eq!(transfer_state(&db, "T4").await, TransferInternalState::Committed);

    let events = api_events(&api);
    assert_eq!(events.len(), 2);
    let notification = events.iter().find(|e| e.topic == Topic::Notification).unwrap();
    assert_eq!(notification.key, None);
    let message = &notification.message;
    assert_eq!(message.id, "T1");
    assert_eq!(message.from, "hub");
    assert_eq!(message.to, PAYER);
    assert_eq!(message.content.headers.source(), Some("hub"));
    assert_eq!(message.content.headers.destination(), Some(PAYER));
    assert_eq!(message.metadata.event.action, EventAction::TimeoutReceived);
    assert_eq!(message.metadata.event.response_to.as_deref(), Some("T1"));
    assert_eq!(message.metadata.event.state.status, EventStatus::Failure);
    assert_eq!(message.metadata.event.state.code, 3300);
    assert_eq!(
        message.content.payload,
        json!({ "errorInformation": {
            "errorCode": "3300",
            "errorDescription": "Generic expired error - Transfer has expired at the switch"
        }})
    );

    let position = events.iter().find(|e| e.topic == Topic::Position).unwrap();
    assert_eq!(position.key.as_deref(), Some(PAYER));
    let message = &position.message;
    assert_eq!(message.id, "T2");
    assert_eq!(message.from, PAYER);
    assert_eq!(message.to, PAYEE);
    assert_eq!(message.metadata.event.action, EventAction::TimeoutReserved);
    assert_eq!(message.content.uri_params.as_ref().unwrap().id, "T2");
    tear_down(db).await;
}

fn api_events(api: &TimeoutApi<SqliteDatabase, RecordingPublisher>) -> Vec<OutboundEvent> {
    api.publisher().events()
}

#[tokio::test]
async fn watermark_only_moves_forward() {
    let db = setup().await;
    new_transfer(&db, "T1", Some(Duration::hours(-1)), &[TransferInternalState::Reserved]).await;
    new_transfer(&db, "T2", Some(Duration::hours(1)), &[TransferInternalState::Reserved]).await;
    let api = TimeoutApi::new(db.clone(), RecordingPublisher::default(), config());

    let first = api.sweep().await.unwrap();
    assert_eq!(first.expired.len(), 1);
    let segment = db.get_timeout_segment().await.unwrap().unwrap();
    assert_eq!(segment.value, first.interval_max);

    // The expiry wrote a state change, which the next sweep scans but does not act on
    let second = api.sweep().await.unwrap();
    assert_eq!(second.interval_min, first.interval_max);
    assert!(second.interval_max >= first.interval_max);
    assert!(second.expired.is_empty());
    assert_eq!(second.cleanup, 1);

    let third = api.sweep().await.unwrap();
    assert_eq!(third.interval_min, second.interval_max);
    assert_eq!(third.interval_max, second.interval_max);
    assert!(third.expired.is_empty());
    assert_eq!(api_events(&api).len(), 1);
    assert_eq!(transfer_state(&db, "T2").await, TransferInternalState::Reserved);
    tear_down(db).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sweeps_expire_each_transfer_once() {
    let db = setup().await;
    for i in 0..50 {
        let states = if i % 2 == 0 { vec![] } else { vec![TransferInternalState::Reserved] };
        new_transfer(&db, &format!("T{i}"), Some(Duration::hours(-1)), &states).await;
    }
    let api = Arc::new(TimeoutApi::new(db.clone(), RecordingPublisher::default(), config()));
    let sweeps = (0..4)
        .map(|_| {
            let api = api.clone();
            tokio::spawn(async move { api.sweep().await })
        })
        .collect::<Vec<_>>();
    let mut expired = 0;
    for sweep in sweeps {
        expired += sweep.await.unwrap().unwrap().expired.len();
    }
    assert_eq!(expired, 50);

    let events = api.publisher().events();
    let count = |topic: Topic| events.iter().filter(|e| e.topic == topic).count();
    assert_eq!(count(Topic::Notification), 25);
    assert_eq!(count(Topic::Position), 25);
    for i in 0..50 {
        let expected = if i % 2 == 0 {
            TransferInternalState::ExpiredPrepared
        } else {
            TransferInternalState::ReservedTimeout
        };
        assert_eq!(transfer_state(&db, &format!("T{i}")).await, expected);
    }
    tear_down(db).await;
}

#[tokio::test]
async fn default_reservation_expiry() {
    let db = setup().await;
    new_transfer(&db, "T1", None, &[TransferInternalState::Reserved]).await;
    let patient = TimeoutApi::new(db.clone(), RecordingPublisher::default(), config());
    assert!(patient.sweep().await.unwrap().expired.is_empty());
    tear_down(db).await;

    let db = setup().await;
    new_transfer(&db, "T1", None, &[TransferInternalState::Reserved]).await;
    let cfg = TimeoutConfig { reservation_expiry: Duration::zero(), ..config() };
    let impatient = TimeoutApi::new(db.clone(), RecordingPublisher::default(), cfg);
    let result = impatient.sweep().await.unwrap();
    assert_eq!(result.expired.len(), 1);
    assert_eq!(transfer_state(&db, "T1").await, TransferInternalState::ReservedTimeout);
    tear_down(db).await;
}

#[tokio::test]
async fn publish_failures_are_reported_after_the_commit() {
    let db = setup().await;
    new_transfer(&db, "T1", Some(Duration::hours(-1)), &[]).await;
    new_transfer(&db, "T2", Some(Duration::hours(-1)), &[TransferInternalState::Reserved]).await;
    let api = TimeoutApi::new(db.clone(), RecordingPublisher::failing(), config());
    let err = api.sweep().await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InternalServerError);
    assert_eq!(transfer_state(&db, "T1").await, TransferInternalState::ExpiredPrepared);
    assert_eq!(transfer_state(&db, "T2").await, TransferInternalState::ReservedTimeout);
    let segment = db.get_timeout_segment().await.unwrap().unwrap();
    assert!(segment.value > 0);
    tear_down(db).await;
}

#[tokio::test]
async fn empty_ledger_sweep() {
    let db = setup().await;
    let api = TimeoutApi::new(db.clone(), RecordingPublisher::default(), config());
    let result = api.sweep().await.unwrap();
    assert_eq!((result.interval_min, result.interval_max, result.cleanup), (0, 0, 0));
    assert!(result.expired.is_empty());
    tear_down(db).await;
}
