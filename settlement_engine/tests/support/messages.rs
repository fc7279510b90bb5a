use chrono::Utc;
use serde_json::Value;
use settlement_engine::{
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
};

pub const PAYER: &str = "payerfsp";
pub const PAYEE: &str = "payeefsp";
pub const CONTENT_TYPE: &str = "application/vnd.interoperability.bulkTransfers+json;version=1.0";

pub fn payee_headers() -> Headers {
    Headers::default()
        .with(HEADER_SOURCE, PAYEE)
        .with(HEADER_DESTINATION, PAYER)
        .with(HEADER_CONTENT_TYPE, CONTENT_TYPE)
}

/// A bulk fulfilment message from the payee, with the payload wrapped in a data URI as it travels on the bus.
pub fn bulk_fulfil_message(message_id: &str, payload: Value) -> Message {
    bulk_fulfil_message_with_headers(message_id, payload, payee_headers())
}

pub fn bulk_fulfil_message_with_headers(message_id: &str, payload: Value, headers: Headers) -> Message {
    Message {
        id: message_id.to_string(),
        from: PAYEE.to_string(),
        to: PAYER.to_string(),
        content_type: CONTENT_TYPE.to_string(),
        content: MessageContent {
            headers,
            payload: Value::String(data_uri::encode(payload.to_string(), CONTENT_TYPE)),
            uri_params: None,
        },
        metadata: MessageMetadata {
            correlation_id: Some(format!("corr-{message_id}")),
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

/// Decodes the data URI payload of an outbound message.
pub fn decoded(message: &Message) -> Value {
    message.content.decoded_payload().expect("payload should decode")
}
