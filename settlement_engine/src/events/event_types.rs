//! The streaming message envelope exchanged with the rest of the switch, and the vocabulary used to label it.
use std::{collections::BTreeMap, fmt::Display};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::helpers::data_uri;

pub const HEADER_SOURCE: &str = "fspiop-source";
pub const HEADER_DESTINATION: &str = "fspiop-destination";
pub const HEADER_CONTENT_TYPE: &str = "content-type";
pub const HEADER_ACCEPT: &str = "accept";
pub const HEADER_DATE: &str = "date";

pub const TRANSFERS_CONTENT_TYPE: &str = "application/vnd.interoperability.transfers+json;version=1.0";

//--------------------------------------        Topic         ---------------------------------------------------------
/// The logical destinations a message can be published to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Inbound bulk fulfilment requests
    BulkFulfil,
    /// Per-transfer fulfil events
    Fulfil,
    /// Participant notifications
    Notification,
    /// Position adjustments
    Position,
}

impl Topic {
    pub fn functionality(&self) -> &'static str {
        match self {
            Topic::BulkFulfil => "bulk",
            Topic::Fulfil | Topic::Position => "transfer",
            Topic::Notification => "notification",
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            Topic::BulkFulfil | Topic::Fulfil => "fulfil",
            Topic::Notification => "event",
            Topic::Position => "position",
        }
    }

    /// The topic name, following the `topic-{functionality}-{action}` template.
    pub fn name(&self) -> String {
        format!("topic-{}-{}", self.functionality(), self.action())
    }
}

impl Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name())
    }
}

/// Generates a closed string vocabulary with an `Unknown` fallback, so that unexpected values arriving on the wire
/// are preserved rather than rejected.
macro_rules! wire_vocabulary {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(from = "String", into = "String")]
        pub enum $name {
            $($variant,)+
            Unknown(String),
        }

        impl $name {
            pub fn as_str(&self) -> &str {
                match self {
                    $(Self::$variant => $text,)+
                    Self::Unknown(s) => s.as_str(),
                }
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                match s.as_str() {
                    $($text => Self::$variant,)+
                    _ => Self::Unknown(s),
                }
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::from(s.to_string())
            }
        }

        impl From<$name> for String {
            fn from(v: $name) -> Self {
                v.as_str().to_string()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

wire_vocabulary!(EventType {
    Bulk => "bulk",
    Fulfil => "fulfil",
    Notification => "notification",
    Position => "position",
    Prepare => "prepare",
    Transfer => "transfer",
});

wire_vocabulary!(EventAction {
    Abort => "abort",
    BulkCommit => "bulk-commit",
    BulkFulfil => "bulk-fulfil",
    BulkPrepare => "bulk-prepare",
    BulkProcessing => "bulk-processing",
    Commit => "commit",
    Fulfil => "fulfil",
    Prepare => "prepare",
    Reject => "reject",
    TimeoutReceived => "timeout-received",
    TimeoutReserved => "timeout-reserved",
});

impl EventAction {
    /// The short code used in log breadcrumbs.
    pub fn letter(&self) -> &'static str {
        match self {
            EventAction::Abort => "A",
            EventAction::BulkCommit => "BC",
            EventAction::BulkFulfil => "BF",
            EventAction::BulkPrepare => "BP",
            EventAction::BulkProcessing => "BM",
            EventAction::Commit => "C",
            EventAction::Fulfil => "F",
            EventAction::Prepare => "P",
            EventAction::Reject => "R",
            EventAction::TimeoutReceived => "TR",
            EventAction::TimeoutReserved => "TX",
            EventAction::Unknown(_) => "?",
        }
    }
}

//--------------------------------------       Headers        ---------------------------------------------------------
/// Transport headers. Header names are case-insensitive and are stored lower-cased.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, String>")]
pub struct Headers(BTreeMap<String, String>);

impl From<BTreeMap<String, String>> for Headers {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map.into_iter().map(|(k, v)| (k.to_ascii_lowercase(), v)).collect())
    }
}

impl Headers {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn insert<K: Into<String>, V: Into<String>>(&mut self, name: K, value: V) -> &mut Self {
        self.0.insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.insert(name, value);
        self
    }

    pub fn source(&self) -> Option<&str> {
        self.get(HEADER_SOURCE)
    }

    pub fn destination(&self) -> Option<&str> {
        self.get(HEADER_DESTINATION)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.get(HEADER_CONTENT_TYPE)
    }

    /// The headers the switch attaches to messages it originates itself.
    pub fn switch_defaults(destination: &str, resource: &str, source: &str) -> Self {
        let content_type = format!("application/vnd.interoperability.{resource}+json;version=1.0");
        Self::default()
            .with(HEADER_ACCEPT, content_type.clone())
            .with(HEADER_DESTINATION, destination)
            .with(HEADER_CONTENT_TYPE, content_type)
            .with(HEADER_DATE, Utc::now().to_rfc2822())
            .with(HEADER_SOURCE, source)
    }
}

//--------------------------------------       Message        ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UriParams {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContent {
    #[serde(default)]
    pub headers: Headers,
    /// Either a JSON document, or a data URI wrapping one.
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri_params: Option<UriParams>,
}

impl MessageContent {
    /// Returns the payload as a JSON document, decoding it first if it is carried as a data URI.
    pub fn decoded_payload(&self) -> Result<Value, data_uri::DataUriError> {
        match &self.payload {
            Value::String(s) if s.starts_with("data:") => {
                let bytes = data_uri::decode(s)?.data;
                Ok(serde_json::from_slice(&bytes)?)
            },
            other => Ok(other.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventState {
    pub status: EventStatus,
    pub code: i64,
    pub description: String,
}

impl EventState {
    pub fn success() -> Self {
        Self { status: EventStatus::Success, code: 0, description: "action successful".to_string() }
    }

    pub fn failure(code: i64, description: impl Into<String>) -> Self {
        Self { status: EventStatus::Failure, code, description: description.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_to: Option<String>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub action: EventAction,
    pub created_at: DateTime<Utc>,
    pub state: EventState,
}

impl EventMetadata {
    /// Metadata for a new event that answers the event `response_to`.
    pub fn correlated(response_to: &str, event_type: EventType, action: EventAction, state: EventState) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            response_to: Some(response_to.to_string()),
            event_type,
            action,
            created_at: Utc::now(),
            state,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub event: EventMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub content_type: String,
    pub content: MessageContent,
    pub metadata: MessageMetadata,
}

impl Message {
    pub fn action(&self) -> &EventAction {
        &self.metadata.event.action
    }

    pub fn event_id(&self) -> &str {
        &self.metadata.event.id
    }
}

/// A message on its way out, tagged with where it should go.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEvent {
    pub topic: Topic,
    /// Partitioning key. Messages with the same key keep their relative order.
    pub key: Option<String>,
    pub message: Message,
}

impl OutboundEvent {
    pub fn new(topic: Topic, message: Message) -> Self {
        Self { topic, key: None, message }
    }

    pub fn with_key<S: Into<String>>(mut self, key: S) -> Self {
        self.key = Some(key.into());
        self
    }
}
