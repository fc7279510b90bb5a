//! The bulk fulfilment request as it arrives on the bus, and the per-transfer fulfil message built from it.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    db_types::{
        BulkTransferId,
        BulkTransferState,
        ErrorInformation,
        ExtensionList,
        IndividualTransferFulfil,
        NewBulkFulfilment,
        TransferState,
        MAX_ID_LENGTH,
    },
    events::{EventAction, EventMetadata, EventState, EventType, Headers, Message, MessageContent, MessageMetadata,
             UriParams},
    helpers::{data_uri, hash_payload},
    switch_api::errors::BulkFulfilError,
};

const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// The bulk fulfilment document sent by the payee FSP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkFulfilPayload {
    pub bulk_transfer_id: BulkTransferId,
    /// Content hash supplied by the sender. If absent, the switch computes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bulk_transfer_state: Option<BulkTransferState>,
    #[serde(default, alias = "individuals")]
    pub individual_transfer_results: Vec<IndividualTransferFulfil>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension_list: Option<ExtensionList>,
}

impl BulkFulfilPayload {
    pub fn to_new_bulk_fulfilment(&self, headers: &Headers) -> NewBulkFulfilment {
        NewBulkFulfilment {
            bulk_transfer_id: self.bulk_transfer_id.clone(),
            payee_fsp: headers.source().unwrap_or_default().to_string(),
            payer_fsp: headers.destination().unwrap_or_default().to_string(),
            declared_state: self.bulk_transfer_state,
            completed_date: self.completed_timestamp,
            extensions: self.extension_list.as_ref().map(|l| l.extension.clone()).unwrap_or_default(),
        }
    }
}

/// An inbound bulk fulfilment message, unpacked.
#[derive(Debug, Clone)]
pub struct BulkFulfilRequest {
    pub message_id: String,
    pub headers: Headers,
    pub action: EventAction,
    pub payload: BulkFulfilPayload,
    /// The content hash used for duplicate detection.
    pub hash: String,
}

impl BulkFulfilRequest {
    pub fn from_message(message: &Message) -> Result<Self, BulkFulfilError> {
        let value = message.content.decoded_payload().map_err(|e| BulkFulfilError::Serialization(e.to_string()))?;
        let payload =
            BulkFulfilPayload::deserialize(&value).map_err(|e| BulkFulfilError::Serialization(e.to_string()))?;
        // Ids like this would be rejected by the ledger itself, so there is no record of them to be made
        if payload.bulk_transfer_id.as_str().chars().count() > MAX_ID_LENGTH {
            return Err(BulkFulfilError::UnrecordableId(payload.bulk_transfer_id.to_string()));
        }
        let hash = match &payload.hash {
            Some(h) if !h.is_empty() => h.clone(),
            _ => hash_payload(&value),
        };
        Ok(Self {
            message_id: message.id.clone(),
            headers: message.content.headers.clone(),
            action: message.action().clone(),
            payload,
            hash,
        })
    }

    pub fn bulk_transfer_id(&self) -> &BulkTransferId {
        &self.payload.bulk_transfer_id
    }
}

/// The body of a per-transfer fulfil event. The transfer id travels in the URI parameters instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndividualFulfilBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fulfilment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_information: Option<ErrorInformation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension_list: Option<ExtensionList>,
    pub transfer_state: TransferState,
}

/// Builds the fulfil message for one transfer of a bulk. The message travels back from the payer's side to the
/// payee's side, correlated to the inbound event.
pub fn individual_fulfil_message(
    inbound: &Message,
    individual: &IndividualTransferFulfil,
    state: TransferState,
) -> Result<Message, BulkFulfilError> {
    let headers = &inbound.content.headers;
    let content_type = headers.content_type().unwrap_or(DEFAULT_CONTENT_TYPE).to_string();
    let body = IndividualFulfilBody {
        fulfilment: individual.fulfilment.clone(),
        error_information: individual.error_information.clone(),
        extension_list: individual.extension_list.clone(),
        transfer_state: state,
    };
    let json = serde_json::to_string(&body).map_err(|e| BulkFulfilError::Serialization(e.to_string()))?;
    let event_id = inbound.event_id();
    let event = EventMetadata::correlated(event_id, EventType::Fulfil, EventAction::BulkCommit, EventState::success());
    let correlation_id = inbound.metadata.correlation_id.clone().or_else(|| Some(inbound.event_id().to_string()));
    Ok(Message {
        id: inbound.id.clone(),
        from: headers.destination().unwrap_or_default().to_string(),
        to: headers.source().unwrap_or_default().to_string(),
        content_type: content_type.clone(),
        content: MessageContent {
            headers: headers.clone(),
            payload: serde_json::Value::String(data_uri::encode(json, &content_type)),
            uri_params: Some(UriParams { id: individual.transfer_id.to_string() }),
        },
        metadata: MessageMetadata { correlation_id, event },
    })
}

#[cfg(test)]
mod test {
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::{
        db_types::TransferId,
        events::{EventStatus, HEADER_CONTENT_TYPE, HEADER_DESTINATION, HEADER_SOURCE},
    };

    fn inbound(payload: serde_json::Value) -> Message {
        let headers = Headers::default()
            .with(HEADER_SOURCE, "payeefsp")
            .with(HEADER_DESTINATION, "payerfsp")
            .with(HEADER_CONTENT_TYPE, "application/json");
        Message {
            id: "m1".into(),
            from: "payeefsp".into(),
            to: "payerfsp".into(),
            content_type: "application/json".into(),
            content: MessageContent {
                headers,
                payload: serde_json::Value::String(data_uri::encode(payload.to_string(), "application/json")),
                uri_params: None,
            },
            metadata: MessageMetadata {
                correlation_id: None,
                event: EventMetadata {
                    id: "e1".into(),
                    response_to: None,
                    event_type: EventType::Bulk,
                    action: EventAction::BulkCommit,
                    created_at: Utc::now(),
                    state: EventState::success(),
                },
            },
        }
    }

    #[test]
    fn request_from_message() {
        let payload = json!({
            "bulkTransferId": "B1",
            "individuals": [{ "transferId": "T1", "fulfilment": "F1" }]
        });
        let request = BulkFulfilRequest::from_message(&inbound(payload.clone())).unwrap();
        assert_eq!(request.bulk_transfer_id().as_str(), "B1");
        assert_eq!(request.payload.individual_transfer_results.len(), 1);
        assert_eq!(request.hash, hash_payload(&payload));
        let new_fulfilment = request.payload.to_new_bulk_fulfilment(&request.headers);
        assert_eq!(new_fulfilment.payee_fsp, "payeefsp");
        assert_eq!(new_fulfilment.payer_fsp, "payerfsp");

        let with_hash = json!({ "bulkTransferId": "B1", "hash": "abc" });
        let request = BulkFulfilRequest::from_message(&inbound(with_hash)).unwrap();
        assert_eq!(request.hash, "abc");

        let err = BulkFulfilRequest::from_message(&inbound(json!({ "hash": "abc" }))).unwrap_err();
        assert!(matches!(err, BulkFulfilError::Serialization(_)));

        let too_long = json!({ "bulkTransferId": "B".repeat(37), "hash": "abc" });
        let err = BulkFulfilRequest::from_message(&inbound(too_long)).unwrap_err();
        assert!(matches!(err, BulkFulfilError::UnrecordableId(_)));
    }

    #[test]
    fn individual_message_travels_back_to_the_payee() {
        let message = inbound(json!({}));
        let individual = IndividualTransferFulfil {
            transfer_id: TransferId::from("T1"),
            fulfilment: Some("F1".into()),
            error_information: None,
            extension_list: None,
        };
        let out = individual_fulfil_message(&message, &individual, TransferState::Committed).unwrap();
        assert_eq!(out.id, "m1");
        assert_eq!((out.from.as_str(), out.to.as_str()), ("payerfsp", "payeefsp"));
        assert_eq!(out.content.headers, message.content.headers);
        assert_eq!(out.metadata.correlation_id.as_deref(), Some("e1"));
        assert_eq!(out.metadata.event.response_to.as_deref(), Some("e1"));
        assert_eq!(out.metadata.event.event_type, EventType::Fulfil);
        assert_eq!(out.metadata.event.state.status, EventStatus::Success);
        assert_eq!(
            out.content.decoded_payload().unwrap(),
            json!({ "fulfilment": "F1", "transferState": "COMMITTED" })
        );
        let serde_json::Value::String(uri) = &out.content.payload else {
            panic!("payload should be a data URI");
        };
        assert!(uri.starts_with("data:application/json;base64,"));
    }
}
