use std::fmt::Display;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    db_types::{BulkTransferId, ErrorInformation},
    events::PublishError,
    traits::StoreError,
};

/// The switch's standard error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InternalServerError,
    ValidationError,
    ModifiedRequest,
    ExpiredError,
}

impl ErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorCode::InternalServerError => "2001",
            ErrorCode::ValidationError => "3100",
            ErrorCode::ModifiedRequest => "3106",
            ErrorCode::ExpiredError => "3300",
        }
    }

    pub fn numeric(&self) -> i64 {
        match self {
            ErrorCode::InternalServerError => 2001,
            ErrorCode::ValidationError => 3100,
            ErrorCode::ModifiedRequest => 3106,
            ErrorCode::ExpiredError => 3300,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ErrorCode::InternalServerError => "Internal server error",
            ErrorCode::ValidationError => "Generic validation error",
            ErrorCode::ModifiedRequest => "Modified request",
            ErrorCode::ExpiredError => "Generic expired error",
        }
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code(), self.description())
    }
}

/// A switch-domain error: one of the standard [`ErrorCode`]s plus a message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[{code}] {message}")]
pub struct SwitchError {
    pub code: ErrorCode,
    pub message: String,
}

/// The `{"errorInformation": {...}}` object sent to participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorObject {
    pub error_information: ErrorInformation,
}

impl SwitchError {
    pub fn new<S: Into<String>>(code: ErrorCode, message: S) -> Self {
        Self { code, message: message.into() }
    }

    pub fn expired() -> Self {
        Self::new(ErrorCode::ExpiredError, "Transfer has expired at the switch")
    }

    /// Converts any lower-layer error into a switch error. Anything that is not already a switch error becomes an
    /// internal server error.
    pub fn reformat<E: Into<SwitchError>>(err: E) -> Self {
        err.into()
    }

    pub fn to_api_error_object(&self) -> ApiErrorObject {
        ApiErrorObject {
            error_information: ErrorInformation {
                error_code: self.code.code().to_string(),
                error_description: format!("{} - {}", self.code.description(), self.message),
                extension_list: None,
            },
        }
    }
}

impl From<StoreError> for SwitchError {
    fn from(e: StoreError) -> Self {
        Self::new(ErrorCode::InternalServerError, e.to_string())
    }
}

impl From<PublishError> for SwitchError {
    fn from(e: PublishError) -> Self {
        Self::new(ErrorCode::InternalServerError, e.to_string())
    }
}

/// Reasons a bulk fulfilment message could not be processed.
#[derive(Debug, Clone, Error)]
pub enum BulkFulfilError {
    #[error("Bulk transfer {0} was resubmitted with different content")]
    ModifiedRequest(BulkTransferId),
    #[error("The bulk fulfilment message could not be interpreted: {0}")]
    Serialization(String),
    #[error("Bulk transfer id '{0}' is too long to be recorded")]
    UnrecordableId(String),
    #[error("Could not record the bulk fulfilment: {0}")]
    Persistence(StoreError),
    #[error("Could not stream the individual transfer fulfilments: {0}")]
    Streaming(StoreError),
    #[error("Could not publish an individual transfer fulfilment: {0}")]
    Publish(PublishError),
    #[error("Could not acknowledge the inbound message: {0}")]
    Acknowledge(PublishError),
}

impl From<BulkFulfilError> for SwitchError {
    fn from(e: BulkFulfilError) -> Self {
        let code = match e {
            BulkFulfilError::ModifiedRequest(_) => ErrorCode::ModifiedRequest,
            BulkFulfilError::Serialization(_) | BulkFulfilError::UnrecordableId(_) => ErrorCode::ValidationError,
            _ => ErrorCode::InternalServerError,
        };
        Self::new(code, e.to_string())
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    #[test]
    fn expired_error_object() {
        let obj = SwitchError::expired().to_api_error_object();
        assert_eq!(
            serde_json::to_value(&obj).unwrap(),
            json!({
                "errorInformation": {
                    "errorCode": "3300",
                    "errorDescription": "Generic expired error - Transfer has expired at the switch"
                }
            })
        );
    }

    #[test]
    fn reformatting() {
        let e = SwitchError::reformat(StoreError::DatabaseError("disk full".into()));
        assert_eq!(e.code, ErrorCode::InternalServerError);
        assert_eq!(e.to_api_error_object().error_information.error_code, "2001");
        let e = SwitchError::reformat(SwitchError::expired());
        assert_eq!(e.code, ErrorCode::ExpiredError);
        let e = SwitchError::reformat(BulkFulfilError::ModifiedRequest("b1".into()));
        assert_eq!(e.code.code(), "3106");
        assert_eq!(e.to_string(), "[3106 Modified request] Bulk transfer b1 was resubmitted with different content");
        let e = SwitchError::reformat(BulkFulfilError::UnrecordableId("B".repeat(40)));
        assert_eq!(e.code, ErrorCode::ValidationError);
    }
}
