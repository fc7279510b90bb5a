use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;

pub use switch_common::Amount;

/// Maximum length of the opaque identifiers exchanged with participants (the length of a UUID string).
pub const MAX_ID_LENGTH: usize = 36;
pub const MAX_EXTENSION_KEY_LENGTH: usize = 128;
pub const MAX_EXTENSION_VALUE_LENGTH: usize = 512;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Conversion error: {0}")]
pub struct ConversionError(String);

/// Generates the `Display`, `FromStr`, `as_str` boilerplate for enums that are stored as text in the database and
/// travel as SCREAMING_SNAKE_CASE strings on the wire.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ConversionError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    s => Err(ConversionError(format!("Invalid {}: {s}", stringify!($name)))),
                }
            }
        }
    };
}

/// Generates the newtype wrapper used for identifiers.
macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Type, Serialize, Deserialize)]
        #[sqlx(transparent)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = ConversionError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_string()))
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

//--------------------------------------      Identifiers     ---------------------------------------------------------
id_type!(
    /// Caller-supplied, globally unique identifier of an individual transfer.
    TransferId
);
id_type!(
    /// Caller-supplied identifier of a bulk transfer envelope.
    BulkTransferId
);

//-------------------------------------- TransferInternalState ---------------------------------------------------------
/// The fine-grained state of a transfer as recorded by the switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferInternalState {
    ReceivedPrepare,
    Reserved,
    ReceivedFulfil,
    Committed,
    ReceivedReject,
    AbortedRejected,
    AbortedError,
    /// Expired before any fulfilment was received.
    ExpiredPrepared,
    /// Expired after funds were reserved, awaiting release by the position service.
    ReservedTimeout,
    ExpiredReserved,
    Invalid,
}

text_enum!(TransferInternalState {
    ReceivedPrepare => "RECEIVED_PREPARE",
    Reserved => "RESERVED",
    ReceivedFulfil => "RECEIVED_FULFIL",
    Committed => "COMMITTED",
    ReceivedReject => "RECEIVED_REJECT",
    AbortedRejected => "ABORTED_REJECTED",
    AbortedError => "ABORTED_ERROR",
    ExpiredPrepared => "EXPIRED_PREPARED",
    ReservedTimeout => "RESERVED_TIMEOUT",
    ExpiredReserved => "EXPIRED_RESERVED",
    Invalid => "INVALID",
});

impl TransferInternalState {
    /// States this core may never write over. `RESERVED_TIMEOUT` is included because, once a reservation has timed
    /// out, only the position service may move the transfer on (to `EXPIRED_RESERVED`).
    pub const TERMINAL: [TransferInternalState; 7] = [
        Self::Committed,
        Self::AbortedRejected,
        Self::AbortedError,
        Self::ExpiredPrepared,
        Self::ReservedTimeout,
        Self::ExpiredReserved,
        Self::Invalid,
    ];

    pub fn is_terminal(&self) -> bool {
        Self::TERMINAL.contains(self)
    }

    /// The participant-facing state corresponding to this internal state.
    pub fn transfer_state(&self) -> TransferState {
        match self {
            Self::ReceivedPrepare => TransferState::Received,
            Self::Reserved | Self::ReceivedFulfil | Self::ReceivedReject => TransferState::Reserved,
            Self::Committed => TransferState::Committed,
            _ => TransferState::Aborted,
        }
    }
}

//--------------------------------------    TransferState     ---------------------------------------------------------
/// The participant-facing transfer state, as carried in fulfilment payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferState {
    Received,
    Reserved,
    Committed,
    Aborted,
}

text_enum!(TransferState {
    Received => "RECEIVED",
    Reserved => "RESERVED",
    Committed => "COMMITTED",
    Aborted => "ABORTED",
});

impl TransferState {
    /// The internal state recorded when an individual transfer inside a bulk reaches this state.
    pub fn internal_state(&self) -> TransferInternalState {
        match self {
            Self::Received => TransferInternalState::ReceivedPrepare,
            Self::Reserved => TransferInternalState::Reserved,
            Self::Committed => TransferInternalState::Committed,
            Self::Aborted => TransferInternalState::AbortedRejected,
        }
    }
}

//--------------------------------------  BulkTransferState   ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BulkTransferState {
    Received,
    Pending,
    Accepted,
    Processing,
    Completed,
    Rejected,
    Invalid,
}

text_enum!(BulkTransferState {
    Received => "RECEIVED",
    Pending => "PENDING",
    Accepted => "ACCEPTED",
    Processing => "PROCESSING",
    Completed => "COMPLETED",
    Rejected => "REJECTED",
    Invalid => "INVALID",
});

impl BulkTransferState {
    /// When the bulk outcome is in one of these states, every individual transfer in it is aborted.
    pub fn aborts_individual_transfers(&self) -> bool {
        matches!(self, Self::Rejected | Self::Invalid)
    }
}

//-------------------------------------- BulkProcessingState  ---------------------------------------------------------
/// Tracks an individual transfer's progress through bulk processing, independently of its own transfer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BulkProcessingState {
    Received,
    ReceivedDuplicate,
    ReceivedInvalid,
    Accepted,
    Processing,
    FulfilDuplicate,
    FulfilInvalid,
    Completed,
    Rejected,
    Expired,
}

text_enum!(BulkProcessingState {
    Received => "RECEIVED",
    ReceivedDuplicate => "RECEIVED_DUPLICATE",
    ReceivedInvalid => "RECEIVED_INVALID",
    Accepted => "ACCEPTED",
    Processing => "PROCESSING",
    FulfilDuplicate => "FULFIL_DUPLICATE",
    FulfilInvalid => "FULFIL_INVALID",
    Completed => "COMPLETED",
    Rejected => "REJECTED",
    Expired => "EXPIRED",
});

//--------------------------------------      Extensions      ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extension {
    pub key: String,
    pub value: String,
}

impl Extension {
    /// Whether the key and value fit the ledger's column limits.
    pub fn is_storable(&self) -> bool {
        self.key.chars().count() <= MAX_EXTENSION_KEY_LENGTH && self.value.chars().count() <= MAX_EXTENSION_VALUE_LENGTH
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionList {
    #[serde(default)]
    pub extension: Vec<Extension>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInformation {
    pub error_code: String,
    pub error_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension_list: Option<ExtensionList>,
}

//--------------------------------------       Transfer       ---------------------------------------------------------
#[derive(Debug, Clone, FromRow)]
pub struct Transfer {
    pub transfer_id: TransferId,
    pub payer_fsp: String,
    pub payee_fsp: String,
    pub amount: Amount,
    pub currency: String,
    pub transfer_state: TransferInternalState,
    pub expiration_date: Option<DateTime<Utc>>,
    pub created_date: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTransfer {
    pub transfer_id: TransferId,
    pub payer_fsp: String,
    pub payee_fsp: String,
    pub amount: Amount,
    pub currency: String,
    /// If not supplied, the configured reservation expiry threshold applies.
    pub expiration_date: Option<DateTime<Utc>>,
}

impl NewTransfer {
    pub fn new<S: Into<String>>(transfer_id: TransferId, payer_fsp: S, payee_fsp: S, amount: Amount) -> Self {
        Self {
            transfer_id,
            payer_fsp: payer_fsp.into(),
            payee_fsp: payee_fsp.into(),
            amount,
            currency: "USD".to_string(),
            expiration_date: None,
        }
    }

    pub fn with_currency<S: Into<String>>(mut self, currency: S) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn with_expiration_date(mut self, expiration_date: DateTime<Utc>) -> Self {
        self.expiration_date = Some(expiration_date);
        self
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct TransferStateChange {
    pub transfer_state_change_id: i64,
    pub transfer_id: TransferId,
    pub transfer_state: TransferInternalState,
    pub reason: Option<String>,
    pub created_date: DateTime<Utc>,
}

/// Result of a checked state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateTransition {
    /// The transfer moved to the requested state.
    Applied(TransferInternalState),
    /// The transfer was already terminal. Its stored state is returned, unchanged.
    AlreadyTerminal(TransferInternalState),
    /// There is no transfer record for the id.
    UnknownTransfer,
}

impl StateTransition {
    /// The state the transfer is in after the transition attempt, if it exists.
    pub fn resulting_state(&self) -> Option<TransferInternalState> {
        match self {
            Self::Applied(s) | Self::AlreadyTerminal(s) => Some(*s),
            Self::UnknownTransfer => None,
        }
    }
}

//--------------------------------------  TransferFulfilment  ---------------------------------------------------------
#[derive(Debug, Clone, FromRow)]
pub struct TransferFulfilment {
    pub transfer_fulfilment_id: i64,
    pub transfer_id: TransferId,
    pub fulfilment: Option<String>,
    pub completed_date: Option<DateTime<Utc>>,
    pub is_valid: bool,
    pub created_date: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTransferFulfilment {
    pub transfer_id: TransferId,
    pub fulfilment: Option<String>,
    pub completed_date: Option<DateTime<Utc>>,
    pub is_valid: bool,
}

//--------------------------------------    DuplicateCheck    ---------------------------------------------------------
/// Which identity space a duplicate check is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateCheckKind {
    Transfer,
    BulkTransfer,
}

impl DuplicateCheckKind {
    pub(crate) fn table(&self) -> &'static str {
        match self {
            Self::Transfer => "transfer_duplicate_check",
            Self::BulkTransfer => "bulk_transfer_duplicate_check",
        }
    }

    pub(crate) fn id_column(&self) -> &'static str {
        match self {
            Self::Transfer => "transfer_id",
            Self::BulkTransfer => "bulk_transfer_id",
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DuplicateCheckRecord {
    pub identity: String,
    pub hash: String,
    pub created_date: DateTime<Utc>,
}

/// Outcome of a transactional check-and-insert of a content hash.
///
/// | exists_matching | exists_not_matching | meaning                                 |
/// |-----------------|---------------------|-----------------------------------------|
/// | false           | false               | first time this identity has been seen  |
/// | true            | false               | exact resend of a previous request      |
/// | false           | true                | same identity, different content        |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateCheckResult {
    pub exists_matching: bool,
    pub exists_not_matching: bool,
}

impl DuplicateCheckResult {
    pub fn first_seen() -> Self {
        Self::default()
    }

    pub fn compare(stored_hash: &str, hash: &str) -> Self {
        let exists_matching = stored_hash == hash;
        Self { exists_matching, exists_not_matching: !exists_matching }
    }

    pub fn is_first_seen(&self) -> bool {
        !self.exists_matching && !self.exists_not_matching
    }

    pub fn is_resend(&self) -> bool {
        self.exists_matching
    }

    pub fn is_modified_request(&self) -> bool {
        self.exists_not_matching
    }
}

//--------------------------------------     BulkTransfer     ---------------------------------------------------------
#[derive(Debug, Clone, FromRow)]
pub struct BulkTransfer {
    pub bulk_transfer_id: BulkTransferId,
    pub payer_fsp: String,
    pub payee_fsp: String,
    pub bulk_transfer_state: BulkTransferState,
    pub created_date: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct BulkTransferFulfilment {
    pub bulk_transfer_fulfilment_id: i64,
    pub bulk_transfer_id: BulkTransferId,
    pub completed_date: Option<DateTime<Utc>>,
    /// Rejection reasons, recorded for audit when the request failed validation.
    pub reasons: Option<String>,
    /// Set once every individual transfer event for this fulfilment has been emitted.
    pub processing_completed_date: Option<DateTime<Utc>>,
    pub created_date: DateTime<Utc>,
}

/// Everything needed to persist the aggregate outcome of a bulk fulfilment.
#[derive(Debug, Clone)]
pub struct NewBulkFulfilment {
    pub bulk_transfer_id: BulkTransferId,
    /// The FSP that sent the fulfilment (the payee)
    pub payee_fsp: String,
    /// The FSP the fulfilment is destined for (the payer)
    pub payer_fsp: String,
    /// The bulk state the payee declared, if any
    pub declared_state: Option<BulkTransferState>,
    pub completed_date: Option<DateTime<Utc>>,
    pub extensions: Vec<Extension>,
}

#[derive(Debug, Clone, FromRow)]
pub struct BulkTransferExtension {
    pub bulk_transfer_extension_id: i64,
    pub bulk_transfer_id: BulkTransferId,
    pub bulk_transfer_fulfilment_id: Option<i64>,
    pub key: String,
    pub value: String,
    pub created_date: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct BulkTransferAssociation {
    pub transfer_id: TransferId,
    pub bulk_transfer_id: BulkTransferId,
    pub bulk_processing_state: BulkProcessingState,
    pub created_date: DateTime<Utc>,
    pub last_processed_date: DateTime<Utc>,
}

/// The fulfilment document of one individual transfer inside a bulk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndividualTransferFulfil {
    pub transfer_id: TransferId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fulfilment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_information: Option<ErrorInformation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension_list: Option<ExtensionList>,
}

impl IndividualTransferFulfil {
    /// Derives the terminal state of this individual transfer from the bulk outcome and its own fields only.
    ///
    /// The transfer is aborted if the bulk outcome aborts its members, if it carries error information, or if it
    /// has no fulfilment. Otherwise it is committed.
    pub fn derive_state(&self, bulk_state: BulkTransferState) -> TransferState {
        let has_fulfilment = self.fulfilment.as_ref().map(|f| !f.is_empty()).unwrap_or(false);
        if bulk_state.aborts_individual_transfers() || self.error_information.is_some() || !has_fulfilment {
            TransferState::Aborted
        } else {
            TransferState::Committed
        }
    }
}

/// A staged [`IndividualTransferFulfil`] document, as read back from the store's cursor.
#[derive(Debug, Clone, FromRow)]
pub struct StagedIndividualFulfil {
    pub individual_transfer_fulfil_id: i64,
    pub message_id: String,
    pub bulk_transfer_id: BulkTransferId,
    pub transfer_id: TransferId,
    pub payload: String,
}

//--------------------------------------       Timeouts       ---------------------------------------------------------
/// The watermark of the timeout sweep. `value` is the highest transfer state change id already scanned.
#[derive(Debug, Clone, FromRow)]
pub struct TimeoutSegment {
    pub segment_id: i64,
    pub segment_type: String,
    pub enumeration: i64,
    pub table_name: String,
    pub value: i64,
    pub changed_date: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ExpiredTransfer {
    pub transfer_id: TransferId,
    pub payer_fsp: String,
    pub payee_fsp: String,
    pub transfer_state: TransferInternalState,
    pub expiration_date: DateTime<Utc>,
}

//-------------------------------------- ParticipantPosition  ---------------------------------------------------------
#[derive(Debug, Clone, FromRow, PartialEq, Eq)]
pub struct ParticipantPosition {
    pub participant_currency_id: i64,
    pub value: Amount,
    pub reserved_value: Amount,
    pub changed_date: DateTime<Utc>,
}
