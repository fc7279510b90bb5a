use std::collections::HashSet;

use chrono::{Duration, Utc};
use regex::Regex;

use crate::{
    db_types::{BulkTransferState, MAX_ID_LENGTH},
    events::Headers,
    switch_api::fulfil_objects::BulkFulfilPayload,
};

/// The outcome of validating a request: pass/fail, plus the reasons for a failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub reasons: Vec<String>,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self { is_valid: true, reasons: vec![] }
    }

    pub fn invalid(reasons: Vec<String>) -> Self {
        Self { is_valid: false, reasons }
    }

    /// The reasons joined into a single line, for audit records.
    pub fn reasons_text(&self) -> String {
        self.reasons.join("; ")
    }
}

/// Checks a bulk fulfilment against the protocol rules before anything is persisted.
pub trait FulfilmentValidator {
    fn validate_bulk_fulfilment(&self, payload: &BulkFulfilPayload, headers: &Headers) -> ValidationResult;
}

/// The standard set of structural rules for bulk fulfilments.
#[derive(Debug, Clone)]
pub struct BulkFulfilValidator {
    id_pattern: Regex,
    error_code_pattern: Regex,
    clock_skew: Duration,
}

impl Default for BulkFulfilValidator {
    fn default() -> Self {
        Self::new(Duration::seconds(30))
    }
}

impl BulkFulfilValidator {
    /// Creates a validator that tolerates `clock_skew` between the payee's clock and the switch's when checking the
    /// completion timestamp.
    pub fn new(clock_skew: Duration) -> Self {
        // Literal patterns. These cannot fail to compile.
        let id_pattern = Regex::new(&format!("^[A-Za-z0-9_-]{{1,{MAX_ID_LENGTH}}}$")).unwrap();
        let error_code_pattern = Regex::new(r"^[1-9]\d{3}$").unwrap();
        Self { id_pattern, error_code_pattern, clock_skew }
    }
}

impl FulfilmentValidator for BulkFulfilValidator {
    fn validate_bulk_fulfilment(&self, payload: &BulkFulfilPayload, headers: &Headers) -> ValidationResult {
        let mut reasons = vec![];
        if !self.id_pattern.is_match(payload.bulk_transfer_id.as_str()) {
            reasons.push(format!("Invalid bulkTransferId: '{}'", payload.bulk_transfer_id));
        }
        match headers.source() {
            Some(s) if !s.is_empty() => {},
            _ => reasons.push("FSPIOP-Source header is missing".to_string()),
        }
        match headers.destination() {
            Some(s) if !s.is_empty() => {},
            _ => reasons.push("FSPIOP-Destination header is missing".to_string()),
        }
        if let Some(ts) = payload.completed_timestamp {
            if ts > Utc::now() + self.clock_skew {
                reasons.push(format!("completedTimestamp {ts} is in the future"));
            }
        }
        if let Some(state) = payload.bulk_transfer_state {
            if !matches!(state, BulkTransferState::Completed | BulkTransferState::Rejected) {
                reasons.push(format!("bulkTransferState {state} cannot be declared by the payee"));
            }
        }
        let extensions = payload.extension_list.iter().flat_map(|l| l.extension.iter());
        for extension in extensions.filter(|e| !e.is_storable()) {
            let key: String = extension.key.chars().take(32).collect();
            reasons.push(format!("Extension '{key}' exceeds the allowed key or value length"));
        }
        let mut seen = HashSet::new();
        for individual in &payload.individual_transfer_results {
            let id = individual.transfer_id.as_str();
            if !self.id_pattern.is_match(id) {
                reasons.push(format!("Invalid transferId: '{id}'"));
            }
            if !seen.insert(id) {
                reasons.push(format!("Transfer {id} appears more than once"));
            }
            if let Some(err) = &individual.error_information {
                if !self.error_code_pattern.is_match(&err.error_code) {
                    reasons.push(format!("Transfer {id} has an invalid error code '{}'", err.error_code));
                }
            }
        }
        if reasons.is_empty() {
            ValidationResult::valid()
        } else {
            ValidationResult::invalid(reasons)
        }
    }
}
