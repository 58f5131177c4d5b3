//! Authorization Core Types
//!
//! The [`TransferRequest`] aggregate owns its verification codes and their
//! attempt logs. All state changes go through crate-private methods driven by
//! the engine; public accessors are read-only.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::code::{codes_match, generate_code, normalize_code};
use super::error::AuthorizationError;
use super::state::{CodeStatus, TransferStatus};
use crate::money::Amount;

/// Opaque 20-character transfer reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferReference(String);

impl TransferReference {
    pub fn generate() -> Self {
        Self(super::code::generate_reference())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransferReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TransferReference {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TransferReference {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// ULID of a single attempt, sortable by creation time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttemptId(ulid::Ulid);

impl AttemptId {
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    pub fn inner(&self) -> ulid::Ulid {
        self.0
    }
}

impl Default for AttemptId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AttemptId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

/// Caller-side metadata captured in the audit trail
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientMetadata {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientMetadata {
    pub fn new(ip_address: Option<&str>, user_agent: Option<&str>) -> Self {
        Self {
            ip_address: ip_address.map(str::to_string),
            user_agent: user_agent.map(str::to_string),
        }
    }
}

/// Limits applied when evaluating a submission
#[derive(Debug, Clone, Copy)]
pub struct CodePolicy {
    pub max_failed_attempts: u32,
    pub code_retention: Duration,
}

// ============================================================================
// Attempt log
// ============================================================================

/// Immutable record of one submission. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptLog {
    attempt_id: AttemptId,
    reference: TransferReference,
    /// Monotonic per transfer request, starting at 1
    sequence: u64,
    code_order: u32,
    attempted_value: String,
    success: bool,
    ip_address: Option<String>,
    user_agent: Option<String>,
    attempted_at: DateTime<Utc>,
}

impl AttemptLog {
    pub fn attempt_id(&self) -> AttemptId {
        self.attempt_id
    }

    pub fn reference(&self) -> &TransferReference {
        &self.reference
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn code_order(&self) -> u32 {
        self.code_order
    }

    /// Normalized value as submitted, retained for fraud investigation
    pub fn attempted_value(&self) -> &str {
        &self.attempted_value
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn ip_address(&self) -> Option<&str> {
        self.ip_address.as_deref()
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    pub fn attempted_at(&self) -> DateTime<Utc> {
        self.attempted_at
    }
}

// ============================================================================
// Verification code
// ============================================================================

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationCode {
    code_order: u32,
    code_name: String,
    code_value: String,
    status: CodeStatus,
    failed_attempts: u32,
    attempts: Vec<AttemptLog>,
    created_at: DateTime<Utc>,
    validated_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for VerificationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationCode")
            .field("code_order", &self.code_order)
            .field("code_name", &self.code_name)
            .field("code_value", &"<redacted>")
            .field("status", &self.status)
            .field("failed_attempts", &self.failed_attempts)
            .field("attempts", &self.attempts.len())
            .field("created_at", &self.created_at)
            .field("validated_at", &self.validated_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl VerificationCode {
    pub(crate) fn issue(code_order: u32, code_name: String, now: DateTime<Utc>) -> Self {
        Self::with_value(code_order, code_name, &generate_code(), now)
    }

    /// Value is normalized on write
    pub(crate) fn with_value(
        code_order: u32,
        code_name: String,
        value: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            code_order,
            code_name,
            code_value: normalize_code(value),
            status: CodeStatus::Pending,
            failed_attempts: 0,
            attempts: Vec::new(),
            created_at: now,
            validated_at: None,
            expires_at: None,
        }
    }

    pub fn code_order(&self) -> u32 {
        self.code_order
    }

    pub fn code_name(&self) -> &str {
        &self.code_name
    }

    pub(crate) fn code_value(&self) -> &str {
        &self.code_value
    }

    pub fn status(&self) -> CodeStatus {
        self.status
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    pub fn attempts(&self) -> &[AttemptLog] {
        &self.attempts
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn validated_at(&self) -> Option<DateTime<Utc>> {
        self.validated_at
    }

    /// `None` until validated, then `validated_at + retention`
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn can_be_validated(&self, max_failed_attempts: u32) -> bool {
        self.status == CodeStatus::Pending && self.failed_attempts < max_failed_attempts
    }

    pub fn attempts_remaining(&self, max_failed_attempts: u32) -> u32 {
        max_failed_attempts.saturating_sub(self.failed_attempts)
    }

    /// Validation proof past its audit retention window. Never reopens the code.
    pub fn is_proof_stale(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expires_at) if now > expires_at)
    }

    fn record_failure(&mut self) -> u32 {
        self.failed_attempts += 1;
        self.failed_attempts
    }

    fn mark_validated(&mut self, now: DateTime<Utc>, retention: Duration) {
        self.status = CodeStatus::Validated;
        self.validated_at = Some(now);
        self.expires_at = Some(now + retention);
    }

    fn expire(&mut self) {
        if self.status == CodeStatus::Pending {
            self.status = CodeStatus::Expired;
        }
    }

    pub fn descriptor(&self, max_failed_attempts: u32) -> CodeDescriptor {
        CodeDescriptor {
            code_order: self.code_order,
            code_name: self.code_name.clone(),
            status: self.status,
            failed_attempts: self.failed_attempts,
            attempts_remaining: self.attempts_remaining(max_failed_attempts),
            created_at: self.created_at,
            validated_at: self.validated_at,
            expires_at: self.expires_at,
        }
    }
}

/// Code metadata safe to hand to the orchestrating layer (no value)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeDescriptor {
    pub code_order: u32,
    pub code_name: String,
    pub status: CodeStatus,
    pub failed_attempts: u32,
    pub attempts_remaining: u32,
    pub created_at: DateTime<Utc>,
    pub validated_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Attempt result
// ============================================================================

/// Expected outcome of a submission. Callers branch on this, not on errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptResult {
    /// Wrong code, the same code may be tried again
    Rejected { attempts_remaining: u32 },

    /// Code accepted; the next one was issued
    AdvanceToNextCode {
        code_name: String,
        code_order: u32,
        /// Whether the gateway accepted the delivery
        notified: bool,
    },

    /// Last code accepted, the transfer may execute
    FullyAuthorized { executed_at: DateTime<Utc> },

    /// Terminal lockout
    CodeLockedOut,

    /// Terminal: request window lapsed
    RequestExpired,
}

impl AttemptResult {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttemptResult::FullyAuthorized { .. }
                | AttemptResult::CodeLockedOut
                | AttemptResult::RequestExpired
        )
    }

    pub fn user_message(&self) -> String {
        match self {
            AttemptResult::Rejected { attempts_remaining } => format!(
                "The code you entered is incorrect. {} attempt(s) remaining.",
                attempts_remaining
            ),
            AttemptResult::AdvanceToNextCode { code_name, .. } => {
                format!("Code accepted. Please enter your {}.", code_name)
            }
            AttemptResult::FullyAuthorized { .. } => {
                "Your transfer has been authorized.".to_string()
            }
            AttemptResult::CodeLockedOut => {
                "Too many incorrect attempts. Your transfer has been blocked; please start a new transfer."
                    .to_string()
            }
            AttemptResult::RequestExpired => {
                "This transfer request has expired; please start a new transfer.".to_string()
            }
        }
    }
}

/// What the engine must persist after applying a submission
#[derive(Debug)]
pub(crate) enum Transition {
    /// Nothing changed; answer without writing
    Unchanged(AttemptResult),
    /// Aggregate mutated; persist, then deliver `issued` if set
    Changed {
        result: AttemptResult,
        issued: Option<u32>,
    },
}

// ============================================================================
// Transfer request aggregate
// ============================================================================

/// Input for creating a transfer request
#[derive(Debug, Clone)]
pub struct NewTransferRequest {
    /// Out-of-band address codes are delivered to
    pub recipient: String,
    pub destination_account: String,
    /// Raw caller input, checked against currency scale on create
    pub amount: Decimal,
    pub description: Option<String>,
}

impl NewTransferRequest {
    pub(crate) fn validate(&self, description_max_len: usize) -> Result<(), AuthorizationError> {
        Amount::new(self.amount)?;
        if self.recipient.trim().is_empty() {
            return Err(AuthorizationError::MissingRecipient);
        }
        if self.destination_account.trim().is_empty() {
            return Err(AuthorizationError::MissingDestination);
        }
        if let Some(description) = &self.description {
            let len = description.chars().count();
            if len > description_max_len {
                return Err(AuthorizationError::DescriptionTooLong {
                    len,
                    max: description_max_len,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    reference: TransferReference,
    recipient: String,
    destination_account: String,
    amount: Amount,
    description: Option<String>,
    status: TransferStatus,
    /// Code names in challenge order; its length is the sequence length
    code_plan: Vec<String>,
    codes: Vec<VerificationCode>,
    last_attempt_sequence: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    executed_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency version, bumped by the store on every save
    version: u64,
}

impl TransferRequest {
    /// Build a request with code #1 issued
    pub(crate) fn open(
        reference: TransferReference,
        new: NewTransferRequest,
        code_plan: Vec<String>,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Self, AuthorizationError> {
        let first_name = code_plan
            .first()
            .cloned()
            .ok_or(AuthorizationError::EmptyCodeSequence)?;

        Ok(Self {
            reference,
            recipient: new.recipient,
            destination_account: new.destination_account,
            amount: Amount::new(new.amount)?,
            description: new.description.filter(|d| !d.is_empty()),
            status: TransferStatus::Pending,
            code_plan,
            codes: vec![VerificationCode::issue(1, first_name, now)],
            last_attempt_sequence: 0,
            created_at: now,
            updated_at: now,
            expires_at: now + ttl,
            executed_at: None,
            version: 0,
        })
    }

    pub fn reference(&self) -> &TransferReference {
        &self.reference
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    pub fn destination_account(&self) -> &str {
        &self.destination_account
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    pub fn total_codes(&self) -> u32 {
        self.code_plan.len() as u32
    }

    pub fn codes(&self) -> &[VerificationCode] {
        &self.codes
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn executed_at(&self) -> Option<DateTime<Utc>> {
        self.executed_at
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// For store implementations: called once per successful save
    pub fn increment_version(&mut self) {
        self.version += 1;
    }

    /// The single pending code while the request is open
    pub fn active_code(&self) -> Option<&VerificationCode> {
        self.codes.iter().find(|c| c.status == CodeStatus::Pending)
    }

    /// Order of the active code, or of the latest code once none is pending
    pub fn current_code_index(&self) -> u32 {
        self.active_code()
            .or_else(|| self.codes.iter().max_by_key(|c| c.code_order))
            .map(|c| c.code_order)
            .unwrap_or(0)
    }

    /// Derived from the per-code counters
    pub fn failed_attempts_total(&self) -> u32 {
        self.codes.iter().map(|c| c.failed_attempts).sum()
    }

    pub fn is_account_blocked(&self) -> bool {
        self.status == TransferStatus::Blocked
    }

    pub fn is_fully_validated(&self) -> bool {
        // Codes are issued lazily: every planned code must exist and be validated
        self.codes.len() == self.code_plan.len()
            && self.codes.iter().all(|c| c.status == CodeStatus::Validated)
    }

    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Every attempt across all codes, in submission order
    pub fn attempt_history(&self) -> Vec<AttemptLog> {
        let mut history: Vec<AttemptLog> = self
            .codes
            .iter()
            .flat_map(|c| c.attempts.iter().cloned())
            .collect();
        history.sort_by_key(|a| a.sequence);
        history
    }

    fn invalid_state(&self) -> AuthorizationError {
        AuthorizationError::InvalidState {
            reference: self.reference.to_string(),
            status: self.status,
        }
    }

    fn close(&mut self, status: TransferStatus, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
        for code in &mut self.codes {
            code.expire();
        }
    }

    /// Evaluate one submission against the active code
    pub(crate) fn apply_attempt(
        &mut self,
        attempted_value: &str,
        client: &ClientMetadata,
        now: DateTime<Utc>,
        policy: &CodePolicy,
    ) -> Result<Transition, AuthorizationError> {
        match self.status {
            TransferStatus::Expired => return Ok(Transition::Unchanged(AttemptResult::RequestExpired)),
            TransferStatus::Blocked => return Ok(Transition::Unchanged(AttemptResult::CodeLockedOut)),
            TransferStatus::Completed | TransferStatus::Cancelled => {
                return Err(self.invalid_state());
            }
            TransferStatus::Pending | TransferStatus::Executing => {}
        }

        if self.is_past_expiry(now) {
            self.close(TransferStatus::Expired, now);
            return Ok(Transition::Changed {
                result: AttemptResult::RequestExpired,
                issued: None,
            });
        }

        let position = self
            .codes
            .iter()
            .position(|c| c.status == CodeStatus::Pending)
            .ok_or_else(|| AuthorizationError::NoActiveCode(self.reference.to_string()))?;

        if !self.codes[position].can_be_validated(policy.max_failed_attempts) {
            self.close(TransferStatus::Blocked, now);
            return Ok(Transition::Changed {
                result: AttemptResult::CodeLockedOut,
                issued: None,
            });
        }

        let normalized = normalize_code(attempted_value);
        let matched = codes_match(&normalized, self.codes[position].code_value());

        self.last_attempt_sequence += 1;
        let log = AttemptLog {
            attempt_id: AttemptId::new(),
            reference: self.reference.clone(),
            sequence: self.last_attempt_sequence,
            code_order: self.codes[position].code_order,
            attempted_value: normalized,
            success: matched,
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
            attempted_at: now,
        };
        self.codes[position].attempts.push(log);
        self.updated_at = now;

        if !matched {
            let failed = self.codes[position].record_failure();
            if failed >= policy.max_failed_attempts {
                self.close(TransferStatus::Blocked, now);
                return Ok(Transition::Changed {
                    result: AttemptResult::CodeLockedOut,
                    issued: None,
                });
            }
            return Ok(Transition::Changed {
                result: AttemptResult::Rejected {
                    attempts_remaining: policy.max_failed_attempts - failed,
                },
                issued: None,
            });
        }

        let validated_order = self.codes[position].code_order;
        self.codes[position].mark_validated(now, policy.code_retention);

        if validated_order >= self.total_codes() {
            self.status = TransferStatus::Completed;
            self.executed_at = Some(now);
            return Ok(Transition::Changed {
                result: AttemptResult::FullyAuthorized { executed_at: now },
                issued: None,
            });
        }

        let next_order = self
            .codes
            .iter()
            .map(|c| c.code_order)
            .max()
            .unwrap_or(0)
            + 1;
        let next_name = self.code_plan[(next_order - 1) as usize].clone();
        self.codes
            .push(VerificationCode::issue(next_order, next_name.clone(), now));
        self.status = TransferStatus::Executing;

        Ok(Transition::Changed {
            result: AttemptResult::AdvanceToNextCode {
                code_name: next_name,
                code_order: next_order,
                notified: false,
            },
            issued: Some(next_order),
        })
    }

    pub(crate) fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), AuthorizationError> {
        if !self.status.is_open() {
            return Err(self.invalid_state());
        }
        self.close(TransferStatus::Cancelled, now);
        Ok(())
    }

    /// Returns false when there was nothing to expire
    pub(crate) fn expire_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if !self.status.is_open() || !self.is_past_expiry(now) {
            return false;
        }
        self.close(TransferStatus::Expired, now);
        true
    }

    pub(crate) fn code_by_order(&self, code_order: u32) -> Option<&VerificationCode> {
        self.codes.iter().find(|c| c.code_order == code_order)
    }

    #[cfg(test)]
    pub(crate) fn active_code_value(&self) -> Option<String> {
        self.active_code().map(|c| c.code_value().to_string())
    }
}
