//! Authorization Engine
//!
//! Drives the code challenge state machine for transfer requests.
//! Each operation is load → apply on the aggregate → CAS save → side effects.
//! Delivery happens only after the transition is persisted and never rolls it back.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::clock::{Clock, SystemClock};
use super::error::AuthorizationError;
use super::notifier::{DeliveryContext, NotificationGateway};
use super::store::TransferStore;
use super::types::{
    AttemptLog, AttemptResult, ClientMetadata, CodeDescriptor, NewTransferRequest,
    TransferReference, TransferRequest, Transition,
};
use crate::config::AuthorizationConfig;

/// Reference draws before giving up on collisions
const MAX_REFERENCE_ATTEMPTS: usize = 3;

pub struct AuthorizationEngine {
    store: Arc<dyn TransferStore>,
    gateway: Arc<dyn NotificationGateway>,
    clock: Arc<dyn Clock>,
    config: AuthorizationConfig,
}

impl AuthorizationEngine {
    pub fn new(
        store: Arc<dyn TransferStore>,
        gateway: Arc<dyn NotificationGateway>,
        clock: Arc<dyn Clock>,
        config: AuthorizationConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            clock,
            config,
        }
    }

    pub fn with_system_clock(
        store: Arc<dyn TransferStore>,
        gateway: Arc<dyn NotificationGateway>,
        config: AuthorizationConfig,
    ) -> Self {
        Self::new(store, gateway, Arc::new(SystemClock), config)
    }

    pub fn config(&self) -> &AuthorizationConfig {
        &self.config
    }

    /// Create a request, issue code #1 and hand it to the gateway
    pub async fn create_transfer_request(
        &self,
        new: NewTransferRequest,
    ) -> Result<TransferRequest, AuthorizationError> {
        if let Err(e) = new.validate(self.config.description_max_len) {
            warn!(error = %e, "Rejected transfer request");
            return Err(e);
        }

        let now = self.clock.now();
        for _ in 0..MAX_REFERENCE_ATTEMPTS {
            let request = TransferRequest::open(
                TransferReference::generate(),
                new.clone(),
                self.config.code_sequence.clone(),
                now,
                self.config.request_ttl(),
            )?;

            match self.store.insert(&request).await {
                Ok(()) => {
                    info!(
                        reference = %request.reference(),
                        amount = %request.amount(),
                        total_codes = request.total_codes(),
                        expires_at = %request.expires_at(),
                        "Transfer request created"
                    );
                    self.deliver(&request, 1).await;
                    return Ok(request);
                }
                Err(AuthorizationError::DuplicateReference) => {
                    warn!("Transfer reference collision, drawing a new one");
                }
                Err(e) => {
                    error!(error = %e, "Failed to persist transfer request");
                    return Err(e);
                }
            }
        }

        error!("Could not draw a unique transfer reference");
        Err(AuthorizationError::DuplicateReference)
    }

    /// Validate one code submission against the active code
    pub async fn submit_code(
        &self,
        reference: &TransferReference,
        attempted_value: &str,
        client: &ClientMetadata,
    ) -> Result<AttemptResult, AuthorizationError> {
        let policy = self.config.code_policy();

        let (request, (mut result, issued)) = self
            .update_with_retry(reference, |request, now| {
                match request.apply_attempt(attempted_value, client, now, &policy)? {
                    Transition::Unchanged(result) => Ok(((result, None), false)),
                    Transition::Changed { result, issued } => Ok(((result, issued), true)),
                }
            })
            .await
            .inspect_err(|e| log_hard_failure("submit_code", reference, e))?;

        if let (Some(code_order), AttemptResult::AdvanceToNextCode { notified, .. }) =
            (issued, &mut result)
        {
            *notified = self.deliver(&request, code_order).await;
        }

        match &result {
            AttemptResult::Rejected { attempts_remaining } => info!(
                reference = %reference,
                code_order = request.current_code_index(),
                attempts_remaining,
                "Verification code rejected"
            ),
            AttemptResult::AdvanceToNextCode {
                code_order,
                notified,
                ..
            } => info!(
                reference = %reference,
                next_code_order = code_order,
                notified,
                "Verification code accepted, next code issued"
            ),
            AttemptResult::FullyAuthorized { executed_at } => info!(
                reference = %reference,
                executed_at = %executed_at,
                "Transfer fully authorized"
            ),
            AttemptResult::CodeLockedOut => warn!(
                reference = %reference,
                failed_attempts_total = request.failed_attempts_total(),
                "Transfer blocked after too many failed attempts"
            ),
            AttemptResult::RequestExpired => warn!(
                reference = %reference,
                expires_at = %request.expires_at(),
                "Submission against expired transfer request"
            ),
        }

        Ok(result)
    }

    /// Operator cancel. Only pending/executing requests can be cancelled.
    ///
    /// A request whose window already lapsed is committed as expired and the
    /// cancel fails with `InvalidState`.
    pub async fn cancel(&self, reference: &TransferReference) -> Result<(), AuthorizationError> {
        let (request, cancelled) = self
            .update_with_retry(reference, |request, now| {
                if request.expire_if_due(now) {
                    return Ok((false, true));
                }
                request.cancel(now)?;
                Ok((true, true))
            })
            .await
            .inspect_err(|e| log_hard_failure("cancel", reference, e))?;

        if !cancelled {
            let e = AuthorizationError::InvalidState {
                reference: reference.to_string(),
                status: request.status(),
            };
            log_hard_failure("cancel", reference, &e);
            return Err(e);
        }

        info!(reference = %reference, "Transfer request cancelled");
        Ok(())
    }

    /// Expire every open request whose window lapsed before `now`
    pub async fn expire_stale_requests(
        &self,
        now: DateTime<Utc>,
    ) -> Result<usize, AuthorizationError> {
        self.expire_stale_batch(now, usize::MAX).await
    }

    /// Bounded sweep pass. Per-request failures are logged and skipped.
    pub async fn expire_stale_batch(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<usize, AuthorizationError> {
        let candidates = self.store.find_expirable(now, limit).await?;
        if candidates.is_empty() {
            debug!("No stale transfer requests found");
            return Ok(0);
        }

        let mut expired = 0;
        for candidate in &candidates {
            let reference = candidate.reference();
            // Re-checked on the fresh copy: a concurrent submission may have closed it
            let outcome = self
                .update_with_retry(reference, |request, _| {
                    let changed = request.expire_if_due(now);
                    Ok((changed, changed))
                })
                .await;

            match outcome {
                Ok((_, true)) => {
                    debug!(reference = %reference, "Transfer request expired");
                    expired += 1;
                }
                Ok((request, false)) => debug!(
                    reference = %reference,
                    status = %request.status(),
                    "Transfer request closed before sweep reached it"
                ),
                Err(e) => error!(
                    reference = %reference,
                    error = %e,
                    "Failed to expire transfer request"
                ),
            }
        }

        if expired > 0 {
            info!(count = expired, "Expired stale transfer requests");
        }
        Ok(expired)
    }

    /// Destroy expired and cancelled aggregates that closed before `closed_before`
    pub async fn purge_closed_requests(
        &self,
        closed_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<usize, AuthorizationError> {
        let purged = self
            .store
            .purge_closed(closed_before, limit)
            .await
            .inspect_err(|e| error!(error = %e, "Failed to purge closed transfer requests"))?;
        if purged > 0 {
            info!(count = purged, closed_before = %closed_before, "Purged closed transfer requests");
        }
        Ok(purged)
    }

    pub async fn get_transfer_request(
        &self,
        reference: &TransferReference,
    ) -> Result<TransferRequest, AuthorizationError> {
        self.load(reference)
            .await
            .inspect_err(|e| log_hard_failure("get_transfer_request", reference, e))
    }

    /// Metadata of the code the user should be prompted for, never its value.
    /// `None` once the request is closed, including a lapsed window.
    pub async fn get_current_code(
        &self,
        reference: &TransferReference,
    ) -> Result<Option<CodeDescriptor>, AuthorizationError> {
        let request = self
            .refresh_expiry(reference)
            .await
            .inspect_err(|e| log_hard_failure("get_current_code", reference, e))?;
        if !request.status().is_open() {
            return Ok(None);
        }
        Ok(request
            .active_code()
            .map(|c| c.descriptor(self.config.max_failed_attempts)))
    }

    /// Side-effect free re-check of the whole sequence, for crash recovery
    pub async fn is_fully_validated(
        &self,
        reference: &TransferReference,
    ) -> Result<bool, AuthorizationError> {
        Ok(self
            .get_transfer_request(reference)
            .await?
            .is_fully_validated())
    }

    /// Audit trail ordered by submission sequence
    pub async fn attempt_history(
        &self,
        reference: &TransferReference,
    ) -> Result<Vec<AttemptLog>, AuthorizationError> {
        Ok(self
            .get_transfer_request(reference)
            .await?
            .attempt_history())
    }

    /// Re-deliver the active code. Returns the gateway's verdict.
    pub async fn resend_current_code(
        &self,
        reference: &TransferReference,
    ) -> Result<bool, AuthorizationError> {
        let request = self
            .refresh_expiry(reference)
            .await
            .inspect_err(|e| log_hard_failure("resend_current_code", reference, e))?;
        if !request.status().is_open() {
            let e = AuthorizationError::InvalidState {
                reference: reference.to_string(),
                status: request.status(),
            };
            log_hard_failure("resend_current_code", reference, &e);
            return Err(e);
        }
        let Some(code_order) = request.active_code().map(|c| c.code_order()) else {
            let e = AuthorizationError::NoActiveCode(reference.to_string());
            log_hard_failure("resend_current_code", reference, &e);
            return Err(e);
        };
        Ok(self.deliver(&request, code_order).await)
    }

    /// Current copy with a lapsed window committed as expired
    async fn refresh_expiry(
        &self,
        reference: &TransferReference,
    ) -> Result<TransferRequest, AuthorizationError> {
        let (request, expired) = self
            .update_with_retry(reference, |request, now| {
                let changed = request.expire_if_due(now);
                Ok((changed, changed))
            })
            .await?;
        if expired {
            info!(
                reference = %reference,
                expires_at = %request.expires_at(),
                "Transfer request expired on access"
            );
        }
        Ok(request)
    }

    async fn load(
        &self,
        reference: &TransferReference,
    ) -> Result<TransferRequest, AuthorizationError> {
        self.store
            .get(reference)
            .await?
            .ok_or_else(|| AuthorizationError::NotFound(reference.to_string()))
    }

    /// Load, apply, CAS-save; reload and re-apply on version conflict.
    ///
    /// `apply` returns its output plus whether the aggregate changed.
    /// Unchanged aggregates are not written.
    async fn update_with_retry<T, F>(
        &self,
        reference: &TransferReference,
        mut apply: F,
    ) -> Result<(TransferRequest, T), AuthorizationError>
    where
        T: Send,
        F: FnMut(&mut TransferRequest, DateTime<Utc>) -> Result<(T, bool), AuthorizationError>
            + Send,
    {
        for attempt in 0..=self.config.max_cas_retries {
            let mut request = self.load(reference).await?;
            let now = self.clock.now();
            let (output, changed) = apply(&mut request, now)?;
            if !changed {
                return Ok((request, output));
            }
            if self.store.save_if_version(&request).await? {
                request.increment_version();
                return Ok((request, output));
            }
            debug!(
                reference = %reference,
                attempt,
                "Version conflict, reloading transfer request"
            );
        }

        Err(AuthorizationError::ConcurrentModification(
            reference.to_string(),
        ))
    }

    /// Hand a code to the gateway. Failure is logged, never propagated.
    async fn deliver(&self, request: &TransferRequest, code_order: u32) -> bool {
        let Some(code) = request.code_by_order(code_order) else {
            error!(
                reference = %request.reference(),
                code_order,
                "Cannot deliver unknown code"
            );
            return false;
        };

        let context = DeliveryContext {
            reference: request.reference().to_string(),
            code_order,
            total_codes: request.total_codes(),
            destination_account: request.destination_account().to_string(),
            amount: request.amount().to_string(),
            extra: Default::default(),
        };

        let delivered = self
            .gateway
            .deliver_code(
                request.recipient(),
                code.code_value(),
                code.code_name(),
                &context,
            )
            .await;

        if delivered {
            debug!(
                reference = %request.reference(),
                code_order,
                gateway = self.gateway.name(),
                "Verification code handed to gateway"
            );
        } else {
            warn!(
                reference = %request.reference(),
                code_order,
                gateway = self.gateway.name(),
                "Verification code delivery failed, caller must resend"
            );
        }
        delivered
    }
}

fn log_hard_failure(operation: &str, reference: &TransferReference, e: &AuthorizationError) {
    if e.is_integrity_failure() {
        error!(
            operation,
            reference = %reference,
            code = e.code(),
            "INTEGRITY: {}", e
        );
    } else {
        error!(
            operation,
            reference = %reference,
            code = e.code(),
            error = %e,
            "Authorization operation failed"
        );
    }
}
