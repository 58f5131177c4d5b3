//! Integration Tests for the Authorization Engine
//!
//! Full flows against the in-memory store, a mock gateway and a manual clock.

#[cfg(test)]
mod integration_tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;
    use tokio::sync::Barrier;

    use crate::authorization::clock::{Clock, ManualClock};
    use crate::authorization::engine::AuthorizationEngine;
    use crate::authorization::error::AuthorizationError;
    use crate::authorization::notifier::MockGateway;
    use crate::authorization::state::{CodeStatus, TransferStatus};
    use crate::authorization::store::InMemoryTransferStore;
    use crate::authorization::types::{
        AttemptResult, ClientMetadata, NewTransferRequest, TransferReference,
    };
    use crate::config::AuthorizationConfig;

    struct TestHarness {
        engine: Arc<AuthorizationEngine>,
        gateway: Arc<MockGateway>,
        clock: Arc<ManualClock>,
    }

    impl TestHarness {
        fn new() -> Self {
            Self::with_config(AuthorizationConfig::default())
        }

        fn with_config(config: AuthorizationConfig) -> Self {
            let clock = Arc::new(ManualClock::new(
                Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
            ));
            let gateway = Arc::new(MockGateway::new());
            let engine = Arc::new(AuthorizationEngine::new(
                Arc::new(InMemoryTransferStore::new()),
                gateway.clone(),
                clock.clone(),
                config,
            ));
            Self {
                engine,
                gateway,
                clock,
            }
        }

        async fn create(&self) -> TransferReference {
            self.engine
                .create_transfer_request(NewTransferRequest {
                    recipient: "user@example.com".into(),
                    destination_account: "X".into(),
                    amount: dec!(150.00),
                    description: Some("invoice 42".into()),
                })
                .await
                .unwrap()
                .reference()
                .clone()
        }

        async fn submit(&self, reference: &TransferReference, value: &str) -> AttemptResult {
            self.engine
                .submit_code(reference, value, &ClientMetadata::new(Some("203.0.113.7"), None))
                .await
                .unwrap()
        }
    }

    // ========================================================================
    // Happy Path
    // ========================================================================

    /// Wrong, wrong, right, right
    #[tokio::test]
    async fn test_two_rejections_then_full_authorization() {
        let h = TestHarness::new();
        let reference = h.create().await;

        for remaining in [2, 1] {
            assert_eq!(
                h.submit(&reference, "AAAAAAAAA").await,
                AttemptResult::Rejected {
                    attempts_remaining: remaining
                }
            );
        }
        let request = h.engine.get_transfer_request(&reference).await.unwrap();
        assert_eq!(request.codes()[0].failed_attempts(), 2);
        assert_eq!(request.status(), TransferStatus::Pending);

        let first = h.gateway.last_code();
        assert_eq!(
            h.submit(&reference, &first).await,
            AttemptResult::AdvanceToNextCode {
                code_name: "Email code".into(),
                code_order: 2,
                notified: true,
            }
        );
        let request = h.engine.get_transfer_request(&reference).await.unwrap();
        assert_eq!(request.current_code_index(), 2);

        h.clock.advance(Duration::minutes(3));
        let second = h.gateway.last_code();
        let result = h.submit(&reference, &second).await;
        assert_eq!(
            result,
            AttemptResult::FullyAuthorized {
                executed_at: h.clock.now()
            }
        );

        let request = h.engine.get_transfer_request(&reference).await.unwrap();
        assert_eq!(request.status(), TransferStatus::Completed);
        assert!(request.executed_at().is_some());
        assert_eq!(request.codes().len(), 2);
        assert_eq!(request.failed_attempts_total(), 2);
        assert!(h.engine.is_fully_validated(&reference).await.unwrap());
        assert_eq!(h.engine.attempt_history(&reference).await.unwrap().len(), 4);
        // No third delivery
        assert_eq!(h.gateway.deliveries().len(), 2);
    }

    /// Codes arrive formatted for humans
    #[tokio::test]
    async fn test_lowercase_dashed_input_matches() {
        let h = TestHarness::new();
        let reference = h.create().await;
        let code = h.gateway.last_code();
        let human = format!(
            "{}-{}-{}",
            &code[0..3].to_lowercase(),
            &code[3..6].to_lowercase(),
            &code[6..9]
        );

        assert!(matches!(
            h.submit(&reference, &human).await,
            AttemptResult::AdvanceToNextCode { .. }
        ));
        let log = &h.engine.attempt_history(&reference).await.unwrap()[0];
        assert_eq!(log.attempted_value(), code);
        assert!(log.success());
        assert_eq!(log.ip_address(), Some("203.0.113.7"));
    }

    #[tokio::test]
    async fn test_single_code_sequence() {
        let h = TestHarness::with_config(AuthorizationConfig {
            code_sequence: vec!["Email code".into()],
            ..AuthorizationConfig::default()
        });
        let reference = h.create().await;
        let code = h.gateway.last_code();
        assert!(matches!(
            h.submit(&reference, &code).await,
            AttemptResult::FullyAuthorized { .. }
        ));
    }

    #[tokio::test]
    async fn test_is_fully_validated_is_idempotent() {
        let h = TestHarness::new();
        let reference = h.create().await;
        let before = h.engine.get_transfer_request(&reference).await.unwrap();

        for _ in 0..3 {
            assert!(!h.engine.is_fully_validated(&reference).await.unwrap());
        }
        let after = h.engine.get_transfer_request(&reference).await.unwrap();
        assert_eq!(before, after);
    }

    // ========================================================================
    // Lockout
    // ========================================================================

    #[tokio::test]
    async fn test_third_failure_blocks_regardless_of_client() {
        let h = TestHarness::new();
        let reference = h.create().await;
        let clients = [
            ClientMetadata::new(Some("198.51.100.1"), Some("Firefox")),
            ClientMetadata::new(Some("198.51.100.2"), Some("curl")),
            ClientMetadata::new(None, None),
        ];

        let mut results = Vec::new();
        for client in &clients {
            results.push(
                h.engine
                    .submit_code(&reference, "AAAAAAAAA", client)
                    .await
                    .unwrap(),
            );
        }
        assert_eq!(results[2], AttemptResult::CodeLockedOut);

        let request = h.engine.get_transfer_request(&reference).await.unwrap();
        assert_eq!(request.status(), TransferStatus::Blocked);
        assert!(request.is_account_blocked());
        // The lockout-triggering attempt is audited too
        assert_eq!(request.attempt_history().len(), 3);

        // Even the right code is never evaluated again
        let correct = h.gateway.last_code();
        assert_eq!(
            h.submit(&reference, &correct).await,
            AttemptResult::CodeLockedOut
        );
        let request = h.engine.get_transfer_request(&reference).await.unwrap();
        assert_eq!(request.attempt_history().len(), 3);
        assert_eq!(request.codes()[0].status(), CodeStatus::Expired);
        assert!(h.engine.get_current_code(&reference).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failures_do_not_carry_over_to_next_code() {
        let h = TestHarness::new();
        let reference = h.create().await;

        h.submit(&reference, "AAAAAAAAA").await;
        h.submit(&reference, "AAAAAAAAA").await;
        let first = h.gateway.last_code();
        h.submit(&reference, &first).await;

        assert_eq!(
            h.submit(&reference, "AAAAAAAAA").await,
            AttemptResult::Rejected {
                attempts_remaining: 2
            }
        );
        let request = h.engine.get_transfer_request(&reference).await.unwrap();
        assert_eq!(request.failed_attempts_total(), 3);
        assert_eq!(request.status(), TransferStatus::Executing);
    }

    /// Concurrent wrong submissions must not slip past the limit
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failures_lock_exactly_once() {
        let h = TestHarness::new();
        let reference = h.create().await;

        let mut handles = Vec::new();
        for i in 0..16 {
            let engine = h.engine.clone();
            let reference = reference.clone();
            handles.push(tokio::spawn(async move {
                let ip = format!("192.0.2.{}", i);
                engine
                    .submit_code(
                        &reference,
                        "AAAAAAAAA",
                        &ClientMetadata::new(Some(&ip), None),
                    )
                    .await
            }));
        }

        let mut rejected = 0;
        let mut locked = 0;
        for handle in handles {
            match handle.await.unwrap().unwrap() {
                AttemptResult::Rejected { .. } => rejected += 1,
                AttemptResult::CodeLockedOut => locked += 1,
                other => panic!("unexpected result: {:?}", other),
            }
        }
        assert_eq!(rejected, 2);
        assert_eq!(locked, 14);

        let request = h.engine.get_transfer_request(&reference).await.unwrap();
        assert_eq!(request.status(), TransferStatus::Blocked);
        assert_eq!(request.codes()[0].failed_attempts(), 3);
        let sequences: Vec<u64> = request
            .attempt_history()
            .iter()
            .map(|a| a.sequence())
            .collect();
        assert_eq!(sequences, vec![1, 2, 3]);
    }

    // ========================================================================
    // Expiry
    // ========================================================================

    #[tokio::test]
    async fn test_sweep_then_submit_returns_expired() {
        let h = TestHarness::new();
        let reference = h.create().await;
        let created = h
            .engine
            .get_transfer_request(&reference)
            .await
            .unwrap()
            .created_at();

        let swept = h
            .engine
            .expire_stale_requests(created + Duration::hours(25))
            .await
            .unwrap();
        assert_eq!(swept, 1);

        let code = h.gateway.last_code();
        assert_eq!(
            h.submit(&reference, &code).await,
            AttemptResult::RequestExpired
        );
        assert!(matches!(
            h.engine.cancel(&reference).await,
            Err(AuthorizationError::InvalidState {
                status: TransferStatus::Expired,
                ..
            })
        ));
    }

    /// Sweep racing submissions at the boundary: each request closes exactly once
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_sweep_races_in_flight_submissions() {
        let h = TestHarness::with_config(AuthorizationConfig {
            code_sequence: vec!["SMS code".into()],
            ..AuthorizationConfig::default()
        });

        let mut references = Vec::new();
        for _ in 0..24 {
            references.push(h.create().await);
        }
        let codes: HashMap<String, String> = h
            .gateway
            .deliveries()
            .into_iter()
            .map(|d| (d.context.reference, d.code_value))
            .collect();

        // Submissions still inside the window, sweep already past it
        let expires_at = h
            .engine
            .get_transfer_request(&references[0])
            .await
            .unwrap()
            .expires_at();
        h.clock.set(expires_at);
        let sweep_at = expires_at + Duration::seconds(1);

        let barrier = Arc::new(Barrier::new(references.len() + 1));

        let sweep = {
            let engine = h.engine.clone();
            let barrier = barrier.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                engine.expire_stale_requests(sweep_at).await
            })
        };

        let mut submissions = Vec::new();
        for (i, reference) in references.iter().enumerate() {
            let engine = h.engine.clone();
            let barrier = barrier.clone();
            let reference = reference.clone();
            let value = if i % 2 == 0 {
                codes[reference.as_str()].clone()
            } else {
                "AAAAAAAAA".to_string()
            };
            submissions.push(tokio::spawn(async move {
                barrier.wait().await;
                let result = engine
                    .submit_code(&reference, &value, &ClientMetadata::default())
                    .await;
                (reference, result)
            }));
        }

        let mut outcomes = Vec::new();
        for handle in submissions {
            outcomes.push(handle.await.unwrap());
        }
        let swept = sweep.await.unwrap().unwrap();

        let mut expired = 0;
        for (reference, result) in outcomes {
            let result = result.unwrap();
            let request = h.engine.get_transfer_request(&reference).await.unwrap();
            let logs = request.attempt_history();

            match request.status() {
                TransferStatus::Completed => {
                    assert!(matches!(result, AttemptResult::FullyAuthorized { .. }));
                    assert_eq!(logs.len(), 1);
                    assert!(logs[0].success());
                }
                TransferStatus::Expired => {
                    expired += 1;
                    assert_eq!(request.codes()[0].status(), CodeStatus::Expired);
                    match result {
                        // Sweep committed first: the submission was never evaluated
                        AttemptResult::RequestExpired => assert!(logs.is_empty()),
                        // Submission committed first, then the sweep closed it
                        AttemptResult::Rejected { .. } => {
                            assert_eq!(logs.len(), 1);
                            assert!(!logs[0].success());
                        }
                        other => panic!("unexpected result on expired request: {:?}", other),
                    }
                }
                other => panic!("request left in {:?}", other),
            }
        }
        assert_eq!(swept, expired);

        // A second pass finds nothing left to close
        assert_eq!(h.engine.expire_stale_requests(sweep_at).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sweep_skips_completed_requests() {
        let h = TestHarness::with_config(AuthorizationConfig {
            code_sequence: vec!["SMS code".into()],
            ..AuthorizationConfig::default()
        });
        let reference = h.create().await;
        let code = h.gateway.last_code();
        h.submit(&reference, &code).await;

        let swept = h
            .engine
            .expire_stale_requests(h.clock.now() + Duration::days(2))
            .await
            .unwrap();
        assert_eq!(swept, 0);
        let request = h.engine.get_transfer_request(&reference).await.unwrap();
        assert_eq!(request.status(), TransferStatus::Completed);
    }

    #[tokio::test]
    async fn test_validated_code_retention_window() {
        let h = TestHarness::new();
        let reference = h.create().await;
        let code = h.gateway.last_code();
        h.submit(&reference, &code).await;

        let request = h.engine.get_transfer_request(&reference).await.unwrap();
        let first = &request.codes()[0];
        let validated_at = first.validated_at().unwrap();
        assert_eq!(first.expires_at(), Some(validated_at + Duration::hours(6)));
        assert!(first.is_proof_stale(validated_at + Duration::hours(7)));
        // A stale proof does not reopen the code
        assert_eq!(first.status(), CodeStatus::Validated);
    }
}
