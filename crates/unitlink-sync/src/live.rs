//! # Live Caller
//!
//! One logical remote call: bounded attempts, each under the policy
//! timeout, with randomized exponential backoff between them.
//!
//! ## Attempt Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        LiveCaller::call()                               │
//! │                                                                         │
//! │   attempt 0 ──► timeout(transport.call) ──► Ok ─────────────► return    │
//! │       │                    │                                            │
//! │       │                    ├── Rejected / Protocol ─────────► return    │
//! │       │                    │   (never retried)                          │
//! │       │                    │                                            │
//! │       │                    └── Timeout / Network / 5xx                  │
//! │       │                              │                                  │
//! │       │        sleep(backoff.next_backoff())                            │
//! │       ▼                              │                                  │
//! │   attempt 1 ... attempt max_retries ◄┘                                  │
//! │                                                                         │
//! │   all attempts failed ──► Unreachable { attempts: max_retries + 1 }     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The caller never consults connectivity state and never falls back. Both
//! the dispatcher and the queue drain go through it, so a replayed write
//! gets exactly the same retry treatment as a fresh one.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use serde_json::Value;
use std::sync::Arc;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use unitlink_core::{Policy, RequestDescriptor};

use crate::error::{LinkError, LinkResult};
use crate::transport::Transport;

/// Spread applied to each retry delay.
const RANDOMIZATION_FACTOR: f64 = 0.5;

/// Executes live calls with timeout and retry.
#[derive(Clone)]
pub struct LiveCaller {
    policy: Arc<Policy>,
    transport: Arc<dyn Transport>,
}

impl LiveCaller {
    pub fn new(policy: Arc<Policy>, transport: Arc<dyn Transport>) -> Self {
        LiveCaller { policy, transport }
    }

    /// Runs up to `max_retries + 1` attempts.
    ///
    /// ## Errors
    /// - Any non-retryable transport error, as soon as it happens
    /// - [`LinkError::Unreachable`] once every attempt failed
    pub async fn call(&self, descriptor: &RequestDescriptor) -> LinkResult<Value> {
        let max_attempts = self.policy.max_attempts();
        let mut backoff = self.create_backoff();
        let per_attempt = self.policy.timeout();

        let mut last_error: Option<LinkError> = None;

        for attempt in 0..max_attempts {
            if attempt > 0 {
                let delay = backoff
                    .next_backoff()
                    .unwrap_or_else(|| self.policy.backoff().ceiling());
                debug!(
                    procedure = %descriptor.procedure,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    nominal_ms = self.policy.backoff().delay(attempt - 1).as_millis() as u64,
                    "Backing off before retry"
                );
                sleep(delay).await;
            }

            let outcome = match timeout(per_attempt, self.transport.call(descriptor)).await {
                Ok(result) => result,
                Err(_) => Err(LinkError::Timeout {
                    procedure: descriptor.procedure.clone(),
                    after_ms: per_attempt.as_millis() as u64,
                }),
            };

            match outcome {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(procedure = %descriptor.procedure, attempt, "Live call recovered");
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => {
                    debug!(procedure = %descriptor.procedure, error = %e, "Live call refused");
                    return Err(e);
                }
                Err(e) => {
                    debug!(
                        procedure = %descriptor.procedure,
                        attempt,
                        error = %e,
                        "Live attempt failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        let last_error = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempt made".to_string());

        warn!(
            procedure = %descriptor.procedure,
            attempts = max_attempts,
            last_error = %last_error,
            "Live call exhausted its retries"
        );

        Err(LinkError::Unreachable {
            procedure: descriptor.procedure.clone(),
            attempts: max_attempts,
            last_error,
        })
    }

    /// Creates the retry backoff for one logical call.
    ///
    /// Delays start at `backoffBase`, double per retry up to the ceiling, and
    /// are randomized by ±50%.
    fn create_backoff(&self) -> ExponentialBackoff {
        let schedule = self.policy.backoff();
        let mut backoff = ExponentialBackoff {
            current_interval: schedule.base(),
            initial_interval: schedule.base(),
            max_interval: schedule.ceiling(),
            multiplier: 2.0,
            randomization_factor: RANDOMIZATION_FACTOR,
            max_elapsed_time: None, // Bounded by max_attempts instead
            ..Default::default()
        };
        backoff.reset();
        backoff
    }
}

impl std::fmt::Debug for LiveCaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveCaller")
            .field("timeout", &self.policy.timeout())
            .field("max_attempts", &self.policy.max_attempts())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fast_policy, ScriptedTransport, Step};
    use serde_json::json;
    use std::time::Duration;

    fn caller(policy: Policy, transport: Arc<ScriptedTransport>) -> LiveCaller {
        LiveCaller::new(Arc::new(policy), transport)
    }

    #[tokio::test(start_paused = true)]
    async fn test_makes_exactly_n_plus_one_attempts() {
        for retries in [0i64, 1, 3] {
            let transport = ScriptedTransport::new();
            transport.set_fallback(Step::Network);
            let caller = caller(fast_policy(|b| b.retries = Some(retries)), transport.clone());

            let err = caller
                .call(&RequestDescriptor::read("getUnits", Value::Null))
                .await
                .unwrap_err();

            assert_eq!(transport.call_count() as i64, retries + 1);
            assert!(matches!(
                err,
                LinkError::Unreachable { attempts, .. } if attempts as i64 == retries + 1
            ));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_attempts_time_out() {
        let transport = ScriptedTransport::new();
        transport.set_fallback(Step::Hang);
        let caller = caller(fast_policy(|_| {}), transport.clone());

        let err = caller
            .call(&RequestDescriptor::read("getUnits", Value::Null))
            .await
            .unwrap_err();

        assert_eq!(transport.call_count(), 3);
        match err {
            LinkError::Unreachable { last_error, .. } => assert!(last_error.contains("timed out")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failure() {
        let transport = ScriptedTransport::new();
        transport.script([Step::Server(503), Step::Reply(json!({"total": 3}))]);
        let caller = caller(fast_policy(|_| {}), transport.clone());

        let value = caller
            .call(&RequestDescriptor::read("getUnitStats", Value::Null))
            .await
            .unwrap();

        assert_eq!(value, json!({"total": 3}));
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_is_not_retried() {
        let transport = ScriptedTransport::new();
        transport.set_fallback(Step::Reject(422));
        let caller = caller(fast_policy(|_| {}), transport.clone());

        let err = caller
            .call(&RequestDescriptor::write_with_key("updateUnit", json!({}), "k1"))
            .await
            .unwrap_err();

        assert!(matches!(err, LinkError::Rejected { status: 422, .. }));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backs_off_between_attempts() {
        let transport = ScriptedTransport::new();
        transport.script([Step::Network, Step::Reply(json!({}))]);
        let caller = caller(
            fast_policy(|b| b.backoff_base_ms = Some(400)),
            transport.clone(),
        );

        let started = tokio::time::Instant::now();
        caller
            .call(&RequestDescriptor::read("getProfile", Value::Null))
            .await
            .unwrap();

        // First retry waits base ± 50%.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(200), "{elapsed:?}");
        assert!(elapsed <= Duration::from_millis(650), "{elapsed:?}");
    }

    #[test]
    fn test_backoff_doubles_up_to_ceiling() {
        let caller = caller(
            fast_policy(|b| b.backoff_base_ms = Some(1_000)),
            ScriptedTransport::new(),
        );
        let mut backoff = caller.create_backoff();
        let ceiling = caller.policy.backoff().ceiling();

        let mut nominal = Duration::from_millis(1_000);
        for _ in 0..8 {
            let delay = backoff.next_backoff().unwrap();
            assert!(delay >= nominal.mul_f64(0.5), "{delay:?} < half of {nominal:?}");
            assert!(
                delay <= nominal.mul_f64(1.5) + Duration::from_millis(1),
                "{delay:?} > 1.5x {nominal:?}"
            );
            nominal = (nominal * 2).min(ceiling);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_attempt_carries_the_same_key() {
        let transport = ScriptedTransport::new();
        transport.script([Step::Network, Step::Server(502), Step::Reply(json!({}))]);
        let caller = caller(fast_policy(|_| {}), transport.clone());

        caller
            .call(&RequestDescriptor::write_with_key("createUnit", json!({"name": "A"}), "k-42"))
            .await
            .unwrap();

        assert_eq!(transport.keys(), vec!["k-42", "k-42", "k-42"]);
    }
}
