//! Failure classification and retry policy. Every outward provider call goes
//! through `call_with_retry`, which turns wire errors into one of three
//! categories and applies the matching recovery action.

use std::fmt;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use deckgen_providers::ProviderError;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// Network blip, rate limit, timeout. Worth retrying with backoff.
    Transient,
    /// Provider answered but the content is malformed or partial.
    Degraded,
    /// Auth failure, permanent quota exhaustion, invalid request shape.
    Fatal,
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureCategory::Transient => "transient",
            FailureCategory::Degraded => "degraded",
            FailureCategory::Fatal => "fatal",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Analysis,
    OutlinePlan,
    ImageRender,
    AnchorExtract,
    CacheMaintenance,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationKind::Analysis => "analysis",
            OperationKind::OutlinePlan => "outline_plan",
            OperationKind::ImageRender => "image_render",
            OperationKind::AnchorExtract => "anchor_extract",
            OperationKind::CacheMaintenance => "cache_maintenance",
        };
        write!(f, "{s}")
    }
}

/// What the policy decided to do after a classified failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecoveryAction {
    RetryWithBackoff { delay_ms: u64 },
    RetryOnce,
    Fallback,
    Abort,
}

/// One classified failure, kept for the run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub operation: OperationKind,
    pub attempts: u32,
    pub category: FailureCategory,
    pub action: RecoveryAction,
    pub message: String,
}

impl fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} attempt {}: {} ({:?}): {}",
            self.operation, self.attempts, self.category, self.action, self.message
        )
    }
}

/// Append-only record sink shared across a run.
#[derive(Debug, Default)]
pub struct FailureLog {
    records: Mutex<Vec<FailureRecord>>,
}

impl FailureLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, record: FailureRecord) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
    }

    pub fn snapshot(&self) -> Vec<FailureRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_empty(&self) -> bool {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }
}

/// Retry policy: attempt ceiling plus backoff bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 500,
            backoff_cap_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    /// Map a wire error onto a failure category.
    pub fn classify(error: &ProviderError) -> FailureCategory {
        match error {
            ProviderError::RateLimited { .. } => FailureCategory::Transient,
            ProviderError::Timeout { .. } => FailureCategory::Transient,
            ProviderError::Http(e) => {
                if e.is_decode() {
                    FailureCategory::Degraded
                } else {
                    FailureCategory::Transient
                }
            }
            ProviderError::Api { status, .. } if *status >= 500 => FailureCategory::Transient,
            ProviderError::Api { .. } => FailureCategory::Fatal,
            ProviderError::Auth { .. } => FailureCategory::Fatal,
            ProviderError::InvalidResponse(_) => FailureCategory::Degraded,
            ProviderError::Serialization(_) => FailureCategory::Degraded,
        }
    }

    /// Pure decision table from (category, attempt) to action. `attempt` is
    /// 1-based and counts the attempt that just failed.
    pub fn action(&self, category: FailureCategory, attempt: u32) -> RecoveryAction {
        match category {
            FailureCategory::Fatal => RecoveryAction::Abort,
            FailureCategory::Degraded => {
                if attempt < 2 {
                    RecoveryAction::RetryOnce
                } else {
                    RecoveryAction::Fallback
                }
            }
            FailureCategory::Transient => {
                if attempt < self.max_attempts {
                    RecoveryAction::RetryWithBackoff {
                        delay_ms: self.backoff_delay_ms(attempt),
                    }
                } else {
                    RecoveryAction::Fallback
                }
            }
        }
    }

    /// Exponential backoff with equal jitter, capped at `backoff_cap_ms`.
    pub fn backoff_delay_ms(&self, attempt: u32) -> u64 {
        let exp = self
            .backoff_base_ms
            .saturating_mul(1u64 << attempt.min(16));
        let capped = exp.min(self.backoff_cap_ms).max(1);
        let half = capped / 2;
        half + rand::thread_rng().gen_range(0..=capped - half)
    }
}

/// Result of a retried operation that did not abort: either the value, or
/// the record of the failure that forced a fallback.
#[derive(Debug)]
pub enum Attempted<T> {
    Ok(T),
    Fallback(FailureRecord),
}

/// Drive an operation under the retry policy. Transient failures retry with
/// backoff up to the ceiling, degraded failures retry once, fatal failures
/// abort with the originating record attached. Exhausting the ceiling is
/// reported as fatal but resolves to a fallback, never an abort.
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: OperationKind,
    log: &FailureLog,
    mut f: F,
) -> Result<Attempted<T>, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, ProviderError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let err = match f().await {
            Ok(value) => return Ok(Attempted::Ok(value)),
            Err(err) => err,
        };

        let category = RetryPolicy::classify(&err);
        let action = policy.action(category, attempt);
        // Ceiling exhaustion is reported as fatal even though the action
        // stays a fallback.
        let reported = if category == FailureCategory::Transient
            && action == RecoveryAction::Fallback
        {
            FailureCategory::Fatal
        } else {
            category
        };
        let record = FailureRecord {
            operation,
            attempts: attempt,
            category: reported,
            action,
            message: err.to_string(),
        };
        log.record(record.clone());

        match action {
            RecoveryAction::RetryWithBackoff { delay_ms } => {
                tracing::warn!(
                    %operation,
                    attempt,
                    delay_ms,
                    error = %err,
                    "transient failure, retrying"
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            RecoveryAction::RetryOnce => {
                tracing::warn!(%operation, attempt, error = %err, "degraded response, retrying once");
            }
            RecoveryAction::Fallback => {
                tracing::warn!(%operation, attempt, error = %err, "retries exhausted, falling back");
                return Ok(Attempted::Fallback(record));
            }
            RecoveryAction::Abort => {
                tracing::error!(%operation, attempt, error = %err, "fatal failure, aborting run");
                return Err(PipelineError::Provider {
                    record,
                    chain: log.snapshot(),
                });
            }
        }
    }
}

/// Bound one provider call to `limit`. An elapsed deadline surfaces as a
/// transient timeout so the retry policy handles it like any wire stall.
pub async fn bounded_call<T, Fut>(limit: Duration, call: Fut) -> std::result::Result<T, ProviderError>
where
    Fut: Future<Output = std::result::Result<T, ProviderError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout {
            timeout_ms: limit.as_millis() as u64,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff_base_ms: 1,
            backoff_cap_ms: 8,
        }
    }

    #[test]
    fn test_classify_categories() {
        let rate = ProviderError::RateLimited {
            retry_after_secs: Some(1),
        };
        assert_eq!(RetryPolicy::classify(&rate), FailureCategory::Transient);

        let timeout = ProviderError::Timeout { timeout_ms: 10 };
        assert_eq!(RetryPolicy::classify(&timeout), FailureCategory::Transient);

        let server = ProviderError::Api {
            status: 503,
            message: "unavailable".into(),
        };
        assert_eq!(RetryPolicy::classify(&server), FailureCategory::Transient);

        let bad_request = ProviderError::Api {
            status: 400,
            message: "bad shape".into(),
        };
        assert_eq!(RetryPolicy::classify(&bad_request), FailureCategory::Fatal);

        let auth = ProviderError::Auth {
            message: "key revoked".into(),
        };
        assert_eq!(RetryPolicy::classify(&auth), FailureCategory::Fatal);

        let malformed = ProviderError::InvalidResponse("not json".into());
        assert_eq!(RetryPolicy::classify(&malformed), FailureCategory::Degraded);
    }

    #[test]
    fn test_decision_table() {
        let p = policy();
        assert!(matches!(
            p.action(FailureCategory::Transient, 1),
            RecoveryAction::RetryWithBackoff { .. }
        ));
        assert!(matches!(
            p.action(FailureCategory::Transient, 2),
            RecoveryAction::RetryWithBackoff { .. }
        ));
        assert_eq!(
            p.action(FailureCategory::Transient, 3),
            RecoveryAction::Fallback
        );
        assert_eq!(
            p.action(FailureCategory::Degraded, 1),
            RecoveryAction::RetryOnce
        );
        assert_eq!(
            p.action(FailureCategory::Degraded, 2),
            RecoveryAction::Fallback
        );
        assert_eq!(p.action(FailureCategory::Fatal, 1), RecoveryAction::Abort);
        assert_eq!(p.action(FailureCategory::Fatal, 99), RecoveryAction::Abort);
    }

    #[test]
    fn test_backoff_bounds() {
        let p = RetryPolicy {
            max_attempts: 5,
            backoff_base_ms: 100,
            backoff_cap_ms: 2_000,
        };
        for attempt in 1..=10 {
            let d = p.backoff_delay_ms(attempt);
            assert!(d <= 2_000, "delay {d} exceeds cap");
            assert!(d >= 100, "delay {d} below half the first step");
        }
    }

    #[tokio::test]
    async fn test_retry_ceiling_reports_fatal_but_falls_back() {
        let p = policy();
        let log = FailureLog::new();
        let result: Result<Attempted<()>, _> =
            call_with_retry(&p, OperationKind::ImageRender, &log, || async {
                Err(ProviderError::RateLimited {
                    retry_after_secs: None,
                })
            })
            .await;
        let outcome = result.unwrap();
        match outcome {
            Attempted::Fallback(record) => {
                assert_eq!(record.attempts, 3);
                assert_eq!(record.category, FailureCategory::Fatal);
                assert_eq!(record.action, RecoveryAction::Fallback);
            }
            Attempted::Ok(_) => panic!("expected fallback"),
        }
        assert_eq!(log.snapshot().len(), 3);
    }

    #[tokio::test]
    async fn test_degraded_retries_once_then_succeeds() {
        let p = policy();
        let log = FailureLog::new();
        let calls = std::sync::atomic::AtomicU32::new(0);
        let result = call_with_retry(&p, OperationKind::OutlinePlan, &log, || {
            let n = calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(ProviderError::InvalidResponse("garbage".into()))
                } else {
                    Ok(42u32)
                }
            }
        })
        .await;
        match result.unwrap() {
            Attempted::Ok(v) => assert_eq!(v, 42),
            Attempted::Fallback(_) => panic!("expected success on second attempt"),
        }
        assert_eq!(log.snapshot().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_call_times_out_as_transient() {
        let result: std::result::Result<(), ProviderError> =
            bounded_call(Duration::from_millis(50), async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await;
        let err = result.unwrap_err();
        assert!(matches!(&err, ProviderError::Timeout { timeout_ms: 50 }));
        assert_eq!(RetryPolicy::classify(&err), FailureCategory::Transient);
    }

    #[tokio::test]
    async fn test_fatal_aborts_immediately() {
        let p = policy();
        let log = FailureLog::new();
        let result: Result<Attempted<()>, _> =
            call_with_retry(&p, OperationKind::Analysis, &log, || async {
                Err(ProviderError::Auth {
                    message: "bad key".into(),
                })
            })
            .await;
        match result {
            Err(PipelineError::Provider { record, chain }) => {
                assert_eq!(record.attempts, 1);
                assert_eq!(record.category, FailureCategory::Fatal);
                assert_eq!(chain.len(), 1);
            }
            _ => panic!("expected fatal provider error"),
        }
    }
}
