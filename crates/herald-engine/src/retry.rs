//! Retry classification and the gated per-target call loop.
//!
//! | Remote answer | Disposition | Caller does |
//! |---------------|-------------|-------------|
//! | 429 | `RetryAfter(max(retry_after, 1)s)` | wait, re-attempt the same target |
//! | 401 / 403 / 404 | `Permanent(kind)` | record the failure, never retry |
//! | anything else | `Transient` (`Unknown`) | record the failure, no retry this run |

use std::fmt;
use std::time::Duration;

use herald_core::TransportError;
use serde::{Deserialize, Serialize};

use crate::rate_gate::RateGate;

/// Error kinds tallied per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Unauthorized,
    BotBlocked,
    NotFound,
    Unknown,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 4] = [
        ErrorKind::Unauthorized,
        ErrorKind::BotBlocked,
        ErrorKind::NotFound,
        ErrorKind::Unknown,
    ];

    pub(crate) fn index(self) -> usize {
        match self {
            ErrorKind::Unauthorized => 0,
            ErrorKind::BotBlocked => 1,
            ErrorKind::NotFound => 2,
            ErrorKind::Unknown => 3,
        }
    }

    /// Status code shown in audit summaries; `000` for unknown.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Unauthorized => "401",
            ErrorKind::BotBlocked => "403",
            ErrorKind::NotFound => "404",
            ErrorKind::Unknown => "000",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Unauthorized => write!(f, "Unauthorized"),
            ErrorKind::BotBlocked => write!(f, "Bot blocked"),
            ErrorKind::NotFound => write!(f, "Not found"),
            ErrorKind::Unknown => write!(f, "Unknown"),
        }
    }
}

/// What to do after a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    RetryAfter(Duration),
    Permanent(ErrorKind),
    Transient,
}

/// Classify a failed remote call.
pub fn classify(error: &TransportError) -> Disposition {
    match error {
        TransportError::Api {
            status: 429,
            retry_after,
            ..
        } => Disposition::RetryAfter(Duration::from_secs(retry_after.unwrap_or(1).max(1))),
        TransportError::Api { status: 401, .. } => Disposition::Permanent(ErrorKind::Unauthorized),
        TransportError::Api { status: 403, .. } => Disposition::Permanent(ErrorKind::BotBlocked),
        TransportError::Api { status: 404, .. } => Disposition::Permanent(ErrorKind::NotFound),
        _ => Disposition::Transient,
    }
}

/// Terminal failure of one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub kind: ErrorKind,
    pub permanent: bool,
    pub error: TransportError,
}

/// Run `call` behind the gate, re-attempting the same target on throttle.
///
/// Throttles never surface to the caller; they cost a wait and another gated
/// attempt. After `max_throttle_retries` consecutive throttles the target is
/// given up as `Unknown`.
pub async fn call_gated<T, F, Fut>(
    gate: &RateGate,
    max_throttle_retries: u32,
    label: &str,
    mut call: F,
) -> Result<T, ItemFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let mut throttles = 0u32;
    loop {
        gate.acquire().await;
        let error = match call().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        match classify(&error) {
            Disposition::RetryAfter(wait) => {
                throttles += 1;
                if throttles > max_throttle_retries {
                    tracing::error!(
                        "🧱 {label}: throttled {throttles} times in a row, giving up"
                    );
                    return Err(ItemFailure {
                        kind: ErrorKind::Unknown,
                        permanent: false,
                        error,
                    });
                }
                tracing::debug!("⏳ {label}: throttled, retrying in {}s", wait.as_secs());
                tokio::time::sleep(wait).await;
            }
            Disposition::Permanent(kind) => {
                tracing::warn!("⚠️ {label}: non-retryable error ({kind}): {error}");
                return Err(ItemFailure {
                    kind,
                    permanent: true,
                    error,
                });
            }
            Disposition::Transient => {
                tracing::error!("❌ {label}: unexpected error: {error}");
                return Err(ItemFailure {
                    kind: ErrorKind::Unknown,
                    permanent: false,
                    error,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn test_classify_statuses() {
        assert_eq!(
            classify(&TransportError::throttled(3)),
            Disposition::RetryAfter(Duration::from_secs(3))
        );
        assert_eq!(
            classify(&TransportError::api(401, "Unauthorized")),
            Disposition::Permanent(ErrorKind::Unauthorized)
        );
        assert_eq!(
            classify(&TransportError::api(403, "Forbidden: bot was blocked by the user")),
            Disposition::Permanent(ErrorKind::BotBlocked)
        );
        assert_eq!(
            classify(&TransportError::api(404, "Not Found")),
            Disposition::Permanent(ErrorKind::NotFound)
        );
        assert_eq!(classify(&TransportError::api(400, "Bad Request")), Disposition::Transient);
        assert_eq!(classify(&TransportError::Network("reset".into())), Disposition::Transient);
    }

    #[test]
    fn test_throttle_wait_is_at_least_one_second() {
        let zero = TransportError::Api {
            status: 429,
            description: "Too Many Requests".into(),
            retry_after: Some(0),
        };
        assert_eq!(classify(&zero), Disposition::RetryAfter(Duration::from_secs(1)));

        let missing = TransportError::Api {
            status: 429,
            description: "Too Many Requests".into(),
            retry_after: None,
        };
        assert_eq!(classify(&missing), Disposition::RetryAfter(Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_retries_same_target_after_hint() {
        let gate = RateGate::new(Duration::from_millis(10));
        let attempts = AtomicU32::new(0);
        let start = Instant::now();
        let stamps = std::sync::Mutex::new(Vec::new());

        let result = call_gated(&gate, 100, "user 1", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            stamps.lock().unwrap().push(start.elapsed());
            async move {
                if n == 0 {
                    Err(TransportError::throttled(3))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(1));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        let stamps = stamps.into_inner().unwrap();
        assert!(stamps[1] - stamps[0] >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_not_retried() {
        let gate = RateGate::new(Duration::ZERO);
        let attempts = AtomicU32::new(0);

        let result: Result<(), _> = call_gated(&gate, 100, "user 2", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(TransportError::api(403, "Forbidden")) }
        })
        .await;

        let failure = result.unwrap_err();
        assert_eq!(failure.kind, ErrorKind::BotBlocked);
        assert!(failure.permanent);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_ceiling_gives_up() {
        let gate = RateGate::new(Duration::ZERO);
        let attempts = AtomicU32::new(0);

        let result: Result<(), _> = call_gated(&gate, 2, "user 3", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(TransportError::throttled(1)) }
        })
        .await;

        let failure = result.unwrap_err();
        assert_eq!(failure.kind, ErrorKind::Unknown);
        assert!(!failure.permanent);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
