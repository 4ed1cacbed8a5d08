//! Per-page retry policy.
//!
//! Every page request goes through [`send_with_retry`]. The outcome of each
//! attempt is fed into an explicit [`RetryState`], which hands back the
//! updated state together with a [`Transition`]:
//!
//! | Outcome | Transition |
//! |---|---|
//! | 2xx | [`Transition::Accept`] |
//! | 429 | [`Transition::RateLimited`], attempt budget untouched |
//! | timeout, connection failure, 408, 500, 502, 503, 504 | [`Transition::Backoff`] until the budget runs out, then [`Transition::Exhausted`] |
//! | any other status | [`Transition::Fatal`] |
//!
//! Exhaustion is not an error: the caller gets [`Delivery::Abandoned`] and
//! decides how to degrade. Backoff grows with the attempt number and never
//! shrinks, so the policy is predictable under test.

use std::time::Duration;

use envseries_fetch_models::{BackoffKind, RetryConfig};

use crate::RequestError;
use crate::body_preview;
use crate::transport::{Transport, TransportError, TransportResponse};

/// Statuses retried with backoff.
const RETRYABLE_STATUSES: [u16; 5] = [408, 500, 502, 503, 504];

/// How a single HTTP status is treated by the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// 2xx
    Success,
    /// 429
    RateLimited,
    /// 408 and the transient 5xx family.
    Retryable,
    /// Everything else.
    Fatal,
}

/// Classifies an HTTP status code.
#[must_use]
pub fn classify_status(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        429 => StatusClass::RateLimited,
        s if RETRYABLE_STATUSES.contains(&s) => StatusClass::Retryable,
        _ => StatusClass::Fatal,
    }
}

/// What one attempt produced, as seen by the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// The provider answered.
    Status {
        /// HTTP status code.
        status: u16,
        /// Provider-advised wait, if any.
        retry_after: Option<Duration>,
    },
    /// The request timed out or the connection failed.
    TransientFailure,
}

/// The policy's decision after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Use the response.
    Accept,
    /// Wait, then try again without spending an attempt.
    RateLimited {
        /// How long to wait.
        wait: Duration,
    },
    /// Wait, then try again.
    Backoff {
        /// How long to wait.
        delay: Duration,
    },
    /// The attempt budget is spent; abandon the page.
    Exhausted,
    /// Do not retry; surface the failure.
    Fatal,
}

/// Retry bookkeeping for a single page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    /// Failed attempts so far. Never exceeds `max_attempts`.
    pub attempt: u32,
    /// Attempts allowed before the page is abandoned.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Last status observed, if any.
    pub last_status: Option<u16>,
    /// Last `Retry-After` hint observed, if any.
    pub last_backoff_hint: Option<Duration>,
    /// Rate-limit waits taken so far.
    pub rate_limit_waits: u32,
}

impl RetryState {
    /// Fresh state for a new page request. A `max_attempts` of zero is
    /// treated as one.
    #[must_use]
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            attempt: 0,
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay(),
            last_status: None,
            last_backoff_hint: None,
            rate_limit_waits: 0,
        }
    }

    /// Total requests issued so far for this page, assuming the next one
    /// has not been sent yet.
    #[must_use]
    pub const fn requests(&self) -> u32 {
        self.attempt + self.rate_limit_waits
    }

    /// Applies one observation, returning the next state and what to do.
    #[must_use]
    pub fn observe(mut self, config: &RetryConfig, observation: Observation) -> (Self, Transition) {
        let class = match observation {
            Observation::Status {
                status,
                retry_after,
            } => {
                self.last_status = Some(status);
                self.last_backoff_hint = retry_after;
                classify_status(status)
            }
            Observation::TransientFailure => {
                self.last_status = None;
                self.last_backoff_hint = None;
                StatusClass::Retryable
            }
        };

        let transition = match class {
            StatusClass::Success => Transition::Accept,
            StatusClass::Fatal => Transition::Fatal,
            StatusClass::RateLimited => {
                self.rate_limit_waits += 1;
                let advised = self.last_backoff_hint.unwrap_or_else(|| config.rate_limit_wait());
                Transition::RateLimited {
                    wait: advised + config.rate_limit_margin(),
                }
            }
            StatusClass::Retryable => {
                self.attempt += 1;
                if self.attempt >= self.max_attempts {
                    Transition::Exhausted
                } else {
                    Transition::Backoff {
                        delay: backoff_delay(config, self.attempt),
                    }
                }
            }
        };

        (self, transition)
    }
}

/// Delay before the retry that follows failed attempt number `attempt`
/// (1-based). Non-decreasing in `attempt` and capped at the configured
/// maximum.
#[must_use]
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let base = config.base_delay();
    let steps = attempt.max(1);
    let raw = match config.backoff {
        BackoffKind::Exponential => base.saturating_mul(1u32 << (steps - 1).min(31)),
        BackoffKind::Linear => base.saturating_mul(steps),
    };
    raw.min(config.max_delay().max(base))
}

/// Result of driving one page request through the policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// A 2xx response.
    Delivered(TransportResponse),
    /// The attempt budget ran out. The final state says why.
    Abandoned(RetryState),
}

/// Sends one request, retrying per `config` until it is accepted,
/// abandoned, or fails fatally.
///
/// # Errors
///
/// Returns [`RequestError::Status`] for non-retryable statuses and
/// [`RequestError::Transport`] for non-transient transport failures.
/// Running out of attempts is reported as [`Delivery::Abandoned`], not as
/// an error.
pub async fn send_with_retry(
    transport: &dyn Transport,
    endpoint: &str,
    query: &[(String, String)],
    config: &RetryConfig,
) -> Result<Delivery, RequestError> {
    let mut state = RetryState::new(config);

    loop {
        let (observation, response) = match transport.get(endpoint, query).await {
            Ok(response) => (
                Observation::Status {
                    status: response.status,
                    retry_after: response.retry_after,
                },
                Some(response),
            ),
            Err(TransportError::Transient(message)) => {
                log::warn!("  transient error on {endpoint}: {message}");
                (Observation::TransientFailure, None)
            }
            Err(TransportError::Fatal(message)) => {
                return Err(RequestError::Transport {
                    endpoint: endpoint.to_owned(),
                    message,
                });
            }
        };

        let (next, transition) = state.observe(config, observation);
        state = next;

        match (transition, response) {
            (Transition::Accept, Some(response)) => return Ok(Delivery::Delivered(response)),
            (Transition::Accept | Transition::Fatal, response) => {
                let body = response.map(|r| body_preview(&r.body)).unwrap_or_default();
                return Err(RequestError::Status {
                    endpoint: endpoint.to_owned(),
                    status: state.last_status.unwrap_or_default(),
                    body,
                });
            }
            (Transition::RateLimited { wait }, _) => {
                log::warn!("  HTTP 429 (rate limited) on {endpoint}, waiting {wait:?}");
                tokio::time::sleep(wait).await;
            }
            (Transition::Backoff { delay }, _) => {
                log::warn!(
                    "  retry {}/{} for {endpoint} in {delay:?} (last status: {:?})",
                    state.attempt,
                    state.max_attempts - 1,
                    state.last_status,
                );
                tokio::time::sleep(delay).await;
            }
            (Transition::Exhausted, _) => {
                log::warn!(
                    "Giving up on {endpoint} after {} attempts, {} requests (last status: {:?})",
                    state.attempt,
                    state.requests(),
                    state.last_status,
                );
                return Ok(Delivery::Abandoned(state));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::ReplayTransport;

    fn status(status: u16) -> Observation {
        Observation::Status {
            status,
            retry_after: None,
        }
    }

    #[test]
    fn classifies_statuses() {
        assert_eq!(classify_status(200), StatusClass::Success);
        assert_eq!(classify_status(204), StatusClass::Success);
        assert_eq!(classify_status(429), StatusClass::RateLimited);
        for s in [408, 500, 502, 503, 504] {
            assert_eq!(classify_status(s), StatusClass::Retryable, "{s}");
        }
        for s in [400, 401, 403, 404, 422, 501, 505, 302] {
            assert_eq!(classify_status(s), StatusClass::Fatal, "{s}");
        }
    }

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let cfg = RetryConfig::default();
        let delays: Vec<u64> = (1..=8)
            .map(|a| backoff_delay(&cfg, a).as_secs())
            .collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 32, 60, 60, 60]);
    }

    #[test]
    fn linear_backoff_grows_by_base() {
        let cfg = RetryConfig::default().with_backoff(BackoffKind::Linear);
        let delays: Vec<u64> = (1..=4)
            .map(|a| backoff_delay(&cfg, a).as_secs())
            .collect();
        assert_eq!(delays, vec![2, 4, 6, 8]);
    }

    #[test]
    fn backoff_is_monotonic_for_large_attempts() {
        let cfg = RetryConfig::default();
        let mut prev = Duration::ZERO;
        for attempt in 1..100 {
            let d = backoff_delay(&cfg, attempt);
            assert!(d >= prev);
            prev = d;
        }
    }

    #[test]
    fn rate_limit_does_not_spend_attempts() {
        let cfg = RetryConfig::default().with_max_attempts(2);
        let mut state = RetryState::new(&cfg);
        for _ in 0..10 {
            let (next, t) = state.observe(&cfg, status(429));
            state = next;
            assert_eq!(
                t,
                Transition::RateLimited {
                    wait: Duration::from_secs(21)
                }
            );
        }
        assert_eq!(state.attempt, 0);
        assert_eq!(state.rate_limit_waits, 10);
        assert_eq!(state.requests(), 10);
    }

    #[test]
    fn rate_limit_honours_retry_after_plus_margin() {
        let cfg = RetryConfig::default();
        let (_, t) = RetryState::new(&cfg).observe(
            &cfg,
            Observation::Status {
                status: 429,
                retry_after: Some(Duration::from_secs(5)),
            },
        );
        assert_eq!(
            t,
            Transition::RateLimited {
                wait: Duration::from_secs(6)
            }
        );
    }

    #[test]
    fn attempt_never_exceeds_max() {
        let cfg = RetryConfig::default().with_max_attempts(3);
        let mut state = RetryState::new(&cfg);
        let mut transitions = Vec::new();
        for _ in 0..3 {
            let (next, t) = state.observe(&cfg, Observation::TransientFailure);
            state = next;
            transitions.push(t);
        }
        assert_eq!(state.attempt, 3);
        assert_eq!(transitions[2], Transition::Exhausted);
        assert!(matches!(transitions[0], Transition::Backoff { .. }));
    }

    #[test]
    fn fatal_status_short_circuits() {
        let cfg = RetryConfig::default();
        let (state, t) = RetryState::new(&cfg).observe(&cfg, status(404));
        assert_eq!(t, Transition::Fatal);
        assert_eq!(state.attempt, 0);
        assert_eq!(state.last_status, Some(404));
    }

    #[tokio::test]
    async fn succeeds_after_two_retryable_failures() {
        let transport = ReplayTransport::new(vec![
            Ok(TransportResponse::new(503, "")),
            Err(TransportError::Transient("connection reset".to_owned())),
            Ok(TransportResponse::new(200, "{\"results\":[]}")),
        ]);
        let delivery = send_with_retry(&transport, "/data", &[], &RetryConfig::immediate(3))
            .await
            .unwrap();
        assert_eq!(
            delivery,
            Delivery::Delivered(TransportResponse::new(200, "{\"results\":[]}"))
        );
        assert_eq!(transport.request_count(), 3);
    }

    #[tokio::test]
    async fn abandons_after_max_attempts() {
        let transport =
            ReplayTransport::repeating(Ok(TransportResponse::new(502, "bad gateway")));
        let delivery = send_with_retry(&transport, "/data", &[], &RetryConfig::immediate(4))
            .await
            .unwrap();
        let Delivery::Abandoned(state) = delivery else {
            panic!("expected abandonment");
        };
        assert_eq!(state.attempt, 4);
        assert_eq!(state.last_status, Some(502));
        assert_eq!(state.requests(), 4);
        assert_eq!(transport.request_count(), 4);
    }

    #[tokio::test]
    async fn fatal_status_is_not_retried() {
        let transport = ReplayTransport::new(vec![Ok(TransportResponse::new(
            401,
            "{\"detail\":\"bad key\"}",
        ))]);
        let err = send_with_retry(&transport, "/data", &[], &RetryConfig::immediate(5))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RequestError::Status {
                endpoint: "/data".to_owned(),
                status: 401,
                body: "{\"detail\":\"bad key\"}".to_owned(),
            }
        );
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn rate_limits_are_waited_out_without_spending_budget() {
        let transport = ReplayTransport::new(vec![
            Ok(TransportResponse::new(429, "").with_retry_after(Duration::ZERO)),
            Ok(TransportResponse::new(429, "")),
            Ok(TransportResponse::new(500, "")),
            Ok(TransportResponse::new(429, "")),
            Ok(TransportResponse::new(200, "{}")),
        ]);
        let delivery = send_with_retry(&transport, "/data", &[], &RetryConfig::immediate(2))
            .await
            .unwrap();
        assert!(matches!(delivery, Delivery::Delivered(_)));
        assert_eq!(transport.request_count(), 5);
    }

    #[tokio::test]
    async fn fatal_transport_failure_propagates() {
        let transport =
            ReplayTransport::new(vec![Err(TransportError::Fatal("bad url".to_owned()))]);
        let err = send_with_retry(&transport, "/data", &[], &RetryConfig::immediate(3))
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::Transport { .. }));
    }
}
