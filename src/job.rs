//! Generic create, poll-until-terminal executor for job-based provider APIs.
//!
//! The poller only detects terminality through the caller's predicate.
//! Whether a terminal job succeeded is decided afterwards, once, with
//! [`PollableJob::ensure_success`].

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::GatewayError;

#[derive(Clone, Debug, PartialEq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_interval: Option<Duration>,
    pub timeout: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_interval: None,
            timeout: Duration::from_secs(600),
            max_attempts: None,
        }
    }
}

impl PollPolicy {
    pub const BACKOFF_FACTOR: f64 = 1.5;

    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            ..Self::default()
        }
    }

    pub fn with_max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval = Some(max_interval);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Delay to use after `current`. Fixed unless `max_interval` is set.
    pub fn next_interval(&self, current: Duration) -> Duration {
        match self.max_interval {
            Some(max_interval) => current.mul_f64(Self::BACKOFF_FACTOR).min(max_interval),
            None => current,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PollableJob<S, T> {
    pub id: String,
    pub status: S,
    pub payload: T,
}

impl<S, T> PollableJob<S, T> {
    pub fn new(id: impl Into<String>, status: S, payload: T) -> Self {
        Self {
            id: id.into(),
            status,
            payload,
        }
    }
}

impl<S, T> PollableJob<S, T>
where
    S: Display,
    T: Serialize,
{
    /// Turns a terminal-but-unsuccessful job into [`GatewayError::JobFailed`],
    /// keeping the last payload for diagnostics.
    pub fn ensure_success<F>(self, is_success: F) -> Result<Self, GatewayError>
    where
        F: FnOnce(&S) -> bool,
    {
        if is_success(&self.status) {
            return Ok(self);
        }

        let payload = serde_json::to_value(&self.payload).unwrap_or_else(|error| {
            warn!(job_id = %self.id, %error, "failed job payload is not serializable");
            Value::Null
        });

        Err(GatewayError::JobFailed {
            payload,
            status: self.status.to_string(),
            id: self.id,
        })
    }
}

/// Fires `create` once, then polls until the job is terminal. A job that is
/// already terminal when created is returned without polling.
pub async fn run_job<S, T, C, P, Fut, F>(
    create: C,
    poll: P,
    is_terminal: F,
    policy: &PollPolicy,
    cancel: &CancellationToken,
) -> Result<PollableJob<S, T>, GatewayError>
where
    C: Future<Output = Result<PollableJob<S, T>, GatewayError>>,
    P: FnMut(String) -> Fut,
    Fut: Future<Output = Result<PollableJob<S, T>, GatewayError>>,
    F: Fn(&S) -> bool,
{
    let job = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
        job = create => job?,
    };

    if is_terminal(&job.status) {
        debug!(job_id = %job.id, "job terminal on creation");
        return Ok(job);
    }

    poll_until_terminal(job, poll, is_terminal, policy, cancel).await
}

pub async fn poll_until_terminal<S, T, P, Fut, F>(
    job: PollableJob<S, T>,
    poll: P,
    is_terminal: F,
    policy: &PollPolicy,
    cancel: &CancellationToken,
) -> Result<PollableJob<S, T>, GatewayError>
where
    P: FnMut(String) -> Fut,
    Fut: Future<Output = Result<PollableJob<S, T>, GatewayError>>,
    F: Fn(&S) -> bool,
{
    poll_with_sleep(job, poll, is_terminal, policy, cancel, tokio::time::sleep).await
}

/// [`poll_until_terminal`] with an injectable sleep, so delays can be
/// observed without waiting on them.
pub async fn poll_with_sleep<S, T, P, Fut, F, Sleep, SleepFuture>(
    job: PollableJob<S, T>,
    mut poll: P,
    is_terminal: F,
    policy: &PollPolicy,
    cancel: &CancellationToken,
    mut sleep: Sleep,
) -> Result<PollableJob<S, T>, GatewayError>
where
    P: FnMut(String) -> Fut,
    Fut: Future<Output = Result<PollableJob<S, T>, GatewayError>>,
    F: Fn(&S) -> bool,
    Sleep: FnMut(Duration) -> SleepFuture,
    SleepFuture: Future<Output = ()>,
{
    let started = Instant::now();
    let deadline = started + policy.timeout;
    let mut interval = policy.interval;
    let mut attempts = 0_u32;
    let mut job = job;

    loop {
        if attempts > 0 {
            let delay = interval.min(deadline.saturating_duration_since(Instant::now()));

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
                _ = sleep(delay) => {}
            }

            interval = policy.next_interval(interval);

            if started.elapsed() >= policy.timeout {
                return Err(timed_out(&job.id, started, attempts));
            }
        }

        if cancel.is_cancelled() {
            return Err(GatewayError::Cancelled);
        }

        attempts += 1;
        debug!(job_id = %job.id, attempt = attempts, "polling job");

        // The deadline also bounds a poll call that is still in flight.
        job = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
            polled = tokio::time::timeout_at(deadline, poll(job.id.clone())) => match polled {
                Ok(polled) => polled?,
                Err(_) => return Err(timed_out(&job.id, started, attempts)),
            },
        };

        if is_terminal(&job.status) {
            info!(job_id = %job.id, attempts, "job reached terminal status");
            return Ok(job);
        }

        if policy
            .max_attempts
            .is_some_and(|max_attempts| attempts >= max_attempts)
        {
            return Err(timed_out(&job.id, started, attempts));
        }
    }
}

fn timed_out(job_id: &str, started: Instant, attempts: u32) -> GatewayError {
    let elapsed = started.elapsed();
    warn!(job_id, ?elapsed, attempts, "job polling timed out");
    GatewayError::Timeout { elapsed, attempts }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use super::*;

    fn scripted(statuses: &[&'static str]) -> Arc<Mutex<VecDeque<&'static str>>> {
        Arc::new(Mutex::new(statuses.iter().copied().collect()))
    }

    #[test]
    fn backoff_grows_by_half_and_caps() {
        let policy = PollPolicy::new(Duration::from_secs(1), Duration::from_secs(60))
            .with_max_interval(Duration::from_secs(5));

        let mut interval = policy.interval;
        let mut delays = vec![interval];
        for _ in 0..5 {
            interval = policy.next_interval(interval);
            delays.push(interval);
        }

        assert_eq!(
            delays,
            vec![
                Duration::from_millis(1_000),
                Duration::from_millis(1_500),
                Duration::from_millis(2_250),
                Duration::from_millis(3_375),
                Duration::from_secs(5),
                Duration::from_secs(5),
            ]
        );
    }

    #[test]
    fn interval_is_fixed_without_max_interval() {
        let policy = PollPolicy::new(Duration::from_millis(300), Duration::from_secs(1));
        assert_eq!(
            policy.next_interval(Duration::from_millis(300)),
            Duration::from_millis(300)
        );
    }

    #[test]
    fn ensure_success_keeps_payload_of_failed_job() {
        let job = PollableJob::new("job_7", "failed", json!({"error": "nsfw"}));
        let error = job
            .ensure_success(|status| *status == "succeeded")
            .expect_err("failed job");

        match error {
            GatewayError::JobFailed {
                id,
                status,
                payload,
            } => {
                assert_eq!(id, "job_7");
                assert_eq!(status, "failed");
                assert_eq!(payload, json!({"error": "nsfw"}));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unserializable_payload_of_failed_job_becomes_null() {
        let payload = std::collections::HashMap::from([((1_u8, 2_u8), 3_u8)]);
        let error = PollableJob::new("job_8", "failed", payload)
            .ensure_success(|status| *status == "succeeded")
            .expect_err("failed job");

        assert!(matches!(
            error,
            GatewayError::JobFailed { ref id, payload: Value::Null, .. } if id == "job_8"
        ));
    }

    #[tokio::test]
    async fn first_poll_is_not_delayed() {
        let sleeps = Arc::new(Mutex::new(Vec::new()));
        let policy = PollPolicy::new(Duration::from_secs(30), Duration::from_secs(600));

        let job = poll_with_sleep(
            PollableJob::new("job_1", "queued", ()),
            |id| async move { Ok(PollableJob::new(id, "completed", ())) },
            |status| *status == "completed",
            &policy,
            &CancellationToken::new(),
            {
                let sleeps = Arc::clone(&sleeps);
                move |delay| {
                    let sleeps = Arc::clone(&sleeps);
                    async move { sleeps.lock().expect("sleep lock").push(delay) }
                }
            },
        )
        .await
        .expect("job completes");

        assert_eq!(job.status, "completed");
        assert!(sleeps.lock().expect("sleep lock").is_empty());
    }

    #[tokio::test]
    async fn max_attempts_is_treated_as_timeout() {
        let statuses = scripted(&["processing", "processing", "processing", "completed"]);
        let policy = PollPolicy::new(Duration::from_millis(1), Duration::from_secs(600))
            .with_max_attempts(2);

        let result = poll_with_sleep(
            PollableJob::new("job_2", "queued", ()),
            {
                let statuses = Arc::clone(&statuses);
                move |id| {
                    let status = statuses.lock().expect("status lock").pop_front();
                    async move { Ok(PollableJob::new(id, status.unwrap_or("processing"), ())) }
                }
            },
            |status| *status == "completed",
            &policy,
            &CancellationToken::new(),
            |_| async {},
        )
        .await;

        assert!(matches!(result, Err(GatewayError::Timeout { attempts: 2, .. })));
        assert_eq!(statuses.lock().expect("status lock").len(), 2);
    }

    #[tokio::test]
    async fn poll_errors_are_propagated_without_retry() {
        let calls = Arc::new(Mutex::new(0_u32));
        let policy = PollPolicy::new(Duration::from_millis(1), Duration::from_secs(5));

        let result = poll_until_terminal(
            PollableJob::new("job_3", "queued", ()),
            {
                let calls = Arc::clone(&calls);
                move |_id| {
                    *calls.lock().expect("calls lock") += 1;
                    async move {
                        Err::<PollableJob<&str, ()>, _>(GatewayError::Internal(
                            "status endpoint down".to_string(),
                        ))
                    }
                }
            },
            |status| *status == "completed",
            &policy,
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(result, Err(GatewayError::Internal(_))));
        assert_eq!(*calls.lock().expect("calls lock"), 1);
    }

    #[tokio::test]
    async fn cancellation_interrupts_sleep() {
        let cancel = CancellationToken::new();
        let policy = PollPolicy::new(Duration::from_secs(3_600), Duration::from_secs(7_200));

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result = poll_until_terminal(
            PollableJob::new("job_4", "queued", ()),
            |id| async move { Ok(PollableJob::new(id, "processing", ())) },
            |status| *status == "completed",
            &policy,
            &cancel,
        )
        .await;

        assert!(matches!(result, Err(GatewayError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn cancellation_abandons_in_flight_poll() {
        let cancel = CancellationToken::new();
        let policy = PollPolicy::new(Duration::from_millis(10), Duration::from_secs(7_200));

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result = poll_until_terminal(
            PollableJob::new("job_9", "queued", ()),
            |_id| std::future::pending::<Result<PollableJob<&'static str, ()>, GatewayError>>(),
            |status| *status == "completed",
            &policy,
            &cancel,
        )
        .await;

        assert!(matches!(result, Err(GatewayError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn run_job_skips_polling_when_created_terminal() {
        let polls = Arc::new(Mutex::new(0_u32));
        let policy = PollPolicy::default();

        let job = run_job(
            async { Ok(PollableJob::new("job_5", "completed", json!({"url": "u"}))) },
            {
                let polls = Arc::clone(&polls);
                move |id| {
                    *polls.lock().expect("polls lock") += 1;
                    async move { Ok(PollableJob::new(id, "completed", Value::Null)) }
                }
            },
            |status| *status == "completed",
            &policy,
            &CancellationToken::new(),
        )
        .await
        .expect("job");

        assert_eq!(job.payload, json!({"url": "u"}));
        assert_eq!(*polls.lock().expect("polls lock"), 0);
    }
}
