use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use gateway_core::GatewayError;
use gateway_core::job::{PollPolicy, PollableJob, poll_until_terminal, poll_with_sleep};
use tokio_util::sync::CancellationToken;

type Recorder<T> = Arc<Mutex<Vec<T>>>;

fn scripted_poll(
    statuses: &'static [&'static str],
    calls: Recorder<String>,
) -> impl FnMut(String) -> std::future::Ready<Result<PollableJob<&'static str, ()>, GatewayError>> {
    let mut statuses = statuses.iter().copied().collect::<VecDeque<_>>();
    move |id| {
        calls.lock().expect("calls lock").push(id.clone());
        let status = statuses.pop_front().unwrap_or("processing");
        std::future::ready(Ok(PollableJob::new(id, status, ())))
    }
}

#[tokio::test]
async fn stops_at_first_terminal_status() {
    let calls: Recorder<String> = Arc::default();
    let policy = PollPolicy::new(Duration::from_millis(1), Duration::from_secs(5));

    let job = poll_until_terminal(
        PollableJob::new("job_1", "queued", ()),
        scripted_poll(&["queued", "processing", "completed"], Arc::clone(&calls)),
        |status| *status == "completed",
        &policy,
        &CancellationToken::new(),
    )
    .await
    .expect("job completes");

    assert_eq!(job.status, "completed");
    assert_eq!(
        *calls.lock().expect("calls lock"),
        vec!["job_1".to_string(); 3]
    );
}

#[tokio::test]
async fn times_out_close_to_deadline() {
    let calls: Recorder<String> = Arc::default();
    let policy = PollPolicy::new(Duration::from_millis(10), Duration::from_millis(50));

    let started = Instant::now();
    let result = poll_until_terminal(
        PollableJob::new("job_2", "queued", ()),
        scripted_poll(&[], Arc::clone(&calls)),
        |status| *status == "completed",
        &policy,
        &CancellationToken::new(),
    )
    .await;
    let elapsed = started.elapsed();

    match result {
        Err(GatewayError::Timeout { attempts, .. }) => assert!(attempts >= 1),
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(!calls.lock().expect("calls lock").is_empty());
    assert!(elapsed >= Duration::from_millis(50));
    assert!(elapsed < Duration::from_millis(500), "took {elapsed:?}");
}

#[tokio::test]
async fn slow_poll_is_cut_off_at_deadline() {
    let policy = PollPolicy::new(Duration::from_millis(10), Duration::from_millis(50));

    let started = Instant::now();
    let result = poll_until_terminal(
        PollableJob::new("job_5", "queued", ()),
        |id| async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(PollableJob::new(id, "processing", ()))
        },
        |status| *status == "completed",
        &policy,
        &CancellationToken::new(),
    )
    .await;
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(GatewayError::Timeout { attempts: 1, .. })));
    assert!(elapsed < Duration::from_millis(500), "took {elapsed:?}");
}

#[tokio::test]
async fn last_allowed_attempt_does_not_wait_for_interval() {
    let calls: Recorder<String> = Arc::default();
    let policy = PollPolicy::new(Duration::from_millis(800), Duration::from_secs(60))
        .with_max_attempts(1);

    let started = Instant::now();
    let result = poll_until_terminal(
        PollableJob::new("job_6", "queued", ()),
        scripted_poll(&["processing"], Arc::clone(&calls)),
        |status| *status == "completed",
        &policy,
        &CancellationToken::new(),
    )
    .await;
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(GatewayError::Timeout { attempts: 1, .. })));
    assert_eq!(calls.lock().expect("calls lock").len(), 1);
    assert!(elapsed < Duration::from_millis(400), "took {elapsed:?}");
}

#[tokio::test]
async fn delays_grow_by_half_up_to_cap() {
    let calls: Recorder<String> = Arc::default();
    let sleeps: Recorder<Duration> = Arc::default();
    let policy = PollPolicy::new(Duration::from_secs(1), Duration::from_secs(600))
        .with_max_interval(Duration::from_secs(5));

    let job = poll_with_sleep(
        PollableJob::new("job_3", "queued", ()),
        scripted_poll(
            &[
                "processing",
                "processing",
                "processing",
                "processing",
                "processing",
                "processing",
                "completed",
            ],
            Arc::clone(&calls),
        ),
        |status| *status == "completed",
        &policy,
        &CancellationToken::new(),
        {
            let sleeps = Arc::clone(&sleeps);
            move |delay| {
                sleeps.lock().expect("sleep lock").push(delay);
                std::future::ready(())
            }
        },
    )
    .await
    .expect("job completes");

    assert_eq!(job.status, "completed");
    assert_eq!(calls.lock().expect("calls lock").len(), 7);
    assert_eq!(
        *sleeps.lock().expect("sleep lock"),
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

#[tokio::test]
async fn terminal_failure_is_reported_after_polling() {
    let calls: Recorder<String> = Arc::default();
    let policy = PollPolicy::new(Duration::from_millis(1), Duration::from_secs(5));

    let job = poll_until_terminal(
        PollableJob::new("job_4", "queued", ()),
        scripted_poll(&["processing", "failed"], Arc::clone(&calls)),
        |status| matches!(*status, "completed" | "failed"),
        &policy,
        &CancellationToken::new(),
    )
    .await
    .expect("terminal job");

    let error = job
        .ensure_success(|status| *status == "completed")
        .expect_err("failed job");
    assert!(matches!(error, GatewayError::JobFailed { ref status, .. } if status == "failed"));
}
