use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use hostman_provision::hostman_poller::{PollOutcome, poll_until, wait_until_gone, wait_until_ready};
use hostman_provision::{GoneCriterion, PollConfig, ReadinessStates, ReconcileError};
use tokio::time::Instant;

fn states() -> ReadinessStates {
    ReadinessStates::new(&["ready"], &["error"])
}

/// Read function replaying `statuses`, then repeating the last one.
fn scripted(
    statuses: &'static [&'static str],
) -> (Arc<AtomicUsize>, impl FnMut() -> std::future::Ready<hostman_provision::Result<String>>) {
    let reads = Arc::new(AtomicUsize::new(0));
    let counter = reads.clone();
    let read = move || {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        let status = statuses[n.min(statuses.len() - 1)];
        std::future::ready(Ok(status.to_string()))
    };
    (reads, read)
}

#[tokio::test(start_paused = true)]
async fn success_state_stops_further_reads() {
    let (reads, read) = scripted(&["creating", "creating", "ready", "creating"]);
    let started = Instant::now();

    let outcome = wait_until_ready(
        "cluster",
        "1",
        &states(),
        PollConfig::from_millis(10_000, 60_000),
        read,
        |s: &String| Some(s.clone()),
    )
    .await;

    assert_eq!(outcome.ok().as_deref(), Some("ready"));
    assert_eq!(reads.load(Ordering::SeqCst), 3);
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(20) && waited < Duration::from_secs(21), "{waited:?}");
}

#[tokio::test(start_paused = true)]
async fn failure_state_is_reported_without_retry() {
    let (reads, read) = scripted(&["error"]);

    let outcome = wait_until_ready(
        "cluster",
        "1",
        &states(),
        PollConfig::from_millis(10_000, 60_000),
        read,
        |s: &String| Some(s.clone()),
    )
    .await;

    assert!(matches!(
        outcome,
        Err(ReconcileError::ReadinessFailed { ref status, .. }) if status == "error"
    ));
    assert_eq!(reads.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn status_matching_ignores_case() {
    let (_, read) = scripted(&["Ready"]);

    let outcome = wait_until_ready(
        "cluster",
        "1",
        &states(),
        PollConfig::from_millis(10_000, 60_000),
        read,
        |s: &String| Some(s.clone()),
    )
    .await;

    assert!(outcome.is_ok());
}

#[tokio::test(start_paused = true)]
async fn deadline_produces_timeout_and_stops_polling() {
    let (reads, read) = scripted(&["creating"]);
    let started = Instant::now();

    let outcome = wait_until_ready(
        "cluster",
        "1",
        &states(),
        PollConfig::from_millis(10_000, 30_000),
        read,
        |s: &String| Some(s.clone()),
    )
    .await;

    assert!(matches!(outcome, Err(ReconcileError::Timeout { waited, .. }) if waited == Duration::from_secs(30)));
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(30) && waited < Duration::from_secs(31), "{waited:?}");
    let after_timeout = reads.load(Ordering::SeqCst);
    assert_eq!(after_timeout, 4);

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(reads.load(Ordering::SeqCst), after_timeout);
}

#[tokio::test(start_paused = true)]
async fn last_sleep_is_clamped_and_late_success_is_a_timeout() {
    let (reads, read) = scripted(&["creating", "creating", "creating", "ready"]);
    let started = Instant::now();

    let outcome = wait_until_ready(
        "cluster",
        "1",
        &states(),
        PollConfig::from_millis(10_000, 25_000),
        read,
        |s: &String| Some(s.clone()),
    )
    .await;

    assert!(matches!(outcome, Err(ref e) if e.is_timeout()), "{outcome:?}");
    assert_eq!(reads.load(Ordering::SeqCst), 4);
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(25) && waited < Duration::from_secs(26), "{waited:?}");
}

#[tokio::test(start_paused = true)]
async fn success_on_the_first_read_ignores_a_zero_deadline() {
    let (reads, read) = scripted(&["ready"]);

    let outcome = wait_until_ready(
        "cluster",
        "1",
        &states(),
        PollConfig::from_millis(10_000, 0),
        read,
        |s: &String| Some(s.clone()),
    )
    .await;

    assert_eq!(outcome.ok().as_deref(), Some("ready"));
    assert_eq!(reads.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn read_errors_abort_the_wait() {
    let outcome = poll_until("server", "1", "root password", PollConfig::from_millis(5_000, 60_000), || async {
        Err::<PollOutcome<()>, _>(ReconcileError::Api {
            status: 503,
            body: "unavailable".into(),
        })
    })
    .await;

    assert!(matches!(outcome, Err(ReconcileError::Api { status: 503, .. })));
}

fn gone_after(
    polls: usize,
    status: u16,
) -> (Arc<AtomicUsize>, impl FnMut() -> std::future::Ready<hostman_provision::Result<()>>) {
    let reads = Arc::new(AtomicUsize::new(0));
    let counter = reads.clone();
    let read = move || {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        std::future::ready(if n < polls {
            Ok(())
        } else {
            Err(ReconcileError::Api {
                status,
                body: String::new(),
            })
        })
    };
    (reads, read)
}

#[tokio::test(start_paused = true)]
async fn deletion_completes_on_not_found() {
    let (reads, read) = gone_after(2, 404);

    let outcome = wait_until_gone(
        "cluster",
        "1",
        GoneCriterion::NotFound,
        PollConfig::from_millis(10_000, 60_000),
        read,
    )
    .await;

    assert!(outcome.is_ok());
    assert_eq!(reads.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn deletion_criterion_decides_on_other_errors() {
    let (_, read) = gone_after(0, 502);
    let lenient = wait_until_gone(
        "cluster",
        "1",
        GoneCriterion::AnyError,
        PollConfig::from_millis(10_000, 60_000),
        read,
    )
    .await;
    assert!(lenient.is_ok());

    let (_, read) = gone_after(0, 502);
    let strict = wait_until_gone(
        "cluster",
        "1",
        GoneCriterion::NotFound,
        PollConfig::from_millis(10_000, 60_000),
        read,
    )
    .await;
    assert!(matches!(strict, Err(ReconcileError::Api { status: 502, .. })));
}

#[tokio::test(start_paused = true)]
async fn deletion_that_never_completes_times_out() {
    let (reads, read) = gone_after(usize::MAX, 404);

    let outcome = wait_until_gone(
        "cluster",
        "1",
        GoneCriterion::AnyError,
        PollConfig::from_millis(10_000, 20_000),
        read,
    )
    .await;

    assert!(matches!(outcome, Err(ref e) if e.is_timeout()));
    assert_eq!(reads.load(Ordering::SeqCst), 3);
}
