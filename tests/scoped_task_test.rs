//! Tests for session-scoped task binding

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use connkit::task::MAX_TASK_DELAY;
use connkit::{Error, ScopedTask, Session, TaskScheduler};
use tokio::time::{sleep, Duration};

fn counting_task(name: &str, counter: &Arc<AtomicUsize>) -> ScopedTask {
    let counter = Arc::clone(counter);
    ScopedTask::new(name, move |_ctx| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    })
}

#[tokio::test(start_paused = true)]
async fn test_one_shot_task_fires_once_after_delay() {
    let scheduler = TaskScheduler::start().unwrap();
    let session = Session::detached(None, None);
    let fired = Arc::new(AtomicUsize::new(0));

    let handle = scheduler
        .bind(
            &session,
            counting_task("one-shot", &fired),
            Duration::from_secs(1),
            Duration::ZERO,
        )
        .unwrap()
        .expect("session is open");
    assert!(session.contains_attribute(handle.attribute_key()));

    sleep(Duration::from_millis(900)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    sleep(Duration::from_millis(200)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(handle.is_finished());
    assert_eq!(handle.fire_count(), 1);
    // A finished task removes its own handle from the session.
    assert!(!session.contains_attribute(handle.attribute_key()));

    sleep(Duration::from_secs(5)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_task_never_fires_if_session_closes_first() {
    let scheduler = TaskScheduler::start().unwrap();
    let session = Session::detached(None, None);
    let fired = Arc::new(AtomicUsize::new(0));

    let handle = scheduler
        .bind(
            &session,
            counting_task("doomed", &fired),
            Duration::from_millis(500),
            Duration::from_millis(500),
        )
        .unwrap()
        .unwrap();

    session.close();
    assert!(handle.is_cancelled());
    assert!(!handle.cancel());

    sleep(Duration::from_secs(3)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert_eq!(scheduler.scheduled(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_bind_on_closing_session_is_a_no_op() {
    let scheduler = TaskScheduler::start().unwrap();
    let session = Session::detached(None, None);
    session.close();

    let fired = Arc::new(AtomicUsize::new(0));
    let handle = scheduler
        .bind(
            &session,
            counting_task("late", &fired),
            Duration::ZERO,
            Duration::ZERO,
        )
        .unwrap();
    assert!(handle.is_none());
    assert!(session.attribute_keys().is_empty());
}

#[tokio::test]
async fn test_invalid_bindings_fail_without_registering() {
    let scheduler = TaskScheduler::start().unwrap();
    let session = Session::detached(None, None);
    let fired = Arc::new(AtomicUsize::new(0));

    let err = scheduler
        .bind(
            &session,
            counting_task("  ", &fired),
            Duration::ZERO,
            Duration::ZERO,
        )
        .unwrap_err();
    assert!(err.is_argument_error());
    assert!(session.attribute_keys().is_empty());

    scheduler.shutdown();
    let err = scheduler
        .bind(
            &session,
            counting_task("after-shutdown", &fired),
            Duration::ZERO,
            Duration::ZERO,
        )
        .unwrap_err();
    assert!(matches!(err, Error::SchedulerStopped));
    assert!(session.attribute_keys().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_repeating_task_until_cancelled() {
    let scheduler = TaskScheduler::start().unwrap();
    let session = Session::detached(None, None);
    let fired = Arc::new(AtomicUsize::new(0));

    let handle = scheduler
        .bind(
            &session,
            counting_task("tick", &fired),
            Duration::from_millis(100),
            Duration::from_millis(100),
        )
        .unwrap()
        .unwrap();

    sleep(Duration::from_millis(350)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 3);

    assert!(handle.cancel());
    assert!(!handle.cancel());
    assert!(!session.contains_attribute(handle.attribute_key()));

    sleep(Duration::from_secs(1)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_task_can_cancel_itself() {
    let scheduler = TaskScheduler::start().unwrap();
    let session = Session::detached(None, None);

    let handle = scheduler
        .bind(
            &session,
            ScopedTask::new("twice", |ctx| async move {
                if ctx.handle().fire_count() >= 2 {
                    ctx.handle().cancel();
                }
            }),
            Duration::from_millis(10),
            Duration::from_millis(10),
        )
        .unwrap()
        .unwrap();

    sleep(Duration::from_secs(1)).await;
    assert_eq!(handle.fire_count(), 2);
    assert!(handle.is_cancelled());
    assert!(!session.is_closing());
}

#[tokio::test(start_paused = true)]
async fn test_slow_task_does_not_delay_others() {
    let scheduler = TaskScheduler::start().unwrap();
    let session = Session::detached(None, None);
    let fired = Arc::new(AtomicUsize::new(0));

    scheduler
        .bind(
            &session,
            ScopedTask::new("slow", |_ctx| async {
                sleep(Duration::from_secs(60)).await;
            }),
            Duration::from_millis(100),
            Duration::ZERO,
        )
        .unwrap();
    scheduler
        .bind(
            &session,
            counting_task("fast", &fired),
            Duration::from_millis(200),
            Duration::ZERO,
        )
        .unwrap();

    sleep(Duration::from_millis(300)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_task_does_not_stop_scheduler() {
    let scheduler = TaskScheduler::start().unwrap();
    let session = Session::detached(None, None);
    let fired = Arc::new(AtomicUsize::new(0));

    scheduler
        .bind(
            &session,
            ScopedTask::new("broken", |_ctx| async {
                panic!("task failure");
            }),
            Duration::from_millis(10),
            Duration::ZERO,
        )
        .unwrap();
    scheduler
        .bind(
            &session,
            counting_task("healthy", &fired),
            Duration::from_millis(50),
            Duration::ZERO,
        )
        .unwrap();

    sleep(Duration::from_millis(100)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_task_context_exposes_session() {
    let scheduler = TaskScheduler::start().unwrap();
    let session = Session::detached(None, None);
    let seen = Arc::new(AtomicUsize::new(0));

    let expected = session.id();
    let seen_in_task = Arc::clone(&seen);
    scheduler
        .bind(
            &session,
            ScopedTask::new("inspect", move |ctx| {
                let seen = Arc::clone(&seen_in_task);
                async move {
                    if ctx.session().map(|s| s.id()) == Some(expected) {
                        seen.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }),
            Duration::ZERO,
            Duration::ZERO,
        )
        .unwrap();

    sleep(Duration::from_millis(10)).await;
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_delays_beyond_timer_range_are_rejected() {
    let scheduler = TaskScheduler::start().unwrap();
    let session = Session::detached(None, None);
    let fired = Arc::new(AtomicUsize::new(0));
    let too_long = MAX_TASK_DELAY + Duration::from_secs(1);

    let err = scheduler
        .bind(&session, counting_task("far", &fired), too_long, Duration::ZERO)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument { name: "delay", .. }));

    let err = scheduler
        .bind(
            &session,
            counting_task("far", &fired),
            Duration::ZERO,
            Duration::from_secs(10 * 365 * 24 * 60 * 60),
        )
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument { name: "interval", .. }));
    assert!(session.attribute_keys().is_empty());

    // The limit itself is accepted, and the scheduler keeps running.
    let far = scheduler
        .bind(&session, counting_task("far", &fired), MAX_TASK_DELAY, MAX_TASK_DELAY)
        .unwrap()
        .expect("session is open");
    scheduler
        .bind(
            &session,
            counting_task("near", &fired),
            Duration::from_secs(1),
            Duration::ZERO,
        )
        .unwrap()
        .expect("session is open");

    sleep(Duration::from_millis(1100)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(!scheduler.is_stopped());
    assert!(far.cancel());
}
