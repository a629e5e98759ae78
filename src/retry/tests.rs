//! Integration tests for the retry driver.

use super::*;
use crate::context::{Context, ContextError};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Flaky(u32);

impl std::fmt::Display for Flaky {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "attempt {} failed", self.0)
    }
}

impl std::error::Error for Flaky {}

/// Operation that fails `failures` times, then returns `value`.
fn failing_then<T: Clone + 'static>(
    calls: &AtomicU32,
    failures: u32,
    value: T,
) -> impl FnMut(Context) -> std::future::Ready<Result<T, Failure<Flaky>>> + '_ {
    move |_ctx| {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= failures {
            std::future::ready(Err(Failure::Transient(Flaky(n))))
        } else {
            std::future::ready(Ok(value.clone()))
        }
    }
}

#[tokio::test]
async fn test_success_after_retries() {
    let calls = AtomicU32::new(0);

    let result = run(
        &Context::new(),
        zero(),
        failing_then(&calls, 5, 10),
        RetryOptions::new(),
    )
    .await;

    assert_eq!(result, Ok(10));
    assert_eq!(calls.load(Ordering::SeqCst), 6);
}

#[tokio::test(start_paused = true)]
async fn test_explicit_delays_exhausted() {
    let calls = AtomicU32::new(0);
    let delays = Delays::new([Duration::from_secs(1), Duration::from_secs(1)]);

    let result = run(
        &Context::new(),
        &delays,
        failing_then(&calls, u32::MAX, ()),
        RetryOptions::new(),
    )
    .await;

    let err = result.unwrap_err();
    let retry = err.as_retry_error().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(retry.retries(), 3);
    assert_eq!(retry.last_delay(), Duration::from_secs(1));
    assert_eq!(retry.operation_error(), Some(&Flaky(3)));
    assert!(retry.message().starts_with("all delays spent: retrying 3 stopped"));
}

#[tokio::test]
async fn test_permanent_short_circuits() {
    let calls = AtomicU32::new(0);
    let notified = AtomicU32::new(0);

    let result = run_unit(
        &Context::new(),
        zero(),
        |_ctx| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(permanent(Flaky(1))) }
        },
        RetryOptions::new().with_notify(|_, _, _, _| {
            notified.fetch_add(1, Ordering::SeqCst);
        }),
    )
    .await;

    assert_eq!(result, Err(Error::Permanent(Flaky(1))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(notified.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_permanent_wins_over_exhausted_strategy() {
    let start = Instant::now();

    let result = run_unit(
        &Context::new(),
        stop(),
        |_ctx| async { Err::<(), _>(Failure::Permanent(Flaky(1))) },
        RetryOptions::new(),
    )
    .await;

    assert_eq!(result.unwrap_err().into_operation_error(), Ok(Flaky(1)));
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_mid_sleep() {
    let ctx = Context::new();
    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let start = Instant::now();
    let calls = AtomicU32::new(0);
    let result = run(
        &ctx,
        Constant::new(Duration::from_secs(1)),
        failing_then(&calls, u32::MAX, ()),
        RetryOptions::new(),
    )
    .await;

    assert!(start.elapsed() < Duration::from_secs(1));
    let err = result.unwrap_err();
    let retry = err.as_retry_error().unwrap();
    assert_eq!(retry.context_error(), Some(ContextError::Canceled));
    assert_eq!(retry.operation_error(), Some(&Flaky(1)));
    assert_eq!(retry.last_delay(), Duration::from_secs(1));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(retry
        .message()
        .starts_with("retrying 1 canceled: context canceled"));
}

#[tokio::test]
async fn test_max_retries_option() {
    let calls = AtomicU32::new(0);

    let result = run(
        &Context::new(),
        zero(),
        failing_then(&calls, u32::MAX, ()),
        RetryOptions::new().with_max_retries(5),
    )
    .await;

    let err = result.unwrap_err();
    assert_eq!(calls.load(Ordering::SeqCst), 6);
    assert_eq!(err.as_retry_error().map(RetryError::retries), Some(6));
    assert!(err
        .to_string()
        .starts_with("maximum retries elapsed: 5: retrying 6 stopped"));
}

#[tokio::test]
async fn test_run_n_sugar() {
    let calls = AtomicU32::new(0);

    let result = run_n(
        &Context::new(),
        zero(),
        failing_then(&calls, u32::MAX, 0),
        5,
        RetryOptions::new(),
    )
    .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 6);
}

#[tokio::test(start_paused = true)]
async fn test_exponential_notify_trace() {
    let calls = AtomicU32::new(0);
    let mut trace = Vec::new();

    let result = run(
        &Context::new(),
        exponential(Duration::from_secs(1), 2.0, 0.0),
        failing_then(&calls, 3, "done"),
        RetryOptions::new().with_notify(|err: &Flaky, delay, attempt, _elapsed| {
            trace.push((err.clone(), delay, attempt));
        }),
    )
    .await;

    assert_eq!(result, Ok("done"));
    assert_eq!(
        trace,
        vec![
            (Flaky(1), Duration::from_secs(1), 1),
            (Flaky(2), Duration::from_secs(2), 2),
            (Flaky(3), Duration::from_secs(4), 3),
        ]
    );
}

#[tokio::test]
async fn test_notify_called_once_per_retry() {
    for k in 1..=5 {
        let calls = AtomicU32::new(0);
        let notified = AtomicU32::new(0);

        let result = run(
            &Context::new(),
            Delays::new([Duration::ZERO; 4]),
            failing_then(&calls, k - 1, k),
            RetryOptions::new().with_notify(|_, _, _, _| {
                notified.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await;

        assert_eq!(result, Ok(k));
        assert_eq!(notified.load(Ordering::SeqCst), k - 1);
    }
}

#[tokio::test]
async fn test_notify_not_called_on_stop() {
    let mut seen = Vec::new();

    let result = run_unit_n(
        &Context::new(),
        Constant::new(Duration::from_micros(1)),
        |_ctx| async { Err::<(), _>(Failure::Transient(Flaky(0))) },
        2,
        RetryOptions::new().with_notify(|_, delay, attempt, _| seen.push((delay, attempt))),
    )
    .await;

    assert!(result.is_err());
    assert_eq!(
        seen,
        vec![(Duration::from_micros(1), 1), (Duration::from_micros(1), 2)]
    );
}

#[tokio::test]
async fn test_stop_on_first_pull() {
    let calls = AtomicU32::new(0);

    let result = run(
        &Context::new(),
        stop(),
        failing_then(&calls, u32::MAX, ()),
        RetryOptions::new(),
    )
    .await;

    let err = result.unwrap_err();
    let retry = err.as_retry_error().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(retry.retries(), 1);
    assert_eq!(retry.last_delay(), Duration::ZERO);
    assert!(retry.message().starts_with("stopped: retrying 1 stopped"));
}

#[tokio::test]
async fn test_cancelled_before_first_attempt() {
    let ctx = Context::new();
    ctx.cancel();
    let calls = AtomicU32::new(0);

    let result = run(
        &ctx,
        zero(),
        failing_then(&calls, 0, ()),
        RetryOptions::new(),
    )
    .await;

    let err = result.unwrap_err();
    let retry = err.as_retry_error().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(retry.retries(), 1);
    assert_eq!(retry.last_delay(), Duration::ZERO);
    assert_eq!(retry.cause(), &Cause::Context(ContextError::Canceled));
    assert!(err.into_operation_error().is_err());
}

#[tokio::test]
async fn test_cancel_inside_operation_stops_before_next_attempt() {
    let ctx = Context::new();
    let calls = AtomicU32::new(0);

    let result = run(
        &ctx,
        zero(),
        |op_ctx: Context| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            op_ctx.cancel();
            async move { Err::<(), _>(Failure::Transient(Flaky(n))) }
        },
        RetryOptions::new(),
    )
    .await;

    let err = result.unwrap_err();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(err.into_operation_error(), Ok(Flaky(1)));
}

#[tokio::test]
async fn test_success_wins_over_cancellation() {
    let ctx = Context::new();

    let result = run(
        &ctx,
        zero(),
        |op_ctx: Context| {
            op_ctx.cancel();
            async { Ok::<_, Failure<Flaky>>(7) }
        },
        RetryOptions::new(),
    )
    .await;

    assert_eq!(result, Ok(7));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_option() {
    let calls = AtomicU32::new(0);
    let start = Instant::now();

    let result = run(
        &Context::new(),
        Constant::new(Duration::from_millis(100)),
        failing_then(&calls, u32::MAX, ()),
        RetryOptions::new().with_timeout(Duration::from_secs(1)),
    )
    .await;

    let err = result.unwrap_err();
    let retry = err.as_retry_error().unwrap();
    assert_eq!(retry.context_error(), Some(ContextError::DeadlineExceeded));
    assert_eq!(start.elapsed(), Duration::from_secs(1));
    assert_eq!(calls.load(Ordering::SeqCst), 10);
}

#[tokio::test]
async fn test_timeout_context_released_on_return() {
    let parent = Context::new();
    let mut seen: Option<Context> = None;

    let result = run(
        &parent,
        zero(),
        |op_ctx: Context| {
            seen = Some(op_ctx);
            async { Ok::<_, Failure<Flaky>>(()) }
        },
        RetryOptions::new().with_timeout(Duration::from_secs(60)),
    )
    .await;

    assert!(result.is_ok());
    assert!(seen.unwrap().is_cancelled());
    assert!(!parent.is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn test_max_elapsed_time_option() {
    let calls = AtomicU32::new(0);

    let result = run_e(
        &Context::new(),
        Constant::new(Duration::from_millis(100)),
        failing_then(&calls, u32::MAX, ()),
        Duration::from_secs(1),
        RetryOptions::new(),
    )
    .await;

    let err = result.unwrap_err();
    assert!(err
        .to_string()
        .starts_with("retrying time elapsed: 1s: retrying"));
    assert!(err.as_retry_error().unwrap().elapsed() > Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_run_unit_e_stops_after_elapsed_time() {
    let calls = AtomicU32::new(0);
    let start = Instant::now();

    let result = run_unit_e(
        &Context::new(),
        Constant::new(Duration::from_millis(100)),
        failing_then(&calls, u32::MAX, ()),
        Duration::from_millis(250),
        RetryOptions::new(),
    )
    .await;

    // Pulls at 0, 100 and 200ms pass; the pull at 300ms is past the limit.
    let err = result.unwrap_err();
    let retry = err.as_retry_error().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(retry.retries(), 4);
    assert_eq!(retry.operation_error(), Some(&Flaky(4)));
    assert_eq!(start.elapsed(), Duration::from_millis(300));
    assert!(retry
        .message()
        .starts_with("retrying time elapsed: 250ms: retrying 4 stopped"));
}

#[tokio::test(start_paused = true)]
async fn test_run_ne_stops_on_first_limit() {
    let calls = AtomicU32::new(0);

    let result = run_unit_ne(
        &Context::new(),
        Constant::new(Duration::from_millis(10)),
        failing_then(&calls, u32::MAX, ()),
        3,
        Duration::from_secs(60),
        RetryOptions::new(),
    )
    .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_unwrap_round_trip() {
    let calls = AtomicU32::new(0);

    let err = run(
        &Context::new(),
        Delays::new([Duration::ZERO; 3]),
        failing_then(&calls, u32::MAX, ()),
        RetryOptions::new(),
    )
    .await
    .unwrap_err();

    let boxed: Box<dyn std::error::Error> = Box::new(err.clone());
    let found = as_retry_error::<Flaky>(boxed.as_ref()).unwrap();
    assert_eq!(found.cause(), &Cause::Operation(Flaky(4)));
    assert_eq!(err.into_operation_error(), Ok(Flaky(4)));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_calls_are_independent() {
    let strategy = Arc::new(max_retries(2, Constant::new(Duration::from_millis(10))));
    let first_calls = AtomicU32::new(0);
    let second_calls = AtomicU32::new(0);

    let ctx = Context::new();
    let (first, second) = futures::join!(
        run(
            &ctx,
            strategy.clone(),
            failing_then(&first_calls, u32::MAX, ()),
            RetryOptions::new(),
        ),
        run(
            &ctx,
            strategy.clone(),
            failing_then(&second_calls, 1, ()),
            RetryOptions::new(),
        ),
    );

    assert!(first.is_err());
    assert_eq!(second, Ok(()));
    assert_eq!(first_calls.load(Ordering::SeqCst), 3);
    assert_eq!(second_calls.load(Ordering::SeqCst), 2);
}

#[cfg(feature = "tracing")]
mod tracing_tests {
    use super::*;
    use tracing_test::traced_test;

    #[tokio::test]
    #[traced_test]
    async fn test_logs_retries_and_stop() {
        let calls = AtomicU32::new(0);

        let _ = run(
            &Context::new(),
            zero(),
            failing_then(&calls, u32::MAX, ()),
            RetryOptions::new().with_max_retries(1),
        )
        .await;

        assert!(logs_contain("attempt failed, retrying"));
        assert!(logs_contain("retrying stopped"));
        assert!(logs_contain("maximum retries elapsed: 1"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_logs_success_after_retry() {
        let calls = AtomicU32::new(0);

        let result = run(
            &Context::new(),
            zero(),
            failing_then(&calls, 1, ()),
            RetryOptions::new(),
        )
        .await;

        assert!(result.is_ok());
        assert!(logs_contain("operation succeeded after retrying"));
    }
}
