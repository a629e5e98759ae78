//! The retry loop.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use super::error::{Error, Failure, RetryError};
use super::options::RetryOptions;
use super::strategy::Strategy;
use crate::context::Context;

/// Retry `operation` until it succeeds, fails permanently, or `strategy` stops.
///
/// The operation receives a clone of the context for each attempt. On a
/// transient failure the driver takes the next delay from a fresh stream of
/// `strategy`, calls the notify callback if one is set, then sleeps for the
/// delay unless the context finishes first.
///
/// # Errors
///
/// - [`Error::Permanent`] with the operation's error, unchanged, when it
///   returns [`Failure::Permanent`]. No further attempt is made.
/// - [`Error::Retry`] when the strategy stops or the context finishes. The
///   [`RetryError`] carries the last operation error as its cause when there
///   is one.
///
/// # Examples
///
/// ```rust
/// use backstep::retry::{run, zero, Failure, RetryOptions};
/// use backstep::Context;
///
/// # tokio_test::block_on(async {
/// let mut calls = 0;
/// let result = run(
///     &Context::new(),
///     zero(),
///     |_ctx| {
///         calls += 1;
///         let n = calls;
///         async move {
///             if n < 3 {
///                 Err(Failure::Transient("not yet"))
///             } else {
///                 Ok(n)
///             }
///         }
///     },
///     RetryOptions::new(),
/// )
/// .await;
///
/// assert_eq!(result, Ok(3));
/// # });
/// ```
pub async fn run<T, E, S, F, Fut>(
    ctx: &Context,
    strategy: S,
    mut operation: F,
    options: RetryOptions<'_, E>,
) -> Result<T, Error<E>>
where
    S: Strategy,
    F: FnMut(Context) -> Fut,
    Fut: Future<Output = Result<T, Failure<E>>>,
{
    let strategy = options.wrap(strategy);
    let (timeout, mut notify) = options.into_parts();

    // The guard cancels the derived context on every return path.
    let (ctx, _release) = match timeout {
        Some(timeout) if !timeout.is_zero() => {
            let child = ctx.with_timeout(timeout);
            let guard = child.drop_guard();
            (child, Some(guard))
        }
        _ => (ctx.clone(), None),
    };

    let start = Instant::now();
    let mut attempt = 1u32;
    let mut delay = Duration::ZERO;
    let mut last_error: Option<E> = None;
    let mut stream = strategy.stream();

    loop {
        if let Some(ctx_err) = ctx.err() {
            #[cfg(feature = "tracing")]
            tracing::debug!(attempt, error = %ctx_err, "retrying canceled");
            return Err(RetryError::canceled(
                last_error,
                ctx_err,
                attempt,
                delay,
                start.elapsed(),
            )
            .into());
        }

        let error = match operation(ctx.clone()).await {
            Ok(value) => {
                #[cfg(feature = "tracing")]
                if attempt > 1 {
                    tracing::debug!(attempts = attempt, "operation succeeded after retrying");
                }
                return Ok(value);
            }
            Err(Failure::Permanent(error)) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(attempt, "operation failed permanently");
                return Err(Error::Permanent(error));
            }
            Err(Failure::Transient(error)) => error,
        };

        let prev_delay = delay;
        let next = stream.next_delay();
        let elapsed = start.elapsed();
        delay = match next {
            Ok(delay) => delay,
            Err(stopped) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    attempts = attempt,
                    elapsed = ?elapsed,
                    cause = %stopped,
                    "retrying stopped"
                );
                return Err(RetryError::exhausted(
                    error,
                    ctx.err(),
                    stopped.cause(),
                    attempt,
                    prev_delay,
                    elapsed,
                )
                .into());
            }
        };

        if let Some(notify) = notify.as_mut() {
            notify(&error, delay, attempt, elapsed);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(attempt, delay = ?delay, elapsed = ?elapsed, "attempt failed, retrying");

        if let Err(ctx_err) = ctx.sleep(delay).await {
            #[cfg(feature = "tracing")]
            tracing::debug!(attempt, error = %ctx_err, "retrying canceled during delay");
            return Err(RetryError::canceled(Some(error), ctx_err, attempt, delay, elapsed).into());
        }

        last_error = Some(error);
        attempt = attempt.saturating_add(1);
    }
}

/// Retry `operation` with at most `max_retries` retries.
pub async fn run_n<T, E, S, F, Fut>(
    ctx: &Context,
    strategy: S,
    operation: F,
    max_retries: u32,
    options: RetryOptions<'_, E>,
) -> Result<T, Error<E>>
where
    S: Strategy,
    F: FnMut(Context) -> Fut,
    Fut: Future<Output = Result<T, Failure<E>>>,
{
    run(ctx, strategy, operation, options.with_max_retries(max_retries)).await
}

/// Retry `operation` until `max_elapsed_time` has passed.
pub async fn run_e<T, E, S, F, Fut>(
    ctx: &Context,
    strategy: S,
    operation: F,
    max_elapsed_time: Duration,
    options: RetryOptions<'_, E>,
) -> Result<T, Error<E>>
where
    S: Strategy,
    F: FnMut(Context) -> Fut,
    Fut: Future<Output = Result<T, Failure<E>>>,
{
    run(
        ctx,
        strategy,
        operation,
        options.with_max_elapsed_time(max_elapsed_time),
    )
    .await
}

/// Retry `operation` with both a retry limit and an elapsed time limit.
pub async fn run_ne<T, E, S, F, Fut>(
    ctx: &Context,
    strategy: S,
    operation: F,
    max_retries: u32,
    max_elapsed_time: Duration,
    options: RetryOptions<'_, E>,
) -> Result<T, Error<E>>
where
    S: Strategy,
    F: FnMut(Context) -> Fut,
    Fut: Future<Output = Result<T, Failure<E>>>,
{
    let options = options
        .with_max_retries(max_retries)
        .with_max_elapsed_time(max_elapsed_time);
    run(ctx, strategy, operation, options).await
}

/// Retry an operation that produces no value.
///
/// ```rust
/// use backstep::retry::{run_unit, permanent, zero, Error, RetryOptions};
/// use backstep::Context;
///
/// # tokio_test::block_on(async {
/// let result = run_unit(
///     &Context::new(),
///     zero(),
///     |_ctx| async { Err(permanent("oops")) },
///     RetryOptions::new(),
/// )
/// .await;
///
/// assert_eq!(result, Err(Error::Permanent("oops")));
/// # });
/// ```
pub async fn run_unit<E, S, F, Fut>(
    ctx: &Context,
    strategy: S,
    operation: F,
    options: RetryOptions<'_, E>,
) -> Result<(), Error<E>>
where
    S: Strategy,
    F: FnMut(Context) -> Fut,
    Fut: Future<Output = Result<(), Failure<E>>>,
{
    run(ctx, strategy, operation, options).await
}

/// [`run_unit`] with at most `max_retries` retries.
pub async fn run_unit_n<E, S, F, Fut>(
    ctx: &Context,
    strategy: S,
    operation: F,
    max_retries: u32,
    options: RetryOptions<'_, E>,
) -> Result<(), Error<E>>
where
    S: Strategy,
    F: FnMut(Context) -> Fut,
    Fut: Future<Output = Result<(), Failure<E>>>,
{
    run_n(ctx, strategy, operation, max_retries, options).await
}

/// [`run_unit`] until `max_elapsed_time` has passed.
pub async fn run_unit_e<E, S, F, Fut>(
    ctx: &Context,
    strategy: S,
    operation: F,
    max_elapsed_time: Duration,
    options: RetryOptions<'_, E>,
) -> Result<(), Error<E>>
where
    S: Strategy,
    F: FnMut(Context) -> Fut,
    Fut: Future<Output = Result<(), Failure<E>>>,
{
    run_e(ctx, strategy, operation, max_elapsed_time, options).await
}

/// [`run_unit`] with both a retry limit and an elapsed time limit.
pub async fn run_unit_ne<E, S, F, Fut>(
    ctx: &Context,
    strategy: S,
    operation: F,
    max_retries: u32,
    max_elapsed_time: Duration,
    options: RetryOptions<'_, E>,
) -> Result<(), Error<E>>
where
    S: Strategy,
    F: FnMut(Context) -> Fut,
    Fut: Future<Output = Result<(), Failure<E>>>,
{
    run_ne(
        ctx,
        strategy,
        operation,
        max_retries,
        max_elapsed_time,
        options,
    )
    .await
}
