//! Error types for retry operations.

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use crate::context::ContextError;

/// Failure returned by a retried operation.
///
/// Transient failures are retried; permanent ones stop the driver at once and
/// are handed back unchanged. Any `E` converts into a transient failure, so
/// `?` inside an operation retries by default.
///
/// # Examples
///
/// ```rust
/// use backstep::retry::{permanent, Failure};
///
/// fn classify(status: u16) -> Result<(), Failure<String>> {
///     match status {
///         200 => Ok(()),
///         404 => Err(permanent("not found".to_string())),
///         _ => Err(Failure::from(format!("status {}", status))),
///     }
/// }
///
/// assert!(classify(200).is_ok());
/// assert!(matches!(classify(404), Err(Failure::Permanent(_))));
/// assert!(matches!(classify(503), Err(Failure::Transient(_))));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure<E> {
    /// Retry-eligible error.
    Transient(E),
    /// Error that must not be retried.
    Permanent(E),
}

impl<E> Failure<E> {
    /// Mark `error` as transient.
    pub fn transient(error: E) -> Self {
        Failure::Transient(error)
    }

    /// Mark `error` as permanent.
    pub fn permanent(error: E) -> Self {
        Failure::Permanent(error)
    }

    /// Returns true if this failure must not be retried.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Failure::Permanent(_))
    }

    /// Get a reference to the wrapped error.
    pub fn error(&self) -> &E {
        match self {
            Failure::Transient(e) | Failure::Permanent(e) => e,
        }
    }

    /// Extract the wrapped error, discarding the marker.
    pub fn into_inner(self) -> E {
        match self {
            Failure::Transient(e) | Failure::Permanent(e) => e,
        }
    }
}

impl<E> From<E> for Failure<E> {
    fn from(error: E) -> Self {
        Failure::Transient(error)
    }
}

impl<E: fmt::Display> fmt::Display for Failure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error().fmt(f)
    }
}

impl<E: StdError + 'static> StdError for Failure<E> {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.error().source()
    }
}

/// Mark `error` as permanent so the driver stops retrying.
pub fn permanent<E>(error: E) -> Failure<E> {
    Failure::Permanent(error)
}

/// Mark the error side of a `Result` as permanent.
///
/// `Ok` values pass through untouched, so a result can be marked without
/// checking it first.
///
/// ```rust
/// use backstep::retry::{Failure, PermanentExt};
///
/// let ok: Result<i32, &str> = Ok(1);
/// assert_eq!(ok.permanent(), Ok(1));
///
/// let err: Result<i32, &str> = Err("bad request");
/// assert_eq!(err.permanent(), Err(Failure::Permanent("bad request")));
/// ```
pub trait PermanentExt<T, E> {
    /// Map `Err(e)` to `Err(Failure::Permanent(e))`.
    fn permanent(self) -> Result<T, Failure<E>>;
}

impl<T, E> PermanentExt<T, E> for Result<T, E> {
    fn permanent(self) -> Result<T, Failure<E>> {
        self.map_err(Failure::Permanent)
    }
}

/// What made a [`RetryError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cause<E> {
    /// The last error returned by the operation.
    Operation(E),
    /// The context finished before the operation returned an error.
    Context(ContextError),
}

impl<E> Cause<E> {
    /// The operation error, if that is the cause.
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            Cause::Operation(e) => Some(e),
            Cause::Context(_) => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for Cause<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cause::Operation(e) => e.fmt(f),
            Cause::Context(e) => e.fmt(f),
        }
    }
}

/// Error returned when retrying stops without success.
///
/// Carries the attempts made, the time spent and the last delay slept, along
/// with the cause: the last operation error, or the context error when the
/// context finished before any attempt failed.
///
/// # Examples
///
/// ```rust
/// use backstep::retry::{run, Delays, Failure, RetryOptions};
/// use backstep::Context;
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let delays = Delays::new([Duration::from_millis(1); 2]);
/// let result = run(
///     &Context::new(),
///     &delays,
///     |_ctx| async { Err::<(), _>(Failure::Transient("always fails")) },
///     RetryOptions::new(),
/// )
/// .await;
///
/// let err = result.unwrap_err();
/// let retry = err.as_retry_error().unwrap();
/// assert_eq!(retry.retries(), 3); // 1 initial + 2 retries
/// assert_eq!(retry.operation_error(), Some(&"always fails"));
/// assert!(retry.to_string().starts_with("all delays spent: retrying 3 stopped"));
/// # });
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryError<E> {
    retries: u32,
    elapsed: Duration,
    last_delay: Duration,
    message: String,
    cause: Cause<E>,
    context_error: Option<ContextError>,
}

impl<E> RetryError<E> {
    /// Compose a retry error from the last operation error and context error.
    ///
    /// Returns `None` when neither error is present. A non-empty `stop_cause`
    /// prefixes the message.
    pub fn new(
        error: Option<E>,
        context_error: Option<ContextError>,
        stop_cause: Option<&str>,
        retries: u32,
        last_delay: Duration,
        elapsed: Duration,
    ) -> Option<Self> {
        let stop_cause = stop_cause.unwrap_or_default();
        match (error, context_error) {
            (Some(e), ctx) => Some(Self::exhausted(
                e, ctx, stop_cause, retries, last_delay, elapsed,
            )),
            (None, Some(ctx)) => {
                let mut err = Self::canceled(None, ctx, retries, last_delay, elapsed);
                err.prefix(stop_cause);
                Some(err)
            }
            (None, None) => None,
        }
    }

    /// The strategy stopped after `error`; the context may have finished too.
    pub(crate) fn exhausted(
        error: E,
        context_error: Option<ContextError>,
        stop_cause: &str,
        retries: u32,
        last_delay: Duration,
        elapsed: Duration,
    ) -> Self {
        let mut err = match context_error {
            Some(ctx) => Self::canceled(Some(error), ctx, retries, last_delay, elapsed),
            None => Self::stopped(error, retries, last_delay, elapsed),
        };
        err.prefix(stop_cause);
        err
    }

    pub(crate) fn canceled(
        error: Option<E>,
        context_error: ContextError,
        retries: u32,
        last_delay: Duration,
        elapsed: Duration,
    ) -> Self {
        let (message, cause) = match error {
            None => (
                format!(
                    "retrying {} canceled, time elapsed: {:?}, last delay: {:?}",
                    retries, elapsed, last_delay
                ),
                Cause::Context(context_error),
            ),
            Some(e) => (
                format!(
                    "retrying {} canceled: {}, time elapsed: {:?}, last delay: {:?}",
                    retries, context_error, elapsed, last_delay
                ),
                Cause::Operation(e),
            ),
        };
        Self {
            retries,
            elapsed,
            last_delay,
            message,
            cause,
            context_error: Some(context_error),
        }
    }

    fn stopped(error: E, retries: u32, last_delay: Duration, elapsed: Duration) -> Self {
        Self {
            retries,
            elapsed,
            last_delay,
            message: format!(
                "retrying {} stopped, time elapsed: {:?}, last delay: {:?}",
                retries, elapsed, last_delay
            ),
            cause: Cause::Operation(error),
            context_error: None,
        }
    }

    fn prefix(&mut self, stop_cause: &str) {
        if !stop_cause.is_empty() {
            self.message = format!("{}: {}", stop_cause, self.message);
        }
    }

    /// Attempts made, counting the first one.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Time from the start of the call until retrying stopped.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// The last delay taken from the strategy, or zero if none was.
    pub fn last_delay(&self) -> Duration {
        self.last_delay
    }

    /// Summary of why retrying stopped, without the cause.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The underlying cause.
    pub fn cause(&self) -> &Cause<E> {
        &self.cause
    }

    /// The context error, if the context finished.
    ///
    /// Present even when [`cause`](Self::cause) is the operation error.
    pub fn context_error(&self) -> Option<ContextError> {
        self.context_error
    }

    /// The last operation error, if the operation failed at least once.
    pub fn operation_error(&self) -> Option<&E> {
        self.cause.operation_error()
    }

    /// Extract the cause, discarding metadata.
    pub fn into_cause(self) -> Cause<E> {
        self.cause
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.message, self.cause)
    }
}

impl<E: StdError + 'static> StdError for RetryError<E> {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match &self.cause {
            Cause::Operation(e) => Some(e),
            Cause::Context(e) => Some(e),
        }
    }
}

/// Error returned by the retry driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error<E> {
    /// The operation returned a permanent failure; this is its error, unchanged.
    Permanent(E),
    /// Retrying stopped: the strategy ran out or the context finished.
    Retry(RetryError<E>),
}

impl<E> Error<E> {
    /// Returns true if the operation failed permanently.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Error::Permanent(_))
    }

    /// The retry error, if retrying stopped.
    pub fn as_retry_error(&self) -> Option<&RetryError<E>> {
        match self {
            Error::Retry(e) => Some(e),
            Error::Permanent(_) => None,
        }
    }

    /// The operation's error, if there is one.
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            Error::Permanent(e) => Some(e),
            Error::Retry(e) => e.operation_error(),
        }
    }

    /// Strip the retry envelope and return the operation's error.
    ///
    /// When the context finished before the operation ever failed there is no
    /// operation error, and `self` is returned unchanged in `Err`.
    ///
    /// ```rust
    /// use backstep::retry::{run, zero, Failure, RetryOptions};
    /// use backstep::Context;
    ///
    /// # tokio_test::block_on(async {
    /// let result = run(
    ///     &Context::new(),
    ///     zero(),
    ///     |_ctx| async { Err::<(), _>(Failure::Transient("boom")) },
    ///     RetryOptions::new().with_max_retries(2),
    /// )
    /// .await;
    ///
    /// assert_eq!(result.unwrap_err().into_operation_error(), Ok("boom"));
    /// # });
    /// ```
    pub fn into_operation_error(self) -> Result<E, Self> {
        match self {
            Error::Permanent(e) => Ok(e),
            Error::Retry(RetryError {
                cause: Cause::Operation(e),
                ..
            }) => Ok(e),
            other => Err(other),
        }
    }
}

impl<E> From<RetryError<E>> for Error<E> {
    fn from(error: RetryError<E>) -> Self {
        Error::Retry(error)
    }
}

impl<E: fmt::Display> fmt::Display for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Permanent(e) => e.fmt(f),
            Error::Retry(e) => e.fmt(f),
        }
    }
}

impl<E: StdError + 'static> StdError for Error<E> {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Permanent(e) => Some(e),
            Error::Retry(e) => e.source(),
        }
    }
}

/// Find a [`RetryError`] in an error's source chain.
///
/// Looks through the chain for either a bare `RetryError<E>` or an
/// [`Error<E>`] holding one.
pub fn as_retry_error<'a, E>(error: &'a (dyn StdError + 'static)) -> Option<&'a RetryError<E>>
where
    E: StdError + 'static,
{
    let mut current = Some(error);
    while let Some(err) = current {
        if let Some(retry) = err.downcast_ref::<RetryError<E>>() {
            return Some(retry);
        }
        if let Some(Error::Retry(retry)) = err.downcast_ref::<Error<E>>() {
            return Some(retry);
        }
        current = err.source();
    }
    None
}
