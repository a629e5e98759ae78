//! Delay strategies and the streams they produce.

use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Sentinel delay meaning "no further retries".
///
/// `Duration` is unsigned, so the sentinel is the largest representable
/// duration. Streams never hand it to the driver as a delay: a stream that
/// would produce it returns [`Stopped`] instead. It exists so strategies can be
/// configured to stop, e.g. `Constant::new(STOP)`.
pub const STOP: Duration = Duration::MAX;

/// Largest delay a stream may emit.
const MAX_DELAY: Duration = Duration::MAX.saturating_sub(Duration::from_nanos(1));

const DELAYS_SPENT: &str = "all delays spent";
const STOPPED: &str = "stopped";

/// Signal that a delay stream has terminated, carrying the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stopped {
    cause: Cow<'static, str>,
}

impl Stopped {
    /// Create a stop signal with the given cause.
    pub fn new(cause: impl Into<Cow<'static, str>>) -> Self {
        Self {
            cause: cause.into(),
        }
    }

    /// Why the stream stopped.
    pub fn cause(&self) -> &str {
        &self.cause
    }
}

impl fmt::Display for Stopped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cause)
    }
}

impl std::error::Error for Stopped {}

/// A single-use producer of inter-attempt delays.
///
/// Once `next_delay` has returned `Err(Stopped)` it keeps returning it.
pub trait DelayStream: Send {
    /// Produce the next delay, or the reason the stream stopped.
    fn next_delay(&mut self) -> Result<Duration, Stopped>;
}

impl<D: DelayStream + ?Sized> DelayStream for Box<D> {
    fn next_delay(&mut self) -> Result<Duration, Stopped> {
        (**self).next_delay()
    }
}

/// A retry strategy: a factory of fresh, independent delay streams.
///
/// # Examples
///
/// ```rust
/// use backstep::retry::{Delays, Strategy};
/// use std::time::Duration;
///
/// let strategy = Delays::new([Duration::from_secs(1), Duration::from_secs(2)]);
///
/// let mut stream = strategy.stream();
/// assert_eq!(stream.next_delay(), Ok(Duration::from_secs(1)));
/// assert_eq!(stream.next_delay(), Ok(Duration::from_secs(2)));
/// assert!(stream.next_delay().is_err());
///
/// // Every call starts over
/// assert_eq!(strategy.stream().next_delay(), Ok(Duration::from_secs(1)));
/// ```
pub trait Strategy: fmt::Debug + Send + Sync {
    /// Create a new delay stream.
    fn stream(&self) -> Box<dyn DelayStream>;
}

impl<S: Strategy + ?Sized> Strategy for &S {
    fn stream(&self) -> Box<dyn DelayStream> {
        (**self).stream()
    }
}

impl<S: Strategy + ?Sized> Strategy for Box<S> {
    fn stream(&self) -> Box<dyn DelayStream> {
        (**self).stream()
    }
}

impl<S: Strategy + ?Sized> Strategy for Arc<S> {
    fn stream(&self) -> Box<dyn DelayStream> {
        (**self).stream()
    }
}

/// Extension methods for delay streams.
pub trait DelayStreamExt: DelayStream + Sized {
    /// Iterate over delays until the stream stops.
    ///
    /// ```rust
    /// use backstep::retry::{Delays, DelayStreamExt, Strategy};
    /// use std::time::Duration;
    ///
    /// let delays: Vec<_> = Delays::new([Duration::from_millis(5); 3])
    ///     .stream()
    ///     .until_stop()
    ///     .collect();
    /// assert_eq!(delays.len(), 3);
    /// ```
    fn until_stop(self) -> UntilStop<Self> {
        UntilStop {
            stream: self,
            done: false,
        }
    }
}

impl<D: DelayStream> DelayStreamExt for D {}

/// Iterator returned by [`DelayStreamExt::until_stop`].
#[derive(Debug)]
pub struct UntilStop<D> {
    stream: D,
    done: bool,
}

impl<D: DelayStream> Iterator for UntilStop<D> {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.done {
            return None;
        }
        match self.stream.next_delay() {
            Ok(delay) => Some(delay),
            Err(_) => {
                self.done = true;
                None
            }
        }
    }
}

/// Strategy that yields an explicit list of delays, then stops.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct Delays(Vec<Duration>);

impl Delays {
    /// Create a strategy from the given delays.
    pub fn new(delays: impl IntoIterator<Item = Duration>) -> Self {
        Self(delays.into_iter().collect())
    }

    /// The configured delays.
    pub fn as_slice(&self) -> &[Duration] {
        &self.0
    }

    /// Number of retries this strategy allows.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if no retries are allowed.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Duration>> for Delays {
    fn from(delays: Vec<Duration>) -> Self {
        Self(delays)
    }
}

impl FromIterator<Duration> for Delays {
    fn from_iter<I: IntoIterator<Item = Duration>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl Strategy for Delays {
    fn stream(&self) -> Box<dyn DelayStream> {
        Box::new(DelaysStream {
            delays: self.0.clone(),
            next: 0,
        })
    }
}

#[derive(Debug)]
struct DelaysStream {
    delays: Vec<Duration>,
    next: usize,
}

impl DelayStream for DelaysStream {
    fn next_delay(&mut self) -> Result<Duration, Stopped> {
        let Some(&delay) = self.delays.get(self.next) else {
            return Err(Stopped::new(DELAYS_SPENT));
        };
        if delay == STOP {
            self.next = self.delays.len();
            return Err(Stopped::new(STOPPED));
        }
        self.next += 1;
        Ok(delay)
    }
}

/// Strategy that always yields the same delay.
///
/// `Constant::new(STOP)` never allows a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct Constant(Duration);

impl Constant {
    /// Retry immediately, indefinitely.
    pub const ZERO: Constant = Constant(Duration::ZERO);
    /// Never retry.
    pub const STOP: Constant = Constant(STOP);

    /// Create a constant strategy.
    pub fn new(delay: Duration) -> Self {
        Self(delay)
    }

    /// The configured delay.
    pub fn delay(&self) -> Duration {
        self.0
    }
}

impl Strategy for Constant {
    fn stream(&self) -> Box<dyn DelayStream> {
        Box::new(*self)
    }
}

impl DelayStream for Constant {
    fn next_delay(&mut self) -> Result<Duration, Stopped> {
        if self.0 == STOP {
            Err(Stopped::new(STOPPED))
        } else {
            Ok(self.0)
        }
    }
}

/// Strategy whose delay is always zero: retry immediately, indefinitely.
pub fn zero() -> Constant {
    Constant::ZERO
}

/// Strategy that never allows a retry.
pub fn stop() -> Constant {
    Constant::STOP
}

/// Exponential backoff with optional jitter and ceiling.
///
/// The pre-jitter delay starts at `start` and is multiplied by `factor` after
/// each pull. When `max_delay` is set, the progression is clamped to it once
/// the multiplied value reaches it. Every emitted value is perturbed to a
/// uniform draw in `[d * (1 - jitter), d * (1 + jitter)]`.
///
/// # Examples
///
/// ```rust
/// use backstep::retry::{exponential, Strategy};
/// use std::time::Duration;
///
/// let mut stream = exponential(Duration::from_secs(1), 2.0, 0.0).stream();
/// assert_eq!(stream.next_delay(), Ok(Duration::from_secs(1)));
/// assert_eq!(stream.next_delay(), Ok(Duration::from_secs(2)));
/// assert_eq!(stream.next_delay(), Ok(Duration::from_secs(4)));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Exponential {
    /// First delay.
    pub start: Duration,
    /// Multiplier applied after each delay.
    pub factor: f64,
    /// Randomization: each delay is scaled by a random value in `[1 - jitter, 1 + jitter]`.
    #[cfg_attr(feature = "serde", serde(default))]
    pub jitter: f64,
    /// Ceiling for the pre-jitter delay.
    #[cfg_attr(feature = "serde", serde(default))]
    pub max_delay: Option<Duration>,
}

/// Create an exponential backoff strategy.
pub fn exponential(start: Duration, factor: f64, jitter: f64) -> Exponential {
    Exponential {
        start,
        factor,
        jitter,
        max_delay: None,
    }
}

/// Create an exponential backoff strategy whose delay never grows past `max_delay`.
pub fn truncated_exponential(
    start: Duration,
    factor: f64,
    jitter: f64,
    max_delay: Duration,
) -> Exponential {
    Exponential {
        start,
        factor,
        jitter,
        max_delay: Some(max_delay),
    }
}

impl Strategy for Exponential {
    fn stream(&self) -> Box<dyn DelayStream> {
        Box::new(ExponentialStream {
            delay: self.start.min(MAX_DELAY),
            factor: self.factor,
            jitter: self.jitter,
            max_delay: self.max_delay.filter(|max| !max.is_zero()),
            rng: StdRng::seed_from_u64(stream_seed()),
        })
    }
}

#[derive(Debug)]
struct ExponentialStream {
    delay: Duration,
    factor: f64,
    jitter: f64,
    max_delay: Option<Duration>,
    rng: StdRng,
}

impl DelayStream for ExponentialStream {
    fn next_delay(&mut self) -> Result<Duration, Stopped> {
        let current = self.delay;
        self.delay = scale(current, self.factor);
        if let Some(max) = self.max_delay {
            if self.delay >= max {
                self.delay = max;
            }
        }
        Ok(jitter(current, self.jitter, self.rng.random::<f64>()))
    }
}

/// Map `delay` into the jitter window using `random` in `[0, 1)`.
///
/// The window is `[delay - factor * delay, delay + factor * delay]`, widened by
/// one nanosecond so that every whole nanosecond bucket is equally likely:
/// for a window of 1..=3ns each of 1, 2 and 3 has a 1/3 chance.
///
/// ```rust
/// use backstep::retry::jitter;
/// use std::time::Duration;
///
/// let d = Duration::from_nanos(2);
/// assert_eq!(jitter(d, 0.5, 0.0), Duration::from_nanos(1));
/// assert_eq!(jitter(d, 0.5, 0.5), Duration::from_nanos(2));
/// assert_eq!(jitter(d, 0.5, 0.99), Duration::from_nanos(3));
/// ```
pub fn jitter(delay: Duration, factor: f64, random: f64) -> Duration {
    if factor == 0.0 {
        return delay;
    }
    let nanos = delay.as_nanos() as f64;
    let delta = factor * nanos;
    let min = nanos - delta;
    let max = nanos + delta;
    from_nanos_f64(min + random * (max - min + 1.0))
}

fn scale(delay: Duration, factor: f64) -> Duration {
    from_nanos_f64(delay.as_nanos() as f64 * factor)
}

// Truncates toward zero; negative and NaN map to zero, overflow saturates
// just below STOP.
fn from_nanos_f64(nanos: f64) -> Duration {
    if nanos >= MAX_DELAY.as_nanos() as f64 {
        return MAX_DELAY;
    }
    let nanos = nanos as u128;
    let secs = u64::try_from(nanos / 1_000_000_000).unwrap_or(u64::MAX);
    let subsec = (nanos % 1_000_000_000) as u32;
    Duration::new(secs, subsec).min(MAX_DELAY)
}

fn stream_seed() -> u64 {
    static STREAMS: AtomicU64 = AtomicU64::new(0);
    let clock = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    clock ^ STREAMS.fetch_add(1, Ordering::Relaxed).rotate_left(32)
}
