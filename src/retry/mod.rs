//! Retry driver, delay strategies and stop wrappers.
//!
//! The module keeps three concerns apart:
//!
//! - **Strategies** ([`Strategy`]) produce a fresh [`DelayStream`] per call:
//!   [`Delays`], [`Constant`], [`zero`], [`stop`] and [`Exponential`].
//! - **Stop wrappers** ([`MaxRetries`], [`MaxElapsedTime`]) decorate any
//!   strategy with a termination condition.
//! - **The driver** ([`run`] and friends) ties cancellation, timeouts,
//!   notification and permanent-error short-circuiting around them.
//!
//! # Quick Start
//!
//! ```rust
//! use backstep::retry::{exponential, run, Failure, RetryOptions};
//! use backstep::Context;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let strategy = exponential(Duration::from_millis(1), 2.0, 0.1);
//!
//! let mut attempts = 0;
//! let value = run(
//!     &Context::new(),
//!     &strategy,
//!     |_ctx| {
//!         attempts += 1;
//!         let attempt = attempts;
//!         async move {
//!             if attempt < 3 {
//!                 Err(Failure::Transient("connection reset"))
//!             } else {
//!                 Ok(42)
//!             }
//!         }
//!     },
//!     RetryOptions::new().with_max_retries(5),
//! )
//! .await;
//!
//! assert_eq!(value, Ok(42));
//! # });
//! ```
//!
//! # Permanent Errors
//!
//! Operations return [`Failure<E>`]. Plain errors convert into
//! [`Failure::Transient`] through `?`; wrap an error with [`permanent`] (or
//! call [`PermanentExt::permanent`] on a `Result`) to stop retrying at once.
//! The driver then returns [`Error::Permanent`] with the error unchanged.
//!
//! # Error Types
//!
//! - [`RetryError`]: returned when the strategy stops or the context finishes;
//!   carries attempts, elapsed time, last delay and the cause
//! - [`Error`]: what the driver returns, either permanent or retry
//! - [`Stopped`]: why a delay stream terminated

mod driver;
mod error;
mod options;
mod strategy;
mod wrapper;

pub use driver::{run, run_e, run_n, run_ne, run_unit, run_unit_e, run_unit_n, run_unit_ne};
pub use error::{as_retry_error, permanent, Cause, Error, Failure, PermanentExt, RetryError};
pub use options::{Notify, RetryOptions};
pub use strategy::{
    exponential, jitter, stop, truncated_exponential, zero, Constant, DelayStream, DelayStreamExt,
    Delays, Exponential, Stopped, Strategy, UntilStop, STOP,
};
pub use wrapper::{
    max_elapsed_time, max_retries, MaxElapsedTime, MaxRetries, StopCondition, Wrapper,
};

#[cfg(test)]
mod tests;
