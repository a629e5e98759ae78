//! Retry Patterns Example
//!
//! Demonstrates the retry driver against simulated flaky services:
//! - Basic retry with exponential backoff
//! - Comparing delay strategies
//! - Permanent errors that stop retrying at once
//! - Observing retries with a notify callback
//! - Timeouts and caller cancellation
//! - Recovering the last operation error from a retry error

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backstep::prelude::*;
use backstep::retry::{
    as_retry_error, exponential, max_retries, run_n, truncated_exponential, Constant,
    DelayStreamExt, Delays,
};

#[derive(Debug, Clone, PartialEq)]
enum HttpError {
    ServerError(u16),
    ClientError(u16),
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpError::ServerError(code) => write!(f, "server error {}", code),
            HttpError::ClientError(code) => write!(f, "client error {}", code),
        }
    }
}

impl std::error::Error for HttpError {}

// ==================== Basic Retry ====================

/// Example 1: Basic retry with exponential backoff
async fn example_basic_retry() {
    println!("\n=== Example 1: Basic Retry ===");

    let attempts = AtomicU32::new(0);
    let result = run_n(
        &Context::new(),
        exponential(Duration::from_millis(100), 2.0, 0.1),
        |_ctx| {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            println!("  Attempt {}", n);
            async move {
                if n < 3 {
                    Err(Failure::Transient(HttpError::ServerError(503)))
                } else {
                    Ok("success!")
                }
            }
        },
        5,
        RetryOptions::new(),
    )
    .await;

    match result {
        Ok(value) => println!(
            "Success after {} attempts: {}",
            attempts.load(Ordering::SeqCst),
            value
        ),
        Err(e) => println!("Failed: {}", e),
    }
}

// ==================== Delay Strategies ====================

/// Example 2: Comparing delay strategies
async fn example_delay_strategies() {
    println!("\n=== Example 2: Delay Strategies ===");

    let constant = max_retries(5, Constant::new(Duration::from_millis(100)));
    println!("Constant:    {:?}", constant.stream().until_stop().collect::<Vec<_>>());

    let explicit = Delays::new([
        Duration::from_millis(10),
        Duration::from_millis(50),
        Duration::from_millis(250),
    ]);
    println!("Explicit:    {:?}", explicit.stream().until_stop().collect::<Vec<_>>());

    let exp = max_retries(6, exponential(Duration::from_millis(100), 2.0, 0.0));
    println!("Exponential: {:?}", exp.stream().until_stop().collect::<Vec<_>>());

    let capped = max_retries(
        6,
        truncated_exponential(Duration::from_millis(100), 2.0, 0.0, Duration::from_millis(500)),
    );
    println!("Truncated:   {:?}", capped.stream().until_stop().collect::<Vec<_>>());

    let jittered = max_retries(6, exponential(Duration::from_millis(100), 2.0, 0.5));
    println!("Jittered:    {:?}", jittered.stream().until_stop().collect::<Vec<_>>());
}

// ==================== Permanent Errors ====================

/// Example 3: Client errors are permanent and never retried
async fn example_permanent_errors() {
    println!("\n=== Example 3: Permanent Errors ===");

    let attempts = AtomicU32::new(0);
    let result: Result<&str, _> = run(
        &Context::new(),
        Constant::new(Duration::from_millis(50)),
        |_ctx| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(permanent(HttpError::ClientError(400))) }
        },
        RetryOptions::new().with_max_retries(5),
    )
    .await;

    match result {
        Err(Error::Permanent(e)) => println!("Gave up at once: {}", e),
        other => println!("Unexpected: {:?}", other),
    }
    println!("Total attempts: {}", attempts.load(Ordering::SeqCst));
}

// ==================== Notify ====================

/// Example 4: Observing retries with a notify callback
async fn example_notify() {
    println!("\n=== Example 4: Notify ===");

    let attempts = AtomicU32::new(0);
    let result = run(
        &Context::new(),
        exponential(Duration::from_millis(20), 2.0, 0.0),
        |_ctx| {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 4 {
                    Err(Failure::Transient(HttpError::ServerError(502)))
                } else {
                    Ok(n)
                }
            }
        },
        RetryOptions::new().with_notify(|err, delay, attempt, elapsed| {
            println!(
                "  attempt {} failed ({}), retrying in {:?} after {:?}",
                attempt, err, delay, elapsed
            );
        }),
    )
    .await;

    println!("Result: {:?}", result);
}

// ==================== Timeouts and Cancellation ====================

/// Example 5: A timeout bounds the whole call
async fn example_timeout() {
    println!("\n=== Example 5: Timeout ===");

    let result = run_unit(
        &Context::new(),
        Constant::new(Duration::from_millis(40)),
        |_ctx| async { Err(Failure::Transient(HttpError::ServerError(504))) },
        RetryOptions::new().with_timeout(Duration::from_millis(150)),
    )
    .await;

    if let Err(Error::Retry(e)) = &result {
        println!("Timed out after {} attempts: {}", e.retries(), e);
        println!("Context error: {:?}", e.context_error());
    }
}

/// Example 6: The caller cancels a running retry loop
async fn example_cancellation() {
    println!("\n=== Example 6: Cancellation ===");

    let ctx = Context::new();
    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(120)).await;
        println!("  cancelling");
        canceller.cancel();
    });

    let result = run_unit(
        &ctx,
        Constant::new(Duration::from_secs(10)),
        |_ctx| async { Err(Failure::Transient(HttpError::ServerError(503))) },
        RetryOptions::new(),
    )
    .await;

    println!("Result: {:?}", result.map_err(|e| e.to_string()));
}

// ==================== Error Recovery ====================

/// Example 7: Unwrapping the last operation error
async fn example_unwrap() {
    println!("\n=== Example 7: Unwrapping Errors ===");

    let result = run_unit(
        &Context::new(),
        Delays::new([Duration::from_millis(5); 2]),
        |_ctx| async { Err(Failure::Transient(HttpError::ServerError(500))) },
        RetryOptions::new(),
    )
    .await;

    let Err(err) = result else { return };
    let boxed: Box<dyn std::error::Error> = Box::new(err.clone());
    if let Some(retry) = as_retry_error::<HttpError>(boxed.as_ref()) {
        println!("Found retry error in chain after {} attempts", retry.retries());
    }

    match err.into_operation_error() {
        Ok(last) => println!("Last operation error: {}", last),
        Err(e) => println!("No operation error: {}", e),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    println!("======================================");
    println!("       Retry Patterns Example         ");
    println!("======================================");

    example_basic_retry().await;
    example_delay_strategies().await;
    example_permanent_errors().await;
    example_notify().await;
    example_timeout().await;
    example_cancellation().await;
    example_unwrap().await;

    println!("\n======================================");
    println!("           Examples Complete           ");
    println!("======================================");
}
