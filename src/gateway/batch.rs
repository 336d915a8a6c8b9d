//! Batch Executor: ordered concurrent fan-out of N invocations.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{FuturesOrdered, StreamExt};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ErrorKind;
use crate::protocol::ToolsCallResult;
use crate::{Error, Result};

use super::dispatch::DispatchEngine;
use super::event_bus::Event;

/// Default concurrency cap applied when `options.max_parallel` is absent.
const DEFAULT_MAX_PARALLEL: usize = 8;

/// One call within a batch request.
#[derive(Debug, Clone)]
pub struct BatchCall {
    /// Dispatch target: provider or group id.
    pub target: String,
    /// Tool name.
    pub tool: String,
    /// Tool arguments.
    pub arguments: serde_json::Value,
    /// Optional per-call deadline, capped by the batch deadline.
    pub timeout: Option<Duration>,
}

/// Batch-wide options.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Concurrency cap; defaults to `min(len(calls), 8)`.
    pub max_parallel: Option<usize>,
    /// Overall wall-clock deadline shared by every call.
    pub deadline: Duration,
    /// Cancel remaining calls on first failure.
    pub fail_fast: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_parallel: None,
            deadline: Duration::from_secs(60),
            fail_fast: false,
        }
    }
}

/// Outcome of one call within a batch, preserving its input index.
#[derive(Debug, Clone)]
pub struct BatchCallResult {
    /// Index in the original `calls` slice.
    pub index: usize,
    /// Success payload, if `ok`.
    pub value: Option<ToolsCallResult>,
    /// Taxonomy label, if not `ok`.
    pub error_kind: Option<String>,
    /// Human message, if not `ok`.
    pub message: Option<String>,
}

impl BatchCallResult {
    /// Whether this call succeeded.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.value.is_some()
    }

    fn ok(index: usize, value: ToolsCallResult) -> Self {
        Self {
            index,
            value: Some(value),
            error_kind: None,
            message: None,
        }
    }

    fn err(index: usize, kind: &str, message: String) -> Self {
        Self {
            index,
            value: None,
            error_kind: Some(kind.to_string()),
            message: Some(message),
        }
    }
}

/// Runs [`BatchCall`]s concurrently through a [`DispatchEngine`], bounded by
/// `max_parallel`, preserving result order regardless of completion order.
pub struct BatchExecutor {
    dispatch: Arc<DispatchEngine>,
}

impl BatchExecutor {
    /// Build an executor over `dispatch`.
    #[must_use]
    pub fn new(dispatch: Arc<DispatchEngine>) -> Self {
        Self { dispatch }
    }

    /// Run `calls` under `options`, returning one result per call in input
    /// order.
    pub async fn batch_call(&self, calls: Vec<BatchCall>, options: BatchOptions) -> Vec<BatchCallResult> {
        let started = Instant::now();
        let total = calls.len();
        let max_parallel = options.max_parallel.unwrap_or(total.min(DEFAULT_MAX_PARALLEL)).max(1);
        let semaphore = Arc::new(Semaphore::new(max_parallel));
        let cancel = CancellationToken::new();

        let mut futures = FuturesOrdered::new();
        for (index, call) in calls.into_iter().enumerate() {
            let dispatch = Arc::clone(&self.dispatch);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let per_call_deadline = call.timeout.unwrap_or(options.deadline).min(options.deadline);
            let fail_fast = options.fail_fast;

            futures.push_back(async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return BatchCallResult::err(index, "cancelled", "batch semaphore closed".to_string()),
                };

                if cancel.is_cancelled() {
                    return BatchCallResult::err(index, ErrorKind::Cancelled.as_str(), "cancelled".to_string());
                }

                let outcome = tokio::select! {
                    biased;
                    () = cancel.cancelled() => Err(Error::Cancelled),
                    result = dispatch.dispatch(&call.target, &call.tool, call.arguments, per_call_deadline, None) => result,
                };

                match outcome {
                    Ok(value) => BatchCallResult::ok(index, value),
                    Err(e) => {
                        if fail_fast {
                            cancel.cancel();
                        }
                        let kind = e.kind().map_or("internal", ErrorKind::as_str);
                        BatchCallResult::err(index, kind, e.to_string())
                    }
                }
            });
        }

        // Accumulate outside the timed future: if the deadline fires mid-flight
        // we must keep whatever already completed rather than discard it.
        let mut results = Vec::with_capacity(total);
        let sleep = tokio::time::sleep(options.deadline);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                biased;
                () = &mut sleep => {
                    cancel.cancel();
                    break;
                }
                maybe_result = futures.next() => {
                    match maybe_result {
                        Some(r) => results.push(r),
                        None => break,
                    }
                }
            }
        }

        // Any index missing (outer deadline fired before it completed) is
        // recorded as a timeout.
        if results.len() < total {
            let seen: std::collections::HashSet<usize> = results.iter().map(|r| r.index).collect();
            for index in 0..total {
                if !seen.contains(&index) {
                    results.push(BatchCallResult::err(
                        index,
                        ErrorKind::Timeout.as_str(),
                        "batch deadline exceeded".to_string(),
                    ));
                }
            }
        }
        results.sort_by_key(|r| r.index);

        let success_count = results.iter().filter(|r| r.is_ok()).count();
        let cancelled_count = results
            .iter()
            .filter(|r| r.error_kind.as_deref() == Some(ErrorKind::Cancelled.as_str()))
            .count();
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        debug!(total, success_count, cancelled_count, duration_ms, "batch completed");
        self.dispatch.events().publish(Event::BatchCompleted {
            size: total,
            success_count,
            cancelled_count,
            duration_ms,
        });

        results
    }
}
