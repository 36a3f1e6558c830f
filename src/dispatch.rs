//! Race-and-fallback dispatch: fire one request per node, keep the first success.

use std::fmt;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use thiserror::Error;

use crate::backend::BackendError;

/// One labelled request taking part in a race.
pub struct Attempt<'a, T> {
    pub label: String,
    pub future: BoxFuture<'a, Result<T, BackendError>>,
}

impl<'a, T> Attempt<'a, T> {
    pub fn new(label: impl Into<String>, future: BoxFuture<'a, Result<T, BackendError>>) -> Self {
        Self {
            label: label.into(),
            future,
        }
    }
}

/// The winning attempt.
#[derive(Debug)]
pub struct Won<T> {
    pub label: String,
    pub value: T,
    pub elapsed: Duration,
}

/// A losing attempt, kept for the failure report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub label: String,
    pub error: String,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error in {}: {}", self.label, self.error)
    }
}

#[derive(Debug, Error)]
pub enum RaceError {
    #[error("no storage nodes to ask")]
    NoCandidates,
    #[error("{}", join_failures(.0))]
    AllFailed(Vec<Failure>),
}

fn join_failures(failures: &[Failure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Run all attempts concurrently and resolve with the first `Ok`.
///
/// Attempts still in flight when a winner is found are dropped, which cancels
/// their requests. If every attempt fails, the failures are returned in the
/// order they completed.
pub async fn first_success<T>(attempts: Vec<Attempt<'_, T>>) -> Result<Won<T>, RaceError> {
    if attempts.is_empty() {
        return Err(RaceError::NoCandidates);
    }

    let started = Instant::now();
    let mut pending: FuturesUnordered<_> = attempts
        .into_iter()
        .map(|attempt| {
            let label = attempt.label;
            attempt.future.map(move |result| (label, result))
        })
        .collect();

    let mut failures = Vec::new();
    while let Some((label, result)) = pending.next().await {
        match result {
            Ok(value) => {
                let elapsed = started.elapsed();
                tracing::debug!(
                    node = %label,
                    elapsed_ms = elapsed.as_millis() as u64,
                    abandoned = pending.len(),
                    "Race won"
                );
                return Ok(Won {
                    label,
                    value,
                    elapsed,
                });
            }
            Err(error) => {
                tracing::debug!(node = %label, error = %error, "Race attempt failed");
                failures.push(Failure {
                    label,
                    error: error.to_string(),
                });
            }
        }
    }

    Err(RaceError::AllFailed(failures))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn delayed<T: Send + 'static>(
        label: &str,
        delay_ms: u64,
        result: Result<T, BackendError>,
    ) -> Attempt<'static, T> {
        Attempt::new(
            label,
            async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                result
            }
            .boxed(),
        )
    }

    #[tokio::test]
    async fn test_fastest_success_wins() {
        let won = first_success(vec![
            delayed("slow", 200, Ok("slow")),
            delayed("fast", 10, Ok("fast")),
        ])
        .await
        .unwrap();

        assert_eq!(won.label, "fast");
        assert_eq!(won.value, "fast");
    }

    #[tokio::test]
    async fn test_fast_failures_fall_back_to_slower_success() {
        let won = first_success(vec![
            delayed("a", 5, Err(BackendError::NotFound)),
            delayed("b", 50, Ok(42)),
            delayed("c", 1, Err(BackendError::Decode("bad".into()))),
        ])
        .await
        .unwrap();

        assert_eq!(won.label, "b");
        assert_eq!(won.value, 42);
    }

    #[tokio::test]
    async fn test_all_failures_are_reported_in_completion_order() {
        let err = first_success::<()>(vec![
            delayed("late", 40, Err(BackendError::NotFound)),
            delayed("early", 1, Err(BackendError::Decode("boom".into()))),
        ])
        .await
        .unwrap_err();

        match &err {
            RaceError::AllFailed(failures) => {
                assert_eq!(failures.len(), 2);
                assert_eq!(failures[0].label, "early");
                assert_eq!(failures[1].label, "late");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(
            err.to_string(),
            "Error in early: invalid response: boom; Error in late: not found"
        );
    }

    #[tokio::test]
    async fn test_no_attempts() {
        let err = first_success::<()>(Vec::new()).await.unwrap_err();
        assert!(matches!(err, RaceError::NoCandidates));
    }

    #[tokio::test]
    async fn test_losers_are_cancelled() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);

        let slow = Attempt::new(
            "slow",
            async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                flag.store(true, Ordering::SeqCst);
                Ok(1)
            }
            .boxed(),
        );

        let won = first_success(vec![slow, delayed("fast", 1, Ok(2))])
            .await
            .unwrap();
        assert_eq!(won.value, 2);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }
}
