//! Staged pipeline driver with named fan-out sets.
//!
//! A [`Pipeline`] runs one logical flow: each [`Pipeline::step`] suspends
//! the flow on a single operation, and [`Pipeline::fan_out`] starts a
//! labelled set of operations together and resumes once all of them have
//! completed. A failing member resumes the flow with that failure right
//! away. The remaining members are not cancelled: they are detached onto the
//! runtime and left to finish, and whatever they produce is discarded.

use std::collections::HashMap;
use std::future::Future;
use std::time::Instant;

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use tracing::{debug, warn};

use crate::error::{DistCheckError, Result};

/// A boxed member of a fan-out set.
pub type StageFuture<T> = BoxFuture<'static, Result<T>>;

/// Labelled set of operations started concurrently by [`FanOut::join`].
pub struct FanOut<T> {
    members: Vec<(&'static str, StageFuture<T>)>,
}

impl<T> Default for FanOut<T> {
    fn default() -> Self {
        Self {
            members: Vec::new(),
        }
    }
}

impl<T> FanOut<T>
where
    T: Send + 'static,
{
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member. Labels must be unique within one set.
    pub fn with<Fut>(mut self, label: &'static str, operation: Fut) -> Self
    where
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        debug_assert!(
            self.members.iter().all(|(existing, _)| *existing != label),
            "duplicate fan-out label {label}"
        );
        self.members.push((label, operation.boxed()));
        self
    }

    /// Drive every member to completion, failing fast on the first error.
    ///
    /// On failure the members still in flight keep running detached from
    /// the caller; their results are dropped.
    pub async fn join(self) -> Result<Joined<T>> {
        let mut results = HashMap::with_capacity(self.members.len());
        let mut running: FuturesUnordered<_> = self
            .members
            .into_iter()
            .map(|(label, operation)| async move { (label, operation.await) })
            .collect();

        while let Some((label, outcome)) = running.next().await {
            match outcome {
                Ok(value) => {
                    debug!(label, "fan-out member completed");
                    results.insert(label, value);
                }
                Err(err) => {
                    warn!(label, in_flight = running.len(), "fan-out member failed: {err}");
                    detach(running);
                    return Err(err);
                }
            }
        }

        Ok(Joined { results })
    }
}

fn detach<F>(mut running: FuturesUnordered<F>)
where
    F: Future + Send + 'static,
    F::Output: Send,
{
    if running.is_empty() {
        return;
    }
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move { while running.next().await.is_some() {} });
        }
        Err(_) => warn!("no runtime to detach in-flight fan-out members onto; dropping them"),
    }
}

/// Results of a completed fan-out, keyed by the labels given to [`FanOut::with`].
#[derive(Debug)]
pub struct Joined<T> {
    results: HashMap<&'static str, T>,
}

impl<T> Joined<T> {
    /// Remove and return the result for `label`.
    pub fn take(&mut self, label: &str) -> Result<T> {
        self.results
            .remove(label)
            .ok_or_else(|| DistCheckError::Other(format!("fan-out has no result labelled {label}")))
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Sequential driver for the stages of one pipeline invocation.
pub struct Pipeline {
    name: &'static str,
    steps: usize,
}

impl Pipeline {
    /// Start a pipeline; `name` tags every stage it logs.
    pub fn new(name: &'static str) -> Self {
        Self { name, steps: 0 }
    }

    /// Number of steps started so far.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Suspend the flow on a single operation.
    pub async fn step<T, Fut>(&mut self, label: &'static str, operation: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        self.steps += 1;
        let started = Instant::now();
        debug!(pipeline = self.name, step = self.steps, label, "stage started");
        let outcome = operation.await;
        match &outcome {
            Ok(_) => debug!(
                pipeline = self.name,
                label,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "stage finished"
            ),
            Err(err) => warn!(pipeline = self.name, label, "stage failed: {err}"),
        }
        outcome
    }

    /// Suspend the flow on a fan-out set.
    pub async fn fan_out<T>(&mut self, label: &'static str, set: FanOut<T>) -> Result<Joined<T>>
    where
        T: Send + 'static,
    {
        self.step(label, set.join()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn join_maps_labels_to_results() {
        let mut joined = FanOut::new()
            .with("a", async { Ok(1u32) })
            .with("b", async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(2u32)
            })
            .join()
            .await
            .expect("all members succeed");

        assert_eq!(joined.len(), 2);
        assert_eq!(joined.take("a").unwrap(), 1);
        assert_eq!(joined.take("b").unwrap(), 2);
        assert!(joined.take("a").is_err());
    }

    #[tokio::test]
    async fn empty_fan_out_joins_immediately() {
        let joined = FanOut::<()>::new().join().await.unwrap();
        assert!(joined.is_empty());
    }

    #[tokio::test]
    async fn failure_resumes_without_waiting_for_slow_members() {
        let set = FanOut::new()
            .with("slow", async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .with("broken", async { Err(DistCheckError::SignatureMismatch) });

        let outcome = tokio::time::timeout(Duration::from_secs(5), set.join())
            .await
            .expect("fail-fast join returns promptly");
        assert!(matches!(outcome, Err(DistCheckError::SignatureMismatch)));
    }

    #[tokio::test]
    async fn failed_fan_out_leaves_other_members_running() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let set = FanOut::new()
            .with("survivor", async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .with("broken", async { Err(DistCheckError::NoApprovedFile) });

        assert!(set.join().await.is_err());
        assert!(!finished.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn pipeline_counts_steps_and_propagates_errors() {
        let mut pipeline = Pipeline::new("test");
        let value = pipeline.step("first", async { Ok(5) }).await.unwrap();
        assert_eq!(value, 5);

        let err = pipeline
            .step::<(), _>("second", async { Err(DistCheckError::NoApprovedVersion) })
            .await
            .unwrap_err();
        assert!(matches!(err, DistCheckError::NoApprovedVersion));

        let mut joined = pipeline
            .fan_out("third", FanOut::new().with("only", async { Ok("x") }))
            .await
            .unwrap();
        assert_eq!(joined.take("only").unwrap(), "x");
        assert_eq!(pipeline.steps(), 3);
    }
}
