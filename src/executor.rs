//! Bounded fail-fast task group.
//!
//! The per-request scheduling primitive: tasks run on the tokio
//! runtime behind a semaphore bounding concurrency, the first error
//! wins, and a shared cancel flag stops tasks that have not started
//! while in-flight siblings are aborted.

use crate::error::{ExecError, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Boxed future alias used at async seams that need recursion or
/// dynamic dispatch.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub struct TaskGroup {
    semaphore: Arc<Semaphore>,
    cancelled: Arc<AtomicBool>,
    handles: Vec<JoinHandle<Result<()>>>,
}

impl TaskGroup {
    /// Open a group running at most `limit` tasks concurrently.
    /// Zero means unbounded.
    pub fn new(limit: usize) -> Self {
        let permits = if limit == 0 {
            Semaphore::MAX_PERMITS
        } else {
            limit
        };
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            cancelled: Arc::new(AtomicBool::new(false)),
            handles: Vec::new(),
        }
    }

    /// Schedule a task. Tasks queued after a failure never run.
    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        if self.cancelled.load(Ordering::SeqCst) {
            return;
        }
        let semaphore = Arc::clone(&self.semaphore);
        let cancelled = Arc::clone(&self.cancelled);
        self.handles.push(tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| ExecError::new("TaskGroup.spawn", e))?;
            if cancelled.load(Ordering::SeqCst) {
                return Ok(());
            }
            match task.await {
                Ok(()) => Ok(()),
                Err(err) => {
                    cancelled.store(true, Ordering::SeqCst);
                    Err(err)
                }
            }
        }));
    }

    /// Wait for every task. On the first failure, remaining tasks
    /// are aborted and that error is returned.
    pub async fn wait(self) -> Result<()> {
        let mut handles = self.handles;
        let mut first_err = None;

        for i in 0..handles.len() {
            let outcome = (&mut handles[i]).await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    if first_err.is_none() {
                        self.cancelled.store(true, Ordering::SeqCst);
                        for handle in &handles[i + 1..] {
                            handle.abort();
                        }
                        first_err = Some(err);
                    }
                }
                Err(join_err) => {
                    if !join_err.is_cancelled() && first_err.is_none() {
                        self.cancelled.store(true, Ordering::SeqCst);
                        for handle in &handles[i + 1..] {
                            handle.abort();
                        }
                        first_err =
                            Some(ExecError::new("TaskGroup.wait", join_err).into());
                    }
                }
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Bound a future by an optional timeout.
pub async fn with_timeout<T, F>(timeout: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout {
        Some(duration) if !duration.is_zero() => tokio::time::timeout(duration, fut)
            .await
            .map_err(|_| ExecError::message("Hub.execute", "request timed out"))?,
        _ => fut.await,
    }
}
