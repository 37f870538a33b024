//! Serial executor: runs jobs one at a time on a dedicated worker task.
//!
//! The receiver submits its bind-and-serve job here so the caller never waits
//! on the bind itself. The queue is bounded; a submission that finds it full
//! is rejected on the spot instead of being dropped later.

use peerlink_types::{WireError, WireResult};
use std::future::Future;
use std::pin::Pin;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Single worker, bounded queue, abort-on-overflow.
#[derive(Debug)]
pub struct SerialExecutor {
    name: String,
    capacity: usize,
    queue: mpsc::Sender<Job>,
}

impl SerialExecutor {
    /// Spawn the worker. Must be called from within a tokio runtime.
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let name = name.into();
        let capacity = capacity.max(1);
        let (queue, mut jobs) = mpsc::channel::<Job>(capacity);

        let worker = name.clone();
        tokio::spawn(async move {
            debug!(executor = %worker, "Serial executor started");
            while let Some(job) = jobs.recv().await {
                job.await;
            }
            debug!(executor = %worker, "Serial executor stopped");
        });

        Self {
            name,
            capacity,
            queue,
        }
    }

    /// Queue a job. Fails with `ExecutorSaturated` if the queue is full.
    pub fn execute<F>(&self, job: F) -> WireResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.queue.try_send(Box::pin(job)).map_err(|e| match e {
            TrySendError::Full(_) => WireError::ExecutorSaturated {
                name: self.name.clone(),
                capacity: self.capacity,
            },
            TrySendError::Closed(_) => WireError::ExecutorShutdown(self.name.clone()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
