//! Bounded background task pools.
//!
//! Two separately sized pools are wired by the engine: a small user-facing
//! one (notification fan-out) and a larger best-effort one (activity and
//! analytics logging). Both apply the same backpressure discipline: when
//! the queue and the workers are both saturated, the caller executes the
//! task itself: the producer is throttled under load instead of work
//! being dropped or rejected.
//!
//! Tasks are fire-and-continue: their failure is the task's own problem
//! (logged inside the task), never the submitting transaction's.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Pool counters, for health reporting and tests.
#[derive(Debug, Default)]
pub struct PoolStats {
    pub submitted: AtomicU64,
    pub completed: AtomicU64,
    /// Tasks the submitting caller had to run inline (backpressure hits).
    pub caller_runs: AtomicU64,
}

/// A fixed set of workers pulling from a bounded queue.
pub struct TaskPool {
    name: &'static str,
    tx: Mutex<Option<mpsc::Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stats: Arc<PoolStats>,
}

impl TaskPool {
    pub fn new(name: &'static str, worker_count: usize, queue_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Task>(queue_capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let stats = Arc::new(PoolStats::default());

        let workers = (0..worker_count.max(1))
            .map(|i| {
                let rx = rx.clone();
                let stats = stats.clone();
                tokio::spawn(async move {
                    debug!(pool = name, worker = i, "worker started");
                    loop {
                        let task = rx.lock().await.recv().await;
                        match task {
                            Some(task) => {
                                task.await;
                                stats.completed.fetch_add(1, Ordering::Relaxed);
                            }
                            None => break,
                        }
                    }
                    debug!(pool = name, worker = i, "worker stopped");
                })
            })
            .collect();

        Self {
            name,
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            stats,
        }
    }

    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Hand a task to the pool. If the queue is full (workers and buffer
    /// both saturated), the calling task runs it inline before returning;
    /// work is throttled, never dropped.
    pub async fn execute<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        let sender = self.tx.lock().expect("pool lock poisoned").clone();

        let inline_task: Task = match sender {
            Some(tx) => match tx.try_send(Box::pin(task)) {
                Ok(()) => return,
                Err(mpsc::error::TrySendError::Full(task)) => {
                    warn!(pool = self.name, "pool saturated, caller running task inline");
                    task
                }
                Err(mpsc::error::TrySendError::Closed(task)) => task,
            },
            // Pool already draining; still never drop work.
            None => Box::pin(task),
        };

        self.stats.caller_runs.fetch_add(1, Ordering::Relaxed);
        inline_task.await;
        self.stats.completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Stop accepting work and wait for queued tasks to finish.
    pub async fn shutdown(&self) {
        info!(pool = self.name, "draining task pool");
        drop(self.tx.lock().expect("pool lock poisoned").take());
        let workers = std::mem::take(&mut *self.workers.lock().expect("pool lock poisoned"));
        for worker in workers {
            let _ = worker.await;
        }
    }
}
