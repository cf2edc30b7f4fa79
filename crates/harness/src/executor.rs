//! Executors: run a batch of independent instances and hand them back.
//!
//! A launched batch belongs to the executor until [`PendingBatch::wait`]
//! returns; the host cannot reach the instances in between.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use rayon::prelude::*;
use rvfleet_common::HarnessConfig;
use rvfleet_kernel::{Processor, RunOutcome};

/// Failures of the batch backend itself, not of any guest.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("failed to spawn batch thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("batch did not complete within {timeout:?}")]
    TimedOut { timeout: Duration },
    #[error("batch worker exited without returning instances")]
    WorkerLost,
    #[error("batch returned {returned} instances, expected {expected}")]
    LostInstances { expected: usize, returned: usize },
}

/// One instance after its run.
#[derive(Debug, Clone)]
pub struct InstanceRun {
    pub processor: Processor,
    pub outcome: RunOutcome,
}

/// A launched batch. Consumed by [`wait`](Self::wait).
#[derive(Debug)]
pub struct PendingBatch {
    receiver: mpsc::Receiver<Vec<InstanceRun>>,
    cancel: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    expected: usize,
}

impl PendingBatch {
    /// A batch that already finished on the calling thread.
    fn ready(runs: Vec<InstanceRun>) -> Self {
        let (sender, receiver) = mpsc::channel();
        let expected = runs.len();
        // The receiver is alive, so the send cannot fail.
        let _ = sender.send(runs);
        Self {
            receiver,
            cancel: Arc::new(AtomicBool::new(false)),
            worker: None,
            expected,
        }
    }

    /// Block until every instance has finished, or until `timeout` passes.
    ///
    /// On timeout the batch is cancelled and drained before the error is
    /// returned, so no worker outlives the call.
    pub fn wait(mut self, timeout: Option<Duration>) -> Result<Vec<InstanceRun>, ExecutorError> {
        let _span = tracing::info_span!("wait", expected = self.expected).entered();
        let received = match timeout {
            None => self.receiver.recv().map_err(|_| ExecutorError::WorkerLost),
            Some(timeout) => match self.receiver.recv_timeout(timeout) {
                Ok(runs) => Ok(runs),
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    tracing::warn!(?timeout, "batch timed out, cancelling");
                    self.cancel.store(true, Ordering::Relaxed);
                    let _ = self.receiver.recv();
                    Err(ExecutorError::TimedOut { timeout })
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => Err(ExecutorError::WorkerLost),
            },
        };
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                return Err(ExecutorError::WorkerLost);
            }
        }

        let runs = received?;
        if runs.len() != self.expected {
            return Err(ExecutorError::LostInstances {
                expected: self.expected,
                returned: runs.len(),
            });
        }
        Ok(runs)
    }
}

/// A backend that runs each instance to completion independently.
pub trait Executor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Take ownership of `instances` and start running them.
    fn launch(
        &self,
        instances: Vec<Processor>,
        config: &HarnessConfig,
    ) -> Result<PendingBatch, ExecutorError>;
}

fn pair(instances: Vec<Processor>, outcomes: Vec<RunOutcome>) -> Vec<InstanceRun> {
    instances
        .into_iter()
        .zip(outcomes)
        .map(|(processor, outcome)| InstanceRun { processor, outcome })
        .collect()
}

/// Runs groups of instances as parallel blocks on a rayon pool.
///
/// Instances inside a group run one after another on the same worker, the
/// way lanes of one block share a core. Group size never affects results.
#[derive(Debug, Clone, Default)]
pub struct ParallelExecutor {
    /// Worker threads. `None` uses rayon's default.
    pub threads: Option<usize>,
}

impl ParallelExecutor {
    pub fn with_threads(threads: usize) -> Self {
        Self {
            threads: Some(threads),
        }
    }
}

impl Executor for ParallelExecutor {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn launch(
        &self,
        mut instances: Vec<Processor>,
        config: &HarnessConfig,
    ) -> Result<PendingBatch, ExecutorError> {
        let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("rvfleet-{i}"));
        if let Some(threads) = self.threads {
            builder = builder.num_threads(threads);
        }
        let pool = builder.build()?;

        let group_size = config.group_size.max(1);
        let max_steps = config.max_steps;
        let expected = instances.len();
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);
        let (sender, receiver) = mpsc::channel();

        tracing::info!(
            instances = expected,
            group_size,
            threads = pool.current_num_threads(),
            "launching parallel batch"
        );

        let worker = std::thread::Builder::new()
            .name("rvfleet-batch".into())
            .spawn(move || {
                let outcomes: Vec<RunOutcome> = pool.install(|| {
                    instances
                        .par_chunks_mut(group_size)
                        .map(|group| {
                            group
                                .iter_mut()
                                .map(|instance| instance.run(max_steps, &flag))
                                .collect::<Vec<_>>()
                        })
                        .collect::<Vec<_>>()
                        .into_iter()
                        .flatten()
                        .collect()
                });
                let _ = sender.send(pair(instances, outcomes));
            })
            .map_err(ExecutorError::Spawn)?;

        Ok(PendingBatch {
            receiver,
            cancel,
            worker: Some(worker),
            expected,
        })
    }
}

/// Runs every instance on the calling thread, in index order.
///
/// The batch is complete when `launch` returns, so the wait timeout never
/// applies.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialExecutor;

impl Executor for SerialExecutor {
    fn name(&self) -> &'static str {
        "serial"
    }

    fn launch(
        &self,
        mut instances: Vec<Processor>,
        config: &HarnessConfig,
    ) -> Result<PendingBatch, ExecutorError> {
        tracing::info!(instances = instances.len(), "running serial batch");
        let never = AtomicBool::new(false);
        let outcomes = instances
            .iter_mut()
            .map(|instance| instance.run(config.max_steps, &never))
            .collect();
        Ok(PendingBatch::ready(pair(instances, outcomes)))
    }
}
