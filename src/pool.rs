//! Fixed-size worker pool scoped to one merge run
//!
//! Jobs go out over a channel to N worker threads. Every job produces exactly
//! one [`TaskReport`], including jobs that panic or are cancelled before they
//! start. The pool is consumed by its shutdown, so a run can never reuse it.

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{never, select, unbounded, Receiver, RecvTimeoutError, Sender};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::ShutdownConfig;
use crate::platform::Ctrl;
use crate::task::{TaskOutcome, TaskReport};

/// Cooperative cancellation shared by the pool and its running tasks
#[derive(Debug, Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    trigger: Arc<Mutex<Option<Sender<()>>>>,
    closed: Receiver<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (trigger, closed) = crossbeam_channel::bounded(0);
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            trigger: Arc::new(Mutex::new(Some(trigger))),
            closed,
        }
    }

    /// Cancel every holder of this token; wakes tasks blocked in `wait`
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let mut trigger = match self.trigger.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Dropping the only sender disconnects every receiver
        trigger.take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Sleep for `timeout` unless cancelled first. Returns false on cancellation.
    pub fn wait(&self, timeout: Duration) -> bool {
        if self.is_cancelled() {
            return false;
        }
        if timeout.is_zero() {
            return true;
        }
        matches!(
            self.closed.recv_timeout(timeout),
            Err(RecvTimeoutError::Timeout)
        )
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

type Job = Box<dyn FnOnce(&CancelToken) -> TaskOutcome + Send + 'static>;

struct Submission {
    path: PathBuf,
    job: Job,
}

/// How the pool went down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every worker finished within the orderly timeout
    Completed,
    /// Tasks were cancelled; `remaining` workers were still running after the
    /// forced timeout and have been detached
    Forced { remaining: usize },
    /// An interrupt arrived while waiting; tasks were cancelled
    Interrupted { remaining: usize },
}

impl ShutdownOutcome {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, ShutdownOutcome::Interrupted { .. })
    }

    pub fn remaining(&self) -> usize {
        match self {
            ShutdownOutcome::Completed => 0,
            ShutdownOutcome::Forced { remaining } | ShutdownOutcome::Interrupted { remaining } => {
                *remaining
            }
        }
    }
}

/// Result of shutting the pool down
#[derive(Debug)]
pub struct PoolShutdown {
    pub outcome: ShutdownOutcome,
    pub reports: Vec<TaskReport>,
    pub submitted: usize,
}

impl PoolShutdown {
    /// Tasks whose report never arrived (their worker was detached)
    pub fn unreported(&self) -> usize {
        self.submitted.saturating_sub(self.reports.len())
    }
}

enum WaitResult {
    Done,
    TimedOut,
    Interrupted,
}

pub struct WorkerPool {
    job_sender: Option<Sender<Submission>>,
    report_receiver: Receiver<TaskReport>,
    exit_receiver: Receiver<usize>,
    handles: Vec<JoinHandle<()>>,
    cancel: CancelToken,
    submitted: usize,
}

impl WorkerPool {
    pub fn new(num_workers: usize) -> Result<Self> {
        if num_workers == 0 {
            return Err(anyhow!("Worker pool needs at least one thread"));
        }

        let (job_sender, job_receiver) = unbounded::<Submission>();
        let (report_sender, report_receiver) = unbounded();
        let (exit_sender, exit_receiver) = unbounded();
        let cancel = CancelToken::new();

        let mut handles = Vec::with_capacity(num_workers);
        for worker_id in 0..num_workers {
            let jobs = job_receiver.clone();
            let reports = report_sender.clone();
            let exits = exit_sender.clone();
            let worker_cancel = cancel.clone();

            let handle = thread::Builder::new()
                .name(format!("logweave-worker-{}", worker_id))
                .spawn(move || worker_thread(worker_id, jobs, reports, exits, worker_cancel))
                .with_context(|| format!("Failed to spawn worker thread {}", worker_id))?;
            handles.push(handle);
        }

        Ok(Self {
            job_sender: Some(job_sender),
            report_receiver,
            exit_receiver,
            handles,
            cancel,
            submitted: 0,
        })
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Queue a job for the next idle worker
    pub fn submit<F>(&mut self, path: impl Into<PathBuf>, job: F) -> Result<()>
    where
        F: FnOnce(&CancelToken) -> TaskOutcome + Send + 'static,
    {
        let sender = self
            .job_sender
            .as_ref()
            .ok_or_else(|| anyhow!("Worker pool is no longer accepting tasks"))?;
        sender
            .send(Submission {
                path: path.into(),
                job: Box::new(job),
            })
            .map_err(|_| anyhow!("All worker threads have exited"))?;
        self.submitted += 1;
        Ok(())
    }

    /// Orderly shutdown: stop accepting jobs and let queued and running ones
    /// finish within the graceful timeout, then cancel and wait the forced
    /// timeout. A `Ctrl::Shutdown` message on `ctrl` cancels right away.
    pub fn shutdown(mut self, timeouts: &ShutdownConfig, ctrl: &Receiver<Ctrl>) -> PoolShutdown {
        self.job_sender.take();
        let mut remaining = self.handles.len();

        let deadline = Instant::now() + timeouts.graceful_timeout;
        let outcome = match self.wait_for_workers(&mut remaining, deadline, Some(ctrl)) {
            WaitResult::Done => ShutdownOutcome::Completed,
            WaitResult::TimedOut => {
                self.cancel.cancel();
                self.wait_forced(&mut remaining, timeouts.force_timeout);
                ShutdownOutcome::Forced { remaining }
            }
            WaitResult::Interrupted => {
                self.cancel.cancel();
                self.wait_forced(&mut remaining, timeouts.force_timeout);
                ShutdownOutcome::Interrupted { remaining }
            }
        };

        self.finish(outcome, remaining)
    }

    /// Immediate shutdown after a dispatch failure: cancel everything and wait
    /// only the forced timeout
    pub fn shutdown_now(mut self, force_timeout: Duration) -> PoolShutdown {
        self.job_sender.take();
        self.cancel.cancel();
        let mut remaining = self.handles.len();
        self.wait_forced(&mut remaining, force_timeout);
        self.finish(ShutdownOutcome::Forced { remaining }, remaining)
    }

    fn wait_forced(&self, remaining: &mut usize, force_timeout: Duration) {
        let deadline = Instant::now() + force_timeout;
        // Interrupts are not consulted once cancellation is under way
        let _ = self.wait_for_workers(remaining, deadline, None);
    }

    fn wait_for_workers(
        &self,
        remaining: &mut usize,
        deadline: Instant,
        ctrl: Option<&Receiver<Ctrl>>,
    ) -> WaitResult {
        let mut ctrl_open = ctrl.is_some();

        while *remaining > 0 {
            let wait = deadline.saturating_duration_since(Instant::now());
            if wait.is_zero() {
                return WaitResult::TimedOut;
            }

            let ctrl_rx = match ctrl {
                Some(rx) if ctrl_open => rx.clone(),
                _ => never(),
            };

            select! {
                recv(self.exit_receiver) -> msg => match msg {
                    Ok(_) => *remaining -= 1,
                    // All exit senders dropped: no worker is left running
                    Err(_) => *remaining = 0,
                },
                recv(ctrl_rx) -> msg => match msg {
                    Ok(Ctrl::Shutdown { .. }) => return WaitResult::Interrupted,
                    Err(_) => ctrl_open = false,
                },
                default(wait) => return WaitResult::TimedOut,
            }
        }

        WaitResult::Done
    }

    fn finish(self, outcome: ShutdownOutcome, remaining: usize) -> PoolShutdown {
        if remaining == 0 {
            for handle in self.handles {
                // Panics inside jobs are caught, so a worker only fails to join
                // if reporting itself panicked
                let _ = handle.join();
            }
        }
        // Otherwise the handles are dropped and stuck workers are detached

        let reports: Vec<TaskReport> = self.report_receiver.try_iter().collect();
        PoolShutdown {
            outcome,
            reports,
            submitted: self.submitted,
        }
    }
}

/// Signals the pool when a worker thread exits, even by unwinding
struct ExitGuard {
    worker_id: usize,
    exits: Sender<usize>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let _ = self.exits.send(self.worker_id);
    }
}

/// Worker thread: runs jobs until the job channel is closed and drained
fn worker_thread(
    worker_id: usize,
    jobs: Receiver<Submission>,
    reports: Sender<TaskReport>,
    exits: Sender<usize>,
    cancel: CancelToken,
) {
    let _guard = ExitGuard { worker_id, exits };

    while let Ok(Submission { path, job }) = jobs.recv() {
        let outcome = if cancel.is_cancelled() {
            // Queued but never started
            TaskOutcome::Cancelled { lines: 0 }
        } else {
            match panic::catch_unwind(AssertUnwindSafe(|| job(&cancel))) {
                Ok(outcome) => outcome,
                Err(payload) => TaskOutcome::Panicked {
                    message: panic_message(payload.as_ref()),
                },
            }
        };

        if reports.send(TaskReport { path, outcome }).is_err() {
            break;
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
