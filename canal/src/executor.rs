//! Deferred execution of completion callbacks.
//!
//! The channel core never runs user code while it holds a lock, and never
//! on the stack of the operation that triggered the completion. Everything
//! a future wants to run once it completes is handed to an [`Executor`],
//! which runs it later, in submission order.
//!
//! Two implementations ship with the crate:
//!
//! - [`ThreadExecutor`]: a small pool of worker threads draining one
//!   queue. This is the default inside [`Runtime::new`](crate::Runtime::new).
//! - [`StepExecutor`]: a manually driven queue for deterministic tests
//!   and single-threaded embeddings; nothing runs until [`tick`] or
//!   [`run_until_idle`] is called.
//!
//! [`tick`]: StepExecutor::tick
//! [`run_until_idle`]: StepExecutor::run_until_idle

use std::collections::VecDeque;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::sync::Mutex;

/// A unit of deferred work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Schedules zero-argument functions for later execution.
///
/// Implementations must not run the job on the caller's stack; completion
/// chains would otherwise recurse without bound. Jobs submitted from one
/// thread run in submission order.
pub trait Executor: Send + Sync + 'static {
  fn schedule(&self, job: Job);
}

// ---------------------------------------------------------------------------
// ThreadExecutor
// ---------------------------------------------------------------------------

/// A fixed pool of worker threads draining a shared FIFO queue.
///
/// Dropping the executor disconnects the queue and joins every worker;
/// jobs already submitted still run before the workers exit.
pub struct ThreadExecutor {
  sender: Mutex<Option<Sender<Job>>>,
  workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadExecutor {
  /// Spawns `workers` threads. Passing `0` defaults to 1.
  pub fn new(workers: usize) -> Self {
    let (tx, rx) = unbounded::<Job>();
    let handles = (0..workers.max(1))
      .map(|i| {
        let rx: Receiver<Job> = rx.clone();
        spawn_worker(format!("canal-worker-{i}"), move || {
          while let Ok(job) = rx.recv() {
            job();
          }
        })
      })
      .collect();

    Self { sender: Mutex::new(Some(tx)), workers: Mutex::new(handles) }
  }
}

impl Executor for ThreadExecutor {
  fn schedule(&self, job: Job) {
    if let Some(tx) = self.sender.lock().as_ref() {
      // Send only fails once Drop has disconnected the queue.
      let _ = tx.send(job);
    }
  }
}

impl Drop for ThreadExecutor {
  fn drop(&mut self) {
    // Disconnect first so the workers' recv() loops terminate.
    self.sender.lock().take();
    let current = thread::current().id();
    for handle in self.workers.lock().drain(..) {
      if handle.thread().id() == current {
        // A job owned the last handle to this executor, so the drop is
        // running on one of our own workers; joining would wait on
        // ourselves. The thread unwinds on its own once the job ends.
        drop(handle);
      } else {
        let _ = handle.join();
      }
    }
  }
}

fn spawn_worker<F>(name: String, body: F) -> JoinHandle<()>
where
  F: FnOnce() + Send + 'static,
{
  thread::Builder::new()
    .name(name)
    .spawn(body)
    .expect("failed to launch a worker thread")
}

// ---------------------------------------------------------------------------
// StepExecutor
// ---------------------------------------------------------------------------

/// A queue that only makes progress when told to.
///
/// `schedule` enqueues; [`tick`](Self::tick) pops and runs one job;
/// [`run_until_idle`](Self::run_until_idle) keeps ticking until the queue
/// stays empty, which makes interleavings reproducible in tests.
pub struct StepExecutor {
  queue: Mutex<VecDeque<Job>>,
}

impl Default for StepExecutor {
  fn default() -> Self {
    Self::new()
  }
}

impl StepExecutor {
  pub const fn new() -> Self {
    Self { queue: Mutex::new(VecDeque::new()) }
  }

  /// Number of jobs waiting to run.
  pub fn pending(&self) -> usize {
    self.queue.lock().len()
  }

  /// Runs the oldest queued job, if any. Returns whether one ran.
  pub fn tick(&self) -> bool {
    // Pop under the lock, run outside it: the job may schedule more work.
    let job = self.queue.lock().pop_front();
    match job {
      Some(job) => {
        job();
        true
      }
      None => false,
    }
  }

  /// Ticks until the queue stays empty; returns how many jobs ran.
  pub fn run_until_idle(&self) -> usize {
    let mut ran = 0;
    while self.tick() {
      ran += 1;
    }
    ran
  }
}

impl Executor for StepExecutor {
  fn schedule(&self, job: Job) {
    self.queue.lock().push_back(job);
  }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
