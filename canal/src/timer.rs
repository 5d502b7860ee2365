//! Deadline callbacks for operation timeouts.
//!
//! A [`TimerService`] owns one background thread and a min-heap of armed
//! entries. `schedule` hands it an absolute [`Instant`] plus a callback;
//! the callback runs on the timer thread no earlier than `deadline - slack`
//! and at most once. The slack window lets deadlines that land close
//! together fire in a single wakeup instead of one wakeup each.
//!
//! Cancellation is idempotent and safe to race with firing: each entry has
//! a unique id held in a live-set, and the heap is cleaned lazily. An
//! entry whose id left the live-set is discarded the next time it reaches
//! the top of the heap, so a fired or canceled timer can never touch its
//! callback again.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::executor::Job;

/// Default early-fire tolerance.
pub const DEFAULT_SLACK: Duration = Duration::from_millis(1);

struct Entry {
  deadline: Instant,
  id: u64,
  callback: Job,
}

// Min-heap on (deadline, id): BinaryHeap is a max-heap, so compare inverted.
impl Ord for Entry {
  fn cmp(&self, other: &Self) -> CmpOrdering {
    other
      .deadline
      .cmp(&self.deadline)
      .then_with(|| other.id.cmp(&self.id))
  }
}

impl PartialOrd for Entry {
  fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
    Some(self.cmp(other))
  }
}

impl PartialEq for Entry {
  fn eq(&self, other: &Self) -> bool {
    self.deadline == other.deadline && self.id == other.id
  }
}

impl Eq for Entry {}

struct TimerState {
  heap: BinaryHeap<Entry>,
  /// Ids that are armed: scheduled, not canceled, not fired.
  live: HashSet<u64>,
  next_id: u64,
  shutdown: bool,
}

struct Inner {
  state: Mutex<TimerState>,
  cond: Condvar,
  slack: Duration,
}

/// Schedules callbacks at absolute deadlines on a dedicated thread.
///
/// Dropping the service stops the thread; entries that have not fired by
/// then are discarded.
pub struct TimerService {
  inner: Arc<Inner>,
  thread: Mutex<Option<JoinHandle<()>>>,
}

/// Cancellation handle for one scheduled callback.
pub struct TimerHandle {
  inner: Weak<Inner>,
  id: u64,
}

impl TimerService {
  pub fn new(slack: Duration) -> Self {
    let inner = Arc::new(Inner {
      state: Mutex::new(TimerState {
        heap: BinaryHeap::new(),
        live: HashSet::new(),
        next_id: 0,
        shutdown: false,
      }),
      cond: Condvar::new(),
      slack,
    });

    let worker = Arc::clone(&inner);
    let handle = thread::Builder::new()
      .name("canal-timer".into())
      .spawn(move || worker.run())
      .expect("failed to launch the timer thread");

    Self { inner, thread: Mutex::new(Some(handle)) }
  }

  /// Arms `callback` to run no earlier than `deadline - slack`.
  pub fn schedule(&self, deadline: Instant, callback: Job) -> TimerHandle {
    let mut state = self.inner.state.lock().unwrap();
    let id = state.next_id;
    state.next_id += 1;
    state.live.insert(id);
    state.heap.push(Entry { deadline, id, callback });
    drop(state);
    // The new entry may be the earliest; re-evaluate the sleep.
    self.inner.cond.notify_all();
    TimerHandle { inner: Arc::downgrade(&self.inner), id }
  }

  /// Number of armed entries. Canceled entries leave this count
  /// immediately even though the heap cleans up lazily.
  pub fn armed(&self) -> usize {
    self.inner.state.lock().unwrap().live.len()
  }
}

impl Drop for TimerService {
  fn drop(&mut self) {
    self.inner.state.lock().unwrap().shutdown = true;
    self.inner.cond.notify_all();
    if let Some(handle) = self.thread.lock().unwrap().take() {
      if handle.thread().id() == thread::current().id() {
        // A fired callback owned the last handle to this service; the
        // drop is running on the timer thread itself and must not wait
        // for it.
        drop(handle);
      } else {
        let _ = handle.join();
      }
    }
  }
}

impl TimerHandle {
  /// Disarms the entry. No-op if the callback already ran or the entry
  /// was already canceled; calling this any number of times is fine.
  pub fn cancel(&self) {
    if let Some(inner) = self.inner.upgrade() {
      let mut state = inner.state.lock().unwrap();
      if state.live.remove(&self.id) {
        tracing::trace!(id = self.id, "timer canceled");
      }
      // The heap entry stays behind and is discarded at pop time.
    }
  }
}

impl Inner {
  fn run(&self) {
    let mut state = self.state.lock().unwrap();
    loop {
      if state.shutdown {
        return;
      }

      // Discard heap tops whose ids were canceled.
      while let Some(top) = state.heap.peek() {
        if state.live.contains(&top.id) {
          break;
        }
        state.heap.pop();
      }

      let Some(top) = state.heap.peek() else {
        state = self.cond.wait(state).unwrap();
        continue;
      };

      let now = Instant::now();
      if top.deadline <= now + self.slack {
        let entry = state.heap.pop().unwrap();
        state.live.remove(&entry.id);
        drop(state);
        tracing::trace!(id = entry.id, "timer fired");
        (entry.callback)();
        state = self.state.lock().unwrap();
        continue;
      }

      // Sleep until the earliest deadline enters the slack window, or a
      // schedule/cancel/shutdown pokes the condvar.
      let wait = top.deadline - now - self.slack.min(top.deadline - now);
      let (guard, _) = self.cond.wait_timeout(state, wait).unwrap();
      state = guard;
    }
  }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
