//! Helpers for integration tests.
//!
//! Shorthands for the runtime/channel plumbing every test needs. Only
//! meant for this crate's own test suite.

use std::sync::Arc;

use crate::channel::Channel;
use crate::runtime::Runtime;

/// A fresh runtime with the default executor and timer.
#[doc(hidden)]
pub fn runtime() -> Arc<Runtime> {
  Runtime::new()
}

/// A rendezvous channel plus the runtime it lives on.
#[doc(hidden)]
pub fn rendezvous_channel<T: Send + 'static>() -> (Arc<Runtime>, Channel<T>) {
  let rt = Runtime::new();
  let ch = Channel::rendezvous(&rt);
  (rt, ch)
}

/// A buffered channel plus the runtime it lives on.
#[doc(hidden)]
pub fn bounded_channel<T: Send + 'static>(
  capacity: usize,
) -> (Arc<Runtime>, Channel<T>) {
  let rt = Runtime::new();
  let ch = Channel::bounded(&rt, capacity);
  (rt, ch)
}
