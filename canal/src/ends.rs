//! Direction-restricted channel handles with auto-retire bookkeeping.
//!
//! A [`ReadEnd`] or [`WriteEnd`] registers itself with the channel while
//! alive. When the last end of a direction is released the channel knows
//! that side can never act again and retires itself: losing all readers
//! fails queued writers and drops the buffer, losing all writers lets the
//! buffer drain first. Release is idempotent and also happens on drop, so
//! scoped use is enough for the bookkeeping to stay balanced.
//!
//! Ends taken from a channel that is already retired come back released;
//! their operations fail with [`ChannelError::Retired`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::channel::{Channel, Deadline};
use crate::error::ChannelError;
use crate::future::OpFuture;

/// The receiving side of a channel.
pub struct ReadEnd<T: Send + 'static> {
  channel: Channel<T>,
  released: AtomicBool,
}

/// The sending side of a channel.
pub struct WriteEnd<T: Send + 'static> {
  channel: Channel<T>,
  released: AtomicBool,
}

impl<T: Send + 'static> Channel<T> {
  /// Takes a read end, incrementing the channel's live-reader count.
  pub fn read_end(&self) -> ReadEnd<T> {
    let joined = self.join_read();
    ReadEnd { channel: self.clone(), released: AtomicBool::new(!joined) }
  }

  /// Takes a write end, incrementing the channel's live-writer count.
  pub fn write_end(&self) -> WriteEnd<T> {
    let joined = self.join_write();
    WriteEnd { channel: self.clone(), released: AtomicBool::new(!joined) }
  }
}

impl<T: Send + 'static> ReadEnd<T> {
  pub fn channel(&self) -> &Channel<T> {
    &self.channel
  }

  pub fn is_released(&self) -> bool {
    self.released.load(Ordering::Acquire)
  }

  /// Gives the end back. The first call decrements the live-reader
  /// count; later calls (and the implicit one in `Drop`) are no-ops.
  pub fn release(&self) {
    if !self.released.swap(true, Ordering::AcqRel) {
      self.channel.leave_read();
    }
  }

  pub fn read_async(&self) -> OpFuture<T> {
    if self.is_released() {
      return OpFuture::ready(
        Arc::clone(self.channel.runtime().executor()),
        Err(ChannelError::Retired),
      );
    }
    self.channel.read_async()
  }

  pub fn read_async_before(&self, deadline: Deadline) -> OpFuture<T> {
    if self.is_released() {
      return OpFuture::ready(
        Arc::clone(self.channel.runtime().executor()),
        Err(ChannelError::Retired),
      );
    }
    self.channel.read_async_before(deadline)
  }

  pub fn read(&self) -> Result<T, ChannelError> {
    self.read_async().blocking()
  }

  pub fn read_timeout(&self, timeout: Duration) -> Result<T, ChannelError> {
    self.read_async_before(Deadline::after(timeout)).blocking()
  }

  pub fn try_read(&self) -> Result<T, ChannelError> {
    self.read_async_before(Deadline::Immediate).blocking()
  }
}

impl<T: Send + 'static> WriteEnd<T> {
  pub fn channel(&self) -> &Channel<T> {
    &self.channel
  }

  pub fn is_released(&self) -> bool {
    self.released.load(Ordering::Acquire)
  }

  /// Gives the end back; idempotent, also triggered by `Drop`.
  pub fn release(&self) {
    if !self.released.swap(true, Ordering::AcqRel) {
      self.channel.leave_write();
    }
  }

  pub fn write_async(&self, value: T) -> OpFuture<()> {
    if self.is_released() {
      return OpFuture::ready(
        Arc::clone(self.channel.runtime().executor()),
        Err(ChannelError::Retired),
      );
    }
    self.channel.write_async(value)
  }

  pub fn write_async_before(
    &self,
    value: T,
    deadline: Deadline,
  ) -> OpFuture<()> {
    if self.is_released() {
      return OpFuture::ready(
        Arc::clone(self.channel.runtime().executor()),
        Err(ChannelError::Retired),
      );
    }
    self.channel.write_async_before(value, deadline)
  }

  pub fn write(&self, value: T) -> Result<(), ChannelError> {
    self.write_async(value).blocking()
  }

  pub fn write_timeout(
    &self,
    value: T,
    timeout: Duration,
  ) -> Result<(), ChannelError> {
    self.write_async_before(value, Deadline::after(timeout)).blocking()
  }

  pub fn try_write(&self, value: T) -> Result<(), ChannelError> {
    self.write_async_before(value, Deadline::Immediate).blocking()
  }
}

impl<T: Send + 'static> Drop for ReadEnd<T> {
  fn drop(&mut self) {
    self.release();
  }
}

impl<T: Send + 'static> Drop for WriteEnd<T> {
  fn drop(&mut self) {
    self.release();
  }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
