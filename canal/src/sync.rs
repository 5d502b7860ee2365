//! Lock primitives shared by the channel core.
//!
//! All mutable channel, offer and registry state sits behind this `Mutex`.
//! With the `parking_lot` feature enabled the type is a re-export of
//! `parking_lot::Mutex`; otherwise it wraps `std::sync::Mutex` and strips
//! poisoning, so both flavours expose the same guard-returning `lock()`.

#[cfg(feature = "parking_lot")]
pub(crate) use parking_lot::{Mutex, MutexGuard};

#[cfg(not(feature = "parking_lot"))]
pub(crate) use self::fallback::*;

#[cfg(not(feature = "parking_lot"))]
mod fallback {
  use std::ops::{Deref, DerefMut};
  use std::sync as std_sync;

  /// Mutual exclusion without poisoning.
  ///
  /// A thread that panicked while holding the lock leaves the data in
  /// whatever state it was in; the next `lock()` simply succeeds.
  pub struct Mutex<T: ?Sized> {
    inner: std_sync::Mutex<T>,
  }

  impl<T> Mutex<T> {
    #[inline]
    pub const fn new(value: T) -> Self {
      Self { inner: std_sync::Mutex::new(value) }
    }
  }

  impl<T: ?Sized> Mutex<T> {
    /// Acquires the lock, blocking the current thread until it is free.
    ///
    /// Never fails: a poisoned lock is unwrapped into its inner guard.
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, T> {
      MutexGuard {
        inner: self.inner.lock().unwrap_or_else(|e| e.into_inner()),
      }
    }
  }

  /// RAII guard; the lock is released on drop.
  pub struct MutexGuard<'a, T: ?Sized> {
    inner: std_sync::MutexGuard<'a, T>,
  }

  impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
      &self.inner
    }
  }

  impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
      &mut self.inner
    }
  }
}
