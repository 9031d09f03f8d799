//! Serial execution lanes.
//!
//! The engine has no dedicated-thread actors; every lane (per-connection,
//! snapshot, write, checkpoint) is a `tokio::sync::Mutex` guarding the state
//! that lane owns. Tokio's mutex wakes waiters in acquisition order, which
//! is what gives a lane its "serial" property: two tasks that both want the
//! lane are served FIFO rather than racing.

use tokio::sync::{Mutex, MutexGuard};

/// A serial execution lane guarding a piece of coordination state `T`.
pub struct SerialLane<T> {
   state: Mutex<T>,
}

impl<T> SerialLane<T> {
   pub fn new(state: T) -> Self {
      Self { state: Mutex::new(state) }
   }

   /// Runs `f` with exclusive access to the lane's state. The lock is held
   /// only for the duration of `f`, so callers should keep it short and
   /// free of blocking I/O, per the snapshot lane's contract.
   pub async fn enter<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
      let mut guard = self.state.lock().await;
      f(&mut guard)
   }

   /// Borrows the lane's state directly for callers that need to hold it
   /// across an `.await` point (e.g. while issuing SQL on the connection it
   /// guards).
   pub async fn lock(&self) -> MutexGuard<'_, T> {
      self.state.lock().await
   }
}

/// The write lane: a single-writer semaphore that one read-write
/// transaction occupies for its entire begin-to-commit-or-rollback
/// lifetime.
pub struct WriteLane {
   gate: Mutex<()>,
}

impl Default for WriteLane {
   fn default() -> Self {
      Self::new()
   }
}

impl WriteLane {
   pub fn new() -> Self {
      Self { gate: Mutex::new(()) }
   }

   #[must_use = "the write lane is released as soon as the guard is dropped"]
   pub async fn acquire(&self) -> WriteLaneGuard<'_> {
      WriteLaneGuard { _permit: self.gate.lock().await }
   }
}

/// Holds exclusive occupancy of a [`WriteLane`]. Releases it on drop.
pub struct WriteLaneGuard<'a> {
   _permit: MutexGuard<'a, ()>,
}
