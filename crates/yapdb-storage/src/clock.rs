use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// A monotonic, process-local source for `lastWriteTimestamp` values.
///
/// Every call to [`tick`](Self::tick) returns a value strictly greater than
/// every value previously returned by this clock, even when called
/// concurrently from multiple tasks. The clock is deliberately *not* backed
/// by wall-clock time: commits must never appear to move backwards because
/// the system clock was adjusted.
#[derive(Debug)]
pub struct MonotonicClock {
   epoch: Instant,
   watermark_bits: AtomicU64,
}

impl Default for MonotonicClock {
   fn default() -> Self {
      Self::new()
   }
}

impl MonotonicClock {
   pub fn new() -> Self {
      Self { epoch: Instant::now(), watermark_bits: AtomicU64::new(0) }
   }

   /// Elapsed seconds since the clock was created. Does not advance the
   /// watermark; purely informational.
   pub fn elapsed(&self) -> f64 {
      self.epoch.elapsed().as_secs_f64()
   }

   /// Returns the current watermark without advancing it.
   pub fn watermark(&self) -> f64 {
      f64::from_bits(self.watermark_bits.load(Ordering::Acquire))
   }

   /// Advances the watermark and returns the new value. Guaranteed to be
   /// strictly greater than any value previously returned by `tick` or
   /// passed to [`observe`](Self::observe).
   pub fn tick(&self) -> f64 {
      loop {
         let prev_bits = self.watermark_bits.load(Ordering::Acquire);
         let prev = f64::from_bits(prev_bits);
         let candidate = self.elapsed().max(prev + f64::EPSILON);
         let next_bits = candidate.to_bits();
         if self
            .watermark_bits
            .compare_exchange(prev_bits, next_bits, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
         {
            return candidate;
         }
      }
   }

   /// Seeds the watermark from a value persisted by a previous process
   /// (e.g. the `yap` table's `lastWriteTimestamp`). The seeded value is
   /// treated as a floor, not as a continuation of this process's own
   /// elapsed-time source, so it never regresses a watermark already
   /// advanced by this clock.
   pub fn observe(&self, value: f64) {
      let bits = value.to_bits();
      let mut prev = self.watermark_bits.load(Ordering::Acquire);
      while f64::from_bits(prev) < value {
         match self
            .watermark_bits
            .compare_exchange(prev, bits, Ordering::AcqRel, Ordering::Acquire)
         {
            Ok(_) => break,
            Err(actual) => prev = actual,
         }
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn tick_is_strictly_increasing() {
      let clock = MonotonicClock::new();
      let mut last = clock.tick();
      for _ in 0..1000 {
         let next = clock.tick();
         assert!(next > last);
         last = next;
      }
   }

   #[test]
   fn observe_does_not_regress_watermark() {
      let clock = MonotonicClock::new();
      let first = clock.tick();
      clock.observe(first - 10.0);
      assert_eq!(clock.watermark(), first);
   }

   #[test]
   fn observe_raises_watermark_from_cold() {
      let clock = MonotonicClock::new();
      clock.observe(1_000_000.0);
      assert!(clock.tick() > 1_000_000.0);
   }
}
