//! Low-level plumbing shared by the database engine: opening private SQLite
//! handles, the serial-execution-lane primitive that every coordination
//! point in the engine is built from, and the monotonic clock that stamps
//! committed changesets.

mod clock;
mod config;
mod error;
mod handle;
mod lanes;

pub use clock::MonotonicClock;
pub use config::{CheckpointMode, DatabaseConfig};
pub use error::{Error, Result};
pub use handle::RawConnection;
pub use lanes::{SerialLane, WriteLane, WriteLaneGuard};
