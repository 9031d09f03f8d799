//! A multi-connection, snapshot-isolated key/value database layered on
//! SQLite's WAL mode.
//!
//! Values are opaque byte blobs addressed by `(collection, key)`;
//! serializing them is left to the caller. A [`Database`] coordinates any
//! number of [`Connection`]s, each with its own private SQLite handle and
//! its own bounded object/metadata cache, kept coherent across connections
//! by propagating each commit's changeset through a small set of serial
//! execution lanes.

mod changeset;
mod checkpoint;
mod connection;
mod database;
mod error;
mod log;
mod transaction;

pub use changeset::{Changeset, Mutation};
pub use connection::{ConnId, Connection};
pub use database::{AsyncConnHook, CheckpointMode, Database, DatabaseConfig, SchemaHooks};
pub use error::{Error, Result};
pub use transaction::{BoxFuture, Transaction};
