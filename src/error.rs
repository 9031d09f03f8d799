/// Result type alias for the engine's public API.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors the engine can raise.
///
/// `Corrupt` is fatal: once raised, the owning [`crate::Database`] marks
/// itself closed and every connection subsequently fails with `Cancelled`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// The database file could not be opened, or opening it failed partway
   /// through schema setup. Never returned from an ordinary `get`/`set`/
   /// `read`/`read_write` call — those use [`Error::Query`] instead.
   #[error("cannot open database: {0}")]
   Open(#[from] yapdb_storage::Error),

   /// A SQL statement failed during an otherwise-ordinary transaction
   /// (a `get`/`has`/`enumerate`/`set`/`remove`/`remove_all`, or the
   /// surrounding `BEGIN`/`COMMIT`/`ROLLBACK`).
   #[error("query failed: {0}")]
   Query(#[source] sqlx::Error),

   /// The on-disk `user_version` is newer than this build knows how to
   /// read.
   #[error("database schema is newer than this build supports: on-disk user_version {on_disk}, supported up to {supported}")]
   SchemaMismatch { on_disk: i64, supported: i64 },

   /// The write lane could not be acquired within the configured retry
   /// budget. The external write lane normally makes this unreachable; it
   /// exists for the rare case of sustained external contention (e.g. a
   /// foreign process also holding the file).
   #[error("write lane contention exceeded the retry budget ({attempts} attempts)")]
   Busy { attempts: u32 },

   /// A database invariant was violated (e.g. a SQL-level snapshot older
   /// than the cache's own watermark). Fatal for the whole database.
   #[error("database invariant violated: {0}")]
   Corrupt(String),

   /// `COMMIT` failed; the transaction was rolled back and no changeset was
   /// published.
   #[error("commit failed, transaction rolled back: {0}")]
   CommitFailed(#[source] sqlx::Error),

   /// A mutating call (`set`/`remove`/`remove_all`) on a read-only
   /// transaction.
   #[error("mutating call on a read-only transaction")]
   ReadOnly,

   /// Kept for API completeness and the async-completion path; Rust's
   /// borrow checker prevents the more common "transaction escaped its
   /// block" misuse at compile time, so this crate never raises it from
   /// that path.
   #[error("transaction used after its block returned")]
   TransactionExpired,

   /// The database (or the connection this call was submitted to) was
   /// already closed when the call was dispatched.
   #[error("operation cancelled: the database was closed before it ran")]
   Cancelled,
}
