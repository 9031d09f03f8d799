use std::path::PathBuf;

/// Strategy for keeping the write-ahead log from growing without bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckpointMode {
   /// SQLite's own auto-checkpoint stays enabled on every connection;
   /// checkpoints happen opportunistically as part of ordinary commits.
   #[default]
   Inline,
   /// Auto-checkpoint is disabled everywhere. A dedicated background lane
   /// owns one read-write handle and runs checkpoints itself, debounced so
   /// a burst of commits triggers at most one checkpoint at a time.
   Dedicated,
}

/// Configuration accepted by [`Database::open`](crate::DatabaseConfig).
///
/// ```
/// use yapdb_storage::DatabaseConfig;
///
/// let config = DatabaseConfig::new("store.sqlite");
/// assert_eq!(config.object_cache_limit, 1000);
/// assert_eq!(config.metadata_cache_limit, 1000);
/// ```
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
   /// Path to the SQLite file. Created if it does not already exist.
   pub path: PathBuf,
   /// Maximum number of entries each connection's object-cache view holds.
   /// A limit of zero disables the object cache entirely.
   pub object_cache_limit: usize,
   /// Maximum number of entries each connection's metadata-cache view holds.
   pub metadata_cache_limit: usize,
   /// Checkpoint strategy for this database.
   pub checkpoint_mode: CheckpointMode,
   /// Number of times a commit retries after a transient `SQLITE_BUSY`
   /// before giving up with [`crate::Error`]'s caller-visible `Busy` kind.
   pub commit_retry_budget: u32,
}

impl DatabaseConfig {
   pub fn new(path: impl Into<PathBuf>) -> Self {
      Self {
         path: path.into(),
         object_cache_limit: 1000,
         metadata_cache_limit: 1000,
         checkpoint_mode: CheckpointMode::Inline,
         commit_retry_budget: 3,
      }
   }

   pub fn with_object_cache_limit(mut self, limit: usize) -> Self {
      self.object_cache_limit = limit;
      self
   }

   pub fn with_metadata_cache_limit(mut self, limit: usize) -> Self {
      self.metadata_cache_limit = limit;
      self
   }

   pub fn with_checkpoint_mode(mut self, mode: CheckpointMode) -> Self {
      self.checkpoint_mode = mode;
      self
   }
}
