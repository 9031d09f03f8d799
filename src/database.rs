use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use sqlx::{Row, SqliteConnection};
use tracing::{debug, warn};

pub use yapdb_storage::{CheckpointMode, DatabaseConfig};
use yapdb_storage::{MonotonicClock, RawConnection, SerialLane, WriteLane};

use crate::changeset::Changeset;
use crate::checkpoint::CheckpointWorker;
use crate::connection::{ConnId, Connection, ConnectionInner};
use crate::error::{Error, Result};
use crate::log::ChangesetLog;

const CURRENT_SCHEMA_VERSION: i64 = 1;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// An async closure run once against the bootstrap connection at
/// [`Database::open`] time, for embedders that layer additional tables or
/// indexes on top of the built-in `kv`/`yap` tables.
pub type AsyncConnHook =
   Arc<dyn for<'c> Fn(&'c mut SqliteConnection) -> BoxFuture<'c, sqlx::Result<()>> + Send + Sync>;

/// The injected capability set a `Database::open` caller may supply.
#[derive(Clone, Default)]
pub struct SchemaHooks {
   /// Run once, right after the built-in tables are created or confirmed
   /// present.
   pub create_tables: Option<AsyncConnHook>,
   /// Run once after `create_tables`, for warm-up work (e.g. `ANALYZE`)
   /// that does not change the schema.
   pub prepare: Option<AsyncConnHook>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnPhase {
   Idle,
   InReadTxn,
   InReadWriteTxn,
}

pub(crate) struct ConnectionState {
   pub(crate) connection: Weak<ConnectionInner>,
   pub(crate) phase: ConnPhase,
   pub(crate) snapshot_ts: f64,
}

#[derive(Default)]
struct SnapshotState {
   connections: HashMap<ConnId, ConnectionState>,
   log: ChangesetLog,
}

pub(crate) struct DatabaseInner {
   config: DatabaseConfig,
   hooks: SchemaHooks,
   clock: MonotonicClock,
   write_lane: WriteLane,
   snapshot: SerialLane<SnapshotState>,
   checkpoint: Option<CheckpointWorker>,
   closed: AtomicBool,
   next_id: AtomicU64,
}

/// The coordinator for one SQLite file: the snapshot lane, the write lane,
/// the changeset log, the monotonic clock, and (in
/// [`CheckpointMode::Dedicated`]) the checkpoint lane.
///
/// Cheap to clone; every clone shares the same underlying coordination
/// state via `Arc`.
#[derive(Clone)]
pub struct Database {
   inner: Arc<DatabaseInner>,
}

impl Database {
   pub(crate) fn from_inner(inner: Arc<DatabaseInner>) -> Self {
      Self { inner }
   }

   pub async fn open(config: DatabaseConfig) -> Result<Self> {
      Self::open_with_hooks(config, SchemaHooks::default()).await
   }

   pub async fn open_with_hooks(config: DatabaseConfig, hooks: SchemaHooks) -> Result<Self> {
      let dedicated_checkpoint = config.checkpoint_mode == CheckpointMode::Dedicated;
      let mut bootstrap = RawConnection::open(&config.path, true, !dedicated_checkpoint)
         .await
         .map_err(Error::Open)?;

      create_core_tables(bootstrap.inner()).await.map_err(Error::Open)?;

      let on_disk_version = read_user_version(bootstrap.inner()).await.map_err(Error::Open)?;
      if on_disk_version == 0 {
         write_user_version(bootstrap.inner(), CURRENT_SCHEMA_VERSION).await.map_err(Error::Open)?;
      } else if on_disk_version > CURRENT_SCHEMA_VERSION {
         return Err(Error::SchemaMismatch { on_disk: on_disk_version, supported: CURRENT_SCHEMA_VERSION });
      }

      if let Some(create_tables) = &hooks.create_tables {
         create_tables(bootstrap.inner()).await.map_err(|e| Error::Open(yapdb_storage::Error::Sqlx(e)))?;
      }
      if let Some(prepare) = &hooks.prepare {
         prepare(bootstrap.inner()).await.map_err(|e| Error::Open(yapdb_storage::Error::Sqlx(e)))?;
      }

      let persisted_ts = read_last_write_timestamp(bootstrap.inner()).await.map_err(Error::Open)?;
      let clock = MonotonicClock::new();
      clock.observe(persisted_ts);

      // The bootstrap connection only exists to set up the schema; drop it
      // rather than keeping it idle.
      drop(bootstrap);

      let checkpoint = if dedicated_checkpoint {
         Some(CheckpointWorker::spawn(config.path.clone()).await.map_err(Error::Open)?)
      } else {
         None
      };

      debug!(path = ?config.path, "database opened");

      Ok(Self {
         inner: Arc::new(DatabaseInner {
            config,
            hooks,
            clock,
            write_lane: WriteLane::new(),
            snapshot: SerialLane::new(SnapshotState::default()),
            checkpoint,
            closed: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
         }),
      })
   }

   pub async fn new_connection(&self) -> Result<Connection> {
      self.ensure_open()?;
      let dedicated_checkpoint = self.inner.config.checkpoint_mode == CheckpointMode::Dedicated;
      let raw = RawConnection::open(&self.inner.config.path, true, !dedicated_checkpoint)
         .await
         .map_err(Error::Open)?;
      let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
      let snapshot_ts = self.inner.clock.watermark();

      let connection = Connection::new(
         id,
         Arc::downgrade(&self.inner),
         raw,
         self.inner.config.object_cache_limit,
         self.inner.config.metadata_cache_limit,
      );

      self.inner
         .snapshot
         .enter(|state| {
            state.connections.insert(
               id,
               ConnectionState {
                  connection: connection.weak_inner(),
                  phase: ConnPhase::Idle,
                  snapshot_ts,
               },
            );
         })
         .await;

      debug!(id, "connection opened");
      Ok(connection)
   }

   pub(crate) async fn drop_connection(&self, id: ConnId) {
      self.inner
         .snapshot
         .enter(|state| {
            state.connections.remove(&id);
            let floor =
               state.connections.values().map(|c| c.snapshot_ts).fold(f64::INFINITY, f64::min);
            let floor = if floor.is_finite() { floor } else { f64::NEG_INFINITY };
            state.log.prune(floor);
         })
         .await;
      debug!(id, "connection dropped");
   }

   pub(crate) async fn enumerate_connection_states(&self, mut f: impl FnMut(ConnId, &ConnectionState)) {
      self.inner
         .snapshot
         .enter(|state| {
            for (id, conn_state) in state.connections.iter() {
               f(*id, conn_state);
            }
         })
         .await;
   }

   pub(crate) fn read_last_write_timestamp_cached(&self) -> f64 {
      self.inner.clock.watermark()
   }

   pub(crate) async fn note_pending_changes(&self, changeset: Arc<Changeset>) {
      self.inner.snapshot.enter(|state| state.log.push_pending(changeset)).await;
   }

   pub(crate) async fn discard_pending_changes(&self, timestamp: f64) {
      self.inner.snapshot.enter(|state| state.log.discard_pending(timestamp)).await;
   }

   /// Promotes a pending changeset to committed, updates the originating
   /// connection's bookkeeping, and propagates the changeset's cache block
   /// to every sibling connection's cache views.
   pub(crate) async fn note_committed_changes(&self, changeset: Arc<Changeset>, from: ConnId) {
      self.inner.clock.observe(changeset.timestamp);

      self.inner
         .snapshot
         .enter(|state| {
            state.log.commit(changeset.timestamp);
            if let Some(conn_state) = state.connections.get_mut(&from) {
               conn_state.snapshot_ts = changeset.timestamp;
            }
         })
         .await;

      let mut siblings = Vec::new();
      self.enumerate_connection_states(|id, conn_state| {
         if id != from {
            siblings.push(conn_state.connection.clone());
         }
      })
      .await;

      let block = Arc::new(changeset.to_cache_block());
      for sibling in siblings {
         if let Some(sibling) = sibling.upgrade() {
            sibling.apply_cache_block(&block).await;
         }
      }

      if let Some(checkpoint) = &self.inner.checkpoint {
         checkpoint.signal();
      }
   }

   pub(crate) async fn changes_since(&self, from_ts: f64, until_ts: f64) -> Vec<Arc<Changeset>> {
      self.inner.snapshot.enter(|state| state.log.changes_since(from_ts, until_ts)).await
   }

   pub(crate) async fn set_connection_phase(&self, id: ConnId, phase: ConnPhase) {
      self.inner
         .snapshot
         .enter(|state| {
            if let Some(conn_state) = state.connections.get_mut(&id) {
               conn_state.phase = phase;
            }
         })
         .await;
   }

   pub(crate) async fn acquire_write_lane(&self) -> yapdb_storage::WriteLaneGuard<'_> {
      self.inner.write_lane.acquire().await
   }

   pub(crate) fn clock(&self) -> &MonotonicClock {
      &self.inner.clock
   }

   pub(crate) fn commit_retry_budget(&self) -> u32 {
      self.inner.config.commit_retry_budget
   }

   pub(crate) fn mark_corrupt(&self, detail: &str) {
      warn!(detail, "database marked corrupt; closing");
      self.inner.closed.store(true, Ordering::Release);
   }

   pub(crate) fn ensure_open(&self) -> Result<()> {
      if self.inner.closed.load(Ordering::Acquire) {
         Err(Error::Cancelled)
      } else {
         Ok(())
      }
   }

   /// Closes the database: runs a final synchronous checkpoint (if a
   /// dedicated checkpoint lane is configured) and marks the database
   /// closed so outstanding connections fail their next call with
   /// `Cancelled`.
   pub async fn close(&self) {
      if let Some(checkpoint) = &self.inner.checkpoint {
         checkpoint.sync_checkpoint().await;
      }
      self.inner.closed.store(true, Ordering::Release);
   }
}

async fn create_core_tables(conn: &mut SqliteConnection) -> yapdb_storage::Result<()> {
   sqlx::query("CREATE TABLE IF NOT EXISTS yap (key TEXT PRIMARY KEY, data BLOB NOT NULL)")
      .execute(&mut *conn)
      .await?;
   sqlx::query(
      "CREATE TABLE IF NOT EXISTS kv (\
         collection TEXT NOT NULL, \
         key TEXT NOT NULL, \
         value BLOB NOT NULL, \
         PRIMARY KEY (collection, key)\
      )",
   )
   .execute(&mut *conn)
   .await?;
   Ok(())
}

async fn read_user_version(conn: &mut SqliteConnection) -> yapdb_storage::Result<i64> {
   let row = sqlx::query("SELECT data FROM yap WHERE key = 'user_version'")
      .fetch_optional(&mut *conn)
      .await?;
   Ok(match row {
      Some(row) => {
         let bytes: Vec<u8> = row.try_get(0)?;
         i64::from_le_bytes(bytes.try_into().unwrap_or([0; 8]))
      }
      None => 0,
   })
}

async fn write_user_version(conn: &mut SqliteConnection, version: i64) -> yapdb_storage::Result<()> {
   sqlx::query("INSERT INTO yap (key, data) VALUES ('user_version', ?1) ON CONFLICT(key) DO UPDATE SET data = excluded.data")
      .bind(version.to_le_bytes().to_vec())
      .execute(&mut *conn)
      .await?;
   Ok(())
}

pub(crate) async fn read_last_write_timestamp(conn: &mut SqliteConnection) -> yapdb_storage::Result<f64> {
   let row = sqlx::query("SELECT data FROM yap WHERE key = 'lastWriteTimestamp'")
      .fetch_optional(&mut *conn)
      .await?;
   Ok(match row {
      Some(row) => {
         let bytes: Vec<u8> = row.try_get(0)?;
         f64::from_le_bytes(bytes.try_into().unwrap_or([0; 8]))
      }
      None => 0.0,
   })
}

pub(crate) async fn write_last_write_timestamp(
   conn: &mut SqliteConnection,
   timestamp: f64,
) -> yapdb_storage::Result<()> {
   sqlx::query("INSERT INTO yap (key, data) VALUES ('lastWriteTimestamp', ?1) ON CONFLICT(key) DO UPDATE SET data = excluded.data")
      .bind(timestamp.to_le_bytes().to_vec())
      .execute(&mut *conn)
      .await?;
   Ok(())
}
