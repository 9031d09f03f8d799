use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use yapdb_storage::RawConnection;

/// The dedicated checkpoint lane used under [`yapdb_storage::CheckpointMode::Dedicated`].
///
/// Owns its own read-write handle and runs `PRAGMA wal_checkpoint(PASSIVE)`
/// in a background task. Signals are coalesced: `tokio::sync::Notify` holds
/// at most one outstanding permit, so any number of commits that land while
/// a checkpoint is already queued or running collapse into a single run.
pub(crate) struct CheckpointWorker {
   notify: Arc<Notify>,
   conn: Arc<Mutex<RawConnection>>,
   task: JoinHandle<()>,
}

impl CheckpointWorker {
   pub(crate) async fn spawn(path: PathBuf) -> yapdb_storage::Result<Self> {
      let conn = Arc::new(Mutex::new(RawConnection::open(&path, true, false).await?));
      let notify = Arc::new(Notify::new());
      let task_notify = notify.clone();
      let task_conn = conn.clone();
      let task = tokio::spawn(async move {
         loop {
            task_notify.notified().await;
            debug!(?path, "running debounced WAL checkpoint");
            if let Err(error) = task_conn.lock().await.checkpoint("PASSIVE").await {
               warn!(?error, "checkpoint failed");
            }
         }
      });
      Ok(Self { notify, conn, task })
   }

   /// Queues a checkpoint; coalesces with any already queued or running.
   pub(crate) fn signal(&self) {
      self.notify.notify_one();
   }

   /// Runs a checkpoint immediately and waits for it to finish, reclaiming
   /// as much WAL as possible. Used by [`crate::Database::close`].
   pub(crate) async fn sync_checkpoint(&self) {
      if let Err(error) = self.conn.lock().await.checkpoint("TRUNCATE").await {
         warn!(?error, "final checkpoint failed");
      }
   }
}

impl Drop for CheckpointWorker {
   fn drop(&mut self) {
      self.task.abort();
   }
}
