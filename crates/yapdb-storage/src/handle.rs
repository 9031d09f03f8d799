use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous};
use sqlx::{Connection, SqliteConnection};

use crate::error::Result;

/// One privately-owned SQLite connection.
///
/// `RawConnection` does not serialize access to itself; it is meant to be
/// held behind a [`crate::SerialLane`] so that only one task at a time ever
/// touches the underlying handle.
pub struct RawConnection {
   conn: SqliteConnection,
}

impl RawConnection {
   /// Opens `path`, creating it if missing. When `wal` is set the
   /// connection runs in WAL journal mode with `NORMAL` synchronous, which
   /// is safe under WAL because the log, not the main database file, is
   /// what durably records each commit.
   pub async fn open(path: &Path, wal: bool, auto_checkpoint: bool) -> Result<Self> {
      let mut options = SqliteConnectOptions::new()
         .filename(path)
         .create_if_missing(true)
         .busy_timeout(Duration::from_secs(5))
         .foreign_keys(true);
      if wal {
         options = options
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);
      }
      let mut conn = SqliteConnection::connect_with(&options).await?;
      if wal && !auto_checkpoint {
         sqlx::query("PRAGMA wal_autocheckpoint = 0").execute(&mut conn).await?;
      }
      Ok(Self { conn })
   }

   pub fn inner(&mut self) -> &mut SqliteConnection {
      &mut self.conn
   }

   pub async fn checkpoint(&mut self, mode: &str) -> Result<()> {
      sqlx::query(&format!("PRAGMA wal_checkpoint({mode})")).execute(&mut self.conn).await?;
      Ok(())
   }
}
