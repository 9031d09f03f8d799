use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use sqlx::Row;

use crate::connection::ConnLaneState;
use crate::error::{Error, Result};

/// A boxed, borrowed future — the shape a `read`/`read_write` block returns.
///
/// Mirrors [`crate::database::AsyncConnHook`]: both exist because the
/// callback captures a borrow (`&mut Transaction<'t>` here, `&mut
/// SqliteConnection` there) that an `async fn` in a trait cannot yet express
/// directly.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TxnKind {
   Read,
   ReadWrite,
}

/// A transaction borrowed from a [`crate::Connection`] for the lifetime of
/// one `read`/`read_write` block.
///
/// Rust's borrow checker, not a runtime flag, is what prevents a
/// `Transaction` from escaping its block: the `&mut Transaction` a closure
/// is handed cannot outlive the call that lent it. The changeset being
/// built lives on the connection's lane state rather than on `Transaction`
/// itself, so the caller can read it back once the block's borrow ends.
pub struct Transaction<'a> {
   state: &'a mut ConnLaneState,
   kind: TxnKind,
}

impl<'a> Transaction<'a> {
   pub(crate) fn new(state: &'a mut ConnLaneState, kind: TxnKind) -> Self {
      Self { state, kind }
   }

   pub async fn get(&mut self, collection: &str, key: &str) -> Result<Option<Arc<[u8]>>> {
      if let Some(value) = self.state.cache.object.get(collection, key) {
         return Ok(Some(value));
      }
      let row = sqlx::query("SELECT value FROM kv WHERE collection = ?1 AND key = ?2")
         .bind(collection)
         .bind(key)
         .fetch_optional(self.state.raw.inner())
         .await
         .map_err(Error::Query)?;
      let Some(row) = row else { return Ok(None) };
      let bytes: Vec<u8> = row.try_get(0).map_err(Error::Query)?;
      let value: Arc<[u8]> = Arc::from(bytes);
      self.state.cache.object.put(collection, key, value.clone());
      Ok(Some(value))
   }

   pub async fn has(&mut self, collection: &str, key: &str) -> Result<bool> {
      let row = sqlx::query("SELECT 1 FROM kv WHERE collection = ?1 AND key = ?2 LIMIT 1")
         .bind(collection)
         .bind(key)
         .fetch_optional(self.state.raw.inner())
         .await
         .map_err(Error::Query)?;
      Ok(row.is_some())
   }

   pub async fn enumerate(
      &mut self,
      collection: &str,
      mut f: impl FnMut(&str, &[u8]),
   ) -> Result<()> {
      let mut rows = sqlx::query("SELECT key, value FROM kv WHERE collection = ?1")
         .bind(collection)
         .fetch_all(self.state.raw.inner())
         .await
         .map_err(Error::Query)?;
      for row in rows.drain(..) {
         let key: String = row.try_get(0).map_err(Error::Query)?;
         let value: Vec<u8> = row.try_get(1).map_err(Error::Query)?;
         f(&key, &value);
      }
      Ok(())
   }

   pub async fn set(&mut self, collection: &str, key: &str, value: impl Into<Arc<[u8]>>) -> Result<()> {
      self.require_read_write()?;
      let value = value.into();
      sqlx::query(
         "INSERT INTO kv (collection, key, value) VALUES (?1, ?2, ?3) \
          ON CONFLICT(collection, key) DO UPDATE SET value = excluded.value",
      )
      .bind(collection)
      .bind(key)
      .bind(value.as_ref())
      .execute(self.state.raw.inner())
      .await
      .map_err(Error::Query)?;
      self.state.cache.object.put(collection, key, value.clone());
      self.state.changeset.record_set(collection, key, value);
      Ok(())
   }

   pub async fn remove(&mut self, collection: &str, key: &str) -> Result<()> {
      self.require_read_write()?;
      sqlx::query("DELETE FROM kv WHERE collection = ?1 AND key = ?2")
         .bind(collection)
         .bind(key)
         .execute(self.state.raw.inner())
         .await
         .map_err(Error::Query)?;
      self.state.cache.object.remove(collection, key);
      self.state.changeset.record_remove(collection, key);
      Ok(())
   }

   pub async fn remove_all(&mut self, collection: &str) -> Result<()> {
      self.require_read_write()?;
      sqlx::query("DELETE FROM kv WHERE collection = ?1")
         .bind(collection)
         .execute(self.state.raw.inner())
         .await
         .map_err(Error::Query)?;
      self.state.cache.clear_collection(collection);
      self.state.changeset.record_collection_cleared(collection);
      Ok(())
   }

   fn require_read_write(&self) -> Result<()> {
      match self.kind {
         TxnKind::ReadWrite => Ok(()),
         TxnKind::Read => Err(Error::ReadOnly),
      }
   }
}
