//! End-to-end tests against a real SQLite file on disk.

use tempfile::TempDir;

use yapdb::{Database, DatabaseConfig};

struct TestDb {
   db: Database,
   _dir: TempDir,
}

async fn setup() -> TestDb {
   let dir = TempDir::new().unwrap();
   let config = DatabaseConfig::new(dir.path().join("test.db"));
   let db = Database::open(config).await.unwrap();
   TestDb { db, _dir: dir }
}

#[tokio::test]
async fn read_your_own_writes_within_a_transaction() {
   let test_db = setup().await;
   let conn = test_db.db.new_connection().await.unwrap();

   let seen = conn
      .read_write(|txn| {
         Box::pin(async move {
            txn.set("widgets", "a", b"one".to_vec()).await?;
            let value = txn.get("widgets", "a").await?;
            Ok(value.map(|v| v.to_vec()))
         })
      })
      .await
      .unwrap();

   assert_eq!(seen, Some(b"one".to_vec()));
}

#[tokio::test]
async fn writes_are_durable_and_visible_to_a_fresh_connection() {
   let test_db = setup().await;
   let writer = test_db.db.new_connection().await.unwrap();

   writer
      .read_write(|txn| {
         Box::pin(async move {
            txn.set("widgets", "a", b"one".to_vec()).await?;
            Ok(())
         })
      })
      .await
      .unwrap();

   let reader = test_db.db.new_connection().await.unwrap();
   let value = reader
      .read(|txn| Box::pin(async move { txn.get("widgets", "a").await }))
      .await
      .unwrap();

   assert_eq!(value.as_deref(), Some(b"one".as_slice()));
}

#[tokio::test]
async fn remove_all_clears_the_collection() {
   let test_db = setup().await;
   let conn = test_db.db.new_connection().await.unwrap();

   conn
      .read_write(|txn| {
         Box::pin(async move {
            txn.set("widgets", "a", b"one".to_vec()).await?;
            txn.set("widgets", "b", b"two".to_vec()).await?;
            Ok(())
         })
      })
      .await
      .unwrap();

   conn
      .read_write(|txn| Box::pin(async move { txn.remove_all("widgets").await }))
      .await
      .unwrap();

   let seen = conn
      .read(|txn| {
         Box::pin(async move {
            let mut keys = Vec::new();
            txn.enumerate("widgets", |key, _value| keys.push(key.to_string())).await?;
            Ok(keys)
         })
      })
      .await
      .unwrap();

   assert!(seen.is_empty());
}

#[tokio::test]
async fn a_failed_block_rolls_back_and_publishes_nothing() {
   let test_db = setup().await;
   let conn = test_db.db.new_connection().await.unwrap();

   let outcome = conn
      .read_write(|txn| {
         Box::pin(async move {
            txn.set("widgets", "a", b"one".to_vec()).await?;
            Err::<(), _>(yapdb::Error::ReadOnly)
         })
      })
      .await;
   assert!(outcome.is_err());

   let value = conn
      .read(|txn| Box::pin(async move { txn.get("widgets", "a").await }))
      .await
      .unwrap();
   assert_eq!(value, None);
}

#[tokio::test]
async fn a_second_connection_observes_a_committed_write_after_it_commits() {
   let test_db = setup().await;
   let writer = test_db.db.new_connection().await.unwrap();
   let reader = test_db.db.new_connection().await.unwrap();

   // Take a snapshot on the reader before the writer commits anything.
   let before = reader
      .read(|txn| Box::pin(async move { txn.get("widgets", "a").await }))
      .await
      .unwrap();
   assert_eq!(before, None);

   writer
      .read_write(|txn| {
         Box::pin(async move { txn.set("widgets", "a", b"one".to_vec()).await })
      })
      .await
      .unwrap();

   // The reader's next transaction must see the write: this exercises the
   // pre-read protocol comparing the cached yap-level watermark against the
   // freshly observed SQL-level snapshot.
   let after = reader
      .read(|txn| Box::pin(async move { txn.get("widgets", "a").await }))
      .await
      .unwrap();
   assert_eq!(after.as_deref(), Some(b"one".as_slice()));
}

#[tokio::test]
async fn flush_memory_at_level_two_drops_every_cache_entry() {
   let test_db = setup().await;
   let conn = test_db.db.new_connection().await.unwrap();

   conn
      .read_write(|txn| {
         Box::pin(async move { txn.set("widgets", "a", b"one".to_vec()).await })
      })
      .await
      .unwrap();

   conn.flush_memory(2).await;

   // Still correct after the cache is dropped: the value comes back from
   // SQLite and repopulates the cache.
   let value = conn
      .read(|txn| Box::pin(async move { txn.get("widgets", "a").await }))
      .await
      .unwrap();
   assert_eq!(value.as_deref(), Some(b"one".as_slice()));
}

#[tokio::test]
async fn has_reports_existence_without_materializing_the_value() {
   let test_db = setup().await;
   let conn = test_db.db.new_connection().await.unwrap();

   conn
      .read_write(|txn| {
         Box::pin(async move { txn.set("widgets", "a", b"one".to_vec()).await })
      })
      .await
      .unwrap();

   let (has_a, has_b) = conn
      .read(|txn| {
         Box::pin(async move {
            let a = txn.has("widgets", "a").await?;
            let b = txn.has("widgets", "b").await?;
            Ok((a, b))
         })
      })
      .await
      .unwrap();

   assert!(has_a);
   assert!(!has_b);
}

#[tokio::test]
async fn closing_the_database_rejects_further_work() {
   let test_db = setup().await;
   let conn = test_db.db.new_connection().await.unwrap();
   test_db.db.close().await;

   let outcome = conn.read(|txn| Box::pin(async move { txn.has("widgets", "a").await })).await;
   assert!(matches!(outcome, Err(yapdb::Error::Cancelled)));
}
