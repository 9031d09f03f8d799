use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use crate::changeset::{ChangesetBlock, Invalidation};

type CacheKey = (Arc<str>, Arc<str>);

/// A bounded, per-connection view onto one tier of the cache (object or
/// metadata).
///
/// A view with `limit == 0` is disabled: inserts are accepted and
/// immediately discarded, so every `get` misses. This is the cache's
/// documented "limit 0" boundary behavior, not a special case callers need
/// to branch on.
pub struct CacheView<V> {
   lru: Option<LruCache<CacheKey, V>>,
}

impl<V: Clone> CacheView<V> {
   pub fn new(limit: usize) -> Self {
      Self { lru: NonZeroUsize::new(limit).map(LruCache::new) }
   }

   pub fn get(&mut self, collection: &str, key: &str) -> Option<V> {
      let lru = self.lru.as_mut()?;
      lru.get(&key_of(collection, key)).cloned()
   }

   pub fn put(&mut self, collection: &str, key: &str, value: V) {
      if let Some(lru) = self.lru.as_mut() {
         lru.put(key_of(collection, key), value);
      }
   }

   pub fn remove(&mut self, collection: &str, key: &str) {
      if let Some(lru) = self.lru.as_mut() {
         lru.pop(&key_of(collection, key));
      }
   }

   /// Evicts every entry in `collection`, regardless of key.
   pub fn clear_collection(&mut self, collection: &str) {
      let Some(lru) = self.lru.as_mut() else { return };
      let stale: Vec<CacheKey> =
         lru.iter().filter(|((c, _), _)| c.as_ref() == collection).map(|(k, _)| k.clone()).collect();
      for key in stale {
         lru.pop(&key);
      }
   }

   /// Applies a changeset block: entries the block marks modified or
   /// deleted are evicted; untouched entries are left alone. Invalidation
   /// always runs before any LRU pressure from a subsequent insert, so a
   /// stale value is never handed back between a commit and the next
   /// eviction.
   pub fn apply(&mut self, block: &ChangesetBlock) {
      let Some(lru) = self.lru.as_mut() else { return };
      let stale: Vec<CacheKey> = lru
         .iter()
         .filter(|((collection, key), _)| {
            !matches!(block.check(collection, key), Invalidation::Unchanged)
         })
         .map(|(k, _)| k.clone())
         .collect();
      for key in stale {
         lru.pop(&key);
      }
   }

   pub fn drop_all(&mut self) {
      if let Some(lru) = self.lru.as_mut() {
         lru.clear();
      }
   }

   /// Memory-pressure eviction. Level 1 halves the live entry count in LRU
   /// order; level 2 (or higher) drops everything.
   pub fn shrink(&mut self, level: u8) {
      match level {
         0 => {}
         1 => {
            if let Some(lru) = self.lru.as_mut() {
               let target = lru.len() / 2;
               while lru.len() > target {
                  lru.pop_lru();
               }
            }
         }
         _ => self.drop_all(),
      }
   }

   pub fn len(&self) -> usize {
      self.lru.as_ref().map_or(0, LruCache::len)
   }

   pub fn is_empty(&self) -> bool {
      self.len() == 0
   }
}

fn key_of(collection: &str, key: &str) -> CacheKey {
   (Arc::from(collection), Arc::from(key))
}

/// The two cache tiers a `Connection` owns: the object cache (user values)
/// and the metadata cache (small sidecar state alongside them).
pub struct ConnectionCache {
   pub object: CacheView<Arc<[u8]>>,
   pub metadata: CacheView<Arc<[u8]>>,
}

impl ConnectionCache {
   pub fn new(object_limit: usize, metadata_limit: usize) -> Self {
      Self { object: CacheView::new(object_limit), metadata: CacheView::new(metadata_limit) }
   }

   pub fn apply(&mut self, block: &ChangesetBlock) {
      self.object.apply(block);
      self.metadata.apply(block);
   }

   pub fn clear_collection(&mut self, collection: &str) {
      self.object.clear_collection(collection);
      self.metadata.clear_collection(collection);
   }

   pub fn drop_all(&mut self) {
      self.object.drop_all();
      self.metadata.drop_all();
   }

   pub fn shrink(&mut self, level: u8) {
      self.object.shrink(level);
      self.metadata.shrink(level);
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn zero_limit_view_never_retains_anything() {
      let mut view: CacheView<Arc<[u8]>> = CacheView::new(0);
      view.put("widgets", "a", Arc::from(&b"x"[..]));
      assert!(view.get("widgets", "a").is_none());
      assert_eq!(view.len(), 0);
   }

   #[test]
   fn get_put_round_trip() {
      let mut view: CacheView<Arc<[u8]>> = CacheView::new(4);
      view.put("widgets", "a", Arc::from(&b"hello"[..]));
      assert_eq!(view.get("widgets", "a").as_deref(), Some(&b"hello"[..]));
      assert_eq!(view.get("widgets", "missing"), None);
   }

   #[test]
   fn apply_evicts_modified_and_deleted_only() {
      let mut view: CacheView<Arc<[u8]>> = CacheView::new(4);
      view.put("widgets", "a", Arc::from(&b"a"[..]));
      view.put("widgets", "b", Arc::from(&b"b"[..]));
      let mut block = ChangesetBlock::new();
      block.record("widgets", "a", Invalidation::Modified);
      view.apply(&block);
      assert!(view.get("widgets", "a").is_none());
      assert!(view.get("widgets", "b").is_some());
   }

   #[test]
   fn shrink_level_one_halves_then_level_two_clears() {
      let mut view: CacheView<Arc<[u8]>> = CacheView::new(8);
      for i in 0..6 {
         view.put("widgets", &i.to_string(), Arc::from(&b"v"[..]));
      }
      view.shrink(1);
      assert_eq!(view.len(), 3);
      view.shrink(2);
      assert_eq!(view.len(), 0);
   }

   #[test]
   fn clear_collection_only_touches_matching_collection() {
      let mut view: CacheView<Arc<[u8]>> = CacheView::new(8);
      view.put("widgets", "a", Arc::from(&b"a"[..]));
      view.put("gadgets", "a", Arc::from(&b"a"[..]));
      view.clear_collection("widgets");
      assert!(view.get("widgets", "a").is_none());
      assert!(view.get("gadgets", "a").is_some());
   }
}
