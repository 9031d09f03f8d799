use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use yapdb_cache::{ChangesetBlock, Invalidation};

/// What a read-write transaction did to one `(collection, key)` pair.
#[derive(Debug, Clone)]
pub enum Mutation {
   Set(Arc<[u8]>),
   Remove,
}

/// The full record of one committed read-write transaction: every mutation
/// it made, stamped with the `lastWriteTimestamp` it committed at.
///
/// Mutations of the same key within one transaction coalesce to the last
/// one recorded; `remove_all` is tracked separately as a whole-collection
/// invalidation rather than one entry per key, since the key set it
/// affected may not be fully known without a scan.
#[derive(Debug, Clone)]
pub struct Changeset {
   pub timestamp: f64,
   pub mutations: HashMap<(String, String), Mutation>,
   pub cleared_collections: HashSet<String>,
}

impl Changeset {
   pub fn new(timestamp: f64) -> Self {
      Self { timestamp, mutations: HashMap::new(), cleared_collections: HashSet::new() }
   }

   pub fn record_set(&mut self, collection: &str, key: &str, value: Arc<[u8]>) {
      self.mutations.insert((collection.to_string(), key.to_string()), Mutation::Set(value));
   }

   pub fn record_remove(&mut self, collection: &str, key: &str) {
      self.mutations.insert((collection.to_string(), key.to_string()), Mutation::Remove);
   }

   pub fn record_collection_cleared(&mut self, collection: &str) {
      self.cleared_collections.insert(collection.to_string());
   }

   pub fn is_empty(&self) -> bool {
      self.mutations.is_empty() && self.cleared_collections.is_empty()
   }

   /// Derives the cache-invalidation block sibling connections apply to
   /// their cache views after this changeset is committed.
   pub fn to_cache_block(&self) -> ChangesetBlock {
      let mut block = ChangesetBlock::new();
      for ((collection, key), mutation) in &self.mutations {
         let invalidation = match mutation {
            Mutation::Set(_) => Invalidation::Modified,
            Mutation::Remove => Invalidation::Deleted,
         };
         block.record(collection, key, invalidation);
      }
      for collection in &self.cleared_collections {
         block.record_collection_cleared(collection);
      }
      block
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn later_mutation_of_same_key_wins() {
      let mut cs = Changeset::new(1.0);
      cs.record_set("widgets", "a", Arc::from(&b"first"[..]));
      cs.record_set("widgets", "a", Arc::from(&b"second"[..]));
      assert_eq!(cs.mutations.len(), 1);
      match &cs.mutations[&("widgets".to_string(), "a".to_string())] {
         Mutation::Set(v) => assert_eq!(&**v, b"second"),
         Mutation::Remove => panic!("expected Set"),
      }
   }

   #[test]
   fn cache_block_marks_set_modified_and_remove_deleted() {
      let mut cs = Changeset::new(1.0);
      cs.record_set("widgets", "a", Arc::from(&b"v"[..]));
      cs.record_remove("widgets", "b");
      let block = cs.to_cache_block();
      assert_eq!(block.check("widgets", "a"), Invalidation::Modified);
      assert_eq!(block.check("widgets", "b"), Invalidation::Deleted);
      assert_eq!(block.check("widgets", "c"), Invalidation::Unchanged);
   }

   #[test]
   fn cleared_collection_propagates_into_cache_block() {
      let mut cs = Changeset::new(1.0);
      cs.record_collection_cleared("widgets");
      let block = cs.to_cache_block();
      assert!(block.clears_collection("widgets"));
   }
}
