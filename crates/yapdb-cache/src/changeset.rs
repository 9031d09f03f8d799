use std::collections::{HashMap, HashSet};

/// What a changeset block says happened to one cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invalidation {
   Unchanged,
   Modified,
   Deleted,
}

/// A function, materialized as data, from `(collection, key)` to
/// [`Invalidation`]. Built once per commit from a `Changeset` and then
/// applied to every live connection's cache views.
#[derive(Debug, Default)]
pub struct ChangesetBlock {
   by_collection: HashMap<String, HashMap<String, Invalidation>>,
   cleared_collections: HashSet<String>,
}

impl ChangesetBlock {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn record(&mut self, collection: &str, key: &str, invalidation: Invalidation) {
      self.by_collection
         .entry(collection.to_string())
         .or_default()
         .insert(key.to_string(), invalidation);
   }

   /// Marks an entire collection as invalidated, e.g. after a `remove_all`.
   /// Cheaper than recording one entry per key when the collection may be
   /// large.
   pub fn record_collection_cleared(&mut self, collection: &str) {
      self.cleared_collections.insert(collection.to_string());
   }

   pub fn check(&self, collection: &str, key: &str) -> Invalidation {
      if self.cleared_collections.contains(collection) {
         return Invalidation::Deleted;
      }
      self.by_collection
         .get(collection)
         .and_then(|keys| keys.get(key))
         .copied()
         .unwrap_or(Invalidation::Unchanged)
   }

   pub fn clears_collection(&self, collection: &str) -> bool {
      self.cleared_collections.contains(collection)
   }

   pub fn is_empty(&self) -> bool {
      self.by_collection.is_empty() && self.cleared_collections.is_empty()
   }
}
