use std::sync::Arc;

use crate::changeset::Changeset;

/// The snapshot lane's record of changesets: those published but not yet
/// committed ("pending", visible only to the gap-repair path) and those
/// already committed.
///
/// Retains every committed changeset whose timestamp exceeds the minimum
/// snapshot timestamp across every live connection; older ones can never
/// be asked for again and are pruned.
#[derive(Default)]
pub(crate) struct ChangesetLog {
   pending: Vec<Arc<Changeset>>,
   committed: Vec<Arc<Changeset>>,
}

impl ChangesetLog {
   pub(crate) fn push_pending(&mut self, changeset: Arc<Changeset>) {
      self.pending.push(changeset);
   }

   /// Promotes the pending changeset stamped `timestamp` to committed.
   pub(crate) fn commit(&mut self, timestamp: f64) -> Option<Arc<Changeset>> {
      let idx = self.pending.iter().position(|cs| cs.timestamp == timestamp)?;
      let changeset = self.pending.remove(idx);
      self.committed.push(changeset.clone());
      Some(changeset)
   }

   /// Drops a changeset that was published as pending but whose commit
   /// failed.
   pub(crate) fn discard_pending(&mut self, timestamp: f64) {
      self.pending.retain(|cs| cs.timestamp != timestamp);
   }

   /// Every changeset (pending or committed) with timestamp in
   /// `(from_ts, until_ts]`, used by the pre-read gap-repair path.
   pub(crate) fn changes_since(&self, from_ts: f64, until_ts: f64) -> Vec<Arc<Changeset>> {
      let mut changes: Vec<Arc<Changeset>> = self
         .pending
         .iter()
         .chain(self.committed.iter())
         .filter(|cs| cs.timestamp > from_ts && cs.timestamp <= until_ts)
         .cloned()
         .collect();
      changes.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
      changes
   }

   /// Drops committed changesets no longer reachable by any live
   /// connection's pre-read.
   pub(crate) fn prune(&mut self, min_live_snapshot_ts: f64) {
      self.committed.retain(|cs| cs.timestamp > min_live_snapshot_ts);
   }

   #[cfg(test)]
   pub(crate) fn committed_len(&self) -> usize {
      self.committed.len()
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn changes_since_is_ordered_and_bounded() {
      let mut log = ChangesetLog::default();
      for ts in [1.0, 2.0, 3.0, 4.0] {
         log.push_pending(Arc::new(Changeset::new(ts)));
         log.commit(ts);
      }
      let changes = log.changes_since(1.0, 3.0);
      let timestamps: Vec<f64> = changes.iter().map(|c| c.timestamp).collect();
      assert_eq!(timestamps, vec![2.0, 3.0]);
   }

   #[test]
   fn prune_drops_only_changesets_below_the_floor() {
      let mut log = ChangesetLog::default();
      for ts in [1.0, 2.0, 3.0] {
         log.push_pending(Arc::new(Changeset::new(ts)));
         log.commit(ts);
      }
      log.prune(2.0);
      assert_eq!(log.committed_len(), 1);
   }

   #[test]
   fn discard_pending_removes_failed_commit() {
      let mut log = ChangesetLog::default();
      log.push_pending(Arc::new(Changeset::new(5.0)));
      log.discard_pending(5.0);
      assert!(log.commit(5.0).is_none());
   }
}
