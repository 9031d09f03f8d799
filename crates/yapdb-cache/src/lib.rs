//! The per-connection cache views that back `Connection`'s object and
//! metadata caches, plus the changeset-block type the database engine uses
//! to tell a cache which entries a commit invalidated.

mod changeset;
mod view;

pub use changeset::{ChangesetBlock, Invalidation};
pub use view::{CacheView, ConnectionCache};
