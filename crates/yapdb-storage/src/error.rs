/// Result type alias for the storage layer.
pub type Result<T> = std::result::Result<T, Error>;

/// Low-level errors from opening or driving a raw SQLite handle.
///
/// This is the bottom of the error stack; [`yapdb::Error`](../../yapdb/enum.Error.html)
/// wraps it rather than duplicating it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   #[error("io error: {0}")]
   Io(#[from] std::io::Error),

   #[error(transparent)]
   Sqlx(#[from] sqlx::Error),
}
