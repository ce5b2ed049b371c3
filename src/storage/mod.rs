pub mod database;
pub mod document;
pub mod retry;
pub mod sqlite_store;
pub mod store;

pub use document::{Direction, Document, FieldValue, Fields, Filter, OrderBy, Query, WriteFields};
pub use retry::{RetryPolicy, with_retry};
pub use sqlite_store::SqliteStore;
pub use store::{DocumentStore, LiveQuery, Snapshot, StoreError};

use std::fs;
use std::path::Path;

/// Ensure the directory holding a database file exists
pub fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
