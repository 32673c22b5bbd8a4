//! `FileStateStore` and `VectorStore`: the SQLite-backed persistence
//! layer for one folder's documents, chunks, embeddings and per-file
//! processing state.

use std::path::Path;

pub mod connection;
pub mod error;
pub mod file_state_store;
pub mod schema;
pub mod vector_store;

pub use connection::Db;
pub use error::{Result, StoreError};
pub use file_state_store::FileStateStore;
pub use vector_store::VectorStore;

/// Opens one `Db` for a folder and builds both stores from it, so
/// document writes and file-state writes commit on the same
/// connection instead of racing across two independent handles.
pub fn open_folder_stores(path: &Path, case_sensitive: bool) -> Result<(VectorStore, FileStateStore)> {
    let db = Db::open(path)?;
    Ok((
        VectorStore::new(db.clone(), case_sensitive),
        FileStateStore::new(db, case_sensitive),
    ))
}
