//! Durable storage for persistent keys.
//!
//! Each persistent key is stored independently as one JSON record named
//! `"{namespace}_{key}"`.

mod backend;
mod file;

pub use backend::{MemoryStorage, StorageBackend};
pub use file::FileStorage;
