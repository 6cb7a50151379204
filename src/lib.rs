//! Incremental chunked sync and merge for append-only transcript files.
//!
//! Clients upload a growing file as numbered line-range chunks; readers
//! list, download and merge them back into one file with a
//! last-write-wins rule keyed by line number.

pub mod chunks;
pub mod observability;
pub mod storage;

pub use chunks::{
    ChunkDownloader, ChunkError, ChunkErrorKind, ChunkInfo, ChunkResult, ChunkStore, LineRange,
};
pub use storage::{ChunkConfig, InMemoryObjectStore, ObjectStore, SyncConfig};
