//! Chunked Sync and Merge Engine
//!
//! A client uploads a growing append-only file as numbered line-range
//! chunks; readers list, download and merge them back into one file.
//!
//! ## Layout
//!
//! - `key`: line range <-> object key codec
//! - `store`: writer, lister, reconstruction and deletion entry points
//! - `downloader`: bounded-concurrency, order-preserving fetch
//! - `merge`: last-write-wins line merge with safety limits
//! - `error`: failure taxonomy
//! - `dst`: deterministic simulation harness

pub mod downloader;
pub mod dst;
pub mod error;
pub mod key;
pub mod merge;
pub mod store;

pub use downloader::{ChunkDownloader, DownloadStats, DownloadedChunks, DEFAULT_MAX_PARALLEL_DOWNLOADS};
pub use error::{ChunkError, ChunkErrorKind, ChunkResult};
pub use key::{
    chunk_key, decode_chunk_key, encode_chunk_name, file_chunk_prefix, session_chunk_prefix,
    LineRange,
};
pub use merge::{
    chunks_overlap, merge_chunks, merge_chunks_simple, split_lines, ChunkInfo, MergeLimits,
    LARGE_MERGE_WARNING_LINES, MAX_MERGE_LINES,
};
pub use store::ChunkStore;
