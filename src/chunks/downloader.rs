//! Bounded-Concurrency Downloader
//!
//! Fetches many chunk objects in parallel with at most `max_parallel`
//! requests in flight, and returns them in input order regardless of
//! completion order.
//!
//! ## Design
//!
//! ```text
//! keys ──decode──▶ valid[i] ──spawn──▶ JoinSet ──(index, result)──▶ slots[i]
//!                               ▲
//!                     Semaphore(max_parallel)
//! ```
//!
//! - The semaphore is local to one `download` call.
//! - Results are written into a pre-sized slot vector by original index.
//! - All-or-nothing: the first failure is kept, the remaining downloads
//!   drain, and the failure is returned alone.
//! - Dropping the `download` future drops the `JoinSet`, which aborts every
//!   task still queued or in flight. A caller's timeout or cancellation
//!   therefore never waits for the slowest outstanding request.

use crate::chunks::error::{ChunkError, ChunkResult};
use crate::chunks::key::{decode_chunk_key, LineRange};
use crate::chunks::merge::ChunkInfo;
use crate::storage::ObjectStore;
use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Default cap on simultaneous downloads
pub const DEFAULT_MAX_PARALLEL_DOWNLOADS: usize = 10;

/// Latency and volume figures for one `download` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadStats {
    /// Keys that decoded as chunk keys
    pub valid_keys: usize,
    /// Keys skipped because they did not decode
    pub skipped_keys: usize,
    /// Slowest single download
    pub max_elapsed: Duration,
    /// Sum of all download durations (compare with wall time for parallelism)
    pub sum_elapsed: Duration,
    /// Payload bytes received
    pub bytes: u64,
}

/// Chunks in input order, plus stats
#[derive(Debug, Clone, Default)]
pub struct DownloadedChunks {
    pub chunks: Vec<ChunkInfo>,
    pub stats: DownloadStats,
}

/// Parallel chunk fetcher with a per-call concurrency cap
#[derive(Debug, Clone)]
pub struct ChunkDownloader<S: ObjectStore + Clone> {
    store: S,
    max_parallel: usize,
}

impl<S: ObjectStore + Clone> ChunkDownloader<S> {
    /// Create a downloader; `max_parallel` is clamped to at least 1
    pub fn new(store: S, max_parallel: usize) -> Self {
        debug_assert!(max_parallel > 0, "max_parallel must be positive");
        ChunkDownloader {
            store,
            max_parallel: max_parallel.max(1),
        }
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    /// Download every decodable key; output position `i` is the `i`-th valid key
    pub async fn download(&self, keys: &[String]) -> ChunkResult<DownloadedChunks> {
        let mut stats = DownloadStats::default();

        let valid: Vec<(String, LineRange)> = keys
            .iter()
            .filter_map(|key| match decode_chunk_key(key) {
                Some(range) => Some((key.clone(), range)),
                None => {
                    warn!(key = %key, "Skipping unparseable chunk key");
                    None
                }
            })
            .collect();

        stats.valid_keys = valid.len();
        stats.skipped_keys = keys.len() - valid.len();

        if valid.is_empty() {
            return Ok(DownloadedChunks {
                chunks: Vec::new(),
                stats,
            });
        }

        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut tasks = JoinSet::new();

        for (index, (key, range)) in valid.into_iter().enumerate() {
            let store = self.store.clone();
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let start = Instant::now();
                let result = store.get(&key).await;
                let elapsed = start.elapsed();
                debug!(
                    key = %key,
                    elapsed_ms = elapsed.as_millis() as u64,
                    ok = result.is_ok(),
                    "Chunk download finished"
                );

                let chunk = result
                    .map(|data| ChunkInfo {
                        key,
                        range,
                        data: Bytes::from(data),
                    })
                    .map_err(|e| ChunkError::classify(e, "download"));
                (index, elapsed, chunk)
            });
        }

        let mut slots: Vec<Option<ChunkInfo>> = vec![None; stats.valid_keys];
        let mut first_error: Option<ChunkError> = None;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, elapsed, chunk)) => {
                    stats.sum_elapsed += elapsed;
                    stats.max_elapsed = stats.max_elapsed.max(elapsed);
                    match chunk {
                        Ok(chunk) => {
                            stats.bytes += chunk.data.len() as u64;
                            slots[index] = Some(chunk);
                        }
                        Err(e) => {
                            first_error.get_or_insert(e);
                        }
                    }
                }
                Err(join_error) => {
                    first_error.get_or_insert(ChunkError::Task(join_error));
                }
            }
        }

        debug!(
            valid_keys = stats.valid_keys,
            skipped_keys = stats.skipped_keys,
            max_elapsed_ms = stats.max_elapsed.as_millis() as u64,
            sum_elapsed_ms = stats.sum_elapsed.as_millis() as u64,
            bytes = stats.bytes,
            failed = first_error.is_some(),
            "Chunk downloads drained"
        );

        if let Some(e) = first_error {
            return Err(e);
        }

        // Every task reported success, so every slot is filled
        let chunks: Vec<ChunkInfo> = slots.into_iter().flatten().collect();
        debug_assert_eq!(chunks.len(), stats.valid_keys);

        Ok(DownloadedChunks { chunks, stats })
    }
}
