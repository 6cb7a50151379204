//! Chunk Store
//!
//! The operations other components call: write one chunk, list a file's
//! chunks, reconstruct a file, and delete a file's or a whole session's
//! chunks. Everything here is a thin composition over `ObjectStore`,
//! `ChunkDownloader` and `merge_chunks`.
//!
//! ```text
//! upload_chunk ──put──▶ {user}/claude-code/{session}/chunks/{file}/chunk_F_L.jsonl
//!
//! download_and_merge_chunks:
//!     list_chunks (sorted, capped) ─▶ ChunkDownloader (bounded, ordered) ─▶ merge_chunks (LWW)
//! ```

use crate::chunks::downloader::{ChunkDownloader, DownloadedChunks};
use crate::chunks::error::{ChunkError, ChunkResult};
use crate::chunks::key::{
    chunk_key, decode_chunk_key, file_chunk_prefix, session_chunk_prefix, LineRange,
};
use crate::chunks::merge::merge_chunks;
use crate::storage::{ChunkConfig, ObjectStore};
use bytes::{Bytes, BytesMut};
use tracing::{debug, debug_span, info, Instrument};

/// Chunk operations for one object store
#[derive(Debug, Clone)]
pub struct ChunkStore<S: ObjectStore + Clone> {
    store: S,
    config: ChunkConfig,
    downloader: ChunkDownloader<S>,
}

impl<S: ObjectStore + Clone> ChunkStore<S> {
    pub fn new(store: S, config: ChunkConfig) -> Self {
        let downloader = ChunkDownloader::new(store.clone(), config.max_parallel_downloads);
        ChunkStore {
            store,
            config,
            downloader,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// Write one chunk and return its key
    ///
    /// Overwrites any object already at that key. No retry: a failed write
    /// is returned to the caller, whose re-upload may produce overlapping
    /// ranges that the merger reconciles.
    pub async fn upload_chunk(
        &self,
        user_id: i64,
        session_id: &str,
        file_name: &str,
        first_line: u64,
        last_line: u64,
        data: &[u8],
    ) -> ChunkResult<String> {
        let range = LineRange::new(first_line, last_line);
        if !range.is_valid() {
            return Err(ChunkError::InvalidRange {
                first_line,
                last_line,
            });
        }

        let key = chunk_key(user_id, session_id, file_name, range);
        let span = debug_span!("upload_chunk", user_id, session_id, file_name);
        async {
            self.store
                .put(&key, data)
                .await
                .map_err(|e| ChunkError::classify(e, "upload chunk"))?;
            debug!(
                key = %key,
                first_line,
                last_line,
                bytes = data.len(),
                "Chunk uploaded"
            );
            Ok(key)
        }
        .instrument(span)
        .await
    }

    /// Write `lines` as one chunk starting at `first_line`
    ///
    /// Each line is written followed by `\n`; `last_line` is derived from
    /// the line count.
    pub async fn upload_lines<L: AsRef<[u8]>>(
        &self,
        user_id: i64,
        session_id: &str,
        file_name: &str,
        first_line: u64,
        lines: &[L],
    ) -> ChunkResult<String> {
        if lines.is_empty() || first_line == 0 {
            return Err(ChunkError::InvalidRange {
                first_line,
                last_line: (first_line + lines.len() as u64).saturating_sub(1),
            });
        }
        let last_line = first_line + lines.len() as u64 - 1;

        let total: usize = lines.iter().map(|l| l.as_ref().len() + 1).sum();
        let mut data = BytesMut::with_capacity(total);
        for line in lines {
            data.extend_from_slice(line.as_ref());
            data.extend_from_slice(b"\n");
        }

        self.upload_chunk(user_id, session_id, file_name, first_line, last_line, &data)
            .await
    }

    /// All chunk keys of one file, ascending
    ///
    /// Fails with `TooManyChunks` as soon as the listing passes
    /// `max_chunks_per_file`; never returns a truncated list.
    pub async fn list_chunks(
        &self,
        user_id: i64,
        session_id: &str,
        file_name: &str,
    ) -> ChunkResult<Vec<String>> {
        let prefix = file_chunk_prefix(user_id, session_id, file_name);
        let span = debug_span!("list_chunks", user_id, session_id, file_name);
        async {
            let limit = self.config.max_chunks_per_file;
            let mut keys = Vec::new();
            let mut token: Option<String> = None;

            loop {
                let page = self
                    .store
                    .list(&prefix, token.as_deref())
                    .await
                    .map_err(|e| ChunkError::classify(e, "list chunks"))?;

                keys.extend(page.objects.into_iter().map(|o| o.key));
                if keys.len() > limit {
                    return Err(ChunkError::TooManyChunks { limit });
                }

                match page.continuation_token {
                    Some(next) => token = Some(next),
                    None => break,
                }
            }

            // Merge order depends on this; do not trust page order
            keys.sort_unstable();
            debug!(chunks = keys.len(), "Listed chunks");
            Ok(keys)
        }
        .instrument(span)
        .await
    }

    /// Download `keys` with the configured concurrency cap, in input order
    pub async fn download_chunks(&self, keys: &[String]) -> ChunkResult<DownloadedChunks> {
        self.downloader.download(keys).await
    }

    /// Reconstruct one file from its chunks
    ///
    /// Returns `Ok(None)` when the file has no (decodable) chunks. Any
    /// listing, download or merge failure is an error, never empty content.
    pub async fn download_and_merge_chunks(
        &self,
        user_id: i64,
        session_id: &str,
        file_name: &str,
    ) -> ChunkResult<Option<Bytes>> {
        let keys = self.list_chunks(user_id, session_id, file_name).await?;
        let span = debug_span!("download_and_merge", user_id, session_id, file_name);
        self.merge_keys(&keys).instrument(span).await
    }

    /// Reconstruct one file, keeping only lines numbered above `line_offset`
    ///
    /// Chunks that end at or before the offset are not downloaded. Output
    /// lines are numbered from the lowest first line among the downloaded
    /// chunks. Returns `Ok(None)` when nothing lies past the offset.
    pub async fn read_file_after(
        &self,
        user_id: i64,
        session_id: &str,
        file_name: &str,
        line_offset: u64,
    ) -> ChunkResult<Option<Bytes>> {
        let keys = self.list_chunks(user_id, session_id, file_name).await?;
        let span = debug_span!("read_file_after", user_id, session_id, file_name, line_offset);
        async {
            let wanted: Vec<String> = keys
                .into_iter()
                .filter(|key| decode_chunk_key(key).map_or(true, |r| r.last > line_offset))
                .collect();

            let downloaded = self.download_chunks(&wanted).await?;
            let Some(base) = downloaded.chunks.iter().map(|c| c.range.first).min() else {
                return Ok(None);
            };

            let merged = merge_chunks(downloaded.chunks, &self.config.merge_limits())?;
            let skip = line_offset.saturating_sub(base.saturating_sub(1));
            let tail = skip_lines(merged, skip);

            debug!(
                base_line = base,
                skipped_lines = skip,
                bytes = tail.len(),
                "Offset read complete"
            );
            Ok((!tail.is_empty()).then_some(tail))
        }
        .instrument(span)
        .await
    }

    /// Delete every chunk of one file, returning how many were deleted
    pub async fn delete_chunks(
        &self,
        user_id: i64,
        session_id: &str,
        file_name: &str,
    ) -> ChunkResult<usize> {
        let keys = self.list_chunks(user_id, session_id, file_name).await?;
        let span = debug_span!("delete_chunks", user_id, session_id, file_name);
        async {
            for key in &keys {
                self.delete_key(key).await?;
            }
            info!(deleted = keys.len(), "Deleted file chunks");
            Ok(keys.len())
        }
        .instrument(span)
        .await
    }

    /// Delete every chunk under the session, across all files
    ///
    /// Not bounded by the per-file cap. Stops at the first listing or
    /// delete failure; rerunning is safe because deletes are idempotent.
    pub async fn delete_all_session_chunks(
        &self,
        user_id: i64,
        session_id: &str,
    ) -> ChunkResult<usize> {
        let prefix = session_chunk_prefix(user_id, session_id);
        let span = debug_span!("delete_all_session_chunks", user_id, session_id);
        async {
            let mut deleted = 0usize;
            let mut token: Option<String> = None;

            loop {
                let page = self
                    .store
                    .list(&prefix, token.as_deref())
                    .await
                    .map_err(|e| ChunkError::classify(e, "list session chunks"))?;

                for object in &page.objects {
                    self.delete_key(&object.key).await?;
                    deleted += 1;
                }

                match page.continuation_token {
                    Some(next) => token = Some(next),
                    None => break,
                }
            }

            info!(deleted, "Deleted session chunks");
            Ok(deleted)
        }
        .instrument(span)
        .await
    }

    async fn merge_keys(&self, keys: &[String]) -> ChunkResult<Option<Bytes>> {
        if keys.is_empty() {
            return Ok(None);
        }
        let downloaded = self.download_chunks(keys).await?;
        if downloaded.chunks.is_empty() {
            return Ok(None);
        }

        let chunk_count = downloaded.chunks.len();
        let merged = merge_chunks(downloaded.chunks, &self.config.merge_limits())?;
        debug!(
            chunks = chunk_count,
            bytes = merged.len(),
            max_download_ms = downloaded.stats.max_elapsed.as_millis() as u64,
            "File reconstructed"
        );
        Ok(Some(merged))
    }

    async fn delete_key(&self, key: &str) -> ChunkResult<()> {
        self.store
            .delete(key)
            .await
            .map_err(|e| ChunkError::classify(e, format!("delete chunk {}", key)))
    }
}

/// Drop the first `n` newline-terminated lines
fn skip_lines(data: Bytes, n: u64) -> Bytes {
    let mut start = 0usize;
    for _ in 0..n {
        match memchr::memchr(b'\n', &data[start..]) {
            Some(pos) => start += pos + 1,
            None => return Bytes::new(),
        }
    }
    data.slice(start..)
}
