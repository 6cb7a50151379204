//! Deterministic Simulation Testing for Chunk Sync
//!
//! Shadow-state harness that drives `ChunkStore` through a seeded workload
//! on top of a fault-injecting object store:
//! - Clients append lines to files and upload everything not yet acknowledged
//! - Lost acknowledgements make the next upload overlap an object already stored
//! - Reads, offset reads, per-file deletes and session sweeps are interleaved
//! - Every successful read is checked against the shadow copy
//!
//! ## Invariants
//!
//! 1. A successful read returns exactly the shadow lines `1..=max_stored`,
//!    where `max_stored` is the highest last line of any object stored for
//!    the file. An offset read returns the same lines past the offset.
//! 2. A read never reports "no content" while chunks for the file exist.
//! 3. Listing fails with too-many-chunks exactly when the stored chunk count
//!    exceeds the cap.
//! 4. Reads never fail with not-found or merge-limit errors (nothing deletes
//!    concurrently and line numbers stay small).
//! 5. After a successful sweep, no object remains under the session prefix.
//!
//! ```text
//! for seed in 0..N {
//!     let mut harness = ChunkSyncDSTHarness::new(ChunkSyncDSTConfig::chaos(seed));
//!     harness.run(500).await;
//!     harness.check_invariants().await;
//! }
//! ```

use crate::chunks::error::{ChunkError, ChunkErrorKind};
use crate::chunks::key::{decode_chunk_key, file_chunk_prefix, session_chunk_prefix};
use crate::chunks::store::ChunkStore;
use crate::storage::{
    ChunkConfig, InMemoryObjectStore, SimulatedObjectStore, SimulatedStoreConfig,
    SimulatedStoreStats,
};
use bytes::Bytes;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const DST_USER_ID: i64 = 7;
const DST_SESSION_ID: &str = "dst-session";

/// Configuration for chunk sync DST
#[derive(Debug, Clone)]
pub struct ChunkSyncDSTConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Object store fault configuration
    pub store_config: SimulatedStoreConfig,
    /// Limits for the store under test
    pub chunk_config: ChunkConfig,
    /// Listing page size of the backing store
    pub page_size: usize,
    /// Number of logical files in the session
    pub files: usize,
    /// Upper bound on lines appended per operation
    pub max_lines_per_append: usize,
    /// Probability of a full read
    pub read_probability: f64,
    /// Probability of an offset read
    pub offset_read_probability: f64,
    /// Probability of deleting one file
    pub delete_file_probability: f64,
    /// Probability of sweeping the whole session
    pub sweep_probability: f64,
}

impl Default for ChunkSyncDSTConfig {
    fn default() -> Self {
        ChunkSyncDSTConfig {
            seed: 0,
            store_config: SimulatedStoreConfig {
                // Latency reorders RNG draws between download tasks
                latency_range_us: (0, 0),
                ..SimulatedStoreConfig::default()
            },
            chunk_config: ChunkConfig::test(),
            page_size: 7,
            files: 3,
            max_lines_per_append: 8,
            read_probability: 0.2,
            offset_read_probability: 0.1,
            delete_file_probability: 0.02,
            sweep_probability: 0.01,
        }
    }
}

impl ChunkSyncDSTConfig {
    pub fn new(seed: u64) -> Self {
        ChunkSyncDSTConfig {
            seed,
            ..Default::default()
        }
    }

    /// Calm mode - no fault injection
    pub fn calm(seed: u64) -> Self {
        ChunkSyncDSTConfig {
            seed,
            store_config: SimulatedStoreConfig::no_faults(),
            ..Default::default()
        }
    }

    /// Moderate fault injection
    pub fn moderate(seed: u64) -> Self {
        ChunkSyncDSTConfig {
            seed,
            ..Default::default()
        }
    }

    /// Chaos mode - aggressive fault injection and a tight chunk cap
    pub fn chaos(seed: u64) -> Self {
        ChunkSyncDSTConfig {
            seed,
            store_config: SimulatedStoreConfig {
                latency_range_us: (0, 0),
                ..SimulatedStoreConfig::high_chaos()
            },
            chunk_config: ChunkConfig {
                max_chunks_per_file: 40,
                max_parallel_downloads: 3,
                ..ChunkConfig::test()
            },
            page_size: 3,
            delete_file_probability: 0.03,
            sweep_probability: 0.02,
            ..Default::default()
        }
    }
}

/// Chunk sync operation type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkSyncOperation {
    /// Append lines to a file and upload every unacknowledged line
    Append { file: usize, lines: usize },
    /// Reconstruct a whole file
    Read { file: usize },
    /// Reconstruct a file past a line offset
    ReadAfter { file: usize, offset: u64 },
    /// Delete one file's chunks
    DeleteFile { file: usize },
    /// Delete every chunk in the session
    Sweep,
}

/// Outcome of an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    /// Operation succeeded
    Success,
    /// Operation failed (expected under fault injection)
    Failed(ChunkErrorKind),
}

/// Client-side view of one append-only file
#[derive(Debug, Clone, Default)]
struct ShadowFile {
    /// Every line the client has produced, line `n` at index `n - 1`
    lines: Vec<String>,
    /// Lines the store has acknowledged
    acked: u64,
    /// Bumped on delete so recreated files never reuse old content
    generation: u64,
    /// A delete was attempted and has not yet succeeded
    pending_delete: bool,
}

/// Result of a DST run
#[derive(Debug, Clone)]
pub struct ChunkSyncDSTResult {
    /// Seed used
    pub seed: u64,
    pub total_operations: u64,
    pub successful_operations: u64,
    /// Failed operations (expected under faults)
    pub failed_operations: u64,
    pub appends: u64,
    pub reads: u64,
    pub deletes: u64,
    pub sweeps: u64,
    /// Store fault statistics
    pub store_stats: SimulatedStoreStats,
    /// Invariant violations found
    pub invariant_violations: Vec<String>,
    /// Operation history
    pub history: Vec<(ChunkSyncOperation, OperationOutcome)>,
}

impl ChunkSyncDSTResult {
    pub fn new(seed: u64) -> Self {
        ChunkSyncDSTResult {
            seed,
            total_operations: 0,
            successful_operations: 0,
            failed_operations: 0,
            appends: 0,
            reads: 0,
            deletes: 0,
            sweeps: 0,
            store_stats: SimulatedStoreStats::default(),
            invariant_violations: Vec::new(),
            history: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.invariant_violations.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Seed {}: {} ops ({} ok, {} failed), {} appends, {} reads, {} deletes, {} sweeps, {} acks lost, {} violations",
            self.seed,
            self.total_operations,
            self.successful_operations,
            self.failed_operations,
            self.appends,
            self.reads,
            self.deletes,
            self.sweeps,
            self.store_stats.put_acks_lost,
            self.invariant_violations.len()
        )
    }
}

type DSTStore = SimulatedObjectStore<InMemoryObjectStore>;

/// Main DST harness for chunk sync
pub struct ChunkSyncDSTHarness {
    config: ChunkSyncDSTConfig,
    rng: ChaCha8Rng,
    store: DSTStore,
    chunks: ChunkStore<DSTStore>,
    files: Vec<ShadowFile>,
    result: ChunkSyncDSTResult,
}

impl ChunkSyncDSTHarness {
    pub fn new(config: ChunkSyncDSTConfig) -> Self {
        let inner = InMemoryObjectStore::with_page_size(config.page_size);
        // Different seed for store faults than for the workload
        let store = SimulatedObjectStore::new(
            inner,
            config.seed.wrapping_add(1),
            config.store_config.clone(),
        );
        let chunks = ChunkStore::new(store.clone(), config.chunk_config);

        ChunkSyncDSTHarness {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            files: vec![ShadowFile::default(); config.files.max(1)],
            result: ChunkSyncDSTResult::new(config.seed),
            config,
            store,
            chunks,
        }
    }

    fn file_name(file: usize) -> String {
        format!("file_{}.jsonl", file)
    }

    /// Generate the next operation
    pub fn next_operation(&mut self) -> ChunkSyncOperation {
        let file = self.rng.gen_range(0..self.files.len());
        if self.files[file].pending_delete {
            return ChunkSyncOperation::DeleteFile { file };
        }

        let c = &self.config;
        let roll: f64 = self.rng.gen();
        let mut threshold = c.sweep_probability;
        if roll < threshold {
            return ChunkSyncOperation::Sweep;
        }
        threshold += c.delete_file_probability;
        if roll < threshold {
            return ChunkSyncOperation::DeleteFile { file };
        }
        threshold += c.read_probability;
        if roll < threshold {
            return ChunkSyncOperation::Read { file };
        }
        threshold += c.offset_read_probability;
        if roll < threshold {
            let produced = self.files[file].lines.len() as u64;
            let offset = self.rng.gen_range(0..=produced + 1);
            return ChunkSyncOperation::ReadAfter { file, offset };
        }

        let lines = self.rng.gen_range(1..=c.max_lines_per_append.max(1));
        ChunkSyncOperation::Append { file, lines }
    }

    /// Run the workload for a specified number of operations
    pub async fn run(&mut self, operations: usize) {
        for _ in 0..operations {
            let op = self.next_operation();
            self.execute(op).await;
        }
    }

    async fn execute(&mut self, op: ChunkSyncOperation) {
        self.result.total_operations += 1;

        let outcome = match &op {
            ChunkSyncOperation::Append { file, lines } => self.execute_append(*file, *lines).await,
            ChunkSyncOperation::Read { file } => self.execute_read(*file, None).await,
            ChunkSyncOperation::ReadAfter { file, offset } => {
                self.execute_read(*file, Some(*offset)).await
            }
            ChunkSyncOperation::DeleteFile { file } => self.execute_delete_file(*file).await,
            ChunkSyncOperation::Sweep => self.execute_sweep().await,
        };

        match outcome {
            OperationOutcome::Success => self.result.successful_operations += 1,
            OperationOutcome::Failed(_) => self.result.failed_operations += 1,
        }
        self.result.history.push((op, outcome));
    }

    async fn execute_append(&mut self, file: usize, count: usize) -> OperationOutcome {
        self.result.appends += 1;
        let shadow = &mut self.files[file];
        for _ in 0..count {
            let n = shadow.lines.len() + 1;
            shadow.lines.push(format!(
                r#"{{"file":{},"gen":{},"line":{}}}"#,
                file, shadow.generation, n
            ));
        }

        let first = shadow.acked + 1;
        let pending = &shadow.lines[shadow.acked as usize..];
        let last = shadow.lines.len() as u64;
        let upload = self
            .chunks
            .upload_lines(DST_USER_ID, DST_SESSION_ID, &Self::file_name(file), first, pending)
            .await;

        match upload {
            Ok(_) => {
                self.files[file].acked = last;
                OperationOutcome::Success
            }
            Err(e) => OperationOutcome::Failed(e.kind()),
        }
    }

    async fn execute_read(&mut self, file: usize, offset: Option<u64>) -> OperationOutcome {
        self.result.reads += 1;
        let name = Self::file_name(file);
        let read = match offset {
            None => {
                self.chunks
                    .download_and_merge_chunks(DST_USER_ID, DST_SESSION_ID, &name)
                    .await
            }
            Some(offset) => {
                self.chunks
                    .read_file_after(DST_USER_ID, DST_SESSION_ID, &name, offset)
                    .await
            }
        };

        let stored = self.stored_ranges(file);
        match read {
            Ok(content) => {
                self.check_read(file, offset, &stored, content);
                OperationOutcome::Success
            }
            Err(e) => {
                self.check_read_error(file, &stored, &e);
                OperationOutcome::Failed(e.kind())
            }
        }
    }

    async fn execute_delete_file(&mut self, file: usize) -> OperationOutcome {
        self.result.deletes += 1;
        let deleted = self
            .chunks
            .delete_chunks(DST_USER_ID, DST_SESSION_ID, &Self::file_name(file))
            .await;

        match deleted {
            Ok(_) => {
                self.reset_file(file);
                if !self.stored_ranges(file).is_empty() {
                    self.result.invariant_violations.push(format!(
                        "file {}: objects remain after successful delete",
                        file
                    ));
                }
                OperationOutcome::Success
            }
            Err(e) => {
                self.files[file].pending_delete = true;
                OperationOutcome::Failed(e.kind())
            }
        }
    }

    async fn execute_sweep(&mut self) -> OperationOutcome {
        self.result.sweeps += 1;
        let swept = self
            .chunks
            .delete_all_session_chunks(DST_USER_ID, DST_SESSION_ID)
            .await;

        match swept {
            Ok(_) => {
                for file in 0..self.files.len() {
                    self.reset_file(file);
                }
                self.check_session_empty();
                OperationOutcome::Success
            }
            Err(e) => {
                for shadow in &mut self.files {
                    shadow.pending_delete = true;
                }
                OperationOutcome::Failed(e.kind())
            }
        }
    }

    fn reset_file(&mut self, file: usize) {
        let shadow = &mut self.files[file];
        *shadow = ShadowFile {
            generation: shadow.generation + 1,
            ..ShadowFile::default()
        };
    }

    /// Line ranges actually stored for `file`, read past fault injection
    fn stored_ranges(&self, file: usize) -> Vec<(u64, u64)> {
        let prefix = file_chunk_prefix(DST_USER_ID, DST_SESSION_ID, &Self::file_name(file));
        self.store
            .inner()
            .keys()
            .iter()
            .filter(|k| k.starts_with(&prefix))
            .filter_map(|k| decode_chunk_key(k))
            .map(|r| (r.first, r.last))
            .collect()
    }

    fn expected_content(&self, file: usize, from_line: u64, to_line: u64) -> Option<Bytes> {
        let lines = &self.files[file].lines;
        let from = from_line as usize;
        let to = (to_line as usize).min(lines.len());
        if from >= to {
            return None;
        }
        let mut out = String::new();
        for line in &lines[from..to] {
            out.push_str(line);
            out.push('\n');
        }
        Some(Bytes::from(out))
    }

    fn check_read(
        &mut self,
        file: usize,
        offset: Option<u64>,
        stored: &[(u64, u64)],
        content: Option<Bytes>,
    ) {
        if self.files[file].pending_delete {
            // Partial delete: gaps are legitimate until the retry lands
            return;
        }
        let max_stored = stored.iter().map(|&(_, last)| last).max().unwrap_or(0);
        let expected = self.expected_content(file, offset.unwrap_or(0), max_stored);

        if content != expected {
            let show = |b: &Option<Bytes>| {
                b.as_ref()
                    .map(|b| String::from_utf8_lossy(b).into_owned())
                    .unwrap_or_else(|| "<none>".to_string())
            };
            self.result.invariant_violations.push(format!(
                "file {} offset {:?}: read mismatch (stored max line {})\n  expected: {}\n  actual:   {}",
                file,
                offset,
                max_stored,
                show(&expected),
                show(&content)
            ));
        }
    }

    fn check_read_error(&mut self, file: usize, stored: &[(u64, u64)], err: &ChunkError) {
        let limit = self.config.chunk_config.max_chunks_per_file;
        let over_cap = stored.len() > limit;
        match err.kind() {
            ChunkErrorKind::TooManyChunks if over_cap => {}
            ChunkErrorKind::TooManyChunks => self.result.invariant_violations.push(format!(
                "file {}: too-many-chunks with only {} stored (limit {})",
                file,
                stored.len(),
                limit
            )),
            ChunkErrorKind::NotFound
            | ChunkErrorKind::MergeSafetyLimit
            | ChunkErrorKind::InvalidRange
            | ChunkErrorKind::Task => self
                .result
                .invariant_violations
                .push(format!("file {}: unexpected read failure: {}", file, err)),
            // Injected store faults
            ChunkErrorKind::AccessDenied | ChunkErrorKind::Network | ChunkErrorKind::Unknown => {}
        }
    }

    fn check_session_empty(&mut self) {
        let prefix = session_chunk_prefix(DST_USER_ID, DST_SESSION_ID);
        let remaining = self
            .store
            .inner()
            .keys()
            .into_iter()
            .filter(|k| k.starts_with(&prefix))
            .count();
        if remaining > 0 {
            self.result.invariant_violations.push(format!(
                "{} objects remain after successful sweep",
                remaining
            ));
        }
    }

    /// Final pass: read every settled file with faults bypassed
    pub async fn check_invariants(&mut self) {
        let clean = ChunkStore::new(self.store.inner().clone(), self.config.chunk_config);
        for file in 0..self.files.len() {
            let stored = self.stored_ranges(file);
            let read = clean
                .download_and_merge_chunks(DST_USER_ID, DST_SESSION_ID, &Self::file_name(file))
                .await;
            match read {
                Ok(content) => self.check_read(file, None, &stored, content),
                Err(e) => self.check_read_error(file, &stored, &e),
            }
        }
        self.result.store_stats = self.store.stats();
    }

    pub fn result(&self) -> &ChunkSyncDSTResult {
        &self.result
    }

    pub fn into_result(self) -> ChunkSyncDSTResult {
        self.result
    }
}

/// Run a batch of DST tests with different seeds
pub async fn run_dst_batch(
    base_seed: u64,
    count: usize,
    ops_per_run: usize,
    config_fn: impl Fn(u64) -> ChunkSyncDSTConfig,
) -> Vec<ChunkSyncDSTResult> {
    let mut results = Vec::with_capacity(count);

    for i in 0..count {
        let seed = base_seed + i as u64;
        let mut harness = ChunkSyncDSTHarness::new(config_fn(seed));
        harness.run(ops_per_run).await;
        harness.check_invariants().await;
        results.push(harness.into_result());
    }

    results
}

/// Summary of batch results
pub fn summarize_batch(results: &[ChunkSyncDSTResult]) -> String {
    let total = results.len();
    let passed = results.iter().filter(|r| r.is_success()).count();
    let failed_seeds: Vec<u64> = results
        .iter()
        .filter(|r| !r.is_success())
        .map(|r| r.seed)
        .collect();

    let total_ops: u64 = results.iter().map(|r| r.total_operations).sum();
    let total_failed: u64 = results.iter().map(|r| r.failed_operations).sum();
    let acks_lost: u64 = results.iter().map(|r| r.store_stats.put_acks_lost).sum();

    let mut summary = format!(
        "Batch: {}/{} passed, {} total ops, {} failed ops, {} acks lost",
        passed, total, total_ops, total_failed, acks_lost
    );

    if !failed_seeds.is_empty() {
        summary.push_str(&format!("\nFailed seeds: {:?}", failed_seeds));
    }

    summary
}
