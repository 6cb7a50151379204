//! Simulated Object Store with Fault Injection
//!
//! DST-compatible wrapper that injects faults from a seeded RNG. Given the
//! same seed and the same call sequence, the same faults fire.
//!
//! Listing faults return short pages with a `StartAfter` continuation token
//! (the last key returned), so the wrapped store must use the same token
//! convention as `InMemoryObjectStore`.

use crate::storage::object_store::{ListResult, ObjectStore, StoreFuture};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::io::{Error as IoError, ErrorKind};
use std::sync::Arc;
use std::time::Duration;

/// Configuration for simulated fault injection
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedStoreConfig {
    /// Probability of PUT operation failure
    pub put_fail_prob: f64,
    /// Probability that a PUT lands but reports failure to the caller
    pub put_ack_lost_prob: f64,
    /// Probability of GET operation failure
    pub get_fail_prob: f64,
    /// Probability of DELETE failure
    pub delete_fail_prob: f64,
    /// Probability of LIST failure
    pub list_fail_prob: f64,
    /// Probability of LIST returning a short page
    pub list_short_page_prob: f64,
    /// Probability of any operation timing out
    pub timeout_prob: f64,
    /// Probability of any operation being denied
    pub access_denied_prob: f64,
    /// Simulated latency range in microseconds (min, max)
    pub latency_range_us: (u64, u64),
}

impl Default for SimulatedStoreConfig {
    fn default() -> Self {
        SimulatedStoreConfig {
            put_fail_prob: 0.01,           // 1%
            put_ack_lost_prob: 0.01,       // 1%
            get_fail_prob: 0.01,           // 1%
            delete_fail_prob: 0.01,        // 1%
            list_fail_prob: 0.005,         // 0.5%
            list_short_page_prob: 0.1,     // 10%
            timeout_prob: 0.005,           // 0.5%
            access_denied_prob: 0.001,     // 0.1%
            latency_range_us: (0, 2_000),  // 0 - 2ms
        }
    }
}

impl SimulatedStoreConfig {
    /// High chaos configuration for stress testing
    pub fn high_chaos() -> Self {
        SimulatedStoreConfig {
            put_fail_prob: 0.05,
            put_ack_lost_prob: 0.05,
            get_fail_prob: 0.05,
            delete_fail_prob: 0.05,
            list_fail_prob: 0.02,
            list_short_page_prob: 0.3,
            timeout_prob: 0.02,
            access_denied_prob: 0.01,
            latency_range_us: (0, 5_000),
        }
    }

    /// No faults - for baseline testing
    pub fn no_faults() -> Self {
        SimulatedStoreConfig {
            put_fail_prob: 0.0,
            put_ack_lost_prob: 0.0,
            get_fail_prob: 0.0,
            delete_fail_prob: 0.0,
            list_fail_prob: 0.0,
            list_short_page_prob: 0.0,
            timeout_prob: 0.0,
            access_denied_prob: 0.0,
            latency_range_us: (0, 0),
        }
    }

    /// Latency only: every operation succeeds after a random delay
    pub fn latency_only(min_us: u64, max_us: u64) -> Self {
        SimulatedStoreConfig {
            latency_range_us: (min_us, max_us),
            ..Self::no_faults()
        }
    }
}

/// Statistics for fault injection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatedStoreStats {
    pub put_attempts: u64,
    pub put_failures: u64,
    pub put_acks_lost: u64,
    pub get_attempts: u64,
    pub get_failures: u64,
    pub delete_attempts: u64,
    pub delete_failures: u64,
    pub list_attempts: u64,
    pub list_failures: u64,
    pub list_short_pages: u64,
    pub timeouts: u64,
    pub access_denied: u64,
}

struct SimulatedStoreInner {
    rng: ChaCha8Rng,
    stats: SimulatedStoreStats,
}

impl SimulatedStoreInner {
    fn roll(&mut self, prob: f64) -> bool {
        prob > 0.0 && self.rng.gen_bool(prob.min(1.0))
    }

    fn latency(&mut self, (min, max): (u64, u64)) -> Option<Duration> {
        let us = if max > min {
            self.rng.gen_range(min..=max)
        } else {
            min
        };
        (us > 0).then(|| Duration::from_micros(us))
    }

    /// Faults shared by every operation, checked before the call reaches the store
    fn common_fault(&mut self, config: &SimulatedStoreConfig) -> Option<IoError> {
        if self.roll(config.timeout_prob) {
            self.stats.timeouts += 1;
            return Some(IoError::new(ErrorKind::TimedOut, "simulated timeout"));
        }
        if self.roll(config.access_denied_prob) {
            self.stats.access_denied += 1;
            return Some(IoError::new(
                ErrorKind::PermissionDenied,
                "simulated access denied",
            ));
        }
        None
    }
}

/// Simulated object store that wraps another store and injects faults
#[derive(Clone)]
pub struct SimulatedObjectStore<S: ObjectStore + Clone> {
    inner_store: S,
    config: SimulatedStoreConfig,
    state: Arc<Mutex<SimulatedStoreInner>>,
}

impl<S: ObjectStore + Clone> std::fmt::Debug for SimulatedObjectStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedObjectStore")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<S: ObjectStore + Clone> SimulatedObjectStore<S> {
    /// Create a new simulated store driven by `seed`
    pub fn new(inner_store: S, seed: u64, config: SimulatedStoreConfig) -> Self {
        SimulatedObjectStore {
            inner_store,
            config,
            state: Arc::new(Mutex::new(SimulatedStoreInner {
                rng: ChaCha8Rng::seed_from_u64(seed),
                stats: SimulatedStoreStats::default(),
            })),
        }
    }

    /// Get current statistics
    pub fn stats(&self) -> SimulatedStoreStats {
        self.state.lock().stats.clone()
    }

    /// Reset statistics
    pub fn reset_stats(&self) {
        self.state.lock().stats = SimulatedStoreStats::default();
    }

    /// The wrapped store, bypassing fault injection
    pub fn inner(&self) -> &S {
        &self.inner_store
    }

    async fn delay(&self) {
        let latency = self.state.lock().latency(self.config.latency_range_us);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl<S: ObjectStore + Clone> ObjectStore for SimulatedObjectStore<S> {
    fn put<'a>(&'a self, key: &'a str, data: &'a [u8]) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let (fault, ack_lost) = {
                let mut s = self.state.lock();
                s.stats.put_attempts += 1;
                let fault = s.common_fault(&self.config).or_else(|| {
                    s.roll(self.config.put_fail_prob).then(|| {
                        s.stats.put_failures += 1;
                        IoError::other("simulated put failure")
                    })
                });
                let ack_lost = fault.is_none() && s.roll(self.config.put_ack_lost_prob);
                (fault, ack_lost)
            };
            if let Some(e) = fault {
                return Err(e);
            }

            self.delay().await;
            self.inner_store.put(key, data).await?;

            if ack_lost {
                self.state.lock().stats.put_acks_lost += 1;
                return Err(IoError::new(
                    ErrorKind::TimedOut,
                    "simulated lost acknowledgement",
                ));
            }
            Ok(())
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Vec<u8>> {
        Box::pin(async move {
            let fault = {
                let mut s = self.state.lock();
                s.stats.get_attempts += 1;
                s.common_fault(&self.config).or_else(|| {
                    s.roll(self.config.get_fail_prob).then(|| {
                        s.stats.get_failures += 1;
                        IoError::other("simulated get failure")
                    })
                })
            };
            if let Some(e) = fault {
                return Err(e);
            }

            self.delay().await;
            self.inner_store.get(key).await
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let fault = {
                let mut s = self.state.lock();
                s.stats.delete_attempts += 1;
                s.common_fault(&self.config).or_else(|| {
                    s.roll(self.config.delete_fail_prob).then(|| {
                        s.stats.delete_failures += 1;
                        IoError::other("simulated delete failure")
                    })
                })
            };
            if let Some(e) = fault {
                return Err(e);
            }

            self.delay().await;
            self.inner_store.delete(key).await
        })
    }

    fn list<'a>(
        &'a self,
        prefix: &'a str,
        continuation_token: Option<&'a str>,
    ) -> StoreFuture<'a, ListResult> {
        Box::pin(async move {
            let fault = {
                let mut s = self.state.lock();
                s.stats.list_attempts += 1;
                s.common_fault(&self.config).or_else(|| {
                    s.roll(self.config.list_fail_prob).then(|| {
                        s.stats.list_failures += 1;
                        IoError::new(ErrorKind::ConnectionReset, "simulated list failure")
                    })
                })
            };
            if let Some(e) = fault {
                return Err(e);
            }

            self.delay().await;
            let mut result = self.inner_store.list(prefix, continuation_token).await?;

            if result.objects.len() > 1 {
                let mut s = self.state.lock();
                if s.roll(self.config.list_short_page_prob) {
                    s.stats.list_short_pages += 1;
                    let keep = s.rng.gen_range(1..result.objects.len());
                    result.objects.truncate(keep);
                    result.continuation_token = result.objects.last().map(|o| o.key.clone());
                }
            }

            Ok(result)
        })
    }
}
