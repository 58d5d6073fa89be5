//! Exhaustive random keyspace probing
//!
//! Draws unique uniformly-random 48-bit keys with no dictionary at all, and
//! extrapolates how long the full 2^48 space would take at the observed
//! attempt rate. The point of the mode is the extrapolation: it demonstrates
//! on real hardware that brute force is not a practical attack.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::error::TagError;
use crate::keys::Key;
use crate::recovery::CancelToken;
use crate::transceiver::{frames, KeyType, TagTransceiver};

/// Size of the 48-bit key space.
pub const KEYSPACE: u64 = 1 << 48;

/// Default bound on the dedup set before it is cleared and restarted.
pub const DEFAULT_DEDUP_CAP: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq)]
pub struct ExhaustReport {
    pub attempts: u64,
    pub elapsed: Duration,
    pub attempts_per_sec: f64,
    /// Extrapolated time to cover all of `KEYSPACE` at the observed rate.
    pub projected_full_sweep: Option<Duration>,
    pub found: Option<Key>,
    pub aborted: Option<TagError>,
    /// How many times the dedup set hit its cap and restarted.
    pub dedup_resets: u32,
}

/// Cancellable random sweep over the whole key space.
pub struct ExhaustiveRandomSearch {
    cancel: CancelToken,
    rng: StdRng,
    dedup_cap: usize,
    attempt_limit: Option<u64>,
}

impl ExhaustiveRandomSearch {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            cancel: CancelToken::default(),
            rng,
            dedup_cap: DEFAULT_DEDUP_CAP,
            attempt_limit: None,
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Cap on tracked keys before the dedup set restarts. A smaller cap
    /// accepts a higher chance of retrying an already-tried key.
    pub fn dedup_cap(mut self, cap: usize) -> Self {
        self.dedup_cap = cap.max(1);
        self
    }

    /// Stop after this many attempts even without cancellation.
    pub fn attempt_limit(mut self, limit: u64) -> Self {
        self.attempt_limit = Some(limit);
        self
    }

    /// Probe Key A of one sector until cancelled, exhausted, or a key lands.
    pub fn run<T: TagTransceiver>(
        &mut self,
        tag: &mut T,
        uid: &[u8],
        auth_block: u8,
    ) -> ExhaustReport {
        let mut report = ExhaustReport {
            attempts: 0,
            elapsed: Duration::ZERO,
            attempts_per_sec: 0.0,
            projected_full_sweep: None,
            found: None,
            aborted: None,
            dedup_resets: 0,
        };

        if let Err(err) = tag.connect() {
            report.aborted = Some(err);
            return report;
        }

        let started = Instant::now();
        let mut seen: HashSet<u64> = HashSet::new();

        loop {
            if self.cancel.is_cancelled() {
                debug!("random sweep cancelled");
                break;
            }
            if let Some(limit) = self.attempt_limit {
                if report.attempts >= limit {
                    break;
                }
            }

            if seen.len() >= self.dedup_cap {
                seen.clear();
                report.dedup_resets += 1;
            }
            let raw = loop {
                let candidate = self.rng.gen::<u64>() & (KEYSPACE - 1);
                if seen.insert(candidate) {
                    break candidate;
                }
            };
            let key = key_from_u48(raw);

            report.attempts += 1;
            match tag.transceive(&frames::auth(KeyType::A, auth_block, &key, uid)) {
                Ok(_) => {
                    info!(key = %hex::encode_upper(key), "random sweep landed a key");
                    report.found = Some(key);
                    break;
                }
                Err(TagError::Rejected) | Err(TagError::Timeout) => continue,
                Err(err) => {
                    report.aborted = Some(err);
                    break;
                }
            }
        }

        tag.close();
        report.elapsed = started.elapsed();
        let secs = report.elapsed.as_secs_f64();
        if secs > 0.0 && report.attempts > 0 {
            report.attempts_per_sec = report.attempts as f64 / secs;
            report.projected_full_sweep = Some(Duration::from_secs_f64(
                KEYSPACE as f64 / report.attempts_per_sec,
            ));
        }
        report
    }
}

impl Default for ExhaustiveRandomSearch {
    fn default() -> Self {
        Self::new()
    }
}

fn key_from_u48(raw: u64) -> Key {
    let bytes = raw.to_be_bytes();
    let mut key = [0u8; 6];
    key.copy_from_slice(&bytes[2..8]);
    key
}
