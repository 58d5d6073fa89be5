//! Dictionary-based sector key recovery
//!
//! Per sector, candidates are tried in a fixed priority order: the built-in
//! defaults, then every key that has already opened a sector this session
//! (operators commonly reuse keys across sectors), then the remaining
//! dictionary reordered by the sector's sweep strategy. Key A is swept
//! first; when it lands, the same key is opportunistically offered as Key B
//! before Key B is given up on. When Key A exhausts, Key B gets its own full
//! sweep.
//!
//! Authentication rejects and timeouts advance to the next candidate. Tag
//! loss aborts the whole multi-sector scan. Progress is published after
//! every attempt into a last-value-wins slot so a slow consumer can never
//! stall the sweep.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use rinse_common::{CardImage, BLOCK_SIZE};

use crate::error::TagError;
use crate::keys::{builtin_defaults, Key, KeyCandidate, KeyDictionary, KeyProvenance};
use crate::sweep::SweepStrategy;
use crate::transceiver::{frames, KeyType, TagTransceiver};

/// Last published state of a running sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub sector: usize,
    /// 1-based index of the key being tried.
    pub key_index: usize,
    pub key_total: usize,
    pub current_key: Key,
    pub attempts_per_sec: f64,
}

/// Publish/replace progress slot. Consumers may skip intermediate states but
/// always observe the latest; publishing never blocks on a reader.
#[derive(Debug, Clone, Default)]
pub struct ProgressPublisher {
    slot: Arc<Mutex<Option<ProgressSnapshot>>>,
}

impl ProgressPublisher {
    pub fn publish(&self, snapshot: ProgressSnapshot) {
        *self.guard() = Some(snapshot);
    }

    pub fn latest(&self) -> Option<ProgressSnapshot> {
        self.guard().clone()
    }

    fn guard(&self) -> MutexGuard<'_, Option<ProgressSnapshot>> {
        match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Cooperative cancellation flag, checked once per key attempt.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Result for one sector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectorOutcome {
    pub sector: usize,
    pub key_a: Option<Key>,
    pub key_b: Option<Key>,
    /// Blocks that could not be read even with a working key.
    pub unreadable_blocks: Vec<usize>,
}

impl SectorOutcome {
    pub fn authenticated(&self) -> bool {
        self.key_a.is_some() || self.key_b.is_some()
    }
}

/// Structured scan result. Partial success is a normal outcome: sectors that
/// exhausted every candidate simply report no keys.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanReport {
    pub sectors: Vec<SectorOutcome>,
    /// Keys that opened at least one sector, in discovery order.
    pub session_keys: Vec<Key>,
    pub attempts: u64,
    /// Set when the scan stopped early on a fatal transceiver error.
    pub aborted: Option<TagError>,
    pub cancelled: bool,
}

impl ScanReport {
    pub fn sectors_recovered(&self) -> usize {
        self.sectors.iter().filter(|s| s.authenticated()).count()
    }
}

/// Per-sector dictionary attack over an opaque tag transceiver.
pub struct SectorKeyRecoveryEngine {
    dictionary: KeyDictionary,
    session_keys: Vec<Key>,
    progress: ProgressPublisher,
    cancel: CancelToken,
    rng: StdRng,
    previous_strategy: Option<SweepStrategy>,
}

impl SectorKeyRecoveryEngine {
    pub fn new(dictionary: KeyDictionary) -> Self {
        Self::with_rng(dictionary, StdRng::from_entropy())
    }

    /// Deterministic sweep ordering for tests.
    pub fn seeded(dictionary: KeyDictionary, seed: u64) -> Self {
        Self::with_rng(dictionary, StdRng::seed_from_u64(seed))
    }

    fn with_rng(dictionary: KeyDictionary, rng: StdRng) -> Self {
        Self {
            dictionary,
            session_keys: Vec::new(),
            progress: ProgressPublisher::default(),
            cancel: CancelToken::default(),
            rng,
            previous_strategy: None,
        }
    }

    /// Handle for observing progress from another thread.
    pub fn progress(&self) -> ProgressPublisher {
        self.progress.clone()
    }

    /// Handle for cancelling a running scan from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn session_keys(&self) -> &[Key] {
        &self.session_keys
    }

    /// Run the full multi-sector scan, populating `image` with every block
    /// that could be read. The transceiver is held exclusively for the whole
    /// scan and released on completion or tag loss.
    pub fn scan<T: TagTransceiver>(&mut self, tag: &mut T, image: &mut CardImage) -> ScanReport {
        let mut report = ScanReport {
            sectors: Vec::new(),
            session_keys: Vec::new(),
            attempts: 0,
            aborted: None,
            cancelled: false,
        };

        if let Err(err) = tag.connect() {
            warn!(error = %err, "could not open tag session");
            report.aborted = Some(err);
            return report;
        }

        let started = Instant::now();
        let layout = image.layout();
        let uid = image.uid.clone();

        'sectors: for sector in 0..layout.sector_count() {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let trailer = layout.sector_trailer(sector) as u8;

            let candidates = self.candidate_order();
            let key_a = match self.sweep(
                tag,
                &uid,
                sector,
                trailer,
                KeyType::A,
                &candidates,
                started,
                &mut report.attempts,
            ) {
                Ok(found) => found,
                Err(err) => {
                    warn!(sector, error = %err, "scan aborted");
                    report.aborted = Some(err);
                    break;
                }
            };

            let mut key_b = None;
            if let Some(key) = key_a {
                self.remember(key);
                info!(sector, key = %hex::encode_upper(key), "key A found");
                // Issuers often use one key for both slots; one cheap probe
                // before giving up on Key B.
                report.attempts += 1;
                match try_auth(tag, &uid, trailer, KeyType::B, &key) {
                    Ok(true) => key_b = Some(key),
                    Ok(false) => debug!(sector, "key A does not open key B"),
                    Err(err) => {
                        report.aborted = Some(err);
                        break;
                    }
                }
            } else {
                let candidates = self.candidate_order();
                key_b = match self.sweep(
                    tag,
                    &uid,
                    sector,
                    trailer,
                    KeyType::B,
                    &candidates,
                    started,
                    &mut report.attempts,
                ) {
                    Ok(found) => found,
                    Err(err) => {
                        report.aborted = Some(err);
                        break;
                    }
                };
                if let Some(key) = key_b {
                    self.remember(key);
                    info!(sector, key = %hex::encode_upper(key), "key B found");
                }
            }

            let mut unreadable = Vec::new();
            let working = key_a.map(|k| (k, KeyType::A)).or(key_b.map(|k| (k, KeyType::B)));
            if let Some((key, key_type)) = working {
                let start = layout.sector_start(sector);
                for block in start..start + layout.sector_len(sector) {
                    match read_block(tag, &uid, block as u8, key_type, &key) {
                        Ok(Some(data)) => {
                            let _ = image.set_block(block, data);
                        }
                        Ok(None) => {
                            debug!(block, "block unreadable, keeping placeholder");
                            let _ = image.mark_unreadable(block);
                            unreadable.push(block);
                        }
                        Err(err) => {
                            report.aborted = Some(err);
                            report.sectors.push(SectorOutcome {
                                sector,
                                key_a,
                                key_b,
                                unreadable_blocks: unreadable,
                            });
                            break 'sectors;
                        }
                    }
                }
                // The tag never returns key bytes over the air; fold the
                // recovered keys into the trailer we just read.
                if image.block(layout.sector_trailer(sector)).map_or(false, |b| b.readable) {
                    let _ = image.store_sector_keys(sector, key_a, key_b);
                }
            } else {
                debug!(sector, "exhausted every candidate");
            }

            report.sectors.push(SectorOutcome {
                sector,
                key_a,
                key_b,
                unreadable_blocks: unreadable,
            });
        }

        tag.close();
        report.session_keys = self.session_keys.clone();
        report
    }

    /// Builtins, then session-found keys, then the dictionary reordered by
    /// this sector's sweep strategy. Duplicates keep their earliest slot.
    fn candidate_order(&mut self) -> Vec<KeyCandidate> {
        let strategy = SweepStrategy::pick(&mut self.rng, self.previous_strategy);
        self.previous_strategy = Some(strategy);
        debug!(?strategy, "sweep strategy for next sector");

        let mut out = builtin_defaults();
        for key in &self.session_keys {
            push_unique(&mut out, *key, KeyProvenance::SessionFound);
        }
        for key in strategy.reorder(self.dictionary.keys(), &mut self.rng) {
            push_unique(&mut out, key, KeyProvenance::Dictionary);
        }
        out
    }

    fn remember(&mut self, key: Key) {
        if !self.session_keys.contains(&key) {
            self.session_keys.push(key);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn sweep<T: TagTransceiver>(
        &self,
        tag: &mut T,
        uid: &[u8],
        sector: usize,
        trailer: u8,
        key_type: KeyType,
        candidates: &[KeyCandidate],
        started: Instant,
        attempts: &mut u64,
    ) -> Result<Option<Key>, TagError> {
        for (index, candidate) in candidates.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Ok(None);
            }

            *attempts += 1;
            let elapsed = started.elapsed().as_secs_f64();
            self.progress.publish(ProgressSnapshot {
                sector,
                key_index: index + 1,
                key_total: candidates.len(),
                current_key: candidate.key,
                attempts_per_sec: if elapsed > 0.0 {
                    *attempts as f64 / elapsed
                } else {
                    0.0
                },
            });

            if try_auth(tag, uid, trailer, key_type, &candidate.key)? {
                return Ok(Some(candidate.key));
            }
        }
        Ok(None)
    }
}

fn push_unique(out: &mut Vec<KeyCandidate>, key: Key, provenance: KeyProvenance) {
    if !out.iter().any(|c| c.key == key) {
        out.push(KeyCandidate { key, provenance });
    }
}

/// One authentication attempt. Rejection and timeout are non-fatal and just
/// report "no"; tag loss propagates.
fn try_auth<T: TagTransceiver>(
    tag: &mut T,
    uid: &[u8],
    block: u8,
    key_type: KeyType,
    key: &Key,
) -> Result<bool, TagError> {
    match tag.transceive(&frames::auth(key_type, block, key, uid)) {
        Ok(_) => Ok(true),
        Err(TagError::Rejected) | Err(TagError::Timeout) => Ok(false),
        Err(err) => Err(err),
    }
}

/// Authenticate and read one block. `Ok(None)` means the block stays
/// unreadable; only tag loss is an error.
fn read_block<T: TagTransceiver>(
    tag: &mut T,
    uid: &[u8],
    block: u8,
    key_type: KeyType,
    key: &Key,
) -> Result<Option<[u8; BLOCK_SIZE]>, TagError> {
    if !try_auth(tag, uid, block, key_type, key)? {
        return Ok(None);
    }
    match tag.transceive(&frames::read_block(block)) {
        Ok(data) if data.len() == BLOCK_SIZE => {
            let mut out = [0u8; BLOCK_SIZE];
            out.copy_from_slice(&data);
            Ok(Some(out))
        }
        Ok(data) => {
            warn!(block, len = data.len(), "short read");
            Ok(None)
        }
        Err(TagError::Rejected) | Err(TagError::Timeout) => Ok(None),
        Err(err) => Err(err),
    }
}
