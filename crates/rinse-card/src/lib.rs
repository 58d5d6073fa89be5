//! Rinse Card - tag access, sector key recovery, and magic-tag writing
//!
//! Everything in this crate talks to a physical tag through the
//! [`TagTransceiver`] trait. The trait carries raw MIFARE Classic command
//! frames; the card's proprietary authentication cipher lives below it, in
//! the radio driver, and is never reimplemented here.
//!
//! The transceiver is an exclusive resource: exactly one operation (a
//! recovery scan, an emulation session, or a write) may exchange commands
//! with a physical session at a time, so every entry point borrows it
//! mutably for the full operation.

pub mod error;
pub mod exhaust;
pub mod keys;
pub mod recovery;
pub mod sweep;
pub mod transceiver;
pub mod write;

pub use error::TagError;
pub use exhaust::{ExhaustReport, ExhaustiveRandomSearch};
pub use keys::{builtin_defaults, Key, KeyCandidate, KeyDictionary, KeyProvenance};
pub use recovery::{
    CancelToken, ProgressPublisher, ProgressSnapshot, ScanReport, SectorKeyRecoveryEngine,
    SectorOutcome,
};
pub use sweep::SweepStrategy;
pub use transceiver::{KeyType, TagTransceiver};
pub use write::{MagicVariant, MagicWriter, WriteReport};
