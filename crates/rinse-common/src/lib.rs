//! Rinse Common - Shared data structures and codecs for stored-value card analysis
//!
//! This crate provides the in-memory sector/block model for MIFARE Classic
//! cards, the value-block and transaction-block codecs used by laundry and
//! vending operators, and the plain-text dump interchange format.

pub mod card;
pub mod dump;
pub mod transaction;
pub mod value;

pub use card::{Block, CardError, CardImage, CardLayout, SectorKeys, BLOCK_SIZE};
pub use dump::{CardDump, DumpError};
pub use transaction::TransactionFields;
pub use value::{UsageReading, ValueBlock};
