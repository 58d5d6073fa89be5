//! Transaction-block codec
//!
//! Layout observed on CSC-style cards:
//!
//! ```text
//! offset 0..2   signature 0x0101
//! offset 2..5   transaction id, 24-bit little-endian
//! offset 5      refill count
//! offset 9..11  last top-up amount in cents, little-endian
//! offset 15     checksum byte; XOR of all 16 bytes must equal zero
//! ```

use crate::card::BLOCK_SIZE;

/// Required signature in the first two bytes of a transaction block.
pub const TRANSACTION_SIGNATURE: u16 = 0x0101;

const TX_ID_MASK: u32 = 0x00FF_FFFF;

/// Fields decoded from a transaction block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionFields {
    pub signature: u16,
    /// 24-bit counter, bumped on every balance change.
    pub transaction_id: u32,
    pub refill_count: u8,
    pub last_amount_cents: u16,
}

/// Decode a transaction block. Returns `None` unless the signature matches.
pub fn decode(data: &[u8; BLOCK_SIZE]) -> Option<TransactionFields> {
    let signature = u16::from_be_bytes([data[0], data[1]]);
    if signature != TRANSACTION_SIGNATURE {
        return None;
    }
    Some(TransactionFields {
        signature,
        transaction_id: u32::from(data[2]) | u32::from(data[3]) << 8 | u32::from(data[4]) << 16,
        refill_count: data[5],
        last_amount_cents: u16::from_le_bytes([data[9], data[10]]),
    })
}

/// Set byte 15 so the XOR of all 16 bytes is zero.
pub fn recompute_checksum(data: &mut [u8; BLOCK_SIZE]) {
    let checksum = data[..15].iter().fold(0u8, |acc, b| acc ^ b);
    data[15] = checksum;
}

/// XOR of every byte in the block; zero for a well-formed transaction block.
pub fn checksum_residue(data: &[u8; BLOCK_SIZE]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Record a top-up on the block.
///
/// The transaction id always advances. A legitimate top-up additionally bumps
/// the refill count and records the amount; an untracked top-up leaves both
/// alone. The checksum is recomputed either way.
pub fn apply_top_up(data: &mut [u8; BLOCK_SIZE], amount_cents: u16, legit: bool) {
    let tx_id = u32::from(data[2]) | u32::from(data[3]) << 8 | u32::from(data[4]) << 16;
    let tx_id = (tx_id + 1) & TX_ID_MASK;
    data[2] = tx_id as u8;
    data[3] = (tx_id >> 8) as u8;
    data[4] = (tx_id >> 16) as u8;

    if legit {
        data[5] = data[5].wrapping_add(1);
        data[9..11].copy_from_slice(&amount_cents.to_le_bytes());
    }

    recompute_checksum(data);
}
