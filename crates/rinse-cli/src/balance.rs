//! Balance rewriting over a parsed dump
//!
//! Mirrors how field hardware maintains the card: the active balance block is
//! re-encoded with its inverse copies, any backup block that currently holds
//! a valid value encoding is kept in sync, and the receipt block is updated
//! according to the requested bookkeeping level.

use std::error::Error;

use tracing::{debug, warn};

use rinse_common::{transaction, CardImage, ValueBlock};
use rinse_operators::{Detection, OperatorId, OperatorTable};

pub struct BalanceOutcome {
    pub balance_block: usize,
    pub old_cents: u32,
    pub mirrors_updated: Vec<usize>,
    pub receipt_block: Option<usize>,
}

/// Table-designated balance blocks, falling back to the unknown-operator
/// defaults when the operator has no rows of its own.
pub fn balance_candidates(table: &OperatorTable, detection: &Detection) -> Vec<usize> {
    let blocks = table.balance_blocks_for(detection.operator);
    if blocks.is_empty() {
        table.balance_blocks_for(OperatorId::UNKNOWN)
    } else {
        blocks
    }
}

pub fn set_balance(
    image: &mut CardImage,
    table: &OperatorTable,
    detection: &Detection,
    cents: u16,
    legit: bool,
    track_transaction: bool,
) -> Result<BalanceOutcome, Box<dyn Error>> {
    let candidates = balance_candidates(table, detection);

    // Prefer the first designated block that currently validates; a dump with
    // no valid candidate still gets the first designated block rewritten.
    let active = candidates
        .iter()
        .copied()
        .find(|b| decoded_value(image, *b).is_some())
        .or_else(|| candidates.first().copied())
        .ok_or("no balance block designated for this operator")?;

    let old = decoded_value(image, active);
    let old_cents = old.map(|v| v.value()).unwrap_or(0);
    let old_counter = old.and_then(|v| v.counter()).unwrap_or(0);

    let changed = u32::from(cents) != old_cents;
    let counter = if legit && changed {
        old_counter.wrapping_add(1)
    } else {
        old_counter
    };

    let encoded = ValueBlock::encode_split16(cents, counter);
    image
        .set_block(active, encoded)
        .map_err(|e| format!("balance block {active}: {e}"))?;
    debug!(block = active, cents, counter, "balance block rewritten");

    // Keep every backup that currently validates in lockstep
    let mut mirrors_updated = Vec::new();
    for mirror in candidates.into_iter().filter(|b| *b != active) {
        if decoded_value(image, mirror).is_some() {
            image
                .set_block(mirror, encoded)
                .map_err(|e| format!("mirror block {mirror}: {e}"))?;
            mirrors_updated.push(mirror);
        }
    }

    let mut receipt_block = None;
    if track_transaction && changed {
        match table.field_with_purpose(detection.operator, "last_transaction") {
            Some(field) => {
                let index = field.block;
                match image.block(index) {
                    Ok(block) if block.readable => {
                        let mut data = block.data;
                        let delta = (i64::from(cents) - i64::from(old_cents))
                            .unsigned_abs()
                            .min(u64::from(u16::MAX)) as u16;
                        transaction::apply_top_up(&mut data, delta, legit);
                        image
                            .set_block(index, data)
                            .map_err(|e| format!("receipt block {index}: {e}"))?;
                        receipt_block = Some(index);
                    }
                    _ => warn!(block = index, "receipt block unreadable, tracking skipped"),
                }
            }
            None => warn!("operator has no receipt block defined, tracking skipped"),
        }
    }

    Ok(BalanceOutcome {
        balance_block: active,
        old_cents,
        mirrors_updated,
        receipt_block,
    })
}

fn decoded_value(image: &CardImage, block: usize) -> Option<ValueBlock> {
    let b = image.block(block).ok()?;
    if !b.readable {
        return None;
    }
    ValueBlock::decode(&b.data)
}
