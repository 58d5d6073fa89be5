//! Rinse Operators - signature matching and field-definition lookup
//!
//! Card issuers are identified by byte signatures at fixed locations, and
//! the meaning of each block (balance, receipt, usage counter) varies per
//! issuer. Both facts live in data tables, not code: the embedded TSV files
//! are seed data, and callers can load replacement tables in the same format
//! so new issuers never require a code change.

use rinse_common::CardImage;

/// Numeric issuer identity. `0` is reserved for the unknown operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperatorId(pub u32);

impl OperatorId {
    pub const UNKNOWN: OperatorId = OperatorId(0);
}

/// How a signature's expected bytes are compared against the card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// Raw byte equality over the signature window.
    Exact,
    /// Printable-ASCII decode of the window must contain the expected text.
    AsciiContains,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorSignature {
    pub operator: OperatorId,
    pub name: String,
    pub block: usize,
    pub offset: usize,
    pub length: usize,
    pub kind: MatchKind,
    pub confidence: u8,
    pub expected: Vec<u8>,
}

/// Field encodings that appear on known cards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldEncoding {
    U16Le,
    U32Le,
    Bcd,
    Ascii,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockFieldDef {
    pub operator: OperatorId,
    pub block: usize,
    pub purpose: String,
    pub encoding: FieldEncoding,
    pub offset: usize,
    pub length: usize,
    pub has_inverse: bool,
    pub priority: u8,
}

/// Detection verdict for one card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub operator: OperatorId,
    pub name: String,
    pub confidence: u8,
}

impl Detection {
    fn unknown() -> Detection {
        Detection {
            operator: OperatorId::UNKNOWN,
            name: "Unknown".to_string(),
            confidence: 0,
        }
    }
}

/// Immutable signature and field tables for the process lifetime.
#[derive(Debug, Clone)]
pub struct OperatorTable {
    signatures: Vec<OperatorSignature>,
    fields: Vec<BlockFieldDef>,
}

impl OperatorTable {
    /// The embedded seed tables.
    pub fn builtin() -> OperatorTable {
        Self::from_tsv(
            include_str!("../signatures.tsv"),
            include_str!("../fields.tsv"),
        )
    }

    /// Parse caller-supplied tables. Malformed rows are skipped, matching the
    /// tolerant line-oriented parsing used for other embedded tables.
    pub fn from_tsv(signatures: &str, fields: &str) -> OperatorTable {
        OperatorTable {
            signatures: signatures.lines().filter_map(parse_signature_row).collect(),
            fields: fields.lines().filter_map(parse_field_row).collect(),
        }
    }

    /// Evaluate every signature against the card and return the highest
    /// confidence match, or the unknown operator when nothing matches.
    pub fn detect(&self, card: &CardImage) -> Detection {
        let mut best: Option<&OperatorSignature> = None;
        for sig in &self.signatures {
            if !signature_matches(sig, card) {
                continue;
            }
            if best.map_or(true, |b| sig.confidence > b.confidence) {
                best = Some(sig);
            }
        }
        match best {
            Some(sig) => Detection {
                operator: sig.operator,
                name: sig.name.clone(),
                confidence: sig.confidence,
            },
            None => Detection::unknown(),
        }
    }

    /// All matching signatures, strongest first.
    pub fn match_signatures(&self, card: &CardImage) -> Vec<&OperatorSignature> {
        let mut matches: Vec<&OperatorSignature> = self
            .signatures
            .iter()
            .filter(|sig| signature_matches(sig, card))
            .collect();
        matches.sort_by(|a, b| b.confidence.cmp(&a.confidence));
        matches
    }

    /// Blocks holding a balance for this operator, strongest first.
    pub fn balance_blocks_for(&self, operator: OperatorId) -> Vec<usize> {
        let mut rows: Vec<&BlockFieldDef> = self
            .fields
            .iter()
            .filter(|f| f.operator == operator && f.purpose.contains("balance"))
            .collect();
        rows.sort_by(|a, b| b.priority.cmp(&a.priority));
        let mut blocks = Vec::new();
        for row in rows {
            if !blocks.contains(&row.block) {
                blocks.push(row.block);
            }
        }
        blocks
    }

    /// Field definitions for one block of one operator, strongest first.
    pub fn fields_for(&self, operator: OperatorId, block: usize) -> Vec<&BlockFieldDef> {
        let mut rows: Vec<&BlockFieldDef> = self
            .fields
            .iter()
            .filter(|f| f.operator == operator && f.block == block)
            .collect();
        rows.sort_by(|a, b| b.priority.cmp(&a.priority));
        rows
    }

    /// First field row with the given purpose for this operator.
    pub fn field_with_purpose(
        &self,
        operator: OperatorId,
        purpose: &str,
    ) -> Option<&BlockFieldDef> {
        let mut rows: Vec<&BlockFieldDef> = self
            .fields
            .iter()
            .filter(|f| f.operator == operator && f.purpose == purpose)
            .collect();
        rows.sort_by(|a, b| b.priority.cmp(&a.priority));
        rows.into_iter().next()
    }
}

fn signature_matches(sig: &OperatorSignature, card: &CardImage) -> bool {
    let block = match card.block(sig.block) {
        Ok(b) if b.readable => b,
        _ => return false,
    };
    let end = sig.offset + sig.length;
    if end > block.data.len() {
        return false;
    }
    let window = &block.data[sig.offset..end];
    match sig.kind {
        MatchKind::Exact => window == sig.expected.as_slice(),
        MatchKind::AsciiContains => {
            let haystack = printable_ascii(window);
            let needle = printable_ascii(&sig.expected);
            !needle.is_empty() && haystack.contains(&needle)
        }
    }
}

fn printable_ascii(bytes: &[u8]) -> String {
    bytes
        .iter()
        .filter(|b| (0x20..=0x7E).contains(*b))
        .map(|b| *b as char)
        .collect()
}

// Row format: operator_id, name, block, offset, length, match, confidence, expected_hex
fn parse_signature_row(line: &str) -> Option<OperatorSignature> {
    if line.trim().is_empty() || line.starts_with('#') {
        return None;
    }
    let parts: Vec<&str> = line.split('\t').collect();
    if parts.len() < 8 {
        return None;
    }
    let kind = match parts[5] {
        "exact" => MatchKind::Exact,
        "ascii" => MatchKind::AsciiContains,
        _ => return None,
    };
    Some(OperatorSignature {
        operator: OperatorId(parts[0].parse().ok()?),
        name: parts[1].to_string(),
        block: parts[2].parse().ok()?,
        offset: parts[3].parse().ok()?,
        length: parts[4].parse().ok()?,
        kind,
        confidence: parts[6].parse().ok()?,
        expected: hex::decode(parts[7].trim()).ok()?,
    })
}

// Row format: operator_id, block, purpose, encoding, offset, length, has_inverse, priority
fn parse_field_row(line: &str) -> Option<BlockFieldDef> {
    if line.trim().is_empty() || line.starts_with('#') {
        return None;
    }
    let parts: Vec<&str> = line.split('\t').collect();
    if parts.len() < 8 {
        return None;
    }
    let encoding = match parts[3] {
        "u16le" => FieldEncoding::U16Le,
        "u32le" => FieldEncoding::U32Le,
        "bcd" => FieldEncoding::Bcd,
        "ascii" => FieldEncoding::Ascii,
        _ => return None,
    };
    Some(BlockFieldDef {
        operator: OperatorId(parts[0].parse().ok()?),
        block: parts[1].parse().ok()?,
        purpose: parts[2].to_string(),
        encoding,
        offset: parts[4].parse().ok()?,
        length: parts[5].parse().ok()?,
        has_inverse: parts[6].trim() == "1",
        priority: parts[7].trim().parse().ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rinse_common::{CardImage, CardLayout, BLOCK_SIZE};

    fn csc_card() -> CardImage {
        let mut image = CardImage::new(vec![0x2B, 0xB9, 0x91, 0xB5], CardLayout::Classic1k);
        let mut receipt = [0u8; BLOCK_SIZE];
        receipt[0] = 0x01;
        receipt[1] = 0x01;
        image.set_block(2, receipt).unwrap();
        image
    }

    #[test]
    fn builtin_tables_parse() {
        let table = OperatorTable::builtin();
        assert!(!table.signatures.is_empty());
        assert!(!table.fields.is_empty());
    }

    #[test]
    fn detects_csc_by_receipt_signature() {
        let table = OperatorTable::builtin();
        let detection = table.detect(&csc_card());
        assert_eq!(detection.operator, OperatorId(1));
        assert_eq!(detection.name, "CSC ServiceWorks");
        assert_eq!(detection.confidence, 90);
    }

    #[test]
    fn detects_ubest_by_ascii_signature() {
        let table = OperatorTable::builtin();
        let mut image = CardImage::new(vec![1, 2, 3, 4], CardLayout::Classic1k);
        let mut block1 = [0u8; BLOCK_SIZE];
        block1[..11].copy_from_slice(b"UBESTWASHLA");
        image.set_block(1, block1).unwrap();
        let detection = table.detect(&image);
        assert_eq!(detection.operator, OperatorId(2));
        assert_eq!(detection.confidence, 95);
    }

    #[test]
    fn unknown_when_nothing_matches() {
        let table = OperatorTable::builtin();
        let image = CardImage::new(vec![1, 2, 3, 4], CardLayout::Classic1k);
        let detection = table.detect(&image);
        assert_eq!(detection.operator, OperatorId::UNKNOWN);
        assert_eq!(detection.name, "Unknown");
        assert_eq!(detection.confidence, 0);
    }

    #[test]
    fn highest_confidence_wins() {
        let table = OperatorTable::builtin();
        // A card matching both the CSC receipt signature (90) and the U-Best
        // ASCII signature (95)
        let mut image = csc_card();
        let mut block1 = [0u8; BLOCK_SIZE];
        block1[..9].copy_from_slice(b"UBESTWASH");
        image.set_block(1, block1).unwrap();
        assert_eq!(table.detect(&image).operator, OperatorId(2));

        let ranked = table.match_signatures(&image);
        assert_eq!(ranked.len(), 2);
        assert!(ranked[0].confidence >= ranked[1].confidence);
    }

    #[test]
    fn unreadable_blocks_never_match() {
        let table = OperatorTable::builtin();
        let mut image = csc_card();
        image.mark_unreadable(2).unwrap();
        assert_eq!(table.detect(&image).operator, OperatorId::UNKNOWN);
    }

    #[test]
    fn balance_blocks_ordered_by_priority() {
        let table = OperatorTable::builtin();
        assert_eq!(table.balance_blocks_for(OperatorId(1)), vec![4, 8]);
        assert_eq!(table.balance_blocks_for(OperatorId(2)), vec![4]);
        assert_eq!(table.balance_blocks_for(OperatorId::UNKNOWN), vec![4, 8]);
    }

    #[test]
    fn field_lookups_are_table_driven() {
        let table = OperatorTable::builtin();
        let fields = table.fields_for(OperatorId(1), 9);
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].purpose, "usage_counter");
        assert_eq!(fields[1].purpose, "capacity");

        let receipt = table
            .field_with_purpose(OperatorId(1), "last_transaction")
            .unwrap();
        assert_eq!(receipt.block, 2);
        assert_eq!(receipt.offset, 9);
        assert_eq!(receipt.length, 2);
    }

    #[test]
    fn external_tables_replace_builtin() {
        let table = OperatorTable::from_tsv(
            "7\tAcme Wash\t1\t0\t4\texact\t80\tDEADBEEF\n",
            "7\t12\tbalance\tu16le\t0\t2\t1\t100\n",
        );
        let mut image = CardImage::new(vec![1, 2, 3, 4], CardLayout::Classic1k);
        let mut block1 = [0u8; BLOCK_SIZE];
        block1[..4].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        image.set_block(1, block1).unwrap();
        let detection = table.detect(&image);
        assert_eq!(detection.operator, OperatorId(7));
        assert_eq!(table.balance_blocks_for(OperatorId(7)), vec![12]);
    }
}
