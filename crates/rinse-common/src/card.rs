//! In-memory sector/block model for MIFARE Classic cards

use thiserror::Error;

/// Every MIFARE Classic block holds exactly 16 bytes.
pub const BLOCK_SIZE: usize = 16;

/// Length of a sector authentication key.
pub const KEY_SIZE: usize = 6;

/// Errors raised by card image accessors
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CardError {
    #[error("block {index} out of range for a {count}-block card")]
    OutOfRange { index: usize, count: usize },
}

/// Physical memory layout variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardLayout {
    /// 1K card: 16 sectors of 4 blocks
    Classic1k,
    /// 4K card: 32 sectors of 4 blocks, then 8 sectors of 16 blocks
    Classic4k,
}

impl CardLayout {
    pub fn block_count(self) -> usize {
        match self {
            CardLayout::Classic1k => 64,
            CardLayout::Classic4k => 256,
        }
    }

    pub fn sector_count(self) -> usize {
        match self {
            CardLayout::Classic1k => 16,
            CardLayout::Classic4k => 40,
        }
    }

    /// Pick the smallest layout that can hold `max_block`.
    pub fn for_max_block(max_block: usize) -> Option<CardLayout> {
        if max_block < 64 {
            Some(CardLayout::Classic1k)
        } else if max_block < 256 {
            Some(CardLayout::Classic4k)
        } else {
            None
        }
    }

    pub fn is_trailer(self, block: usize) -> bool {
        if block < 128 {
            (block + 1) % 4 == 0
        } else {
            (block + 1 - 128) % 16 == 0
        }
    }

    pub fn sector_of(self, block: usize) -> usize {
        if block < 128 {
            block / 4
        } else {
            32 + (block - 128) / 16
        }
    }

    /// First block index of a sector.
    pub fn sector_start(self, sector: usize) -> usize {
        if sector < 32 {
            sector * 4
        } else {
            128 + (sector - 32) * 16
        }
    }

    /// Number of blocks in a sector.
    pub fn sector_len(self, sector: usize) -> usize {
        if sector < 32 {
            4
        } else {
            16
        }
    }

    /// Trailer block index of a sector.
    pub fn sector_trailer(self, sector: usize) -> usize {
        self.sector_start(sector) + self.sector_len(sector) - 1
    }
}

/// One 16-byte block of card memory.
///
/// `readable` is false for blocks that were never successfully read from a
/// physical tag; such blocks render as `??` placeholders and are never
/// silently treated as zeros.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub index: usize,
    pub data: [u8; BLOCK_SIZE],
    pub is_trailer: bool,
    pub readable: bool,
}

impl Block {
    fn empty(index: usize, layout: CardLayout) -> Self {
        Self {
            index,
            data: [0u8; BLOCK_SIZE],
            is_trailer: layout.is_trailer(index),
            readable: false,
        }
    }
}

/// Keys recovered for one sector, derived from its trailer block.
///
/// A sector counts as authenticated when at least one key is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SectorKeys {
    pub key_a: Option<[u8; KEY_SIZE]>,
    pub key_b: Option<[u8; KEY_SIZE]>,
}

impl SectorKeys {
    pub fn authenticated(&self) -> bool {
        self.key_a.is_some() || self.key_b.is_some()
    }
}

/// Complete card memory image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardImage {
    pub uid: Vec<u8>,
    layout: CardLayout,
    blocks: Vec<Block>,
}

impl CardImage {
    /// Create an empty image for a newly observed UID. Every block starts
    /// unreadable.
    pub fn new(uid: Vec<u8>, layout: CardLayout) -> Self {
        let blocks = (0..layout.block_count())
            .map(|i| Block::empty(i, layout))
            .collect();
        Self { uid, layout, blocks }
    }

    pub fn layout(&self) -> CardLayout {
        self.layout
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn block(&self, index: usize) -> Result<&Block, CardError> {
        self.blocks.get(index).ok_or(CardError::OutOfRange {
            index,
            count: self.blocks.len(),
        })
    }

    /// Store block data and mark the block readable.
    pub fn set_block(&mut self, index: usize, data: [u8; BLOCK_SIZE]) -> Result<(), CardError> {
        let count = self.blocks.len();
        let block = self
            .blocks
            .get_mut(index)
            .ok_or(CardError::OutOfRange { index, count })?;
        block.data = data;
        block.readable = true;
        Ok(())
    }

    /// Record that a block could not be read.
    pub fn mark_unreadable(&mut self, index: usize) -> Result<(), CardError> {
        let count = self.blocks.len();
        let block = self
            .blocks
            .get_mut(index)
            .ok_or(CardError::OutOfRange { index, count })?;
        block.readable = false;
        Ok(())
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Sector keys derived from the trailer block. The card never returns key
    /// bytes over the air, so these are only present when the recovery engine
    /// (or a parsed dump) has filled them in.
    pub fn sector_keys(&self, sector: usize) -> SectorKeys {
        let trailer = self.layout.sector_trailer(sector);
        match self.blocks.get(trailer) {
            Some(b) if b.readable => {
                let mut key_a = [0u8; KEY_SIZE];
                let mut key_b = [0u8; KEY_SIZE];
                key_a.copy_from_slice(&b.data[0..6]);
                key_b.copy_from_slice(&b.data[10..16]);
                SectorKeys {
                    key_a: Some(key_a),
                    key_b: Some(key_b),
                }
            }
            _ => SectorKeys::default(),
        }
    }

    /// Write recovered keys into a sector trailer without disturbing the
    /// access bits, marking the trailer readable.
    pub fn store_sector_keys(
        &mut self,
        sector: usize,
        key_a: Option<[u8; KEY_SIZE]>,
        key_b: Option<[u8; KEY_SIZE]>,
    ) -> Result<(), CardError> {
        let trailer = self.layout.sector_trailer(sector);
        let count = self.blocks.len();
        let block = self
            .blocks
            .get_mut(trailer)
            .ok_or(CardError::OutOfRange { index: trailer, count })?;
        if let Some(key) = key_a {
            block.data[0..6].copy_from_slice(&key);
        }
        if let Some(key) = key_b {
            block.data[10..16].copy_from_slice(&key);
        }
        block.readable = true;
        Ok(())
    }
}

/// XOR check byte covering a 4- or 7-byte UID, stored right after the UID in
/// block 0 of 4-byte-UID cards.
pub fn uid_bcc(uid: &[u8]) -> u8 {
    uid.iter().fold(0, |acc, b| acc ^ b)
}

/// Sanity check on trailer access bits: the first and third access bytes must
/// be bitwise complements.
pub fn access_bits_valid(trailer: &[u8; BLOCK_SIZE]) -> bool {
    trailer[6] ^ trailer[8] == 0xFF
}

/// Factory-default trailer contents: transport keys, default access bits.
pub fn factory_trailer() -> [u8; BLOCK_SIZE] {
    [
        0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x07, 0x80, 0x69, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
        0xFF,
    ]
}
