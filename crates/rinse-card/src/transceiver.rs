//! Tag transceiver contract and MIFARE Classic command frames

use rinse_common::BLOCK_SIZE;

use crate::error::TagError;
use crate::keys::Key;

/// Which of the two per-sector keys to authenticate with. The discriminants
/// are the MIFARE Classic authentication command bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    A = 0x60,
    B = 0x61,
}

/// Opaque access to one physical tag session.
///
/// Implementations wrap a radio driver that performs the card's proprietary
/// stream-cipher authentication internally; callers only ever see command
/// and response bytes. Calls use bounded timeouts in the driver.
pub trait TagTransceiver {
    fn connect(&mut self) -> Result<(), TagError>;
    fn transceive(&mut self, frame: &[u8]) -> Result<Vec<u8>, TagError>;
    fn close(&mut self);
}

/// MIFARE Classic command frame builders.
pub mod frames {
    use super::*;

    pub const CMD_READ: u8 = 0x30;
    pub const CMD_WRITE: u8 = 0xA0;
    pub const CMD_HALT: u8 = 0x50;

    /// Authentication frame: command, block, key, then the first four UID
    /// bytes the cipher is keyed with.
    pub fn auth(key_type: KeyType, block: u8, key: &Key, uid: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(12);
        frame.push(key_type as u8);
        frame.push(block);
        frame.extend_from_slice(key);
        frame.extend_from_slice(&uid[..uid.len().min(4)]);
        frame
    }

    pub fn read_block(block: u8) -> Vec<u8> {
        vec![CMD_READ, block]
    }

    pub fn write_block(block: u8, data: &[u8; BLOCK_SIZE]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(2 + BLOCK_SIZE);
        frame.push(CMD_WRITE);
        frame.push(block);
        frame.extend_from_slice(data);
        frame
    }

    pub fn halt() -> Vec<u8> {
        vec![CMD_HALT, 0x00]
    }
}
