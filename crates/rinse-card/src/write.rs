//! Write protocols for rewritable ("magic") tags
//!
//! Cloned tags take writes through one of three mutually exclusive command
//! families, discovered by short-timeout probing with the cheapest probe
//! first. All three report through the same [`WriteReport`] shape.

use tracing::{debug, info, warn};

use rinse_common::{CardImage, BLOCK_SIZE};

use crate::error::TagError;
use crate::keys::builtin_defaults;
use crate::transceiver::{frames, KeyType, TagTransceiver};

/// Raw wakeup opcodes accepted by first-generation backdoor tags.
const UNLOCK_1: u8 = 0x40;
const UNLOCK_2: u8 = 0x43;

/// Sub-opcodes for password-framed tags.
const SUB_VERSION: u8 = 0x01;
const SUB_WRITE: u8 = 0x02;

/// Which write command family the tag answered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MagicVariant {
    /// Backdoor unlock sequence before every block write.
    UnlockThenWrite,
    /// Ordinary authentication with well-known keys, standard writes.
    DirectAuthenticate,
    /// Every command prefixed with a 4-byte password and a sub-opcode.
    PasswordFramed,
    /// No probe succeeded.
    Unknown,
}

/// Uniform result of a write attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReport {
    pub success: bool,
    pub blocks_written: usize,
    pub error: Option<String>,
    pub variant: MagicVariant,
}

impl WriteReport {
    fn nothing(variant: MagicVariant, error: Option<String>) -> WriteReport {
        WriteReport {
            success: false,
            blocks_written: 0,
            error,
            variant,
        }
    }
}

/// Commits a card image to rewritable hardware.
#[derive(Debug, Clone)]
pub struct MagicWriter {
    password: [u8; 4],
}

impl Default for MagicWriter {
    fn default() -> Self {
        Self { password: [0u8; 4] }
    }
}

impl MagicWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Password for password-framed tags; factory tags ship with all zeros.
    pub fn with_password(password: [u8; 4]) -> Self {
        Self { password }
    }

    /// Probe for the tag's write family. First successful probe wins; probe
    /// rejections and timeouts fall through to the next candidate, tag loss
    /// propagates.
    pub fn detect_variant<T: TagTransceiver>(
        &self,
        tag: &mut T,
    ) -> Result<MagicVariant, TagError> {
        if self.probe_unlock(tag)? {
            return Ok(MagicVariant::UnlockThenWrite);
        }
        if self.probe_direct(tag)? {
            return Ok(MagicVariant::DirectAuthenticate);
        }
        if self.probe_password(tag)? {
            return Ok(MagicVariant::PasswordFramed);
        }
        Ok(MagicVariant::Unknown)
    }

    /// Probe, then push every readable block of `image` to the tag using the
    /// detected variant.
    pub fn write_card<T: TagTransceiver>(&self, tag: &mut T, image: &CardImage) -> WriteReport {
        if let Err(err) = tag.connect() {
            return WriteReport::nothing(MagicVariant::Unknown, Some(err.to_string()));
        }

        let variant = match self.detect_variant(tag) {
            Ok(v) => v,
            Err(err) => {
                tag.close();
                return WriteReport::nothing(MagicVariant::Unknown, Some(err.to_string()));
            }
        };
        info!(?variant, "write variant detected");

        let report = match variant {
            MagicVariant::UnlockThenWrite => self.write_unlocked(tag, image),
            MagicVariant::DirectAuthenticate => self.write_authenticated(tag, image),
            MagicVariant::PasswordFramed => self.write_password_framed(tag, image),
            MagicVariant::Unknown => {
                WriteReport::nothing(MagicVariant::Unknown, Some("no magic variant answered".into()))
            }
        };

        tag.close();
        report
    }

    fn probe_unlock<T: TagTransceiver>(&self, tag: &mut T) -> Result<bool, TagError> {
        Ok(self.send_unlock(tag)?)
    }

    fn probe_direct<T: TagTransceiver>(&self, tag: &mut T) -> Result<bool, TagError> {
        let key = [0xFF; 6];
        match tag.transceive(&frames::auth(KeyType::A, 0, &key, &[0, 0, 0, 0])) {
            Ok(_) => Ok(true),
            Err(TagError::Rejected) | Err(TagError::Timeout) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn probe_password<T: TagTransceiver>(&self, tag: &mut T) -> Result<bool, TagError> {
        let mut frame = self.password.to_vec();
        frame.push(SUB_VERSION);
        match tag.transceive(&frame) {
            Ok(response) => Ok(!response.is_empty()),
            Err(TagError::Rejected) | Err(TagError::Timeout) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// The unlocked state resets after every transceive, so the unlock
    /// sequence precedes each individual block write.
    fn send_unlock<T: TagTransceiver>(&self, tag: &mut T) -> Result<bool, TagError> {
        for opcode in [UNLOCK_1, UNLOCK_2] {
            match tag.transceive(&[opcode]) {
                Ok(_) => {}
                Err(TagError::Rejected) | Err(TagError::Timeout) => return Ok(false),
                Err(err) => return Err(err),
            }
        }
        Ok(true)
    }

    fn write_unlocked<T: TagTransceiver>(&self, tag: &mut T, image: &CardImage) -> WriteReport {
        let mut written = 0;
        let mut error = None;

        'blocks: for block in image.blocks().iter().filter(|b| b.readable) {
            match self.send_unlock(tag) {
                Ok(true) => {}
                Ok(false) => {
                    warn!(block = block.index, "unlock refused, skipping block");
                    continue;
                }
                Err(err) => {
                    error = Some(err.to_string());
                    break 'blocks;
                }
            }
            match tag.transceive(&frames::write_block(block.index as u8, &block.data)) {
                Ok(_) => written += 1,
                Err(TagError::Rejected) | Err(TagError::Timeout) => {
                    warn!(block = block.index, "write refused");
                }
                Err(err) => {
                    error = Some(err.to_string());
                    break 'blocks;
                }
            }
        }

        WriteReport {
            success: written >= 1,
            blocks_written: written,
            error,
            variant: MagicVariant::UnlockThenWrite,
        }
    }

    fn write_authenticated<T: TagTransceiver>(&self, tag: &mut T, image: &CardImage) -> WriteReport {
        let layout = image.layout();
        let uid = image.uid.clone();
        let mut written = 0;
        let mut error = None;

        'sectors: for sector in 0..layout.sector_count() {
            let trailer = layout.sector_trailer(sector) as u8;
            let mut opened = None;
            for candidate in builtin_defaults() {
                for key_type in [KeyType::A, KeyType::B] {
                    match tag.transceive(&frames::auth(key_type, trailer, &candidate.key, &uid)) {
                        Ok(_) => {
                            opened = Some((candidate.key, key_type));
                            break;
                        }
                        Err(TagError::Rejected) | Err(TagError::Timeout) => {}
                        Err(err) => {
                            error = Some(err.to_string());
                            break 'sectors;
                        }
                    }
                }
                if opened.is_some() {
                    break;
                }
            }

            let Some((key, key_type)) = opened else {
                debug!(sector, "no well-known key, sector skipped");
                continue;
            };

            let start = layout.sector_start(sector);
            for index in start..start + layout.sector_len(sector) {
                let block = match image.block(index) {
                    Ok(b) if b.readable => b,
                    _ => continue,
                };
                // Authentication state survives within a sector, but a failed
                // write drops it; re-auth keeps the loop simple.
                match tag.transceive(&frames::auth(key_type, index as u8, &key, &uid)) {
                    Ok(_) => {}
                    Err(TagError::Rejected) | Err(TagError::Timeout) => continue,
                    Err(err) => {
                        error = Some(err.to_string());
                        break 'sectors;
                    }
                }
                match tag.transceive(&frames::write_block(index as u8, &block.data)) {
                    Ok(_) => written += 1,
                    Err(TagError::Rejected) | Err(TagError::Timeout) => {
                        warn!(block = index, "write refused");
                    }
                    Err(err) => {
                        error = Some(err.to_string());
                        break 'sectors;
                    }
                }
            }
        }

        WriteReport {
            success: written >= 1,
            blocks_written: written,
            error,
            variant: MagicVariant::DirectAuthenticate,
        }
    }

    fn write_password_framed<T: TagTransceiver>(&self, tag: &mut T, image: &CardImage) -> WriteReport {
        let mut written = 0;
        let mut error = None;

        for block in image.blocks().iter().filter(|b| b.readable) {
            let mut frame = self.password.to_vec();
            frame.push(SUB_WRITE);
            frame.push(block.index as u8);
            frame.extend_from_slice(&block.data);
            match tag.transceive(&frame) {
                Ok(response) if !response.is_empty() => written += 1,
                Ok(_) => warn!(block = block.index, "empty response, write not confirmed"),
                Err(TagError::Rejected) | Err(TagError::Timeout) => {
                    warn!(block = block.index, "write refused");
                }
                Err(err) => {
                    error = Some(err.to_string());
                    break;
                }
            }
        }

        WriteReport {
            success: written >= 1,
            blocks_written: written,
            error,
            variant: MagicVariant::PasswordFramed,
        }
    }
}
