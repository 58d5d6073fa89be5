//! APDU emulation state machine
//!
//! Serves SELECT / READ BINARY / UPDATE BINARY / GET DATA against a card
//! image. Commands arrive one at a time over a half-duplex link and each is
//! handled to completion before the next.
//!
//! The native MIFARE authentication instructions are always refused: this
//! channel has no access to the card's stream cipher, so a reader that
//! insists on native authentication cannot be served. That is a permanent
//! limit of APDU-level emulation, not a defect.

use tracing::{debug, info, warn};

use rinse_common::{CardImage, ValueBlock, BLOCK_SIZE};

use crate::apdu::{ins, parse_apdu, sw, Apdu, Response};

/// Application identifier served in the SELECT response.
pub const APPLICATION_AID: [u8; 7] = [0xF0, 0x57, 0x41, 0x53, 0x48, 0x30, 0x31];

/// Write-interception policy for balance blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardPolicy {
    /// Apply every write.
    Off,
    /// Swallow balance-decreasing writes while still reporting success, to
    /// test whether the reader verifies its writes.
    SuppressDeductions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponderState {
    Idle,
    Selected,
    Active,
    Deactivated,
}

/// Everything one emulation run needs, passed in explicitly; there is no
/// process-wide session.
#[derive(Debug, Clone)]
pub struct EmulationSession {
    pub card: CardImage,
    /// The operator's designated balance blocks, from the field table.
    pub balance_blocks: Vec<usize>,
    pub guard: GuardPolicy,
}

/// One command/response pair from the transaction log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduExchange {
    pub command: Vec<u8>,
    pub response: Vec<u8>,
    pub note: Option<String>,
}

pub struct EmulationResponder {
    session: EmulationSession,
    state: ResponderState,
    deactivation_reason: Option<String>,
    log: Vec<ApduExchange>,
}

impl EmulationResponder {
    pub fn new(session: EmulationSession) -> Self {
        Self {
            session,
            state: ResponderState::Idle,
            deactivation_reason: None,
            log: Vec::new(),
        }
    }

    pub fn state(&self) -> ResponderState {
        self.state
    }

    pub fn log(&self) -> &[ApduExchange] {
        &self.log
    }

    /// Take the session back, including any writes applied to the image.
    pub fn into_session(self) -> EmulationSession {
        self.session
    }

    /// Terminal: link loss or explicit deselect.
    pub fn deactivate(&mut self, reason: &str) {
        info!(reason, "emulation deactivated");
        self.state = ResponderState::Deactivated;
        self.deactivation_reason = Some(reason.to_string());
    }

    pub fn deactivation_reason(&self) -> Option<&str> {
        self.deactivation_reason.as_deref()
    }

    /// Handle one command and produce the wire response. Never panics and
    /// never propagates an error; malformed input gets a status word.
    pub fn process(&mut self, raw: &[u8]) -> Vec<u8> {
        let (response, note) = self.dispatch(raw);
        let bytes = response.to_bytes();
        debug!(
            command = %hex::encode_upper(raw),
            response = %hex::encode_upper(&bytes),
            "apdu exchange"
        );
        self.log.push(ApduExchange {
            command: raw.to_vec(),
            response: bytes.clone(),
            note,
        });
        bytes
    }

    fn dispatch(&mut self, raw: &[u8]) -> (Response, Option<String>) {
        if self.state == ResponderState::Deactivated {
            return (
                Response::status(sw::CONDITIONS_NOT_SATISFIED),
                Some("command after deactivation".to_string()),
            );
        }

        let apdu = match parse_apdu(raw) {
            Ok(apdu) => apdu,
            Err(err) => {
                return (
                    Response::status(sw::WRONG_LENGTH),
                    Some(format!("unparseable command: {err}")),
                )
            }
        };

        match apdu.ins {
            ins::SELECT => self.handle_select(),
            ins::READ_BINARY => self.handle_read(&apdu),
            ins::UPDATE_BINARY => self.handle_update(&apdu),
            ins::GET_DATA => self.handle_get_data(&apdu),
            ins::NATIVE_AUTH_A | ins::NATIVE_AUTH_B => (
                Response::status(sw::INS_NOT_SUPPORTED),
                Some("native authentication unavailable on this channel".to_string()),
            ),
            other => (
                Response::status(sw::INS_NOT_SUPPORTED),
                Some(format!("unknown instruction 0x{other:02X}")),
            ),
        }
    }

    fn handle_select(&mut self) -> (Response, Option<String>) {
        self.state = ResponderState::Selected;
        (Response::success(file_control_information()), None)
    }

    fn handle_read(&mut self, apdu: &Apdu) -> (Response, Option<String>) {
        if self.state == ResponderState::Idle {
            return (Response::status(sw::CONDITIONS_NOT_SATISFIED), None);
        }

        let offset = apdu.p1p2() as usize;
        let block_index = offset / BLOCK_SIZE;
        let intra = offset % BLOCK_SIZE;

        let block = match self.session.card.block(block_index) {
            Ok(block) => block,
            Err(_) => return (Response::status(sw::FILE_NOT_FOUND), None),
        };

        let requested = apdu.le.unwrap_or(BLOCK_SIZE);
        let len = requested.min(BLOCK_SIZE - intra);
        let data = block.data[intra..intra + len].to_vec();
        let note = (!block.readable)
            .then(|| format!("block {block_index} was never read from the source card"));

        self.state = ResponderState::Active;
        (Response::success(data), note)
    }

    fn handle_update(&mut self, apdu: &Apdu) -> (Response, Option<String>) {
        if self.state == ResponderState::Idle {
            return (Response::status(sw::CONDITIONS_NOT_SATISFIED), None);
        }

        let offset = apdu.p1p2() as usize;
        let block_index = offset / BLOCK_SIZE;
        let intra = offset % BLOCK_SIZE;

        if apdu.data.is_empty() || intra + apdu.data.len() > BLOCK_SIZE {
            return (Response::status(sw::WRONG_LENGTH), None);
        }

        let old = match self.session.card.block(block_index) {
            Ok(block) => block.data,
            Err(_) => return (Response::status(sw::FILE_NOT_FOUND), None),
        };

        let mut new = old;
        new[intra..intra + apdu.data.len()].copy_from_slice(&apdu.data);
        self.state = ResponderState::Active;

        if self.session.guard == GuardPolicy::SuppressDeductions
            && self.session.balance_blocks.contains(&block_index)
        {
            if let (Some(before), Some(after)) =
                (ValueBlock::decode(&old), ValueBlock::decode(&new))
            {
                if after.value() < before.value() {
                    warn!(
                        block = block_index,
                        before = before.value(),
                        after = after.value(),
                        "suppressed balance deduction"
                    );
                    // The reader is told the write landed.
                    return (
                        Response::status(sw::OK),
                        Some(format!(
                            "suppressed deduction on block {}: {} -> {} cents",
                            block_index,
                            before.value(),
                            after.value()
                        )),
                    );
                }
            }
        }

        match self.session.card.set_block(block_index, new) {
            Ok(()) => (Response::status(sw::OK), None),
            Err(_) => (Response::status(sw::FILE_NOT_FOUND), None),
        }
    }

    fn handle_get_data(&mut self, apdu: &Apdu) -> (Response, Option<String>) {
        if apdu.p1 == 0 && apdu.p2 == 0 {
            (Response::success(self.session.card.uid.clone()), None)
        } else {
            (Response::status(sw::REFERENCED_DATA_NOT_FOUND), None)
        }
    }
}

/// Fixed FCI template naming the emulated application.
fn file_control_information() -> Vec<u8> {
    let mut fci = vec![0x6F, (APPLICATION_AID.len() + 4) as u8];
    fci.push(0x84);
    fci.push(APPLICATION_AID.len() as u8);
    fci.extend_from_slice(&APPLICATION_AID);
    fci.push(0xA5);
    fci.push(0x00);
    fci
}
