//! APDU parsing and response construction
//!
//! Short-form ISO 7816-4 only; the contactless front ends this responder
//! sits behind never produce extended APDUs.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApduError {
    #[error("APDU too short: expected at least 4 bytes, got {0}")]
    TooShort(usize),
    #[error("invalid APDU length")]
    InvalidLength,
}

/// A parsed command APDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Apdu {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Vec<u8>,
    /// Expected response length; `None` when absent.
    pub le: Option<usize>,
}

impl Apdu {
    /// P1 and P2 combined big-endian, the offset encoding used by
    /// READ BINARY and UPDATE BINARY.
    pub fn p1p2(&self) -> u16 {
        u16::from_be_bytes([self.p1, self.p2])
    }
}

/// Parse a short-form APDU: `CLA INS P1 P2 [Lc data] [Le]`.
pub fn parse_apdu(raw: &[u8]) -> Result<Apdu, ApduError> {
    if raw.len() < 4 {
        return Err(ApduError::TooShort(raw.len()));
    }
    let (cla, ins, p1, p2) = (raw[0], raw[1], raw[2], raw[3]);
    let rest = &raw[4..];

    let (data, le) = match rest.len() {
        // Case 1: header only
        0 => (Vec::new(), None),
        // Case 2: Le only; 0 means 256
        1 => (Vec::new(), Some(decode_le(rest[0]))),
        _ => {
            let lc = rest[0] as usize;
            if rest.len() == 1 + lc {
                // Case 3: Lc + data
                (rest[1..].to_vec(), None)
            } else if rest.len() == 1 + lc + 1 {
                // Case 4: Lc + data + Le
                (rest[1..1 + lc].to_vec(), Some(decode_le(rest[1 + lc])))
            } else {
                return Err(ApduError::InvalidLength);
            }
        }
    };

    Ok(Apdu {
        cla,
        ins,
        p1,
        p2,
        data,
        le,
    })
}

fn decode_le(byte: u8) -> usize {
    if byte == 0 {
        256
    } else {
        byte as usize
    }
}

/// Status words the responder emits.
pub mod sw {
    pub const OK: u16 = 0x9000;
    pub const WRONG_LENGTH: u16 = 0x6700;
    pub const CONDITIONS_NOT_SATISFIED: u16 = 0x6985;
    pub const FILE_NOT_FOUND: u16 = 0x6A82;
    pub const REFERENCED_DATA_NOT_FOUND: u16 = 0x6A88;
    pub const INS_NOT_SUPPORTED: u16 = 0x6D00;
}

/// Instruction bytes the responder dispatches on.
pub mod ins {
    pub const SELECT: u8 = 0xA4;
    pub const READ_BINARY: u8 = 0xB0;
    pub const UPDATE_BINARY: u8 = 0xD6;
    pub const GET_DATA: u8 = 0xCA;
    /// MIFARE Classic native authentication, Key A. Unanswerable on an APDU
    /// channel: the stream cipher lives in dedicated silicon.
    pub const NATIVE_AUTH_A: u8 = 0x60;
    /// MIFARE Classic native authentication, Key B.
    pub const NATIVE_AUTH_B: u8 = 0x61;
}

/// A response APDU: data plus status word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub data: Vec<u8>,
    pub sw1: u8,
    pub sw2: u8,
}

impl Response {
    pub fn new(data: Vec<u8>, sw: u16) -> Self {
        Self {
            data,
            sw1: (sw >> 8) as u8,
            sw2: sw as u8,
        }
    }

    pub fn success(data: Vec<u8>) -> Self {
        Self::new(data, sw::OK)
    }

    pub fn status(sw: u16) -> Self {
        Self::new(Vec::new(), sw)
    }

    pub fn sw(&self) -> u16 {
        u16::from_be_bytes([self.sw1, self.sw2])
    }

    pub fn is_success(&self) -> bool {
        self.sw() == sw::OK
    }

    /// Wire form: data then SW1 SW2.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data.len() + 2);
        out.extend_from_slice(&self.data);
        out.push(self.sw1);
        out.push(self.sw2);
        out
    }
}
