//! Rinse Emulate - APDU command/response emulation over a card image
//!
//! The responder answers ISO 7816-4 commands from a decoded [`CardImage`]
//! and optionally intercepts balance-decreasing writes while still claiming
//! success, which is the test for whether a field reader verifies its
//! writes.

pub mod apdu;
pub mod responder;

pub use apdu::{parse_apdu, Apdu, ApduError, Response};
pub use responder::{
    ApduExchange, EmulationResponder, EmulationSession, GuardPolicy, ResponderState,
};
