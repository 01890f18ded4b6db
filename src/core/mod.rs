//! Core data model: documents, timed payloads, and the state machine.

pub mod document;
pub mod state;

pub use document::{Document, TimedPayload};
pub use state::{ExtendedStateInfo, State, StateInfo};
