//! Shared types for the CDC log consumer.
//!
//! This crate holds the transport-independent half of the pipeline:
//!
//! ```text
//! InboundMessage ──decode──▶ DecodedPayload ──▶ LogRecord ──▶ one JSON line
//! ```
//!
//! # Modules
//!
//! - [`message`] - messages as delivered by the broker transport, and dispatch outcomes
//! - [`decode`] - best-effort JSON decoding of raw message bodies
//! - [`record`] - the structured log record and its wire shape

pub mod decode;
pub mod message;
pub mod record;

pub use decode::{decode, PayloadDecoder};
pub use message::{DecodedPayload, DispatchOutcome, InboundMessage};
pub use record::{LogRecord, DB_CHANGE_ACTION};
