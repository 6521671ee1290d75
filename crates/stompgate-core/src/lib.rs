//! STOMP 1.2 frame model and streaming wire codec.
//!
//! This crate is the leaf of the gateway: it knows how to turn raw bytes
//! into [`Transmission`]s (frames or heartbeats) and back, and nothing else.
//! Decoding operates on already-buffered bytes and never blocks; encoding is
//! the deterministic inverse of decoding for well-formed frames.

pub mod codec;
pub mod error;
pub mod frame;
pub mod headers;

pub use codec::StompCodec;
pub use error::CodecError;
pub use frame::{Command, Frame, Transmission};
pub use headers::HeaderList;

/// Hard limit on the STOMP command token length.
pub const MAX_COMMAND_LEN: usize = 50;
/// Hard limit on a single header line, in bytes.
pub const MAX_HEADER_LINE_LEN: usize = 1024;
/// Hard limit on the number of header lines in one frame.
pub const MAX_HEADER_LINES: usize = 64;
/// Hard limit on the frame body, in bytes.
pub const MAX_BODY_LEN: usize = 50_000;
