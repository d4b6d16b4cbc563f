//! Wire protocol framing and frame types for pulse telemetry streams.
//!
//! This crate provides the low-level wire protocol shared by the streaming
//! client and its peers: frame kinds with a `kind` discriminator, a
//! length-prefixed JSON codec, and typed wire errors.
//!
//! ## Features
//!
//! - **Length-Prefixed Framing**: u32 body length for cheap boundary scans
//! - **Discriminator-First Parsing**: unknown kinds survive as [`RawFrame`]
//! - **Typed Frames**: the known control/data kinds as a tagged enum
//! - **Recoverable Errors**: malformed bodies never stall the stream
//!
//! ## Wire Format
//!
//! ```text
//! +----------------------+----------------------------+
//! | u32 body_len         | length of bytes that follow|
//! +----------------------+----------------------------+
//! | body                 | JSON object with a `kind`  |
//! |                      | discriminator field        |
//! +----------------------+----------------------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod frame;

// Re-export main types
pub use codec::{encode_frame, FrameDecoder};
pub use error::WireError;
pub use frame::{kind, Frame, RawFrame, DEFAULT_MAX_FRAME_SIZE, HARD_MAX_FRAME_SIZE};
