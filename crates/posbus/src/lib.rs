//! # Posbus - Binary Wire Protocol
//!
//! Every frame exchanged with a client has the same envelope:
//!
//! ```text
//! +-----------------+----------------------+------------------+
//! | type (u32 LE)   | body (message bytes) | !type (u32 LE)   |
//! +-----------------+----------------------+------------------+
//! ```
//!
//! The trailing tag is the bitwise complement of the leading tag and acts as a
//! cheap integrity check: [`message_type`] reports [`MsgType::NONE`] whenever the
//! two disagree.
//!
//! ## Body encoding
//!
//! * Integers and floats are little-endian (`u32`, `f32`)
//! * Booleans are a single byte (`0x00` / `0x01`)
//! * Strings are a `u32` length prefix followed by UTF-8 bytes
//! * UUIDs are 16 bytes with the client byte-order permutation applied
//!   (see [`wire_id`])
//! * Lists are a `u32` count followed by the items
//!
//! Outbound messages are serialized once via [`Message::to_frame`] and the
//! resulting [`bytes::Bytes`] is shared by every session that receives it.
//!
//! ```rust
//! use posbus::{Message, Signal, SignalType, message_type, MsgType};
//!
//! let frame = Signal { value: SignalType::DualConnection }.to_frame();
//! assert_eq!(message_type(&frame), MsgType::SIGNAL);
//!
//! let decoded = Signal::from_frame(&frame)?;
//! assert_eq!(decoded.value, SignalType::DualConnection);
//! # Ok::<(), posbus::PosbusError>(())
//! ```

pub mod codec;
pub mod error;
pub mod math;
pub mod messages;
pub mod types;
pub mod wire_id;

pub use codec::{message_type, Decoder, Encoder, Message};
pub use error::{PosbusError, Result};
pub use math::{Transform, TransformNoScale, Vec3};
pub use messages::{
    decode_incoming, AddObjects, AddUsers, AttributeChangeType, AttributeValueChanged,
    HandShake, IncomingMessage, MyTransform, ObjectDefinition, ObjectTransform, RemoveObjects,
    RemoveUsers, SetWorld, Signal, SignalType, TeleportRequest, UserData,
};
pub use types::MsgType;
