//! Message type tags.

use std::fmt;

/// Numeric tag identifying a message kind on the wire.
///
/// The zero tag ([`MsgType::NONE`]) is what [`crate::message_type`] reports for
/// frames whose header and footer disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MsgType(pub u32);

impl MsgType {
    pub const NONE: MsgType = MsgType(0x0000_0000);
    pub const HANDSHAKE: MsgType = MsgType(0x7C41_941A);
    pub const SET_WORLD: MsgType = MsgType(0xCCDF_2E49);
    pub const ADD_OBJECTS: MsgType = MsgType(0x2452_A9C1);
    pub const REMOVE_OBJECTS: MsgType = MsgType(0x6BF8_8C24);
    pub const OBJECT_TRANSFORM: MsgType = MsgType(0xEA6D_A4B4);
    pub const ADD_USERS: MsgType = MsgType(0xF51F_2AFF);
    pub const REMOVE_USERS: MsgType = MsgType(0xF5A1_4BB0);
    pub const MY_TRANSFORM: MsgType = MsgType(0xF878_C4BF);
    pub const SIGNAL: MsgType = MsgType(0xADC1_964D);
    pub const TELEPORT_REQUEST: MsgType = MsgType(0x78DA_55D9);
    pub const ATTRIBUTE_VALUE_CHANGED: MsgType = MsgType(0x10DA_CDB7);

    /// Human-readable name used in logs.
    pub fn name(self) -> &'static str {
        match self {
            MsgType::NONE => "none",
            MsgType::HANDSHAKE => "handshake",
            MsgType::SET_WORLD => "set_world",
            MsgType::ADD_OBJECTS => "add_objects",
            MsgType::REMOVE_OBJECTS => "remove_objects",
            MsgType::OBJECT_TRANSFORM => "object_transform",
            MsgType::ADD_USERS => "add_users",
            MsgType::REMOVE_USERS => "remove_users",
            MsgType::MY_TRANSFORM => "my_transform",
            MsgType::SIGNAL => "signal",
            MsgType::TELEPORT_REQUEST => "teleport_request",
            MsgType::ATTRIBUTE_VALUE_CHANGED => "attribute_value_changed",
            _ => "unknown",
        }
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:#010X})", self.name(), self.0)
    }
}
