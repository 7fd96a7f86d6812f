//! Message catalogue.

use crate::codec::{message_type, Decoder, Encoder, Message};
use crate::error::{PosbusError, Result};
use crate::math::{Transform, TransformNoScale};
use crate::types::MsgType;
use serde_json::{Map, Value};
use uuid::Uuid;

/// First frame of every connection.
#[derive(Debug, Clone, PartialEq)]
pub struct HandShake {
    pub handshake_version: u32,
    pub protocol_version: u32,
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub token: String,
    pub url: String,
}

impl Message for HandShake {
    const TYPE: MsgType = MsgType::HANDSHAKE;

    fn encode_body(&self, enc: &mut Encoder) {
        enc.put_u32(self.handshake_version);
        enc.put_u32(self.protocol_version);
        enc.put_uuid(&self.user_id);
        enc.put_uuid(&self.session_id);
        enc.put_str(&self.token);
        enc.put_str(&self.url);
    }

    fn decode_body(dec: &mut Decoder<'_>) -> Result<Self> {
        Ok(Self {
            handshake_version: dec.get_u32("handshake_version")?,
            protocol_version: dec.get_u32("protocol_version")?,
            user_id: dec.get_uuid("user_id")?,
            session_id: dec.get_uuid("session_id")?,
            token: dec.get_str("token")?,
            url: dec.get_str("url")?,
        })
    }
}

/// Description of one object, as sent inside [`AddObjects`].
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDefinition {
    pub id: Uuid,
    pub parent_id: Uuid,
    pub asset_type: Uuid,
    pub asset_format: u32,
    pub name: String,
    pub transform: Transform,
    pub is_editable: bool,
    pub tethered_to_parent: bool,
    pub show_on_minimap: bool,
}

impl ObjectDefinition {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_uuid(&self.id);
        enc.put_uuid(&self.parent_id);
        enc.put_uuid(&self.asset_type);
        enc.put_u32(self.asset_format);
        enc.put_str(&self.name);
        enc.put_transform(&self.transform);
        enc.put_bool(self.is_editable);
        enc.put_bool(self.tethered_to_parent);
        enc.put_bool(self.show_on_minimap);
    }

    fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        Ok(Self {
            id: dec.get_uuid("object.id")?,
            parent_id: dec.get_uuid("object.parent_id")?,
            asset_type: dec.get_uuid("object.asset_type")?,
            asset_format: dec.get_u32("object.asset_format")?,
            name: dec.get_str("object.name")?,
            transform: dec.get_transform("object.transform")?,
            is_editable: dec.get_bool("object.is_editable")?,
            tethered_to_parent: dec.get_bool("object.tethered_to_parent")?,
            show_on_minimap: dec.get_bool("object.show_on_minimap")?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddObjects {
    pub objects: Vec<ObjectDefinition>,
}

impl Message for AddObjects {
    const TYPE: MsgType = MsgType::ADD_OBJECTS;

    fn encode_body(&self, enc: &mut Encoder) {
        enc.put_len(self.objects.len());
        for object in &self.objects {
            object.encode(enc);
        }
    }

    fn decode_body(dec: &mut Decoder<'_>) -> Result<Self> {
        let count = dec.get_len("objects")?;
        let objects = (0..count)
            .map(|_| ObjectDefinition::decode(dec))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { objects })
    }
}

fn encode_ids(enc: &mut Encoder, ids: &[Uuid]) {
    enc.put_len(ids.len());
    for id in ids {
        enc.put_uuid(id);
    }
}

fn decode_ids(dec: &mut Decoder<'_>, field: &'static str) -> Result<Vec<Uuid>> {
    let count = dec.get_len(field)?;
    (0..count).map(|_| dec.get_uuid(field)).collect()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoveObjects {
    pub objects: Vec<Uuid>,
}

impl Message for RemoveObjects {
    const TYPE: MsgType = MsgType::REMOVE_OBJECTS;

    fn encode_body(&self, enc: &mut Encoder) {
        encode_ids(enc, &self.objects);
    }

    fn decode_body(dec: &mut Decoder<'_>) -> Result<Self> {
        Ok(Self {
            objects: decode_ids(dec, "objects")?,
        })
    }
}

/// Transform of a single object; sent by the server on change and accepted
/// from clients that edit objects.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectTransform {
    pub id: Uuid,
    pub transform: Transform,
}

impl Message for ObjectTransform {
    const TYPE: MsgType = MsgType::OBJECT_TRANSFORM;

    fn encode_body(&self, enc: &mut Encoder) {
        enc.put_uuid(&self.id);
        enc.put_transform(&self.transform);
    }

    fn decode_body(dec: &mut Decoder<'_>) -> Result<Self> {
        Ok(Self {
            id: dec.get_uuid("id")?,
            transform: dec.get_transform("transform")?,
        })
    }
}

/// Presence record of a connected user.
#[derive(Debug, Clone, PartialEq)]
pub struct UserData {
    pub id: Uuid,
    pub name: String,
    pub avatar: Uuid,
    pub transform: TransformNoScale,
    pub is_guest: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddUsers {
    pub users: Vec<UserData>,
}

impl Message for AddUsers {
    const TYPE: MsgType = MsgType::ADD_USERS;

    fn encode_body(&self, enc: &mut Encoder) {
        enc.put_len(self.users.len());
        for user in &self.users {
            enc.put_uuid(&user.id);
            enc.put_str(&user.name);
            enc.put_uuid(&user.avatar);
            enc.put_transform_no_scale(&user.transform);
            enc.put_bool(user.is_guest);
        }
    }

    fn decode_body(dec: &mut Decoder<'_>) -> Result<Self> {
        let count = dec.get_len("users")?;
        let mut users = Vec::with_capacity(count);
        for _ in 0..count {
            users.push(UserData {
                id: dec.get_uuid("user.id")?,
                name: dec.get_str("user.name")?,
                avatar: dec.get_uuid("user.avatar")?,
                transform: dec.get_transform_no_scale("user.transform")?,
                is_guest: dec.get_bool("user.is_guest")?,
            });
        }
        Ok(Self { users })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoveUsers {
    pub users: Vec<Uuid>,
}

impl Message for RemoveUsers {
    const TYPE: MsgType = MsgType::REMOVE_USERS;

    fn encode_body(&self, enc: &mut Encoder) {
        encode_ids(enc, &self.users);
    }

    fn decode_body(dec: &mut Decoder<'_>) -> Result<Self> {
        Ok(Self {
            users: decode_ids(dec, "users")?,
        })
    }
}

/// World metadata, first message of the spawn sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct SetWorld {
    pub id: Uuid,
    pub name: String,
    pub avatar: Uuid,
    pub owner: Uuid,
    pub avatar_3d_asset_id: Uuid,
}

impl Message for SetWorld {
    const TYPE: MsgType = MsgType::SET_WORLD;

    fn encode_body(&self, enc: &mut Encoder) {
        enc.put_uuid(&self.id);
        enc.put_str(&self.name);
        enc.put_uuid(&self.avatar);
        enc.put_uuid(&self.owner);
        enc.put_uuid(&self.avatar_3d_asset_id);
    }

    fn decode_body(dec: &mut Decoder<'_>) -> Result<Self> {
        Ok(Self {
            id: dec.get_uuid("id")?,
            name: dec.get_str("name")?,
            avatar: dec.get_uuid("avatar")?,
            owner: dec.get_uuid("owner")?,
            avatar_3d_asset_id: dec.get_uuid("avatar_3d_asset_id")?,
        })
    }
}

/// Predefined notifications exchanged in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SignalType {
    None = 0,
    /// The same user connected again from another session
    DualConnection = 1,
    Ready = 2,
    InvalidToken = 3,
    Spawn = 4,
    /// Client asks to be removed from its current world
    LeaveWorld = 5,
    ConnectionFailed = 6,
    Connected = 7,
    ConnectionClosed = 8,
    /// Teleport target could not be found
    WorldDoesNotExist = 9,
}

impl From<u32> for SignalType {
    fn from(value: u32) -> Self {
        match value {
            1 => SignalType::DualConnection,
            2 => SignalType::Ready,
            3 => SignalType::InvalidToken,
            4 => SignalType::Spawn,
            5 => SignalType::LeaveWorld,
            6 => SignalType::ConnectionFailed,
            7 => SignalType::Connected,
            8 => SignalType::ConnectionClosed,
            9 => SignalType::WorldDoesNotExist,
            _ => SignalType::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signal {
    pub value: SignalType,
}

impl Message for Signal {
    const TYPE: MsgType = MsgType::SIGNAL;

    fn encode_body(&self, enc: &mut Encoder) {
        enc.put_u32(self.value as u32);
    }

    fn decode_body(dec: &mut Decoder<'_>) -> Result<Self> {
        Ok(Self {
            value: SignalType::from(dec.get_u32("value")?),
        })
    }
}

/// The user's own avatar transform.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MyTransform(pub TransformNoScale);

impl Message for MyTransform {
    const TYPE: MsgType = MsgType::MY_TRANSFORM;

    fn encode_body(&self, enc: &mut Encoder) {
        enc.put_transform_no_scale(&self.0);
    }

    fn decode_body(dec: &mut Decoder<'_>) -> Result<Self> {
        Ok(Self(dec.get_transform_no_scale("transform")?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TeleportRequest {
    pub target: Uuid,
}

impl Message for TeleportRequest {
    const TYPE: MsgType = MsgType::TELEPORT_REQUEST;

    fn encode_body(&self, enc: &mut Encoder) {
        enc.put_uuid(&self.target);
    }

    fn decode_body(dec: &mut Decoder<'_>) -> Result<Self> {
        Ok(Self {
            target: dec.get_uuid("target")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeChangeType {
    Changed,
    Removed,
}

impl AttributeChangeType {
    pub fn as_str(self) -> &'static str {
        match self {
            AttributeChangeType::Changed => "attribute_changed",
            AttributeChangeType::Removed => "attribute_removed",
        }
    }
}

/// Notification produced by auto handlers when an attribute changes.
///
/// `topic` lets clients route the notification; it is empty when the
/// attribute declares none. `value` travels as JSON text.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeValueChanged {
    pub topic: String,
    pub plugin_id: Uuid,
    pub attribute_name: String,
    pub change_type: String,
    pub value: Option<Map<String, Value>>,
    pub target_id: Uuid,
}

impl Message for AttributeValueChanged {
    const TYPE: MsgType = MsgType::ATTRIBUTE_VALUE_CHANGED;

    fn encode_body(&self, enc: &mut Encoder) {
        enc.put_str(&self.topic);
        enc.put_uuid(&self.plugin_id);
        enc.put_str(&self.attribute_name);
        enc.put_str(&self.change_type);
        let value = match &self.value {
            Some(map) => Value::Object(map.clone()),
            None => Value::Null,
        };
        enc.put_str(&value.to_string());
        enc.put_uuid(&self.target_id);
    }

    fn decode_body(dec: &mut Decoder<'_>) -> Result<Self> {
        let topic = dec.get_str("topic")?;
        let plugin_id = dec.get_uuid("plugin_id")?;
        let attribute_name = dec.get_str("attribute_name")?;
        let change_type = dec.get_str("change_type")?;
        let raw = dec.get_str("value")?;
        let value = match serde_json::from_str::<Value>(&raw)
            .map_err(|source| PosbusError::Json { field: "value", source })?
        {
            Value::Object(map) => Some(map),
            _ => None,
        };
        Ok(Self {
            topic,
            plugin_id,
            attribute_name,
            change_type,
            value,
            target_id: dec.get_uuid("target_id")?,
        })
    }
}

/// Messages a client may send once admitted.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    MyTransform(MyTransform),
    ObjectTransform(ObjectTransform),
    Signal(Signal),
    TeleportRequest(TeleportRequest),
}

/// Decodes a client frame received after the handshake.
pub fn decode_incoming(frame: &[u8]) -> Result<IncomingMessage> {
    match message_type(frame) {
        MsgType::MY_TRANSFORM => MyTransform::from_frame(frame).map(IncomingMessage::MyTransform),
        MsgType::OBJECT_TRANSFORM => {
            ObjectTransform::from_frame(frame).map(IncomingMessage::ObjectTransform)
        }
        MsgType::SIGNAL => Signal::from_frame(frame).map(IncomingMessage::Signal),
        MsgType::TELEPORT_REQUEST => {
            TeleportRequest::from_frame(frame).map(IncomingMessage::TeleportRequest)
        }
        other => Err(PosbusError::Unsupported(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec3;

    fn handshake() -> HandShake {
        HandShake {
            handshake_version: 1,
            protocol_version: 2,
            user_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            token: "header.claims.signature".to_string(),
            url: "https://example.test/world".to_string(),
        }
    }

    #[test]
    fn test_handshake_frame_layout() {
        let hs = handshake();
        let frame = hs.to_frame();
        assert_eq!(message_type(&frame), MsgType::HANDSHAKE);
        assert_eq!(&frame[..4], &MsgType::HANDSHAKE.0.to_le_bytes());
        assert_eq!(&frame[frame.len() - 4..], &(!MsgType::HANDSHAKE.0).to_le_bytes());
        assert_eq!(HandShake::from_frame(&frame).unwrap(), hs);
    }

    #[test]
    fn test_wrong_type_is_rejected_as_handshake() {
        let frame = Signal { value: SignalType::Ready }.to_frame();
        match HandShake::from_frame(&frame) {
            Err(PosbusError::UnexpectedType { expected, actual }) => {
                assert_eq!(expected, MsgType::HANDSHAKE);
                assert_eq!(actual, MsgType::SIGNAL);
            }
            other => panic!("expected type mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_handshake_is_rejected() {
        let frame = handshake().to_frame();
        let mut cut = frame[..frame.len() - 12].to_vec();
        cut.extend_from_slice(&(!MsgType::HANDSHAKE.0).to_le_bytes());
        assert!(HandShake::from_frame(&cut).is_err());
    }

    #[test]
    fn test_attribute_value_changed_removed_has_no_value() {
        let msg = AttributeValueChanged {
            topic: String::new(),
            plugin_id: Uuid::new_v4(),
            attribute_name: "color".to_string(),
            change_type: AttributeChangeType::Removed.as_str().to_string(),
            value: None,
            target_id: Uuid::new_v4(),
        };
        let decoded = AttributeValueChanged::from_frame(&msg.to_frame()).unwrap();
        assert_eq!(decoded.value, None);
        assert_eq!(decoded.change_type, "attribute_removed");
    }

    #[test]
    fn test_decode_incoming_dispatches_by_tag() {
        let frame = MyTransform(TransformNoScale {
            position: Vec3::new(1.0, 2.0, 3.0),
            rotation: Vec3::default(),
        })
        .to_frame();
        match decode_incoming(&frame).unwrap() {
            IncomingMessage::MyTransform(t) => assert_eq!(t.0.position.y, 2.0),
            other => panic!("unexpected {:?}", other),
        }

        let frame = handshake().to_frame();
        assert!(matches!(
            decode_incoming(&frame),
            Err(PosbusError::Unsupported(MsgType::HANDSHAKE))
        ));
    }

    #[test]
    fn test_unknown_signal_value_maps_to_none() {
        assert_eq!(SignalType::from(42), SignalType::None);
    }
}
