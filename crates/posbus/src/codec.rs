//! Frame envelope and primitive field codec.

use crate::error::{PosbusError, Result};
use crate::math::{Transform, TransformNoScale, Vec3};
use crate::types::MsgType;
use crate::wire_id;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

/// Size of one type tag.
pub const TAG_SIZE: usize = 4;

/// Reads the type tag of a frame.
///
/// Returns [`MsgType::NONE`] if the frame is shorter than two tags or if the
/// trailing tag is not the complement of the leading one.
pub fn message_type(frame: &[u8]) -> MsgType {
    match check_envelope(frame) {
        Ok(msg_type) => msg_type,
        Err(_) => MsgType::NONE,
    }
}

fn check_envelope(frame: &[u8]) -> Result<MsgType> {
    if frame.len() < TAG_SIZE * 2 {
        return Err(PosbusError::FrameTooShort(frame.len()));
    }
    let mut head = &frame[..TAG_SIZE];
    let mut tail = &frame[frame.len() - TAG_SIZE..];
    let header = head.get_u32_le();
    let footer = tail.get_u32_le();
    if header != !footer {
        return Err(PosbusError::TagMismatch { header, footer });
    }
    Ok(MsgType(header))
}

/// A message that can be framed for the wire.
pub trait Message: Sized {
    const TYPE: MsgType;

    fn encode_body(&self, enc: &mut Encoder);

    fn decode_body(dec: &mut Decoder<'_>) -> Result<Self>;

    /// Serializes the message into a complete frame.
    fn to_frame(&self) -> Bytes {
        let mut enc = Encoder::new();
        enc.buf.put_u32_le(Self::TYPE.0);
        self.encode_body(&mut enc);
        enc.buf.put_u32_le(!Self::TYPE.0);
        enc.buf.freeze()
    }

    /// Parses a complete frame, requiring its tag to be `Self::TYPE`.
    fn from_frame(frame: &[u8]) -> Result<Self> {
        let actual = check_envelope(frame)?;
        if actual != Self::TYPE {
            return Err(PosbusError::UnexpectedType {
                expected: Self::TYPE,
                actual,
            });
        }
        let mut dec = Decoder::new(&frame[TAG_SIZE..frame.len() - TAG_SIZE]);
        let msg = Self::decode_body(&mut dec)?;
        dec.finish()?;
        Ok(msg)
    }
}

/// Append-only body writer.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: BytesMut,
}

impl Encoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(64),
        }
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.put_u32_le(v);
    }

    pub fn put_f32(&mut self, v: f32) {
        self.buf.put_f32_le(v);
    }

    pub fn put_bool(&mut self, v: bool) {
        self.buf.put_u8(u8::from(v));
    }

    pub fn put_uuid(&mut self, id: &Uuid) {
        self.buf.put_slice(&wire_id::to_wire(id));
    }

    pub fn put_str(&mut self, s: &str) {
        self.put_len(s.len());
        self.buf.put_slice(s.as_bytes());
    }

    pub fn put_len(&mut self, len: usize) {
        // Bodies are bounded well below u32::MAX by the socket message size limit.
        self.buf.put_u32_le(len as u32);
    }

    pub fn put_vec3(&mut self, v: &Vec3) {
        self.put_f32(v.x);
        self.put_f32(v.y);
        self.put_f32(v.z);
    }

    pub fn put_transform(&mut self, t: &Transform) {
        self.put_vec3(&t.position);
        self.put_vec3(&t.rotation);
        self.put_vec3(&t.scale);
    }

    pub fn put_transform_no_scale(&mut self, t: &TransformNoScale) {
        self.put_vec3(&t.position);
        self.put_vec3(&t.rotation);
    }
}

/// Bounds-checked body reader. Every getter names the field it was reading so
/// truncation errors point at the offending field.
#[derive(Debug)]
pub struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, n: usize, field: &'static str) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(PosbusError::Truncated(field));
        }
        Ok(())
    }

    pub fn get_u32(&mut self, field: &'static str) -> Result<u32> {
        self.need(4, field)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn get_f32(&mut self, field: &'static str) -> Result<f32> {
        self.need(4, field)?;
        Ok(self.buf.get_f32_le())
    }

    pub fn get_bool(&mut self, field: &'static str) -> Result<bool> {
        self.need(1, field)?;
        Ok(self.buf.get_u8() != 0)
    }

    pub fn get_uuid(&mut self, field: &'static str) -> Result<Uuid> {
        self.need(16, field)?;
        let mut raw = [0u8; 16];
        self.buf.copy_to_slice(&mut raw);
        Ok(wire_id::from_wire(raw))
    }

    pub fn get_str(&mut self, field: &'static str) -> Result<String> {
        let len = self.get_len(field)?;
        self.need(len, field)?;
        let (text, rest) = self.buf.split_at(len);
        self.buf = rest;
        std::str::from_utf8(text)
            .map(str::to_owned)
            .map_err(|_| PosbusError::InvalidUtf8(field))
    }

    /// Reads a list length, rejecting counts that cannot possibly fit in the
    /// remaining body (each element takes at least one byte).
    pub fn get_len(&mut self, field: &'static str) -> Result<usize> {
        let len = self.get_u32(field)? as usize;
        if len > self.buf.remaining() {
            return Err(PosbusError::Truncated(field));
        }
        Ok(len)
    }

    pub fn get_vec3(&mut self, field: &'static str) -> Result<Vec3> {
        Ok(Vec3 {
            x: self.get_f32(field)?,
            y: self.get_f32(field)?,
            z: self.get_f32(field)?,
        })
    }

    pub fn get_transform(&mut self, field: &'static str) -> Result<Transform> {
        Ok(Transform {
            position: self.get_vec3(field)?,
            rotation: self.get_vec3(field)?,
            scale: self.get_vec3(field)?,
        })
    }

    pub fn get_transform_no_scale(&mut self, field: &'static str) -> Result<TransformNoScale> {
        Ok(TransformNoScale {
            position: self.get_vec3(field)?,
            rotation: self.get_vec3(field)?,
        })
    }

    /// Fails if any body bytes were left unread.
    pub fn finish(self) -> Result<()> {
        match self.buf.remaining() {
            0 => Ok(()),
            n => Err(PosbusError::TrailingBytes(n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_requires_complement_footer() {
        let mut frame = BytesMut::new();
        frame.put_u32_le(MsgType::SIGNAL.0);
        frame.put_u32_le(2);
        frame.put_u32_le(!MsgType::SIGNAL.0);
        assert_eq!(message_type(&frame), MsgType::SIGNAL);

        let len = frame.len();
        frame[len - 1] ^= 0xFF;
        assert_eq!(message_type(&frame), MsgType::NONE);
    }

    #[test]
    fn test_short_frame_has_no_type() {
        assert_eq!(message_type(&[0x1A, 0x94, 0x41]), MsgType::NONE);
        assert_eq!(message_type(&[]), MsgType::NONE);
    }

    #[test]
    fn test_decoder_reports_truncated_field() {
        let mut dec = Decoder::new(&[1, 0]);
        match dec.get_u32("handshake_version") {
            Err(PosbusError::Truncated(field)) => assert_eq!(field, "handshake_version"),
            other => panic!("expected truncation, got {:?}", other),
        }
    }

    #[test]
    fn test_string_length_larger_than_body_is_rejected() {
        let mut enc = Encoder::new();
        enc.put_u32(1000);
        enc.buf.put_slice(b"short");
        let mut dec = Decoder::new(&enc.buf);
        assert!(matches!(dec.get_str("token"), Err(PosbusError::Truncated("token"))));
    }
}
