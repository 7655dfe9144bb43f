//! Wire format: five length-prefixed fields, big-endian 32-bit lengths.
//!
//! `room | event | dst | src | payload`, each preceded by a 4-byte BE byte
//! length. Pure functions, no side effects -- a short or over-declared
//! buffer returns `None` instead of panicking.

const PREFIX_LEN: usize = 4;
const MIN_FRAME_LEN: usize = PREFIX_LEN * 5;

/// An in-memory message, mirroring the wire form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub room: String,
    pub event: String,
    pub dst: String,
    pub src: String,
    pub payload: Vec<u8>,
}

impl Message {
    /// Convenience constructor. Length fields are never trusted from
    /// callers -- they're always derived from the field contents at
    /// encode time, so there is nothing to set here.
    pub fn construct(
        room: impl Into<String>,
        event: impl Into<String>,
        dst: impl Into<String>,
        src: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            room: room.into(),
            event: event.into(),
            dst: dst.into(),
            src: src.into(),
            payload: payload.into(),
        }
    }

    /// Serialize into the wire format.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            MIN_FRAME_LEN
                + self.room.len()
                + self.event.len()
                + self.dst.len()
                + self.src.len()
                + self.payload.len(),
        );
        write_field(&mut buf, self.room.as_bytes());
        write_field(&mut buf, self.event.as_bytes());
        write_field(&mut buf, self.dst.as_bytes());
        write_field(&mut buf, self.src.as_bytes());
        write_field(&mut buf, &self.payload);
        buf
    }

    /// Parse the wire format. Returns `None` if fewer than five
    /// length-prefixed fields can be read, if any declared length exceeds
    /// what remains in the buffer, or if the input is shorter than five
    /// empty prefixes (20 bytes). Bytes beyond the declared payload are
    /// ignored.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < MIN_FRAME_LEN {
            return None;
        }
        let mut cursor = 0usize;
        let room = read_field(bytes, &mut cursor)?;
        let event = read_field(bytes, &mut cursor)?;
        let dst = read_field(bytes, &mut cursor)?;
        let src = read_field(bytes, &mut cursor)?;
        let payload = read_field(bytes, &mut cursor)?;
        Some(Self {
            room: String::from_utf8_lossy(room).into_owned(),
            event: String::from_utf8_lossy(event).into_owned(),
            dst: String::from_utf8_lossy(dst).into_owned(),
            src: String::from_utf8_lossy(src).into_owned(),
            payload: payload.to_vec(),
        })
    }
}

fn write_field(buf: &mut Vec<u8>, field: &[u8]) {
    buf.extend_from_slice(&(field.len() as u32).to_be_bytes());
    buf.extend_from_slice(field);
}

fn read_field<'a>(bytes: &'a [u8], cursor: &mut usize) -> Option<&'a [u8]> {
    let remaining = bytes.len().checked_sub(*cursor)?;
    if remaining < PREFIX_LEN {
        return None;
    }
    let len_bytes: [u8; 4] = bytes[*cursor..*cursor + PREFIX_LEN].try_into().ok()?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    *cursor += PREFIX_LEN;
    let remaining = bytes.len().checked_sub(*cursor)?;
    if len > remaining {
        return None;
    }
    let field = &bytes[*cursor..*cursor + len];
    *cursor += len;
    Some(field)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let msg = Message::construct("root", "chat", "", "A", b"hi".to_vec());
        let bytes = msg.encode();
        let decoded = Message::decode(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn encode_of_decode_is_byte_identical() {
        let msg = Message::construct("lobby", "whisper", "B", "A", b"ok".to_vec());
        let bytes = msg.encode();
        let roundtrip = Message::decode(&bytes).unwrap().encode();
        assert_eq!(roundtrip, bytes);
    }

    #[test]
    fn minimum_valid_frame_is_twenty_zero_bytes() {
        let zeros = [0u8; 20];
        let decoded = Message::decode(&zeros).unwrap();
        assert_eq!(decoded.room, "");
        assert_eq!(decoded.payload, Vec::<u8>::new());
    }

    #[test]
    fn too_short_input_is_rejected() {
        assert!(Message::decode(&[0u8; 19]).is_none());
        assert!(Message::decode(&[]).is_none());
    }

    #[test]
    fn declared_length_beyond_buffer_is_rejected() {
        // room-length prefix claims 5 bytes but none follow.
        let mut bytes = vec![0, 0, 0, 5];
        bytes.extend_from_slice(&[0u8; 16]); // pad to 20 bytes total, still short of the claim
        assert!(Message::decode(&bytes).is_none());
    }

    #[test]
    fn trailing_bytes_beyond_payload_are_ignored() {
        let msg = Message::construct("root", "chat", "", "A", b"hi".to_vec());
        let mut bytes = msg.encode();
        bytes.extend_from_slice(b"garbage-after-frame");
        let decoded = Message::decode(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    proptest::proptest! {
        #[test]
        fn encode_decode_roundtrips_for_arbitrary_ascii_fields(
            room in "[a-zA-Z0-9_/-]{0,32}",
            event in "[a-zA-Z0-9_/-]{0,32}",
            dst in "[a-zA-Z0-9_/-]{0,32}",
            src in "[a-zA-Z0-9_/-]{0,32}",
            payload in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..64),
        ) {
            let msg = Message::construct(room, event, dst, src, payload);
            let bytes = msg.encode();
            let decoded = Message::decode(&bytes).unwrap();
            proptest::prop_assert_eq!(decoded, msg);
        }
    }
}
