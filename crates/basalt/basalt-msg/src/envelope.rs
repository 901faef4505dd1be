//! Envelope builder, encoder, and decoder.

use std::fmt;

use thiserror::Error;

use crate::{FieldType, MsgHeader, MsgType, FIELD_HEADER_SIZE, MSG_HEADER_SIZE};

/// Structural faults detected while finalizing a message under construction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("field value overruns the payload buffer")]
    TruncatedField,
    #[error("trailing bytes after the last field record")]
    Misaligned,
}

/// A decoded field value. Values are a closed sum; untyped byte blobs never
/// cross the API boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    I64(i64),
    U64(u64),
    F64(f64),
    Str(&'a str),
    Bytes(&'a [u8]),
}

/// In-memory builder and parsed view of one envelope.
///
/// Append typed fields, then [`finalize`](IpcMessage::finalize) before
/// encoding; finalize recounts the payload and stamps `field_count` and
/// `payload_len` into the header.
pub struct IpcMessage {
    header: MsgHeader,
    fields: Vec<u8>,
}

impl IpcMessage {
    pub fn new(msg_type: MsgType) -> Self {
        Self {
            header: MsgHeader {
                msg_type: msg_type as u16,
                ..MsgHeader::default()
            },
            fields: Vec::new(),
        }
    }

    /// Reset to an empty `NONE` message, keeping the allocation.
    pub fn clear(&mut self) {
        self.header = MsgHeader::default();
        self.fields.clear();
    }

    pub fn set_msg_type(&mut self, msg_type: MsgType) {
        self.header.msg_type = msg_type as u16;
    }

    pub fn set_seq_no(&mut self, seq_no: u64) {
        self.header.seq_no = seq_no;
    }

    pub fn header(&self) -> &MsgHeader {
        &self.header
    }

    /// Message type, if the discriminant is a known one.
    pub fn msg_type(&self) -> Option<MsgType> {
        MsgType::from_u16(self.header.msg_type)
    }

    pub fn add_i64(&mut self, field_id: u16, value: i64) {
        self.add_field(field_id, FieldType::I64, &value.to_ne_bytes());
    }

    pub fn add_u64(&mut self, field_id: u16, value: u64) {
        self.add_field(field_id, FieldType::U64, &value.to_ne_bytes());
    }

    pub fn add_f64(&mut self, field_id: u16, value: f64) {
        self.add_field(field_id, FieldType::F64, &value.to_ne_bytes());
    }

    pub fn add_str(&mut self, field_id: u16, value: &str) {
        self.add_field(field_id, FieldType::Str, value.as_bytes());
    }

    pub fn add_bytes(&mut self, field_id: u16, value: &[u8]) {
        self.add_field(field_id, FieldType::Bytes, value);
    }

    fn add_field(&mut self, field_id: u16, field_type: FieldType, value: &[u8]) {
        self.fields.extend_from_slice(&field_id.to_ne_bytes());
        self.fields.push(field_type as u8);
        self.fields
            .extend_from_slice(&(value.len() as u32).to_ne_bytes());
        self.fields.extend_from_slice(value);
    }

    /// Walk the payload, validate every field record, and stamp the counts
    /// into the header. Must be called before [`encode`](IpcMessage::encode).
    pub fn finalize(&mut self) -> Result<(), EnvelopeError> {
        let count = walk_fields(&self.fields)?;
        self.header.field_count = count;
        self.header.payload_len = self.fields.len() as u32;
        Ok(())
    }

    /// Total bytes [`encode`](IpcMessage::encode) will produce.
    pub fn encoded_len(&self) -> usize {
        MSG_HEADER_SIZE + self.fields.len()
    }

    /// Serialize header plus payload into `out` (replacing its contents).
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.clear();
        out.reserve(self.encoded_len());
        self.header.write_to(out);
        out.extend_from_slice(&self.fields);
    }

    /// Parse an envelope from `data`, revalidating the payload structure.
    /// Returns `None` on any size or structural violation.
    pub fn decode(data: &[u8]) -> Option<Self> {
        let header = MsgHeader::read_from(data)?;
        let need = MSG_HEADER_SIZE.checked_add(header.payload_len as usize)?;
        if data.len() < need {
            return None;
        }
        let fields = data[MSG_HEADER_SIZE..need].to_vec();
        walk_fields(&fields).ok()?;
        Some(Self { header, fields })
    }

    fn find_raw(&self, field_id: u16, field_type: FieldType) -> Option<&[u8]> {
        self.raw_fields()
            .find(|&(id, ty, _)| id == field_id && ty == field_type as u8)
            .map(|(_, _, value)| value)
    }

    fn find_exact(&self, field_id: u16, field_type: FieldType, len: usize) -> Option<&[u8]> {
        // Fixed-width getters require an exact size match.
        self.find_raw(field_id, field_type)
            .filter(|value| value.len() == len)
    }

    pub fn get_i64(&self, field_id: u16) -> Option<i64> {
        let raw = self.find_exact(field_id, FieldType::I64, 8)?;
        Some(i64::from_ne_bytes(raw.try_into().ok()?))
    }

    pub fn get_u64(&self, field_id: u16) -> Option<u64> {
        let raw = self.find_exact(field_id, FieldType::U64, 8)?;
        Some(u64::from_ne_bytes(raw.try_into().ok()?))
    }

    pub fn get_f64(&self, field_id: u16) -> Option<f64> {
        let raw = self.find_exact(field_id, FieldType::F64, 8)?;
        Some(f64::from_ne_bytes(raw.try_into().ok()?))
    }

    pub fn get_str(&self, field_id: u16) -> Option<&str> {
        std::str::from_utf8(self.find_raw(field_id, FieldType::Str)?).ok()
    }

    pub fn get_bytes(&self, field_id: u16) -> Option<&[u8]> {
        self.find_raw(field_id, FieldType::Bytes)
    }

    /// Iterate the raw `(field_id, field_type, value)` records in payload
    /// order. The payload must be well-formed (post-finalize or
    /// post-decode); iteration stops at the first malformed record.
    fn raw_fields(&self) -> RawFieldIter<'_> {
        RawFieldIter {
            buf: &self.fields,
            pos: 0,
        }
    }

    /// Iterate fields as typed values in payload order.
    pub fn fields(&self) -> impl Iterator<Item = (u16, FieldValue<'_>)> {
        self.raw_fields().map(|(id, ty, raw)| {
            let value = match FieldType::from_u8(ty) {
                Some(FieldType::I64) if raw.len() == 8 => {
                    FieldValue::I64(i64::from_ne_bytes(raw.try_into().unwrap_or([0; 8])))
                }
                Some(FieldType::U64) if raw.len() == 8 => {
                    FieldValue::U64(u64::from_ne_bytes(raw.try_into().unwrap_or([0; 8])))
                }
                Some(FieldType::F64) if raw.len() == 8 => {
                    FieldValue::F64(f64::from_ne_bytes(raw.try_into().unwrap_or([0; 8])))
                }
                Some(FieldType::Str) => match std::str::from_utf8(raw) {
                    Ok(s) => FieldValue::Str(s),
                    Err(_) => FieldValue::Bytes(raw),
                },
                _ => FieldValue::Bytes(raw),
            };
            (id, value)
        })
    }
}

impl fmt::Debug for IpcMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IpcMessage")
            .field("msg_type", &self.header.msg_type)
            .field("field_count", &self.header.field_count)
            .field("payload_len", &self.header.payload_len)
            .field("seq_no", &self.header.seq_no)
            .finish()
    }
}

struct RawFieldIter<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for RawFieldIter<'a> {
    type Item = (u16, u8, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let rest = &self.buf[self.pos..];
        if rest.len() < FIELD_HEADER_SIZE {
            return None;
        }
        let id = u16::from_ne_bytes(rest[0..2].try_into().ok()?);
        let ty = rest[2];
        let len = u32::from_ne_bytes(rest[3..7].try_into().ok()?) as usize;
        let value = rest.get(FIELD_HEADER_SIZE..FIELD_HEADER_SIZE + len)?;
        self.pos += FIELD_HEADER_SIZE + len;
        Some((id, ty, value))
    }
}

/// Validate the field records in `payload` and return their count.
fn walk_fields(payload: &[u8]) -> Result<u16, EnvelopeError> {
    let mut pos = 0usize;
    let mut count = 0u16;
    while payload.len() - pos >= FIELD_HEADER_SIZE {
        let len = u32::from_ne_bytes(
            payload[pos + 3..pos + 7]
                .try_into()
                .map_err(|_| EnvelopeError::TruncatedField)?,
        ) as usize;
        pos = pos
            .checked_add(FIELD_HEADER_SIZE + len)
            .ok_or(EnvelopeError::TruncatedField)?;
        if pos > payload.len() {
            return Err(EnvelopeError::TruncatedField);
        }
        count += 1;
    }
    if pos != payload.len() {
        return Err(EnvelopeError::Misaligned);
    }
    Ok(count)
}
