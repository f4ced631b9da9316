//! Wire record codec and request-body framing.
//!
//! The binary record layout is a fixed external contract shared with the
//! requesting engine; it must stay byte-compatible across versions:
//!
//! ```text
//! record := total_length:i32 payload          (big-endian throughout)
//! payload := version:u16 flags:u8 field_count:u16 field*
//! field  := type_code:i32 value_length:i32 value_bytes
//! ```
//!
//! `total_length` counts the bytes after the prefix; `value_length` of -1
//! marks a NULL field with no value bytes. Text mode is newline-delimited:
//! one textual field per record.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use causeway_error::{CausewayError, ErrorCode, Result};
use futures::stream::{self, BoxStream, Stream, StreamExt};

/// Version byte written into every binary record.
pub const WIRE_VERSION: u16 = 1;

/// Upper bound on a single framed record; larger frames are a per-request
/// error, not a reason to buffer without limit.
pub const MAX_RECORD_BYTES: usize = 256 << 20;

/// Engine type codes for the column types the codec knows natively.
/// Unknown codes pass through as opaque bytes.
pub mod type_codes {
    pub const BOOLEAN: i32 = 16;
    pub const BYTEA: i32 = 17;
    pub const BIGINT: i32 = 20;
    pub const SMALLINT: i32 = 21;
    pub const INTEGER: i32 = 23;
    pub const TEXT: i32 = 25;
    pub const REAL: i32 = 700;
    pub const FLOAT8: i32 = 701;
    pub const VARCHAR: i32 = 1043;
    pub const NUMERIC: i32 = 1700;
}

/// One decoded field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Boolean(bool),
    SmallInt(i16),
    Integer(i32),
    BigInt(i64),
    Real(f32),
    Double(f64),
    Text(String),
    Bytes(Vec<u8>),
}

/// One wire field: engine type code plus value.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub type_code: i32,
    pub value: FieldValue,
}

impl Field {
    pub fn text(value: impl Into<String>) -> Self {
        Self {
            type_code: type_codes::TEXT,
            value: FieldValue::Text(value.into()),
        }
    }

    pub fn integer(value: i32) -> Self {
        Self {
            type_code: type_codes::INTEGER,
            value: FieldValue::Integer(value),
        }
    }

    pub fn bigint(value: i64) -> Self {
        Self {
            type_code: type_codes::BIGINT,
            value: FieldValue::BigInt(value),
        }
    }

    pub fn bytes(value: impl Into<Vec<u8>>) -> Self {
        Self {
            type_code: type_codes::BYTEA,
            value: FieldValue::Bytes(value.into()),
        }
    }

    pub fn null(type_code: i32) -> Self {
        Self {
            type_code,
            value: FieldValue::Null,
        }
    }
}

fn oversized(len: usize) -> CausewayError {
    CausewayError::new(
        ErrorCode::SerializationFailed,
        format!(
            "record of {} bytes exceeds the {} byte limit",
            len, MAX_RECORD_BYTES
        ),
    )
}

/// Encode one record, including its length prefix, ready for the wire.
pub fn encode_record(fields: &[Field]) -> Result<Bytes> {
    if fields.len() > u16::MAX as usize {
        return Err(CausewayError::new(
            ErrorCode::SerializationFailed,
            format!("record has {} fields, limit is {}", fields.len(), u16::MAX),
        ));
    }

    let mut payload = BytesMut::with_capacity(16 + fields.len() * 12);
    payload.put_u16(WIRE_VERSION);
    payload.put_u8(0); // flags
    payload.put_u16(fields.len() as u16);

    for field in fields {
        payload.put_i32(field.type_code);
        match &field.value {
            FieldValue::Null => payload.put_i32(-1),
            FieldValue::Boolean(v) => {
                payload.put_i32(1);
                payload.put_u8(u8::from(*v));
            }
            FieldValue::SmallInt(v) => {
                payload.put_i32(2);
                payload.put_i16(*v);
            }
            FieldValue::Integer(v) => {
                payload.put_i32(4);
                payload.put_i32(*v);
            }
            FieldValue::BigInt(v) => {
                payload.put_i32(8);
                payload.put_i64(*v);
            }
            FieldValue::Real(v) => {
                payload.put_i32(4);
                payload.put_f32(*v);
            }
            FieldValue::Double(v) => {
                payload.put_i32(8);
                payload.put_f64(*v);
            }
            FieldValue::Text(v) => {
                if v.len() > MAX_RECORD_BYTES {
                    return Err(oversized(v.len()));
                }
                payload.put_i32(v.len() as i32);
                payload.put_slice(v.as_bytes());
            }
            FieldValue::Bytes(v) => {
                if v.len() > MAX_RECORD_BYTES {
                    return Err(oversized(v.len()));
                }
                payload.put_i32(v.len() as i32);
                payload.put_slice(v);
            }
        }
    }

    if payload.len() > MAX_RECORD_BYTES {
        return Err(oversized(payload.len()));
    }

    let mut record = BytesMut::with_capacity(4 + payload.len());
    record.put_i32(payload.len() as i32);
    record.extend_from_slice(&payload);
    Ok(record.freeze())
}

fn truncated() -> CausewayError {
    CausewayError::new(ErrorCode::SerializationFailed, "truncated wire record")
}

/// Decode one record payload (the bytes following the length prefix).
pub fn decode_record(frame: &[u8]) -> Result<Vec<Field>> {
    let mut cursor = frame;
    if cursor.remaining() < 5 {
        return Err(truncated());
    }

    let version = cursor.get_u16();
    if version != WIRE_VERSION {
        return Err(CausewayError::new(
            ErrorCode::SerializationFailed,
            format!("unsupported wire record version {}", version),
        ));
    }
    let _flags = cursor.get_u8();
    let field_count = cursor.get_u16() as usize;

    let mut fields = Vec::with_capacity(field_count);
    for _ in 0..field_count {
        if cursor.remaining() < 8 {
            return Err(truncated());
        }
        let type_code = cursor.get_i32();
        let value_len = cursor.get_i32();

        if value_len < 0 {
            fields.push(Field::null(type_code));
            continue;
        }
        let value_len = value_len as usize;
        if cursor.remaining() < value_len {
            return Err(truncated());
        }

        let value = decode_value(type_code, &cursor[..value_len])?;
        cursor.advance(value_len);
        fields.push(Field { type_code, value });
    }

    Ok(fields)
}

fn bad_length(type_code: i32, len: usize) -> CausewayError {
    CausewayError::new(
        ErrorCode::SerializationFailed,
        format!("field of type {} has invalid length {}", type_code, len),
    )
}

fn decode_value(type_code: i32, mut raw: &[u8]) -> Result<FieldValue> {
    use type_codes::*;

    let value = match type_code {
        BOOLEAN => {
            if raw.len() != 1 {
                return Err(bad_length(type_code, raw.len()));
            }
            FieldValue::Boolean(raw.get_u8() != 0)
        }
        SMALLINT => {
            if raw.len() != 2 {
                return Err(bad_length(type_code, raw.len()));
            }
            FieldValue::SmallInt(raw.get_i16())
        }
        INTEGER => {
            if raw.len() != 4 {
                return Err(bad_length(type_code, raw.len()));
            }
            FieldValue::Integer(raw.get_i32())
        }
        BIGINT => {
            if raw.len() != 8 {
                return Err(bad_length(type_code, raw.len()));
            }
            FieldValue::BigInt(raw.get_i64())
        }
        REAL => {
            if raw.len() != 4 {
                return Err(bad_length(type_code, raw.len()));
            }
            FieldValue::Real(raw.get_f32())
        }
        FLOAT8 => {
            if raw.len() != 8 {
                return Err(bad_length(type_code, raw.len()));
            }
            FieldValue::Double(raw.get_f64())
        }
        TEXT | VARCHAR | NUMERIC => FieldValue::Text(
            std::str::from_utf8(raw)
                .map_err(|e| {
                    CausewayError::new(
                        ErrorCode::SerializationFailed,
                        format!("field of type {} is not valid UTF-8: {}", type_code, e),
                    )
                })?
                .to_string(),
        ),
        _ => FieldValue::Bytes(raw.to_vec()),
    };
    Ok(value)
}

/// Encode one record in text mode: exactly one textual field, newline
/// terminated.
pub fn encode_text_record(fields: &[Field]) -> Result<Bytes> {
    if fields.len() != 1 {
        return Err(CausewayError::new(
            ErrorCode::SerializationFailed,
            format!(
                "text output format requires exactly one field per record, got {}",
                fields.len()
            ),
        ));
    }

    let raw: &[u8] = match &fields[0].value {
        FieldValue::Text(v) => v.as_bytes(),
        FieldValue::Bytes(v) => v.as_slice(),
        _ => {
            return Err(CausewayError::new(
                ErrorCode::SerializationFailed,
                format!(
                    "text output format requires a textual field, got type code {}",
                    fields[0].type_code
                ),
            ))
        }
    };

    let mut record = BytesMut::with_capacity(raw.len() + 1);
    record.put_slice(raw);
    if !raw.ends_with(b"\n") {
        record.put_u8(b'\n');
    }
    Ok(record.freeze())
}

/// Decode one text-mode line (without its trailing newline).
pub fn decode_text_record(line: &[u8]) -> Vec<Field> {
    vec![Field::text(String::from_utf8_lossy(line).into_owned())]
}

/// Incremental framing over the request body.
///
/// Pulls chunks off the underlying byte stream on demand and splits them
/// into whole records; chunk boundaries never align with record boundaries
/// and this type hides that. Stream-level errors surface as client
/// disconnects, framing violations as serialization errors.
pub struct RecordBuffer {
    stream: BoxStream<'static, std::io::Result<Bytes>>,
    buf: BytesMut,
    eof: bool,
}

impl RecordBuffer {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = std::io::Result<Bytes>> + Send + 'static,
    {
        Self {
            stream: stream.boxed(),
            buf: BytesMut::new(),
            eof: false,
        }
    }

    /// Buffer over a fixed byte slice, mainly for tests.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self::new(stream::iter([Ok(data.into())]))
    }

    async fn fill_one(&mut self) -> Result<bool> {
        if self.eof {
            return Ok(false);
        }
        match self.stream.next().await {
            None => {
                self.eof = true;
                Ok(false)
            }
            Some(Ok(chunk)) => {
                self.buf.extend_from_slice(&chunk);
                Ok(true)
            }
            Some(Err(e)) => Err(CausewayError::new(
                ErrorCode::ClientDisconnect,
                format!("client connection lost while reading request body: {}", e),
            )),
        }
    }

    /// Next length-prefixed frame (payload without the prefix), or `None`
    /// at a clean end of stream.
    pub async fn next_binary_frame(&mut self) -> Result<Option<Bytes>> {
        loop {
            if self.buf.len() >= 4 {
                let declared = i32::from_be_bytes([
                    self.buf[0],
                    self.buf[1],
                    self.buf[2],
                    self.buf[3],
                ]);
                if declared < 0 {
                    return Err(CausewayError::new(
                        ErrorCode::SerializationFailed,
                        format!("invalid record length {}", declared),
                    ));
                }
                let declared = declared as usize;
                if declared > MAX_RECORD_BYTES {
                    return Err(oversized(declared));
                }
                if self.buf.len() >= 4 + declared {
                    self.buf.advance(4);
                    return Ok(Some(self.buf.split_to(declared).freeze()));
                }
            }

            if !self.fill_one().await? {
                return if self.buf.is_empty() {
                    Ok(None)
                } else {
                    Err(CausewayError::new(
                        ErrorCode::SerializationFailed,
                        format!(
                            "truncated record stream: {} trailing bytes",
                            self.buf.len()
                        ),
                    ))
                };
            }
        }
    }

    /// Next newline-delimited line (without the newline), or `None` at a
    /// clean end of stream. A final unterminated line is still a record.
    pub async fn next_line(&mut self) -> Result<Option<Bytes>> {
        let mut searched = 0;
        loop {
            if let Some(pos) = self.buf[searched..].iter().position(|&b| b == b'\n') {
                let mut line = self.buf.split_to(searched + pos + 1);
                line.truncate(line.len() - 1);
                return Ok(Some(line.freeze()));
            }
            searched = self.buf.len();
            if searched > MAX_RECORD_BYTES {
                return Err(oversized(searched));
            }

            if !self.fill_one().await? {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                let line = self.buf.split_to(self.buf.len());
                return Ok(Some(line.freeze()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_record_round_trip() {
        let fields = vec![
            Field::text("hello"),
            Field::integer(42),
            Field::null(type_codes::TEXT),
            Field::bigint(-7),
            Field {
                type_code: type_codes::FLOAT8,
                value: FieldValue::Double(2.5),
            },
            Field::bytes(vec![0u8, 1, 255]),
        ];

        let encoded = encode_record(&fields).unwrap();
        let declared =
            i32::from_be_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]) as usize;
        assert_eq!(declared + 4, encoded.len());

        let decoded = decode_record(&encoded[4..]).unwrap();
        assert_eq!(decoded, fields);
    }

    #[test]
    fn test_decode_rejects_wrong_version() {
        let fields = vec![Field::text("x")];
        let encoded = encode_record(&fields).unwrap();
        let mut payload = encoded[4..].to_vec();
        payload[0] = 0;
        payload[1] = 9;

        let err = decode_record(&payload).unwrap_err();
        assert!(err.message.contains("unsupported wire record version"));
    }

    #[test]
    fn test_decode_rejects_truncation() {
        let encoded = encode_record(&[Field::text("truncate me")]).unwrap();
        let payload = &encoded[4..encoded.len() - 3];
        let err = decode_record(payload).unwrap_err();
        assert_eq!(err.message, "truncated wire record");
    }

    #[test]
    fn test_text_record_requires_single_textual_field() {
        let two = vec![Field::text("a"), Field::text("b")];
        let err = encode_text_record(&two).unwrap_err();
        assert!(err.message.contains("exactly one field"));

        let numeric = vec![Field::integer(1)];
        assert!(encode_text_record(&numeric).is_err());

        let ok = encode_text_record(&[Field::text("line")]).unwrap();
        assert_eq!(&ok[..], b"line\n");

        // already terminated lines are not doubled
        let terminated = encode_text_record(&[Field::text("line\n")]).unwrap();
        assert_eq!(&terminated[..], b"line\n");
    }

    #[tokio::test]
    async fn test_binary_framing_across_chunk_boundaries() {
        let first = encode_record(&[Field::text("first")]).unwrap();
        let second = encode_record(&[Field::text("second")]).unwrap();

        let mut wire = Vec::new();
        wire.extend_from_slice(&first);
        wire.extend_from_slice(&second);

        // split mid-prefix and mid-payload
        let chunks: Vec<std::io::Result<Bytes>> = vec![
            Ok(Bytes::copy_from_slice(&wire[..2])),
            Ok(Bytes::copy_from_slice(&wire[2..first.len() + 3])),
            Ok(Bytes::copy_from_slice(&wire[first.len() + 3..])),
        ];
        let mut buffer = RecordBuffer::new(stream::iter(chunks));

        let frame = buffer.next_binary_frame().await.unwrap().unwrap();
        assert_eq!(decode_record(&frame).unwrap(), vec![Field::text("first")]);

        let frame = buffer.next_binary_frame().await.unwrap().unwrap();
        assert_eq!(decode_record(&frame).unwrap(), vec![Field::text("second")]);

        assert!(buffer.next_binary_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_truncated_stream_is_an_error() {
        let record = encode_record(&[Field::text("dangling")]).unwrap();
        let mut buffer = RecordBuffer::from_bytes(record.slice(..record.len() - 2));

        let err = buffer.next_binary_frame().await.unwrap_err();
        assert!(err.message.contains("truncated record stream"));
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        let mut prefix = BytesMut::new();
        prefix.put_i32((MAX_RECORD_BYTES + 1) as i32);
        let mut buffer = RecordBuffer::from_bytes(prefix.freeze());

        let err = buffer.next_binary_frame().await.unwrap_err();
        assert!(err.message.contains("exceeds"));
    }

    #[tokio::test]
    async fn test_line_framing() {
        let mut buffer = RecordBuffer::from_bytes(&b"alpha\nbeta\ntail"[..]);

        assert_eq!(buffer.next_line().await.unwrap().unwrap(), "alpha");
        assert_eq!(buffer.next_line().await.unwrap().unwrap(), "beta");
        // unterminated remainder still counts as a record
        assert_eq!(buffer.next_line().await.unwrap().unwrap(), "tail");
        assert!(buffer.next_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_body_error_maps_to_client_disconnect() {
        let chunks: Vec<std::io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(std::io::Error::other("connection reset by peer")),
        ];
        let mut buffer = RecordBuffer::new(stream::iter(chunks));

        let err = buffer.next_line().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ClientDisconnect);
        assert!(err.message.contains("connection reset by peer"));
    }
}
