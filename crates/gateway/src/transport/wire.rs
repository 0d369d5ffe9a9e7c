//! TWS API framing
//!
//! ```text
//! ┌──────────────┬──────────────────────────────────────┐
//! │ len: u32 BE  │ field\0 field\0 field\0 ...          │
//! └──────────────┴──────────────────────────────────────┘
//! ```
//!
//! The connection opens with the raw bytes `API\0` followed by one framed,
//! unterminated version range string (`v100..176`).

use std::str::FromStr;

use rust_decimal::Decimal;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::TransportError;

/// Largest frame accepted from the server
pub const MAX_FRAME_LEN: usize = 0x00FF_FFFF;

/// Bytes that open every connection
pub fn handshake_preamble(min_version: i32, max_version: i32) -> Vec<u8> {
    let range = format!("v{min_version}..{max_version}");
    let mut out = Vec::with_capacity(8 + range.len());
    out.extend_from_slice(b"API\0");
    out.extend_from_slice(&(range.len() as u32).to_be_bytes());
    out.extend_from_slice(range.as_bytes());
    out
}

/// Builds one length-prefixed message from NUL-terminated fields
#[derive(Debug, Default)]
pub struct FieldWriter {
    payload: Vec<u8>,
}

impl FieldWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_str(&mut self, value: &str) -> &mut Self {
        self.payload.extend_from_slice(value.as_bytes());
        self.payload.push(0);
        self
    }

    pub fn push_int(&mut self, value: i64) -> &mut Self {
        self.push_str(&value.to_string())
    }

    pub fn push_f64(&mut self, value: f64) -> &mut Self {
        self.push_str(&format!("{value:?}"))
    }

    pub fn push_bool(&mut self, value: bool) -> &mut Self {
        self.push_str(if value { "1" } else { "0" })
    }

    pub fn finish(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(4 + self.payload.len());
        frame.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(&self.payload);
        frame
    }
}

/// Read one frame; `Ok(None)` on a clean EOF between frames
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge(len));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Split a frame payload into its text fields. Gateways send Latin-1 in
/// some notices, so invalid UTF-8 is replaced rather than rejected.
pub fn split_fields(payload: &[u8]) -> Vec<String> {
    let body = payload.strip_suffix(b"\0").unwrap_or(payload);
    if body.is_empty() {
        return Vec::new();
    }
    body.split(|b| *b == 0)
        .map(|field| String::from_utf8_lossy(field).into_owned())
        .collect()
}

/// Sequential typed access to decoded fields
pub struct FieldReader<'a> {
    fields: &'a [String],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(fields: &'a [String]) -> Self {
        Self { fields, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.fields.len().saturating_sub(self.pos)
    }

    pub fn next_str(&mut self) -> Result<&'a str, TransportError> {
        let field = self.fields.get(self.pos).ok_or_else(|| {
            TransportError::Decode(format!("missing field at index {}", self.pos))
        })?;
        self.pos += 1;
        Ok(field.as_str())
    }

    pub fn skip(&mut self) -> Result<(), TransportError> {
        self.next_str().map(|_| ())
    }

    /// Empty fields read as 0
    pub fn next_i64(&mut self) -> Result<i64, TransportError> {
        let raw = self.next_str()?;
        if raw.is_empty() {
            return Ok(0);
        }
        raw.parse()
            .map_err(|_| TransportError::Decode(format!("expected integer, got {raw:?}")))
    }

    pub fn next_i32(&mut self) -> Result<i32, TransportError> {
        let value = self.next_i64()?;
        i32::try_from(value)
            .map_err(|_| TransportError::Decode(format!("integer {value} out of range")))
    }

    /// Prices and sizes; accepts plain and scientific notation, empty reads as 0
    pub fn next_decimal(&mut self) -> Result<Decimal, TransportError> {
        let raw = self.next_str()?;
        if raw.is_empty() {
            return Ok(Decimal::ZERO);
        }
        Decimal::from_str(raw)
            .or_else(|_| Decimal::from_scientific(raw))
            .map_err(|_| TransportError::Decode(format!("expected decimal, got {raw:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_preamble_layout() {
        let bytes = handshake_preamble(100, 176);
        assert_eq!(&bytes[..4], b"API\0");
        assert_eq!(&bytes[4..8], &9u32.to_be_bytes());
        assert_eq!(&bytes[8..], b"v100..176");
    }

    #[test]
    fn test_writer_frames_fields() {
        let frame = FieldWriter::new()
            .push_int(71)
            .push_int(2)
            .push_bool(true)
            .push_str("")
            .finish();
        assert_eq!(&frame[..4], &9u32.to_be_bytes());
        assert_eq!(&frame[4..], b"71\x002\x001\x00\x00");
    }

    #[test]
    fn test_split_fields_keeps_empty_fields() {
        let fields = split_fields(b"4\x002\x00-1\x002104\x00Market data farm OK\x00\x00");
        assert_eq!(fields, vec!["4", "2", "-1", "2104", "Market data farm OK", ""]);
        assert!(split_fields(b"").is_empty());
    }

    #[test]
    fn test_split_fields_tolerates_latin1() {
        let fields = split_fields(b"4\x002\x00-1\x002106\x00Caf\xe9 farm\x00");
        assert_eq!(fields.len(), 5);
        assert_eq!(fields[3], "2106");
        assert_eq!(fields[4], "Caf\u{FFFD} farm");
    }

    #[test]
    fn test_reader_typed_access() {
        let fields: Vec<String> = ["12", "", "189.25", "1.5E2", "x"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut reader = FieldReader::new(&fields);
        assert_eq!(reader.next_i32().unwrap(), 12);
        assert_eq!(reader.next_i64().unwrap(), 0);
        assert_eq!(reader.next_decimal().unwrap(), dec!(189.25));
        assert_eq!(reader.next_decimal().unwrap(), dec!(150));
        assert!(reader.next_i64().is_err());
        assert!(reader.next_str().is_err());
    }

    #[tokio::test]
    async fn test_read_frame_roundtrip_and_eof() {
        let mut bytes = FieldWriter::new().push_int(9).push_int(1).push_int(1).finish();
        bytes.extend(FieldWriter::new().push_int(15).finish());
        let mut cursor = std::io::Cursor::new(bytes);

        let first = read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(split_fields(&first), vec!["9", "1", "1"]);
        let second = read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(split_fields(&second), vec!["15"]);
        assert!(read_frame(&mut cursor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_frame_rejects_oversized() {
        let mut cursor = std::io::Cursor::new(u32::MAX.to_be_bytes().to_vec());
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(TransportError::FrameTooLarge(_))
        ));
    }
}
