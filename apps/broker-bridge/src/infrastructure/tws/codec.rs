//! TWS Frame Codec
//!
//! The TWS socket API frames every message as a 4-byte big-endian length
//! followed by a payload of NUL-terminated ASCII fields. The one exception is
//! the opening handshake, which sends `API\0` and then a framed version range
//! without a terminator.

use std::str::FromStr;

use rust_decimal::Decimal;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Largest payload accepted from the gateway.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Socket read failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Declared frame length exceeds [`MAX_FRAME_LEN`].
    #[error("frame of {0} bytes exceeds limit")]
    FrameTooLarge(usize),

    /// Payload is not valid UTF-8.
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,

    /// Message ended before a required field.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// A field did not parse as the expected type.
    #[error("invalid {field}: {value:?}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// Raw value.
        value: String,
    },
}

// =============================================================================
// Encoding
// =============================================================================

/// Frame a list of fields.
#[must_use]
pub fn encode_fields<S: AsRef<str>>(fields: &[S]) -> Vec<u8> {
    let payload_len: usize = fields.iter().map(|f| f.as_ref().len() + 1).sum();
    let mut frame = Vec::with_capacity(payload_len + 4);
    frame.extend_from_slice(&frame_len(payload_len).to_be_bytes());
    for field in fields {
        frame.extend_from_slice(field.as_ref().as_bytes());
        frame.push(0);
    }
    frame
}

/// Opening handshake advertising the supported server version range.
#[must_use]
pub fn encode_handshake(min_version: i32, max_version: i32) -> Vec<u8> {
    let range = format!("v{min_version}..{max_version}");
    let mut out = Vec::with_capacity(range.len() + 8);
    out.extend_from_slice(b"API\0");
    out.extend_from_slice(&frame_len(range.len()).to_be_bytes());
    out.extend_from_slice(range.as_bytes());
    out
}

fn frame_len(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

// =============================================================================
// Decoding
// =============================================================================

/// Read one frame and split it into fields.
///
/// Returns `Ok(None)` on a clean end of stream.
///
/// # Errors
///
/// Returns an error on a truncated frame, an oversized frame, or a payload
/// that is not UTF-8.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<String>>, CodecError>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge(len));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    split_fields(&payload).map(Some)
}

/// Split a payload into its NUL-terminated fields.
///
/// # Errors
///
/// Returns [`CodecError::InvalidUtf8`] if the payload is not UTF-8.
pub fn split_fields(payload: &[u8]) -> Result<Vec<String>, CodecError> {
    let text = std::str::from_utf8(payload).map_err(|_| CodecError::InvalidUtf8)?;
    let mut fields: Vec<String> = text.split('\0').map(str::to_string).collect();
    if text.ends_with('\0') || text.is_empty() {
        fields.pop();
    }
    Ok(fields)
}

/// Sequential typed reads over a decoded frame.
#[derive(Debug)]
pub struct FieldReader<'a> {
    fields: std::slice::Iter<'a, String>,
}

impl<'a> FieldReader<'a> {
    /// Read over `fields` from the start.
    #[must_use]
    pub fn new(fields: &'a [String]) -> Self {
        Self {
            fields: fields.iter(),
        }
    }

    /// Next raw field.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::MissingField`] when the frame is exhausted.
    pub fn string(&mut self, field: &'static str) -> Result<&'a str, CodecError> {
        self.fields
            .next()
            .map(String::as_str)
            .ok_or(CodecError::MissingField(field))
    }

    /// Skip `n` fields the caller does not need.
    pub fn skip(&mut self, n: usize) {
        for _ in 0..n {
            if self.fields.next().is_none() {
                break;
            }
        }
    }

    /// Next field as an integer. An empty field reads as zero.
    ///
    /// # Errors
    ///
    /// Returns an error when missing or not an integer.
    pub fn int<T>(&mut self, field: &'static str) -> Result<T, CodecError>
    where
        T: FromStr + Default,
    {
        let raw = self.string(field)?;
        if raw.is_empty() {
            return Ok(T::default());
        }
        raw.parse().map_err(|_| CodecError::InvalidField {
            field,
            value: raw.to_string(),
        })
    }

    /// Next field as a decimal. Empty, non-finite, and out-of-range values
    /// (the API's "unset" sentinel) read as `None`.
    ///
    /// # Errors
    ///
    /// Returns an error only when the field is missing.
    pub fn decimal(&mut self, field: &'static str) -> Result<Option<Decimal>, CodecError> {
        let raw = self.string(field)?.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        Ok(Decimal::from_str(raw)
            .or_else(|_| Decimal::from_scientific(raw))
            .ok())
    }
}
