//! Protocol codec
//!
//! Encoding and decoding functions for the wire protocol.
//!
//! ## Wire Format
//!
//! ```text
//! {"ID":4,"Command":"put","ActionID":"Aw==","ObjectID":"Cx7H","BodySize":5}\n
//! "eHl6enk="\n
//! ```
//!
//! Every record is one JSON value followed by a newline. A `put` with a
//! non-zero `BodySize` is followed by a second record: a JSON string holding
//! the base64 encoding of exactly `BodySize` bytes.

use std::io::{BufRead, Write};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;

use super::{Request, Response};
use crate::error::{CacheError, Result};

// =============================================================================
// Byte Field Encoding
// =============================================================================

/// Serde adapter for byte fields carried as base64 strings
pub(crate) mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<T, S>(bytes: T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: AsRef<[u8]>,
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes.as_ref()))
    }

    /// `null` and a missing field both decode as empty
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(encoded) => STANDARD.decode(encoded).map_err(D::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}

// =============================================================================
// Record Encoding/Decoding
// =============================================================================

/// Encode a request as one newline-terminated record
pub fn encode_request(request: &Request) -> Result<Vec<u8>> {
    encode_record(request)
}

/// Decode a request from one record
pub fn decode_request(line: &str) -> Result<Request> {
    Ok(serde_json::from_str(line)?)
}

/// Encode a response as one newline-terminated record
pub fn encode_response(response: &Response) -> Result<Vec<u8>> {
    encode_record(response)
}

/// Decode a response from one record
pub fn decode_response(line: &str) -> Result<Response> {
    Ok(serde_json::from_str(line)?)
}

/// Encode a body as the base64 string record that follows a put
pub fn encode_body(body: &[u8]) -> Result<Vec<u8>> {
    encode_record(&STANDARD.encode(body))
}

fn encode_record<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut message = serde_json::to_vec(value)?;
    message.push(b'\n');
    Ok(message)
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Read the next non-blank line, or `None` at end of input
fn read_record<R: BufRead>(reader: &mut R) -> Result<Option<String>> {
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        if !line.trim().is_empty() {
            return Ok(Some(line));
        }
    }
}

/// Read the next request from a stream
///
/// Returns `Ok(None)` on a clean end of input.
pub fn read_request<R: BufRead>(reader: &mut R) -> Result<Option<Request>> {
    match read_record(reader)? {
        Some(line) => decode_request(&line).map(Some),
        None => Ok(None),
    }
}

/// Read the body record that follows `request`
///
/// Any failure here leaves the stream unframed, so callers treat it as fatal.
pub fn read_body<R: BufRead>(reader: &mut R, request: &Request) -> Result<Bytes> {
    let line = read_record(reader)?.ok_or_else(|| {
        CacheError::Protocol(format!(
            "request {}: decode body: unexpected end of input",
            request.id
        ))
    })?;

    let encoded: String = serde_json::from_str(&line).map_err(|e| {
        CacheError::Protocol(format!("request {}: decode body: {}", request.id, e))
    })?;
    let body = STANDARD.decode(encoded.as_bytes()).map_err(|e| {
        CacheError::Protocol(format!("request {}: decode body: {}", request.id, e))
    })?;

    if body.len() as i64 != request.body_size {
        return Err(CacheError::Protocol(format!(
            "request {} body: got {} bytes, want {}",
            request.id,
            body.len(),
            request.body_size
        )));
    }
    Ok(Bytes::from(body))
}

/// Write a request, and its body when it carries one
pub fn write_request<W: Write>(writer: &mut W, request: &Request, body: &[u8]) -> Result<()> {
    writer.write_all(&encode_request(request)?)?;
    if request.has_body() {
        writer.write_all(&encode_body(body)?)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read the next response from a stream
///
/// Returns `Ok(None)` on a clean end of input.
pub fn read_response<R: BufRead>(reader: &mut R) -> Result<Option<Response>> {
    match read_record(reader)? {
        Some(line) => decode_response(&line).map(Some),
        None => Ok(None),
    }
}

/// Write a response to a stream
pub fn write_response<W: Write>(writer: &mut W, response: &Response) -> Result<()> {
    let bytes = encode_response(response)?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}
