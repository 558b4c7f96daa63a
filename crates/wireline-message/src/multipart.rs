//! Multipart body codec.
//!
//! A multipart payload opens with an inner delimiter line of its own;
//! each part is a small `key: value` header block, a blank line, and the
//! part body, terminated by the inner delimiter. The final delimiter is
//! suffixed `--`. Parts are framed with the same machinery as outer
//! frames, so part bodies may contain arbitrary bytes.

use std::io::Read;

use bytes::{BufMut, Bytes, BytesMut};

use wireline_frame::{random_delimiter, DelimitedReader};

use crate::error::{MessageError, Result};

/// One part of a multipart message.
#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    /// Part name (for file parts, the requested path).
    pub name: String,
    /// Original filename, if distinct from the name.
    pub filename: Option<String>,
    /// MIME type, if declared.
    pub content_type: Option<String>,
    /// Raw part body.
    pub body: Bytes,
}

impl Part {
    /// A plain named part.
    pub fn new(name: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            filename: None,
            content_type: None,
            body: body.into(),
        }
    }

    /// A file part carrying the source filename.
    pub fn file(name: impl Into<String>, filename: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            filename: Some(filename.into()),
            content_type: None,
            body: body.into(),
        }
    }
}

/// Encode parts into a multipart body with a fresh inner delimiter.
pub fn encode_parts(parts: &[Part], buf: &mut BytesMut) {
    let inner = random_delimiter();
    buf.put_slice(&inner);
    buf.put_u8(b'\n');

    let last = parts.len().saturating_sub(1);
    for (index, part) in parts.iter().enumerate() {
        buf.put_slice(b"Content-Disposition: form-data\n");
        buf.put_slice(b"Name: ");
        buf.put_slice(part.name.as_bytes());
        buf.put_u8(b'\n');
        if let Some(content_type) = &part.content_type {
            buf.put_slice(b"Content-Type: ");
            buf.put_slice(content_type.as_bytes());
            buf.put_u8(b'\n');
        }
        if let Some(filename) = &part.filename {
            buf.put_slice(b"Filename: ");
            buf.put_slice(filename.as_bytes());
            buf.put_u8(b'\n');
        }
        buf.put_u8(b'\n');
        buf.put_slice(&part.body);
        buf.put_u8(b'\n');
        buf.put_slice(&inner);
        if index == last {
            buf.put_slice(b"--");
        } else {
            buf.put_u8(b'\n');
        }
    }
}

/// Decode a raw multipart body stream into its parts.
///
/// Returns the parts plus any bytes read past the final `--` terminator;
/// the caller owns pushing that leftover back into its own framing.
pub fn decode_parts<R: Read>(body: &mut R) -> Result<(Vec<Part>, Vec<u8>)> {
    let Some(mut framer) = DelimitedReader::from_stream(body, Vec::new())? else {
        return Err(MessageError::MalformedMultipart("empty multipart body"));
    };
    let delimiter = framer.delimiter().to_vec();
    let mut parts: Vec<Part> = Vec::new();

    loop {
        // Part header block, ended by a blank line.
        let mut name: Option<String> = None;
        let mut filename: Option<String> = None;
        let mut content_type: Option<String> = None;
        let mut saw_header = false;
        loop {
            match framer.read_line()? {
                None => {
                    if parts.is_empty() && !saw_header {
                        // Delimiter line only: an empty part list.
                        return Ok((parts, framer.into_overrun()));
                    }
                    return Err(MessageError::MalformedMultipart("truncated part header"));
                }
                Some(line) if line.is_empty() => break,
                Some(line) => {
                    saw_header = true;
                    let (key, value) = line
                        .split_once(':')
                        .ok_or(MessageError::MalformedMultipart("header line missing ':'"))?;
                    let value = value.trim_start().to_string();
                    match key.to_ascii_lowercase().as_str() {
                        "name" => name = Some(value),
                        "filename" => filename = Some(value),
                        "content-type" => content_type = Some(value),
                        // Content-Disposition and unknown keys carry no
                        // information we act on.
                        _ => {}
                    }
                }
            }
        }
        let name = name.ok_or(MessageError::MalformedMultipart("part missing Name header"))?;

        let mut bytes = Vec::new();
        framer.read_to_end(&mut bytes)?;
        if !framer.is_finished() {
            return Err(MessageError::MalformedMultipart("truncated part body"));
        }
        parts.push(Part {
            name,
            filename,
            content_type,
            body: bytes.into(),
        });

        // After the delimiter: `--` ends the list, a newline separates
        // the next part.
        let mut carry = framer.into_overrun();
        while carry.len() < 2 {
            let mut probe = [0u8; 2];
            let n = body.read(&mut probe)?;
            if n == 0 {
                return Err(MessageError::MalformedMultipart("missing multipart terminator"));
            }
            carry.extend_from_slice(&probe[..n]);
        }
        if carry.starts_with(b"--") {
            return Ok((parts, carry[2..].to_vec()));
        }
        let overrun = if carry.starts_with(b"\r\n") {
            carry[2..].to_vec()
        } else if carry.starts_with(b"\n") {
            carry[1..].to_vec()
        } else {
            return Err(MessageError::MalformedMultipart("garbage after part delimiter"));
        };
        framer = DelimitedReader::new(body, delimiter.clone(), overrun);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn roundtrip(parts: &[Part]) -> (Vec<Part>, Vec<u8>) {
        let mut buf = BytesMut::new();
        encode_parts(parts, &mut buf);
        let mut cursor = Cursor::new(buf.to_vec());
        decode_parts(&mut cursor).unwrap()
    }

    #[test]
    fn two_parts_roundtrip() {
        let parts = vec![
            Part::new("alpha.txt", &b"first file contents"[..]),
            Part::new("beta.bin", &b"\x00\x01\x02binary\xFF"[..]),
        ];
        let (decoded, leftover) = roundtrip(&parts);
        assert_eq!(decoded, parts);
        assert!(leftover.is_empty());
    }

    #[test]
    fn optional_headers_roundtrip() {
        let mut part = Part::file("upload", "report.pdf", &b"%PDF-1.4"[..]);
        part.content_type = Some("application/pdf".into());
        let (decoded, _) = roundtrip(std::slice::from_ref(&part));
        assert_eq!(decoded, vec![part]);
    }

    #[test]
    fn part_body_with_newlines_and_delimiter_lookalikes() {
        let body = b"line1\nline2\r\n--wl-fake\nline3\n".to_vec();
        let parts = vec![Part::new("tricky", body)];
        let (decoded, _) = roundtrip(&parts);
        assert_eq!(decoded, parts);
    }

    #[test]
    fn empty_part_body() {
        let parts = vec![Part::new("empty", Bytes::new()), Part::new("after", &b"x"[..])];
        let (decoded, _) = roundtrip(&parts);
        assert_eq!(decoded, parts);
    }

    #[test]
    fn empty_part_list() {
        let (decoded, leftover) = roundtrip(&[]);
        assert!(decoded.is_empty());
        assert!(leftover.is_empty());
    }

    #[test]
    fn missing_name_is_malformed() {
        let mut buf = BytesMut::new();
        buf.put_slice(b"inner-delim\nContent-Disposition: form-data\n\nbody\ninner-delim--");
        let mut cursor = Cursor::new(buf.to_vec());
        let err = decode_parts(&mut cursor).unwrap_err();
        assert!(matches!(err, MessageError::MalformedMultipart(_)));
    }

    #[test]
    fn truncated_body_is_malformed() {
        let mut buf = BytesMut::new();
        encode_parts(&[Part::new("a", &b"0123456789"[..])], &mut buf);
        let truncated = buf[..buf.len() - 8].to_vec();
        let mut cursor = Cursor::new(truncated);
        let err = decode_parts(&mut cursor).unwrap_err();
        assert!(matches!(err, MessageError::MalformedMultipart(_)));
    }

    #[test]
    fn trailing_bytes_surface_as_leftover() {
        let mut buf = BytesMut::new();
        encode_parts(&[Part::new("a", &b"body"[..])], &mut buf);
        buf.put_slice(b"NEXT-FRAME");
        let mut cursor = Cursor::new(buf.to_vec());
        let (decoded, leftover) = decode_parts(&mut cursor).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(leftover, b"NEXT-FRAME");
    }
}
