use std::io::Read;

use wireline_frame::DelimitedReader;

use crate::error::{MessageError, Result};

/// The two-line envelope preceding every frame payload.
///
/// Line 1 is the single-character type tag followed by an optional
/// correlation id; line 2 is the command string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Single-character message type tag.
    pub tag: char,
    /// Correlation id linking a reply to its request. Absent ids are
    /// assigned by the receiving side before it replies.
    pub id: Option<String>,
    /// Application-level verb or status line used for dispatch.
    pub command: String,
}

impl Header {
    /// Parse the envelope from the start of a frame.
    ///
    /// `Ok(None)` means the frame held no bytes at all before the first
    /// line — a peer that closed with no more messages. A frame that ends
    /// partway through the envelope is a [`MessageError::TruncatedHeader`]
    /// instead: those two end conditions are deliberately distinct.
    pub fn read<R: Read>(framer: &mut DelimitedReader<'_, R>) -> Result<Option<Self>> {
        let first = match framer.read_line()? {
            None => return Ok(None),
            Some(line) => line,
        };
        let mut chars = first.chars();
        let tag = chars.next().ok_or(MessageError::TruncatedHeader)?;
        let rest = chars.as_str();
        let id = if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        };

        let command = framer
            .read_line()?
            .ok_or(MessageError::TruncatedHeader)?;

        Ok(Some(Self { tag, id, command }))
    }

    /// Encode line 1 (`tag[id]`) of the envelope.
    pub fn tag_line(&self) -> String {
        match &self.id {
            Some(id) => format!("{}{id}", self.tag),
            None => self.tag.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    const DELIM: &[u8] = b"--wl-hdrtest";

    fn framed(content: &str) -> Vec<u8> {
        let mut wire = content.as_bytes().to_vec();
        wire.push(b'\n');
        wire.extend_from_slice(DELIM);
        wire
    }

    #[test]
    fn parses_tag_id_and_command() {
        let mut source = Cursor::new(framed("Tabc-123\nGetStatus\nbody"));
        let mut framer = DelimitedReader::new(&mut source, DELIM, Vec::new());
        let header = Header::read(&mut framer).unwrap().unwrap();
        assert_eq!(header.tag, 'T');
        assert_eq!(header.id.as_deref(), Some("abc-123"));
        assert_eq!(header.command, "GetStatus");
    }

    #[test]
    fn absent_id_parses_as_none() {
        let mut source = Cursor::new(framed("S\n200 OK"));
        let mut framer = DelimitedReader::new(&mut source, DELIM, Vec::new());
        let header = Header::read(&mut framer).unwrap().unwrap();
        assert_eq!(header.tag, 'S');
        assert_eq!(header.id, None);
        assert_eq!(header.command, "200 OK");
    }

    #[test]
    fn no_bytes_at_all_is_clean_close() {
        let mut source = Cursor::new(Vec::<u8>::new());
        let mut framer = DelimitedReader::new(&mut source, DELIM, Vec::new());
        assert!(Header::read(&mut framer).unwrap().is_none());
    }

    #[test]
    fn missing_command_line_is_truncated() {
        let mut source = Cursor::new(b"Tid-1".to_vec());
        let mut framer = DelimitedReader::new(&mut source, DELIM, Vec::new());
        let err = Header::read(&mut framer).unwrap_err();
        assert!(matches!(err, MessageError::TruncatedHeader));
    }

    #[test]
    fn empty_tag_line_is_truncated() {
        let mut source = Cursor::new(b"\ncommand\n".to_vec());
        let mut framer = DelimitedReader::new(&mut source, DELIM, Vec::new());
        let err = Header::read(&mut framer).unwrap_err();
        assert!(matches!(err, MessageError::TruncatedHeader));
    }

    #[test]
    fn tag_line_roundtrip() {
        let header = Header {
            tag: 'B',
            id: Some("xyz".into()),
            command: "Upload".into(),
        };
        assert_eq!(header.tag_line(), "Bxyz");
        let no_id = Header {
            tag: 'T',
            id: None,
            command: "Echo".into(),
        };
        assert_eq!(no_id.tag_line(), "T");
    }
}
