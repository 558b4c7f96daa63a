//! Frame-level message codec.
//!
//! Every message occupies one frame under a per-frame random delimiter:
//! the delimiter line, the two-line envelope, the payload bytes, then a
//! newline and the closing delimiter. Reading returns the overrun bytes
//! consumed past the closing delimiter so the caller can seed the next
//! read with them.

use std::io::{Read, Write};

use bytes::{BufMut, BytesMut};
use tracing::trace;

use wireline_frame::{random_delimiter, DelimitedReader};

use crate::error::{MessageError, Result};
use crate::header::Header;
use crate::message::{Message, ModeChange, Payload, SessionMode};
use crate::multipart;
use crate::registry::{
    MessageRegistry, TAG_BINARY, TAG_CUSTOM_RESERVED, TAG_FILENAMES, TAG_MULTIPART, TAG_STATUS,
    TAG_TEXT, TAG_UNICODE, TAG_XML,
};

/// Encode one message as a complete frame into `buf`.
pub fn encode_message(message: &Message, buf: &mut BytesMut) {
    let delimiter = random_delimiter();
    let header = Header {
        tag: message.tag(),
        id: message.id.clone(),
        command: message.command.clone(),
    };

    buf.put_slice(&delimiter);
    buf.put_u8(b'\n');
    buf.put_slice(header.tag_line().as_bytes());
    buf.put_u8(b'\n');
    buf.put_slice(header.command.as_bytes());
    buf.put_u8(b'\n');

    match &message.payload {
        Payload::Text(text) | Payload::Status(text) | Payload::Xml(text) => {
            buf.put_slice(text.as_bytes());
        }
        Payload::Unicode(text) => {
            for unit in text.encode_utf16() {
                buf.put_slice(&unit.to_le_bytes());
            }
        }
        Payload::Binary(body) => buf.put_slice(body),
        Payload::Filenames(names) => {
            for (index, name) in names.iter().enumerate() {
                if index > 0 {
                    buf.put_u8(b'\n');
                }
                buf.put_slice(name.as_bytes());
            }
        }
        Payload::Multipart(parts) => multipart::encode_parts(parts, buf),
        Payload::Custom { body, .. } => buf.put_slice(body),
        Payload::Ping | Payload::PingReply => {}
        Payload::Mode(change) => {
            if let (Some(interval), Some(timeout)) = (change.ping_interval, change.ping_timeout) {
                buf.put_slice(interval.as_millis().to_string().as_bytes());
                buf.put_u8(b'\n');
                buf.put_slice(timeout.as_millis().to_string().as_bytes());
            }
        }
    }

    // The newline before the closing delimiter is always written, so the
    // terminator scan is uniform even for empty payloads.
    buf.put_u8(b'\n');
    buf.put_slice(&delimiter);
}

/// Encode and write one message, flushing so it leaves as one unit.
pub fn write_message<W: Write>(writer: &mut W, message: &Message) -> Result<()> {
    let mut buf = BytesMut::new();
    encode_message(message, &mut buf);
    writer.write_all(&buf)?;
    writer.flush()?;
    trace!(tag = %message.tag(), command = %message.command, bytes = buf.len(), "wrote message");
    Ok(())
}

/// Read the next message from `stream`, seeding the framer with `overrun`
/// bytes left over from the previous frame.
///
/// Returns `Ok(None)` when the peer closed cleanly between frames. On
/// success the new overrun is returned alongside the message; pass it to
/// the next call.
pub fn read_message<R: Read>(
    stream: &mut R,
    overrun: Vec<u8>,
    registry: &MessageRegistry,
) -> Result<Option<(Message, Vec<u8>)>> {
    let Some(mut framer) = DelimitedReader::from_stream(stream, overrun)? else {
        return Ok(None);
    };
    let header = Header::read(&mut framer)?.ok_or(MessageError::TruncatedHeader)?;

    let payload = match header.tag {
        TAG_TEXT => Payload::Text(utf8_body(&mut framer)?),
        TAG_STATUS => Payload::Status(utf8_body(&mut framer)?),
        TAG_UNICODE => Payload::Unicode(utf16_body(&mut framer)?),
        TAG_XML => Payload::Xml(utf8_body(&mut framer)?),
        TAG_BINARY => Payload::Binary(raw_body(&mut framer)?.into()),
        TAG_FILENAMES => Payload::Filenames(filenames_body(&mut framer)?),
        TAG_MULTIPART => {
            let (parts, leftover) = multipart::decode_parts(&mut framer)?;
            framer.push_overrun(&leftover);
            framer.skip_to_end()?;
            if !framer.is_finished() {
                return Err(MessageError::TruncatedPayload);
            }
            Payload::Multipart(parts)
        }
        TAG_CUSTOM_RESERVED => internal_payload(&header, &mut framer)?,
        tag => {
            let body = raw_body(&mut framer)?;
            match registry.decode(tag, &body) {
                Some(decoded) => Payload::Custom {
                    tag,
                    body: decoded?,
                },
                None => return Err(MessageError::UnknownTag(tag)),
            }
        }
    };

    trace!(tag = %header.tag, command = %header.command, "read message");
    let message = Message {
        id: header.id,
        command: header.command,
        payload,
    };
    Ok(Some((message, framer.into_overrun())))
}

fn raw_body<R: Read>(framer: &mut DelimitedReader<'_, R>) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    framer.read_to_end(&mut body)?;
    if !framer.is_finished() {
        return Err(MessageError::TruncatedPayload);
    }
    Ok(body)
}

fn utf8_body<R: Read>(framer: &mut DelimitedReader<'_, R>) -> Result<String> {
    String::from_utf8(raw_body(framer)?)
        .map_err(|_| MessageError::InvalidPayload("payload is not valid UTF-8"))
}

fn utf16_body<R: Read>(framer: &mut DelimitedReader<'_, R>) -> Result<String> {
    let body = raw_body(framer)?;
    if body.len() % 2 != 0 {
        return Err(MessageError::InvalidPayload("UTF-16 payload has odd length"));
    }
    let units = body
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));
    char::decode_utf16(units)
        .collect::<std::result::Result<String, _>>()
        .map_err(|_| MessageError::InvalidPayload("payload is not valid UTF-16"))
}

fn filenames_body<R: Read>(framer: &mut DelimitedReader<'_, R>) -> Result<Vec<String>> {
    let text = utf8_body(framer)?;
    Ok(text
        .split('\n')
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.is_empty())
        .map(|line| line.replace('\\', "/"))
        .collect())
}

/// Decode the payload of a reserved `@` message from its command.
fn internal_payload<R: Read>(
    header: &Header,
    framer: &mut DelimitedReader<'_, R>,
) -> Result<Payload> {
    match header.command.as_str() {
        "Ping" => {
            drain(framer)?;
            Ok(Payload::Ping)
        }
        "PingReply" => {
            drain(framer)?;
            Ok(Payload::PingReply)
        }
        command if command.starts_with("ClientMode") => {
            let mut flags = command["ClientMode".len()..].chars();
            let mode = match flags.next() {
                Some('T') => SessionMode::Transaction,
                Some('L') => SessionMode::Listening,
                _ => return Err(MessageError::MalformedInternal(command.to_string())),
            };
            let send_pings = match flags.next() {
                Some('Y') => true,
                Some('N') => false,
                _ => return Err(MessageError::MalformedInternal(command.to_string())),
            };
            let (ping_interval, ping_timeout) = match framer.read_line()? {
                None => (None, None),
                Some(interval_line) => {
                    let timeout_line = framer.read_line()?.ok_or_else(|| {
                        MessageError::MalformedInternal("ClientMode ping schedule incomplete".into())
                    })?;
                    let interval = parse_millis(&interval_line)?;
                    let timeout = parse_millis(&timeout_line)?;
                    (Some(interval), Some(timeout))
                }
            };
            drain(framer)?;
            Ok(Payload::Mode(ModeChange {
                mode,
                send_pings,
                ping_interval,
                ping_timeout,
            }))
        }
        other => Err(MessageError::MalformedInternal(other.to_string())),
    }
}

fn parse_millis(line: &str) -> Result<std::time::Duration> {
    let millis: u64 = line
        .parse()
        .map_err(|_| MessageError::MalformedInternal(format!("bad millisecond value '{line}'")))?;
    Ok(std::time::Duration::from_millis(millis))
}

fn drain<R: Read>(framer: &mut DelimitedReader<'_, R>) -> Result<()> {
    framer.skip_to_end()?;
    if !framer.is_finished() {
        return Err(MessageError::TruncatedPayload);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;

    use crate::multipart::Part;

    use super::*;

    fn roundtrip(message: &Message) -> Message {
        roundtrip_with(message, &MessageRegistry::new())
    }

    fn roundtrip_with(message: &Message, registry: &MessageRegistry) -> Message {
        let mut buf = BytesMut::new();
        encode_message(message, &mut buf);
        let mut cursor = Cursor::new(buf.to_vec());
        let (decoded, overrun) = read_message(&mut cursor, Vec::new(), registry)
            .unwrap()
            .unwrap();
        assert!(overrun.is_empty());
        decoded
    }

    #[test]
    fn text_roundtrip() {
        let msg = Message::text("Test", "abcde").with_id("req-1");
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn empty_text_payload_roundtrip() {
        let msg = Message::text("Poke", "");
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn status_roundtrip() {
        let msg = Message::status(503, "busy").with_id("req-2");
        let decoded = roundtrip(&msg);
        assert_eq!(decoded.status_code(), Some("503"));
        assert_eq!(decoded.status_text(), Some("busy"));
    }

    #[test]
    fn unicode_roundtrip_with_surrogate_pairs() {
        let msg = Message::unicode("Greet", "héllo \u{1F600} wörld");
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn xml_roundtrip() {
        let msg = Message::xml("Config", "<settings>\n  <a>1</a>\n</settings>");
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn binary_roundtrip_with_newlines_and_nuls() {
        let body: Vec<u8> = (0..=255u8).chain([b'\n', b'\r', 0]).collect();
        let msg = Message::binary("Blob", body);
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn binary_payload_ending_in_carriage_return_roundtrips() {
        let msg = Message::binary("Blob", &b"payload ends with cr\r"[..]);
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn filenames_roundtrip_normalizes_separators() {
        let msg = Message::filenames("Fetch", ["dir\\sub\\a.txt", "b.txt"]);
        let decoded = roundtrip(&msg);
        assert_eq!(
            decoded.payload,
            Payload::Filenames(vec!["dir/sub/a.txt".into(), "b.txt".into()])
        );
    }

    #[test]
    fn multipart_roundtrip() {
        let msg = Message::multipart(
            "Files",
            vec![
                Part::file("a.txt", "a.txt", &b"alpha\ncontents"[..]),
                Part::new("b.bin", &b"\x00\x01\x02"[..]),
            ],
        );
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn ping_and_ping_reply_roundtrip() {
        assert_eq!(roundtrip(&Message::ping()), Message::ping());
        assert_eq!(roundtrip(&Message::ping_reply()), Message::ping_reply());
    }

    #[test]
    fn mode_change_roundtrip_with_schedule() {
        let msg = Message::mode_change(ModeChange {
            mode: SessionMode::Listening,
            send_pings: true,
            ping_interval: Some(Duration::from_millis(5000)),
            ping_timeout: Some(Duration::from_millis(15000)),
        });
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn mode_change_roundtrip_without_schedule() {
        let msg = Message::mode_change(ModeChange {
            mode: SessionMode::Transaction,
            send_pings: false,
            ping_interval: None,
            ping_timeout: None,
        });
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn custom_tag_resolves_through_registry() {
        let mut registry = MessageRegistry::new();
        registry
            .register('Z', Arc::new(|body| Ok(Bytes::copy_from_slice(body))))
            .unwrap();
        let msg = Message::custom('Z', "Zap", &b"zzz"[..]).unwrap();
        assert_eq!(roundtrip_with(&msg, &registry), msg);
    }

    #[test]
    fn unknown_tag_is_an_error() {
        let msg = Message::custom('Q', "Quux", &b"q"[..]).unwrap();
        let mut buf = BytesMut::new();
        encode_message(&msg, &mut buf);
        let mut cursor = Cursor::new(buf.to_vec());
        let err = read_message(&mut cursor, Vec::new(), &MessageRegistry::new()).unwrap_err();
        assert!(matches!(err, MessageError::UnknownTag('Q')));
    }

    #[test]
    fn clean_close_reads_as_none() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        let result = read_message(&mut cursor, Vec::new(), &MessageRegistry::new()).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn back_to_back_messages_thread_overrun() {
        let mut buf = BytesMut::new();
        encode_message(&Message::text("First", "1"), &mut buf);
        encode_message(&Message::binary("Second", &b"\x02\x02"[..]), &mut buf);
        encode_message(&Message::text("Third", "3"), &mut buf);

        let mut cursor = Cursor::new(buf.to_vec());
        let registry = MessageRegistry::new();
        let mut overrun = Vec::new();
        let mut commands = Vec::new();
        while let Some((msg, next)) = read_message(&mut cursor, overrun, &registry).unwrap() {
            commands.push(msg.command);
            overrun = next;
        }
        assert_eq!(commands, ["First", "Second", "Third"]);
    }

    #[test]
    fn truncated_frame_is_an_error() {
        let mut buf = BytesMut::new();
        encode_message(&Message::text("Test", "payload"), &mut buf);
        let truncated = buf[..buf.len() - 10].to_vec();
        let mut cursor = Cursor::new(truncated);
        let err = read_message(&mut cursor, Vec::new(), &MessageRegistry::new()).unwrap_err();
        assert!(matches!(err, MessageError::TruncatedPayload));
    }

    #[test]
    fn write_message_emits_one_decodable_frame() {
        let msg = Message::text("Hello", "wire").with_id("abc");
        let mut wire = Vec::new();
        write_message(&mut wire, &msg).unwrap();
        let mut cursor = Cursor::new(wire);
        let (decoded, _) = read_message(&mut cursor, Vec::new(), &MessageRegistry::new())
            .unwrap()
            .unwrap();
        assert_eq!(decoded, msg);
    }
}
