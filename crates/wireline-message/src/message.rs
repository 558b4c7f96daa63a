use std::time::Duration;

use bytes::Bytes;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

use crate::error::{MessageError, Result};
use crate::multipart::Part;
use crate::registry::{RESERVED_TAGS, TAG_BINARY, TAG_CUSTOM_RESERVED, TAG_FILENAMES, TAG_MULTIPART, TAG_STATUS, TAG_TEXT, TAG_UNICODE, TAG_XML};

const ID_LEN: usize = 16;

/// Generate a fresh correlation id.
pub fn generate_id() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_LEN)
        .map(char::from)
        .collect()
}

/// Session interaction discipline, negotiated over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Synchronous one-request/one-reply exchanges.
    Transaction,
    /// Asynchronous pushes dispatched to registered handlers.
    Listening,
}

/// Payload of the reserved `ClientMode` message: the new mode plus the
/// ping schedule the peer should honor while listening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeChange {
    pub mode: SessionMode,
    pub send_pings: bool,
    pub ping_interval: Option<Duration>,
    pub ping_timeout: Option<Duration>,
}

impl ModeChange {
    /// Wire command: `ClientMode` + mode letter + send-pings flag.
    pub fn command(&self) -> String {
        let mode = match self.mode {
            SessionMode::Transaction => 'T',
            SessionMode::Listening => 'L',
        };
        let pings = if self.send_pings { 'Y' } else { 'N' };
        format!("ClientMode{mode}{pings}")
    }
}

/// Variant-specific message payload. The built-in set is closed; custom
/// tags ride the `Custom` variant after registry resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// UTF-8 text.
    Text(String),
    /// Status body text; the status `code text` pair lives in the command.
    Status(String),
    /// Text carried as UTF-16LE on the wire.
    Unicode(String),
    /// An XML document as UTF-8 text.
    Xml(String),
    /// Raw bytes.
    Binary(Bytes),
    /// Relative paths, newline-joined on the wire; separators normalized
    /// to `/` on receipt.
    Filenames(Vec<String>),
    /// Named parts, each delimiter-framed with its own header block.
    Multipart(Vec<Part>),
    /// Application-defined variant resolved through the registry.
    Custom { tag: char, body: Bytes },
    /// Reserved liveness probe.
    Ping,
    /// Reserved liveness probe answer.
    PingReply,
    /// Reserved mode negotiation.
    Mode(ModeChange),
}

/// One protocol message: correlation id, command, and typed payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: Option<String>,
    pub command: String,
    pub payload: Payload,
}

impl Message {
    /// UTF-8 text message.
    pub fn text(command: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: None,
            command: command.into(),
            payload: Payload::Text(text.into()),
        }
    }

    /// Status message; the command becomes `"{code} {text}"`.
    pub fn status(code: impl std::fmt::Display, text: impl Into<String>) -> Self {
        Self {
            id: None,
            command: format!("{code} {}", text.into()),
            payload: Payload::Status(String::new()),
        }
    }

    /// Text message carried as UTF-16 on the wire.
    pub fn unicode(command: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: None,
            command: command.into(),
            payload: Payload::Unicode(text.into()),
        }
    }

    /// XML document message.
    pub fn xml(command: impl Into<String>, document: impl Into<String>) -> Self {
        Self {
            id: None,
            command: command.into(),
            payload: Payload::Xml(document.into()),
        }
    }

    /// Raw binary message.
    pub fn binary(command: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            id: None,
            command: command.into(),
            payload: Payload::Binary(body.into()),
        }
    }

    /// File-request message naming relative paths.
    pub fn filenames(
        command: impl Into<String>,
        names: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            id: None,
            command: command.into(),
            payload: Payload::Filenames(names.into_iter().map(Into::into).collect()),
        }
    }

    /// Multipart message from pre-built parts.
    pub fn multipart(command: impl Into<String>, parts: Vec<Part>) -> Self {
        Self {
            id: None,
            command: command.into(),
            payload: Payload::Multipart(parts),
        }
    }

    /// Custom message under an application-registered tag.
    ///
    /// Reserved tags and non-printable-ASCII tags are rejected.
    pub fn custom(tag: char, command: impl Into<String>, body: impl Into<Bytes>) -> Result<Self> {
        if RESERVED_TAGS.contains(&tag) {
            return Err(MessageError::ReservedTag(tag));
        }
        if !tag.is_ascii_graphic() {
            return Err(MessageError::UnusableTag(tag));
        }
        Ok(Self {
            id: None,
            command: command.into(),
            payload: Payload::Custom {
                tag,
                body: body.into(),
            },
        })
    }

    /// Reserved liveness probe. Internal to the session layer.
    pub fn ping() -> Self {
        Self {
            id: None,
            command: "Ping".into(),
            payload: Payload::Ping,
        }
    }

    /// Reserved liveness probe answer. Internal to the session layer.
    pub fn ping_reply() -> Self {
        Self {
            id: None,
            command: "PingReply".into(),
            payload: Payload::PingReply,
        }
    }

    /// Reserved mode negotiation message. Internal to the session layer.
    pub fn mode_change(change: ModeChange) -> Self {
        Self {
            id: None,
            command: change.command(),
            payload: Payload::Mode(change),
        }
    }

    /// Attach a correlation id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// The wire type tag of this message.
    pub fn tag(&self) -> char {
        match &self.payload {
            Payload::Text(_) => TAG_TEXT,
            Payload::Status(_) => TAG_STATUS,
            Payload::Unicode(_) => TAG_UNICODE,
            Payload::Xml(_) => TAG_XML,
            Payload::Binary(_) => TAG_BINARY,
            Payload::Filenames(_) => TAG_FILENAMES,
            Payload::Multipart(_) => TAG_MULTIPART,
            Payload::Custom { tag, .. } => *tag,
            Payload::Ping | Payload::PingReply | Payload::Mode(_) => TAG_CUSTOM_RESERVED,
        }
    }

    /// True for the reserved internal variants never exposed to handlers.
    pub fn is_internal(&self) -> bool {
        matches!(
            self.payload,
            Payload::Ping | Payload::PingReply | Payload::Mode(_)
        )
    }

    /// Status code: the command up to the first space.
    pub fn status_code(&self) -> Option<&str> {
        match self.payload {
            Payload::Status(_) => Some(
                self.command
                    .split_once(' ')
                    .map_or(self.command.as_str(), |(code, _)| code),
            ),
            _ => None,
        }
    }

    /// Status text: the command after the first space.
    pub fn status_text(&self) -> Option<&str> {
        match self.payload {
            Payload::Status(_) => self.command.split_once(' ').map(|(_, text)| text),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique_and_sized() {
        let a = generate_id();
        let b = generate_id();
        assert_eq!(a.len(), ID_LEN);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn status_splits_on_first_space() {
        let msg = Message::status(404, "file not found");
        assert_eq!(msg.command, "404 file not found");
        assert_eq!(msg.status_code(), Some("404"));
        assert_eq!(msg.status_text(), Some("file not found"));
    }

    #[test]
    fn status_without_text_keeps_code() {
        let msg = Message::status("ERR", "");
        assert_eq!(msg.status_code(), Some("ERR"));
    }

    #[test]
    fn custom_rejects_reserved_tags() {
        for tag in RESERVED_TAGS {
            let err = Message::custom(tag, "X", Bytes::new()).unwrap_err();
            assert!(matches!(err, MessageError::ReservedTag(t) if t == tag));
        }
    }

    #[test]
    fn custom_rejects_unprintable_tags() {
        let err = Message::custom('\n', "X", Bytes::new()).unwrap_err();
        assert!(matches!(err, MessageError::UnusableTag(_)));
    }

    #[test]
    fn mode_change_command_encoding() {
        let listen = ModeChange {
            mode: SessionMode::Listening,
            send_pings: true,
            ping_interval: Some(Duration::from_secs(5)),
            ping_timeout: Some(Duration::from_secs(15)),
        };
        assert_eq!(listen.command(), "ClientModeLY");

        let txn = ModeChange {
            mode: SessionMode::Transaction,
            send_pings: false,
            ping_interval: None,
            ping_timeout: None,
        };
        assert_eq!(txn.command(), "ClientModeTN");
    }

    #[test]
    fn internal_variants_are_flagged() {
        assert!(Message::ping().is_internal());
        assert!(Message::ping_reply().is_internal());
        assert!(!Message::text("Test", "x").is_internal());
    }

    #[test]
    fn tags_match_reserved_set() {
        assert_eq!(Message::text("c", "t").tag(), 'T');
        assert_eq!(Message::status(200, "OK").tag(), 'S');
        assert_eq!(Message::unicode("c", "t").tag(), 'U');
        assert_eq!(Message::xml("c", "<a/>").tag(), 'X');
        assert_eq!(Message::binary("c", Bytes::new()).tag(), 'B');
        assert_eq!(Message::filenames("c", ["a"]).tag(), 'F');
        assert_eq!(Message::multipart("c", Vec::new()).tag(), 'M');
        assert_eq!(Message::ping().tag(), '@');
    }
}
