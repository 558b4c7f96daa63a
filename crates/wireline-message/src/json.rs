//! JSON messages under the custom tag `J`.
//!
//! A worked example of the custom-tag mechanism: the decoder validates
//! that the body parses as JSON before the message reaches any handler,
//! and the helpers here convert between [`serde_json::Value`] and the
//! `Custom` payload.

use std::sync::Arc;

use bytes::Bytes;

use crate::error::{MessageError, Result};
use crate::message::{Message, Payload};
use crate::registry::{CustomDecoder, MessageRegistry};

/// Tag used for JSON messages.
pub const JSON_TAG: char = 'J';

/// Decoder that rejects bodies which are not well-formed JSON.
pub fn decoder() -> CustomDecoder {
    Arc::new(|body| {
        serde_json::from_slice::<serde_json::Value>(body)?;
        Ok(Bytes::copy_from_slice(body))
    })
}

/// Register the JSON decoder under [`JSON_TAG`].
pub fn register(registry: &mut MessageRegistry) -> Result<()> {
    registry.register(JSON_TAG, decoder())
}

/// Build a JSON message from a serializable value.
pub fn message(command: impl Into<String>, value: &impl serde::Serialize) -> Result<Message> {
    let body = serde_json::to_vec(value)?;
    Message::custom(JSON_TAG, command, body)
}

/// Extract the JSON value from a received JSON message.
pub fn value(message: &Message) -> Result<serde_json::Value> {
    match &message.payload {
        Payload::Custom { tag, body } if *tag == JSON_TAG => Ok(serde_json::from_slice(body)?),
        _ => Err(MessageError::InvalidPayload("message is not a JSON message")),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::BytesMut;
    use serde_json::json;

    use crate::codec::{encode_message, read_message};

    use super::*;

    #[test]
    fn json_message_roundtrips_through_the_registry() {
        let mut registry = MessageRegistry::new();
        register(&mut registry).unwrap();

        let sent = message("UpdateConfig", &json!({"retries": 3, "verbose": true})).unwrap();
        let mut buf = BytesMut::new();
        encode_message(&sent, &mut buf);

        let mut cursor = Cursor::new(buf.to_vec());
        let (received, _) = read_message(&mut cursor, Vec::new(), &registry)
            .unwrap()
            .unwrap();
        assert_eq!(received.command, "UpdateConfig");
        assert_eq!(value(&received).unwrap(), json!({"retries": 3, "verbose": true}));
    }

    #[test]
    fn malformed_json_is_rejected_at_decode() {
        let mut registry = MessageRegistry::new();
        register(&mut registry).unwrap();

        let sent = Message::custom(JSON_TAG, "Bad", &b"{not json"[..]).unwrap();
        let mut buf = BytesMut::new();
        encode_message(&sent, &mut buf);

        let mut cursor = Cursor::new(buf.to_vec());
        let err = read_message(&mut cursor, Vec::new(), &registry).unwrap_err();
        assert!(matches!(err, MessageError::Json(_)));
    }

    #[test]
    fn value_rejects_non_json_messages() {
        let err = value(&Message::text("Test", "x")).unwrap_err();
        assert!(matches!(err, MessageError::InvalidPayload(_)));
    }
}
