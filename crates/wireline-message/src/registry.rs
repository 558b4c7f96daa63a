use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{MessageError, Result};

/// Built-in text message tag.
pub const TAG_TEXT: char = 'T';
/// Built-in status message tag.
pub const TAG_STATUS: char = 'S';
/// Built-in UTF-16 text message tag.
pub const TAG_UNICODE: char = 'U';
/// Built-in XML message tag.
pub const TAG_XML: char = 'X';
/// Built-in binary message tag.
pub const TAG_BINARY: char = 'B';
/// Built-in filenames message tag.
pub const TAG_FILENAMES: char = 'F';
/// Built-in multipart message tag.
pub const TAG_MULTIPART: char = 'M';
/// Reserved internal tag (`Ping`, `PingReply`, `ClientMode`).
pub const TAG_CUSTOM_RESERVED: char = '@';

/// Tags that can never be overridden by a custom registration.
pub const RESERVED_TAGS: [char; 8] = [
    TAG_TEXT,
    TAG_STATUS,
    TAG_UNICODE,
    TAG_XML,
    TAG_BINARY,
    TAG_FILENAMES,
    TAG_MULTIPART,
    TAG_CUSTOM_RESERVED,
];

/// Decoder for one custom tag: validates and/or transforms the raw frame
/// body into the bytes stored on the `Custom` variant.
pub type CustomDecoder = Arc<dyn Fn(&[u8]) -> Result<Bytes> + Send + Sync>;

/// Maps custom type tags to decoders.
///
/// Owned by whichever session or server uses it and passed by reference —
/// never process-wide state — so independent sessions stay isolated.
#[derive(Clone, Default)]
pub struct MessageRegistry {
    decoders: HashMap<char, CustomDecoder>,
}

impl MessageRegistry {
    /// An empty registry: only built-in tags decode.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a decoder for a custom tag.
    ///
    /// The eight built-in tags are permanently reserved, and tags must be
    /// printable ASCII (they occupy one byte on the tag line).
    pub fn register(&mut self, tag: char, decoder: CustomDecoder) -> Result<()> {
        if RESERVED_TAGS.contains(&tag) {
            return Err(MessageError::ReservedTag(tag));
        }
        if !tag.is_ascii_graphic() {
            return Err(MessageError::UnusableTag(tag));
        }
        self.decoders.insert(tag, decoder);
        Ok(())
    }

    /// Look up and run the decoder for `tag`, if one is registered.
    pub fn decode(&self, tag: char, body: &[u8]) -> Option<Result<Bytes>> {
        self.decoders.get(&tag).map(|decoder| decoder(body))
    }

    /// True if a decoder is registered for `tag`.
    pub fn is_registered(&self, tag: char) -> bool {
        self.decoders.contains_key(&tag)
    }
}

impl std::fmt::Debug for MessageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<&char> = self.decoders.keys().collect();
        tags.sort();
        f.debug_struct("MessageRegistry").field("tags", &tags).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passthrough() -> CustomDecoder {
        Arc::new(|body| Ok(Bytes::copy_from_slice(body)))
    }

    #[test]
    fn registers_and_decodes_custom_tag() {
        let mut registry = MessageRegistry::new();
        registry.register('Z', passthrough()).unwrap();
        assert!(registry.is_registered('Z'));

        let decoded = registry.decode('Z', b"payload").unwrap().unwrap();
        assert_eq!(decoded.as_ref(), b"payload");
    }

    #[test]
    fn unregistered_tag_decodes_to_none() {
        let registry = MessageRegistry::new();
        assert!(registry.decode('Q', b"x").is_none());
    }

    #[test]
    fn reserved_tags_cannot_be_overridden() {
        let mut registry = MessageRegistry::new();
        for tag in RESERVED_TAGS {
            let err = registry.register(tag, passthrough()).unwrap_err();
            assert!(matches!(err, MessageError::ReservedTag(t) if t == tag));
        }
    }

    #[test]
    fn unprintable_tags_are_rejected() {
        let mut registry = MessageRegistry::new();
        let err = registry.register(' ', passthrough()).unwrap_err();
        assert!(matches!(err, MessageError::UnusableTag(' ')));
        let err = registry.register('é', passthrough()).unwrap_err();
        assert!(matches!(err, MessageError::UnusableTag('é')));
    }

    #[test]
    fn decoder_errors_propagate() {
        let mut registry = MessageRegistry::new();
        registry
            .register(
                'V',
                Arc::new(|_| Err(MessageError::InvalidPayload("always invalid"))),
            )
            .unwrap();
        let err = registry.decode('V', b"x").unwrap().unwrap_err();
        assert!(matches!(err, MessageError::InvalidPayload(_)));
    }
}
