/// Errors that can occur constructing, encoding, or decoding messages.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// Frame-level error from the underlying framer.
    #[error("frame error: {0}")]
    Frame(#[from] wireline_frame::FrameError),

    /// An I/O error occurred while reading or writing a frame.
    #[error("message I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection ended inside the two-line envelope.
    #[error("truncated message header")]
    TruncatedHeader,

    /// The connection ended before the frame's closing delimiter.
    #[error("truncated message payload")]
    TruncatedPayload,

    /// The type tag resolved to neither a built-in nor a registered
    /// custom variant.
    #[error("unknown message type '{0}'")]
    UnknownTag(char),

    /// Attempt to register (or construct a custom message with) a
    /// permanently reserved type tag.
    #[error("type tag '{0}' is reserved")]
    ReservedTag(char),

    /// A custom type tag outside the printable ASCII range.
    #[error("type tag '{0}' is not a printable ASCII character")]
    UnusableTag(char),

    /// The payload bytes do not decode as the variant requires.
    #[error("invalid payload: {0}")]
    InvalidPayload(&'static str),

    /// A reserved internal command could not be parsed.
    #[error("malformed internal message: {0}")]
    MalformedInternal(String),

    /// The multipart body structure is invalid.
    #[error("malformed multipart body: {0}")]
    MalformedMultipart(&'static str),

    /// JSON payload error for the custom JSON message type.
    #[error("json payload error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MessageError>;
