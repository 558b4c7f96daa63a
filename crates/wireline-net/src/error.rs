use wireline_message::{MessageError, SessionMode};

/// Errors surfaced by client and server sessions.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// Transport-level failure (bind, connect, accept, socket options).
    #[error("transport error: {0}")]
    Transport(#[from] wireline_transport::TransportError),

    /// Frame-level failure while carving the byte stream.
    #[error("frame error: {0}")]
    Frame(#[from] wireline_frame::FrameError),

    /// Message-level failure while encoding or decoding a frame.
    #[error("message error: {0}")]
    Message(MessageError),

    /// Cipher construction failure (bad key length or weak algorithm).
    #[error("cipher error: {0}")]
    Cipher(#[from] wireline_cipher::CipherError),

    /// An operation was invoked in the wrong session mode. Surfaced
    /// synchronously at the call site.
    #[error("operation not permitted in {current:?} mode")]
    ModeViolation { current: SessionMode },

    /// The remote end hung up, distinct from a network fault.
    #[error("peer closed the connection")]
    PeerClosed,

    /// An application-registered handler failed during dispatch.
    #[error("handler failed: {0}")]
    Handler(String),

    /// Invalid session configuration, surfaced synchronously.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Any other I/O fault on the session's socket.
    #[error("session I/O error: {0}")]
    Io(std::io::Error),
}

impl NetError {
    /// Classify an I/O error, mapping hangup shapes to [`NetError::PeerClosed`].
    pub(crate) fn from_io(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe => NetError::PeerClosed,
            _ => NetError::Io(err),
        }
    }
}

impl From<MessageError> for NetError {
    fn from(err: MessageError) -> Self {
        match err {
            MessageError::Io(io) => NetError::from_io(io),
            other => NetError::Message(other),
        }
    }
}

impl From<std::io::Error> for NetError {
    fn from(err: std::io::Error) -> Self {
        NetError::from_io(err)
    }
}

pub type Result<T> = std::result::Result<T, NetError>;
