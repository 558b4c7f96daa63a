/// Errors that can occur while framing a stream.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// An I/O error occurred on the underlying stream.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended before a delimiter line could be read.
    #[error("stream ended before a delimiter line")]
    MissingDelimiter,

    /// A header line exceeded the allowed bound.
    #[error("line exceeds {max} bytes")]
    LineTooLong { max: usize },

    /// A header line contained bytes that are not valid UTF-8.
    #[error("line is not valid UTF-8")]
    NonUtf8Line,
}

pub type Result<T> = std::result::Result<T, FrameError>;
