use std::fmt;
use std::io;

use wireline_net::NetError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn net_error(context: &str, err: NetError) -> CliError {
    match err {
        NetError::Io(source) => io_error(context, source),
        NetError::Transport(_) => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
        NetError::PeerClosed => CliError::new(FAILURE, format!("{context}: {err}")),
        NetError::Frame(_) | NetError::Message(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        NetError::Configuration(_) | NetError::Cipher(_) | NetError::ModeViolation { .. } => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}
