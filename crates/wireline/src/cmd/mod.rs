use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};

use wireline_cipher::CipherAlgorithm;
use wireline_net::CipherConfig;

use crate::exit::{CliError, CliResult, USAGE};

pub mod send;
pub mod serve;
pub mod watch;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a server, optionally serving files from a root directory.
    Serve(ServeArgs),
    /// Send one message as a transaction and print the reply.
    Send(SendArgs),
    /// Switch to listening mode and print pushed messages.
    Watch(WatchArgs),
}

pub fn run(command: Command) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args),
        Command::Send(args) => send::run(args),
        Command::Watch(args) => watch::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to bind, e.g. 127.0.0.1:9300.
    pub addr: String,
    /// Serve files under this directory for Filenames requests.
    #[arg(long, value_name = "DIR")]
    pub root: Option<PathBuf>,
    /// Echo back any text message whose command has no handler.
    #[arg(long)]
    pub echo: bool,
    #[command(flatten)]
    pub cipher: CipherArgs,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Server address to connect to.
    pub addr: String,
    /// Message command verb.
    #[arg(long, short = 'c', default_value = "Test")]
    pub command: String,
    /// Text payload.
    #[arg(long, conflicts_with = "files")]
    pub text: Option<String>,
    /// Request these files instead of sending text.
    #[arg(long, value_delimiter = ',', conflicts_with = "text")]
    pub files: Option<Vec<String>>,
    /// Connect timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    #[command(flatten)]
    pub cipher: CipherArgs,
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Server address to connect to.
    pub addr: String,
    /// Exit after receiving N pushes.
    #[arg(long)]
    pub count: Option<usize>,
    #[command(flatten)]
    pub cipher: CipherArgs,
}

#[derive(Args, Debug)]
pub struct CipherArgs {
    /// Hex-encoded shared key; enables encryption.
    #[arg(long, value_name = "HEX")]
    pub key_hex: Option<String>,
    /// Keystream hash algorithm.
    #[arg(long, default_value = "sha256", value_name = "ALGO")]
    pub algorithm: String,
}

impl CipherArgs {
    pub fn resolve(&self) -> CliResult<Option<CipherConfig>> {
        let Some(key_hex) = &self.key_hex else {
            return Ok(None);
        };
        let algorithm = CipherAlgorithm::parse(&self.algorithm)
            .ok_or_else(|| CliError::new(USAGE, format!("unknown algorithm: {}", self.algorithm)))?;
        let key = decode_hex(key_hex)
            .ok_or_else(|| CliError::new(USAGE, "--key-hex is not valid hex"))?;
        Ok(Some(CipherConfig { algorithm, key }))
    }
}

fn decode_hex(input: &str) -> Option<Vec<u8>> {
    let input = input.trim();
    if input.len() % 2 != 0 {
        return None;
    }
    input
        .as_bytes()
        .chunks_exact(2)
        .map(|pair| {
            let hi = (pair[0] as char).to_digit(16)?;
            let lo = (pair[1] as char).to_digit(16)?;
            Some((hi * 16 + lo) as u8)
        })
        .collect()
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}
