use std::thread;
use std::time::Duration;

use tracing::info;

use wireline_message::{Message, Payload};
use wireline_net::{Server, ServerConfig};

use crate::cmd::ServeArgs;
use crate::exit::{net_error, CliResult};

pub fn run(args: ServeArgs) -> CliResult<i32> {
    let mut config = ServerConfig::new(&args.addr);
    if let Some(root) = &args.root {
        config = config.with_file_root(root);
    }
    if let Some(cipher) = args.cipher.resolve()? {
        config = config.with_cipher(cipher);
    }

    let server = Server::bind(config).map_err(|err| net_error("bind failed", err))?;
    if args.echo {
        server.on_unmatched(|_, msg| {
            if let Payload::Text(text) = &msg.payload {
                return Ok(Some(Message::text(msg.command.clone(), text.clone())));
            }
            Ok(None)
        });
    }
    server.on_client_connected(|id, addr| info!(client = id, %addr, "connected"));
    server.on_client_disconnected(|id, addr| info!(client = id, %addr, "disconnected"));
    server.start();
    info!(addr = %server.local_addr(), "serving");

    // No cooperative shutdown from the terminal; run until killed.
    loop {
        thread::sleep(Duration::from_secs(60));
    }
}
