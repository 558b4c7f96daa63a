use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::info;

use wireline_message::Payload;
use wireline_net::{Client, ClientConfig, SessionMode};

use crate::cmd::WatchArgs;
use crate::exit::{net_error, CliResult, SUCCESS};

pub fn run(args: WatchArgs) -> CliResult<i32> {
    let mut config = ClientConfig::new(&args.addr);
    if let Some(cipher) = args.cipher.resolve()? {
        config = config.with_cipher(cipher);
    }
    let client = Client::connect(config).map_err(|err| net_error("connect failed", err))?;

    let received = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&received);
    client.on_unmatched(move |_, msg| {
        match &msg.payload {
            Payload::Text(text) | Payload::Unicode(text) | Payload::Xml(text) => {
                println!("{} {}", msg.command, text);
            }
            Payload::Binary(body) => println!("{} <{} bytes>", msg.command, body.len()),
            other => println!("{} {:?}", msg.command, other),
        }
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    });
    client.on_disconnect(|| info!("server disconnected"));

    client
        .set_mode(SessionMode::Listening)
        .map_err(|err| net_error("mode switch failed", err))?;
    info!(addr = %client.peer_addr(), "watching");

    loop {
        thread::sleep(Duration::from_millis(100));
        if !client.is_open() {
            break;
        }
        if let Some(count) = args.count {
            if received.load(Ordering::Relaxed) >= count {
                break;
            }
        }
    }
    client.close();
    Ok(SUCCESS)
}
