use wireline_message::{Message, Payload};
use wireline_net::{Client, ClientConfig};

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{net_error, CliError, CliResult, FAILURE, SUCCESS, USAGE};

pub fn run(args: SendArgs) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let mut config = ClientConfig::new(&args.addr).with_connect_timeout(timeout);
    if let Some(cipher) = args.cipher.resolve()? {
        config = config.with_cipher(cipher);
    }
    let client = Client::connect(config).map_err(|err| net_error("connect failed", err))?;

    let message = build_message(&args)?;
    let reply = client
        .transaction(message)
        .map_err(|err| net_error("transaction failed", err))?;
    client.close();

    print_message(&reply);
    match reply.status_code() {
        Some(code) if !code.starts_with('2') => Ok(FAILURE),
        _ => Ok(SUCCESS),
    }
}

fn build_message(args: &SendArgs) -> CliResult<Message> {
    if let Some(files) = &args.files {
        if files.is_empty() {
            return Err(CliError::new(USAGE, "--files needs at least one path"));
        }
        return Ok(Message::filenames(&args.command, files.clone()));
    }
    let text = args.text.clone().unwrap_or_default();
    Ok(Message::text(&args.command, text))
}

fn print_message(message: &Message) {
    match &message.payload {
        Payload::Text(text) | Payload::Unicode(text) | Payload::Xml(text) => {
            println!("{} {}", message.command, text);
        }
        Payload::Status(_) => println!("{}", message.command),
        Payload::Binary(body) => println!("{} <{} bytes>", message.command, body.len()),
        Payload::Filenames(names) => println!("{} {}", message.command, names.join(",")),
        Payload::Multipart(parts) => {
            println!("{} {} parts", message.command, parts.len());
            for part in parts {
                println!("  {} <{} bytes>", part.name, part.body.len());
            }
        }
        Payload::Custom { tag, body } => {
            println!("{} [{}] <{} bytes>", message.command, tag, body.len());
        }
        Payload::Ping | Payload::PingReply | Payload::Mode(_) => {}
    }
}
