use clap::Parser;
use ldap_ber_codec::framing::split_frame;
use ldap_ber_codec::ldap_protocol::parse_message_header;
use ldap_ber_codec::{CodecConfig, ExtensionRegistry, ExtensionResponse, LdapMessage, ProtocolOp, ResolvedResponse};
use bytes::BytesMut;
use std::path::PathBuf;
use tracing::{info, warn};
use anyhow::{Context, Result};

#[derive(Parser)]
#[command(name = "ldap-ber-dump")]
#[command(about = "Decode BER-encoded LDAP messages and resolve extended responses")]
struct Args {
    /// Hex-encoded LDAP message(s); whitespace is ignored
    #[arg(value_name = "HEX", conflicts_with = "file")]
    hex: Option<String>,

    /// Read raw message bytes from a file instead
    #[arg(short, long, value_name = "FILE")]
    file: Option<PathBuf>,

    /// Codec limits (YAML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("ldap_ber_codec={},ldap_ber_dump={},warn", log_level, log_level))
        .with_writer(std::io::stderr)
        .init();

    let config = match args.config {
        Some(ref path) => CodecConfig::from_file(path)?,
        None => CodecConfig::default(),
    };

    let input = match (args.hex, args.file) {
        (_, Some(path)) => std::fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?,
        (Some(text), None) => {
            let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
            hex::decode(compact).context("Input is not valid hex")?
        }
        (None, None) => anyhow::bail!("Provide a hex message or --file"),
    };

    let registry = ExtensionRegistry::with_builtin();
    let mut buffer = BytesMut::from(&input[..]);
    let mut count = 0usize;

    while let Some(frame) = split_frame(&mut buffer, config.max_message_size)? {
        count += 1;
        match LdapMessage::decode_configured(&config, &frame) {
            Ok((message, _)) => dump_message(&registry, &message)?,
            Err(e) => {
                // Still report which request the broken message answered
                let header = parse_message_header(&frame).ok();
                warn!("Message {} failed to decode: {} (header: {:?})", count, e, header);
            }
        }
    }

    if !buffer.is_empty() {
        warn!("{} trailing bytes do not form a complete message", buffer.len());
    }
    info!("Decoded {} message(s)", count);
    Ok(())
}

fn dump_message(registry: &ExtensionRegistry, message: &LdapMessage) -> Result<()> {
    println!("{:#?}", message);
    if let ProtocolOp::ExtendedResponse(ref resp) = message.protocol_op {
        match registry.resolve(resp).context("Extended response value did not decode")? {
            ResolvedResponse::Typed(value) => println!("{} => {:#?}", value.response_name(), value),
            ResolvedResponse::Opaque(Some(bytes)) => println!("opaque response: {}", hex::encode(bytes)),
            ResolvedResponse::Opaque(None) => {}
        }
    }
    Ok(())
}
