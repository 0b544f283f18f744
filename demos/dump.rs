//! Decodes AMF3 bytes and prints the resulting value.
//!
//! Bytes come either from a file argument or from a hex string:
//!
//! ```text
//! cargo run --example dump -- payload.bin
//! cargo run --example dump -- --hex 0a0b01036b06037601
//! ```
//!
//! Set `RUST_LOG=amf3=trace` to see the codec's trace events.

use std::{env, fs, process};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let data = match args.as_slice() {
        [path] => fs::read(path).unwrap_or_else(|e| {
            eprintln!("cannot read {}: {}", path, e);
            process::exit(1);
        }),
        [flag, hex] if flag == "--hex" => parse_hex(hex).unwrap_or_else(|| {
            eprintln!("invalid hex string");
            process::exit(1);
        }),
        _ => {
            eprintln!("usage: dump <file> | dump --hex <bytes>");
            process::exit(2);
        }
    };

    match amf3::decode(&data) {
        Ok((value, consumed)) => {
            println!("{:#?}", value);
            println!("-- {} of {} bytes consumed", consumed, data.len());
        }
        Err(e) => {
            eprintln!("decode failed: {}", e);
            process::exit(1);
        }
    }
}

fn parse_hex(s: &str) -> Option<Vec<u8>> {
    let digits: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.len() % 2 != 0 {
        return None;
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&digits[i..i + 2], 16).ok())
        .collect()
}
