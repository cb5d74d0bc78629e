//! Small flag/env/hex helpers for the scenario driver binaries.

use std::env;
use std::error::Error;

pub type CliResult<T> = Result<T, Box<dyn Error>>;

pub fn env_truthy(name: &str) -> bool {
    match env::var(name) {
        Ok(value) => {
            let normalized = value.trim().to_ascii_lowercase();
            matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
        }
        Err(_) => false,
    }
}

pub fn parse_flag_value(args: &[String], flag: &str) -> Option<String> {
    let key_eq = format!("{flag}=");
    let mut idx = 0usize;
    while idx < args.len() {
        if args[idx] == flag {
            if idx + 1 < args.len() {
                return Some(args[idx + 1].clone());
            }
            return None;
        }
        if let Some(raw) = args[idx].strip_prefix(&key_eq) {
            return Some(raw.to_string());
        }
        idx += 1;
    }
    None
}

pub fn parse_u64(value: &str, name: &str) -> CliResult<u64> {
    value
        .parse::<u64>()
        .map_err(|_| format!("Invalid {name}: {value}").into())
}

fn hex_nibble(value: u8) -> CliResult<u8> {
    match value {
        b'0'..=b'9' => Ok(value - b'0'),
        b'a'..=b'f' => Ok(10 + value - b'a'),
        b'A'..=b'F' => Ok(10 + value - b'A'),
        _ => Err(format!("invalid hex character: {}", value as char).into()),
    }
}

pub fn strip_0x(value: &str) -> &str {
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}

pub fn decode_hex(value: &str) -> CliResult<Vec<u8>> {
    let raw = strip_0x(value.trim());
    if raw.len() % 2 != 0 {
        return Err(format!("hex length must be even: {value}").into());
    }

    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len() / 2);
    let mut i = 0usize;
    while i < bytes.len() {
        let hi = hex_nibble(bytes[i])?;
        let lo = hex_nibble(bytes[i + 1])?;
        out.push((hi << 4) | lo);
        i += 2;
    }
    Ok(out)
}

pub fn parse_fixed_bytes<const N: usize>(value: &str) -> CliResult<[u8; N]> {
    let decoded = decode_hex(value)?;
    if decoded.len() != N {
        return Err(format!("expected {N} bytes, got {}", decoded.len()).into());
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&decoded);
    Ok(out)
}

pub fn parse_bytes32(value: &str) -> CliResult<[u8; 32]> {
    parse_fixed_bytes::<32>(value)
}
