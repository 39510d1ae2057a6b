//! CLI utilities for wirelink.
//!
//! The utilities present in this module back the interactive `wirelink-probe` tool: each
//! line typed at the prompt is a hex encoded message body to send over the session.
use std::{
    fmt::Write as _,
    io::{BufRead, Write},
};

/// Possible commands from a user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Exit command `.exit`, or end of input.
    Exit,
    /// Message body to send, decoded from hex.
    Send(Vec<u8>),
    /// Blank line.
    Empty,
}

/// Prompt user for a command.
pub fn prompt<R, W>(mut reader: R, mut writer: W) -> Result<Command, String>
where
    R: BufRead,
    W: Write,
{
    let mut s = String::default();
    write!(&mut writer, "> ").map_err(|e| format!("failed to write prompt: {e}"))?;

    let read = reader
        .read_line(&mut s)
        .map_err(|e| format!("failed to read input: {e}"))?;
    if read == 0 {
        return Ok(Command::Exit);
    }

    match s.trim() {
        ".exit" => Ok(Command::Exit),
        "" => Ok(Command::Empty),
        s if s.starts_with('.') => Err(format!("unrecognized command '{}'", s)),
        s => parse_hex(s).map(Command::Send),
    }
}

/// Prompts for the next command while `open` holds.
///
/// A session that closed while the user was typing turns whatever was entered into
/// [`Command::Exit`], so a closed session never brings the prompt back.
pub fn next_command<R, W, F>(reader: R, writer: W, open: F) -> Result<Command, String>
where
    R: BufRead,
    W: Write,
    F: Fn() -> bool,
{
    if !open() {
        return Ok(Command::Exit);
    }
    let command = prompt(reader, writer);
    if !open() {
        return Ok(Command::Exit);
    }
    command
}

/// Decodes a hex string. Whitespace between bytes is ignored.
pub fn parse_hex(input: &str) -> Result<Vec<u8>, String> {
    let digits = input
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<Vec<_>>();
    if digits.len() % 2 != 0 {
        return Err(format!("odd number of hex digits in '{input}'"));
    }

    digits
        .chunks(2)
        .map(|pair| {
            let byte = pair.iter().collect::<String>();
            u8::from_str_radix(&byte, 16).map_err(|_| format!("invalid hex byte '{byte}'"))
        })
        .collect()
}

/// Renders bytes as space separated hex, sixteen bytes per line.
pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, line) in bytes.chunks(16).enumerate() {
        if i > 0 {
            out.push('\n');
        }
        for (j, byte) in line.iter().enumerate() {
            if j > 0 {
                out.push(' ');
            }
            let _ = write!(out, "{byte:02x}");
        }
    }
    out
}
