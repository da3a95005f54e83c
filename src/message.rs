// SPDX-License-Identifier: GPL-3.0-or-later
// SPDX-FileCopyrightText: 2026 mds contributors
//
//! Message framing: a header block of `Name: value\n` lines terminated by a
//! blank line, optionally followed by a `Length`-prefixed binary payload.

use std::io::{Read, Write};

use crate::error::{MdsError, Result};
use crate::marshal::{read_i32, read_usize, write_i32, write_usize, VERSION};

/// One parsed message: verbatim header lines plus an optional payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub headers: Vec<String>,
    pub payload: Vec<u8>,
}

impl Message {
    /// Returns the value of the first header named `name`, using the
    /// first-colon-as-separator rule: everything after the first `": "`
    /// is the value verbatim, including any further colons.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find_map(|line| {
            let (key, value) = split_header(line)?;
            (key == name).then_some(value)
        })
    }
}

/// Splits a single header line into `(name, value)` on the first `": "`.
/// Returns `None` if the line has no colon at all.
pub fn split_header(line: &str) -> Option<(&str, &str)> {
    let idx = line.find(':')?;
    let (name, rest) = line.split_at(idx);
    let value = rest[1..].strip_prefix(' ').unwrap_or(&rest[1..]);
    Some((name, value))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Headers,
    Payload,
}

/// Incremental reader for the header-block-then-payload framing, mirroring
/// the original's `mds_message_t` read state machine so a message can be
/// read across multiple partial `read()` calls without losing already-
/// buffered bytes.
#[derive(Clone)]
pub struct MessageParser {
    stage: Stage,
    buffer: Vec<u8>,
    headers: Vec<String>,
    payload: Vec<u8>,
    payload_size: usize,
}

impl Default for MessageParser {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageParser {
    pub fn new() -> Self {
        MessageParser {
            stage: Stage::Headers,
            buffer: Vec::new(),
            headers: Vec::new(),
            payload: Vec::new(),
            payload_size: 0,
        }
    }

    /// Reads one complete message from `source`, blocking across multiple
    /// reads as needed. Returns `Err(MdsError::Malformed(_))` for framing
    /// that can never become a valid message (the "-2, errno not set" case
    /// in the original); returns `Err(MdsError::Interrupted)` on `EINTR`,
    /// which the caller should retry; returns `Err(MdsError::Io(_))` for
    /// any other read failure, including a reset connection.
    pub fn read(&mut self, source: &mut impl Read) -> Result<Message> {
        loop {
            match self.stage {
                Stage::Headers => {
                    if let Some(pos) = find_double_newline(&self.buffer) {
                        let header_block = self.buffer.drain(..pos).collect::<Vec<u8>>();
                        self.buffer.drain(..2);
                        let text = String::from_utf8(header_block)
                            .map_err(|_| MdsError::Malformed("headers not utf8".into()))?;
                        if !text.is_empty() {
                            self.headers = text.lines().map(|l| l.to_string()).collect();
                        }
                        self.payload_size = match self
                            .headers
                            .iter()
                            .filter_map(|l| split_header(l))
                            .find(|(k, _)| *k == "Length")
                            .map(|(_, v)| v)
                        {
                            Some(v) => v
                                .parse()
                                .map_err(|_| MdsError::Malformed(format!("bad Length: {v:?}")))?,
                            None => 0,
                        };
                        self.stage = Stage::Payload;
                        continue;
                    }
                    self.fill(source)?;
                }
                Stage::Payload => {
                    if self.buffer.len() >= self.payload_size {
                        self.payload = self.buffer.drain(..self.payload_size).collect();
                        let message = Message {
                            headers: std::mem::take(&mut self.headers),
                            payload: std::mem::take(&mut self.payload),
                        };
                        self.stage = Stage::Headers;
                        return Ok(message);
                    }
                    self.fill(source)?;
                }
            }
        }
    }

    /// Size in bytes of [`MessageParser::marshal`] with the same
    /// `include_buffer` flag.
    pub fn marshal_size(&self, include_buffer: bool) -> usize {
        let mut size = std::mem::size_of::<i32>()
            + 1
            + std::mem::size_of::<usize>()
            + self
                .headers
                .iter()
                .map(|h| std::mem::size_of::<usize>() + h.len())
                .sum::<usize>()
            + std::mem::size_of::<usize>()
            + std::mem::size_of::<usize>()
            + self.payload.len();
        if include_buffer {
            size += std::mem::size_of::<usize>() + self.buffer.len();
        }
        size
    }

    /// Marshals the parser's in-progress state: partially read headers,
    /// the declared payload size, any payload bytes already consumed, and
    /// — when `include_buffer` is set — the raw unconsumed read buffer, so
    /// a freshly `exec`'d process can resume exactly where this one left
    /// off. `include_buffer` is false when a message is only being
    /// recorded (not resumed), matching the wire-transmission case.
    pub fn marshal(&self, out: &mut impl Write, include_buffer: bool) -> Result<()> {
        write_i32(out, VERSION)?;
        let stage_tag: u8 = match self.stage {
            Stage::Headers => 0,
            Stage::Payload => 1,
        };
        out.write_all(&[stage_tag]).map_err(MdsError::from)?;
        write_usize(out, self.headers.len())?;
        for header in &self.headers {
            write_usize(out, header.len())?;
            out.write_all(header.as_bytes()).map_err(MdsError::from)?;
        }
        write_usize(out, self.payload_size)?;
        write_usize(out, self.payload.len())?;
        out.write_all(&self.payload).map_err(MdsError::from)?;
        if include_buffer {
            write_usize(out, self.buffer.len())?;
            out.write_all(&self.buffer).map_err(MdsError::from)?;
        }
        Ok(())
    }

    pub fn unmarshal(input: &mut impl Read, include_buffer: bool) -> Result<Self> {
        let _version = read_i32(input)?;
        let mut tag = [0u8; 1];
        input.read_exact(&mut tag).map_err(MdsError::from)?;
        let stage = match tag[0] {
            1 => Stage::Payload,
            _ => Stage::Headers,
        };

        let header_count = read_usize(input)?;
        let mut headers = Vec::with_capacity(header_count);
        for _ in 0..header_count {
            let len = read_usize(input)?;
            let mut bytes = vec![0u8; len];
            input.read_exact(&mut bytes).map_err(MdsError::from)?;
            headers.push(String::from_utf8(bytes).map_err(|_| MdsError::Malformed("header not utf8".into()))?);
        }

        let payload_size = read_usize(input)?;
        let payload_len = read_usize(input)?;
        let mut payload = vec![0u8; payload_len];
        input.read_exact(&mut payload).map_err(MdsError::from)?;

        let buffer = if include_buffer {
            let buffer_len = read_usize(input)?;
            let mut buffer = vec![0u8; buffer_len];
            input.read_exact(&mut buffer).map_err(MdsError::from)?;
            buffer
        } else {
            Vec::new()
        };

        Ok(MessageParser {
            stage,
            buffer,
            headers,
            payload,
            payload_size,
        })
    }

    fn fill(&mut self, source: &mut impl Read) -> Result<()> {
        let mut chunk = [0u8; 4096];
        match source.read(&mut chunk) {
            Ok(0) => Err(MdsError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "peer closed connection",
            ))),
            Ok(n) => {
                self.buffer.extend_from_slice(&chunk[..n]);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => Err(MdsError::Interrupted),
            Err(e) => Err(MdsError::Io(e)),
        }
    }
}

fn find_double_newline(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_headers_only_message() {
        let mut cursor = Cursor::new(b"Command: list\nMessage ID: 3\n\n".to_vec());
        let mut parser = MessageParser::new();
        let msg = parser.read(&mut cursor).unwrap();
        assert_eq!(msg.headers, vec!["Command: list", "Message ID: 3"]);
        assert!(msg.payload.is_empty());
    }

    #[test]
    fn parses_message_with_payload() {
        let mut cursor = Cursor::new(b"Command: register\nLength: 5\n\nhello".to_vec());
        let mut parser = MessageParser::new();
        let msg = parser.read(&mut cursor).unwrap();
        assert_eq!(msg.payload, b"hello");
    }

    #[test]
    fn header_lookup_handles_embedded_colon() {
        let msg = Message {
            headers: vec!["To: 2:7".to_string()],
            payload: Vec::new(),
        };
        assert_eq!(msg.header("To"), Some("2:7"));
    }

    #[test]
    fn reads_two_messages_back_to_back_from_one_stream() {
        let mut cursor = Cursor::new(b"Command: a\n\nCommand: b\n\n".to_vec());
        let mut parser = MessageParser::new();
        let first = parser.read(&mut cursor).unwrap();
        let second = parser.read(&mut cursor).unwrap();
        assert_eq!(first.headers, vec!["Command: a"]);
        assert_eq!(second.headers, vec!["Command: b"]);
    }

    #[test]
    fn parser_marshal_roundtrips_mid_parse_state() {
        let mut parser = MessageParser::new();
        let mut cursor = Cursor::new(b"Command: x\nLength: 10\n\nhel".to_vec());
        // Not enough payload bytes yet: read() blocks internally on EOF.
        let err = parser.read(&mut cursor).unwrap_err();
        assert!(err.is_connection_reset());

        let mut buf = Vec::new();
        parser.marshal(&mut buf, true).unwrap();
        let mut restored = MessageParser::unmarshal(&mut Cursor::new(buf), true).unwrap();
        assert_eq!(restored.payload_size, 10);
        assert_eq!(restored.buffer, b"hel");

        let mut rest = Cursor::new(b"lo world!!".to_vec());
        let msg = restored.read(&mut rest).unwrap();
        assert_eq!(msg.payload, b"hello world!!"[..10].to_vec());
    }

    #[test]
    fn peer_close_mid_message_is_connection_reset() {
        let mut cursor = Cursor::new(b"Command: a".to_vec());
        let mut parser = MessageParser::new();
        let err = parser.read(&mut cursor).unwrap_err();
        assert!(err.is_connection_reset());
    }
}
