// SPDX-License-Identifier: GPL-3.0-or-later
// SPDX-FileCopyrightText: 2026 mds contributors
//
//! Versioned binary marshalling for re-exec state transfer.
//!
//! The format is intentionally host-native (native integer widths, no
//! endianness normalisation) since marshalled state only ever crosses an
//! `execve` on the same machine, never the network or disk. Every
//! structure is prefixed with a version tag; this crate emits and accepts
//! only version `0`.

use std::io::{self, Read, Write};

use crate::client_list::ClientList;
use crate::error::{MdsError, Result};

pub const VERSION: i32 = 0;

pub trait Marshal {
    fn marshal_size(&self) -> usize;
    fn marshal(&self, out: &mut impl Write) -> Result<()>;
}

pub trait Unmarshal: Sized {
    fn unmarshal(input: &mut impl Read) -> Result<Self>;
}

pub(crate) fn write_usize(out: &mut impl Write, v: usize) -> Result<()> {
    out.write_all(&v.to_ne_bytes()).map_err(MdsError::from)
}

pub(crate) fn read_usize(input: &mut impl Read) -> Result<usize> {
    let mut buf = [0u8; std::mem::size_of::<usize>()];
    input.read_exact(&mut buf).map_err(MdsError::from)?;
    Ok(usize::from_ne_bytes(buf))
}

pub(crate) fn write_i32(out: &mut impl Write, v: i32) -> Result<()> {
    out.write_all(&v.to_ne_bytes()).map_err(MdsError::from)
}

pub(crate) fn read_i32(input: &mut impl Read) -> Result<i32> {
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf).map_err(MdsError::from)?;
    Ok(i32::from_ne_bytes(buf))
}

impl Marshal for ClientList {
    fn marshal_size(&self) -> usize {
        ClientList::marshal_size(self)
    }

    fn marshal(&self, out: &mut impl Write) -> Result<()> {
        write_i32(out, VERSION)?;
        write_usize(out, self.capacity())?;
        write_usize(out, self.len())?;
        for client in self.iter() {
            out.write_all(&client.to_ne_bytes()).map_err(MdsError::from)?;
        }
        Ok(())
    }
}

impl Unmarshal for ClientList {
    fn unmarshal(input: &mut impl Read) -> Result<Self> {
        let _version = read_i32(input)?;
        let capacity = read_usize(input)?;
        let size = read_usize(input)?;
        let mut list = ClientList::with_capacity(capacity);
        for _ in 0..size {
            let mut buf = [0u8; 8];
            input.read_exact(&mut buf).map_err(MdsError::from)?;
            list.add(u64::from_ne_bytes(buf))?;
        }
        Ok(list)
    }
}

/// Marshals a `(String, ClientList)` registry entry as
/// `[name NUL-terminated][entry marshal_size][entry bytes]`, matching the
/// original's per-entry layout inside the registry table marshal.
pub fn marshal_entry(name: &str, list: &ClientList, out: &mut impl Write) -> Result<()> {
    out.write_all(name.as_bytes()).map_err(MdsError::from)?;
    out.write_all(&[0]).map_err(MdsError::from)?;
    write_usize(out, list.marshal_size())?;
    list.marshal(out)
}

pub fn unmarshal_entry(input: &mut impl Read) -> Result<(String, ClientList)> {
    let mut name_bytes = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        input.read_exact(&mut byte).map_err(MdsError::from)?;
        if byte[0] == 0 {
            break;
        }
        name_bytes.push(byte[0]);
    }
    let name = String::from_utf8(name_bytes)
        .map_err(|_| MdsError::Malformed("registry entry name not utf8".into()))?;
    let _entry_size = read_usize(input)?;
    let list = ClientList::unmarshal(input)?;
    Ok((name, list))
}

/// Writes a table header `[capacity][size]` ahead of `count` calls to
/// [`marshal_entry`], matching the layout `mds-registry.c`'s
/// `marshal_server` uses for its hash table.
pub fn write_table_header(out: &mut impl Write, capacity: usize, size: usize) -> Result<()> {
    write_usize(out, capacity)?;
    write_usize(out, size)
}

pub fn read_table_header(input: &mut impl Read) -> Result<(usize, usize)> {
    let capacity = read_usize(input)?;
    let size = read_usize(input)?;
    Ok((capacity, size))
}

pub fn io_cursor_error() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "short marshal buffer")
}

/// The whole of a bus process's re-exec state: the registry table, the
/// outgoing message ID counter, the `connected` flag, and the in-flight
/// receive buffer of the connection actively being parsed when the re-exec
/// signal arrived. This is what `BusState::capture` produces and what a
/// freshly exec'd process reconstructs with `BusState::restore`.
pub struct BusState {
    pub connected: bool,
    pub next_message_id: i32,
    pub entries: Vec<(String, ClientList)>,
    pub receive_buffer: crate::message::MessageParser,
}

impl BusState {
    pub fn capture(
        registry: &crate::registry::Registry,
        parser: &crate::message::MessageParser,
        connected: bool,
    ) -> Self {
        BusState {
            connected,
            next_message_id: registry.peek_message_id(),
            entries: registry.snapshot_entries(),
            receive_buffer: parser.clone(),
        }
    }

    pub fn marshal_size(&self) -> usize {
        std::mem::size_of::<i32>()
            + 1
            + std::mem::size_of::<i32>()
            + 2 * std::mem::size_of::<usize>()
            + self
                .entries
                .iter()
                .map(|(name, list)| name.len() + 1 + std::mem::size_of::<usize>() + list.marshal_size())
                .sum::<usize>()
            + self.receive_buffer.marshal_size(true)
    }

    pub fn marshal(&self, out: &mut impl Write) -> Result<()> {
        write_i32(out, VERSION)?;
        out.write_all(&[self.connected as u8]).map_err(MdsError::from)?;
        write_i32(out, self.next_message_id)?;
        write_table_header(out, self.entries.len().next_power_of_two().max(1), self.entries.len())?;
        for (name, list) in &self.entries {
            marshal_entry(name, list, out)?;
        }
        self.receive_buffer.marshal(out, true)
    }

    pub fn unmarshal(input: &mut impl Read) -> Result<Self> {
        let _version = read_i32(input)?;
        let mut connected_byte = [0u8; 1];
        input.read_exact(&mut connected_byte).map_err(MdsError::from)?;
        let connected = connected_byte[0] != 0;

        let next_message_id = read_i32(input)?;
        let (_capacity, size) = read_table_header(input)?;
        let mut entries = Vec::with_capacity(size);
        for _ in 0..size {
            entries.push(unmarshal_entry(input)?);
        }
        let receive_buffer = crate::message::MessageParser::unmarshal(input, true)?;

        Ok(BusState {
            connected,
            next_message_id,
            entries,
            receive_buffer,
        })
    }

    /// Installs this state into a fresh `Registry`, and returns the
    /// receive-buffer `MessageParser` the primary connection should resume
    /// with.
    pub fn restore(self, registry: &crate::registry::Registry) -> crate::message::MessageParser {
        registry.restore_message_id(self.next_message_id);
        registry.restore_entries(self.entries);
        self.receive_buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn client_list_roundtrips() {
        let mut list = ClientList::new();
        list.add(1).unwrap();
        list.add(2).unwrap();
        list.add(3).unwrap();

        let mut buf = Vec::new();
        list.marshal(&mut buf).unwrap();

        let mut cursor = Cursor::new(buf);
        let restored = ClientList::unmarshal(&mut cursor).unwrap();
        assert_eq!(restored.iter().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(restored.capacity(), list.capacity());
    }

    #[test]
    fn registry_entry_roundtrips() {
        let mut list = ClientList::new();
        list.add(9).unwrap();
        let mut buf = Vec::new();
        marshal_entry("focus-window", &list, &mut buf).unwrap();

        let mut cursor = Cursor::new(buf);
        let (name, restored) = unmarshal_entry(&mut cursor).unwrap();
        assert_eq!(name, "focus-window");
        assert_eq!(restored.iter().collect::<Vec<_>>(), vec![9]);
    }
}
