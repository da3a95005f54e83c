//! Concrete seed scenarios exercising the registry, parser, and marshal
//! layers end to end.

use std::io::Cursor;

use mds::client_list::ClientList;
use mds::marshal::{Marshal, Unmarshal};
use mds::message::MessageParser;
use mds::{ClientId, Registry};

#[test]
fn roundtrip_of_empty_client_list() {
    let list = ClientList::with_capacity(0);
    let mut buf = Vec::new();
    list.marshal(&mut buf).unwrap();

    let mut cursor = Cursor::new(buf);
    let restored = ClientList::unmarshal(&mut cursor).unwrap();
    assert_eq!(restored.len(), 0);
    assert_eq!(restored.capacity(), 8);
}

struct TwoPartReader {
    parts: Vec<Vec<u8>>,
}

impl std::io::Read for TwoPartReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.parts.is_empty() {
            return Ok(0);
        }
        let chunk = self.parts.remove(0);
        buf[..chunk.len()].copy_from_slice(&chunk);
        Ok(chunk.len())
    }
}

#[test]
fn parser_handles_a_header_split_across_reads() {
    let mut parser = MessageParser::new();
    let mut reader = TwoPartReader {
        parts: vec![b"Command: reg".to_vec(), b"ister\nLength: 0\n\n".to_vec()],
    };
    let msg = parser.read(&mut reader).unwrap();
    assert_eq!(msg.headers, vec!["Command: register", "Length: 0"]);
    assert!(msg.payload.is_empty());
}

#[test]
fn parser_handles_payload_split_across_reads() {
    let mut parser = MessageParser::new();
    let mut combined = Cursor::new(b"Command: x\nLength: 5\n\nhello".to_vec());
    let msg = parser.read(&mut combined).unwrap();
    assert_eq!(msg.payload, b"hello");
}

#[test]
fn add_then_list_reports_sorted_commands_to_requester() {
    let registry = Registry::new();
    registry.add("draw", ClientId::new(1, 100));
    registry.add("draw", ClientId::new(1, 101));
    registry.add("input", ClientId::new(1, 100));

    let listing = registry.list();
    assert_eq!(listing, "draw\ninput");
}

#[test]
fn close_sweep_removes_only_the_emptied_command() {
    let registry = Registry::new();
    let departing = ClientId::new(1, 100);
    registry.add("draw", departing);
    registry.add("draw", ClientId::new(1, 101));
    registry.add("input", departing);

    registry.remove_client_everywhere(departing);

    assert_eq!(registry.list(), "draw");
}

#[test]
fn marshalled_registry_entry_survives_a_simulated_re_exec() {
    use mds::marshal::{marshal_entry, unmarshal_entry};

    let mut list = ClientList::new();
    list.add(ClientId::new(1, 100).packed()).unwrap();
    list.add(ClientId::new(1, 101).packed()).unwrap();

    let mut buf = Vec::new();
    marshal_entry("draw", &list, &mut buf).unwrap();

    let mut cursor = Cursor::new(buf);
    let (name, restored) = unmarshal_entry(&mut cursor).unwrap();
    assert_eq!(name, "draw");
    assert_eq!(
        restored.iter().collect::<Vec<_>>(),
        list.iter().collect::<Vec<_>>()
    );
}

#[test]
fn bus_state_marshal_survives_a_simulated_re_exec() {
    use mds::marshal::BusState;

    let registry = Registry::new();
    registry.add("draw", ClientId::new(1, 100));
    registry.add("draw", ClientId::new(1, 101));
    registry.add("input", ClientId::new(1, 100));
    // Burn a few message IDs so the counter isn't trivially at its default.
    registry.next_message_id();
    registry.next_message_id();

    let parser = MessageParser::new();
    let state = BusState::capture(&registry, &parser, true);

    let mut buf = Vec::new();
    state.marshal(&mut buf).unwrap();

    let mut cursor = Cursor::new(buf);
    let restored_state = BusState::unmarshal(&mut cursor).unwrap();

    let fresh_registry = Registry::new();
    restored_state.restore(&fresh_registry);

    assert_eq!(fresh_registry.list(), registry.list());
    assert_eq!(fresh_registry.next_message_id(), registry.next_message_id());
}
