// SPDX-License-Identifier: GPL-3.0-or-later
// SPDX-FileCopyrightText: 2026 mds contributors
//
//! The per-connection bus loop: reads framed messages off a client socket,
//! parses the registration sub-protocol, and dispatches into the registry.

use std::io::Write;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::client_id::ClientId;
use crate::error::{MdsError, Result, Severity};
use crate::message::{Message, MessageParser};
use crate::registry::{Notification, Registry};

/// Shared shutdown/re-exec flags, set from signal handlers installed by the
/// binary entry point. Held behind `Arc<AtomicBool>` rather than process
/// globals so the handler and the loop share one source of truth.
#[derive(Clone, Default)]
pub struct ControlFlags {
    pub terminating: Arc<AtomicBool>,
    pub reexecing: Arc<AtomicBool>,
}

impl ControlFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn should_stop(&self) -> bool {
        self.terminating.load(Ordering::SeqCst) || self.reexecing.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Add,
    Remove,
    Wait,
    List,
}

fn parse_action(header: Option<&str>, has_payload: bool) -> Option<Action> {
    match header {
        Some("add") => Some(Action::Add),
        Some("remove") => Some(Action::Remove),
        Some("wait") => Some(Action::Wait),
        Some("list") => Some(Action::List),
        Some(_) => None,
        // Action absent but a payload is present: default to add, per the
        // frozen registration semantics.
        None if has_payload => Some(Action::Add),
        None => None,
    }
}

/// One parsed `register`/`reregister` request.
struct RegisterRequest {
    client: ClientId,
    message_id: u32,
    action: Action,
    commands: Vec<String>,
}

fn parse_register_request(msg: &Message) -> Result<RegisterRequest> {
    let client_text = msg
        .header("Client ID")
        .ok_or_else(|| MdsError::Malformed("missing Client ID header".into()))?;
    if client_text == "0:0" {
        return Err(MdsError::Malformed("Client ID must not be 0:0".into()));
    }
    let client: ClientId = client_text.parse()?;

    let message_id: u32 = msg
        .header("Message ID")
        .ok_or_else(|| MdsError::Malformed("missing Message ID header".into()))?
        .parse()
        .map_err(|_| MdsError::Malformed("Message ID not a number".into()))?;

    let has_payload = !msg.payload.is_empty();
    let action = parse_action(msg.header("Action"), has_payload)
        .ok_or_else(|| MdsError::Malformed("could not determine Action".into()))?;

    if action != Action::List && !has_payload {
        return Err(MdsError::Malformed(
            "empty payload only allowed for list".into(),
        ));
    }

    let commands = String::from_utf8_lossy(&msg.payload)
        .lines()
        .map(str::to_string)
        .filter(|l| !l.is_empty())
        .collect();

    Ok(RegisterRequest {
        client,
        message_id,
        action,
        commands,
    })
}

/// The two fixed messages a freshly accepted display connection receives
/// before any client traffic is dispatched: an `intercept` announcement
/// naming the commands the bus itself reserves, followed by a `reregister`
/// that asks every already-registered client to reannounce itself. Byte-
/// exact, since a client's framing parser expects this exact layout.
pub const INTERCEPT_HANDSHAKE: &str =
    "Command: intercept\nMessage ID: 0\nLength: 32\n\nCommand: register\nClient closed\n";
pub const REREGISTER_HANDSHAKE: &str = "Command: reregister\nMessage ID: 1\n\n";

/// Sends the startup handshake on a newly accepted primary connection.
/// Per the external interface, this happens once, before that
/// connection's first inbound message is read.
pub fn send_startup_handshake(stream: &mut UnixStream) -> Result<()> {
    stream.write_all(INTERCEPT_HANDSHAKE.as_bytes())?;
    stream.write_all(REREGISTER_HANDSHAKE.as_bytes())?;
    Ok(())
}

/// Logs `message` at the `tracing` level matching `severity`.
fn log_at_severity(severity: Severity, message: &str) {
    match severity {
        Severity::Transient => info!(%severity, "{message}"),
        Severity::Logical => warn!(%severity, "{message}"),
        Severity::Catastrophic => error!(%severity, "{message}"),
    }
}

/// Handles one parsed message against the registry, returning any
/// notifications that must be written back to other clients' connections
/// (the bus process fans these out; this function only computes them).
pub fn handle_message(registry: &Registry, msg: &Message) -> Result<Vec<Notification>> {
    let request = parse_register_request(msg)?;
    let mut notifications = Vec::new();

    match request.action {
        Action::Add => {
            for command in &request.commands {
                notifications.extend(registry.add(command, request.client));
            }
        }
        Action::Remove => {
            for command in &request.commands {
                registry.remove(command, request.client);
            }
        }
        Action::Wait => {
            for command in &request.commands {
                if let Some(n) = registry.wait(command, request.client, request.message_id) {
                    notifications.push(n);
                }
            }
        }
        Action::List => {
            let listing = registry.list();
            notifications.push(Notification {
                to: request.client,
                in_response_to: request.message_id,
                message_id: registry.next_message_id() as u32,
                command: listing,
            });
        }
    }

    Ok(notifications)
}

/// Runs the read-dispatch-write loop for one client connection until the
/// peer disconnects, the process is asked to re-exec, or it is asked to
/// terminate.
pub fn run_connection(
    mut stream: UnixStream,
    registry: &Registry,
    flags: &ControlFlags,
) -> Result<()> {
    let mut parser = MessageParser::new();

    loop {
        if flags.should_stop() {
            info!("connection loop observed shutdown flag, exiting");
            return Ok(());
        }

        let msg = match parser.read(&mut stream) {
            Ok(msg) => msg,
            Err(e) if e.is_transient() => {
                info!(error = %e, "transient read error, retrying");
                continue;
            }
            Err(e) if e.is_connection_reset() => {
                info!("connection reset by peer");
                return Ok(());
            }
            Err(MdsError::Malformed(reason)) => {
                // Framing-level malformed input escalates: we cannot
                // recover alignment with the sender's stream, so the
                // connection itself is torn down rather than just the
                // message.
                error!(reason, "malformed framing, dropping connection");
                return Err(MdsError::Malformed(reason));
            }
            Err(e) => {
                log_at_severity(e.severity(), &format!("unrecoverable connection error: {e}"));
                return Err(e);
            }
        };

        match handle_message(registry, &msg) {
            Ok(notifications) => {
                for notification in notifications {
                    let rendered = notification.render();
                    if let Err(e) = stream.write_all(rendered.as_bytes()).map_err(MdsError::from) {
                        log_at_severity(e.severity(), &format!("failed delivering notification: {e}"));
                    }
                }
            }
            Err(e) => {
                // Logical protocol violation: keep the connection alive
                // regardless of severity, per the error-handling design.
                log_at_severity(e.severity(), &format!("rejected malformed registration request: {e}"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    fn msg(headers: &[&str], payload: &str) -> Message {
        Message {
            headers: headers.iter().map(|s| s.to_string()).collect(),
            payload: payload.as_bytes().to_vec(),
        }
    }

    #[test]
    fn defaults_to_add_when_action_absent_but_payload_present() {
        let registry = Registry::new();
        let m = msg(&["Client ID: 1:1", "Message ID: 2"], "open-window");
        handle_message(&registry, &m).unwrap();
        assert_eq!(registry.list(), "open-window");
    }

    #[test]
    fn rejects_zero_zero_client_id() {
        let registry = Registry::new();
        let m = msg(&["Client ID: 0:0", "Message ID: 2", "Action: add"], "x");
        assert!(handle_message(&registry, &m).is_err());
    }

    #[test]
    fn list_action_returns_notification_with_sorted_names() {
        let registry = Registry::new();
        registry.add("b-cmd", ClientId::new(1, 1));
        registry.add("a-cmd", ClientId::new(1, 1));
        let m = msg(&["Client ID: 2:2", "Message ID: 7", "Action: list"], "");
        let notifications = handle_message(&registry, &m).unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].command, "a-cmd\nb-cmd");
    }

    #[test]
    fn wait_action_without_registration_queues_silently() {
        let registry = Registry::new();
        let m = msg(&["Client ID: 3:3", "Message ID: 1", "Action: wait"], "never-seen");
        let notifications = handle_message(&registry, &m).unwrap();
        assert!(notifications.is_empty());
    }
}
