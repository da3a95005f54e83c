// SPDX-License-Identifier: GPL-3.0-or-later
// SPDX-FileCopyrightText: 2026 mds contributors
//
//! The command registry: a mutex-and-condvar-guarded table mapping command
//! names to client multisets, plus the wait-queue machinery backing the
//! `wait` action.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Condvar, Mutex};

use tracing::{info, warn};

use crate::client_id::ClientId;
use crate::client_list::ClientList;
use crate::hash_map::{OpenHashMap, PutOutcome};
use crate::indexed_list::IndexedList;

/// A notification the bus loop must deliver to a waiting client, frozen in
/// the format documented in the design notes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub to: ClientId,
    pub in_response_to: u32,
    pub message_id: u32,
    pub command: String,
}

impl Notification {
    pub fn render(&self) -> String {
        let body = format!("{}\n", self.command);
        format!(
            "To: {}\nIn response to: {}\nMessage ID: {}\nLength: {}\n\n{}",
            self.to,
            self.in_response_to,
            self.message_id,
            body.len(),
            body
        )
    }
}

#[derive(Debug, Default)]
pub struct WaitQueue {
    waiters: IndexedList<(ClientId, u32)>,
}

impl WaitQueue {
    fn push(&mut self, client: ClientId, message_id: u32) {
        self.waiters.push_back((client, message_id));
    }

    fn drain(&mut self) -> Vec<(ClientId, u32)> {
        let values: Vec<_> = self.waiters.iter().map(|(_, v)| *v).collect();
        self.waiters = IndexedList::new();
        values
    }

    fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}

pub struct RegistryTable {
    commands: OpenHashMap<String, ClientList>,
    waiters: HashMap<String, WaitQueue>,
}

impl RegistryTable {
    fn new() -> Self {
        RegistryTable {
            commands: OpenHashMap::with_capacity(32),
            waiters: HashMap::new(),
        }
    }
}

/// The shared registry state. Mirrors `reg_table` + `reg_mutex` + `reg_cond`
/// from the original, but with the mutation lock and condition variable
/// paired by `std::sync::{Mutex, Condvar}` instead of raw `pthread_*` calls.
pub struct Registry {
    table: Mutex<RegistryTable>,
    changed: Condvar,
    next_message_id: AtomicI32,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            table: Mutex::new(RegistryTable::new()),
            changed: Condvar::new(),
            // The handshake consumes message IDs 0 and 1; live traffic
            // starts at 2, per the original's initial state.
            next_message_id: AtomicI32::new(2),
        }
    }

    /// Allocates the next outgoing message ID, wrapping `i32::MAX` back to
    /// `0` exactly as the original's counter does.
    pub fn next_message_id(&self) -> i32 {
        loop {
            let current = self.next_message_id.load(Ordering::SeqCst);
            let next = if current == i32::MAX { 0 } else { current + 1 };
            if self
                .next_message_id
                .compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return current;
            }
        }
    }

    /// Reads the next message ID that would be allocated, without
    /// consuming it. Used when marshalling state for re-exec.
    pub fn peek_message_id(&self) -> i32 {
        self.next_message_id.load(Ordering::SeqCst)
    }

    /// Overwrites the next message ID counter. Used when restoring state
    /// after a re-exec.
    pub fn restore_message_id(&self, value: i32) {
        self.next_message_id.store(value, Ordering::SeqCst);
    }

    /// Snapshots every `(command, client list)` entry for marshalling.
    /// Pending waiters are not part of the snapshot: a re-exec'd process
    /// restarts with empty wait queues and relies on its peers, per the
    /// handshake, to reannounce themselves.
    pub fn snapshot_entries(&self) -> Vec<(String, ClientList)> {
        let table = self.table.lock().expect("registry mutex poisoned");
        table
            .commands
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Replaces the command table wholesale with `entries`, used right
    /// after unmarshalling state from a previous process image.
    pub fn restore_entries(&self, entries: Vec<(String, ClientList)>) {
        let mut table = self.table.lock().expect("registry mutex poisoned");
        table.commands = OpenHashMap::with_capacity(32);
        for (name, list) in entries {
            table.commands.put(name, list);
        }
    }

    /// Registers `client` under `command`, returning any notifications that
    /// should now be delivered to clients that were waiting on it.
    pub fn add(&self, command: &str, client: ClientId) -> Vec<Notification> {
        let mut table = self.table.lock().expect("registry mutex poisoned");
        let was_empty = table
            .commands
            .get(&command.to_string())
            .map(ClientList::is_empty)
            .unwrap_or(true);

        match table.commands.get_mut(&command.to_string()) {
            Some(list) => {
                list.add(client.packed()).expect("client list allocation");
            }
            None => {
                let mut list = ClientList::new();
                list.add(client.packed()).expect("client list allocation");
                table.commands.put(command.to_string(), list);
            }
        }

        let notifications = if was_empty {
            self.drain_waiters_locked(&mut table, command)
        } else {
            Vec::new()
        };
        self.changed.notify_all();
        info!(command, client = %client, "registered command");
        notifications
    }

    pub fn remove(&self, command: &str, client: ClientId) {
        let mut table = self.table.lock().expect("registry mutex poisoned");
        if let Some(list) = table.commands.get_mut(&command.to_string()) {
            list.remove(client.packed());
            if list.is_empty() {
                table.commands.remove(&command.to_string());
            }
        }
        self.changed.notify_all();
        info!(command, client = %client, "unregistered command");
    }

    /// Removes `client` from every command it is registered under. Uses
    /// the collect-then-delete pattern: the first pass only reads while
    /// scanning, the second pass performs the actual removals, so no
    /// command list is mutated mid-iteration.
    pub fn remove_client_everywhere(&self, client: ClientId) {
        let mut table = self.table.lock().expect("registry mutex poisoned");
        let affected = table.commands.keys_matching(|_, list| list.contains(client.packed()));

        let mut emptied = Vec::new();
        for command in &affected {
            if let Some(list) = table.commands.get_mut(command) {
                list.remove(client.packed());
                if list.is_empty() {
                    emptied.push(command.clone());
                }
            }
        }
        for command in emptied {
            table.commands.remove(&command);
        }
        self.changed.notify_all();
        info!(client = %client, "removed client from registry");
    }

    /// Records that `client` is waiting for `command` to gain a
    /// registrant. If it already has one, returns a notification
    /// immediately; otherwise the wait is queued and the bus loop should
    /// block until a matching [`Registry::add`] call drains it.
    pub fn wait(&self, command: &str, client: ClientId, message_id: u32) -> Option<Notification> {
        let mut table = self.table.lock().expect("registry mutex poisoned");
        let already_registered = table
            .commands
            .get(&command.to_string())
            .map(|l| !l.is_empty())
            .unwrap_or(false);

        if already_registered {
            return Some(Notification {
                to: client,
                in_response_to: message_id,
                message_id: self.next_message_id() as u32,
                command: command.to_string(),
            });
        }

        table
            .waiters
            .entry(command.to_string())
            .or_default()
            .push(client, message_id);
        None
    }

    fn drain_waiters_locked(&self, table: &mut RegistryTable, command: &str) -> Vec<Notification> {
        let Some(queue) = table.waiters.get_mut(command) else {
            return Vec::new();
        };
        if queue.is_empty() {
            return Vec::new();
        }
        let waiting = queue.drain();
        table.waiters.remove(command);
        waiting
            .into_iter()
            .map(|(client, message_id)| Notification {
                to: client,
                in_response_to: message_id,
                message_id: self.next_message_id() as u32,
                command: command.to_string(),
            })
            .collect()
    }

    /// Returns a newline-joined list of all currently registered command
    /// names, matching `list_registry`'s output shape.
    pub fn list(&self) -> String {
        let table = self.table.lock().expect("registry mutex poisoned");
        let mut names: Vec<&str> = table.commands.keys().map(String::as_str).collect();
        names.sort_unstable();
        names.join("\n")
    }

    /// Blocks the calling thread until the registry changes (an `add`,
    /// `remove`, or client departure), or until `should_stop` returns true
    /// on a spurious wakeup — used so a shutdown broadcast reliably drains
    /// any thread parked here.
    pub fn wait_for_change(&self, should_stop: impl Fn() -> bool) {
        let table = self.table.lock().expect("registry mutex poisoned");
        let _table = self
            .changed
            .wait_while(table, |_| !should_stop())
            .expect("registry mutex poisoned");
        warn!("registry wait woke up");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_list_reports_command() {
        let reg = Registry::new();
        reg.add("open", ClientId::new(1, 1));
        assert_eq!(reg.list(), "open");
    }

    #[test]
    fn remove_drops_command_when_list_empties() {
        let reg = Registry::new();
        let client = ClientId::new(1, 1);
        reg.add("open", client);
        reg.remove("open", client);
        assert_eq!(reg.list(), "");
    }

    #[test]
    fn wait_then_add_notifies() {
        let reg = Registry::new();
        let waiter = ClientId::new(2, 2);
        assert!(reg.wait("focus", waiter, 5).is_none());

        let notifications = reg.add("focus", ClientId::new(3, 3));
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].to, waiter);
        assert_eq!(notifications[0].in_response_to, 5);
        assert_eq!(notifications[0].command, "focus");
    }

    #[test]
    fn wait_on_already_registered_command_resolves_immediately() {
        let reg = Registry::new();
        reg.add("focus", ClientId::new(1, 1));
        let notification = reg.wait("focus", ClientId::new(2, 2), 9);
        assert!(notification.is_some());
    }

    #[test]
    fn remove_client_everywhere_uses_two_pass_cleanup() {
        let reg = Registry::new();
        let client = ClientId::new(4, 4);
        reg.add("a", client);
        reg.add("b", client);
        reg.add("b", ClientId::new(5, 5));
        reg.remove_client_everywhere(client);
        assert_eq!(reg.list(), "b");
    }

    #[test]
    fn message_id_wraps_at_i32_max() {
        let reg = Registry::new();
        reg.next_message_id.store(i32::MAX, Ordering::SeqCst);
        assert_eq!(reg.next_message_id(), i32::MAX);
        assert_eq!(reg.next_message_id(), 0);
    }
}
