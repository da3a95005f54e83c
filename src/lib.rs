// SPDX-License-Identifier: GPL-3.0-or-later
// SPDX-FileCopyrightText: 2026 mds contributors
//
//! A local display server bus: a registry of commands and the clients
//! listening for them, reachable over a Unix domain socket, with support
//! for live re-exec across process upgrades.

pub mod bus;
pub mod client_id;
pub mod client_list;
pub mod error;
pub mod hash_map;
pub mod indexed_list;
pub mod marshal;
pub mod message;
pub mod registry;
pub mod supervisor;

pub use client_id::ClientId;
pub use error::{MdsError, Result};
pub use registry::Registry;
