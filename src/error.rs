// SPDX-License-Identifier: GPL-3.0-or-later
// SPDX-FileCopyrightText: 2026 mds contributors
//
// Unified error type and severity classification for the bus, registry,
// and supervisor.

use std::fmt;
use std::io;

/// Unified error type for the bus, registry, and supervisor.
///
/// Replaces the `errno`-overloading style of the original C implementation
/// with an explicit sum type: callers match on variants instead of
/// inspecting a thread-local `errno` after the fact.
#[derive(Debug, thiserror::Error)]
pub enum MdsError {
    /// A fallible allocation failed and the caller's data structure was
    /// left unchanged.
    #[error("allocation failed")]
    Alloc,

    /// A syscall or stream operation failed.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Input was syntactically well-formed at the framing level but
    /// violated a higher-level protocol rule (e.g. a missing `Client ID`
    /// header).
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The operation was interrupted (`EINTR`) and should be retried.
    #[error("interrupted")]
    Interrupted,
}

impl MdsError {
    /// True for errors that are expected to clear up on retry and do not
    /// warrant tearing down a connection.
    pub fn is_transient(&self) -> bool {
        match self {
            MdsError::Interrupted => true,
            MdsError::Io(e) => e.kind() == io::ErrorKind::Interrupted,
            _ => false,
        }
    }

    /// True for a connection reset, which the bus loop treats as a
    /// reconnect-and-continue condition rather than a fatal error.
    pub fn is_connection_reset(&self) -> bool {
        matches!(self, MdsError::Io(e) if e.kind() == io::ErrorKind::ConnectionReset)
    }

    /// Classifies this error for the purpose of choosing a tracing level at
    /// the call site: transient conditions are retried quietly, logical
    /// violations warrant a warning, and everything else is catastrophic.
    pub fn severity(&self) -> Severity {
        if self.is_transient() {
            Severity::Transient
        } else if matches!(self, MdsError::Malformed(_)) {
            Severity::Logical
        } else {
            Severity::Catastrophic
        }
    }
}

impl From<std::collections::TryReserveError> for MdsError {
    fn from(_: std::collections::TryReserveError) -> Self {
        MdsError::Alloc
    }
}

/// A marker for the three error severities from the bus's error-handling
/// design, used only for choosing a tracing level at the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Transient,
    Logical,
    Catastrophic,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Transient => "transient",
            Severity::Logical => "logical",
            Severity::Catastrophic => "catastrophic",
        };
        f.write_str(s)
    }
}

pub type Result<T> = std::result::Result<T, MdsError>;
