// SPDX-License-Identifier: GPL-2.0-or-later

use std::fmt;

/// Failure category a [`crate::MediaHandler`] can report.
///
/// `EndOfStream` is informational: it signals that an origin has nothing
/// further to dispatch, not that anything went wrong.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Ok,
    InvalidArgument,
    FileFailure,
    ParserFailure,
    EncryptionError,
    TrickPlayError,
    EndOfStream,
    Cancelled,
    Unimplemented,
    Internal,
}

impl ErrorKind {
    // Mirrors a conventional process exit-code table: zero for success and
    // for the informational end-of-stream marker, non-zero otherwise.
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::Ok | ErrorKind::EndOfStream => 0,
            ErrorKind::InvalidArgument => 2,
            ErrorKind::FileFailure => 3,
            ErrorKind::ParserFailure => 4,
            ErrorKind::EncryptionError => 5,
            ErrorKind::TrickPlayError => 6,
            ErrorKind::Cancelled => 130,
            ErrorKind::Unimplemented => 120,
            ErrorKind::Internal => 1,
        }
    }
}

/// Result of a single `MediaHandler` call: a kind plus an optional
/// human-readable detail. Cloneable so an `Orchestrator` can hand the same
/// failure to every sibling origin it cancels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Status {
    pub kind: ErrorKind,
    pub detail: String,
}

impl Status {
    #[must_use]
    pub fn ok() -> Self {
        Self {
            kind: ErrorKind::Ok,
            detail: String::new(),
        }
    }

    #[must_use]
    pub fn end_of_stream() -> Self {
        Self {
            kind: ErrorKind::EndOfStream,
            detail: String::new(),
        }
    }

    #[must_use]
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.kind == ErrorKind::Ok
    }

    // Anything other than `Ok` and the informational `EndOfStream` halts
    // dispatch along the calling edge.
    #[must_use]
    pub fn is_error(&self) -> bool {
        !matches!(self.kind, ErrorKind::Ok | ErrorKind::EndOfStream)
    }

    #[must_use]
    pub fn is_end_of_stream(&self) -> bool {
        self.kind == ErrorKind::EndOfStream
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::ok()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.detail.is_empty() {
            write!(f, "{:?}", self.kind)
        } else {
            write!(f, "{:?}: {}", self.kind, self.detail)
        }
    }
}
