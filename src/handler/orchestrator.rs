// SPDX-License-Identifier: GPL-2.0-or-later

use std::future::Future;
use std::pin::Pin;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::status::{ErrorKind, Status};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One origin task, boxed so a caller can hand the orchestrator a list of
/// differently-shaped origins (e.g. a file demuxer and a live-ingest
/// demuxer) in a single `Vec`.
pub type Origin = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, Status> + Send>;

/// Runs one task per origin (demuxer) and coordinates cancellation between
/// them.
///
/// Each origin polls its [`CancellationToken`] between samples rather than
/// being preempted; when one origin's task returns an error, the
/// orchestrator cancels every sibling's token so they wind down instead of
/// running to completion against a pipeline that has already failed, and
/// reports the first error back to the caller.
pub struct Orchestrator {
    token: CancellationToken,
}

impl Orchestrator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Runs every origin to completion (or until one fails), returning the
    /// first non-ok [`Status`] seen, or `Status::ok()` if every origin
    /// finished cleanly.
    pub async fn run_origins(&self, origins: Vec<Origin>) -> Status {
        let mut set = JoinSet::new();
        for origin in origins {
            let token = self.token.clone();
            set.spawn(origin(token));
        }

        let mut first_error: Option<Status> = None;
        while let Some(joined) = set.join_next().await {
            let status = match joined {
                Ok(status) => status,
                Err(_join_err) => Status::new(ErrorKind::Internal, "origin task panicked"),
            };
            if status.is_error() && first_error.is_none() {
                first_error = Some(status);
                self.cancel();
            }
        }
        first_error.unwrap_or_else(Status::ok)
    }
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}
