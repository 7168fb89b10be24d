// SPDX-License-Identifier: GPL-2.0-or-later

pub mod graph;
pub mod media_handler;
pub mod orchestrator;
pub mod ports;
pub mod replicator;
pub mod status;
pub mod trick_play;

pub use graph::{BuildError, BuiltGraph, Graph, GraphError};
pub use media_handler::{MediaHandler, SharedHandler};
pub use orchestrator::{Orchestrator, Origin};
pub use ports::Ports;
pub use replicator::Replicator;
pub use status::{ErrorKind, Status};
pub use trick_play::TrickPlayHandler;
