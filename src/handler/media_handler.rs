// SPDX-License-Identifier: GPL-2.0-or-later

use std::sync::Arc;

use async_trait::async_trait;
use common::StreamData;
use tokio::sync::Mutex;

use crate::status::Status;

/// A node in the handler graph, shared by every upstream node that feeds
/// it. Interior mutability lives behind the `Mutex` so a node can be an
/// `Arc`-cloned consumer of more than one producer (e.g. a muxer fed by
/// both a video and an audio chunking handler).
pub type SharedHandler = Arc<Mutex<dyn MediaHandler>>;

/// The capability set every graph node implements: `Initialize`,
/// `Process`, `OnFlushRequest`, plus the `AddOutput`/`Dispatch` wiring
/// pair a node uses to reach its own consumers (`AddOutput` is
/// `add_output`; `Dispatch` lives on the node's embedded [`crate::Ports`]).
///
/// `process` and `on_flush_request` never suspend on external I/O or on
/// another origin's progress; a node either has what it needs buffered or
/// it returns promptly. The `async` signature exists for uniformity with
/// the rest of the stack, not because a node is expected to await
/// anything.
#[async_trait]
pub trait MediaHandler: Send + Sync {
    /// Called once, after the full graph is wired, before any `process`
    /// call. The default no-op suits handlers with no setup step.
    async fn initialize(&mut self) -> Status {
        Status::ok()
    }

    /// Delivers one message on `input_port`. `input_port` must be one this
    /// handler recognises; an unrecognised port is a caller bug, not a
    /// runtime condition this method has to defend against (`Graph`
    /// validation enforces it up front).
    async fn process(&mut self, input_port: u32, data: StreamData) -> Status;

    /// Propagates an upstream flush (end of input, or a forced cut) to this
    /// handler's own input on `input_port`, and on through `Ports::flush_all`
    /// to whatever it produces in response.
    async fn on_flush_request(&mut self, input_port: u32) -> Status;

    /// Registers `consumer` to receive messages this handler dispatches on
    /// `output_port`.
    fn add_output(&mut self, output_port: u32, consumer: SharedHandler, consumer_input_port: u32);

    /// Input ports this handler recognises. `Graph::build` rejects a
    /// connection naming any other port.
    fn known_input_ports(&self) -> Vec<u32>;

    /// Output ports this handler may produce on. `Graph::build` requires
    /// each of these to have at least one consumer wired before the graph
    /// runs.
    fn declared_output_ports(&self) -> Vec<u32>;
}
