// SPDX-License-Identifier: GPL-2.0-or-later

use async_trait::async_trait;
use common::StreamData;

use crate::media_handler::{MediaHandler, SharedHandler};
use crate::ports::Ports;
use crate::status::{ErrorKind, Status};

/// Fans a single input stream out to `output_count` independent numbered
/// output ports, each carrying an identical copy of every message. Used to
/// feed the same track into more than one downstream branch (e.g. an
/// encrypted and a clear muxing path) without the branches sharing state.
///
/// A single output port already supports multiple consumers via [`Ports`];
/// `Replicator` exists for the case where downstream handlers need to see
/// the copies arrive as logically distinct streams (different output port
/// numbers) rather than the same one fanned out.
pub struct Replicator {
    output_count: u32,
    ports: Ports,
}

impl Replicator {
    #[must_use]
    pub fn new(output_count: u32) -> Self {
        Self {
            output_count,
            ports: Ports::new(),
        }
    }
}

#[async_trait]
impl MediaHandler for Replicator {
    async fn process(&mut self, input_port: u32, data: StreamData) -> Status {
        if input_port != 0 {
            return Status::new(
                ErrorKind::InvalidArgument,
                format!("replicator has no input port {input_port}"),
            );
        }
        for output_port in 0..self.output_count {
            let copy = StreamData::new(output_port, data.payload.clone());
            let status = self.ports.dispatch(copy).await;
            if status.is_error() {
                return status;
            }
        }
        Status::ok()
    }

    async fn on_flush_request(&mut self, input_port: u32) -> Status {
        if input_port != 0 {
            return Status::new(
                ErrorKind::InvalidArgument,
                format!("replicator has no input port {input_port}"),
            );
        }
        self.ports.flush_all().await
    }

    fn add_output(&mut self, output_port: u32, consumer: SharedHandler, consumer_input_port: u32) {
        self.ports.add_output(output_port, consumer, consumer_input_port);
    }

    fn known_input_ports(&self) -> Vec<u32> {
        vec![0]
    }

    fn declared_output_ports(&self) -> Vec<u32> {
        (0..self.output_count).collect()
    }
}
