// SPDX-License-Identifier: GPL-2.0-or-later

use std::collections::HashMap;

use common::StreamData;

use crate::media_handler::SharedHandler;
use crate::status::Status;

/// Output-port wiring owned by a single [`crate::MediaHandler`].
///
/// A handler registers zero or more `(consumer, consumer_input_port)` pairs
/// per output port, then calls [`Ports::dispatch`] once per outgoing
/// message; `dispatch` looks the message's `stream_index` up as an output
/// port and fans it out to every registered consumer, matching the
/// `AddOutput`/`Dispatch` capability pair every handler exposes.
#[derive(Default)]
pub struct Ports {
    edges: HashMap<u32, Vec<(SharedHandler, u32)>>,
}

impl Ports {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_output(&mut self, output_port: u32, consumer: SharedHandler, consumer_input_port: u32) {
        self.edges
            .entry(output_port)
            .or_default()
            .push((consumer, consumer_input_port));
    }

    /// Routes `data` to the output port matching its `stream_index`. A port
    /// with no registered consumer is a silent no-op: graph validation is
    /// responsible for catching orphan outputs before the pipeline runs.
    pub async fn dispatch(&self, data: StreamData) -> Status {
        let Some(consumers) = self.edges.get(&data.stream_index) else {
            return Status::ok();
        };
        for (consumer, input_port) in consumers {
            let status = consumer.lock().await.process(*input_port, data.clone()).await;
            if status.is_error() {
                return status;
            }
        }
        Status::ok()
    }

    /// Propagates a flush request to every downstream consumer on every
    /// output port.
    pub async fn flush_all(&self) -> Status {
        for consumers in self.edges.values() {
            for (consumer, input_port) in consumers {
                let status = consumer.lock().await.on_flush_request(*input_port).await;
                if status.is_error() {
                    return status;
                }
            }
        }
        Status::ok()
    }

    #[must_use]
    pub fn declared_output_ports(&self) -> Vec<u32> {
        self.edges.keys().copied().collect()
    }

    #[must_use]
    pub fn has_consumer(&self, output_port: u32) -> bool {
        self.edges.get(&output_port).is_some_and(|v| !v.is_empty())
    }
}
