// SPDX-License-Identifier: GPL-2.0-or-later

use std::sync::Arc;

use async_trait::async_trait;
use common::{MediaSample, StreamData, StreamDataPayload, StreamInfo};
use handler::{ErrorKind, MediaHandler, Ports, SharedHandler, Status};
use tokio_util::sync::CancellationToken;

/// An origin node: drives its own output instead of waiting to be called.
/// Shaped to match `handler::Orchestrator`'s `Origin` task (a demuxer polls
/// `token` between samples rather than being preempted).
#[async_trait]
pub trait Demuxer: MediaHandler {
    async fn run(&mut self, token: CancellationToken) -> Status;
}

/// A pre-built, single-stream sample sequence, pushed through in order.
/// Construct it with every consumer already wired via `add_output`, then
/// drive it with `run`, the same construct-then-drive shape the teacher's
/// streamer wiring uses for its muxer setup, scaled down since real
/// container parsing has no counterpart here.
pub struct VecSampleSource {
    stream_index: u32,
    info: Arc<StreamInfo>,
    samples: Vec<MediaSample>,
    ports: Ports,
}

impl VecSampleSource {
    #[must_use]
    pub fn new(stream_index: u32, info: Arc<StreamInfo>, samples: Vec<MediaSample>) -> Self {
        Self {
            stream_index,
            info,
            samples,
            ports: Ports::new(),
        }
    }
}

#[async_trait]
impl MediaHandler for VecSampleSource {
    async fn process(&mut self, input_port: u32, _data: StreamData) -> Status {
        Status::new(ErrorKind::InvalidArgument, format!("VecSampleSource has no input port {input_port}"))
    }

    async fn on_flush_request(&mut self, _input_port: u32) -> Status {
        self.ports.flush_all().await
    }

    fn add_output(&mut self, output_port: u32, consumer: SharedHandler, consumer_input_port: u32) {
        self.ports.add_output(output_port, consumer, consumer_input_port);
    }

    fn known_input_ports(&self) -> Vec<u32> {
        Vec::new()
    }

    fn declared_output_ports(&self) -> Vec<u32> {
        self.ports.declared_output_ports()
    }
}

#[async_trait]
impl Demuxer for VecSampleSource {
    /// Dispatches the stream's `StreamInfo` once, then each sample in
    /// order, checking `token` between samples; flushes downstream and
    /// reports `EndOfStream` once every sample has been sent.
    async fn run(&mut self, token: CancellationToken) -> Status {
        let info_status = self
            .ports
            .dispatch(StreamData::new(self.stream_index, StreamDataPayload::StreamInfo(self.info.clone())))
            .await;
        if info_status.is_error() {
            return info_status;
        }

        for sample in std::mem::take(&mut self.samples) {
            if token.is_cancelled() {
                return Status::new(ErrorKind::Cancelled, "demuxer cancelled");
            }
            let status = self
                .ports
                .dispatch(StreamData::new(self.stream_index, StreamDataPayload::MediaSample(sample)))
                .await;
            if status.is_error() {
                return status;
            }
        }

        let flush_status = self.ports.flush_all().await;
        if flush_status.is_error() {
            return flush_status;
        }
        Status::end_of_stream()
    }
}
