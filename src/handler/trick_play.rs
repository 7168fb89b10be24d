// SPDX-License-Identifier: GPL-2.0-or-later

use async_trait::async_trait;
use common::{StreamData, StreamDataPayload};

use crate::media_handler::{MediaHandler, SharedHandler};
use crate::ports::Ports;
use crate::status::{ErrorKind, Status};

/// Forwards every `factor`-th key-frame on input port 0 as a parallel
/// low-rate stream on output port 0, dropping every other sample
/// (including non-key frames). `StreamInfo` and side-band events pass
/// through unconditionally so the downstream muxer still gets a valid
/// track header and cue/key-update notices.
pub struct TrickPlayHandler {
    factor: u32,
    key_frames_seen: u32,
    ports: Ports,
}

impl TrickPlayHandler {
    /// `factor` is the `N` in "one-in-N key frames"; `0` and `1` both mean
    /// "forward every key frame".
    #[must_use]
    pub fn new(factor: u32) -> Self {
        Self {
            factor: factor.max(1),
            key_frames_seen: 0,
            ports: Ports::new(),
        }
    }
}

#[async_trait]
impl MediaHandler for TrickPlayHandler {
    async fn process(&mut self, input_port: u32, data: StreamData) -> Status {
        if input_port != 0 {
            return Status::new(
                ErrorKind::InvalidArgument,
                format!("trick play handler has no input port {input_port}"),
            );
        }
        match &data.payload {
            StreamDataPayload::MediaSample(sample) => {
                if !sample.is_key_frame {
                    return Status::ok();
                }
                self.key_frames_seen += 1;
                if (self.key_frames_seen - 1) % self.factor != 0 {
                    return Status::ok();
                }
            }
            StreamDataPayload::TextSample(_) => return Status::ok(),
            StreamDataPayload::StreamInfo(_)
            | StreamDataPayload::SegmentInfo(_)
            | StreamDataPayload::CueEvent(_)
            | StreamDataPayload::MediaEvent(_) => {}
        }
        self.ports.dispatch(StreamData::new(0, data.payload)).await
    }

    async fn on_flush_request(&mut self, input_port: u32) -> Status {
        if input_port != 0 {
            return Status::new(
                ErrorKind::InvalidArgument,
                format!("trick play handler has no input port {input_port}"),
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
        vec![0]
    }
}
