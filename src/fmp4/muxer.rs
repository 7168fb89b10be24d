// SPDX-License-Identifier: GPL-2.0-or-later

//! Terminal [`MediaHandler`] sink: one instance per track, consuming a
//! `StreamInfo` plus a sample stream punctuated by `SegmentInfo` boundaries
//! and emitting an init segment and one fragment per boundary through a
//! [`SegmentSink`].

use std::sync::Arc;

use async_trait::async_trait;
use common::time::Ticks;
use common::{
    DecryptConfig, Iv, Mp4OutputParams, Notifier, SegmentInfo, SegmentSink, StreamData, StreamDataPayload, StreamInfo,
};
use common::template::{self, SegmentToken};
use handler::{ErrorKind, MediaHandler, SharedHandler, Status};

use crate::error::Mp4MuxError;
use crate::fragment::{self, FragmentParams};
use crate::init::{self, EditListPolicy, InitEncryption, InitParams};

pub struct Mp4Muxer {
    track_id: u32,
    output: Mp4OutputParams,
    edit_list_policy: EditListPolicy,
    segment_token: Option<SegmentToken>,
    sink: Arc<dyn SegmentSink>,
    notifier: Arc<dyn Notifier>,

    stream_index: Option<u32>,
    stream_info: Option<Arc<StreamInfo>>,
    is_video: bool,
    init_written: bool,
    track_zero_dts: Option<Ticks>,
    last_dts: Option<Ticks>,
    sequence_number: u32,
    pending: Vec<common::MediaSample>,
}

impl Mp4Muxer {
    /// Fails fast on a malformed `output.segment_template` rather than at
    /// the first segment boundary.
    pub fn new(
        track_id: u32,
        output: Mp4OutputParams,
        edit_list_policy: EditListPolicy,
        sink: Arc<dyn SegmentSink>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, Mp4MuxError> {
        let segment_token = output.segment_template.as_deref().map(template::validate).transpose()?;
        Ok(Self {
            track_id,
            output,
            edit_list_policy,
            segment_token,
            sink,
            notifier,
            stream_index: None,
            stream_info: None,
            is_video: false,
            init_written: false,
            track_zero_dts: None,
            last_dts: None,
            sequence_number: 0,
            pending: Vec::new(),
        })
    }

    fn init_segment_path(&self) -> String {
        self.output.init_segment.clone().unwrap_or_else(|| "init.mp4".to_owned())
    }

    fn fragment_path(&self, info: &SegmentInfo) -> String {
        match (&self.output.segment_template, self.segment_token) {
            (Some(template), Some(token)) if !self.output.single_file => {
                template::expand(template, token, info.segment_number, *info.start_time)
            }
            (Some(template), _) => template.clone(),
            (None, _) => format!("fragment-{}.m4s", info.segment_number),
        }
    }

    async fn process_stream_info(&mut self, stream_index: u32, info: Arc<StreamInfo>) -> Status {
        self.stream_index = Some(stream_index);
        self.is_video = info.is_video();
        self.stream_info = Some(info);
        Status::ok()
    }

    async fn process_sample(&mut self, stream_index: u32, sample: common::MediaSample) -> Status {
        let Some(stream_info) = self.stream_info.clone() else {
            return Status::new(ErrorKind::InvalidArgument, Mp4MuxError::SampleBeforeStreamInfo.to_string());
        };
        self.stream_index = Some(stream_index);

        if self.track_zero_dts.is_none() {
            self.track_zero_dts = Some(sample.dts);
        } else if let Some(last_dts) = self.last_dts {
            if sample.dts < last_dts {
                return Status::new(ErrorKind::InvalidArgument, Mp4MuxError::NonMonotonicDts.to_string());
            }
        }
        self.last_dts = Some(sample.dts);

        if !self.init_written {
            let encryption = sample.decrypt_config.as_ref().map(init_encryption_from);
            let params = InitParams {
                track_id: self.track_id,
                stream_info: &stream_info,
                initial_composition_offset: *sample.pts - *sample.dts,
                edit_list_policy: self.edit_list_policy,
                encryption: encryption.as_ref(),
            };
            let data = match init::generate_init(&params) {
                Ok(data) => data,
                Err(e) => return status_from_mux_error(Mp4MuxError::GenerateInit(e)),
            };
            self.sink.write_init_segment(stream_index, &self.init_segment_path(), data);
            self.init_written = true;
        }

        self.pending.push(sample);
        Status::ok()
    }

    async fn process_segment_info(&mut self, stream_index: u32, info: SegmentInfo) -> Status {
        if self.pending.is_empty() {
            return Status::ok();
        }
        let Some(track_zero_dts) = self.track_zero_dts else {
            return Status::new(ErrorKind::Internal, "segment boundary before any sample");
        };
        let Some(first) = self.pending.first() else {
            return Status::ok();
        };
        let base_media_decode_time = match u64::try_from(*first.dts - *track_zero_dts) {
            Ok(v) => v,
            Err(_) => {
                return status_from_mux_error(Mp4MuxError::GenerateFragment(
                    crate::error::GenerateFragmentError::BaseMediaDecodeTimeOverflow,
                ));
            }
        };

        let params = FragmentParams {
            track_id: self.track_id,
            sequence_number: self.sequence_number,
            is_video: self.is_video,
            base_media_decode_time,
            samples: &self.pending,
        };
        let data = match fragment::generate_fragment(&params) {
            Ok(data) => data,
            Err(e) => return status_from_mux_error(Mp4MuxError::GenerateFragment(e)),
        };

        self.sequence_number += 1;
        self.pending.clear();

        let path = self.fragment_path(&info);
        self.sink.write_segment(stream_index, &path, data, info);
        self.notifier.segment_ready(stream_index, info.segment_number);
        Status::ok()
    }
}

fn init_encryption_from(cfg: &DecryptConfig) -> InitEncryption {
    let (per_sample_iv_size, constant_iv) = match cfg.iv {
        Iv::Bytes8(_) => (8, None),
        Iv::Bytes16(_) => (16, None),
        Iv::Constant(bytes) => (0, Some(bytes)),
    };
    InitEncryption {
        scheme: cfg.scheme,
        key_id: cfg.key_id,
        per_sample_iv_size,
        constant_iv,
        crypt_byte_block: cfg.crypt_byte_block,
        skip_byte_block: cfg.skip_byte_block,
    }
}

fn status_from_mux_error(e: Mp4MuxError) -> Status {
    let kind = match &e {
        Mp4MuxError::GenerateInit(_) | Mp4MuxError::GenerateFragment(_) => ErrorKind::ParserFailure,
        Mp4MuxError::Template(_) => ErrorKind::InvalidArgument,
        Mp4MuxError::SampleBeforeStreamInfo | Mp4MuxError::NonMonotonicDts => ErrorKind::InvalidArgument,
    };
    Status::new(kind, e.to_string())
}

#[async_trait]
impl MediaHandler for Mp4Muxer {
    async fn process(&mut self, input_port: u32, data: StreamData) -> Status {
        if input_port != 0 {
            return Status::new(ErrorKind::InvalidArgument, format!("mp4 muxer has no input port {input_port}"));
        }
        match data.payload {
            StreamDataPayload::StreamInfo(info) => self.process_stream_info(data.stream_index, info).await,
            StreamDataPayload::MediaSample(sample) => self.process_sample(data.stream_index, sample).await,
            StreamDataPayload::SegmentInfo(info) => self.process_segment_info(data.stream_index, info).await,
            StreamDataPayload::MediaEvent(event) => {
                self.notifier.media_event(data.stream_index, &event);
                Status::ok()
            }
            StreamDataPayload::CueEvent(_) => Status::ok(),
            StreamDataPayload::TextSample(_) => Status::new(ErrorKind::Unimplemented, "fmp4 text tracks are not supported"),
        }
    }

    async fn on_flush_request(&mut self, input_port: u32) -> Status {
        if input_port != 0 {
            return Status::new(ErrorKind::InvalidArgument, format!("mp4 muxer has no input port {input_port}"));
        }
        // No downstream `SegmentInfo` guarantees a final boundary for the
        // samples since the last one; `Graph` flush is the cue to drain them.
        if self.pending.is_empty() {
            return Status::ok();
        }
        let Some(stream_index) = self.stream_index else {
            return Status::ok();
        };
        let segment_number = self.sequence_number.into();
        let info = SegmentInfo {
            start_time: self.pending.first().map_or(Ticks::new(0), |s| s.dts),
            duration: common::time::TickDuration::new(0),
            is_subsegment: false,
            is_encrypted: false,
            segment_number,
        };
        self.process_segment_info(stream_index, info).await
    }

    fn add_output(&mut self, _output_port: u32, _consumer: SharedHandler, _consumer_input_port: u32) {
        // Terminal sink: nothing downstream of a muxer in the handler graph.
    }

    fn known_input_ports(&self) -> Vec<u32> {
        vec![0]
    }

    fn declared_output_ports(&self) -> Vec<u32> {
        Vec::new()
    }
}
