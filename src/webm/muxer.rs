// SPDX-License-Identifier: GPL-2.0-or-later

//! Terminal [`MediaHandler`] sink: one instance per track, consuming a
//! `StreamInfo` plus a sample stream punctuated by `SegmentInfo` boundaries
//! and emitting WebM (EBML Header + `Segment`/`Info`/`Tracks` as the init
//! segment, `Cluster`/`SimpleBlock` per boundary) through a [`SegmentSink`].

use std::sync::Arc;

use async_trait::async_trait;
use common::template::{self, SegmentToken};
use common::time::{rescale, Ticks};
use common::{MediaSample, Notifier, SegmentInfo, SegmentSink, StreamData, StreamDataPayload, StreamInfo, WebmOutputParams};
use handler::{ErrorKind, MediaHandler, SharedHandler, Status};

use crate::ebml::{self, ids, BinaryElement, EbmlElement, FloatElement, MasterElement, StringElement, UintElement};
use crate::error::WebmMuxError;

/// One fixed track number per muxer instance (one track per file, like
/// `ts::TsMuxer`'s single-elementary-stream design).
const TRACK_NUMBER: u64 = 1;

pub struct WebmMuxer {
    track_id: u32,
    output: WebmOutputParams,
    segment_token: Option<SegmentToken>,
    sink: Arc<dyn SegmentSink>,
    notifier: Arc<dyn Notifier>,

    stream_index: Option<u32>,
    stream_info: Option<Arc<StreamInfo>>,
    codec_id: Option<&'static str>,
    init_written: bool,
    track_zero_dts: Option<Ticks>,
    last_dts: Option<Ticks>,
    pending: Vec<MediaSample>,
    sequence_number: u64,
}

impl WebmMuxer {
    /// Fails fast on a malformed `output.segment_template` rather than at
    /// the first segment boundary.
    pub fn new(
        track_id: u32,
        output: WebmOutputParams,
        sink: Arc<dyn SegmentSink>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, WebmMuxError> {
        let segment_token = output.segment_template.as_deref().map(template::validate).transpose()?;
        Ok(Self {
            track_id,
            output,
            segment_token,
            sink,
            notifier,
            stream_index: None,
            stream_info: None,
            codec_id: None,
            init_written: false,
            track_zero_dts: None,
            last_dts: None,
            pending: Vec::new(),
            sequence_number: 0,
        })
    }

    fn init_segment_path(&self) -> String {
        self.output.init_segment.clone().unwrap_or_else(|| "init.webm".to_owned())
    }

    fn segment_path(&self, info: &SegmentInfo) -> String {
        match (&self.output.segment_template, self.segment_token) {
            (Some(template), Some(token)) if !self.output.single_file => {
                template::expand(template, token, info.segment_number, *info.start_time)
            }
            (Some(template), _) => template.clone(),
            (None, _) => format!("segment-{}.webm", info.segment_number),
        }
    }

    async fn process_stream_info(&mut self, stream_index: u32, info: Arc<StreamInfo>) -> Status {
        self.stream_index = Some(stream_index);
        self.codec_id = match (info.is_video(), info.codec.as_str()) {
            (true, "vp8" | "vp08") => Some("V_VP8"),
            (true, "vp9" | "vp09") => Some("V_VP9"),
            (true, "av1" | "av01") => Some("V_AV1"),
            (false, "opus") => Some("A_OPUS"),
            (false, "vorbis") => Some("A_VORBIS"),
            (true, other) => {
                return Status::new(ErrorKind::Unimplemented, WebmMuxError::UnsupportedVideoCodec(other.to_owned()).to_string());
            }
            (false, other) => {
                return Status::new(ErrorKind::Unimplemented, WebmMuxError::UnsupportedAudioCodec(other.to_owned()).to_string());
            }
        };
        self.stream_info = Some(info);
        Status::ok()
    }

    async fn process_sample(&mut self, stream_index: u32, sample: MediaSample) -> Status {
        let Some(stream_info) = self.stream_info.clone() else {
            return Status::new(ErrorKind::InvalidArgument, WebmMuxError::SampleBeforeStreamInfo.to_string());
        };
        self.stream_index = Some(stream_index);

        if self.track_zero_dts.is_none() {
            self.track_zero_dts = Some(sample.dts);
        } else if let Some(last_dts) = self.last_dts {
            if sample.dts < last_dts {
                return Status::new(ErrorKind::InvalidArgument, WebmMuxError::NonMonotonicDts.to_string());
            }
        }
        self.last_dts = Some(sample.dts);

        if !self.init_written {
            let Some(codec_id) = self.codec_id else {
                return Status::new(ErrorKind::Internal, "codec id not resolved");
            };
            let data = match build_init_segment(self.track_id, &stream_info, codec_id) {
                Ok(data) => data,
                Err(e) => return Status::new(ErrorKind::ParserFailure, e.to_string()),
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
        let Some(stream_info) = &self.stream_info else {
            return Status::new(ErrorKind::Internal, "segment boundary before any sample");
        };
        let data = match build_clusters(stream_info.time_scale, &self.pending) {
            Ok(data) => data,
            Err(e) => return Status::new(ErrorKind::ParserFailure, e.to_string()),
        };
        self.pending.clear();
        self.sequence_number += 1;

        let path = self.segment_path(&info);
        self.sink.write_segment(stream_index, &path, data, info);
        self.notifier.segment_ready(stream_index, info.segment_number);
        Status::ok()
    }
}

fn write_ebml_header(out: &mut Vec<u8>) -> Result<(), WebmMuxError> {
    let header = MasterElement {
        id: ids::EBML,
        children: vec![
            Box::new(UintElement { id: ids::EBML_VERSION, value: 1 }),
            Box::new(UintElement { id: ids::EBML_READ_VERSION, value: 1 }),
            Box::new(UintElement { id: ids::EBML_MAX_ID_LENGTH, value: 4 }),
            Box::new(UintElement { id: ids::EBML_MAX_SIZE_LENGTH, value: 8 }),
            Box::new(StringElement { id: ids::DOC_TYPE, value: "webm" }),
            Box::new(UintElement { id: ids::DOC_TYPE_VERSION, value: 4 }),
            Box::new(UintElement { id: ids::DOC_TYPE_READ_VERSION, value: 2 }),
        ],
    };
    header.marshal(out)?;
    Ok(())
}

fn build_track_entry(track_id: u32, info: &StreamInfo, codec_id: &'static str) -> Box<dyn EbmlElement> {
    let mut children: Vec<Box<dyn EbmlElement>> = vec![
        Box::new(UintElement { id: ids::TRACK_NUMBER, value: TRACK_NUMBER }),
        Box::new(UintElement { id: ids::TRACK_UID, value: u64::from(track_id) + 1 }),
        Box::new(UintElement { id: ids::TRACK_TYPE, value: if info.is_video() { 1 } else { 2 } }),
        Box::new(StringElement { id: ids::CODEC_ID, value: codec_id }),
    ];
    if !info.codec_private.is_empty() {
        children.push(Box::new(BinaryElement { id: ids::CODEC_PRIVATE, data: info.codec_private.clone() }));
    }
    if let Some(video) = info.video() {
        children.push(Box::new(MasterElement {
            id: ids::VIDEO,
            children: vec![
                Box::new(UintElement { id: ids::PIXEL_WIDTH, value: u64::from(video.width) }),
                Box::new(UintElement { id: ids::PIXEL_HEIGHT, value: u64::from(video.height) }),
            ],
        }));
    }
    if let Some(audio) = info.audio() {
        children.push(Box::new(MasterElement {
            id: ids::AUDIO,
            children: vec![
                Box::new(FloatElement { id: ids::SAMPLING_FREQUENCY, value: f64::from(audio.sampling_frequency) }),
                Box::new(UintElement { id: ids::CHANNELS, value: u64::from(audio.channels) }),
            ],
        }));
        if audio.codec_delay_ns > 0 {
            children.push(Box::new(UintElement {
                id: ids::CODEC_DELAY,
                value: u64::try_from(audio.codec_delay_ns).unwrap_or(0),
            }));
        }
        if audio.seek_preroll_ns > 0 {
            children.push(Box::new(UintElement {
                id: ids::SEEK_PRE_ROLL,
                value: u64::try_from(audio.seek_preroll_ns).unwrap_or(0),
            }));
        }
    }
    Box::new(MasterElement { id: ids::TRACK_ENTRY, children })
}

fn build_init_segment(track_id: u32, info: &StreamInfo, codec_id: &'static str) -> Result<Vec<u8>, WebmMuxError> {
    let mut out = Vec::new();
    write_ebml_header(&mut out)?;
    out.extend_from_slice(ids::SEGMENT);
    out.extend_from_slice(&ebml::UNKNOWN_SIZE);

    let segment_info = MasterElement {
        id: ids::INFO,
        children: vec![
            // nanoseconds-per-unit; 1_000_000 makes every Timecode and
            // SimpleBlock relative timecode one millisecond.
            Box::new(UintElement { id: ids::TIMECODE_SCALE, value: 1_000_000 }),
            Box::new(StringElement { id: ids::MUXING_APP, value: "webm-muxer" }),
            Box::new(StringElement { id: ids::WRITING_APP, value: "webm-muxer" }),
        ],
    };
    segment_info.marshal(&mut out)?;

    let tracks = MasterElement { id: ids::TRACKS, children: vec![build_track_entry(track_id, info, codec_id)] };
    tracks.marshal(&mut out)?;
    Ok(out)
}

fn flush_cluster(out: &mut Vec<u8>, start_ms: i64, blocks: Vec<Box<dyn EbmlElement>>) -> Result<(), WebmMuxError> {
    if blocks.is_empty() {
        return Ok(());
    }
    let mut children: Vec<Box<dyn EbmlElement>> =
        vec![Box::new(UintElement { id: ids::TIMECODE, value: u64::try_from(start_ms.max(0)).unwrap_or(0) })];
    children.extend(blocks);
    MasterElement { id: ids::CLUSTER, children }.marshal(out)?;
    Ok(())
}

/// Splits `samples` into one or more `Cluster`s, starting a new one
/// whenever a sample's timecode would no longer fit in `SimpleBlock`'s
/// 16-bit relative field, same "split when it no longer fits" shape as
/// `ts::packetizer`'s 188-byte packet splitting.
fn build_clusters(time_scale: u32, samples: &[MediaSample]) -> Result<Vec<u8>, WebmMuxError> {
    let mut out = Vec::new();
    let mut cluster_start_ms: Option<i64> = None;
    let mut blocks: Vec<Box<dyn EbmlElement>> = Vec::new();

    for sample in samples {
        let ts_ms = rescale(*sample.dts, time_scale, 1000);
        let provisional_start = *cluster_start_ms.get_or_insert(ts_ms);
        let relative = ts_ms - provisional_start;
        let relative = if relative > i64::from(i16::MAX) || relative < i64::from(i16::MIN) {
            flush_cluster(&mut out, provisional_start, std::mem::take(&mut blocks))?;
            cluster_start_ms = Some(ts_ms);
            0
        } else {
            relative
        };
        let block = ebml::simple_block_payload(TRACK_NUMBER, relative, sample.is_key_frame, &sample.payload[..])?;
        blocks.push(Box::new(BinaryElement { id: ids::SIMPLE_BLOCK, data: block }));
    }
    if let Some(start) = cluster_start_ms {
        flush_cluster(&mut out, start, blocks)?;
    }
    Ok(out)
}

#[async_trait]
impl MediaHandler for WebmMuxer {
    async fn process(&mut self, input_port: u32, data: StreamData) -> Status {
        if input_port != 0 {
            return Status::new(ErrorKind::InvalidArgument, format!("webm muxer has no input port {input_port}"));
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
            StreamDataPayload::TextSample(_) => Status::new(ErrorKind::Unimplemented, WebmMuxError::TextTrack.to_string()),
        }
    }

    async fn on_flush_request(&mut self, input_port: u32) -> Status {
        if input_port != 0 {
            return Status::new(ErrorKind::InvalidArgument, format!("webm muxer has no input port {input_port}"));
        }
        if self.pending.is_empty() {
            return Status::ok();
        }
        let Some(stream_index) = self.stream_index else {
            return Status::ok();
        };
        let info = SegmentInfo {
            start_time: self.pending.first().map_or(Ticks::new(0), |s| s.dts),
            duration: common::time::TickDuration::new(0),
            is_subsegment: false,
            is_encrypted: false,
            segment_number: self.sequence_number,
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
