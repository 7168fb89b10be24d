// SPDX-License-Identifier: GPL-2.0-or-later

//! Terminal [`MediaHandler`] sink: one instance per track, consuming a
//! `StreamInfo` plus a sample stream punctuated by `SegmentInfo` boundaries
//! and emitting MPEG-2 transport stream segments through a [`SegmentSink`].
//! Single program, single elementary stream per instance, per spec.md §4.5.

use std::sync::Arc;

use async_trait::async_trait;
use common::template::{self, SegmentToken};
use common::time::Mpeg2Ticks;
use common::{Notifier, SegmentInfo, SegmentSink, StreamData, StreamDataPayload, StreamInfo, TsOutputParams};
use handler::{ErrorKind, MediaHandler, SharedHandler, Status};

use crate::error::TsMuxError;
use crate::packetizer::TsPacketizer;
use crate::pes::PesGenerator;
use crate::psi::{self, StreamType as PsiStreamType};

pub struct TsMuxer {
    output: TsOutputParams,
    segment_token: Option<SegmentToken>,
    sink: Arc<dyn SegmentSink>,
    notifier: Arc<dyn Notifier>,

    stream_index: Option<u32>,
    stream_info: Option<Arc<StreamInfo>>,
    pes_generator: Option<PesGenerator>,
    psi_stream_type: Option<PsiStreamType>,
    pid: u16,

    packetizer: TsPacketizer,
    transport_stream_id: u16,
    buffer: Vec<u8>,
    psi_written: bool,
    last_pts: Option<Mpeg2Ticks>,
    sequence_number: u64,
}

impl TsMuxer {
    /// Fails fast on a malformed `output.segment_template` rather than at
    /// the first segment boundary.
    pub fn new(
        transport_stream_id: u16,
        output: TsOutputParams,
        sink: Arc<dyn SegmentSink>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, TsMuxError> {
        let segment_token = output.segment_template.as_deref().map(template::validate).transpose()?;
        Ok(Self {
            output,
            segment_token,
            sink,
            notifier,
            stream_index: None,
            stream_info: None,
            pes_generator: None,
            psi_stream_type: None,
            pid: 0,
            packetizer: TsPacketizer::new(),
            transport_stream_id,
            buffer: Vec::new(),
            psi_written: false,
            last_pts: None,
            sequence_number: 0,
        })
    }

    fn segment_path(&self, info: &SegmentInfo) -> String {
        match (&self.output.segment_template, self.segment_token) {
            (Some(template), Some(token)) if !self.output.single_file => {
                template::expand(template, token, info.segment_number, *info.start_time)
            }
            (Some(template), _) => template.clone(),
            (None, _) => format!("segment-{}.ts", info.segment_number),
        }
    }

    fn write_psi_if_needed(&mut self) {
        let first_psi_ever = !self.psi_written;
        if self.output.single_file && !first_psi_ever {
            return;
        }
        let Some(stream_type) = self.psi_stream_type else { return };
        self.buffer.extend_from_slice(&psi::build_pat(self.transport_stream_id));
        self.buffer.extend_from_slice(&psi::build_pmt(stream_type));
        self.psi_written = true;
    }

    async fn process_stream_info(&mut self, stream_index: u32, info: Arc<StreamInfo>) -> Status {
        self.stream_index = Some(stream_index);
        self.psi_stream_type = Some(match (info.is_video(), info.codec.as_str()) {
            (true, "h264" | "avc" | "avc1") => PsiStreamType::H264,
            (true, "h265" | "hevc" | "hvc1") => PsiStreamType::H265,
            (false, "aac" | "mp4a") => PsiStreamType::Aac,
            (_, other) => {
                return Status::new(ErrorKind::Unimplemented, format!("unsupported codec for ts muxing: {other}"));
            }
        });
        self.pid = psi::elementary_pid(self.psi_stream_type.expect("set above"));
        self.pes_generator = match PesGenerator::new(&info, self.output.transport_stream_timestamp_offset_s) {
            Ok(g) => Some(g),
            Err(e) => return Status::new(ErrorKind::InvalidArgument, TsMuxError::Pes(e).to_string()),
        };
        self.stream_info = Some(info);
        Status::ok()
    }

    async fn process_sample(&mut self, stream_index: u32, sample: common::MediaSample) -> Status {
        let Some(generator) = &self.pes_generator else {
            return Status::new(ErrorKind::InvalidArgument, TsMuxError::SampleBeforeStreamInfo.to_string());
        };
        self.stream_index = Some(stream_index);

        let pes = match generator.generate(&sample) {
            Ok(pes) => pes,
            Err(e) => return Status::new(ErrorKind::ParserFailure, TsMuxError::Pes(e).to_string()),
        };
        if let Some(last_pts) = self.last_pts {
            if pes.pts < last_pts {
                return Status::new(ErrorKind::InvalidArgument, TsMuxError::Pes(crate::error::PesError::NonMonotonicPts).to_string());
            }
        }
        let want_pcr = self.last_pts.is_none() || pes.is_key_frame;
        self.last_pts = Some(pes.pts);

        self.write_psi_if_needed();

        let pcr_base = pes.dts.unwrap_or(pes.pts);
        let pes_bytes = encode_pes_packet(&pes);
        for packet in self.packetizer.packetize(self.pid, &pes_bytes, want_pcr, pcr_base) {
            self.buffer.extend_from_slice(&packet);
        }
        Status::ok()
    }

    async fn process_segment_info(&mut self, stream_index: u32, info: SegmentInfo) -> Status {
        if self.buffer.is_empty() {
            return Status::ok();
        }
        let data = std::mem::take(&mut self.buffer);
        if !self.output.single_file {
            self.psi_written = false;
        }
        self.sequence_number += 1;
        let path = self.segment_path(&info);
        self.sink.write_segment(stream_index, &path, data, info);
        self.notifier.segment_ready(stream_index, info.segment_number);
        Status::ok()
    }
}

/// PES packet framing: `packet_start_code_prefix` + `stream_id` + a
/// `PES_packet_length` that is zero for oversized video payloads (permitted
/// by ISO/IEC 13818-1 for video elementary streams) plus the PTS/DTS field.
fn encode_pes_packet(pes: &crate::pes::PesPacket) -> Vec<u8> {
    let mut out = Vec::with_capacity(pes.payload.len() + 19);
    out.extend_from_slice(&[0x00, 0x00, 0x01]);
    out.push(pes.stream_id);

    let (pts_dts_flags, ts_field_len) = if pes.dts.is_some() { (0b11, 10) } else { (0b10, 5) };
    let header_data_len = ts_field_len;
    let optional_header_len = 3 + header_data_len;
    let packet_length = pes.payload.len() + optional_header_len;
    let packet_length_field = if packet_length > 0xFFFF { 0 } else { packet_length };
    out.extend_from_slice(&u16::try_from(packet_length_field).unwrap_or(0).to_be_bytes());

    out.push(0b1000_0000); // '10' marker, no scrambling/priority/alignment/copyright flags
    out.push((pts_dts_flags << 6) | 0b0000_0000);
    out.push(u8::try_from(header_data_len).unwrap_or(0));

    let pts_prefix = if pes.dts.is_some() { 0b0011 } else { 0b0010 };
    write_timestamp(&mut out, pts_prefix, pes.pts);
    if let Some(dts) = pes.dts {
        write_timestamp(&mut out, 0b0001, dts);
    }

    out.extend_from_slice(&pes.payload);
    out
}

/// Encodes a 33-bit 90kHz timestamp into the 5-byte PES marker-bit pattern
/// (`prefix(4) ts[32..30](3) marker(1) ts[29..15](15) marker(1) ts[14..0](15) marker(1)`).
fn write_timestamp(out: &mut Vec<u8>, prefix: u8, ts: common::time::Mpeg2Ticks) {
    let ts = ts.wrapped();
    let b0 = (prefix << 4) | (u8::try_from((ts >> 30) & 0b111).unwrap_or(0) << 1) | 0b1;
    let mid = u16::try_from((ts >> 15) & 0x7FFF).unwrap_or(0);
    let low = u16::try_from(ts & 0x7FFF).unwrap_or(0);
    let b1 = u8::try_from((mid >> 7) & 0xFF).unwrap_or(0);
    let b2 = (u8::try_from(mid & 0x7F).unwrap_or(0) << 1) | 0b1;
    let b3 = u8::try_from((low >> 7) & 0xFF).unwrap_or(0);
    let b4 = (u8::try_from(low & 0x7F).unwrap_or(0) << 1) | 0b1;
    out.extend_from_slice(&[b0, b1, b2, b3, b4]);
}

#[async_trait]
impl MediaHandler for TsMuxer {
    async fn process(&mut self, input_port: u32, data: StreamData) -> Status {
        if input_port != 0 {
            return Status::new(ErrorKind::InvalidArgument, format!("ts muxer has no input port {input_port}"));
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
            StreamDataPayload::TextSample(_) => Status::new(ErrorKind::Unimplemented, TsMuxError::TextTrack.to_string()),
        }
    }

    async fn on_flush_request(&mut self, input_port: u32) -> Status {
        if input_port != 0 {
            return Status::new(ErrorKind::InvalidArgument, format!("ts muxer has no input port {input_port}"));
        }
        if self.buffer.is_empty() {
            return Status::ok();
        }
        let Some(stream_index) = self.stream_index else {
            return Status::ok();
        };
        let info = SegmentInfo {
            start_time: common::time::Ticks::new(0),
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

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use common::time::{TickDuration, Ticks};
    use common::{AudioInfo, DummyNotifier, MediaInfo, MediaSample, PaddedBytes, StreamType, VideoInfo};

    use super::*;

    struct RecordingSink {
        segments: StdMutex<Vec<(String, Vec<u8>)>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self { segments: StdMutex::new(Vec::new()) }
        }
    }

    impl SegmentSink for RecordingSink {
        fn write_init_segment(&self, _stream_index: u32, _path: &str, _data: Vec<u8>) {}
        fn write_segment(&self, _stream_index: u32, path: &str, data: Vec<u8>, _info: SegmentInfo) {
            self.segments.lock().unwrap().push((path.to_owned(), data));
        }
    }

    fn video_info() -> Arc<StreamInfo> {
        Arc::new(StreamInfo {
            stream_type: StreamType::Video,
            codec: "h264".to_owned(),
            codec_private: vec![1, 0x64, 0, 0x1F, 0xFF, 0xE1, 0, 4, 0xAA, 0xBB, 0xCC, 0xDD, 0, 0],
            time_scale: 90_000,
            duration: TickDuration::new(0),
            language: "und".to_owned(),
            encrypted: false,
            media: MediaInfo::Video(VideoInfo { nal_length_size: 4, ..VideoInfo::default() }),
        })
    }

    fn audio_info() -> Arc<StreamInfo> {
        Arc::new(StreamInfo {
            stream_type: StreamType::Audio,
            codec: "aac".to_owned(),
            codec_private: vec![0x12, 0x10],
            time_scale: 48_000,
            duration: TickDuration::new(0),
            language: "und".to_owned(),
            encrypted: false,
            media: MediaInfo::Audio(AudioInfo::default()),
        })
    }

    fn sample(dts: i64, is_key_frame: bool, payload: &[u8]) -> MediaSample {
        MediaSample {
            dts: Ticks::new(dts),
            pts: Ticks::new(dts),
            duration: TickDuration::new(3000),
            is_key_frame,
            is_encrypted: false,
            payload: Arc::new(PaddedBytes::new(payload.to_vec())),
            side_data: None,
            decrypt_config: None,
        }
    }

    fn segment_info(number: u64) -> SegmentInfo {
        SegmentInfo {
            start_time: Ticks::new(0),
            duration: TickDuration::new(9000),
            is_subsegment: false,
            is_encrypted: false,
            segment_number: number,
        }
    }

    fn length_prefixed_nal(bytes: &[u8]) -> Vec<u8> {
        let mut out = u32::try_from(bytes.len()).unwrap().to_be_bytes().to_vec();
        out.extend_from_slice(bytes);
        out
    }

    #[tokio::test]
    async fn video_segment_starts_with_pat_and_pmt() {
        let sink = Arc::new(RecordingSink::new());
        let mut muxer = TsMuxer::new(1, TsOutputParams::default(), sink.clone(), Arc::new(DummyNotifier)).unwrap();

        muxer.process(0, StreamData::new(0, StreamDataPayload::StreamInfo(video_info()))).await;
        let nal = length_prefixed_nal(&[0x65, 1, 2, 3]);
        let status = muxer
            .process(0, StreamData::new(0, StreamDataPayload::MediaSample(sample(0, true, &nal))))
            .await;
        assert!(status.is_ok(), "{status}");
        muxer.process(0, StreamData::new(0, StreamDataPayload::SegmentInfo(segment_info(0)))).await;

        let segments = sink.segments.lock().unwrap();
        assert_eq!(1, segments.len());
        let data = &segments[0].1;
        assert_eq!(0x47, data[0]);
        assert_eq!(0x00, data[1] & 0x1F, "first packet pid must be 0 (PAT)");
        assert_eq!(0x47, data[188]);
        assert_eq!(psi::PMT_PID, (u16::from(data[188 + 1] & 0x1F) << 8) | u16::from(data[188 + 2]));
    }

    #[tokio::test]
    async fn audio_track_does_not_require_key_frames() {
        let sink = Arc::new(RecordingSink::new());
        let mut muxer = TsMuxer::new(1, TsOutputParams::default(), sink.clone(), Arc::new(DummyNotifier)).unwrap();

        muxer.process(0, StreamData::new(1, StreamDataPayload::StreamInfo(audio_info()))).await;
        let status = muxer
            .process(0, StreamData::new(1, StreamDataPayload::MediaSample(sample(0, false, &[9, 9, 9]))))
            .await;
        assert!(status.is_ok(), "{status}");
        muxer.on_flush_request(0).await;
        assert_eq!(1, sink.segments.lock().unwrap().len());
    }

    #[tokio::test]
    async fn rejects_sample_before_stream_info() {
        let sink = Arc::new(RecordingSink::new());
        let mut muxer = TsMuxer::new(1, TsOutputParams::default(), sink, Arc::new(DummyNotifier)).unwrap();
        let status = muxer
            .process(0, StreamData::new(0, StreamDataPayload::MediaSample(sample(0, true, &[1]))))
            .await;
        assert_eq!(ErrorKind::InvalidArgument, status.kind);
    }

    #[test]
    fn invalid_segment_template_rejected_at_construction() {
        let sink = Arc::new(RecordingSink::new());
        let result = TsMuxer::new(
            1,
            TsOutputParams { segment_template: Some("no-tokens.ts".to_owned()), ..TsOutputParams::default() },
            sink,
            Arc::new(DummyNotifier),
        );
        assert!(result.is_err());
    }
}
