// SPDX-License-Identifier: GPL-2.0-or-later

//! Consistent chunking: injects `SegmentInfo`/`CueEvent` boundary messages
//! into an otherwise-unmodified sample stream so two independently running
//! chunkers fed aligned GoPs make byte-identical boundary decisions without
//! talking to each other.

use std::sync::Arc;

use async_trait::async_trait;
use common::time::Ticks;
use common::{ChunkingParams, CueEvent, MediaSample, SegmentInfo, StreamData, StreamDataPayload, StreamInfo};
use handler::{ErrorKind, MediaHandler, Ports, SharedHandler, Status};

#[derive(Clone, Copy)]
struct Boundaries {
    segment_ticks: i64,
    subsegment_ticks: Option<i64>,
}

impl Boundaries {
    fn from_params(params: &ChunkingParams, time_scale: u32) -> Self {
        let segment_ticks = seconds_to_ticks(params.segment_duration_s, time_scale);
        let subsegment_ticks = params
            .subsegments_enabled()
            .then(|| seconds_to_ticks(params.subsegment_duration_s.unwrap_or_default(), time_scale));
        Self {
            segment_ticks,
            subsegment_ticks,
        }
    }
}

fn seconds_to_ticks(seconds: f64, time_scale: u32) -> i64 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    {
        (seconds * f64::from(time_scale)).round() as i64
    }
}

fn end_of(sample: &MediaSample) -> Ticks {
    sample.dts.checked_add(sample.duration).unwrap_or(sample.dts)
}

// State once the first chunkable sample has been seen and a segment is
// open. `prev_dts` anchors the next boundary decision (bucket comparison
// is always against the last processed sample's dts, or the cue time if a
// cue just closed the segment).
struct Open {
    is_video: bool,
    boundaries: Boundaries,
    stream_index: u32,
    segment_start: Ticks,
    subsegment_start: Ticks,
    prev_dts: Ticks,
    last_sample_end: Ticks,
    segment_number: u64,
}

/// Injects segment/subsegment boundaries ahead of the sample that starts a
/// new one. One instance handles exactly one track; input and output both
/// live on port 0, with the track identified by the `stream_index` carried
/// on every message rather than by the port number.
pub struct ChunkingHandler {
    params: ChunkingParams,
    pending: Option<(bool, Boundaries)>,
    open: Option<Open>,
    ports: Ports,
}

impl ChunkingHandler {
    #[must_use]
    pub fn new(params: ChunkingParams) -> Self {
        Self {
            params,
            pending: None,
            open: None,
            ports: Ports::new(),
        }
    }

    async fn forward(&self, stream_index: u32, payload: StreamDataPayload) -> Status {
        self.ports.dispatch(StreamData::new(stream_index, payload)).await
    }

    async fn process_stream_info(&mut self, stream_index: u32, info: Arc<StreamInfo>) -> Status {
        let boundaries = Boundaries::from_params(&self.params, info.time_scale);
        self.pending = Some((info.is_video(), boundaries));
        self.open = None;
        self.forward(stream_index, StreamDataPayload::StreamInfo(info)).await
    }

    async fn process_sample(&mut self, stream_index: u32, sample: MediaSample) -> Status {
        let Some((is_video, boundaries)) = self.pending else {
            return Status::new(
                ErrorKind::InvalidArgument,
                "media sample arrived before stream info",
            );
        };

        if self.open.is_none() {
            if is_video && !sample.is_key_frame {
                // No GoP has started yet; drop leading non-key frames.
                return Status::ok();
            }
            self.open = Some(Open {
                is_video,
                boundaries,
                stream_index,
                segment_start: sample.dts,
                subsegment_start: sample.dts,
                prev_dts: sample.dts,
                last_sample_end: end_of(&sample),
                segment_number: 0,
            });
            return self
                .forward(stream_index, StreamDataPayload::MediaSample(sample))
                .await;
        }

        let (prev_dts, is_video, seg_ticks, sub_ticks) = {
            let open = self.open.as_ref().expect("checked above");
            (
                open.prev_dts,
                open.is_video,
                open.boundaries.segment_ticks,
                open.boundaries.subsegment_ticks,
            )
        };

        if sample.dts < prev_dts {
            return Status::new(ErrorKind::InvalidArgument, "non-monotonic dts");
        }
        if sample.duration.is_negative() {
            return Status::new(ErrorKind::InvalidArgument, "negative sample duration");
        }

        let chunkable = !is_video || sample.is_key_frame;
        if chunkable {
            let full_boundary = sample.dts.bucket(seg_ticks) != prev_dts.bucket(seg_ticks);
            if full_boundary {
                let status = self.close_segment(sample.dts).await;
                if status.is_error() {
                    return status;
                }
            } else if let Some(sub_ticks) = sub_ticks {
                let sub_boundary = sample.dts.bucket(sub_ticks) != prev_dts.bucket(sub_ticks);
                if sub_boundary {
                    let status = self.close_subsegment(sample.dts).await;
                    if status.is_error() {
                        return status;
                    }
                }
            }
        }

        if let Some(open) = self.open.as_mut() {
            open.prev_dts = sample.dts;
            open.last_sample_end = end_of(&sample);
        }

        self.forward(stream_index, StreamDataPayload::MediaSample(sample)).await
    }

    /// Closes the currently open segment at `boundary_dts` (the dts of the
    /// sample that starts the next one) and reopens bookkeeping from there.
    async fn close_segment(&mut self, boundary_dts: Ticks) -> Status {
        let Some(open) = self.open.as_mut() else {
            return Status::ok();
        };
        let Some(duration) = boundary_dts.checked_sub(open.segment_start) else {
            return Status::new(ErrorKind::Internal, "segment duration overflow");
        };
        let info = SegmentInfo {
            start_time: open.segment_start,
            duration,
            is_subsegment: false,
            is_encrypted: false,
            segment_number: open.segment_number,
        };
        let stream_index = open.stream_index;
        open.segment_number += 1;
        open.segment_start = boundary_dts;
        open.subsegment_start = boundary_dts;
        self.forward(stream_index, StreamDataPayload::SegmentInfo(info)).await
    }

    async fn close_subsegment(&mut self, boundary_dts: Ticks) -> Status {
        let Some(open) = self.open.as_mut() else {
            return Status::ok();
        };
        let Some(duration) = boundary_dts.checked_sub(open.subsegment_start) else {
            return Status::new(ErrorKind::Internal, "subsegment duration overflow");
        };
        let info = SegmentInfo {
            start_time: open.subsegment_start,
            duration,
            is_subsegment: true,
            is_encrypted: false,
            segment_number: open.segment_number,
        };
        let stream_index = open.stream_index;
        open.subsegment_start = boundary_dts;
        self.forward(stream_index, StreamDataPayload::SegmentInfo(info)).await
    }

    /// Closes the open segment immediately at the cue, even mid-GoP, then
    /// forwards the cue and restarts bookkeeping so the next segment begins
    /// at the cue time.
    async fn process_cue(&mut self, stream_index: u32, cue: CueEvent) -> Status {
        if self.open.is_some() {
            let status = self.close_segment(cue.time).await;
            if status.is_error() {
                return status;
            }
        }
        let status = self.forward(stream_index, StreamDataPayload::CueEvent(cue)).await;
        if status.is_error() {
            return status;
        }
        if let Some(open) = self.open.as_mut() {
            open.prev_dts = cue.time;
        }
        Status::ok()
    }

    /// Closes the open segment using the running end-of-content mark
    /// (`last_sample_end`) rather than a boundary-sample dts, since flush
    /// has no next sample to anchor on.
    async fn flush_open_segment(&mut self) -> Status {
        let Some(open) = self.open.as_ref() else {
            return Status::ok();
        };
        let last_end = open.last_sample_end;
        self.close_segment(last_end).await
    }
}

#[async_trait]
impl MediaHandler for ChunkingHandler {
    async fn process(&mut self, input_port: u32, data: StreamData) -> Status {
        if input_port != 0 {
            return Status::new(
                ErrorKind::InvalidArgument,
                format!("chunking handler has no input port {input_port}"),
            );
        }
        match data.payload {
            StreamDataPayload::StreamInfo(info) => self.process_stream_info(data.stream_index, info).await,
            StreamDataPayload::MediaSample(sample) => self.process_sample(data.stream_index, sample).await,
            StreamDataPayload::CueEvent(cue) => self.process_cue(data.stream_index, cue).await,
            StreamDataPayload::TextSample(sample) => {
                self.forward(data.stream_index, StreamDataPayload::TextSample(sample)).await
            }
            StreamDataPayload::MediaEvent(event) => {
                self.forward(data.stream_index, StreamDataPayload::MediaEvent(event)).await
            }
            StreamDataPayload::SegmentInfo(_) => Status::new(
                ErrorKind::InvalidArgument,
                "chunking handler does not accept SegmentInfo as input",
            ),
        }
    }

    async fn on_flush_request(&mut self, input_port: u32) -> Status {
        if input_port != 0 {
            return Status::new(
                ErrorKind::InvalidArgument,
                format!("chunking handler has no input port {input_port}"),
            );
        }
        let status = self.flush_open_segment().await;
        if status.is_error() {
            return status;
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

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use common::time::TickDuration;
    use common::{AudioInfo, MediaInfo, PaddedBytes, VideoInfo};
    use tokio::sync::Mutex;

    use super::*;

    struct Recorder {
        events: Vec<StreamDataPayload>,
    }

    #[async_trait]
    impl MediaHandler for Recorder {
        async fn process(&mut self, _input_port: u32, data: StreamData) -> Status {
            self.events.push(data.payload);
            Status::ok()
        }
        async fn on_flush_request(&mut self, _input_port: u32) -> Status {
            Status::ok()
        }
        fn add_output(&mut self, _output_port: u32, _consumer: SharedHandler, _consumer_input_port: u32) {}
        fn known_input_ports(&self) -> Vec<u32> {
            vec![0]
        }
        fn declared_output_ports(&self) -> Vec<u32> {
            vec![]
        }
    }

    fn params(segment_s: f64, subsegment_s: Option<f64>) -> ChunkingParams {
        ChunkingParams {
            segment_duration_s: segment_s,
            subsegment_duration_s: subsegment_s,
            segment_sap_aligned: true,
            subsegment_sap_aligned: true,
        }
    }

    fn audio_info(time_scale: u32) -> Arc<StreamInfo> {
        Arc::new(StreamInfo {
            stream_type: common::StreamType::Audio,
            codec: "aac".to_owned(),
            codec_private: Vec::new(),
            time_scale,
            duration: TickDuration::new(0),
            language: "und".to_owned(),
            encrypted: false,
            media: MediaInfo::Audio(AudioInfo::default()),
        })
    }

    fn video_info(time_scale: u32) -> Arc<StreamInfo> {
        Arc::new(StreamInfo {
            stream_type: common::StreamType::Video,
            codec: "avc1".to_owned(),
            codec_private: Vec::new(),
            time_scale,
            duration: TickDuration::new(0),
            language: "und".to_owned(),
            encrypted: false,
            media: MediaInfo::Video(VideoInfo::default()),
        })
    }

    fn sample(dts: i64, duration: i64, is_key_frame: bool) -> MediaSample {
        MediaSample {
            dts: Ticks::new(dts),
            pts: Ticks::new(dts),
            duration: TickDuration::new(duration),
            is_key_frame,
            is_encrypted: false,
            payload: Arc::new(PaddedBytes::new(Vec::new())),
            side_data: None,
            decrypt_config: None,
        }
    }

    fn segment_infos(events: &[StreamDataPayload]) -> Vec<SegmentInfo> {
        events
            .iter()
            .filter_map(|e| match e {
                StreamDataPayload::SegmentInfo(info) => Some(*info),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn audio_no_subsegments_flush() {
        let mut handler = ChunkingHandler::new(params(1.0, None));
        let recorder = Arc::new(Mutex::new(Recorder { events: Vec::new() }));
        handler.add_output(0, recorder.clone(), 0);

        handler
            .process(0, StreamData::new(0, StreamDataPayload::StreamInfo(audio_info(800))))
            .await;
        for dts in [0, 300, 600, 900, 1200] {
            let status = handler
                .process(0, StreamData::new(0, StreamDataPayload::MediaSample(sample(dts, 300, true))))
                .await;
            assert!(status.is_ok(), "{status}");
        }
        handler.on_flush_request(0).await;

        let events = recorder.lock().await.events.clone();
        let segments = segment_infos(&events);
        assert_eq!(
            vec![
                SegmentInfo {
                    start_time: Ticks::new(0),
                    duration: TickDuration::new(900),
                    is_subsegment: false,
                    is_encrypted: false,
                    segment_number: 0,
                },
                SegmentInfo {
                    start_time: Ticks::new(900),
                    duration: TickDuration::new(600),
                    is_subsegment: false,
                    is_encrypted: false,
                    segment_number: 1,
                },
            ],
            segments
        );

        let sample_count = events
            .iter()
            .filter(|e| matches!(e, StreamDataPayload::MediaSample(_)))
            .count();
        assert_eq!(5, sample_count);
    }

    #[tokio::test]
    async fn video_with_subsegment_drops_leading_non_key_frame() {
        let mut handler = ChunkingHandler::new(params(1.0, Some(0.3)));
        let recorder = Arc::new(Mutex::new(Recorder { events: Vec::new() }));
        handler.add_output(0, recorder.clone(), 0);

        handler
            .process(0, StreamData::new(0, StreamDataPayload::StreamInfo(video_info(1000))))
            .await;

        let dts_for = |i: i64| 12345 + i * 300;
        for i in 0..6i64 {
            let is_key = i % 2 == 1;
            let status = handler
                .process(
                    0,
                    StreamData::new(0, StreamDataPayload::MediaSample(sample(dts_for(i), 300, is_key))),
                )
                .await;
            assert!(status.is_ok(), "{status}");
        }

        let events = recorder.lock().await.events.clone();
        let sample_count = events
            .iter()
            .filter(|e| matches!(e, StreamDataPayload::MediaSample(_)))
            .count();
        assert_eq!(5, sample_count, "the leading non-key frame is dropped");

        let segments = segment_infos(&events);
        assert_eq!(
            vec![
                SegmentInfo {
                    start_time: Ticks::new(dts_for(1)),
                    duration: TickDuration::new(600),
                    is_subsegment: false,
                    is_encrypted: false,
                    segment_number: 0,
                },
                SegmentInfo {
                    start_time: Ticks::new(dts_for(3)),
                    duration: TickDuration::new(600),
                    is_subsegment: true,
                    is_encrypted: false,
                    segment_number: 1,
                },
            ],
            segments
        );
    }

    #[tokio::test]
    async fn cue_event_closes_segment_mid_gop() {
        let mut handler = ChunkingHandler::new(params(1.0, None));
        let recorder = Arc::new(Mutex::new(Recorder { events: Vec::new() }));
        handler.add_output(0, recorder.clone(), 0);

        handler
            .process(0, StreamData::new(0, StreamDataPayload::StreamInfo(video_info(1000))))
            .await;
        handler
            .process(0, StreamData::new(0, StreamDataPayload::MediaSample(sample(12345, 300, true))))
            .await;
        handler
            .process(0, StreamData::new(0, StreamDataPayload::CueEvent(CueEvent { time: Ticks::new(12645) })))
            .await;
        handler
            .process(0, StreamData::new(0, StreamDataPayload::MediaSample(sample(12645, 300, true))))
            .await;

        let events = recorder.lock().await.events.clone();
        let segments = segment_infos(&events);
        assert_eq!(
            vec![SegmentInfo {
                start_time: Ticks::new(12345),
                duration: TickDuration::new(300),
                is_subsegment: false,
                is_encrypted: false,
                segment_number: 0,
            }],
            segments
        );

        // Order: sample@12345, SegmentInfo, CueEvent, sample@12645.
        assert!(matches!(events[0], StreamDataPayload::MediaSample(_)));
        assert!(matches!(events[1], StreamDataPayload::SegmentInfo(_)));
        assert!(matches!(events[2], StreamDataPayload::CueEvent(_)));
        assert!(matches!(events[3], StreamDataPayload::MediaSample(_)));
    }

    #[tokio::test]
    async fn non_monotonic_dts_is_fatal() {
        let mut handler = ChunkingHandler::new(params(1.0, None));
        let recorder = Arc::new(Mutex::new(Recorder { events: Vec::new() }));
        handler.add_output(0, recorder.clone(), 0);

        handler
            .process(0, StreamData::new(0, StreamDataPayload::StreamInfo(audio_info(800))))
            .await;
        handler
            .process(0, StreamData::new(0, StreamDataPayload::MediaSample(sample(300, 300, true))))
            .await;
        let status = handler
            .process(0, StreamData::new(0, StreamDataPayload::MediaSample(sample(0, 300, true))))
            .await;
        assert_eq!(ErrorKind::InvalidArgument, status.kind);
    }
}
