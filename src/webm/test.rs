// SPDX-License-Identifier: GPL-2.0-or-later

//! End-to-end checks that drive [`WebmMuxer`] through the public
//! [`MediaHandler`] interface across multiple segment boundaries.

#![allow(clippy::unwrap_used)]

use std::sync::{Arc, Mutex as StdMutex};

use common::time::{TickDuration, Ticks};
use common::{
    AudioInfo, DummyNotifier, MediaInfo, MediaSample, PaddedBytes, SegmentInfo, SegmentSink, StreamData,
    StreamDataPayload, StreamInfo, StreamType, VideoInfo, WebmOutputParams,
};
use handler::MediaHandler;

use crate::ebml::ids;
use crate::muxer::WebmMuxer;

struct RecordingSink {
    init: StdMutex<Vec<Vec<u8>>>,
    segments: StdMutex<Vec<(String, Vec<u8>)>>,
}

impl RecordingSink {
    fn new() -> Self {
        Self { init: StdMutex::new(Vec::new()), segments: StdMutex::new(Vec::new()) }
    }
}

impl SegmentSink for RecordingSink {
    fn write_init_segment(&self, _stream_index: u32, _path: &str, data: Vec<u8>) {
        self.init.lock().unwrap().push(data);
    }
    fn write_segment(&self, _stream_index: u32, path: &str, data: Vec<u8>, _info: SegmentInfo) {
        self.segments.lock().unwrap().push((path.to_owned(), data));
    }
}

fn video_info() -> Arc<StreamInfo> {
    Arc::new(StreamInfo {
        stream_type: StreamType::Video,
        codec: "vp9".to_owned(),
        codec_private: Vec::new(),
        time_scale: 90_000,
        duration: TickDuration::new(0),
        language: "und".to_owned(),
        encrypted: false,
        media: MediaInfo::Video(VideoInfo { width: 1280, height: 720, ..VideoInfo::default() }),
    })
}

fn audio_info() -> Arc<StreamInfo> {
    Arc::new(StreamInfo {
        stream_type: StreamType::Audio,
        codec: "opus".to_owned(),
        codec_private: vec![0u8; 19],
        time_scale: 48_000,
        duration: TickDuration::new(0),
        language: "eng".to_owned(),
        encrypted: false,
        media: MediaInfo::Audio(AudioInfo { channels: 2, sampling_frequency: 48_000, ..AudioInfo::default() }),
    })
}

fn video_sample(dts: i64, is_key_frame: bool) -> MediaSample {
    MediaSample {
        dts: Ticks::new(dts),
        pts: Ticks::new(dts),
        duration: TickDuration::new(3000),
        is_key_frame,
        is_encrypted: false,
        payload: Arc::new(PaddedBytes::new(vec![0xAA; 32])),
        side_data: None,
        decrypt_config: None,
    }
}

fn audio_sample(dts: i64) -> MediaSample {
    MediaSample {
        dts: Ticks::new(dts),
        pts: Ticks::new(dts),
        duration: TickDuration::new(960),
        is_key_frame: false,
        is_encrypted: false,
        payload: Arc::new(PaddedBytes::new(vec![1, 2, 3, 4])),
        side_data: None,
        decrypt_config: None,
    }
}

fn segment_info(start: i64, duration: i64, number: u64) -> SegmentInfo {
    SegmentInfo { start_time: Ticks::new(start), duration: TickDuration::new(duration), is_subsegment: false, is_encrypted: false, segment_number: number }
}

#[tokio::test]
async fn video_track_emits_one_cluster_segment_per_boundary() {
    let sink = Arc::new(RecordingSink::new());
    let mut muxer = WebmMuxer::new(
        1,
        WebmOutputParams { segment_template: Some("v-$Number$.webm".to_owned()), ..WebmOutputParams::default() },
        sink.clone(),
        Arc::new(DummyNotifier),
    )
    .unwrap();

    muxer.process(0, StreamData::new(0, StreamDataPayload::StreamInfo(video_info()))).await;
    for (dts, is_key) in [(0, true), (3000, false), (6000, false)] {
        let status = muxer.process(0, StreamData::new(0, StreamDataPayload::MediaSample(video_sample(dts, is_key)))).await;
        assert!(status.is_ok(), "{status}");
    }
    muxer.process(0, StreamData::new(0, StreamDataPayload::SegmentInfo(segment_info(0, 9000, 0)))).await;

    let status = muxer.process(0, StreamData::new(0, StreamDataPayload::MediaSample(video_sample(9000, true)))).await;
    assert!(status.is_ok(), "{status}");
    muxer.process(0, StreamData::new(0, StreamDataPayload::SegmentInfo(segment_info(9000, 3000, 1)))).await;

    assert_eq!(1, sink.init.lock().unwrap().len());
    let segments = sink.segments.lock().unwrap();
    assert_eq!(2, segments.len());
    assert_eq!("v-0.webm", segments[0].0);
    assert_eq!("v-1.webm", segments[1].0);
    for (_, data) in segments.iter() {
        assert_eq!(ids::CLUSTER, &data[0..4], "each segment is a standalone Cluster");
    }
}

#[tokio::test]
async fn audio_track_flushes_trailing_samples_without_a_segment_boundary() {
    let sink = Arc::new(RecordingSink::new());
    let mut muxer = WebmMuxer::new(2, WebmOutputParams::default(), sink.clone(), Arc::new(DummyNotifier)).unwrap();

    muxer.process(0, StreamData::new(1, StreamDataPayload::StreamInfo(audio_info()))).await;
    for dts in [0, 960, 1920] {
        let status = muxer.process(0, StreamData::new(1, StreamDataPayload::MediaSample(audio_sample(dts)))).await;
        assert!(status.is_ok(), "{status}");
    }
    muxer.on_flush_request(0).await;

    let segments = sink.segments.lock().unwrap();
    assert_eq!(1, segments.len());
    assert_eq!(ids::CLUSTER, &segments[0].1[0..4]);
}

#[tokio::test]
async fn non_monotonic_dts_is_rejected() {
    let sink = Arc::new(RecordingSink::new());
    let mut muxer = WebmMuxer::new(3, WebmOutputParams::default(), sink, Arc::new(DummyNotifier)).unwrap();

    muxer.process(0, StreamData::new(0, StreamDataPayload::StreamInfo(video_info()))).await;
    muxer.process(0, StreamData::new(0, StreamDataPayload::MediaSample(video_sample(3000, true)))).await;
    let status = muxer.process(0, StreamData::new(0, StreamDataPayload::MediaSample(video_sample(0, false)))).await;
    assert!(!status.is_ok(), "decreasing dts must be rejected");
}
