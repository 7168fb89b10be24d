// SPDX-License-Identifier: GPL-2.0-or-later

//! End-to-end checks that drive [`TsMuxer`] through the public
//! [`MediaHandler`] interface across multiple segment boundaries, rather
//! than each module's own unit tests in isolation.

#![allow(clippy::unwrap_used)]

use std::sync::{Arc, Mutex as StdMutex};

use common::time::{TickDuration, Ticks};
use common::{
    AudioInfo, DummyNotifier, MediaInfo, MediaSample, PaddedBytes, SegmentInfo, SegmentSink, StreamData,
    StreamDataPayload, StreamInfo, StreamType, TsOutputParams, VideoInfo,
};
use handler::MediaHandler;

use crate::muxer::TsMuxer;

struct RecordingSink {
    segments: StdMutex<Vec<(String, Vec<u8>)>>,
}

impl RecordingSink {
    fn new() -> Self {
        Self {
            segments: StdMutex::new(Vec::new()),
        }
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
        // version=1, profile=0x64, compat=0, level=0x1f, length_size=4,
        // numSPS=1, one 4-byte SPS, numPPS=1, one 2-byte PPS.
        codec_private: vec![1, 0x64, 0, 0x1f, 0xFF, 0xE1, 0, 4, 0xAA, 0xBB, 0xCC, 0xDD, 1, 0, 2, 0xEE, 0xFF],
        time_scale: 90_000,
        duration: TickDuration::new(0),
        language: "und".to_owned(),
        encrypted: false,
        media: MediaInfo::Video(VideoInfo {
            width: 1920,
            height: 1080,
            nal_length_size: 4,
            ..VideoInfo::default()
        }),
    })
}

fn audio_info() -> Arc<StreamInfo> {
    Arc::new(StreamInfo {
        stream_type: StreamType::Audio,
        codec: "aac".to_owned(),
        codec_private: vec![0x12, 0x10],
        time_scale: 48_000,
        duration: TickDuration::new(0),
        language: "eng".to_owned(),
        encrypted: false,
        media: MediaInfo::Audio(AudioInfo::default()),
    })
}

fn length_prefixed_nal(bytes: &[u8]) -> Vec<u8> {
    let mut out = u32::try_from(bytes.len()).unwrap().to_be_bytes().to_vec();
    out.extend_from_slice(bytes);
    out
}

fn video_sample(dts: i64, is_key_frame: bool) -> MediaSample {
    let nal = if is_key_frame { length_prefixed_nal(&[0x65, 1, 2, 3]) } else { length_prefixed_nal(&[0x61, 4, 5]) };
    MediaSample {
        dts: Ticks::new(dts),
        pts: Ticks::new(dts),
        duration: TickDuration::new(3000),
        is_key_frame,
        is_encrypted: false,
        payload: Arc::new(PaddedBytes::new(nal)),
        side_data: None,
        decrypt_config: None,
    }
}

fn audio_sample(dts: i64) -> MediaSample {
    MediaSample {
        dts: Ticks::new(dts),
        pts: Ticks::new(dts),
        duration: TickDuration::new(1024),
        is_key_frame: false,
        is_encrypted: false,
        payload: Arc::new(PaddedBytes::new(vec![1, 2, 3, 4])),
        side_data: None,
        decrypt_config: None,
    }
}

fn segment_info(start: i64, duration: i64, number: u64) -> SegmentInfo {
    SegmentInfo {
        start_time: Ticks::new(start),
        duration: TickDuration::new(duration),
        is_subsegment: false,
        is_encrypted: false,
        segment_number: number,
    }
}

#[tokio::test]
async fn video_track_emits_one_segment_per_boundary_with_pat_and_pmt() {
    let sink = Arc::new(RecordingSink::new());
    let mut muxer = TsMuxer::new(
        1,
        TsOutputParams {
            segment_template: Some("v-$Number$.ts".to_owned()),
            ..TsOutputParams::default()
        },
        sink.clone(),
        Arc::new(DummyNotifier),
    )
    .unwrap();

    muxer
        .process(0, StreamData::new(0, StreamDataPayload::StreamInfo(video_info())))
        .await;
    for (dts, is_key) in [(0, true), (3000, false), (6000, false)] {
        let status = muxer
            .process(0, StreamData::new(0, StreamDataPayload::MediaSample(video_sample(dts, is_key))))
            .await;
        assert!(status.is_ok(), "{status}");
    }
    muxer
        .process(0, StreamData::new(0, StreamDataPayload::SegmentInfo(segment_info(0, 9000, 0))))
        .await;

    let status = muxer
        .process(0, StreamData::new(0, StreamDataPayload::MediaSample(video_sample(9000, true))))
        .await;
    assert!(status.is_ok(), "{status}");
    muxer
        .process(0, StreamData::new(0, StreamDataPayload::SegmentInfo(segment_info(9000, 3000, 1))))
        .await;

    let segments = sink.segments.lock().unwrap();
    assert_eq!(2, segments.len());
    assert_eq!("v-0.ts", segments[0].0);
    assert_eq!("v-1.ts", segments[1].0);
    for (_, data) in segments.iter() {
        assert_eq!(0, data.len() % 188, "every segment is a whole number of TS packets");
        assert_eq!(0x47, data[0]);
        assert_eq!(0x47, data[188]);
    }
}

#[tokio::test]
async fn audio_track_flushes_trailing_samples_without_a_segment_boundary() {
    let sink = Arc::new(RecordingSink::new());
    let mut muxer = TsMuxer::new(2, TsOutputParams::default(), sink.clone(), Arc::new(DummyNotifier))
        .unwrap();

    muxer
        .process(0, StreamData::new(1, StreamDataPayload::StreamInfo(audio_info())))
        .await;
    for dts in [0, 1024, 2048] {
        let status = muxer
            .process(0, StreamData::new(1, StreamDataPayload::MediaSample(audio_sample(dts))))
            .await;
        assert!(status.is_ok(), "{status}");
    }
    muxer.on_flush_request(0).await;

    let segments = sink.segments.lock().unwrap();
    assert_eq!(1, segments.len());
    assert_eq!(0, segments[0].1.len() % 188);
}

#[tokio::test]
async fn non_monotonic_pts_is_rejected() {
    let sink = Arc::new(RecordingSink::new());
    let mut muxer = TsMuxer::new(3, TsOutputParams::default(), sink, Arc::new(DummyNotifier)).unwrap();

    muxer
        .process(0, StreamData::new(0, StreamDataPayload::StreamInfo(video_info())))
        .await;
    muxer
        .process(0, StreamData::new(0, StreamDataPayload::MediaSample(video_sample(3000, true))))
        .await;
    let status = muxer
        .process(0, StreamData::new(0, StreamDataPayload::MediaSample(video_sample(0, false))))
        .await;
    assert!(!status.is_ok(), "decreasing pts must be rejected");
}
