// SPDX-License-Identifier: GPL-2.0-or-later

//! Traits standing in for the external collaborators spec.md §1 lists as
//! out of scope: DRM key acquisition and MPD/HLS manifest generation.

use async_trait::async_trait;
use thiserror::Error;

use crate::stream::{EncryptionKey, MediaEvent, SegmentInfo};

#[derive(Debug, Error)]
#[error("no key available for label '{0}'")]
pub struct KeySourceError(pub String);

/// External DRM key acquisition collaborator (spec.md §1, §4.4).
#[async_trait]
pub trait KeySource {
    async fn key_for_label(
        &self,
        stream_label: &str,
        crypto_period_index: u64,
    ) -> Result<EncryptionKey, KeySourceError>;
}

/// External manifest-writing collaborator (MPD/HLS playlist text, spec.md
/// §1). Handlers notify it of segment boundaries and key rotations rather
/// than writing manifests themselves.
pub trait Notifier {
    fn segment_ready(&self, stream_index: u32, segment_number: u64);
    fn media_event(&self, stream_index: u32, event: &MediaEvent);
}

pub struct DummyNotifier;

impl Notifier for DummyNotifier {
    fn segment_ready(&self, _stream_index: u32, _segment_number: u64) {}
    fn media_event(&self, _stream_index: u32, _event: &MediaEvent) {}
}

/// External segment-storage collaborator. A muxer (`fmp4`, `ts`, `webm`)
/// never opens a file itself; it hands finished init segments and media
/// segments to this, keeping `MediaHandler::process` free of I/O.
pub trait SegmentSink: Send + Sync {
    fn write_init_segment(&self, stream_index: u32, path: &str, data: Vec<u8>);
    fn write_segment(&self, stream_index: u32, path: &str, data: Vec<u8>, info: SegmentInfo);
}

pub struct DummySegmentSink;

impl SegmentSink for DummySegmentSink {
    fn write_init_segment(&self, _stream_index: u32, _path: &str, _data: Vec<u8>) {}
    fn write_segment(&self, _stream_index: u32, _path: &str, _data: Vec<u8>, _info: SegmentInfo) {}
}
