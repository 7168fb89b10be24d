// SPDX-License-Identifier: GPL-2.0-or-later

use std::sync::Arc;

use sentryshot_padded_bytes::PaddedBytes;

use crate::time::{TickDuration, Ticks};

/// Which kind of elementary stream a [`StreamInfo`] describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamType {
    Audio,
    Video,
    Text,
}

/// H.26x NAL framing convention.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NalFraming {
    AnnexB,
    LengthPrefixed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct PixelAspectRatio {
    pub num: u32,
    pub den: u32,
}

#[derive(Clone, Debug, Default)]
pub struct VideoInfo {
    pub width: u16,
    pub height: u16,
    pub pixel_aspect: PixelAspectRatio,
    pub nal_length_size: u8,
    pub framing: Option<NalFraming>,
    pub trick_play_factor: u32,
    pub playback_rate: f64,
}

#[derive(Clone, Debug, Default)]
pub struct AudioInfo {
    pub sample_size_bits: u8,
    pub channels: u8,
    pub sampling_frequency: u32,
    pub seek_preroll_ns: i64,
    pub codec_delay_ns: i64,
    pub max_bitrate: u32,
    pub avg_bitrate: u32,
}

#[derive(Clone, Debug)]
pub enum MediaInfo {
    Video(VideoInfo),
    Audio(AudioInfo),
    Text,
}

/// Invariant metadata of a track. Created once by a demuxer and flows
/// exactly once per track at graph start; immutable downstream except
/// through explicit `Clone` + field override (e.g. language rewrite).
#[derive(Clone, Debug)]
pub struct StreamInfo {
    pub stream_type: StreamType,
    pub codec: String,
    pub codec_private: Vec<u8>,
    pub time_scale: u32,
    // Duration in `time_scale` ticks. Zero means unknown.
    pub duration: TickDuration,
    pub language: String,
    pub encrypted: bool,
    pub media: MediaInfo,
}

impl StreamInfo {
    #[must_use]
    pub fn is_video(&self) -> bool {
        self.stream_type == StreamType::Video
    }

    #[must_use]
    pub fn video(&self) -> Option<&VideoInfo> {
        match &self.media {
            MediaInfo::Video(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn audio(&self) -> Option<&AudioInfo> {
        match &self.media {
            MediaInfo::Audio(a) => Some(a),
            _ => None,
        }
    }

    // Returns a copy with `encrypted` set and the given language override,
    // the two documented in-place overrides a downstream handler may apply
    // to an otherwise-immutable `StreamInfo`.
    #[must_use]
    pub fn with_encrypted(&self, encrypted: bool) -> Self {
        let mut out = self.clone();
        out.encrypted = encrypted;
        out
    }

    #[must_use]
    pub fn with_language(&self, language: String) -> Self {
        let mut out = self.clone();
        out.language = language;
        out
    }
}

/// One (clear_bytes, cipher_bytes) span of a subsample-encrypted sample.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Subsample {
    pub clear_bytes: u16,
    pub cipher_bytes: u32,
}

/// Common Encryption protection scheme, plus Apple's Sample-AES variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtectionScheme {
    Cenc,
    Cens,
    Cbc1,
    Cbcs,
    AppleSampleAes,
}

impl ProtectionScheme {
    #[must_use]
    pub fn is_pattern(self) -> bool {
        matches!(self, ProtectionScheme::Cens | ProtectionScheme::Cbcs)
    }

    // Whether the container layer performs the AES operation (CENC family)
    // or the encryption handler encrypts bytes itself (Sample-AES).
    #[must_use]
    pub fn is_cenc_family(self) -> bool {
        !matches!(self, ProtectionScheme::AppleSampleAes)
    }

    // Cipher spans must land on 16-byte boundaries for every scheme except
    // `cbcs`, per spec.
    #[must_use]
    pub fn requires_block_alignment(self) -> bool {
        !matches!(self, ProtectionScheme::Cbcs)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Iv {
    Bytes8([u8; 8]),
    Bytes16([u8; 16]),
    // `cbcs` constant-iv policy: the same 16 bytes for every sample under
    // the current key.
    Constant([u8; 16]),
}

impl Iv {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Iv::Bytes8(b) => b.as_slice(),
            Iv::Bytes16(b) | Iv::Constant(b) => b.as_slice(),
        }
    }

    // Increments an 8- or 16-byte counter IV by `blocks`. No-op for a
    // constant IV.
    #[must_use]
    pub fn incremented(self, blocks: u64) -> Self {
        match self {
            Iv::Bytes8(b) => {
                let v = u64::from_be_bytes(b).wrapping_add(blocks);
                Iv::Bytes8(v.to_be_bytes())
            }
            Iv::Bytes16(b) => {
                let v = u128::from_be_bytes(b).wrapping_add(u128::from(blocks));
                Iv::Bytes16(v.to_be_bytes())
            }
            Iv::Constant(b) => Iv::Constant(b),
        }
    }
}

// ceil(size / 16), the per-sample IV-counter increment for cenc/cens/cbc1.
#[must_use]
pub fn iv_blocks_for_size(size: usize) -> u64 {
    #[allow(clippy::as_conversions)]
    (((size + 15) / 16) as u64)
}

/// Per-sample decryption metadata attached by the `EncryptionHandler`.
#[derive(Clone, Debug)]
pub struct DecryptConfig {
    pub key_id: [u8; 16],
    pub iv: Iv,
    pub subsamples: Vec<Subsample>,
    pub scheme: ProtectionScheme,
    pub crypt_byte_block: u8,
    pub skip_byte_block: u8,
}

impl DecryptConfig {
    // Sum of (clear+cipher) across all subsamples; callers compare this
    // against the sample payload length to check totality.
    #[must_use]
    pub fn subsample_total(&self) -> u64 {
        self.subsamples
            .iter()
            .map(|s| u64::from(s.clear_bytes) + u64::from(s.cipher_bytes))
            .sum()
    }
}

/// One elementary access unit.
#[derive(Clone, Debug)]
pub struct MediaSample {
    pub dts: Ticks,
    pub pts: Ticks,
    pub duration: TickDuration,
    pub is_key_frame: bool,
    pub is_encrypted: bool,
    pub payload: Arc<PaddedBytes>,
    pub side_data: Option<Arc<PaddedBytes>>,
    pub decrypt_config: Option<DecryptConfig>,
}

impl MediaSample {
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextFormat {
    Ttml,
    WebVtt,
}

#[derive(Clone, Debug)]
pub struct TextSample {
    pub pts: Ticks,
    pub duration: TickDuration,
    pub format: TextFormat,
    pub payload: Arc<PaddedBytes>,
}

/// A segment or subsegment boundary marker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SegmentInfo {
    pub start_time: Ticks,
    pub duration: TickDuration,
    pub is_subsegment: bool,
    pub is_encrypted: bool,
    pub segment_number: u64,
}

/// An upstream-driven cue boundary (ad break, chapter mark, ...).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CueEvent {
    pub time: Ticks,
}

/// Side-band event carried alongside samples, e.g. a key rotation notice
/// the `EncryptionHandler` emits to the muxer's listener interface.
#[derive(Clone, Debug)]
pub enum MediaEvent {
    KeyUpdate {
        key_id: [u8; 16],
        crypto_period_index: u64,
    },
}

/// A DRM content key plus any protection-system-specific init data.
#[derive(Clone, Debug)]
pub struct EncryptionKey {
    pub key_id: [u8; 16],
    pub key: [u8; 16],
    pub iv_seed: [u8; 16],
    pub protection_system_data: Vec<ProtectionSystemData>,
}

#[derive(Clone, Debug)]
pub struct ProtectionSystemData {
    pub system_id: [u8; 16],
    pub data: Vec<u8>,
}

/// Tagged union of everything that flows along a handler edge, tagged with
/// the output port (`stream_index`) it belongs to.
#[derive(Clone, Debug)]
pub struct StreamData {
    pub stream_index: u32,
    pub payload: StreamDataPayload,
}

impl StreamData {
    #[must_use]
    pub fn new(stream_index: u32, payload: StreamDataPayload) -> Self {
        Self {
            stream_index,
            payload,
        }
    }
}

#[derive(Clone, Debug)]
pub enum StreamDataPayload {
    StreamInfo(Arc<StreamInfo>),
    MediaSample(MediaSample),
    TextSample(TextSample),
    SegmentInfo(SegmentInfo),
    CueEvent(CueEvent),
    MediaEvent(MediaEvent),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_subsample_total() {
        let cfg = DecryptConfig {
            key_id: [0; 16],
            iv: Iv::Bytes8([0; 8]),
            subsamples: vec![
                Subsample {
                    clear_bytes: 12,
                    cipher_bytes: 32,
                },
                Subsample {
                    clear_bytes: 6,
                    cipher_bytes: 0,
                },
            ],
            scheme: ProtectionScheme::Cenc,
            crypt_byte_block: 0,
            skip_byte_block: 0,
        };
        assert_eq!(50, cfg.subsample_total());
    }

    #[test]
    fn test_iv_increment_8() {
        let iv = Iv::Bytes8([0, 0, 0, 0, 0, 0, 0, 1]);
        let Iv::Bytes8(b) = iv.incremented(1) else {
            panic!("expected 8 byte iv")
        };
        assert_eq!([0, 0, 0, 0, 0, 0, 0, 2], b);
    }

    #[test]
    fn test_iv_blocks_for_size() {
        assert_eq!(0, iv_blocks_for_size(0));
        assert_eq!(1, iv_blocks_for_size(1));
        assert_eq!(1, iv_blocks_for_size(16));
        assert_eq!(2, iv_blocks_for_size(17));
    }
}
