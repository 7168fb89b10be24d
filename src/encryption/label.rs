// SPDX-License-Identifier: GPL-2.0-or-later

use common::{MediaInfo, StreamInfo};

// Pixel-count buckets for the default stream-label policy. Thresholds
// follow the common SD/HD/4K/8K break points used by packaging tools in
// this space; spec.md leaves the exact cutoffs unspecified.
const SD_MAX_PIXELS: u64 = 768 * 576;
const HD_MAX_PIXELS: u64 = 1920 * 1080;
const UHD1_MAX_PIXELS: u64 = 3840 * 2160;

fn bucket_for_pixels(pixels: u64) -> &'static str {
    if pixels <= SD_MAX_PIXELS {
        "SD"
    } else if pixels <= HD_MAX_PIXELS {
        "HD"
    } else if pixels <= UHD1_MAX_PIXELS {
        "UHD1"
    } else {
        "UHD2"
    }
}

/// Resolves the stream-label used to look a key up from the `KeySource`.
/// A caller override always wins; otherwise video tracks bucket by pixel
/// count and everything else falls back to a fixed label.
#[must_use]
pub fn resolve(info: &StreamInfo, override_label: Option<&str>) -> String {
    if let Some(label) = override_label {
        return label.to_owned();
    }
    match &info.media {
        MediaInfo::Video(v) => bucket_for_pixels(u64::from(v.width) * u64::from(v.height)).to_owned(),
        MediaInfo::Audio(_) => "AUDIO".to_owned(),
        MediaInfo::Text => "TEXT".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use common::{AudioInfo, PixelAspectRatio, VideoInfo};

    use super::*;

    fn video(width: u16, height: u16) -> StreamInfo {
        StreamInfo {
            stream_type: common::StreamType::Video,
            codec: "avc1".to_owned(),
            codec_private: Vec::new(),
            time_scale: 90_000,
            duration: common::time::TickDuration::new(0),
            language: "und".to_owned(),
            encrypted: false,
            media: MediaInfo::Video(VideoInfo {
                width,
                height,
                pixel_aspect: PixelAspectRatio::default(),
                nal_length_size: 4,
                framing: None,
                trick_play_factor: 1,
                playback_rate: 1.0,
            }),
        }
    }

    #[test]
    fn buckets_sd_hd_uhd1_uhd2() {
        assert_eq!("SD", resolve(&video(720, 480), None));
        assert_eq!("HD", resolve(&video(1920, 1080), None));
        assert_eq!("UHD1", resolve(&video(3840, 2160), None));
        assert_eq!("UHD2", resolve(&video(7680, 4320), None));
    }

    #[test]
    fn audio_label_is_fixed() {
        let info = StreamInfo {
            stream_type: common::StreamType::Audio,
            codec: "aac".to_owned(),
            codec_private: Vec::new(),
            time_scale: 48_000,
            duration: common::time::TickDuration::new(0),
            language: "und".to_owned(),
            encrypted: false,
            media: MediaInfo::Audio(AudioInfo::default()),
        };
        assert_eq!("AUDIO", resolve(&info, None));
    }

    #[test]
    fn override_wins_regardless_of_media() {
        assert_eq!("CUSTOM", resolve(&video(1920, 1080), Some("CUSTOM")));
    }
}
