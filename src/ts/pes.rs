// SPDX-License-Identifier: GPL-2.0-or-later

//! PES packet generation: Annex-B conversion (with parameter-set injection
//! at key frames) for H.264/H.265, ADTS wrapping for AAC, and the PTS/DTS
//! law that governs which fields a packet actually encodes.

use common::stream::{MediaSample, StreamInfo};
use common::time::{Mpeg2Ticks, MPEG2_TIMESCALE};
use subsample::h26x;

use crate::error::PesError;

pub const STREAM_ID_VIDEO: u8 = 0xE0;
pub const STREAM_ID_AUDIO: u8 = 0xC0;

/// One PES packet: a `stream_id`, timestamps already rescaled to the fixed
/// 90kHz MPEG-2 clock, and an access unit's worth of payload.
pub struct PesPacket {
    pub stream_id: u8,
    pub pts: Mpeg2Ticks,
    /// Only `Some` when it differs from `pts` — the PES/PTS law says a
    /// `dts` equal to `pts` is not separately encoded.
    pub dts: Option<Mpeg2Ticks>,
    pub is_key_frame: bool,
    pub payload: Vec<u8>,
}

enum Payload {
    Video {
        nal_length_size: u8,
        parameter_sets: Vec<Vec<u8>>,
        already_annex_b: bool,
    },
    Audio {
        object_type: u8,
        sampling_frequency_index: u8,
        channel_configuration: u8,
    },
}

/// Per-track state built once from a [`StreamInfo`], reused for every
/// sample on that track.
pub struct PesGenerator {
    stream_id: u8,
    time_scale: u32,
    offset_ticks: i64,
    payload: Payload,
}

impl PesGenerator {
    /// # Errors
    /// Returns [`PesError`] if the codec isn't H.264/H.265/AAC, or its
    /// `codec_private` doesn't parse as the expected configuration record.
    pub fn new(stream_info: &StreamInfo, offset_s: f64) -> Result<Self, PesError> {
        let offset_ticks = i64_from_offset_seconds(offset_s);
        if stream_info.is_video() {
            let video = stream_info.video().ok_or(PesError::MalformedAvcC("missing VideoInfo"))?;
            let already_annex_b = matches!(video.framing, Some(common::stream::NalFraming::AnnexB));
            let parameter_sets = if already_annex_b {
                Vec::new()
            } else {
                match stream_info.codec.as_str() {
                    "h264" | "avc" | "avc1" => parse_avcc_parameter_sets(&stream_info.codec_private)?,
                    "h265" | "hevc" | "hvc1" => parse_hvcc_parameter_sets(&stream_info.codec_private)?,
                    other => return Err(PesError::UnsupportedVideoCodec(other.to_owned())),
                }
            };
            Ok(Self {
                stream_id: STREAM_ID_VIDEO,
                time_scale: stream_info.time_scale,
                offset_ticks,
                payload: Payload::Video {
                    nal_length_size: video.nal_length_size,
                    parameter_sets,
                    already_annex_b,
                },
            })
        } else {
            match stream_info.codec.as_str() {
                "aac" | "mp4a" => {
                    let config = parse_audio_specific_config(&stream_info.codec_private)?;
                    Ok(Self {
                        stream_id: STREAM_ID_AUDIO,
                        time_scale: stream_info.time_scale,
                        offset_ticks,
                        payload: Payload::Audio {
                            object_type: config.object_type,
                            sampling_frequency_index: config.sampling_frequency_index,
                            channel_configuration: config.channel_configuration,
                        },
                    })
                }
                other => Err(PesError::UnsupportedAudioCodec(other.to_owned())),
            }
        }
    }

    /// # Errors
    /// Returns [`PesError`] if the sample's NAL framing doesn't parse.
    pub fn generate(&self, sample: &MediaSample) -> Result<PesPacket, PesError> {
        let pts_ticks = *Mpeg2Ticks::from_stream_ticks(sample.pts, self.time_scale) + self.offset_ticks;
        let dts_ticks = *Mpeg2Ticks::from_stream_ticks(sample.dts, self.time_scale) + self.offset_ticks;
        let pts = Mpeg2Ticks::new(pts_ticks);
        let dts = if dts_ticks == pts_ticks { None } else { Some(Mpeg2Ticks::new(dts_ticks)) };

        let payload = match &self.payload {
            Payload::Video {
                nal_length_size,
                parameter_sets,
                already_annex_b,
            } => {
                if *already_annex_b {
                    sample.payload[..].to_vec()
                } else {
                    let nals = h26x::split_length_prefixed(&sample.payload[..], *nal_length_size)?;
                    let parameter_set_refs: Vec<&[u8]> = parameter_sets.iter().map(Vec::as_slice).collect();
                    h26x::to_annex_b(&parameter_set_refs, &nals, sample.is_key_frame)
                }
            }
            Payload::Audio {
                object_type,
                sampling_frequency_index,
                channel_configuration,
            } => {
                let mut out = Vec::with_capacity(7 + sample.payload.len());
                out.extend_from_slice(&build_adts_header(
                    *object_type,
                    *sampling_frequency_index,
                    *channel_configuration,
                    sample.payload.len(),
                ));
                out.extend_from_slice(&sample.payload[..]);
                out
            }
        };

        Ok(PesPacket {
            stream_id: self.stream_id,
            pts,
            dts,
            is_key_frame: sample.is_key_frame,
            payload,
        })
    }
}

fn i64_from_offset_seconds(offset_s: f64) -> i64 {
    #[allow(clippy::cast_possible_truncation)]
    {
        (offset_s * f64::from(MPEG2_TIMESCALE)).round() as i64
    }
}

/// Extracts the SPS/PPS NAL units out of an ISO/IEC 14496-15 `avcC` record.
/// `mp4::AvcC` only marshals a structured record; this is its inverse for
/// the handful of fields a TS muxer needs, applied to the same wire layout.
fn parse_avcc_parameter_sets(data: &[u8]) -> Result<Vec<Vec<u8>>, PesError> {
    let mut pos = 5usize; // configurationVersion, profile, compat, level, length_size byte
    let num_sps = usize::from(*data.get(pos).ok_or(PesError::MalformedAvcC("truncated before numOfSPS"))? & 0b0001_1111);
    pos += 1;
    let mut sets = Vec::with_capacity(num_sps);
    for _ in 0..num_sps {
        pos = read_length_prefixed_set(data, pos, &mut sets)?;
    }
    let num_pps = usize::from(*data.get(pos).ok_or(PesError::MalformedAvcC("truncated before numOfPPS"))?);
    pos += 1;
    for _ in 0..num_pps {
        pos = read_length_prefixed_set(data, pos, &mut sets)?;
    }
    Ok(sets)
}

fn read_length_prefixed_set(data: &[u8], pos: usize, out: &mut Vec<Vec<u8>>) -> Result<usize, PesError> {
    let len_bytes = data
        .get(pos..pos + 2)
        .ok_or(PesError::MalformedAvcC("truncated parameter set length"))?;
    let len = usize::from(u16::from_be_bytes([len_bytes[0], len_bytes[1]]));
    let start = pos + 2;
    let set = data
        .get(start..start + len)
        .ok_or(PesError::MalformedAvcC("truncated parameter set data"))?;
    out.push(set.to_vec());
    Ok(start + len)
}

/// Extracts VPS/SPS/PPS NAL units (in array order) out of an ISO/IEC
/// 14496-15 `hvcC` record's fixed 22-byte header followed by
/// `numOfArrays` NAL-unit-type groups.
fn parse_hvcc_parameter_sets(data: &[u8]) -> Result<Vec<Vec<u8>>, PesError> {
    const FIXED_HEADER_LEN: usize = 22;
    let num_arrays = usize::from(*data.get(FIXED_HEADER_LEN).ok_or(PesError::MalformedHvcC("truncated before numOfArrays"))?);
    let mut pos = FIXED_HEADER_LEN + 1;
    let mut sets = Vec::new();
    for _ in 0..num_arrays {
        pos += 1; // array_completeness(1) + reserved(1) + NAL_unit_type(6)
        let count_bytes = data
            .get(pos..pos + 2)
            .ok_or(PesError::MalformedHvcC("truncated numNalus"))?;
        let count = u16::from_be_bytes([count_bytes[0], count_bytes[1]]);
        pos += 2;
        for _ in 0..count {
            pos = read_length_prefixed_set(data, pos, &mut sets)?;
        }
    }
    Ok(sets)
}

struct AudioSpecificConfig {
    object_type: u8,
    sampling_frequency_index: u8,
    channel_configuration: u8,
}

/// Parses the 5-bit `audioObjectType` / 4-bit `samplingFrequencyIndex` /
/// 4-bit `channelConfiguration` triple out of a raw ISO/IEC 14496-3
/// `AudioSpecificConfig`, the same bytes `mp4::Esds::decoder_specific_info`
/// carries verbatim.
fn parse_audio_specific_config(data: &[u8]) -> Result<AudioSpecificConfig, PesError> {
    let bytes = data
        .get(0..2)
        .ok_or(PesError::MalformedAudioSpecificConfig("need at least 2 bytes"))?;
    let object_type = bytes[0] >> 3;
    let sampling_frequency_index = ((bytes[0] & 0b0000_0111) << 1) | (bytes[1] >> 7);
    let channel_configuration = (bytes[1] >> 3) & 0b0000_1111;
    Ok(AudioSpecificConfig {
        object_type,
        sampling_frequency_index,
        channel_configuration,
    })
}

/// Builds a 7-byte ADTS header (no CRC) for one raw AAC frame.
fn build_adts_header(object_type: u8, sampling_frequency_index: u8, channel_configuration: u8, payload_len: usize) -> [u8; 7] {
    let frame_len = u32::try_from(payload_len + 7).unwrap_or(u32::MAX) & 0x1FFF;
    let profile = object_type.saturating_sub(1) & 0b11;

    let mut header = [0u8; 7];
    header[0] = 0xFF;
    header[1] = 0xF1; // syncword low bits, ID=0 (MPEG-4), layer=00, protection_absent=1
    header[2] = (profile << 6) | ((sampling_frequency_index & 0b1111) << 2) | ((channel_configuration >> 2) & 0b1);
    let frame_len_high2 = u8::try_from((frame_len >> 11) & 0b11).unwrap_or(0);
    let frame_len_mid8 = u8::try_from((frame_len >> 3) & 0xFF).unwrap_or(0);
    let frame_len_low3 = u8::try_from(frame_len & 0b111).unwrap_or(0);
    header[3] = ((channel_configuration & 0b11) << 6) | frame_len_high2;
    header[4] = frame_len_mid8;
    header[5] = (frame_len_low3 << 5) | 0b0001_1111;
    header[6] = 0xFC;
    header
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use common::stream::{MediaInfo, NalFraming, StreamType, VideoInfo};
    use common::time::{TickDuration, Ticks};
    use sentryshot_padded_bytes::PaddedBytes;

    use super::*;

    fn video_stream_info(codec_private: Vec<u8>) -> StreamInfo {
        StreamInfo {
            stream_type: StreamType::Video,
            codec: "h264".to_owned(),
            codec_private,
            time_scale: 90_000,
            duration: TickDuration::new(0),
            language: "und".to_owned(),
            encrypted: false,
            media: MediaInfo::Video(VideoInfo {
                width: 640,
                height: 480,
                nal_length_size: 4,
                ..VideoInfo::default()
            }),
        }
    }

    // A minimal avcC: version=1, profile=0x64, compat=0, level=0x1f,
    // length_size_minus_one packed = 0xFF, numSPS=1 | 0xE0,
    // one 4-byte SPS `AA BB CC DD`, numPPS=1, one 2-byte PPS `EE FF`.
    fn minimal_avcc() -> Vec<u8> {
        vec![1, 0x64, 0, 0x1f, 0xFF, 0xE1, 0, 4, 0xAA, 0xBB, 0xCC, 0xDD, 1, 0, 2, 0xEE, 0xFF]
    }

    fn sample(dts: i64, pts: i64, is_key_frame: bool, payload: Vec<u8>) -> MediaSample {
        MediaSample {
            dts: Ticks::new(dts),
            pts: Ticks::new(pts),
            duration: TickDuration::new(3000),
            is_key_frame,
            is_encrypted: false,
            payload: Arc::new(PaddedBytes::new(payload)),
            side_data: None,
            decrypt_config: None,
        }
    }

    #[test]
    fn parses_avcc_parameter_sets() {
        let sets = parse_avcc_parameter_sets(&minimal_avcc()).unwrap();
        assert_eq!(vec![vec![0xAA, 0xBB, 0xCC, 0xDD], vec![0xEE, 0xFF]], sets);
    }

    #[test]
    fn keyframe_injects_aud_and_parameter_sets() {
        let info = video_stream_info(minimal_avcc());
        let gen = PesGenerator::new(&info, 0.0).unwrap();
        // one 3-byte NAL, length-prefixed with a 4-byte length field.
        let payload = vec![0, 0, 0, 3, 0x65, 1, 2];
        let pes = gen.generate(&sample(0, 0, true, payload)).unwrap();
        assert_eq!(STREAM_ID_VIDEO, pes.stream_id);
        assert!(pes.payload.windows(4).any(|w| w == [0, 0, 0, 1]));
        assert!(pes.payload.windows(4).any(|w| w == [0xAA, 0xBB, 0xCC, 0xDD]));
    }

    #[test]
    fn dts_omitted_when_equal_to_pts() {
        let info = video_stream_info(minimal_avcc());
        let gen = PesGenerator::new(&info, 0.0).unwrap();
        let payload = vec![0, 0, 0, 3, 0x61, 1, 2];
        let pes = gen.generate(&sample(0, 0, false, payload)).unwrap();
        assert_eq!(None, pes.dts);
    }

    #[test]
    fn dts_present_when_it_differs_from_pts() {
        let info = video_stream_info(minimal_avcc());
        let gen = PesGenerator::new(&info, 0.0).unwrap();
        let payload = vec![0, 0, 0, 3, 0x61, 1, 2];
        let pes = gen.generate(&sample(0, 3000, false, payload)).unwrap();
        assert_eq!(Some(common::time::Mpeg2Ticks::new(3000)), pes.dts);
    }

    #[test]
    fn wraps_aac_sample_in_adts_header() {
        let info = StreamInfo {
            stream_type: StreamType::Audio,
            codec: "aac".to_owned(),
            codec_private: vec![0x11, 0x90], // AAC-LC, 44100Hz, stereo
            time_scale: 48_000,
            duration: TickDuration::new(0),
            language: "und".to_owned(),
            encrypted: false,
            media: MediaInfo::Audio(common::stream::AudioInfo::default()),
        };
        let gen = PesGenerator::new(&info, 0.0).unwrap();
        let pes = gen.generate(&sample(0, 0, false, vec![1, 2, 3])).unwrap();
        assert_eq!(STREAM_ID_AUDIO, pes.stream_id);
        assert_eq!(0xFF, pes.payload[0]);
        assert_eq!(10, pes.payload.len());
        assert_eq!(&[1, 2, 3], &pes.payload[7..]);
    }
}
