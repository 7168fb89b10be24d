// SPDX-License-Identifier: GPL-2.0-or-later

//! Init segment generation: `ftyp` + `moov` (`mvhd`, one `trak`, `mvex`).
//! One track per call, mirroring one [`crate::Mp4Muxer`] per track.

use common::stream::{AudioInfo, MediaInfo, ProtectionScheme, StreamInfo, VideoInfo};
use mp4::ImmutableBox;

use crate::error::GenerateInitError;

/// Movie-header timescale. Independent of the track's own `time_scale`.
const MOVIE_TIMESCALE: u32 = 1000;

/// How the initial composition offset (`pts - dts` of a track's first
/// sample) is carried into the init segment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EditListPolicy {
    /// Emit an `edts`/`elst` that shifts playback by the offset, so players
    /// honoring edit lists see `pts == dts` from the first sample onward.
    TrustOffsets,
    /// Omit the edit list. Playback starts at the container's zero point
    /// regardless of the first sample's composition offset.
    #[default]
    ResetToZero,
}

/// Per-track CENC wrapping info, present only for encrypted tracks. Feeds
/// the init segment's `sinf`/`schm`/`schi`/`tenc`; the per-sample
/// `senc`/`saiz`/`saio` boxes are generated per fragment instead.
pub struct InitEncryption {
    pub scheme: ProtectionScheme,
    pub key_id: [u8; 16],
    pub per_sample_iv_size: u8,
    pub constant_iv: Option<[u8; 16]>,
    pub crypt_byte_block: u8,
    pub skip_byte_block: u8,
}

pub struct InitParams<'a> {
    pub track_id: u32,
    pub stream_info: &'a StreamInfo,
    pub initial_composition_offset: i64,
    pub edit_list_policy: EditListPolicy,
    pub encryption: Option<&'a InitEncryption>,
}

pub fn generate_init(params: &InitParams) -> Result<Vec<u8>, GenerateInitError> {
    if matches!(params.stream_info.media, MediaInfo::Text) {
        return Err(GenerateInitError::TextTrack);
    }

    let ftyp = mp4::Boxes::new(mp4::Ftyp {
        major_brand: *b"iso5",
        minor_version: 512,
        compatible_brands: vec![
            mp4::CompatibleBrandElem(*b"iso5"),
            mp4::CompatibleBrandElem(*b"iso6"),
            mp4::CompatibleBrandElem(*b"mp41"),
            mp4::CompatibleBrandElem(*b"dash"),
        ],
    });

    let trak = generate_trak(params)?;

    let moov = mp4::Boxes::new(mp4::Moov).with_children3(
        mp4::Boxes::new(mp4::Mvhd {
            flags: [0, 0, 0],
            version: mp4::MvhdVersion::V0(mp4::MvhdV0::default()),
            timescale: MOVIE_TIMESCALE,
            rate: 0x0001_0000,
            volume: 0x0100,
            reserved: 0,
            reserved2: [0, 0],
            matrix: [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000],
            pre_defined: [0; 6],
            next_track_id: params.track_id + 1,
        }),
        trak,
        mp4::Boxes::new(mp4::Mvex).with_child(mp4::Boxes::new(mp4::Trex {
            full_box: mp4::FullBox::default(),
            track_id: params.track_id,
            default_sample_description_index: 1,
            default_sample_duration: 0,
            default_sample_size: 0,
            default_sample_flags: 0,
        })),
    );

    let size = ftyp.size() + moov.size();
    let mut buf = Vec::with_capacity(size);
    ftyp.marshal(&mut buf)?;
    moov.marshal(&mut buf)?;
    Ok(buf)
}

fn generate_trak(params: &InitParams) -> Result<mp4::Boxes, GenerateInitError> {
    let info = params.stream_info;
    let is_audio = matches!(info.media, MediaInfo::Audio(_));

    let media_box = mp4::Boxes::new(mp4::Stbl).with_children5(
        mp4::Boxes::new(mp4::Stsd {
            full_box: mp4::FullBox::default(),
            entry_count: 1,
        })
        .with_child(generate_sample_entry(params)?),
        mp4::Boxes::new(mp4::Stts::default()),
        mp4::Boxes::new(mp4::Stsc::default()),
        mp4::Boxes::new(mp4::Stsz::default()),
        mp4::Boxes::new(mp4::Stco::default()),
    );

    let media_header = if is_audio {
        mp4::Boxes::new(mp4::Smhd::default())
    } else {
        mp4::Boxes::new(mp4::Vmhd {
            full_box: mp4::FullBox {
                version: 0,
                flags: [0, 0, 1],
            },
            ..mp4::Vmhd::default()
        })
    };

    let minf = mp4::Boxes::new(mp4::Minf).with_children3(
        media_header,
        mp4::Boxes::new(mp4::Dinf).with_child(
            mp4::Boxes::new(mp4::Dref {
                full_box: mp4::FullBox::default(),
                entry_count: 1,
            })
            .with_child(mp4::Boxes::new(mp4::Url {
                full_box: mp4::FullBox {
                    version: 0,
                    flags: [0, 0, 1],
                },
                location: String::new(),
            })),
        ),
        media_box,
    );

    let mdia = mp4::Boxes::new(mp4::Mdia).with_children3(
        mp4::Boxes::new(mp4::Mdhd {
            flags: [0, 0, 0],
            version: mp4::MdhdVersion::V0(mp4::MdhdV0::default()),
            timescale: info.time_scale,
            pad: false,
            language: language_code(&info.language),
            pre_defined: 0,
        }),
        generate_hdlr(is_audio),
        minf,
    );

    let tkhd = generate_tkhd(params)?;

    let mut trak = mp4::Boxes::new(mp4::Trak);
    trak = if let Some(edts) = generate_edts(params)? {
        trak.with_children3(tkhd, edts, mdia)
    } else {
        trak.with_children2(tkhd, mdia)
    };
    Ok(trak)
}

fn generate_hdlr(is_audio: bool) -> mp4::Boxes {
    if is_audio {
        mp4::Boxes::new(mp4::Hdlr {
            handler_type: *b"soun",
            name: "SoundHandler".to_owned(),
            ..mp4::Hdlr::default()
        })
    } else {
        mp4::Boxes::new(mp4::Hdlr {
            handler_type: *b"vide",
            name: "VideoHandler".to_owned(),
            ..mp4::Hdlr::default()
        })
    }
}

fn generate_tkhd(params: &InitParams) -> Result<mp4::Boxes, GenerateInitError> {
    let info = params.stream_info;
    let (width, height) = match &info.media {
        MediaInfo::Video(VideoInfo { width, height, .. }) => {
            (u32::from(*width) * 65536, u32::from(*height) * 65536)
        }
        _ => (0, 0),
    };
    Ok(mp4::Boxes::new(mp4::Tkhd {
        flags: [0, 0, 3],
        version: mp4::TkhdVersion::V0(mp4::TkhdV0::default()),
        track_id: params.track_id,
        reserved0: 0,
        reserved1: [0, 0],
        layer: 0,
        alternate_group: 0,
        volume: if matches!(info.media, MediaInfo::Audio(_)) { 0x0100 } else { 0 },
        reserved2: 0,
        matrix: [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000],
        width,
        height,
    }))
}

/// Per [`EditListPolicy::TrustOffsets`], a single edit list entry shifting
/// playback by the first sample's composition offset, expressed in
/// `MOVIE_TIMESCALE` units. `None` when the policy resets to zero or the
/// offset is itself zero (an edit list would be a no-op).
fn generate_edts(params: &InitParams) -> Result<Option<mp4::Boxes>, GenerateInitError> {
    if params.edit_list_policy == EditListPolicy::ResetToZero || params.initial_composition_offset == 0 {
        return Ok(None);
    }
    let media_time = i32::try_from(common::time::rescale(
        params.initial_composition_offset,
        params.stream_info.time_scale,
        MOVIE_TIMESCALE,
    ))
    .map_err(|_| GenerateInitError::OffsetOverflow(params.initial_composition_offset))?;

    Ok(Some(
        mp4::Boxes::new(mp4::Edts).with_child(mp4::Boxes::new(mp4::Elst {
            flags: [0, 0, 0],
            entries: mp4::ElstEntries::V0(vec![mp4::ElstEntryV0 {
                segment_duration: 0,
                media_time,
                ..mp4::ElstEntryV0::default()
            }]),
        })),
    ))
}

fn generate_sample_entry(params: &InitParams) -> Result<mp4::Boxes, GenerateInitError> {
    match &params.stream_info.media {
        MediaInfo::Video(video) => generate_avc1(params, video),
        MediaInfo::Audio(audio) => generate_mp4a(params, audio),
        MediaInfo::Text => Err(GenerateInitError::TextTrack),
    }
}

fn generate_avc1(params: &InitParams, video: &VideoInfo) -> Result<mp4::Boxes, GenerateInitError> {
    let avc1 = mp4::Avc1 {
        sample_entry: mp4::SampleEntry {
            reserved: [0, 0, 0, 0, 0, 0],
            data_reference_index: 1,
        },
        width: video.width,
        height: video.height,
        horiz_resolution: 0x0048_0000,
        vert_resolution: 0x0048_0000,
        frame_count: 1,
        depth: 24,
        pre_defined3: -1,
        ..mp4::Avc1::default()
    };

    let avcc = mp4::Boxes::new(mp4::RawBox {
        box_type: mp4::TYPE_AVCC,
        data: params.stream_info.codec_private.clone(),
    });

    Ok(match params.encryption {
        None => mp4::Boxes::new(avc1).with_child(avcc),
        Some(enc) => mp4::Boxes::new(mp4::EncV(avc1)).with_children2(avcc, generate_sinf(enc, mp4::TYPE_AVC1)),
    })
}

fn generate_mp4a(params: &InitParams, audio: &AudioInfo) -> Result<mp4::Boxes, GenerateInitError> {
    let mp4a = mp4::Mp4a {
        sample_entry: mp4::SampleEntry {
            reserved: [0, 0, 0, 0, 0, 0],
            data_reference_index: 1,
        },
        reserved: [0, 0],
        channel_count: u16::from(audio.channels),
        sample_size: u16::from(audio.sample_size_bits),
        pre_defined: 0,
        reserved2: 0,
        sample_rate: audio.sampling_frequency << 16,
    };

    const OBJECT_TYPE_AAC: u8 = 0x40;
    const STREAM_TYPE_AUDIO: u8 = 0x05;

    let esds = mp4::Boxes::new(mp4::Esds {
        full_box: mp4::FullBox::default(),
        object_type_indication: OBJECT_TYPE_AAC,
        stream_type: STREAM_TYPE_AUDIO,
        buffer_size_db: 0,
        max_bitrate: audio.max_bitrate,
        avg_bitrate: audio.avg_bitrate,
        decoder_specific_info: params.stream_info.codec_private.clone(),
    });

    Ok(match params.encryption {
        None => mp4::Boxes::new(mp4a).with_child(esds),
        Some(enc) => mp4::Boxes::new(mp4::EncA(mp4a)).with_children2(esds, generate_sinf(enc, mp4::TYPE_MP4A)),
    })
}

fn generate_sinf(enc: &InitEncryption, original_format: mp4::BoxType) -> mp4::Boxes {
    let scheme_type = scheme_box_type(enc.scheme);

    let tenc = mp4::Tenc {
        full_box: mp4::FullBox {
            version: u8::from(enc.scheme.is_pattern()),
            flags: [0, 0, 0],
        },
        default_crypt_byte_block: enc.crypt_byte_block,
        default_skip_byte_block: enc.skip_byte_block,
        default_is_protected: 1,
        default_per_sample_iv_size: enc.per_sample_iv_size,
        default_kid: enc.key_id,
        default_constant_iv: enc.constant_iv.map_or_else(Vec::new, |iv| iv.to_vec()),
    };

    mp4::Boxes::new(mp4::Sinf).with_children3(
        mp4::Boxes::new(mp4::Frma { data_format: original_format }),
        mp4::Boxes::new(mp4::Schm {
            full_box: mp4::FullBox::default(),
            scheme_type,
            scheme_version: 0x0001_0000,
        }),
        mp4::Boxes::new(mp4::Schi).with_child(mp4::Boxes::new(tenc)),
    )
}

fn scheme_box_type(scheme: ProtectionScheme) -> mp4::BoxType {
    match scheme {
        ProtectionScheme::Cenc => *b"cenc",
        ProtectionScheme::Cens => *b"cens",
        ProtectionScheme::Cbc1 => *b"cbc1",
        ProtectionScheme::Cbcs | ProtectionScheme::AppleSampleAes => *b"cbcs",
    }
}

/// ISO-639-2/T is 3 lowercase letters packed 5 bits each; anything else
/// (missing or non-ASCII-lowercase language tags) maps to "und".
fn language_code(language: &str) -> [u8; 3] {
    let bytes = language.as_bytes();
    if bytes.len() == 3 && bytes.iter().all(u8::is_ascii_lowercase) {
        [bytes[0], bytes[1], bytes[2]]
    } else {
        *b"und"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use common::stream::{MediaInfo, StreamType, VideoInfo};
    use common::time::TickDuration;

    use super::*;

    fn video_stream_info() -> StreamInfo {
        StreamInfo {
            stream_type: StreamType::Video,
            codec: "h264".to_owned(),
            codec_private: vec![0x01, 0x64, 0x00, 0x16, 0x03],
            time_scale: 90_000,
            duration: TickDuration::new(0),
            language: "und".to_owned(),
            encrypted: false,
            media: MediaInfo::Video(VideoInfo {
                width: 1920,
                height: 1080,
                ..VideoInfo::default()
            }),
        }
    }

    #[test]
    fn generate_init_video_starts_with_ftyp_moov() {
        let info = video_stream_info();
        let params = InitParams {
            track_id: 1,
            stream_info: &info,
            initial_composition_offset: 0,
            edit_list_policy: EditListPolicy::ResetToZero,
            encryption: None,
        };
        let got = generate_init(&params).unwrap();
        assert_eq!(b"ftyp", &got[4..8]);
        let ftyp_size = u32::from_be_bytes([got[0], got[1], got[2], got[3]]) as usize;
        assert_eq!(b"moov", &got[ftyp_size + 4..ftyp_size + 8]);
    }

    #[test]
    fn generate_init_text_track_rejected() {
        let info = StreamInfo {
            stream_type: StreamType::Text,
            codec: String::new(),
            codec_private: Vec::new(),
            time_scale: 1000,
            duration: TickDuration::new(0),
            language: "und".to_owned(),
            encrypted: false,
            media: MediaInfo::Text,
        };
        let params = InitParams {
            track_id: 1,
            stream_info: &info,
            initial_composition_offset: 0,
            edit_list_policy: EditListPolicy::ResetToZero,
            encryption: None,
        };
        assert!(matches!(generate_init(&params), Err(GenerateInitError::TextTrack)));
    }

    #[test]
    fn edit_list_omitted_when_offset_is_zero() {
        let info = video_stream_info();
        let params = InitParams {
            track_id: 1,
            stream_info: &info,
            initial_composition_offset: 0,
            edit_list_policy: EditListPolicy::TrustOffsets,
            encryption: None,
        };
        assert!(generate_edts(&params).unwrap().is_none());
    }

    #[test]
    fn edit_list_present_when_offsets_trusted() {
        let info = video_stream_info();
        let params = InitParams {
            track_id: 1,
            stream_info: &info,
            initial_composition_offset: 9000,
            edit_list_policy: EditListPolicy::TrustOffsets,
            encryption: None,
        };
        assert!(generate_edts(&params).unwrap().is_some());
    }
}
