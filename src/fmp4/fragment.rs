// SPDX-License-Identifier: GPL-2.0-or-later

//! Fragment generation: one `moof`+`mdat` per [`common::stream::SegmentInfo`]
//! boundary, built from the samples accumulated since the previous boundary.

use common::stream::{DecryptConfig, MediaSample};
use mp4::ImmutableBox;

use crate::error::GenerateFragmentError;

/// `sample_is_non_sync_sample`, bit 16 of the trun sample_flags field.
const SAMPLE_FLAG_NON_SYNC: u32 = 1 << 16;

const TRUN_FLAGS: u32 = mp4::TRUN_DATA_OFFSET_PRESENT
    | mp4::TRUN_SAMPLE_DURATION_PRESENT
    | mp4::TRUN_SAMPLE_SIZE_PRESENT
    | mp4::TRUN_SAMPLE_FLAGS_PRESENT
    | mp4::TRUN_SAMPLE_COMPOSITION_TIME_OFFSET_PRESENT;

pub struct FragmentParams<'a> {
    pub track_id: u32,
    pub sequence_number: u32,
    pub is_video: bool,
    /// `base_media_decode_time`: the first sample's dts, relative to the
    /// track's own zero point.
    pub base_media_decode_time: u64,
    pub samples: &'a [MediaSample],
}

pub fn generate_fragment(params: &FragmentParams) -> Result<Vec<u8>, GenerateFragmentError> {
    let first = params.samples.first().ok_or(GenerateFragmentError::Empty)?;
    if params.is_video && !first.is_key_frame {
        return Err(GenerateFragmentError::NotStartingOnKeyFrame);
    }

    let mfhd = mp4::Mfhd {
        full_box: mp4::FullBox::default(),
        sequence_number: params.sequence_number,
    };

    let tfhd = mp4::Tfhd {
        full_box: mp4::FullBox {
            version: 0,
            flags: mp4::u32_to_flags(mp4::TFHD_DEFAULT_BASE_IS_MOOF),
        },
        track_id: params.track_id,
        ..mp4::Tfhd::default()
    };

    let tfdt = mp4::Tfdt {
        flags: [0, 0, 0],
        base_media_decode_time: mp4::TfdtBaseMediaDecodeTime::V1(params.base_media_decode_time),
    };

    let mut trun_entries = Vec::with_capacity(params.samples.len());
    for sample in params.samples {
        trun_entries.push(mp4::TrunEntryV1 {
            sample_duration: u32::try_from(*sample.duration)
                .map_err(|_| GenerateFragmentError::SampleFieldOverflow("sample_duration", *sample.duration))?,
            sample_size: u32::try_from(sample.payload.len()).map_err(|_| {
                let len = i64::try_from(sample.payload.len()).unwrap_or(i64::MAX);
                GenerateFragmentError::SampleFieldOverflow("sample_size", len)
            })?,
            sample_flags: if sample.is_key_frame { 0 } else { SAMPLE_FLAG_NON_SYNC },
            sample_composition_time_offset: i32::try_from(*sample.pts - *sample.dts)
                .map_err(|_| GenerateFragmentError::CompositionOffsetOverflow(*sample.pts - *sample.dts))?,
        });
    }

    let mut trun = mp4::Trun {
        flags: mp4::u32_to_flags(TRUN_FLAGS),
        data_offset: 0,
        first_sample_flags: 0,
        entries: mp4::TrunEntries::V1(trun_entries),
    };

    let cenc = first.decrypt_config.as_ref().map(|cfg| build_cenc_boxes(params.samples, cfg));

    // saio always carries a single offset: it points at the start of senc's
    // aux info table, which itself holds every sample's entry.
    const SAIO_SIZE: usize = 8 /* fullbox header + entry_count */ + 8 /* one u64 offset */ + 8 /* box header */;

    let traf_header = 8_usize;
    let header_size = 8 /* moof */ + boxed_size(&mfhd) + traf_header + boxed_size(&tfhd) + boxed_size(&tfdt);
    let cenc_size: usize = cenc.as_ref().map_or(0, |c| boxed_size(&c.senc) + boxed_size(&c.saiz) + SAIO_SIZE);
    let trun_size = boxed_size(&trun);

    let moof_size = header_size + cenc_size + trun_size;
    trun.data_offset =
        i32::try_from(moof_size + 8).map_err(|_| GenerateFragmentError::DataOffsetOverflow(moof_size + 8))?;

    let mut traf = mp4::Boxes::new(mp4::Traf);
    traf = if let Some(cenc) = cenc {
        let saio_offset = header_size + 16;
        traf.with_children6(
            mp4::Boxes::new(tfhd),
            mp4::Boxes::new(tfdt),
            mp4::Boxes::new(cenc.senc),
            mp4::Boxes::new(cenc.saiz),
            mp4::Boxes::new(mp4::Saio {
                full_box: mp4::FullBox { version: 1, flags: [0, 0, 0] },
                aux_info_type: None,
                offsets: mp4::SaioOffsets::V1(vec![u64::try_from(saio_offset).unwrap_or(u64::MAX)]),
            }),
            mp4::Boxes::new(trun),
        )
    } else {
        traf.with_children3(mp4::Boxes::new(tfhd), mp4::Boxes::new(tfdt), mp4::Boxes::new(trun))
    };

    let moof = mp4::Boxes::new(mp4::Moof).with_children2(mp4::Boxes::new(mfhd), traf);

    let mut mdat_payload = Vec::with_capacity(params.samples.iter().map(MediaSample::len).sum());
    for sample in params.samples {
        mdat_payload.extend_from_slice(&sample.payload[..]);
    }
    let mdat = mp4::Boxes::new(mp4::Mdat(mdat_payload));

    let mut buf = Vec::with_capacity(moof.size() + mdat.size());
    moof.marshal(&mut buf)?;
    mdat.marshal(&mut buf)?;
    Ok(buf)
}

/// Size of `b` as it would appear boxed, i.e. including the 8-byte header
/// [`mp4::Boxes::size`] would add.
fn boxed_size(b: &impl ImmutableBox) -> usize {
    b.size() + 8
}

struct Cenc {
    senc: mp4::Senc,
    saiz: mp4::Saiz,
}

/// Builds `senc`/`saiz` from each sample's [`DecryptConfig`]. `saio`'s
/// offset depends on the size of everything ahead of it in the traf, so
/// it's computed by the caller once the rest of the traf is sized.
fn build_cenc_boxes(samples: &[MediaSample], first: &DecryptConfig) -> Cenc {
    let with_subsamples = !first.subsamples.is_empty();

    let mut senc_entries = Vec::with_capacity(samples.len());
    let mut sample_info_sizes = Vec::with_capacity(samples.len());
    let mut uniform_size: Option<u8> = None;

    for sample in samples {
        let cfg = sample.decrypt_config.as_ref().unwrap_or(first);
        let iv = cfg.iv.as_bytes().to_vec();
        let subsamples = cfg
            .subsamples
            .iter()
            .map(|s| mp4::SencSubsample {
                bytes_of_clear_data: s.clear_bytes,
                bytes_of_protected_data: s.cipher_bytes,
            })
            .collect::<Vec<_>>();

        let info_size = iv.len() + if with_subsamples { 2 + subsamples.len() * 6 } else { 0 };
        let info_size = u8::try_from(info_size).unwrap_or(u8::MAX);
        sample_info_sizes.push(info_size);
        uniform_size = match uniform_size {
            Some(size) if size == info_size => Some(size),
            Some(_) => None,
            None if senc_entries.is_empty() => Some(info_size),
            None => None,
        };

        senc_entries.push(mp4::SencEntry { iv, subsamples });
    }

    let senc = mp4::Senc {
        flags: mp4::u32_to_flags(if with_subsamples { mp4::SENC_USE_SUBSAMPLE_ENCRYPTION } else { 0 }),
        entries: senc_entries,
    };

    let saiz = match uniform_size {
        Some(size) => mp4::Saiz {
            flags: [0, 0, 0],
            aux_info_type: None,
            default_sample_info_size: size,
            sample_count: u32::try_from(samples.len()).unwrap_or(u32::MAX),
            sample_info_sizes: Vec::new(),
        },
        None => mp4::Saiz {
            flags: [0, 0, 0],
            aux_info_type: None,
            default_sample_info_size: 0,
            sample_count: u32::try_from(samples.len()).unwrap_or(u32::MAX),
            sample_info_sizes,
        },
    };

    Cenc { senc, saiz }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use common::stream::{Iv, ProtectionScheme, Subsample};
    use common::time::{TickDuration, Ticks};
    use sentryshot_padded_bytes::PaddedBytes;

    use super::*;

    fn sample(dts: i64, is_key_frame: bool, payload: Vec<u8>) -> MediaSample {
        MediaSample {
            dts: Ticks::new(dts),
            pts: Ticks::new(dts),
            duration: TickDuration::new(3000),
            is_key_frame,
            is_encrypted: false,
            payload: Arc::new(PaddedBytes::new(payload)),
            side_data: None,
            decrypt_config: None,
        }
    }

    #[test]
    fn rejects_empty_fragment() {
        let params = FragmentParams {
            track_id: 1,
            sequence_number: 1,
            is_video: true,
            base_media_decode_time: 0,
            samples: &[],
        };
        assert!(matches!(generate_fragment(&params), Err(GenerateFragmentError::Empty)));
    }

    #[test]
    fn rejects_video_fragment_not_starting_on_key_frame() {
        let samples = vec![sample(0, false, vec![1, 2, 3])];
        let params = FragmentParams {
            track_id: 1,
            sequence_number: 1,
            is_video: true,
            base_media_decode_time: 0,
            samples: &samples,
        };
        assert!(matches!(
            generate_fragment(&params),
            Err(GenerateFragmentError::NotStartingOnKeyFrame)
        ));
    }

    #[test]
    fn generates_moof_mdat_with_payload() {
        let samples = vec![sample(0, true, vec![1, 2, 3, 4]), sample(3000, false, vec![5, 6])];
        let params = FragmentParams {
            track_id: 1,
            sequence_number: 1,
            is_video: true,
            base_media_decode_time: 0,
            samples: &samples,
        };
        let got = generate_fragment(&params).unwrap();
        assert_eq!(b"moof", &got[4..8]);
        let moof_size = u32::from_be_bytes([got[0], got[1], got[2], got[3]]) as usize;
        assert_eq!(b"mdat", &got[moof_size + 4..moof_size + 8]);
        assert_eq!(&[1, 2, 3, 4, 5, 6], &got[moof_size + 8..]);
    }

    #[test]
    fn audio_fragment_does_not_require_key_frame() {
        let samples = vec![sample(0, false, vec![9, 9])];
        let params = FragmentParams {
            track_id: 2,
            sequence_number: 1,
            is_video: false,
            base_media_decode_time: 0,
            samples: &samples,
        };
        assert!(generate_fragment(&params).is_ok());
    }

    #[test]
    fn encrypted_fragment_emits_senc_saiz_saio() {
        let decrypt_config = DecryptConfig {
            key_id: [1; 16],
            iv: Iv::Bytes8([0; 8]),
            subsamples: vec![Subsample { clear_bytes: 5, cipher_bytes: 10 }],
            scheme: ProtectionScheme::Cenc,
            crypt_byte_block: 0,
            skip_byte_block: 0,
        };
        let mut s = sample(0, true, vec![0; 15]);
        s.is_encrypted = true;
        s.decrypt_config = Some(decrypt_config);
        let samples = vec![s];
        let params = FragmentParams {
            track_id: 1,
            sequence_number: 1,
            is_video: true,
            base_media_decode_time: 0,
            samples: &samples,
        };
        let got = generate_fragment(&params).unwrap();
        assert!(got.windows(4).any(|w| w == b"senc"));
        assert!(got.windows(4).any(|w| w == b"saiz"));
        assert!(got.windows(4).any(|w| w == b"saio"));
    }
}
