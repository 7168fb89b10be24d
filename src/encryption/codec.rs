// SPDX-License-Identifier: GPL-2.0-or-later

use common::StreamInfo;
use subsample::h26x::SpsInfo;
use subsample::{Codec, h26x};

use crate::error::EncryptionError;

/// Per-track codec context built once from `StreamInfo`, kept for the life
/// of the track so every sample can cheaply build a [`subsample::Codec`]
/// view onto it.
pub enum TrackCodec {
    Vp9,
    H264 { nal_length_size: u8, sps: SpsInfo },
    H265 { nal_length_size: u8 },
    Aac,
    Eac3,
    /// AV1 under a CENC-family scheme needs tile locations this handler has
    /// no frame-header parser to derive; falls back to full-sample
    /// encryption like any other opaque codec. Apple Sample-AES never
    /// reaches AV1 in practice (HLS doesn't carry it), so this only
    /// matters for `cenc`/`cens`/`cbc1`/`cbcs`.
    Av1,
    Opaque,
}

impl TrackCodec {
    pub fn as_subsample_codec(&self) -> Codec<'_> {
        match self {
            TrackCodec::Vp9 => Codec::Vp9,
            TrackCodec::H264 { nal_length_size, sps } => Codec::H264 {
                nal_length_size: *nal_length_size,
                sps,
            },
            TrackCodec::H265 { nal_length_size } => Codec::H265 {
                nal_length_size: *nal_length_size,
            },
            TrackCodec::Aac => Codec::Aac,
            TrackCodec::Eac3 => Codec::Eac3,
            TrackCodec::Av1 | TrackCodec::Opaque => Codec::Opaque,
        }
    }

    #[must_use]
    pub fn nal_length_size(&self) -> Option<u8> {
        match self {
            TrackCodec::H264 { nal_length_size, .. } | TrackCodec::H265 { nal_length_size } => {
                Some(*nal_length_size)
            }
            _ => None,
        }
    }
}

/// # Errors
/// Returns [`EncryptionError`] if the track claims an H.264 codec but its
/// `codec_private` doesn't parse as a usable SPS.
pub fn resolve(info: &StreamInfo) -> Result<TrackCodec, EncryptionError> {
    let nal_length_size = info.video().map_or(4, |v| v.nal_length_size.max(1));
    match info.codec.as_str() {
        "vp09" | "vp9" => Ok(TrackCodec::Vp9),
        "avc1" | "avc3" => {
            let sps = h26x::parse_sps(&info.codec_private)?;
            Ok(TrackCodec::H264 { nal_length_size, sps })
        }
        "hev1" | "hvc1" => Ok(TrackCodec::H265 { nal_length_size }),
        "av01" => Ok(TrackCodec::Av1),
        "mp4a" | "aac" => Ok(TrackCodec::Aac),
        "ec-3" | "eac3" => Ok(TrackCodec::Eac3),
        _ => Ok(TrackCodec::Opaque),
    }
}
