// SPDX-License-Identifier: GPL-2.0-or-later

pub mod aac;
pub mod av1;
pub mod bitreader;
pub mod builder;
pub mod eac3;
pub mod error;
pub mod h26x;
pub mod vp9;

use common::{ProtectionScheme, Subsample};

pub use error::SubsampleError;

/// Per-codec parse context an [`crate::Codec`] needs to locate the clear
/// spans of a sample; built by the caller (typically the encryption
/// handler) from the track's `StreamInfo`.
pub enum Codec<'a> {
    Vp9,
    H264 {
        nal_length_size: u8,
        sps: &'a h26x::SpsInfo,
    },
    H265 {
        nal_length_size: u8,
    },
    Av1 {
        tiles: &'a [av1::Tile],
    },
    Aac,
    Eac3,
    /// Any other codec, or full-sample encryption: no subsamples.
    Opaque,
}

/// Computes the subsample list for one encrypted sample payload.
///
/// # Errors
/// Returns [`SubsampleError`] if the payload doesn't parse as the claimed
/// codec's bitstream.
pub fn generate(
    codec: &Codec,
    scheme: ProtectionScheme,
    payload: &[u8],
) -> Result<Vec<Subsample>, SubsampleError> {
    let align = scheme.requires_block_alignment();
    match codec {
        Codec::Vp9 => vp9::generate_subsamples(payload, align),
        Codec::H264 {
            nal_length_size,
            sps,
        } => {
            if scheme == ProtectionScheme::AppleSampleAes {
                h26x::generate_subsamples_apple(payload, *nal_length_size)
            } else {
                h26x::generate_subsamples_cenc(payload, *nal_length_size, sps, align)
            }
        }
        Codec::H265 { nal_length_size } => {
            if scheme == ProtectionScheme::AppleSampleAes {
                h26x::generate_subsamples_apple(payload, *nal_length_size)
            } else {
                Err(SubsampleError::Unsupported {
                    codec: "h265",
                    detail: "CENC-family slice header parsing not implemented for HEVC"
                        .to_owned(),
                })
            }
        }
        Codec::Av1 { tiles } => av1::generate_subsamples(payload.len(), tiles, align),
        Codec::Aac => Ok(aac::generate_subsamples(payload.len())),
        Codec::Eac3 => eac3::generate_subsamples(payload, align),
        Codec::Opaque => Ok(Vec::new()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn opaque_codec_emits_no_subsamples() {
        let subs = generate(&Codec::Opaque, ProtectionScheme::Cenc, &[1, 2, 3]).unwrap();
        assert!(subs.is_empty());
    }

    #[test]
    fn aac_dispatch_matches_module_function() {
        let via_dispatch = generate(&Codec::Aac, ProtectionScheme::AppleSampleAes, &[0u8; 100])
            .unwrap();
        let direct = aac::generate_subsamples(100);
        assert_eq!(direct, via_dispatch);
    }

    #[test]
    fn h265_cenc_is_explicitly_unsupported() {
        let err = generate(
            &Codec::H265 { nal_length_size: 4 },
            ProtectionScheme::Cenc,
            &[0u8; 10],
        )
        .unwrap_err();
        assert!(matches!(err, SubsampleError::Unsupported { codec: "h265", .. }));
    }
}
