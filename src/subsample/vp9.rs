// SPDX-License-Identifier: GPL-2.0-or-later

use common::Subsample;

use crate::bitreader::BitReader;
use crate::builder::SubsampleBuilder;
use crate::error::SubsampleError;

const FRAME_SYNC_CODE: [u8; 3] = [0x49, 0x83, 0x42];
const MAX_TILE_WIDTH_B64: u32 = 64;
const MIN_TILE_WIDTH_B64: u32 = 4;

// VP9 superframe index, annex B.2. Returns the per-subframe sizes plus the
// total index size in bytes, or `None` if `data` doesn't end in a valid
// superframe marker (i.e. it's a single, bare frame).
#[must_use]
pub fn parse_superframe_index(data: &[u8]) -> Option<Vec<usize>> {
    let last = *data.last()?;
    if last >> 5 != 0b110 {
        return None;
    }
    let bytes_per_framesize = usize::from((last >> 3) & 0b11) + 1;
    let frame_count = usize::from(last & 0b111) + 1;
    let index_size = 2 + bytes_per_framesize * frame_count;
    if data.len() < index_size {
        return None;
    }
    let first = data[data.len() - index_size];
    if first != last {
        return None;
    }
    let mut sizes = Vec::with_capacity(frame_count);
    let mut pos = data.len() - index_size + 1;
    for _ in 0..frame_count {
        let mut size = 0usize;
        for i in 0..bytes_per_framesize {
            size |= usize::from(data[pos + i]) << (8 * i);
        }
        sizes.push(size);
        pos += bytes_per_framesize;
    }
    if sizes.iter().sum::<usize>() > data.len() - index_size {
        return None;
    }
    Some(sizes)
}

fn read_prob(r: &mut BitReader) -> Result<(), SubsampleError> {
    if r.bit()? == 1 {
        r.u(8)?;
    }
    Ok(())
}

fn color_config(r: &mut BitReader, profile: u32) -> Result<(), SubsampleError> {
    if profile >= 2 {
        r.bit()?; // ten_or_twelve_bit
    }
    let color_space = r.u(3)?;
    const CS_RGB: u32 = 7;
    if color_space != CS_RGB {
        r.bit()?; // color_range
        if profile == 1 || profile == 3 {
            r.u(2)?; // subsampling_x/y
            r.bit()?; // reserved_zero
        }
    } else if profile == 1 || profile == 3 {
        r.bit()?; // reserved_zero
    }
    Ok(())
}

fn frame_size(r: &mut BitReader) -> Result<u32, SubsampleError> {
    let width = r.u(16)? + 1;
    r.u(16)?; // height_minus_1
    Ok(width)
}

fn render_size(r: &mut BitReader) -> Result<(), SubsampleError> {
    if r.bit()? == 1 {
        r.u(16)?;
        r.u(16)?;
    }
    Ok(())
}

fn loop_filter_params(r: &mut BitReader) -> Result<(), SubsampleError> {
    r.u(6)?; // level
    r.u(3)?; // sharpness
    if r.bit()? == 1 {
        // delta_enabled
        if r.bit()? == 1 {
            // delta_update
            for _ in 0..4 {
                if r.bit()? == 1 {
                    r.u(7)?; // magnitude + sign
                }
            }
            for _ in 0..2 {
                if r.bit()? == 1 {
                    r.u(7)?;
                }
            }
        }
    }
    Ok(())
}

fn read_delta_q(r: &mut BitReader) -> Result<u32, SubsampleError> {
    if r.bit()? == 1 { r.u(5) } else { Ok(0) }
}

fn quantization_params(r: &mut BitReader) -> Result<(), SubsampleError> {
    r.u(8)?; // base_q_idx
    read_delta_q(r)?;
    read_delta_q(r)?;
    read_delta_q(r)?;
    Ok(())
}

const SEG_FEATURE_BITS: [u32; 4] = [8, 6, 2, 0];
const SEG_FEATURE_SIGNED: [bool; 4] = [true, true, false, false];

fn segmentation_params(r: &mut BitReader) -> Result<(), SubsampleError> {
    if r.bit()? != 1 {
        return Ok(());
    }
    if r.bit()? == 1 {
        // update_map
        for _ in 0..7 {
            read_prob(r)?;
        }
        if r.bit()? == 1 {
            // temporal_update
            for _ in 0..3 {
                read_prob(r)?;
            }
        }
    }
    if r.bit()? == 1 {
        // update_data
        r.bit()?; // abs_or_delta_update
        for _ in 0..8 {
            for feature in 0..4usize {
                if r.bit()? == 1 {
                    let bits = SEG_FEATURE_BITS[feature];
                    if bits > 0 {
                        r.u(bits)?;
                    }
                    if SEG_FEATURE_SIGNED[feature] {
                        r.bit()?;
                    }
                }
            }
        }
    }
    Ok(())
}

fn calc_min_log2_tile_cols(sb64_cols: u32) -> u32 {
    let mut min_log2 = 0;
    while (MAX_TILE_WIDTH_B64 << min_log2) < sb64_cols {
        min_log2 += 1;
    }
    min_log2
}

fn calc_max_log2_tile_cols(sb64_cols: u32) -> u32 {
    let mut max_log2 = 1;
    while (sb64_cols >> max_log2) >= MIN_TILE_WIDTH_B64 {
        max_log2 += 1;
    }
    max_log2 - 1
}

fn tile_info(r: &mut BitReader, frame_width: u32) -> Result<(), SubsampleError> {
    let mi_cols = (frame_width + 7) >> 3;
    let sb64_cols = (mi_cols + 7) >> 3;
    let min_log2 = calc_min_log2_tile_cols(sb64_cols);
    let max_log2 = calc_max_log2_tile_cols(sb64_cols);
    let mut tile_cols_log2 = min_log2;
    while tile_cols_log2 < max_log2 {
        if r.bit()? == 1 {
            tile_cols_log2 += 1;
        } else {
            break;
        }
    }
    if r.bit()? == 1 {
        r.bit()?; // increment_tile_rows_log2
    }
    Ok(())
}

/// Size in bytes of a single VP9 frame's uncompressed header, byte-aligned.
///
/// # Errors
/// Returns [`SubsampleError`] if `data` is too short or carries a bad frame
/// sync code.
pub fn uncompressed_header_size(data: &[u8]) -> Result<usize, SubsampleError> {
    let mut r = BitReader::new(data);
    if r.u(2)? != 0b10 {
        return Err(SubsampleError::Malformed {
            codec: "vp9",
            detail: "bad frame_marker".to_owned(),
        });
    }
    let profile_low = r.bit()?;
    let profile_high = r.bit()?;
    let profile = (profile_high << 1) | profile_low;
    if profile == 3 {
        r.bit()?; // reserved_zero
    }
    if r.bit()? == 1 {
        // show_existing_frame
        r.u(3)?; // frame_to_show_map_idx
        return Ok(r.bytes_consumed_rounded_up());
    }
    let frame_type_is_key = r.bit()? == 0;
    let show_frame = r.bit()? == 1;
    let error_resilient_mode = r.bit()? == 1;

    if frame_type_is_key {
        let mut sync = [0u8; 3];
        for b in &mut sync {
            #[allow(clippy::as_conversions)]
            {
                *b = r.u(8)? as u8;
            }
        }
        if sync != FRAME_SYNC_CODE {
            return Err(SubsampleError::Malformed {
                codec: "vp9",
                detail: "bad frame_sync_code".to_owned(),
            });
        }
        color_config(&mut r, profile)?;
        let width = frame_size(&mut r)?;
        render_size(&mut r)?;
        finish_uncompressed_header(&mut r, error_resilient_mode, width)?;
    } else {
        let intra_only = if show_frame { false } else { r.bit()? == 1 };
        if !error_resilient_mode {
            r.u(2)?; // reset_frame_context
        }
        let width = if intra_only {
            let mut sync = [0u8; 3];
            for b in &mut sync {
                #[allow(clippy::as_conversions)]
                {
                    *b = r.u(8)? as u8;
                }
            }
            if sync != FRAME_SYNC_CODE {
                return Err(SubsampleError::Malformed {
                    codec: "vp9",
                    detail: "bad frame_sync_code".to_owned(),
                });
            }
            if profile > 0 {
                color_config(&mut r, profile)?;
            }
            r.u(8)?; // refresh_frame_flags
            let width = frame_size(&mut r)?;
            render_size(&mut r)?;
            width
        } else {
            r.u(8)?; // refresh_frame_flags
            for _ in 0..3 {
                r.u(3)?; // ref_frame_idx
                r.bit()?; // ref_frame_sign_bias
            }
            let mut found = false;
            for _ in 0..3 {
                if r.bit()? == 1 {
                    found = true;
                    break;
                }
            }
            let width = if found {
                0 // frame size taken from a reference; not needed past tile_info sizing, use a conservative default below
            } else {
                frame_size(&mut r)?
            };
            render_size(&mut r)?;
            r.bit()?; // allow_high_precision_mv
            if r.bit()? == 0 {
                // !is_filter_switchable
                r.u(2)?; // raw_interpolation_filter
            }
            width
        };
        finish_uncompressed_header(&mut r, error_resilient_mode, width)?;
    }
    Ok(r.bytes_consumed_rounded_up())
}

fn finish_uncompressed_header(
    r: &mut BitReader,
    error_resilient_mode: bool,
    frame_width: u32,
) -> Result<(), SubsampleError> {
    if !error_resilient_mode {
        r.bit()?; // refresh_frame_context
        r.bit()?; // frame_parallel_decoding_mode
    }
    loop_filter_params(r)?;
    quantization_params(r)?;
    segmentation_params(r)?;
    tile_info(r, frame_width)?;
    r.u(16)?; // header_size_in_bytes
    Ok(())
}

/// Builds the subsample list for one VP9 sample, which may be a VP9
/// superframe bundling several subframes. Each subframe's uncompressed
/// header stays clear; the compressed payload after it is cipher-eligible.
/// The trailing superframe index, if present, stays clear.
///
/// # Errors
/// Returns [`SubsampleError`] if a subframe's header can't be parsed or is
/// larger than the subframe itself.
pub fn generate_subsamples(
    payload: &[u8],
    align: bool,
) -> Result<Vec<Subsample>, SubsampleError> {
    let (frame_sizes, data_len) = match parse_superframe_index(payload) {
        Some(sizes) => {
            let data_len = sizes.iter().sum::<usize>();
            (sizes, data_len)
        }
        None => (vec![payload.len()], payload.len()),
    };

    let mut builder = SubsampleBuilder::new(align);
    let mut offset = 0usize;
    for size in &frame_sizes {
        let end = offset + size;
        let Some(subframe) = payload.get(offset..end) else {
            return Err(SubsampleError::Truncated {
                wanted: end,
                got: payload.len(),
            });
        };
        let header_size = uncompressed_header_size(subframe)?;
        if header_size > *size {
            return Err(SubsampleError::Malformed {
                codec: "vp9",
                detail: "uncompressed header longer than subframe".to_owned(),
            });
        }
        #[allow(clippy::as_conversions)]
        builder.add_clear(header_size as u64);
        #[allow(clippy::as_conversions)]
        builder.add_protected((size - header_size) as u64);
        offset = end;
    }
    let trailing = payload.len() - data_len;
    #[allow(clippy::as_conversions)]
    builder.add_clear(trailing as u64);
    Ok(builder.finish())
}
