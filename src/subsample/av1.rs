// SPDX-License-Identifier: GPL-2.0-or-later

use common::Subsample;

use crate::builder::SubsampleBuilder;
use crate::error::SubsampleError;

/// One tile's byte range inside a `tile_group_obu` payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tile {
    pub offset: usize,
    pub size: usize,
}

// `tile_group_obu()`, AV1 5.11.1. `num_tiles`/`tile_size_bytes` come from the
// frame header (`TileCols * TileRows`, `tile_size_bytes_minus_1 + 1`); full
// frame-header parsing is out of scope here, callers supply them.
//
// # Errors
/// Returns [`SubsampleError`] if `data` is shorter than the syntax demands.
pub fn parse_tile_group(
    data: &[u8],
    num_tiles: usize,
    tile_size_bytes: usize,
) -> Result<Vec<Tile>, SubsampleError> {
    if num_tiles == 0 {
        return Err(SubsampleError::Malformed {
            codec: "av1",
            detail: "num_tiles must be > 0".to_owned(),
        });
    }
    let mut pos = 0usize;
    let header_len = if num_tiles > 1 {
        let Some(&flag_byte) = data.first() else {
            return Err(SubsampleError::Truncated {
                wanted: 1,
                got: 0,
            });
        };
        // tile_start_and_end_present_flag is the top bit; when set, tg_start
        // / tg_end follow in the same byte-aligned region. Subsample
        // generation only needs a contiguous full-frame tile group, which is
        // the common single tile_group_obu case (flag == 0).
        if flag_byte & 0x80 != 0 {
            return Err(SubsampleError::Unsupported {
                codec: "av1",
                detail: "partial tile groups (tile_start_and_end_present_flag=1) unsupported"
                    .to_owned(),
            });
        }
        1
    } else {
        0
    };
    pos += header_len;

    let mut tiles = Vec::with_capacity(num_tiles);
    let mut remaining = data
        .len()
        .checked_sub(pos)
        .ok_or(SubsampleError::Truncated {
            wanted: pos,
            got: data.len(),
        })?;
    for tile_num in 0..num_tiles {
        let is_last = tile_num == num_tiles - 1;
        let size = if is_last {
            remaining
        } else {
            let Some(size_field) = data.get(pos..pos + tile_size_bytes) else {
                return Err(SubsampleError::Truncated {
                    wanted: pos + tile_size_bytes,
                    got: data.len(),
                });
            };
            let mut v = 0usize;
            for (i, b) in size_field.iter().enumerate() {
                v |= usize::from(*b) << (8 * i);
            }
            pos += tile_size_bytes;
            remaining = remaining
                .checked_sub(tile_size_bytes)
                .ok_or(SubsampleError::Truncated {
                    wanted: tile_size_bytes,
                    got: remaining,
                })?;
            v + 1
        };
        if size > remaining {
            return Err(SubsampleError::Truncated {
                wanted: size,
                got: remaining,
            });
        }
        tiles.push(Tile { offset: pos, size });
        pos += size;
        remaining -= size;
    }
    Ok(tiles)
}

/// Builds the subsample list for one AV1 sample given its already-located
/// tile ranges. Bytes outside every tile (OBU headers, the tile-group
/// header, trailing padding OBUs) stay clear; each tile's payload is
/// cipher-eligible.
///
/// # Errors
/// Returns [`SubsampleError`] if a tile range falls outside `payload` or
/// tiles overlap/aren't given in ascending offset order.
pub fn generate_subsamples(
    payload_len: usize,
    tiles: &[Tile],
    align: bool,
) -> Result<Vec<Subsample>, SubsampleError> {
    let mut builder = SubsampleBuilder::new(align);
    let mut cursor = 0usize;
    for tile in tiles {
        if tile.offset < cursor {
            return Err(SubsampleError::Malformed {
                codec: "av1",
                detail: "tiles out of order or overlapping".to_owned(),
            });
        }
        let end = tile
            .offset
            .checked_add(tile.size)
            .filter(|&e| e <= payload_len)
            .ok_or(SubsampleError::Truncated {
                wanted: tile.offset + tile.size,
                got: payload_len,
            })?;
        #[allow(clippy::as_conversions)]
        builder.add_clear((tile.offset - cursor) as u64);
        #[allow(clippy::as_conversions)]
        builder.add_protected(tile.size as u64);
        cursor = end;
    }
    #[allow(clippy::as_conversions)]
    builder.add_clear((payload_len - cursor) as u64);
    Ok(builder.finish())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_two_tile_group_with_length_prefixed_first_tile() {
        // flag byte (present-flag=0, 1 byte header), tile0 size-1 field (1
        // byte, value 5 -> size 6), tile0 payload (6 bytes), tile1 payload
        // (remaining, last tile has no length field).
        let mut data = vec![0u8, 5];
        data.extend_from_slice(&[0xAA; 6]);
        data.extend_from_slice(&[0xBB; 33]);
        let tiles = parse_tile_group(&data, 2, 1).unwrap();
        assert_eq!(
            vec![Tile { offset: 2, size: 6 }, Tile { offset: 8, size: 33 }],
            tiles
        );
    }

    #[test]
    fn single_tile_has_no_header_or_length_field() {
        let data = [0xCC; 10];
        let tiles = parse_tile_group(&data, 1, 1).unwrap();
        assert_eq!(vec![Tile { offset: 0, size: 10 }], tiles);
    }

    #[test]
    fn generate_subsamples_accounts_for_clear_gaps() {
        let tiles = vec![
            Tile { offset: 4, size: 6 },
            Tile { offset: 11, size: 33 },
        ];
        let subs = generate_subsamples(50, &tiles, true).unwrap();
        let total: u64 = subs
            .iter()
            .map(|s| u64::from(s.clear_bytes) + u64::from(s.cipher_bytes))
            .sum();
        assert_eq!(50, total);
        // tile1 (6 bytes) is too small to align and folds fully clear;
        // tile2 (33 bytes) contributes a 1-byte residue into the same clear
        // run ahead of its 32-byte aligned cipher span.
        assert_eq!(
            vec![
                Subsample {
                    clear_bytes: 12,
                    cipher_bytes: 32
                },
                Subsample {
                    clear_bytes: 6,
                    cipher_bytes: 0
                },
            ],
            subs
        );
    }
}
