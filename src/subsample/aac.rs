// SPDX-License-Identifier: GPL-2.0-or-later

use common::Subsample;

use crate::builder::SubsampleBuilder;

const CLEAR_PREFIX: usize = 16;

/// Apple Sample-AES AAC subsample rule: the first 16 bytes of a raw data
/// block stay clear, the remainder is encrypted; frames at or under the
/// clear prefix size are fully clear (no encryption at all).
#[must_use]
pub fn generate_subsamples(payload_len: usize) -> Vec<Subsample> {
    let mut builder = SubsampleBuilder::new(true);
    if payload_len <= CLEAR_PREFIX {
        #[allow(clippy::as_conversions)]
        builder.add_clear(payload_len as u64);
    } else {
        #[allow(clippy::as_conversions)]
        builder.add_clear(CLEAR_PREFIX as u64);
        #[allow(clippy::as_conversions)]
        builder.add_protected((payload_len - CLEAR_PREFIX) as u64);
    }
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_frame_is_fully_clear() {
        assert_eq!(
            vec![Subsample {
                clear_bytes: 10,
                cipher_bytes: 0
            }],
            generate_subsamples(10)
        );
    }

    #[test]
    fn larger_frame_encrypts_past_the_prefix() {
        // 100 - 16 = 84, not 16-aligned (84 = 5*16 + 4), so the 4-byte
        // residue folds back into the clear prefix.
        assert_eq!(
            vec![Subsample {
                clear_bytes: 20,
                cipher_bytes: 80
            }],
            generate_subsamples(100)
        );
    }
}
