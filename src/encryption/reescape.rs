// SPDX-License-Identifier: GPL-2.0-or-later

//! Re-escapes H.26x NAL payloads after Sample-AES encryption. AES output is
//! random bytes that can accidentally contain `00 00 00`/`00 00 01`, which a
//! NAL unit may never carry; every encrypted NAL is re-scanned and any
//! emulation-prevention bytes the ciphertext introduced are inserted before
//! the sample leaves the handler.

use subsample::h26x::{escape_emulation_prevention, split_length_prefixed};

use crate::error::EncryptionError;

/// # Errors
/// Returns [`EncryptionError`] if `payload` doesn't parse as length-prefixed
/// NAL units under `nal_length_size`.
pub fn reescape_length_prefixed(
    payload: &[u8],
    nal_length_size: u8,
) -> Result<Vec<u8>, EncryptionError> {
    let nals = split_length_prefixed(payload, nal_length_size)?;
    let len_size = usize::from(nal_length_size);
    let mut out = Vec::with_capacity(payload.len());
    for nal in nals {
        let escaped = escape_emulation_prevention(nal);
        let len = escaped.len();
        let len_bytes = len.to_be_bytes();
        let Some(field) = len_bytes.get(len_bytes.len() - len_size..) else {
            return Err(EncryptionError::PayloadTooShort { wanted: len_size, got: 0 });
        };
        out.extend_from_slice(field);
        out.extend_from_slice(&escaped);
    }
    Ok(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn length_prefixed(nals: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for nal in nals {
            #[allow(clippy::as_conversions)]
            out.extend_from_slice(&(nal.len() as u32).to_be_bytes());
            out.extend_from_slice(nal);
        }
        out
    }

    #[test]
    fn reescapes_a_nal_whose_ciphertext_contains_a_start_code() {
        let nal = [0x65u8, 0x00, 0x00, 0x00, 0x01, 0xFF];
        let payload = length_prefixed(&[&nal]);
        let out = reescape_length_prefixed(&payload, 4).unwrap();

        let nals = split_length_prefixed(&out, 4).unwrap();
        assert_eq!(1, nals.len());
        assert_eq!(&[0x65, 0x00, 0x00, 0x03, 0x00, 0x01, 0xFF], nals[0]);
    }

    #[test]
    fn leaves_a_clean_nal_untouched() {
        let nal = [0x65u8, 0x11, 0x22, 0x33];
        let payload = length_prefixed(&[&nal]);
        let out = reescape_length_prefixed(&payload, 4).unwrap();
        assert_eq!(payload, out);
    }
}
