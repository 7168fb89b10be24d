// SPDX-License-Identifier: GPL-2.0-or-later

//! Apple Sample-AES in-place encryption. CENC-family schemes never reach
//! this module: the container layer performs the AES operation there, so
//! the handler only needs to attach a `DecryptConfig`.

use aes::Aes128;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncryptMut, KeyIvInit};
use common::{Iv, Subsample};

use crate::error::EncryptionError;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;

fn iv_to_block(iv: &Iv) -> [u8; 16] {
    match iv {
        Iv::Bytes16(b) | Iv::Constant(b) => *b,
        Iv::Bytes8(b) => {
            let mut block = [0u8; 16];
            block[..8].copy_from_slice(b);
            block
        }
    }
}

/// Encrypts the cipher spans of `payload` in place with AES-128-CBC,
/// keeping the CBC chain running across the clear gaps between spans
/// (only cipher bytes are fed to the cipher; clear bytes are skipped
/// untouched and do not reset the chain).
///
/// # Errors
/// Returns [`EncryptionError`] if a cipher span isn't a multiple of the
/// AES block size, or the subsample layout doesn't fit `payload`.
pub fn encrypt_in_place(
    key: &[u8; 16],
    iv: &Iv,
    payload: &mut [u8],
    subsamples: &[Subsample],
) -> Result<(), EncryptionError> {
    let iv_block = iv_to_block(iv);
    let key_ga = GenericArray::from_slice(key);
    let iv_ga = GenericArray::from_slice(&iv_block);
    let mut enc = Aes128CbcEnc::new(key_ga, iv_ga);

    let mut cursor = 0usize;
    for sub in subsamples {
        cursor += usize::from(sub.clear_bytes);
        #[allow(clippy::as_conversions)]
        let cipher_len = sub.cipher_bytes as usize;
        if cipher_len == 0 {
            continue;
        }
        if cipher_len % 16 != 0 {
            return Err(EncryptionError::UnalignedCipherSpan { len: cipher_len });
        }
        let end = cursor + cipher_len;
        let Some(span) = payload.get_mut(cursor..end) else {
            return Err(EncryptionError::PayloadTooShort {
                wanted: end,
                got: payload.len(),
            });
        };
        for block in span.chunks_mut(16) {
            enc.encrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        cursor = end;
    }
    Ok(())
}

/// Whole-sample Sample-AES encryption for codecs with no subsample split
/// (e.g. an opaque/unknown payload under Sample-AES): rounds down to the
/// nearest block, leaving any residue clear, matching the generic
/// alignment rule every codec-specific generator already follows.
///
/// # Errors
/// Returns [`EncryptionError`] on a too-short payload (never in practice,
/// since `len` is always `payload.len()`).
pub fn encrypt_whole_sample_in_place(
    key: &[u8; 16],
    iv: &Iv,
    payload: &mut [u8],
) -> Result<(), EncryptionError> {
    let aligned_len = (payload.len() / 16) * 16;
    #[allow(clippy::as_conversions)]
    let subsamples = [Subsample {
        clear_bytes: (payload.len() - aligned_len) as u16,
        cipher_bytes: aligned_len as u32,
    }];
    encrypt_in_place(key, iv, payload, &subsamples)
}
