// SPDX-License-Identifier: GPL-2.0-or-later

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("no key available for stream label '{label}' (crypto period {period})")]
    MissingKey { label: String, period: u64 },
    #[error(transparent)]
    Subsample(#[from] subsample::SubsampleError),
    #[error("cipher span of {len} bytes is not a multiple of the AES block size")]
    UnalignedCipherSpan { len: usize },
    #[error("payload too short for subsample layout: wanted {wanted} bytes, got {got}")]
    PayloadTooShort { wanted: usize, got: usize },
}
