// SPDX-License-Identifier: GPL-2.0-or-later

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubsampleError {
    #[error("truncated bitstream: wanted {wanted} more bytes, got {got}")]
    Truncated { wanted: usize, got: usize },

    #[error("unsupported {codec} feature: {detail}")]
    Unsupported { codec: &'static str, detail: String },

    #[error("malformed {codec} bitstream: {detail}")]
    Malformed { codec: &'static str, detail: String },
}
