// SPDX-License-Identifier: GPL-2.0-or-later

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EbmlError {
    #[error("value {0} does not fit in an EBML vint")]
    VintOverflow(u64),

    #[error("relative timecode {0} does not fit in a SimpleBlock's 16-bit field")]
    TimecodeOverflow(i64),
}

#[derive(Debug, Error)]
pub enum WebmMuxError {
    #[error("ebml: {0}")]
    Ebml(#[from] EbmlError),

    #[error("segment template: {0}")]
    Template(#[from] common::template::TemplateError),

    #[error("unsupported video codec {0:?}")]
    UnsupportedVideoCodec(String),

    #[error("unsupported audio codec {0:?}")]
    UnsupportedAudioCodec(String),

    #[error("media sample arrived before stream info")]
    SampleBeforeStreamInfo,

    #[error("non-monotonic dts")]
    NonMonotonicDts,

    #[error("text tracks are not carried over WebM")]
    TextTrack,
}
