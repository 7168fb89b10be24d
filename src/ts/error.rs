// SPDX-License-Identifier: GPL-2.0-or-later

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PesError {
    #[error("unsupported video codec {0:?}")]
    UnsupportedVideoCodec(String),

    #[error("unsupported audio codec {0:?}")]
    UnsupportedAudioCodec(String),

    #[error("malformed avcC: {0}")]
    MalformedAvcC(&'static str),

    #[error("malformed hvcC: {0}")]
    MalformedHvcC(&'static str),

    #[error("malformed AudioSpecificConfig: {0}")]
    MalformedAudioSpecificConfig(&'static str),

    #[error("unsupported AAC sampling frequency {0}")]
    UnsupportedSamplingFrequency(u32),

    #[error("split length-prefixed sample: {0}")]
    Subsample(#[from] subsample::SubsampleError),

    #[error("non-monotonic pts")]
    NonMonotonicPts,
}

#[derive(Debug, Error)]
pub enum TsMuxError {
    #[error("pes: {0}")]
    Pes(#[from] PesError),

    #[error("segment template: {0}")]
    Template(#[from] common::template::TemplateError),

    #[error("media sample arrived before stream info")]
    SampleBeforeStreamInfo,

    #[error("text tracks are not carried over MPEG-2 TS")]
    TextTrack,
}
