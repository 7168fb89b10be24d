// SPDX-License-Identifier: GPL-2.0-or-later

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GenerateInitError {
    #[error("mp4: {0}")]
    Mp4(#[from] mp4::Mp4Error),

    #[error("text tracks have no init segment")]
    TextTrack,

    #[error("composition offset {0} does not fit in an edit-list media_time")]
    OffsetOverflow(i64),
}

#[derive(Debug, Error)]
pub enum GenerateFragmentError {
    #[error("mp4: {0}")]
    Mp4(#[from] mp4::Mp4Error),

    #[error("fragment has no samples")]
    Empty,

    #[error("video fragment does not start with a key frame")]
    NotStartingOnKeyFrame,

    #[error("sample composition offset {0} does not fit in a trun entry")]
    CompositionOffsetOverflow(i64),

    #[error("base_media_decode_time overflow")]
    BaseMediaDecodeTimeOverflow,

    #[error("{0} value {1} does not fit in a trun entry field")]
    SampleFieldOverflow(&'static str, i64),

    #[error("fragment too large: data_offset {0} does not fit in trun")]
    DataOffsetOverflow(usize),
}

#[derive(Debug, Error)]
pub enum Mp4MuxError {
    #[error("generate init: {0}")]
    GenerateInit(#[from] GenerateInitError),

    #[error("generate fragment: {0}")]
    GenerateFragment(#[from] GenerateFragmentError),

    #[error("segment template: {0}")]
    Template(#[from] common::template::TemplateError),

    #[error("media sample arrived before stream info")]
    SampleBeforeStreamInfo,

    #[error("non-monotonic dts")]
    NonMonotonicDts,
}
