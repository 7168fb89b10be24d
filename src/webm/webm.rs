// SPDX-License-Identifier: GPL-2.0-or-later

//! WebM (Matroska/EBML) muxing: a minimal EBML writer and a `Cluster`/
//! `SimpleBlock` muxer for VP8/VP9/AV1 video and Opus/Vorbis audio, per
//! spec.md §4.7.

pub mod ebml;
pub mod error;
pub mod muxer;

#[cfg(test)]
mod test;

pub use error::{EbmlError, WebmMuxError};
pub use muxer::WebmMuxer;
