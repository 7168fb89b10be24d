// SPDX-License-Identifier: GPL-2.0-or-later

//! MPEG-2 transport stream muxing: PES packetization of H.264/H.265/AAC
//! samples, 188-byte TS packet framing with PAT/PMT, and `SegmentInfo`-
//! driven file rotation, per spec.md §4.5.

pub mod error;
pub mod muxer;
pub mod packetizer;
pub mod pes;
pub mod psi;

#[cfg(test)]
mod test;

pub use error::{PesError, TsMuxError};
pub use muxer::TsMuxer;
