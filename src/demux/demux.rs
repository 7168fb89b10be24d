// SPDX-License-Identifier: GPL-2.0-or-later

//! Demuxer shell: the `Demuxer` trait an origin implements, plus
//! `VecSampleSource`, an in-memory source used to drive the rest of the
//! pipeline in tests without a real container parser.

pub mod source;

pub use source::{Demuxer, VecSampleSource};
