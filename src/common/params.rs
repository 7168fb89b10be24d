// SPDX-License-Identifier: GPL-2.0-or-later

//! Packaging parameters as described in spec.md §6. These are plain
//! `serde`-deserializable structs, not a CLI surface — flag plumbing is an
//! explicit non-goal.

use serde::{Deserialize, Serialize};

use crate::stream::ProtectionScheme;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkingParams {
    pub segment_duration_s: f64,
    pub subsegment_duration_s: Option<f64>,
    pub segment_sap_aligned: bool,
    pub subsegment_sap_aligned: bool,
}

impl ChunkingParams {
    #[must_use]
    pub fn subsegments_enabled(&self) -> bool {
        match self.subsegment_duration_s {
            None => false,
            // Subsegments are suppressed when equal to the segment duration.
            Some(sub) => (sub - self.segment_duration_s).abs() > f64::EPSILON,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EncryptionParams {
    pub scheme: ProtectionSchemeConfig,
    pub clear_lead_s: f64,
    pub crypto_period_duration_s: f64,
    pub vp9_subsample_encryption: bool,
    pub protection_systems: Vec<[u8; 16]>,
}

// `serde`-friendly mirror of `ProtectionScheme` (the domain type has no
// natural default/serde derive since it controls crypto code paths).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtectionSchemeConfig {
    Cenc,
    Cens,
    Cbc1,
    Cbcs,
    AppleSampleAes,
}

impl From<ProtectionSchemeConfig> for ProtectionScheme {
    fn from(v: ProtectionSchemeConfig) -> Self {
        match v {
            ProtectionSchemeConfig::Cenc => ProtectionScheme::Cenc,
            ProtectionSchemeConfig::Cens => ProtectionScheme::Cens,
            ProtectionSchemeConfig::Cbc1 => ProtectionScheme::Cbc1,
            ProtectionSchemeConfig::Cbcs => ProtectionScheme::Cbcs,
            ProtectionSchemeConfig::AppleSampleAes => ProtectionScheme::AppleSampleAes,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Mp4OutputParams {
    pub segment_template: Option<String>,
    pub init_segment: Option<String>,
    pub single_file: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TsOutputParams {
    pub transport_stream_timestamp_offset_s: f64,
    pub segment_template: Option<String>,
    pub single_file: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WebmOutputParams {
    pub segment_template: Option<String>,
    pub init_segment: Option<String>,
    pub single_file: bool,
}
