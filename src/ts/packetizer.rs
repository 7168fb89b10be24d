// SPDX-License-Identifier: GPL-2.0-or-later

//! 188-byte TS packet framing: per-pid continuity counters, the adaptation
//! field (PCR, the 183-byte rule, stuffing) and PES payload splitting.

use common::time::Mpeg2Ticks;

pub const PACKET_LEN: usize = 188;
const HEADER_LEN: usize = 4;
const MAX_PAYLOAD_NO_ADAPTATION: usize = PACKET_LEN - HEADER_LEN;

pub const SYNC_BYTE: u8 = 0x47;

/// Per-pid continuity counters for one muxer instance. Counters are never
/// reset across a segment boundary — a new segment is a new file, not a
/// new transport-stream session a decoder would treat as discontinuous.
pub struct TsPacketizer {
    continuity: std::collections::HashMap<u16, u8>,
}

impl TsPacketizer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            continuity: std::collections::HashMap::new(),
        }
    }

    /// Splits `data` (a complete PES packet, header included) into 188-byte
    /// TS packets for `pid`. `want_pcr` requests a PCR-bearing adaptation
    /// field (and `random_access_indicator`) on the first packet, per the
    /// "video key-frame or cross-segment" rule.
    pub fn packetize(&mut self, pid: u16, data: &[u8], want_pcr: bool, pcr: Mpeg2Ticks) -> Vec<[u8; PACKET_LEN]> {
        let counter = self.continuity.entry(pid).or_insert(0);
        let mut packets = Vec::with_capacity(data.len() / MAX_PAYLOAD_NO_ADAPTATION + 1);
        let mut pos = 0usize;
        let mut first = true;

        while pos < data.len() || first {
            let remaining = data.len() - pos;
            let pcr_here = first && want_pcr;
            let (payload_len, adaptation) = plan_packet(remaining, pcr_here);

            let mut packet = [0xFFu8; PACKET_LEN];
            packet[0] = SYNC_BYTE;
            let payload_unit_start = u8::from(first);
            packet[1] = (payload_unit_start << 6) | u8::try_from(pid >> 8).unwrap_or(0x1F);
            packet[2] = u8::try_from(pid & 0xFF).unwrap_or(0);
            let adaptation_field_control = match &adaptation {
                Some(_) if payload_len == 0 => 0b10,
                Some(_) => 0b11,
                None => 0b01,
            };
            packet[3] = (adaptation_field_control << 4) | (*counter & 0x0F);

            let mut cursor = HEADER_LEN;
            if let Some(adaptation) = adaptation {
                cursor += write_adaptation_field(&mut packet[cursor..], &adaptation, pcr_here, pcr);
            }
            packet[cursor..cursor + payload_len].copy_from_slice(&data[pos..pos + payload_len]);

            *counter = (*counter + 1) % 16;
            pos += payload_len;
            packets.push(packet);
            first = false;
        }
        packets
    }
}

impl Default for TsPacketizer {
    fn default() -> Self {
        Self::new()
    }
}

struct AdaptationPlan {
    /// Value written to the `adaptation_field_length` byte.
    field_length: u8,
}

/// Decides, for one packet, how many payload bytes it carries and whether
/// it needs an adaptation field (and how big), applying the 183-byte rule
/// and PCR stuffing as ISO/IEC 13818-1 §2.4.3.5 describes.
fn plan_packet(remaining: usize, want_pcr: bool) -> (usize, Option<AdaptationPlan>) {
    let pcr_overhead = if want_pcr { 1 + 6 } else { 0 }; // flags byte + PCR
    let af_length_byte = if want_pcr { 1 } else { 0 };
    let capacity_no_stuff = MAX_PAYLOAD_NO_ADAPTATION - pcr_overhead - af_length_byte;

    if remaining > capacity_no_stuff {
        let payload_len = capacity_no_stuff;
        let adaptation = if want_pcr {
            Some(AdaptationPlan {
                field_length: u8::try_from(pcr_overhead).unwrap_or(u8::MAX),
            })
        } else {
            None
        };
        return (payload_len, adaptation);
    }

    let payload_len = remaining;
    let af_region = MAX_PAYLOAD_NO_ADAPTATION - payload_len; // bytes not used by payload, incl. the length byte itself
    if af_region == 0 {
        return (payload_len, None);
    }
    let field_length = u8::try_from(af_region - 1).unwrap_or(u8::MAX);
    (payload_len, Some(AdaptationPlan { field_length }))
}

/// Writes the adaptation field (length byte, flags, optional PCR,
/// stuffing) into `buf`, returning the number of bytes written.
fn write_adaptation_field(buf: &mut [u8], plan: &AdaptationPlan, want_pcr: bool, pcr: Mpeg2Ticks) -> usize {
    buf[0] = plan.field_length;
    if plan.field_length == 0 {
        return 1;
    }
    let random_access_indicator = u8::from(want_pcr);
    let has_pcr_room = usize::from(plan.field_length) >= 7; // flags byte + 6-byte PCR
    let pcr_flag = u8::from(want_pcr && has_pcr_room);
    buf[1] = (random_access_indicator << 6) | (pcr_flag << 4);
    let mut cursor = 2usize;
    if pcr_flag == 1 {
        write_pcr(&mut buf[cursor..cursor + 6], pcr);
        cursor += 6;
    }
    let content_len = usize::from(plan.field_length);
    for b in &mut buf[cursor..1 + content_len] {
        *b = 0xFF;
    }
    1 + content_len
}

/// `program_clock_reference_base` (33 bits, 90kHz) followed by 6 reserved
/// bits and a zero `program_clock_reference_extension`.
fn write_pcr(buf: &mut [u8], pcr: Mpeg2Ticks) {
    let base = pcr.wrapped();
    let value: u64 = (base << 15) | 0x3F << 9;
    buf[0..6].copy_from_slice(&value.to_be_bytes()[2..8]);
}
