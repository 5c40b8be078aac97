//! RTCP Sender Report and BYE serialization (RFC 3550 §6.4.1, §6.6).
//!
//! The liveness checker sends one compound packet when a live source goes
//! quiet: an SR carrying the sender's clock and traffic counters, followed
//! by a BYE naming the same SSRC — the in-band way to tell a client the
//! source is ceasing transmission before the hard timeout kicks it.

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds between 1900-01-01 (NTP epoch) and 1970-01-01 (Unix epoch).
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

const RTCP_VERSION: u8 = 2;
/// Sender Report payload type.
const PT_SR: u8 = 200;
/// Goodbye payload type.
const PT_BYE: u8 = 203;

/// Sender-side state serialized into an SR.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|   RC    |   PT=SR=200   |             length            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                         SSRC of sender                        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |              NTP timestamp (seconds since 1900)               |
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                         RTP timestamp                         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                     sender's packet count                     |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                     sender's octet count                      |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Report blocks are never included: the server only sends, it does not
/// receive, so it has no reception statistics to report (RC=0).
#[derive(Debug, Clone)]
pub struct SenderReport {
    pub ssrc: u32,
    /// 64-bit NTP timestamp (32.32 fixed point).
    pub ntp_timestamp: u64,
    pub rtp_timestamp: u32,
    pub packet_count: u32,
    pub octet_count: u32,
}

impl SenderReport {
    /// Serialize the 28-byte SR with no report blocks.
    pub fn to_bytes(&self) -> [u8; 28] {
        let mut packet = [0u8; 28];
        packet[0] = RTCP_VERSION << 6;
        packet[1] = PT_SR;
        // Length in 32-bit words minus one (RFC 3550 §6.4.1).
        packet[2..4].copy_from_slice(&6u16.to_be_bytes());
        packet[4..8].copy_from_slice(&self.ssrc.to_be_bytes());
        packet[8..16].copy_from_slice(&self.ntp_timestamp.to_be_bytes());
        packet[16..20].copy_from_slice(&self.rtp_timestamp.to_be_bytes());
        packet[20..24].copy_from_slice(&self.packet_count.to_be_bytes());
        packet[24..28].copy_from_slice(&self.octet_count.to_be_bytes());
        packet
    }
}

/// Serialize a one-source BYE (RFC 3550 §6.6), no reason text.
pub fn bye_packet(ssrc: u32) -> [u8; 8] {
    let mut packet = [0u8; 8];
    // SC=1: one SSRC follows.
    packet[0] = (RTCP_VERSION << 6) | 1;
    packet[1] = PT_BYE;
    packet[2..4].copy_from_slice(&1u16.to_be_bytes());
    packet[4..8].copy_from_slice(&ssrc.to_be_bytes());
    packet
}

/// The compound packet sent on a soft stream timeout: SR then BYE
/// (RFC 3550 §6.1 requires a report packet first in every compound).
pub fn sender_report_bye(report: &SenderReport) -> Vec<u8> {
    let mut compound = Vec::with_capacity(36);
    compound.extend_from_slice(&report.to_bytes());
    compound.extend_from_slice(&bye_packet(report.ssrc));
    compound
}

/// Current wall-clock time as a 64-bit NTP timestamp (32.32 fixed point).
pub fn ntp_now() -> u64 {
    let since_unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let seconds = since_unix.as_secs() + NTP_UNIX_OFFSET;
    let fraction = (u64::from(since_unix.subsec_nanos()) << 32) / 1_000_000_000;
    (seconds << 32) | fraction
}
