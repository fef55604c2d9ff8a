#![allow(dead_code)]

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use mpegts_clock_inspector::packet::encode_pcr;

/// Unique temp file path; tests clean up after themselves.
pub fn tmp_path(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("tsclk_{}_{}_{}", std::process::id(), nanos, name))
}

/// Payload-bearing TS packet (adaptation_field_control = 1).
pub fn ts_packet(pid: u16, cc: u8, pusi: bool, payload: &[u8]) -> [u8; 188] {
    let mut pkt = [0xFFu8; 188];
    pkt[0] = 0x47;
    pkt[1] = ((pusi as u8) << 6) | ((pid >> 8) as u8 & 0x1F);
    pkt[2] = pid as u8;
    pkt[3] = 0x10 | (cc & 0x0F);
    let n = payload.len().min(184);
    pkt[4..4 + n].copy_from_slice(&payload[..n]);
    pkt
}

/// Adaptation-field-only packet carrying a PCR.
pub fn pcr_packet(pid: u16, cc: u8, pcr: i64) -> [u8; 188] {
    let mut pkt = [0xFFu8; 188];
    pkt[0] = 0x47;
    pkt[1] = (pid >> 8) as u8 & 0x1F;
    pkt[2] = pid as u8;
    pkt[3] = 0x20 | (cc & 0x0F);
    pkt[4] = 183; // adaptation_field_length
    pkt[5] = 0x10; // PCR_flag
    encode_pcr(&mut pkt, pcr);
    pkt
}

pub fn null_packet(cc: u8) -> [u8; 188] {
    ts_packet(0x1FFF, cc, false, &[0xFF; 184])
}

fn timestamp_bytes(prefix: u8, val: i64) -> [u8; 5] {
    let v = val as u64;
    [
        (prefix << 4) | (((v >> 30) as u8 & 0x07) << 1) | 1,
        (v >> 22) as u8,
        (((v >> 15) as u8 & 0x7F) << 1) | 1,
        (v >> 7) as u8,
        ((v as u8 & 0x7F) << 1) | 1,
    ]
}

/// Minimal video PES header payload carrying only a PTS.
pub fn pes_payload_pts(pts: i64) -> Vec<u8> {
    let mut payload = vec![
        0x00, 0x00, 0x01, 0xE0, // start code + video stream_id
        0x00, 0x00, // PES_packet_length
        0x80, // '10' marker
        0x80, // PTS_DTS_flags = 2
        0x05, // header data length
    ];
    payload.extend_from_slice(&timestamp_bytes(0b0010, pts));
    payload
}

/// PES header payload carrying PTS and DTS.
pub fn pes_payload_pts_dts(pts: i64, dts: i64) -> Vec<u8> {
    let mut payload = vec![0x00, 0x00, 0x01, 0xE0, 0x00, 0x00, 0x80, 0xC0, 0x0A];
    payload.extend_from_slice(&timestamp_bytes(0b0011, pts));
    payload.extend_from_slice(&timestamp_bytes(0b0001, dts));
    payload
}

/// Unit-start packet opening a PES with the given PTS.
pub fn pes_packet(pid: u16, cc: u8, pts: i64) -> [u8; 188] {
    ts_packet(pid, cc, true, &pes_payload_pts(pts))
}
