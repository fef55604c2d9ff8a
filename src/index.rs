//! PCR index: map stream byte offsets to 27 MHz clock values, persist the
//! mapping next to the recording, and answer time-based lookups.
//!
//! The sidecar `<input>.idx` is a headerless packed sequence of fixed-size
//! records. Field order matches [`PcrPosition`]; byte order is fixed
//! little-endian so an index written on one machine loads on any other.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{info, warn};

use crate::clock::{scr_diff, VideoTime};
use crate::constants::{
    FAST_QUERY_SEGMENT_BYTES, FAST_QUERY_WHOLE_FILE_BYTES, INDEX_CHUNK_BYTES, TS_PACKET_SIZE,
    TS_SYNC_BYTE,
};
use crate::packet;

/// One index record: where in the stream a PCR was observed, on which PID,
/// and its 27 MHz value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcrPosition {
    pub offset: u64,
    pub pid: u16,
    pub pcr: i64,
}

impl PcrPosition {
    /// On-disk record size: offset(8) + pid(2) + pcr(8).
    pub const SIZE: usize = 18;

    fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.offset.to_le_bytes());
        out.extend_from_slice(&self.pid.to_le_bytes());
        out.extend_from_slice(&self.pcr.to_le_bytes());
    }

    fn read_from(buf: &[u8]) -> Self {
        PcrPosition {
            offset: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            pid: u16::from_le_bytes(buf[8..10].try_into().unwrap()),
            pcr: i64::from_le_bytes(buf[10..18].try_into().unwrap()),
        }
    }
}

/// Scan a 188-aligned buffer and emit a record for every packet carrying a
/// PCR. `base_offset` is the stream position of `buf[0]`.
pub fn scan_pcrs(buf: &[u8], base_offset: u64) -> Vec<PcrPosition> {
    let mut records = Vec::new();
    for (i, pkt) in buf.chunks_exact(TS_PACKET_SIZE).enumerate() {
        if pkt[0] != TS_SYNC_BYTE {
            continue;
        }
        if let Some(pcr) = packet::pcr(pkt) {
            records.push(PcrPosition {
                offset: base_offset + (i * TS_PACKET_SIZE) as u64,
                pid: packet::pid(pkt),
                pcr,
            });
        }
    }
    records
}

/// The full index for one recording.
pub struct PcrIndex {
    pub records: Vec<PcrPosition>,
}

impl PcrIndex {
    /// Sidecar path: `<input>.idx`.
    pub fn index_path(input: &Path) -> PathBuf {
        PathBuf::from(format!("{}.idx", input.display()))
    }

    /// Single forward pass over the recording in large aligned chunks.
    pub fn build(input: &Path, progress: bool) -> anyhow::Result<Self> {
        let mut fh = File::open(input).with_context(|| format!("open {}", input.display()))?;
        let file_length = fh.metadata()?.len();

        let mut records = Vec::new();
        let mut buf = vec![0u8; INDEX_CHUNK_BYTES];
        let mut pos: u64 = 0;

        loop {
            let rlen = fh.read(&mut buf)?;
            if rlen == 0 {
                break;
            }
            if progress && file_length > 0 {
                print!(
                    "Creating index ... {:.2}%\r",
                    pos as f64 / file_length as f64 * 100.0
                );
                let _ = std::io::stdout().flush();
            }
            records.extend(scan_pcrs(&buf[..rlen], pos));
            pos += rlen as u64;
        }
        if progress {
            println!("\rdone.");
        }

        Ok(PcrIndex { records })
    }

    /// Persist as packed records beside the input.
    pub fn save(&self, input: &Path) -> anyhow::Result<()> {
        let path = Self::index_path(input);
        info!("Writing index {}", path.display());

        let mut out = Vec::with_capacity(self.records.len() * PcrPosition::SIZE);
        for rec in &self.records {
            rec.write_to(&mut out);
        }
        std::fs::write(&path, out).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    /// Load the sidecar index. Returns `None` when it is missing or corrupt
    /// (wrong length); the caller falls through to a fresh scan.
    pub fn load(input: &Path) -> anyhow::Result<Option<Self>> {
        let path = Self::index_path(input);
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
        };

        if data.len() % PcrPosition::SIZE != 0 {
            warn!(
                "index {} has a truncated record ({} bytes), treating as missing",
                path.display(),
                data.len()
            );
            return Ok(None);
        }

        info!("Reading index {}", path.display());
        let records = data
            .chunks_exact(PcrPosition::SIZE)
            .map(PcrPosition::read_from)
            .collect();
        Ok(Some(PcrIndex { records }))
    }

    /// Load the sidecar, or scan the recording and save a fresh one.
    /// Returns the index plus whether it had to be built.
    pub fn load_or_build(input: &Path, progress: bool) -> anyhow::Result<(Self, bool)> {
        if let Some(index) = Self::load(input)? {
            return Ok((index, false));
        }
        let index = Self::build(input, progress)?;
        index.save(input)?;
        Ok((index, true))
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn pcr_min(&self) -> Option<i64> {
        self.records.first().map(|r| r.pcr)
    }

    pub fn pcr_max(&self) -> Option<i64> {
        self.records.last().map(|r| r.pcr)
    }

    /// Wrap-aware span between the first and last record.
    pub fn duration_ticks(&self) -> Option<i64> {
        match (self.pcr_min(), self.pcr_max()) {
            (Some(min), Some(max)) => Some(scr_diff(min, max)),
            _ => None,
        }
    }

    /// First record whose PCR is >= the query. The index is modest even for
    /// long recordings, so a linear scan is fine.
    pub fn lookup_ge(&self, pcr: i64) -> Option<&PcrPosition> {
        self.records.iter().find(|r| pcr <= r.pcr)
    }
}

/// Result of the constant-time duration probe.
#[derive(Debug, Clone, Copy)]
pub struct FastQueryResult {
    pub begin: PcrPosition,
    pub end: PcrPosition,
    /// 27 MHz ticks between `begin` and `end`, wrap-aware.
    pub duration_ticks: i64,
    pub file_size: u64,
}

/// Answer "how long is this recording?" by reading only the head and tail.
/// Files under 32 MiB are read whole; larger files contribute their first
/// and last 16 MiB only.
pub fn fast_query_duration(path: &Path) -> anyhow::Result<FastQueryResult> {
    let mut fh = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let file_size = fh.metadata()?.len();

    let (head, tail) = if file_size < FAST_QUERY_WHOLE_FILE_BYTES {
        let mut buf = vec![0u8; file_size as usize];
        fh.read_exact(&mut buf)?;
        let records = scan_pcrs(&buf, 0);
        (records.clone(), records)
    } else {
        let mut head_buf = vec![0u8; FAST_QUERY_SEGMENT_BYTES];
        fh.read_exact(&mut head_buf)?;

        let tail_start = file_size - FAST_QUERY_SEGMENT_BYTES as u64;
        // Stay packet-aligned within the tail segment.
        let aligned_start = tail_start.next_multiple_of(TS_PACKET_SIZE as u64);
        let skip = (aligned_start - tail_start) as usize;
        let mut tail_buf = vec![0u8; FAST_QUERY_SEGMENT_BYTES];
        fh.seek(SeekFrom::Start(tail_start))?;
        fh.read_exact(&mut tail_buf)?;

        (
            scan_pcrs(&head_buf, 0),
            scan_pcrs(&tail_buf[skip..], aligned_start),
        )
    };

    let begin = *head
        .first()
        .with_context(|| format!("no PCR found in the head of {}", path.display()))?;
    let end = *tail
        .last()
        .with_context(|| format!("no PCR found in the tail of {}", path.display()))?;

    Ok(FastQueryResult {
        begin,
        end,
        duration_ticks: scr_diff(begin.pcr, end.pcr),
        file_size,
    })
}

/// One line of the `-l` index dump.
pub fn format_index_entry(id: usize, rec: &PcrPosition) -> String {
    format!(
        "{id:8}: 0x{pid:04x} {offset:016x} {pcr:16}, {streamtime}",
        pid = rec.pid,
        offset = rec.offset,
        pcr = rec.pcr,
        streamtime = VideoTime::from_pcr(rec.pcr),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcr_packet(pid: u16, pcr: i64) -> [u8; 188] {
        let mut pkt = [0xFFu8; 188];
        pkt[0] = TS_SYNC_BYTE;
        pkt[1] = (pid >> 8) as u8 & 0x1F;
        pkt[2] = pid as u8;
        pkt[3] = 0x20;
        pkt[4] = 183;
        pkt[5] = 0x10;
        packet::encode_pcr(&mut pkt, pcr);
        pkt
    }

    fn null_packet() -> [u8; 188] {
        let mut pkt = [0xFFu8; 188];
        pkt[0] = TS_SYNC_BYTE;
        pkt[1] = 0x1F;
        pkt[2] = 0xFF;
        pkt[3] = 0x10;
        pkt
    }

    #[test]
    fn scan_emits_aligned_increasing_offsets() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&pcr_packet(0x31, 1000));
        buf.extend_from_slice(&null_packet());
        buf.extend_from_slice(&pcr_packet(0x31, 2000));

        let records = scan_pcrs(&buf, 188 * 10);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].offset, 188 * 10);
        assert_eq!(records[1].offset, 188 * 12);
        assert!(records.windows(2).all(|w| w[0].offset < w[1].offset));
        assert!(records.iter().all(|r| r.offset % 188 == 0));
        assert_eq!(records[0].pcr, 1000);
        assert_eq!(records[1].pid, 0x31);
    }

    #[test]
    fn record_io_roundtrip() {
        let rec = PcrPosition {
            offset: 0x1234_5678_9ABC,
            pid: 0x1FFE,
            pcr: crate::constants::MAX_SCR_VALUE - 1,
        };
        let mut buf = Vec::new();
        rec.write_to(&mut buf);
        assert_eq!(buf.len(), PcrPosition::SIZE);
        assert_eq!(PcrPosition::read_from(&buf), rec);
    }

    #[test]
    fn lookup_ge_finds_first_not_below() {
        let index = PcrIndex {
            records: vec![
                PcrPosition { offset: 0, pid: 1, pcr: 100 },
                PcrPosition { offset: 188, pid: 1, pcr: 200 },
                PcrPosition { offset: 376, pid: 1, pcr: 300 },
            ],
        };
        assert_eq!(index.lookup_ge(150).unwrap().pcr, 200);
        assert_eq!(index.lookup_ge(200).unwrap().pcr, 200);
        assert!(index.lookup_ge(301).is_none());
        assert_eq!(index.duration_ticks(), Some(200));
    }
}
