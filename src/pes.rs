//! Minimal PES header decoding, just deep enough to lift PTS and DTS.

use anyhow::bail;
use bitstream_io::{BigEndian, BitRead, BitReader};

use crate::constants::PES_START_CODE;

/// The timing-relevant fields of a PES packet header.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PesHeader {
    pub stream_id: u8,
    /// 2 = PTS present, 3 = PTS and DTS present.
    pub pts_dts_flags: u8,
    /// 33-bit 90 kHz value; 0 when absent.
    pub pts: i64,
    /// 33-bit 90 kHz value; 0 when absent.
    pub dts: i64,
}

impl PesHeader {
    pub fn has_pts(&self) -> bool {
        self.pts_dts_flags == 2 || self.pts_dts_flags == 3
    }

    pub fn has_dts(&self) -> bool {
        self.pts_dts_flags == 3
    }
}

/// Read one 33-bit timestamp: 4 marker bits, then 3+15+15 value bits each
/// followed by a marker bit.
fn read_timestamp<R: std::io::Read>(br: &mut BitReader<R, BigEndian>) -> anyhow::Result<i64> {
    br.skip(4)?;
    let hi = br.read::<3, u64>()?;
    br.skip(1)?;
    let mid = br.read::<15, u64>()?;
    br.skip(1)?;
    let lo = br.read::<15, u64>()?;
    br.skip(1)?;
    Ok(((hi << 30) | (mid << 15) | lo) as i64)
}

/// Parse a PES header starting at the 00 00 01 prefix. Only the flag bytes
/// and the optional PTS/DTS fields are extracted; payload data is skipped.
pub fn parse(buf: &[u8]) -> anyhow::Result<PesHeader> {
    if buf.len() < 9 {
        bail!("PES header truncated: {} bytes", buf.len());
    }
    if buf[..3] != PES_START_CODE {
        bail!("missing PES start code");
    }

    let mut hdr = PesHeader {
        stream_id: buf[3],
        ..Default::default()
    };

    // buf[4..6] is PES_packet_length, irrelevant for timing.
    let mut br = BitReader::endian(&buf[6..], BigEndian);
    let marker = br.read::<2, u8>()?;
    if marker != 0b10 {
        bail!("invalid PES optional-header marker");
    }
    br.skip(6)?; // scrambling, priority, alignment, copyright, original
    hdr.pts_dts_flags = br.read::<2, u8>()?;
    br.skip(6)?; // ESCR, ES_rate, DSM trick, copy info, CRC, extension
    let header_data_length = br.read::<8, u8>()? as usize;

    match hdr.pts_dts_flags {
        2 => {
            if header_data_length < 5 || buf.len() < 14 {
                bail!("PES header too short for PTS");
            }
            hdr.pts = read_timestamp(&mut br)?;
        }
        3 => {
            if header_data_length < 10 || buf.len() < 19 {
                bail!("PES header too short for PTS+DTS");
            }
            hdr.pts = read_timestamp(&mut br)?;
            hdr.dts = read_timestamp(&mut br)?;
        }
        _ => {}
    }

    Ok(hdr)
}
