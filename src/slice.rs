//! Byte-exact extraction of a time slice between two index records.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::Context;

use crate::constants::SLICE_BLOCK_BYTES;
use crate::index::PcrPosition;

/// Copy the bytes between `start.offset` and `end.offset` from `input` to
/// `output`, in 64-packet blocks. The bytes are copied unmodified; no PCR
/// rewriting happens. Returns the number of bytes written.
pub fn extract_range(
    input: &Path,
    output: &Path,
    start: &PcrPosition,
    end: &PcrPosition,
    progress: bool,
) -> anyhow::Result<u64> {
    anyhow::ensure!(
        end.offset >= start.offset,
        "end offset {} precedes start offset {}",
        end.offset,
        start.offset
    );

    let mut ifh = File::open(input).with_context(|| format!("open {}", input.display()))?;
    let mut ofh = File::create(output).with_context(|| format!("create {}", output.display()))?;

    ifh.seek(SeekFrom::Start(start.offset))?;

    let range = end.offset - start.offset;
    let mut remaining = range;
    let mut block = vec![0u8; SLICE_BLOCK_BYTES];

    while remaining > 0 {
        let want = (remaining as usize).min(SLICE_BLOCK_BYTES);
        let rlen = ifh.read(&mut block[..want])?;
        if rlen == 0 {
            break; // input shorter than the index claims
        }
        ofh.write_all(&block[..rlen])?;
        remaining -= rlen as u64;

        if progress && range > 0 {
            print!(
                "Writing ... {:.2}%\r",
                (range - remaining) as f64 / range as f64 * 100.0
            );
            let _ = std::io::stdout().flush();
        }
    }
    if progress {
        println!("\ndone.");
    }

    Ok(range - remaining)
}
