use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use mpegts_clock_inspector::clock::VideoTime;
use mpegts_clock_inspector::index::{fast_query_duration, format_index_entry, PcrIndex};
use mpegts_clock_inspector::slice::extract_range;

/// Extract time periods from ISO 13818 MPEG-TS SPTS or MPTS files.
/// The input is assumed to be properly packet aligned.
///
/// A timing index (<input>.idx) is created on first use and reloaded on
/// later runs; a 2 hr recording takes a couple of minutes to index.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input MPEG-TS file
    #[arg(short = 'i')]
    input: PathBuf,

    /// Output MPEG-TS file for the extracted slice
    #[arg(short = 'o')]
    output: Option<PathBuf>,

    /// Slice start as D.HH:MM:SS.mmm (eg 0.05:17:44.0)
    #[arg(short = 's')]
    start: Option<VideoTime>,

    /// Slice end as D.HH:MM:SS.mmm
    #[arg(short = 'e')]
    end: Option<VideoTime>,

    /// Dump the contents of the timing index and exit
    #[arg(short = 'l')]
    list: bool,

    /// Fast duration query: report first/last PCR and duration of this file
    /// reading only its head and tail, then exit
    #[arg(short = 'q')]
    query: Option<PathBuf>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .ok()
                .unwrap_or_else(|| "info".to_string()),
        )
        .try_init();
}

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();

    if let Some(path) = &cli.query {
        let result = fast_query_duration(path).context("unable to query file details")?;
        println!();
        println!("file: {}", path.display());
        println!("      from {}", VideoTime::from_pcr(result.begin.pcr));
        println!("        to {}", VideoTime::from_pcr(result.end.pcr));
        println!("  duration {}", VideoTime::from_pcr(result.duration_ticks));
        println!();
        return Ok(());
    }

    let (index, built) = PcrIndex::load_or_build(&cli.input, true)?;
    anyhow::ensure!(
        !index.is_empty(),
        "no PCRs found in {}",
        cli.input.display()
    );
    if built {
        info!("index created for {}", cli.input.display());
    }

    let pcr_min = index.pcr_min().unwrap_or(0);
    let pcr_max = index.pcr_max().unwrap_or(0);
    let duration = index.duration_ticks().unwrap_or(0);
    println!(
        "PCRs from: {pcr_min} to {pcr_max}, duration {duration}, {}",
        VideoTime::from_pcr(duration)
    );

    if cli.list {
        for (id, rec) in index.records.iter().enumerate() {
            println!("{}", format_index_entry(id, rec));
        }
        return Ok(());
    }

    // Default slice boundaries are the whole recording.
    let pcr_start = cli.start.map_or(pcr_min, VideoTime::to_pcr);
    let pcr_end = cli.end.map_or(pcr_max, VideoTime::to_pcr);

    let start = index
        .lookup_ge(pcr_start)
        .with_context(|| format!("start time {} is beyond the recording", VideoTime::from_pcr(pcr_start)))?;
    let end = index
        .lookup_ge(pcr_end)
        .with_context(|| format!("end time {} is beyond the recording", VideoTime::from_pcr(pcr_end)))?;

    println!("{}", format_index_entry(0, start));
    println!("{}", format_index_entry(1, end));

    if let Some(output) = &cli.output {
        let written = extract_range(&cli.input, output, start, end, true)?;
        info!("wrote {written} bytes to {}", output.display());
    }

    Ok(())
}
