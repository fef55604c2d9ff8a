use anyhow::Result;
use chrono::{Local, NaiveDateTime, TimeZone};
use clap::{ArgAction, Parser};
use tracing::info;

use mpegts_clock_inspector::constants::{
    DEFAULT_MAX_DRIFT_MS, DEFAULT_REPORT_PERIOD_SECS, DEFAULT_TREND_SIZE, MIN_REPORT_PERIOD_SECS,
    MIN_TREND_SIZE,
};
use mpegts_clock_inspector::inspector::{run, Options};

/// Extract and correlate PCR/SCR, PTS and DTS clocks from every pid in an
/// MPEG-TS file or stream.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input file, or udp://227.1.20.45:4001?localaddr=192.168.20.45
    /// (localaddr is the IP where the IGMP join is issued)
    #[arg(short = 'i')]
    input: String,

    /// Initial wallclock anchor as YYYYMMDDHHMMSS [default: current time].
    /// Only relevant in -s SCR mode: the first SCR is pinned to this time
    /// and every later SCR is reported as anchor plus SCR difference
    #[arg(short = 'T', value_parser = parse_initial_time)]
    initial_time: Option<i64>,

    /// Dump every TS packet header in hex (repeat for the full packet)
    #[arg(short = 'd', action = ArgAction::Count)]
    dump_hex: u8,

    /// Dump SCR/PCR time, adjusting for -T if given
    #[arg(short = 's')]
    scr_stats: bool,

    /// Use the SCR on this pid (hex 0x31 or decimal)
    #[arg(short = 'S', default_value = "0x31", value_parser = parse_pid)]
    scr_pid: u16,

    /// Dump PTS/DTS (repeat to also echo each PES header)
    #[arg(short = 'p', action = ArgAction::Count)]
    pes_stats: u8,

    /// Max allowable PTS/DTS clock drift in ms
    #[arg(short = 'D', default_value_t = DEFAULT_MAX_DRIFT_MS)]
    max_drift_ms: i64,

    /// Reorder the PTS output into ascending PTS (display) order, dumped at
    /// exit; buffers every observation, memory-expensive on long runs
    #[arg(short = 'R')]
    reorder_pts: bool,

    /// Show a percentage progress indicator for file input
    #[arg(short = 'P')]
    progress: bool,

    /// Suppress warnings about non-conformant stream timing
    #[arg(short = 'Z')]
    suppress_warnings: bool,

    /// Print linear trend reports of PTS-to-wallclock drift
    /// (repeat: 2 = also save CSV, 3 = also dump samples)
    #[arg(short = 'L', action = ArgAction::Count)]
    trend_report: u8,

    /// Report walltime/tick delivery times of each PES unit
    #[arg(short = 'Y')]
    pes_delivery_report: bool,

    /// Stop after N seconds [default: 0 - unlimited]
    #[arg(short = 't', default_value_t = 0)]
    stop_after_secs: u64,

    /// Trend window size; 108000 is 1hr of 30fps, 216000 1hr of 60fps
    #[arg(short = 'A', default_value_t = DEFAULT_TREND_SIZE)]
    trend_size: usize,

    /// Trend report output period in seconds
    #[arg(short = 'B', default_value_t = DEFAULT_REPORT_PERIOD_SECS)]
    report_period_secs: u64,

    /// Emit a JSON stream summary at shutdown
    #[arg(long = "json")]
    json_summary: bool,
}

fn parse_pid(raw: &str) -> Result<u16, String> {
    let pid = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => raw.parse(),
    }
    .map_err(|e| format!("invalid pid '{raw}': {e}"))?;
    if pid > 0x1FFF {
        return Err(format!("pid 0x{pid:x} out of 13-bit range"));
    }
    Ok(pid)
}

fn parse_initial_time(raw: &str) -> Result<i64, String> {
    let naive = NaiveDateTime::parse_from_str(raw, "%Y%m%d%H%M%S")
        .map_err(|e| format!("invalid datetime '{raw}': {e}"))?;
    match Local.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) | chrono::LocalResult::Ambiguous(dt, _) => {
            Ok(dt.timestamp())
        }
        chrono::LocalResult::None => Err(format!("'{raw}' is not a valid local time")),
    }
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

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();

    info!("inspecting {}", cli.input);

    run(Options {
        input: cli.input,
        initial_time: cli.initial_time,
        dump_hex: cli.dump_hex,
        scr_stats: cli.scr_stats || cli.pes_stats > 0, // PES stats reference the SCR
        pes_stats: cli.pes_stats,
        scr_pid: cli.scr_pid,
        max_drift_ms: cli.max_drift_ms,
        reorder_pts: cli.reorder_pts,
        progress: cli.progress,
        conformance_warnings: !cli.suppress_warnings,
        trend_report: cli.trend_report,
        pes_delivery_report: cli.pes_delivery_report,
        stop_after_secs: cli.stop_after_secs,
        trend_size: cli.trend_size.max(MIN_TREND_SIZE),
        report_period_secs: cli.report_period_secs.max(MIN_REPORT_PERIOD_SECS),
        json_summary: cli.json_summary,
    })
    .await
}
