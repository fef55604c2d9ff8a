// src/lib.rs
pub mod inspector {
    use crate::constants::{
        DEFAULT_MAX_DRIFT_MS, DEFAULT_REPORT_PERIOD_SECS, DEFAULT_SCR_PID, DEFAULT_TREND_SIZE,
    };

    /// Inspector configuration, one field per CLI switch.
    #[derive(Debug, Clone)]
    pub struct Options {
        /// File path or `udp://host:port[?localaddr=…]`.
        pub input: String,
        /// Wallclock anchor (epoch seconds) for the first SCR; `None` means
        /// "now". Useful to line TS files up with other datetime logs.
        pub initial_time: Option<i64>,
        /// 1 = packet header + 32 bytes hex, 2+ = full packet.
        pub dump_hex: u8,
        /// Report SCR/PCR timing.
        pub scr_stats: bool,
        /// 1 = report PTS/DTS timing, 2+ = also echo each PES header.
        pub pes_stats: u8,
        /// PID whose PCR anchors the SCR-relative PES measurements.
        pub scr_pid: u16,
        /// Conformance threshold for PTS/DTS deltas.
        pub max_drift_ms: i64,
        /// Buffer PTS observations and dump them in display order at exit.
        pub reorder_pts: bool,
        pub progress: bool,
        /// Cleared by `-Z`.
        pub conformance_warnings: bool,
        /// 1 = periodic trend summaries, 2 = also CSV, 3 = also console dump.
        pub trend_report: u8,
        pub pes_delivery_report: bool,
        /// Stop after N seconds; 0 = unlimited.
        pub stop_after_secs: u64,
        /// Trend window capacity in samples.
        pub trend_size: usize,
        pub report_period_secs: u64,
        /// Emit a JSON stream summary at shutdown.
        pub json_summary: bool,
    }

    impl Default for Options {
        fn default() -> Self {
            Options {
                input: String::new(),
                initial_time: None,
                dump_hex: 0,
                scr_stats: false,
                pes_stats: 0,
                scr_pid: DEFAULT_SCR_PID,
                max_drift_ms: DEFAULT_MAX_DRIFT_MS,
                reorder_pts: false,
                progress: false,
                conformance_warnings: true,
                trend_report: 0,
                pes_delivery_report: false,
                stop_after_secs: 0,
                trend_size: DEFAULT_TREND_SIZE,
                report_period_secs: DEFAULT_REPORT_PERIOD_SECS,
                json_summary: false,
            }
        }
    }

    /// Async entry-point; returns when the source ends, on Ctrl-C, or when
    /// the `-t` deadline expires.
    pub async fn run(opts: Options) -> anyhow::Result<()> {
        crate::core::run(opts).await
    }
}

pub mod clock;
pub mod constants;
pub mod core;
pub mod index;
pub mod ordered;
pub mod packet;
pub mod pes;
pub mod pids;
pub mod report;
pub mod slice;
pub mod source;
pub mod trend;
