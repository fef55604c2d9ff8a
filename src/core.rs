//! The clock-inspector pipeline: packet, SCR and PES statistics per incoming
//! packet, the periodic trend reporter, and the ingest loop that drives them.
//!
//! All `PidState` is owned by the ingest task. Only the trend windows are
//! shared with the reporter task, each behind a short-held mutex.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, warn};

use crate::clock::{self, Clock};
use crate::constants::{
    MAX_PTS_VALUE, PID_TABLE_SIZE, PTS_CLOCK_HZ, PTS_JUMP_TICKS, READ_BUFFER_BYTES, SCR_CLOCK_HZ,
    NULL_PID, TS_PACKET_SIZE,
};
use crate::inspector::Options;
use crate::ordered::OrderedClockItem;
use crate::packet;
use crate::pes;
use crate::pids::PidTable;
use crate::report::{self, Reporter, TimingLine};
use crate::source::PacketSource;
use crate::trend::LinearTrend;

/// A trend window registered for periodic reporting.
#[derive(Clone)]
pub struct TrendHandle {
    pub pid: u16,
    pub trend: Arc<Mutex<LinearTrend>>,
}

/// Shared between the ingest task (which registers windows as PIDs appear)
/// and the reporter task (which snapshots them).
pub type TrendRegistry = Arc<Mutex<Vec<TrendHandle>>>;

/// Per-stream pipeline state. Generic over the report writer so tests can
/// capture output in memory.
pub struct Inspector<W: Write> {
    opts: Options,
    pids: PidTable,
    reporter: Reporter<W>,
    registry: TrendRegistry,
    ts_total_packets: u64,
    current_stream_time: i64,
    initial_time: i64,
}

impl<W: Write> Inspector<W> {
    pub fn new(opts: Options, out: W) -> Self {
        let initial_time = opts
            .initial_time
            .unwrap_or_else(|| chrono::Utc::now().timestamp());
        Inspector {
            opts,
            pids: PidTable::new(),
            reporter: Reporter::new(out),
            registry: Arc::new(Mutex::new(Vec::new())),
            ts_total_packets: 0,
            current_stream_time: 0,
            initial_time,
        }
    }

    pub fn registry(&self) -> TrendRegistry {
        self.registry.clone()
    }

    pub fn pids(&self) -> &PidTable {
        &self.pids
    }

    pub fn total_packets(&self) -> u64 {
        self.ts_total_packets
    }

    pub fn into_writer(self) -> W {
        self.reporter.into_inner()
    }

    /// Feed a 188-aligned buffer; `stream_position` is the stream offset of
    /// `buf[0]`. Trailing partial packets are dropped.
    pub fn process_chunk(&mut self, buf: &[u8], stream_position: u64) {
        for (i, pkt) in buf.chunks_exact(TS_PACKET_SIZE).enumerate() {
            let filepos = stream_position + (i * TS_PACKET_SIZE) as u64;
            self.process_packet(pkt, filepos, clock::wall_now_us());
        }
    }

    /// Run one packet through the enabled statistics passes.
    pub fn process_packet(&mut self, pkt: &[u8], filepos: u64, arrival_us: i64) {
        if !packet::is_sync(pkt) {
            return; // skip, never terminate ingest
        }

        self.packet_stats(pkt, filepos);
        if self.opts.scr_stats {
            self.scr_stats(pkt, filepos, arrival_us);
        }
        if self.opts.pes_stats > 0 {
            self.pes_stats(pkt, filepos, arrival_us);
        }
        self.ts_total_packets += 1;
    }

    /// Packet counters, hex dump, continuity-counter state machine.
    fn packet_stats(&mut self, pkt: &[u8], filepos: u64) {
        let pid = packet::pid(pkt);
        let cc = packet::continuity_counter(pkt);

        self.pids.get_mut(pid).pkt_count += 1;

        if self.opts.dump_hex > 0 {
            self.reporter
                .ts_packet(self.ts_total_packets, filepos, pid, pkt, self.opts.dump_hex);
        }

        let afc = packet::adaptation_field_control(pkt);
        if afc == 1 || afc == 3 {
            let (prev_cc, pkt_count) = {
                let p = self.pids.get(pid);
                (p.cc, p.pkt_count)
            };
            // Every pid would be in error on its first packet; check from the
            // second one, and never on the null pid.
            if pkt_count > 1 && pid != NULL_PID {
                let expected = (prev_cc + 1) & 0x0F;
                if expected != cc {
                    self.reporter
                        .cc_error(pid, expected, cc, self.current_stream_time);
                    self.pids.get_mut(pid).cc_errors += 1;
                }
            }
        }
        self.pids.get_mut(pid).cc = cc;
    }

    /// SCR observation: wrap-aware delta, stream-time update, report line.
    fn scr_stats(&mut self, pkt: &[u8], filepos: u64, arrival_us: i64) {
        let pid = packet::pid(pkt);
        let Some(scr) = packet::pcr(pkt) else {
            return;
        };

        let initial_time = self.initial_time;
        let scr_pid = self.opts.scr_pid;

        let p = self.pids.get_mut(pid);
        let mut scr_diff_ticks = 0;
        if p.scr_update_count > 0 {
            scr_diff_ticks = clock::scr_diff(p.scr, scr);
        } else {
            p.scr_first = scr;
            p.scr_first_time = initial_time;
        }
        p.scr = scr;
        p.scr_update_count += 1;
        let update_count = p.scr_update_count;

        // The stream's own idea of "now": first wallclock anchor plus the
        // SCR distance travelled since.
        let stream_time = p.scr_first_time + clock::scr_diff(p.scr_first, scr) / SCR_CLOCK_HZ as i64;

        let drift_ms = if pid == scr_pid {
            let clk = p.clk_scr.get_or_insert_with(|| Clock::new(SCR_CLOCK_HZ));
            clk.establish_wallclock(scr);
            clk.set_ticks(scr);
            Some(clk.drift_ms())
        } else {
            None
        };

        self.current_stream_time = stream_time;
        self.reporter.scr_line(
            update_count,
            filepos,
            pid,
            scr,
            scr_diff_ticks,
            &clock::pcr_to_timecode(scr),
            arrival_us,
            drift_ms,
        );
    }

    /// PES arrival correlation plus PTS/DTS extraction on unit start.
    fn pes_stats(&mut self, pkt: &[u8], filepos: u64, arrival_us: i64) {
        let pid = packet::pid(pkt);
        let scr_now = self.pids.get(self.opts.scr_pid).scr;

        if !packet::payload_unit_start(pkt) {
            // Note the SCR under which this pid was last seen, so the next
            // unit header can measure the delivery span of the one that just
            // completed.
            let p = self.pids.get_mut(pid);
            p.scr_last_seen = scr_now;
            p.scr_last_seen_ts_us = arrival_us;
            return;
        }

        let (prior_pes_delivery_ticks, prior_pes_delivery_us) = {
            let p = self.pids.get_mut(pid);
            let ticks = p.scr_last_seen - p.scr_at_pes_unit_header;
            let us = p.scr_last_seen_ts_us - p.scr_at_pes_unit_header_ts_us;
            p.scr_at_pes_unit_header = scr_now;
            p.scr_at_pes_unit_header_ts_us = arrival_us;
            (ticks, us)
        };

        if pid == 0 {
            return;
        }
        // The PES header is expected somewhere within this single packet.
        let Some(off) = packet::contains_pes_header(&pkt[4..]) else {
            return;
        };
        self.pes_header(
            &pkt[4 + off..],
            pid,
            filepos,
            arrival_us,
            prior_pes_delivery_ticks,
            prior_pes_delivery_us,
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn pes_header(
        &mut self,
        buf: &[u8],
        pid: u16,
        filepos: u64,
        arrival_us: i64,
        prior_pes_delivery_ticks: i64,
        prior_pes_delivery_us: i64,
    ) {
        let hdr = match pes::parse(buf) {
            Ok(hdr) => hdr,
            Err(e) => {
                debug!("skipping unparseable PES header on pid 0x{pid:04x}: {e:#}");
                return;
            }
        };

        let scr_now = self.pids.get(self.opts.scr_pid).scr;
        let stream_time = self.current_stream_time;
        let wall = report::ctime_now();

        self.reporter.timing_header();

        if hdr.has_pts() {
            let trend = self.trend_for_pts(pid);

            let p = self.pids.get_mut(pid);
            let prev = p.pts_last;

            let clk = p.clk_pts.get_or_insert_with(|| Clock::new(PTS_CLOCK_HZ));
            clk.establish_wallclock(hdr.pts);
            clk.set_ticks(hdr.pts);
            let drift_ms = clk.drift_ms();

            let mut diff = clock::pts_diff(prev.pts, hdr.pts);
            if diff > PTS_JUMP_TICKS {
                diff -= MAX_PTS_VALUE;
            }
            p.pts_diff_ticks = diff;
            p.pts_count += 1;
            let count = p.pts_count;
            let pts_scr_diff_ms = clock::scr_diff(p.pts_last_scr, scr_now) / 27_000;
            p.pts_last_scr = scr_now;
            p.pts_last = hdr;

            let minus_scr_ticks = hdr.pts * 300 - scr_now;

            // Trend input is wallclock seconds against PTS seconds, both
            // rebased to the first retained sample.
            p.trend_pts.counter += 1;
            if p.trend_pts.counter > crate::constants::TREND_WARMUP_SAMPLES {
                let x = arrival_us as f64 / 1_000_000.0;
                let y = hdr.pts as f64 / PTS_CLOCK_HZ as f64;
                if p.trend_pts.first_x == 0.0 {
                    p.trend_pts.first_x = x;
                }
                if p.trend_pts.first_y == 0.0 {
                    p.trend_pts.first_y = y;
                }
                let sample = (x - p.trend_pts.first_x, y - p.trend_pts.first_y);
                trend.lock().unwrap().add(sample.0, sample.1);
            }

            if minus_scr_ticks < 0 && self.opts.conformance_warnings {
                self.reporter.behind_pcr("PTS", count, stream_time);
            }
            if clock::pts_ticks_to_ms(diff) >= self.opts.max_drift_ms {
                self.reporter.clock_jump(
                    "PTS",
                    count,
                    self.opts.max_drift_ms,
                    clock::pts_ticks_to_ms(diff),
                    stream_time,
                );
            }
            if pts_scr_diff_ms >= self.opts.max_drift_ms {
                self.reporter.scr_tick_jump(
                    "PTS",
                    count,
                    self.opts.max_drift_ms,
                    pts_scr_diff_ms,
                    stream_time,
                );
            }

            if !self.opts.reorder_pts {
                self.reporter.timing_line(
                    "PTS",
                    &TimingLine {
                        count,
                        filepos,
                        pid,
                        value: hdr.pts,
                        diff_ticks: diff,
                        scr_diff_ms: pts_scr_diff_ms,
                        minus_scr_ticks,
                        wall: wall.clone(),
                        arrival_us,
                        drift_ms,
                    },
                );

                if self.opts.pes_delivery_report {
                    self.reporter.pes_delivery(
                        count - 1,
                        pid,
                        prior_pes_delivery_ticks,
                        prior_pes_delivery_us,
                    );
                }
            } else {
                self.pids.get_mut(pid).ordered_pts.insert(OrderedClockItem {
                    nr: count,
                    clock: hdr.pts,
                    filepos,
                });
            }
        }

        if hdr.has_dts() {
            let trend = self.trend_for_dts(pid);

            let p = self.pids.get_mut(pid);
            let prev = p.dts_last;

            let clk = p.clk_dts.get_or_insert_with(|| Clock::new(PTS_CLOCK_HZ));
            clk.establish_wallclock(hdr.dts);
            clk.set_ticks(hdr.dts);
            let drift_ms = clk.drift_ms();

            let diff = clock::pts_diff(prev.dts, hdr.dts);
            p.dts_diff_ticks = diff;
            p.dts_count += 1;
            let count = p.dts_count;
            let dts_scr_diff_ms = clock::scr_diff(p.dts_last_scr, scr_now) / 27_000;
            p.dts_last_scr = scr_now;
            p.dts_last = hdr;

            let minus_scr_ticks = hdr.dts * 300 - scr_now;

            p.trend_dts.counter += 1;
            if p.trend_dts.counter > crate::constants::TREND_WARMUP_SAMPLES {
                let x = arrival_us as f64 / 1_000_000.0;
                let y = hdr.dts as f64 / PTS_CLOCK_HZ as f64;
                if p.trend_dts.first_x == 0.0 {
                    p.trend_dts.first_x = x;
                }
                if p.trend_dts.first_y == 0.0 {
                    p.trend_dts.first_y = y;
                }
                let sample = (x - p.trend_dts.first_x, y - p.trend_dts.first_y);
                trend.lock().unwrap().add(sample.0, sample.1);
            }

            if clock::pts_ticks_to_ms(diff) >= self.opts.max_drift_ms {
                self.reporter.clock_jump(
                    "DTS",
                    count,
                    self.opts.max_drift_ms,
                    clock::pts_ticks_to_ms(diff),
                    stream_time,
                );
            }
            if dts_scr_diff_ms >= self.opts.max_drift_ms {
                self.reporter.scr_tick_jump(
                    "DTS",
                    count,
                    self.opts.max_drift_ms,
                    dts_scr_diff_ms,
                    stream_time,
                );
            }

            self.reporter.timing_line(
                "DTS",
                &TimingLine {
                    count,
                    filepos,
                    pid,
                    value: hdr.dts,
                    diff_ticks: diff,
                    scr_diff_ms: dts_scr_diff_ms,
                    minus_scr_ticks,
                    wall,
                    arrival_us,
                    drift_ms,
                },
            );
        }

        if self.opts.pes_stats > 1 {
            self.reporter.pes_header_dump(&hdr);
        }
    }

    /// Lazily create and register the PTS trend window for a PID.
    fn trend_for_pts(&mut self, pid: u16) -> Arc<Mutex<LinearTrend>> {
        let trend_size = self.opts.trend_size;
        let state = &mut self.pids.get_mut(pid).trend_pts;
        if let Some(t) = &state.trend {
            return t.clone();
        }
        let t = Arc::new(Mutex::new(LinearTrend::new(
            trend_size,
            format!("PTS 0x{pid:04x} to Wallclock delta"),
        )));
        state.trend = Some(t.clone());
        self.registry
            .lock()
            .unwrap()
            .push(TrendHandle { pid, trend: t.clone() });
        t
    }

    fn trend_for_dts(&mut self, pid: u16) -> Arc<Mutex<LinearTrend>> {
        let trend_size = self.opts.trend_size;
        let state = &mut self.pids.get_mut(pid).trend_dts;
        if let Some(t) = &state.trend {
            return t.clone();
        }
        let t = Arc::new(Mutex::new(LinearTrend::new(
            trend_size,
            format!("DTS 0x{pid:04x} to Wallclock delta"),
        )));
        state.trend = Some(t.clone());
        self.registry
            .lock()
            .unwrap()
            .push(TrendHandle { pid, trend: t.clone() });
        t
    }

    /// Shutdown summary: one line per active PID.
    pub fn pid_report(&mut self) {
        self.reporter.pid_report(&self.pids, self.ts_total_packets);
    }

    /// Shutdown dump of the display-ordered PTS listings (reorder mode).
    pub fn ordered_dumps(&mut self) {
        for pid in 0..PID_TABLE_SIZE as u16 {
            if self.pids.get(pid).pts_count > 0 {
                self.reporter.ordered_dump(pid, &self.pids.get(pid).ordered_pts);
            }
        }
    }

    pub fn json_summary(&self) -> String {
        report::json_summary(&self.pids, self.ts_total_packets)
    }
}

/// Snapshot every registered trend and print one summary line each. At
/// verbosity 2 the raw samples are also saved to CSV, at 3 dumped to the
/// console. The lock is held only for the clone.
pub fn print_trend_reports(registry: &TrendRegistry, verbosity: u8) {
    let handles: Vec<TrendHandle> = registry.lock().unwrap().to_vec();
    for handle in handles {
        let snapshot = handle.trend.lock().unwrap().clone();

        if verbosity >= 2 {
            if let Err(e) = snapshot.save_csv() {
                warn!("failed to save trend CSV: {e:#}");
            }
        }
        if verbosity >= 3 {
            snapshot.print_samples();
        }

        let fit = snapshot.calculate();
        let r2 = snapshot.r_squared(fit.slope, fit.intercept);
        println!("{}", report::format_trend_line(handle.pid, &snapshot, &fit, r2));
    }
}

/// Cooperative periodic reporter: wakes every 250 ms, fires when the
/// next-report deadline has passed.
async fn trend_report_task(
    registry: TrendRegistry,
    running: Arc<AtomicBool>,
    verbosity: u8,
    period_secs: u64,
) {
    if verbosity == 0 {
        return;
    }
    let mut next = tokio::time::Instant::now() + Duration::from_secs(period_secs);
    while running.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(250)).await;
        if tokio::time::Instant::now() < next {
            continue;
        }
        println!("Dumping trend report(s)");
        print_trend_reports(&registry, verbosity);
        next = tokio::time::Instant::now() + Duration::from_secs(period_secs);
    }
}

/// Async entry point: open the source, run ingest until EOF, signal or the
/// stop deadline, then emit the final reports.
pub async fn run(opts: Options) -> anyhow::Result<()> {
    let mut source = PacketSource::open(&opts.input).await?;
    let file_length = source.file_length();
    let progress = opts.progress && file_length.is_some();

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                running.store(false, Ordering::SeqCst);
            }
        });
    }

    if opts.trend_report > 0 {
        println!("Enabled Linear Trend reporting for PTS to SCR deltas");
    }

    let mut inspector = Inspector::new(opts.clone(), std::io::stdout());
    let reporter_task = tokio::spawn(trend_report_task(
        inspector.registry(),
        running.clone(),
        opts.trend_report,
        opts.report_period_secs,
    ));

    let ingest_result = ingest(&opts, &mut source, &mut inspector, &running, progress).await;

    // The reporter notices the cleared flag within 250 ms; wait for it
    // before the final reports so output is not interleaved.
    running.store(false, Ordering::SeqCst);
    let _ = reporter_task.await;
    ingest_result?;

    if progress {
        eprintln!("\ndone");
    }

    println!();
    inspector.pid_report();
    if opts.trend_report > 0 {
        print_trend_reports(&inspector.registry(), opts.trend_report);
    }
    if opts.json_summary {
        println!("{}", inspector.json_summary());
    }
    if opts.reorder_pts {
        inspector.ordered_dumps();
    }

    Ok(())
}

async fn ingest<W: Write>(
    opts: &Options,
    source: &mut PacketSource,
    inspector: &mut Inspector<W>,
    running: &AtomicBool,
    progress: bool,
) -> anyhow::Result<()> {
    let file_length = source.file_length();
    let deadline = (opts.stop_after_secs > 0)
        .then(|| tokio::time::Instant::now() + Duration::from_secs(opts.stop_after_secs));

    let mut buf = vec![0u8; READ_BUFFER_BYTES];
    let mut stream_position: u64 = 0;

    while running.load(Ordering::SeqCst) {
        if let Some(deadline) = deadline {
            if tokio::time::Instant::now() >= deadline {
                break;
            }
        }

        // Bounded wait so the running flag is re-checked even when the
        // source is quiet.
        let rlen = match tokio::time::timeout(Duration::from_millis(250), source.read(&mut buf))
            .await
        {
            Err(_) => continue,
            Ok(Ok(0)) if source.is_file() => break, // EOF
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(e).context("source read"),
        };
        if rlen == 0 {
            continue; // empty datagram
        }

        inspector.process_chunk(&buf[..rlen], stream_position);
        stream_position += rlen as u64;

        if progress {
            if let Some(total) = file_length {
                eprint!(
                    "\rprocessing ... {:.2}%",
                    stream_position as f64 / total as f64 * 100.0
                );
            }
        }
    }

    Ok(())
}
