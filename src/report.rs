//! Console report formatting: TS/SCR/PTS/DTS lines, conformance warnings,
//! the shutdown pid report and the optional JSON summary.
//!
//! Column order and field widths are load-bearing; downstream log parsers
//! key off them. Header pairs are re-emitted on a 24-line cadence.

use std::io::Write;

use chrono::{Local, TimeZone};
use serde::Serialize;

use crate::constants::REPORT_HEADER_LINES;
use crate::ordered::OrderedClockList;
use crate::pids::PidTable;
use crate::trend::{LinearTrend, TrendLine};

/// Wallclock rendered the way `ctime()` does, minus the trailing newline.
pub fn ctime_now() -> String {
    Local::now().format("%a %b %e %H:%M:%S %Y").to_string()
}

/// Same rendering for an epoch-seconds stream time.
pub fn ctime_at(secs: i64) -> String {
    match Local.timestamp_opt(secs, 0) {
        chrono::LocalResult::Single(dt) | chrono::LocalResult::Ambiguous(dt, _) => {
            dt.format("%a %b %e %H:%M:%S %Y").to_string()
        }
        chrono::LocalResult::None => String::from("??"),
    }
}

/// One PTS or DTS report line, already reduced to printable fields.
pub struct TimingLine {
    pub count: u64,
    pub filepos: u64,
    pub pid: u16,
    pub value: i64,
    pub diff_ticks: i64,
    pub scr_diff_ms: i64,
    pub minus_scr_ticks: i64,
    pub wall: String,
    pub arrival_us: i64,
    pub drift_ms: i64,
}

/// Formats report lines into a writer and keeps the header cadence state.
pub struct Reporter<W: Write> {
    out: W,
    ts_linenr: u32,
    scr_linenr: u32,
    pts_linenr: u32,
}

fn arrival_fields(arrival_us: i64) -> (i64, i64) {
    (
        arrival_us.div_euclid(1_000_000),
        arrival_us.rem_euclid(1_000_000) / 1000,
    )
}

impl<W: Write> Reporter<W> {
    pub fn new(out: W) -> Self {
        Reporter {
            out,
            ts_linenr: 0,
            scr_linenr: 0,
            pts_linenr: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// TS packet line plus hex: 32 bytes at level 1, the whole packet in
    /// 32-byte rows at level 2 and above.
    pub fn ts_packet(&mut self, total: u64, filepos: u64, pid: u16, pkt: &[u8], level: u8) {
        if self.ts_linenr == 0 {
            let _ = writeln!(self.out, "+TS Packet         filepos ------------>");
            let _ = writeln!(
                self.out,
                "+TS Packet             Hex           Dec   PID  Packet --------------------------------------------------------------------------------------->"
            );
        }
        self.ts_linenr += 1;
        if self.ts_linenr > REPORT_HEADER_LINES {
            self.ts_linenr = 0;
        }

        let _ = write!(self.out, "TS  #{total:09} -- {filepos:08x} {filepos:13}  {pid:04x}  ");
        let dump = if level >= 2 { pkt } else { &pkt[..32] };
        for (i, row) in dump.chunks(32).enumerate() {
            if i > 0 {
                let _ = write!(self.out, "{:43}", "");
            }
            for b in row {
                let _ = write!(self.out, "{b:02x} ");
            }
            let _ = writeln!(self.out);
        }
    }

    pub fn scr_line(
        &mut self,
        update_count: u64,
        filepos: u64,
        pid: u16,
        scr: i64,
        scr_diff_ticks: i64,
        timecode: &str,
        arrival_us: i64,
        drift_ms: Option<i64>,
    ) {
        if self.scr_linenr == 0 {
            let _ = writeln!(
                self.out,
                "+SCR Timing           filepos ------------>                   SCR  <--- SCR-DIFF ------>  SCR             Walltime ----------------------------->  Drift"
            );
            let _ = writeln!(
                self.out,
                "+SCR Timing               Hex           Dec   PID       27MHz VAL       TICKS         uS  Timecode        Now                      secs               ms"
            );
        }
        self.scr_linenr += 1;
        if self.scr_linenr > REPORT_HEADER_LINES {
            self.scr_linenr = 0;
        }

        let drift = match drift_ms {
            Some(ms) => format!("{ms:5}"),
            None => String::from("   NA"),
        };
        let (secs, ms) = arrival_fields(arrival_us);
        let _ = writeln!(
            self.out,
            "SCR #{update_count:09} -- {filepos:011x} {filepos:13}  {pid:04x}  {scr:14}  {scr_diff_ticks:10}  {us:9}  {timecode}  {wall} {secs:08}.{ms:03} {drift:>6}",
            us = crate::clock::scr_ticks_to_us(scr_diff_ticks),
            wall = ctime_now(),
        );
    }

    /// Shared header for PTS and DTS lines; counts both kinds.
    pub fn timing_header(&mut self) {
        if self.pts_linenr == 0 {
            let _ = writeln!(
                self.out,
                "+PTS/DTS Timing       filepos ------------>               PTS/DTS  <------- DIFF ------> <---- SCR <--PTS*300--------->  Walltime ----------------------------->  Drift"
            );
            let _ = writeln!(
                self.out,
                "+PTS/DTS Timing           Hex           Dec   PID       90KHz VAL       TICKS         MS   Diff MS  minus SCR        ms  Now                      secs               ms"
            );
        }
        self.pts_linenr += 1;
        if self.pts_linenr > REPORT_HEADER_LINES {
            self.pts_linenr = 0;
        }
    }

    pub fn timing_line(&mut self, tag: &str, l: &TimingLine) {
        let (secs, ms) = arrival_fields(l.arrival_us);
        let _ = writeln!(
            self.out,
            "{tag} #{count:09} -- {filepos:011x} {filepos:13}  {pid:04x}  {value:14}  {diff_ticks:10} {diff_ms:10.2} {scr_diff_ms:9} {minus_scr:10} {minus_scr_ms:9.2}  {wall} {secs:08}.{ms:03} {drift:6}",
            count = l.count,
            filepos = l.filepos,
            pid = l.pid,
            value = l.value,
            diff_ticks = l.diff_ticks,
            diff_ms = l.diff_ticks as f64 / 90.0,
            scr_diff_ms = l.scr_diff_ms,
            minus_scr = l.minus_scr_ticks,
            minus_scr_ms = l.minus_scr_ticks as f64 / 27_000.0,
            wall = l.wall,
            drift = l.drift_ms,
        );
    }

    pub fn cc_error(&mut self, pid: u16, expected: u8, got: u8, stream_time: i64) {
        let _ = writeln!(
            self.out,
            "!CC Error. PID {pid:04x} expected {expected:02x} got {got:02x} @ {}",
            ctime_at(stream_time)
        );
    }

    pub fn behind_pcr(&mut self, tag: &str, count: u64, stream_time: i64) {
        let _ = writeln!(
            self.out,
            "!{tag} #{count:09} Error. The {tag} is arriving BEHIND the PCR, the {tag} is late. The stream is not timing conformant @ {}",
            ctime_at(stream_time)
        );
    }

    pub fn clock_jump(&mut self, tag: &str, count: u64, limit_ms: i64, is_ms: i64, stream_time: i64) {
        let _ = writeln!(
            self.out,
            "!{tag} #{count:09} Error. Difference between previous and current 90KHz clock >= +-{limit_ms}ms (is {is_ms}) @ {}",
            ctime_at(stream_time)
        );
    }

    pub fn scr_tick_jump(&mut self, tag: &str, count: u64, limit_ms: i64, is_ms: i64, stream_time: i64) {
        let _ = writeln!(
            self.out,
            "!{tag} #{count:09} Error. Difference between previous and current {tag} frame measured in SCR ticks >= +-{limit_ms}ms (is {is_ms}) @ {}",
            ctime_at(stream_time)
        );
    }

    /// How long the previous PES unit on this PID took to arrive.
    pub fn pes_delivery(&mut self, count: u64, pid: u16, ticks: i64, walltime_us: i64) {
        let note = if ticks == 0 {
            "(probably delivered in a single SCR interval period, so basically no ticks measured)"
        } else {
            ""
        };
        let _ = writeln!(
            self.out,
            "!PTS #{count:09}                              {pid:04x} took {ticks:10} SCR ticks to arrive, or {ms:9.3} ms, {walltime_us:9} uS walltime {note}",
            ms = ticks as f64 / 27_000.0,
        );
    }

    /// Verbose PES echo for `-pp`.
    pub fn pes_header_dump(&mut self, hdr: &crate::pes::PesHeader) {
        let _ = writeln!(
            self.out,
            "    PES stream_id 0x{:02x} PTS_DTS_flags {} PTS {} DTS {}",
            hdr.stream_id, hdr.pts_dts_flags, hdr.pts, hdr.dts
        );
    }

    /// Final per-PID packet summary.
    pub fn pid_report(&mut self, pids: &PidTable, total_packets: u64) {
        let total = total_packets as f64;
        for (pid, state) in pids.active() {
            let _ = writeln!(
                self.out,
                "pid: 0x{pid:04x} pkts: {pkts:12} discontinuities: {cc:12} using: {share:7.1}%",
                pkts = state.pkt_count,
                cc = state.cc_errors,
                share = state.pkt_count as f64 / total * 100.0,
            );
        }
    }

    /// Shutdown dump of the display-ordered PTS list for one PID.
    pub fn ordered_dump(&mut self, pid: u16, list: &OrderedClockList) {
        let mut last: i64 = -1;
        let mut linenr = 0u32;
        for item in list.iter() {
            let diff_ticks = if last == -1 {
                0
            } else {
                crate::clock::pts_diff(last, item.clock)
            };

            if linenr == REPORT_HEADER_LINES {
                linenr = 0;
                let _ = writeln!(
                    self.out,
                    "+PTS/DTS (ordered) filepos ------------>               PTS/DTS  <------- DIFF ------>"
                );
                let _ = writeln!(
                    self.out,
                    "+PTS/DTS #             Hex           Dec   PID       90KHz VAL       TICKS         MS"
                );
            }
            linenr += 1;

            let _ = writeln!(
                self.out,
                "PTS #{nr:09} -- {filepos:09x} {filepos:13}  {pid:04x}  {clock:14}  {diff_ticks:10} {diff_ms:10.2}",
                nr = item.nr,
                filepos = item.filepos,
                clock = item.clock,
                diff_ms = diff_ticks as f64 / 90.0,
            );

            last = item.clock;
        }
    }
}

/// One periodic (or final) trend report line.
pub fn format_trend_line(pid: u16, trend: &LinearTrend, fit: &TrendLine, r2: f64) -> String {
    format!(
        "PID 0x{pid:04x} - Trend '{name}', {count:8} entries, Slope {slope:18.8}, Deviation is {dev:12.2}, r2 is {r2:12.8} @ {now}",
        name = trend.name(),
        count = trend.count(),
        slope = fit.slope,
        dev = fit.deviation,
        now = ctime_now(),
    )
}

#[derive(Serialize)]
struct PidSummaryJson {
    pid: u16,
    packets: u64,
    discontinuities: u64,
    scr_updates: u64,
    pts_count: u64,
    dts_count: u64,
    share_pct: f64,
}

#[derive(Serialize)]
struct StreamSummaryJson {
    ts_time: String,
    total_packets: u64,
    pids: Vec<PidSummaryJson>,
}

/// Machine-readable twin of [`Reporter::pid_report`].
pub fn json_summary(pids: &PidTable, total_packets: u64) -> String {
    let summary = StreamSummaryJson {
        ts_time: chrono::Utc::now().to_rfc3339(),
        total_packets,
        pids: pids
            .active()
            .map(|(pid, s)| PidSummaryJson {
                pid,
                packets: s.pkt_count,
                discontinuities: s.cc_errors,
                scr_updates: s.scr_update_count,
                pts_count: s.pts_count,
                dts_count: s.dts_count,
                share_pct: s.pkt_count as f64 / total_packets.max(1) as f64 * 100.0,
            })
            .collect(),
    };
    serde_json::to_string_pretty(&summary)
        .unwrap_or_else(|_| String::from("{\"error\": \"JSON serialization failed\"}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ordered::OrderedClockItem;

    #[test]
    fn timing_line_layout() {
        let mut rep = Reporter::new(Vec::new());
        rep.timing_header();
        rep.timing_line(
            "PTS",
            &TimingLine {
                count: 1,
                filepos: 376,
                pid: 0x200,
                value: 90_000,
                diff_ticks: 3003,
                scr_diff_ms: 33,
                minus_scr_ticks: 2700,
                wall: String::from("Fri Feb  9 09:13:52 2024"),
                arrival_us: 1_707_488_033_067_000,
                drift_ms: 0,
            },
        );
        let text = String::from_utf8(rep.into_inner()).unwrap();
        assert!(text.contains("+PTS/DTS Timing"));
        assert!(text.contains("PTS #000000001 -- 00000000178           376  0200"));
        assert!(text.contains("33.37")); // 3003 / 90
    }

    #[test]
    fn headers_reemitted_every_25_lines(){
        let mut rep = Reporter::new(Vec::new());
        for _ in 0..26 {
            rep.timing_header();
        }
        let text = String::from_utf8(rep.into_inner()).unwrap();
        assert_eq!(text.matches("+PTS/DTS Timing       filepos").count(), 2);
    }

    #[test]
    fn ordered_dump_first_diff_is_zero() {
        let mut list = OrderedClockList::default();
        list.insert(OrderedClockItem { nr: 1, clock: 9000, filepos: 0 });
        list.insert(OrderedClockItem { nr: 2, clock: 18000, filepos: 188 });
        let mut rep = Reporter::new(Vec::new());
        rep.ordered_dump(0x200, &list);
        let text = String::from_utf8(rep.into_inner()).unwrap();
        let first = text.lines().next().unwrap();
        assert!(first.contains("          9000           0       0.00"), "line: {first}");
    }
}
