//! Pipeline behavior over synthetic packet sequences, asserting on the
//! emitted report lines and counters.

mod common;

use mpegts_clock_inspector::constants::MAX_PTS_VALUE;
use mpegts_clock_inspector::core::Inspector;
use mpegts_clock_inspector::inspector::Options;

fn pes_options() -> Options {
    Options {
        scr_stats: true,
        pes_stats: 1,
        ..Options::default()
    }
}

fn capture(inspector: Inspector<Vec<u8>>) -> String {
    String::from_utf8(inspector.into_writer()).unwrap()
}

#[test]
fn single_cc_gap_is_reported_once() {
    let mut ins = Inspector::new(Options::default(), Vec::new());
    for (i, cc) in [0u8, 1, 2, 3, 5, 6, 7, 8, 9, 10].into_iter().enumerate() {
        let pkt = common::ts_packet(0x100, cc, false, &[0u8; 184]);
        ins.process_packet(&pkt, (i * 188) as u64, 0);
    }

    assert_eq!(ins.pids().get(0x100).cc_errors, 1);
    assert_eq!(ins.pids().get(0x100).pkt_count, 10);
    assert_eq!(ins.total_packets(), 10);

    let text = capture(ins);
    assert_eq!(text.matches("!CC Error").count(), 1);
    assert!(
        text.contains("!CC Error. PID 0100 expected 04 got 05"),
        "output was: {text}"
    );
}

#[test]
fn cc_wrap_15_to_0_is_legal() {
    let mut ins = Inspector::new(Options::default(), Vec::new());
    for (i, cc) in [14u8, 15, 0, 1].into_iter().enumerate() {
        let pkt = common::ts_packet(0x100, cc, false, &[0u8; 184]);
        ins.process_packet(&pkt, (i * 188) as u64, 0);
    }
    assert_eq!(ins.pids().get(0x100).cc_errors, 0);
    assert!(!capture(ins).contains("!CC Error"));
}

#[test]
fn null_pid_is_never_cc_checked() {
    let mut ins = Inspector::new(Options::default(), Vec::new());
    for i in 0..6 {
        // constant cc on the null pid
        ins.process_packet(&common::null_packet(7), (i * 188) as u64, 0);
    }
    assert_eq!(ins.pids().get(0x1FFF).cc_errors, 0);
    assert!(!capture(ins).contains("!CC Error"));
}

#[test]
fn pts_wrap_yields_small_forward_diff() {
    let mut ins = Inspector::new(pes_options(), Vec::new());
    ins.process_packet(&common::pes_packet(0x200, 0, MAX_PTS_VALUE - 9000), 0, 0);
    ins.process_packet(&common::pes_packet(0x200, 1, 0), 188, 0);

    assert_eq!(ins.pids().get(0x200).pts_diff_ticks, 9000);
    assert_eq!(ins.pids().get(0x200).pts_count, 2);

    let text = capture(ins);
    assert!(!text.contains("!PTS"), "unexpected warning in: {text}");
    assert_eq!(text.matches("\nPTS #").count() + text.starts_with("PTS #") as usize, 2);
}

#[test]
fn pts_behind_pcr_is_flagged() {
    let mut ins = Inspector::new(pes_options(), Vec::new());
    let t = 100 * 27_000_000i64; // SCR at 100 s
    ins.process_packet(&common::pcr_packet(0x31, 0, t), 0, 0);
    ins.process_packet(&common::pes_packet(0x200, 0, t / 300 - 1000), 188, 0);

    let text = capture(ins);
    assert!(
        text.contains("!PTS #000000001 Error. The PTS is arriving BEHIND the PCR"),
        "output was: {text}"
    );
    assert!(text.contains("The stream is not timing conformant"));
}

#[test]
fn behind_pcr_warning_respects_suppression() {
    let opts = Options {
        conformance_warnings: false,
        ..pes_options()
    };
    let mut ins = Inspector::new(opts, Vec::new());
    let t = 100 * 27_000_000i64;
    ins.process_packet(&common::pcr_packet(0x31, 0, t), 0, 0);
    ins.process_packet(&common::pes_packet(0x200, 0, t / 300 - 1000), 188, 0);
    assert!(!capture(ins).contains("BEHIND the PCR"));
}

#[test]
fn pts_drift_at_default_threshold_is_flagged() {
    let mut ins = Inspector::new(pes_options(), Vec::new());
    ins.process_packet(&common::pes_packet(0x200, 0, 0), 0, 0);
    // 63001 ticks = 700.01 ms, integer ms compare trips at exactly 700
    ins.process_packet(&common::pes_packet(0x200, 1, 63_001), 188, 0);

    let text = capture(ins);
    assert!(
        text.contains(
            "!PTS #000000002 Error. Difference between previous and current 90KHz clock >= +-700ms (is 700)"
        ),
        "output was: {text}"
    );
}

#[test]
fn pts_drift_below_threshold_is_quiet() {
    let mut ins = Inspector::new(pes_options(), Vec::new());
    ins.process_packet(&common::pes_packet(0x200, 0, 0), 0, 0);
    ins.process_packet(&common::pes_packet(0x200, 1, 62_999), 188, 0); // 699 ms
    let text = capture(ins);
    assert!(!text.contains("90KHz clock"), "output was: {text}");
}

#[test]
fn scr_lines_report_diff_and_timecode() {
    let opts = Options {
        scr_stats: true,
        ..Options::default()
    };
    let mut ins = Inspector::new(opts, Vec::new());
    ins.process_packet(&common::pcr_packet(0x31, 0, 0), 0, 0);
    ins.process_packet(&common::pcr_packet(0x31, 1, 1_080_000), 188, 0); // +40 ms

    assert_eq!(ins.pids().get(0x31).scr_update_count, 2);
    assert_eq!(ins.pids().get(0x31).scr, 1_080_000);

    let text = capture(ins);
    assert!(text.contains("+SCR Timing"));
    assert!(text.contains("SCR #000000001"));
    // second line carries the 40 ms diff in ticks and us
    assert!(text.contains("1080000"), "output was: {text}");
    assert!(text.contains("40000"), "output was: {text}");
    assert!(text.contains("0.00:00:00.040"), "output was: {text}");
}

#[test]
fn pes_delivery_report_lines_appear() {
    let opts = Options {
        pes_delivery_report: true,
        ..pes_options()
    };
    let mut ins = Inspector::new(opts, Vec::new());
    ins.process_packet(&common::pcr_packet(0x31, 0, 27_000_000), 0, 0);
    ins.process_packet(&common::pes_packet(0x200, 0, 95_000), 188, 1_000_000);
    // continuation packet marks the SCR under which the unit completed
    ins.process_packet(&common::ts_packet(0x200, 1, false, &[0u8; 184]), 376, 1_020_000);
    ins.process_packet(&common::pcr_packet(0x31, 1, 28_080_000), 564, 1_040_000);
    ins.process_packet(&common::pes_packet(0x200, 2, 99_000), 752, 1_050_000);

    let text = capture(ins);
    assert!(
        text.contains("SCR ticks to arrive"),
        "output was: {text}"
    );
}

#[test]
fn reorder_mode_dumps_in_display_order() {
    let opts = Options {
        reorder_pts: true,
        ..pes_options()
    };
    let mut ins = Inspector::new(opts, Vec::new());
    for (i, pts) in [3003i64, 12012, 6006, 9009].into_iter().enumerate() {
        ins.process_packet(&common::pes_packet(0x200, i as u8, pts), (i * 188) as u64, 0);
    }

    assert_eq!(ins.pids().get(0x200).ordered_pts.len(), 4);
    ins.ordered_dumps();

    let text = capture(ins);
    // live PTS lines are suppressed; only the ordered dump carries them
    assert_eq!(text.matches("PTS #0000").count(), 4);
    let positions: Vec<usize> = [3003i64, 6006, 9009, 12012]
        .iter()
        .map(|v| text.find(&format!("{v:14}")).expect("value present"))
        .collect();
    assert!(
        positions.windows(2).all(|w| w[0] < w[1]),
        "dump not in display order: {text}"
    );
}

#[test]
fn dts_lines_are_reported() {
    let mut ins = Inspector::new(pes_options(), Vec::new());
    let payload = common::pes_payload_pts_dts(9000, 6000);
    ins.process_packet(&common::ts_packet(0x200, 0, true, &payload), 0, 0);

    assert_eq!(ins.pids().get(0x200).dts_count, 1);
    let text = capture(ins);
    assert!(text.contains("DTS #000000001"), "output was: {text}");
}

#[test]
fn garbage_packets_are_skipped_not_fatal() {
    let mut ins = Inspector::new(pes_options(), Vec::new());
    ins.process_packet(&[0u8; 188], 0, 0); // no sync byte
    ins.process_packet(&[0x47u8; 10], 188, 0); // short
    assert_eq!(ins.total_packets(), 0);

    // a unit-start packet without a real PES header inside
    let pkt = common::ts_packet(0x200, 0, true, &[0xAB; 184]);
    ins.process_packet(&pkt, 376, 0);
    assert_eq!(ins.total_packets(), 1);
    assert_eq!(ins.pids().get(0x200).pts_count, 0);
}

#[test]
fn json_summary_carries_pid_counters() {
    let mut ins = Inspector::new(pes_options(), Vec::new());
    ins.process_packet(&common::pcr_packet(0x31, 0, 0), 0, 0);
    ins.process_packet(&common::pes_packet(0x200, 0, 90_000), 188, 0);

    let summary: serde_json::Value = serde_json::from_str(&ins.json_summary()).unwrap();
    assert_eq!(summary["total_packets"], 2);
    let pids = summary["pids"].as_array().unwrap();
    assert_eq!(pids.len(), 2);
    let es = pids.iter().find(|p| p["pid"] == 0x200).unwrap();
    assert_eq!(es["pts_count"], 1);
}

#[test]
fn trend_registers_after_first_pts() {
    let mut ins = Inspector::new(pes_options(), Vec::new());
    ins.process_packet(&common::pes_packet(0x200, 0, 90_000), 0, 0);

    let registry = ins.registry();
    let handles = registry.lock().unwrap();
    assert_eq!(handles.len(), 1);
    assert_eq!(handles[0].pid, 0x200);
    // warm-up: nothing inserted yet
    assert_eq!(handles[0].trend.lock().unwrap().count(), 0);
}

#[test]
fn trend_inserts_after_warmup() {
    let mut ins = Inspector::new(pes_options(), Vec::new());
    for i in 0..20u64 {
        let pkt = common::pes_packet(0x200, (i % 16) as u8, (i * 3003) as i64);
        ins.process_packet(&pkt, i * 188, (i * 33_367) as i64);
    }
    let registry = ins.registry();
    let handles = registry.lock().unwrap();
    // 20 observations, first 16 discarded
    assert_eq!(handles[0].trend.lock().unwrap().count(), 4);
}
