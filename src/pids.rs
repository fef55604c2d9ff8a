//! Per-PID tracking state for the inspector pipeline.
//!
//! The table is a flat array of 8192 slots indexed directly by the 13-bit
//! PID; no hashing, O(1) lookup. It is owned exclusively by the ingest task.
//! Only the trend windows inside it are shared (behind a mutex) with the
//! periodic reporter.

use std::sync::{Arc, Mutex};

use crate::clock::Clock;
use crate::constants::PID_TABLE_SIZE;
use crate::ordered::OrderedClockList;
use crate::pes::PesHeader;
use crate::trend::LinearTrend;

/// Trend window plus the warm-up/anchor bookkeeping around it.
#[derive(Default)]
pub struct TrendState {
    pub trend: Option<Arc<Mutex<LinearTrend>>>,
    /// Observations seen, including the discarded warm-up samples.
    pub counter: u64,
    pub first_x: f64,
    pub first_y: f64,
}

/// Everything tracked for one PID.
#[derive(Default)]
pub struct PidState {
    /* TS packets */
    pub pkt_count: u64,
    pub cc: u8,
    pub cc_errors: u64,

    /* PCR / SCR */
    pub scr_first: i64,
    pub scr_first_time: i64,
    pub scr: i64,
    pub scr_update_count: u64,
    pub clk_scr: Option<Clock>,

    /* SCR/wallclock marks used to measure how long the previous PES unit
     * took to arrive. */
    pub scr_at_pes_unit_header: i64,
    pub scr_at_pes_unit_header_ts_us: i64,
    pub scr_last_seen: i64,
    pub scr_last_seen_ts_us: i64,

    /* PTS */
    pub pts_count: u64,
    pub pts_last: PesHeader,
    pub pts_diff_ticks: i64,
    pub pts_last_scr: i64,
    pub clk_pts: Option<Clock>,
    pub trend_pts: TrendState,

    /* DTS */
    pub dts_count: u64,
    pub dts_last: PesHeader,
    pub dts_diff_ticks: i64,
    pub dts_last_scr: i64,
    pub clk_dts: Option<Clock>,
    pub trend_dts: TrendState,

    pub ordered_pts: OrderedClockList,
}

/// Fixed 8192-slot table, one [`PidState`] per possible PID.
pub struct PidTable {
    slots: Box<[PidState]>,
}

impl PidTable {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(PID_TABLE_SIZE);
        slots.resize_with(PID_TABLE_SIZE, PidState::default);
        PidTable {
            slots: slots.into_boxed_slice(),
        }
    }

    pub fn get(&self, pid: u16) -> &PidState {
        &self.slots[pid as usize & (PID_TABLE_SIZE - 1)]
    }

    pub fn get_mut(&mut self, pid: u16) -> &mut PidState {
        &mut self.slots[pid as usize & (PID_TABLE_SIZE - 1)]
    }

    /// PIDs that saw at least one packet, ascending.
    pub fn active(&self) -> impl Iterator<Item = (u16, &PidState)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.pkt_count > 0)
            .map(|(i, s)| (i as u16, s))
    }
}

impl Default for PidTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_starts_zeroed_and_indexes_by_pid() {
        let mut table = PidTable::new();
        assert_eq!(table.get(0x1FFF).pkt_count, 0);
        table.get_mut(0x100).pkt_count = 3;
        assert_eq!(table.get(0x100).pkt_count, 3);
        assert_eq!(table.active().count(), 1);
        let (pid, state) = table.active().next().unwrap();
        assert_eq!(pid, 0x100);
        assert_eq!(state.pkt_count, 3);
    }
}
