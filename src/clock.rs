//! Wrap-safe arithmetic over the three clock domains: the 27 MHz system
//! clock, the 90 kHz presentation/decode clock, and host wallclock.
//!
//! Every subtraction of two transport clock values goes through [`pts_diff`]
//! or [`scr_diff`]; both reduce `(b - a)` into `[0, MAX)` so a legal wrap
//! never produces a negative delta.

use std::fmt;
use std::str::FromStr;

use anyhow::bail;

use crate::constants::{MAX_PTS_VALUE, MAX_SCR_VALUE, PTS_CLOCK_HZ, SCR_CLOCK_HZ};

/// Forward delta `b - a` on the 90 kHz clock, modulo 2^33.
pub fn pts_diff(a: i64, b: i64) -> i64 {
    let mut d = b - a;
    if d < 0 {
        d += MAX_PTS_VALUE;
    }
    d
}

/// Forward delta `b - a` on the 27 MHz clock, modulo 2^33 * 300.
pub fn scr_diff(a: i64, b: i64) -> i64 {
    let mut d = b - a;
    if d < 0 {
        d += MAX_SCR_VALUE;
    }
    d
}

/// 90 kHz ticks to whole milliseconds.
pub fn pts_ticks_to_ms(ticks: i64) -> i64 {
    ticks / 90
}

/// 27 MHz ticks to whole milliseconds.
pub fn scr_ticks_to_ms(ticks: i64) -> i64 {
    ticks / 27_000
}

/// 27 MHz ticks to whole microseconds.
pub fn scr_ticks_to_us(ticks: i64) -> i64 {
    ticks / 27
}

/// Current wallclock in microseconds since the epoch.
pub fn wall_now_us() -> i64 {
    chrono::Utc::now().timestamp_micros()
}

/// Render a 27 MHz value as a `D.HH:MM:SS.mmm` timecode with real
/// milliseconds, as used in the SCR report column.
pub fn pcr_to_timecode(pcr: i64) -> String {
    let mut seconds = pcr / SCR_CLOCK_HZ as i64;
    let msecs = (pcr % SCR_CLOCK_HZ as i64) / 27_000;

    let days = seconds / (3600 * 24);
    seconds -= days * 3600 * 24;
    let hours = seconds / 3600;
    seconds -= hours * 3600;
    let mins = seconds / 60;
    seconds -= mins * 60;

    format!("{days}.{hours:02}:{mins:02}:{seconds:02}.{msecs:03}")
}

/// A stream time split into days/hours/minutes/seconds/milliseconds, the
/// slicer's `D.HH:MM:SS.mmm` exchange format.
///
/// Converting from a PCR zeroes the `msecs` field, so the fractional part of
/// a formatted stream time is always `0`. Sub-second boundaries are
/// deliberately truncated.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VideoTime {
    pub days: i64,
    pub hours: i64,
    pub mins: i64,
    pub secs: i64,
    pub msecs: i64,
}

impl VideoTime {
    /// Split a 27 MHz value into calendar-style fields. `msecs` is always 0.
    pub fn from_pcr(pcr: i64) -> Self {
        let mut seconds = pcr / SCR_CLOCK_HZ as i64;

        let days = seconds / (3600 * 24);
        seconds -= days * 3600 * 24;
        let hours = seconds / 3600;
        seconds -= hours * 3600;
        let mins = seconds / 60;
        seconds -= mins * 60;

        VideoTime {
            days,
            hours,
            mins,
            secs: seconds,
            msecs: 0,
        }
    }

    /// Rebuild the 27 MHz value.
    pub fn to_pcr(self) -> i64 {
        let seconds = self.days * 3600 * 24 + self.hours * 3600 + self.mins * 60 + self.secs;
        seconds * SCR_CLOCK_HZ as i64 + self.msecs * 27_000
    }
}

impl FromStr for VideoTime {
    type Err = anyhow::Error;

    /// Parse `D.HH:MM:SS.mmm`; all five fields are required.
    fn from_str(s: &str) -> anyhow::Result<Self> {
        let Some((days, rest)) = s.split_once('.') else {
            bail!("expected D.HH:MM:SS.mmm, got '{s}'");
        };
        let Some((clock, msecs)) = rest.rsplit_once('.') else {
            bail!("expected D.HH:MM:SS.mmm, got '{s}'");
        };
        let mut parts = clock.split(':');
        let (Some(h), Some(m), Some(sec), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            bail!("expected D.HH:MM:SS.mmm, got '{s}'");
        };

        Ok(VideoTime {
            days: days.parse()?,
            hours: h.parse()?,
            mins: m.parse()?,
            secs: sec.parse()?,
            msecs: msecs.parse()?,
        })
    }
}

impl fmt::Display for VideoTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:02}:{:02}:{:02}.{}",
            self.days, self.hours, self.mins, self.secs, self.msecs
        )
    }
}

/// Associates a transport clock domain with a wallclock reference so drift
/// between the two can be measured.
///
/// The clock is *established* at first observation: the pair
/// `(wall_anchor_us, tick_anchor)` is latched and later calls to
/// [`Clock::drift_us`] compare elapsed stream ticks against elapsed
/// wallclock. Negative drift means the stream clock lags the wall.
#[derive(Debug, Default, Clone, Copy)]
pub struct Clock {
    timebase_hz: u32,
    wrap: i64,
    established: bool,
    wall_anchor_us: i64,
    tick_anchor: i64,
    last_ticks: i64,
}

impl Clock {
    /// A fresh tracker for a 90 kHz or 27 MHz timebase.
    pub fn new(timebase_hz: u32) -> Self {
        let wrap = if timebase_hz == PTS_CLOCK_HZ {
            MAX_PTS_VALUE
        } else {
            MAX_SCR_VALUE
        };
        Clock {
            timebase_hz,
            wrap,
            ..Default::default()
        }
    }

    pub fn is_established(&self) -> bool {
        self.established
    }

    /// Latch the wallclock anchor against `first_ticks`. Idempotent.
    pub fn establish_wallclock(&mut self, first_ticks: i64) {
        if self.established {
            return;
        }
        self.established = true;
        self.wall_anchor_us = wall_now_us();
        self.tick_anchor = first_ticks;
        self.last_ticks = first_ticks;
    }

    pub fn set_ticks(&mut self, ticks: i64) {
        self.last_ticks = ticks;
    }

    /// Expected wallclock elapsed (from ticks) minus actual wallclock
    /// elapsed, in microseconds.
    pub fn drift_us(&self) -> i64 {
        if !self.established {
            return 0;
        }
        let mut tick_delta = self.last_ticks - self.tick_anchor;
        if tick_delta < 0 {
            tick_delta += self.wrap;
        }
        let expected_us = (tick_delta as i128 * 1_000_000 / self.timebase_hz as i128) as i64;
        let actual_us = wall_now_us() - self.wall_anchor_us;
        expected_us - actual_us
    }

    pub fn drift_ms(&self) -> i64 {
        self.drift_us() / 1000
    }
}
