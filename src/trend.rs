//! Bounded-window online linear regression.
//!
//! Samples live in a fixed-capacity ring; six running sums are maintained so
//! slope, intercept, deviation and r-squared are O(1) at report time. When
//! the ring is full, each insert subtracts the evicted sample's contribution
//! first, keeping every sum exact for the current window.

use std::io::Write;

use anyhow::Context;

/// Result of a least-squares fit over the current window.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrendLine {
    pub slope: f64,
    pub intercept: f64,
    pub deviation: f64,
}

#[derive(Debug, Clone)]
pub struct LinearTrend {
    name: String,
    capacity: usize,
    count: usize,
    head: usize,
    sum_x: f64,
    sum_y: f64,
    sum_xx: f64,
    sum_xy: f64,
    sum_yy: f64,
    values: Vec<(f64, f64)>,
}

impl LinearTrend {
    pub fn new(capacity: usize, name: impl Into<String>) -> Self {
        LinearTrend {
            name: name.into(),
            capacity: capacity.max(1),
            count: 0,
            head: 0,
            sum_x: 0.0,
            sum_y: 0.0,
            sum_xx: 0.0,
            sum_xy: 0.0,
            sum_yy: 0.0,
            values: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert a sample, evicting the oldest once the window is full.
    pub fn add(&mut self, x: f64, y: f64) {
        if self.count < self.capacity {
            self.values.push((x, y));
            self.count += 1;
        } else {
            let (ox, oy) = self.values[self.head];
            self.sum_x -= ox;
            self.sum_y -= oy;
            self.sum_xx -= ox * ox;
            self.sum_xy -= ox * oy;
            self.sum_yy -= oy * oy;
            self.values[self.head] = (x, y);
            self.head = (self.head + 1) % self.capacity;
        }
        self.sum_x += x;
        self.sum_y += y;
        self.sum_xx += x * x;
        self.sum_xy += x * y;
        self.sum_yy += y * y;
    }

    /// Samples in insertion order, oldest first.
    pub fn samples(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        let (newer, older) = self.values.split_at(self.head);
        older.iter().chain(newer.iter()).copied()
    }

    /// Least-squares slope/intercept plus the population standard deviation
    /// of y, all from the running sums.
    pub fn calculate(&self) -> TrendLine {
        if self.count < 2 {
            return TrendLine::default();
        }
        let n = self.count as f64;
        let denom = n * self.sum_xx - self.sum_x * self.sum_x;
        if denom == 0.0 {
            return TrendLine::default();
        }
        let slope = (n * self.sum_xy - self.sum_x * self.sum_y) / denom;
        let intercept = (self.sum_y - slope * self.sum_x) / n;
        let ss_tot = (self.sum_yy - self.sum_y * self.sum_y / n).max(0.0);
        TrendLine {
            slope,
            intercept,
            deviation: (ss_tot / n).sqrt(),
        }
    }

    /// Coefficient of determination for a previously computed fit, again
    /// without re-scanning the ring.
    pub fn r_squared(&self, slope: f64, intercept: f64) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        let n = self.count as f64;
        let ss_tot = self.sum_yy - self.sum_y * self.sum_y / n;
        if ss_tot <= 0.0 {
            return 0.0;
        }
        let ss_res = self.sum_yy - 2.0 * slope * self.sum_xy - 2.0 * intercept * self.sum_y
            + slope * slope * self.sum_xx
            + 2.0 * slope * intercept * self.sum_x
            + n * intercept * intercept;
        1.0 - ss_res / ss_tot
    }

    /// Write the retained samples as `x,y` lines to `<name>.csv`.
    pub fn save_csv(&self) -> anyhow::Result<()> {
        let path = format!("{}.csv", self.name);
        let mut fh = std::fs::File::create(&path).with_context(|| format!("create {path}"))?;
        for (x, y) in self.samples() {
            writeln!(fh, "{x:.6},{y:.6}")?;
        }
        Ok(())
    }

    /// Dump every retained sample to the console. Expensive on big windows.
    pub fn print_samples(&self) {
        for (i, (x, y)) in self.samples().enumerate() {
            println!("{} {i:8} {x:.6} {y:.6}", self.name);
        }
    }
}
