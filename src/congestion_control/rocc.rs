// Copyright (c) 2023 The TQUIC Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! RoCC: Robust Congestion Control.
//!
//! RoCC keeps a short history of packets acked and lost, bucketed by time,
//! and sets the congestion window to the number of packets acked over the
//! last two minimum RTTs plus a small additive constant. The pacing rate
//! follows from the window and the minimum RTT. When the recent loss rate
//! exceeds a tolerable fraction, pacing switches to the current RTT.
//!
//! There is no slow start and no multiplicative decrease: the window tracks
//! what the path delivered, and an app-limited history never shrinks it.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use log::*;

use super::CongestionController;
use super::CongestionStats;
use super::RateSample;
use crate::flow::FlowState;
use crate::trace::IntervalSnapshot;
use crate::trace::SampleObserver;
use crate::trace::SampleSnapshot;
use crate::Error;
use crate::Result;

/// Number of interval buckets. Must be a power of two.
const ROCC_NUM_INTERVALS: usize = 16;

/// Minimal congestion window in packets.
const ROCC_MIN_CWND: u64 = 2;

/// Packets added to the acked count when computing the window.
const ROCC_ALPHA: u64 = 2;

/// Maximum tolerable loss rate, expressed as `loss_thresh / 1024`.
const ROCC_LOSS_THRESH: u64 = 64;

/// Fixed-point scale of the loss threshold.
const LOSS_SCALE: u64 = 1024;

/// RTT value used while no estimate is available.
pub const INFINITE_RTT: u64 = u64::MAX;

/// Source of controller identities, used for diagnostics only.
static NEXT_ROCC_ID: AtomicU64 = AtomicU64::new(1);

/// RoCC configurable parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoccConfig {
    /// Number of interval buckets in the history ring.
    num_intervals: usize,

    /// Minimal congestion window in packets.
    min_cwnd: u64,

    /// Additive constant on top of the acked count, in packets.
    alpha: u64,

    /// Tolerable loss fraction in 1024ths.
    loss_thresh: u64,
}

impl RoccConfig {
    pub fn new(num_intervals: usize, min_cwnd: u64, alpha: u64, loss_thresh: u64) -> Self {
        Self {
            num_intervals,
            min_cwnd,
            alpha,
            loss_thresh,
        }
    }

    /// Check that the parameters can drive a controller.
    pub fn validate(&self) -> Result<()> {
        if self.num_intervals == 0 || !self.num_intervals.is_power_of_two() {
            return Err(Error::InvalidConfig(format!(
                "num_intervals {} is not a power of two",
                self.num_intervals
            )));
        }
        if self.min_cwnd == 0 {
            return Err(Error::InvalidConfig("min_cwnd is zero".into()));
        }
        if self.loss_thresh > LOSS_SCALE {
            return Err(Error::InvalidConfig(format!(
                "loss_thresh {} exceeds {}",
                self.loss_thresh, LOSS_SCALE
            )));
        }
        Ok(())
    }

    pub fn num_intervals(&self) -> usize {
        self.num_intervals
    }

    pub fn min_cwnd(&self) -> u64 {
        self.min_cwnd
    }

    pub fn alpha(&self) -> u64 {
        self.alpha
    }

    pub fn loss_thresh(&self) -> u64 {
        self.loss_thresh
    }
}

impl Default for RoccConfig {
    fn default() -> Self {
        Self {
            num_intervals: ROCC_NUM_INTERVALS,
            min_cwnd: ROCC_MIN_CWND,
            alpha: ROCC_ALPHA,
            loss_thresh: ROCC_LOSS_THRESH,
        }
    }
}

/// Packets acked and lost over a short period of time.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Interval {
    /// Starting time of this interval. Zero if never used.
    start_us: u64,

    pkts_acked: u64,

    pkts_lost: u64,

    /// Whether any sample folded into this interval was app limited.
    app_limited: bool,
}

/// Totals over the intervals inside the history horizon.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Aggregate {
    pkts_acked: u64,
    pkts_lost: u64,
    app_limited: bool,
}

/// Outcome of one processed rate sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoccDecision {
    /// Congestion window in packets.
    pub cwnd: u64,

    /// Pacing rate in bytes per second.
    pub pacing_rate: u64,

    /// Whether the recent loss rate exceeded the threshold.
    pub loss_mode: bool,
}

/// RoCC congestion controller, one instance per flow.
#[derive(Debug)]
pub struct Rocc {
    /// Config
    config: RoccConfig,

    /// Ring of interval buckets. Empty until `init()` and after `release()`.
    intervals: Vec<Interval>,

    /// Index of the newest interval, the only one accumulating.
    head: usize,

    /// Smallest smoothed RTT ever observed, in microseconds.
    min_rtt_us: u64,

    /// Debug identity.
    id: u64,

    /// Latest decision.
    cwnd: u64,
    pacing_rate: Option<u64>,

    /// Statistics.
    stats: CongestionStats,

    /// Optional per-sample diagnostics hook.
    observer: Option<Box<dyn SampleObserver>>,
}

impl Rocc {
    pub fn new(config: RoccConfig) -> Self {
        let min_cwnd = config.min_cwnd;

        Self {
            config,
            intervals: Vec::new(),
            head: 0,
            min_rtt_us: INFINITE_RTT,
            id: 0,
            cwnd: min_cwnd,
            pacing_rate: None,
            stats: Default::default(),
            observer: None,
        }
    }

    /// Attach a hook receiving a snapshot after every processed sample.
    pub fn set_observer(&mut self, observer: Box<dyn SampleObserver>) {
        self.observer = Some(observer);
    }

    /// Detach the diagnostics hook.
    pub fn take_observer(&mut self) -> Option<Box<dyn SampleObserver>> {
        self.observer.take()
    }

    /// Was the controller fully initialized.
    pub fn is_valid(&self) -> bool {
        !self.intervals.is_empty()
    }

    /// Debug identity assigned at `init()`, zero before.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Minimum RTT in microseconds, `INFINITE_RTT` if unknown.
    pub fn min_rtt_us(&self) -> u64 {
        self.min_rtt_us
    }

    /// Process a rate sample and commit the new window and pacing rate into
    /// `flow`.
    ///
    /// Invalid samples and calls on an uninitialized controller leave both
    /// the controller and the flow untouched.
    pub fn process_sample(
        &mut self,
        flow: &mut FlowState,
        rs: &RateSample,
    ) -> Result<RoccDecision> {
        if !self.is_valid() {
            return Err(Error::Uninitialized);
        }
        if !rs.is_valid() {
            return Err(Error::InvalidSample);
        }

        let rtt_us = match rs.smoothed_rtt {
            Some(srtt) if !srtt.is_zero() => u64::try_from(srtt.as_micros())
                .unwrap_or(INFINITE_RTT)
                .max(1),
            _ => INFINITE_RTT,
        };
        self.min_rtt_us = self.min_rtt_us.min(rtt_us);

        let hist_us = self.history_us();
        let now = rs.now_us;

        self.update_intervals(now, hist_us, rs);
        let agg = self.aggregate(now, hist_us);

        let cwnd = self.target_cwnd(&agg, flow.cwnd);
        let loss_mode = self.in_loss_mode(&agg);
        let pacing_rate = if loss_mode {
            self.loss_pacing_rate(cwnd, flow.mss, rtt_us)
        } else {
            self.regular_pacing_rate(cwnd, flow.mss)
        };

        flow.cwnd = cwnd;
        flow.pacing_rate = pacing_rate;

        self.cwnd = cwnd;
        self.pacing_rate = Some(pacing_rate);
        self.stats.samples_processed = self.stats.samples_processed.saturating_add(1);
        self.stats.pkts_acked_in_total = self.stats.pkts_acked_in_total.saturating_add(rs.acked);
        self.stats.pkts_lost_in_total = self.stats.pkts_lost_in_total.saturating_add(rs.lost);
        if loss_mode {
            self.stats.loss_mode_samples = self.stats.loss_mode_samples.saturating_add(1);
        }

        trace!(
            "{} {}. cwnd={} pacing={} rtt={}us min_rtt={}us mss={} now={} interval={}us \
             pkts_acked={} pkts_lost={} app_limited={} loss_mode={} hist={}us",
            self.name(),
            self.id,
            cwnd,
            pacing_rate,
            rtt_us,
            self.min_rtt_us,
            flow.mss,
            now,
            rs.interval_us,
            agg.pkts_acked,
            agg.pkts_lost,
            agg.app_limited,
            loss_mode,
            hist_us
        );
        if log_enabled!(Level::Trace) {
            for i in 0..self.intervals.len() {
                let interval = &self.intervals[(self.head + i) & self.mask()];
                trace!(
                    "{} {}. interval {} start={} acked={} lost={} app_limited={}",
                    self.name(),
                    self.id,
                    i,
                    interval.start_us,
                    interval.pkts_acked,
                    interval.pkts_lost,
                    interval.app_limited
                );
            }
        }

        if self.observer.is_some() {
            let snapshot = self.snapshot(now, rtt_us, hist_us, flow, &agg, loss_mode);
            if let Some(observer) = self.observer.as_mut() {
                observer.on_sample(&snapshot);
            }
        }

        Ok(RoccDecision {
            cwnd,
            pacing_rate,
            loss_mode,
        })
    }

    /// Look-back window of the aggregation: two minimum RTTs.
    fn history_us(&self) -> u64 {
        if self.min_rtt_us == INFINITE_RTT {
            INFINITE_RTT
        } else {
            self.min_rtt_us.saturating_mul(2)
        }
    }

    /// Width of one interval bucket.
    ///
    /// The ring stores twice the history that aggregation needs, so that a
    /// misestimated horizon still finds enough buckets.
    fn interval_length_us(&self, hist_us: u64) -> u64 {
        if hist_us == INFINITE_RTT {
            return INFINITE_RTT;
        }

        let n = self.intervals.len() as u64;
        let span = hist_us.saturating_mul(2);
        // Round up.
        span / n + u64::from(span % n != 0)
    }

    fn mask(&self) -> usize {
        self.intervals.len() - 1
    }

    /// Fold the sample into the newest interval, or open a new one if the
    /// newest interval is older than one bucket width.
    fn update_intervals(&mut self, now: u64, hist_us: u64, rs: &RateSample) {
        let interval_length = self.interval_length_us(hist_us);

        if self.intervals[self.head].start_us.saturating_add(interval_length) < now {
            // Push the buffer, overwriting the oldest interval.
            self.head = self.head.wrapping_sub(1) & self.mask();
            self.intervals[self.head] = Interval {
                start_us: now,
                pkts_acked: rs.acked,
                pkts_lost: rs.lost,
                app_limited: rs.is_app_limited,
            };
        } else {
            let head = &mut self.intervals[self.head];
            head.pkts_acked = head.pkts_acked.saturating_add(rs.acked);
            head.pkts_lost = head.pkts_lost.saturating_add(rs.lost);
            head.app_limited |= rs.is_app_limited;
        }
    }

    /// Sum the intervals from newest to oldest. The first interval that
    /// started before the horizon is still counted, then the walk stops.
    fn aggregate(&self, now: u64, hist_us: u64) -> Aggregate {
        let mut agg = Aggregate::default();

        for i in 0..self.intervals.len() {
            let interval = &self.intervals[(self.head + i) & self.mask()];
            agg.pkts_acked = agg.pkts_acked.saturating_add(interval.pkts_acked);
            agg.pkts_lost = agg.pkts_lost.saturating_add(interval.pkts_lost);
            agg.app_limited |= interval.app_limited;

            if interval.start_us.saturating_add(hist_us) < now {
                break;
            }
        }

        agg
    }

    /// Congestion window from the aggregated history.
    fn target_cwnd(&mut self, agg: &Aggregate, current_cwnd: u64) -> u64 {
        let mut cwnd = agg.pkts_acked.saturating_add(self.config.alpha);

        // Low delivery while app limited reflects demand, not capacity.
        if agg.app_limited && cwnd < current_cwnd {
            cwnd = current_cwnd;
            self.stats.app_limited_holds = self.stats.app_limited_holds.saturating_add(1);
        }

        cwnd.max(self.config.min_cwnd)
    }

    /// Whether `lost / (acked + lost)` exceeds `loss_thresh / 1024`.
    fn in_loss_mode(&self, agg: &Aggregate) -> bool {
        let lost = agg.pkts_lost as u128;
        let total = agg.pkts_acked as u128 + lost;

        lost * LOSS_SCALE as u128 > total * self.config.loss_thresh as u128
    }

    /// Pace at cwnd / min_rtt. Using the minimum RTT keeps the flow window
    /// limited under transient RTT inflation.
    fn regular_pacing_rate(&self, cwnd: u64, mss: u64) -> u64 {
        let rate = 1_000_000u128 * cwnd as u128 * mss as u128 / self.min_rtt_us as u128;
        saturate(rate)
    }

    /// Pace at cwnd / rtt using the current RTT sample, inflated by
    /// `2 * loss_thresh / 1024`.
    fn loss_pacing_rate(&self, cwnd: u64, mss: u64, rtt_us: u64) -> u64 {
        let gain = LOSS_SCALE as u128 + 2 * self.config.loss_thresh as u128;
        let rate = 1_000_000u128 * cwnd as u128 * mss as u128 * gain
            / (rtt_us as u128 * 2 * LOSS_SCALE as u128);
        saturate(rate)
    }

    fn snapshot(
        &self,
        now: u64,
        rtt_us: u64,
        hist_us: u64,
        flow: &FlowState,
        agg: &Aggregate,
        loss_mode: bool,
    ) -> SampleSnapshot {
        let finite = |v: u64| if v == INFINITE_RTT { None } else { Some(v) };

        let intervals = (0..self.intervals.len())
            .map(|i| {
                let interval = &self.intervals[(self.head + i) & self.mask()];
                IntervalSnapshot {
                    start_us: interval.start_us,
                    pkts_acked: interval.pkts_acked,
                    pkts_lost: interval.pkts_lost,
                    app_limited: interval.app_limited,
                }
            })
            .collect();

        SampleSnapshot {
            id: self.id,
            now_us: now,
            cwnd: flow.cwnd,
            pacing_rate: flow.pacing_rate,
            rtt_us: finite(rtt_us),
            min_rtt_us: finite(self.min_rtt_us),
            hist_us: finite(hist_us),
            mss: flow.mss,
            pkts_acked: agg.pkts_acked,
            pkts_lost: agg.pkts_lost,
            app_limited: agg.app_limited,
            loss_mode,
            intervals,
        }
    }
}

fn saturate(rate: u128) -> u64 {
    u64::try_from(rate).unwrap_or(u64::MAX)
}

impl CongestionController for Rocc {
    fn name(&self) -> &str {
        "ROCC"
    }

    fn init(&mut self, flow: &mut FlowState) -> Result<()> {
        self.config.validate()?;
        let n = self.config.num_intervals;

        let mut intervals = Vec::new();
        intervals
            .try_reserve_exact(n)
            .map_err(|_| Error::AllocationFailure)?;
        intervals.resize(n, Interval::default());

        self.intervals = intervals;
        self.head = 0;
        self.min_rtt_us = INFINITE_RTT;
        self.id = NEXT_ROCC_ID.fetch_add(1, Ordering::Relaxed);
        self.cwnd = flow.cwnd;
        self.pacing_rate = None;
        self.stats = CongestionStats::default();

        flow.request_pacing();

        debug!(
            "{} {}. init intervals={} min_cwnd={} alpha={} loss_thresh={}/{}",
            self.name(),
            self.id,
            n,
            self.config.min_cwnd,
            self.config.alpha,
            self.config.loss_thresh,
            LOSS_SCALE
        );
        Ok(())
    }

    fn release(&mut self) {
        if self.is_valid() {
            debug!("{} {}. release", self.name(), self.id);
        }
        self.intervals = Vec::new();
        self.head = 0;
        self.min_rtt_us = INFINITE_RTT;
        self.cwnd = self.config.min_cwnd;
        self.pacing_rate = None;
        self.stats = CongestionStats::default();
    }

    fn on_rate_sample(&mut self, flow: &mut FlowState, sample: &RateSample) {
        if let Err(e) = self.process_sample(flow, sample) {
            trace!("{} {}. sample ignored: {:?}", self.name(), self.id, e);
        }
    }

    // The window already tolerates a bounded loss fraction, so reductions
    // are never reverted.
    fn undo_cwnd(&self, flow: &FlowState) -> u64 {
        flow.cwnd
    }

    fn congestion_window(&self) -> u64 {
        self.cwnd
    }

    fn pacing_rate(&self) -> Option<u64> {
        self.pacing_rate
    }

    fn minimal_window(&self) -> u64 {
        self.config.min_cwnd
    }

    fn stats(&self) -> &CongestionStats {
        &self.stats
    }
}
