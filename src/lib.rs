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

//! An implementation of RoCC, a delay-insensitive congestion control
//! algorithm for a host transport stack.
//!
//! ## Overview
//!
//! * **Window from delivery**: the congestion window is the number of packets
//!   acknowledged over the last two minimum RTTs plus a small constant. There
//!   is no slow start and no multiplicative decrease.
//! * **Pacing**: the pacing rate is the window spread over the minimum RTT, or
//!   over the current RTT when the recent loss rate exceeds a tolerable
//!   threshold.
//! * **App-limited safe**: history collected while the sender had no data
//!   never shrinks the window.
//! * **Observable**: every decision can be streamed as a JSON text sequence
//!   for offline analysis.
//!
//! ## Get started
//!
//! A host stack creates one [`Flow`] per connection, reports transmissions
//! with [`Flow::on_sent`] and feedback with [`Flow::on_ack`], and reads back
//! [`Flow::cwnd`] and [`Flow::pacing_rate`]. Stacks with their own rate
//! sampling drive a [`CongestionController`] directly.
//!
//! See the `rocc_sim` tool for a complete example.

/// Default maximum segment size in bytes.
pub const DEFAULT_MAX_SEGMENT_SIZE: usize = 1460;

/// Congestion window of a new flow, in packets.
pub const INITIAL_CONGESTION_WINDOW: u64 = 10;

/// Result type for congestion control operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Configurations about one flow and its congestion controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowConfig {
    /// Maximum segment size in bytes.
    max_segment_size: usize,

    /// Congestion window before the first decision, in packets.
    initial_congestion_window: u64,

    /// Floor of the congestion window, in packets.
    min_congestion_window: u64,

    /// Number of interval buckets kept by RoCC.
    rocc_num_intervals: usize,

    /// Packets added on top of the acked count.
    rocc_alpha: u64,

    /// Tolerable loss rate in 1024ths.
    rocc_loss_thresh: u64,

    /// Whether a packet scheduler below the stack paces the flow.
    pacing_offload: bool,
}

impl FlowConfig {
    pub fn new() -> Self {
        let rocc = RoccConfig::default();

        Self {
            max_segment_size: DEFAULT_MAX_SEGMENT_SIZE,
            initial_congestion_window: INITIAL_CONGESTION_WINDOW,
            min_congestion_window: rocc.min_cwnd(),
            rocc_num_intervals: rocc.num_intervals(),
            rocc_alpha: rocc.alpha(),
            rocc_loss_thresh: rocc.loss_thresh(),
            pacing_offload: false,
        }
    }

    /// Set the maximum segment size in bytes.
    pub fn set_max_segment_size(&mut self, v: usize) {
        self.max_segment_size = v;
    }

    /// Set the congestion window of a new flow in packets.
    /// The value is raised to the minimal congestion window if lower.
    pub fn set_initial_congestion_window(&mut self, v: u64) {
        self.initial_congestion_window = v;
    }

    /// Set the minimal congestion window in packets.
    /// The default value is 2.
    pub fn set_min_congestion_window(&mut self, v: u64) {
        self.min_congestion_window = v;
    }

    /// Set the number of interval buckets. It must be a power of two.
    /// The default value is 16.
    pub fn set_rocc_num_intervals(&mut self, v: usize) {
        self.rocc_num_intervals = v;
    }

    /// Set the additive constant of the window in packets.
    /// The default value is 2.
    pub fn set_rocc_alpha(&mut self, v: u64) {
        self.rocc_alpha = v;
    }

    /// Set the tolerable loss rate in 1024ths. It must not exceed 1024.
    /// The default value is 64.
    pub fn set_rocc_loss_thresh(&mut self, v: u64) {
        self.rocc_loss_thresh = v;
    }

    /// Set whether a packet scheduler below the stack, such as the fq qdisc,
    /// paces the flow.
    pub fn set_pacing_offload(&mut self, v: bool) {
        self.pacing_offload = v;
    }

    /// Parameters of the RoCC controller of this flow.
    pub fn rocc_config(&self) -> RoccConfig {
        RoccConfig::new(
            self.rocc_num_intervals,
            self.min_congestion_window,
            self.rocc_alpha,
            self.rocc_loss_thresh,
        )
    }

    /// Congestion window of a new flow, never below the minimal window.
    fn initial_window(&self) -> u64 {
        self.initial_congestion_window.max(self.min_congestion_window)
    }
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_config_default() {
        let conf = FlowConfig::default();
        assert_eq!(conf.max_segment_size, DEFAULT_MAX_SEGMENT_SIZE);
        assert_eq!(conf.initial_congestion_window, INITIAL_CONGESTION_WINDOW);
        assert_eq!(conf.min_congestion_window, 2);
        assert_eq!(conf.rocc_num_intervals, 16);
        assert_eq!(conf.rocc_alpha, 2);
        assert_eq!(conf.rocc_loss_thresh, 64);
        assert!(!conf.pacing_offload);
    }

    #[test]
    fn initial_congestion_window() {
        let mut conf = FlowConfig::new();
        assert_eq!(conf.initial_window(), INITIAL_CONGESTION_WINDOW);

        conf.set_initial_congestion_window(0);
        assert_eq!(conf.initial_window(), 2);

        conf.set_min_congestion_window(4);
        conf.set_initial_congestion_window(32);
        assert_eq!(conf.initial_window(), 32);
    }

    #[test]
    fn rocc_params() {
        let mut conf = FlowConfig::new();
        conf.set_rocc_num_intervals(32);
        conf.set_rocc_alpha(4);
        conf.set_rocc_loss_thresh(128);
        conf.set_max_segment_size(1200);

        assert_eq!(conf.max_segment_size, 1200);
        assert_eq!(conf.rocc_config(), RoccConfig::new(32, 2, 4, 128));
    }
}

pub use crate::congestion_control::build_congestion_controller;
pub use crate::congestion_control::CongestionController;
pub use crate::congestion_control::CongestionStats;
pub use crate::congestion_control::RateSample;
pub use crate::congestion_control::RateSampler;
pub use crate::congestion_control::Rocc;
pub use crate::congestion_control::RoccConfig;
pub use crate::congestion_control::RoccDecision;
pub use crate::congestion_control::INFINITE_RTT;
pub use crate::congestion_control::INFINITE_SSTHRESH;
pub use crate::error::Error;
pub use crate::flow::Flow;
pub use crate::flow::FlowState;
pub use crate::flow::PacingStatus;
pub use crate::flow::RttEstimator;

#[path = "congestion_control/congestion_control.rs"]
mod congestion_control;

#[path = "flow/flow.rs"]
pub mod flow;

#[path = "trace/trace.rs"]
pub mod trace;

pub mod error;
