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

#![allow(unused_variables)]

use std::fmt;

use crate::flow::FlowState;
use crate::FlowConfig;
use crate::Result;
pub use delivery_rate::RateSample;
pub use delivery_rate::RateSampler;
pub use rocc::Rocc;
pub use rocc::RoccConfig;
pub use rocc::RoccDecision;
pub use rocc::INFINITE_RTT;

/// Slow start threshold reported by controllers without a slow start phase.
pub const INFINITE_SSTHRESH: u64 = u64::MAX;

/// Congestion control statistics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CongestionStats {
    /// Rate samples that produced a decision.
    pub samples_processed: u64,

    /// Total packets acked folded into the interval history.
    pub pkts_acked_in_total: u64,

    /// Total packets lost folded into the interval history.
    pub pkts_lost_in_total: u64,

    /// Decisions taken while the loss rate exceeded the threshold.
    pub loss_mode_samples: u64,

    /// Decisions where an app-limited history kept the window from
    /// shrinking.
    pub app_limited_holds: u64,
}

/// Congestion control interfaces called by the host transport stack.
///
/// The host guarantees that calls for one flow are serialized.
pub trait CongestionController {
    /// Name of congestion control algorithm.
    fn name(&self) -> &str;

    /// Set up per-flow state. Called once when the flow begins.
    fn init(&mut self, flow: &mut FlowState) -> Result<()>;

    /// Release per-flow state. Safe to call at any time, more than once.
    fn release(&mut self);

    /// Callback for each rate sample. Writes the new congestion window and
    /// pacing rate into `flow`.
    fn on_rate_sample(&mut self, flow: &mut FlowState, sample: &RateSample);

    /// Congestion window to restore after a spurious loss was detected.
    fn undo_cwnd(&self, flow: &FlowState) -> u64 {
        flow.cwnd
    }

    /// Slow start threshold.
    fn ssthresh(&self, flow: &FlowState) -> u64 {
        INFINITE_SSTHRESH
    }

    /// Congestion window in packets decided on the latest sample.
    fn congestion_window(&self) -> u64;

    /// Pacing rate in bytes per second decided on the latest sample.
    /// If CCA does not estimate pacing rate, return None.
    fn pacing_rate(&self) -> Option<u64> {
        None
    }

    /// Minimal congestion window in packets.
    fn minimal_window(&self) -> u64;

    /// Congestion stats.
    fn stats(&self) -> &CongestionStats;
}

impl fmt::Debug for dyn CongestionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "congestion controller {}.", self.name())
    }
}

/// Build a congestion controller.
pub fn build_congestion_controller(conf: &FlowConfig) -> Result<Box<dyn CongestionController>> {
    let config = conf.rocc_config();
    config.validate()?;

    Ok(Box::new(Rocc::new(config)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn build_default_controller() -> Result<()> {
        let conf = FlowConfig::default();
        let cc = build_congestion_controller(&conf)?;
        assert_eq!(cc.name(), "ROCC");
        assert_eq!(cc.minimal_window(), 2);
        assert_eq!(cc.stats(), &CongestionStats::default());
        assert_eq!(format!("{:?}", cc), "congestion controller ROCC.");
        Ok(())
    }

    #[test]
    fn build_rejects_invalid_config() {
        let mut conf = FlowConfig::default();
        conf.set_rocc_num_intervals(12);
        assert!(matches!(
            build_congestion_controller(&conf),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn default_hooks() -> Result<()> {
        let conf = FlowConfig::default();
        let cc = build_congestion_controller(&conf)?;
        let mut flow = FlowState::new(&conf);
        flow.cwnd = 37;
        assert_eq!(cc.undo_cwnd(&flow), 37);
        assert_eq!(cc.ssthresh(&flow), INFINITE_SSTHRESH);
        Ok(())
    }
}

mod delivery_rate;
mod rocc;
