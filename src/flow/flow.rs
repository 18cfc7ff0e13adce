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

//! Per-flow state owned by the host transport stack.

use std::time::Duration;

use log::*;

use crate::congestion_control::build_congestion_controller;
use crate::congestion_control::CongestionController;
use crate::congestion_control::RateSampler;
use crate::FlowConfig;
use crate::Result;
pub use rtt::RttEstimator;

/// How the host releases packets onto the network.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PacingStatus {
    /// Packets are sent in bursts limited by the congestion window only.
    #[default]
    None,

    /// The stack must pace packets at the flow's pacing rate.
    Needed,

    /// A packet scheduler below the stack already paces the flow.
    Fq,
}

/// Flow record the congestion controller reads from and writes back to.
#[derive(Debug, Clone)]
pub struct FlowState {
    /// Congestion window in packets.
    pub cwnd: u64,

    /// Pacing rate in bytes per second.
    pub pacing_rate: u64,

    /// Maximum segment size in bytes.
    pub mss: u64,

    /// RTT estimator of the flow.
    pub rtt: RttEstimator,

    /// Pacing mode.
    pacing_status: PacingStatus,
}

impl FlowState {
    pub fn new(conf: &FlowConfig) -> Self {
        Self {
            cwnd: conf.initial_window(),
            pacing_rate: 0,
            mss: conf.max_segment_size as u64,
            rtt: RttEstimator::new(),
            pacing_status: if conf.pacing_offload {
                PacingStatus::Fq
            } else {
                PacingStatus::None
            },
        }
    }

    /// Ask the stack to pace this flow. A flow already paced further down
    /// the stack keeps its mode.
    pub fn request_pacing(&mut self) {
        if self.pacing_status == PacingStatus::None {
            self.pacing_status = PacingStatus::Needed;
        }
    }

    pub fn pacing_status(&self) -> PacingStatus {
        self.pacing_status
    }

    pub fn set_pacing_status(&mut self, status: PacingStatus) {
        self.pacing_status = status;
    }
}

/// A flow with its congestion controller.
///
/// The controller is initialized on creation and released on `close()` or
/// when the flow is dropped.
pub struct Flow {
    state: FlowState,

    cc: Box<dyn CongestionController>,

    sampler: RateSampler,

    /// Packets sent but neither acked nor lost.
    pkts_in_flight: u64,

    closed: bool,
}

impl Flow {
    /// Create a flow with the controller described by `conf`.
    pub fn new(conf: &FlowConfig) -> Result<Self> {
        let cc = build_congestion_controller(conf)?;
        Self::with_controller(conf, cc)
    }

    /// Create a flow around an already built controller.
    pub fn with_controller(
        conf: &FlowConfig,
        mut cc: Box<dyn CongestionController>,
    ) -> Result<Self> {
        let mut state = FlowState::new(conf);
        cc.init(&mut state)?;

        Ok(Self {
            state,
            cc,
            sampler: RateSampler::new(),
            pkts_in_flight: 0,
            closed: false,
        })
    }

    pub fn state(&self) -> &FlowState {
        &self.state
    }

    pub fn controller(&self) -> &dyn CongestionController {
        self.cc.as_ref()
    }

    /// Congestion window in packets.
    pub fn cwnd(&self) -> u64 {
        self.state.cwnd
    }

    /// Pacing rate in bytes per second.
    pub fn pacing_rate(&self) -> u64 {
        self.state.pacing_rate
    }

    pub fn pkts_in_flight(&self) -> u64 {
        self.pkts_in_flight
    }

    /// Whether the window allows another packet.
    pub fn can_send(&self) -> bool {
        !self.closed && self.pkts_in_flight < self.state.cwnd
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Record packets handed to the network.
    pub fn on_sent(&mut self, now_us: u64, pkts: u64) {
        self.sampler.on_packet_sent(now_us, self.pkts_in_flight);
        self.pkts_in_flight = self.pkts_in_flight.saturating_add(pkts);
    }

    /// Process an acknowledgment carrying `acked` newly delivered and `lost`
    /// newly lost packets, and let the controller update the window.
    pub fn on_ack(&mut self, now_us: u64, acked: u64, lost: u64, rtt: Option<Duration>) {
        if let Some(rtt) = rtt {
            self.state.rtt.update(rtt);
        }

        self.sampler.on_packets_acked(acked);
        self.sampler.on_packets_lost(lost);
        self.pkts_in_flight = self
            .pkts_in_flight
            .saturating_sub(acked.saturating_add(lost));

        let rs = self
            .sampler
            .generate_rate_sample(now_us, self.state.rtt.smoothed_rtt());
        self.cc.on_rate_sample(&mut self.state, &rs);

        trace!(
            "{}. ack now={} acked={} lost={} inflight={} cwnd={} pacing_rate={}",
            self.cc.name(),
            now_us,
            acked,
            lost,
            self.pkts_in_flight,
            self.state.cwnd,
            self.state.pacing_rate
        );
    }

    /// Mark the flow as having no data to send.
    pub fn set_app_limited(&mut self) {
        self.sampler.set_app_limited(self.pkts_in_flight);
    }

    /// Restore the window after a loss turned out to be spurious.
    pub fn undo_cwnd(&mut self) {
        self.state.cwnd = self.cc.undo_cwnd(&self.state);
    }

    /// Slow start threshold reported by the controller.
    pub fn ssthresh(&self) -> u64 {
        self.cc.ssthresh(&self.state)
    }

    /// Close the flow and release the controller state.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }

        self.cc.release();
        self.closed = true;
        debug!("{}. flow closed", self.cc.name());
    }
}

impl Drop for Flow {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "flow cwnd={} pacing_rate={} inflight={} closed={}",
            self.state.cwnd, self.state.pacing_rate, self.pkts_in_flight, self.closed
        )
    }
}


mod rtt;
