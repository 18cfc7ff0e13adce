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

//! Rate samples, and a sampler a host stack can use to produce them from
//! acknowledgment and loss events.
//!
//! See
//! <https://datatracker.ietf.org/doc/html/draft-cheng-iccrg-delivery-rate-estimation-02>.

use std::time::Duration;

/// Rate sample handed to the congestion controller once per feedback event.
///
/// A negative `delivered` or `interval_us` marks the sample as invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateSample {
    /// Packets delivered over the lifetime of the flow, as of this sample.
    pub delivered: i64,

    /// Length of the sampling interval in microseconds.
    pub interval_us: i64,

    /// Packets newly acknowledged (ACKed or SACKed) in this interval.
    pub acked: u64,

    /// Packets newly marked lost in this interval.
    pub lost: u64,

    /// Whether the sender ran out of data during the interval.
    pub is_app_limited: bool,

    /// The host's smoothed RTT, if an estimate exists.
    pub smoothed_rtt: Option<Duration>,

    /// Monotonic timestamp of this sample in microseconds.
    pub now_us: u64,
}

impl Default for RateSample {
    fn default() -> Self {
        Self {
            delivered: 0,
            interval_us: 0,
            acked: 0,
            lost: 0,
            is_app_limited: false,
            smoothed_rtt: None,
            now_us: 0,
        }
    }
}

impl RateSample {
    /// Whether the sample passes the sign checks on its delivery fields.
    pub fn is_valid(&self) -> bool {
        self.delivered >= 0 && self.interval_us >= 0
    }
}

/// Rate sampler.
///
/// Accumulates acked and lost packets between feedback events and closes an
/// interval each time a sample is generated.
#[derive(Debug, Default)]
pub struct RateSampler {
    /// Packets delivered so far over the lifetime of the flow.
    delivered: u64,

    /// Packets lost so far over the lifetime of the flow.
    lost: u64,

    /// Time the current sampling interval started, if the delivery clock is
    /// running.
    prior_time_us: Option<u64>,

    /// Packets acked since the last sample.
    interval_acked: u64,

    /// Packets lost since the last sample.
    interval_lost: u64,

    /// Whether any part of the current interval was application limited.
    interval_app_limited: bool,

    /// The value of `delivered` at which the application-limited period
    /// ends, or 0 if the flow is not application limited.
    app_limited_until: u64,
}

impl RateSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upon each packet transmission. Starts the delivery clock if the flow
    /// was idle.
    pub fn on_packet_sent(&mut self, now_us: u64, pkts_in_flight: u64) {
        if pkts_in_flight == 0 || self.prior_time_us.is_none() {
            self.prior_time_us = Some(now_us);
        }
    }

    /// Record packets newly acknowledged.
    pub fn on_packets_acked(&mut self, pkts: u64) {
        self.delivered = self.delivered.saturating_add(pkts);
        self.interval_acked = self.interval_acked.saturating_add(pkts);
    }

    /// Record packets newly declared lost.
    pub fn on_packets_lost(&mut self, pkts: u64) {
        self.lost = self.lost.saturating_add(pkts);
        self.interval_lost = self.interval_lost.saturating_add(pkts);
    }

    /// Mark the flow application limited until everything currently in
    /// flight has been delivered.
    pub fn set_app_limited(&mut self, pkts_in_flight: u64) {
        self.app_limited_until = self.delivered.saturating_add(pkts_in_flight).max(1);
        self.interval_app_limited = true;
    }

    /// Check if the flow is application limited.
    pub fn is_app_limited(&self) -> bool {
        self.app_limited_until != 0
    }

    /// Packets delivered over the lifetime of the flow.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Packets lost over the lifetime of the flow.
    pub fn lost(&self) -> u64 {
        self.lost
    }

    /// Close the current interval and produce a rate sample.
    ///
    /// If the delivery clock never started, the sample is marked invalid.
    pub fn generate_rate_sample(
        &mut self,
        now_us: u64,
        smoothed_rtt: Option<Duration>,
    ) -> RateSample {
        // Clear app-limited field once the bubble is delivered.
        if self.is_app_limited() && self.delivered > self.app_limited_until {
            self.app_limited_until = 0;
        }

        let mut rs = RateSample {
            acked: self.interval_acked,
            lost: self.interval_lost,
            is_app_limited: self.interval_app_limited || self.is_app_limited(),
            smoothed_rtt,
            now_us,
            ..RateSample::default()
        };

        match self.prior_time_us {
            Some(prior_time_us) => {
                rs.delivered = i64::try_from(self.delivered).unwrap_or(i64::MAX);
                rs.interval_us =
                    i64::try_from(now_us.saturating_sub(prior_time_us)).unwrap_or(i64::MAX);
            }
            None => {
                rs.delivered = -1;
                rs.interval_us = -1;
            }
        }

        self.prior_time_us = Some(now_us);
        self.interval_acked = 0;
        self.interval_lost = 0;
        self.interval_app_limited = self.is_app_limited();
        rs
    }
}
