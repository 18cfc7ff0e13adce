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

use std::time::Duration;

/// RTT estimation for a flow, as maintained by the host stack.
///
/// Smoothed RTT uses a gain of 1/8 and the mean deviation a gain of 1/4.
/// See RFC 6298 Section 2
#[derive(Debug, Default, Clone)]
pub struct RttEstimator {
    /// The most recent RTT sample, if any.
    latest_rtt: Option<Duration>,

    /// Exponentially weighted moving average of the RTT samples. Unknown
    /// until the first sample arrives.
    smoothed_rtt: Option<Duration>,

    /// Mean deviation of the RTT samples.
    rttvar: Duration,

    /// The minimum RTT sample observed on the flow.
    min_rtt: Option<Duration>,
}

impl RttEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the smoothed RTT, or `None` if no sample was taken yet.
    pub fn smoothed_rtt(&self) -> Option<Duration> {
        self.smoothed_rtt
    }

    /// Return the latest RTT sample.
    pub fn latest_rtt(&self) -> Option<Duration> {
        self.latest_rtt
    }

    /// Return the minimum RTT sample observed so far.
    pub fn min_rtt(&self) -> Option<Duration> {
        self.min_rtt
    }

    /// Return the mean deviation of the RTT samples.
    pub fn rttvar(&self) -> Duration {
        self.rttvar
    }

    /// Update the estimator with a new RTT sample.
    pub fn update(&mut self, rtt: Duration) {
        self.latest_rtt = Some(rtt);
        self.min_rtt = Some(self.min_rtt.map_or(rtt, |min| min.min(rtt)));

        match self.smoothed_rtt {
            Some(srtt) => {
                let deviation = if srtt > rtt { srtt - rtt } else { rtt - srtt };
                self.rttvar = (3 * self.rttvar + deviation) / 4;
                self.smoothed_rtt = Some((7 * srtt + rtt) / 8);
            }
            None => {
                self.smoothed_rtt = Some(rtt);
                self.rttvar = rtt / 2;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial() {
        let r = RttEstimator::new();
        assert_eq!(r.smoothed_rtt(), None);
        assert_eq!(r.latest_rtt(), None);
        assert_eq!(r.min_rtt(), None);
        assert_eq!(r.rttvar(), Duration::ZERO);
    }

    #[test]
    fn update() {
        let mut r = RttEstimator::new();

        // First sample
        r.update(Duration::from_millis(400));
        assert_eq!(r.latest_rtt(), Some(Duration::from_millis(400)));
        assert_eq!(r.smoothed_rtt(), Some(Duration::from_millis(400)));
        assert_eq!(r.min_rtt(), Some(Duration::from_millis(400)));
        assert_eq!(r.rttvar(), Duration::from_millis(200));

        // Second sample
        r.update(Duration::from_millis(800));
        assert_eq!(r.latest_rtt(), Some(Duration::from_millis(800)));
        assert_eq!(r.smoothed_rtt(), Some(Duration::from_millis(450)));
        assert_eq!(r.min_rtt(), Some(Duration::from_millis(400)));
        assert_eq!(r.rttvar(), Duration::from_millis(250));

        // Third sample
        r.update(Duration::from_millis(50));
        assert_eq!(r.latest_rtt(), Some(Duration::from_millis(50)));
        assert_eq!(r.smoothed_rtt(), Some(Duration::from_millis(400)));
        assert_eq!(r.min_rtt(), Some(Duration::from_millis(50)));
        assert_eq!(r.rttvar(), Duration::from_micros(287_500));
    }
}
