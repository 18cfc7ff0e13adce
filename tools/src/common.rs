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

use std::collections::VecDeque;
use std::fs::OpenOptions;

use log::trace;
use rand::Rng;

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

/// Build the log target. If no file is specified, logs are written to
/// `stderr`.
pub fn log_target(log_file: &Option<String>) -> Result<env_logger::Target> {
    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Ok(env_logger::Target::Pipe(Box::new(file)))
        }
        None => Ok(env_logger::Target::Stderr),
    }
}

/// Feedback about one packet, arriving back at the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Feedback {
    /// Time the feedback reaches the sender.
    pub at_us: u64,

    /// Time the packet was sent.
    pub sent_us: u64,

    /// Whether the packet was lost.
    pub lost: bool,
}

/// Bottleneck link statistics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LinkStats {
    /// Packets accepted into the queue.
    pub enqueued: u64,

    /// Packets transmitted over the link.
    pub delivered: u64,

    /// Packets dropped because the queue was full.
    pub tail_drops: u64,

    /// Packets dropped at random.
    pub random_drops: u64,
}

/// A FIFO bottleneck with a drop-tail buffer followed by a fixed
/// propagation delay.
///
/// Losses are reported one base RTT after the packet was sent, acks one base
/// RTT after the packet left the queue. Both happen in send order, so the
/// feedback queue stays sorted by arrival time.
#[derive(Debug)]
pub struct Bottleneck {
    /// Service rate in packets per second.
    rate: u64,

    /// Base round-trip time in microseconds.
    rtt_us: u64,

    /// Buffer size in packets.
    buffer: usize,

    /// Random loss probability.
    loss: f64,

    /// Send times of queued packets.
    queue: VecDeque<u64>,

    /// Transmission credit in packets, scaled by 1e6.
    credit: u64,

    last_us: u64,

    feedback: VecDeque<Feedback>,

    stats: LinkStats,
}

impl Bottleneck {
    pub fn new(rate: u64, rtt_us: u64, buffer: usize, loss: f64) -> Self {
        Self {
            rate,
            rtt_us,
            buffer,
            loss,
            queue: VecDeque::new(),
            credit: 0,
            last_us: 0,
            feedback: VecDeque::new(),
            stats: LinkStats::default(),
        }
    }

    /// Offer a packet to the link. Return false if it was dropped.
    pub fn send<R: Rng>(&mut self, now_us: u64, rng: &mut R) -> bool {
        let lost = if self.loss > 0.0 && rng.gen_bool(self.loss) {
            self.stats.random_drops += 1;
            true
        } else if self.queue.len() >= self.buffer {
            self.stats.tail_drops += 1;
            true
        } else {
            false
        };

        if lost {
            trace!("link drop packet sent at {}", now_us);
            self.feedback.push_back(Feedback {
                at_us: now_us + self.rtt_us,
                sent_us: now_us,
                lost: true,
            });
            return false;
        }

        self.queue.push_back(now_us);
        self.stats.enqueued += 1;
        true
    }

    /// Transmit queued packets up to `now_us`.
    pub fn advance(&mut self, now_us: u64) {
        let elapsed = now_us.saturating_sub(self.last_us);
        self.last_us = now_us;
        self.credit = self.credit.saturating_add(elapsed.saturating_mul(self.rate));

        while self.credit >= 1_000_000 {
            let sent_us = match self.queue.pop_front() {
                Some(sent_us) => sent_us,
                None => break,
            };
            self.credit -= 1_000_000;
            self.stats.delivered += 1;
            self.feedback.push_back(Feedback {
                at_us: now_us + self.rtt_us,
                sent_us,
                lost: false,
            });
        }

        // An idle link does not save up capacity.
        if self.queue.is_empty() {
            self.credit = self.credit.min(1_000_000);
        }
    }

    /// Next feedback that has reached the sender by `now_us`.
    pub fn poll(&mut self, now_us: u64) -> Option<Feedback> {
        match self.feedback.front() {
            Some(f) if f.at_us <= now_us => self.feedback.pop_front(),
            _ => None,
        }
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn bottleneck_service_rate() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut link = Bottleneck::new(1000, 10_000, 100, 0.0);

        for _ in 0..10 {
            assert!(link.send(0, &mut rng));
        }
        assert_eq!(link.queue_len(), 10);

        // One packet per millisecond.
        link.advance(5_000);
        assert_eq!(link.queue_len(), 5);
        assert_eq!(link.poll(5_000), None);

        let f = link.poll(15_000).unwrap();
        assert_eq!(
            f,
            Feedback {
                at_us: 15_000,
                sent_us: 0,
                lost: false
            }
        );
        assert_eq!(link.stats().delivered, 5);
    }

    #[test]
    fn bottleneck_drop_tail() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut link = Bottleneck::new(1000, 10_000, 4, 0.0);

        let accepted = (0..6).filter(|_| link.send(100, &mut rng)).count();
        assert_eq!(accepted, 4);
        assert_eq!(link.stats().tail_drops, 2);

        let f = link.poll(10_100).unwrap();
        assert!(f.lost);
        assert_eq!(f.sent_us, 100);
    }

    #[test]
    fn bottleneck_random_loss() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut link = Bottleneck::new(1000, 10_000, 1000, 0.5);

        for _ in 0..1000 {
            link.send(0, &mut rng);
        }
        let drops = link.stats().random_drops;
        assert!(drops > 400 && drops < 600);
        assert_eq!(link.stats().enqueued + drops, 1000);
    }

    #[test]
    fn bottleneck_idle_credit() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut link = Bottleneck::new(1000, 10_000, 100, 0.0);

        // A long idle period does not allow a burst afterwards.
        link.advance(1_000_000);
        for _ in 0..10 {
            link.send(1_000_000, &mut rng);
        }
        link.advance(1_000_000);
        assert_eq!(link.queue_len(), 9);
    }
}
