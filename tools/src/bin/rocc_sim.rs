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

use std::fs::File;
use std::io::BufWriter;
use std::time::Duration;

use clap::error::ErrorKind;
use clap::CommandFactory;
use clap::Parser;
use log::debug;
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;
use statrs::statistics::Data;
use statrs::statistics::Distribution;
use statrs::statistics::Max;
use statrs::statistics::Min;
use statrs::statistics::OrderStatistics;

use rocc::trace::TraceWriter;
use rocc::Flow;
use rocc::FlowConfig;
use rocc::PacingStatus;
use rocc::Rocc;
use rocc_tools::Bottleneck;
use rocc_tools::Result;

/// Simulation step in microseconds.
const TICK_US: u64 = 100;

#[derive(Parser, Debug, Clone)]
#[clap(name = "rocc_sim")]
pub struct SimOpt {
    /// Bottleneck rate in packets per second.
    #[clap(long, default_value = "1000", value_name = "NUM")]
    pub rate: u64,

    /// Base round-trip time in milliseconds.
    #[clap(long, default_value = "40", value_name = "TIME")]
    pub rtt: u64,

    /// Bottleneck buffer size in packets.
    #[clap(long, default_value = "100", value_name = "NUM")]
    pub buffer: usize,

    /// Probability of dropping a packet at random, in [0, 1).
    #[clap(long, default_value = "0", value_name = "NUM")]
    pub loss: f64,

    /// Simulated duration in seconds.
    #[clap(short, long, default_value = "10", value_name = "TIME")]
    pub duration: u64,

    /// Time in seconds at which the sender runs out of data.
    #[clap(long, value_name = "TIME")]
    pub pause_at: Option<u64>,

    /// Length in seconds of the period without data.
    #[clap(long, default_value = "2", value_name = "TIME")]
    pub pause: u64,

    /// Maximum segment size in bytes.
    #[clap(long, default_value = "1460", value_name = "NUM")]
    pub mss: usize,

    /// Minimal congestion window in packets.
    #[clap(long, default_value = "2", value_name = "NUM")]
    pub min_cwnd: u64,

    /// Packets added on top of the acked count.
    #[clap(long, default_value = "2", value_name = "NUM")]
    pub alpha: u64,

    /// Tolerable loss rate in 1024ths.
    #[clap(long, default_value = "64", value_name = "NUM")]
    pub loss_thresh: u64,

    /// Number of interval buckets, a power of two.
    #[clap(long, default_value = "16", value_name = "NUM")]
    pub intervals: usize,

    /// Seed of the random loss generator.
    #[clap(long, default_value = "1", value_name = "NUM")]
    pub seed: u64,

    /// Log level, support OFF/ERROR/WARN/INFO/DEBUG/TRACE.
    #[clap(long, default_value = "INFO", value_name = "STR")]
    pub log_level: log::LevelFilter,

    /// Log file path. If no file is specified, logs will be written to `stderr`.
    #[clap(long, value_name = "FILE")]
    pub log_file: Option<String>,

    /// Save a trace of every controller decision in JSON-SEQ format.
    #[clap(long, value_name = "FILE")]
    pub trace_file: Option<String>,
}

/// Counters of the current report period.
#[derive(Debug, Default)]
struct Period {
    acked: u64,
    lost: u64,
}

struct Simulator {
    option: SimOpt,

    flow: Flow,

    link: Bottleneck,

    rng: StdRng,

    /// Earliest time the pacer releases the next packet.
    next_send_us: u64,

    /// RTT of every acked packet, in milliseconds.
    rtt_samples: Vec<f64>,

    sent: u64,
    acked: u64,
    lost: u64,

    period: Period,
}

impl Simulator {
    fn new(option: SimOpt) -> Result<Self> {
        let mut conf = FlowConfig::new();
        conf.set_max_segment_size(option.mss);
        conf.set_min_congestion_window(option.min_cwnd);
        conf.set_rocc_alpha(option.alpha);
        conf.set_rocc_loss_thresh(option.loss_thresh);
        conf.set_rocc_num_intervals(option.intervals);

        let rocc_conf = conf.rocc_config();
        rocc_conf.validate()?;
        let mut rocc = Rocc::new(rocc_conf);

        if let Some(trace_file) = &option.trace_file {
            let file = File::create(trace_file)?;
            let mut writer = TraceWriter::new(
                Some("rocc_sim".to_string()),
                Some(format!(
                    "rate={}pkt/s rtt={}ms buffer={} loss={}",
                    option.rate, option.rtt, option.buffer, option.loss
                )),
                Box::new(BufWriter::new(file)),
            );
            writer.start()?;
            rocc.set_observer(Box::new(writer));
        }

        let flow = Flow::with_controller(&conf, Box::new(rocc))?;
        let link = Bottleneck::new(option.rate, option.rtt * 1000, option.buffer, option.loss);
        let rng = StdRng::seed_from_u64(option.seed);

        Ok(Self {
            option,
            flow,
            link,
            rng,
            next_send_us: 0,
            rtt_samples: Vec::new(),
            sent: 0,
            acked: 0,
            lost: 0,
            period: Period::default(),
        })
    }

    fn run(&mut self) {
        let end_us = self.option.duration * 1_000_000;
        let mut next_report_us = 1_000_000;
        let mut now = 0;

        while now <= end_us {
            self.link.advance(now);
            self.process_feedback(now);

            if self.is_paused(now) {
                self.flow.set_app_limited();
            } else {
                self.send(now);
            }

            if now >= next_report_us {
                self.report(now);
                next_report_us += 1_000_000;
            }
            now += TICK_US;
        }

        self.flow.close();
    }

    fn is_paused(&self, now: u64) -> bool {
        match self.option.pause_at {
            Some(pause_at) => {
                let start = pause_at * 1_000_000;
                now >= start && now < start + self.option.pause * 1_000_000
            }
            None => false,
        }
    }

    fn process_feedback(&mut self, now: u64) {
        let mut acked = 0;
        let mut lost = 0;
        let mut rtt = None;

        while let Some(f) = self.link.poll(now) {
            if f.lost {
                lost += 1;
                continue;
            }
            acked += 1;
            let sample = now - f.sent_us;
            self.rtt_samples.push(sample as f64 / 1000.0);
            rtt = Some(Duration::from_micros(sample));
        }

        if acked + lost == 0 {
            return;
        }

        self.flow.on_ack(now, acked, lost, rtt);
        self.acked += acked;
        self.lost += lost;
        self.period.acked += acked;
        self.period.lost += lost;
    }

    fn send(&mut self, now: u64) {
        while self.flow.can_send() && now >= self.next_send_us {
            self.flow.on_sent(now, 1);
            self.link.send(now, &mut self.rng);
            self.sent += 1;

            let pacing_rate = self.flow.pacing_rate();
            if self.flow.state().pacing_status() != PacingStatus::Needed || pacing_rate == 0 {
                continue;
            }

            // Do not let a stalled pacer build up credit beyond one tick.
            let gap = self.option.mss as u64 * 1_000_000 / pacing_rate;
            self.next_send_us = self.next_send_us.max(now.saturating_sub(TICK_US)) + gap;
        }
        debug!(
            "{} sent={} inflight={} cwnd={} queue={}",
            now,
            self.sent,
            self.flow.pkts_in_flight(),
            self.flow.cwnd(),
            self.link.queue_len()
        );
    }

    fn report(&mut self, now: u64) {
        let goodput = self.period.acked as f64 * self.option.mss as f64 * 8.0 / 1e6;
        println!(
            "{:>4}s cwnd {:>6} pacing {:>8.2} Mbps goodput {:>8.2} Mbps queue {:>5} lost {:>5}",
            now / 1_000_000,
            self.flow.cwnd(),
            self.flow.pacing_rate() as f64 * 8.0 / 1e6,
            goodput,
            self.link.queue_len(),
            self.period.lost
        );
        self.period = Period::default();
    }

    fn stats(&self) {
        let secs = self.option.duration.max(1) as f64;
        let link = self.link.stats();

        println!();
        println!(
            "finished in {}s, goodput {:.2} Mbps, link utilization {:.2}%",
            self.option.duration,
            self.acked as f64 * self.option.mss as f64 * 8.0 / 1e6 / secs,
            self.acked as f64 * 100.0 / (self.option.rate as f64 * secs)
        );
        println!(
            "pkts: sent {}, acked {}, lost {} ({:.2}%), tail drops {}, random drops {}",
            self.sent,
            self.acked,
            self.lost,
            self.lost as f64 * 100.0 / self.sent.max(1) as f64,
            link.tail_drops,
            link.random_drops
        );

        let cc = self.flow.controller().stats();
        println!(
            "decisions: {}, in loss mode {}, app-limited holds {}",
            cc.samples_processed, cc.loss_mode_samples, cc.app_limited_holds
        );

        if self.rtt_samples.is_empty() {
            return;
        }
        let mut s = Data::new(self.rtt_samples.clone());
        println!("rtt(ms):");
        println!(
            "\tmin: {:.2}, max: {:.2}, mean: {:.2}, sd: {:.2}",
            s.min(),
            s.max(),
            s.mean().unwrap_or_default(),
            s.std_dev().unwrap_or_default(),
        );
        println!(
            "\tmedian: {:.2}, p90: {:.2}, p99: {:.2}",
            s.median(),
            s.percentile(90),
            s.percentile(99),
        );
    }
}

fn parse_option() -> std::result::Result<SimOpt, clap::error::Error> {
    let option = SimOpt::parse();

    if option.rate == 0 {
        return Err(SimOpt::command().error(ErrorKind::InvalidValue, "rate must be positive"));
    }

    if !(0.0..1.0).contains(&option.loss) {
        return Err(SimOpt::command().error(ErrorKind::InvalidValue, "loss must be in [0, 1)"));
    }

    Ok(option)
}

fn process_option(option: &SimOpt) -> Result<()> {
    env_logger::builder()
        .target(rocc_tools::log_target(&option.log_file)?)
        .filter_level(option.log_level)
        .format_timestamp_millis()
        .init();

    info!("{:?}", option);
    Ok(())
}

fn main() -> Result<()> {
    // Parse simulation option.
    let option = match parse_option() {
        Ok(option) => option,
        Err(e) => e.exit(),
    };

    // Process simulation option.
    process_option(&option)?;

    // Create simulator.
    let mut sim = Simulator::new(option)?;

    // Start simulation.
    sim.run();
    sim.stats();

    Ok(())
}
