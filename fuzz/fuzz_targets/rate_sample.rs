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

#![no_main]

use std::time::Duration;

use libfuzzer_sys::fuzz_target;

use rocc::CongestionController;
use rocc::FlowConfig;
use rocc::FlowState;
use rocc::RateSample;
use rocc::Rocc;
use rocc::RoccConfig;

const RECORD_LEN: usize = 20;

fn read_u32(buf: &[u8]) -> u32 {
    u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
}

// Each record is one rate sample: time delta, acked, lost, RTT and flags.
fuzz_target!(|data: &[u8]| {
    let conf = FlowConfig::default();
    let mut flow = FlowState::new(&conf);
    let mut rocc = Rocc::new(RoccConfig::default());
    rocc.init(&mut flow).unwrap();

    let mut now: u64 = 0;
    for rec in data.chunks_exact(RECORD_LEN) {
        now = now.saturating_add(read_u32(&rec[0..4]) as u64);
        let flags = rec[16];
        let rs = RateSample {
            delivered: if flags & 0x1 != 0 { -1 } else { 0 },
            interval_us: if flags & 0x2 != 0 { -1 } else { 0 },
            acked: read_u32(&rec[4..8]) as u64,
            lost: read_u32(&rec[8..12]) as u64,
            is_app_limited: flags & 0x4 != 0,
            smoothed_rtt: if flags & 0x8 != 0 {
                None
            } else {
                Some(Duration::from_micros(read_u32(&rec[12..16]) as u64))
            },
            now_us: now,
        };

        let prev_cwnd = flow.cwnd;
        match rocc.process_sample(&mut flow, &rs) {
            Ok(d) => {
                assert!(d.cwnd >= rocc.minimal_window());
                assert_eq!(d.cwnd, flow.cwnd);
            }
            Err(_) => assert_eq!(flow.cwnd, prev_cwnd),
        }
    }

    rocc.release();
});
