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

//! Per-sample diagnostics for the congestion controller.
//!
//! A [`SampleObserver`] attached to a controller receives a
//! [`SampleSnapshot`] after every processed rate sample. [`TraceWriter`]
//! streams those snapshots as JSON Text Sequences (RFC 7464).

use std::fmt;

use log::warn;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// The serialization format of a trace file.
pub const JSON_TEXT_SEQS: &str = "JSON-SEQ";

/// Version of the snapshot schema.
pub const TRACE_VERSION: &str = "0.1";

/// Contents of one interval bucket at the time of a snapshot.
#[derive(Serialize, Deserialize, Clone, Default, PartialEq, Eq, Debug)]
pub struct IntervalSnapshot {
    pub start_us: u64,
    pub pkts_acked: u64,
    pub pkts_lost: u64,
    pub app_limited: bool,
}

/// State of a controller right after it processed a rate sample.
///
/// RTT values that are still unknown (infinite) are left out.
#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Clone, Default, PartialEq, Eq, Debug)]
pub struct SampleSnapshot {
    /// Identity of the controller instance.
    pub id: u64,

    /// Timestamp of the rate sample in microseconds.
    pub now_us: u64,

    /// Congestion window in packets.
    pub cwnd: u64,

    /// Pacing rate in bytes per second.
    pub pacing_rate: u64,

    /// RTT of this sample.
    pub rtt_us: Option<u64>,

    /// Minimum RTT observed so far.
    pub min_rtt_us: Option<u64>,

    /// Aggregation horizon.
    pub hist_us: Option<u64>,

    /// Maximum segment size in bytes.
    pub mss: u64,

    /// Packets acked within the aggregation horizon.
    pub pkts_acked: u64,

    /// Packets lost within the aggregation horizon.
    pub pkts_lost: u64,

    /// Whether any aggregated interval was application limited.
    pub app_limited: bool,

    /// Whether the loss rate exceeded the tolerable threshold.
    pub loss_mode: bool,

    /// Interval buckets, newest first.
    pub intervals: Vec<IntervalSnapshot>,
}

/// Observability hook invoked after each processed rate sample.
pub trait SampleObserver {
    /// Called with the controller state after a decision was committed.
    fn on_sample(&mut self, snapshot: &SampleSnapshot);
}

impl fmt::Debug for dyn SampleObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sample observer.")
    }
}

impl<F> SampleObserver for F
where
    F: FnMut(&SampleSnapshot),
{
    fn on_sample(&mut self, snapshot: &SampleSnapshot) {
        self(snapshot)
    }
}

/// Header record written once at the start of a trace.
#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct TraceHeader {
    /// The trace_format field MUST have the value "JSON-SEQ".
    pub trace_format: String,

    pub trace_version: String,

    /// Free-text title of the trace.
    pub title: Option<String>,

    /// Free-text description of the trace.
    pub description: Option<String>,
}

/// Trace writer streaming sample snapshots in JSON-SEQ format.
pub struct TraceWriter {
    header: TraceHeader,

    /// The underlying writer for trace streaming.
    writer: Box<dyn std::io::Write + Send + Sync>,

    /// Whether the header has been written.
    ready: bool,
}

impl TraceWriter {
    pub fn new(
        title: Option<String>,
        description: Option<String>,
        writer: Box<dyn std::io::Write + Send + Sync>,
    ) -> Self {
        let header = TraceHeader {
            trace_format: JSON_TEXT_SEQS.to_string(),
            trace_version: TRACE_VERSION.to_string(),
            title,
            description,
        };

        TraceWriter {
            header,
            writer,
            ready: false,
        }
    }

    /// Start serialization and write the header.
    pub fn start(&mut self) -> Result<()> {
        if self.ready {
            return Err(Error::Done);
        }

        self.write_record(&self.header.clone())?;
        self.ready = true;
        Ok(())
    }

    /// Flush serialized data.
    pub fn flush(&mut self) -> Result<()> {
        if !self.ready {
            return Err(Error::InvalidState("expect ready state".into()));
        }

        self.writer.as_mut().flush()?;
        Ok(())
    }

    /// Write a snapshot in JSON-SEQ format.
    pub fn add_snapshot(&mut self, snapshot: &SampleSnapshot) -> Result<()> {
        if !self.ready {
            return Err(Error::InvalidState("not ready".into()));
        }

        self.write_record(snapshot)
    }

    fn write_record<T: Serialize>(&mut self, record: &T) -> Result<()> {
        self.writer.as_mut().write_all(b"\x1e")?;
        serde_json::to_writer(self.writer.as_mut(), record)?;
        self.writer.as_mut().write_all(b"\n")?;
        Ok(())
    }
}

impl SampleObserver for TraceWriter {
    fn on_sample(&mut self, snapshot: &SampleSnapshot) {
        if let Err(e) = self.add_snapshot(snapshot) {
            warn!("flow {} write trace failed: {:?}", snapshot.id, e);
        }
    }
}

impl fmt::Debug for TraceWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trace writer ready={}", self.ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::Mutex;

    /// A writer that keeps its output reachable after being boxed.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn new_test_snapshot() -> SampleSnapshot {
        SampleSnapshot {
            id: 7,
            now_us: 30_000,
            cwnd: 12,
            pacing_rate: 1_752_000,
            rtt_us: Some(10_000),
            min_rtt_us: Some(10_000),
            hist_us: Some(20_000),
            mss: 1460,
            pkts_acked: 10,
            pkts_lost: 0,
            app_limited: false,
            loss_mode: false,
            intervals: vec![IntervalSnapshot {
                start_us: 30_000,
                pkts_acked: 10,
                pkts_lost: 0,
                app_limited: false,
            }],
        }
    }

    #[test]
    fn trace_writer_operations() -> Result<()> {
        let buf = SharedBuf::default();
        let mut writer = TraceWriter::new(
            Some("title".to_string()),
            None,
            Box::new(buf.clone()),
        );

        // Add a snapshot before the writer is started
        let snapshot = new_test_snapshot();
        assert!(writer.add_snapshot(&snapshot).is_err());
        assert!(writer.flush().is_err());

        writer.start()?;
        assert_eq!(writer.start(), Err(Error::Done));

        writer.add_snapshot(&snapshot)?;
        writer.flush()?;

        let log = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert_eq!(
            log,
            "\x1e{\"trace_format\":\"JSON-SEQ\",\"trace_version\":\"0.1\",\"title\":\"title\"}\n\
             \x1e{\"id\":7,\"now_us\":30000,\"cwnd\":12,\"pacing_rate\":1752000,\
             \"rtt_us\":10000,\"min_rtt_us\":10000,\"hist_us\":20000,\"mss\":1460,\
             \"pkts_acked\":10,\"pkts_lost\":0,\"app_limited\":false,\"loss_mode\":false,\
             \"intervals\":[{\"start_us\":30000,\"pkts_acked\":10,\"pkts_lost\":0,\
             \"app_limited\":false}]}\n"
        );

        Ok(())
    }

    #[test]
    fn unknown_rtt_is_omitted() -> Result<()> {
        let snapshot = SampleSnapshot {
            rtt_us: None,
            min_rtt_us: None,
            hist_us: None,
            ..new_test_snapshot()
        };

        let json = serde_json::to_string(&snapshot)?;
        assert!(!json.contains("rtt_us"));
        assert!(!json.contains("hist_us"));

        let parsed: SampleSnapshot = serde_json::from_str(&json)?;
        assert_eq!(parsed, snapshot);
        Ok(())
    }

    #[test]
    fn closure_observer() {
        let mut seen = Vec::new();
        {
            let mut observer = |s: &SampleSnapshot| seen.push(s.cwnd);
            observer.on_sample(&new_test_snapshot());
        }
        assert_eq!(seen, vec![12]);
    }
}
