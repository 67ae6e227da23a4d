//! Traffic generator and sink for the ring device.
//!
//! The generator injects sequence-tagged UDP frames on one port's RX wire;
//! the sink drains what another port transmitted, completes those
//! transmissions and checks the sequence order.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use l2fwd::api::dev::eth::{PortId, QueueId};
use l2fwd::api::dev::ring::RingDriver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::frames::{UdpFrame, frame_seq};

/// Generator settings.
#[derive(Debug, Clone, Copy)]
pub struct GenConfig {
    pub port_id: PortId,
    pub queue_id: QueueId,
    pub frame: UdpFrame,
    /// Stop after this many frames; `None` runs until cancelled.
    pub count: Option<u64>,
}

impl GenConfig {
    pub fn new(port_id: PortId) -> Self {
        Self {
            port_id,
            queue_id: 0,
            frame: UdpFrame::new(),
            count: None,
        }
    }

    pub fn frame(mut self, frame: UdpFrame) -> Self {
        self.frame = frame;
        self
    }

    pub fn count(mut self, count: Option<u64>) -> Self {
        self.count = count;
        self
    }
}

/// What the generator did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenReport {
    pub sent: u64,
    /// Injections refused because the RX wire was full.
    pub backpressure: u64,
}

/// What the sink saw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkReport {
    pub frames: u64,
    pub bytes: u64,
    /// Frames whose sequence number was not above the previous one.
    pub out_of_order: u64,
    /// Frames without a sequence number.
    pub untagged: u64,
}

/// Spawn a generator thread. It runs until `count` frames are queued or
/// `token` is cancelled.
pub fn spawn_generator(
    ring: Arc<RingDriver>,
    config: GenConfig,
    token: CancellationToken,
) -> io::Result<JoinHandle<GenReport>> {
    thread::Builder::new()
        .name(format!("gen-{}", config.port_id))
        .spawn(move || generate(&ring, &config, &token))
}

/// Generate on the current thread.
pub fn generate(ring: &RingDriver, config: &GenConfig, token: &CancellationToken) -> GenReport {
    let mut report = GenReport::default();
    let mut buf = vec![0u8; config.frame.frame_len()];
    let limit = config.count.unwrap_or(u64::MAX);
    debug!(port_id = config.port_id, count = ?config.count, "generator started");
    while report.sent < limit && !token.is_cancelled() {
        config.frame.write(&mut buf, report.sent as u32);
        if ring.inject(config.port_id, config.queue_id, &buf) {
            report.sent += 1;
        } else {
            report.backpressure += 1;
            thread::yield_now();
        }
    }
    info!(
        port_id = config.port_id,
        sent = report.sent,
        backpressure = report.backpressure,
        "generator stopped"
    );
    report
}

/// Spawn a sink thread draining `port_id`. It runs until `token` is
/// cancelled, then drains once more.
pub fn spawn_sink(
    ring: Arc<RingDriver>,
    port_id: PortId,
    token: CancellationToken,
) -> io::Result<JoinHandle<SinkReport>> {
    thread::Builder::new()
        .name(format!("sink-{port_id}"))
        .spawn(move || {
            let mut sink = Sink::new(port_id);
            while !token.is_cancelled() {
                if sink.drain(&ring) == 0 {
                    thread::sleep(Duration::from_millis(1));
                }
            }
            sink.drain(&ring);
            info!(
                port_id,
                frames = sink.report.frames,
                out_of_order = sink.report.out_of_order,
                "sink stopped"
            );
            sink.report
        })
}

/// Sequence-checking consumer of one port's transmitted frames.
#[derive(Debug)]
pub struct Sink {
    port_id: PortId,
    last_seq: Option<u32>,
    report: SinkReport,
}

impl Sink {
    pub fn new(port_id: PortId) -> Self {
        Self {
            port_id,
            last_seq: None,
            report: SinkReport::default(),
        }
    }

    /// Take every captured frame, complete queue 0's transmissions and
    /// return the number of frames taken.
    pub fn drain(&mut self, ring: &RingDriver) -> usize {
        let frames = ring.take_transmitted(self.port_id);
        ring.complete_tx(self.port_id, 0);
        for frame in &frames {
            self.report.frames += 1;
            self.report.bytes += frame.len() as u64;
            match frame_seq(frame) {
                Some(seq) => {
                    if self.last_seq.is_some_and(|last| seq <= last) {
                        self.report.out_of_order += 1;
                    }
                    self.last_seq = Some(seq);
                }
                None => self.report.untagged += 1,
            }
        }
        frames.len()
    }

    pub fn report(&self) -> SinkReport {
        self.report
    }
}
