//! l2fwd - polling burst L2 forwarder
//!
//! Receives bursts on an ingress port and transmits them on an egress port,
//! optionally rewriting the Ethernet addresses.
//!
//! Supports two drivers:
//! - **ring**: in-memory ports fed by a built-in UDP generator (works anywhere)
//! - **af-packet**: raw packet sockets bound to Linux interfaces (requires CAP_NET_RAW)
//!
//! # Usage
//!
//! ```bash
//! # Ring device with generated traffic for 5 seconds
//! l2fwd --driver ring --duration 5 --stats-interval 1
//!
//! # Forward between two interfaces, rewriting the source MAC
//! sudo -E l2fwd --driver af-packet --iface veth0 --iface veth1 --mode rewrite-source
//! ```

use std::io;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use l2fwd::api::dev::driver::EthDriver;
use l2fwd::api::dev::eth::PortId;
use l2fwd::api::dev::ring::RingDriver;
use l2fwd::fwd::{BURST_SIZE, IdlePolicy, TransformMode};
use l2fwd_util::config::{MBUF_CACHE_SIZE, NUM_MBUFS, RX_RING_SIZE, TX_RING_SIZE};
use l2fwd_util::frames::UdpFrame;
use l2fwd_util::traffic::{GenConfig, GenReport, SinkReport, spawn_generator, spawn_sink};
use l2fwd_util::{AppConfig, L2FwdApp};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DriverKind {
    /// In-memory ports with a built-in traffic generator
    Ring,
    /// Raw packet sockets on named interfaces (Linux)
    AfPacket,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Forward frames unchanged
    Transparent,
    /// Set the source MAC to the egress port's address
    RewriteSource,
    /// Exchange source and destination MAC
    Swap,
}

impl From<Mode> for TransformMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Transparent => TransformMode::Transparent,
            Mode::RewriteSource => TransformMode::RewriteSource,
            Mode::Swap => TransformMode::SwapAddresses,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Idle {
    /// Spin without yielding
    Busy,
    /// Yield to the scheduler after an empty cycle
    Yield,
    /// Sleep after an empty cycle
    Sleep,
}

#[derive(Parser, Debug)]
#[command(name = "l2fwd")]
#[command(about = "Polling burst L2 forwarder")]
struct Args {
    /// Device driver
    #[arg(short, long, value_enum, default_value = "ring")]
    driver: DriverKind,

    /// Interface to bind, once per port (af-packet only)
    #[arg(long = "iface")]
    ifaces: Vec<String>,

    /// Number of ports (ring only)
    #[arg(long, default_value_t = 2)]
    ring_ports: u16,

    /// Ingress port
    #[arg(long, default_value_t = 0)]
    ingress: PortId,

    /// Egress port
    #[arg(long, default_value_t = 1)]
    egress: PortId,

    /// Frame transform
    #[arg(short, long, value_enum, default_value = "transparent")]
    mode: Mode,

    /// Also forward egress to ingress
    #[arg(long)]
    bidirectional: bool,

    /// Leave promiscuous mode off
    #[arg(long)]
    no_promiscuous: bool,

    /// Mbufs per port
    #[arg(long, default_value_t = NUM_MBUFS)]
    num_mbufs: u32,

    /// Per-worker mbuf cache size
    #[arg(long, default_value_t = MBUF_CACHE_SIZE)]
    cache_size: u32,

    /// RX descriptors per queue
    #[arg(long, default_value_t = RX_RING_SIZE)]
    rx_desc: u16,

    /// TX descriptors per queue
    #[arg(long, default_value_t = TX_RING_SIZE)]
    tx_desc: u16,

    /// Packets per receive burst
    #[arg(long, default_value_t = BURST_SIZE)]
    burst: usize,

    /// CPU to pin the forwarding thread to
    #[arg(long)]
    lcore: Option<usize>,

    /// What to do after a cycle that received nothing
    #[arg(long, value_enum, default_value = "busy")]
    idle: Idle,

    /// Sleep length for `--idle sleep`, in microseconds
    #[arg(long, default_value_t = 100)]
    idle_sleep_us: u64,

    /// Log forwarding rates every SECS seconds
    #[arg(long, value_name = "SECS")]
    stats_interval: Option<u64>,

    /// Stop after SECS seconds
    #[arg(long, value_name = "SECS")]
    duration: Option<u64>,

    /// UDP payload length of generated frames (ring only)
    #[arg(long, default_value_t = 18)]
    payload_len: usize,
}

impl Args {
    fn app_config(&self) -> AppConfig {
        let idle_policy = match self.idle {
            Idle::Busy => IdlePolicy::BusyPoll,
            Idle::Yield => IdlePolicy::Yield,
            Idle::Sleep => IdlePolicy::Sleep(Duration::from_micros(self.idle_sleep_us)),
        };
        AppConfig::new()
            .num_mbufs(self.num_mbufs)
            .cache_size(self.cache_size)
            .descriptors(self.rx_desc, self.tx_desc)
            .promiscuous(!self.no_promiscuous)
            .ports(self.ingress, self.egress)
            .transform(self.mode.into())
            .bidirectional(self.bidirectional)
            .burst_size(self.burst)
            .idle_policy(idle_policy)
            .lcore(self.lcore)
            .stats_interval(self.stats_interval.map(Duration::from_secs))
    }
}

fn open_driver(args: &Args) -> Result<(Arc<dyn EthDriver>, Option<Arc<RingDriver>>), String> {
    match args.driver {
        DriverKind::Ring => {
            let ring = Arc::new(RingDriver::new(args.ring_ports));
            let driver: Arc<dyn EthDriver> = ring.clone();
            Ok((driver, Some(ring)))
        }
        #[cfg(target_os = "linux")]
        DriverKind::AfPacket => {
            use l2fwd::api::dev::af_packet::PacketDriver;

            if args.ifaces.is_empty() {
                return Err("af-packet needs at least one --iface".to_string());
            }
            let driver: Arc<dyn EthDriver> = Arc::new(
                PacketDriver::new(args.ifaces.as_slice())
                    .map_err(|errno| format!("cannot open interfaces {:?}: {errno}", args.ifaces))?,
            );
            Ok((driver, None))
        }
        #[cfg(not(target_os = "linux"))]
        DriverKind::AfPacket => Err("af-packet is only available on Linux".to_string()),
    }
}

/// Generator and sink threads feeding the ring device.
struct Traffic {
    generators: Vec<JoinHandle<GenReport>>,
    sinks: Vec<JoinHandle<SinkReport>>,
}

impl Traffic {
    fn spawn(ring: &Arc<RingDriver>, args: &Args, token: &CancellationToken) -> io::Result<Self> {
        let mut flows = vec![(args.ingress, args.egress)];
        if args.bidirectional {
            flows.push((args.egress, args.ingress));
        }
        let frame = UdpFrame::new().payload_len(args.payload_len);

        let mut traffic = Traffic {
            generators: Vec::new(),
            sinks: Vec::new(),
        };
        for (from, to) in flows {
            let config = GenConfig::new(from).frame(frame);
            traffic
                .generators
                .push(spawn_generator(ring.clone(), config, token.clone())?);
            traffic
                .sinks
                .push(spawn_sink(ring.clone(), to, token.clone())?);
        }
        Ok(traffic)
    }

    fn join(self) {
        for handle in self.generators {
            match handle.join() {
                Ok(report) => info!(sent = report.sent, "generator finished"),
                Err(_) => warn!("generator thread panicked"),
            }
        }
        for handle in self.sinks {
            match handle.join() {
                Ok(report) => info!(
                    frames = report.frames,
                    bytes = report.bytes,
                    out_of_order = report.out_of_order,
                    "sink finished"
                ),
                Err(_) => warn!("sink thread panicked"),
            }
        }
    }
}

fn main() -> ExitCode {
    // Initialize tracing - respects RUST_LOG, defaults to info if not set
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_ansi(false)
        .init();

    let args = Args::parse();
    info!(
        driver = ?args.driver,
        ingress = args.ingress,
        egress = args.egress,
        mode = ?args.mode,
        bidirectional = args.bidirectional,
        burst = args.burst,
        lcore = ?args.lcore,
        "Starting l2fwd"
    );

    let stop = CancellationToken::new();
    let signal = stop.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        warn!("Received signal, shutting down");
        signal.cancel();
    }) {
        error!(error = %e, "Failed to set signal handler");
        return ExitCode::FAILURE;
    }

    if let Some(secs) = args.duration {
        let timer = stop.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(secs));
            info!(secs, "Duration elapsed, shutting down");
            timer.cancel();
        });
    }

    let (driver, ring) = match open_driver(&args) {
        Ok(opened) => opened,
        Err(e) => {
            error!(error = %e, "Failed to open driver");
            return ExitCode::FAILURE;
        }
    };

    let app = match L2FwdApp::initialize(driver, args.app_config()) {
        Ok(app) => app,
        Err(e) => {
            error!(error = %e, "Initialization failed");
            return ExitCode::FAILURE;
        }
    };

    let traffic_stop = stop.child_token();
    let traffic = match ring.as_ref().map(|ring| Traffic::spawn(ring, &args, &traffic_stop)) {
        Some(Ok(traffic)) => Some(traffic),
        Some(Err(e)) => {
            error!(error = %e, "Failed to start traffic threads");
            traffic_stop.cancel();
            app.shutdown();
            return ExitCode::FAILURE;
        }
        None => None,
    };

    let result = app.run(&stop);

    traffic_stop.cancel();
    if let Some(traffic) = traffic {
        traffic.join();
    }

    let report = app.shutdown();
    if !report.is_clean() {
        warn!(
            stop_failures = report.stop_failures.len(),
            close_failures = report.close_failures.len(),
            leaked_mbufs = report.leaked_mbufs,
            "Shutdown was not clean"
        );
    }

    match result {
        Ok(summary) => {
            info!(
                rx_packets = summary.rx_packets,
                tx_packets = summary.tx_packets,
                tx_bytes = summary.tx_bytes,
                dropped = summary.dropped,
                runts = summary.runts,
                "Forwarding finished"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Forwarding failed");
            ExitCode::FAILURE
        }
    }
}
