//! L2FwdApp lifecycle controller.

use std::sync::Arc;

use l2fwd::api::Errno;
use l2fwd::api::dev::driver::{EthDriver, EthStats};
use l2fwd::api::dev::eth::{
    EthConf, EthDev, EthDevBuilder, PortId, RxQueueConf, TxQueueConf, format_mac_addr, iter_ports,
};
use l2fwd::api::dev::pktmbuf::{MemPool, MemPoolConfig};
use l2fwd::api::lcore::Lcore;
use l2fwd::fwd::{Forwarder, FwdSummary, Session, Transform};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::{Direction, Error};
use crate::meter::Meter;

/// Number of ports a forwarding pair uses.
const NB_PORTS: u16 = 2;

/// Outcome of [`L2FwdApp::shutdown`].
///
/// Teardown never stops early; failures are collected here instead.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub stop_failures: Vec<(PortId, Errno)>,
    pub close_failures: Vec<(PortId, Errno)>,
    /// Device counters read just before each port was stopped.
    pub port_stats: Vec<(PortId, EthStats)>,
    /// Buffers still held somewhere when the pool was released.
    pub leaked_mbufs: usize,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.stop_failures.is_empty() && self.close_failures.is_empty() && self.leaked_mbufs == 0
    }
}

/// Owns the buffer pool and the forwarding ports.
pub struct L2FwdApp {
    driver: Arc<dyn EthDriver>,
    config: AppConfig,
    mempool: Option<MemPool>,
    ports: Vec<EthDev>,
}

impl L2FwdApp {
    /// Create the pool, then configure and start the ingress and egress
    /// ports, in that order.
    ///
    /// The first failure aborts initialization. Ports already started are
    /// not rolled back.
    pub fn initialize(driver: Arc<dyn EthDriver>, config: AppConfig) -> Result<Self, Error> {
        let available = driver.count_avail();
        info!(driver = driver.name(), available, "probing ports");
        for port_id in iter_ports(driver.as_ref()) {
            if let Ok(info) = driver.info(port_id) {
                debug!(
                    port_id,
                    driver = %info.driver_name,
                    if_name = ?info.if_name,
                    max_rx_queues = info.max_rx_queues,
                    max_tx_queues = info.max_tx_queues,
                    "port info"
                );
            }
        }
        if available < NB_PORTS {
            return Err(Error::NotEnoughPorts {
                available,
                required: NB_PORTS,
            });
        }

        let (ingress, egress) = (config.ingress, config.egress);
        for port_id in [ingress, egress] {
            if !driver.is_valid_port(port_id) {
                return Err(Error::InvalidPort(port_id));
            }
        }
        if ingress == egress {
            return Err(Error::SamePort(ingress));
        }
        if let Some(cpu) = config.lcore {
            Lcore::from_id(cpu).ok_or(Error::Lcore(cpu))?;
        }

        let pool_config = MemPoolConfig::new()
            .num_mbufs(config.num_mbufs.saturating_mul(NB_PORTS as u32))
            .cache_size(config.cache_size)
            .data_room_size(config.data_room_size);
        let mempool =
            MemPool::create(config.mempool_name.clone(), &pool_config).map_err(Error::PoolCreate)?;
        info!(
            name = mempool.name(),
            capacity = mempool.capacity(),
            cache_size = mempool.cache_size(),
            "mbuf pool created"
        );

        let mut ports = Vec::with_capacity(NB_PORTS as usize);
        for port_id in [ingress, egress] {
            let dev = EthDevBuilder::new(port_id)
                .eth_conf(EthConf::new().mtu(config.mtu))
                .rx_queue_conf(RxQueueConf::new().nb_desc(config.rx_desc))
                .tx_queue_conf(
                    TxQueueConf::new()
                        .nb_desc(config.tx_desc)
                        .free_thresh(config.tx_free_thresh),
                )
                .promiscuous(config.promiscuous)
                .build(&driver, &mempool)?;
            let mac = dev
                .mac_addr()
                .map_err(|errno| Error::MacAddr { port_id, errno })?;
            info!(port_id, mac = %format_mac_addr(&mac), "port started");
            ports.push(dev);
        }

        Ok(Self {
            driver,
            config,
            mempool: Some(mempool),
            ports,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn driver(&self) -> &Arc<dyn EthDriver> {
        &self.driver
    }

    pub fn mempool(&self) -> Option<&MemPool> {
        self.mempool.as_ref()
    }

    pub fn ports(&self) -> &[EthDev] {
        &self.ports
    }

    pub fn port(&self, port_id: PortId) -> Option<&EthDev> {
        self.ports.iter().find(|p| p.port_id() == port_id)
    }

    /// Forward between the configured ports until `stop` is cancelled.
    pub fn run(&self, stop: &CancellationToken) -> Result<FwdSummary, Error> {
        self.run_pair(self.config.ingress, self.config.egress, stop)
    }

    /// Forward from `ingress` to `egress` (and back, if bidirectional) until
    /// `stop` is cancelled. Returns the counters of this run.
    pub fn run_pair(
        &self,
        ingress: PortId,
        egress: PortId,
        stop: &CancellationToken,
    ) -> Result<FwdSummary, Error> {
        let in_dev = self.port(ingress).ok_or(Error::InvalidPort(ingress))?;
        let out_dev = self.port(egress).ok_or(Error::InvalidPort(egress))?;
        let lcore = match self.config.lcore {
            Some(cpu) => Some(Lcore::from_id(cpu).ok_or(Error::Lcore(cpu))?),
            None => None,
        };

        let mut sessions = vec![self.session(in_dev, out_dev)?];
        if self.config.bidirectional {
            sessions.push(self.session(out_dev, in_dev)?);
        }
        let mut fwd = Forwarder::with_sessions(sessions)
            .burst_size(self.config.burst_size)
            .idle_policy(self.config.idle_policy);

        let meter = match self.config.stats_interval {
            Some(interval) => Some(Meter::spawn(fwd.stats(), interval, stop.child_token())?),
            None => None,
        };

        info!(
            ingress,
            egress,
            mode = ?self.config.transform,
            bidirectional = self.config.bidirectional,
            lcore = ?lcore.map(|l| l.id()),
            "starting forwarding"
        );
        let result = match lcore {
            Some(lcore) => {
                let token = stop.clone();
                lcore
                    .launch(move || fwd.run(&token))
                    .map_err(Error::Spawn)
                    .and_then(|handle| handle.join().map_err(|_| Error::WorkerPanicked))
            }
            None => Ok(fwd.run(stop)),
        };

        if let Some(meter) = meter {
            meter.stop();
        }
        result
    }

    fn session(&self, from: &EthDev, to: &EthDev) -> Result<Session, Error> {
        let rxq = from.rx_queue(0).map_err(|errno| Error::QueueAcquire {
            port_id: from.port_id(),
            queue_id: 0,
            dir: Direction::Rx,
            errno,
        })?;
        let txq = to.tx_queue(0).map_err(|errno| Error::QueueAcquire {
            port_id: to.port_id(),
            queue_id: 0,
            dir: Direction::Tx,
            errno,
        })?;
        let mac = to.mac_addr().map_err(|errno| Error::MacAddr {
            port_id: to.port_id(),
            errno,
        })?;
        Ok(Session::new(
            rxq,
            txq,
            Transform::new(self.config.transform, mac),
        ))
    }

    /// Stop and close every port, then release the pool.
    pub fn shutdown(mut self) -> ShutdownReport {
        self.teardown()
    }

    fn teardown(&mut self) -> ShutdownReport {
        let mut report = ShutdownReport::default();

        for dev in self.ports.iter_mut() {
            let port_id = dev.port_id();
            match dev.stats() {
                Ok(s) => {
                    info!(
                        port_id,
                        ipackets = s.ipackets,
                        opackets = s.opackets,
                        imissed = s.imissed,
                        ierrors = s.ierrors,
                        oerrors = s.oerrors,
                        rx_nombuf = s.rx_nombuf,
                        "port statistics"
                    );
                    report.port_stats.push((port_id, s));
                }
                Err(errno) => debug!(port_id, %errno, "port statistics unavailable"),
            }

            info!(port_id, "closing port");
            if let Err(errno) = dev.stop() {
                warn!(port_id, %errno, "port stop failed");
                report.stop_failures.push((port_id, errno));
            }
            if let Err(errno) = dev.close() {
                warn!(port_id, %errno, "port close failed");
                report.close_failures.push((port_id, errno));
            }
        }
        self.ports.clear();

        if let Some(pool) = self.mempool.take() {
            report.leaked_mbufs = pool.in_use_count();
            if report.leaked_mbufs > 0 {
                warn!(
                    name = pool.name(),
                    outstanding = report.leaked_mbufs,
                    "mbufs outstanding at pool release"
                );
            }
            info!(name = pool.name(), "mbuf pool released");
        }

        info!("shutdown complete");
        report
    }
}

impl Drop for L2FwdApp {
    fn drop(&mut self) {
        if !self.ports.is_empty() || self.mempool.is_some() {
            self.teardown();
        }
    }
}
