use std::fmt;
use std::io;

use l2fwd::api::Errno;
use l2fwd::api::dev::eth::{PortId, QueueId, SetupError, SetupStage};

/// Queue direction, for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Rx,
    Tx,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Rx => f.write_str("RX"),
            Direction::Tx => f.write_str("TX"),
        }
    }
}

/// Error type for l2fwd-util operations.
///
/// Every variant except `Spawn`, `WorkerPanicked` and `QueueAcquire` is an
/// initialization failure: it is returned before any packet is forwarded.
#[derive(Debug)]
pub enum Error {
    /// Fewer ports than a forwarding pair needs.
    NotEnoughPorts { available: u16, required: u16 },
    /// The port identifier does not name a port of the driver.
    InvalidPort(PortId),
    /// Ingress and egress name the same port.
    SamePort(PortId),
    /// The buffer pool could not be created.
    PoolCreate(Errno),
    /// Querying device capabilities failed.
    DevInfo { port_id: PortId, errno: Errno },
    /// The device rejected its configuration.
    Configure { port_id: PortId, errno: Errno },
    /// The device rejected a queue setup.
    QueueSetup {
        port_id: PortId,
        queue_id: QueueId,
        dir: Direction,
        errno: Errno,
    },
    /// Enabling promiscuous mode failed.
    Promiscuous { port_id: PortId, errno: Errno },
    /// The device refused to start.
    Start { port_id: PortId, errno: Errno },
    /// The port's MAC address could not be read.
    MacAddr { port_id: PortId, errno: Errno },
    /// The requested lcore does not exist.
    Lcore(usize),
    /// A started queue could not be taken for forwarding.
    QueueAcquire {
        port_id: PortId,
        queue_id: QueueId,
        dir: Direction,
        errno: Errno,
    },
    /// The forwarding thread could not be spawned.
    Spawn(io::Error),
    /// The forwarding thread panicked.
    WorkerPanicked,
}

impl Error {
    /// Whether the error happened while bringing the application up.
    pub fn is_init(&self) -> bool {
        !matches!(
            self,
            Error::QueueAcquire { .. } | Error::Spawn(_) | Error::WorkerPanicked
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotEnoughPorts {
                available,
                required,
            } => write!(f, "need {required} ports, {available} available"),
            Error::InvalidPort(port_id) => write!(f, "invalid port {port_id}"),
            Error::SamePort(port_id) => {
                write!(f, "ingress and egress are both port {port_id}")
            }
            Error::PoolCreate(e) => write!(f, "cannot create mbuf pool: {e}"),
            Error::DevInfo { port_id, errno } => {
                write!(f, "cannot get device info for port {port_id}: {errno}")
            }
            Error::Configure { port_id, errno } => {
                write!(f, "cannot configure port {port_id}: {errno}")
            }
            Error::QueueSetup {
                port_id,
                queue_id,
                dir,
                errno,
            } => write!(
                f,
                "{dir} queue {queue_id} setup failed on port {port_id}: {errno}"
            ),
            Error::Promiscuous { port_id, errno } => write!(
                f,
                "cannot enable promiscuous mode on port {port_id}: {errno}"
            ),
            Error::Start { port_id, errno } => write!(f, "cannot start port {port_id}: {errno}"),
            Error::MacAddr { port_id, errno } => {
                write!(f, "cannot read MAC address of port {port_id}: {errno}")
            }
            Error::Lcore(id) => write!(f, "lcore {id} is not available"),
            Error::QueueAcquire {
                port_id,
                queue_id,
                dir,
                errno,
            } => write!(
                f,
                "cannot take {dir} queue {queue_id} of port {port_id}: {errno}"
            ),
            Error::Spawn(e) => write!(f, "cannot spawn forwarding thread: {e}"),
            Error::WorkerPanicked => write!(f, "forwarding thread panicked"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::PoolCreate(errno)
            | Error::DevInfo { errno, .. }
            | Error::Configure { errno, .. }
            | Error::QueueSetup { errno, .. }
            | Error::Promiscuous { errno, .. }
            | Error::Start { errno, .. }
            | Error::MacAddr { errno, .. }
            | Error::QueueAcquire { errno, .. } => Some(errno),
            Error::Spawn(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SetupError> for Error {
    fn from(e: SetupError) -> Self {
        let SetupError {
            port_id,
            stage,
            errno,
        } = e;
        match stage {
            SetupStage::Open => Error::InvalidPort(port_id),
            SetupStage::Info => Error::DevInfo { port_id, errno },
            SetupStage::Configure => Error::Configure { port_id, errno },
            SetupStage::RxQueueSetup(queue_id) => Error::QueueSetup {
                port_id,
                queue_id,
                dir: Direction::Rx,
                errno,
            },
            SetupStage::TxQueueSetup(queue_id) => Error::QueueSetup {
                port_id,
                queue_id,
                dir: Direction::Tx,
                errno,
            },
            SetupStage::Promiscuous => Error::Promiscuous { port_id, errno },
            SetupStage::Start => Error::Start { port_id, errno },
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Spawn(e)
    }
}
