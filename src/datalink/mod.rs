//! BACnet Data Link Layer
//!
//! Transport selection and dispatch. Exactly one transport is active at a
//! time; the [`LinkManager`] owns the selection and delegates every
//! datalink operation to it through the [`Transport`] trait. The manager
//! is an owned value rather than process-global state, so multiple
//! managers can coexist (one per device context, or several in tests).
//!
//! Delegation is deliberately uniform and lossless: the manager performs
//! no transport-independent transformation. Calls against an unselected or
//! unregistered transport quietly return zero/empty results; callers must
//! not assume a non-zero result implies a configured transport.

use std::net::SocketAddr;
use std::time::Duration;

use log::warn;
use thiserror::Error;

pub mod bip;
pub mod bsc;

pub use bip::BipTransport;

/// Result type for data link operations
pub type Result<T> = std::result::Result<T, DataLinkError>;

/// Errors that can occur during data link layer operations
#[derive(Debug, Error)]
pub enum DataLinkError {
    /// Network I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Received frame does not conform to the transport's framing
    #[error("invalid frame")]
    InvalidFrame,

    /// Address resolution or validation failure
    #[error("address error: {0}")]
    Address(String),

    /// Address type incompatible with the transport
    #[error("unsupported address type")]
    UnsupportedAddress,

    /// No frame arrived within the receive timeout
    #[error("receive timeout")]
    Timeout,
}

/// The data link transports a stack can be built with.
///
/// Only `None`, `Bip` and `Bsc` carry implementations in this crate; the
/// remaining names are recognized by [`LinkManager::set`] so configuration
/// strings from a full build parse identically, but dispatch to them
/// no-ops until a transport is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DataLinkKind {
    None,
    Arcnet,
    Ethernet,
    Bip,
    Bip6,
    Mstp,
    Bsc,
    Zigbee,
}

impl DataLinkKind {
    /// Case-insensitive name lookup. `Option::None` for unrecognized names.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "none" => Some(DataLinkKind::None),
            "arcnet" => Some(DataLinkKind::Arcnet),
            "ethernet" => Some(DataLinkKind::Ethernet),
            "bip" => Some(DataLinkKind::Bip),
            "bip6" => Some(DataLinkKind::Bip6),
            "mstp" => Some(DataLinkKind::Mstp),
            "bsc" => Some(DataLinkKind::Bsc),
            "zigbee" => Some(DataLinkKind::Zigbee),
            _ => None,
        }
    }
}

/// Data link layer address representation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportAddress {
    /// IP address and port (BACnet/IP)
    Ip(SocketAddr),
    /// 6-byte virtual MAC (BACnet Secure Connect)
    Vmac([u8; 6]),
    /// Logical broadcast, translated per transport
    Broadcast,
    /// No address available (unconfigured transport)
    Unspecified,
}

/// Common trait for data link transports.
///
/// Implementations keep the explicit `Result` surface; the [`LinkManager`]
/// flattens failures into the zero/false results its callers expect.
pub trait Transport: Send {
    /// Bind the transport to a local interface or address string.
    fn init(&mut self, interface: &str) -> Result<()>;

    /// Send an NPDU to `dest`; returns the number of payload bytes sent.
    fn send_pdu(&mut self, dest: &TransportAddress, npdu: &[u8]) -> Result<usize>;

    /// Block up to `timeout` for one inbound NPDU.
    fn receive(&mut self, timeout: Duration) -> Result<(Vec<u8>, TransportAddress)>;

    /// Transport-level broadcast address
    fn broadcast_address(&self) -> TransportAddress;

    /// Local transport address
    fn local_address(&self) -> TransportAddress;

    /// Periodic housekeeping (lease renewal and similar). Default no-op.
    fn maintenance_timer(&mut self, _elapsed: Duration) {}

    /// Release transport resources. Default no-op.
    fn cleanup(&mut self) {}
}

/// Transport that accepts and discards everything; used for running the
/// stack without a physical link.
#[derive(Debug, Default)]
pub struct NullTransport;

impl Transport for NullTransport {
    fn init(&mut self, _interface: &str) -> Result<()> {
        Ok(())
    }

    fn send_pdu(&mut self, _dest: &TransportAddress, npdu: &[u8]) -> Result<usize> {
        Ok(npdu.len())
    }

    fn receive(&mut self, _timeout: Duration) -> Result<(Vec<u8>, TransportAddress)> {
        Err(DataLinkError::Timeout)
    }

    fn broadcast_address(&self) -> TransportAddress {
        TransportAddress::Unspecified
    }

    fn local_address(&self) -> TransportAddress {
        TransportAddress::Unspecified
    }
}

/// Owns the registered transports and the single active selection.
pub struct LinkManager {
    active: DataLinkKind,
    transports: Vec<(DataLinkKind, Box<dyn Transport>)>,
}

impl LinkManager {
    /// New manager with only the null transport registered and selected.
    pub fn new() -> Self {
        Self {
            active: DataLinkKind::None,
            transports: vec![(DataLinkKind::None, Box::new(NullTransport))],
        }
    }

    /// Make a transport available for selection.
    pub fn register(&mut self, kind: DataLinkKind, transport: Box<dyn Transport>) {
        self.transports.retain(|(k, _)| *k != kind);
        self.transports.push((kind, transport));
    }

    /// Select the active transport by name, case-insensitively.
    ///
    /// Unrecognized names leave the prior selection unchanged and no error
    /// is signaled; the caller inspects the returned kind.
    pub fn set(&mut self, name: &str) -> DataLinkKind {
        if let Some(kind) = DataLinkKind::parse(name) {
            self.active = kind;
        } else {
            warn!("datalink: unrecognized transport name {:?}", name);
        }
        self.active
    }

    /// Currently selected transport kind
    pub fn active(&self) -> DataLinkKind {
        self.active
    }

    fn active_transport(&mut self) -> Option<&mut Box<dyn Transport>> {
        let active = self.active;
        self.transports
            .iter_mut()
            .find(|(k, _)| *k == active)
            .map(|(_, t)| t)
    }

    /// Initialize the selected transport. False when the transport is not
    /// registered or its init fails.
    pub fn init(&mut self, interface: &str) -> bool {
        let active = self.active;
        match self.active_transport() {
            Some(transport) => match transport.init(interface) {
                Ok(()) => true,
                Err(e) => {
                    warn!("datalink: {:?} init on {:?} failed: {}", active, interface, e);
                    false
                }
            },
            None => false,
        }
    }

    /// Send an NPDU through the selected transport; 0 when unconfigured or
    /// on transport failure.
    pub fn send_pdu(&mut self, dest: &TransportAddress, npdu: &[u8]) -> usize {
        let active = self.active;
        match self.active_transport() {
            Some(transport) => match transport.send_pdu(dest, npdu) {
                Ok(sent) => sent,
                Err(e) => {
                    warn!("datalink: {:?} send failed: {}", active, e);
                    0
                }
            },
            None => 0,
        }
    }

    /// Receive one NPDU, blocking up to `timeout`. `None` on timeout or
    /// when no transport is configured.
    pub fn receive(&mut self, timeout: Duration) -> Option<(Vec<u8>, TransportAddress)> {
        let active = self.active;
        match self.active_transport() {
            Some(transport) => match transport.receive(timeout) {
                Ok(received) => Some(received),
                Err(DataLinkError::Timeout) => None,
                Err(e) => {
                    warn!("datalink: {:?} receive failed: {}", active, e);
                    None
                }
            },
            None => None,
        }
    }

    /// Broadcast address of the selected transport
    pub fn broadcast_address(&mut self) -> TransportAddress {
        match self.active_transport() {
            Some(transport) => transport.broadcast_address(),
            None => TransportAddress::Unspecified,
        }
    }

    /// Local address of the selected transport
    pub fn my_address(&mut self) -> TransportAddress {
        match self.active_transport() {
            Some(transport) => transport.local_address(),
            None => TransportAddress::Unspecified,
        }
    }

    /// Drive periodic housekeeping on the selected transport (foreign
    /// device lease renewal for BACnet/IP).
    pub fn maintenance_timer(&mut self, elapsed: Duration) {
        if let Some(transport) = self.active_transport() {
            transport.maintenance_timer(elapsed);
        }
    }

    /// Release the selected transport's resources.
    pub fn cleanup(&mut self) {
        if let Some(transport) = self.active_transport() {
            transport.cleanup();
        }
    }
}

impl Default for LinkManager {
    fn default() -> Self {
        Self::new()
    }
}
