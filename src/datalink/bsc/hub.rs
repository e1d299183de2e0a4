//! Secure Connect hub relay
//!
//! A hub owns a fixed-capacity registry of peer slots and relays BVLC-SC
//! messages between them: broadcasts fan out to every other connected
//! peer, unicasts are looked up by destination VMAC. All registry reads
//! and mutations run under one coarse dispatch lock so the registry
//! invariant (no two connected slots share a VMAC) holds under concurrent
//! socket-event delivery. The lock is never held across a send: forward
//! targets are collected under the lock and the frames go out after it is
//! released.
//!
//! Transport security (TLS, WebSocket) is handled by the peer connection
//! layer behind [`PeerSender`]; the relay sees decrypted frames only.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use log::{debug, warn};
use thiserror::Error;

use crate::datalink::bsc::bvlc::{ScMessage, Vmac, BROADCAST_VMAC};

/// Result type for hub operations
pub type Result<T> = std::result::Result<T, HubError>;

/// Errors that can occur during hub operation
#[derive(Debug, Error)]
pub enum HubError {
    /// A required start parameter is missing or empty
    #[error("bad start parameter: {0}")]
    BadParameter(&'static str),

    /// The peer-slot pool is exhausted
    #[error("no free peer slots")]
    NoResources,

    /// Operation requires the hub to be started
    #[error("hub is not started")]
    NotStarted,
}

/// Outbound seam to one connected peer. Implementations wrap the secure
/// WebSocket connection; `send` may block on the socket.
pub trait PeerSender: Send + Sync {
    fn send(&self, frame: &[u8]) -> std::io::Result<()>;
}

/// Hub lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubState {
    Idle,
    Starting,
    Started,
    Stopping,
}

/// Events surfaced through the hub's registered callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    Started,
    Stopped,
    PeerConnected(Vmac),
    PeerDisconnected(Vmac),
    /// A connecting peer presented a VMAC already in use by a different
    /// node; the previous holder was evicted.
    DuplicateVmac(Vmac),
}

/// Callback invoked for hub lifecycle and peer events. Runs outside the
/// dispatch lock.
pub type EventCallback = Box<dyn Fn(HubEvent) + Send + Sync>;

/// Hub start parameters. Credential blobs are opaque here; they are handed
/// to the connection layer.
#[derive(Clone)]
pub struct HubConfig {
    pub uuid: [u8; 16],
    pub vmac: Vmac,
    pub ca_certificate: Vec<u8>,
    pub certificate: Vec<u8>,
    pub private_key: Vec<u8>,
    /// Hard capacity of the peer-slot pool; slots are reused, never grown
    pub max_peers: usize,
    pub connect_timeout: Duration,
    pub heartbeat_timeout: Duration,
}

impl HubConfig {
    fn validate(&self) -> Result<()> {
        if self.uuid == [0; 16] {
            return Err(HubError::BadParameter("uuid"));
        }
        if self.vmac == Vmac([0; 6]) || self.vmac.is_broadcast() {
            return Err(HubError::BadParameter("vmac"));
        }
        if self.ca_certificate.is_empty() {
            return Err(HubError::BadParameter("ca_certificate"));
        }
        if self.certificate.is_empty() {
            return Err(HubError::BadParameter("certificate"));
        }
        if self.private_key.is_empty() {
            return Err(HubError::BadParameter("private_key"));
        }
        if self.max_peers == 0 {
            return Err(HubError::BadParameter("max_peers"));
        }
        if self.connect_timeout.is_zero() || self.heartbeat_timeout.is_zero() {
            return Err(HubError::BadParameter("timeouts"));
        }
        Ok(())
    }
}

struct Slot {
    vmac: Vmac,
    uuid: [u8; 16],
    sender: Arc<dyn PeerSender>,
}

struct Registry {
    state: HubState,
    slots: Vec<Option<Slot>>,
}

impl Registry {
    fn position_by_vmac(&self, vmac: Vmac) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|s| s.vmac == vmac))
    }

    fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(|slot| slot.is_none())
    }
}

/// One hub instance: registry, lifecycle state and the event callback.
pub struct HubFunction {
    registry: Mutex<Registry>,
    events: EventCallback,
}

impl HubFunction {
    /// Validate parameters and bring the hub up.
    ///
    /// Fails fast with [`HubError::BadParameter`] when any required
    /// credential, identity or timeout argument is missing.
    pub fn start(config: &HubConfig, events: EventCallback) -> Result<Self> {
        config.validate()?;
        let mut slots = Vec::with_capacity(config.max_peers);
        slots.resize_with(config.max_peers, || None);
        let hub = Self {
            registry: Mutex::new(Registry {
                state: HubState::Starting,
                slots,
            }),
            events,
        };
        hub.registry.lock().unwrap().state = HubState::Started;
        (hub.events)(HubEvent::Started);
        Ok(hub)
    }

    /// Disconnect every peer and return to `IDLE`.
    pub fn stop(&self) {
        let dropped: Vec<Vmac> = {
            let mut registry = self.registry.lock().unwrap();
            if registry.state != HubState::Started {
                return;
            }
            registry.state = HubState::Stopping;
            let dropped = registry
                .slots
                .iter_mut()
                .filter_map(|slot| slot.take().map(|s| s.vmac))
                .collect();
            registry.state = HubState::Idle;
            dropped
        };
        for vmac in dropped {
            (self.events)(HubEvent::PeerDisconnected(vmac));
        }
        (self.events)(HubEvent::Stopped);
    }

    pub fn started(&self) -> bool {
        self.registry.lock().unwrap().state == HubState::Started
    }

    pub fn stopped(&self) -> bool {
        self.registry.lock().unwrap().state == HubState::Idle
    }

    /// Number of connected peers
    pub fn connected_peers(&self) -> usize {
        self.registry
            .lock()
            .unwrap()
            .slots
            .iter()
            .filter(|slot| slot.is_some())
            .count()
    }

    /// Register a newly accepted peer connection.
    ///
    /// A reconnecting peer (same VMAC, same UUID) reuses its slot. A
    /// different node presenting an in-use VMAC evicts the previous holder
    /// and raises [`HubEvent::DuplicateVmac`].
    pub fn accept_peer(
        &self,
        vmac: Vmac,
        uuid: [u8; 16],
        sender: Arc<dyn PeerSender>,
    ) -> Result<()> {
        let mut pending = Vec::new();
        {
            let mut registry = self.registry.lock().unwrap();
            if registry.state != HubState::Started {
                return Err(HubError::NotStarted);
            }
            if let Some(index) = registry.position_by_vmac(vmac) {
                let same_node = registry.slots[index]
                    .as_ref()
                    .is_some_and(|slot| slot.uuid == uuid);
                if same_node {
                    debug!("hub: peer {} reconnected", vmac);
                } else {
                    // same VMAC from a different node: evict the holder
                    pending.push(HubEvent::DuplicateVmac(vmac));
                }
                registry.slots[index] = Some(Slot { vmac, uuid, sender });
            } else {
                let index = registry.free_slot().ok_or(HubError::NoResources)?;
                registry.slots[index] = Some(Slot { vmac, uuid, sender });
                pending.push(HubEvent::PeerConnected(vmac));
            }
        }
        for event in pending {
            (self.events)(event);
        }
        Ok(())
    }

    /// Remove a peer from the registry (ordinary disconnect).
    pub fn disconnect_peer(&self, vmac: Vmac) {
        let removed = {
            let mut registry = self.registry.lock().unwrap();
            match registry.position_by_vmac(vmac) {
                Some(index) => {
                    registry.slots[index] = None;
                    true
                }
                None => false,
            }
        };
        if removed {
            (self.events)(HubEvent::PeerDisconnected(vmac));
        }
    }

    /// Route one frame received from the peer connected as `source`.
    ///
    /// Undeliverable frames are dropped with a log line; routing failures
    /// are never reported back to the originating peer.
    pub fn route_from(&self, source: Vmac, frame: Bytes) {
        let mut message = match ScMessage::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!("hub: dropping malformed frame from {}: {}", source, e);
                return;
            }
        };

        // a relayed frame must carry a destination; an already-set origin
        // without one is malformed relay input
        let Some(destination) = message.destination else {
            if message.origin.is_some() {
                warn!("hub: dropping frame from {} with origin but no destination", source);
            } else {
                debug!("hub: frame from {} addressed to the hub itself, ignoring", source);
            }
            return;
        };

        if destination == BROADCAST_VMAC {
            message.set_origin(source);
            let frame = match message.encode() {
                Ok(frame) => frame.freeze(),
                Err(e) => {
                    warn!("hub: dropping frame from {}: {}", source, e);
                    return;
                }
            };
            let targets: Vec<(Vmac, Arc<dyn PeerSender>)> = {
                let registry = self.registry.lock().unwrap();
                if registry.state != HubState::Started {
                    return;
                }
                registry
                    .slots
                    .iter()
                    .flatten()
                    .filter(|slot| slot.vmac != source)
                    .map(|slot| (slot.vmac, Arc::clone(&slot.sender)))
                    .collect()
            };
            for (vmac, sender) in targets {
                if let Err(e) = sender.send(&frame) {
                    warn!("hub: broadcast forward to {} failed: {}", vmac, e);
                }
            }
        } else {
            let target: Option<Arc<dyn PeerSender>> = {
                let registry = self.registry.lock().unwrap();
                if registry.state != HubState::Started {
                    return;
                }
                registry
                    .position_by_vmac(destination)
                    .and_then(|index| registry.slots[index].as_ref())
                    .map(|slot| Arc::clone(&slot.sender))
            };
            let Some(sender) = target else {
                debug!("hub: no peer {} for frame from {}, dropping", destination, source);
                return;
            };
            message.strip_destination();
            message.set_origin(source);
            let frame = match message.encode() {
                Ok(frame) => frame.freeze(),
                Err(e) => {
                    warn!("hub: dropping frame from {}: {}", source, e);
                    return;
                }
            };
            if let Err(e) = sender.send(&frame) {
                warn!("hub: forward to {} failed: {}", destination, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datalink::bsc::bvlc::ScFunction;

    struct Recorder {
        frames: Mutex<Vec<Vec<u8>>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                frames: Mutex::new(Vec::new()),
            })
        }

        fn frames(&self) -> Vec<Vec<u8>> {
            self.frames.lock().unwrap().clone()
        }
    }

    impl PeerSender for Recorder {
        fn send(&self, frame: &[u8]) -> std::io::Result<()> {
            self.frames.lock().unwrap().push(frame.to_vec());
            Ok(())
        }
    }

    fn test_config() -> HubConfig {
        HubConfig {
            uuid: [0xA5; 16],
            vmac: Vmac([0x10, 0, 0, 0, 0, 1]),
            ca_certificate: vec![1],
            certificate: vec![2],
            private_key: vec![3],
            max_peers: 8,
            connect_timeout: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(30),
        }
    }

    fn event_recorder() -> (EventCallback, Arc<Mutex<Vec<HubEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        (
            Box::new(move |event| sink.lock().unwrap().push(event)),
            events,
        )
    }

    fn npdu_to(destination: Vmac) -> Bytes {
        ScMessage::new(ScFunction::EncapsulatedNpdu, Bytes::from_static(&[0xAA]))
            .with_destination(destination)
            .encode()
            .unwrap()
            .freeze()
    }

    const VMAC_A: Vmac = Vmac([0xA; 6]);
    const VMAC_B: Vmac = Vmac([0xB; 6]);
    const VMAC_C: Vmac = Vmac([0xC; 6]);

    #[test]
    fn test_start_validates_parameters() {
        let (events, _) = event_recorder();
        let mut config = test_config();
        config.certificate.clear();
        assert!(matches!(
            HubFunction::start(&config, events),
            Err(HubError::BadParameter("certificate"))
        ));

        let (events, _) = event_recorder();
        let mut config = test_config();
        config.max_peers = 0;
        assert!(matches!(
            HubFunction::start(&config, events),
            Err(HubError::BadParameter("max_peers"))
        ));
    }

    #[test]
    fn test_lifecycle() {
        let (events, log) = event_recorder();
        let hub = HubFunction::start(&test_config(), events).unwrap();
        assert!(hub.started());
        assert!(!hub.stopped());

        hub.accept_peer(VMAC_A, [1; 16], Recorder::new()).unwrap();
        hub.stop();
        assert!(hub.stopped());
        assert_eq!(hub.connected_peers(), 0);

        let log = log.lock().unwrap();
        assert_eq!(log.first(), Some(&HubEvent::Started));
        assert_eq!(log.last(), Some(&HubEvent::Stopped));
        assert!(log.contains(&HubEvent::PeerDisconnected(VMAC_A)));

        // accepting after stop fails
        assert!(matches!(
            hub.accept_peer(VMAC_B, [2; 16], Recorder::new()),
            Err(HubError::NotStarted)
        ));
    }

    #[test]
    fn test_broadcast_fans_out_excluding_sender() {
        let (events, _) = event_recorder();
        let hub = HubFunction::start(&test_config(), events).unwrap();
        let a = Recorder::new();
        let b = Recorder::new();
        let c = Recorder::new();
        hub.accept_peer(VMAC_A, [1; 16], a.clone()).unwrap();
        hub.accept_peer(VMAC_B, [2; 16], b.clone()).unwrap();
        hub.accept_peer(VMAC_C, [3; 16], c.clone()).unwrap();

        hub.route_from(VMAC_A, npdu_to(BROADCAST_VMAC));

        assert!(a.frames().is_empty());
        for recorder in [&b, &c] {
            let frames = recorder.frames();
            assert_eq!(frames.len(), 1);
            let forwarded = ScMessage::decode(Bytes::from(frames[0].clone())).unwrap();
            // origin rewritten to the sender, broadcast destination kept
            assert_eq!(forwarded.origin, Some(VMAC_A));
            assert_eq!(forwarded.destination, Some(BROADCAST_VMAC));
            assert_eq!(forwarded.payload.as_ref(), &[0xAA]);
        }
    }

    #[test]
    fn test_unicast_strips_destination_and_sets_origin() {
        let (events, _) = event_recorder();
        let hub = HubFunction::start(&test_config(), events).unwrap();
        let b = Recorder::new();
        let c = Recorder::new();
        hub.accept_peer(VMAC_B, [2; 16], b.clone()).unwrap();
        hub.accept_peer(VMAC_C, [3; 16], c.clone()).unwrap();

        hub.route_from(VMAC_C, npdu_to(VMAC_B));

        assert!(c.frames().is_empty());
        let frames = b.frames();
        assert_eq!(frames.len(), 1);
        let forwarded = ScMessage::decode(Bytes::from(frames[0].clone())).unwrap();
        assert_eq!(forwarded.origin, Some(VMAC_C));
        assert_eq!(forwarded.destination, None);
    }

    #[test]
    fn test_unknown_destination_dropped() {
        let (events, _) = event_recorder();
        let hub = HubFunction::start(&test_config(), events).unwrap();
        let b = Recorder::new();
        hub.accept_peer(VMAC_B, [2; 16], b.clone()).unwrap();

        hub.route_from(VMAC_B, npdu_to(VMAC_A));
        assert!(b.frames().is_empty());
    }

    #[test]
    fn test_origin_without_destination_dropped() {
        let (events, _) = event_recorder();
        let hub = HubFunction::start(&test_config(), events).unwrap();
        let b = Recorder::new();
        hub.accept_peer(VMAC_B, [2; 16], b.clone()).unwrap();

        let malformed = ScMessage::new(ScFunction::EncapsulatedNpdu, Bytes::from_static(&[1]))
            .with_origin(VMAC_A)
            .encode()
            .unwrap()
            .freeze();
        hub.route_from(VMAC_A, malformed);
        assert!(b.frames().is_empty());

        // garbage bytes are also dropped without panic
        hub.route_from(VMAC_A, Bytes::from_static(&[0x00, 0x01]));
        assert!(b.frames().is_empty());
    }

    #[test]
    fn test_oversize_rewrite_dropped_not_truncated() {
        let (events, _) = event_recorder();
        let hub = HubFunction::start(&test_config(), events).unwrap();
        let b = Recorder::new();
        hub.accept_peer(VMAC_B, [2; 16], b.clone()).unwrap();
        hub.accept_peer(VMAC_C, [3; 16], Recorder::new()).unwrap();

        // fits on arrival; stamping the 6-byte origin would overflow the
        // 16-bit length field, so the relay drops instead of truncating
        let frame = ScMessage::new(ScFunction::EncapsulatedNpdu, Bytes::from(vec![0u8; 65520]))
            .with_destination(BROADCAST_VMAC)
            .encode()
            .unwrap()
            .freeze();
        hub.route_from(VMAC_C, frame);
        assert!(b.frames().is_empty());
    }

    #[test]
    fn test_duplicate_vmac_evicts_and_reports_once() {
        let (events, log) = event_recorder();
        let hub = HubFunction::start(&test_config(), events).unwrap();
        let old = Recorder::new();
        let new = Recorder::new();
        hub.accept_peer(VMAC_A, [1; 16], old.clone()).unwrap();
        hub.accept_peer(VMAC_A, [9; 16], new.clone()).unwrap();

        let duplicates: Vec<_> = log
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, HubEvent::DuplicateVmac(_)))
            .cloned()
            .collect();
        assert_eq!(duplicates, vec![HubEvent::DuplicateVmac(VMAC_A)]);
        assert_eq!(hub.connected_peers(), 1);

        // traffic now reaches the new holder only
        hub.accept_peer(VMAC_B, [2; 16], Recorder::new()).unwrap();
        hub.route_from(VMAC_B, npdu_to(VMAC_A));
        assert!(old.frames().is_empty());
        assert_eq!(new.frames().len(), 1);
    }

    #[test]
    fn test_same_uuid_reconnect_reuses_slot() {
        let (events, log) = event_recorder();
        let mut config = test_config();
        config.max_peers = 1;
        let hub = HubFunction::start(&config, events).unwrap();
        hub.accept_peer(VMAC_A, [1; 16], Recorder::new()).unwrap();
        // reconnect with the same identity takes the same slot
        hub.accept_peer(VMAC_A, [1; 16], Recorder::new()).unwrap();
        assert_eq!(hub.connected_peers(), 1);
        assert!(!log
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, HubEvent::DuplicateVmac(_))));
    }

    #[test]
    fn test_pool_exhaustion() {
        let (events, _) = event_recorder();
        let mut config = test_config();
        config.max_peers = 1;
        let hub = HubFunction::start(&config, events).unwrap();
        hub.accept_peer(VMAC_A, [1; 16], Recorder::new()).unwrap();
        assert!(matches!(
            hub.accept_peer(VMAC_B, [2; 16], Recorder::new()),
            Err(HubError::NoResources)
        ));

        // slots are reused after a disconnect
        hub.disconnect_peer(VMAC_A);
        hub.accept_peer(VMAC_B, [2; 16], Recorder::new()).unwrap();
        assert_eq!(hub.connected_peers(), 1);
    }
}
