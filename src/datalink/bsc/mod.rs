//! BACnet Secure Connect (BACnet/SC)
//!
//! ASHRAE 135-2020 Annex AB hub-and-spoke topology. Every node holds one
//! connection to a central hub; the hub relays BVLC-SC messages between
//! nodes by virtual MAC address and fans broadcasts out to every connected
//! peer. The transport security layer (TLS, WebSocket framing, X.509
//! validation) lives outside this crate behind the
//! [`hub::PeerSender`] seam; this module owns the message codec and the
//! relay logic.

pub mod bvlc;
pub mod hub;

pub use bvlc::{ScControl, ScFunction, ScMessage, Vmac, BROADCAST_VMAC};
pub use hub::{HubConfig, HubEvent, HubFunction, HubState, PeerSender};
