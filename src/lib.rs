//! BACnet Device Stack Core
//!
//! This crate implements the commandable-object model of a BACnet device
//! together with the datalink dispatch layer and a BACnet Secure Connect
//! hub relay, per ASHRAE 135.
//!
//! # Architecture
//!
//! - [`object`]: commandable object stores (Analog Output, Analog Value)
//!   with the 16-level priority array, ReadProperty/WriteProperty codecs
//!   and the intrinsic-reporting state machine.
//! - [`encoding`]: BACnet application-tag primitive codec.
//! - [`datalink`]: transport selection and dispatch (BACnet/IP, the null
//!   test transport) plus the Secure Connect hub relay in
//!   [`datalink::bsc`].
//!
//! # Example
//!
//! ```
//! use bacnet_device::object::{AnalogOutputStore, ReadPropertyRequest};
//!
//! let mut store = AnalogOutputStore::new();
//! store.create(1).unwrap();
//! store.write_present_value(1, 42.5, 8).unwrap();
//!
//! let reply = store.read_property(&ReadPropertyRequest::new(1, 85)).unwrap();
//! assert!(!reply.is_empty());
//! ```

pub mod datalink;
pub mod encoding;
pub mod object;

/// BACnet protocol version
pub const BACNET_PROTOCOL_VERSION: u8 = 1;

/// Maximum APDU length this stack accepts (fits in one BACnet/IP frame)
pub const BACNET_MAX_APDU: usize = 1476;

/// Maximum MPDU length for BACnet/IP (BVLC header + NPDU + APDU)
pub const BACNET_MAX_MPDU: usize = 1497;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(BACNET_PROTOCOL_VERSION, 1);
        assert!(BACNET_MAX_APDU < BACNET_MAX_MPDU);
    }
}
