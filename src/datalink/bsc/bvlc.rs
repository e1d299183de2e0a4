//! BVLC-SC message codec
//!
//! Wire format of a relay-visible BVLC-SC message (minimum 5 bytes):
//!
//! - byte 0: BVLC type, always `0x82`
//! - byte 1: function code
//! - bytes 2-3: message length including the header
//! - byte 4: control flags (origin present, destination present)
//! - 6 bytes origin VMAC when the origin flag is set
//! - 6 bytes destination VMAC when the destination flag is set
//! - payload
//!
//! The relay rewrites only the address fields; the payload is opaque.

use std::fmt;

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// BVLC type identifier for Secure Connect
pub const BVLC_SC_TYPE: u8 = 0x82;

/// Destination VMAC addressing every connected node
pub const BROADCAST_VMAC: Vmac = Vmac([0xFF; 6]);

/// 6-byte virtual MAC address identifying a Secure Connect node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Vmac(pub [u8; 6]);

impl Vmac {
    pub fn is_broadcast(&self) -> bool {
        *self == BROADCAST_VMAC
    }
}

impl fmt::Display for Vmac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

/// BVLC-SC function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ScFunction {
    BvlcResult = 0x00,
    EncapsulatedNpdu = 0x01,
    AddressResolution = 0x02,
    AddressResolutionAck = 0x03,
    Advertisement = 0x04,
    AdvertisementSolicitation = 0x05,
    ConnectRequest = 0x06,
    ConnectAccept = 0x07,
    DisconnectRequest = 0x08,
    DisconnectAck = 0x09,
    HeartbeatRequest = 0x0A,
    HeartbeatAck = 0x0B,
}

impl TryFrom<u8> for ScFunction {
    type Error = ScError;

    fn try_from(value: u8) -> Result<Self, ScError> {
        match value {
            0x00 => Ok(Self::BvlcResult),
            0x01 => Ok(Self::EncapsulatedNpdu),
            0x02 => Ok(Self::AddressResolution),
            0x03 => Ok(Self::AddressResolutionAck),
            0x04 => Ok(Self::Advertisement),
            0x05 => Ok(Self::AdvertisementSolicitation),
            0x06 => Ok(Self::ConnectRequest),
            0x07 => Ok(Self::ConnectAccept),
            0x08 => Ok(Self::DisconnectRequest),
            0x09 => Ok(Self::DisconnectAck),
            0x0A => Ok(Self::HeartbeatRequest),
            0x0B => Ok(Self::HeartbeatAck),
            other => Err(ScError::UnknownFunction(other)),
        }
    }
}

bitflags! {
    /// Control flags of the BVLC-SC header
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct ScControl: u8 {
        const ORIGIN_PRESENT = 0x01;
        const DESTINATION_PRESENT = 0x02;
    }
}

/// Codec errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScError {
    #[error("message too short")]
    MessageTooShort,
    #[error("invalid BVLC type: 0x{0:02X}")]
    InvalidBvlcType(u8),
    #[error("unknown function: 0x{0:02X}")]
    UnknownFunction(u8),
    #[error("length field does not match message size")]
    LengthMismatch,
    #[error("message of {0} bytes exceeds the 16-bit length field")]
    MessageTooLong(usize),
    #[error("reserved control bits set: 0x{0:02X}")]
    ReservedControlBits(u8),
}

/// A decoded BVLC-SC message as the relay sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScMessage {
    pub function: ScFunction,
    pub origin: Option<Vmac>,
    pub destination: Option<Vmac>,
    pub payload: Bytes,
}

impl ScMessage {
    const MIN_SIZE: usize = 5;

    pub fn new(function: ScFunction, payload: Bytes) -> Self {
        Self {
            function,
            origin: None,
            destination: None,
            payload,
        }
    }

    pub fn with_destination(mut self, destination: Vmac) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn with_origin(mut self, origin: Vmac) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Relay rewrite: stamp the sending node's VMAC as origin.
    pub fn set_origin(&mut self, origin: Vmac) {
        self.origin = Some(origin);
    }

    /// Relay rewrite: remove the destination before a direct forward.
    pub fn strip_destination(&mut self) {
        self.destination = None;
    }

    fn encoded_len(&self) -> usize {
        Self::MIN_SIZE
            + if self.origin.is_some() { 6 } else { 0 }
            + if self.destination.is_some() { 6 } else { 0 }
            + self.payload.len()
    }

    /// Encode for the wire. Fails when the message (the relay rewrites can
    /// add 6 origin bytes) no longer fits the 16-bit length field.
    pub fn encode(&self) -> Result<BytesMut, ScError> {
        let length = self.encoded_len();
        if length > u16::MAX as usize {
            return Err(ScError::MessageTooLong(length));
        }
        let mut control = ScControl::empty();
        control.set(ScControl::ORIGIN_PRESENT, self.origin.is_some());
        control.set(ScControl::DESTINATION_PRESENT, self.destination.is_some());

        let mut buf = BytesMut::with_capacity(length);
        buf.put_u8(BVLC_SC_TYPE);
        buf.put_u8(self.function as u8);
        buf.put_u16(length as u16);
        buf.put_u8(control.bits());
        if let Some(origin) = self.origin {
            buf.put_slice(&origin.0);
        }
        if let Some(destination) = self.destination {
            buf.put_slice(&destination.0);
        }
        buf.put_slice(&self.payload);
        Ok(buf)
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, ScError> {
        let total = buf.len();
        if total < Self::MIN_SIZE {
            return Err(ScError::MessageTooShort);
        }

        let bvlc_type = buf.get_u8();
        if bvlc_type != BVLC_SC_TYPE {
            return Err(ScError::InvalidBvlcType(bvlc_type));
        }
        let function = ScFunction::try_from(buf.get_u8())?;
        let length = buf.get_u16() as usize;
        if length != total {
            return Err(ScError::LengthMismatch);
        }
        let control_byte = buf.get_u8();
        let control =
            ScControl::from_bits(control_byte).ok_or(ScError::ReservedControlBits(control_byte))?;

        let origin = if control.contains(ScControl::ORIGIN_PRESENT) {
            Some(Self::take_vmac(&mut buf)?)
        } else {
            None
        };
        let destination = if control.contains(ScControl::DESTINATION_PRESENT) {
            Some(Self::take_vmac(&mut buf)?)
        } else {
            None
        };

        Ok(Self {
            function,
            origin,
            destination,
            payload: buf,
        })
    }

    fn take_vmac(buf: &mut Bytes) -> Result<Vmac, ScError> {
        if buf.len() < 6 {
            return Err(ScError::MessageTooShort);
        }
        let mut vmac = [0u8; 6];
        buf.copy_to_slice(&mut vmac);
        Ok(Vmac(vmac))
    }
}
