//! BACnet Object Types and Property Model
//!
//! This module defines the object-layer vocabulary used by the commandable
//! object stores: object identifiers, the object-type and property-identifier
//! enumerations, event/reliability state, status flags and the protocol error
//! taxonomy.
//!
//! Objects are the fundamental modeling concept in BACnet. Each object is
//! identified by a 32-bit identifier combining a 10-bit object type with a
//! 22-bit instance number, and exposes its state through numbered properties.
//!
//! # Error model
//!
//! Object operations never panic on bad protocol input. Every failure is an
//! [`ObjectError`] variant that maps to a BACnet `(ErrorClass, ErrorCode)`
//! pair via [`ObjectError::class_code`], because the caller is a protocol
//! responder that must encode the error into a reply APDU.

use bitflags::bitflags;
use std::error::Error;
use std::fmt;

/// Result type for object operations
pub type Result<T> = std::result::Result<T, ObjectError>;

/// Maximum valid object instance number (22 bits)
pub const MAX_INSTANCE: u32 = 0x3FFFFF;

/// Array index meaning "the whole property value"
pub const BACNET_ARRAY_ALL: u32 = 0xFFFF_FFFF;

/// Errors that can occur with object operations.
///
/// Variants mirror the BACnet error taxonomy rather than Rust-level failure
/// modes; see [`ObjectError::class_code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectError {
    /// Object instance does not exist
    UnknownObject,
    /// Property is not supported by the object type
    UnknownProperty,
    /// Value outside the accepted range or of an unexpected type
    ValueOutOfRange,
    /// Property is read-only, or the priority level is protected
    WriteAccessDenied,
    /// Array index given for a property that is not an array
    PropertyIsNotAnArray,
    /// Array index outside the property's bounds
    InvalidArrayIndex,
    /// Encoding would overflow the reply buffer
    AbortSegmentationNotSupported,
    /// Acknowledgment timestamp is older than the recorded transition
    InvalidTimeStamp,
    /// Acknowledgment does not match a pending transition
    InvalidEventState,
    /// Object instance already exists
    DuplicateObjectId,
    /// Object name already used by another object in the device
    DuplicateName,
}

impl ObjectError {
    /// Map to the BACnet `(ErrorClass, ErrorCode)` pair carried in an
    /// error or abort APDU.
    pub fn class_code(&self) -> (ErrorClass, ErrorCode) {
        match self {
            ObjectError::UnknownObject => (ErrorClass::Object, ErrorCode::UnknownObject),
            ObjectError::UnknownProperty => (ErrorClass::Property, ErrorCode::UnknownProperty),
            ObjectError::ValueOutOfRange => (ErrorClass::Property, ErrorCode::ValueOutOfRange),
            ObjectError::WriteAccessDenied => (ErrorClass::Property, ErrorCode::WriteAccessDenied),
            ObjectError::PropertyIsNotAnArray => {
                (ErrorClass::Property, ErrorCode::PropertyIsNotAnArray)
            }
            ObjectError::InvalidArrayIndex => (ErrorClass::Property, ErrorCode::InvalidArrayIndex),
            ObjectError::AbortSegmentationNotSupported => {
                (ErrorClass::Services, ErrorCode::AbortSegmentationNotSupported)
            }
            ObjectError::InvalidTimeStamp => (ErrorClass::Services, ErrorCode::InvalidTimeStamp),
            ObjectError::InvalidEventState => (ErrorClass::Services, ErrorCode::InvalidEventState),
            ObjectError::DuplicateObjectId => (ErrorClass::Object, ErrorCode::DuplicateObjectId),
            ObjectError::DuplicateName => (ErrorClass::Property, ErrorCode::DuplicateName),
        }
    }
}

impl fmt::Display for ObjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectError::UnknownObject => write!(f, "Unknown object"),
            ObjectError::UnknownProperty => write!(f, "Unknown property"),
            ObjectError::ValueOutOfRange => write!(f, "Value out of range"),
            ObjectError::WriteAccessDenied => write!(f, "Write access denied"),
            ObjectError::PropertyIsNotAnArray => write!(f, "Property is not an array"),
            ObjectError::InvalidArrayIndex => write!(f, "Invalid array index"),
            ObjectError::AbortSegmentationNotSupported => {
                write!(f, "Abort: segmentation not supported")
            }
            ObjectError::InvalidTimeStamp => write!(f, "Invalid time stamp"),
            ObjectError::InvalidEventState => write!(f, "Invalid event state"),
            ObjectError::DuplicateObjectId => write!(f, "Duplicate object identifier"),
            ObjectError::DuplicateName => write!(f, "Duplicate object name"),
        }
    }
}

impl Error for ObjectError {}

/// BACnet error classes (clause 18)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorClass {
    Device = 0,
    Object = 1,
    Property = 2,
    Resources = 3,
    Security = 4,
    Services = 5,
    Vt = 6,
    Communication = 7,
}

/// BACnet error codes (clause 18, subset used by this stack)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    Other = 0,
    UnknownObject = 31,
    UnknownProperty = 32,
    ValueOutOfRange = 37,
    WriteAccessDenied = 40,
    InvalidArrayIndex = 42,
    DuplicateName = 48,
    DuplicateObjectId = 49,
    PropertyIsNotAnArray = 50,
    AbortSegmentationNotSupported = 54,
    InvalidEventState = 73,
    InvalidTimeStamp = 113,
}

/// Object identifier (type + instance number)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectIdentifier {
    pub object_type: ObjectType,
    pub instance: u32,
}

impl ObjectIdentifier {
    /// Create a new object identifier
    pub fn new(object_type: ObjectType, instance: u32) -> Self {
        Self {
            object_type,
            instance,
        }
    }

    /// Check if instance number is valid (0-4194302)
    pub fn is_valid(&self) -> bool {
        self.instance <= MAX_INSTANCE
    }
}

impl From<u32> for ObjectIdentifier {
    /// Convert from 32-bit object identifier.
    /// See clause 20.2.14 of the BACnet specification.
    fn from(value: u32) -> Self {
        let object_type = ((value >> 22) & 0x3FF) as u16;
        let instance = value & MAX_INSTANCE;
        Self::new(object_type.into(), instance)
    }
}

impl From<ObjectIdentifier> for u32 {
    /// Convert to 32-bit object identifier.
    /// See clause 20.2.14 of the BACnet specification.
    fn from(value: ObjectIdentifier) -> Self {
        let object_type: u16 = value.object_type.into();
        ((object_type as u32) << 22) | (value.instance & MAX_INSTANCE)
    }
}

/// BACnet object types (subset carried by this stack)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    AnalogInput,
    AnalogOutput,
    AnalogValue,
    Device,
    NotificationClass,
    /// Vendor or unsupported object type
    Other(u16),
}

impl From<u16> for ObjectType {
    fn from(value: u16) -> Self {
        match value {
            0 => ObjectType::AnalogInput,
            1 => ObjectType::AnalogOutput,
            2 => ObjectType::AnalogValue,
            8 => ObjectType::Device,
            15 => ObjectType::NotificationClass,
            other => ObjectType::Other(other),
        }
    }
}

impl From<ObjectType> for u16 {
    fn from(value: ObjectType) -> Self {
        match value {
            ObjectType::AnalogInput => 0,
            ObjectType::AnalogOutput => 1,
            ObjectType::AnalogValue => 2,
            ObjectType::Device => 8,
            ObjectType::NotificationClass => 15,
            ObjectType::Other(other) => other,
        }
    }
}

/// BACnet property identifiers (subset carried by this stack)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PropertyIdentifier {
    AckedTransitions = 0,
    NotificationClass = 17,
    CovIncrement = 22,
    Deadband = 25,
    Description = 28,
    EventEnable = 35,
    EventState = 36,
    HighLimit = 45,
    LimitEnable = 52,
    LowLimit = 59,
    MaxPresValue = 65,
    MinPresValue = 69,
    NotifyType = 72,
    ObjectIdentifier = 75,
    ObjectName = 77,
    ObjectType = 79,
    OutOfService = 81,
    PresentValue = 85,
    PriorityArray = 87,
    Reliability = 103,
    RelinquishDefault = 104,
    Resolution = 106,
    StatusFlags = 111,
    TimeDelay = 113,
    Units = 117,
    EventTimeStamps = 130,
    CurrentCommandPriority = 431,
}

impl TryFrom<u32> for PropertyIdentifier {
    type Error = ObjectError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Self::AckedTransitions),
            17 => Ok(Self::NotificationClass),
            22 => Ok(Self::CovIncrement),
            25 => Ok(Self::Deadband),
            28 => Ok(Self::Description),
            35 => Ok(Self::EventEnable),
            36 => Ok(Self::EventState),
            45 => Ok(Self::HighLimit),
            52 => Ok(Self::LimitEnable),
            59 => Ok(Self::LowLimit),
            65 => Ok(Self::MaxPresValue),
            69 => Ok(Self::MinPresValue),
            72 => Ok(Self::NotifyType),
            75 => Ok(Self::ObjectIdentifier),
            77 => Ok(Self::ObjectName),
            79 => Ok(Self::ObjectType),
            81 => Ok(Self::OutOfService),
            85 => Ok(Self::PresentValue),
            87 => Ok(Self::PriorityArray),
            103 => Ok(Self::Reliability),
            104 => Ok(Self::RelinquishDefault),
            106 => Ok(Self::Resolution),
            111 => Ok(Self::StatusFlags),
            113 => Ok(Self::TimeDelay),
            117 => Ok(Self::Units),
            130 => Ok(Self::EventTimeStamps),
            431 => Ok(Self::CurrentCommandPriority),
            _ => Err(ObjectError::UnknownProperty),
        }
    }
}

/// Event state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum EventState {
    Normal = 0,
    Fault = 1,
    Offnormal = 2,
    HighLimit = 3,
    LowLimit = 4,
}

/// Reliability enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Reliability {
    NoFaultDetected = 0,
    NoSensor = 1,
    OverRange = 2,
    UnderRange = 3,
    OpenLoop = 4,
    ShortedLoop = 5,
    NoOutput = 6,
    UnreliableOther = 7,
}

bitflags! {
    /// Object status flags, encoded as a 4-bit BACnet bit string in the
    /// fixed order in-alarm, fault, overridden, out-of-service.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct StatusFlags: u8 {
        const IN_ALARM = 1 << 0;
        const FAULT = 1 << 1;
        const OVERRIDDEN = 1 << 2;
        const OUT_OF_SERVICE = 1 << 3;
    }
}

impl StatusFlags {
    /// Bit-string order required by the protocol encoding.
    pub fn to_bits_vec(self) -> [bool; 4] {
        [
            self.contains(StatusFlags::IN_ALARM),
            self.contains(StatusFlags::FAULT),
            self.contains(StatusFlags::OVERRIDDEN),
            self.contains(StatusFlags::OUT_OF_SERVICE),
        ]
    }
}

/// Engineering Units enumeration (subset)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum EngineeringUnits {
    Amperes = 2,
    Volts = 5,
    Watts = 47,
    Kilowatts = 48,
    Pascals = 53,
    DegreesCelsius = 62,
    NoUnits = 95,
    Percent = 98,
}

/// Device-wide hooks the object stores call on mutating lifecycle events.
///
/// The containing device owns the database revision counter and the
/// cross-type object-name registry; the stores only see this narrow seam.
pub trait DatabaseHooks {
    /// Bump the device database revision (client cache invalidation).
    fn increment_revision(&self);

    /// True if `name` is already used by any object of any type.
    fn name_in_use(&self, name: &str) -> bool;
}

/// No-op hooks for stores running without a device container (tests).
#[derive(Debug, Clone, Copy, Default)]
pub struct NullHooks;

impl DatabaseHooks for NullHooks {
    fn increment_revision(&self) {}

    fn name_in_use(&self, _name: &str) -> bool {
        false
    }
}

pub mod analog;
pub mod commandable;
pub mod event;
pub mod properties;

pub use analog::{AnalogOutputStore, AnalogValueStore};
pub use commandable::{limit_value_by_resolution, CommandablePoint, CommandableStore, WriteNotify};
pub use event::{
    AckedTransitions, AlarmAck, EventEnable, EventNotification, LimitEnable, NotificationSink,
    TransitionKind,
};
pub use properties::{ReadPropertyRequest, WritePropertyRequest};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_roundtrip() {
        let id = ObjectIdentifier::new(ObjectType::AnalogOutput, 42);
        let raw: u32 = id.into();
        assert_eq!(raw, (1 << 22) | 42);
        assert_eq!(ObjectIdentifier::from(raw), id);
        assert!(id.is_valid());
    }

    #[test]
    fn test_unknown_object_type_preserved() {
        let id = ObjectIdentifier::from((999u32 << 22) | 7);
        assert_eq!(id.object_type, ObjectType::Other(999));
        assert_eq!(u16::from(id.object_type), 999);
    }

    #[test]
    fn test_error_class_code_pairs() {
        assert_eq!(
            ObjectError::UnknownObject.class_code(),
            (ErrorClass::Object, ErrorCode::UnknownObject)
        );
        assert_eq!(
            ObjectError::WriteAccessDenied.class_code(),
            (ErrorClass::Property, ErrorCode::WriteAccessDenied)
        );
        assert_eq!(
            ObjectError::AbortSegmentationNotSupported.class_code(),
            (ErrorClass::Services, ErrorCode::AbortSegmentationNotSupported)
        );
    }

    #[test]
    fn test_status_flags_order() {
        let flags = StatusFlags::FAULT | StatusFlags::OUT_OF_SERVICE;
        assert_eq!(flags.to_bits_vec(), [false, true, false, true]);
    }

    #[test]
    fn test_property_identifier_conversion() {
        assert_eq!(
            PropertyIdentifier::try_from(87).unwrap(),
            PropertyIdentifier::PriorityArray
        );
        assert_eq!(
            PropertyIdentifier::try_from(4096).unwrap_err(),
            ObjectError::UnknownProperty
        );
    }
}
