//! Property Codec Adapter
//!
//! Translates ReadProperty/WriteProperty requests between the typed object
//! model and application-encoded values. Every property identifier maps to
//! exactly one encode/decode routine; the array-index contract (only
//! `PriorityArray` and `EventTimeStamps` are arrays, index 0 is the array
//! length, `BACNET_ARRAY_ALL` is the whole value) is enforced symmetrically
//! on both paths.
//!
//! Errors come back as [`ObjectError`] values, never panics, because the
//! caller is a protocol responder that must encode the failure into a reply
//! APDU.

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::encoding::{
    self, decode_boolean, decode_character_string, decode_null, decode_real, decode_unsigned,
    encode_bit_string, encode_boolean, encode_character_string, encode_enumerated, encode_null,
    encode_object_identifier, encode_real, encode_unsigned,
};
use crate::object::commandable::{CommandableStore, PRIORITY_DEFAULT};
use crate::object::event::{EventEnable, LimitEnable, TransitionKind};
use crate::object::{ObjectError, PropertyIdentifier, Result, BACNET_ARRAY_ALL};
use crate::BACNET_MAX_APDU;

/// ReadProperty request (decoded service parameters)
#[derive(Debug, Clone, Copy)]
pub struct ReadPropertyRequest {
    pub object_instance: u32,
    /// Raw property identifier from the wire
    pub property_id: u32,
    /// `BACNET_ARRAY_ALL` when no index was given
    pub array_index: u32,
}

impl ReadPropertyRequest {
    pub fn new(object_instance: u32, property_id: u32) -> Self {
        Self {
            object_instance,
            property_id,
            array_index: BACNET_ARRAY_ALL,
        }
    }

    pub fn with_index(mut self, array_index: u32) -> Self {
        self.array_index = array_index;
        self
    }
}

/// WriteProperty request carrying an application-encoded value
#[derive(Debug, Clone)]
pub struct WritePropertyRequest {
    pub object_instance: u32,
    pub property_id: u32,
    pub array_index: u32,
    /// Write priority 1-16; `None` means the default (lowest) priority
    pub priority: Option<u8>,
    /// Application-encoded property value
    pub value: Vec<u8>,
}

impl WritePropertyRequest {
    pub fn new(object_instance: u32, property_id: u32, value: Vec<u8>) -> Self {
        Self {
            object_instance,
            property_id,
            array_index: BACNET_ARRAY_ALL,
            priority: None,
            value,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_index(mut self, array_index: u32) -> Self {
        self.array_index = array_index;
        self
    }
}

fn is_array_property(property: PropertyIdentifier) -> bool {
    matches!(
        property,
        PropertyIdentifier::PriorityArray | PropertyIdentifier::EventTimeStamps
    )
}

fn is_read_only(property: PropertyIdentifier) -> bool {
    matches!(
        property,
        PropertyIdentifier::ObjectIdentifier
            | PropertyIdentifier::ObjectType
            | PropertyIdentifier::StatusFlags
            | PropertyIdentifier::EventState
            | PropertyIdentifier::Reliability
            | PropertyIdentifier::PriorityArray
            | PropertyIdentifier::CurrentCommandPriority
            | PropertyIdentifier::AckedTransitions
            | PropertyIdentifier::EventTimeStamps
            | PropertyIdentifier::NotifyType
            | PropertyIdentifier::Resolution
            | PropertyIdentifier::MinPresValue
            | PropertyIdentifier::MaxPresValue
            | PropertyIdentifier::Units
    )
}

fn codec_err(_: encoding::EncodingError) -> ObjectError {
    ObjectError::ValueOutOfRange
}

fn encode_timestamp(buffer: &mut Vec<u8>, stamp: Option<DateTime<Utc>>) -> Result<()> {
    match stamp {
        Some(ts) => {
            let weekday = ts.weekday().number_from_monday() as u8;
            encoding::encode_date(
                buffer,
                ts.year().clamp(0, u16::MAX as i32) as u16,
                ts.month() as u8,
                ts.day() as u8,
                weekday,
            )
            .map_err(codec_err)?;
            encoding::encode_time(
                buffer,
                ts.hour() as u8,
                ts.minute() as u8,
                ts.second() as u8,
                (ts.timestamp_subsec_millis() / 10) as u8,
            )
            .map_err(codec_err)?;
        }
        None => encode_null(buffer).map_err(codec_err)?,
    }
    Ok(())
}

impl CommandableStore {
    /// Encode a property value into a reply buffer.
    pub fn read_property(&self, request: &ReadPropertyRequest) -> Result<Vec<u8>> {
        let property = PropertyIdentifier::try_from(request.property_id)?;
        let index = request.array_index;
        if !is_array_property(property) && index != BACNET_ARRAY_ALL {
            return Err(ObjectError::PropertyIsNotAnArray);
        }
        let point = self
            .point(request.object_instance)
            .ok_or(ObjectError::UnknownObject)?;

        let mut buffer = Vec::new();
        match property {
            PropertyIdentifier::ObjectIdentifier => {
                encode_object_identifier(
                    &mut buffer,
                    self.object_type().into(),
                    point.instance(),
                )
                .map_err(codec_err)?;
            }
            PropertyIdentifier::ObjectName => {
                encode_character_string(&mut buffer, point.object_name()).map_err(codec_err)?;
            }
            PropertyIdentifier::ObjectType => {
                let raw: u16 = self.object_type().into();
                encode_enumerated(&mut buffer, raw as u32).map_err(codec_err)?;
            }
            PropertyIdentifier::Description => {
                encode_character_string(&mut buffer, &point.description).map_err(codec_err)?;
            }
            PropertyIdentifier::PresentValue => {
                encode_real(&mut buffer, point.present_value()).map_err(codec_err)?;
            }
            PropertyIdentifier::StatusFlags => {
                encode_bit_string(&mut buffer, &point.status_flags().to_bits_vec())
                    .map_err(codec_err)?;
            }
            PropertyIdentifier::EventState => {
                encode_enumerated(&mut buffer, point.event_state as u32).map_err(codec_err)?;
            }
            PropertyIdentifier::Reliability => {
                encode_enumerated(&mut buffer, point.reliability as u32).map_err(codec_err)?;
            }
            PropertyIdentifier::OutOfService => {
                encode_boolean(&mut buffer, point.out_of_service).map_err(codec_err)?;
            }
            PropertyIdentifier::Units => {
                encode_enumerated(&mut buffer, point.units as u32).map_err(codec_err)?;
            }
            PropertyIdentifier::RelinquishDefault => {
                encode_real(&mut buffer, point.relinquish_default).map_err(codec_err)?;
            }
            PropertyIdentifier::MinPresValue => {
                encode_real(&mut buffer, point.min_pres_value).map_err(codec_err)?;
            }
            PropertyIdentifier::MaxPresValue => {
                encode_real(&mut buffer, point.max_pres_value).map_err(codec_err)?;
            }
            PropertyIdentifier::Resolution => {
                encode_real(&mut buffer, point.resolution).map_err(codec_err)?;
            }
            PropertyIdentifier::CovIncrement => {
                encode_real(&mut buffer, point.cov_increment).map_err(codec_err)?;
            }
            PropertyIdentifier::CurrentCommandPriority => match point.current_command_priority() {
                Some(priority) => {
                    encode_unsigned(&mut buffer, priority as u32).map_err(codec_err)?
                }
                None => encode_null(&mut buffer).map_err(codec_err)?,
            },
            PropertyIdentifier::PriorityArray => match index {
                0 => encode_unsigned(&mut buffer, 16).map_err(codec_err)?,
                BACNET_ARRAY_ALL => {
                    for priority in 1..=16 {
                        match point.priority_slot(priority) {
                            Some(value) => encode_real(&mut buffer, value).map_err(codec_err)?,
                            None => encode_null(&mut buffer).map_err(codec_err)?,
                        }
                    }
                }
                1..=16 => match point.priority_slot(index as u8) {
                    Some(value) => encode_real(&mut buffer, value).map_err(codec_err)?,
                    None => encode_null(&mut buffer).map_err(codec_err)?,
                },
                _ => return Err(ObjectError::InvalidArrayIndex),
            },
            PropertyIdentifier::NotifyType => {
                // notify-type alarm
                point.event.as_ref().ok_or(ObjectError::UnknownProperty)?;
                encode_enumerated(&mut buffer, 0).map_err(codec_err)?;
            }
            PropertyIdentifier::TimeDelay => {
                let ev = point.event.as_ref().ok_or(ObjectError::UnknownProperty)?;
                encode_unsigned(&mut buffer, ev.time_delay).map_err(codec_err)?;
            }
            PropertyIdentifier::NotificationClass => {
                let ev = point.event.as_ref().ok_or(ObjectError::UnknownProperty)?;
                encode_unsigned(&mut buffer, ev.notification_class).map_err(codec_err)?;
            }
            PropertyIdentifier::HighLimit => {
                let ev = point.event.as_ref().ok_or(ObjectError::UnknownProperty)?;
                encode_real(&mut buffer, ev.high_limit).map_err(codec_err)?;
            }
            PropertyIdentifier::LowLimit => {
                let ev = point.event.as_ref().ok_or(ObjectError::UnknownProperty)?;
                encode_real(&mut buffer, ev.low_limit).map_err(codec_err)?;
            }
            PropertyIdentifier::Deadband => {
                let ev = point.event.as_ref().ok_or(ObjectError::UnknownProperty)?;
                encode_real(&mut buffer, ev.deadband).map_err(codec_err)?;
            }
            PropertyIdentifier::LimitEnable => {
                let ev = point.event.as_ref().ok_or(ObjectError::UnknownProperty)?;
                let bits = [
                    ev.limit_enable.contains(LimitEnable::LOW_LIMIT),
                    ev.limit_enable.contains(LimitEnable::HIGH_LIMIT),
                ];
                encode_bit_string(&mut buffer, &bits).map_err(codec_err)?;
            }
            PropertyIdentifier::EventEnable => {
                let ev = point.event.as_ref().ok_or(ObjectError::UnknownProperty)?;
                let bits = [
                    ev.event_enable.contains(EventEnable::TO_OFFNORMAL),
                    ev.event_enable.contains(EventEnable::TO_FAULT),
                    ev.event_enable.contains(EventEnable::TO_NORMAL),
                ];
                encode_bit_string(&mut buffer, &bits).map_err(codec_err)?;
            }
            PropertyIdentifier::AckedTransitions => {
                let ev = point.event.as_ref().ok_or(ObjectError::UnknownProperty)?;
                let bits = [
                    ev.acked_transitions.get(TransitionKind::ToOffnormal).acked,
                    ev.acked_transitions.get(TransitionKind::ToFault).acked,
                    ev.acked_transitions.get(TransitionKind::ToNormal).acked,
                ];
                encode_bit_string(&mut buffer, &bits).map_err(codec_err)?;
            }
            PropertyIdentifier::EventTimeStamps => {
                let ev = point.event.as_ref().ok_or(ObjectError::UnknownProperty)?;
                match index {
                    0 => encode_unsigned(&mut buffer, 3).map_err(codec_err)?,
                    BACNET_ARRAY_ALL => {
                        for stamp in ev.event_time_stamps {
                            encode_timestamp(&mut buffer, stamp)?;
                        }
                    }
                    1..=3 => {
                        encode_timestamp(&mut buffer, ev.event_time_stamps[(index - 1) as usize])?
                    }
                    _ => return Err(ObjectError::InvalidArrayIndex),
                }
            }
        }

        if buffer.len() > BACNET_MAX_APDU {
            return Err(ObjectError::AbortSegmentationNotSupported);
        }
        Ok(buffer)
    }

    /// Decode and apply a property write.
    pub fn write_property(&mut self, request: &WritePropertyRequest) -> Result<()> {
        let property = PropertyIdentifier::try_from(request.property_id)?;
        // array-index contract checked symmetrically with the read path
        if !is_array_property(property) && request.array_index != BACNET_ARRAY_ALL {
            return Err(ObjectError::PropertyIsNotAnArray);
        }
        if is_read_only(property) {
            return Err(ObjectError::WriteAccessDenied);
        }
        if !self.valid_instance(request.object_instance) {
            return Err(ObjectError::UnknownObject);
        }
        let instance = request.object_instance;
        let data = request.value.as_slice();

        match property {
            PropertyIdentifier::PresentValue => {
                let priority = request.priority.unwrap_or(PRIORITY_DEFAULT);
                // REAL first, NULL fallback for relinquish
                match decode_real(data) {
                    Ok((value, _)) => self.write_present_value(instance, value, priority),
                    Err(encoding::EncodingError::InvalidTag) => {
                        decode_null(data).map_err(codec_err)?;
                        self.write_present_value_relinquish(instance, priority)
                    }
                    Err(e) => Err(codec_err(e)),
                }
            }
            PropertyIdentifier::OutOfService => {
                let (value, _) = decode_boolean(data).map_err(codec_err)?;
                if let Some(point) = self.point_mut(instance) {
                    point.out_of_service = value;
                }
                Ok(())
            }
            PropertyIdentifier::ObjectName => {
                let (name, _) = decode_character_string(data).map_err(codec_err)?;
                self.set_object_name(instance, name)
            }
            PropertyIdentifier::Description => {
                let (text, _) = decode_character_string(data).map_err(codec_err)?;
                if let Some(point) = self.point_mut(instance) {
                    point.description = text;
                }
                Ok(())
            }
            PropertyIdentifier::RelinquishDefault => {
                let (value, _) = decode_real(data).map_err(codec_err)?;
                if let Some(point) = self.point_mut(instance) {
                    point.relinquish_default = value;
                }
                Ok(())
            }
            PropertyIdentifier::CovIncrement => {
                let (value, _) = decode_real(data).map_err(codec_err)?;
                if value < 0.0 {
                    return Err(ObjectError::ValueOutOfRange);
                }
                if let Some(point) = self.point_mut(instance) {
                    point.cov_increment = value;
                }
                Ok(())
            }
            PropertyIdentifier::HighLimit => self.write_event_real(instance, data, |ev, v| {
                ev.high_limit = v;
            }),
            PropertyIdentifier::LowLimit => self.write_event_real(instance, data, |ev, v| {
                ev.low_limit = v;
            }),
            PropertyIdentifier::Deadband => self.write_event_real(instance, data, |ev, v| {
                ev.deadband = v;
            }),
            PropertyIdentifier::TimeDelay => {
                let (value, _) = decode_unsigned(data).map_err(codec_err)?;
                let point = self.point_mut(instance).ok_or(ObjectError::UnknownObject)?;
                let ev = point.event.as_mut().ok_or(ObjectError::UnknownProperty)?;
                ev.time_delay = value;
                ev.remaining_time_delay = value;
                Ok(())
            }
            PropertyIdentifier::NotificationClass => {
                let (value, _) = decode_unsigned(data).map_err(codec_err)?;
                let point = self.point_mut(instance).ok_or(ObjectError::UnknownObject)?;
                let ev = point.event.as_mut().ok_or(ObjectError::UnknownProperty)?;
                ev.notification_class = value;
                Ok(())
            }
            PropertyIdentifier::LimitEnable => {
                let (bits, _) = encoding::decode_bit_string(data).map_err(codec_err)?;
                if bits.len() != 2 {
                    return Err(ObjectError::ValueOutOfRange);
                }
                let point = self.point_mut(instance).ok_or(ObjectError::UnknownObject)?;
                let ev = point.event.as_mut().ok_or(ObjectError::UnknownProperty)?;
                let mut enable = LimitEnable::empty();
                enable.set(LimitEnable::LOW_LIMIT, bits[0]);
                enable.set(LimitEnable::HIGH_LIMIT, bits[1]);
                ev.limit_enable = enable;
                Ok(())
            }
            PropertyIdentifier::EventEnable => {
                let (bits, _) = encoding::decode_bit_string(data).map_err(codec_err)?;
                if bits.len() != 3 {
                    return Err(ObjectError::ValueOutOfRange);
                }
                let point = self.point_mut(instance).ok_or(ObjectError::UnknownObject)?;
                let ev = point.event.as_mut().ok_or(ObjectError::UnknownProperty)?;
                let mut enable = EventEnable::empty();
                enable.set(EventEnable::TO_OFFNORMAL, bits[0]);
                enable.set(EventEnable::TO_FAULT, bits[1]);
                enable.set(EventEnable::TO_NORMAL, bits[2]);
                ev.event_enable = enable;
                Ok(())
            }
            // read-only identifiers are rejected above
            _ => Err(ObjectError::WriteAccessDenied),
        }
    }

    fn write_event_real(
        &mut self,
        instance: u32,
        data: &[u8],
        apply: impl FnOnce(&mut crate::object::event::IntrinsicReporting, f32),
    ) -> Result<()> {
        let (value, _) = decode_real(data).map_err(codec_err)?;
        let point = self.point_mut(instance).ok_or(ObjectError::UnknownObject)?;
        let ev = point.event.as_mut().ok_or(ObjectError::UnknownProperty)?;
        apply(ev, value);
        Ok(())
    }
}
