//! BACnet Encoding/Decoding Module
//!
//! Application-tagged primitive encoding per ASHRAE 135 clause 20.2. The
//! property layer drives these through per-type encode/decode pairs over a
//! plain `Vec<u8>`; tags, lengths and value octets follow the standard's
//! initial-octet scheme (extended lengths 254/255 for long values).

use std::error::Error;
use std::fmt;

/// Result type for encoding operations
pub type Result<T> = std::result::Result<T, EncodingError>;

/// Errors that can occur during encoding/decoding operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    /// Buffer underflow during decoding
    BufferUnderflow,
    /// Invalid tag number encountered
    InvalidTag,
    /// Invalid length value
    InvalidLength,
    /// Invalid encoding format
    InvalidFormat(String),
}

impl fmt::Display for EncodingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodingError::BufferUnderflow => write!(f, "Buffer underflow during decoding"),
            EncodingError::InvalidTag => write!(f, "Invalid tag number encountered"),
            EncodingError::InvalidLength => write!(f, "Invalid length value"),
            EncodingError::InvalidFormat(msg) => write!(f, "Invalid format: {}", msg),
        }
    }
}

impl Error for EncodingError {}

/// BACnet application tag numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ApplicationTag {
    Null = 0,
    Boolean = 1,
    UnsignedInt = 2,
    SignedInt = 3,
    Real = 4,
    Double = 5,
    OctetString = 6,
    CharacterString = 7,
    BitString = 8,
    Enumerated = 9,
    Date = 10,
    Time = 11,
    ObjectIdentifier = 12,
}

impl TryFrom<u8> for ApplicationTag {
    type Error = EncodingError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(ApplicationTag::Null),
            1 => Ok(ApplicationTag::Boolean),
            2 => Ok(ApplicationTag::UnsignedInt),
            3 => Ok(ApplicationTag::SignedInt),
            4 => Ok(ApplicationTag::Real),
            5 => Ok(ApplicationTag::Double),
            6 => Ok(ApplicationTag::OctetString),
            7 => Ok(ApplicationTag::CharacterString),
            8 => Ok(ApplicationTag::BitString),
            9 => Ok(ApplicationTag::Enumerated),
            10 => Ok(ApplicationTag::Date),
            11 => Ok(ApplicationTag::Time),
            12 => Ok(ApplicationTag::ObjectIdentifier),
            _ => Err(EncodingError::InvalidTag),
        }
    }
}

/// Encode a BACnet application tag
pub fn encode_application_tag(
    buffer: &mut Vec<u8>,
    tag: ApplicationTag,
    length: usize,
) -> Result<()> {
    let tag_byte = if length < 5 {
        (tag as u8) << 4 | (length as u8)
    } else {
        (tag as u8) << 4 | 5
    };

    buffer.push(tag_byte);

    if length >= 5 {
        if length < 254 {
            buffer.push(length as u8);
        } else if length < 65536 {
            buffer.push(254);
            buffer.extend_from_slice(&(length as u16).to_be_bytes());
        } else {
            buffer.push(255);
            buffer.extend_from_slice(&(length as u32).to_be_bytes());
        }
    }

    Ok(())
}

/// Decode a BACnet application tag, returning (tag, value length, consumed)
pub fn decode_application_tag(data: &[u8]) -> Result<(ApplicationTag, usize, usize)> {
    if data.is_empty() {
        return Err(EncodingError::BufferUnderflow);
    }

    let tag_byte = data[0];
    let tag = ApplicationTag::try_from(tag_byte >> 4)?;
    let mut length = (tag_byte & 0x0F) as usize;
    let mut consumed = 1;

    if length == 5 {
        if data.len() < 2 {
            return Err(EncodingError::BufferUnderflow);
        }

        let len_byte = data[1];
        consumed += 1;

        if len_byte < 254 {
            length = len_byte as usize;
        } else if len_byte == 254 {
            if data.len() < 4 {
                return Err(EncodingError::BufferUnderflow);
            }
            length = u16::from_be_bytes([data[2], data[3]]) as usize;
            consumed += 2;
        } else {
            if data.len() < 6 {
                return Err(EncodingError::BufferUnderflow);
            }
            length = u32::from_be_bytes([data[2], data[3], data[4], data[5]]) as usize;
            consumed += 4;
        }
    }

    Ok((tag, length, consumed))
}

/// Encode a BACnet Null value
pub fn encode_null(buffer: &mut Vec<u8>) -> Result<()> {
    encode_application_tag(buffer, ApplicationTag::Null, 0)
}

/// Decode a BACnet Null value
pub fn decode_null(data: &[u8]) -> Result<usize> {
    let (tag, length, consumed) = decode_application_tag(data)?;

    if tag != ApplicationTag::Null {
        return Err(EncodingError::InvalidTag);
    }
    if length != 0 {
        return Err(EncodingError::InvalidLength);
    }

    Ok(consumed)
}

/// Encode a BACnet boolean value
pub fn encode_boolean(buffer: &mut Vec<u8>, value: bool) -> Result<()> {
    encode_application_tag(buffer, ApplicationTag::Boolean, if value { 1 } else { 0 })
}

/// Decode a BACnet boolean value
pub fn decode_boolean(data: &[u8]) -> Result<(bool, usize)> {
    let (tag, length, consumed) = decode_application_tag(data)?;

    if tag != ApplicationTag::Boolean {
        return Err(EncodingError::InvalidTag);
    }

    let value = match length {
        0 => false,
        1 => true,
        _ => return Err(EncodingError::InvalidLength),
    };

    Ok((value, consumed))
}

fn unsigned_bytes(value: u32) -> Vec<u8> {
    if value == 0 {
        vec![0]
    } else if value <= 0xFF {
        vec![value as u8]
    } else if value <= 0xFFFF {
        (value as u16).to_be_bytes().to_vec()
    } else if value <= 0xFF_FFFF {
        value.to_be_bytes()[1..].to_vec()
    } else {
        value.to_be_bytes().to_vec()
    }
}

fn unsigned_value(data: &[u8], offset: usize, length: usize) -> Result<u32> {
    if data.len() < offset + length {
        return Err(EncodingError::BufferUnderflow);
    }
    let value = match length {
        1 => data[offset] as u32,
        2 => u16::from_be_bytes([data[offset], data[offset + 1]]) as u32,
        3 => u32::from_be_bytes([0, data[offset], data[offset + 1], data[offset + 2]]),
        4 => u32::from_be_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]),
        _ => return Err(EncodingError::InvalidLength),
    };
    Ok(value)
}

/// Encode a BACnet unsigned integer
pub fn encode_unsigned(buffer: &mut Vec<u8>, value: u32) -> Result<()> {
    let bytes = unsigned_bytes(value);
    encode_application_tag(buffer, ApplicationTag::UnsignedInt, bytes.len())?;
    buffer.extend_from_slice(&bytes);
    Ok(())
}

/// Decode a BACnet unsigned integer
pub fn decode_unsigned(data: &[u8]) -> Result<(u32, usize)> {
    let (tag, length, consumed) = decode_application_tag(data)?;

    if tag != ApplicationTag::UnsignedInt {
        return Err(EncodingError::InvalidTag);
    }

    let value = unsigned_value(data, consumed, length)?;
    Ok((value, consumed + length))
}

/// Encode a BACnet Real (IEEE-754 single precision)
pub fn encode_real(buffer: &mut Vec<u8>, value: f32) -> Result<()> {
    encode_application_tag(buffer, ApplicationTag::Real, 4)?;
    buffer.extend_from_slice(&value.to_be_bytes());
    Ok(())
}

/// Decode a BACnet Real value
pub fn decode_real(data: &[u8]) -> Result<(f32, usize)> {
    let (tag, length, consumed) = decode_application_tag(data)?;

    if tag != ApplicationTag::Real {
        return Err(EncodingError::InvalidTag);
    }
    if length != 4 {
        return Err(EncodingError::InvalidLength);
    }
    if data.len() < consumed + 4 {
        return Err(EncodingError::BufferUnderflow);
    }

    let value = f32::from_be_bytes([
        data[consumed],
        data[consumed + 1],
        data[consumed + 2],
        data[consumed + 3],
    ]);
    Ok((value, consumed + 4))
}

/// Encode a BACnet enumerated value
pub fn encode_enumerated(buffer: &mut Vec<u8>, value: u32) -> Result<()> {
    let bytes = unsigned_bytes(value);
    encode_application_tag(buffer, ApplicationTag::Enumerated, bytes.len())?;
    buffer.extend_from_slice(&bytes);
    Ok(())
}

/// Decode a BACnet enumerated value
pub fn decode_enumerated(data: &[u8]) -> Result<(u32, usize)> {
    let (tag, length, consumed) = decode_application_tag(data)?;

    if tag != ApplicationTag::Enumerated {
        return Err(EncodingError::InvalidTag);
    }

    let value = unsigned_value(data, consumed, length)?;
    Ok((value, consumed + length))
}

/// Encode a BACnet character string (UTF-8, encoding octet 0)
pub fn encode_character_string(buffer: &mut Vec<u8>, value: &str) -> Result<()> {
    let bytes = value.as_bytes();
    encode_application_tag(buffer, ApplicationTag::CharacterString, bytes.len() + 1)?;
    buffer.push(0);
    buffer.extend_from_slice(bytes);
    Ok(())
}

/// Decode a BACnet character string
pub fn decode_character_string(data: &[u8]) -> Result<(String, usize)> {
    let (tag, length, consumed) = decode_application_tag(data)?;

    if tag != ApplicationTag::CharacterString {
        return Err(EncodingError::InvalidTag);
    }
    if length == 0 {
        return Err(EncodingError::InvalidLength);
    }
    if data.len() < consumed + length {
        return Err(EncodingError::BufferUnderflow);
    }
    if data[consumed] != 0 {
        return Err(EncodingError::InvalidFormat(
            "unsupported character set".to_string(),
        ));
    }

    let value = String::from_utf8(data[consumed + 1..consumed + length].to_vec())
        .map_err(|_| EncodingError::InvalidFormat("invalid UTF-8".to_string()))?;
    Ok((value, consumed + length))
}

/// Encode a BACnet bit string from individual bits, most significant first
pub fn encode_bit_string(buffer: &mut Vec<u8>, bits: &[bool]) -> Result<()> {
    let byte_count = bits.len().div_ceil(8);
    let unused = byte_count * 8 - bits.len();

    encode_application_tag(buffer, ApplicationTag::BitString, byte_count + 1)?;
    buffer.push(unused as u8);

    let mut octets = vec![0u8; byte_count];
    for (i, bit) in bits.iter().enumerate() {
        if *bit {
            octets[i / 8] |= 0x80 >> (i % 8);
        }
    }
    buffer.extend_from_slice(&octets);
    Ok(())
}

/// Decode a BACnet bit string into individual bits
pub fn decode_bit_string(data: &[u8]) -> Result<(Vec<bool>, usize)> {
    let (tag, length, consumed) = decode_application_tag(data)?;

    if tag != ApplicationTag::BitString {
        return Err(EncodingError::InvalidTag);
    }
    if length == 0 {
        return Err(EncodingError::InvalidLength);
    }
    if data.len() < consumed + length {
        return Err(EncodingError::BufferUnderflow);
    }

    let unused = data[consumed] as usize;
    let bit_count = (length - 1) * 8;
    if unused > 7 || unused > bit_count {
        return Err(EncodingError::InvalidFormat("bad unused-bit count".to_string()));
    }

    let mut bits = Vec::with_capacity(bit_count - unused);
    for i in 0..bit_count - unused {
        let octet = data[consumed + 1 + i / 8];
        bits.push(octet & (0x80 >> (i % 8)) != 0);
    }
    Ok((bits, consumed + length))
}

/// Encode a BACnet Date (year is the calendar year; 255 in any field means
/// "unspecified")
pub fn encode_date(buffer: &mut Vec<u8>, year: u16, month: u8, day: u8, weekday: u8) -> Result<()> {
    encode_application_tag(buffer, ApplicationTag::Date, 4)?;
    buffer.push(year.saturating_sub(1900).min(255) as u8);
    buffer.push(month);
    buffer.push(day);
    buffer.push(weekday);
    Ok(())
}

/// Encode a BACnet Time
pub fn encode_time(
    buffer: &mut Vec<u8>,
    hour: u8,
    minute: u8,
    second: u8,
    hundredths: u8,
) -> Result<()> {
    encode_application_tag(buffer, ApplicationTag::Time, 4)?;
    buffer.push(hour);
    buffer.push(minute);
    buffer.push(second);
    buffer.push(hundredths);
    Ok(())
}

/// Encode a BACnet object identifier
pub fn encode_object_identifier(buffer: &mut Vec<u8>, object_type: u16, instance: u32) -> Result<()> {
    if instance > 0x3F_FFFF || object_type > 0x3FF {
        return Err(EncodingError::InvalidFormat(
            "object identifier out of range".to_string(),
        ));
    }
    let value = ((object_type as u32) << 22) | instance;
    encode_application_tag(buffer, ApplicationTag::ObjectIdentifier, 4)?;
    buffer.extend_from_slice(&value.to_be_bytes());
    Ok(())
}

/// Decode a BACnet object identifier, returning ((type, instance), consumed)
pub fn decode_object_identifier(data: &[u8]) -> Result<((u16, u32), usize)> {
    let (tag, length, consumed) = decode_application_tag(data)?;

    if tag != ApplicationTag::ObjectIdentifier {
        return Err(EncodingError::InvalidTag);
    }
    if length != 4 {
        return Err(EncodingError::InvalidLength);
    }
    if data.len() < consumed + 4 {
        return Err(EncodingError::BufferUnderflow);
    }

    let value = u32::from_be_bytes([
        data[consumed],
        data[consumed + 1],
        data[consumed + 2],
        data[consumed + 3],
    ]);
    let object_type = (value >> 22) as u16;
    let instance = value & 0x3F_FFFF;
    Ok(((object_type, instance), consumed + 4))
}
