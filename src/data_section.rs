//! Data section encoding and decoding
//!
//! Implements the MaxMind DB data type specification used for both the
//! per-network records and the metadata block.
//!
//! # Supported Types
//!
//! - **Pointer** (1): followed transparently while decoding, never emitted
//! - **String** (2): UTF-8 text data
//! - **Double** (3): 64-bit floating point (IEEE 754)
//! - **Bytes** (4): Raw byte arrays
//! - **Uint16** (5), **Uint32** (6), **Uint64** (9), **Uint128** (10)
//! - **Map** (7): Key-value pairs (string keys)
//! - **Int32** (8): Signed 32-bit integers
//! - **Array** (11): Ordered lists of values
//! - **Bool** (14): Boolean values
//! - **Float** (15): 32-bit floating point (IEEE 754)
//!
//! # Format
//!
//! Every value starts with a control byte: 3 bits of type and 5 bits of size.
//! Types above 7 are "extended": the control byte carries type 0 and the
//! following byte holds `type - 7`. Sizes of 29 and above spill into 1-3
//! follow-on bytes.
//!
//! See: https://maxmind.github.io/MaxMind-DB/

use crate::error::{CompactError, Result};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

/// Deepest nesting of maps, arrays and pointers the decoder will follow
pub const MAX_NESTING_DEPTH: usize = 512;

/// Largest size encodable in a control byte plus three extension bytes
const MAX_ENCODED_SIZE: usize = 65_821 + 0xFF_FFFF;

const TYPE_POINTER: u8 = 1;
const TYPE_STRING: u8 = 2;
const TYPE_DOUBLE: u8 = 3;
const TYPE_BYTES: u8 = 4;
const TYPE_UINT16: u8 = 5;
const TYPE_UINT32: u8 = 6;
const TYPE_MAP: u8 = 7;
const TYPE_INT32: u8 = 8;
const TYPE_UINT64: u8 = 9;
const TYPE_UINT128: u8 = 10;
const TYPE_ARRAY: u8 = 11;
const TYPE_CONTAINER: u8 = 12;
const TYPE_END_MARKER: u8 = 13;
const TYPE_BOOL: u8 = 14;
const TYPE_FLOAT: u8 = 15;

/// Self-describing value stored in the data section
///
/// Maps are key-ordered so that a value has exactly one encoding,
/// regardless of the key order it was decoded with.
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    /// UTF-8 string
    String(String),
    /// IEEE 754 double precision float
    Double(f64),
    /// Raw byte array
    Bytes(Vec<u8>),
    /// Unsigned 16-bit integer
    Uint16(u16),
    /// Unsigned 32-bit integer
    Uint32(u32),
    /// Key-value map (string keys only)
    Map(BTreeMap<String, DataValue>),
    /// Signed 32-bit integer
    Int32(i32),
    /// Unsigned 64-bit integer
    Uint64(u64),
    /// Unsigned 128-bit integer
    Uint128(u128),
    /// Array of values
    Array(Vec<DataValue>),
    /// Boolean value
    Bool(bool),
    /// IEEE 754 single precision float
    Float(f32),
}

impl DataValue {
    /// Look up a key if this value is a map
    pub fn get(&self, key: &str) -> Option<&DataValue> {
        match self {
            DataValue::Map(map) => map.get(key),
            _ => None,
        }
    }

    /// Borrow the string payload
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DataValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the map payload
    pub fn as_map(&self) -> Option<&BTreeMap<String, DataValue>> {
        match self {
            DataValue::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Any unsigned integer variant that fits in a u64
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            DataValue::Uint16(n) => Some(n as u64),
            DataValue::Uint32(n) => Some(n as u64),
            DataValue::Uint64(n) => Some(n),
            DataValue::Uint128(n) => u64::try_from(n).ok(),
            _ => None,
        }
    }

    /// Name of the variant, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            DataValue::String(_) => "string",
            DataValue::Double(_) => "double",
            DataValue::Bytes(_) => "bytes",
            DataValue::Uint16(_) => "uint16",
            DataValue::Uint32(_) => "uint32",
            DataValue::Map(_) => "map",
            DataValue::Int32(_) => "int32",
            DataValue::Uint64(_) => "uint64",
            DataValue::Uint128(_) => "uint128",
            DataValue::Array(_) => "array",
            DataValue::Bool(_) => "bool",
            DataValue::Float(_) => "float",
        }
    }
}

impl From<&str> for DataValue {
    fn from(s: &str) -> Self {
        DataValue::String(s.to_string())
    }
}

impl From<String> for DataValue {
    fn from(s: String) -> Self {
        DataValue::String(s)
    }
}

/// Data section encoder
///
/// Builds a data section by encoding values and tracking offsets.
/// Identical encodings are stored once: re-encoding a value returns the
/// offset it was first written at.
pub struct DataEncoder {
    /// Encoded data buffer
    buffer: Vec<u8>,
    /// Map from serialized value to offset
    dedup_map: FxHashMap<Vec<u8>, u32>,
    /// Number of `encode` calls served from the dedup table
    reused: usize,
}

impl DataEncoder {
    /// Create a new encoder
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            dedup_map: FxHashMap::default(),
            reused: 0,
        }
    }

    /// Encode a value and return its offset within the data section
    pub fn encode(&mut self, value: &DataValue) -> Result<u32> {
        let temp = Self::to_bytes(value)?;

        if let Some(&offset) = self.dedup_map.get(&temp) {
            self.reused += 1;
            return Ok(offset);
        }

        let offset = u32::try_from(self.buffer.len()).map_err(|_| {
            CompactError::CapacityExceeded(format!(
                "data section grew past 4 GiB ({} bytes)",
                self.buffer.len()
            ))
        })?;
        self.buffer.extend_from_slice(&temp);
        self.dedup_map.insert(temp, offset);
        Ok(offset)
    }

    /// Canonical byte form of a single value
    pub fn to_bytes(value: &DataValue) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        Self::encode_to_buffer(value, &mut buffer)?;
        Ok(buffer)
    }

    /// Get the final encoded data section
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Get current buffer size
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    /// Number of distinct values stored
    pub fn distinct_values(&self) -> usize {
        self.dedup_map.len()
    }

    /// Number of encode calls that reused an existing offset
    pub fn reused(&self) -> usize {
        self.reused
    }

    fn encode_to_buffer(value: &DataValue, buffer: &mut Vec<u8>) -> Result<()> {
        match value {
            DataValue::String(s) => {
                Self::write_control(TYPE_STRING, s.len(), buffer)?;
                buffer.extend_from_slice(s.as_bytes());
            }
            DataValue::Double(d) => {
                Self::write_control(TYPE_DOUBLE, 8, buffer)?;
                buffer.extend_from_slice(&d.to_be_bytes());
            }
            DataValue::Bytes(b) => {
                Self::write_control(TYPE_BYTES, b.len(), buffer)?;
                buffer.extend_from_slice(b);
            }
            DataValue::Uint16(n) => Self::write_uint(TYPE_UINT16, &n.to_be_bytes(), buffer)?,
            DataValue::Uint32(n) => Self::write_uint(TYPE_UINT32, &n.to_be_bytes(), buffer)?,
            DataValue::Uint64(n) => Self::write_uint(TYPE_UINT64, &n.to_be_bytes(), buffer)?,
            DataValue::Uint128(n) => Self::write_uint(TYPE_UINT128, &n.to_be_bytes(), buffer)?,
            DataValue::Int32(n) => {
                Self::write_control(TYPE_INT32, 4, buffer)?;
                buffer.extend_from_slice(&n.to_be_bytes());
            }
            DataValue::Map(m) => {
                Self::write_control(TYPE_MAP, m.len(), buffer)?;
                // BTreeMap iterates in key order, which keeps the encoding canonical
                for (key, value) in m {
                    Self::write_control(TYPE_STRING, key.len(), buffer)?;
                    buffer.extend_from_slice(key.as_bytes());
                    Self::encode_to_buffer(value, buffer)?;
                }
            }
            DataValue::Array(a) => {
                Self::write_control(TYPE_ARRAY, a.len(), buffer)?;
                for value in a {
                    Self::encode_to_buffer(value, buffer)?;
                }
            }
            DataValue::Bool(b) => Self::write_control(TYPE_BOOL, *b as usize, buffer)?,
            DataValue::Float(f) => {
                Self::write_control(TYPE_FLOAT, 4, buffer)?;
                buffer.extend_from_slice(&f.to_be_bytes());
            }
        }
        Ok(())
    }

    /// Unsigned integers drop leading zero bytes; zero has an empty payload
    fn write_uint(type_id: u8, be_bytes: &[u8], buffer: &mut Vec<u8>) -> Result<()> {
        let first = be_bytes
            .iter()
            .position(|&b| b != 0)
            .unwrap_or(be_bytes.len());
        let payload = &be_bytes[first..];
        Self::write_control(type_id, payload.len(), buffer)?;
        buffer.extend_from_slice(payload);
        Ok(())
    }

    /// Write the control byte (plus extended type and size bytes)
    fn write_control(type_id: u8, size: usize, buffer: &mut Vec<u8>) -> Result<()> {
        if size > MAX_ENCODED_SIZE {
            return Err(CompactError::CapacityExceeded(format!(
                "value of {} bytes exceeds the largest encodable size {}",
                size, MAX_ENCODED_SIZE
            )));
        }

        if size < 29 {
            Self::push_control(type_id, size as u8, &[], buffer);
        } else if size < 285 {
            Self::push_control(type_id, 29, &[(size - 29) as u8], buffer);
        } else if size < 65_821 {
            let adjusted = (size - 285) as u16;
            Self::push_control(type_id, 30, &adjusted.to_be_bytes(), buffer);
        } else {
            let adjusted = (size - 65_821) as u32;
            Self::push_control(type_id, 31, &adjusted.to_be_bytes()[1..], buffer);
        }
        Ok(())
    }

    fn push_control(type_id: u8, size_bits: u8, extra: &[u8], buffer: &mut Vec<u8>) {
        if type_id <= TYPE_MAP {
            buffer.push((type_id << 5) | size_bits);
        } else {
            buffer.push(size_bits);
            buffer.push(type_id - 7);
        }
        buffer.extend_from_slice(extra);
    }
}

impl Default for DataEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Data section decoder
///
/// Pointers inside the buffer are resolved relative to the buffer start.
#[derive(Clone, Copy)]
pub struct DataDecoder<'a> {
    buffer: &'a [u8],
    /// Absolute position of `buffer[0]` in the file, for error reporting
    origin: usize,
}

impl<'a> DataDecoder<'a> {
    /// Create a decoder for a data section
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, origin: 0 }
    }

    /// Create a decoder whose errors report absolute file offsets
    pub fn with_origin(buffer: &'a [u8], origin: usize) -> Self {
        Self { buffer, origin }
    }

    /// Length of the underlying buffer
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// True if the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Decode a value at the given offset
    pub fn decode(&self, offset: usize) -> Result<DataValue> {
        let mut cursor = offset;
        self.decode_at(&mut cursor, 0)
    }

    /// Decode a value and return the offset just past it
    pub fn decode_with_end(&self, offset: usize) -> Result<(DataValue, usize)> {
        let mut cursor = offset;
        let value = self.decode_at(&mut cursor, 0)?;
        Ok((value, cursor))
    }

    fn error(&self, at: usize, reason: impl Into<String>) -> CompactError {
        CompactError::malformed(self.origin + at, reason)
    }

    fn take(&self, cursor: &mut usize, len: usize, what: &str) -> Result<&'a [u8]> {
        let start = *cursor;
        let end = start
            .checked_add(len)
            .filter(|&end| end <= self.buffer.len())
            .ok_or_else(|| {
                self.error(
                    start,
                    format!(
                        "{} needs {} bytes, only {} available",
                        what,
                        len,
                        self.buffer.len().saturating_sub(start)
                    ),
                )
            })?;
        *cursor = end;
        Ok(&self.buffer[start..end])
    }

    fn byte(&self, cursor: &mut usize, what: &str) -> Result<u8> {
        Ok(self.take(cursor, 1, what)?[0])
    }

    fn decode_at(&self, cursor: &mut usize, depth: usize) -> Result<DataValue> {
        if depth > MAX_NESTING_DEPTH {
            return Err(self.error(
                *cursor,
                format!("nesting deeper than {} levels", MAX_NESTING_DEPTH),
            ));
        }

        let start = *cursor;
        let ctrl = self.byte(cursor, "control byte")?;
        let mut type_id = ctrl >> 5;

        if type_id == TYPE_POINTER {
            let target = self.decode_pointer(cursor, ctrl)?;
            let mut target_cursor = target;
            return self.decode_at(&mut target_cursor, depth + 1);
        }

        if type_id == 0 {
            let ext = self.byte(cursor, "extended type byte")?;
            type_id = ext.checked_add(7).filter(|&t| t > TYPE_MAP).ok_or_else(|| {
                self.error(start, format!("invalid extended type byte {}", ext))
            })?;
        }

        let size = self.decode_size(cursor, ctrl & 0x1F)?;

        match type_id {
            TYPE_STRING => {
                let bytes = self.take(cursor, size, "string")?;
                let s = std::str::from_utf8(bytes)
                    .map_err(|e| self.error(start, format!("invalid UTF-8 in string: {}", e)))?;
                Ok(DataValue::String(s.to_string()))
            }
            TYPE_DOUBLE => {
                self.expect_size(start, "double", size, 8)?;
                let bytes = self.take(cursor, 8, "double")?;
                let mut buf = [0u8; 8];
                buf.copy_from_slice(bytes);
                Ok(DataValue::Double(f64::from_be_bytes(buf)))
            }
            TYPE_BYTES => Ok(DataValue::Bytes(self.take(cursor, size, "bytes")?.to_vec())),
            TYPE_UINT16 => Ok(DataValue::Uint16(self.read_uint(cursor, start, size, 2)? as u16)),
            TYPE_UINT32 => Ok(DataValue::Uint32(self.read_uint(cursor, start, size, 4)? as u32)),
            TYPE_MAP => {
                let mut map = BTreeMap::new();
                for _ in 0..size {
                    let key_at = *cursor;
                    let key = match self.decode_at(cursor, depth + 1)? {
                        DataValue::String(s) => s,
                        other => {
                            return Err(self.error(
                                key_at,
                                format!("map key must be a string, found {}", other.type_name()),
                            ))
                        }
                    };
                    let value = self.decode_at(cursor, depth + 1)?;
                    map.insert(key, value);
                }
                Ok(DataValue::Map(map))
            }
            TYPE_INT32 => {
                let n = self.read_uint(cursor, start, size, 4)? as u32;
                Ok(DataValue::Int32(n as i32))
            }
            TYPE_UINT64 => Ok(DataValue::Uint64(self.read_uint(cursor, start, size, 8)? as u64)),
            TYPE_UINT128 => Ok(DataValue::Uint128(self.read_uint(cursor, start, size, 16)?)),
            TYPE_ARRAY => {
                // Cap the preallocation; the size field is untrusted
                let mut array = Vec::with_capacity(size.min(1024));
                for _ in 0..size {
                    array.push(self.decode_at(cursor, depth + 1)?);
                }
                Ok(DataValue::Array(array))
            }
            TYPE_BOOL => match size {
                0 => Ok(DataValue::Bool(false)),
                1 => Ok(DataValue::Bool(true)),
                n => Err(self.error(start, format!("bool size must be 0 or 1, found {}", n))),
            },
            TYPE_FLOAT => {
                self.expect_size(start, "float", size, 4)?;
                let bytes = self.take(cursor, 4, "float")?;
                let mut buf = [0u8; 4];
                buf.copy_from_slice(bytes);
                Ok(DataValue::Float(f32::from_be_bytes(buf)))
            }
            TYPE_CONTAINER | TYPE_END_MARKER => Err(self.error(
                start,
                format!("type {} is not valid inside a record", type_id),
            )),
            other => Err(self.error(start, format!("unknown data type {}", other))),
        }
    }

    fn expect_size(&self, at: usize, what: &str, actual: usize, expected: usize) -> Result<()> {
        if actual != expected {
            return Err(self.error(
                at,
                format!("{} size must be {}, found {}", what, expected, actual),
            ));
        }
        Ok(())
    }

    /// Big-endian unsigned integer of `size` bytes, at most `max` bytes wide
    fn read_uint(&self, cursor: &mut usize, at: usize, size: usize, max: usize) -> Result<u128> {
        if size > max {
            return Err(self.error(
                at,
                format!("integer payload of {} bytes exceeds {} bytes", size, max),
            ));
        }
        let bytes = self.take(cursor, size, "integer")?;
        Ok(bytes.iter().fold(0u128, |acc, &b| (acc << 8) | b as u128))
    }

    /// Pointer target relative to the buffer start
    fn decode_pointer(&self, cursor: &mut usize, ctrl: u8) -> Result<usize> {
        let size_class = (ctrl >> 3) & 0x3;
        let high = (ctrl & 0x7) as usize;
        let at = *cursor - 1;

        let target = match size_class {
            0 => {
                let b = self.take(cursor, 1, "pointer")?;
                (high << 8) | b[0] as usize
            }
            1 => {
                let b = self.take(cursor, 2, "pointer")?;
                2048 + ((high << 16) | (b[0] as usize) << 8 | b[1] as usize)
            }
            2 => {
                let b = self.take(cursor, 3, "pointer")?;
                526_336
                    + ((high << 24)
                        | (b[0] as usize) << 16
                        | (b[1] as usize) << 8
                        | b[2] as usize)
            }
            _ => {
                let b = self.take(cursor, 4, "pointer")?;
                u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as usize
            }
        };

        if target >= self.buffer.len() {
            return Err(self.error(
                at,
                format!(
                    "pointer target {} outside data section of {} bytes",
                    target,
                    self.buffer.len()
                ),
            ));
        }
        Ok(target)
    }

    fn decode_size(&self, cursor: &mut usize, size_bits: u8) -> Result<usize> {
        match size_bits {
            0..=28 => Ok(size_bits as usize),
            29 => Ok(29 + self.byte(cursor, "size byte")? as usize),
            30 => {
                let b = self.take(cursor, 2, "size bytes")?;
                Ok(285 + u16::from_be_bytes([b[0], b[1]]) as usize)
            }
            _ => {
                let b = self.take(cursor, 3, "size bytes")?;
                Ok(65_821 + ((b[0] as usize) << 16 | (b[1] as usize) << 8 | b[2] as usize))
            }
        }
    }
}
