//! Register addressing and numeric decoding for the CH2O sensor.
//!
//! The sensor exposes its reading as one or two 16-bit registers. How those registers
//! combine into a number depends on the configured [DataType], [ByteOrder] and [WordOrder].

use core::str::FromStr;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};
use thiserror::Error;

/// Conventional absolute address of the first input register.
pub const INPUT_REGISTER_BASE: u16 = 30001;
/// Conventional absolute address of the first holding register.
pub const HOLDING_REGISTER_BASE: u16 = 40001;

/// Errors raised while turning registers into a reading.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Unsupported data type {0:?}")]
    UnsupportedType(String),
    #[error("{data_type} needs {needed} register(s), got {got}")]
    InsufficientData {
        data_type: DataType,
        needed: usize,
        got: usize,
    },
}

/// Which register table a read targets.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Display, EnumString, EnumIter, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum RegisterSpace {
    /// Read-only input registers, function code `0x04`.
    Input,
    /// Holding registers, function code `0x03`.
    Holding,
}

impl RegisterSpace {
    pub fn function_code(self) -> u8 {
        match self {
            RegisterSpace::Input => 0x04,
            RegisterSpace::Holding => 0x03,
        }
    }

    /// The absolute address that maps onto offset `0` in this space.
    pub fn base_address(self) -> u16 {
        match self {
            RegisterSpace::Input => INPUT_REGISTER_BASE,
            RegisterSpace::Holding => HOLDING_REGISTER_BASE,
        }
    }
}

/// Numeric layout of the value held in the sensor registers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Display, EnumString, EnumIter, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum DataType {
    Uint16,
    Int16,
    /// IEEE-754 single precision spread across two registers.
    Float32,
}

impl DataType {
    /// Parse a type name as found in configuration.
    pub fn parse(name: &str) -> Result<Self, CodecError> {
        DataType::from_str(name.trim()).map_err(|_| CodecError::UnsupportedType(name.to_owned()))
    }

    /// Number of registers a value of this type occupies.
    pub fn register_count(self) -> usize {
        match self {
            DataType::Float32 => 2,
            DataType::Uint16 | DataType::Int16 => 1,
        }
    }
}

impl TryFrom<String> for DataType {
    type Error = CodecError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        DataType::parse(&value)
    }
}

/// Order of the two bytes inside each register.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Display, EnumString, EnumIter, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    Big,
    Little,
}

/// Order of the registers inside a multi-register value.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Display, EnumString, EnumIter, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum WordOrder {
    Big,
    Little,
}

/// Convert a conventional absolute address (`30001`, `40001`, ...) into a zero based
/// protocol offset. Addresses already below the base are returned unchanged.
pub fn normalize_address(address: u16, space: RegisterSpace) -> u16 {
    let base = space.base_address();
    if address >= base {
        address - base
    } else {
        address
    }
}

/// Decode a reading from raw registers.
///
/// Integer types are divided by `scale` unless it is zero. Float values are returned as-is.
pub fn decode(
    registers: &[u16],
    data_type: DataType,
    byte_order: ByteOrder,
    word_order: WordOrder,
    scale: f64,
) -> Result<f64, CodecError> {
    let needed = data_type.register_count();
    if registers.len() < needed {
        return Err(CodecError::InsufficientData {
            data_type,
            needed,
            got: registers.len(),
        });
    }

    match data_type {
        DataType::Uint16 => Ok(apply_scale(f64::from(registers[0]), scale)),
        DataType::Int16 => Ok(apply_scale(f64::from(registers[0] as i16), scale)),
        DataType::Float32 => {
            let words = match word_order {
                WordOrder::Big => [registers[0], registers[1]],
                WordOrder::Little => [registers[1], registers[0]],
            };
            let mut bytes = [0u8; 4];
            for (chunk, word) in bytes.chunks_exact_mut(2).zip(words) {
                let [hi, lo] = word.to_be_bytes();
                match byte_order {
                    ByteOrder::Big => chunk.copy_from_slice(&[hi, lo]),
                    ByteOrder::Little => chunk.copy_from_slice(&[lo, hi]),
                }
            }
            Ok(f64::from(f32::from_be_bytes(bytes)))
        }
    }
}

/// Lay out a float the way a device using the given orders would present it.
///
/// This is the inverse of [decode] for [DataType::Float32].
pub fn encode_f32(value: f32, byte_order: ByteOrder, word_order: WordOrder) -> [u16; 2] {
    let bytes = value.to_be_bytes();
    let mut words = [0u16; 2];
    for (word, pair) in words.iter_mut().zip(bytes.chunks_exact(2)) {
        *word = match byte_order {
            ByteOrder::Big => u16::from_be_bytes([pair[0], pair[1]]),
            ByteOrder::Little => u16::from_be_bytes([pair[1], pair[0]]),
        };
    }
    match word_order {
        WordOrder::Big => words,
        WordOrder::Little => [words[1], words[0]],
    }
}

fn apply_scale(value: f64, scale: f64) -> f64 {
    if scale != 0.0 { value / scale } else { value }
}
