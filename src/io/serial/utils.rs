// src/io/serial/utils.rs
//
// Serial line settings and their conversion to serialport crate types.

use serde::{Deserialize, Serialize};
use serialport::{DataBits, Parity as SpParity, SerialPortBuilder, StopBits};

use super::reader::SerialConfig;
use crate::io::IoError;

// ============================================================================
// Types
// ============================================================================

/// Parity setting for serial port configuration
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

impl Parity {
    /// Single-letter form used in `8N1`-style summaries.
    pub fn letter(self) -> char {
        match self {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
        }
    }
}

// ============================================================================
// Conversion Functions
// ============================================================================

pub fn to_serialport_parity(p: Parity) -> SpParity {
    match p {
        Parity::None => SpParity::None,
        Parity::Odd => SpParity::Odd,
        Parity::Even => SpParity::Even,
    }
}

/// Convert a data bits count; anything outside 5..=8 is a configuration error.
pub fn to_serialport_data_bits(bits: u8) -> Result<DataBits, IoError> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        other => Err(IoError::configuration(format!(
            "unsupported data bits: {} (expected 5-8)",
            other
        ))),
    }
}

pub fn to_serialport_stop_bits(bits: u8) -> Result<StopBits, IoError> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        other => Err(IoError::configuration(format!(
            "unsupported stop bits: {} (expected 1 or 2)",
            other
        ))),
    }
}

/// Build a port builder from the line settings. Does not touch the device.
pub fn port_builder(config: &SerialConfig) -> Result<SerialPortBuilder, IoError> {
    Ok(serialport::new(&config.port, config.baud_rate)
        .data_bits(to_serialport_data_bits(config.data_bits)?)
        .stop_bits(to_serialport_stop_bits(config.stop_bits)?)
        .parity(to_serialport_parity(config.parity))
        .timeout(config.read_timeout()))
}

// ============================================================================
// Tests
// ============================================================================
