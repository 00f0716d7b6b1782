//! This crate runs the CH2O sensor test bench: it samples the instruments, steps the
//! mass-flow controllers through a setpoint schedule and writes one CSV row per tick.
//!
//! Instruments on the bench:
//! * CH2O concentration sensor, Modbus/TCP (input or holding registers, `uint16`,
//!   `int16` or `float32` in any byte/word order)
//! * Mass-flow controllers sharing one serial line, addressed by unit letter
//! * Source-measure unit biasing the sensor film, SCPI over serial
//!
//! The serial ports used for the MFC and SMU should be configured like so:
//! * Default baud rate: 19200
//! * Data bits: 8
//! * Stop bits: 1
//! * Parity: None
//!
//! All drivers are written against [embedded_io] streams; [io::StdIo] adapts serial
//! ports and TCP sockets.

pub mod acquisition;
pub mod config;
pub mod error;
pub mod io;
pub mod mfc;
pub mod modbus;
pub mod record;
pub mod register;
pub mod schedule;
pub mod sensor;
pub mod smu;

#[cfg(test)]
mod mock_stream;
