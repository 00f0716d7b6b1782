//! Our error types for the bench instruments.

use thiserror::Error;

use crate::register::CodecError;

pub type Result<T, I> = core::result::Result<T, Error<I>>;

/// Error type shared by the Modbus/TCP client and the serial instrument drivers.
///
/// `I` is the error type of the underlying [embedded_io] stream.
#[derive(Error, Debug)]
pub enum Error<I: embedded_io::Error> {
    #[error("Transport error: {0:?}")]
    Transport(I),
    #[error("Connection closed by peer")]
    ConnectionClosed,
    #[error("Unit ID mismatch: expected {expected}, got {actual}")]
    UnitMismatch { expected: u8, actual: u8 },
    #[error("Modbus exception: function 0x{function:02X}, code {code}")]
    ProtocolException { function: u8, code: u8 },
    #[error("Truncated response: declared {declared} data bytes, received {received}")]
    TruncatedResponse { declared: usize, received: usize },
    #[error("Invalid response received")]
    InvalidResponse,
    #[error("Malformed telemetry from channel {channel}: {line:?}")]
    MalformedTelemetry { channel: char, line: String },
    #[error(
        "Channel {channel} did not converge to {target} after {polls} polls (last readback {last})"
    )]
    ConvergenceTimeout {
        channel: char,
        target: f64,
        last: f64,
        polls: u32,
    },
    #[error("Unknown channel {0}")]
    UnknownChannel(char),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("Modbus protocol error: {0}")]
    ModbusError(rmodbus::ErrorKind),
}

impl<I: embedded_io::Error> From<rmodbus::ErrorKind> for Error<I> {
    fn from(err: rmodbus::ErrorKind) -> Self {
        Error::ModbusError(err)
    }
}

impl<I: embedded_io::Error> Error<I> {
    /// Whether the stream that produced this error can no longer be trusted to be
    /// aligned on a frame boundary and should be dropped.
    pub fn is_link_fault(&self) -> bool {
        matches!(
            self,
            Error::Transport(_)
                | Error::ConnectionClosed
                | Error::UnitMismatch { .. }
                | Error::TruncatedResponse { .. }
                | Error::InvalidResponse
        )
    }
}
