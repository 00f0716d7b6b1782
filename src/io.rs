//! Adapters exposing `std::io` streams (serial ports, TCP sockets) through [embedded_io].
//!
//! All instrument drivers in this crate are written against [embedded_io::Read] and
//! [embedded_io::Write] so they can be unit tested against a mock stream.

use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Wraps any `std::io::Read + std::io::Write` value.
pub struct StdIo<T>(pub T);

impl<T> StdIo<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

#[derive(Debug)]
pub struct IoError(pub std::io::Error);

impl core::fmt::Display for IoError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

impl From<std::io::Error> for IoError {
    fn from(err: std::io::Error) -> Self {
        IoError(err)
    }
}

impl embedded_io::Error for IoError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self.0.kind() {
            std::io::ErrorKind::NotFound => embedded_io::ErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => embedded_io::ErrorKind::PermissionDenied,
            std::io::ErrorKind::ConnectionRefused => embedded_io::ErrorKind::ConnectionRefused,
            std::io::ErrorKind::ConnectionReset => embedded_io::ErrorKind::ConnectionReset,
            std::io::ErrorKind::ConnectionAborted => embedded_io::ErrorKind::ConnectionAborted,
            std::io::ErrorKind::NotConnected => embedded_io::ErrorKind::NotConnected,
            std::io::ErrorKind::AddrInUse => embedded_io::ErrorKind::AddrInUse,
            std::io::ErrorKind::AddrNotAvailable => embedded_io::ErrorKind::AddrNotAvailable,
            std::io::ErrorKind::BrokenPipe => embedded_io::ErrorKind::BrokenPipe,
            std::io::ErrorKind::AlreadyExists => embedded_io::ErrorKind::AlreadyExists,
            std::io::ErrorKind::InvalidInput => embedded_io::ErrorKind::InvalidInput,
            std::io::ErrorKind::InvalidData => embedded_io::ErrorKind::InvalidData,
            // Serial ports and sockets with a read timeout report either of these.
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                embedded_io::ErrorKind::TimedOut
            }
            std::io::ErrorKind::Interrupted => embedded_io::ErrorKind::Interrupted,
            std::io::ErrorKind::Unsupported => embedded_io::ErrorKind::Unsupported,
            std::io::ErrorKind::OutOfMemory => embedded_io::ErrorKind::OutOfMemory,
            _ => embedded_io::ErrorKind::Other,
        }
    }
}

impl<T> embedded_io::ErrorType for StdIo<T> {
    type Error = IoError;
}

impl<T: std::io::Read> embedded_io::Read for StdIo<T> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        std::io::Read::read(&mut self.0, buf).map_err(IoError)
    }
}

impl<T: std::io::Write> embedded_io::Write for StdIo<T> {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        std::io::Write::write(&mut self.0, buf).map_err(IoError)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        std::io::Write::flush(&mut self.0).map_err(IoError)
    }
}

/// Read one `\r` or `\n` terminated line of at most `L` bytes.
///
/// A read timeout or end of stream ends the line early, like a serial readline, so a
/// silent instrument yields whatever arrived (possibly nothing) instead of an error.
pub fn read_line<S: embedded_io::Read, const L: usize>(
    interface: &mut S,
) -> crate::error::Result<String, S::Error> {
    use crate::error::Error;
    use embedded_io::Error as _;

    let mut line: heapless::Vec<u8, L> = heapless::Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match interface.read(&mut byte) {
            Ok(0) => break,
            Ok(_) => match byte[0] {
                // Leftover terminator from the previous line.
                b'\r' | b'\n' if line.is_empty() => continue,
                b'\r' | b'\n' => break,
                b => line.push(b).map_err(|_| Error::InvalidResponse)?,
            },
            Err(e) if matches!(e.kind(), embedded_io::ErrorKind::TimedOut) => break,
            Err(e) => return Err(Error::Transport(e)),
        }
    }
    Ok(String::from_utf8_lossy(&line).into_owned())
}

/// Something that can open a fresh stream to an instrument.
pub trait Connect {
    type Stream: embedded_io::Read + embedded_io::Write;

    /// Human readable description of the peer, used in log messages.
    fn peer(&self) -> String;

    fn connect(&mut self) -> Result<Self::Stream, <Self::Stream as embedded_io::ErrorType>::Error>;
}

/// Opens blocking TCP connections with a bounded connect, read and write timeout.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    host: String,
    port: u16,
    timeout: Duration,
}

impl TcpConnector {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }

    fn resolve(&self) -> std::io::Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    format!("no address found for {}", self.host),
                )
            })
    }
}

impl Connect for TcpConnector {
    type Stream = StdIo<TcpStream>;

    fn peer(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn connect(&mut self) -> Result<Self::Stream, IoError> {
        let addr = self.resolve()?;
        let stream = TcpStream::connect_timeout(&addr, self.timeout)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;
        stream.set_nodelay(true)?;
        Ok(StdIo(stream))
    }
}
