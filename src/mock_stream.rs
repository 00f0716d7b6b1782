//! We use this mocking module in unit tests to emulate a serial port or a TCP socket.

/// Capacity of both mock buffers.
const CAPACITY: usize = 1024;

/// Our mock type used to emulate a byte stream.
pub struct MockStream {
    /// Buffer to store data written to the mock stream
    write_buffer: heapless::Vec<u8, CAPACITY>,
    /// Buffer containing pre-configured response data to be read
    read_buffer: heapless::Vec<u8, CAPACITY>,
    /// Current position in the read buffer
    read_position: usize,
    /// Upper bound on bytes handed out per `read` call, to exercise partial reads
    max_chunk: usize,
    /// Report end of stream (`Ok(0)`) instead of a timeout once the read data is used up
    eof_when_empty: bool,
    /// Flag to simulate write errors
    should_error_on_write: bool,
    /// Flag to simulate read errors
    should_error_on_read: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockStreamError {
    /// Simulated timeout, also returned when no data is left
    Timeout,
    /// Simulated buffer overflow
    BufferOverflow,
    /// Generic simulated error for testing
    SimulatedError,
}

impl core::fmt::Display for MockStreamError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl core::error::Error for MockStreamError {}

impl embedded_io::Error for MockStreamError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            MockStreamError::Timeout => embedded_io::ErrorKind::TimedOut,
            MockStreamError::BufferOverflow => embedded_io::ErrorKind::OutOfMemory,
            MockStreamError::SimulatedError => embedded_io::ErrorKind::Other,
        }
    }
}

impl embedded_io::ErrorType for MockStream {
    type Error = MockStreamError;
}

impl embedded_io::Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        if self.should_error_on_write {
            return Err(MockStreamError::SimulatedError);
        }
        self.write_buffer
            .extend_from_slice(buf)
            .map_err(|_| MockStreamError::BufferOverflow)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        if self.should_error_on_write {
            return Err(MockStreamError::SimulatedError);
        }
        Ok(())
    }
}

impl embedded_io::Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if self.should_error_on_read {
            return Err(MockStreamError::SimulatedError);
        }

        if self.read_position >= self.read_buffer.len() {
            return if self.eof_when_empty {
                Ok(0)
            } else {
                Err(MockStreamError::Timeout)
            };
        }

        let available_bytes = self.read_buffer.len() - self.read_position;
        let bytes_to_read = buf.len().min(available_bytes).min(self.max_chunk);
        let start = self.read_position;
        buf[..bytes_to_read].copy_from_slice(&self.read_buffer[start..start + bytes_to_read]);

        self.read_position += bytes_to_read;
        Ok(bytes_to_read)
    }
}

impl MockStream {
    /// Create a new MockStream that times out when it runs dry, like a serial port.
    pub fn new() -> Self {
        Self {
            write_buffer: heapless::Vec::new(),
            read_buffer: heapless::Vec::new(),
            read_position: 0,
            max_chunk: usize::MAX,
            eof_when_empty: false,
            should_error_on_write: false,
            should_error_on_read: false,
        }
    }

    /// Create a MockStream that reports end of stream when it runs dry, like a closed socket.
    pub fn socket() -> Self {
        Self {
            eof_when_empty: true,
            ..Self::new()
        }
    }

    /// Replace the data that will be returned when read() is called
    pub fn set_read_data(&mut self, data: &[u8]) -> Result<(), MockStreamError> {
        self.read_buffer.clear();
        self.read_position = 0;
        self.push_read_data(data)
    }

    /// Append to the data that will be returned when read() is called
    pub fn push_read_data(&mut self, data: &[u8]) -> Result<(), MockStreamError> {
        self.read_buffer
            .extend_from_slice(data)
            .map_err(|_| MockStreamError::BufferOverflow)
    }

    /// Hand out at most `max_chunk` bytes per read.
    pub fn set_max_chunk(&mut self, max_chunk: usize) {
        self.max_chunk = max_chunk.max(1);
    }

    /// Get a reference to the data that was written to this mock stream
    pub fn written_data(&self) -> &[u8] {
        &self.write_buffer
    }

    /// Clear the write buffer
    pub fn clear_written_data(&mut self) {
        self.write_buffer.clear();
    }

    /// Number of bytes not yet consumed by reads.
    pub fn unread_len(&self) -> usize {
        self.read_buffer.len() - self.read_position
    }

    /// Configure whether write operations should fail with an error
    pub fn set_write_error(&mut self, should_error: bool) {
        self.should_error_on_write = should_error;
    }

    /// Configure whether read operations should fail with an error
    pub fn set_read_error(&mut self, should_error: bool) {
        self.should_error_on_read = should_error;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_io::{Read, Write};

    #[test]
    fn test_write_multiple_times() {
        let mut mock = MockStream::new();
        mock.write(b"Hello, ").unwrap();
        mock.write(b"World!").unwrap();
        assert_eq!(mock.written_data(), b"Hello, World!");

        mock.clear_written_data();
        assert!(mock.written_data().is_empty());
    }

    #[test]
    fn test_write_buffer_overflow() {
        let mut mock = MockStream::new();
        let large_data = vec![0u8; CAPACITY + 1];
        assert_eq!(
            mock.write(&large_data).unwrap_err(),
            MockStreamError::BufferOverflow
        );
    }

    #[test]
    fn test_read_in_chunks() {
        let mut mock = MockStream::new();
        mock.set_read_data(b"Hello World").unwrap();
        mock.set_max_chunk(4);

        let mut buffer = [0u8; 11];
        assert_eq!(mock.read(&mut buffer).unwrap(), 4);
        assert_eq!(&buffer[..4], b"Hell");
        assert_eq!(mock.unread_len(), 7);
    }

    #[test]
    fn test_exhausted_serial_times_out() {
        let mut mock = MockStream::new();
        mock.set_read_data(b"Hi").unwrap();

        let mut buffer = [0u8; 10];
        assert_eq!(mock.read(&mut buffer).unwrap(), 2);
        assert_eq!(mock.read(&mut buffer).unwrap_err(), MockStreamError::Timeout);
    }

    #[test]
    fn test_exhausted_socket_reports_eof() {
        let mut mock = MockStream::socket();
        mock.set_read_data(b"Hi").unwrap();
        mock.push_read_data(b"!").unwrap();

        let mut buffer = [0u8; 10];
        assert_eq!(mock.read(&mut buffer).unwrap(), 3);
        assert_eq!(mock.read(&mut buffer).unwrap(), 0);
    }

    #[test]
    fn test_error_flags_toggle() {
        let mut mock = MockStream::new();

        mock.set_write_error(true);
        assert!(mock.write(b"test").is_err());
        assert!(mock.flush().is_err());
        mock.set_write_error(false);
        assert!(mock.write(b"test").is_ok());

        mock.set_read_data(b"data").unwrap();
        mock.set_read_error(true);
        let mut buffer = [0u8; 10];
        assert_eq!(
            mock.read(&mut buffer).unwrap_err(),
            MockStreamError::SimulatedError
        );
        mock.set_read_error(false);
        assert_eq!(mock.read(&mut buffer).unwrap(), 4);
    }
}
