//! Minimal blocking Modbus/TCP client used to poll the CH2O sensor.
//!
//! Only one request is ever in flight: every call writes a full request frame and then
//! reads back exactly one response before returning.

use embedded_io::Error as _;
use log::debug;
use rmodbus::{ModbusProto, client::ModbusRequest};

use crate::{
    error::{Error, Result},
    register::RegisterSpace,
};

/// Transaction id, protocol id, length and unit id.
pub const MBAP_HEADER_LEN: usize = 7;

/// You can create a client using any stream which implements [embedded_io::Read] & [embedded_io::Write].
///
/// `L` bounds both the request frame and the response body buffer.
pub struct ModbusTcpClient<S: embedded_io::Read + embedded_io::Write, const L: usize = 260> {
    interface: S,
    /// Incremented before every request.
    transaction_id: u16,
}

impl<S: embedded_io::Read + embedded_io::Write, const L: usize> ModbusTcpClient<S, L> {
    pub fn new(interface: S) -> Self {
        Self {
            interface,
            transaction_id: 0,
        }
    }

    /// The id carried by the most recent request frame.
    pub fn last_transaction_id(&self) -> u16 {
        self.transaction_id
    }

    /// Give back the underlying stream.
    pub fn into_inner(self) -> S {
        self.interface
    }

    /// Read `count` registers starting at the zero based offset `start`.
    ///
    /// Either the whole register block is returned or an error, never a partial block.
    pub fn read_registers(
        &mut self,
        unit_id: u8,
        start: u16,
        count: u16,
        space: RegisterSpace,
    ) -> Result<Vec<u16>, S::Error> {
        self.transaction_id = self.transaction_id.wrapping_add(1);

        let mut frame: heapless::Vec<u8, L> = heapless::Vec::new();
        let mut req = ModbusRequest::new(unit_id, ModbusProto::TcpUdp);
        req.tr_id = self.transaction_id;
        match space {
            RegisterSpace::Input => req.generate_get_inputs(start, count, &mut frame)?,
            RegisterSpace::Holding => req.generate_get_holdings(start, count, &mut frame)?,
        }

        self.interface
            .write_all(&frame)
            .map_err(Error::Transport)?;

        let mut header = [0u8; MBAP_HEADER_LEN];
        self.recv_exact(&mut header)?;
        let response_id = u16::from_be_bytes([header[0], header[1]]);
        let length = usize::from(u16::from_be_bytes([header[4], header[5]]));
        let unit = header[6];

        if unit != unit_id {
            return Err(Error::UnitMismatch {
                expected: unit_id,
                actual: unit,
            });
        }
        if response_id != self.transaction_id {
            debug!(
                "Response transaction id {response_id} does not match request {}",
                self.transaction_id
            );
        }

        // The length field counts the unit id, which we already consumed.
        let body_len = length.checked_sub(1).ok_or(Error::InvalidResponse)?;
        if body_len > L {
            return Err(Error::InvalidResponse);
        }
        let mut body = [0u8; L];
        let body = &mut body[..body_len];
        self.recv_exact(body)?;

        let (&function, rest) = body.split_first().ok_or(Error::InvalidResponse)?;
        if function & 0x80 != 0 {
            let code = rest.first().copied().ok_or(Error::InvalidResponse)?;
            return Err(Error::ProtocolException { function, code });
        }
        if function != space.function_code() {
            return Err(Error::InvalidResponse);
        }

        let (&byte_count, data) = rest.split_first().ok_or(Error::InvalidResponse)?;
        let declared = usize::from(byte_count);
        if data.len() != declared {
            return Err(Error::TruncatedResponse {
                declared,
                received: data.len(),
            });
        }
        if declared % 2 != 0 {
            return Err(Error::InvalidResponse);
        }

        Ok(data[..declared]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect())
    }

    /// Fill `buf` completely, tolerating short reads.
    fn recv_exact(&mut self, buf: &mut [u8]) -> Result<(), S::Error> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.interface.read(&mut buf[filled..]) {
                Ok(0) => return Err(Error::ConnectionClosed),
                Ok(n) => filled += n,
                Err(e) if matches!(e.kind(), embedded_io::ErrorKind::Interrupted) => continue,
                Err(e) => return Err(Error::Transport(e)),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_stream::{MockStream, MockStreamError};

    /// Build a response frame with a correct MBAP length field.
    fn response(transaction_id: u16, unit_id: u8, pdu: &[u8]) -> Vec<u8> {
        let mut frame = Vec::new();
        frame.extend_from_slice(&transaction_id.to_be_bytes());
        frame.extend_from_slice(&[0x00, 0x00]);
        frame.extend_from_slice(&(pdu.len() as u16 + 1).to_be_bytes());
        frame.push(unit_id);
        frame.extend_from_slice(pdu);
        frame
    }

    fn client_with(data: &[u8]) -> ModbusTcpClient<MockStream> {
        let mut mock = MockStream::socket();
        mock.set_read_data(data).unwrap();
        ModbusTcpClient::new(mock)
    }

    #[test]
    fn test_read_input_registers_frame() {
        let mut client = client_with(&response(1, 0x01, &[0x04, 0x04, 0x40, 0x48, 0xF5, 0xC3]));

        let registers = client
            .read_registers(0x01, 0x0000, 2, RegisterSpace::Input)
            .unwrap();
        assert_eq!(registers, vec![0x4048, 0xF5C3]);

        let ideal_written = [
            0x00, 0x01, // Transaction id
            0x00, 0x00, // Protocol id
            0x00, 0x06, // Length
            0x01, // Unit id
            0x04, // Read input registers
            0x00, 0x00, // Start address
            0x00, 0x02, // Count
        ];
        assert_eq!(client.interface.written_data(), ideal_written.as_slice());
    }

    #[test]
    fn test_read_holding_registers_frame() {
        let mut client = client_with(&response(1, 0x11, &[0x03, 0x02, 0x01, 0xF4]));

        let registers = client
            .read_registers(0x11, 0x0010, 1, RegisterSpace::Holding)
            .unwrap();
        assert_eq!(registers, vec![500]);

        let written = client.interface.written_data();
        assert_eq!(written.len(), 12);
        assert_eq!(written[6], 0x11); // Unit id
        assert_eq!(written[7], 0x03); // Read holding registers
        assert_eq!(&written[8..10], &[0x00, 0x10]);
        assert_eq!(&written[10..12], &[0x00, 0x01]);
    }

    #[test]
    fn test_partial_reads_are_reassembled() {
        let mut client = client_with(&response(1, 0x01, &[0x04, 0x04, 0x00, 0x07, 0xFF, 0xFF]));
        client.interface.set_max_chunk(1);

        let registers = client
            .read_registers(0x01, 0, 2, RegisterSpace::Input)
            .unwrap();
        assert_eq!(registers, vec![0x0007, 0xFFFF]);
    }

    #[test]
    fn test_truncated_byte_count() {
        // Declares 4 data bytes but only carries 2.
        let mut client = client_with(&response(1, 0x01, &[0x04, 0x04, 0x40, 0x48]));

        let err = client
            .read_registers(0x01, 0, 2, RegisterSpace::Input)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::TruncatedResponse {
                declared: 4,
                received: 2
            }
        ));
    }

    #[test]
    fn test_surplus_payload_bytes() {
        // Declares 2 data bytes but carries 4.
        let mut client = client_with(&response(1, 0x01, &[0x04, 0x02, 0x00, 0x07, 0xFF, 0xFF]));

        let err = client
            .read_registers(0x01, 0, 2, RegisterSpace::Input)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::TruncatedResponse {
                declared: 2,
                received: 4
            }
        ));
    }

    #[test]
    fn test_exception_response() {
        let mut client = client_with(&response(1, 0x01, &[0x84, 0x02]));

        let err = client
            .read_registers(0x01, 0x1000, 2, RegisterSpace::Input)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ProtocolException {
                function: 0x84,
                code: 0x02
            }
        ));
        assert!(!err.is_link_fault());
    }

    #[test]
    fn test_unit_mismatch() {
        let mut client = client_with(&response(1, 0x02, &[0x04, 0x02, 0x00, 0x01]));

        let err = client
            .read_registers(0x01, 0, 1, RegisterSpace::Input)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::UnitMismatch {
                expected: 0x01,
                actual: 0x02
            }
        ));
    }

    #[test]
    fn test_wrong_function_code() {
        let mut client = client_with(&response(1, 0x01, &[0x03, 0x02, 0x00, 0x01]));

        let err = client
            .read_registers(0x01, 0, 1, RegisterSpace::Input)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidResponse));
    }

    #[test]
    fn test_zero_length_field() {
        let mut client = client_with(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x01]);

        let err = client
            .read_registers(0x01, 0, 1, RegisterSpace::Input)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidResponse));
    }

    #[test]
    fn test_connection_closed_mid_frame() {
        let full = response(1, 0x01, &[0x04, 0x04, 0x40, 0x48, 0xF5, 0xC3]);
        let mut client = client_with(&full[..9]);

        let err = client
            .read_registers(0x01, 0, 2, RegisterSpace::Input)
            .unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
        assert!(err.is_link_fault());
    }

    #[test]
    fn test_transport_error_on_write() {
        let mut client = client_with(&[]);
        client.interface.set_write_error(true);

        let err = client
            .read_registers(0x01, 0, 1, RegisterSpace::Input)
            .unwrap_err();
        assert!(matches!(err, Error::Transport(MockStreamError::SimulatedError)));
    }

    #[test]
    fn test_transaction_id_increments_and_wraps() {
        let mut data = response(0xFFFF, 0x01, &[0x04, 0x02, 0x00, 0x01]);
        data.extend(response(0x0000, 0x01, &[0x04, 0x02, 0x00, 0x02]));
        let mut client = client_with(&data);
        client.transaction_id = 0xFFFE;

        client.read_registers(0x01, 0, 1, RegisterSpace::Input).unwrap();
        assert_eq!(client.last_transaction_id(), 0xFFFF);
        let second = client.read_registers(0x01, 0, 1, RegisterSpace::Input).unwrap();
        assert_eq!(second, vec![2]);
        assert_eq!(client.last_transaction_id(), 0x0000);

        let written = client.into_inner();
        let written = written.written_data();
        assert_eq!(&written[0..2], &[0xFF, 0xFF]);
        assert_eq!(&written[12..14], &[0x00, 0x00]);
    }
}
