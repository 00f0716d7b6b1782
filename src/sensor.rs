//! CH2O concentration sensor polled over Modbus/TCP.
//!
//! The reader never fails: a missing link or a bad frame is logged and reported as `NaN`,
//! so the acquisition loop keeps producing rows while the sensor is away.

use log::{error, info, warn};

use crate::{
    config::SensorConfig,
    error::Error,
    io::Connect,
    modbus::ModbusTcpClient,
    register::{self, normalize_address},
};

type StreamError<C> = <<C as Connect>::Stream as embedded_io::ErrorType>::Error;

/// Owns the connection to the sensor. The connection is opened on first use and
/// reopened on the next read after it was dropped.
pub struct SensorReader<C: Connect> {
    connector: C,
    client: Option<ModbusTcpClient<C::Stream>>,
    config: SensorConfig,
}

impl<C: Connect> SensorReader<C> {
    pub fn new(connector: C, config: SensorConfig) -> Self {
        Self {
            connector,
            client: None,
            config,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    /// Open the connection unless one is already up. Returns whether a connection is available.
    pub fn connect(&mut self) -> bool {
        if self.client.is_some() {
            return true;
        }
        match self.connector.connect() {
            Ok(stream) => {
                info!("Connected to CH2O sensor at {}", self.connector.peer());
                self.client = Some(ModbusTcpClient::new(stream));
                true
            }
            Err(err) => {
                warn!(
                    "Could not connect to CH2O sensor at {}: {:?}",
                    self.connector.peer(),
                    err
                );
                false
            }
        }
    }

    /// Drop the connection, if any.
    pub fn close(&mut self) {
        if self.client.take().is_some() {
            info!("Closed connection to CH2O sensor at {}", self.connector.peer());
        }
    }

    /// Read the current concentration, or `NaN` when no value could be obtained.
    pub fn read_concentration(&mut self) -> f64 {
        if !self.connect() {
            return f64::NAN;
        }

        match self.try_read() {
            Ok(value) => value,
            Err(err) => {
                match &err {
                    Error::Codec(_) => error!("CH2O sensor reading could not be decoded: {err}"),
                    Error::ProtocolException { .. } => warn!("CH2O sensor rejected read: {err}"),
                    _ => warn!("CH2O sensor read failed: {err}"),
                }
                if err.is_link_fault() {
                    warn!("Dropping connection to CH2O sensor, will reconnect on next read");
                    self.client = None;
                }
                f64::NAN
            }
        }
    }

    fn try_read(&mut self) -> Result<f64, Error<StreamError<C>>> {
        let config = &self.config;
        let client = self.client.as_mut().ok_or(Error::ConnectionClosed)?;

        let start = normalize_address(config.register_address, config.register_space);
        let count = config.data_type.register_count() as u16;
        let registers =
            client.read_registers(config.unit_id, start, count, config.register_space)?;

        Ok(register::decode(
            &registers,
            config.data_type,
            config.byte_order,
            config.word_order,
            config.scale,
        )?)
    }
}
