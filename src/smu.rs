//! Source-measure unit biasing the sensor film and reporting its resistance.
//!
//! The instrument speaks newline terminated SCPI. It sources a fixed voltage with a
//! current compliance limit and answers `:READ?` with a comma separated measurement.

use log::{info, warn};

use crate::{
    error::{Error, Result},
    io::read_line,
};

/// You can create a SourceMeter using any interface which implements [embedded_io::Read] & [embedded_io::Write].
///
/// `L` bounds the length of a measurement reply.
pub struct SourceMeter<S: embedded_io::Read + embedded_io::Write, const L: usize = 256> {
    interface: S,
}

impl<S: embedded_io::Read + embedded_io::Write, const L: usize> SourceMeter<S, L> {
    pub fn new(interface: S) -> Self {
        Self { interface }
    }

    pub fn into_inner(self) -> S {
        self.interface
    }

    fn send(&mut self, command: &str) -> Result<(), S::Error> {
        self.interface
            .write_all(command.as_bytes())
            .map_err(Error::Transport)?;
        self.interface.write_all(b"\n").map_err(Error::Transport)?;
        self.interface.flush().map_err(Error::Transport)
    }

    /// Reset the instrument, source `voltage` volts with a `compliance` amp limit and
    /// turn the output on.
    pub fn initialize(&mut self, compliance: f64, voltage: f64) -> Result<(), S::Error> {
        self.send("*WAI")?;
        self.send("*RST")?;
        self.send(":SENS:FUNC:CONC OFF")?;
        self.send(":SOUR:FUNC VOLT")?;
        self.send(":SENS:FUNC 'CURR'")?;
        self.send(&format!(":SENS:CURR:PROT {compliance}"))?;
        self.send(&format!(":SOUR:VOLT:LEV {voltage}"))?;
        self.send(":OUTP ON")?;
        info!("SMU sourcing {voltage} V with {compliance} A compliance");
        Ok(())
    }

    /// Trigger one measurement and return the raw reply line.
    pub fn measure(&mut self) -> Result<String, S::Error> {
        self.send(":READ?")?;
        read_line::<_, L>(&mut self.interface)
    }

    /// Resistance from one measurement, or `NaN` when none could be obtained.
    pub fn read_resistance(&mut self) -> f64 {
        match self.measure() {
            Ok(reply) => parse_resistance(&reply).unwrap_or_else(|| {
                warn!("Unusable SMU reply {reply:?}");
                f64::NAN
            }),
            Err(err) => {
                warn!("SMU read failed: {err}");
                f64::NAN
            }
        }
    }

    /// Turn the source output off.
    pub fn output_off(&mut self) -> Result<(), S::Error> {
        self.send(":OUTP OFF")
    }
}

/// First reply field divided by the second. Needs at least two numeric fields.
pub fn parse_resistance(reply: &str) -> Option<f64> {
    let mut fields = reply.trim().split(',');
    let first: f64 = fields.next()?.trim().parse().ok()?;
    let second: f64 = fields.next()?.trim().parse().ok()?;
    Some(first / second)
}
