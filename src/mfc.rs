//! Mass-flow controllers sharing one serial line.
//!
//! Each controller answers to a single unit letter. Polling a unit returns one line of
//! space separated, tagged fields; writing a setpoint is the unit letter followed by the
//! raw command value.

use std::time::{Duration, Instant};

use fugit::MillisDurationU32;
use log::{debug, info, warn};

use crate::{
    config::FlowConfig,
    error::{Error, Result},
    io::read_line,
};

/// Raw command value corresponding to full scale flow.
pub const FULL_SCALE_COMMAND: f64 = 65535.0;

/// One readback from a controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Telemetry {
    pub pressure: f64,
    pub temperature: f64,
    pub flow: f64,
    pub setpoint: f64,
}

impl Telemetry {
    /// Parse a readback line. Returns `None` when fewer than six fields are present or a
    /// field is not numeric once its one character tag is removed.
    pub fn parse(line: &str) -> Option<Self> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 6 {
            return None;
        }
        let field = |index: usize| -> Option<f64> { tokens[index].get(1..)?.parse().ok() };
        Some(Self {
            pressure: field(1)?,
            temperature: field(2)?,
            flow: field(4)?,
            setpoint: field(5)?,
        })
    }
}

/// A single flow controller and what we last asked of and heard from it.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    id: char,
    full_scale: f64,
    target: Option<f64>,
    last_telemetry: Option<Telemetry>,
}

impl Channel {
    pub fn new(id: char, full_scale: f64) -> Self {
        Self {
            id,
            full_scale,
            target: None,
            last_telemetry: None,
        }
    }

    pub fn id(&self) -> char {
        self.id
    }

    pub fn full_scale(&self) -> f64 {
        self.full_scale
    }

    /// The most recently commanded setpoint, in flow units.
    pub fn target(&self) -> Option<f64> {
        self.target
    }

    pub fn last_telemetry(&self) -> Option<Telemetry> {
        self.last_telemetry
    }

    /// Raw command value for a setpoint in flow units.
    pub fn command_for(&self, target: f64) -> f64 {
        target / self.full_scale * FULL_SCALE_COMMAND
    }
}

/// Bounds on the write/poll loop of [FlowController::drive_to_setpoint].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergencePolicy {
    /// Accepted distance between target and reported setpoint.
    pub tolerance: f64,
    pub max_iterations: u32,
    pub timeout: MillisDurationU32,
}

impl Default for ConvergencePolicy {
    fn default() -> Self {
        Self {
            tolerance: 0.005,
            max_iterations: 50,
            timeout: MillisDurationU32::secs(10),
        }
    }
}

impl From<&FlowConfig> for ConvergencePolicy {
    fn from(config: &FlowConfig) -> Self {
        Self {
            tolerance: config.tolerance,
            max_iterations: config.max_iterations,
            timeout: MillisDurationU32::millis(config.max_convergence_ms),
        }
    }
}

/// Something that can bring a flow channel to a setpoint.
pub trait SetpointDriver {
    type Error: core::fmt::Display;

    fn drive_to_setpoint(
        &mut self,
        channel: char,
        target: f64,
    ) -> core::result::Result<u32, Self::Error>;
}

/// You can create a FlowController using any interface which implements [embedded_io::Read] & [embedded_io::Write].
///
/// `L` bounds the length of a readback line.
pub struct FlowController<S: embedded_io::Read + embedded_io::Write, const L: usize = 128> {
    interface: S,
    channels: Vec<Channel>,
    policy: ConvergencePolicy,
}

impl<S: embedded_io::Read + embedded_io::Write, const L: usize> FlowController<S, L> {
    pub fn new(interface: S, channels: Vec<Channel>, policy: ConvergencePolicy) -> Self {
        Self {
            interface,
            channels,
            policy,
        }
    }

    /// Build the controller set described by the configuration.
    pub fn from_config(interface: S, config: &FlowConfig) -> Self {
        let channels = config
            .channels
            .iter()
            .map(|channel| Channel::new(channel.id, channel.full_scale))
            .collect();
        Self::new(interface, channels, ConvergencePolicy::from(config))
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn channel(&self, id: char) -> Option<&Channel> {
        self.channels.iter().find(|channel| channel.id == id)
    }

    fn channel_mut(&mut self, id: char) -> Result<&mut Channel, S::Error> {
        self.channels
            .iter_mut()
            .find(|channel| channel.id == id)
            .ok_or(Error::UnknownChannel(id))
    }

    /// Poll one controller for its current readings.
    pub fn read_telemetry(&mut self, id: char) -> Result<Telemetry, S::Error> {
        self.channel_mut(id)?;

        let mut letter = [0u8; 4];
        self.interface
            .write_all(id.encode_utf8(&mut letter).as_bytes())
            .map_err(Error::Transport)?;
        self.interface.write_all(b"\r").map_err(Error::Transport)?;

        let line = read_line::<_, L>(&mut self.interface)?;
        let telemetry = Telemetry::parse(&line).ok_or_else(|| Error::MalformedTelemetry {
            channel: id,
            line: line.clone(),
        })?;

        self.channel_mut(id)?.last_telemetry = Some(telemetry);
        Ok(telemetry)
    }

    /// Send a raw setpoint command. The controllers need no terminator.
    ///
    /// The command always carries a decimal point, so zero goes out as `A0.0`.
    pub fn write_setpoint(&mut self, id: char, command: f64) -> Result<(), S::Error> {
        let frame = format!("{id}{command:?}");
        self.interface
            .write_all(frame.as_bytes())
            .map_err(Error::Transport)?;
        self.interface.flush().map_err(Error::Transport)
    }

    /// Command a setpoint and poll until the controller reports it back within tolerance.
    ///
    /// Returns the number of polls it took. A malformed readback aborts immediately.
    pub fn drive_to_setpoint(&mut self, id: char, target: f64) -> Result<u32, S::Error> {
        let command = self.channel_mut(id)?.command_for(target);

        let policy = self.policy;
        let deadline = Duration::from_millis(u64::from(policy.timeout.to_millis()));
        let started = Instant::now();
        let mut last = f64::NAN;

        for poll in 1..=policy.max_iterations {
            self.write_setpoint(id, command)?;
            last = self.read_telemetry(id)?.setpoint;

            if (target - last).abs() <= policy.tolerance {
                self.channel_mut(id)?.target = Some(target);
                debug!("Channel {id} reached setpoint {target} after {poll} poll(s)");
                return Ok(poll);
            }
            if started.elapsed() >= deadline {
                return Err(Error::ConvergenceTimeout {
                    channel: id,
                    target,
                    last,
                    polls: poll,
                });
            }
        }

        Err(Error::ConvergenceTimeout {
            channel: id,
            target,
            last,
            polls: policy.max_iterations,
        })
    }

    /// Drive every channel to zero flow. Failures are logged and do not stop the others.
    pub fn zero_all(&mut self) {
        let ids: Vec<char> = self.channels.iter().map(Channel::id).collect();
        for id in ids {
            match self.drive_to_setpoint(id, 0.0) {
                Ok(_) => info!("Channel {id} set to zero"),
                Err(err) => warn!("Could not zero channel {id}: {err}"),
            }
        }
    }
}

impl<S: embedded_io::Read + embedded_io::Write, const L: usize> SetpointDriver
    for FlowController<S, L>
{
    type Error = Error<S::Error>;

    fn drive_to_setpoint(
        &mut self,
        channel: char,
        target: f64,
    ) -> core::result::Result<u32, Self::Error> {
        FlowController::drive_to_setpoint(self, channel, target)
    }
}
