//! The sampling loop tying the instruments together.
//!
//! Every tick reads the SMU, then the CH2O sensor, then fires due schedule steps, then
//! polls each flow channel, and finally hands one [SampleRecord] to every sink. A
//! missing or failing instrument never stops the loop.

use std::{
    io::{self, Write},
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::{Duration, Instant},
};

use log::{error, info, warn};

use crate::{
    io::Connect,
    mfc::{Channel, FlowController, SetpointDriver},
    record::{self, CsvSink, NOT_MEASURED, SampleRecord},
    schedule::Schedule,
    sensor::SensorReader,
    smu::SourceMeter,
};

/// Stands in for the flow controllers when their port could not be opened, so that
/// due steps are still consumed and reported.
struct NoFlowController;

impl SetpointDriver for NoFlowController {
    type Error = &'static str;

    fn drive_to_setpoint(&mut self, _channel: char, _target: f64) -> Result<u32, &'static str> {
        Err("flow controllers are not connected")
    }
}

pub type Sink = CsvSink<Box<dyn Write>>;

pub struct Acquisition<C, F, M>
where
    C: Connect,
    F: embedded_io::Read + embedded_io::Write,
    M: embedded_io::Read + embedded_io::Write,
{
    sensor: SensorReader<C>,
    flow: Option<FlowController<F>>,
    smu: Option<SourceMeter<M>>,
    schedule: Schedule,
    sinks: Vec<Sink>,
    tick_interval: Duration,
    started: Instant,
}

impl<C, F, M> Acquisition<C, F, M>
where
    C: Connect,
    F: embedded_io::Read + embedded_io::Write,
    M: embedded_io::Read + embedded_io::Write,
{
    pub fn new(
        sensor: SensorReader<C>,
        flow: Option<FlowController<F>>,
        smu: Option<SourceMeter<M>>,
        schedule: Schedule,
    ) -> Self {
        Self {
            sensor,
            flow,
            smu,
            schedule,
            sinks: Vec::new(),
            tick_interval: Duration::ZERO,
            started: Instant::now(),
        }
    }

    pub fn with_sink(mut self, sink: Sink) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Channel ids in configuration order, empty when no flow controller is attached.
    pub fn channel_ids(&self) -> Vec<char> {
        self.flow
            .as_ref()
            .map(|flow| flow.channels().iter().map(Channel::id).collect())
            .unwrap_or_default()
    }

    /// Header line matching the rows this loop produces.
    pub fn header(&self) -> String {
        record::header(&self.channel_ids())
    }

    /// Restart the run clock and write the header to every sink.
    pub fn start(&mut self) -> io::Result<()> {
        let header = self.header();
        for sink in &mut self.sinks {
            sink.write_header(&header)?;
            sink.flush()?;
        }
        self.started = Instant::now();
        Ok(())
    }

    /// Run one tick at the current time since [Acquisition::start].
    pub fn tick(&mut self) -> io::Result<SampleRecord> {
        let elapsed_s = self.started.elapsed().as_secs_f64();
        self.tick_at(elapsed_s)
    }

    /// Run one tick as if `elapsed_s` seconds had passed since the start of the run.
    pub fn tick_at(&mut self, elapsed_s: f64) -> io::Result<SampleRecord> {
        let resistance = self
            .smu
            .as_mut()
            .map_or(f64::NAN, SourceMeter::read_resistance);
        let concentration = self.sensor.read_concentration();

        let ids = self.channel_ids();
        match self.flow.as_mut() {
            Some(flow) => self.schedule.apply_due(elapsed_s, &ids, flow),
            None => self
                .schedule
                .apply_due(elapsed_s, &ids, &mut NoFlowController),
        };

        let mut channels = Vec::with_capacity(ids.len());
        if let Some(flow) = self.flow.as_mut() {
            for id in ids {
                match flow.read_telemetry(id) {
                    Ok(telemetry) => channels.push((id, telemetry)),
                    Err(err) => warn!("No telemetry from channel {id}: {err}"),
                }
            }
        }

        let record = SampleRecord {
            elapsed_s,
            resistance,
            concentration,
            temperature: NOT_MEASURED,
            humidity: NOT_MEASURED,
            channels,
        };
        for sink in &mut self.sinks {
            sink.write_record(&record)?;
            sink.flush()?;
        }
        Ok(record)
    }

    /// Tick until `stop` is raised. Instrument faults are absorbed; only a sink that can
    /// no longer be written ends the run early.
    pub fn run(&mut self, stop: &AtomicBool) -> io::Result<()> {
        self.start()?;
        info!("Acquisition started");
        while !stop.load(Ordering::SeqCst) {
            self.tick()?;
            if !self.tick_interval.is_zero() {
                thread::sleep(self.tick_interval);
            }
        }
        info!("Acquisition stopped");
        Ok(())
    }

    /// Leave the bench safe: no flow, no bias, sockets closed, output on disk.
    pub fn shutdown(&mut self) {
        if let Some(flow) = self.flow.as_mut() {
            flow.zero_all();
        }
        if let Some(smu) = self.smu.as_mut() {
            match smu.output_off() {
                Ok(()) => info!("SMU output disabled"),
                Err(err) => error!("Could not disable SMU output: {err}"),
            }
        }
        self.sensor.close();
        for sink in &mut self.sinks {
            if let Err(err) = sink.flush() {
                error!("Could not flush output: {err}");
            }
        }
    }
}
