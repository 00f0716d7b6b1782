//! Time-triggered flow setpoint sequence.
//!
//! A schedule file holds one row per step: the offset in seconds from the start of the
//! run, followed by one target per flow channel in configuration order.
//!
//! ```text
//! Time (s), MFC A, MFC B, MFC C
//! 0, 100, 0, 0
//! 600, 90, 10, 0
//! ```

use std::{
    collections::VecDeque,
    fs::File,
    io::{BufRead, BufReader},
    num::ParseFloatError,
    path::Path,
};

use log::{info, warn};
use thiserror::Error;

use crate::mfc::SetpointDriver;

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Failed to read schedule: {0}")]
    Io(#[from] std::io::Error),
    #[error("Schedule line {line}: invalid value {value:?}: {source}")]
    Parse {
        line: usize,
        value: String,
        #[source]
        source: ParseFloatError,
    },
}

/// One step of the sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleEntry {
    /// Seconds since the start of the run at which the step fires.
    pub offset_s: f64,
    /// Target for the n-th configured channel.
    pub targets: Vec<f64>,
}

impl ScheduleEntry {
    /// Parse a data row. `line` is the 1-based line number used in errors.
    fn parse(row: &str, line: usize) -> Result<Self, ScheduleError> {
        let mut values = row
            .trim()
            .trim_end_matches(',')
            .split(',')
            .map(str::trim)
            .map(|value| {
                value.parse::<f64>().map_err(|source| ScheduleError::Parse {
                    line,
                    value: value.to_owned(),
                    source,
                })
            });
        // A non-blank row always yields at least one field.
        let offset_s = values.next().unwrap_or(Ok(0.0))?;
        let targets = values.collect::<Result<Vec<_>, _>>()?;
        Ok(Self { offset_s, targets })
    }
}

/// Pending steps in file order. Steps are consumed as they fire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schedule {
    entries: VecDeque<ScheduleEntry>,
}

impl Schedule {
    pub fn new(entries: impl IntoIterator<Item = ScheduleEntry>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Parse a schedule. Rows mentioning `Time` are headers and are skipped, as are blank lines.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, ScheduleError> {
        let mut entries = VecDeque::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.contains("Time") {
                info!("Schedule header: {}", line.trim());
                continue;
            }
            if line.trim().is_empty() {
                continue;
            }
            let entry = ScheduleEntry::parse(&line, index + 1)?;
            info!("Scheduled step at {} s: {:?}", entry.offset_s, entry.targets);
            entries.push_back(entry);
        }
        Ok(Self { entries })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ScheduleError> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &ScheduleEntry> {
        self.entries.iter()
    }

    /// Fire every step whose offset has passed.
    ///
    /// Steps are visited in file order and each due step drives `channels[i]` to its
    /// i-th target. Fired steps are removed and returned in the order they fired. A
    /// channel that fails to converge is logged and the pass carries on.
    pub fn apply_due<D: SetpointDriver>(
        &mut self,
        elapsed_s: f64,
        channels: &[char],
        driver: &mut D,
    ) -> Vec<ScheduleEntry> {
        let (due, pending): (VecDeque<_>, VecDeque<_>) = self
            .entries
            .drain(..)
            .partition(|entry| entry.offset_s <= elapsed_s);
        self.entries = pending;

        for entry in &due {
            info!("Applying step at {} s: {:?}", entry.offset_s, entry.targets);
            if entry.targets.len() > channels.len() {
                warn!(
                    "Step at {} s has {} targets for {} channels, extra targets ignored",
                    entry.offset_s,
                    entry.targets.len(),
                    channels.len()
                );
            }
            for (&channel, &target) in channels.iter().zip(&entry.targets) {
                if let Err(err) = driver.drive_to_setpoint(channel, target) {
                    warn!("Channel {channel} did not reach {target}: {err}");
                }
            }
        }
        due.into()
    }
}
