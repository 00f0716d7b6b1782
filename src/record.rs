//! Output rows and where they go.

use std::{
    fmt,
    fs::{File, OpenOptions},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use chrono::{Datelike, NaiveDateTime, Timelike};

use crate::mfc::Telemetry;

/// Columns preceding the per-channel block.
pub const BASE_COLUMNS: [&str; 5] = [
    "Time (s)",
    "Resistance (Ohms)",
    "CH2O (ppm)",
    "Temperature (C)",
    "Humidity (%)",
];

/// Reported when no humidity/temperature sensor is fitted.
pub const NOT_MEASURED: f64 = -1.0;

/// Header line for a bench with the given flow channels.
pub fn header(channels: &[char]) -> String {
    let mut columns: Vec<String> = BASE_COLUMNS.iter().map(|c| c.to_string()).collect();
    for id in channels {
        for suffix in ["PSI", "Temp", "SLPM", "Setpoint"] {
            columns.push(format!("MFC_{id}_{suffix}"));
        }
    }
    columns.join(", ")
}

/// Everything measured during one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRecord {
    pub elapsed_s: f64,
    pub resistance: f64,
    pub concentration: f64,
    pub temperature: f64,
    pub humidity: f64,
    /// Telemetry of every channel that answered this tick, in channel order.
    pub channels: Vec<(char, Telemetry)>,
}

/// Renders the record as one CSV row without a line terminator.
impl fmt::Display for SampleRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{}",
            self.elapsed_s, self.resistance, self.concentration, self.temperature, self.humidity
        )?;
        for (_, telemetry) in &self.channels {
            write!(
                f,
                ",{},{},{},{}",
                telemetry.pressure, telemetry.temperature, telemetry.flow, telemetry.setpoint
            )?;
        }
        Ok(())
    }
}

/// Output file name for a run started at `started`, e.g. `CH2O_3152025_143005.csv`.
///
/// Fields are not zero padded.
pub fn output_file_name(prefix: &str, started: &NaiveDateTime) -> String {
    format!(
        "{prefix}_{}{}{}_{}{}{}.csv",
        started.month(),
        started.day(),
        started.year(),
        started.hour(),
        started.minute(),
        started.second()
    )
}

/// Writes the header and one line per record to any [Write] implementation.
pub struct CsvSink<W: Write> {
    writer: W,
}

impl<W: Write> CsvSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn write_header(&mut self, header: &str) -> io::Result<()> {
        writeln!(self.writer, "{header}")
    }

    pub fn write_record(&mut self, record: &SampleRecord) -> io::Result<()> {
        writeln!(self.writer, "{record}")
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl CsvSink<BufWriter<File>> {
    /// Open `directory/name` for appending, creating it if needed.
    pub fn append_to(directory: &Path, name: &str) -> io::Result<(PathBuf, Self)> {
        let path = directory.join(name);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok((path, Self::new(BufWriter::new(file))))
    }
}
