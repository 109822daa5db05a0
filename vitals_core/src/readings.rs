//! Reading files: JSON Lines input, CSV export and period filtering.
//!
//! Readings are appended to a JSONL file under an exclusive lock and read
//! back under a shared lock. A malformed line is skipped with a warning so
//! one bad record never hides the rest of the file.

use crate::{Reading, Result};
use chrono::{DateTime, Duration, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

impl Reading {
    /// Client-side checks run before a reading is submitted
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.subject_id.trim().is_empty() {
            errors.push("subject id is required".to_string());
        }
        if !self.glucose.is_finite() || !(1.0..=35.0).contains(&self.glucose) {
            errors.push(format!("glucose {} mmol/L is out of range (1-35)", self.glucose));
        }
        if !(50..=260).contains(&self.systolic) {
            errors.push(format!("systolic {} is out of range (50-260)", self.systolic));
        }
        if !(30..=160).contains(&self.diastolic) {
            errors.push(format!("diastolic {} is out of range (30-160)", self.diastolic));
        } else if self.diastolic >= self.systolic {
            errors.push("diastolic must be lower than systolic".to_string());
        }
        if !(30..=220).contains(&self.pulse) {
            errors.push(format!("pulse {} is out of range (30-220)", self.pulse));
        }
        if !self.weight.is_finite() || !(20.0..=300.0).contains(&self.weight) {
            errors.push(format!("weight {} kg is out of range (20-300)", self.weight));
        }

        errors
    }
}

/// Reading sink trait for persisting readings
pub trait ReadingSink {
    fn append(&mut self, reading: &Reading) -> Result<()>;
}

/// JSONL reading sink with file locking
pub struct JsonlReadingSink {
    path: PathBuf,
}

impl JsonlReadingSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ReadingSink for JsonlReadingSink {
    fn append(&mut self, reading: &Reading) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.lock_exclusive()?;

        let mut writer = std::io::BufWriter::new(&file);
        let line = serde_json::to_string(reading)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        drop(writer);

        file.unlock()?;
        tracing::debug!(subject = %reading.subject_id, "Appended reading");
        Ok(())
    }
}

/// Read all readings from a JSONL file. A missing file reads as empty.
pub fn read_readings(path: &Path) -> Result<Vec<Reading>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    file.lock_shared()?;

    let reader = BufReader::new(&file);
    let mut readings = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<Reading>(&line) {
            Ok(reading) => readings.push(reading),
            Err(e) => {
                tracing::warn!("Skipping malformed reading at line {}: {}", line_num + 1, e);
            }
        }
    }

    file.unlock()?;
    tracing::debug!("Read {} readings from {:?}", readings.len(), path);
    Ok(readings)
}

/// Reporting window for exports
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Day,
    Week,
    Month,
    Quarter,
}

impl Period {
    pub fn span(&self) -> Duration {
        match self {
            Period::Day => Duration::days(1),
            Period::Week => Duration::weeks(1),
            Period::Month => Duration::days(30),
            Period::Quarter => Duration::days(90),
        }
    }
}

impl std::str::FromStr for Period {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "day" => Ok(Period::Day),
            "week" => Ok(Period::Week),
            "month" => Ok(Period::Month),
            "quarter" => Ok(Period::Quarter),
            other => Err(crate::Error::invalid(format!(
                "unknown period '{}' (expected day, week, month or quarter)",
                other
            ))),
        }
    }
}

/// Readings taken within `period` before `now`, oldest first
pub fn within_period<'a>(readings: &'a [Reading], period: Period, now: DateTime<Utc>) -> Vec<&'a Reading> {
    let since = now - period.span();
    let mut selected: Vec<&Reading> = readings
        .iter()
        .filter(|r| r.timestamp > since && r.timestamp <= now)
        .collect();
    selected.sort_by_key(|r| r.timestamp);
    selected
}

#[derive(Debug, Serialize)]
struct CsvRow {
    date: String,
    glucose: f64,
    systolic: u16,
    diastolic: u16,
    pulse: u16,
    weight: f64,
}

impl From<&Reading> for CsvRow {
    fn from(reading: &Reading) -> Self {
        CsvRow {
            date: reading.timestamp.to_rfc3339(),
            glucose: reading.glucose,
            systolic: reading.systolic,
            diastolic: reading.diastolic,
            pulse: reading.pulse,
            weight: reading.weight,
        }
    }
}

/// Write readings to a new CSV file, replacing any existing one.
///
/// The file is fsynced before returning. Returns the number of rows written.
pub fn export_csv<'a, I>(readings: I, csv_path: &Path) -> Result<usize>
where
    I: IntoIterator<Item = &'a Reading>,
{
    if let Some(parent) = csv_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = File::create(csv_path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(true)
        .from_writer(file);

    let mut count = 0;
    for reading in readings {
        writer.serialize(CsvRow::from(reading))?;
        count += 1;
    }

    // serialize() only emits headers alongside the first row
    if count == 0 {
        writer.write_record(["date", "glucose", "systolic", "diastolic", "pulse", "weight"])?;
    }

    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    file.sync_all()?;

    tracing::info!("Exported {} readings to {:?}", count, csv_path);
    Ok(count)
}
