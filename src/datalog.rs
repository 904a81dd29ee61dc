// One `timestamp;temperature;voltage` line per sample

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use log::debug;
use serde::Serialize;

use crate::error::DataLogError;
use crate::sweep::Sample;

pub const DATA_FILENAME: &str = "thermoprj_data.csv";

// e.g. 2024/03/05-14:07:09.123456
pub const TIMESTAMP_FORMAT: &str = "%Y/%m/%d-%H:%M:%S%.6f";
// Accepts any number of fractional digits
const PARSE_FORMAT: &str = "%Y/%m/%d-%H:%M:%S%.f";
const SEPARATOR: char = ';';

pub struct DataLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl DataLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DataLogError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!("Appending samples to {}", path.display());
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // Flushed per line
    pub fn append(&mut self, sample: &Sample) -> Result<(), DataLogError> {
        writeln!(self.writer, "{}", format_line(sample))?;
        self.writer.flush()?;
        Ok(())
    }
}

pub fn format_line(sample: &Sample) -> String {
    format!(
        "{}{sep}{}{sep}{}",
        sample.timestamp.format(TIMESTAMP_FORMAT),
        sample.temperature,
        sample.voltage,
        sep = SEPARATOR
    )
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub timestamp: NaiveDateTime,
    pub temperature: f64,
    pub voltage: f64,
}

pub fn parse_line(line: &str) -> Result<LogRecord, String> {
    let fields: Vec<&str> = line.trim_end().split(SEPARATOR).collect();
    if fields.len() != 3 {
        return Err(format!("expected 3 fields, found {}", fields.len()));
    }

    let timestamp = NaiveDateTime::parse_from_str(fields[0], PARSE_FORMAT)
        .map_err(|e| format!("bad timestamp '{}': {}", fields[0], e))?;
    let number = |s: &str| {
        s.trim()
            .parse::<f64>()
            .map_err(|e| format!("bad number '{}': {}", s, e))
    };

    Ok(LogRecord {
        timestamp,
        temperature: number(fields[1])?,
        voltage: number(fields[2])?,
    })
}

// Blank lines are skipped
pub fn read_log(path: impl AsRef<Path>) -> Result<Vec<LogRecord>, DataLogError> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = vec![];
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = parse_line(&line).map_err(|reason| DataLogError::Parse { line: idx + 1, reason })?;
        records.push(record);
    }
    Ok(records)
}
