//! Raw log and preprocessed file formats.
//!
//! Both files store records as pairs of lines: a feature line followed by a
//! value line. In the raw log the value line is the elapsed time in
//! seconds; in the preprocessed file it is `<elapsed> <class>`. A blank
//! line where a feature line is expected ends the file.

use std::io::{BufRead, Write};

use crate::error::{FeatureError, RecordError};
use crate::feature::{FeatureRecord, decode};

/// One timed execution of a tiling candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    /// Feature line as it appeared in the log (without newline).
    pub line: String,
    /// Decoded form of `line`.
    pub record: FeatureRecord,
    /// Wall-clock seconds for one execution.
    pub elapsed: f64,
}

impl Measurement {
    /// Decodes `line` and pairs it with `elapsed`.
    pub fn new(line: &str, elapsed: f64) -> Result<Self, FeatureError> {
        let line = line.trim_end_matches(['\n', '\r']);
        Ok(Self {
            record: decode(line)?,
            line: line.to_string(),
            elapsed,
        })
    }

    /// Elapsed time divided by the workload size.
    pub fn normalized_cost(&self) -> Result<f64, FeatureError> {
        self.record.normalized_cost(self.elapsed)
    }
}

/// A measurement with its assigned performance class.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledMeasurement {
    /// The underlying measurement.
    pub measurement: Measurement,
    /// Performance class; 0 is the fastest.
    pub class: usize,
}

/// Reads a raw measurement log.
pub fn read_measurements(
    reader: impl BufRead,
) -> Result<Vec<Measurement>, RecordError> {
    read_pairs(reader, |line_no, value| {
        value
            .trim()
            .parse::<f64>()
            .map_err(|_| RecordError::invalid_value(line_no, value))
    })
    .map(|pairs| {
        pairs
            .into_iter()
            .map(|(line, record, elapsed)| Measurement {
                line,
                record,
                elapsed,
            })
            .collect()
    })
}

/// Appends one measurement pair to a raw log.
pub fn write_measurement(
    mut w: impl Write,
    record: &FeatureRecord,
    elapsed: f64,
) -> std::io::Result<()> {
    writeln!(w, "{}", record.to_line())?;
    writeln!(w, "{elapsed}")
}

/// Reads a preprocessed file written by [`write_labeled`].
pub fn read_labeled(
    reader: impl BufRead,
) -> Result<Vec<LabeledMeasurement>, RecordError> {
    let pairs = read_pairs(reader, |line_no, value| {
        let mut tokens = value.split_whitespace();
        let elapsed = tokens.next().and_then(|t| t.parse::<f64>().ok());
        let class = tokens.next().and_then(|t| t.parse::<usize>().ok());
        match (elapsed, class, tokens.next()) {
            (Some(elapsed), Some(class), None) => Ok((elapsed, class)),
            _ => Err(RecordError::invalid_value(line_no, value)),
        }
    })?;
    Ok(pairs
        .into_iter()
        .map(|(line, record, (elapsed, class))| LabeledMeasurement {
            measurement: Measurement {
                line,
                record,
                elapsed,
            },
            class,
        })
        .collect())
}

/// Writes a preprocessed file: the original feature line, then
/// `<elapsed> <class>`.
pub fn write_labeled(
    mut w: impl Write,
    labeled: &[LabeledMeasurement],
) -> std::io::Result<()> {
    for item in labeled {
        writeln!(w, "{}", item.measurement.line)?;
        writeln!(w, "{} {}", item.measurement.elapsed, item.class)?;
    }
    Ok(())
}

/// Reads alternating feature/value line pairs until EOF or a blank line.
fn read_pairs<T>(
    mut reader: impl BufRead,
    mut parse_value: impl FnMut(usize, &str) -> Result<T, RecordError>,
) -> Result<Vec<(String, FeatureRecord, T)>, RecordError> {
    let mut pairs = Vec::new();
    let mut line_no = 0usize;
    let mut feature_line = String::new();
    let mut value_line = String::new();

    loop {
        feature_line.clear();
        line_no += 1;
        if reader.read_line(&mut feature_line)? == 0
            || feature_line.trim().is_empty()
        {
            break;
        }
        let line = feature_line.trim_end_matches(['\n', '\r']).to_string();
        let record = decode(&line)?;

        value_line.clear();
        line_no += 1;
        if reader.read_line(&mut value_line)? == 0 {
            return Err(RecordError::missing_value(line_no - 1));
        }
        let value = parse_value(line_no, &value_line)?;
        pairs.push((line, record, value));
    }

    Ok(pairs)
}
