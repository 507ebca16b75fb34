//! Event sources: recordings on disk, live cameras and in-memory streams.
//!
//! Every source yields events in non-decreasing timestamp order, exactly
//! once. Sources cannot be rewound; re-open the recording to start over.

use crate::evt3::Evt3Reader;
use crate::output::{FieldOrder, OutputError};
use crate::types::{Event, Polarity, SensorGeometry, MAX_SENSOR_DIM};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur while opening or reading an event source.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Event source unavailable: {0}")]
    Unavailable(String),

    #[error("Unsupported recording format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid recording at line {line}: {reason}")]
    InvalidFormat { line: usize, reason: String },

    #[error("Invalid field order: {0}")]
    FieldOrder(#[source] OutputError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A time-ordered stream of events from a camera or a recording.
pub trait EventSource {
    /// Resolution of the sensor that produced the events.
    fn geometry(&self) -> SensorGeometry;

    /// Returns the next event, or `None` when the stream is exhausted.
    fn next_event(&mut self) -> Result<Option<Event>, SourceError>;

    fn width(&self) -> u32 {
        self.geometry().width
    }

    fn height(&self) -> u32 {
        self.geometry().height
    }
}

impl<S: EventSource + ?Sized> EventSource for Box<S> {
    fn geometry(&self) -> SensorGeometry {
        (**self).geometry()
    }

    fn next_event(&mut self) -> Result<Option<Event>, SourceError> {
        (**self).next_event()
    }
}

/// Opens a recording when `path` is given, otherwise the first live camera.
pub fn open(path: Option<&Path>) -> Result<Box<dyn EventSource + Send>, SourceError> {
    match path {
        Some(path) => open_file(path),
        None => open_first_available(),
    }
}

/// Opens a recording, choosing the decoder from the file extension.
pub fn open_file(path: &Path) -> Result<Box<dyn EventSource + Send>, SourceError> {
    if !path.is_file() {
        return Err(SourceError::Unavailable(format!(
            "no recording at {}",
            path.display()
        )));
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_lowercase();

    let reader = BufReader::new(File::open(path)?);
    let source: Box<dyn EventSource + Send> = match extension.as_str() {
        "raw" => Box::new(RawFileSource {
            reader: Evt3Reader::new(reader)?,
        }),
        "csv" => Box::new(CsvSource::new(reader, FieldOrder::default())?),
        other => {
            return Err(SourceError::UnsupportedFormat(format!(
                ".{} (expected .raw or .csv)",
                other
            )))
        }
    };

    log::info!(
        "Opened {} ({} sensor)",
        path.display(),
        source.geometry()
    );
    Ok(source)
}

/// Opens the first live camera found.
///
/// No device drivers are linked into this crate, so discovery always comes
/// back empty and this reports [`SourceError::Unavailable`].
pub fn open_first_available() -> Result<Box<dyn EventSource + Send>, SourceError> {
    log::debug!("Searching for live event cameras");
    Err(SourceError::Unavailable(
        "no live camera found; pass an event file instead".to_string(),
    ))
}

/// EVT 3.0 `.raw` recording.
struct RawFileSource {
    reader: Evt3Reader<BufReader<File>>,
}

impl EventSource for RawFileSource {
    fn geometry(&self) -> SensorGeometry {
        self.reader.geometry()
    }

    fn next_event(&mut self) -> Result<Option<Event>, SourceError> {
        self.reader.next_event()
    }
}

/// Text recording with one `x,y,p,t` event per line.
///
/// An optional `%geometry:W,H` line before the first event sets the sensor
/// size. Polarity is accepted as `0`/`1` or `-1`/`1`.
pub struct CsvSource<R> {
    lines: std::io::Lines<R>,
    line_no: usize,
    field_order: FieldOrder,
    geometry: SensorGeometry,
    first_event: Option<Event>,
}

impl<R: BufRead> CsvSource<R> {
    pub fn new(reader: R, field_order: FieldOrder) -> Result<Self, SourceError> {
        field_order.validate().map_err(SourceError::FieldOrder)?;
        let mut source = Self {
            lines: reader.lines(),
            line_no: 0,
            field_order,
            geometry: SensorGeometry::default(),
            first_event: None,
        };

        // The geometry line, if any, precedes the first event
        loop {
            let Some(line) = source.next_line()? else {
                break;
            };
            if let Some(dims) = line.strip_prefix("%geometry:") {
                source.geometry = source.parse_geometry(dims)?;
                continue;
            }
            if line.starts_with('%') {
                continue;
            }
            source.first_event = Some(source.parse_event(&line)?);
            break;
        }

        Ok(source)
    }

    /// Next non-blank line, trimmed.
    fn next_line(&mut self) -> Result<Option<String>, SourceError> {
        for line in self.lines.by_ref() {
            self.line_no += 1;
            let line = line?;
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                return Ok(Some(trimmed.to_string()));
            }
        }
        Ok(None)
    }

    fn invalid(&self, reason: impl Into<String>) -> SourceError {
        SourceError::InvalidFormat {
            line: self.line_no,
            reason: reason.into(),
        }
    }

    fn parse_geometry(&self, dims: &str) -> Result<SensorGeometry, SourceError> {
        let (w, h) = dims
            .split_once(',')
            .ok_or_else(|| self.invalid("geometry must be WIDTH,HEIGHT"))?;
        match (w.trim().parse(), h.trim().parse()) {
            (Ok(w), Ok(h)) => {
                let geometry = SensorGeometry::new(w, h);
                if geometry.is_valid() {
                    Ok(geometry)
                } else {
                    Err(self.invalid(format!(
                        "geometry {} outside 1..={} pixels per side",
                        geometry, MAX_SENSOR_DIM
                    )))
                }
            }
            _ => Err(self.invalid(format!("bad geometry {:?}", dims))),
        }
    }

    fn parse_event(&self, line: &str) -> Result<Event, SourceError> {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != 4 {
            return Err(self.invalid(format!("expected 4 fields, got {}", fields.len())));
        }

        // Reorder into x, y, p, t
        let mut values = [0i64; 4];
        for (column, field) in fields.iter().enumerate() {
            let value: i64 = field
                .parse()
                .map_err(|_| self.invalid(format!("not an integer: {:?}", field)))?;
            values[self.field_order.indices()[column]] = value;
        }
        let [x, y, p, t] = values;

        let x = u16::try_from(x).map_err(|_| self.invalid(format!("x out of range: {}", x)))?;
        let y = u16::try_from(y).map_err(|_| self.invalid(format!("y out of range: {}", y)))?;
        let t = u64::try_from(t).map_err(|_| self.invalid(format!("negative timestamp: {}", t)))?;
        let polarity = match p {
            1 => Polarity::Positive,
            0 | -1 => Polarity::Negative,
            other => return Err(self.invalid(format!("bad polarity: {}", other))),
        };

        Ok(Event::new(x, y, polarity, t))
    }
}

impl<R: BufRead> EventSource for CsvSource<R> {
    fn geometry(&self) -> SensorGeometry {
        self.geometry
    }

    fn next_event(&mut self) -> Result<Option<Event>, SourceError> {
        if let Some(event) = self.first_event.take() {
            return Ok(Some(event));
        }
        match self.next_line()? {
            Some(line) => self.parse_event(&line).map(Some),
            None => Ok(None),
        }
    }
}

/// In-memory event stream.
#[derive(Debug, Clone)]
pub struct MemorySource {
    geometry: SensorGeometry,
    events: VecDeque<Event>,
}

impl MemorySource {
    pub fn new(geometry: SensorGeometry, events: impl IntoIterator<Item = Event>) -> Self {
        Self {
            geometry,
            events: events.into_iter().collect(),
        }
    }
}

impl EventSource for MemorySource {
    fn geometry(&self) -> SensorGeometry {
        self.geometry
    }

    fn next_event(&mut self) -> Result<Option<Event>, SourceError> {
        Ok(self.events.pop_front())
    }
}
