//! Writers for sliced events and rendered frames.
//!
//! Events are exported as CSV in a configurable column order, which
//! [`crate::source::CsvSource`] reads back. Frames are saved as PNG images.

use crate::frame::Frame;
use crate::types::{Event, EventSlice, SensorGeometry};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during output writing.
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),
}

/// Column order of the event CSV format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldOrder {
    /// x, y, p, t
    #[default]
    XYPT,
    /// t, x, y, p
    TXYP,
    /// x, y, t, p
    XYTP,
    /// Field index (x=0, y=1, p=2, t=3) for each column
    Custom([usize; 4]),
}

/// Field index of a column name, case-insensitive.
fn field_index(name: &str) -> Option<usize> {
    match name.trim().to_ascii_lowercase().as_str() {
        "x" => Some(0),
        "y" => Some(1),
        "p" | "pol" | "polarity" => Some(2),
        "t" | "time" | "timestamp" => Some(3),
        _ => None,
    }
}

impl std::str::FromStr for FieldOrder {
    type Err = OutputError;

    /// Parses column names such as `"x,y,p,t"` or `"t, x, y, pol"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let names: Vec<&str> = s.split(',').collect();
        let columns = <[&str; 4]>::try_from(names.as_slice()).map_err(|_| {
            OutputError::InvalidFormat(format!("expected 4 columns, got {}", names.len()))
        })?;

        let mut indices = [0usize; 4];
        for (slot, name) in indices.iter_mut().zip(columns) {
            *slot = field_index(name).ok_or_else(|| {
                OutputError::InvalidFormat(format!("unknown column {:?} (x, y, p, t)", name.trim()))
            })?;
        }
        Self::from_indices(indices)
    }
}

impl FieldOrder {
    /// Builds an order from the field index of each column.
    ///
    /// The indices must name each of x, y, p and t exactly once.
    pub fn from_indices(indices: [usize; 4]) -> Result<Self, OutputError> {
        let order = match indices {
            [0, 1, 2, 3] => Self::XYPT,
            [3, 0, 1, 2] => Self::TXYP,
            [0, 1, 3, 2] => Self::XYTP,
            _ => Self::Custom(indices),
        };
        order.validate()?;
        Ok(order)
    }

    /// Field index (x=0, y=1, p=2, t=3) stored in each column.
    pub fn indices(&self) -> [usize; 4] {
        match self {
            Self::XYPT => [0, 1, 2, 3],
            Self::TXYP => [3, 0, 1, 2],
            Self::XYTP => [0, 1, 3, 2],
            Self::Custom(indices) => *indices,
        }
    }

    /// Checks that a `Custom` order is a permutation of the four fields.
    pub fn validate(&self) -> Result<(), OutputError> {
        let indices = self.indices();
        let mut sorted = indices;
        sorted.sort_unstable();
        if sorted != [0, 1, 2, 3] {
            return Err(OutputError::InvalidFormat(format!(
                "columns {:?} must name each of x, y, p, t once",
                indices
            )));
        }
        Ok(())
    }
}

/// CSV writer for events.
///
/// Polarity is written as the sensor bit (0 = OFF, 1 = ON).
pub struct CsvWriter<W: Write> {
    writer: BufWriter<W>,
    field_order: FieldOrder,
}

impl<W: Write> CsvWriter<W> {
    pub fn new(writer: W, field_order: FieldOrder) -> Result<Self, OutputError> {
        field_order.validate()?;
        Ok(Self {
            writer: BufWriter::new(writer),
            field_order,
        })
    }

    /// Writes the `%geometry:W,H` line.
    pub fn write_header(&mut self, geometry: &SensorGeometry) -> Result<(), OutputError> {
        writeln!(self.writer, "%geometry:{},{}", geometry.width, geometry.height)?;
        Ok(())
    }

    pub fn write_slice(&mut self, slice: &EventSlice) -> Result<(), OutputError> {
        for event in &slice.events {
            self.write_event(event)?;
        }
        Ok(())
    }

    #[inline]
    fn write_event(&mut self, event: &Event) -> Result<(), OutputError> {
        let fields = [
            event.x as u64,
            event.y as u64,
            event.polarity.as_bit() as u64,
            event.t,
        ];
        let [a, b, c, d] = self.field_order.indices().map(|i| fields[i]);
        writeln!(self.writer, "{},{},{},{}", a, b, c, d)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), OutputError> {
        self.writer.flush()?;
        Ok(())
    }
}

impl CsvWriter<File> {
    /// Creates the file and writes the geometry header.
    pub fn create<P: AsRef<Path>>(
        path: P,
        geometry: &SensorGeometry,
        field_order: FieldOrder,
    ) -> Result<Self, OutputError> {
        field_order.validate()?;
        let mut writer = Self::new(File::create(path)?, field_order)?;
        writer.write_header(geometry)?;
        Ok(writer)
    }
}

/// Saves a BGR frame as an RGB PNG.
pub fn write_png<P: AsRef<Path>>(path: P, frame: &Frame) -> Result<(), OutputError> {
    let rgb: Vec<u8> = frame
        .as_bytes()
        .chunks_exact(3)
        .flat_map(|bgr| [bgr[2], bgr[1], bgr[0]])
        .collect();
    image::save_buffer(
        path,
        &rgb,
        frame.width(),
        frame.height(),
        image::ExtendedColorType::Rgb8,
    )?;
    Ok(())
}
