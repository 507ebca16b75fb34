//! Core event, geometry and slice types.

use std::fmt;

/// Sign of a brightness change at a pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum Polarity {
    /// Brightness decrease (OFF event)
    Negative = -1,
    /// Brightness increase (ON event)
    Positive = 1,
}

impl Polarity {
    /// Maps a raw sensor bit (0 = OFF, 1 = ON) to a polarity.
    #[inline]
    pub fn from_bit(bit: u8) -> Self {
        if bit & 0x1 != 0 {
            Self::Positive
        } else {
            Self::Negative
        }
    }

    /// Returns the signed value, -1 or +1.
    #[inline]
    pub fn as_i8(self) -> i8 {
        self as i8
    }

    /// Returns the sensor bit, 0 or 1.
    #[inline]
    pub fn as_bit(self) -> u8 {
        match self {
            Self::Negative => 0,
            Self::Positive => 1,
        }
    }
}

/// A single Change Detection event.
///
/// Events are immutable once produced. Within a stream, timestamps never
/// decrease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    /// X coordinate of the pixel
    pub x: u16,
    /// Y coordinate of the pixel
    pub y: u16,
    /// Sign of the brightness change
    pub polarity: Polarity,
    /// Timestamp in microseconds
    pub t: u64,
}

impl Event {
    /// Creates a new event.
    #[inline]
    pub fn new(x: u16, y: u16, polarity: Polarity, t: u64) -> Self {
        Self { x, y, polarity, t }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {:+}, t={})",
            self.x,
            self.y,
            self.polarity.as_i8(),
            self.t
        )
    }
}

/// Largest sensor side addressable by 11-bit EVT 3.0 coordinates.
pub const MAX_SENSOR_DIM: u32 = 2048;

/// Sensor resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorGeometry {
    /// Sensor width in pixels
    pub width: u32,
    /// Sensor height in pixels
    pub height: u32,
}

impl SensorGeometry {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Both sides non-zero and at most [`MAX_SENSOR_DIM`].
    pub fn is_valid(&self) -> bool {
        (1..=MAX_SENSOR_DIM).contains(&self.width) && (1..=MAX_SENSOR_DIM).contains(&self.height)
    }

    /// Returns true if the pixel lies on the sensor.
    #[inline]
    pub fn contains(&self, x: u16, y: u16) -> bool {
        (x as u32) < self.width && (y as u32) < self.height
    }
}

impl Default for SensorGeometry {
    fn default() -> Self {
        // Gen4 sensor geometry
        Self {
            width: 1280,
            height: 720,
        }
    }
}

impl fmt::Display for SensorGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A contiguous batch of events.
///
/// `t_start` is inclusive and `t_end` exclusive. Time-bounded slices carry
/// their window; count-bounded slices span from the first event's timestamp
/// to one past the last event's timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSlice {
    pub t_start: u64,
    pub t_end: u64,
    pub events: Vec<Event>,
}

impl EventSlice {
    pub fn new(t_start: u64, t_end: u64, events: Vec<Event>) -> Self {
        Self {
            t_start,
            t_end,
            events,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Timestamp of the first event, if any.
    pub fn min_t(&self) -> Option<u64> {
        self.events.first().map(|e| e.t)
    }

    /// Timestamp of the last event, if any. Events are ordered, so this is
    /// also the highest timestamp of the slice.
    pub fn max_t(&self) -> Option<u64> {
        self.events.last().map(|e| e.t)
    }
}
