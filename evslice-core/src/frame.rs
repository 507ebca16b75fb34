//! Rendering event slices into raster frames.
//!
//! Each call to [`FrameGenerator::generate_frame`] repaints the whole frame:
//! pixels with no event in the slice go back to the background color, so
//! nothing trails over from earlier slices.

use crate::types::{EventSlice, Polarity, SensorGeometry};
use thiserror::Error;

/// Errors raised while rendering a slice.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("Event at ({x}, {y}) lies outside the {width}x{height} frame")]
    DimensionMismatch {
        x: u16,
        y: u16,
        width: u32,
        height: u32,
    },

    #[error("Frame of {width}x{height} pixels is too large to allocate")]
    TooLarge { width: u32, height: u32 },
}

/// Largest frame side accepted by [`Frame::new`].
pub const MAX_FRAME_DIM: u32 = 1 << 16;

/// A BGR color.
pub type Bgr = [u8; 3];

/// A dense 3-channel 8-bit image in BGR order, row-major.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Frame {
    /// Creates a black frame.
    pub fn new(width: u32, height: u32) -> Result<Self, FrameError> {
        let too_large = FrameError::TooLarge { width, height };
        if width > MAX_FRAME_DIM || height > MAX_FRAME_DIM {
            return Err(too_large);
        }
        let len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(3))
            .ok_or(too_large)?;
        Ok(Self {
            width,
            height,
            data: vec![0; len],
        })
    }

    pub fn for_geometry(geometry: SensorGeometry) -> Result<Self, FrameError> {
        Self::new(geometry.width, geometry.height)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Color at `(x, y)`, or `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<Bgr> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = self.offset(x, y);
        Some([self.data[idx], self.data[idx + 1], self.data[idx + 2]])
    }

    /// Copies `other` into this frame, reallocating only on a size change.
    pub fn copy_from(&mut self, other: &Frame) {
        self.width = other.width;
        self.height = other.height;
        self.data.clone_from(&other.data);
    }

    pub fn fill(&mut self, color: Bgr) {
        for px in self.data.chunks_exact_mut(3) {
            px.copy_from_slice(&color);
        }
    }

    #[inline]
    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 3
    }

    #[inline]
    fn set(&mut self, x: u32, y: u32, color: Bgr) {
        let idx = self.offset(x, y);
        self.data[idx..idx + 3].copy_from_slice(&color);
    }
}

/// Background and polarity colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Palette {
    #[default]
    Dark,
    Light,
    Gray,
}

impl Palette {
    pub fn background(&self) -> Bgr {
        match self {
            Self::Dark => [30, 37, 52],
            Self::Light => [255, 255, 255],
            Self::Gray => [128, 128, 128],
        }
    }

    pub fn color(&self, polarity: Polarity) -> Bgr {
        match (self, polarity) {
            (Self::Dark, Polarity::Positive) => [255, 255, 255],
            (Self::Dark, Polarity::Negative) => [200, 126, 64],
            (Self::Light, Polarity::Positive) => [216, 223, 236],
            (Self::Light, Polarity::Negative) => [64, 126, 201],
            (Self::Gray, Polarity::Positive) => [255, 255, 255],
            (Self::Gray, Polarity::Negative) => [0, 0, 0],
        }
    }
}

impl std::str::FromStr for Palette {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "dark" => Ok(Self::Dark),
            "light" => Ok(Self::Light),
            "gray" | "grey" => Ok(Self::Gray),
            other => Err(format!("unknown palette {:?} (dark, light, gray)", other)),
        }
    }
}

/// Paints event slices onto frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameGenerator {
    palette: Palette,
}

impl FrameGenerator {
    pub fn new(palette: Palette) -> Self {
        Self { palette }
    }

    pub fn palette(&self) -> Palette {
        self.palette
    }

    /// Overwrites `frame` with the events of `slice`.
    ///
    /// The frame is left untouched if any event falls outside it. Events are
    /// painted in stream order, so the latest event wins on a shared pixel.
    pub fn generate_frame(&self, slice: &EventSlice, frame: &mut Frame) -> Result<(), FrameError> {
        if let Some(e) = slice
            .events
            .iter()
            .find(|e| e.x as u32 >= frame.width || e.y as u32 >= frame.height)
        {
            return Err(FrameError::DimensionMismatch {
                x: e.x,
                y: e.y,
                width: frame.width,
                height: frame.height,
            });
        }

        frame.fill(self.palette.background());
        for event in &slice.events {
            frame.set(event.x as u32, event.y as u32, self.palette.color(event.polarity));
        }
        Ok(())
    }
}
