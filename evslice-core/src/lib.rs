//! Event-camera stream slicing and frame accumulation.
//!
//! This crate reads asynchronous brightness-change events from a recording
//! (or a live camera), groups them into consecutive slices by time window or
//! event count, and renders each slice into a raster frame for display. A
//! running statistics tracker can follow the same slices.
//!
//! # Example
//!
//! ```no_run
//! use evslice_core::{source, EventSource, Frame, FrameGenerator, Slicer, SlicerConfig, StatsTracker};
//! use std::path::Path;
//!
//! let source = source::open(Some(Path::new("recording.raw"))).unwrap();
//! let geometry = source.geometry();
//! let slicer = Slicer::new(source, SlicerConfig::default()).unwrap();
//!
//! let generator = FrameGenerator::default();
//! let mut frame = Frame::for_geometry(geometry).unwrap();
//! let mut stats = StatsTracker::new();
//!
//! for slice in slicer {
//!     let slice = slice.unwrap();
//!     generator.generate_frame(&slice, &mut frame).unwrap();
//!     println!("{}", stats.update(&slice));
//! }
//! println!("{}", stats.finalize());
//! ```
//!
//! # Features
//!
//! - Lazy EVT 3.0 `.raw` and CSV recording sources
//! - Time, count and mixed slicing, with optional empty ticks
//! - BGR frame rendering with selectable palettes
//! - Non-blocking frame presentation and a threaded slice producer

pub mod display;
pub mod display_loop;
pub mod evt3;
pub mod frame;
pub mod output;
pub mod pipeline;
pub mod slicer;
pub mod source;
pub mod stats;
pub mod types;

// Re-export commonly used types
pub use display::{Display, HeadlessDisplay, KeyEvent, LatestFrameSlot, SnapshotDisplay};
pub use display_loop::{CloseReason, DisplayLoop, LoopError, LoopState};
pub use frame::{Frame, FrameError, FrameGenerator, Palette};
pub use output::{FieldOrder, OutputError};
pub use slicer::{SliceCondition, SliceError, Slicer, SlicerConfig};
pub use source::{EventSource, SourceError};
pub use stats::{RunningStats, SliceSnapshot, StatsTracker, Summary};
pub use types::{Event, EventSlice, Polarity, SensorGeometry};
