//! The interactive render loop.
//!
//! Each tick polls the display for input, pulls one slice, renders it and
//! presents the frame. Cancellation is checked once per tick, so a quit key
//! takes effect within one slice.

use crate::display::{Display, KeyEvent};
use crate::frame::{Frame, FrameError, FrameGenerator};
use crate::slicer::SliceError;
use crate::types::{EventSlice, SensorGeometry};
use thiserror::Error;

/// Errors that abort the loop.
#[derive(Error, Debug)]
pub enum LoopError {
    #[error(transparent)]
    Slice(#[from] SliceError),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// A quit key was pressed.
    UserCancel,
    /// The source ran out of slices.
    SourceExhausted,
    /// A slice could not be read or rendered.
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Closed(CloseReason),
}

pub struct DisplayLoop<D> {
    display: D,
    generator: FrameGenerator,
    frame: Frame,
    state: LoopState,
    ticks: u64,
}

impl<D: Display> DisplayLoop<D> {
    /// Fails if a frame of the sensor's size cannot be allocated.
    pub fn new(
        display: D,
        generator: FrameGenerator,
        geometry: SensorGeometry,
    ) -> Result<Self, FrameError> {
        Ok(Self {
            display,
            generator,
            frame: Frame::for_geometry(geometry)?,
            state: LoopState::Running,
            ticks: 0,
        })
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Number of frames presented so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// The most recently rendered frame.
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn into_display(self) -> D {
        self.display
    }

    /// Runs until the user cancels, the slices run out, or an error occurs.
    ///
    /// `on_slice` sees every slice after it has been rendered, which lets
    /// statistics run alongside the display.
    pub fn run<I, F>(&mut self, slices: I, mut on_slice: F) -> Result<CloseReason, LoopError>
    where
        I: IntoIterator<Item = Result<EventSlice, SliceError>>,
        F: FnMut(&EventSlice),
    {
        let mut slices = slices.into_iter();
        loop {
            match self.tick(&mut slices, &mut on_slice) {
                Ok(LoopState::Running) => {}
                Ok(LoopState::Closed(reason)) => return Ok(reason),
                Err(e) => {
                    self.close(CloseReason::Aborted);
                    return Err(e);
                }
            }
        }
    }

    /// Performs one poll, render and present step.
    pub fn tick<I, F>(&mut self, slices: &mut I, on_slice: &mut F) -> Result<LoopState, LoopError>
    where
        I: Iterator<Item = Result<EventSlice, SliceError>>,
        F: FnMut(&EventSlice),
    {
        if self.state != LoopState::Running {
            return Ok(self.state);
        }

        if self.display.poll_input().iter().any(KeyEvent::is_quit) {
            self.close(CloseReason::UserCancel);
            return Ok(self.state);
        }

        let Some(slice) = slices.next() else {
            self.close(CloseReason::SourceExhausted);
            return Ok(self.state);
        };
        let slice = slice?;

        self.generator.generate_frame(&slice, &mut self.frame)?;
        on_slice(&slice);
        self.display.present(&self.frame);
        self.ticks += 1;

        Ok(LoopState::Running)
    }

    fn close(&mut self, reason: CloseReason) {
        if self.state == LoopState::Running {
            self.display.close();
            self.state = LoopState::Closed(reason);
            log::info!("Display closed after {} frames: {:?}", self.ticks, reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Palette;
    use crate::types::{Event, Polarity};
    use std::collections::VecDeque;

    /// Display with scripted key presses, one batch per poll.
    #[derive(Default)]
    struct ScriptedDisplay {
        input: VecDeque<Vec<KeyEvent>>,
        presented: Vec<Frame>,
        closed: usize,
    }

    impl Display for ScriptedDisplay {
        fn present(&mut self, frame: &Frame) {
            self.presented.push(frame.clone());
        }

        fn poll_input(&mut self) -> Vec<KeyEvent> {
            self.input.pop_front().unwrap_or_default()
        }

        fn close(&mut self) {
            self.closed += 1;
        }
    }

    fn slice(x: u16, t: u64) -> Result<EventSlice, SliceError> {
        Ok(EventSlice::new(
            t,
            t + 10,
            vec![Event::new(x, 0, Polarity::Positive, t)],
        ))
    }

    #[test]
    fn test_runs_until_source_exhausted() {
        let mut display_loop = DisplayLoop::new(
            ScriptedDisplay::default(),
            FrameGenerator::default(),
            SensorGeometry::new(4, 1),
        )
        .unwrap();
        let mut seen = 0;
        let reason = display_loop
            .run(vec![slice(0, 0), slice(1, 10), slice(2, 20)], |_| seen += 1)
            .unwrap();

        assert_eq!(reason, CloseReason::SourceExhausted);
        assert_eq!(seen, 3);
        assert_eq!(display_loop.ticks(), 3);

        let display = display_loop.into_display();
        assert_eq!(display.closed, 1);
        assert_eq!(display.presented.len(), 3);
        // Only the last slice's event is lit in the last frame
        let last = &display.presented[2];
        assert_eq!(last.pixel(2, 0), Some(Palette::Dark.color(Polarity::Positive)));
        assert_eq!(last.pixel(0, 0), Some(Palette::Dark.background()));
    }

    #[test]
    fn test_quit_key_stops_before_next_slice() {
        let display = ScriptedDisplay {
            input: VecDeque::from(vec![vec![], vec![KeyEvent::Char('x'), KeyEvent::Escape]]),
            ..Default::default()
        };
        let mut display_loop =
            DisplayLoop::new(display, FrameGenerator::default(), SensorGeometry::new(4, 1)).unwrap();
        let reason = display_loop
            .run(vec![slice(0, 0), slice(1, 10), slice(2, 20)], |_| {})
            .unwrap();

        assert_eq!(reason, CloseReason::UserCancel);
        assert_eq!(display_loop.state(), LoopState::Closed(CloseReason::UserCancel));
        assert_eq!(display_loop.display().presented.len(), 1);
    }

    #[test]
    fn test_out_of_bounds_slice_aborts() {
        let mut display_loop = DisplayLoop::new(
            ScriptedDisplay::default(),
            FrameGenerator::default(),
            SensorGeometry::new(2, 1),
        )
        .unwrap();
        let result = display_loop.run(vec![slice(0, 0), slice(5, 10), slice(1, 20)], |_| {});

        assert!(matches!(
            result,
            Err(LoopError::Frame(FrameError::DimensionMismatch { x: 5, .. }))
        ));
        assert_eq!(display_loop.state(), LoopState::Closed(CloseReason::Aborted));
        assert_eq!(display_loop.display().presented.len(), 1);
        assert_eq!(display_loop.display().closed, 1);
    }

    #[test]
    fn test_closed_loop_stays_closed() {
        let mut display_loop = DisplayLoop::new(
            ScriptedDisplay::default(),
            FrameGenerator::default(),
            SensorGeometry::new(2, 1),
        )
        .unwrap();
        display_loop.run(Vec::new(), |_| {}).unwrap();
        let mut more = vec![slice(0, 0)].into_iter();
        let state = display_loop.tick(&mut more, &mut |_: &EventSlice| {}).unwrap();
        assert_eq!(state, LoopState::Closed(CloseReason::SourceExhausted));
        assert_eq!(display_loop.display().closed, 1);
    }
}
