//! Partitioning an event stream into consecutive slices.
//!
//! Time windows are aligned to multiples of the window length counted from
//! t=0, so a 1000µs window always ends on a whole millisecond. Slices never
//! share an event, and concatenating them gives back the input stream.

use crate::source::{EventSource, SourceError};
use crate::types::{Event, EventSlice, SensorGeometry};
use thiserror::Error;

/// Errors that can occur while slicing.
#[derive(Error, Debug)]
pub enum SliceError {
    #[error("Invalid slice condition: {0}")]
    InvalidCondition(String),

    #[error("Timestamp went backwards: {current}us after {previous}us")]
    TimestampRegression { previous: u64, current: u64 },

    #[error(transparent)]
    Source(#[from] SourceError),
}

/// When to close a slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceCondition {
    /// Every `delta_us` microseconds of stream time.
    ByTime { delta_us: u64 },
    /// Every `events` events.
    ByCount { events: usize },
    /// At the end of each time window, or earlier once `events` accumulate.
    Mixed { delta_us: u64, events: usize },
}

impl SliceCondition {
    pub fn delta_us(&self) -> Option<u64> {
        match *self {
            Self::ByTime { delta_us } | Self::Mixed { delta_us, .. } => Some(delta_us),
            Self::ByCount { .. } => None,
        }
    }

    pub fn max_events(&self) -> Option<usize> {
        match *self {
            Self::ByCount { events } | Self::Mixed { events, .. } => Some(events),
            Self::ByTime { .. } => None,
        }
    }
}

impl Default for SliceCondition {
    fn default() -> Self {
        Self::ByTime { delta_us: 10_000 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlicerConfig {
    pub condition: SliceCondition,
    /// Emit a slice for every time window, even one without events.
    ///
    /// Only meaningful for time-bounded conditions. An empty source then
    /// still yields a single empty slice.
    pub emit_empty_ticks: bool,
}

impl SlicerConfig {
    pub fn new(condition: SliceCondition) -> Self {
        Self {
            condition,
            emit_empty_ticks: false,
        }
    }

    pub fn with_empty_ticks(mut self, emit_empty_ticks: bool) -> Self {
        self.emit_empty_ticks = emit_empty_ticks;
        self
    }
}

#[inline]
fn align_down(t: u64, delta: u64) -> u64 {
    t - t % delta
}

/// Pull-based slicer over an [`EventSource`].
///
/// Yields `Result<EventSlice, SliceError>`; after an error or the end of the
/// source it yields nothing more.
pub struct Slicer<S> {
    source: S,
    config: SlicerConfig,
    buffer: Vec<Event>,
    pending: Option<Event>,
    window_start: Option<u64>,
    slice_start: Option<u64>,
    split_in_window: bool,
    last_t: Option<u64>,
    done: bool,
}

impl<S: EventSource> Slicer<S> {
    pub fn new(source: S, config: SlicerConfig) -> Result<Self, SliceError> {
        if config.condition.delta_us() == Some(0) {
            return Err(SliceError::InvalidCondition(
                "time window must be at least 1us".to_string(),
            ));
        }
        if config.condition.max_events() == Some(0) {
            return Err(SliceError::InvalidCondition(
                "event count must be at least 1".to_string(),
            ));
        }
        if config.emit_empty_ticks && config.condition.delta_us().is_none() {
            log::debug!("Empty ticks have no effect when slicing by count");
        }

        Ok(Self {
            source,
            config,
            buffer: Vec::new(),
            pending: None,
            window_start: None,
            slice_start: None,
            split_in_window: false,
            last_t: None,
            done: false,
        })
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn into_source(self) -> S {
        self.source
    }

    pub fn geometry(&self) -> SensorGeometry {
        self.source.geometry()
    }

    pub fn config(&self) -> &SlicerConfig {
        &self.config
    }

    fn next_slice(&mut self) -> Result<Option<EventSlice>, SliceError> {
        loop {
            let event = match self.pending.take() {
                Some(event) => event,
                None => match self.source.next_event()? {
                    Some(event) => {
                        self.check_order(&event)?;
                        event
                    }
                    None => return Ok(self.finish()),
                },
            };

            let mut window_start = None;
            if let Some(delta) = self.config.condition.delta_us() {
                let start = *self.window_start.get_or_insert(align_down(event.t, delta));
                let end = start.saturating_add(delta);

                if event.t >= end {
                    // Window closed; revisit this event against the next one
                    self.pending = Some(event);
                    let split = std::mem::replace(&mut self.split_in_window, false);
                    self.window_start = Some(if self.config.emit_empty_ticks {
                        end
                    } else {
                        align_down(event.t, delta)
                    });

                    let slice_start = self.slice_start.take().unwrap_or(start);
                    // A count split already covered the start of this window
                    let tick = self.config.emit_empty_ticks && !split;
                    if !self.buffer.is_empty() || tick {
                        return Ok(Some(self.emit(slice_start, end)));
                    }
                    continue;
                }
                window_start = Some(start);
            }

            if self.buffer.is_empty() && (window_start.is_none() || self.split_in_window) {
                self.slice_start = Some(event.t);
            }
            self.buffer.push(event);

            if let Some(max) = self.config.condition.max_events() {
                if self.buffer.len() >= max {
                    let start = self.slice_start.take().or(window_start).unwrap_or(event.t);
                    self.split_in_window = window_start.is_some();
                    return Ok(Some(self.emit(start, event.t.saturating_add(1))));
                }
            }
        }
    }

    /// Flushes the partial slice once the source is exhausted.
    fn finish(&mut self) -> Option<EventSlice> {
        self.done = true;
        let delta = self.config.condition.delta_us();

        let Some(last) = self.buffer.last().copied() else {
            return match delta {
                Some(delta) if self.config.emit_empty_ticks && self.last_t.is_none() => {
                    Some(self.emit(0, delta))
                }
                _ => None,
            };
        };

        let start = self
            .slice_start
            .take()
            .or(self.window_start)
            .unwrap_or(self.buffer[0].t);
        let end = match (delta, self.window_start) {
            (Some(delta), Some(window_start)) => window_start.saturating_add(delta),
            _ => last.t.saturating_add(1),
        };
        Some(self.emit(start, end))
    }

    fn emit(&mut self, t_start: u64, t_end: u64) -> EventSlice {
        let events = std::mem::take(&mut self.buffer);
        log::trace!(
            "Slice [{}, {}) with {} events",
            t_start,
            t_end,
            events.len()
        );
        EventSlice::new(t_start, t_end, events)
    }

    fn check_order(&mut self, event: &Event) -> Result<(), SliceError> {
        if let Some(previous) = self.last_t {
            if event.t < previous {
                return Err(SliceError::TimestampRegression {
                    previous,
                    current: event.t,
                });
            }
        }
        self.last_t = Some(event.t);
        Ok(())
    }
}

impl<S: EventSource> Iterator for Slicer<S> {
    type Item = Result<EventSlice, SliceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_slice() {
            Ok(Some(slice)) => Some(Ok(slice)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use crate::types::Polarity;

    fn ev(t: u64) -> Event {
        Event::new((t % 7) as u16, (t % 5) as u16, Polarity::Positive, t)
    }

    fn slice_all(times: &[u64], config: SlicerConfig) -> Vec<EventSlice> {
        let source = MemorySource::new(SensorGeometry::new(8, 8), times.iter().map(|&t| ev(t)));
        Slicer::new(source, config)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    fn times(slice: &EventSlice) -> Vec<u64> {
        slice.events.iter().map(|e| e.t).collect()
    }

    #[test]
    fn test_time_windows_aligned_to_zero() {
        let slices = slice_all(
            &[100, 500, 1200, 1800, 2500],
            SlicerConfig::new(SliceCondition::ByTime { delta_us: 1000 }),
        );
        let got: Vec<_> = slices.iter().map(|s| (s.t_start, s.t_end, times(s))).collect();
        assert_eq!(
            got,
            vec![
                (0, 1000, vec![100, 500]),
                (1000, 2000, vec![1200, 1800]),
                (2000, 3000, vec![2500]),
            ]
        );
    }

    #[test]
    fn test_time_gaps_skipped_without_ticks() {
        let slices = slice_all(
            &[100, 3500],
            SlicerConfig::new(SliceCondition::ByTime { delta_us: 1000 }),
        );
        assert_eq!(slices.len(), 2);
        assert_eq!((slices[1].t_start, slices[1].t_end), (3000, 4000));
    }

    #[test]
    fn test_time_gaps_emit_empty_ticks() {
        let slices = slice_all(
            &[100, 3500],
            SlicerConfig::new(SliceCondition::ByTime { delta_us: 1000 }).with_empty_ticks(true),
        );
        let got: Vec<_> = slices.iter().map(|s| (s.t_start, s.len())).collect();
        assert_eq!(got, vec![(0, 1), (1000, 0), (2000, 0), (3000, 1)]);
    }

    #[test]
    fn test_by_count() {
        let slices = slice_all(
            &[10, 20, 30, 40, 50],
            SlicerConfig::new(SliceCondition::ByCount { events: 2 }),
        );
        let got: Vec<_> = slices.iter().map(|s| (s.t_start, s.t_end, times(s))).collect();
        assert_eq!(
            got,
            vec![
                (10, 21, vec![10, 20]),
                (30, 41, vec![30, 40]),
                (50, 51, vec![50]),
            ]
        );
    }

    #[test]
    fn test_mixed_splits_inside_window() {
        let slices = slice_all(
            &[100, 200, 300, 1500],
            SlicerConfig::new(SliceCondition::Mixed {
                delta_us: 1000,
                events: 2,
            }),
        );
        let got: Vec<_> = slices.iter().map(|s| (s.t_start, s.t_end, times(s))).collect();
        assert_eq!(
            got,
            vec![
                (0, 201, vec![100, 200]),
                (300, 1000, vec![300]),
                (1000, 2000, vec![1500]),
            ]
        );
    }

    #[test]
    fn test_mixed_with_ticks_skips_tick_after_count_split() {
        let config = SlicerConfig::new(SliceCondition::Mixed {
            delta_us: 1000,
            events: 2,
        })
        .with_empty_ticks(true);

        let slices = slice_all(&[100, 200, 1500], config);
        let got: Vec<_> = slices.iter().map(|s| (s.t_start, s.t_end, s.len())).collect();
        assert_eq!(got, vec![(0, 201, 2), (1000, 2000, 1)]);

        // Windows with no events at all still tick
        let slices = slice_all(&[100, 200, 3500], config);
        let got: Vec<_> = slices.iter().map(|s| (s.t_start, s.t_end, s.len())).collect();
        assert_eq!(
            got,
            vec![(0, 201, 2), (1000, 2000, 0), (2000, 3000, 0), (3000, 4000, 1)]
        );
    }

    #[test]
    fn test_empty_source_yields_nothing() {
        assert!(slice_all(&[], SlicerConfig::default()).is_empty());
        assert!(slice_all(&[], SlicerConfig::new(SliceCondition::ByCount { events: 3 })).is_empty());
    }

    #[test]
    fn test_empty_source_with_ticks_yields_one_empty_slice() {
        let slices = slice_all(
            &[],
            SlicerConfig::new(SliceCondition::ByTime { delta_us: 500 }).with_empty_ticks(true),
        );
        assert_eq!(slices, vec![EventSlice::new(0, 500, Vec::new())]);
    }

    #[test]
    fn test_concatenation_equals_input() {
        // Deterministic pseudo-random timestamps with repeats and gaps
        let mut state = 0x2545_f491_u64;
        let mut t = 0u64;
        let input: Vec<u64> = (0..2000)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                t += (state >> 33) % 400;
                t
            })
            .collect();

        let configs = [
            SlicerConfig::new(SliceCondition::ByTime { delta_us: 1000 }),
            SlicerConfig::new(SliceCondition::ByTime { delta_us: 37 }).with_empty_ticks(true),
            SlicerConfig::new(SliceCondition::ByCount { events: 13 }),
            SlicerConfig::new(SliceCondition::Mixed {
                delta_us: 5000,
                events: 7,
            }),
        ];

        for config in configs {
            let slices = slice_all(&input, config);
            let joined: Vec<u64> = slices.iter().flat_map(times).collect();
            assert_eq!(joined, input, "{:?}", config);

            for slice in &slices {
                assert!(slice.t_start < slice.t_end);
                assert!(slice.events.iter().all(|e| e.t >= slice.t_start && e.t < slice.t_end));
                if !config.emit_empty_ticks {
                    assert!(!slice.is_empty());
                }
            }
            for pair in slices.windows(2) {
                if config.condition.max_events().is_none() {
                    assert!(pair[0].t_end <= pair[1].t_start);
                }
            }
        }
    }

    #[test]
    fn test_timestamp_regression_is_an_error() {
        let source = MemorySource::new(SensorGeometry::new(8, 8), [ev(100), ev(50)]);
        let mut slicer = Slicer::new(source, SlicerConfig::default()).unwrap();
        assert!(matches!(
            slicer.next(),
            Some(Err(SliceError::TimestampRegression {
                previous: 100,
                current: 50
            }))
        ));
        assert!(slicer.next().is_none());
    }

    #[test]
    fn test_zero_thresholds_rejected() {
        let source = MemorySource::new(SensorGeometry::new(8, 8), []);
        let result = Slicer::new(
            source.clone(),
            SlicerConfig::new(SliceCondition::ByTime { delta_us: 0 }),
        );
        assert!(matches!(result, Err(SliceError::InvalidCondition(_))));
        let result = Slicer::new(source, SlicerConfig::new(SliceCondition::ByCount { events: 0 }));
        assert!(matches!(result, Err(SliceError::InvalidCondition(_))));
    }
}
