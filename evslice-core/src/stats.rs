//! Running statistics over a sliced event stream.

use crate::types::EventSlice;
use std::fmt;

/// Below this stream duration no average rate is reported.
const MIN_RATE_DURATION_S: f64 = 1.0;

/// Totals accumulated over a run. Both fields only ever increase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunningStats {
    pub total_count: u64,
    /// Highest event timestamp seen, in microseconds
    pub last_t: u64,
}

/// What one slice contributed, plus the totals so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceSnapshot {
    pub count_this_slice: usize,
    pub total_count: u64,
    pub min_t: Option<u64>,
    pub max_t: Option<u64>,
}

/// End-of-run figures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub total_count: u64,
    pub duration_s: f64,
    /// Average events per second, only for runs of at least one second
    pub rate: Option<f64>,
}

#[derive(Debug, Default)]
pub struct StatsTracker {
    stats: RunningStats,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds a slice into the totals. Empty slices leave them unchanged.
    pub fn update(&mut self, slice: &EventSlice) -> SliceSnapshot {
        if let Some(max_t) = slice.max_t() {
            self.stats.total_count += slice.len() as u64;
            self.stats.last_t = self.stats.last_t.max(max_t);
        }
        SliceSnapshot {
            count_this_slice: slice.len(),
            total_count: self.stats.total_count,
            min_t: slice.min_t(),
            max_t: slice.max_t(),
        }
    }

    pub fn stats(&self) -> RunningStats {
        self.stats
    }

    pub fn finalize(&self) -> Summary {
        Summary::from(self.stats)
    }
}

impl From<RunningStats> for Summary {
    fn from(stats: RunningStats) -> Self {
        let duration_s = stats.last_t as f64 / 1.0e6;
        let rate = (duration_s >= MIN_RATE_DURATION_S).then(|| stats.total_count as f64 / duration_s);
        Self {
            total_count: stats.total_count,
            duration_s,
            rate,
        }
    }
}

impl fmt::Display for SliceSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "----- New event slice! -----")?;
        match (self.min_t, self.max_t) {
            (Some(min_t), Some(max_t)) => {
                writeln!(f, "There were {} events in this event slice.", self.count_this_slice)?;
                writeln!(f, "There were {} total events up to now.", self.total_count)?;
                writeln!(
                    f,
                    "The current event slice included events from {} to {} microseconds.",
                    min_t, max_t
                )?;
            }
            _ => writeln!(f, "The current event slice is empty.")?,
        }
        write!(f, "----- End of the event slice! -----")
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "There were {} events in total.", self.total_count)?;
        write!(f, "The total duration was {:.2} seconds.", self.duration_s)?;
        if let Some(rate) = self.rate {
            write!(f, "\nThere were {:.2} events per second on average.", rate)?;
        }
        Ok(())
    }
}
