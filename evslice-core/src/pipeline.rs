//! Running the slicer on its own thread.
//!
//! The producer thread reads and slices events while the caller renders.
//! Slices travel through a bounded channel; when it is full the producer
//! waits (block-producer), so memory stays bounded and no slice is lost.

use crate::slicer::{SliceError, Slicer};
use crate::source::EventSource;
use crate::types::EventSlice;
use crossbeam::channel::{self, Receiver};
use std::thread::{self, JoinHandle};

/// Receiving end of a producer thread's slice queue.
///
/// Dropping it stops the producer at its next send.
pub struct SliceQueue {
    rx: Receiver<Result<EventSlice, SliceError>>,
    producer: JoinHandle<u64>,
}

impl SliceQueue {
    pub fn capacity(&self) -> Option<usize> {
        self.rx.capacity()
    }

    /// Slices waiting in the queue.
    pub fn backlog(&self) -> usize {
        self.rx.len()
    }

    /// Closes the queue and waits for the producer thread to exit.
    ///
    /// Returns the number of slices the producer handed over, including any
    /// still queued when it was closed.
    pub fn stop(self) -> thread::Result<u64> {
        let Self { rx, producer } = self;
        drop(rx);
        producer.join()
    }
}

impl Iterator for SliceQueue {
    type Item = Result<EventSlice, SliceError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rx.recv().ok()
    }
}

/// Moves `slicer` onto a producer thread with a queue of `capacity` slices.
pub fn spawn_slicer<S>(slicer: Slicer<S>, capacity: usize) -> std::io::Result<SliceQueue>
where
    S: EventSource + Send + 'static,
{
    let (tx, rx) = channel::bounded(capacity.max(1));
    let producer = thread::Builder::new()
        .name("evslice-producer".to_string())
        .spawn(move || {
            let mut produced = 0u64;
            for slice in slicer {
                if tx.send(slice).is_err() {
                    log::debug!("Slice queue closed after {} slices", produced);
                    return produced;
                }
                produced += 1;
            }
            log::debug!("Producer finished after {} slices", produced);
            produced
        })?;
    Ok(SliceQueue { rx, producer })
}
