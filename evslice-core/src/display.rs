//! Display surfaces and keyboard input.
//!
//! A [`Display`] accepts frames without blocking the caller and reports key
//! presses when polled. Frames handed to a presenter thread go through a
//! [`LatestFrameSlot`]: if the presenter falls behind, older frames are
//! replaced by newer ones.

use crate::frame::Frame;
use crate::output::{self, OutputError};
use crossbeam::channel::{self, Receiver};
use parking_lot::{Condvar, Mutex};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// A key press reported by a display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEvent {
    Escape,
    Char(char),
}

impl KeyEvent {
    /// Escape, `q` and `Q` close the display.
    pub fn is_quit(&self) -> bool {
        matches!(self, Self::Escape | Self::Char('q') | Self::Char('Q'))
    }
}

/// A surface frames are presented on.
pub trait Display {
    /// Hands over a frame. Must not wait for the frame to be drawn.
    fn present(&mut self, frame: &Frame);

    /// Key presses received since the last poll. Never blocks.
    fn poll_input(&mut self) -> Vec<KeyEvent>;

    fn close(&mut self);
}

#[derive(Debug, Default)]
struct SlotState {
    front: Option<Frame>,
    spare: Option<Frame>,
    closed: bool,
    replaced: u64,
}

/// Single-frame mailbox between a producer and a presenter thread.
///
/// The producer copies each frame into the back buffer and publishes it; a
/// frame not yet taken by the presenter is overwritten. Buffers are recycled
/// so steady-state submission does not allocate.
#[derive(Debug, Default)]
pub struct LatestFrameSlot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl LatestFrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a copy of `frame`, replacing any frame still waiting.
    pub fn submit(&self, frame: &Frame) {
        let mut state = self.state.lock();
        let mut buffer = match state.front.take() {
            Some(stale) => {
                state.replaced += 1;
                stale
            }
            None => state.spare.take().unwrap_or_default(),
        };
        buffer.copy_from(frame);
        state.front = Some(buffer);
        drop(state);
        self.ready.notify_one();
    }

    /// Waits for the next frame. Returns `None` once closed and drained.
    pub fn take(&self) -> Option<Frame> {
        let mut state = self.state.lock();
        loop {
            if let Some(frame) = state.front.take() {
                return Some(frame);
            }
            if state.closed {
                return None;
            }
            self.ready.wait(&mut state);
        }
    }

    /// Returns a presented frame's buffer for reuse.
    pub fn recycle(&self, frame: Frame) {
        self.state.lock().spare = Some(frame);
    }

    pub fn close(&self) {
        self.state.lock().closed = true;
        self.ready.notify_all();
    }

    /// Frames overwritten before the presenter took them.
    pub fn replaced(&self) -> u64 {
        self.state.lock().replaced
    }
}

/// Presents frames by saving them as numbered PNG files.
///
/// Encoding runs on a background thread fed through a [`LatestFrameSlot`],
/// so slow disks drop frames rather than slow the caller down.
pub struct SnapshotDisplay {
    slot: Arc<LatestFrameSlot>,
    worker: Option<JoinHandle<u64>>,
    keys: Option<Receiver<KeyEvent>>,
}

impl SnapshotDisplay {
    /// Starts the presenter thread writing `frame_NNNNNN.png` into `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, OutputError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let slot = Arc::new(LatestFrameSlot::new());
        let worker_slot = Arc::clone(&slot);
        let worker = thread::Builder::new()
            .name("evslice-presenter".to_string())
            .spawn(move || present_snapshots(&worker_slot, &dir))?;

        Ok(Self {
            slot,
            worker: Some(worker),
            keys: None,
        })
    }

    pub fn with_keys(mut self, keys: Receiver<KeyEvent>) -> Self {
        self.keys = Some(keys);
        self
    }
}

fn present_snapshots(slot: &LatestFrameSlot, dir: &std::path::Path) -> u64 {
    let mut written = 0u64;
    while let Some(frame) = slot.take() {
        let path = dir.join(format!("frame_{:06}.png", written));
        match output::write_png(&path, &frame) {
            Ok(()) => written += 1,
            Err(e) => log::error!("Failed to write {}: {}", path.display(), e),
        }
        slot.recycle(frame);
    }
    written
}

impl Display for SnapshotDisplay {
    fn present(&mut self, frame: &Frame) {
        self.slot.submit(frame);
    }

    fn poll_input(&mut self) -> Vec<KeyEvent> {
        self.keys
            .as_ref()
            .map(|keys| keys.try_iter().collect())
            .unwrap_or_default()
    }

    fn close(&mut self) {
        self.slot.close();
        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(written) => log::info!(
                    "Wrote {} frames ({} replaced before presentation)",
                    written,
                    self.slot.replaced()
                ),
                Err(_) => log::error!("Presenter thread panicked"),
            }
        }
    }
}

impl Drop for SnapshotDisplay {
    fn drop(&mut self) {
        self.close();
    }
}

/// Accepts frames and discards them, keeping a count.
#[derive(Debug, Default)]
pub struct HeadlessDisplay {
    presented: u64,
    closed: bool,
    keys: Option<Receiver<KeyEvent>>,
}

impl HeadlessDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keys(mut self, keys: Receiver<KeyEvent>) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Display for HeadlessDisplay {
    fn present(&mut self, _frame: &Frame) {
        self.presented += 1;
    }

    fn poll_input(&mut self) -> Vec<KeyEvent> {
        self.keys
            .as_ref()
            .map(|keys| keys.try_iter().collect())
            .unwrap_or_default()
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Turns lines typed on stdin into key events.
///
/// The reader thread blocks on stdin and is left running until stdin closes
/// or the receiver is dropped.
pub fn spawn_stdin_keys() -> std::io::Result<Receiver<KeyEvent>> {
    let (tx, rx) = channel::unbounded();
    thread::Builder::new()
        .name("evslice-keys".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                for key in parse_keys(&line) {
                    if tx.send(key).is_err() {
                        return;
                    }
                }
            }
            log::debug!("stdin closed, key input stopped");
        })?;
    Ok(rx)
}

fn parse_keys(line: &str) -> impl Iterator<Item = KeyEvent> + '_ {
    line.chars().filter(|c| !c.is_whitespace()).map(|c| match c {
        '\u{1b}' => KeyEvent::Escape,
        c => KeyEvent::Char(c),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Palette;
    use std::time::Duration;

    fn filled(color: [u8; 3]) -> Frame {
        let mut frame = Frame::new(2, 2).unwrap();
        frame.fill(color);
        frame
    }

    #[test]
    fn test_quit_keys() {
        assert!(KeyEvent::Escape.is_quit());
        assert!(KeyEvent::Char('q').is_quit());
        assert!(KeyEvent::Char('Q').is_quit());
        assert!(!KeyEvent::Char('x').is_quit());
    }

    #[test]
    fn test_parse_keys() {
        let keys: Vec<_> = parse_keys("a \u{1b}q").collect();
        assert_eq!(
            keys,
            vec![KeyEvent::Char('a'), KeyEvent::Escape, KeyEvent::Char('q')]
        );
    }

    #[test]
    fn test_slot_keeps_latest_frame() {
        let slot = LatestFrameSlot::new();
        slot.submit(&filled([1, 1, 1]));
        slot.submit(&filled([2, 2, 2]));
        slot.submit(&filled([3, 3, 3]));

        assert_eq!(slot.replaced(), 2);
        assert_eq!(slot.take(), Some(filled([3, 3, 3])));

        slot.close();
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn test_slot_hands_frames_across_threads() {
        let slot = Arc::new(LatestFrameSlot::new());
        let consumer = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || {
                let mut last = None;
                while let Some(frame) = slot.take() {
                    last = frame.pixel(0, 0);
                    slot.recycle(frame);
                }
                last
            })
        };

        for v in 0..50u8 {
            slot.submit(&filled([v, v, v]));
        }
        thread::sleep(Duration::from_millis(20));
        slot.close();

        // Intermediate frames may be skipped but the last one is delivered
        assert_eq!(consumer.join().unwrap(), Some([49, 49, 49]));
    }

    #[test]
    fn test_snapshot_display_writes_pngs() {
        let dir = tempfile::tempdir().unwrap();
        let mut display = SnapshotDisplay::new(dir.path()).unwrap();
        display.present(&filled(Palette::Dark.background()));
        display.close();

        let count = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "png"))
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_headless_display_polls_keys() {
        let (tx, rx) = channel::unbounded();
        let mut display = HeadlessDisplay::new().with_keys(rx);
        assert!(display.poll_input().is_empty());
        tx.send(KeyEvent::Char('q')).unwrap();
        assert_eq!(display.poll_input(), vec![KeyEvent::Char('q')]);
        display.present(&Frame::new(1, 1).unwrap());
        assert_eq!(display.presented(), 1);
    }
}
