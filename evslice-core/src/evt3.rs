#![allow(clippy::unusual_byte_groupings)]
//! Streaming EVT 3.0 decoder.
//!
//! EVT 3.0 recordings are a stream of little-endian 16-bit words, each
//! carrying a 4-bit type in its most significant bits. The decoder keeps the
//! timestamp, row and polarity state across words and emits Change Detection
//! events as they are completed. [`Evt3Reader`] drives the decoder lazily,
//! one chunk of the underlying reader at a time.

use crate::source::SourceError;
use crate::types::{Event, Polarity, SensorGeometry, MAX_SENSOR_DIM};
use byteorder::{ByteOrder, LittleEndian};
use std::collections::VecDeque;
use std::io::{BufRead, ErrorKind};

const MAX_TIMESTAMP_BASE: u64 = ((1u64 << 12) - 1) << 12; // 16773120us
const TIME_LOOP: u64 = MAX_TIMESTAMP_BASE + (1 << 12); // 16777216us
const LOOP_THRESHOLD: u64 = 10 << 12;

/// Number of 16-bit words decoded per read from the underlying reader.
const CHUNK_WORDS: usize = 64 * 1024;

/// Raw word types of the EVT 3.0 encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WordKind {
    /// [15:12] 0x0 | [11] system type | [10:0] y
    AddrY,
    /// [15:12] 0x2 | [11] polarity | [10:0] x
    AddrX,
    /// [15:12] 0x3 | [11] polarity | [10:0] x
    VectBaseX,
    /// [15:12] 0x4 | [11:0] validity mask
    Vect12,
    /// [15:12] 0x5 | [7:0] validity mask
    Vect8,
    /// [15:12] 0x6 | [11:0] lower timestamp bits
    TimeLow,
    /// [15:12] 0x8 | [11:0] upper timestamp bits
    TimeHigh,
    /// External triggers, continued and extension words
    Ignored,
}

impl WordKind {
    #[inline]
    fn of(word: u16) -> Self {
        match word >> 12 {
            0x0 => Self::AddrY,
            0x2 => Self::AddrX,
            0x3 => Self::VectBaseX,
            0x4 => Self::Vect12,
            0x5 => Self::Vect8,
            0x6 => Self::TimeLow,
            0x8 => Self::TimeHigh,
            _ => Self::Ignored,
        }
    }
}

/// Bits 10:0, the coordinate field of address words.
#[inline]
fn coordinate(word: u16) -> u16 {
    word & 0x07FF
}

/// Bit 11, the polarity field of ADDR_X and VECT_BASE_X words.
#[inline]
fn polarity_bit(word: u16) -> u8 {
    ((word >> 11) & 0x1) as u8
}

/// Bits 11:0, the payload of time and VECT_12 words.
#[inline]
fn payload(word: u16) -> u16 {
    word & 0x0FFF
}

/// Stateful EVT 3.0 word decoder.
#[derive(Debug, Default)]
pub struct Evt3Decoder {
    time_base: u64,
    current_time: u64,
    n_time_high_loops: u64,
    time_base_set: bool,

    current_y: u16,
    current_base_x: u16,
    current_polarity: u8,
}

impl Evt3Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes a run of words, appending completed events to `out`.
    ///
    /// Words preceding the first TIME_HIGH carry no usable time reference and
    /// are dropped.
    pub fn decode_words(&mut self, words: &[u16], out: &mut VecDeque<Event>) {
        let mut iter = words.iter();

        if !self.time_base_set {
            for &word in iter.by_ref() {
                if WordKind::of(word) == WordKind::TimeHigh {
                    self.time_base = (payload(word) as u64) << 12;
                    self.current_time = self.time_base;
                    self.time_base_set = true;
                    break;
                }
            }
        }

        for &word in iter {
            match WordKind::of(word) {
                WordKind::AddrX => out.push_back(Event::new(
                    coordinate(word),
                    self.current_y,
                    Polarity::from_bit(polarity_bit(word)),
                    self.current_time,
                )),
                WordKind::Vect12 => self.push_vector(payload(word) as u32, 12, out),
                WordKind::Vect8 => self.push_vector((word & 0x00FF) as u32, 8, out),
                WordKind::AddrY => self.current_y = coordinate(word),
                WordKind::VectBaseX => {
                    self.current_base_x = coordinate(word);
                    self.current_polarity = polarity_bit(word);
                }
                WordKind::TimeHigh => self.process_time_high(word),
                WordKind::TimeLow => {
                    self.current_time = self.time_base + payload(word) as u64;
                }
                WordKind::Ignored => {}
            }
        }
    }

    /// Timestamp of the most recently decoded time word.
    pub fn current_time(&self) -> u64 {
        self.current_time
    }

    #[inline]
    fn process_time_high(&mut self, word: u16) {
        let mut new_time_base =
            ((payload(word) as u64) << 12) + (self.n_time_high_loops * TIME_LOOP);

        // The 24-bit counter wrapped around
        if self.time_base > new_time_base
            && (self.time_base - new_time_base) >= (MAX_TIMESTAMP_BASE - LOOP_THRESHOLD)
        {
            new_time_base += TIME_LOOP;
            self.n_time_high_loops += 1;
        }

        self.time_base = new_time_base;
        self.current_time = self.time_base;
    }

    #[inline]
    fn push_vector(&mut self, mut valid: u32, count: u16, out: &mut VecDeque<Event>) {
        let end_x = self.current_base_x.saturating_add(count);
        let polarity = Polarity::from_bit(self.current_polarity);

        for x in self.current_base_x..end_x {
            if valid & 0x1 != 0 {
                out.push_back(Event::new(x, self.current_y, polarity, self.current_time));
            }
            valid >>= 1;
        }

        self.current_base_x = end_x;
    }
}

/// Lazily decodes an EVT 3.0 recording from a buffered reader.
pub struct Evt3Reader<R> {
    reader: R,
    decoder: Evt3Decoder,
    geometry: SensorGeometry,
    bytes: Vec<u8>,
    words: Vec<u16>,
    carry: Option<u8>,
    pending: VecDeque<Event>,
    eof: bool,
}

impl<R: BufRead> Evt3Reader<R> {
    /// Parses the `%` header, if any, and prepares to decode the body.
    pub fn new(mut reader: R) -> Result<Self, SourceError> {
        let geometry = parse_header(&mut reader)?;
        Ok(Self {
            reader,
            decoder: Evt3Decoder::new(),
            geometry,
            bytes: vec![0u8; CHUNK_WORDS * 2],
            words: Vec::with_capacity(CHUNK_WORDS),
            carry: None,
            pending: VecDeque::new(),
            eof: false,
        })
    }

    pub fn geometry(&self) -> SensorGeometry {
        self.geometry
    }

    /// Returns the next decoded event, or `None` once the recording ends.
    pub fn next_event(&mut self) -> Result<Option<Event>, SourceError> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }
            if self.eof {
                return Ok(None);
            }
            self.fill()?;
        }
    }

    fn fill(&mut self) -> Result<(), SourceError> {
        let mut filled = 0;
        if let Some(byte) = self.carry.take() {
            self.bytes[0] = byte;
            filled = 1;
        }

        let read = loop {
            match self.reader.read(&mut self.bytes[filled..]) {
                Ok(n) => break n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        };

        if read == 0 {
            self.eof = true;
            if filled == 1 {
                log::warn!("Ignoring trailing odd byte at end of EVT3 stream");
            }
            return Ok(());
        }

        let total = filled + read;
        let even = total & !1;
        if total > even {
            self.carry = Some(self.bytes[even]);
        }

        self.words.resize(even / 2, 0);
        LittleEndian::read_u16_into(&self.bytes[..even], &mut self.words);
        self.decoder.decode_words(&self.words, &mut self.pending);
        Ok(())
    }
}

/// Reads header lines starting with `%` and returns the sensor geometry.
fn parse_header<R: BufRead>(reader: &mut R) -> Result<SensorGeometry, SourceError> {
    let mut geometry = SensorGeometry::default();
    let mut line = Vec::new();
    let mut line_no = 0;

    loop {
        let peeked = reader.fill_buf()?;
        if peeked.first() != Some(&b'%') {
            break;
        }

        line.clear();
        reader.read_until(b'\n', &mut line)?;
        line_no += 1;
        let text = String::from_utf8_lossy(&line);

        if text.starts_with("% end") {
            break;
        }
        parse_header_line(text.trim_end(), &mut geometry);
        if !geometry.is_valid() {
            return Err(SourceError::InvalidFormat {
                line: line_no,
                reason: format!(
                    "sensor geometry {} outside 1..={} pixels per side",
                    geometry, MAX_SENSOR_DIM
                ),
            });
        }
    }

    log::debug!("EVT3 header geometry: {}", geometry);
    Ok(geometry)
}

fn parse_header_line(line: &str, geometry: &mut SensorGeometry) {
    if let Some(format) = line.strip_prefix("% format ") {
        // "% format EVT3;width=1280;height=720"
        for part in format.split(';') {
            if let Some((name, value)) = part.split_once('=') {
                match (name, value.parse()) {
                    ("width", Ok(w)) => geometry.width = w,
                    ("height", Ok(h)) => geometry.height = h,
                    _ => {}
                }
            }
        }
    } else if let Some(dims) = line.strip_prefix("% geometry ") {
        // "% geometry 1280x720"
        if let Some((w, h)) = dims.split_once('x') {
            if let (Ok(w), Ok(h)) = (w.parse(), h.parse()) {
                *geometry = SensorGeometry::new(w, h);
            }
        }
    } else if let Some(version) = line.strip_prefix("% evt ") {
        if version != "3.0" {
            log::warn!("Unexpected EVT version {:?}, decoding as 3.0", version);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn decode(words: &[u16]) -> Vec<Event> {
        let mut decoder = Evt3Decoder::new();
        let mut out = VecDeque::new();
        decoder.decode_words(words, &mut out);
        out.into_iter().collect()
    }

    fn to_bytes(words: &[u16]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn test_word_kind() {
        assert_eq!(WordKind::of(0b0000_0_00111110100), WordKind::AddrY);
        assert_eq!(WordKind::of(0b0010_1_00100101100), WordKind::AddrX);
        assert_eq!(WordKind::of(0b1010_0010_0000000_1), WordKind::Ignored);
        assert_eq!(coordinate(0b0010_1_00100101100), 300);
        assert_eq!(polarity_bit(0b0010_1_00100101100), 1);
    }

    #[test]
    fn test_decode_single_event() {
        let events = decode(&[
            0x8000, // TIME_HIGH 0
            0x6064, // TIME_LOW 100
            0x0032, // ADDR_Y 50
            0x2864, // ADDR_X x=100, pol=1
        ]);
        assert_eq!(events, vec![Event::new(100, 50, Polarity::Positive, 100)]);
    }

    #[test]
    fn test_decode_vector_events() {
        let events = decode(&[
            0x8000, // TIME_HIGH
            0x60C8, // TIME_LOW 200
            0x0064, // ADDR_Y 100
            0x3000, // VECT_BASE_X x=0, pol=0
            0x4E38, // VECT_12 0b111000111000
        ]);
        let xs: Vec<u16> = events.iter().map(|e| e.x).collect();
        assert_eq!(xs, vec![3, 4, 5, 9, 10, 11]);
        assert!(events
            .iter()
            .all(|e| e.y == 100 && e.polarity == Polarity::Negative && e.t == 200));
    }

    #[test]
    fn test_words_before_time_high_are_dropped() {
        let events = decode(&[0x0032, 0x2864, 0x8001, 0x2865]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].t, 1 << 12);
    }

    #[test]
    fn test_time_high_loop() {
        let mut decoder = Evt3Decoder::new();
        let mut out = VecDeque::new();
        decoder.decode_words(&[0x8FFF, 0x8000], &mut out);
        assert_eq!(decoder.current_time(), TIME_LOOP);
    }

    #[test]
    fn test_reader_parses_header_and_streams() {
        let mut data = b"% evt 3.0\n% format EVT3;width=640;height=480\n% end\n".to_vec();
        data.extend(to_bytes(&[0x8000, 0x6001, 0x0002, 0x2803, 0x6005, 0x2004]));

        let mut reader = Evt3Reader::new(Cursor::new(data)).unwrap();
        assert_eq!(reader.geometry(), SensorGeometry::new(640, 480));
        assert_eq!(
            reader.next_event().unwrap(),
            Some(Event::new(3, 2, Polarity::Positive, 1))
        );
        assert_eq!(
            reader.next_event().unwrap(),
            Some(Event::new(4, 2, Polarity::Negative, 5))
        );
        assert_eq!(reader.next_event().unwrap(), None);
    }

    #[test]
    fn test_reader_ignores_odd_trailing_byte() {
        let mut data = to_bytes(&[0x8000, 0x6001, 0x2803]);
        data.push(0xAB);
        let mut reader = Evt3Reader::new(Cursor::new(data)).unwrap();
        assert!(reader.next_event().unwrap().is_some());
        assert_eq!(reader.next_event().unwrap(), None);
    }

    #[test]
    fn test_reader_rejects_oversized_header_geometry() {
        let header = b"% evt 3.0\n% format EVT3;width=4000000000;height=4000000000\n% end\n";
        match Evt3Reader::new(Cursor::new(header.to_vec())) {
            Err(SourceError::InvalidFormat { line, .. }) => assert_eq!(line, 2),
            Err(e) => panic!("expected invalid format, got {}", e),
            Ok(_) => panic!("oversized geometry accepted"),
        }

        let zero = b"% geometry 0x480\n".to_vec();
        assert!(matches!(
            Evt3Reader::new(Cursor::new(zero)),
            Err(SourceError::InvalidFormat { line: 1, .. })
        ));
    }

    #[test]
    fn test_header_geometry_line() {
        let mut geometry = SensorGeometry::default();
        parse_header_line("% geometry 320x240", &mut geometry);
        assert_eq!(geometry, SensorGeometry::new(320, 240));
    }
}
