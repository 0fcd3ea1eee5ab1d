//! Fixed-size kernel event records and their stream codec.
//!
//! Every byte stream in the toolkit carries a sequence of `EventRecord`s,
//! each laid out exactly like the host kernel's `struct input_event`. The
//! record is the atomic unit: a partial record on a stream is an error, not
//! a truncation.

use crate::error::{Error, Result};
use std::io::{self, Read, Write};
use std::mem;

// Event types (linux/input-event-codes.h).
pub const EV_SYN: u16 = 0x00;
pub const EV_KEY: u16 = 0x01;
pub const EV_REL: u16 = 0x02;
pub const EV_ABS: u16 = 0x03;
pub const EV_MSC: u16 = 0x04;
pub const EV_SW: u16 = 0x05;
pub const EV_LED: u16 = 0x11;
pub const EV_SND: u16 = 0x12;
pub const EV_REP: u16 = 0x14;
pub const EV_FF: u16 = 0x15;
pub const EV_PWR: u16 = 0x16;
pub const EV_FF_STATUS: u16 = 0x17;

// Synchronization codes.
pub const SYN_REPORT: u16 = 0;
pub const SYN_CONFIG: u16 = 1;
pub const SYN_MT_REPORT: u16 = 2;
pub const SYN_DROPPED: u16 = 3;

// Auto-repeat codes.
pub const REP_DELAY: u16 = 0;
pub const REP_PERIOD: u16 = 1;

/// One kernel input event, in host layout.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct EventRecord {
    pub time: libc::timeval,
    pub event_type: u16,
    pub code: u16,
    pub value: i32,
}

/// Size of one event record on the wire.
pub const EVENT_SIZE: usize = mem::size_of::<EventRecord>();

impl EventRecord {
    /// Create a record with a zeroed timestamp.
    ///
    /// The kernel stamps events on injection, so a zero time is fine for
    /// anything headed into a virtual device.
    pub fn new(event_type: u16, code: u16, value: i32) -> Self {
        Self {
            time: libc::timeval {
                tv_sec: 0,
                tv_usec: 0,
            },
            event_type,
            code,
            value,
        }
    }

    /// Create a record with an explicit timestamp.
    pub fn with_time(sec: i64, usec: i64, event_type: u16, code: u16, value: i32) -> Self {
        Self {
            time: libc::timeval {
                tv_sec: sec as libc::time_t,
                tv_usec: usec as libc::suseconds_t,
            },
            event_type,
            code,
            value,
        }
    }

    /// Whether this is the marker the kernel emits after dropping events.
    pub fn is_dropped_marker(&self) -> bool {
        self.event_type == EV_SYN && self.code == SYN_DROPPED
    }

    /// Whether this closes an event batch.
    pub fn is_report(&self) -> bool {
        self.event_type == EV_SYN && self.code == SYN_REPORT
    }

    /// Reinterpret a wire buffer as a record.
    pub fn from_bytes(buf: &[u8; EVENT_SIZE]) -> Self {
        // Safety: EventRecord is repr(C) with no invalid bit patterns, and
        // read_unaligned tolerates the byte buffer's alignment.
        unsafe { (buf.as_ptr() as *const EventRecord).read_unaligned() }
    }

    /// View the record as its wire bytes.
    pub fn as_bytes(&self) -> &[u8] {
        // Safety: repr(C) with the kernel's own layout; no padding on
        // supported targets.
        unsafe { std::slice::from_raw_parts(self as *const _ as *const u8, EVENT_SIZE) }
    }
}

impl PartialEq for EventRecord {
    fn eq(&self, other: &Self) -> bool {
        self.time.tv_sec == other.time.tv_sec
            && self.time.tv_usec == other.time.tv_usec
            && self.event_type == other.event_type
            && self.code == other.code
            && self.value == other.value
    }
}

impl Eq for EventRecord {}

/// Read exactly one record from `source`.
///
/// Returns `Ok(None)` on end-of-stream at a record boundary. A stream ending
/// mid-record is a protocol error, never a silent truncation.
pub fn read_event<R: Read + ?Sized>(source: &mut R) -> Result<Option<EventRecord>> {
    let mut buf = [0u8; EVENT_SIZE];
    let mut filled = 0;

    while filled < EVENT_SIZE {
        match source.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(Error::Protocol(format!(
                    "short event record: {filled} of {EVENT_SIZE} bytes"
                )));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        }
    }

    Ok(Some(EventRecord::from_bytes(&buf)))
}

/// Write one record to `sink` as a single contiguous block.
pub fn write_event<W: Write + ?Sized>(sink: &mut W, event: &EventRecord) -> Result<()> {
    sink.write_all(event.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_record_size_matches_kernel_struct() {
        assert_eq!(EVENT_SIZE, mem::size_of::<libc::input_event>());
    }

    #[test]
    fn test_codec_round_trip() {
        let mut wire = Vec::new();
        for value in 0..1000 {
            let event = EventRecord::with_time(7, 125_000, EV_KEY, 30, value);
            write_event(&mut wire, &event).unwrap();
        }
        assert_eq!(wire.len(), 1000 * EVENT_SIZE);

        let mut source = Cursor::new(wire);
        for value in 0..1000 {
            let event = read_event(&mut source).unwrap().unwrap();
            assert_eq!(event, EventRecord::with_time(7, 125_000, EV_KEY, 30, value));
        }
        assert!(read_event(&mut source).unwrap().is_none());
    }

    #[test]
    fn test_eof_at_boundary_is_clean() {
        let mut source = Cursor::new(Vec::new());
        assert!(read_event(&mut source).unwrap().is_none());
    }

    #[test]
    fn test_short_record_is_protocol_error() {
        let event = EventRecord::new(EV_REL, 0, -3);
        let mut source = Cursor::new(event.as_bytes()[..EVENT_SIZE - 5].to_vec());
        match read_event(&mut source) {
            Err(Error::Protocol(_)) => {}
            other => panic!("expected protocol error, got {other:?}"),
        }
    }

    #[test]
    fn test_sync_markers() {
        assert!(EventRecord::new(EV_SYN, SYN_DROPPED, 0).is_dropped_marker());
        assert!(EventRecord::new(EV_SYN, SYN_REPORT, 0).is_report());
        assert!(!EventRecord::new(EV_KEY, SYN_DROPPED, 0).is_dropped_marker());
    }
}
