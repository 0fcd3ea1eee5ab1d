//! Exclusive device capture.
//!
//! Reads kernel events from a single `/dev/input/event*` node and streams
//! them to a sink, one record at a time, with no output buffering: each
//! event must be observable downstream the moment it is read.
//!
//! The raw event stream is used deliberately. When the kernel drops events
//! it opens a resynchronization window (`SYN_DROPPED` … `SYN_REPORT`), and
//! everything inside that window is state reconciliation rather than user
//! input. Those records are drained and discarded here instead of being
//! forwarded downstream.

use crate::error::{Error, Result};
use crate::event::{self, EventRecord};
use evdev::raw_stream::RawDevice;
use std::io::{self, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;
use std::time::SystemTime;

/// Tracks whether the stream is inside a kernel resynchronization window.
#[derive(Default)]
struct SyncFilter {
    resyncing: bool,
}

impl SyncFilter {
    /// Decide whether a record may be forwarded downstream.
    ///
    /// The window opens at `SYN_DROPPED` and closes at the next
    /// `SYN_REPORT`; neither delimiter nor anything between them is
    /// admitted.
    fn admit(&mut self, record: &EventRecord) -> bool {
        if self.resyncing {
            if record.is_report() {
                self.resyncing = false;
            }
            false
        } else if record.is_dropped_marker() {
            self.resyncing = true;
            false
        } else {
            true
        }
    }
}

/// Capture events from `devnode` into `sink` until the device goes away.
///
/// With `grab` set the device is acquired exclusively; a denied grab is
/// [`Error::DeviceBusy`]. Read errors are fatal except for the transient
/// no-data case, which is retried, and device removal, which ends the
/// capture cleanly.
pub fn capture<W: Write>(devnode: &Path, grab: bool, sink: &mut W) -> Result<()> {
    let mut device = RawDevice::open(devnode)?;
    log::debug!(
        "capturing from {} ({})",
        devnode.display(),
        device.name().unwrap_or("unnamed")
    );

    if grab {
        device.grab().map_err(|e| {
            if e.raw_os_error() == Some(libc::EBUSY) {
                Error::DeviceBusy(devnode.display().to_string())
            } else {
                Error::Io(e)
            }
        })?;
    }

    let result = read_loop(&mut device, sink);

    if grab {
        let _ = device.ungrab();
    }
    result
}

fn read_loop<W: Write>(device: &mut RawDevice, sink: &mut W) -> Result<()> {
    let mut filter = SyncFilter::default();

    loop {
        wait_readable(device.as_raw_fd())?;

        let events = match device.fetch_events() {
            Ok(events) => events,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) if e.raw_os_error() == Some(libc::ENODEV) => {
                log::debug!("device removed, ending capture");
                return Ok(());
            }
            Err(e) => return Err(Error::Io(e)),
        };

        for input in events {
            let record = to_record(&input);
            if !filter.admit(&record) {
                continue;
            }
            match emit(sink, &record) {
                Ok(()) => {}
                Err(Error::Io(e)) if e.kind() == io::ErrorKind::BrokenPipe => {
                    log::debug!("downstream closed, ending capture");
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Write one record and flush it through immediately.
fn emit<W: Write>(sink: &mut W, record: &EventRecord) -> Result<()> {
    event::write_event(sink, record)?;
    sink.flush()?;
    Ok(())
}

fn to_record(input: &evdev::InputEvent) -> EventRecord {
    let (sec, usec) = match input.timestamp().duration_since(SystemTime::UNIX_EPOCH) {
        Ok(elapsed) => (elapsed.as_secs() as i64, elapsed.subsec_micros() as i64),
        Err(_) => (0, 0),
    };
    EventRecord::with_time(sec, usec, input.event_type().0, input.code(), input.value())
}

fn wait_readable(fd: RawFd) -> Result<()> {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };

    loop {
        let rc = unsafe { libc::poll(&mut pollfd, 1, -1) };
        if rc > 0 {
            return Ok(());
        }
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(Error::Io(err));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EV_KEY, EV_REL, EV_SYN, SYN_DROPPED, SYN_REPORT};

    fn record(event_type: u16, code: u16, value: i32) -> EventRecord {
        EventRecord::new(event_type, code, value)
    }

    #[test]
    fn test_normal_events_pass_through() {
        let mut filter = SyncFilter::default();
        assert!(filter.admit(&record(EV_KEY, 30, 1)));
        assert!(filter.admit(&record(EV_SYN, SYN_REPORT, 0)));
        assert!(filter.admit(&record(EV_KEY, 30, 0)));
        assert!(filter.admit(&record(EV_SYN, SYN_REPORT, 0)));
    }

    #[test]
    fn test_resync_window_is_suppressed() {
        let mut filter = SyncFilter::default();
        assert!(filter.admit(&record(EV_KEY, 30, 1)));

        // Kernel dropped events: everything up to and including the closing
        // report is reconciliation, not input.
        assert!(!filter.admit(&record(EV_SYN, SYN_DROPPED, 0)));
        assert!(!filter.admit(&record(EV_KEY, 31, 1)));
        assert!(!filter.admit(&record(EV_REL, 0, -5)));
        assert!(!filter.admit(&record(EV_SYN, SYN_REPORT, 0)));

        // Back to normal afterwards.
        assert!(filter.admit(&record(EV_KEY, 32, 1)));
        assert!(filter.admit(&record(EV_SYN, SYN_REPORT, 0)));
    }

    #[test]
    fn test_consecutive_drops() {
        let mut filter = SyncFilter::default();
        assert!(!filter.admit(&record(EV_SYN, SYN_DROPPED, 0)));
        assert!(!filter.admit(&record(EV_SYN, SYN_DROPPED, 0)));
        assert!(!filter.admit(&record(EV_SYN, SYN_REPORT, 0)));
        assert!(filter.admit(&record(EV_KEY, 30, 1)));
    }
}
