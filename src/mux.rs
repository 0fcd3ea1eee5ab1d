//! Named persistent event queues and the mux roles built on them.
//!
//! Queues are POSIX message queues: kernel-backed, named, bounded FIFOs
//! that outlive the processes using them until explicitly removed. A queue
//! may have many writers and many readers; the queue itself is the
//! synchronization point. All fabric sends are non-blocking — a full queue
//! is surfaced as [`Error::Backpressure`] rather than ever stalling the
//! upstream. The input role's receive is the only blocking receive in the
//! fabric.

use crate::error::{Error, Result};
use crate::event::{self, EventRecord, EVENT_SIZE};
use nix::errno::Errno;
use nix::mqueue::{
    mq_close, mq_getattr, mq_open, mq_receive, mq_send, mq_unlink, MQ_OFlag, MqAttr, MqdT,
};
use nix::sys::stat::Mode;
use std::ffi::CString;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

/// Queue capacity used when none is given at creation.
pub const DEFAULT_CAPACITY: usize = 100;

/// A handle to one named event queue.
pub struct MuxQueue {
    name: String,
    mqd: Option<MqdT>,
    msgsize: usize,
}

/// Queue names live in a shared flat namespace; a single leading slash is
/// the kernel's addressing convention.
fn queue_path(name: &str) -> Result<CString> {
    let trimmed = name.trim_start_matches('/');
    if trimmed.is_empty() {
        return Err(Error::Config("empty queue name".into()));
    }
    CString::new(format!("/{trimmed}"))
        .map_err(|_| Error::Config(format!("queue name contains NUL: {name:?}")))
}

impl MuxQueue {
    /// Create a fresh queue, removing any prior queue of the same name.
    ///
    /// Capacity is in records; the message size is always one event record
    /// and the mode is owner read/write. Idempotent from the caller's
    /// perspective.
    pub fn create(name: &str, capacity: usize) -> Result<()> {
        let path = queue_path(name)?;
        let _ = mq_unlink(path.as_c_str());

        let attr = MqAttr::new(0, capacity as i64, EVENT_SIZE as i64, 0);
        let mqd = mq_open(
            path.as_c_str(),
            MQ_OFlag::O_CREAT | MQ_OFlag::O_EXCL | MQ_OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
            Some(&attr),
        )?;
        mq_close(mqd)?;
        log::debug!("created queue {name} with capacity {capacity}");
        Ok(())
    }

    /// Remove a queue from the namespace.
    pub fn remove(name: &str) -> Result<()> {
        mq_unlink(queue_path(name)?.as_c_str())?;
        Ok(())
    }

    /// Open an existing queue for blocking receives.
    pub fn open_reader(name: &str) -> Result<Self> {
        Self::open(name, MQ_OFlag::O_RDONLY)
    }

    /// Open an existing queue for non-blocking sends.
    pub fn open_writer(name: &str) -> Result<Self> {
        Self::open(name, MQ_OFlag::O_WRONLY | MQ_OFlag::O_NONBLOCK)
    }

    fn open(name: &str, flags: MQ_OFlag) -> Result<Self> {
        let path = queue_path(name)?;
        let mqd = mq_open(path.as_c_str(), flags, Mode::empty(), None)?;
        let msgsize = mq_getattr(&mqd)?.msgsize() as usize;
        Ok(Self {
            name: name.to_owned(),
            mqd: Some(mqd),
            msgsize,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self) -> &MqdT {
        self.mqd.as_ref().expect("queue handle open")
    }

    /// Attempt to enqueue one record without blocking.
    pub fn try_send(&self, record: &EventRecord) -> Result<()> {
        loop {
            return match mq_send(self.handle(), record.as_bytes(), 0) {
                Ok(()) => Ok(()),
                Err(Errno::EINTR) => continue,
                Err(Errno::EAGAIN) => Err(Error::Backpressure(self.name.clone())),
                Err(e) => Err(e.into()),
            };
        }
    }

    /// Blocking receive of one correctly-sized record.
    ///
    /// A message of any other size is [`Error::Protocol`]; the message is
    /// consumed either way.
    pub fn recv_record(&self) -> Result<EventRecord> {
        let mut buf = vec![0u8; self.msgsize.max(EVENT_SIZE)];
        let received = self.recv_raw(&mut buf)?;
        if received != EVENT_SIZE {
            return Err(Error::Protocol(format!(
                "unexpected record size {received} on queue {}",
                self.name
            )));
        }
        let mut raw = [0u8; EVENT_SIZE];
        raw.copy_from_slice(&buf[..EVENT_SIZE]);
        Ok(EventRecord::from_bytes(&raw))
    }

    fn recv_raw(&self, buf: &mut [u8]) -> Result<usize> {
        let mut priority = 0u32;
        loop {
            match mq_receive(self.handle(), buf, &mut priority) {
                Ok(n) => return Ok(n),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Drop for MuxQueue {
    fn drop(&mut self) {
        if let Some(mqd) = self.mqd.take() {
            let _ = mq_close(mqd);
        }
    }
}

/// Create role: set up every requested queue.
pub fn run_create(queues: &[(String, usize)]) -> Result<()> {
    for (name, capacity) in queues {
        MuxQueue::create(name, *capacity)?;
    }
    Ok(())
}

/// Input role: drain one queue to `sink`, one record per receive.
///
/// Runs until the process is terminated or the downstream goes away.
pub fn run_input<W: Write>(name: &str, sink: &mut W) -> Result<()> {
    let queue = MuxQueue::open_reader(name)?;
    loop {
        let record = queue.recv_record()?;
        match emit(sink, &record) {
            Ok(()) => {}
            Err(Error::Io(e)) if e.kind() == io::ErrorKind::BrokenPipe => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}

/// Output role: fan each record from `source` out to every named queue.
///
/// Queues receive each event in list order; a full queue is fatal. EOF on
/// the source exits cleanly.
pub fn run_output<R: Read>(names: &[String], source: &mut R) -> Result<()> {
    let queues = open_writers(names)?;
    while let Some(record) = event::read_event(source)? {
        for queue in &queues {
            queue.try_send(&record)?;
        }
    }
    Ok(())
}

/// Switch role: fan each record out to one of several groups, selected by
/// the most recent activity on the groups' selector queues.
///
/// `default_outputs` is group 0 and receives events until a selector queue
/// fires. Each entry of `switched` pairs a selector queue with that group's
/// output queues. Selection takes effect between input events: an event is
/// delivered to exactly one group, in that group's list order.
pub fn run_switch<R: Read>(
    default_outputs: &[String],
    switched: &[(String, Vec<String>)],
    source: &mut R,
) -> Result<()> {
    let mut groups = Vec::with_capacity(switched.len() + 1);
    groups.push(open_writers(default_outputs)?);

    let current = Arc::new(AtomicUsize::new(0));
    for (offset, (selector, outputs)) in switched.iter().enumerate() {
        groups.push(open_writers(outputs)?);
        let queue = MuxQueue::open_reader(selector)?;
        let current = Arc::clone(&current);
        let index = offset + 1;
        thread::spawn(move || selector_listen(queue, index, &current));
    }

    while let Some(record) = event::read_event(source)? {
        for queue in &groups[current.load(Ordering::SeqCst)] {
            queue.try_send(&record)?;
        }
    }
    Ok(())
}

/// Park on a selector queue and publish its group index on every event.
///
/// Selectors signal liveness, not data: records of the wrong size are
/// ignored rather than treated as protocol violations. Last writer wins.
fn selector_listen(queue: MuxQueue, index: usize, current: &AtomicUsize) {
    loop {
        match queue.recv_record() {
            Ok(_) => current.store(index, Ordering::SeqCst),
            Err(Error::Protocol(_)) => continue,
            Err(e) => {
                log::warn!("selector {} stopped: {e}", queue.name());
                return;
            }
        }
    }
}

fn open_writers(names: &[String]) -> Result<Vec<MuxQueue>> {
    names.iter().map(|name| MuxQueue::open_writer(name)).collect()
}

fn emit<W: Write>(sink: &mut W, record: &EventRecord) -> Result<()> {
    event::write_event(sink, record)?;
    sink.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EV_KEY;
    use std::io::Cursor;
    use std::time::Duration;

    // Queue capacities in tests stay at or below the unprivileged
    // /proc/sys/fs/mqueue/msg_max default of 10.
    fn unique_name(tag: &str) -> String {
        format!("evpipe-test-{}-{tag}", std::process::id())
    }

    fn record(value: i32) -> EventRecord {
        EventRecord::new(EV_KEY, 30, value)
    }

    fn stream_of(values: impl Iterator<Item = i32>) -> Vec<u8> {
        let mut wire = Vec::new();
        for value in values {
            event::write_event(&mut wire, &record(value)).unwrap();
        }
        wire
    }

    fn pending(queue: &MuxQueue) -> usize {
        mq_getattr(queue.handle()).unwrap().curmsgs() as usize
    }

    #[test]
    fn test_queue_round_trip() {
        let name = unique_name("roundtrip");
        MuxQueue::create(&name, 4).unwrap();

        let writer = MuxQueue::open_writer(&name).unwrap();
        let reader = MuxQueue::open_reader(&name).unwrap();
        for value in 0..3 {
            writer.try_send(&record(value)).unwrap();
        }
        for value in 0..3 {
            assert_eq!(reader.recv_record().unwrap(), record(value));
        }

        MuxQueue::remove(&name).unwrap();
    }

    #[test]
    fn test_create_replaces_prior_queue() {
        let name = unique_name("recreate");
        MuxQueue::create(&name, 4).unwrap();
        let writer = MuxQueue::open_writer(&name).unwrap();
        writer.try_send(&record(1)).unwrap();
        drop(writer);

        MuxQueue::create(&name, 4).unwrap();
        let reader = MuxQueue::open_reader(&name).unwrap();
        assert_eq!(pending(&reader), 0);

        MuxQueue::remove(&name).unwrap();
    }

    #[test]
    fn test_backpressure_on_full_queue() {
        let name = unique_name("backpressure");
        MuxQueue::create(&name, 4).unwrap();

        let writer = MuxQueue::open_writer(&name).unwrap();
        for value in 0..4 {
            writer.try_send(&record(value)).unwrap();
        }
        match writer.try_send(&record(4)) {
            Err(Error::Backpressure(full)) => assert_eq!(full, name),
            other => panic!("expected backpressure, got {other:?}"),
        }

        MuxQueue::remove(&name).unwrap();
    }

    #[test]
    fn test_wrong_size_receive_is_protocol_error() {
        let name = unique_name("wrongsize");
        MuxQueue::create(&name, 4).unwrap();

        let writer = MuxQueue::open_writer(&name).unwrap();
        mq_send(writer.handle(), &[0u8; 5], 0).unwrap();

        let reader = MuxQueue::open_reader(&name).unwrap();
        match reader.recv_record() {
            Err(Error::Protocol(_)) => {}
            other => panic!("expected protocol error, got {other:?}"),
        }

        MuxQueue::remove(&name).unwrap();
    }

    #[test]
    fn test_output_role_fans_out_in_order() {
        let a = unique_name("fanout-a");
        let b = unique_name("fanout-b");
        MuxQueue::create(&a, 8).unwrap();
        MuxQueue::create(&b, 8).unwrap();

        let mut source = Cursor::new(stream_of(0..5));
        run_output(&[a.clone(), b.clone()], &mut source).unwrap();

        for name in [&a, &b] {
            let reader = MuxQueue::open_reader(name).unwrap();
            assert_eq!(pending(&reader), 5);
            for value in 0..5 {
                assert_eq!(reader.recv_record().unwrap(), record(value));
            }
        }

        MuxQueue::remove(&a).unwrap();
        MuxQueue::remove(&b).unwrap();
    }

    #[test]
    fn test_output_role_surfaces_backpressure() {
        let name = unique_name("fanout-full");
        MuxQueue::create(&name, 4).unwrap();

        let mut source = Cursor::new(stream_of(0..5));
        match run_output(&[name.clone()], &mut source) {
            Err(Error::Backpressure(_)) => {}
            other => panic!("expected backpressure, got {other:?}"),
        }

        MuxQueue::remove(&name).unwrap();
    }

    #[test]
    fn test_switch_steers_by_selector_activity() {
        let out1 = unique_name("switch-out1");
        let out2 = unique_name("switch-out2");
        let sel = unique_name("switch-sel");
        MuxQueue::create(&out1, 10).unwrap();
        MuxQueue::create(&out2, 10).unwrap();
        MuxQueue::create(&sel, 4).unwrap();

        let (pipe_r, pipe_w) = nix::unistd::pipe().unwrap();
        let mut source = std::fs::File::from(pipe_r);
        let mut feed = std::fs::File::from(pipe_w);

        let defaults = vec![out1.clone()];
        let switched = vec![(sel.clone(), vec![out2.clone()])];
        let switcher = thread::spawn(move || run_switch(&defaults, &switched, &mut source));

        // First batch lands on the default group.
        feed.write_all(&stream_of(0..10)).unwrap();
        thread::sleep(Duration::from_millis(200));

        // One selector record steers everything that follows to group 1.
        MuxQueue::open_writer(&sel)
            .unwrap()
            .try_send(&record(0))
            .unwrap();
        thread::sleep(Duration::from_millis(200));

        feed.write_all(&stream_of(10..20)).unwrap();
        drop(feed);
        switcher.join().unwrap().unwrap();

        let reader1 = MuxQueue::open_reader(&out1).unwrap();
        let reader2 = MuxQueue::open_reader(&out2).unwrap();
        assert_eq!(pending(&reader1), 10);
        assert_eq!(pending(&reader2), 10);
        for value in 0..10 {
            assert_eq!(reader1.recv_record().unwrap(), record(value));
        }
        for value in 10..20 {
            assert_eq!(reader2.recv_record().unwrap(), record(value));
        }

        MuxQueue::remove(&out1).unwrap();
        MuxQueue::remove(&out2).unwrap();
        MuxQueue::remove(&sel).unwrap();
    }

    #[test]
    fn test_queue_name_normalization() {
        assert_eq!(queue_path("pipe").unwrap().to_str().unwrap(), "/pipe");
        assert_eq!(queue_path("/pipe").unwrap().to_str().unwrap(), "/pipe");
        assert!(queue_path("").is_err());
        assert!(queue_path("/").is_err());
    }
}
