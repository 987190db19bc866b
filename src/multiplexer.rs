//! Single `poll(2)` wait across every open input source.

use crate::event::RawEvent;
use crate::role::ButtonRole;
use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};
use nix::time::{clock_gettime, ClockId};
use std::io;
use std::os::fd::BorrowedFd;
use std::time::{Duration, Instant};

/// A source is dropped from the wait set after this many failures in a row.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// A readable stream of raw input events.
///
/// The file descriptor must be in non-blocking mode: [`drain`] reads until
/// the source reports `WouldBlock`.
pub trait KeySource {
    /// Descriptor polled for readability.
    fn fd(&self) -> BorrowedFd<'_>;

    /// Display name, used in logs and as the action descriptor.
    fn label(&self) -> &str;

    /// Role assigned to this source at discovery.
    fn role(&self) -> ButtonRole;

    /// Append the events from one read to `out`.
    fn read_batch(&mut self, out: &mut Vec<RawEvent>) -> io::Result<()>;
}

impl<S: KeySource + ?Sized> KeySource for Box<S> {
    fn fd(&self) -> BorrowedFd<'_> {
        (**self).fd()
    }

    fn label(&self) -> &str {
        (**self).label()
    }

    fn role(&self) -> ButtonRole {
        (**self).role()
    }

    fn read_batch(&mut self, out: &mut Vec<RawEvent>) -> io::Result<()> {
        (**self).read_batch(out)
    }
}

/// Result of one wait, as indices into the slice passed to [`wait`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Readiness {
    /// Sources with data to read.
    pub ready: Vec<usize>,
    /// Sources reporting an error or hang-up.
    pub failed: Vec<usize>,
}

impl Readiness {
    pub fn is_empty(&self) -> bool {
        self.ready.is_empty() && self.failed.is_empty()
    }
}

/// Block until at least one source is readable or `timeout` elapses.
///
/// An interrupted wait is reported as a timeout.
pub fn wait<S: KeySource>(sources: &[S], timeout: Duration) -> Result<Readiness> {
    let mut poll_fds: Vec<PollFd> = sources
        .iter()
        .map(|s| PollFd::new(s.fd(), PollFlags::POLLIN))
        .collect();

    match poll(&mut poll_fds, timeout_millis(timeout)) {
        Ok(_) => {}
        Err(Errno::EINTR) => return Ok(Readiness::default()),
        Err(e) => return Err(e).context("Failed to poll input devices"),
    }

    let mut readiness = Readiness::default();
    for (idx, poll_fd) in poll_fds.iter().enumerate() {
        let revents = poll_fd.revents().unwrap_or(PollFlags::empty());
        if revents.contains(PollFlags::POLLIN) {
            readiness.ready.push(idx);
        } else if revents.intersects(PollFlags::POLLERR | PollFlags::POLLHUP | PollFlags::POLLNVAL)
        {
            readiness.failed.push(idx);
        }
    }
    Ok(readiness)
}

/// Poll timeout in whole milliseconds, rounded up so a non-zero timeout
/// never becomes a zero-length poll.
fn timeout_millis(timeout: Duration) -> u16 {
    u16::try_from(timeout.as_nanos().div_ceil(1_000_000)).unwrap_or(u16::MAX)
}

/// Read everything currently buffered on `source`.
///
/// Returns the number of events appended to `out`. Any error other than
/// `WouldBlock` is returned after keeping the events read before it.
pub fn drain<S: KeySource + ?Sized>(source: &mut S, out: &mut Vec<RawEvent>) -> io::Result<usize> {
    let start = out.len();
    loop {
        let before = out.len();
        match source.read_batch(out) {
            Ok(()) if out.len() == before => break,
            Ok(()) => {}
            Err(e) if is_would_block(&e) => break,
            Err(e) => return Err(e),
        }
    }
    Ok(out.len() - start)
}

fn is_would_block(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == Some(libc::EAGAIN)
        || e.raw_os_error() == Some(libc::EWOULDBLOCK)
}

/// Current `CLOCK_MONOTONIC` reading, the clock evdev stamps events with once
/// switched over by `EVIOCSCLOCKID`.
pub fn monotonic_now() -> Option<Duration> {
    let ts = clock_gettime(ClockId::CLOCK_MONOTONIC).ok()?;
    Some(Duration::new(
        u64::try_from(ts.tv_sec()).ok()?,
        u32::try_from(ts.tv_nsec()).ok()?,
    ))
}

/// Maps kernel event times onto [`Instant`]s, relative to the moment a batch
/// was read.
#[derive(Debug, Clone, Copy)]
pub struct ReadClock {
    read_at: Instant,
    monotonic: Option<Duration>,
}

impl ReadClock {
    /// Take both clock readings now.
    pub fn now() -> Self {
        Self {
            read_at: Instant::now(),
            monotonic: monotonic_now(),
        }
    }

    pub fn with_reference(read_at: Instant, monotonic: Duration) -> Self {
        Self {
            read_at,
            monotonic: Some(monotonic),
        }
    }

    /// When `event` happened. Events without a kernel timestamp, or stamped
    /// after the read, count as happening at the read.
    pub fn instant_of(&self, event: &RawEvent) -> Instant {
        match (event.time, self.monotonic) {
            (Some(time), Some(now)) => self
                .read_at
                .checked_sub(now.saturating_sub(time))
                .unwrap_or(self.read_at),
            _ => self.read_at,
        }
    }
}

/// Consecutive-failure counters, one per source, kept in step with the
/// source list.
#[derive(Debug, Default)]
pub struct FailureTracker {
    counts: Vec<u32>,
}

impl FailureTracker {
    pub fn new(len: usize) -> Self {
        Self {
            counts: vec![0; len],
        }
    }

    /// Record a failure. Returns `true` once the source should be dropped.
    pub fn fail(&mut self, idx: usize) -> bool {
        self.counts[idx] += 1;
        self.counts[idx] >= MAX_CONSECUTIVE_FAILURES
    }

    pub fn succeed(&mut self, idx: usize) {
        self.counts[idx] = 0;
    }

    pub fn remove(&mut self, idx: usize) {
        self.counts.remove(idx);
    }
}
