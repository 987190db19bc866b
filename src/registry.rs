//! Device discovery over evdev.

use crate::event::RawEvent;
use crate::multiplexer::{self, KeySource};
use crate::role::{ButtonRole, RoleKeywords};
use anyhow::{Context, Result};
use evdev::Device;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

nix::ioctl_write_ptr!(eviocsclockid, b'E', 0xa0, libc::c_int);

/// One opened input device, classified once at discovery.
pub struct DeviceHandle {
    path: PathBuf,
    name: String,
    role: ButtonRole,
    device: Device,
    /// Event timestamps are on `CLOCK_MONOTONIC`.
    monotonic: bool,
}

impl DeviceHandle {
    /// Open the device at `path` in non-blocking mode.
    pub fn open(path: &Path, keywords: &RoleKeywords) -> Result<Self> {
        let device =
            Device::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        set_nonblocking(&device)?;
        let monotonic = use_monotonic_clock(&device);
        let name = device.name().unwrap_or("unknown").to_string();
        let role = keywords.classify_device(&name, |code| {
            device
                .supported_keys()
                .map(|keys| keys.contains(evdev::Key::new(code)))
                .unwrap_or(false)
        });
        Ok(Self {
            path: path.to_path_buf(),
            name,
            role,
            device,
            monotonic,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl KeySource for DeviceHandle {
    fn fd(&self) -> BorrowedFd<'_> {
        // SAFETY: the fd is owned by `self.device` and the borrow is tied to
        // `&self`, so it cannot outlive the device.
        unsafe { BorrowedFd::borrow_raw(self.device.as_raw_fd()) }
    }

    fn label(&self) -> &str {
        &self.name
    }

    fn role(&self) -> ButtonRole {
        self.role
    }

    fn read_batch(&mut self, out: &mut Vec<RawEvent>) -> io::Result<()> {
        let monotonic = self.monotonic;
        for event in self.device.fetch_events()? {
            let mut raw = RawEvent::new(event.event_type().0, event.code(), event.value());
            // With CLOCK_MONOTONIC selected, evdev's "epoch" is boot time.
            if monotonic {
                raw.time = event.timestamp().duration_since(UNIX_EPOCH).ok();
            }
            out.push(raw);
        }
        Ok(())
    }
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("path", &self.path)
            .field("name", &self.name)
            .field("role", &self.role)
            .field("monotonic", &self.monotonic)
            .finish()
    }
}

/// The devices found by one startup scan, in discovery order.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    handles: Vec<DeviceHandle>,
}

impl DeviceRegistry {
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn handles(&self) -> &[DeviceHandle] {
        &self.handles
    }

    pub fn into_handles(self) -> Vec<DeviceHandle> {
        self.handles
    }
}

/// Whether `file_name` follows the `eventN` naming of raw input nodes.
pub fn is_event_node(file_name: &str) -> bool {
    file_name
        .strip_prefix("event")
        .map(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or(false)
}

/// Scan `dir` once and open every raw input node in it.
///
/// Devices that cannot be opened are logged and skipped. Finding nothing is
/// not an error: check [`DeviceRegistry::is_empty`].
pub fn discover(dir: &Path, keywords: &RoleKeywords, skip_unknown: bool) -> Result<DeviceRegistry> {
    let mut paths = Vec::new();
    for entry in
        std::fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if path
            .file_name()
            .and_then(|n| n.to_str())
            .map(is_event_node)
            .unwrap_or(false)
        {
            paths.push(path);
        }
    }
    paths.sort_by_key(|p| event_index(p));

    let mut handles = Vec::new();
    for path in paths {
        match DeviceHandle::open(&path, keywords) {
            Ok(mut handle) => {
                if skip_unknown && handle.role == ButtonRole::Unknown {
                    log::debug!("Skipping {:?} at {:?}: no role", handle.name, path);
                    continue;
                }
                log::info!(
                    "Found {:?} at {:?} ({})",
                    handle.name,
                    handle.path,
                    handle.role
                );
                discard_pending(&mut handle);
                handles.push(handle);
            }
            Err(e) => {
                log::warn!("Skipping {}: {:#}", path.display(), e);
            }
        }
    }

    if handles.is_empty() {
        log::warn!(
            "No input devices found in {}. Make sure you're in the 'input' group or running as root.",
            dir.display()
        );
    }

    Ok(DeviceRegistry { handles })
}

fn event_index(path: &Path) -> u32 {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_prefix("event"))
        .and_then(|n| n.parse().ok())
        .unwrap_or(u32::MAX)
}

/// Ask the kernel to stamp events with `CLOCK_MONOTONIC` instead of wall time.
fn use_monotonic_clock(device: &Device) -> bool {
    let clock: libc::c_int = libc::CLOCK_MONOTONIC;
    // SAFETY: EVIOCSCLOCKID reads a single c_int that outlives the call.
    match unsafe { eviocsclockid(device.as_raw_fd(), &clock) } {
        Ok(_) => true,
        Err(e) => {
            log::debug!(
                "EVIOCSCLOCKID failed on {:?}, timing presses by read time: {}",
                device.name(),
                e
            );
            false
        }
    }
}

fn set_nonblocking(device: &Device) -> Result<()> {
    let fd = device.as_raw_fd();
    let flags = fcntl(fd, FcntlArg::F_GETFL).context("Failed to get fd flags")?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(flags)).context("Failed to set non-blocking")?;
    Ok(())
}

/// Throw away events buffered before the dispatcher started.
fn discard_pending(handle: &mut DeviceHandle) {
    let mut stale = Vec::new();
    match multiplexer::drain(handle, &mut stale) {
        Ok(0) => {}
        Ok(count) => log::debug!("Drained {} stale events from {:?}", count, handle.name),
        Err(e) => log::debug!("Error draining events from {:?}: {}", handle.name, e),
    }
}
