//! Dispatcher builder and background lifecycle.

use crate::classifier::ButtonClassifier;
use crate::config::DispatcherConfig;
use crate::event::{ClassifiedAction, RawEvent};
use crate::multiplexer::{self, FailureTracker, KeySource, ReadClock};
use crate::registry;
use crate::role::ButtonRole;
use crate::sink::{ActionCallback, EventSink};
use anyhow::{bail, Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Sources the background cycle waits on.
pub type SourceList = Vec<Box<dyn KeySource + Send>>;

/// Outcome of [`InputDispatcher::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartStatus {
    /// The background cycle is running over this many devices.
    Started { devices: usize },
    /// Discovery found nothing; no background cycle was started.
    NoDevices,
    /// `start()` was called on a running dispatcher.
    AlreadyRunning,
}

/// Outcome of [`InputDispatcher::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopStatus {
    /// The background thread exited and was joined.
    Clean,
    /// The thread did not exit within the grace period. Devices were
    /// released anyway and the thread is left to finish on its own.
    TimedOut,
    /// Nothing was running.
    NotRunning,
}

/// Builder for creating an input dispatcher.
#[derive(Default)]
pub struct InputDispatcherBuilder {
    config: DispatcherConfig,
    callback: Option<ActionCallback>,
}

impl InputDispatcherBuilder {
    /// Create a new builder with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the given configuration.
    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Register the callback that receives classified actions.
    pub fn on_action<F>(mut self, callback: F) -> Self
    where
        F: FnMut(ClassifiedAction) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Build the dispatcher. No devices are opened until `start()`.
    pub fn build(self) -> InputDispatcher {
        InputDispatcher {
            config: self.config,
            sink: Some(EventSink::new(self.callback)),
            presses: Arc::new(Mutex::new(PressSnapshot::default())),
            worker: None,
        }
    }
}

/// Press state published by the background cycle for the host to read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct PressSnapshot {
    primary: Option<Instant>,
    auxiliary: Option<Instant>,
}

impl PressSnapshot {
    fn capture(classifier: &ButtonClassifier) -> Self {
        Self {
            primary: classifier.held_since(ButtonRole::Primary),
            auxiliary: classifier.held_since(ButtonRole::Auxiliary),
        }
    }

    fn held_since(&self, role: ButtonRole) -> Option<Instant> {
        match role {
            ButtonRole::Primary => self.primary,
            ButtonRole::Auxiliary => self.auxiliary,
            ButtonRole::Unknown => None,
        }
    }
}

struct Worker {
    running: Arc<AtomicBool>,
    has_callback: bool,
    sources: Arc<Mutex<SourceList>>,
    done: Receiver<()>,
    thread: JoinHandle<EventSink>,
}

/// Reads button devices on a background thread and delivers classified
/// actions to the registered callback.
///
/// The dispatcher is stopped when dropped.
///
/// # Example
///
/// ```no_run
/// use input_dispatcher::{InputDispatcherBuilder, StartStatus};
///
/// fn main() -> anyhow::Result<()> {
///     let mut dispatcher = InputDispatcherBuilder::new()
///         .on_action(|action| println!("{}", action))
///         .build();
///
///     if dispatcher.start()? == StartStatus::NoDevices {
///         eprintln!("running without buttons");
///     }
///     std::thread::sleep(std::time::Duration::from_secs(30));
///     dispatcher.stop();
///     Ok(())
/// }
/// ```
pub struct InputDispatcher {
    config: DispatcherConfig,
    /// `None` while the background thread owns it.
    sink: Option<EventSink>,
    presses: Arc<Mutex<PressSnapshot>>,
    worker: Option<Worker>,
}

impl InputDispatcher {
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Replace the callback. Only allowed while stopped.
    pub fn set_callback<F>(&mut self, callback: F) -> Result<()>
    where
        F: FnMut(ClassifiedAction) + Send + 'static,
    {
        if self.worker.is_some() {
            bail!("Cannot replace the action callback while the dispatcher is running");
        }
        self.sink = Some(EventSink::new(Some(Box::new(callback))));
        Ok(())
    }

    /// Discover devices and start the background cycle.
    ///
    /// Failing to read the device directory is an error. Finding no usable
    /// device is reported as [`StartStatus::NoDevices`].
    pub fn start(&mut self) -> Result<StartStatus> {
        if self.worker.is_some() {
            return Ok(StartStatus::AlreadyRunning);
        }

        let registry = registry::discover(
            &self.config.device_dir,
            &self.config.keywords,
            self.config.skip_unknown,
        )?;
        let sources: SourceList = registry
            .into_handles()
            .into_iter()
            .map(|handle| Box::new(handle) as Box<dyn KeySource + Send>)
            .collect();
        self.start_with_sources(sources)
    }

    /// Start the background cycle over sources the caller opened.
    ///
    /// Each source must already be non-blocking.
    pub fn start_with_sources(&mut self, sources: SourceList) -> Result<StartStatus> {
        if self.worker.is_some() {
            return Ok(StartStatus::AlreadyRunning);
        }
        if sources.is_empty() {
            log::warn!("No input devices available, dispatcher not started");
            return Ok(StartStatus::NoDevices);
        }

        let devices = sources.len();
        let running = Arc::new(AtomicBool::new(true));
        let sources = Arc::new(Mutex::new(sources));
        let (done_tx, done) = mpsc::channel();

        let sink = self.sink.take().unwrap_or_default();
        let has_callback = sink.is_registered();
        if !has_callback {
            log::warn!("Starting without an action callback, actions will be discarded");
        }

        let cycle = DispatchCycle {
            classifier: ButtonClassifier::new(&self.config),
            sink,
            poll_timeout: self.config.poll_timeout,
            running: Arc::clone(&running),
            sources: Arc::clone(&sources),
            presses: Arc::clone(&self.presses),
            _done: done_tx,
        };

        let thread = thread::Builder::new()
            .name("input-dispatch".to_string())
            .spawn(move || cycle.run())
            .context("Failed to spawn dispatch thread")?;

        log::info!("Input dispatcher started with {} device(s)", devices);
        self.worker = Some(Worker {
            running,
            has_callback,
            sources,
            done,
            thread,
        });
        Ok(StartStatus::Started { devices })
    }

    /// Signal the background cycle to exit and wait up to `stop_grace` for it.
    ///
    /// An open press is discarded, never turned into an action.
    pub fn stop(&mut self) -> StopStatus {
        let Some(worker) = self.worker.take() else {
            return StopStatus::NotRunning;
        };
        worker.running.store(false, Ordering::SeqCst);

        let status = match worker.done.recv_timeout(self.config.stop_grace) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                match worker.thread.join() {
                    Ok(sink) => self.sink = Some(sink),
                    Err(_) => log::error!("Dispatch thread panicked"),
                }
                log::info!("Input dispatcher stopped");
                StopStatus::Clean
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "Dispatch thread did not stop within {:?}, releasing devices anyway",
                    self.config.stop_grace
                );
                StopStatus::TimedOut
            }
        };

        // Closes every device, whether or not the thread has exited.
        lock(&worker.sources).clear();
        *lock(&self.presses) = PressSnapshot::default();
        status
    }

    /// Check if the background cycle is running.
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .map(|w| w.running.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Whether actions reach a callback, or are discarded.
    pub fn has_callback(&self) -> bool {
        match &self.worker {
            Some(worker) => worker.has_callback,
            None => self.sink.as_ref().map(EventSink::is_registered).unwrap_or(false),
        }
    }

    /// How long `role` has been held, as of the last completed cycle.
    pub fn held_for(&self, role: ButtonRole) -> Option<Duration> {
        lock(&self.presses).held_since(role).map(|t| t.elapsed())
    }
}

impl Drop for InputDispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State owned by the background thread.
struct DispatchCycle {
    classifier: ButtonClassifier,
    sink: EventSink,
    poll_timeout: Duration,
    running: Arc<AtomicBool>,
    sources: Arc<Mutex<SourceList>>,
    presses: Arc<Mutex<PressSnapshot>>,
    /// Dropped when the thread exits, which wakes `stop()`.
    _done: Sender<()>,
}

impl DispatchCycle {
    fn run(mut self) -> EventSink {
        let mut failures = FailureTracker::new(lock(&self.sources).len());
        let mut raw = Vec::new();
        let mut actions = Vec::new();

        while self.running.load(Ordering::SeqCst) {
            // The lock is held for wait/read/classify only; the sink runs
            // without it so `stop()` can always reach the devices.
            if let Err(e) = self.collect(&mut failures, &mut raw, &mut actions) {
                log::warn!("Input wait failed: {:#}", e);
                thread::sleep(self.poll_timeout);
                continue;
            }

            for action in actions.drain(..) {
                log::debug!("Emitting {}", action);
                self.sink.deliver(action);
            }
        }

        log::debug!("Dispatch cycle exiting");
        self.sink
    }

    fn collect(
        &mut self,
        failures: &mut FailureTracker,
        raw: &mut Vec<RawEvent>,
        actions: &mut Vec<ClassifiedAction>,
    ) -> Result<()> {
        let mut sources = lock(&self.sources);
        if sources.is_empty() {
            drop(sources);
            thread::sleep(self.poll_timeout);
            return Ok(());
        }

        let readiness = multiplexer::wait(sources.as_slice(), self.poll_timeout)?;
        let mut dropped = Vec::new();

        for idx in readiness.failed {
            log::debug!("{} reported an error or hang-up", sources[idx].label());
            if failures.fail(idx) {
                dropped.push(idx);
            }
        }

        for idx in readiness.ready {
            let source = &mut sources[idx];
            raw.clear();
            let result = multiplexer::drain(source, raw);
            let clock = ReadClock::now();
            for raw_event in raw.iter() {
                let Some(event) = raw_event.key_event() else {
                    continue;
                };
                let at = clock.instant_of(raw_event);
                if let Some(action) = self
                    .classifier
                    .handle(source.role(), source.label(), event, at)
                {
                    actions.push(action);
                }
            }
            match result {
                Ok(_) => failures.succeed(idx),
                Err(e) => {
                    log::debug!("Read error on {}: {}", source.label(), e);
                    if failures.fail(idx) {
                        dropped.push(idx);
                    }
                }
            }
        }

        dropped.sort_unstable();
        dropped.dedup();
        for idx in dropped.into_iter().rev() {
            let source = sources.remove(idx);
            failures.remove(idx);
            log::warn!(
                "Dropping {} after {} consecutive failures",
                source.label(),
                multiplexer::MAX_CONSECUTIVE_FAILURES
            );
        }
        if sources.is_empty() {
            log::warn!("All input devices failed, no further input will be dispatched");
        }

        *lock(&self.presses) = PressSnapshot::capture(&self.classifier);
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
