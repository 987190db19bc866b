//! Raw input events read from devices and the actions classified from them.

use crate::role::ButtonRole;
use anyhow::{anyhow, Result};
use std::str::FromStr;
use std::time::{Duration, Instant, SystemTime};

/// `EV_KEY` event type, as defined by `linux/input-event-codes.h`.
pub const EV_KEY: u16 = 0x01;

/// A `{type, code, value}` triple as delivered by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent {
    pub kind: u16,
    pub code: u16,
    pub value: i32,
    /// `CLOCK_MONOTONIC` time the kernel stamped on the event, when the
    /// source reports one.
    pub time: Option<Duration>,
}

impl RawEvent {
    pub fn new(kind: u16, code: u16, value: i32) -> Self {
        Self {
            kind,
            code,
            value,
            time: None,
        }
    }

    /// Attach a `CLOCK_MONOTONIC` timestamp.
    pub fn at(mut self, time: Duration) -> Self {
        self.time = Some(time);
        self
    }

    /// Shorthand for an `EV_KEY` event.
    pub fn key(code: u16, value: i32) -> Self {
        Self::new(EV_KEY, code, value)
    }

    /// Return the key event carried by this triple.
    ///
    /// `SYN`, `REL`, `ABS` and every other non-key type yield `None`, as do
    /// key values the kernel does not define.
    pub fn key_event(&self) -> Option<RawKeyEvent> {
        if self.kind != EV_KEY {
            return None;
        }
        KeyValue::from_raw(self.value).map(|value| RawKeyEvent {
            code: self.code,
            value,
        })
    }
}

/// State reported for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyValue {
    Up,
    Down,
    Repeat,
}

impl KeyValue {
    pub fn from_raw(value: i32) -> Option<Self> {
        match value {
            0 => Some(KeyValue::Up),
            1 => Some(KeyValue::Down),
            2 => Some(KeyValue::Repeat),
            _ => None,
        }
    }
}

/// A key transition on a physical button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawKeyEvent {
    pub code: u16,
    pub value: KeyValue,
}

/// Logical UI action produced by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Select,
    Next,
    Context,
    Back,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionKind::Select => write!(f, "SELECT"),
            ActionKind::Next => write!(f, "NEXT"),
            ActionKind::Context => write!(f, "CONTEXT"),
            ActionKind::Back => write!(f, "BACK"),
        }
    }
}

impl FromStr for ActionKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "SELECT" => Ok(ActionKind::Select),
            "NEXT" => Ok(ActionKind::Next),
            "CONTEXT" => Ok(ActionKind::Context),
            "BACK" => Ok(ActionKind::Back),
            _ => Err(anyhow!("Unknown action: {}", s)),
        }
    }
}

/// Where an action came from: the button role and the device's display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionSource {
    pub role: ButtonRole,
    pub device: String,
}

/// An action handed to the sink. Never mutated after emission.
#[derive(Debug, Clone)]
pub struct ClassifiedAction {
    pub kind: ActionKind,
    pub source: ActionSource,
    /// Monotonic time of the transition that produced the action.
    pub timestamp: Instant,
    /// Wall-clock time at emission, for logs.
    pub wall_time: SystemTime,
}

impl ClassifiedAction {
    pub fn new(kind: ActionKind, role: ButtonRole, device: &str, timestamp: Instant) -> Self {
        Self {
            kind,
            source: ActionSource {
                role,
                device: device.to_string(),
            },
            timestamp,
            wall_time: SystemTime::now(),
        }
    }
}

impl std::fmt::Display for ClassifiedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} from {} ({})",
            self.kind, self.source.role, self.source.device
        )
    }
}
