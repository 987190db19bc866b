//! Button event dispatcher for embedded Linux handhelds.
//!
//! The dispatcher opens every `/dev/input/event*` device, assigns each one a
//! [`ButtonRole`] from its name, waits on all of them with a single `poll(2)`
//! and turns key transitions into logical [`ActionKind`]s:
//!
//! - **PRIMARY** (power key): short press → `SELECT`, long press → `CONTEXT`
//! - **AUXILIARY** (WPS / reset key): `NEXT` as soon as the button goes down
//!
//! A shared debounce window suppresses duplicate firing from noisy hardware.
//! Actions are delivered to a single callback on the dispatcher's background
//! thread.
//!
//! # Example
//!
//! ```no_run
//! use input_dispatcher::{ActionKind, InputDispatcherBuilder, StartStatus};
//! use std::sync::mpsc;
//!
//! fn main() -> anyhow::Result<()> {
//!     let (tx, rx) = mpsc::channel();
//!     let mut dispatcher = InputDispatcherBuilder::new()
//!         .on_action(move |action| {
//!             let _ = tx.send(action);
//!         })
//!         .build();
//!
//!     if dispatcher.start()? == StartStatus::NoDevices {
//!         anyhow::bail!("no buttons found");
//!     }
//!
//!     for action in rx {
//!         match action.kind {
//!             ActionKind::Select => println!("select"),
//!             ActionKind::Next => println!("next"),
//!             ActionKind::Context | ActionKind::Back => break,
//!         }
//!     }
//!
//!     dispatcher.stop();
//!     Ok(())
//! }
//! ```
//!
//! # Linux Requirements
//!
//! The process must have permission to read from `/dev/input/event*` devices.
//! This typically means running as root or being a member of the `input` group.

mod classifier;
mod config;
mod event;
mod role;
mod sink;

#[cfg(target_os = "linux")]
mod dispatcher;
#[cfg(target_os = "linux")]
mod multiplexer;
#[cfg(target_os = "linux")]
mod registry;

pub use classifier::{ButtonClassifier, DebounceGate, PressState};
pub use config::DispatcherConfig;
pub use event::{ActionKind, ActionSource, ClassifiedAction, KeyValue, RawEvent, RawKeyEvent, EV_KEY};
pub use role::{ButtonRole, RoleKeywords, KEY_POWER, KEY_RESTART, KEY_WPS_BUTTON};
pub use sink::{ActionCallback, EventSink};

#[cfg(target_os = "linux")]
pub use dispatcher::{InputDispatcher, InputDispatcherBuilder, SourceList, StartStatus, StopStatus};
#[cfg(target_os = "linux")]
pub use multiplexer::{
    drain, monotonic_now, wait, KeySource, ReadClock, Readiness, MAX_CONSECUTIVE_FAILURES,
};
#[cfg(target_os = "linux")]
pub use registry::{discover, is_event_node, DeviceHandle, DeviceRegistry};
