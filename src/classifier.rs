//! Press-duration classification and debouncing.
//!
//! Each role runs a two-state machine, `IDLE -> PRESSED -> IDLE`:
//!
//! - PRIMARY emits on release: `SELECT` for a short press, the configured
//!   long-press action (`CONTEXT` by default) once the press reaches
//!   `long_press_threshold`.
//! - AUXILIARY emits `NEXT` on the first DOWN of a press and nothing on
//!   release.
//! - UNKNOWN never reaches the state machine.
//!
//! A DOWN while already pressed and an UP while idle are both ignored, and
//! `REPEAT` is a no-op. Every candidate then passes a single debounce gate
//! shared by all roles.

use crate::config::DispatcherConfig;
use crate::event::{ActionKind, ClassifiedAction, KeyValue, RawKeyEvent};
use crate::role::ButtonRole;
use std::time::{Duration, Instant};

/// Press tracking for one role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PressState {
    pub is_down: bool,
    pub down_timestamp: Option<Instant>,
}

impl PressState {
    /// Record a DOWN. Returns `false` if a press was already open.
    fn press(&mut self, now: Instant) -> bool {
        if self.is_down {
            return false;
        }
        self.is_down = true;
        self.down_timestamp = Some(now);
        true
    }

    /// Record an UP and return the press duration, or `None` if idle.
    fn release(&mut self, now: Instant) -> Option<Duration> {
        if !self.is_down {
            return None;
        }
        self.is_down = false;
        let started = self.down_timestamp.take()?;
        Some(now.saturating_duration_since(started))
    }

    fn held_since(&self) -> Option<Instant> {
        if self.is_down {
            self.down_timestamp
        } else {
            None
        }
    }
}

/// Minimum spacing between delivered actions, across all roles.
#[derive(Debug, Clone, Copy)]
pub struct DebounceGate {
    window: Duration,
    last_emission: Option<Instant>,
}

impl DebounceGate {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_emission: None,
        }
    }

    /// Admit an emission at `now`, or reject it if it falls inside the window.
    /// Rejected candidates leave the gate untouched.
    pub fn admit(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_emission {
            if now.saturating_duration_since(last) < self.window {
                return false;
            }
        }
        self.last_emission = Some(now);
        true
    }
}

/// Turns key transitions into [`ClassifiedAction`]s.
#[derive(Debug, Clone)]
pub struct ButtonClassifier {
    long_press_threshold: Duration,
    primary_long_press: ActionKind,
    primary: PressState,
    auxiliary: PressState,
    gate: DebounceGate,
}

impl ButtonClassifier {
    pub fn new(config: &DispatcherConfig) -> Self {
        Self {
            long_press_threshold: config.long_press_threshold,
            primary_long_press: config.primary_long_press,
            primary: PressState::default(),
            auxiliary: PressState::default(),
            gate: DebounceGate::new(config.debounce_window),
        }
    }

    /// Feed one key event from a device of `role` named `device`.
    ///
    /// Returns the action to deliver, if the transition produced one and the
    /// debounce gate admitted it. Press state is updated either way.
    pub fn handle(
        &mut self,
        role: ButtonRole,
        device: &str,
        event: RawKeyEvent,
        now: Instant,
    ) -> Option<ClassifiedAction> {
        let kind = match (role, event.value) {
            (ButtonRole::Unknown, _) | (_, KeyValue::Repeat) => return None,
            (ButtonRole::Primary, KeyValue::Down) => {
                if !self.primary.press(now) {
                    log::trace!("Ignoring repeated DOWN on {}", device);
                }
                return None;
            }
            (ButtonRole::Primary, KeyValue::Up) => {
                let Some(duration) = self.primary.release(now) else {
                    log::trace!("Ignoring UP without DOWN on {}", device);
                    return None;
                };
                if duration >= self.long_press_threshold {
                    self.primary_long_press
                } else {
                    ActionKind::Select
                }
            }
            (ButtonRole::Auxiliary, KeyValue::Down) => {
                if !self.auxiliary.press(now) {
                    log::trace!("Ignoring repeated DOWN on {}", device);
                    return None;
                }
                ActionKind::Next
            }
            (ButtonRole::Auxiliary, KeyValue::Up) => {
                self.auxiliary.release(now);
                return None;
            }
        };

        if !self.gate.admit(now) {
            log::debug!("Debounced {} from {}", kind, device);
            return None;
        }

        Some(ClassifiedAction::new(kind, role, device, now))
    }

    /// Time the current press of `role` started, if one is open.
    pub fn held_since(&self, role: ButtonRole) -> Option<Instant> {
        match role {
            ButtonRole::Primary => self.primary.held_since(),
            ButtonRole::Auxiliary => self.auxiliary.held_since(),
            ButtonRole::Unknown => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POWER: &str = "PowerKey";
    const WPS: &str = "gpio-wps";

    fn down() -> RawKeyEvent {
        RawKeyEvent {
            code: 116,
            value: KeyValue::Down,
        }
    }

    fn up() -> RawKeyEvent {
        RawKeyEvent {
            code: 116,
            value: KeyValue::Up,
        }
    }

    fn repeat() -> RawKeyEvent {
        RawKeyEvent {
            code: 116,
            value: KeyValue::Repeat,
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn classifier() -> ButtonClassifier {
        ButtonClassifier::new(&DispatcherConfig::default())
    }

    fn kinds(actions: &[Option<ClassifiedAction>]) -> Vec<ActionKind> {
        actions.iter().flatten().map(|a| a.kind).collect()
    }

    #[test]
    fn test_short_then_long_press() {
        let mut c = classifier();
        let t0 = Instant::now();

        assert!(c.handle(ButtonRole::Primary, POWER, down(), t0).is_none());
        let select = c.handle(ButtonRole::Primary, POWER, up(), t0 + ms(300)).unwrap();
        assert_eq!(select.kind, ActionKind::Select);
        assert_eq!(select.source.role, ButtonRole::Primary);
        assert_eq!(select.source.device, POWER);
        assert_eq!(select.timestamp, t0 + ms(300));

        assert!(c.handle(ButtonRole::Primary, POWER, down(), t0 + ms(1000)).is_none());
        let context = c.handle(ButtonRole::Primary, POWER, up(), t0 + ms(2000)).unwrap();
        assert_eq!(context.kind, ActionKind::Context);
        assert_eq!(context.timestamp, t0 + ms(2000));
    }

    #[test]
    fn test_each_short_pair_yields_one_select() {
        let mut c = classifier();
        let t0 = Instant::now();
        let mut out = Vec::new();
        for i in 0..5 {
            let start = t0 + ms(i * 200);
            out.push(c.handle(ButtonRole::Primary, POWER, down(), start));
            out.push(c.handle(ButtonRole::Primary, POWER, up(), start + ms(100)));
        }
        assert_eq!(kinds(&out), vec![ActionKind::Select; 5]);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let mut c = classifier();
        let t0 = Instant::now();
        c.handle(ButtonRole::Primary, POWER, down(), t0);
        let action = c.handle(ButtonRole::Primary, POWER, up(), t0 + ms(800)).unwrap();
        assert_eq!(action.kind, ActionKind::Context);

        c.handle(ButtonRole::Primary, POWER, down(), t0 + ms(1000));
        let action = c.handle(ButtonRole::Primary, POWER, up(), t0 + ms(1799)).unwrap();
        assert_eq!(action.kind, ActionKind::Select);
    }

    #[test]
    fn test_duplicate_down_keeps_first_timestamp() {
        let mut c = classifier();
        let t0 = Instant::now();
        assert!(c.handle(ButtonRole::Primary, POWER, down(), t0).is_none());
        assert!(c.handle(ButtonRole::Primary, POWER, down(), t0 + ms(700)).is_none());
        assert_eq!(c.held_since(ButtonRole::Primary), Some(t0));

        // Measured from the first DOWN, so this is a long press.
        let action = c.handle(ButtonRole::Primary, POWER, up(), t0 + ms(900)).unwrap();
        assert_eq!(action.kind, ActionKind::Context);
    }

    #[test]
    fn test_up_while_idle_is_ignored() {
        let mut c = classifier();
        let t0 = Instant::now();
        assert!(c.handle(ButtonRole::Primary, POWER, up(), t0).is_none());
        assert_eq!(c.held_since(ButtonRole::Primary), None);

        c.handle(ButtonRole::Primary, POWER, down(), t0 + ms(100));
        c.handle(ButtonRole::Primary, POWER, up(), t0 + ms(200));
        assert!(c.handle(ButtonRole::Primary, POWER, up(), t0 + ms(400)).is_none());
    }

    #[test]
    fn test_repeat_is_noop() {
        let mut c = classifier();
        let t0 = Instant::now();
        assert!(c.handle(ButtonRole::Primary, POWER, repeat(), t0).is_none());
        assert_eq!(c.held_since(ButtonRole::Primary), None);

        c.handle(ButtonRole::Primary, POWER, down(), t0 + ms(10));
        assert!(c.handle(ButtonRole::Primary, POWER, repeat(), t0 + ms(500)).is_none());
        assert_eq!(c.held_since(ButtonRole::Primary), Some(t0 + ms(10)));

        assert!(c.handle(ButtonRole::Auxiliary, WPS, repeat(), t0 + ms(600)).is_none());
    }

    #[test]
    fn test_debounce_drops_second_but_tracks_state() {
        let mut c = classifier();
        let t0 = Instant::now();

        let next = c.handle(ButtonRole::Auxiliary, WPS, down(), t0).unwrap();
        assert_eq!(next.kind, ActionKind::Next);

        // PRIMARY press completes 30ms after the NEXT: dropped.
        c.handle(ButtonRole::Primary, POWER, down(), t0 + ms(10));
        assert!(c.handle(ButtonRole::Primary, POWER, up(), t0 + ms(30)).is_none());
        assert_eq!(c.held_since(ButtonRole::Primary), None);

        // A stray UP after the dropped emission still counts as idle.
        assert!(c.handle(ButtonRole::Primary, POWER, up(), t0 + ms(200)).is_none());

        c.handle(ButtonRole::Primary, POWER, down(), t0 + ms(300));
        let select = c.handle(ButtonRole::Primary, POWER, up(), t0 + ms(400)).unwrap();
        assert_eq!(select.kind, ActionKind::Select);
    }

    #[test]
    fn test_dropped_candidate_does_not_extend_window() {
        let mut c = classifier();
        let t0 = Instant::now();
        assert!(c.handle(ButtonRole::Auxiliary, WPS, down(), t0).is_some());
        c.handle(ButtonRole::Auxiliary, WPS, up(), t0 + ms(10));
        assert!(c.handle(ButtonRole::Auxiliary, WPS, down(), t0 + ms(40)).is_none());
        c.handle(ButtonRole::Auxiliary, WPS, up(), t0 + ms(45));
        // 50ms after the delivered one, 10ms after the dropped one.
        assert!(c.handle(ButtonRole::Auxiliary, WPS, down(), t0 + ms(50)).is_some());
    }

    #[test]
    fn test_auxiliary_next_on_down_regardless_of_hold() {
        let mut c = classifier();
        let t0 = Instant::now();
        let next = c.handle(ButtonRole::Auxiliary, WPS, down(), t0).unwrap();
        assert_eq!(next.kind, ActionKind::Next);
        assert_eq!(next.source.role, ButtonRole::Auxiliary);
        assert_eq!(next.timestamp, t0);

        // A long hold followed by release produces nothing further.
        assert!(c.handle(ButtonRole::Auxiliary, WPS, up(), t0 + ms(5000)).is_none());
    }

    #[test]
    fn test_auxiliary_bounce_emits_once() {
        let mut c = classifier();
        let t0 = Instant::now();
        assert!(c.handle(ButtonRole::Auxiliary, WPS, down(), t0).is_some());
        assert!(c.handle(ButtonRole::Auxiliary, WPS, down(), t0 + ms(200)).is_none());
        assert_eq!(c.held_since(ButtonRole::Auxiliary), Some(t0));
    }

    #[test]
    fn test_roles_tracked_independently() {
        let mut c = classifier();
        let t0 = Instant::now();
        c.handle(ButtonRole::Primary, POWER, down(), t0);
        assert!(c.handle(ButtonRole::Auxiliary, WPS, down(), t0 + ms(100)).is_some());
        c.handle(ButtonRole::Auxiliary, WPS, up(), t0 + ms(150));
        let select = c.handle(ButtonRole::Primary, POWER, up(), t0 + ms(300)).unwrap();
        assert_eq!(select.kind, ActionKind::Select);
    }

    #[test]
    fn test_unknown_role_ignored() {
        let mut c = classifier();
        let t0 = Instant::now();
        assert!(c.handle(ButtonRole::Unknown, "keyboard", down(), t0).is_none());
        assert!(c.handle(ButtonRole::Unknown, "keyboard", up(), t0 + ms(100)).is_none());
        assert_eq!(c.held_since(ButtonRole::Unknown), None);
        // The gate was never armed.
        c.handle(ButtonRole::Primary, POWER, down(), t0 + ms(110));
        assert!(c.handle(ButtonRole::Primary, POWER, up(), t0 + ms(120)).is_some());
    }

    #[test]
    fn test_configurable_long_press_action() {
        let config = DispatcherConfig {
            primary_long_press: ActionKind::Back,
            ..DispatcherConfig::default()
        };
        let mut c = ButtonClassifier::new(&config);
        let t0 = Instant::now();
        c.handle(ButtonRole::Primary, POWER, down(), t0);
        let back = c.handle(ButtonRole::Primary, POWER, up(), t0 + ms(1200)).unwrap();
        assert_eq!(back.kind, ActionKind::Back);
    }

    #[test]
    fn test_open_press_never_emits() {
        let mut c = classifier();
        let t0 = Instant::now();
        assert!(c.handle(ButtonRole::Primary, POWER, down(), t0).is_none());
        assert_eq!(c.held_since(ButtonRole::Primary), Some(t0));
    }
}
