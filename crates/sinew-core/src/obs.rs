//! Observability: flush-cycle telemetry counters.
//!
//! Counters are plain cells on the runtime context; this module does not
//! reach into scheduler internals.

use std::cell::Cell;

///
/// Metrics
///
/// Internal counter cells, one set per runtime context.
///

#[derive(Default)]
pub(crate) struct Metrics {
    flushes: Cell<u64>,
    notifications: Cell<u64>,
    wildcard_notifications: Cell<u64>,
    observer_panics: Cell<u64>,
}

impl Metrics {
    pub fn bump_flushes(&self) {
        self.flushes.set(self.flushes.get() + 1);
    }

    pub fn bump_notifications(&self) {
        self.notifications.set(self.notifications.get() + 1);
    }

    pub fn bump_wildcard_notifications(&self) {
        self.wildcard_notifications
            .set(self.wildcard_notifications.get() + 1);
    }

    pub fn bump_observer_panics(&self) {
        self.observer_panics.set(self.observer_panics.get() + 1);
    }

    pub fn report(&self) -> EventReport {
        EventReport {
            flushes: self.flushes.get(),
            notifications: self.notifications.get(),
            wildcard_notifications: self.wildcard_notifications.get(),
            observer_panics: self.observer_panics.get(),
        }
    }

    pub fn reset(&self) {
        self.flushes.set(0);
        self.notifications.set(0);
        self.wildcard_notifications.set(0);
        self.observer_panics.set(0);
    }
}

///
/// EventReport
///
/// Point-in-time snapshot of flush-cycle counters.
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct EventReport {
    pub flushes: u64,
    pub notifications: u64,
    pub wildcard_notifications: u64,
    pub observer_panics: u64,
}
