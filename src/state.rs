//! Shared state between the measurement interrupt and task context

use core::cell::Cell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

/// Latest value produced by one context, read by others
///
/// Every publish replaces the whole value inside a critical section, so a
/// reader never observes a half-written update.
pub struct Published<T: Copy> {
    inner: Mutex<CriticalSectionRawMutex, Cell<T>>,
}

impl<T: Copy> Published<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(Cell::new(value)),
        }
    }

    /// Replace the published value
    pub fn publish(&self, value: T) {
        self.inner.lock(|cell| cell.set(value));
    }

    /// Copy of the latest value
    pub fn snapshot(&self) -> T {
        self.inner.lock(|cell| cell.get())
    }

    /// Read-modify-write in one critical section
    pub fn update(&self, f: impl FnOnce(T) -> T) {
        self.inner.lock(|cell| cell.set(f(cell.get())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::current_sense::{CurrentState, PhaseCurrents};

    static STATE: Published<CurrentState> = Published::new(CurrentState {
        currents: PhaseCurrents::zero(),
        temperature: 0,
    });

    #[test]
    fn test_publish_replaces_whole_value() {
        let next = CurrentState {
            currents: PhaseCurrents::new(1.0, -0.5, -0.5),
            temperature: 41,
        };
        STATE.publish(next);
        assert_eq!(STATE.snapshot(), next);
    }

    #[test]
    fn test_update() {
        let counter = Published::new(0u32);
        for _ in 0..5 {
            counter.update(|n| n + 1);
        }
        assert_eq!(counter.snapshot(), 5);
    }
}
