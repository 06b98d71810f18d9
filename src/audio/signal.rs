// Single-slot, auto-resetting wake signal
use parking_lot::{Condvar, Mutex};

/// A presence flag a waiter consumes on wake-up.
///
/// Raising an already raised signal has no further effect.
#[derive(Default)]
pub(crate) struct WakeSignal {
    raised: Mutex<bool>,
    condvar: Condvar,
}

impl WakeSignal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn raise(&self) {
        let mut raised = self.raised.lock();
        if !*raised {
            *raised = true;
            self.condvar.notify_one();
        }
    }

    /// Block until the signal is raised, then clear it.
    pub(crate) fn wait(&self) {
        let mut raised = self.raised.lock();
        while !*raised {
            self.condvar.wait(&mut raised);
        }
        *raised = false;
    }

    pub(crate) fn clear(&self) {
        *self.raised.lock() = false;
    }

    #[cfg(test)]
    fn is_raised(&self) -> bool {
        *self.raised.lock()
    }
}
