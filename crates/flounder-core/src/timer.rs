use std::time::Duration;

/// Opaque handle to a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

impl TimerId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// The timer capability the detection engine consumes: one-shot deadlines and
/// fixed-interval callbacks, both cancellable. Callbacks run on the same
/// cooperative loop as scroll-changed signals.
pub trait TimerHost {
    fn set_timeout(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> TimerId;

    fn clear_timeout(&self, id: TimerId);

    fn set_interval(&self, period: Duration, callback: Box<dyn FnMut()>) -> TimerId;

    /// Cancels a repeating timer. Honored even when called from inside the
    /// timer's own callback.
    fn clear_interval(&self, id: TimerId);
}
