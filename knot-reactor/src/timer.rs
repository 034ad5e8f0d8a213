use crate::Reactor;

/// What a timer handler wants to happen after it runs.
pub enum TimerAction {
    /// Re-arm the same timer `ms` milliseconds from now.
    Reschedule(i64),
    /// Tombstone the timer; its finalizer (if any) runs once, at sweep.
    Remove,
}

pub(crate) const SENTINEL: u64 = u64::MAX;

pub(crate) struct TimerEntry {
    pub(crate) id: u64,
    pub(crate) when_ms: i64,
    pub(crate) handler: Option<Box<dyn FnMut(&mut Reactor) -> TimerAction>>,
    pub(crate) finalizer: Option<Box<dyn FnOnce(&mut Reactor)>>,
}

impl TimerEntry {
    pub(crate) fn is_tombstoned(&self) -> bool {
        self.id == SENTINEL
    }
}
