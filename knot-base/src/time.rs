// Millisecond wall-clock helpers.
//
// The engine is single-threaded, so a thread-local override is enough
// to implement "now" freezing during a scripting block (spec §4.5,
// §9 "Time-freezing within scripts"): all keys accessed during the
// frozen window observe the same logical time, and the freeze is
// restored on every exit path including panics, via a guard.

use std::cell::Cell;
use std::time::{SystemTime, UNIX_EPOCH};

thread_local! {
    static FROZEN_NOW_MS: Cell<Option<i64>> = Cell::new(None);
}

/// Current wall-clock time in absolute milliseconds, or the frozen
/// time if a [`FreezeGuard`] is active on this thread.
pub fn mstime() -> i64 {
    FROZEN_NOW_MS.with(|f| {
        if let Some(frozen) = f.get() {
            frozen
        } else {
            real_mstime()
        }
    })
}

fn real_mstime() -> i64 {
    let d = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    d.as_millis() as i64
}

/// Freezes [`mstime`] to its value at construction time for the
/// lifetime of the guard, restoring the previous override (possibly
/// none) on drop. Used around script/transaction execution so every
/// `expireIfNeeded` call inside the block agrees on "now".
pub struct FreezeGuard {
    previous: Option<i64>,
}

impl FreezeGuard {
    pub fn new() -> Self {
        let now = real_mstime();
        let previous = FROZEN_NOW_MS.with(|f| f.replace(Some(now)));
        FreezeGuard { previous }
    }
}

impl Default for FreezeGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for FreezeGuard {
    fn drop(&mut self) {
        FROZEN_NOW_MS.with(|f| f.set(self.previous));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freeze_holds_steady() {
        let a = mstime();
        {
            let _g = FreezeGuard::new();
            let b = mstime();
            std::thread::sleep(std::time::Duration::from_millis(5));
            let c = mstime();
            assert_eq!(b, c);
            assert!(b >= a);
        }
        // Unfrozen again after the guard drops.
        let d = mstime();
        assert!(d >= a);
    }

    #[test]
    fn nested_freeze_restores_previous() {
        let _outer = FreezeGuard::new();
        let t1 = mstime();
        {
            let _inner = FreezeGuard::new();
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        let t2 = mstime();
        assert_eq!(t1, t2);
    }
}
