/// The 24-bit `lru_or_lfu` field from spec §3: either a coarse LRU
/// clock timestamp or an LFU `(minutes, log-counter)` pair. Which
/// variant is active is a server-wide policy, not a per-value choice,
/// but we keep it as an enum on the value so mixing policies mid-run
/// (a config reload) degrades gracefully instead of corrupting bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessClock {
    Lru(u32),
    Lfu { minutes: u16, counter: u8 },
}

impl AccessClock {
    pub fn new_lru(now_seconds: u32) -> Self {
        AccessClock::Lru(now_seconds)
    }

    pub fn new_lfu() -> Self {
        AccessClock::Lfu {
            minutes: 0,
            counter: 5, // matches the source's LFU_INIT_VAL: new objects aren't immediately evictable
        }
    }

    /// Updates the clock on a read/write access. `now_minutes` is used
    /// only by the LFU variant (for decaying the counter on an idle
    /// object before bumping it).
    pub fn touch(&mut self, now_seconds: u32, now_minutes: u16) {
        match self {
            AccessClock::Lru(ts) => *ts = now_seconds,
            AccessClock::Lfu { minutes, counter } => {
                if now_minutes != *minutes {
                    let elapsed = now_minutes.wrapping_sub(*minutes);
                    let decay = elapsed as u32 / 1; // one point per minute idle, floor at 0
                    *counter = counter.saturating_sub(decay.min(u8::MAX as u32) as u8);
                    *minutes = now_minutes;
                }
                if *counter < 255 {
                    // Logarithmic counter growth, as in the source: increments become
                    // rarer the higher the counter already is.
                    let p = 1.0 / (*counter as f64 * 10.0 + 1.0);
                    if p >= 1.0 || rand_unit() < p {
                        *counter += 1;
                    }
                }
            }
        }
    }
}

fn rand_unit() -> f64 {
    use rand::Rng;
    rand::thread_rng().gen_range(0.0..1.0)
}
