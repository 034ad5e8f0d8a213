// Process configuration (SPEC_FULL's Ambient stack section): the
// encoding thresholds, database count, bind address and the handful of
// operational knobs the reactor loop needs, all loaded from `KNOT_*`
// environment variables. The teacher keeps config this close to the
// binary that uses it rather than giving it its own crate; we do the
// same.

use knot_value::EncodingThresholds;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub databases: usize,
    pub thresholds: EncodingThresholds,
    pub rehash_force_ratio: f64,
    pub active_expire_budget_ms: u64,
    pub active_expire_period_ms: i64,
    pub rehash_budget_ms: u64,
    pub rehash_period_ms: i64,
    pub lazy_free_threshold: usize,
    pub notify_keyspace_events: bool,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Default for Config {
    fn default() -> Self {
        let defaults = EncodingThresholds::default();
        Config {
            bind: std::env::var("KNOT_BIND").unwrap_or_else(|_| "127.0.0.1:7878".to_string()),
            databases: env_or("KNOT_DATABASES", 16),
            thresholds: EncodingThresholds {
                hash_max_listpack_entries: env_or("KNOT_HASH_MAX_LISTPACK_ENTRIES", defaults.hash_max_listpack_entries),
                hash_max_listpack_value: env_or("KNOT_HASH_MAX_LISTPACK_VALUE", defaults.hash_max_listpack_value),
                set_max_intset_entries: env_or("KNOT_SET_MAX_INTSET_ENTRIES", defaults.set_max_intset_entries),
                set_max_listpack_entries: env_or("KNOT_SET_MAX_LISTPACK_ENTRIES", defaults.set_max_listpack_entries),
                set_max_listpack_value: env_or("KNOT_SET_MAX_LISTPACK_VALUE", defaults.set_max_listpack_value),
                zset_max_listpack_entries: env_or("KNOT_ZSET_MAX_LISTPACK_ENTRIES", defaults.zset_max_listpack_entries),
                zset_max_listpack_value: env_or("KNOT_ZSET_MAX_LISTPACK_VALUE", defaults.zset_max_listpack_value),
                list_max_listpack_size: env_or("KNOT_LIST_MAX_LISTPACK_SIZE", defaults.list_max_listpack_size),
            },
            rehash_force_ratio: env_or("KNOT_REHASH_FORCE_RATIO", 5.0),
            active_expire_budget_ms: env_or("KNOT_ACTIVE_EXPIRE_BUDGET_MS", 25),
            active_expire_period_ms: env_or("KNOT_ACTIVE_EXPIRE_PERIOD_MS", 100),
            rehash_budget_ms: env_or("KNOT_REHASH_BUDGET_MS", 1),
            rehash_period_ms: env_or("KNOT_REHASH_PERIOD_MS", 100),
            lazy_free_threshold: env_or("KNOT_LAZY_FREE_THRESHOLD", 64 * 1024),
            notify_keyspace_events: env_or("KNOT_NOTIFY_KEYSPACE_EVENTS", false),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Config::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_value_crate_defaults_when_unset() {
        std::env::remove_var("KNOT_HASH_MAX_LISTPACK_ENTRIES");
        let cfg = Config::from_env();
        assert_eq!(cfg.thresholds.hash_max_listpack_entries, EncodingThresholds::default().hash_max_listpack_entries);
        assert_eq!(cfg.databases, 16);
    }
}
