// The keyspace layer (spec §4.4/§4.5): one or more `Database`
// instances, each an incrementally-rehashing dict plus its own expire
// table, blocking-key and WATCH bookkeeping. This crate owns no
// network or client-protocol concerns — those live in `knot-cmd` and
// `knot-proto`; a `Database` only ever sees byte keys and `knot-value`
// values.

mod database;
mod error;

pub use database::{ClientId, DbStats, Database, EventClass, Key, KeyspaceEvent};
pub use error::{DbError, DbResult};

/// The full set of selectable databases (spec's `SELECT`/`SWAPDB`),
/// sized at startup from the server's `databases` config and never
/// resized afterward.
pub struct Keyspace {
    databases: Vec<Database>,
}

impl Keyspace {
    pub fn new(count: usize) -> Self {
        let databases = (0..count.max(1)).map(Database::new).collect();
        Keyspace { databases }
    }

    pub fn len(&self) -> usize {
        self.databases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.databases.is_empty()
    }

    pub fn get(&self, id: usize) -> Option<&Database> {
        self.databases.get(id)
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Database> {
        self.databases.get_mut(id)
    }

    /// `swapDatabases`: exchanges two databases' contents in place,
    /// keeping their `id` fixed so every outstanding key handle
    /// (`Key`) remains valid — only which index it lives under
    /// changes.
    pub fn swap(&mut self, a: usize, b: usize) -> DbResult<()> {
        if a >= self.databases.len() || b >= self.databases.len() {
            return Err(DbError::KeyNotFound);
        }
        if a == b {
            return Ok(());
        }
        self.databases.swap(a, b);
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        let (left, right) = self.databases.split_at_mut(hi);
        left[lo].id = lo;
        right[0].id = hi;
        Ok(())
    }

    /// `FLUSHALL`: empties every database.
    pub fn flush_all(&mut self) {
        for db in &mut self.databases {
            db.empty_db();
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Database> {
        self.databases.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Database> {
        self.databases.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use knot_value::{AccessClock, StringValue, Value};
    use test_log::test;

    fn strval(s: &str) -> Value {
        Value::string(
            StringValue::from_bytes(s.as_bytes().to_vec()).unwrap(),
            AccessClock::new_lru(0),
        )
    }

    #[test]
    fn select_addresses_independent_databases() {
        let mut ks = Keyspace::new(16);
        ks.get_mut(0).unwrap().db_add(b"k", strval("zero")).unwrap();
        ks.get_mut(1).unwrap().db_add(b"k", strval("one")).unwrap();
        assert!(ks.get_mut(0).unwrap().lookup_key_read(b"k", 0, true).is_some());
        assert_eq!(
            ks.get_mut(1)
                .unwrap()
                .lookup_key_read(b"k", 0, true)
                .unwrap()
                .as_string()
                .unwrap()
                .as_bytes()
                .as_ref(),
            b"one"
        );
    }

    #[test]
    fn swapdb_exchanges_contents_keeping_ids_fixed() {
        let mut ks = Keyspace::new(2);
        ks.get_mut(0).unwrap().db_add(b"only-in-0", strval("v")).unwrap();
        ks.swap(0, 1).unwrap();
        assert!(ks.get_mut(0).unwrap().lookup_key_read(b"only-in-0", 0, true).is_none());
        assert!(ks.get_mut(1).unwrap().lookup_key_read(b"only-in-0", 0, true).is_some());
        assert_eq!(ks.get(0).unwrap().id, 0);
        assert_eq!(ks.get(1).unwrap().id, 1);
    }

    #[test]
    fn flushall_empties_every_database() {
        let mut ks = Keyspace::new(4);
        for db in ks.iter_mut() {
            db.db_add(b"k", strval("v")).unwrap();
        }
        ks.flush_all();
        for db in ks.iter() {
            assert_eq!(db.len(), 0);
        }
    }
}
