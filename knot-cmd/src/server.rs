use knot_pubsub::{Delivery, PubSub};
use knot_store::{ClientId, EventClass, Keyspace};
use knot_txn::TxnTable;
use knot_value::EncodingThresholds;

/// One resolved `PUBLISH` (spec §4.8/§6): the channel and payload that
/// were published, plus the recipient list `knot_pubsub::PubSub` had
/// already computed. `knot-cmd` never touches a socket, so it queues
/// these for the `knot` binary to actually write "message"/"pmessage"
/// frames into each recipient's output buffer.
pub struct PendingPublish {
    pub channel: Vec<u8>,
    pub payload: Vec<u8>,
    pub delivery: Delivery,
}

/// Everything a command handler needs that outlives any one
/// connection: the keyspace, the transaction and pub/sub tables, and
/// the encoding thresholds every mutator consults. One `Server` per
/// process; the `knot` binary owns it and drives it from the reactor
/// thread exclusively (spec §5: "the keyspace is owned by the reactor
/// thread — no locks").
pub struct Server {
    pub keyspace: Keyspace,
    pub txns: TxnTable,
    pub pubsub: PubSub,
    pub thresholds: EncodingThresholds,
    pub notify_keyspace_events: bool,
    pub lazy_free_threshold: usize,
    pending_publishes: Vec<PendingPublish>,
}

impl Server {
    pub fn new(database_count: usize, thresholds: EncodingThresholds) -> Self {
        Server {
            keyspace: Keyspace::new(database_count),
            txns: TxnTable::new(),
            pubsub: PubSub::new(),
            thresholds,
            notify_keyspace_events: false,
            lazy_free_threshold: 64 * 1024,
            pending_publishes: Vec::new(),
        }
    }

    /// Queues a resolved publish for delivery. Called by `PUBLISH`
    /// itself and by `drain_notifications` for keyspace events — both
    /// go through the same delivery path so the `knot` binary only has
    /// to drain one queue after dispatching a command.
    pub fn queue_publish(&mut self, channel: Vec<u8>, payload: Vec<u8>, delivery: Delivery) {
        self.pending_publishes.push(PendingPublish { channel, payload, delivery });
    }

    /// Hands the accumulated publishes to the caller for delivery and
    /// clears the queue (mirrors `Database::take_events`'s drain shape).
    pub fn drain_publishes(&mut self) -> Vec<PendingPublish> {
        std::mem::take(&mut self.pending_publishes)
    }

    /// Drains a database's pending keyspace events (populated by its
    /// mutators) and, if notifications are enabled, publishes each to
    /// `__keyspace@<dbid>__:<key>` and `__keyevent@<dbid>__:<op>`
    /// (spec §6). Also feeds `knot-txn`'s WATCH invalidation for every
    /// drained event, since any of them implies the key changed.
    pub fn drain_notifications(&mut self, dbid: usize) {
        let events = match self.keyspace.get_mut(dbid) {
            Some(db) => db.take_events(),
            None => return,
        };
        for event in events {
            if event.class != EventClass::Expired && event.class != EventClass::Evicted {
                let watchers: Vec<ClientId> = self
                    .keyspace
                    .get(dbid)
                    .map(|db| db.invalidate_watchers(&event.key))
                    .unwrap_or_default();
                self.txns.invalidate(watchers);
            }
            if !self.notify_keyspace_events {
                continue;
            }
            let keyspace_channel = format!("__keyspace@{dbid}__:{}", String::from_utf8_lossy(&event.key));
            let keyevent_channel = format!("__keyevent@{dbid}__:{}", event.op);
            let keyspace_delivery = self.pubsub.publish(keyspace_channel.as_bytes());
            self.queue_publish(keyspace_channel.into_bytes(), event.op.as_bytes().to_vec(), keyspace_delivery);
            let keyevent_delivery = self.pubsub.publish(keyevent_channel.as_bytes());
            self.queue_publish(keyevent_channel.into_bytes(), event.key.to_vec(), keyevent_delivery);
            tracing::trace!(?event.class, op = event.op, "keyspace notification");
        }
    }
}

/// Per-connection state the command layer needs: which database is
/// selected and which wire-protocol version is in effect. Connection
/// lifecycle (accept/close) and output buffering live in the `knot`
/// binary.
#[derive(Debug, Clone)]
pub struct Session {
    pub client: ClientId,
    pub dbid: usize,
    pub resp3: bool,
}

impl Session {
    pub fn new(client: ClientId) -> Self {
        Session {
            client,
            dbid: 0,
            resp3: false,
        }
    }
}
