// Channel and pattern subscription routing (spec §4.8, component C9).
// Delivery is synchronous in the sense that `publish` resolves the
// full recipient list eagerly, but this crate never touches a socket
// or output buffer — it hands the caller (`knot-cmd`) the list of
// client ids to write "message"/"pmessage" frames to, and the reactor
// flushes those buffers on the next writable event.

use std::collections::{HashMap, HashSet};

use knot_base::glob_match;

pub type ClientId = u64;

/// A client to deliver a "pmessage" frame to, paired with the pattern
/// that matched (frames carry both the pattern and the channel).
pub struct PatternMatch {
    pub client: ClientId,
    pub pattern: Vec<u8>,
}

pub struct Delivery {
    pub channel_recipients: Vec<ClientId>,
    pub pattern_recipients: Vec<PatternMatch>,
}

impl Delivery {
    pub fn recipient_count(&self) -> usize {
        self.channel_recipients.len() + self.pattern_recipients.len()
    }
}

#[derive(Default)]
struct ClientState {
    channels: HashSet<Vec<u8>>,
    patterns: HashSet<Vec<u8>>,
}

impl ClientState {
    fn subscription_count(&self) -> usize {
        self.channels.len() + self.patterns.len()
    }
}

/// Server-wide pub/sub router. One instance per process (subscriptions
/// aren't per-database — `SELECT` doesn't affect them).
#[derive(Default)]
pub struct PubSub {
    channels: HashMap<Vec<u8>, Vec<ClientId>>,
    patterns: Vec<(Vec<u8>, ClientId)>,
    clients: HashMap<ClientId, ClientState>,
}

impl PubSub {
    pub fn new() -> Self {
        PubSub::default()
    }

    /// `SUBSCRIBE`: idempotent, returns the client's new total
    /// subscription count.
    pub fn subscribe(&mut self, client: ClientId, channel: &[u8]) -> usize {
        let state = self.clients.entry(client).or_default();
        if state.channels.insert(channel.to_vec()) {
            let recipients = self.channels.entry(channel.to_vec()).or_default();
            if !recipients.contains(&client) {
                recipients.push(client);
            }
        }
        self.clients[&client].subscription_count()
    }

    /// `UNSUBSCRIBE`: `None` unsubscribes from every channel the
    /// client is on. Returns `(channel, new_total_count)` per affected
    /// channel — an empty `Vec` (with `channel` unset) is the "no
    /// subscriptions left" reply case callers must special-case, as
    /// the source does.
    pub fn unsubscribe(&mut self, client: ClientId, channel: Option<&[u8]>) -> Vec<(Vec<u8>, usize)> {
        let targets: Vec<Vec<u8>> = match channel {
            Some(ch) => vec![ch.to_vec()],
            None => self
                .clients
                .get(&client)
                .map(|s| s.channels.iter().cloned().collect())
                .unwrap_or_default(),
        };
        let mut out = Vec::new();
        for ch in targets {
            if let Some(state) = self.clients.get_mut(&client) {
                state.channels.remove(&ch);
            }
            if let Some(recipients) = self.channels.get_mut(&ch) {
                recipients.retain(|c| *c != client);
                if recipients.is_empty() {
                    self.channels.remove(&ch);
                }
            }
            let total = self.clients.get(&client).map(|s| s.subscription_count()).unwrap_or(0);
            out.push((ch, total));
        }
        out
    }

    /// `PSUBSCRIBE`.
    pub fn psubscribe(&mut self, client: ClientId, pattern: &[u8]) -> usize {
        let state = self.clients.entry(client).or_default();
        if state.patterns.insert(pattern.to_vec()) {
            self.patterns.push((pattern.to_vec(), client));
        }
        self.clients[&client].subscription_count()
    }

    /// `PUNSUBSCRIBE`.
    pub fn punsubscribe(&mut self, client: ClientId, pattern: Option<&[u8]>) -> Vec<(Vec<u8>, usize)> {
        let targets: Vec<Vec<u8>> = match pattern {
            Some(p) => vec![p.to_vec()],
            None => self
                .clients
                .get(&client)
                .map(|s| s.patterns.iter().cloned().collect())
                .unwrap_or_default(),
        };
        let mut out = Vec::new();
        for pat in targets {
            if let Some(state) = self.clients.get_mut(&client) {
                state.patterns.remove(&pat);
            }
            self.patterns.retain(|(p, c)| !(p == &pat && *c == client));
            let total = self.clients.get(&client).map(|s| s.subscription_count()).unwrap_or(0);
            out.push((pat, total));
        }
        out
    }

    /// Drops every subscription a disconnecting client held.
    pub fn drop_client(&mut self, client: ClientId) {
        self.unsubscribe(client, None);
        self.punsubscribe(client, None);
        self.clients.remove(&client);
    }

    /// `PUBLISH`: resolves exact-channel and pattern recipients.
    /// Cluster-mode rebroadcast (spec's "additionally broadcast to the
    /// cluster collaborator") is out of scope — no cluster
    /// collaborator exists in this workspace.
    pub fn publish(&self, channel: &[u8]) -> Delivery {
        let channel_recipients = self.channels.get(channel).cloned().unwrap_or_default();
        let pattern_recipients = self
            .patterns
            .iter()
            .filter(|(pat, _)| glob_match(pat, channel))
            .map(|(pat, client)| PatternMatch {
                client: *client,
                pattern: pat.clone(),
            })
            .collect();
        Delivery {
            channel_recipients,
            pattern_recipients,
        }
    }

    // --- PUBSUB introspection (pubsub.c's pubsubCommand) ---

    pub fn channels_matching(&self, pattern: Option<&[u8]>) -> Vec<Vec<u8>> {
        self.channels
            .keys()
            .filter(|ch| pattern.map(|p| glob_match(p, ch)).unwrap_or(true))
            .cloned()
            .collect()
    }

    pub fn numsub(&self, channel: &[u8]) -> usize {
        self.channels.get(channel).map(|r| r.len()).unwrap_or(0)
    }

    pub fn numpat(&self) -> usize {
        self.patterns.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn subscribe_and_publish_delivers_to_channel() {
        let mut ps = PubSub::new();
        ps.subscribe(1, b"news");
        ps.subscribe(2, b"news");
        let delivery = ps.publish(b"news");
        assert_eq!(delivery.channel_recipients.len(), 2);
        assert_eq!(delivery.recipient_count(), 2);
    }

    #[test]
    fn pattern_subscription_matches_glob() {
        let mut ps = PubSub::new();
        ps.psubscribe(1, b"news.*");
        let delivery = ps.publish(b"news.sports");
        assert_eq!(delivery.pattern_recipients.len(), 1);
        assert_eq!(delivery.pattern_recipients[0].pattern, b"news.*");
    }

    #[test]
    fn unsubscribe_from_all_drains_every_channel() {
        let mut ps = PubSub::new();
        ps.subscribe(1, b"a");
        ps.subscribe(1, b"b");
        let result = ps.unsubscribe(1, None);
        assert_eq!(result.len(), 2);
        assert_eq!(ps.publish(b"a").recipient_count(), 0);
    }

    #[test]
    fn subscribe_is_idempotent() {
        let mut ps = PubSub::new();
        let first = ps.subscribe(1, b"a");
        let second = ps.subscribe(1, b"a");
        assert_eq!(first, second);
        assert_eq!(ps.numsub(b"a"), 1);
    }

    #[test]
    fn drop_client_clears_both_channel_and_pattern_state() {
        let mut ps = PubSub::new();
        ps.subscribe(1, b"a");
        ps.psubscribe(1, b"p*");
        ps.drop_client(1);
        assert_eq!(ps.numsub(b"a"), 0);
        assert_eq!(ps.numpat(), 0);
    }

    #[test]
    fn pubsub_introspection_reports_channels_and_numpat() {
        let mut ps = PubSub::new();
        ps.subscribe(1, b"news.sports");
        ps.subscribe(2, b"weather");
        ps.psubscribe(3, b"news.*");
        assert_eq!(ps.channels_matching(Some(b"news.*")), vec![b"news.sports".to_vec()]);
        assert_eq!(ps.numpat(), 1);
    }
}
