// SUBSCRIBE/UNSUBSCRIBE/PSUBSCRIBE/PUNSUBSCRIBE/PUBLISH and PUBSUB
// introspection (spec §4.8). Subscribe-style commands reply once per
// channel/pattern, so these return `Vec<Reply>` for the caller to
// write out as successive RESP frames instead of one aggregate reply.

use knot_proto::Reply;

use crate::error::{CommandError, CommandResult};
use crate::server::{Server, Session};
use crate::util::{arity_error, uppercase};

fn sub_reply(kind: &str, channel: Vec<u8>, count: usize) -> Reply {
    Reply::Push(vec![
        Reply::bulk(kind.as_bytes().to_vec()),
        Reply::bulk(channel),
        Reply::Integer(count as i64),
    ])
}

pub fn subscribe(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Vec<Reply>> {
    if argv.len() < 2 {
        return Err(arity_error("subscribe"));
    }
    Ok(argv[1..]
        .iter()
        .map(|ch| {
            let count = server.pubsub.subscribe(session.client, ch);
            sub_reply("subscribe", ch.clone(), count)
        })
        .collect())
}

pub fn unsubscribe(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Vec<Reply>> {
    let channels: Option<Vec<&[u8]>> = if argv.len() > 1 {
        Some(argv[1..].iter().map(|v| v.as_slice()).collect())
    } else {
        None
    };
    let results = match channels {
        Some(chs) => chs.into_iter().flat_map(|ch| server.pubsub.unsubscribe(session.client, Some(ch))).collect(),
        None => server.pubsub.unsubscribe(session.client, None),
    };
    Ok(finish_unsub("unsubscribe", results))
}

pub fn psubscribe(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Vec<Reply>> {
    if argv.len() < 2 {
        return Err(arity_error("psubscribe"));
    }
    Ok(argv[1..]
        .iter()
        .map(|pat| {
            let count = server.pubsub.psubscribe(session.client, pat);
            sub_reply("psubscribe", pat.clone(), count)
        })
        .collect())
}

pub fn punsubscribe(server: &mut Server, session: &Session, argv: &[Vec<u8>]) -> CommandResult<Vec<Reply>> {
    let patterns: Option<Vec<&[u8]>> = if argv.len() > 1 {
        Some(argv[1..].iter().map(|v| v.as_slice()).collect())
    } else {
        None
    };
    let results = match patterns {
        Some(pats) => pats.into_iter().flat_map(|p| server.pubsub.punsubscribe(session.client, Some(p))).collect(),
        None => server.pubsub.punsubscribe(session.client, None),
    };
    Ok(finish_unsub("punsubscribe", results))
}

fn finish_unsub(kind: &str, results: Vec<(Vec<u8>, usize)>) -> Vec<Reply> {
    if results.is_empty() {
        return vec![sub_reply(kind, Vec::new(), 0)];
    }
    results.into_iter().map(|(ch, count)| sub_reply(kind, ch, count)).collect()
}

/// `PUBLISH`: resolves the recipient list and queues it on `Server`
/// for delivery, then replies with the recipient count. Actually
/// writing "message"/"pmessage" frames into those clients' output
/// buffers is the `knot` binary's job (it owns the sockets) — it
/// drains `Server::drain_publishes` after dispatch returns.
pub fn publish(server: &mut Server, _session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() != 3 {
        return Err(arity_error("publish"));
    }
    let delivery = server.pubsub.publish(&argv[1]);
    let count = delivery.recipient_count() as i64;
    server.queue_publish(argv[1].clone(), argv[2].clone(), delivery);
    Ok(Reply::Integer(count))
}

pub fn pubsub(server: &mut Server, _session: &Session, argv: &[Vec<u8>]) -> CommandResult<Reply> {
    if argv.len() < 2 {
        return Err(arity_error("pubsub"));
    }
    match uppercase(&argv[1]).as_str() {
        "CHANNELS" => {
            let pattern = argv.get(2).map(|p| p.as_slice());
            let channels = server.pubsub.channels_matching(pattern);
            Ok(Reply::Array(channels.into_iter().map(Reply::bulk).collect()))
        }
        "NUMSUB" => {
            let mut out = Vec::with_capacity(argv.len() - 2);
            for channel in &argv[2..] {
                out.push(Reply::bulk(channel.clone()));
                out.push(Reply::Integer(server.pubsub.numsub(channel) as i64));
            }
            Ok(Reply::Array(out))
        }
        "NUMPAT" => Ok(Reply::Integer(server.pubsub.numpat() as i64)),
        _ => Err(CommandError::syntax()),
    }
}
