// Message hub
// Address-pattern fan-out of decoded or locally produced messages, worker thread only

use super::codec::ProtocolError;
use super::message::Message;
use super::queue::Consumer;

/// Subscription address pattern.
///
/// Segments match literally, except a segment that is exactly `*`, which matches
/// any single segment. `*` never spans several segments, and OSC bracket, brace
/// and `?` patterns are not interpreted (they match literally).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressPattern {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Any,
}

impl AddressPattern {
    pub fn parse(pattern: &str) -> Result<Self, ProtocolError> {
        let rest = pattern
            .strip_prefix('/')
            .ok_or_else(|| ProtocolError::InvalidAddress(pattern.to_string()))?;

        let segments = rest
            .split('/')
            .map(|segment| match segment {
                "" => Err(ProtocolError::InvalidAddress(pattern.to_string())),
                "*" => Ok(Segment::Any),
                literal => Ok(Segment::Literal(literal.to_string())),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(AddressPattern { segments })
    }

    pub fn matches(&self, address: &str) -> bool {
        let Some(rest) = address.strip_prefix('/') else {
            return false;
        };

        let mut parts = rest.split('/');
        for segment in &self.segments {
            match (segment, parts.next()) {
                (_, None) => return false,
                (Segment::Any, Some(part)) => {
                    if part.is_empty() {
                        return false;
                    }
                }
                (Segment::Literal(literal), Some(part)) => {
                    if literal != part {
                        return false;
                    }
                }
            }
        }
        parts.next().is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Hub counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Messages passed to `dispatch`
    pub dispatched: u64,
    /// Callback invocations
    pub delivered: u64,
    /// Messages no subscription matched
    pub unmatched: u64,
}

type Callback = Box<dyn FnMut(&Message) + Send>;

struct Subscription {
    id: SubscriptionId,
    /// None receives every message
    pattern: Option<AddressPattern>,
    callback: Callback,
}

/// Fan-out of messages to subscribers.
/// Callbacks run one after another, in registration order.
#[derive(Default)]
pub struct OscHub {
    subscriptions: Vec<Subscription>,
    next_id: u64,
    stats: HubStats,
}

impl OscHub {
    pub fn new() -> Self {
        OscHub::default()
    }

    pub fn subscribe(
        &mut self,
        pattern: &str,
        callback: impl FnMut(&Message) + Send + 'static,
    ) -> Result<SubscriptionId, ProtocolError> {
        let pattern = AddressPattern::parse(pattern)?;
        Ok(self.add(Some(pattern), Box::new(callback)))
    }

    /// Receive every message regardless of address depth
    pub fn subscribe_all(&mut self, callback: impl FnMut(&Message) + Send + 'static) -> SubscriptionId {
        self.add(None, Box::new(callback))
    }

    fn add(&mut self, pattern: Option<AddressPattern>, callback: Callback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscriptions.push(Subscription { id, pattern, callback });
        id
    }

    /// Returns false if the id was not subscribed
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.id != id);
        self.subscriptions.len() != before
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Deliver one message; returns how many callbacks saw it
    pub fn dispatch(&mut self, message: &Message) -> usize {
        self.stats.dispatched += 1;

        let mut delivered = 0;
        for subscription in self.subscriptions.iter_mut() {
            let matched = subscription
                .pattern
                .as_ref()
                .map_or(true, |p| p.matches(&message.address));
            if matched {
                (subscription.callback)(message);
                delivered += 1;
            }
        }

        if delivered == 0 {
            self.stats.unmatched += 1;
        }
        self.stats.delivered += delivered as u64;
        delivered
    }

    /// Dispatch everything currently queued; returns the message count
    pub fn drain(&mut self, consumer: &mut Consumer<Message>) -> usize {
        self.drain_bounded(consumer, usize::MAX)
    }

    /// Dispatch at most `max` queued messages
    pub fn drain_bounded(&mut self, consumer: &mut Consumer<Message>, max: usize) -> usize {
        consumer.drain_with(max, |message| {
            self.dispatch(&message);
        })
    }

    pub fn stats(&self) -> HubStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::queue::RtMessageQueue;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_pattern_exact_and_wildcard() {
        let exact = AddressPattern::parse("/harmony/chord").unwrap();
        assert!(exact.matches("/harmony/chord"));
        assert!(!exact.matches("/harmony/key"));
        assert!(!exact.matches("/harmony/chord/extra"));

        let wildcard = AddressPattern::parse("/harmony/*").unwrap();
        assert!(wildcard.matches("/harmony/chord"));
        assert!(wildcard.matches("/harmony/key"));
        assert!(!wildcard.matches("/harmony"));
        assert!(!wildcard.matches("/harmony/chord/extra"));
        assert!(!wildcard.matches("/groove/tempo"));

        let middle = AddressPattern::parse("/*/tempo").unwrap();
        assert!(middle.matches("/groove/tempo"));
        assert!(!middle.matches("/groove/onset"));
    }

    #[test]
    fn test_pattern_literal_specials() {
        // Only a whole "*" segment is a wildcard
        let pattern = AddressPattern::parse("/groove/on*").unwrap();
        assert!(pattern.matches("/groove/on*"));
        assert!(!pattern.matches("/groove/onset"));
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(AddressPattern::parse("groove").is_err());
        assert!(AddressPattern::parse("/groove//tempo").is_err());
        assert!(AddressPattern::parse("/").is_err());
    }

    #[test]
    fn test_fan_out_in_registration_order() {
        let mut hub = OscHub::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for (name, pattern) in [("first", "/harmony/*"), ("second", "/harmony/chord"), ("third", "/groove/*")] {
            let log = Arc::clone(&log);
            hub.subscribe(pattern, move |m| log.lock().unwrap().push((name, m.address.to_string())))
                .unwrap();
        }

        assert_eq!(hub.dispatch(&Message::new("/harmony/chord", 0)), 2);
        assert_eq!(hub.dispatch(&Message::new("/groove/tempo", 0)), 1);
        assert_eq!(hub.dispatch(&Message::new("/other", 0)), 0);

        let log = log.lock().unwrap();
        assert_eq!(log[0], ("first", "/harmony/chord".to_string()));
        assert_eq!(log[1], ("second", "/harmony/chord".to_string()));
        assert_eq!(log[2], ("third", "/groove/tempo".to_string()));

        let stats = hub.stats();
        assert_eq!(stats.dispatched, 3);
        assert_eq!(stats.delivered, 3);
        assert_eq!(stats.unmatched, 1);
    }

    #[test]
    fn test_subscribe_all() {
        let mut hub = OscHub::new();
        let count = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&count);
        hub.subscribe_all(move |_| *sink.lock().unwrap() += 1);

        hub.dispatch(&Message::new("/a", 0));
        hub.dispatch(&Message::new("/a/b/c/d", 0));
        assert_eq!(*count.lock().unwrap(), 2);
        assert_eq!(hub.stats().unmatched, 0);
    }

    #[test]
    fn test_unsubscribe() {
        let mut hub = OscHub::new();
        let id = hub.subscribe("/a", |_| {}).unwrap();
        assert!(hub.unsubscribe(id));
        assert!(!hub.unsubscribe(id));
        assert_eq!(hub.dispatch(&Message::new("/a", 0)), 0);
    }

    #[test]
    fn test_drain_from_queue() {
        let (mut tx, mut rx) = RtMessageQueue::new::<Message>(8);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let mut hub = OscHub::new();
        let sink = Arc::clone(&seen);
        hub.subscribe("/*", move |m| sink.lock().unwrap().push(m.timestamp)).unwrap();

        for t in 0..5 {
            tx.push(Message::new("/tick", t)).unwrap();
        }
        assert_eq!(hub.drain_bounded(&mut rx, 3), 3);
        assert_eq!(hub.drain(&mut rx), 2);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }
}
