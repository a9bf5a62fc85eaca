//! Channel-backed event broker.

use crate::core::Broker;
use crate::events::Event;

/// Forwards events to an unbounded flume channel. Sending never blocks; if
/// the consumer is gone the event is dropped and logged.
pub struct ChannelBroker {
    tx: flume::Sender<Event>,
}

impl ChannelBroker {
    pub fn new() -> (Self, flume::Receiver<Event>) {
        let (tx, rx) = flume::unbounded();
        (Self { tx }, rx)
    }
}

impl Broker for ChannelBroker {
    fn send(&self, event: Event) {
        if let Err(e) = self.tx.send(event) {
            tracing::debug!(party = %e.0.party(), "event receiver dropped, discarding event");
        }
    }

    fn send_batch(&self, events: Vec<Event>) {
        for event in events {
            self.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::PartyId;
    use crate::sla::SlaStats;

    fn stats_event(party: &str) -> Event {
        Event::SlaPerformance { party: PartyId::from(party), stats: SlaStats::default() }
    }

    #[test]
    fn test_events_arrive_in_order() {
        let (broker, rx) = ChannelBroker::new();
        broker.send(stats_event("a"));
        broker.send_batch(vec![stats_event("b"), stats_event("c")]);

        let parties: Vec<String> = rx.try_iter().map(|e| e.party().to_string()).collect();
        assert_eq!(parties, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_dropped_receiver_does_not_panic() {
        let (broker, rx) = ChannelBroker::new();
        drop(rx);
        broker.send(stats_event("a"));
    }
}
