use std::sync::Mutex;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::device::types::{Event, Reading};

/**
 * Ordered, multi-subscriber broadcast of session events.
 *
 * Each subscriber gets its own unbounded channel, so publishing never blocks
 * the state machine. There is no replay: a subscriber joining late misses
 * everything published before it subscribed, so consumers that want the
 * early Loading events must subscribe before `start_receiving`.
 */
#[derive(Default)]
pub struct ResultStream {
    senders: Mutex<Vec<UnboundedSender<Event<Reading>>>>,
}

impl ResultStream {
    pub fn new() -> Self {
        ResultStream { senders: Mutex::new(Vec::new()) }
    }

    pub fn subscribe(&self) -> UnboundedReceiver<Event<Reading>> {
        let (sender, receiver) = unbounded_channel();
        self.senders.lock().expect("ResultStream lock poisoned").push(sender);
        receiver
    }

    /// Publish to every live subscriber, pruning the ones that went away.
    pub fn publish(&self, event: Event<Reading>) {
        let mut senders = self.senders.lock().expect("ResultStream lock poisoned");
        senders.retain(|sender| sender.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::types::ConnectionState;

    #[test]
    fn delivery_matches_publication_order() {
        let stream = ResultStream::new();
        let mut rx = stream.subscribe();

        stream.publish(Event::loading("first"));
        stream.publish(Event::loading("second"));
        stream.publish(Event::success(Reading::disconnected()));

        assert_eq!(rx.try_recv().unwrap(), Event::loading("first"));
        assert_eq!(rx.try_recv().unwrap(), Event::loading("second"));
        match rx.try_recv().unwrap() {
            Event::Success { data } => assert_eq!(data.state, ConnectionState::Disconnected),
            other => panic!("expected Success, got {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn every_subscriber_sees_every_event() {
        let stream = ResultStream::new();
        let mut a = stream.subscribe();
        let mut b = stream.subscribe();

        stream.publish(Event::loading("hello"));

        assert_eq!(a.try_recv().unwrap(), Event::loading("hello"));
        assert_eq!(b.try_recv().unwrap(), Event::loading("hello"));
    }

    #[test]
    fn late_subscribers_miss_earlier_events() {
        let stream = ResultStream::new();
        stream.publish(Event::loading("gone"));

        let mut rx = stream.subscribe();
        stream.publish(Event::loading("kept"));

        assert_eq!(rx.try_recv().unwrap(), Event::loading("kept"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let stream = ResultStream::new();
        let rx = stream.subscribe();
        let mut live = stream.subscribe();
        drop(rx);

        stream.publish(Event::loading("still delivered"));

        assert_eq!(live.try_recv().unwrap(), Event::loading("still delivered"));
        assert_eq!(stream.senders.lock().unwrap().len(), 1);
    }
}
