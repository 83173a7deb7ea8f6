use nostr_sdk::prelude::*;

/// Events that can be processed by the governance event processing loop
#[derive(Debug)]
pub enum ProcessableEvent {
    /// A Nostr event with the subscription it arrived on, if any.
    /// Events fed back locally by the effect sink carry no subscription.
    NostrEvent {
        event: Event,
        subscription_id: Option<String>,
    },
    /// A relay message for logging/monitoring purposes
    RelayMessage(RelayUrl, String),
}

impl ProcessableEvent {
    pub fn new_nostr_event(event: Event, subscription_id: Option<String>) -> Self {
        Self::NostrEvent {
            event,
            subscription_id,
        }
    }

    /// Wrap an event this session produced itself
    pub fn local(event: Event) -> Self {
        Self::NostrEvent {
            event,
            subscription_id: None,
        }
    }
}
