//! This module contains functions for signing and publishing Nostr events.

use nostr_sdk::prelude::*;

use crate::nostr_manager::{NostrManager, NostrManagerError, Result};

impl NostrManager {
    /// Signs an event builder with the session signer.
    ///
    /// Returns [`NostrManagerError::SignerNotConfigured`] when the session was
    /// started without keys.
    pub async fn sign_event_builder(&self, event_builder: EventBuilder) -> Result<Event> {
        if !self.client.has_signer().await {
            return Err(NostrManagerError::SignerNotConfigured);
        }
        Ok(self.client.sign_event_builder(event_builder).await?)
    }

    /// Publishes an already signed event to every connected relay.
    pub async fn publish_event(&self, event: &Event) -> Result<Output<EventId>> {
        let output = self.client.send_event(event).await?;

        if output.success.is_empty() {
            tracing::warn!(
                target: "agora::nostr_manager::publish_event",
                "Event {} was rejected by all {} relay(s)",
                event.id.to_hex(),
                output.failed.len()
            );
        } else {
            tracing::debug!(
                target: "agora::nostr_manager::publish_event",
                "Published event {} to {} relay(s)",
                event.id.to_hex(),
                output.success.len()
            );
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_sign_event_builder_without_signer() {
        let (sender, _receiver) = mpsc::channel(10);
        let manager = NostrManager::new(sender, None, NostrManager::default_timeout())
            .await
            .unwrap();

        let result = manager
            .sign_event_builder(EventBuilder::text_note("hello"))
            .await;
        assert!(matches!(result, Err(NostrManagerError::SignerNotConfigured)));
    }

    #[tokio::test]
    async fn test_sign_event_builder_with_signer() {
        let keys = Keys::generate();
        let (sender, _receiver) = mpsc::channel(10);
        let manager = NostrManager::new(
            sender,
            Some(keys.clone()),
            NostrManager::default_timeout(),
        )
        .await
        .unwrap();

        let event = manager
            .sign_event_builder(EventBuilder::text_note("hello"))
            .await
            .unwrap();
        assert_eq!(event.pubkey, keys.public_key());
        assert!(event.verify().is_ok());
    }
}
