use std::time::Duration;

use nostr_sdk::prelude::*;
use thiserror::Error;
use tokio::sync::mpsc::Sender;

use crate::types::ProcessableEvent;

pub mod publisher;
pub mod subscriptions;

#[derive(Error, Debug)]
pub enum NostrManagerError {
    #[error("Client Error: {0}")]
    Client(#[from] nostr_sdk::client::Error),
    #[error("Invalid relay url: {0}")]
    RelayUrl(#[from] nostr_sdk::types::url::Error),
    #[error("Nostr Event error: {0}")]
    NostrEventBuilderError(#[from] nostr_sdk::event::builder::Error),
    #[error("Failed to connect to any relays")]
    NoRelayConnections,
    #[error("No signer configured for this session")]
    SignerNotConfigured,
}

#[derive(Debug, Clone)]
pub struct NostrManager {
    pub(crate) client: Client,
    timeout: Duration,
}

pub type Result<T> = std::result::Result<T, NostrManagerError>;

impl NostrManager {
    /// Default timeout for client requests
    pub(crate) fn default_timeout() -> Duration {
        Duration::from_secs(5)
    }

    /// Create a new Nostr manager
    ///
    /// # Arguments
    ///
    /// * `event_sender` - Channel sender for forwarding relay events to the processing loop
    /// * `signer` - Keys used to sign events the session publishes, if any
    /// * `timeout` - Timeout for client requests
    pub async fn new(
        event_sender: Sender<ProcessableEvent>,
        signer: Option<Keys>,
        timeout: Duration,
    ) -> Result<Self> {
        let opts = ClientOptions::default();

        let client = match signer {
            Some(keys) => Client::builder().signer(keys).opts(opts).build(),
            None => Client::builder().opts(opts).build(),
        };

        tracing::debug!(
            target: "agora::nostr_manager::new",
            "Setting up notification handler..."
        );

        // Spawn notification handler in a background task to prevent blocking
        let client_clone = client.clone();
        tokio::spawn(async move {
            if let Err(e) = client_clone
                .handle_notifications(move |notification| {
                    let sender = event_sender.clone();
                    async move {
                        match notification {
                            RelayPoolNotification::Message { relay_url, message } => {
                                let processable = match message {
                                    RelayMessage::Event {
                                        subscription_id,
                                        event,
                                    } => ProcessableEvent::new_nostr_event(
                                        event.as_ref().clone(),
                                        Some(subscription_id.to_string()),
                                    ),
                                    other => ProcessableEvent::RelayMessage(
                                        relay_url,
                                        relay_message_label(&other).to_string(),
                                    ),
                                };

                                if sender.send(processable).await.is_err() {
                                    // SendError only occurs when channel is closed, so exit gracefully
                                    tracing::debug!(
                                        target: "agora::nostr_manager::handle_notifications",
                                        "Event channel closed, exiting notification handler"
                                    );
                                    return Ok(true);
                                }
                                Ok(false)
                            }
                            RelayPoolNotification::Shutdown => {
                                tracing::debug!(
                                    target: "agora::nostr_manager::handle_notifications",
                                    "Relay pool shutdown"
                                );
                                Ok(true)
                            }
                            _ => Ok(false),
                        }
                    }
                })
                .await
            {
                tracing::error!(
                    target: "agora::nostr_manager::handle_notifications",
                    "Notification handler error: {:?}",
                    e
                );
            }
        });

        tracing::debug!(
            target: "agora::nostr_manager::new",
            "NostrManager initialization completed"
        );

        Ok(Self { client, timeout })
    }

    /// Adds the given relays to the pool and connects to them.
    ///
    /// Individual relays that cannot be added are logged and skipped. Fails only
    /// when none of the relays could be added.
    pub async fn ensure_relays_connected(&self, relays: &[RelayUrl]) -> Result<()> {
        if relays.is_empty() {
            return Ok(());
        }

        tracing::debug!(
            target: "agora::nostr_manager::ensure_relays_connected",
            "Ensuring connection to {} relays",
            relays.len()
        );

        let mut available = 0;
        for relay in relays {
            if self.client.relay(relay.clone()).await.is_ok() {
                available += 1;
                continue;
            }
            match self.client.add_relay(relay.clone()).await {
                Ok(_) => {
                    available += 1;
                    tracing::debug!(
                        target: "agora::nostr_manager::ensure_relays_connected",
                        "Added relay: {}",
                        relay
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        target: "agora::nostr_manager::ensure_relays_connected",
                        "Failed to add relay {}: {}",
                        relay,
                        e
                    );
                }
            }
        }

        if available == 0 {
            return Err(NostrManagerError::NoRelayConnections);
        }

        self.client.connect().await;
        self.client.wait_for_connection(self.timeout).await;
        Ok(())
    }

    /// Drops every subscription and disconnects from all relays
    pub(crate) async fn shutdown(&self) {
        tracing::debug!(
            target: "agora::nostr_manager::shutdown",
            "Closing subscriptions and relay connections"
        );
        self.client.unsubscribe_all().await;
        self.client.shutdown().await;
    }
}

/// Short name of a non-event relay message, used for logging
fn relay_message_label(message: &RelayMessage) -> &'static str {
    match message {
        RelayMessage::Ok { .. } => "Ok",
        RelayMessage::Notice { .. } => "Notice",
        RelayMessage::Closed { .. } => "Closed",
        RelayMessage::EndOfStoredEvents(_) => "EndOfStoredEvents",
        RelayMessage::Auth { .. } => "Auth",
        RelayMessage::Count { .. } => "Count",
        RelayMessage::NegMsg { .. } => "NegMsg",
        RelayMessage::NegErr { .. } => "NegErr",
        _ => "Unknown",
    }
}
