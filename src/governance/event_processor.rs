use nostr_sdk::prelude::*;
use std::sync::Arc;
use tokio::sync::mpsc::Receiver;

use crate::governance::Governance;
use crate::governance::effects::spawn_commands;
use crate::governance::projection::kinds;
use crate::types::ProcessableEvent;

impl Governance {
    /// Start the event processing loop in a background task
    pub(crate) fn start_event_processing_loop(
        governance: Arc<Governance>,
        receiver: Receiver<ProcessableEvent>,
        shutdown_receiver: Receiver<()>,
    ) {
        tokio::spawn(async move {
            Self::process_events(governance, receiver, shutdown_receiver).await;
        });
    }

    /// Main event processing loop
    async fn process_events(
        governance: Arc<Governance>,
        mut receiver: Receiver<ProcessableEvent>,
        mut shutdown: Receiver<()>,
    ) {
        tracing::debug!(
            target: "agora::event_processor::process_events",
            "Starting event processing loop"
        );

        loop {
            tokio::select! {
                Some(event) = receiver.recv() => {
                    governance.process_event(event).await;
                }
                Some(_) = shutdown.recv() => {
                    tracing::info!(
                        target: "agora::event_processor::process_events",
                        "Received shutdown signal, finishing current queue..."
                    );
                    while let Ok(event) = receiver.try_recv() {
                        governance.process_event(event).await;
                    }
                    tracing::debug!(
                        target: "agora::event_processor::process_events",
                        "Queue flushed, shutting down event processor"
                    );
                    break;
                }
                else => {
                    tracing::debug!(
                        target: "agora::event_processor::process_events",
                        "All channels closed, exiting event processing loop"
                    );
                    break;
                }
            }
        }
    }

    async fn process_event(&self, event: ProcessableEvent) {
        match event {
            ProcessableEvent::NostrEvent {
                event,
                subscription_id,
            } => {
                tracing::debug!(
                    target: "agora::event_processor::process_event",
                    "Processing event {} (kind {}) from {}",
                    event.id.to_hex(),
                    event.kind.as_u16(),
                    subscription_id.as_deref().unwrap_or("local queue")
                );

                let commands = self
                    .projection
                    .write()
                    .await
                    .apply(&event, Timestamp::now());
                if !commands.is_empty() {
                    spawn_commands(self.sink.clone(), commands);
                }

                if event.kind.as_u16() == kinds::COMMUNITY_DEFINITION {
                    if let Some(community_id) = self.watched_community_of(&event.id).await {
                        self.refresh_community_subscription(community_id).await;
                    }
                } else if let Some(community_id) = self.opened_ballot_in(&event).await {
                    self.refresh_ballot_subscription(community_id).await;
                }
            }
            ProcessableEvent::RelayMessage(relay_url, message) => {
                self.process_relay_message(relay_url, message);
            }
        }
    }

    /// Process relay messages for logging/monitoring
    fn process_relay_message(&self, relay_url: RelayUrl, message_type: String) {
        tracing::debug!(
            target: "agora::event_processor::process_relay_message",
            "Processing message from {}: {}",
            relay_url,
            message_type
        );
    }

    /// The watched community a newly applied proposal or kick proposal belongs to
    async fn opened_ballot_in(&self, event: &Event) -> Option<EventId> {
        let kind = event.kind.as_u16();
        if kind != kinds::PROPOSAL && kind != kinds::KICK_PROPOSAL {
            return None;
        }

        let community_id = {
            let projection = self.projection.read().await;
            match kind {
                kinds::PROPOSAL => projection.proposal(&event.id)?.community_id,
                _ => projection.kick_proposal(&event.id)?.community_id,
            }
        };
        self.watched_community_of(&community_id).await
    }

    /// The watched id naming the same community as `id`, directly or through a definition alias
    pub(super) async fn watched_community_of(&self, id: &EventId) -> Option<EventId> {
        let projection = self.projection.read().await;
        let canonical = |id: &EventId| projection.community(id).map(|community| community.id);

        self.watched
            .read()
            .await
            .iter()
            .find(|watched| {
                **watched == *id
                    || canonical(*watched).is_some_and(|found| Some(found) == canonical(id))
            })
            .copied()
    }

    /// Re-issue a watched community's subscription so it covers every definition id
    async fn refresh_community_subscription(&self, community_id: EventId) {
        let definition_ids = self.projection.read().await.definition_ids(&community_id);
        if let Err(e) = self
            .nostr
            .subscribe_community(community_id, &definition_ids)
            .await
        {
            tracing::warn!(
                target: "agora::event_processor::refresh_community_subscription",
                "Failed to update subscription for community {}: {}",
                community_id.to_hex(),
                e
            );
        }
    }

    /// Point the ballot subscription of a watched community at all of its open questions
    pub(crate) async fn refresh_ballot_subscription(&self, community_id: EventId) {
        let ballot_ids: Vec<EventId> = {
            let projection = self.projection.read().await;
            projection
                .proposals_for_community(&community_id)
                .iter()
                .map(|proposal| proposal.id)
                .chain(
                    projection
                        .kick_proposals_for_community(&community_id)
                        .iter()
                        .map(|kick| kick.id),
                )
                .collect()
        };

        if let Err(e) = self.nostr.subscribe_ballots(community_id, ballot_ids).await {
            tracing::warn!(
                target: "agora::event_processor::refresh_ballot_subscription",
                "Failed to update ballot subscription for community {}: {}",
                community_id.to_hex(),
                e
            );
        }
    }
}
