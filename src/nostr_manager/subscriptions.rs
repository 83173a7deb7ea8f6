//! Subscription functions for NostrManager
//! Live subscriptions that feed governance events into the processing loop.

use nostr_sdk::prelude::*;

use crate::governance::projection::kinds;
use crate::nostr_manager::{NostrManager, Result};

/// Kinds that reference their community directly through an `e` tag
const COMMUNITY_SCOPED_KINDS: [u16; 6] = [
    kinds::COMMUNITY_METADATA,
    kinds::COMMUNITY_ROLE,
    kinds::COMMUNITY_INVITE,
    kinds::PROPOSAL,
    kinds::KICK_PROPOSAL,
    kinds::MEMBER_KICKED,
];

/// Kinds that reference a proposal rather than the community
const BALLOT_KINDS: [u16; 2] = [kinds::VOTE, kinds::KICK_VOTE];

/// Community scoped kinds referencing the community or any of its definition ids
fn community_filter(community_id: EventId, definition_ids: &[EventId]) -> Filter {
    let mut references: Vec<String> = definition_ids.iter().map(|id| id.to_hex()).collect();
    if !definition_ids.contains(&community_id) {
        references.push(community_id.to_hex());
    }

    Filter::new()
        .kinds(COMMUNITY_SCOPED_KINDS.map(Kind::from))
        .custom_tags(SingleLetterTag::lowercase(Alphabet::E), references)
}

impl NostrManager {
    /// Short, stable suffix for subscription ids scoped to one community
    fn community_subscription_suffix(community_id: &EventId) -> String {
        community_id.to_hex()[..12].to_string()
    }

    /// Subscribe to every community definition
    pub async fn subscribe_communities(&self) -> Result<SubscriptionId> {
        let subscription_id = SubscriptionId::new("agora_communities");
        let filter = Filter::new().kind(Kind::from(kinds::COMMUNITY_DEFINITION));

        self.client
            .subscribe_with_id(subscription_id.clone(), filter, None)
            .await?;

        tracing::debug!(
            target: "agora::nostr_manager::subscribe_communities",
            "Subscribed to community definitions"
        );
        Ok(subscription_id)
    }

    /// Subscribe to the metadata, roles, invites, proposals and kicks of one community.
    ///
    /// `definition_ids` lists every version of the community's definition, since
    /// events may reference any of them. Calling this again with more ids
    /// replaces the previous filter on the relays.
    pub async fn subscribe_community(
        &self,
        community_id: EventId,
        definition_ids: &[EventId],
    ) -> Result<SubscriptionId> {
        let subscription_id = SubscriptionId::new(format!(
            "agora_community_{}",
            Self::community_subscription_suffix(&community_id)
        ));
        let filter = community_filter(community_id, definition_ids);

        self.client
            .subscribe_with_id(subscription_id.clone(), filter, None)
            .await?;

        tracing::debug!(
            target: "agora::nostr_manager::subscribe_community",
            "Subscribed to community {} through {} definition id(s)",
            community_id.to_hex(),
            definition_ids.len().max(1)
        );
        Ok(subscription_id)
    }

    /// Subscribe to votes and kick votes on the given proposals of a community.
    ///
    /// Reuses one subscription id per community, so calling this again with a
    /// longer proposal list replaces the previous filter on the relays.
    pub async fn subscribe_ballots(
        &self,
        community_id: EventId,
        proposal_ids: Vec<EventId>,
    ) -> Result<Option<SubscriptionId>> {
        if proposal_ids.is_empty() {
            // Nothing to vote on yet, skip subscription
            return Ok(None);
        }

        let subscription_id = SubscriptionId::new(format!(
            "agora_ballots_{}",
            Self::community_subscription_suffix(&community_id)
        ));
        let filter = Filter::new().kinds(BALLOT_KINDS.map(Kind::from)).custom_tags(
            SingleLetterTag::lowercase(Alphabet::E),
            proposal_ids.iter().map(|id| id.to_hex()),
        );

        self.client
            .subscribe_with_id(subscription_id.clone(), filter, None)
            .await?;

        tracing::debug!(
            target: "agora::nostr_manager::subscribe_ballots",
            "Subscribed to ballots on {} proposals of community {}",
            proposal_ids.len(),
            community_id.to_hex()
        );
        Ok(Some(subscription_id))
    }

    pub async fn unsubscribe(&self, subscription_id: &SubscriptionId) {
        self.client.unsubscribe(subscription_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scoped_kinds_cover_every_governance_kind() {
        let mut covered: Vec<u16> = COMMUNITY_SCOPED_KINDS
            .iter()
            .chain(BALLOT_KINDS.iter())
            .copied()
            .collect();
        covered.push(kinds::COMMUNITY_DEFINITION);
        covered.sort_unstable();

        let mut all = kinds::GOVERNANCE_KINDS.to_vec();
        all.sort_unstable();
        assert_eq!(covered, all);
    }

    #[test]
    fn test_community_filter_references_every_definition() {
        let keys = Keys::generate();
        let ids: Vec<EventId> = ["v1", "v2"]
            .iter()
            .map(|content| {
                EventBuilder::text_note(*content)
                    .sign_with_keys(&keys)
                    .unwrap()
                    .id
            })
            .collect();

        let filter = community_filter(ids[0], &ids);
        let references = filter
            .generic_tags
            .get(&SingleLetterTag::lowercase(Alphabet::E))
            .unwrap();
        assert_eq!(references.len(), 2);
        assert!(references.contains(&ids[1].to_hex()));

        let watched_only = community_filter(ids[0], &[]);
        assert_eq!(
            watched_only
                .generic_tags
                .get(&SingleLetterTag::lowercase(Alphabet::E))
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_community_subscription_suffix_is_stable() {
        let id = EventId::all_zeros();
        assert_eq!(NostrManager::community_subscription_suffix(&id), "000000000000");
    }
}
