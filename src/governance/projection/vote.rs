use nostr_sdk::prelude::*;

use super::Projection;
use super::types::ProjectionError;

impl Projection {
    /// Record a vote, or buffer it until its proposal arrives
    pub(super) fn apply_vote(
        &mut self,
        event: &Event,
        proposal_id: EventId,
        now: Timestamp,
    ) -> Result<(), ProjectionError> {
        if self.proposals.contains_key(&proposal_id) {
            return self.record_vote(event, &proposal_id);
        }

        let expired = self.pending_votes.evict_expired(now);
        self.forget(expired);

        let evicted = self.pending_votes.push(proposal_id, event.clone(), now)?;
        self.forget(evicted);

        if self.config.enable_debug_logging {
            tracing::debug!(
                target: "agora::projection::apply_vote",
                "Proposal {} not seen yet, buffered vote {} ({} pending)",
                proposal_id.to_hex(),
                event.id.to_hex(),
                self.pending_votes.votes_for(&proposal_id)
            );
        }
        Ok(())
    }

    /// Apply every buffered vote for a freshly materialized proposal, in arrival order
    pub(super) fn replay_pending_votes(&mut self, proposal_id: &EventId) {
        let buffered = self.pending_votes.take(proposal_id);
        if buffered.is_empty() {
            return;
        }

        tracing::debug!(
            target: "agora::projection::replay_pending_votes",
            "Replaying {} buffered votes for proposal {}",
            buffered.len(),
            proposal_id.to_hex()
        );

        for vote in buffered {
            if let Err(e) = self.record_vote(&vote, proposal_id) {
                // Forget it so a corrected redelivery is not treated as a duplicate
                self.processed.remove(&vote.id);
                tracing::warn!(
                    target: "agora::projection::replay_pending_votes",
                    "Dropping buffered vote {}: {}",
                    vote.id.to_hex(),
                    e
                );
            }
        }
    }

    /// Last arrival wins: a voter's previous choice is overwritten regardless of timestamps
    fn record_vote(&mut self, event: &Event, proposal_id: &EventId) -> Result<(), ProjectionError> {
        let option_index = parse_option_index(&event.content)?;
        let proposal = self
            .proposals
            .get_mut(proposal_id)
            .ok_or(ProjectionError::ProposalNotFound(*proposal_id))?;
        proposal.votes.insert(event.pubkey, option_index);
        Ok(())
    }
}

fn parse_option_index(content: &str) -> Result<usize, ProjectionError> {
    content
        .trim()
        .parse::<usize>()
        .map_err(|_| ProjectionError::InvalidVoteContent(content.to_string()))
}
