//! Member removal proposals and the quorum that executes them

use nostr_sdk::prelude::*;

use super::Projection;
use super::types::{Command, KickProposal, ProjectionError};

impl Projection {
    /// Create a kick proposal. The author's vote is implied and seeded immediately.
    pub(super) fn apply_kick_proposal(
        &mut self,
        event: &Event,
        community_id: EventId,
        target_member: PublicKey,
    ) -> Result<(), ProjectionError> {
        if self.kick_proposals.contains_key(&event.id) {
            return Ok(());
        }

        self.kick_proposals.insert(
            event.id,
            KickProposal {
                id: event.id,
                community_id,
                target_member,
                reason: event.content.clone(),
                votes: vec![event.pubkey],
                created_at: event.created_at,
                executed: self.executed_kicks.contains(&event.id),
            },
        );
        Ok(())
    }

    /// Record a kick vote and emit the kick command the first time quorum holds.
    ///
    /// Quorum is measured against the community's current membership, so the
    /// effective threshold moves as members join or leave.
    pub(super) fn apply_kick_vote(
        &mut self,
        event: &Event,
        kick_proposal_id: EventId,
    ) -> Result<Option<Command>, ProjectionError> {
        let community_id = self
            .kick_proposals
            .get(&kick_proposal_id)
            .map(|kick| kick.community_id)
            .ok_or(ProjectionError::KickProposalNotFound(kick_proposal_id))?;
        let member_count = self
            .community(&community_id)
            .map(|community| community.members.len())
            .unwrap_or(0);
        let threshold = self.config.kick_quorum;

        let kick = self
            .kick_proposals
            .get_mut(&kick_proposal_id)
            .ok_or(ProjectionError::KickProposalNotFound(kick_proposal_id))?;

        if !kick.votes.contains(&event.pubkey) {
            kick.votes.push(event.pubkey);
        }

        if kick.executed || !quorum_reached(kick.votes.len(), member_count, threshold) {
            return Ok(None);
        }

        kick.executed = true;
        tracing::info!(
            target: "agora::projection::apply_kick_vote",
            "Kick proposal {} reached quorum ({}/{} members), removing {}",
            kick.id.to_hex(),
            kick.votes.len(),
            member_count,
            kick.target_member.to_hex()
        );

        Ok(Some(Command::KickMember {
            community_id: kick.community_id,
            kick_proposal_id: kick.id,
            target_member: kick.target_member,
        }))
    }
}

/// A community with no known members can never reach quorum
fn quorum_reached(votes: usize, members: usize, threshold: f64) -> bool {
    members > 0 && votes as f64 / members as f64 >= threshold
}
