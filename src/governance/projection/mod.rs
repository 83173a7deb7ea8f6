//! Community Governance Projection
//!
//! Folds an unordered, possibly duplicated stream of governance events into
//! materialized communities, proposals and kick proposals. Every reducer is
//! synchronous and total: a malformed or premature event is logged and
//! dropped without affecting the rest of the stream. Side effects are never
//! performed here; reducers return [`Command`]s for the effect sink instead.

mod classifier;
mod community;
pub mod kinds;
mod kick;
mod pending;
mod proposal;
mod types;
mod vote;


pub use classifier::{ClassifyError, GovernanceEvent, TaggedSubject, classify};
pub use pending::PendingVoteBuffer;
pub use types::{
    Command, Community, CommunityAddress, DEFAULT_COMMUNITY_NAME, DEFAULT_KICK_QUORUM, DEFAULT_PROPOSAL_DURATION,
    DEFAULT_PROPOSAL_TITLE, InviteLink, KickProposal, PendingVoteLimits, ProjectionConfig,
    ProjectionError, Proposal,
};

use nostr_sdk::prelude::*;
use std::collections::{HashMap, HashSet};

/// In-memory materialized view of every governance aggregate
#[derive(Debug, Clone, Default)]
pub struct Projection {
    config: ProjectionConfig,
    /// Communities keyed by creator and `d` tag
    communities: HashMap<CommunityAddress, Community>,
    /// Every definition event id seen, mapped to the community's address
    community_aliases: HashMap<EventId, CommunityAddress>,
    invites: HashMap<EventId, InviteLink>,
    proposals: HashMap<EventId, Proposal>,
    pending_votes: PendingVoteBuffer,
    kick_proposals: HashMap<EventId, KickProposal>,
    /// Kick proposals a member-kicked event has already carried out, seen or not
    executed_kicks: HashSet<EventId>,
    /// Events already applied or buffered
    processed: HashSet<EventId>,
}

impl Projection {
    pub fn new() -> Self {
        Self::with_config(ProjectionConfig::default())
    }

    pub fn with_config(config: ProjectionConfig) -> Self {
        Self {
            pending_votes: PendingVoteBuffer::new(config.pending_votes.clone()),
            config,
            ..Default::default()
        }
    }

    /// Fold events in the given order into an empty projection, discarding commands
    pub fn replay<'a>(
        events: impl IntoIterator<Item = &'a Event>,
        config: ProjectionConfig,
        now: Timestamp,
    ) -> Self {
        let mut projection = Self::with_config(config);
        for event in events {
            projection.apply(event, now);
        }
        projection
    }

    pub fn config(&self) -> &ProjectionConfig {
        &self.config
    }

    /// Apply one event and return the commands it triggered.
    ///
    /// `now` is the arrival time, used to age out buffered votes.
    /// An event id that was already applied or buffered is ignored. Events
    /// that fail are not remembered, so a later redelivery can still succeed.
    pub fn apply(&mut self, event: &Event, now: Timestamp) -> Vec<Command> {
        if self.processed.contains(&event.id) {
            if self.config.enable_debug_logging {
                tracing::debug!(
                    target: "agora::projection::apply",
                    "Skipping duplicate event {}",
                    event.id.to_hex()
                );
            }
            return Vec::new();
        }

        let governance_event = match classify(event) {
            Ok(governance_event) => governance_event,
            Err(e) => {
                tracing::debug!(
                    target: "agora::projection::apply",
                    "Dropping event {} (kind {}): {}",
                    event.id.to_hex(),
                    event.kind.as_u16(),
                    e
                );
                return Vec::new();
            }
        };

        match self.route(event, governance_event, now) {
            Ok(commands) => {
                self.processed.insert(event.id);
                commands
            }
            Err(e) if e.is_referential() => {
                tracing::debug!(
                    target: "agora::projection::apply",
                    "Dropping event {}: {}",
                    event.id.to_hex(),
                    e
                );
                Vec::new()
            }
            Err(e) => {
                tracing::warn!(
                    target: "agora::projection::apply",
                    "Failed to apply event {} (kind {}): {}",
                    event.id.to_hex(),
                    event.kind.as_u16(),
                    e
                );
                Vec::new()
            }
        }
    }

    fn route(
        &mut self,
        event: &Event,
        governance_event: GovernanceEvent,
        now: Timestamp,
    ) -> Result<Vec<Command>, ProjectionError> {
        match governance_event {
            GovernanceEvent::Definition {
                unique_id,
                members,
                labels,
            } => self.apply_definition(event, unique_id, members, labels)?,
            GovernanceEvent::Metadata { community_id } => {
                self.apply_metadata(event, &community_id)?
            }
            GovernanceEvent::Role {
                community_id,
                subjects,
            } => self.apply_role(event, &community_id, &subjects)?,
            GovernanceEvent::Invite { community_id } => self.apply_invite(event, community_id)?,
            GovernanceEvent::Proposal { community_id } => {
                self.apply_proposal(event, community_id)?
            }
            GovernanceEvent::Vote { proposal_id } => self.apply_vote(event, proposal_id, now)?,
            GovernanceEvent::KickProposal {
                community_id,
                target_member,
            } => self.apply_kick_proposal(event, community_id, target_member)?,
            GovernanceEvent::KickVote { kick_proposal_id } => {
                return Ok(self
                    .apply_kick_vote(event, kick_proposal_id)?
                    .into_iter()
                    .collect());
            }
            GovernanceEvent::MemberKicked {
                community_id,
                target_member,
                kick_proposal_id,
            } => self.apply_member_kicked(&community_id, target_member, kick_proposal_id)?,
        }
        Ok(Vec::new())
    }

    /// Look up a community by the id of any version of its definition
    pub fn community(&self, id: &EventId) -> Option<&Community> {
        self.community_aliases
            .get(id)
            .and_then(|address| self.communities.get(address))
    }

    pub fn community_by_address(&self, creator: &PublicKey, unique_id: &str) -> Option<&Community> {
        self.communities.get(&CommunityAddress {
            creator: *creator,
            unique_id: unique_id.to_string(),
        })
    }

    /// Communities using this `d` tag, one per creator, oldest first
    pub fn communities_by_unique_id(&self, unique_id: &str) -> Vec<&Community> {
        let mut communities: Vec<&Community> = self
            .communities
            .values()
            .filter(|community| community.unique_id == unique_id)
            .collect();
        communities.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        communities
    }

    /// Ids of every definition version of the community `id` belongs to, sorted.
    ///
    /// Events may reference any of them. Unknown ids are returned on their own.
    pub fn definition_ids(&self, id: &EventId) -> Vec<EventId> {
        let Some(address) = self.community_aliases.get(id) else {
            return vec![*id];
        };
        let mut ids: Vec<EventId> = self
            .community_aliases
            .iter()
            .filter(|(_, other)| *other == address)
            .map(|(alias, _)| *alias)
            .collect();
        ids.sort();
        ids
    }

    /// All communities, newest first
    pub fn communities(&self) -> Vec<&Community> {
        let mut communities: Vec<&Community> = self.communities.values().collect();
        communities.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        communities
    }

    pub fn invite(&self, id: &EventId) -> Option<&InviteLink> {
        self.invites.get(id)
    }

    pub fn invites_for_community(&self, community_id: &EventId) -> Vec<&InviteLink> {
        let mut invites: Vec<&InviteLink> = self
            .invites
            .values()
            .filter(|invite| self.same_community(&invite.community_id, community_id))
            .collect();
        invites.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        invites
    }

    pub fn proposal(&self, id: &EventId) -> Option<&Proposal> {
        self.proposals.get(id)
    }

    /// Proposals of a community, sorted by creation time descending
    pub fn proposals_for_community(&self, community_id: &EventId) -> Vec<&Proposal> {
        let mut proposals: Vec<&Proposal> = self
            .proposals
            .values()
            .filter(|proposal| self.same_community(&proposal.community_id, community_id))
            .collect();
        proposals.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        proposals
    }

    pub fn kick_proposal(&self, id: &EventId) -> Option<&KickProposal> {
        self.kick_proposals.get(id)
    }

    pub fn kick_proposals_for_community(&self, community_id: &EventId) -> Vec<&KickProposal> {
        let mut kicks: Vec<&KickProposal> = self
            .kick_proposals
            .values()
            .filter(|kick| self.same_community(&kick.community_id, community_id))
            .collect();
        kicks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        kicks
    }

    /// Number of votes waiting for their proposal
    pub fn pending_vote_count(&self) -> usize {
        self.pending_votes.len()
    }

    pub fn pending_votes_for(&self, proposal_id: &EventId) -> usize {
        self.pending_votes.votes_for(proposal_id)
    }

    fn community_mut(&mut self, id: &EventId) -> Option<&mut Community> {
        let address = self.community_aliases.get(id)?;
        self.communities.get_mut(address)
    }

    /// Whether two ids name the same community, directly or through definition aliases
    fn same_community(&self, a: &EventId, b: &EventId) -> bool {
        if a == b {
            return true;
        }
        match (self.community_aliases.get(a), self.community_aliases.get(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }

    /// Drop evicted votes from the processed set so a redelivery can buffer them again
    fn forget(&mut self, evicted: Vec<Event>) {
        for event in evicted {
            self.processed.remove(&event.id);
        }
    }
}
