use nostr_sdk::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

pub const DEFAULT_COMMUNITY_NAME: &str = "Unnamed Community";
pub const DEFAULT_PROPOSAL_TITLE: &str = "Unnamed Proposal";
pub const DEFAULT_PROPOSAL_DURATION: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const DEFAULT_KICK_QUORUM: f64 = 0.51;

pub fn default_proposal_options() -> Vec<String> {
    vec!["Yes".to_string(), "No".to_string()]
}

/// Addressable identity of a community (NIP-72): its creator and `d` tag.
///
/// Two creators using the same `d` tag own two distinct communities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommunityAddress {
    pub creator: PublicKey,
    pub unique_id: String,
}

/// A community materialized from its definition, metadata and role events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Community {
    /// Event id of the first definition seen for this community
    pub id: EventId,

    /// Stable identifier from the `d` tag, shared by every version of the definition
    pub unique_id: String,

    pub name: String,
    pub description: String,
    pub image: String,
    pub creator: PublicKey,
    pub created_at: Timestamp,
    pub members: HashSet<PublicKey>,
    pub moderators: HashSet<PublicKey>,
    pub banned_members: HashSet<PublicKey>,
    pub guidelines: Option<String>,
    pub is_private: bool,
    pub tags: HashSet<String>,

    /// Set when the latest definition content could not be parsed
    pub degraded: bool,
}

impl Community {
    pub fn address(&self) -> CommunityAddress {
        CommunityAddress {
            creator: self.creator,
            unique_id: self.unique_id.clone(),
        }
    }

    pub fn is_member(&self, pubkey: &PublicKey) -> bool {
        self.members.contains(pubkey)
    }

    pub fn is_moderator(&self, pubkey: &PublicKey) -> bool {
        self.moderators.contains(pubkey)
    }
}

/// An invite link issued for a community
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InviteLink {
    pub id: EventId,
    pub community_id: EventId,
    pub creator: PublicKey,
    pub created_at: Timestamp,
    pub expires_at: Option<Timestamp>,
    pub max_uses: Option<u32>,
    pub used_count: u32,
}

impl InviteLink {
    /// Whether the link can still be redeemed at `now`
    pub fn is_usable(&self, now: Timestamp) -> bool {
        let not_expired = self.expires_at.is_none_or(|expires_at| expires_at > now);
        let has_uses = self.max_uses.is_none_or(|max| self.used_count < max);
        not_expired && has_uses
    }
}

/// A governance proposal with its vote tally
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Proposal {
    pub id: EventId,
    pub community_id: EventId,
    pub title: String,
    pub description: String,
    pub options: Vec<String>,
    pub created_at: Timestamp,
    pub ends_at: Timestamp,
    pub creator: PublicKey,

    /// One entry per voter, holding the chosen option index
    pub votes: HashMap<PublicKey, usize>,

    /// Set when the proposal content could not be parsed and defaults were used
    pub degraded: bool,
}

impl Proposal {
    pub fn is_active(&self, now: Timestamp) -> bool {
        self.ends_at > now
    }

    /// Vote count per option. Votes for indices outside `options` are not counted.
    pub fn tally(&self) -> Vec<usize> {
        let mut counts = vec![0; self.options.len()];
        for index in self.votes.values() {
            if let Some(count) = counts.get_mut(*index) {
                *count += 1;
            }
        }
        counts
    }
}

/// A proposal to remove a member from a community
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KickProposal {
    pub id: EventId,
    pub community_id: EventId,
    pub target_member: PublicKey,
    pub reason: String,

    /// Voters in arrival order, seeded with the proposal author
    pub votes: Vec<PublicKey>,
    pub created_at: Timestamp,

    /// Set once quorum has been reached and the kick command emitted
    pub executed: bool,
}

/// Side effects requested by the projection, executed by the effect sink
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Command {
    KickMember {
        community_id: EventId,
        kick_proposal_id: EventId,
        target_member: PublicKey,
    },
}

/// Bounds on the buffer of votes whose proposal has not arrived yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingVoteLimits {
    pub max_votes_per_proposal: usize,
    pub max_proposals: usize,
    pub ttl: Duration,
}

impl Default for PendingVoteLimits {
    fn default() -> Self {
        Self {
            max_votes_per_proposal: 1000,
            max_proposals: 10_000,
            ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Configuration for the projection
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionConfig {
    /// Fraction of current members whose votes are required to execute a kick
    pub kick_quorum: f64,

    pub pending_votes: PendingVoteLimits,

    /// Whether to enable detailed logging of processing steps
    pub enable_debug_logging: bool,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            kick_quorum: DEFAULT_KICK_QUORUM,
            pending_votes: PendingVoteLimits::default(),
            enable_debug_logging: false,
        }
    }
}

/// Errors that can occur while folding a single event into the projection
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    #[error("Invalid JSON content: {0}")]
    InvalidContent(#[from] serde_json::Error),

    #[error("Invalid metadata value for {0}")]
    InvalidMetadataValue(String),

    #[error("Unsupported role: {0}")]
    UnsupportedRole(String),

    #[error("No p-tag carries the {0} role")]
    RoleSubjectMissing(String),

    #[error("Invalid vote content: {0:?}")]
    InvalidVoteContent(String),

    #[error("Community not found: {0}")]
    CommunityNotFound(EventId),

    #[error("Proposal not found: {0}")]
    ProposalNotFound(EventId),

    #[error("Kick proposal not found: {0}")]
    KickProposalNotFound(EventId),

    #[error("Pending vote buffer full for proposal {0}")]
    PendingBufferFull(EventId),
}

impl ProjectionError {
    /// Whether the event referenced an aggregate this projection has not seen
    pub fn is_referential(&self) -> bool {
        matches!(
            self,
            Self::CommunityNotFound(_) | Self::ProposalNotFound(_) | Self::KickProposalNotFound(_)
        )
    }
}
