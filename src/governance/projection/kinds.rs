//! Event kinds carrying community governance events

/// Addressable community definition (NIP-72)
pub const COMMUNITY_DEFINITION: u16 = 34550;
pub const COMMUNITY_METADATA: u16 = 8551;
pub const COMMUNITY_ROLE: u16 = 8552;
pub const COMMUNITY_INVITE: u16 = 8553;
pub const PROPOSAL: u16 = 8554;
pub const VOTE: u16 = 8555;
pub const KICK_PROPOSAL: u16 = 8556;
pub const KICK_VOTE: u16 = 8557;
/// Published by the effect sink once a kick proposal reaches quorum
pub const MEMBER_KICKED: u16 = 8558;

/// Every kind the projection understands, for subscription filters
pub const GOVERNANCE_KINDS: [u16; 9] = [
    COMMUNITY_DEFINITION,
    COMMUNITY_METADATA,
    COMMUNITY_ROLE,
    COMMUNITY_INVITE,
    PROPOSAL,
    VOTE,
    KICK_PROPOSAL,
    KICK_VOTE,
    MEMBER_KICKED,
];

/// Third-slot marker on the `p` tag naming the member a kick targets
pub const KICK_MARKER: &str = "kick";
/// Third-slot marker on the `e` tag linking a member-kicked event to its kick proposal
pub const KICK_PROPOSAL_MARKER: &str = "kick-proposal";
