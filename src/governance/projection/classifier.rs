//! Decodes raw Nostr events into governance roles
//!
//! Each event is inspected exactly once: its kind selects the role and its tags
//! are resolved into typed references. Content is left untouched so each
//! projector can apply its own parse-failure policy.

use nostr_sdk::prelude::*;

use super::kinds;

/// A `p` tag subject together with the role marker in its third slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedSubject {
    pub pubkey: PublicKey,
    pub marker: Option<String>,
}

/// Governance role of an event, with its tag references decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GovernanceEvent {
    Definition {
        unique_id: String,
        members: Vec<PublicKey>,
        labels: Vec<String>,
    },
    Metadata {
        community_id: EventId,
    },
    Role {
        community_id: EventId,
        subjects: Vec<TaggedSubject>,
    },
    Invite {
        community_id: EventId,
    },
    Proposal {
        community_id: EventId,
    },
    Vote {
        proposal_id: EventId,
    },
    KickProposal {
        community_id: EventId,
        target_member: PublicKey,
    },
    KickVote {
        kick_proposal_id: EventId,
    },
    MemberKicked {
        community_id: EventId,
        target_member: PublicKey,
        kick_proposal_id: Option<EventId>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassifyError {
    #[error("Unhandled event kind: {0}")]
    UnknownKind(u16),

    #[error("Missing required {0}-tag")]
    MissingTag(&'static str),

    #[error("Invalid reference in {tag}-tag: {value}")]
    InvalidReference { tag: &'static str, value: String },
}

/// Route an event to the projector that handles its role
pub fn classify(event: &Event) -> Result<GovernanceEvent, ClassifyError> {
    match event.kind.as_u16() {
        kinds::COMMUNITY_DEFINITION => {
            let unique_id = first_value(&event.tags, Alphabet::D)
                .filter(|d| !d.is_empty())
                .ok_or(ClassifyError::MissingTag("d"))?;
            Ok(GovernanceEvent::Definition {
                unique_id: unique_id.to_string(),
                members: member_pubkeys(&event.tags),
                labels: labels(&event.tags),
            })
        }
        kinds::COMMUNITY_METADATA => Ok(GovernanceEvent::Metadata {
            community_id: required_event_ref(&event.tags)?,
        }),
        kinds::COMMUNITY_ROLE => {
            let community_id = required_event_ref(&event.tags)?;
            let subjects = tagged_subjects(&event.tags);
            if subjects.is_empty() {
                return Err(ClassifyError::MissingTag("p"));
            }
            Ok(GovernanceEvent::Role {
                community_id,
                subjects,
            })
        }
        kinds::COMMUNITY_INVITE => Ok(GovernanceEvent::Invite {
            community_id: required_event_ref(&event.tags)?,
        }),
        kinds::PROPOSAL => Ok(GovernanceEvent::Proposal {
            community_id: required_event_ref(&event.tags)?,
        }),
        kinds::VOTE => Ok(GovernanceEvent::Vote {
            proposal_id: required_event_ref(&event.tags)?,
        }),
        kinds::KICK_PROPOSAL => Ok(GovernanceEvent::KickProposal {
            community_id: required_event_ref(&event.tags)?,
            target_member: kick_target(&event.tags)?,
        }),
        kinds::KICK_VOTE => Ok(GovernanceEvent::KickVote {
            kick_proposal_id: required_event_ref(&event.tags)?,
        }),
        kinds::MEMBER_KICKED => {
            let community_id = event_refs(&event.tags)
                .find(|(_, marker)| *marker != Some(kinds::KICK_PROPOSAL_MARKER))
                .map(|(value, _)| parse_event_id(value))
                .ok_or(ClassifyError::MissingTag("e"))??;
            let kick_proposal_id = event_refs(&event.tags)
                .find(|(_, marker)| *marker == Some(kinds::KICK_PROPOSAL_MARKER))
                .map(|(value, _)| parse_event_id(value))
                .transpose()?;
            Ok(GovernanceEvent::MemberKicked {
                community_id,
                target_member: kick_target(&event.tags)?,
                kick_proposal_id,
            })
        }
        other => Err(ClassifyError::UnknownKind(other)),
    }
}

fn is_single_letter(tag: &Tag, letter: Alphabet) -> bool {
    tag.kind() == TagKind::SingleLetter(SingleLetterTag::lowercase(letter))
}

fn first_value(tags: &Tags, letter: Alphabet) -> Option<&str> {
    tags.iter()
        .filter(|tag| is_single_letter(tag, letter))
        .find_map(|tag| tag.content())
}

/// Role or purpose marker, carried after the relay hint: `[letter, value, relay, marker]`
fn marker(tag: &Tag) -> Option<&str> {
    tag.as_slice()
        .get(3)
        .map(|s| s.as_str())
        .filter(|s| !s.is_empty())
}

/// `e` tag values paired with their third-slot marker
fn event_refs(tags: &Tags) -> impl Iterator<Item = (&str, Option<&str>)> {
    tags.iter()
        .filter(|tag| is_single_letter(tag, Alphabet::E))
        .filter_map(|tag| tag.content().map(|value| (value, marker(tag))))
}

fn parse_event_id(value: &str) -> Result<EventId, ClassifyError> {
    EventId::from_hex(value).map_err(|_| ClassifyError::InvalidReference {
        tag: "e",
        value: value.to_string(),
    })
}

fn required_event_ref(tags: &Tags) -> Result<EventId, ClassifyError> {
    let (value, _) = event_refs(tags)
        .next()
        .ok_or(ClassifyError::MissingTag("e"))?;
    parse_event_id(value)
}

fn tagged_subjects(tags: &Tags) -> Vec<TaggedSubject> {
    tags.iter()
        .filter(|tag| is_single_letter(tag, Alphabet::P))
        .filter_map(|tag| {
            let pubkey = PublicKey::from_hex(tag.content()?).ok()?;
            Some(TaggedSubject {
                pubkey,
                marker: marker(tag).map(str::to_string),
            })
        })
        .collect()
}

/// Members of a definition are every parseable `p` tag, whatever its marker
fn member_pubkeys(tags: &Tags) -> Vec<PublicKey> {
    let mut members: Vec<PublicKey> = Vec::new();
    for subject in tagged_subjects(tags) {
        if !members.contains(&subject.pubkey) {
            members.push(subject.pubkey);
        }
    }
    members
}

fn labels(tags: &Tags) -> Vec<String> {
    tags.iter()
        .filter(|tag| is_single_letter(tag, Alphabet::T))
        .filter_map(|tag| tag.content().map(str::to_string))
        .collect()
}

fn kick_target(tags: &Tags) -> Result<PublicKey, ClassifyError> {
    let value = tags
        .iter()
        .filter(|tag| is_single_letter(tag, Alphabet::P))
        .find(|tag| marker(tag) == Some(kinds::KICK_MARKER))
        .and_then(|tag| tag.content())
        .ok_or(ClassifyError::MissingTag("p"))?;
    PublicKey::from_hex(value).map_err(|_| ClassifyError::InvalidReference {
        tag: "p",
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(kind: u16, content: &str, tags: Vec<Vec<String>>) -> Event {
        let tags: Vec<Tag> = tags.into_iter().map(|t| Tag::parse(t).unwrap()).collect();
        EventBuilder::new(Kind::from(kind), content)
            .tags(tags)
            .sign_with_keys(&Keys::generate())
            .unwrap()
    }

    fn tag(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_definition_requires_d_tag() {
        let member = Keys::generate().public_key().to_hex();
        let event = build(kinds::COMMUNITY_DEFINITION, "{}", vec![tag(&["p", &member])]);
        assert_eq!(classify(&event), Err(ClassifyError::MissingTag("d")));
    }

    #[test]
    fn test_definition_collects_members_and_labels() {
        let alice = Keys::generate().public_key();
        let bob = Keys::generate().public_key();
        let event = build(
            kinds::COMMUNITY_DEFINITION,
            "{}",
            vec![
                tag(&["d", "rust-club"]),
                tag(&["p", &alice.to_hex()]),
                tag(&["p", &bob.to_hex(), "", "moderator"]),
                tag(&["p", &alice.to_hex()]),
                tag(&["p", "not-a-pubkey"]),
                tag(&["t", "rust"]),
            ],
        );

        match classify(&event).unwrap() {
            GovernanceEvent::Definition {
                unique_id,
                members,
                labels,
            } => {
                assert_eq!(unique_id, "rust-club");
                assert_eq!(members, vec![alice, bob]);
                assert_eq!(labels, vec!["rust".to_string()]);
            }
            other => panic!("unexpected classification: {:?}", other),
        }
    }

    #[test]
    fn test_vote_requires_e_tag() {
        let event = build(kinds::VOTE, "1", vec![]);
        assert_eq!(classify(&event), Err(ClassifyError::MissingTag("e")));
    }

    #[test]
    fn test_invalid_e_tag_is_rejected() {
        let event = build(kinds::VOTE, "1", vec![tag(&["e", "P1"])]);
        assert!(matches!(
            classify(&event),
            Err(ClassifyError::InvalidReference { tag: "e", .. })
        ));
    }

    #[test]
    fn test_kick_proposal_needs_kick_marker() {
        let community = build(kinds::COMMUNITY_DEFINITION, "{}", vec![tag(&["d", "c"])]);
        let target = Keys::generate().public_key();

        let unmarked = build(
            kinds::KICK_PROPOSAL,
            "spam",
            vec![
                tag(&["e", &community.id.to_hex()]),
                tag(&["p", &target.to_hex()]),
            ],
        );
        assert_eq!(classify(&unmarked), Err(ClassifyError::MissingTag("p")));

        let marked = build(
            kinds::KICK_PROPOSAL,
            "spam",
            vec![
                tag(&["e", &community.id.to_hex()]),
                tag(&["p", &target.to_hex(), "", "kick"]),
            ],
        );
        assert_eq!(
            classify(&marked),
            Ok(GovernanceEvent::KickProposal {
                community_id: community.id,
                target_member: target,
            })
        );
    }

    #[test]
    fn test_member_kicked_separates_community_and_kick_proposal() {
        let community = build(kinds::COMMUNITY_DEFINITION, "{}", vec![tag(&["d", "c"])]);
        let kick = build(kinds::KICK_VOTE, "", vec![tag(&["e", &community.id.to_hex()])]);
        let target = Keys::generate().public_key();

        let event = build(
            kinds::MEMBER_KICKED,
            "",
            vec![
                tag(&["e", &kick.id.to_hex(), "", "kick-proposal"]),
                tag(&["e", &community.id.to_hex()]),
                tag(&["p", &target.to_hex(), "", "kick"]),
            ],
        );

        assert_eq!(
            classify(&event),
            Ok(GovernanceEvent::MemberKicked {
                community_id: community.id,
                target_member: target,
                kick_proposal_id: Some(kick.id),
            })
        );
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let event = build(1, "hello", vec![]);
        assert_eq!(classify(&event), Err(ClassifyError::UnknownKind(1)));
    }
}
