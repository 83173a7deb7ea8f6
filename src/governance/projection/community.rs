//! Community definition, metadata, role and invite handling

use nostr_sdk::prelude::*;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;

use super::Projection;
use super::classifier::TaggedSubject;
use super::types::{
    Community, CommunityAddress, DEFAULT_COMMUNITY_NAME, InviteLink, ProjectionError,
};

const MODERATOR_ROLE: &str = "moderator";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DefinitionContent {
    name: Option<String>,
    description: Option<String>,
    image: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MetadataUpdate {
    #[serde(rename = "type")]
    kind: MetadataKind,
    content: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum MetadataKind {
    Guidelines,
    Private,
    Tags,
}

#[derive(Debug, Deserialize)]
struct RoleChange {
    role: String,
    action: RoleAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RoleAction {
    Add,
    Remove,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct InviteContent {
    created_at: Option<u64>,
    expires_at: Option<u64>,
    max_uses: Option<u32>,
    used_count: Option<u32>,
}

impl Projection {
    /// Create a community or update it from a newer version of its definition.
    ///
    /// Communities are addressed by author and `d` tag, so a definition from
    /// another pubkey reusing the same `d` tag starts a separate community.
    /// Unparseable content still materializes the community with placeholder
    /// fields and the `degraded` marker set.
    pub(super) fn apply_definition(
        &mut self,
        event: &Event,
        unique_id: String,
        members: Vec<PublicKey>,
        labels: Vec<String>,
    ) -> Result<(), ProjectionError> {
        let (content, degraded) = match serde_json::from_str::<DefinitionContent>(&event.content)
        {
            Ok(content) => (content, false),
            Err(e) => {
                tracing::warn!(
                    target: "agora::projection::apply_definition",
                    "Unparseable definition content in {}, using fallback: {}",
                    event.id.to_hex(),
                    e
                );
                (DefinitionContent::default(), true)
            }
        };

        let name = content
            .name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_COMMUNITY_NAME.to_string());
        let description = content.description.unwrap_or_default();
        let image = content.image.unwrap_or_default();

        let address = CommunityAddress {
            creator: event.pubkey,
            unique_id,
        };

        match self.communities.get_mut(&address) {
            Some(community) => {
                community.name = name;
                community.description = description;
                community.image = image;
                community.degraded = degraded;
                community.members = members
                    .into_iter()
                    .filter(|member| !community.banned_members.contains(member))
                    .collect();
                community.tags = labels.into_iter().collect();
            }
            None => {
                self.communities.insert(
                    address.clone(),
                    Community {
                        id: event.id,
                        unique_id: address.unique_id.clone(),
                        name,
                        description,
                        image,
                        creator: event.pubkey,
                        created_at: event.created_at,
                        members: members.into_iter().collect(),
                        moderators: HashSet::new(),
                        banned_members: HashSet::new(),
                        guidelines: None,
                        is_private: false,
                        tags: labels.into_iter().collect(),
                        degraded,
                    },
                );
            }
        }

        self.community_aliases.insert(event.id, address);
        Ok(())
    }

    /// Update guidelines, privacy or tags. Updates for unknown communities are discarded.
    pub(super) fn apply_metadata(
        &mut self,
        event: &Event,
        community_id: &EventId,
    ) -> Result<(), ProjectionError> {
        let update: MetadataUpdate = serde_json::from_str(&event.content)?;
        let community = self
            .community_mut(community_id)
            .ok_or(ProjectionError::CommunityNotFound(*community_id))?;

        match update.kind {
            MetadataKind::Guidelines => {
                community.guidelines = Some(text_value(&update.content));
            }
            MetadataKind::Private => {
                community.is_private = bool_value(&update.content)
                    .ok_or_else(|| ProjectionError::InvalidMetadataValue("private".to_string()))?;
            }
            MetadataKind::Tags => {
                community.tags = label_values(&update.content)
                    .ok_or_else(|| ProjectionError::InvalidMetadataValue("tags".to_string()))?;
            }
        }
        Ok(())
    }

    /// Add or remove a moderator. Adding is idempotent and removal always succeeds.
    pub(super) fn apply_role(
        &mut self,
        event: &Event,
        community_id: &EventId,
        subjects: &[TaggedSubject],
    ) -> Result<(), ProjectionError> {
        let change: RoleChange = serde_json::from_str(&event.content)?;
        if change.role != MODERATOR_ROLE {
            return Err(ProjectionError::UnsupportedRole(change.role));
        }

        let subject = subjects
            .iter()
            .find(|subject| subject.marker.as_deref() == Some(change.role.as_str()))
            .map(|subject| subject.pubkey)
            .ok_or_else(|| ProjectionError::RoleSubjectMissing(change.role.clone()))?;

        let community = self
            .community_mut(community_id)
            .ok_or(ProjectionError::CommunityNotFound(*community_id))?;

        match change.action {
            RoleAction::Add => {
                if !community.moderators.contains(&subject) {
                    community.moderators.insert(subject);
                }
            }
            RoleAction::Remove => {
                community.moderators.remove(&subject);
            }
        }
        Ok(())
    }

    pub(super) fn apply_invite(
        &mut self,
        event: &Event,
        community_id: EventId,
    ) -> Result<(), ProjectionError> {
        let content: InviteContent = serde_json::from_str(&event.content)?;
        self.invites.insert(
            event.id,
            InviteLink {
                id: event.id,
                community_id,
                creator: event.pubkey,
                created_at: content
                    .created_at
                    .map(Timestamp::from)
                    .unwrap_or(event.created_at),
                expires_at: content.expires_at.map(Timestamp::from),
                max_uses: content.max_uses,
                used_count: content.used_count.unwrap_or(0),
            },
        );
        Ok(())
    }

    /// Remove a kicked member and ban them from rejoining through later definitions
    pub(super) fn apply_member_kicked(
        &mut self,
        community_id: &EventId,
        target_member: PublicKey,
        kick_proposal_id: Option<EventId>,
    ) -> Result<(), ProjectionError> {
        // The kick already happened, whether or not its proposal has arrived yet
        if let Some(kick_proposal_id) = kick_proposal_id {
            self.executed_kicks.insert(kick_proposal_id);
            if let Some(kick) = self.kick_proposals.get_mut(&kick_proposal_id) {
                kick.executed = true;
            }
        }

        let community = self
            .community_mut(community_id)
            .ok_or(ProjectionError::CommunityNotFound(*community_id))?;
        community.members.remove(&target_member);
        community.moderators.remove(&target_member);
        community.banned_members.insert(target_member);

        tracing::info!(
            target: "agora::projection::apply_member_kicked",
            "Removed {} from community {}",
            target_member.to_hex(),
            community_id.to_hex()
        );
        Ok(())
    }
}

fn text_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn bool_value(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::String(text) => match text.trim() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Tags arrive either as a JSON array of strings or a comma separated string
fn label_values(value: &Value) -> Option<HashSet<String>> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_str().map(|label| label.trim().to_string()))
            .filter(|label| label.as_ref().is_none_or(|label| !label.is_empty()))
            .collect(),
        Value::String(text) => Some(
            text.split(',')
                .map(str::trim)
                .filter(|label| !label.is_empty())
                .map(str::to_string)
                .collect(),
        ),
        _ => None,
    }
}
