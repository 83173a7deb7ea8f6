use nostr_sdk::prelude::*;
use serde_json::{Map, Value};
use std::collections::HashMap;

use super::Projection;
use super::types::{
    DEFAULT_PROPOSAL_DURATION, DEFAULT_PROPOSAL_TITLE, Proposal, ProjectionError,
    default_proposal_options,
};

/// Proposal fields, each defaulted on its own when missing or mistyped
#[derive(Debug, Default)]
struct ProposalContent {
    title: Option<String>,
    description: Option<String>,
    options: Option<Vec<String>>,
    ends_at: Option<u64>,
}

impl ProposalContent {
    fn from_object(object: &Map<String, Value>) -> Self {
        Self {
            title: object.get("title").and_then(Value::as_str).map(str::to_string),
            description: object
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
            options: object.get("options").and_then(option_labels),
            ends_at: object.get("endsAt").and_then(unix_seconds),
        }
    }
}

/// A non-empty array of strings
fn option_labels(value: &Value) -> Option<Vec<String>> {
    let options: Vec<String> = value
        .as_array()?
        .iter()
        .map(|option| option.as_str().map(str::to_string))
        .collect::<Option<_>>()?;
    (!options.is_empty()).then_some(options)
}

/// Whole seconds, as a JSON integer or a decimal string
fn unix_seconds(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

impl Projection {
    /// Materialize a proposal, then replay any votes that arrived before it.
    ///
    /// Missing or mistyped fields fall back to defaults one by one. Content
    /// that is not a JSON object produces a proposal built entirely from
    /// defaults with `degraded` set.
    pub(super) fn apply_proposal(
        &mut self,
        event: &Event,
        community_id: EventId,
    ) -> Result<(), ProjectionError> {
        if self.proposals.contains_key(&event.id) {
            return Ok(());
        }

        let (content, degraded) = match serde_json::from_str::<Value>(&event.content) {
            Ok(Value::Object(object)) => (ProposalContent::from_object(&object), false),
            Ok(_) => {
                tracing::warn!(
                    target: "agora::projection::apply_proposal",
                    "Proposal content in {} is not an object, using defaults",
                    event.id.to_hex()
                );
                (ProposalContent::default(), true)
            }
            Err(e) => {
                tracing::warn!(
                    target: "agora::projection::apply_proposal",
                    "Unparseable proposal content in {}, using defaults: {}",
                    event.id.to_hex(),
                    e
                );
                (ProposalContent::default(), true)
            }
        };

        let ends_at = content.ends_at.map(Timestamp::from).unwrap_or_else(|| {
            Timestamp::from(event.created_at.as_u64() + DEFAULT_PROPOSAL_DURATION.as_secs())
        });

        self.proposals.insert(
            event.id,
            Proposal {
                id: event.id,
                community_id,
                title: content
                    .title
                    .unwrap_or_else(|| DEFAULT_PROPOSAL_TITLE.to_string()),
                description: content.description.unwrap_or_default(),
                options: content.options.unwrap_or_else(default_proposal_options),
                created_at: event.created_at,
                ends_at,
                creator: event.pubkey,
                votes: HashMap::new(),
                degraded,
            },
        );

        self.replay_pending_votes(&event.id);
        Ok(())
    }
}
