//! Live governance session
//!
//! Owns the relay connection, the processing loop and the shared projection.
//! Relay events and locally produced events flow through one channel and are
//! applied in arrival order.

pub mod effects;
mod event_processor;
pub mod projection;

use nostr_sdk::prelude::*;
use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::sync::mpsc::{self, Sender};

use crate::error::{AgoraError, Result};
use crate::nostr_manager::NostrManager;
use crate::types::ProcessableEvent;
use effects::{CommandSink, NoopCommandSink, NostrCommandSink};
use projection::{Projection, ProjectionConfig};

/// Relays used when `AGORA_RELAYS` is not set
pub const DEFAULT_RELAYS: [&str; 2] = ["wss://relay.damus.io", "wss://nos.lol"];

const EVENT_CHANNEL_CAPACITY: usize = 500;

#[derive(Clone, Debug)]
pub struct GovernanceConfig {
    /// Directory for application logs
    pub logs_dir: PathBuf,

    /// Relays to subscribe to and publish on
    pub relays: Vec<RelayUrl>,

    pub projection: ProjectionConfig,
}

impl GovernanceConfig {
    pub fn new(logs_dir: &Path, relays: Vec<RelayUrl>) -> Self {
        let env_suffix = if cfg!(debug_assertions) {
            "dev"
        } else {
            "release"
        };

        Self {
            logs_dir: logs_dir.join(env_suffix),
            relays,
            projection: ProjectionConfig::default(),
        }
    }

    /// Load configuration from the process environment, after reading an optional `.env` file
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from any key lookup, e.g. the environment
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let logs_dir = lookup("AGORA_LOGS_DIR")
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("logs"));

        let relays = match lookup("AGORA_RELAYS") {
            Some(relays) => csv_strings(&relays),
            None => DEFAULT_RELAYS.iter().map(|relay| relay.to_string()).collect(),
        }
        .iter()
        .map(|relay| RelayUrl::parse(relay))
        .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut config = Self::new(&logs_dir, relays);

        if let Some(quorum) = lookup("AGORA_KICK_QUORUM") {
            let quorum: f64 = parse_var("AGORA_KICK_QUORUM", &quorum)?;
            if !(quorum > 0.0 && quorum <= 1.0) {
                return Err(AgoraError::Configuration(format!(
                    "AGORA_KICK_QUORUM must be in (0, 1], got {}",
                    quorum
                )));
            }
            config.projection.kick_quorum = quorum;
        }
        if let Some(ttl) = lookup("AGORA_PENDING_VOTE_TTL_SECS") {
            config.projection.pending_votes.ttl =
                Duration::from_secs(parse_var("AGORA_PENDING_VOTE_TTL_SECS", &ttl)?);
        }
        if let Some(votes) = lookup("AGORA_PENDING_VOTES_PER_PROPOSAL") {
            config.projection.pending_votes.max_votes_per_proposal =
                parse_var("AGORA_PENDING_VOTES_PER_PROPOSAL", &votes)?;
        }
        if let Some(proposals) = lookup("AGORA_PENDING_PROPOSALS") {
            config.projection.pending_votes.max_proposals =
                parse_var("AGORA_PENDING_PROPOSALS", &proposals)?;
        }

        Ok(config)
    }
}

fn csv_strings(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_var<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| AgoraError::Configuration(format!("invalid {}: {}", key, e)))
}

pub struct Governance {
    config: GovernanceConfig,
    nostr: NostrManager,
    projection: RwLock<Projection>,
    sink: Arc<dyn CommandSink>,
    /// Communities whose ballots follow new proposals
    watched: RwLock<HashSet<EventId>>,
    event_sender: Sender<ProcessableEvent>,
    shutdown_sender: Sender<()>,
}

impl std::fmt::Debug for Governance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Governance")
            .field("config", &self.config)
            .field("nostr", &"<REDACTED>")
            .field("projection", &"<REDACTED>")
            .finish()
    }
}

impl Governance {
    /// Start a session: connect to the configured relays and start the processing loop.
    ///
    /// With a signer, kick commands are published as member-kicked events.
    /// Without one, commands are only logged.
    pub async fn initialize(config: GovernanceConfig, signer: Option<Keys>) -> Result<Arc<Self>> {
        Self::initialize_with_sink(config, signer, None).await
    }

    /// Like [`Governance::initialize`], with an explicit command sink
    pub async fn initialize_with_sink(
        config: GovernanceConfig,
        signer: Option<Keys>,
        sink: Option<Arc<dyn CommandSink>>,
    ) -> Result<Arc<Self>> {
        let (event_sender, event_receiver) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown_sender, shutdown_receiver) = mpsc::channel(1);

        let has_signer = signer.is_some();
        let nostr =
            NostrManager::new(event_sender.clone(), signer, NostrManager::default_timeout())
                .await?;
        nostr.ensure_relays_connected(&config.relays).await?;

        let sink: Arc<dyn CommandSink> = match sink {
            Some(sink) => sink,
            None if has_signer => Arc::new(NostrCommandSink::new(
                nostr.clone(),
                event_sender.clone(),
            )),
            None => Arc::new(NoopCommandSink),
        };

        let governance = Arc::new(Self {
            projection: RwLock::new(Projection::with_config(config.projection.clone())),
            config,
            nostr,
            sink,
            watched: RwLock::new(HashSet::new()),
            event_sender,
            shutdown_sender,
        });

        Self::start_event_processing_loop(governance.clone(), event_receiver, shutdown_receiver);

        tracing::info!(
            target: "agora::governance::initialize",
            "Governance session started with {} relay(s)",
            governance.config.relays.len()
        );
        Ok(governance)
    }

    pub fn config(&self) -> &GovernanceConfig {
        &self.config
    }

    /// Queue an event for the processing loop, as if a relay had delivered it
    pub async fn queue_event(&self, event: Event) -> Result<()> {
        self.event_sender
            .send(ProcessableEvent::local(event))
            .await
            .map_err(|_| AgoraError::EventProcessorStopped)
    }

    /// A copy of the current projection
    pub async fn snapshot(&self) -> Projection {
        self.projection.read().await.clone()
    }

    pub async fn subscribe_communities(&self) -> Result<SubscriptionId> {
        Ok(self.nostr.subscribe_communities().await?)
    }

    /// Follow one community: its scoped events now, and ballots on every proposal as they appear.
    ///
    /// The subscription also follows new versions of the definition as they arrive.
    pub async fn watch_community(&self, community_id: EventId) -> Result<SubscriptionId> {
        let definition_ids = self.projection.read().await.definition_ids(&community_id);
        let subscription_id = self
            .nostr
            .subscribe_community(community_id, &definition_ids)
            .await?;
        self.watched.write().await.insert(community_id);
        self.refresh_ballot_subscription(community_id).await;
        Ok(subscription_id)
    }

    pub async fn unsubscribe(&self, subscription_id: &SubscriptionId) {
        self.nostr.unsubscribe(subscription_id).await;
    }

    /// Stop the processing loop after the queued events and close all subscriptions
    pub async fn shutdown(&self) -> Result<()> {
        // Expected to fail if the processor already shut down
        let _ = self.shutdown_sender.send(()).await;
        self.nostr.shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::effects::test_utils::RecordingCommandSink;
    use super::projection::{Command, kinds};
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    fn signed(keys: &Keys, kind: u16, content: &str, tags: Vec<Vec<String>>) -> Event {
        let tags: Vec<Tag> = tags.into_iter().map(|t| Tag::parse(t).unwrap()).collect();
        EventBuilder::new(Kind::from(kind), content)
            .tags(tags)
            .sign_with_keys(keys)
            .unwrap()
    }

    async fn offline_session(
        sink: Arc<dyn CommandSink>,
    ) -> (Arc<Governance>, tempfile::TempDir) {
        let logs = tempfile::TempDir::new().unwrap();
        let config = GovernanceConfig::new(logs.path(), Vec::new());
        let governance = Governance::initialize_with_sink(config, None, Some(sink))
            .await
            .unwrap();
        (governance, logs)
    }

    async fn wait_for<F>(governance: &Governance, check: F) -> Projection
    where
        F: Fn(&Projection) -> bool,
    {
        for _ in 0..100 {
            let snapshot = governance.snapshot().await;
            if check(&snapshot) {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        governance.snapshot().await
    }

    #[test]
    fn test_config_defaults() {
        let config = GovernanceConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.relays.len(), DEFAULT_RELAYS.len());
        assert_eq!(config.projection, ProjectionConfig::default());
        assert!(config.logs_dir.starts_with("logs"));
    }

    #[test]
    fn test_config_from_vars() {
        let logs = tempfile::TempDir::new().unwrap();
        let config = GovernanceConfig::from_lookup(lookup(&[
            ("AGORA_LOGS_DIR", logs.path().to_str().unwrap()),
            ("AGORA_RELAYS", "wss://relay.example.com, ,wss://other.example.com"),
            ("AGORA_KICK_QUORUM", "0.75"),
            ("AGORA_PENDING_VOTE_TTL_SECS", "60"),
            ("AGORA_PENDING_VOTES_PER_PROPOSAL", "5"),
            ("AGORA_PENDING_PROPOSALS", "7"),
        ]))
        .unwrap();

        assert!(config.logs_dir.starts_with(logs.path()));
        assert_eq!(config.relays.len(), 2);
        assert_eq!(config.projection.kick_quorum, 0.75);
        assert_eq!(config.projection.pending_votes.ttl, Duration::from_secs(60));
        assert_eq!(config.projection.pending_votes.max_votes_per_proposal, 5);
        assert_eq!(config.projection.pending_votes.max_proposals, 7);
    }

    #[test]
    fn test_config_rejects_bad_values() {
        assert!(matches!(
            GovernanceConfig::from_lookup(lookup(&[("AGORA_KICK_QUORUM", "1.5")])),
            Err(AgoraError::Configuration(_))
        ));
        assert!(matches!(
            GovernanceConfig::from_lookup(lookup(&[("AGORA_PENDING_PROPOSALS", "many")])),
            Err(AgoraError::Configuration(_))
        ));
        assert!(matches!(
            GovernanceConfig::from_lookup(lookup(&[("AGORA_RELAYS", "not a url")])),
            Err(AgoraError::NostrUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_session_applies_queued_events() {
        let (governance, _logs) = offline_session(Arc::new(NoopCommandSink)).await;
        let creator = Keys::generate();
        let community = signed(
            &creator,
            kinds::COMMUNITY_DEFINITION,
            r#"{"name":"Live"}"#,
            vec![vec!["d".to_string(), "live".to_string()]],
        );

        governance.queue_event(community.clone()).await.unwrap();

        let snapshot = wait_for(&governance, |p| p.community(&community.id).is_some()).await;
        assert_eq!(snapshot.community(&community.id).unwrap().name, "Live");
        governance.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_session_dispatches_kick_once() {
        let sink = Arc::new(RecordingCommandSink::default());
        let (governance, _logs) = offline_session(sink.clone()).await;
        let (a, b, c) = (Keys::generate(), Keys::generate(), Keys::generate());
        let members: Vec<Vec<String>> = [&a, &b, &c]
            .iter()
            .map(|keys| vec!["p".to_string(), keys.public_key().to_hex()])
            .collect();
        let mut definition_tags = vec![vec!["d".to_string(), "trio".to_string()]];
        definition_tags.extend(members);
        let community = signed(&a, kinds::COMMUNITY_DEFINITION, "{}", definition_tags);
        let kick = signed(
            &a,
            kinds::KICK_PROPOSAL,
            "",
            vec![
                vec!["e".to_string(), community.id.to_hex()],
                vec![
                    "p".to_string(),
                    c.public_key().to_hex(),
                    String::new(),
                    kinds::KICK_MARKER.to_string(),
                ],
            ],
        );
        let ballot = |voter: &Keys| {
            signed(
                voter,
                kinds::KICK_VOTE,
                "",
                vec![vec!["e".to_string(), kick.id.to_hex()]],
            )
        };

        for event in [community, kick.clone(), ballot(&b), ballot(&c)] {
            governance.queue_event(event).await.unwrap();
        }

        wait_for(&governance, |p| {
            p.kick_proposal(&kick.id)
                .is_some_and(|kick| kick.votes.len() == 3)
        })
        .await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let recorded = sink.commands.lock().await;
        assert_eq!(recorded.len(), 1);
        assert!(matches!(
            recorded[0],
            Command::KickMember { target_member, .. } if target_member == c.public_key()
        ));
        drop(recorded);
        governance.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_watched_community_resolves_through_new_definitions() {
        let (governance, _logs) = offline_session(Arc::new(NoopCommandSink)).await;
        let creator = Keys::generate();
        let original = signed(
            &creator,
            kinds::COMMUNITY_DEFINITION,
            "{}",
            vec![vec!["d".to_string(), "watched".to_string()]],
        );
        let edited = EventBuilder::new(Kind::from(kinds::COMMUNITY_DEFINITION), r#"{"name":"v2"}"#)
            .tag(Tag::identifier("watched"))
            .custom_created_at(original.created_at + Duration::from_secs(1))
            .sign_with_keys(&creator)
            .unwrap();
        let stranger = signed(
            &Keys::generate(),
            kinds::COMMUNITY_DEFINITION,
            "{}",
            vec![vec!["d".to_string(), "watched".to_string()]],
        );
        governance.watched.write().await.insert(original.id);

        for event in [original.clone(), edited.clone(), stranger.clone()] {
            governance.queue_event(event).await.unwrap();
        }
        let snapshot = wait_for(&governance, |p| {
            p.community(&edited.id).is_some() && p.community(&stranger.id).is_some()
        })
        .await;

        assert_eq!(snapshot.definition_ids(&original.id).len(), 2);
        assert_eq!(
            governance.watched_community_of(&edited.id).await,
            Some(original.id)
        );
        assert_eq!(governance.watched_community_of(&stranger.id).await, None);
        governance.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_queue_after_shutdown_fails() {
        let (governance, _logs) = offline_session(Arc::new(NoopCommandSink)).await;
        governance.shutdown().await.unwrap();
        // Multiple shutdowns don't cause errors
        governance.shutdown().await.unwrap();

        let event = EventBuilder::text_note("late")
            .sign_with_keys(&Keys::generate())
            .unwrap();
        let mut stopped = false;
        for _ in 0..100 {
            if governance.queue_event(event.clone()).await.is_err() {
                stopped = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(stopped);
    }
}
