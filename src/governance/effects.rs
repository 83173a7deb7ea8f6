//! Executes commands emitted by the projection.
//!
//! The projection never performs side effects itself. Commands it returns are
//! handed to a [`CommandSink`], which the processing loop drives in background
//! tasks so a slow relay never stalls event processing.

use async_trait::async_trait;
use nostr_sdk::prelude::*;
use std::sync::Arc;
use tokio::sync::mpsc::Sender;

use crate::error::{AgoraError, Result};
use crate::governance::projection::{Command, kinds};
use crate::nostr_manager::NostrManager;
use crate::types::ProcessableEvent;

/// Performs the side effects of projection commands
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn execute(&self, command: Command) -> Result<()>;
}

/// Publishes commands as signed events and feeds them back into the local queue
pub struct NostrCommandSink {
    nostr: NostrManager,
    event_sender: Sender<ProcessableEvent>,
}

impl NostrCommandSink {
    pub fn new(nostr: NostrManager, event_sender: Sender<ProcessableEvent>) -> Self {
        Self {
            nostr,
            event_sender,
        }
    }
}

#[async_trait]
impl CommandSink for NostrCommandSink {
    async fn execute(&self, command: Command) -> Result<()> {
        let event = self
            .nostr
            .sign_event_builder(command_event_builder(&command)?)
            .await?;
        let output = self.nostr.publish_event(&event).await?;

        tracing::info!(
            target: "agora::effects::execute",
            "Published {} as {} to {} relay(s)",
            command_name(&command),
            event.id.to_hex(),
            output.success.len()
        );

        // The membership change reaches the projection the same way a relay echo would
        self.event_sender
            .send(ProcessableEvent::local(event))
            .await
            .map_err(|_| AgoraError::EventProcessorStopped)
    }
}

/// Logs commands without acting on them
pub struct NoopCommandSink;

#[async_trait]
impl CommandSink for NoopCommandSink {
    async fn execute(&self, command: Command) -> Result<()> {
        tracing::info!(
            target: "agora::effects::execute",
            "Ignoring {}: {:?}",
            command_name(&command),
            command
        );
        Ok(())
    }
}

/// Run each command on the sink in its own background task.
///
/// Failures are logged and never retried.
pub(crate) fn spawn_commands(sink: Arc<dyn CommandSink>, commands: Vec<Command>) {
    for command in commands {
        let sink = sink.clone();
        tokio::spawn(async move {
            let name = command_name(&command);
            if let Err(e) = sink.execute(command).await {
                tracing::error!(
                    target: "agora::effects::spawn_commands",
                    "Failed to execute {}: {}",
                    name,
                    e
                );
            }
        });
    }
}

/// Unsigned event announcing the effect of a command
pub fn command_event_builder(command: &Command) -> Result<EventBuilder> {
    match command {
        Command::KickMember {
            community_id,
            kick_proposal_id,
            target_member,
        } => {
            let tags = vec![
                Tag::parse(["e", community_id.to_hex().as_str()])?,
                Tag::parse([
                    "p",
                    target_member.to_hex().as_str(),
                    "",
                    kinds::KICK_MARKER,
                ])?,
                Tag::parse([
                    "e",
                    kick_proposal_id.to_hex().as_str(),
                    "",
                    kinds::KICK_PROPOSAL_MARKER,
                ])?,
            ];
            Ok(EventBuilder::new(Kind::from(kinds::MEMBER_KICKED), "").tags(tags))
        }
    }
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::KickMember { .. } => "kick member",
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;
    use tokio::sync::Mutex;

    /// Records every command it receives
    #[derive(Default)]
    pub(crate) struct RecordingCommandSink {
        pub(crate) commands: Mutex<Vec<Command>>,
    }

    #[async_trait]
    impl CommandSink for RecordingCommandSink {
        async fn execute(&self, command: Command) -> Result<()> {
            self.commands.lock().await.push(command);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_utils::RecordingCommandSink;
    use super::*;
    use crate::governance::projection::{GovernanceEvent, classify};
    use std::time::Duration;

    fn kick_command() -> Command {
        let community_id = EventBuilder::text_note("community")
            .sign_with_keys(&Keys::generate())
            .unwrap()
            .id;
        let kick_proposal_id = EventBuilder::text_note("kick")
            .sign_with_keys(&Keys::generate())
            .unwrap()
            .id;
        Command::KickMember {
            community_id,
            kick_proposal_id,
            target_member: Keys::generate().public_key(),
        }
    }

    #[test]
    fn test_member_kicked_event_classifies_back() {
        let command = kick_command();
        let event = command_event_builder(&command)
            .unwrap()
            .sign_with_keys(&Keys::generate())
            .unwrap();

        let Command::KickMember {
            community_id,
            kick_proposal_id,
            target_member,
        } = command;
        assert_eq!(
            classify(&event),
            Ok(GovernanceEvent::MemberKicked {
                community_id,
                target_member,
                kick_proposal_id: Some(kick_proposal_id),
            })
        );
    }

    #[tokio::test]
    async fn test_spawn_commands_runs_every_command() {
        let sink = Arc::new(RecordingCommandSink::default());
        let commands = vec![kick_command(), kick_command()];

        spawn_commands(sink.clone(), commands.clone());

        for _ in 0..50 {
            if sink.commands.lock().await.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let recorded = sink.commands.lock().await;
        assert_eq!(recorded.len(), 2);
        assert!(commands.iter().all(|command| recorded.contains(command)));
    }

    #[tokio::test]
    async fn test_noop_sink_accepts_commands() {
        assert!(NoopCommandSink.execute(kick_command()).await.is_ok());
    }
}
