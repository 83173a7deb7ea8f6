use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use agora::{
    Community, Governance, GovernanceConfig, InviteLink, KickProposal, Projection, Proposal,
    init_tracing,
};
use nostr_sdk::prelude::*;

/// Community governance over Nostr
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fold a captured event log (one JSON event per line) and print the resulting state
    Replay {
        #[clap(long, value_name = "PATH")]
        file: PathBuf,

        /// Arrival time used for buffered vote expiry, defaults to now
        #[clap(long, value_name = "UNIX_SECONDS")]
        now: Option<u64>,
    },
    /// Follow a community on the configured relays and log its state
    Watch {
        /// Event id (hex) of the community definition
        #[clap(long, value_name = "EVENT_ID")]
        community: String,

        /// Secret key used to publish member removals once a kick reaches quorum
        #[clap(long, value_name = "NSEC", env = "AGORA_SECRET_KEY")]
        secret_key: Option<String>,

        /// Seconds between state reports
        #[clap(long, default_value_t = 30)]
        interval: u64,
    },
}

#[derive(Serialize)]
struct CommunityReport<'a> {
    community: &'a Community,
    invites: Vec<&'a InviteLink>,
    proposals: Vec<ProposalReport<'a>>,
    kick_proposals: Vec<&'a KickProposal>,
}

#[derive(Serialize)]
struct ProposalReport<'a> {
    #[serde(flatten)]
    proposal: &'a Proposal,
    tally: Vec<usize>,
}

fn report(projection: &Projection) -> Vec<CommunityReport<'_>> {
    projection
        .communities()
        .into_iter()
        .map(|community| CommunityReport {
            community,
            invites: projection.invites_for_community(&community.id),
            proposals: projection
                .proposals_for_community(&community.id)
                .into_iter()
                .map(|proposal| ProposalReport {
                    proposal,
                    tally: proposal.tally(),
                })
                .collect(),
            kick_proposals: projection.kick_proposals_for_community(&community.id),
        })
        .collect()
}

/// Signed events from a JSON-lines log. Unparseable lines and bad signatures are skipped.
fn read_event_log(file: &Path) -> Result<Vec<Event>> {
    let contents = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;

    let mut events = Vec::new();
    for (line_number, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match Event::from_json(line) {
            Ok(event) if event.verify().is_ok() => events.push(event),
            Ok(event) => tracing::warn!(
                target: "agora::cli::replay",
                "Skipping event {} with invalid signature on line {}",
                event.id.to_hex(),
                line_number + 1
            ),
            Err(e) => tracing::warn!(
                target: "agora::cli::replay",
                "Skipping unparseable line {}: {}",
                line_number + 1,
                e
            ),
        }
    }
    Ok(events)
}

fn replay(file: PathBuf, now: Option<u64>) -> Result<()> {
    let config = GovernanceConfig::from_env()?;
    init_tracing(&config.logs_dir)?;

    let events = read_event_log(&file)?;
    let now = now.map(Timestamp::from).unwrap_or_else(Timestamp::now);
    let projection = Projection::replay(&events, config.projection, now);
    println!("{}", serde_json::to_string_pretty(&report(&projection))?);
    Ok(())
}

async fn watch(community: String, secret_key: Option<String>, interval: u64) -> Result<()> {
    let config = GovernanceConfig::from_env()?;
    init_tracing(&config.logs_dir)?;

    let community_id = EventId::from_hex(&community).context("parsing community id")?;
    let signer = secret_key
        .map(|key| Keys::parse(&key))
        .transpose()
        .context("parsing secret key")?;

    let governance = Governance::initialize(config, signer).await?;
    governance.subscribe_communities().await?;
    governance.watch_community(community_id).await?;

    let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let projection = governance.snapshot().await;
                match projection.community(&community_id) {
                    Some(community) => tracing::info!(
                        target: "agora::cli::watch",
                        "{}: {} members, {} moderators, {} proposals, {} kick proposals, {} votes pending",
                        community.name,
                        community.members.len(),
                        community.moderators.len(),
                        projection.proposals_for_community(&community_id).len(),
                        projection.kick_proposals_for_community(&community_id).len(),
                        projection.pending_vote_count()
                    ),
                    None => tracing::info!(
                        target: "agora::cli::watch",
                        "Waiting for community {}",
                        community_id.to_hex()
                    ),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(target: "agora::cli::watch", "Shutting down");
                break;
            }
        }
    }

    governance.shutdown().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::Replay { file, now } => replay(file, now),
        Commands::Watch {
            community,
            secret_key,
            interval,
        } => watch(community, secret_key, interval).await,
    }
}
