//! Event-sourced community governance over Nostr.
//!
//! [`Projection`] folds governance events (community definitions, metadata,
//! roles, invites, proposals, votes and kick proposals) into materialized
//! state. [`Governance`] runs a live session that feeds relay events through
//! the projection and executes the commands it emits.

pub use crate::error::{AgoraError, Result};
pub use crate::governance::effects::{CommandSink, NoopCommandSink, NostrCommandSink};
pub use crate::governance::projection::{
    Command, Community, InviteLink, KickProposal, PendingVoteLimits, Projection,
    ProjectionConfig, ProjectionError, Proposal,
};
pub use crate::governance::{Governance, GovernanceConfig};
pub use crate::nostr_manager::{NostrManager, NostrManagerError};
pub use crate::types::ProcessableEvent;

use once_cell::sync::OnceCell;
use std::path::Path;
use std::sync::Mutex;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::EnvFilter, fmt::Layer, prelude::*, registry::Registry};

mod error;
pub mod governance;
pub mod nostr_manager;
mod types;

static TRACING_GUARDS: OnceCell<Mutex<Option<(WorkerGuard, WorkerGuard)>>> = OnceCell::new();
static TRACING_INIT: OnceCell<()> = OnceCell::new();

/// Install console and daily rolling file logging.
///
/// Console output goes to stderr, leaving stdout to command output. Only the
/// first call has an effect. The filter comes from `RUST_LOG` and defaults to
/// `info`.
pub fn init_tracing(logs_dir: &Path) -> Result<()> {
    TRACING_INIT.get_or_try_init(|| {
        std::fs::create_dir_all(logs_dir)?;

        let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
            .rotation(tracing_appender::rolling::Rotation::DAILY)
            .filename_prefix("agora")
            .filename_suffix("log")
            .build(logs_dir)
            .map_err(|e| AgoraError::Configuration(format!("log file appender: {}", e)))?;

        let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);
        let (non_blocking_console, console_guard) =
            tracing_appender::non_blocking(std::io::stderr());

        TRACING_GUARDS
            .set(Mutex::new(Some((file_guard, console_guard))))
            .ok();

        let console_layer = Layer::new()
            .with_writer(non_blocking_console)
            .with_ansi(true)
            .with_target(true);

        let file_layer = Layer::new()
            .with_writer(non_blocking_file)
            .with_ansi(false)
            .with_target(true);

        // Another subscriber may already be installed by the host application
        if let Err(e) = Registry::default()
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
            .with(console_layer)
            .with(file_layer)
            .try_init()
        {
            eprintln!("tracing already initialized: {}", e);
        }
        Ok::<(), AgoraError>(())
    })?;
    Ok(())
}
