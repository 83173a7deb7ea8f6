use crate::governance::projection::ProjectionError;
use crate::nostr_manager::NostrManagerError;
use thiserror::Error;

pub type Result<T> = core::result::Result<T, AgoraError>;

#[derive(Error, Debug)]
pub enum AgoraError {
    #[error("Filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Event processor is not running")]
    EventProcessorStopped,

    #[error("Nostr client error: {0}")]
    NostrClient(#[from] nostr_sdk::client::Error),

    #[error("Nostr url error: {0}")]
    NostrUrl(#[from] nostr_sdk::types::url::Error),

    #[error("Nostr tag error: {0}")]
    NostrTag(#[from] nostr_sdk::event::tag::Error),

    #[error("Nostr manager error: {0}")]
    NostrManager(#[from] NostrManagerError),

    #[error("Projection error: {0}")]
    Projection(#[from] ProjectionError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}
