use std::io;
use std::time::Duration;

use serenity::model::prelude::ChannelId;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Expected {0} in the environment")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("could not spawn resolver: {0}")]
    Spawn(#[source] io::Error),

    #[error("resolver i/o failed: {0}")]
    Io(#[from] io::Error),

    #[error("resolver did not finish within {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("could not join voice channel: {0}")]
    Join(String),

    #[error("could not spawn audio stream: {0}")]
    Spawn(#[source] io::Error),

    #[error("track control failed: {0}")]
    Control(String),
}

/// Local failures of queue operations. Callers pick the user-facing wording.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("position {position} is outside the queue (1..={len})")]
    InvalidPosition { position: usize, len: usize },

    #[error("range {begin}-{end} is outside the queue (1..={len})")]
    InvalidRange { begin: usize, end: usize, len: usize },

    #[error("queue is not empty")]
    QueueNotEmpty,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("session already bound to channel {existing}")]
    ChannelMismatch { existing: ChannelId },
}

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("state file i/o failed: {0}")]
    Io(#[from] io::Error),

    #[error("state file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Precondition failures surfaced to the user verbatim.
#[derive(Debug, thiserror::Error)]
pub enum JukeboxError {
    #[error("You must be in a voice channel!")]
    NotInVoiceChannel,

    #[error("I'm already in another voice channel!")]
    AlreadyInOtherChannel,

    #[error("I'm not in your voice channel!")]
    NoSession,

    #[error("Tell me what to play.")]
    NothingRequested,

    #[error("Could not connect: {0}")]
    Transport(#[from] TransportError),
}

impl From<RegistryError> for JukeboxError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::ChannelMismatch { .. } => JukeboxError::AlreadyInOtherChannel,
        }
    }
}
