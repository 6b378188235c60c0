//! Seams between the playback core and the chat platform.
//!
//! The songbird/serenity implementations live in `voice`; tests use the
//! recording doubles in `testing`.

use std::fmt;
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use serenity::async_trait;
use serenity::model::prelude::{ChannelId, GuildId};

use crate::error::TransportError;
use crate::track::Track;

/// Identifies one `Transport::play` call. Status events carry it so that
/// events from a superseded stream can be told apart from the live one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlaybackId(pub u64);

impl fmt::Display for PlaybackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerStatus {
    Idle,
    Playing,
    Paused,
    /// Paused by the transport itself, e.g. nobody is listening.
    AutoPaused,
    Buffering,
    Failed(String),
}

/// Reconnection parameters for a voice channel. Persisted as `joinConfig`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JoinConfig {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub self_mute: bool,
    pub self_deaf: bool,
    pub group: String,
}

impl JoinConfig {
    pub fn new(guild_id: GuildId, channel_id: ChannelId) -> Self {
        Self {
            guild_id,
            channel_id,
            self_mute: false,
            self_deaf: true,
            group: "default".into(),
        }
    }
}

#[async_trait]
pub trait StatusListener: Send + Sync {
    async fn on_status(&self, playback: PlaybackId, status: PlayerStatus);
}

/// The voice player bound to one connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Starts streaming `track`. Status changes of this stream are reported to
    /// `listener` tagged with `playback`.
    async fn play(
        &self,
        playback: PlaybackId,
        track: &Track,
        listener: Weak<dyn StatusListener>,
    ) -> Result<(), TransportError>;

    async fn pause(&self) -> Result<(), TransportError>;

    async fn unpause(&self) -> Result<(), TransportError>;

    /// Stops the current stream and terminates whatever process feeds it.
    async fn stop(&self) -> Result<(), TransportError>;

    async fn is_connected(&self) -> bool;
}

/// A text destination. Delivery failures are logged, not returned.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn send(&self, message: &str);
}

#[async_trait]
pub trait VoiceGateway: Send + Sync {
    async fn connect(&self, config: &JoinConfig) -> Result<Arc<dyn Transport>, TransportError>;

    async fn disconnect(&self, guild_id: GuildId) -> Result<(), TransportError>;

    fn reply_to(&self, channel_id: ChannelId) -> Arc<dyn ReplySink>;
}
