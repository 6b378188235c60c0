//! songbird and serenity behind the transport traits.

use std::io::{BufRead, BufReader};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serenity::async_trait;
use serenity::http::Http;
use serenity::model::prelude::{ChannelId, GuildId};
use songbird::error::{ControlError, JoinError};
use songbird::input::{ChildContainer, Input};
use songbird::tracks::{TrackHandle, TrackResult};
use songbird::{Call, CoreEvent, Event, Songbird};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::events::{DriverDisconnectNotifier, TrackStatusNotifier, WATCHED_TRACK_EVENTS};
use crate::fetcher::YtDlp;
use crate::track::Track;
use crate::transport::{JoinConfig, PlaybackId, ReplySink, StatusListener, Transport, VoiceGateway};

/// Discord rejects longer messages.
pub const MESSAGE_LIMIT: usize = 2000;

pub struct SongbirdGateway {
    manager: Arc<Songbird>,
    http: Arc<Http>,
    resolver: Arc<YtDlp>,
    disconnects: UnboundedSender<GuildId>,
}

impl SongbirdGateway {
    pub fn new(
        manager: Arc<Songbird>,
        http: Arc<Http>,
        resolver: Arc<YtDlp>,
        disconnects: UnboundedSender<GuildId>,
    ) -> Self {
        Self {
            manager,
            http,
            resolver,
            disconnects,
        }
    }
}

#[async_trait]
impl VoiceGateway for SongbirdGateway {
    async fn connect(&self, config: &JoinConfig) -> Result<Arc<dyn Transport>, TransportError> {
        let call = self
            .manager
            .join(config.guild_id, config.channel_id)
            .await
            .map_err(|err| TransportError::Join(err.to_string()))?;

        {
            let mut handler = call.lock().await;

            if let Err(err) = handler.deafen(config.self_deaf).await {
                warn!(guild = %config.guild_id, "Could not set deafen: {err}");
            }
            if let Err(err) = handler.mute(config.self_mute).await {
                warn!(guild = %config.guild_id, "Could not set mute: {err}");
            }

            // A rejoin reuses the Call, so drop the notifier of the old session.
            handler.remove_all_global_events();
            handler.add_global_event(
                Event::Core(CoreEvent::DriverDisconnect),
                DriverDisconnectNotifier::new(config.guild_id, self.disconnects.clone()),
            );
        }

        info!(guild = %config.guild_id, "Connected to {}", config.channel_id);
        let transport: Arc<dyn Transport> = Arc::new(SongbirdTransport {
            call,
            resolver: self.resolver.clone(),
            guild_id: config.guild_id,
            current: Mutex::new(None),
        });
        Ok(transport)
    }

    async fn disconnect(&self, guild_id: GuildId) -> Result<(), TransportError> {
        match self.manager.remove(guild_id).await {
            Ok(()) | Err(JoinError::NoCall) => Ok(()),
            Err(err) => Err(TransportError::Join(err.to_string())),
        }
    }

    fn reply_to(&self, channel_id: ChannelId) -> Arc<dyn ReplySink> {
        Arc::new(ChannelReply {
            http: self.http.clone(),
            channel_id,
        })
    }
}

pub struct SongbirdTransport {
    call: Arc<tokio::sync::Mutex<Call>>,
    resolver: Arc<YtDlp>,
    guild_id: GuildId,
    current: Mutex<Option<TrackHandle>>,
}

impl SongbirdTransport {
    /// Applies `action` to the live track. A track that already finished
    /// has nothing left to control.
    fn control(&self, action: impl FnOnce(&TrackHandle) -> TrackResult<()>) -> Result<(), TransportError> {
        let current = self.current.lock();
        let Some(handle) = current.as_ref() else {
            return Ok(());
        };

        match action(handle) {
            Ok(()) | Err(ControlError::Finished) => Ok(()),
            Err(err) => Err(TransportError::Control(err.to_string())),
        }
    }
}

#[async_trait]
impl Transport for SongbirdTransport {
    async fn play(
        &self,
        playback: PlaybackId,
        track: &Track,
        listener: Weak<dyn StatusListener>,
    ) -> Result<(), TransportError> {
        let mut child = self
            .resolver
            .stream_command(track.url())
            .spawn()
            .map_err(TransportError::Spawn)?;

        if let Some(stderr) = child.stderr.take() {
            let guild_id = self.guild_id;
            tokio::task::spawn_blocking(move || {
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    debug!(target: "resolver", guild = %guild_id, "{line}");
                }
            });
        }

        // Dropping the container, which songbird does once the track is
        // stopped or finished, kills the child.
        let input: Input = ChildContainer::from(child).into();
        let handle = self.call.lock().await.play_only_input(input);

        for event in WATCHED_TRACK_EVENTS {
            let notifier = TrackStatusNotifier::new(event, playback, listener.clone());
            if let Err(err) = handle.add_event(Event::Track(event), notifier) {
                warn!(guild = %self.guild_id, "Could not watch {playback}: {err}");
            }
        }

        debug!(guild = %self.guild_id, "Streaming {} as {playback}", track.url());
        *self.current.lock() = Some(handle);
        Ok(())
    }

    async fn pause(&self) -> Result<(), TransportError> {
        self.control(TrackHandle::pause)
    }

    async fn unpause(&self) -> Result<(), TransportError> {
        self.control(TrackHandle::play)
    }

    async fn stop(&self) -> Result<(), TransportError> {
        let result = self.control(TrackHandle::stop);
        self.current.lock().take();
        result
    }

    async fn is_connected(&self) -> bool {
        self.call.lock().await.current_connection().is_some()
    }
}

/// Posts to one text channel, splitting long messages.
pub struct ChannelReply {
    http: Arc<Http>,
    channel_id: ChannelId,
}

#[async_trait]
impl ReplySink for ChannelReply {
    async fn send(&self, message: &str) {
        if message.trim().is_empty() {
            warn!("Not sending a blank message to {}", self.channel_id);
            return;
        }

        for chunk in split_message(message, MESSAGE_LIMIT) {
            if let Err(why) = self.channel_id.say(&self.http, chunk).await {
                warn!("Error sending message: {why:?}");
            }
        }
    }
}

/// Splits `message` into chunks of at most `limit` bytes, preferring to cut
/// at the last newline that fits.
pub fn split_message(message: &str, limit: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut rest = message;

    while rest.len() > limit {
        let mut cut = limit;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }

        let (chunk, tail) = match rest[..cut].rfind('\n') {
            Some(newline) if newline > 0 => (&rest[..newline], &rest[newline + 1..]),
            _ => rest.split_at(cut),
        };
        chunks.push(chunk);
        rest = tail;
    }

    if !rest.is_empty() || chunks.is_empty() {
        chunks.push(rest);
    }
    chunks
}
