use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use serenity::async_trait;
use serenity::model::gateway::Ready;
use serenity::model::prelude::{GuildId, Message};
use serenity::prelude::{Context, EventHandler};
use songbird::tracks::PlayMode;
use songbird::{Event, EventContext, TrackEvent};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::command_manager::CommandManager;
use crate::player::{Jukebox, MessageContext};
use crate::transport::{PlaybackId, PlayerStatus, StatusListener};

pub struct DiscordHandler {
    pub jukebox: Arc<Jukebox>,
    pub commands: CommandManager,
    restored: AtomicBool,
}

impl DiscordHandler {
    pub fn new(jukebox: Arc<Jukebox>, commands: CommandManager) -> Self {
        Self {
            jukebox,
            commands,
            restored: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl EventHandler for DiscordHandler {
    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        let Some(guild_id) = msg.guild_id else {
            return;
        };
        let Some((command, args)) = self.commands.parse(&msg.content) else {
            return;
        };

        let voice_channel = {
            let guild = match ctx.cache.guild(guild_id) {
                Some(guild) => guild,
                None => {
                    warn!("Cannot find guild in cache: {}", guild_id);
                    return;
                }
            };

            guild
                .voice_states
                .get(&msg.author.id)
                .and_then(|voice_state| voice_state.channel_id)
        };

        let message = MessageContext {
            sender_id: msg.author.id,
            sender_name: msg.author.name.clone(),
            sender_voice_channel: voice_channel,
            guild_id,
            channel_id: msg.channel_id,
        };

        let result = self.commands.execute(&self.jukebox, &message, command, args).await;

        let reply = match (result.error, result.response) {
            (Some(error), _) => format!("ERROR: {error}"),
            (None, Some(response)) => response,
            (None, None) => return,
        };
        self.jukebox.reply_to(msg.channel_id).send(&reply).await;
    }

    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("{} is connected!", ready.user.name);

        if self.restored.swap(true, Ordering::SeqCst) {
            return;
        }

        let jukebox = self.jukebox.clone();
        tokio::spawn(async move { jukebox.restore().await });
    }
}

/// Track events a stream is watched for. songbird raises no `Play` when a
/// track first starts, only `Playable`.
pub const WATCHED_TRACK_EVENTS: [TrackEvent; 5] = [
    TrackEvent::Playable,
    TrackEvent::Play,
    TrackEvent::Pause,
    TrackEvent::End,
    TrackEvent::Error,
];

/// What the session should hear when `event` fires with the track in `mode`.
pub fn track_status(event: TrackEvent, mode: &PlayMode) -> Option<PlayerStatus> {
    match (event, mode) {
        (_, PlayMode::Errored(err)) => Some(PlayerStatus::Failed(format!("{err:?}"))),
        (TrackEvent::Error, _) => Some(PlayerStatus::Failed("track errored".into())),
        (_, PlayMode::Stop | PlayMode::End) => Some(PlayerStatus::Idle),
        (TrackEvent::End, _) => Some(PlayerStatus::Idle),
        (TrackEvent::Playable | TrackEvent::Play, PlayMode::Play) => Some(PlayerStatus::Playing),
        (TrackEvent::Playable | TrackEvent::Play | TrackEvent::Pause, PlayMode::Pause) => {
            Some(PlayerStatus::Paused)
        }
        _ => None,
    }
}

/// Forwards the state changes of one stream to its session.
pub struct TrackStatusNotifier {
    event: TrackEvent,
    playback: PlaybackId,
    listener: Weak<dyn StatusListener>,
}

impl TrackStatusNotifier {
    pub fn new(event: TrackEvent, playback: PlaybackId, listener: Weak<dyn StatusListener>) -> Self {
        Self {
            event,
            playback,
            listener,
        }
    }
}

#[async_trait]
impl songbird::events::EventHandler for TrackStatusNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let EventContext::Track(tracks) = ctx else {
            return None;
        };
        let (state, _) = tracks.first()?;

        let Some(status) = track_status(self.event, &state.playing) else {
            debug!("Ignoring {:?} in {:?} for {}", self.event, state.playing, self.playback);
            return None;
        };

        // Awaited inline so that a session sees its events in order.
        if let Some(listener) = self.listener.upgrade() {
            listener.on_status(self.playback, status).await;
        }
        None
    }
}

pub struct DriverDisconnectNotifier {
    guild_id: GuildId,
    disconnects: UnboundedSender<GuildId>,
}

impl DriverDisconnectNotifier {
    pub fn new(guild_id: GuildId, disconnects: UnboundedSender<GuildId>) -> Self {
        Self { guild_id, disconnects }
    }
}

#[async_trait]
impl songbird::events::EventHandler for DriverDisconnectNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        if let EventContext::DriverDisconnect(data) = ctx {
            info!(guild = %self.guild_id, "Voice driver disconnected: {:?}", data.reason);
            self.disconnects.send(self.guild_id).ok();
        }
        None
    }
}
