use std::collections::HashMap;
use std::sync::{Arc, Weak};

use serenity::model::prelude::{ChannelId, GuildId, UserId};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use crate::error::JukeboxError;
use crate::fetcher::{split_queries, TrackResolver};
use crate::persistence::{SessionRecord, StateStore};
use crate::registry::Registry;
use crate::session::{Session, SessionSettings};
use crate::track::Track;
use crate::transport::{JoinConfig, ReplySink, VoiceGateway};

/// What the core needs to know about an incoming command message.
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub sender_id: UserId,
    pub sender_name: String,
    pub sender_voice_channel: Option<ChannelId>,
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
}

/// Owns every session and the collaborators they are built from.
pub struct Jukebox {
    registry: Registry,
    store: StateStore,
    gateway: Arc<dyn VoiceGateway>,
    resolver: Arc<dyn TrackResolver>,
    settings: SessionSettings,
    /// Held while a guild's voice connection is being made or torn down.
    guild_locks: parking_lot::Mutex<HashMap<GuildId, Arc<Mutex<()>>>>,
    /// Held from collecting records until they are on disk.
    snapshots: Mutex<()>,
    me: Weak<Jukebox>,
}

impl Jukebox {
    pub fn new(
        gateway: Arc<dyn VoiceGateway>,
        resolver: Arc<dyn TrackResolver>,
        store: StateStore,
        settings: SessionSettings,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            registry: Registry::default(),
            store,
            gateway,
            resolver,
            settings,
            guild_locks: parking_lot::Mutex::new(HashMap::new()),
            snapshots: Mutex::new(()),
            me: me.clone(),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Joins the sender's voice channel, or returns the session already there.
    pub async fn join(&self, ctx: &MessageContext) -> Result<Arc<Session>, JukeboxError> {
        let channel_id = ctx.sender_voice_channel.ok_or(JukeboxError::NotInVoiceChannel)?;
        let config = JoinConfig::new(ctx.guild_id, channel_id);
        let _guild = self.lock_guild(ctx.guild_id).await;

        if let Some(existing) = self.registry.get(ctx.guild_id) {
            if existing.channel_id() != channel_id {
                return Err(JukeboxError::AlreadyInOtherChannel);
            }
            return Ok(existing);
        }

        info!(guild = %ctx.guild_id, "Joining voice channel {channel_id}");
        self.attach(config, ctx.channel_id).await
    }

    pub async fn leave(&self, ctx: &MessageContext) -> Result<(), JukeboxError> {
        let guild = self.lock_guild(ctx.guild_id).await;
        let session = self.registry.get(ctx.guild_id).ok_or(JukeboxError::NoSession)?;

        session.close().await;
        if let Err(err) = self.gateway.disconnect(ctx.guild_id).await {
            warn!(guild = %ctx.guild_id, "Could not leave voice channel: {err}");
        }
        self.registry.remove(ctx.guild_id);
        drop(guild);

        self.snapshot().await;
        Ok(())
    }

    pub fn reply_to(&self, channel_id: ChannelId) -> Arc<dyn ReplySink> {
        self.gateway.reply_to(channel_id)
    }

    /// Checks shared by the music commands.
    pub fn session_for(&self, ctx: &MessageContext) -> Result<Arc<Session>, JukeboxError> {
        if ctx.sender_voice_channel.is_none() {
            return Err(JukeboxError::NotInVoiceChannel);
        }
        self.registry.get(ctx.guild_id).ok_or(JukeboxError::NoSession)
    }

    /// Resolves every query in `args` in order and queues the results.
    pub async fn play(&self, ctx: &MessageContext, args: &str) -> Result<(), JukeboxError> {
        let queries = split_queries(args);
        if queries.is_empty() {
            return Err(JukeboxError::NothingRequested);
        }

        let session = self.join(ctx).await?;
        for query in queries {
            let resolution = self.resolver.resolve(&query).await;
            session.enqueue_resolution(resolution).await;
        }

        Ok(())
    }

    /// The transport of `guild_id` is gone; drop its session.
    pub async fn teardown(&self, guild_id: GuildId) {
        let guild = self.lock_guild(guild_id).await;
        let Some(session) = self.registry.get(guild_id) else {
            return;
        };

        info!(guild = %guild_id, "Voice connection lost, dropping session");
        session.close().await;
        self.registry.remove(guild_id);
        drop(guild);

        self.snapshot().await;
    }

    pub async fn watch_disconnects(self: Arc<Self>, mut disconnects: UnboundedReceiver<GuildId>) {
        while let Some(guild_id) = disconnects.recv().await {
            self.teardown(guild_id).await;
        }
    }

    /// Writes every live session to the state file. Skipped entirely if any
    /// session has lost its connection.
    pub async fn snapshot(&self) {
        let _snapshot = self.snapshots.lock().await;
        let mut records = Vec::new();

        for session in self.registry.sessions() {
            if !session.is_connected().await {
                warn!(guild = %session.guild_id(), "Connection not ready, skipping snapshot");
                return;
            }

            records.push(SessionRecord {
                join_config: session.join_config().clone(),
                music_channel_id: session.reply_channel(),
                queue: session.serialized_queue().await,
            });
        }

        match self.store.save(&records).await {
            Ok(()) => debug!("Saved {} sessions", records.len()),
            Err(err) => error!("Could not save state to {}: {err}", self.store.path().display()),
        }
    }

    /// Rejoins every saved session and restarts its queue.
    pub async fn restore(&self) {
        let records = self.store.load().await;
        info!("Restoring {} sessions", records.len());

        for record in records {
            let guild_id = record.join_config.guild_id;
            let _guild = self.lock_guild(guild_id).await;

            match self.attach(record.join_config, record.music_channel_id).await {
                Ok(session) => {
                    if let Err(err) = session.init_from_queue(record.queue).await {
                        warn!(guild = %guild_id, "Not restoring queue: {err}");
                    }
                }
                Err(err) => warn!(guild = %guild_id, "Could not restore session: {err}"),
            }
        }
    }

    /// Serializes connect, register and disconnect for one guild.
    async fn lock_guild(&self, guild_id: GuildId) -> OwnedMutexGuard<()> {
        let lock = self.guild_locks.lock().entry(guild_id).or_default().clone();
        lock.lock_owned().await
    }

    /// Connects and registers a session. Callers hold the guild lock.
    async fn attach(&self, config: JoinConfig, reply_channel: ChannelId) -> Result<Arc<Session>, JukeboxError> {
        let transport = self.gateway.connect(&config).await?;
        let reply = self.gateway.reply_to(reply_channel);

        let (session, created) = self.registry.get_or_create(&config, || {
            Session::new(config.clone(), reply_channel, transport, reply, self.settings)
        })?;

        if created {
            let jukebox = self.me.clone();
            session.on_track_finished(Box::new(move |_: Option<&Track>| {
                if let Some(jukebox) = jukebox.upgrade() {
                    tokio::spawn(async move { jukebox.snapshot().await });
                }
            }));
        }

        Ok(session)
    }
}
