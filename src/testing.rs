//! Recording stand-ins for the platform boundary.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use serenity::async_trait;
use serenity::model::prelude::{ChannelId, GuildId};

use crate::error::TransportError;
use crate::fetcher::{Resolution, TrackResolver};
use crate::track::Track;
use crate::transport::{JoinConfig, PlaybackId, ReplySink, StatusListener, Transport, VoiceGateway};

pub fn guild_config(guild: u64, channel: u64) -> JoinConfig {
    JoinConfig::new(GuildId::new(guild), ChannelId::new(channel))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Play { playback: PlaybackId, source_id: String },
    Pause,
    Unpause,
    Stop,
}

pub struct RecordingTransport {
    calls: Mutex<Vec<TransportCall>>,
    connected: AtomicBool,
    failing_plays: AtomicUsize,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
            failing_plays: AtomicUsize::new(0),
        }
    }
}

impl RecordingTransport {
    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    /// Source ids of every stream started, in order.
    pub fn plays(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                TransportCall::Play { source_id, .. } => Some(source_id.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn last_play(&self) -> Option<(PlaybackId, String)> {
        self.calls.lock().iter().rev().find_map(|call| match call {
            TransportCall::Play { playback, source_id } => Some((*playback, source_id.clone())),
            _ => None,
        })
    }

    pub fn fail_next_plays(&self, count: usize) {
        self.failing_plays.store(count, Ordering::SeqCst);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn play(
        &self,
        playback: PlaybackId,
        track: &Track,
        _listener: Weak<dyn StatusListener>,
    ) -> Result<(), TransportError> {
        let failing = self.failing_plays.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_plays.store(failing - 1, Ordering::SeqCst);
            return Err(TransportError::Control("scripted failure".into()));
        }

        self.calls.lock().push(TransportCall::Play {
            playback,
            source_id: track.source_id().to_owned(),
        });
        Ok(())
    }

    async fn pause(&self) -> Result<(), TransportError> {
        self.calls.lock().push(TransportCall::Pause);
        Ok(())
    }

    async fn unpause(&self) -> Result<(), TransportError> {
        self.calls.lock().push(TransportCall::Unpause);
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.calls.lock().push(TransportCall::Stop);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct RecordingReply {
    messages: Mutex<Vec<String>>,
}

impl RecordingReply {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }
}

#[async_trait]
impl ReplySink for RecordingReply {
    async fn send(&self, message: &str) {
        self.messages.lock().push(message.to_owned());
    }
}

/// One transport per guild, like a voice manager with one call per guild.
#[derive(Default)]
pub struct RecordingGateway {
    transports: Mutex<HashMap<GuildId, Arc<RecordingTransport>>>,
    replies: Mutex<HashMap<ChannelId, Arc<RecordingReply>>>,
    connects: Mutex<Vec<JoinConfig>>,
    disconnects: Mutex<Vec<GuildId>>,
    refuse_connects: AtomicBool,
    connect_delay: Mutex<Duration>,
}

impl RecordingGateway {
    pub fn transport(&self, guild_id: GuildId) -> Option<Arc<RecordingTransport>> {
        self.transports.lock().get(&guild_id).cloned()
    }

    pub fn reply(&self, channel_id: ChannelId) -> Arc<RecordingReply> {
        self.replies.lock().entry(channel_id).or_default().clone()
    }

    pub fn connects(&self) -> Vec<JoinConfig> {
        self.connects.lock().clone()
    }

    pub fn disconnects(&self) -> Vec<GuildId> {
        self.disconnects.lock().clone()
    }

    pub fn refuse_connects(&self, refuse: bool) {
        self.refuse_connects.store(refuse, Ordering::SeqCst);
    }

    /// Makes every later connect take `delay`, like a real voice handshake.
    pub fn delay_connects(&self, delay: Duration) {
        *self.connect_delay.lock() = delay;
    }
}

#[async_trait]
impl VoiceGateway for RecordingGateway {
    async fn connect(&self, config: &JoinConfig) -> Result<Arc<dyn Transport>, TransportError> {
        if self.refuse_connects.load(Ordering::SeqCst) {
            return Err(TransportError::Join("scripted refusal".into()));
        }

        self.connects.lock().push(config.clone());
        let delay = *self.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let transport: Arc<dyn Transport> = self.transports.lock().entry(config.guild_id).or_default().clone();
        Ok(transport)
    }

    async fn disconnect(&self, guild_id: GuildId) -> Result<(), TransportError> {
        self.disconnects.lock().push(guild_id);
        self.transports.lock().remove(&guild_id);
        Ok(())
    }

    fn reply_to(&self, channel_id: ChannelId) -> Arc<dyn ReplySink> {
        self.reply(channel_id)
    }
}

/// Answers queries from a fixed table of resolver outputs.
#[derive(Default)]
pub struct CannedResolver {
    outputs: HashMap<String, Value>,
    queries: Mutex<Vec<String>>,
}

impl CannedResolver {
    pub fn with(mut self, query: &str, output: Value) -> Self {
        self.outputs.insert(query.to_owned(), output);
        self
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl TrackResolver for CannedResolver {
    async fn resolve(&self, query: &str) -> Resolution {
        self.queries.lock().push(query.to_owned());
        match self.outputs.get(query) {
            Some(output) => Resolution::from_json(output.clone()),
            None => Resolution::nothing_found(),
        }
    }
}
