use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serenity::model::prelude::GuildId;

use crate::error::RegistryError;
use crate::session::Session;
use crate::transport::JoinConfig;

/// Live sessions. A guild holds at most one voice connection, so sessions
/// are keyed by guild and each remembers the channel it is bound to.
#[derive(Default)]
pub struct Registry {
    sessions: Mutex<HashMap<GuildId, Arc<Session>>>,
}

impl Registry {
    pub fn get(&self, guild_id: GuildId) -> Option<Arc<Session>> {
        self.sessions.lock().get(&guild_id).cloned()
    }

    /// Returns the session for `target`, building it with `create` only if
    /// none exists. Check and insert happen under one lock. The flag is true
    /// when a new session was registered.
    pub fn get_or_create<F>(&self, target: &JoinConfig, create: F) -> Result<(Arc<Session>, bool), RegistryError>
    where
        F: FnOnce() -> Arc<Session>,
    {
        let mut sessions = self.sessions.lock();

        if let Some(existing) = sessions.get(&target.guild_id) {
            if existing.channel_id() != target.channel_id {
                return Err(RegistryError::ChannelMismatch {
                    existing: existing.channel_id(),
                });
            }
            return Ok((existing.clone(), false));
        }

        let session = create();
        sessions.insert(target.guild_id, session.clone());
        Ok((session, true))
    }

    /// Detaches the session. Does not touch its transport.
    pub fn remove(&self, guild_id: GuildId) -> Option<Arc<Session>> {
        self.sessions.lock().remove(&guild_id)
    }

    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }
}
