//! Durable snapshot of every live session, rewritten wholesale on each save.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serenity::model::prelude::ChannelId;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::PersistenceError;
use crate::track::SerializedTrack;
use crate::transport::JoinConfig;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub join_config: JoinConfig,
    pub music_channel_id: ChannelId,
    pub queue: Vec<SerializedTrack>,
}

pub struct StateStore {
    path: PathBuf,
    writes: Mutex<()>,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writes: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the stored state. Writes go to a sibling file first and are
    /// renamed into place, so readers never see half a document.
    pub async fn save(&self, records: &[SessionRecord]) -> Result<(), PersistenceError> {
        let json = serde_json::to_vec(records)?;
        let _guard = self.writes.lock().await;

        let mut staging = self.path.clone().into_os_string();
        staging.push(".tmp");

        fs::write(&staging, json).await?;
        fs::rename(&staging, &self.path).await?;
        Ok(())
    }

    /// Missing or unreadable state means "nothing to restore".
    pub async fn load(&self) -> Vec<SessionRecord> {
        let data = match fs::read(&self.path).await {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!("No saved state at {}", self.path.display());
                return Vec::new();
            }
            Err(err) => {
                warn!("Could not read saved state {}: {err}", self.path.display());
                return Vec::new();
            }
        };

        match serde_json::from_slice(&data) {
            Ok(records) => records,
            Err(err) => {
                warn!("Ignoring corrupt state file {}: {err}", self.path.display());
                Vec::new()
            }
        }
    }
}
