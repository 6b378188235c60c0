use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct Config {
    pub token: String,
    pub prefix: String,
    pub resolver_path: PathBuf,
    pub state_file: PathBuf,
    pub resolve_timeout: Duration,
    pub play_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let token = lookup("DISCORD_TOKEN")
            .filter(|token| !token.trim().is_empty())
            .ok_or(ConfigError::Missing("DISCORD_TOKEN"))?;

        Ok(Self {
            token,
            prefix: lookup("COMMAND_PREFIX").unwrap_or_else(|| ">".into()),
            resolver_path: lookup("RESOLVER_PATH").unwrap_or_else(|| "yt-dlp".into()).into(),
            state_file: lookup("STATE_FILE")
                .unwrap_or_else(|| "/tmp/rusty-jukebox-state.json".into())
                .into(),
            resolve_timeout: seconds(&lookup, "RESOLVE_TIMEOUT_SECS", 60)?,
            play_timeout: seconds(&lookup, "PLAY_TIMEOUT_SECS", 30)?,
        })
    }
}

fn seconds<F>(lookup: &F, key: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&'static str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(Duration::from_secs(default)),
        Some(value) => match value.trim().parse::<u64>() {
            Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
            _ => Err(ConfigError::Invalid { key, value }),
        },
    }
}
