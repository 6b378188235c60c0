//! Adapter around the external resolver (yt-dlp).
//!
//! Searches run as `--dump-single-json` and are parsed as soon as the bytes
//! read so far form one complete JSON document. Every failure ends up as an
//! empty [`Resolution`]; nothing here is fatal to a session.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use serenity::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::track::Track;

/// Streams at or above this length are known to cut off early.
pub const LONG_TRACK_SECS: u64 = 3000;

#[async_trait]
pub trait TrackResolver: Send + Sync {
    async fn resolve(&self, query: &str) -> Resolution;
}

/// Outcome of one query.
#[derive(Debug, Default)]
pub struct Resolution {
    pub tracks: Vec<Track>,
    /// Entries dropped because their duration was unknown.
    pub removed: usize,
    /// Accepted tracks at or above [`LONG_TRACK_SECS`].
    pub long: usize,
    /// False when the resolver produced nothing parseable.
    pub found: bool,
}

impl Resolution {
    pub fn nothing_found() -> Self {
        Self::default()
    }

    pub fn from_json(value: Value) -> Self {
        if value.is_null() {
            return Self::nothing_found();
        }

        let output = match ResolverOutput::deserialize(value) {
            Ok(output) => output,
            Err(err) => {
                warn!("Unexpected resolver output: {err}");
                return Self::nothing_found();
            }
        };

        let entries = match output.entries {
            Some(entries) => entries.into_iter().flatten().collect(),
            None => vec![output.item],
        };

        let mut resolution = Resolution {
            found: true,
            ..Default::default()
        };

        for entry in entries {
            let duration = entry.duration.filter(|d| *d > 0.0).map(|d| d as u64).unwrap_or(0);

            match (entry.id, duration) {
                (Some(id), duration) if duration > 0 => {
                    if duration >= LONG_TRACK_SECS {
                        resolution.long += 1;
                    }
                    let title = entry.title.unwrap_or_else(|| id.clone());
                    resolution.tracks.push(Track::new(title, duration, id));
                }
                _ => resolution.removed += 1,
            }
        }

        resolution
    }

    /// One message per query, not per track.
    pub fn summary(&self) -> String {
        if !self.found {
            return "**#** Nothing found.".into();
        }

        let added = self.tracks.len();
        let mut summary = format!("+ Added {added} {}.", plural(added));

        if self.removed > 0 {
            summary += &format!(" Removed {} without a known length.", self.removed);
        }

        if self.long > 0 {
            summary += &format!(
                "\n:warning: {} {} longer than 50 minutes and may stop early.",
                self.long,
                if self.long == 1 { "track is" } else { "tracks are" }
            );
        }

        summary
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 {
        "track"
    } else {
        "tracks"
    }
}

#[derive(Deserialize, Debug, Default)]
struct ResolverItem {
    title: Option<String>,
    duration: Option<f64>,
    id: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ResolverOutput {
    entries: Option<Vec<Option<ResolverItem>>>,
    #[serde(flatten)]
    item: ResolverItem,
}

/// Collects stdout chunks until they parse as one JSON value.
#[derive(Debug, Default)]
pub struct JsonAccumulator {
    buf: Vec<u8>,
}

impl JsonAccumulator {
    pub fn push(&mut self, chunk: &[u8]) -> Option<Value> {
        self.buf.extend_from_slice(chunk);
        self.try_parse()
    }

    pub fn finish(self) -> Option<Value> {
        self.try_parse()
    }

    fn try_parse(&self) -> Option<Value> {
        if self.buf.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        serde_json::from_slice(&self.buf).ok()
    }
}

/// Splits play arguments into queries: each URL on its own, runs of plain
/// words joined into one search.
pub fn split_queries(input: &str) -> Vec<String> {
    let mut queries = Vec::new();
    let mut words: Vec<&str> = Vec::new();

    for word in input.split_whitespace() {
        if word.starts_with("http://") || word.starts_with("https://") {
            if !words.is_empty() {
                queries.push(words.join(" "));
                words.clear();
            }
            queries.push(word.to_owned());
        } else {
            words.push(word);
        }
    }

    if !words.is_empty() {
        queries.push(words.join(" "));
    }

    queries
}

pub struct YtDlp {
    executable: PathBuf,
    timeout: Duration,
}

impl YtDlp {
    pub fn new(executable: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            executable: executable.into(),
            timeout,
        }
    }

    /// Command that writes the best audio stream of `url` to stdout.
    pub fn stream_command(&self, url: &str) -> std::process::Command {
        let mut command = std::process::Command::new(&self.executable);
        command
            .args(["-f", "bestaudio", "-o", "-", "--default-search", "ytsearch", url])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }

    async fn fetch(&self, query: &str) -> Result<Option<Value>, FetchError> {
        let mut child = Command::new(&self.executable)
            .args(["--default-search", "ytsearch", "--flat-playlist", "--dump-single-json", query])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(FetchError::Spawn)?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(target: "resolver", "{line}");
                }
            });
        }

        let mut parsed = None;
        if let Some(mut stdout) = child.stdout.take() {
            let mut accumulator = JsonAccumulator::default();
            let mut chunk = [0u8; 8192];

            loop {
                let read = stdout.read(&mut chunk).await?;
                if read == 0 {
                    parsed = accumulator.finish();
                    break;
                }
                if let Some(value) = accumulator.push(&chunk[..read]) {
                    parsed = Some(value);
                    break;
                }
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            warn!("Resolver exited with {status} for {query:?}");
        }

        Ok(parsed)
    }
}

#[async_trait]
impl TrackResolver for YtDlp {
    async fn resolve(&self, query: &str) -> Resolution {
        debug!("Resolving {query:?}");

        let fetched = match timeout(self.timeout, self.fetch(query)).await {
            Ok(fetched) => fetched,
            Err(_) => Err(FetchError::Timeout(self.timeout)),
        };

        match fetched {
            Ok(Some(value)) => {
                let resolution = Resolution::from_json(value);
                info!(
                    "Resolved {query:?}: {} tracks, {} removed",
                    resolution.tracks.len(),
                    resolution.removed
                );
                resolution
            }
            Ok(None) => Resolution::nothing_found(),
            Err(err) => {
                warn!("Resolving {query:?} failed: {err}");
                Resolution::nothing_found()
            }
        }
    }
}
