use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

const HOUR: u64 = 3600;

/// Minimal persisted form of a track. No playback timers.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SerializedTrack {
    pub title: String,
    pub duration: u64,
    #[serde(rename = "youtubeId")]
    pub youtube_id: String,
}

/// One playable item plus wall-clock elapsed-time bookkeeping.
#[derive(Debug, Clone)]
pub struct Track {
    title: String,
    /// Seconds, 0 when unknown.
    duration: u64,
    source_id: String,
    url: String,

    elapsed: Duration,
    paused: bool,
    started_at: Option<Instant>,
}

impl Track {
    pub fn new(title: impl Into<String>, duration: u64, source_id: impl Into<String>) -> Self {
        let source_id = source_id.into();

        Self {
            title: title.into(),
            duration,
            url: format!("https://www.youtube.com/watch?v={source_id}"),
            source_id,
            elapsed: Duration::ZERO,
            paused: false,
            started_at: None,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn duration(&self) -> u64 {
        self.duration
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn formatted_duration(&self) -> String {
        format_timestamp(self.duration, false)
    }

    pub fn formatted_elapsed(&self) -> String {
        format_timestamp(self.elapsed_at(Instant::now()).as_secs(), self.duration >= HOUR)
    }

    pub fn on_pause(&mut self) {
        self.pause_at(Instant::now());
    }

    pub fn on_resume(&mut self) {
        self.resume_at(Instant::now());
    }

    /// Forget all playback progress; used when the track is recycled to the queue tail.
    pub fn reset(&mut self) {
        self.elapsed = Duration::ZERO;
        self.paused = false;
        self.started_at = None;
    }

    pub fn serialize(&self) -> SerializedTrack {
        SerializedTrack {
            title: self.title.clone(),
            duration: self.duration,
            youtube_id: self.source_id.clone(),
        }
    }

    fn elapsed_at(&self, now: Instant) -> Duration {
        match (self.paused, self.started_at) {
            (false, Some(started)) => self.elapsed + now.saturating_duration_since(started),
            _ => self.elapsed,
        }
    }

    fn pause_at(&mut self, now: Instant) {
        if self.paused {
            return;
        }

        if let Some(started) = self.started_at {
            self.elapsed += now.saturating_duration_since(started);
        }
        self.paused = true;
    }

    fn resume_at(&mut self, now: Instant) {
        // A track that never started counts as paused at zero.
        if !self.paused && self.started_at.is_some() {
            return;
        }

        self.started_at = Some(now);
        self.paused = false;
    }
}

impl From<SerializedTrack> for Track {
    fn from(track: SerializedTrack) -> Self {
        Track::new(track.title, track.duration, track.youtube_id)
    }
}

/// `mm:ss`, or `hh:mm:ss` when the value reaches an hour or `force_hours` is set.
pub fn format_timestamp(seconds: u64, force_hours: bool) -> String {
    let hours = seconds / HOUR;
    let minutes = (seconds % HOUR) / 60;
    let seconds = seconds % 60;

    if hours > 0 || force_hours {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}
