//! Per-voice-channel playback: queue, now-playing slot, play mode, and the
//! state machine driven by transport status events.
//!
//! All state sits behind one async mutex, so a command or a status event is
//! applied to completion (including the awaits inside it) before the next
//! one for the same session starts.

use std::collections::VecDeque;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use rand::seq::SliceRandom;
use serenity::async_trait;
use serenity::model::prelude::{ChannelId, GuildId};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::error::SessionError;
use crate::fetcher::Resolution;
use crate::track::{SerializedTrack, Track};
use crate::transport::{JoinConfig, PlaybackId, PlayerStatus, ReplySink, StatusListener, Transport};

pub const NOTHING_LEFT: &str = "End of the music.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayMode {
    PlayOnce,
    // LoopOneSong is reserved until its semantics are settled.
    LoopQueue,
}

/// 1-based positions into the queue, not counting the current track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueSelection {
    Single(usize),
    Range { begin: usize, end: usize },
}

impl QueueSelection {
    /// Zero-based inclusive bounds, or an error if anything falls outside `1..=len`.
    fn bounds(self, len: usize) -> Result<RangeInclusive<usize>, SessionError> {
        match self {
            QueueSelection::Single(position) if (1..=len).contains(&position) => {
                Ok(position - 1..=position - 1)
            }
            QueueSelection::Single(position) => Err(SessionError::InvalidPosition { position, len }),
            QueueSelection::Range { begin, end } if 1 <= begin && begin <= end && end <= len => {
                Ok(begin - 1..=end - 1)
            }
            QueueSelection::Range { begin, end } => Err(SessionError::InvalidRange { begin, end, len }),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// How long a started stream may take to report `Playing`.
    pub play_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            play_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackView {
    pub title: String,
    pub duration: String,
    pub elapsed: String,
}

impl From<&Track> for TrackView {
    fn from(track: &Track) -> Self {
        Self {
            title: track.title().to_owned(),
            duration: track.formatted_duration(),
            elapsed: track.formatted_elapsed(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionView {
    pub current: Option<TrackView>,
    pub queue: Vec<TrackView>,
    pub mode: PlayMode,
}

/// Runs with the track that just finished, before the session advances.
pub type TrackFinishedHook = Box<dyn Fn(Option<&Track>) + Send + Sync>;

#[derive(Debug, Clone, Copy)]
struct ActivePlayback {
    id: PlaybackId,
    confirmed: bool,
}

struct SessionState {
    queue: VecDeque<Track>,
    current: Option<Track>,
    mode: PlayMode,
    /// The stream whose events we still react to. Stays set after a skip
    /// until that stream reports idle.
    active: Option<ActivePlayback>,
    closed: bool,
}

pub struct Session {
    join_config: JoinConfig,
    reply_channel: ChannelId,
    transport: Arc<dyn Transport>,
    reply: Arc<dyn ReplySink>,
    settings: SessionSettings,
    state: Mutex<SessionState>,
    hooks: parking_lot::Mutex<Vec<TrackFinishedHook>>,
    playbacks: AtomicU64,
    me: Weak<Session>,
}

impl Session {
    pub fn new(
        join_config: JoinConfig,
        reply_channel: ChannelId,
        transport: Arc<dyn Transport>,
        reply: Arc<dyn ReplySink>,
        settings: SessionSettings,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            join_config,
            reply_channel,
            transport,
            reply,
            settings,
            state: Mutex::new(SessionState {
                queue: VecDeque::new(),
                current: None,
                mode: PlayMode::PlayOnce,
                active: None,
                closed: false,
            }),
            hooks: parking_lot::Mutex::new(Vec::new()),
            playbacks: AtomicU64::new(0),
            me: me.clone(),
        })
    }

    pub fn join_config(&self) -> &JoinConfig {
        &self.join_config
    }

    pub fn guild_id(&self) -> GuildId {
        self.join_config.guild_id
    }

    pub fn channel_id(&self) -> ChannelId {
        self.join_config.channel_id
    }

    pub fn reply_channel(&self) -> ChannelId {
        self.reply_channel
    }

    pub fn on_track_finished(&self, hook: TrackFinishedHook) {
        self.hooks.lock().push(hook);
    }

    pub async fn is_connected(&self) -> bool {
        self.transport.is_connected().await
    }

    pub async fn enqueue(&self, track: Track) {
        let mut state = self.state.lock().await;
        self.enqueue_locked(&mut state, track).await;
    }

    /// Adds everything a query resolved to and posts one summary for it.
    pub async fn enqueue_resolution(&self, resolution: Resolution) {
        let summary = resolution.summary();
        let mut state = self.state.lock().await;

        if state.closed {
            debug!(guild = %self.guild_id(), "Session closed while resolving, dropping {} tracks", resolution.tracks.len());
            return;
        }

        for track in resolution.tracks {
            self.enqueue_locked(&mut state, track).await;
        }
        self.reply.send(&summary).await;
    }

    /// Returns the skipped track's title, or `None` if nothing was playing.
    pub async fn skip(&self) -> Option<String> {
        let mut state = self.state.lock().await;
        let skipped = state.current.take()?;

        info!(guild = %self.guild_id(), "Skipping {}", skipped.title());
        if let Err(err) = self.transport.stop().await {
            // No idle event will come for this stream; advance by hand.
            warn!(guild = %self.guild_id(), "Could not stop transport: {err}");
            self.advance(&mut state, None, true).await;
        }

        Some(skipped.title().to_owned())
    }

    /// Returns false when there is nothing to pause.
    pub async fn pause(&self) -> bool {
        let state = self.state.lock().await;
        let Some(current) = state.current.as_ref() else {
            return false;
        };

        if !current.is_paused() {
            if let Err(err) = self.transport.pause().await {
                warn!(guild = %self.guild_id(), "Could not pause: {err}");
            }
        }
        true
    }

    /// Returns false when there is nothing to resume.
    pub async fn unpause(&self) -> bool {
        let state = self.state.lock().await;
        let Some(current) = state.current.as_ref() else {
            return false;
        };

        if current.is_paused() {
            if let Err(err) = self.transport.unpause().await {
                warn!(guild = %self.guild_id(), "Could not resume: {err}");
            }
        }
        true
    }

    pub async fn clear_queue(&self) {
        let mut state = self.state.lock().await;
        state.queue.clear();
        state.current = None;

        if let Err(err) = self.transport.stop().await {
            warn!(guild = %self.guild_id(), "Could not stop transport: {err}");
            state.active = None;
        }
    }

    pub async fn remove(&self, selection: QueueSelection) -> Result<Vec<Track>, SessionError> {
        let mut state = self.state.lock().await;
        let bounds = selection.bounds(state.queue.len())?;
        let removed: Vec<Track> = state.queue.drain(bounds).collect();

        let message = match removed.as_slice() {
            [track] => format!("- Removed **{}**.", track.title()),
            tracks => format!("- Removed {} tracks.", tracks.len()),
        };
        self.reply.send(&message).await;

        Ok(removed)
    }

    /// Returns the number of queued tracks that were shuffled.
    pub async fn shuffle(&self) -> usize {
        let mut state = self.state.lock().await;
        let len = state.queue.len();

        match len {
            0 | 1 => return len,
            2 => state.queue.swap(0, 1),
            _ => state.queue.make_contiguous().shuffle(&mut rand::thread_rng()),
        }

        self.reply.send(&format!("Shuffled {len} tracks.")).await;
        len
    }

    pub async fn change_mode(&self) -> PlayMode {
        let mut state = self.state.lock().await;
        state.mode = match state.mode {
            PlayMode::PlayOnce => PlayMode::LoopQueue,
            PlayMode::LoopQueue => PlayMode::PlayOnce,
        };
        state.mode
    }

    /// Rehydrates a persisted queue and starts its head. Refused unless the
    /// session is idle with an empty queue.
    pub async fn init_from_queue(&self, tracks: Vec<SerializedTrack>) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;

        if !state.queue.is_empty() || state.current.is_some() {
            error!(guild = %self.guild_id(), "Attempted to init from queue when queue isn't empty");
            return Err(SessionError::QueueNotEmpty);
        }

        state.queue = tracks.into_iter().map(Track::from).collect();
        if !state.queue.is_empty() {
            self.advance(&mut state, None, false).await;
        }

        Ok(())
    }

    /// Stops everything and ignores all later transport events.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        state.queue.clear();
        state.current = None;
        state.active = None;

        if let Err(err) = self.transport.stop().await {
            debug!(guild = %self.guild_id(), "Stop on close failed: {err}");
        }
    }

    pub async fn view(&self) -> SessionView {
        let state = self.state.lock().await;

        SessionView {
            current: state.current.as_ref().map(TrackView::from),
            queue: state.queue.iter().map(TrackView::from).collect(),
            mode: state.mode,
        }
    }

    /// Current track first, then the queue; what a restart should play.
    pub async fn serialized_queue(&self) -> Vec<SerializedTrack> {
        let state = self.state.lock().await;
        state
            .current
            .iter()
            .chain(state.queue.iter())
            .map(Track::serialize)
            .collect()
    }

    async fn enqueue_locked(&self, state: &mut SessionState, track: Track) {
        if state.closed {
            return;
        }

        let idle = state.queue.is_empty() && state.current.is_none();
        state.queue.push_back(track);

        if idle {
            self.advance(state, None, false).await;
        }
    }

    /// Moves to the next queued track. `finished` is recycled in loop mode.
    /// `announce_idle` posts [`NOTHING_LEFT`] if nothing could be started.
    async fn advance(&self, state: &mut SessionState, finished: Option<Track>, announce_idle: bool) {
        state.active = None;
        state.current = None;

        if let Some(mut finished) = finished {
            if state.mode == PlayMode::LoopQueue {
                finished.reset();
                state.queue.push_back(finished);
            }
        }

        while let Some(track) = state.queue.pop_front() {
            if self.start(state, track).await {
                return;
            }
        }

        if announce_idle {
            self.reply.send(NOTHING_LEFT).await;
        }
    }

    async fn start(&self, state: &mut SessionState, track: Track) -> bool {
        let id = PlaybackId(self.playbacks.fetch_add(1, Ordering::Relaxed) + 1);
        let listener: Weak<dyn StatusListener> = self.me.clone();

        match self.transport.play(id, &track, listener).await {
            Ok(()) => {
                info!(guild = %self.guild_id(), playback = %id, "Playing {}", track.title());
                self.reply
                    .send(&format!("⏵ Playing **{}** ({})!", track.title(), track.formatted_duration()))
                    .await;

                state.current = Some(track);
                state.active = Some(ActivePlayback { id, confirmed: false });
                self.spawn_watchdog(id);
                true
            }
            Err(err) => {
                error!(guild = %self.guild_id(), "Could not play {}: {err}", track.title());
                self.reply
                    .send(&format!("Could not play **{}**, moving on.", track.title()))
                    .await;
                false
            }
        }
    }

    fn spawn_watchdog(&self, id: PlaybackId) {
        let session = self.me.clone();
        let wait = self.settings.play_timeout;

        tokio::spawn(async move {
            sleep(wait).await;
            if let Some(session) = session.upgrade() {
                session.on_play_timeout(id).await;
            }
        });
    }

    async fn on_play_timeout(&self, id: PlaybackId) {
        let mut state = self.state.lock().await;

        match state.active {
            Some(active) if active.id == id && !active.confirmed && !state.closed => {}
            _ => return,
        }

        let stuck = state.current.take();
        warn!(guild = %self.guild_id(), playback = %id, "Playback did not start in time");
        if let Some(track) = &stuck {
            self.reply
                .send(&format!("**{}** did not start in time, moving on.", track.title()))
                .await;
        }

        if let Err(err) = self.transport.stop().await {
            debug!(guild = %self.guild_id(), "Stop after timeout failed: {err}");
        }
        self.advance(&mut state, None, true).await;
    }

    fn run_finished_hooks(&self, finished: Option<&Track>) {
        for hook in self.hooks.lock().iter() {
            hook(finished);
        }
    }
}

#[async_trait]
impl StatusListener for Session {
    async fn on_status(&self, playback: PlaybackId, status: PlayerStatus) {
        let mut state = self.state.lock().await;

        if state.closed {
            return;
        }
        let Some(active) = state.active else {
            debug!(guild = %self.guild_id(), playback = %playback, "Ignoring {status:?} while idle");
            return;
        };
        if active.id != playback {
            debug!(guild = %self.guild_id(), playback = %playback, "Ignoring {status:?} from stale stream");
            return;
        }

        match status {
            PlayerStatus::Idle | PlayerStatus::Failed(_) => {
                if let PlayerStatus::Failed(reason) = &status {
                    error!(guild = %self.guild_id(), playback = %playback, "Playback failed: {reason}");
                }

                let finished = state.current.take();
                self.run_finished_hooks(finished.as_ref());
                self.advance(&mut state, finished, true).await;
            }
            PlayerStatus::Playing => {
                state.active = Some(ActivePlayback {
                    confirmed: true,
                    ..active
                });
                if let Some(current) = state.current.as_mut() {
                    current.on_resume();
                }
            }
            PlayerStatus::Paused | PlayerStatus::AutoPaused => {
                if let Some(current) = state.current.as_mut() {
                    current.on_pause();
                }
            }
            PlayerStatus::Buffering => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::testing::{guild_config, RecordingReply, RecordingTransport, TransportCall};

    fn session_with(transport: &Arc<RecordingTransport>, reply: &Arc<RecordingReply>) -> Arc<Session> {
        Session::new(
            guild_config(1, 10),
            ChannelId::new(20),
            transport.clone(),
            reply.clone(),
            SessionSettings::default(),
        )
    }

    fn setup() -> (Arc<Session>, Arc<RecordingTransport>, Arc<RecordingReply>) {
        let transport = Arc::new(RecordingTransport::default());
        let reply = Arc::new(RecordingReply::default());
        (session_with(&transport, &reply), transport, reply)
    }

    fn track(name: &str) -> Track {
        Track::new(name, 120, name.to_lowercase())
    }

    async fn queue_titles(session: &Session) -> Vec<String> {
        session.view().await.queue.into_iter().map(|t| t.title).collect()
    }

    async fn current_title(session: &Session) -> Option<String> {
        session.view().await.current.map(|t| t.title)
    }

    async fn finish_current(session: &Session, transport: &RecordingTransport) {
        let (id, _) = transport.last_play().expect("a stream was started");
        session.on_status(id, PlayerStatus::Idle).await;
    }

    async fn filled(names: &[&str]) -> (Arc<Session>, Arc<RecordingTransport>, Arc<RecordingReply>) {
        let (session, transport, reply) = setup();
        for name in names {
            session.enqueue(track(name)).await;
        }
        (session, transport, reply)
    }

    #[tokio::test]
    async fn enqueue_into_idle_session_starts_playback() {
        let (session, transport, reply) = setup();

        session.enqueue(track("A")).await;

        assert_eq!(current_title(&session).await.as_deref(), Some("A"));
        assert!(queue_titles(&session).await.is_empty());
        assert_eq!(transport.plays(), ["a"]);
        assert!(reply.messages()[0].contains("Playing **A**"));
    }

    #[tokio::test]
    async fn enqueue_while_playing_only_queues() {
        let (session, transport, _) = filled(&["A", "B", "C"]).await;

        assert_eq!(current_title(&session).await.as_deref(), Some("A"));
        assert_eq!(queue_titles(&session).await, ["B", "C"]);
        assert_eq!(transport.plays(), ["a"]);
    }

    #[tokio::test]
    async fn idle_event_advances_and_runs_hooks() {
        let (session, transport, _) = filled(&["A", "B"]).await;
        let finished = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen = finished.clone();
        session.on_track_finished(Box::new(move |track: Option<&Track>| {
            seen.lock().push(track.map(|t| t.title().to_owned()));
        }));

        finish_current(&session, &transport).await;

        assert_eq!(*finished.lock(), [Some("A".to_owned())]);
        assert_eq!(current_title(&session).await.as_deref(), Some("B"));
        assert_eq!(transport.plays(), ["a", "b"]);
    }

    #[tokio::test]
    async fn nothing_left_is_announced_once() {
        let (session, transport, reply) = filled(&["A"]).await;
        let (id, _) = transport.last_play().unwrap();

        session.on_status(id, PlayerStatus::Idle).await;
        session.on_status(id, PlayerStatus::Idle).await;

        assert_eq!(current_title(&session).await, None);
        let announcements = reply.messages().iter().filter(|m| *m == NOTHING_LEFT).count();
        assert_eq!(announcements, 1);
    }

    #[tokio::test]
    async fn stale_events_are_ignored() {
        let (session, transport, _) = filled(&["A", "B", "C"]).await;
        let (first, _) = transport.last_play().unwrap();
        session.on_status(first, PlayerStatus::Idle).await;

        session.on_status(first, PlayerStatus::Idle).await;

        assert_eq!(current_title(&session).await.as_deref(), Some("B"));
        assert_eq!(queue_titles(&session).await, ["C"]);
    }

    #[tokio::test]
    async fn skip_stops_and_clears_current() {
        let (session, transport, _) = filled(&["A", "B"]).await;

        assert_eq!(session.skip().await.as_deref(), Some("A"));

        assert_eq!(current_title(&session).await, None);
        assert_eq!(transport.calls().last(), Some(&TransportCall::Stop));

        finish_current(&session, &transport).await;
        assert_eq!(current_title(&session).await.as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn skip_last_track_reports_nothing_left() {
        let (session, transport, reply) = filled(&["A"]).await;

        session.skip().await;
        finish_current(&session, &transport).await;

        assert_eq!(current_title(&session).await, None);
        assert_eq!(reply.messages().last().map(String::as_str), Some(NOTHING_LEFT));
    }

    #[tokio::test]
    async fn skip_when_idle_does_nothing() {
        let (session, transport, _) = setup();

        assert_eq!(session.skip().await, None);
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn skipped_track_is_not_looped() {
        let (session, transport, _) = filled(&["A", "B"]).await;
        session.change_mode().await;

        session.skip().await;
        finish_current(&session, &transport).await;

        assert_eq!(current_title(&session).await.as_deref(), Some("B"));
        assert!(queue_titles(&session).await.is_empty());
    }

    #[tokio::test]
    async fn enqueue_after_skip_starts_without_waiting_for_old_stream() {
        let (session, transport, _) = filled(&["A"]).await;
        let (old, _) = transport.last_play().unwrap();
        session.skip().await;

        session.enqueue(track("B")).await;
        session.on_status(old, PlayerStatus::Idle).await;

        assert_eq!(current_title(&session).await.as_deref(), Some("B"));
        assert_eq!(transport.plays(), ["a", "b"]);
    }

    #[tokio::test]
    async fn loop_mode_recycles_finished_tracks() {
        let (session, transport, _) = filled(&["A", "B"]).await;
        assert_eq!(session.change_mode().await, PlayMode::LoopQueue);

        session.on_status(transport.last_play().unwrap().0, PlayerStatus::Playing).await;
        finish_current(&session, &transport).await;

        assert_eq!(current_title(&session).await.as_deref(), Some("B"));
        let view = session.view().await;
        assert_eq!(view.queue.len(), 1);
        assert_eq!(view.queue[0].title, "A");
        assert_eq!(view.queue[0].elapsed, "00:00");

        finish_current(&session, &transport).await;

        assert_eq!(current_title(&session).await.as_deref(), Some("A"));
        assert_eq!(queue_titles(&session).await, ["B"]);
        assert_eq!(transport.plays(), ["a", "b", "a"]);
    }

    #[tokio::test]
    async fn loop_mode_repeats_a_single_track() {
        let (session, transport, _) = filled(&["A"]).await;
        session.change_mode().await;

        finish_current(&session, &transport).await;

        assert_eq!(current_title(&session).await.as_deref(), Some("A"));
        assert_eq!(transport.plays(), ["a", "a"]);
    }

    #[tokio::test]
    async fn change_mode_toggles() {
        let (session, _, _) = setup();
        assert_eq!(session.change_mode().await, PlayMode::LoopQueue);
        assert_eq!(session.change_mode().await, PlayMode::PlayOnce);
    }

    #[tokio::test]
    async fn remove_single_position() {
        let (session, _, _) = filled(&["Now", "1", "2", "3", "4", "5"]).await;

        let removed = session.remove(QueueSelection::Single(3)).await.unwrap();

        assert_eq!(removed[0].title(), "3");
        assert_eq!(queue_titles(&session).await, ["1", "2", "4", "5"]);
    }

    #[tokio::test]
    async fn remove_range() {
        let (session, _, reply) = filled(&["Now", "1", "2", "3", "4", "5"]).await;

        session
            .remove(QueueSelection::Range { begin: 2, end: 4 })
            .await
            .unwrap();

        assert_eq!(queue_titles(&session).await, ["1", "5"]);
        assert_eq!(reply.messages().last().map(String::as_str), Some("- Removed 3 tracks."));
    }

    #[tokio::test]
    async fn remove_out_of_bounds_leaves_queue_alone() {
        let (session, _, _) = filled(&["Now", "1", "2", "3", "4", "5"]).await;

        for selection in [
            QueueSelection::Single(0),
            QueueSelection::Single(6),
            QueueSelection::Range { begin: 3, end: 2 },
            QueueSelection::Range { begin: 0, end: 2 },
            QueueSelection::Range { begin: 4, end: 6 },
        ] {
            assert!(session.remove(selection).await.is_err(), "{selection:?}");
        }

        assert_eq!(queue_titles(&session).await, ["1", "2", "3", "4", "5"]);
    }

    #[tokio::test]
    async fn shuffle_keeps_the_same_tracks() {
        let names = ["Now", "1", "2", "3", "4", "5", "6", "7"];
        let (session, _, _) = filled(&names).await;

        assert_eq!(session.shuffle().await, 7);

        let mut titles = queue_titles(&session).await;
        titles.sort();
        assert_eq!(titles, ["1", "2", "3", "4", "5", "6", "7"]);
        assert_eq!(current_title(&session).await.as_deref(), Some("Now"));
    }

    #[tokio::test]
    async fn shuffle_of_two_swaps_and_of_one_is_noop() {
        let (session, _, reply) = filled(&["Now", "1", "2"]).await;
        session.shuffle().await;
        assert_eq!(queue_titles(&session).await, ["2", "1"]);

        let (session, _, reply_single) = filled(&["Now", "1"]).await;
        let before = reply_single.messages().len();
        assert_eq!(session.shuffle().await, 1);
        assert_eq!(reply_single.messages().len(), before);
        assert!(reply.messages().last().unwrap().starts_with("Shuffled"));
    }

    #[tokio::test]
    async fn clear_queue_stops_and_empties() {
        let (session, transport, reply) = filled(&["A", "B", "C"]).await;

        session.clear_queue().await;

        let view = session.view().await;
        assert!(view.current.is_none());
        assert!(view.queue.is_empty());
        assert_eq!(transport.calls().last(), Some(&TransportCall::Stop));

        finish_current(&session, &transport).await;
        assert_eq!(reply.messages().last().map(String::as_str), Some(NOTHING_LEFT));
        assert_eq!(transport.plays(), ["a"]);
    }

    #[tokio::test]
    async fn pause_and_unpause_forward_only_when_needed() {
        let (session, transport, _) = setup();
        assert!(!session.pause().await);
        assert!(!session.unpause().await);
        assert!(transport.calls().is_empty());

        session.enqueue(track("A")).await;
        let (id, _) = transport.last_play().unwrap();
        session.on_status(id, PlayerStatus::Playing).await;

        assert!(session.pause().await);
        session.on_status(id, PlayerStatus::Paused).await;
        assert!(session.pause().await);
        assert!(session.unpause().await);

        let controls: Vec<_> = transport
            .calls()
            .into_iter()
            .filter(|c| matches!(c, TransportCall::Pause | TransportCall::Unpause))
            .collect();
        assert_eq!(controls, [TransportCall::Pause, TransportCall::Unpause]);
    }

    #[tokio::test]
    async fn init_from_queue_starts_head() {
        let (session, transport, _) = setup();
        let saved = vec![track("A").serialize(), track("B").serialize()];

        session.init_from_queue(saved).await.unwrap();

        assert_eq!(current_title(&session).await.as_deref(), Some("A"));
        assert_eq!(queue_titles(&session).await, ["B"]);
        assert_eq!(transport.plays(), ["a"]);
    }

    #[tokio::test]
    async fn init_from_queue_refuses_busy_session() {
        let (session, transport, _) = filled(&["A", "B"]).await;

        let result = session.init_from_queue(vec![track("C").serialize()]).await;

        assert_eq!(result, Err(SessionError::QueueNotEmpty));
        assert_eq!(queue_titles(&session).await, ["B"]);
        assert_eq!(transport.plays(), ["a"]);
    }

    #[tokio::test]
    async fn serialized_queue_puts_current_first() {
        let (session, _, _) = filled(&["A", "B", "C"]).await;

        let titles: Vec<_> = session.serialized_queue().await.into_iter().map(|t| t.title).collect();

        assert_eq!(titles, ["A", "B", "C"]);
    }

    #[tokio::test]
    async fn failed_start_moves_to_next_track() {
        let (session, transport, reply) = setup();
        transport.fail_next_plays(1);

        session.enqueue(track("A")).await;
        assert_eq!(current_title(&session).await, None);
        assert!(reply.messages()[0].contains("Could not play **A**"));

        session.enqueue(track("B")).await;
        assert_eq!(current_title(&session).await.as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn failed_status_advances_without_retry() {
        let (session, transport, _) = filled(&["A", "B"]).await;
        let (id, _) = transport.last_play().unwrap();

        session.on_status(id, PlayerStatus::Failed("decoder error".into())).await;

        assert_eq!(current_title(&session).await.as_deref(), Some("B"));
        assert_eq!(transport.plays(), ["a", "b"]);
    }

    #[tokio::test]
    async fn closed_session_ignores_events() {
        let (session, transport, _) = filled(&["A", "B"]).await;
        let (id, _) = transport.last_play().unwrap();

        session.close().await;
        session.on_status(id, PlayerStatus::Idle).await;
        session.enqueue(track("C")).await;

        assert_eq!(current_title(&session).await, None);
        assert_eq!(transport.plays(), ["a"]);
    }

    #[tokio::test]
    async fn resolution_for_closed_session_is_dropped_quietly() {
        let (session, transport, reply) = setup();
        session.close().await;

        let resolution = Resolution {
            tracks: vec![track("A"), track("B")],
            found: true,
            ..Resolution::default()
        };
        session.enqueue_resolution(resolution).await;

        assert!(reply.messages().is_empty());
        assert!(transport.plays().is_empty());
        assert!(session.view().await.queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unconfirmed_playback_times_out() {
        let (session, transport, reply) = filled(&["A", "B"]).await;

        sleep(Duration::from_secs(31)).await;

        assert_eq!(current_title(&session).await.as_deref(), Some("B"));
        assert!(reply.messages().iter().any(|m| m.contains("**A** did not start in time")));
        assert!(transport.calls().contains(&TransportCall::Stop));
    }

    #[tokio::test(start_paused = true)]
    async fn confirmed_playback_is_left_alone() {
        let (session, transport, _) = filled(&["A", "B"]).await;
        let hook_calls = Arc::new(AtomicUsize::new(0));
        let counter = hook_calls.clone();
        session.on_track_finished(Box::new(move |_: Option<&Track>| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        session.on_status(transport.last_play().unwrap().0, PlayerStatus::Playing).await;
        sleep(Duration::from_secs(31)).await;

        assert_eq!(current_title(&session).await.as_deref(), Some("A"));
        assert_eq!(hook_calls.load(Ordering::SeqCst), 0);
    }
}
