use std::collections::HashMap;

use rand::seq::SliceRandom;
use tracing::{debug, error, info};

use crate::error::JukeboxError;
use crate::player::{Jukebox, MessageContext};
use crate::session::{PlayMode, QueueSelection, Session, SessionView};

/// At most one of the two is set. Neither means nothing to say.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub response: Option<String>,
    pub error: Option<String>,
}

impl CommandResult {
    pub fn respond(text: impl Into<String>) -> Self {
        Self {
            response: Some(text.into()),
            error: None,
        }
    }

    pub fn fail(text: impl Into<String>) -> Self {
        Self {
            response: None,
            error: Some(text.into()),
        }
    }

    pub fn silent() -> Self {
        Self::default()
    }
}

impl From<JukeboxError> for CommandResult {
    fn from(err: JukeboxError) -> Self {
        debug!("Command refused: {err}");
        CommandResult::fail(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Help,
    Respond(Vec<String>),
    Join,
    Leave,
    Play,
    /// Needs the sender in voice and a session in their guild.
    Session(SessionOperation),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOperation {
    Pause,
    Resume,
    Skip,
    Clear,
    NowPlaying,
    Queue,
    Remove,
    Shuffle,
    Loop,
}

impl Operation {
    /// Whether running this can change what a restart would restore.
    fn touches_queue(&self) -> bool {
        matches!(
            self,
            Operation::Join
                | Operation::Leave
                | Operation::Play
                | Operation::Session(
                    SessionOperation::Skip
                        | SessionOperation::Clear
                        | SessionOperation::Remove
                        | SessionOperation::Shuffle
                )
        )
    }
}

#[derive(Debug, Clone)]
pub struct Command {
    pub name: &'static str,
    pub description: &'static str,
    pub aliases: &'static [&'static str],
    pub operation: Operation,
}

fn command(
    name: &'static str,
    description: &'static str,
    aliases: &'static [&'static str],
    operation: Operation,
) -> Command {
    Command {
        name,
        description,
        aliases,
        operation,
    }
}

fn builtin_commands() -> Vec<Command> {
    use SessionOperation::*;
    let session = Operation::Session;

    vec![
        command(
            "ping",
            "Check that I'm awake",
            &[],
            Operation::Respond(vec![
                "Hey, I'm alive! Temporarily, at least...".into(),
                "Pong!".into(),
            ]),
        ),
        command("join", "Join your voice channel", &["ela"], Operation::Join),
        command("leave", "Leave the voice channel", &["marsh"], Operation::Leave),
        command("play", "Queue a link or the first search result", &["p", "pusni"], Operation::Play),
        command("pause", "Pause the music", &["spri"], session(Pause)),
        command("resume", "Resume paused music", &["unpause", "daj"], session(Resume)),
        command("skip", "Skip to the next track", &["s"], session(Skip)),
        command("clear", "Stop playing and empty the queue", &[], session(Clear)),
        command("nowplaying", "Show what's playing", &["np"], session(NowPlaying)),
        command("queue", "Show the current track and the queue", &["q"], session(Queue)),
        command("remove", "Remove a track or range, e.g. `3` or `5-10`", &["rm"], session(Remove)),
        command("shuffle", "Shuffle the queue", &["shuf"], session(Shuffle)),
        command("loop", "Toggle looping the whole queue", &["povtarqi"], session(Loop)),
    ]
}

/// Name and alias lookup, built once at startup.
pub struct CommandManager {
    prefix: String,
    commands: Vec<Command>,
    lookup: HashMap<String, usize>,
    help: String,
}

impl CommandManager {
    pub fn new(prefix: impl Into<String>) -> Self {
        let mut commands = vec![command("help", "Show this list", &[], Operation::Help)];
        commands.extend(builtin_commands());
        Self::with_commands(prefix, commands)
    }

    pub fn with_commands(prefix: impl Into<String>, commands: Vec<Command>) -> Self {
        let prefix = prefix.into();
        let mut lookup: HashMap<String, usize> = HashMap::new();

        for (index, command) in commands.iter().enumerate() {
            for key in std::iter::once(&command.name).chain(command.aliases) {
                if lookup.contains_key(*key) {
                    error!("Alias/Command {key} already exists. Skipping.");
                    continue;
                }
                lookup.insert(key.to_string(), index);
            }
        }

        let help = std::iter::once("Commands:".to_owned())
            .chain(commands.iter().map(|c| format!("    - `{prefix}{}` - {}", c.name, c.description)))
            .collect::<Vec<_>>()
            .join("\n");

        info!("Registered {} commands under {} names", commands.len(), lookup.len());

        Self {
            prefix,
            commands,
            lookup,
            help,
        }
    }

    pub fn list_commands(&self) -> String {
        self.commands.iter().map(|c| c.name).collect::<Vec<_>>().join(", ")
    }

    /// Splits `content` into a known command and its argument text.
    pub fn parse<'a>(&self, content: &'a str) -> Option<(&Command, &'a str)> {
        let rest = content.trim_start().strip_prefix(self.prefix.as_str())?;
        let (name, args) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));

        let index = self.lookup.get(&name.to_lowercase())?;
        Some((&self.commands[*index], args.trim()))
    }

    pub async fn execute(
        &self,
        jukebox: &Jukebox,
        ctx: &MessageContext,
        command: &Command,
        args: &str,
    ) -> CommandResult {
        info!(
            guild = %ctx.guild_id,
            user = %ctx.sender_id,
            "{} ran {}{} {args}",
            ctx.sender_name,
            self.prefix,
            command.name
        );
        let result = self.run(jukebox, ctx, command, args).await;

        if command.operation.touches_queue() && result.error.is_none() {
            jukebox.snapshot().await;
        }
        result
    }

    async fn run(&self, jukebox: &Jukebox, ctx: &MessageContext, command: &Command, args: &str) -> CommandResult {
        match &command.operation {
            Operation::Help => CommandResult::respond(&self.help),
            Operation::Respond(responses) => match responses.choose(&mut rand::thread_rng()) {
                Some(response) => CommandResult::respond(response),
                None => CommandResult::fail(format!("\"{}\" has no responses set!", command.name)),
            },
            Operation::Join => match jukebox.join(ctx).await {
                Ok(_) => CommandResult::respond("Coming."),
                Err(err) => err.into(),
            },
            Operation::Leave => match jukebox.leave(ctx).await {
                Ok(()) => CommandResult::respond("See you later."),
                Err(err) => err.into(),
            },
            Operation::Play => match jukebox.play(ctx, args).await {
                Ok(()) => CommandResult::silent(),
                Err(err) => err.into(),
            },
            Operation::Session(operation) => match jukebox.session_for(ctx) {
                Ok(session) => self.run_in_session(&session, *operation, args).await,
                Err(err) => err.into(),
            },
        }
    }

    async fn run_in_session(&self, session: &Session, operation: SessionOperation, args: &str) -> CommandResult {
        match operation {
            SessionOperation::Pause => {
                if session.pause().await {
                    CommandResult::respond("Paused.")
                } else {
                    CommandResult::respond("Nothing to pause.")
                }
            }
            SessionOperation::Resume => {
                if session.unpause().await {
                    CommandResult::silent()
                } else {
                    CommandResult::respond("Nothing to resume.")
                }
            }
            SessionOperation::Skip => match session.skip().await {
                Some(title) => CommandResult::respond(format!("Skipped **{title}**.")),
                None => CommandResult::respond("Nothing to skip."),
            },
            SessionOperation::Clear => {
                session.clear_queue().await;
                CommandResult::respond("Stopped and cleared the queue.")
            }
            SessionOperation::NowPlaying => CommandResult::respond(render_now_playing(&session.view().await)),
            SessionOperation::Queue => CommandResult::respond(render_queue(&session.view().await)),
            SessionOperation::Remove => {
                let selection = match self.parse_selection(args) {
                    Ok(selection) => selection,
                    Err(message) => return CommandResult::fail(message),
                };

                match (session.remove(selection).await, selection) {
                    (Ok(_), _) => CommandResult::silent(),
                    (Err(_), QueueSelection::Single(_)) => CommandResult::fail("Incorrect song number!"),
                    (Err(_), QueueSelection::Range { .. }) => CommandResult::fail("Incorrect values for range!"),
                }
            }
            SessionOperation::Shuffle => match session.shuffle().await {
                0 | 1 => CommandResult::respond("Not enough tracks to shuffle."),
                _ => CommandResult::silent(),
            },
            SessionOperation::Loop => match session.change_mode().await {
                PlayMode::LoopQueue => CommandResult::respond("Looping the queue."),
                PlayMode::PlayOnce => CommandResult::respond("Playing the queue once."),
            },
        }
    }

    fn parse_selection(&self, args: &str) -> Result<QueueSelection, String> {
        let Some(arg) = args.split_whitespace().next() else {
            return Err(format!(
                "You must pass in a number (e.g. `{0}rm 1`) or a range of numbers (e.g. `{0}rm 5-10`).",
                self.prefix
            ));
        };

        match arg.split_once('-') {
            Some((begin, end)) => {
                if end.contains('-') {
                    return Err("There must be exactly two numbers in the range.".into());
                }
                match (begin.parse(), end.parse()) {
                    (Ok(begin), Ok(end)) => Ok(QueueSelection::Range { begin, end }),
                    _ => Err("Parts of range must be numbers.".into()),
                }
            }
            None => arg
                .parse()
                .map(QueueSelection::Single)
                .map_err(|_| "You must pass in a number or a range.".into()),
        }
    }
}

pub fn render_now_playing(view: &SessionView) -> String {
    match &view.current {
        None => "Nothing.".into(),
        Some(track) => format!("Now playing **{}** ({}/{}).", track.title, track.elapsed, track.duration),
    }
}

pub fn render_queue(view: &SessionView) -> String {
    let looping = match view.mode {
        PlayMode::LoopQueue => " (looping)",
        PlayMode::PlayOnce => "",
    };

    match (&view.current, view.queue.is_empty()) {
        (None, true) => "Nothing to play.".into(),
        (Some(current), true) => format!(
            "Now playing **{}** ({}), and after that: nothing.",
            current.title, current.duration
        ),
        (current, false) => {
            let mut text = match current {
                Some(current) => format!("Now playing **{}** ({}).\n", current.title, current.duration),
                None => String::new(),
            };
            text += &format!("Up next{looping}:\n");
            for (position, track) in view.queue.iter().enumerate() {
                text += &format!("  {}. **{}** ({})\n", position + 1, track.title, track.duration);
            }
            text
        }
    }
}
