use std::error::Error;
use std::sync::Arc;

use dotenvy::dotenv;
use serenity::http::Http;
use serenity::prelude::*;
use songbird::serenity::SerenityInit;
use songbird::Songbird;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod command_manager;
mod config;
mod error;
mod events;
mod fetcher;
mod persistence;
mod player;
mod registry;
mod session;
#[cfg(test)]
mod testing;
mod track;
mod transport;
mod voice;

use crate::command_manager::CommandManager;
use crate::config::Config;
use crate::events::DiscordHandler;
use crate::fetcher::YtDlp;
use crate::persistence::StateStore;
use crate::player::Jukebox;
use crate::session::SessionSettings;
use crate::voice::SongbirdGateway;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;

    let http = Arc::new(Http::new(&config.token));
    let songbird = Songbird::serenity();
    let resolver = Arc::new(YtDlp::new(&config.resolver_path, config.resolve_timeout));

    let (disconnect_tx, disconnect_rx) = mpsc::unbounded_channel();
    let gateway = SongbirdGateway::new(songbird.clone(), http, resolver.clone(), disconnect_tx);

    let jukebox = Jukebox::new(
        Arc::new(gateway),
        resolver,
        StateStore::new(&config.state_file),
        SessionSettings {
            play_timeout: config.play_timeout,
        },
    );
    tokio::spawn(jukebox.clone().watch_disconnects(disconnect_rx));

    let commands = CommandManager::new(&config.prefix);
    info!("Commands: {}", commands.list_commands());

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILD_VOICE_STATES;

    let mut client = Client::builder(&config.token, intents)
        .event_handler(DiscordHandler::new(jukebox.clone(), commands))
        .register_songbird_with(songbird)
        .await?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(why) = tokio::signal::ctrl_c().await {
            error!("Could not listen for Ctrl-C: {why}");
            return;
        }

        info!("Saving state before shutting down");
        jukebox.snapshot().await;
        shard_manager.shutdown_all().await;
    });

    // Shards will automatically attempt to reconnect, and will perform
    // exponential backoff until it reconnects.
    if let Err(why) = client.start().await {
        error!("Client error: {why:?}");
    }

    Ok(())
}
