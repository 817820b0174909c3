use std::sync::Arc;

use serenity::all::{Client, GatewayIntents};

use porter_core::{config::Config, logging};
use porter_discord::events::Handler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init("porter");

    let cfg = Arc::new(Config::load()?);
    tracing::info!(guild = cfg.home_guild_id.0, "starting porter");

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::GUILD_MESSAGE_REACTIONS
        | GatewayIntents::MESSAGE_CONTENT;

    let mut client = Client::builder(&cfg.discord_token, intents)
        .event_handler(Handler::new(cfg))
        .await?;
    client.start().await?;

    Ok(())
}
