use std::env;
use std::sync::Arc;

use guild_warden::{Data, Error, commands, handlers, logging};
use poise::serenity_prelude::{self as serenity};
use serenity::GatewayIntents;
use tracing::info;

/// Sweeper pass interval for expiring sanctions
const SWEEP_INTERVAL_SECONDS: u64 = 15;

/// Main function to run the bot
async fn async_main() -> Result<(), Error> {
    // Initialize logging
    logging::init()?;

    // Load environment variables
    let token = env::var("DISCORD_TOKEN")?;

    // Load guild configs and sanction records from disk
    let data = Data::load().await;

    // Configure the Poise framework
    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![
                commands::ping(),
                commands::mute(),
                commands::release(),
                commands::sanctions(),
            ],
            pre_command: |ctx| {
                Box::pin(async move {
                    // Log the start of command execution
                    logging::log_command_start(ctx);
                })
            },
            post_command: |ctx| {
                Box::pin(async move {
                    // Log the end of command execution
                    logging::log_command_end(ctx);
                })
            },
            on_error: |error| {
                Box::pin(async move {
                    // Log the error using our logging system
                    logging::log_command_error(&error);
                })
            },
            ..Default::default()
        })
        .setup({
            let data = data.clone();
            move |ctx, _ready, framework| {
                Box::pin(async move {
                    logging::log_console("Registering commands".to_string());
                    poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                    // Reconcile active sanctions against the live guild state
                    // and start the expiry sweeper
                    data.sanctions
                        .reconcile_and_start(Arc::clone(&ctx.http), SWEEP_INTERVAL_SECONDS);

                    Ok(data)
                })
            }
        })
        .build();

    // Configure the Serenity client; privileged intents cover member and
    // moderation events
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::GUILD_MODERATION
        | GatewayIntents::GUILD_VOICE_STATES;
    let mut client = serenity::ClientBuilder::new(token, intents)
        .event_handler(handlers::Handler::new(data))
        .framework(framework)
        .await?;

    info!("Starting bot...");
    // Start the bot
    if let Err(err) = client.start().await {
        eprintln!("Error starting the bot: {err}");
    }

    Ok(())
}

fn main() {
    // Run the async main function
    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map(|rt| rt.block_on(async_main()));

    // Handle any errors that occurred during execution
    match result {
        Ok(Ok(())) => {}
        Ok(Err(err)) => eprintln!("Error: {err}"),
        Err(err) => eprintln!("Error: failed to build runtime: {err}"),
    }
}
