//! # fitcha
//!
//! Terminal front end for the Fitcha realtime client.
//!
//! - `fitcha tail` (default): mount every list and print change events as
//!   JSON lines until Ctrl+C
//! - `fitcha send <conversation-id> <message>`: post into a conversation
//! - `fitcha badges`: print the current badge counts
//! - `fitcha topics`: print the realtime channels currently joined
//!
//! Configuration comes from the environment (see `ClientConfig`); a `.env`
//! file in the working directory is loaded first.

use anyhow::{bail, Context};
use tokio::sync::broadcast;
use tracing::{info, warn};

use fitcha_client_lib::{init_tracing, ClientConfig, FitchaClient};
use fitcha_shared::constants::APP_NAME;
use fitcha_shared::types::ConversationId;

const USAGE: &str = "usage: fitcha [tail | send <conversation-id> <message> | badges | topics]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is normal outside development.
    let _ = dotenvy::dotenv();
    init_tracing();

    info!("Starting {} client v{}", APP_NAME, env!("CARGO_PKG_VERSION"));

    let config = ClientConfig::from_env();
    info!(
        url = %config.url,
        signed_in = config.access_token.is_some(),
        heartbeat = ?config.heartbeat,
        "Loaded configuration"
    );

    let args: Vec<String> = std::env::args().skip(1).collect();
    let client = FitchaClient::new(config).context("could not build the client")?;

    let result = tokio::select! {
        result = run(&client, &args) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            Ok(())
        }
    };

    client.shutdown();
    result
}

async fn run(client: &FitchaClient, args: &[String]) -> anyhow::Result<()> {
    let command = args.first().map(String::as_str).unwrap_or("tail");
    match command {
        "tail" => tail(client).await,
        "send" => {
            let (Some(id), Some(body)) = (args.get(1), args.get(2..).filter(|words| !words.is_empty())) else {
                bail!(USAGE);
            };
            let conversation_id: ConversationId =
                id.parse().with_context(|| format!("invalid conversation id {id}"))?;
            send(client, conversation_id, &body.join(" ")).await
        }
        "badges" => {
            client.start().await;
            let counts = client.badges().current();
            println!("{}", serde_json::to_string(&counts)?);
            Ok(())
        }
        "topics" => {
            client.start().await;
            for key in client.realtime_topics().await? {
                println!("{key}");
            }
            Ok(())
        }
        other => bail!("unknown command {other:?}\n{USAGE}"),
    }
}

async fn tail(client: &FitchaClient) -> anyhow::Result<()> {
    let mut events = client.events().subscribe();
    client.start().await;
    if client.identity().current_id().is_none() {
        warn!("Not signed in, set FITCHA_ACCESS_TOKEN to see your data");
    }

    loop {
        match events.recv().await {
            Ok(event) => println!("{}", serde_json::to_string(&event)?),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event printer fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => return Ok(()),
        }
    }
}

async fn send(
    client: &FitchaClient,
    conversation_id: ConversationId,
    body: &str,
) -> anyhow::Result<()> {
    client.start().await;
    let thread = &client.containers().thread;
    thread.open(Some(conversation_id)).await;
    let message = thread.send(body).await?;
    info!(conversation = %conversation_id, message = %message.message_id, "Message sent");
    Ok(())
}
