//! Fetch a Plex resource and print what the parser made of it.
//! Usage:
//!   cargo run --bin plex_props -- server
//!   cargo run --bin plex_props -- sessions
//!   cargo run --bin plex_props -- movie <rating_key>
//! Requires PLEX_SERVER and PLEX_TOKEN in the environment (.env supported).

use anyhow::{Context, Result};
use dotenvy::dotenv;
use rolecall::config::Config;
use rolecall::plex::{PlexClient, Transport};
use serde_json::json;
use std::env;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: cargo run --bin plex_props -- server");
        eprintln!("       cargo run --bin plex_props -- sessions");
        eprintln!("       cargo run --bin plex_props -- movie <rating_key>");
        std::process::exit(1);
    }

    let config = Config::from_env()?;
    let server = config.plex_server.clone().context("PLEX_SERVER not set")?;
    let token = config.plex_token.clone().context("PLEX_TOKEN not set")?;
    let transports = Transport::for_server(&server, &config)?;
    for t in &transports {
        eprintln!("transport {}: {}", t.label, t.base_url);
    }
    let client = PlexClient::new(&config)?;
    let cancel = CancellationToken::new();

    let output = match args[1].as_str() {
        "server" => json!(client.fetch_server_info(&transports, &token, &cancel).await?),
        "sessions" => json!(client.fetch_sessions(&transports, &token, &cancel).await?),
        "movie" => {
            let key = args
                .get(2)
                .ok_or_else(|| anyhow::anyhow!("missing rating key for movie"))?;
            match client
                .fetch_movie_metadata(&transports, &token, key, &cancel)
                .await?
            {
                Some(item) => json!({
                    "imdb": item.imdb_id(),
                    "movie": item,
                }),
                None => json!(null),
            }
        }
        other => anyhow::bail!("unknown resource '{}'", other),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
