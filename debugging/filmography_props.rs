//! Query the configured filmography backend and print the mapped records.
//! Usage:
//!   cargo run --bin filmography_props -- person <id>
//!   cargo run --bin filmography_props -- credits <person_id>
//!   cargo run --bin filmography_props -- title <id>
//!   cargo run --bin filmography_props -- cast <title_id>
//!   cargo run --bin filmography_props -- search <query>
//!   cargo run --bin filmography_props -- resolve <name> [title_id]
//! FILMOGRAPHY_PROVIDER picks the backend (imdb by default; tmdb needs
//! TMDB_ACCESS_TOKEN). .env supported.

use anyhow::Result;
use dotenvy::dotenv;
use rolecall::config::Config;
use rolecall::filmography::{provider_from_config, FilmographyClient};
use serde_json::{json, Value};
use std::env;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: cargo run --bin filmography_props -- <person|credits|title|cast|search> <id or query>");
        eprintln!("       cargo run --bin filmography_props -- resolve <name> [title_id]");
        std::process::exit(1);
    }

    let config = Config::from_env()?;
    let provider = provider_from_config(&config)?;
    let client = FilmographyClient::new(provider, config.cache, config.retry);
    eprintln!("provider: {}", client.provider_name());
    let cancel = CancellationToken::new();
    let arg = args[2].as_str();

    let output: Value = match args[1].as_str() {
        "person" => json!(client.fetch_person(arg, &cancel).await?),
        "credits" => json!(client.fetch_person_credits(arg, &cancel).await?),
        "title" => json!(client.fetch_title(arg, &cancel).await?),
        "cast" => json!(client.fetch_title_credits(arg, &cancel).await?),
        "search" => json!(client.search_titles(arg, &cancel).await?),
        "resolve" => {
            let hint = args.get(3).map(String::as_str);
            json!(client.resolve_person(arg, hint, &cancel).await?)
        }
        other => anyhow::bail!("unknown query '{}'", other),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
