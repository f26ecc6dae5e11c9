//! Cast and crew data from an interchangeable filmography backend.
//!
//! Callers depend on [`FilmographyProvider`] only; [`ImdbBackend`] talks to a
//! free IMDb-compatible REST service and [`TmdbBackend`] to TMDB.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::config::{Config, ProviderKind};
use crate::error::Result;

mod client;
mod imdb;
mod tmdb;

pub use client::FilmographyClient;
pub use imdb::ImdbBackend;
pub use tmdb::TmdbBackend;

#[async_trait]
pub trait FilmographyProvider: Send + Sync {
    /// Short stable name, used in cache keys and logs.
    fn name(&self) -> &'static str;
    async fn search_person(&self, name: &str) -> Result<Vec<PersonRecord>>;
    async fn get_person_details(&self, id: &str) -> Result<PersonRecord>;
    async fn get_person_credits(&self, id: &str) -> Result<Vec<PersonCredit>>;
    async fn get_movie_details(&self, id: &str) -> Result<TitleRecord>;
    async fn get_title_credits(&self, id: &str) -> Result<Vec<TitleCredit>>;
    async fn search_titles(&self, query: &str) -> Result<Vec<TitleRecord>>;
}

/// Build the backend selected in configuration.
pub fn provider_from_config(config: &Config) -> Result<Arc<dyn FilmographyProvider>> {
    Ok(match config.provider {
        ProviderKind::Imdb => Arc::new(ImdbBackend::new(&config.imdb_base, config.secure_timeout)?),
        ProviderKind::Tmdb => Arc::new(TmdbBackend::new(
            &config.tmdb_base,
            config.tmdb_token.as_deref().unwrap_or_default(),
            config.secure_timeout,
        )?),
    })
}

/// A date that may only be known to the year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecisionDate {
    pub year: i32,
    pub month: Option<u32>,
    pub day: Option<u32>,
}

impl PrecisionDate {
    /// Parse `YYYY`, `YYYY-MM` or `YYYY-MM-DD`.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.trim().split('-');
        let year = parts.next()?.parse().ok()?;
        let month = parts.next().and_then(|m| m.parse().ok()).filter(|m| (1..=12).contains(m));
        let day = month
            .and(parts.next())
            .and_then(|d| d.parse().ok())
            .filter(|d| (1..=31).contains(d));
        Some(Self { year, month, day })
    }
}

impl fmt::Display for PrecisionDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.month, self.day) {
            (Some(m), Some(d)) => write!(f, "{:04}-{:02}-{:02}", self.year, m, d),
            (Some(m), None) => write!(f, "{:04}-{:02}", self.year, m),
            _ => write!(f, "{:04}", self.year),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RatingAggregate {
    pub value: f64,
    pub votes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersonRecord {
    pub id: String,
    pub name: String,
    pub biography: Option<String>,
    pub birth: Option<PrecisionDate>,
    pub death: Option<PrecisionDate>,
    pub birth_place: Option<String>,
    pub image_url: Option<String>,
    pub rating: Option<RatingAggregate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TitleRecord {
    pub id: String,
    pub title: String,
    pub year: Option<i32>,
    pub plot: Option<String>,
    pub image_url: Option<String>,
    pub runtime_minutes: Option<u32>,
    pub genres: Vec<String>,
    pub rating: Option<RatingAggregate>,
}

/// One title in a person's filmography.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersonCredit {
    pub title_id: String,
    pub title: String,
    pub year: Option<i32>,
    /// `actor`, `director`, `writer`...
    pub category: String,
    pub characters: Vec<String>,
    pub image_url: Option<String>,
    pub rating: Option<RatingAggregate>,
}

/// One person in a title's credits.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TitleCredit {
    pub person_id: String,
    pub name: String,
    pub category: String,
    pub characters: Vec<String>,
    pub image_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dates_at_every_precision() {
        assert_eq!(
            PrecisionDate::parse("1908-05-20"),
            Some(PrecisionDate {
                year: 1908,
                month: Some(5),
                day: Some(20)
            })
        );
        let partial = PrecisionDate::parse("1997").unwrap();
        assert_eq!(partial.month, None);
        assert_eq!(partial.to_string(), "1997");
        assert_eq!(PrecisionDate::parse("1997-13-01").unwrap().month, None);
        assert!(PrecisionDate::parse("").is_none());
        assert!(PrecisionDate::parse("unknown").is_none());
    }
}
