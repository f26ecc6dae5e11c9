use async_trait::async_trait;
use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{
    FilmographyProvider, PersonCredit, PersonRecord, PrecisionDate, RatingAggregate, TitleCredit,
    TitleRecord,
};
use crate::error::{Error, Result};
use crate::http::{decode_json, read_ok_body};

/// Keyless IMDb-compatible REST backend.
#[derive(Debug, Clone)]
pub struct ImdbBackend {
    client: Client,
    base: String,
}

impl ImdbBackend {
    pub fn new(base: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("rolecall/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::InvalidUrl(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = format!("{}{}", self.base, path);
        debug!(%url, "GET");
        let res = self
            .client
            .get(&url)
            .query(query)
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;
        let body = read_ok_body(res).await?;
        decode_json(path, &body)
    }
}

#[async_trait]
impl FilmographyProvider for ImdbBackend {
    fn name(&self) -> &'static str {
        "imdb"
    }

    async fn search_person(&self, _name: &str) -> Result<Vec<PersonRecord>> {
        Err(Error::Unsupported {
            provider: self.name(),
            operation: "person search",
        })
    }

    async fn get_person_details(&self, id: &str) -> Result<PersonRecord> {
        let path = format!("/names/{}", urlencoding::encode(id));
        let name: ImdbName = self.get_json(&path, &[]).await?;
        Ok(name.into())
    }

    async fn get_person_credits(&self, id: &str) -> Result<Vec<PersonCredit>> {
        let path = format!("/names/{}/filmography", urlencoding::encode(id));
        let data: FilmographyResponse = self.get_json(&path, &[]).await?;
        Ok(data
            .credits
            .into_iter()
            .map(|c| {
                let title: TitleRecord = c.title.into();
                PersonCredit {
                    title_id: title.id,
                    title: title.title,
                    year: title.year,
                    category: c.category.unwrap_or_default(),
                    characters: c.characters,
                    image_url: title.image_url,
                    rating: title.rating,
                }
            })
            .collect())
    }

    async fn get_movie_details(&self, id: &str) -> Result<TitleRecord> {
        let path = format!("/titles/{}", urlencoding::encode(id));
        let title: ImdbTitle = self.get_json(&path, &[]).await?;
        Ok(title.into())
    }

    async fn get_title_credits(&self, id: &str) -> Result<Vec<TitleCredit>> {
        let path = format!("/titles/{}/credits", urlencoding::encode(id));
        let data: TitleCreditsResponse = self.get_json(&path, &[]).await?;
        Ok(data
            .credits
            .into_iter()
            .map(|c| TitleCredit {
                person_id: c.name.id,
                name: c.name.display_name.unwrap_or_default(),
                category: c.category.unwrap_or_default(),
                characters: c.characters,
                image_url: c.name.primary_image.map(|i| i.url),
            })
            .collect())
    }

    async fn search_titles(&self, query: &str) -> Result<Vec<TitleRecord>> {
        let data: SearchResponse = self.get_json("/search/titles", &[("query", query)]).await?;
        Ok(data.titles.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug, Deserialize)]
struct ImdbImage {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ImdbDate {
    year: Option<i32>,
    month: Option<u32>,
    day: Option<u32>,
}

impl ImdbDate {
    fn into_precision(self) -> Option<PrecisionDate> {
        let year = self.year?;
        let month = self.month;
        Some(PrecisionDate {
            year,
            month,
            day: month.and(self.day),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImdbRating {
    aggregate_rating: Option<f64>,
    vote_count: Option<u64>,
}

impl ImdbRating {
    fn into_aggregate(self) -> Option<RatingAggregate> {
        Some(RatingAggregate {
            value: self.aggregate_rating?,
            votes: self.vote_count.unwrap_or(0),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImdbName {
    id: String,
    display_name: Option<String>,
    biography: Option<String>,
    birth_date: Option<ImdbDate>,
    death_date: Option<ImdbDate>,
    birth_location: Option<String>,
    primary_image: Option<ImdbImage>,
}

impl From<ImdbName> for PersonRecord {
    fn from(n: ImdbName) -> Self {
        PersonRecord {
            id: n.id,
            name: n.display_name.unwrap_or_default(),
            biography: n.biography.filter(|b| !b.trim().is_empty()),
            birth: n.birth_date.and_then(ImdbDate::into_precision),
            death: n.death_date.and_then(ImdbDate::into_precision),
            birth_place: n.birth_location,
            image_url: n.primary_image.map(|i| i.url),
            rating: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImdbTitle {
    id: String,
    primary_title: Option<String>,
    original_title: Option<String>,
    start_year: Option<i32>,
    plot: Option<String>,
    primary_image: Option<ImdbImage>,
    runtime_seconds: Option<u32>,
    #[serde(default)]
    genres: Vec<String>,
    rating: Option<ImdbRating>,
}

impl From<ImdbTitle> for TitleRecord {
    fn from(t: ImdbTitle) -> Self {
        TitleRecord {
            id: t.id,
            title: t.primary_title.or(t.original_title).unwrap_or_default(),
            year: t.start_year,
            plot: t.plot,
            image_url: t.primary_image.map(|i| i.url),
            runtime_minutes: t.runtime_seconds.map(|s| s / 60),
            genres: t.genres,
            rating: t.rating.and_then(ImdbRating::into_aggregate),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FilmographyResponse {
    #[serde(default)]
    credits: Vec<FilmographyCredit>,
}

#[derive(Debug, Deserialize)]
struct FilmographyCredit {
    title: ImdbTitle,
    category: Option<String>,
    #[serde(default)]
    characters: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TitleCreditsResponse {
    #[serde(default)]
    credits: Vec<CastCredit>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NameSummary {
    id: String,
    display_name: Option<String>,
    primary_image: Option<ImdbImage>,
}

#[derive(Debug, Deserialize)]
struct CastCredit {
    name: NameSummary,
    category: Option<String>,
    #[serde(default)]
    characters: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    titles: Vec<ImdbTitle>,
}
