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

const PROFILE_BASE: &str = "https://image.tmdb.org/t/p/w185";
const POSTER_BASE: &str = "https://image.tmdb.org/t/p/w342";

/// Legacy TMDB backend, authenticated with a v4 read access token.
#[derive(Debug, Clone)]
pub struct TmdbBackend {
    client: Client,
    base: String,
    token: String,
}

impl TmdbBackend {
    pub fn new(base: &str, token: &str, timeout: Duration) -> Result<Self> {
        if token.trim().is_empty() {
            return Err(Error::InvalidUrl("TMDB access token is empty".to_string()));
        }
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("rolecall/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::InvalidUrl(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = format!("{}{}", self.base, path);
        debug!(%url, "GET");
        let res = self
            .client
            .get(&url)
            .query(&[("language", "en-US")])
            .query(query)
            .bearer_auth(&self.token)
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;
        let body = read_ok_body(res).await?;
        decode_json(path, &body)
    }
}

#[async_trait]
impl FilmographyProvider for TmdbBackend {
    fn name(&self) -> &'static str {
        "tmdb"
    }

    async fn search_person(&self, name: &str) -> Result<Vec<PersonRecord>> {
        let data: SearchResponse<PersonSummary> =
            self.get_json("/search/person", &[("query", name)]).await?;
        Ok(data
            .results
            .into_iter()
            .map(|p| PersonRecord {
                id: p.id.to_string(),
                name: p.name,
                biography: None,
                birth: None,
                death: None,
                birth_place: None,
                image_url: image(PROFILE_BASE, p.profile_path),
                rating: None,
            })
            .collect())
    }

    async fn get_person_details(&self, id: &str) -> Result<PersonRecord> {
        let path = format!("/person/{}", urlencoding::encode(id));
        let p: PersonDetail = self.get_json(&path, &[]).await?;
        Ok(PersonRecord {
            id: p.id.to_string(),
            name: p.name,
            biography: p.biography.filter(|b| !b.trim().is_empty()),
            birth: p.birthday.as_deref().and_then(PrecisionDate::parse),
            death: p.deathday.as_deref().and_then(PrecisionDate::parse),
            birth_place: p.place_of_birth,
            image_url: image(PROFILE_BASE, p.profile_path),
            rating: None,
        })
    }

    async fn get_person_credits(&self, id: &str) -> Result<Vec<PersonCredit>> {
        let path = format!("/person/{}/movie_credits", urlencoding::encode(id));
        let data: PersonCredits = self.get_json(&path, &[]).await?;
        let cast = data.cast.into_iter().map(|c| PersonCredit {
            title_id: c.id.to_string(),
            title: c.title,
            year: year_of(c.release_date.as_deref()),
            category: "actor".to_string(),
            characters: c.character.into_iter().filter(|s| !s.is_empty()).collect(),
            image_url: image(POSTER_BASE, c.poster_path),
            rating: rating(c.vote_average, c.vote_count),
        });
        let crew = data.crew.into_iter().map(|c| PersonCredit {
            title_id: c.id.to_string(),
            title: c.title,
            year: year_of(c.release_date.as_deref()),
            category: c.job.unwrap_or_default().to_lowercase(),
            characters: Vec::new(),
            image_url: image(POSTER_BASE, c.poster_path),
            rating: rating(c.vote_average, c.vote_count),
        });
        Ok(cast.chain(crew).collect())
    }

    async fn get_movie_details(&self, id: &str) -> Result<TitleRecord> {
        let path = format!("/movie/{}", urlencoding::encode(id));
        let m: MovieDetail = self.get_json(&path, &[]).await?;
        Ok(TitleRecord {
            id: m.id.to_string(),
            title: m.title,
            year: year_of(m.release_date.as_deref()),
            plot: m.overview.filter(|o| !o.is_empty()),
            image_url: image(POSTER_BASE, m.poster_path),
            runtime_minutes: m.runtime,
            genres: m.genres.into_iter().map(|g| g.name).collect(),
            rating: rating(m.vote_average, m.vote_count),
        })
    }

    async fn get_title_credits(&self, id: &str) -> Result<Vec<TitleCredit>> {
        let path = format!("/movie/{}/credits", urlencoding::encode(id));
        let data: MovieCredits = self.get_json(&path, &[]).await?;
        let cast = data.cast.into_iter().map(|c| TitleCredit {
            person_id: c.id.to_string(),
            name: c.name,
            category: "actor".to_string(),
            characters: c.character.into_iter().filter(|s| !s.is_empty()).collect(),
            image_url: image(PROFILE_BASE, c.profile_path),
        });
        let crew = data.crew.into_iter().map(|c| TitleCredit {
            person_id: c.id.to_string(),
            name: c.name,
            category: c.job.unwrap_or_default().to_lowercase(),
            characters: Vec::new(),
            image_url: image(PROFILE_BASE, c.profile_path),
        });
        Ok(cast.chain(crew).collect())
    }

    async fn search_titles(&self, query: &str) -> Result<Vec<TitleRecord>> {
        let data: SearchResponse<MovieSummary> =
            self.get_json("/search/movie", &[("query", query)]).await?;
        Ok(data
            .results
            .into_iter()
            .map(|m| TitleRecord {
                id: m.id.to_string(),
                title: m.title,
                year: year_of(m.release_date.as_deref()),
                plot: m.overview.filter(|o| !o.is_empty()),
                image_url: image(POSTER_BASE, m.poster_path),
                runtime_minutes: None,
                genres: Vec::new(),
                rating: rating(m.vote_average, m.vote_count),
            })
            .collect())
    }
}

fn image(base: &str, path: Option<String>) -> Option<String> {
    path.filter(|p| !p.is_empty()).map(|p| format!("{base}{p}"))
}

fn year_of(date: Option<&str>) -> Option<i32> {
    date.and_then(PrecisionDate::parse).map(|d| d.year)
}

fn rating(average: Option<f64>, count: Option<u64>) -> Option<RatingAggregate> {
    match (average, count) {
        (Some(value), Some(votes)) if votes > 0 => Some(RatingAggregate { value, votes }),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct PersonSummary {
    id: i64,
    name: String,
    profile_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PersonDetail {
    id: i64,
    name: String,
    biography: Option<String>,
    birthday: Option<String>,
    deathday: Option<String>,
    place_of_birth: Option<String>,
    profile_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PersonCredits {
    #[serde(default)]
    cast: Vec<MovieCastCredit>,
    #[serde(default)]
    crew: Vec<MovieCrewCredit>,
}

#[derive(Debug, Deserialize)]
struct MovieCastCredit {
    id: i64,
    title: String,
    character: Option<String>,
    release_date: Option<String>,
    poster_path: Option<String>,
    vote_average: Option<f64>,
    vote_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct MovieCrewCredit {
    id: i64,
    title: String,
    job: Option<String>,
    release_date: Option<String>,
    poster_path: Option<String>,
    vote_average: Option<f64>,
    vote_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Genre {
    name: String,
}

#[derive(Debug, Deserialize)]
struct MovieDetail {
    id: i64,
    title: String,
    overview: Option<String>,
    release_date: Option<String>,
    runtime: Option<u32>,
    poster_path: Option<String>,
    #[serde(default)]
    genres: Vec<Genre>,
    vote_average: Option<f64>,
    vote_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct MovieSummary {
    id: i64,
    title: String,
    overview: Option<String>,
    release_date: Option<String>,
    poster_path: Option<String>,
    vote_average: Option<f64>,
    vote_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct MovieCredits {
    #[serde(default)]
    cast: Vec<CastMember>,
    #[serde(default)]
    crew: Vec<CrewMember>,
}

#[derive(Debug, Deserialize)]
struct CastMember {
    id: i64,
    name: String,
    character: Option<String>,
    profile_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CrewMember {
    id: i64,
    name: String,
    job: Option<String>,
    profile_path: Option<String>,
}
