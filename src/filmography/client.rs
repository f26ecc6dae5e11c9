use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{FilmographyProvider, PersonCredit, PersonRecord, TitleCredit, TitleRecord};
use crate::cache::{CacheConfig, TtlCache};
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

/// Provider-agnostic front door: caching, retries and the alternate lookup
/// path for backends without person search.
pub struct FilmographyClient {
    provider: Arc<dyn FilmographyProvider>,
    retry: RetryPolicy,
    people: Mutex<TtlCache<String, PersonRecord>>,
    person_credits: Mutex<TtlCache<String, Vec<PersonCredit>>>,
    titles: Mutex<TtlCache<String, TitleRecord>>,
    title_credits: Mutex<TtlCache<String, Vec<TitleCredit>>>,
}

impl FilmographyClient {
    pub fn new(provider: Arc<dyn FilmographyProvider>, cache: CacheConfig, retry: RetryPolicy) -> Self {
        Self {
            provider,
            retry,
            people: Mutex::new(TtlCache::new(cache)),
            person_credits: Mutex::new(TtlCache::new(cache)),
            titles: Mutex::new(TtlCache::new(cache)),
            title_credits: Mutex::new(TtlCache::new(cache)),
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    fn key(&self, endpoint: &str, id: &str) -> String {
        format!("{}:{}/{}", self.provider.name(), endpoint, id)
    }

    /// Serve from `cache` while fresh; otherwise fetch with retries and store
    /// the decoded value. Nothing is written when the fetch fails or is
    /// cancelled.
    async fn cached<V, F, Fut>(
        &self,
        cache: &Mutex<TtlCache<String, V>>,
        key: String,
        cancel: &CancellationToken,
        fetch: F,
    ) -> Result<V>
    where
        V: Clone,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        if let Some(hit) = cache.lock().await.get(&key) {
            debug!(%key, "Filmography cache hit");
            return Ok(hit);
        }
        let value = self.retry.execute(cancel, fetch).await?;
        cache.lock().await.put(key, value.clone());
        Ok(value)
    }

    pub async fn fetch_person(&self, id: &str, cancel: &CancellationToken) -> Result<PersonRecord> {
        let key = self.key("names", id);
        self.cached(&self.people, key, cancel, || self.provider.get_person_details(id))
            .await
    }

    pub async fn fetch_person_credits(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<PersonCredit>> {
        let key = self.key("names/filmography", id);
        self.cached(&self.person_credits, key, cancel, || {
            self.provider.get_person_credits(id)
        })
        .await
    }

    pub async fn fetch_title(&self, id: &str, cancel: &CancellationToken) -> Result<TitleRecord> {
        let key = self.key("titles", id);
        self.cached(&self.titles, key, cancel, || self.provider.get_movie_details(id))
            .await
    }

    pub async fn fetch_title_credits(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<TitleCredit>> {
        let key = self.key("titles/credits", id);
        self.cached(&self.title_credits, key, cancel, || {
            self.provider.get_title_credits(id)
        })
        .await
    }

    /// Zero hits is an empty list.
    pub async fn search_titles(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<TitleRecord>> {
        self.retry
            .execute(cancel, || self.provider.search_titles(query))
            .await
    }

    /// Find the person behind a cast name.
    ///
    /// Uses name search when the backend has it. Otherwise, given the IMDb id
    /// of a title the person appears in, matches the name against that
    /// title's credits. `Ok(None)` when nobody matches.
    pub async fn resolve_person(
        &self,
        name: &str,
        title_hint: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Option<PersonRecord>> {
        let searched = self
            .retry
            .execute(cancel, || self.provider.search_person(name))
            .await;
        match searched {
            Ok(hits) => {
                let best = hits
                    .iter()
                    .find(|p| same_name(&p.name, name))
                    .or_else(|| hits.first());
                match best {
                    Some(person) => Ok(Some(self.fetch_person(&person.id, cancel).await?)),
                    None => Ok(None),
                }
            }
            Err(err @ Error::Unsupported { .. }) => {
                let Some(title_id) = title_hint else {
                    return Err(err);
                };
                info!(
                    provider = self.provider.name(),
                    %title_id,
                    "Name search unavailable, matching against title credits"
                );
                let credits = self.fetch_title_credits(title_id, cancel).await?;
                match credits.iter().find(|c| same_name(&c.name, name)) {
                    Some(credit) => {
                        let id = credit.person_id.clone();
                        Ok(Some(self.fetch_person(&id, cancel).await?))
                    }
                    None => Ok(None),
                }
            }
            Err(err) => Err(err),
        }
    }
}

fn same_name(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}
