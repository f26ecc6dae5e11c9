//! The orchestrating client: owns credentials, the Plex and filmography
//! clients, and the last-known snapshot of every Plex resource.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::{
    AuthSession, LogHandoff, PinApi, PinFlow, PinState, PlexAuthClient, SettingsStore,
};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::filmography::{
    provider_from_config, FilmographyClient, FilmographyProvider, PersonCredit, PersonRecord,
    TitleCredit, TitleRecord,
};
use crate::plex::{MovieMetadata, PlexClient, ServerInfo, Session, Transport};

/// Latest published value of one Plex resource plus the cancellation slot of
/// its in-flight fetch. Starting a fetch bumps the generation and cancels the
/// previous one; only the current generation may publish.
struct Tracked<T> {
    latest: watch::Sender<Option<T>>,
    inflight: Mutex<Inflight>,
}

struct Inflight {
    generation: u64,
    cancel: CancellationToken,
}

impl<T: Clone> Tracked<T> {
    fn new() -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            latest,
            inflight: Mutex::new(Inflight {
                generation: 0,
                cancel: CancellationToken::new(),
            }),
        }
    }

    fn begin(&self, parent: &CancellationToken) -> (u64, CancellationToken) {
        let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        inflight.cancel.cancel();
        inflight.generation += 1;
        inflight.cancel = parent.child_token();
        (inflight.generation, inflight.cancel.clone())
    }

    /// Cancel whatever is in flight without starting anything new.
    fn abandon(&self) {
        let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        inflight.cancel.cancel();
        inflight.generation += 1;
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inflight
            .lock()
            .map(|i| i.generation == generation)
            .unwrap_or(false)
    }

    /// Publish `value` if `generation` is still current. The generation check
    /// and the publish happen under the same lock.
    fn publish(&self, generation: u64, value: T) -> bool {
        self.publish_with(generation, value, |_| {})
    }

    /// Like `publish`, running `also` on the value while the generation is
    /// still held.
    fn publish_with(&self, generation: u64, value: T, also: impl FnOnce(&T)) -> bool {
        let inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        if inflight.generation != generation {
            return false;
        }
        also(&value);
        self.latest.send_replace(Some(value));
        true
    }

    fn reset(&self) {
        self.latest.send_replace(None);
    }

    fn latest(&self) -> Option<T> {
        self.latest.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Option<T>> {
        self.latest.subscribe()
    }
}

/// One `Tracked` slot per key, so fetches of different items neither
/// supersede each other nor share a snapshot. `latest` follows whichever
/// item was published last.
struct TrackedByKey<T> {
    slots: Mutex<HashMap<String, Arc<Tracked<T>>>>,
    latest: watch::Sender<Option<T>>,
}

impl<T: Clone> TrackedByKey<T> {
    fn new() -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            slots: Mutex::new(HashMap::new()),
            latest,
        }
    }

    fn slot(&self, key: &str) -> Arc<Tracked<T>> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            slots
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Tracked::new())),
        )
    }

    fn get(&self, key: &str) -> Option<T> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.get(key).and_then(|slot| slot.latest())
    }

    fn announce(&self, value: &T) {
        self.latest.send_replace(Some(value.clone()));
    }

    fn abandon(&self) {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        for slot in slots.values() {
            slot.abandon();
        }
    }

    fn reset(&self) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        for slot in slots.values() {
            slot.reset();
        }
        slots.clear();
        self.latest.send_replace(None);
    }

    fn subscribe(&self) -> watch::Receiver<Option<T>> {
        self.latest.subscribe()
    }
}

pub struct RoleCall {
    config: Config,
    plex: PlexClient,
    filmography: FilmographyClient,
    settings: Arc<dyn SettingsStore>,
    auth: RwLock<AuthSession>,
    pin: PinFlow,
    login_task: Mutex<Option<CancellationToken>>,
    shutdown: CancellationToken,
    sessions: Tracked<Vec<Session>>,
    metadata: TrackedByKey<MovieMetadata>,
    server: Tracked<ServerInfo>,
}

impl RoleCall {
    /// Production wiring: backend and PIN client built from `config`.
    pub fn from_config(config: Config, settings: Arc<dyn SettingsStore>) -> Result<Self> {
        let provider = provider_from_config(&config)?;
        let pins = Arc::new(PlexAuthClient::new(&config)?);
        Self::new(config, provider, pins, settings)
    }

    pub fn new(
        config: Config,
        provider: Arc<dyn FilmographyProvider>,
        pins: Arc<dyn PinApi>,
        settings: Arc<dyn SettingsStore>,
    ) -> Result<Self> {
        let plex = PlexClient::new(&config)?;
        let filmography = FilmographyClient::new(provider, config.cache, config.retry);
        let pin = PinFlow::new(
            pins,
            Arc::new(LogHandoff),
            config.pin_poll_interval,
            config.pin_max_attempts,
        );

        let mut auth = AuthSession::load(settings.as_ref());
        if let Some(server) = &config.plex_server {
            auth.server_ip = server.clone();
        }
        if let Some(token) = &config.plex_token {
            auth.token = token.clone();
            auth.token_expiry = None;
        }
        info!(
            server = %auth.server_ip,
            authenticated = auth.is_valid(),
            provider = filmography.provider_name(),
            "RoleCall client ready"
        );

        Ok(Self {
            config,
            plex,
            filmography,
            settings,
            auth: RwLock::new(auth),
            pin,
            login_task: Mutex::new(None),
            shutdown: CancellationToken::new(),
            sessions: Tracked::new(),
            metadata: TrackedByKey::new(),
            server: Tracked::new(),
        })
    }

    /// Cancel every in-flight request and login attempt.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    // ---- credentials ----

    pub async fn auth_session(&self) -> AuthSession {
        self.auth.read().await.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.auth.read().await.is_valid()
    }

    pub async fn set_server(&self, address: &str) -> Result<()> {
        // Reject addresses no transport can be built from.
        Transport::for_server(address, &self.config)?;
        let mut auth = self.auth.write().await;
        auth.server_ip = address.trim().to_string();
        auth.save(self.settings.as_ref());
        info!(server = %auth.server_ip, "Plex server address updated");
        Ok(())
    }

    pub async fn logout(&self) {
        self.cancel_login();
        self.sessions.abandon();
        self.metadata.abandon();
        self.server.abandon();
        {
            let mut auth = self.auth.write().await;
            auth.clear();
            auth.save(self.settings.as_ref());
        }
        self.sessions.reset();
        self.metadata.reset();
        self.server.reset();
        self.pin.reset();
        info!("Logged out");
    }

    /// Transports and token for the current credentials.
    async fn credentials(&self) -> Result<(Vec<Transport>, String)> {
        let auth = self.auth.read().await;
        if !auth.is_valid() {
            return Err(Error::Unauthorized);
        }
        let transports = Transport::for_server(&auth.server_ip, &self.config)?;
        Ok((transports, auth.token.clone()))
    }

    /// Drop the token the server just rejected, unless a newer one already
    /// replaced it. The server address is kept for the next sign-in.
    async fn invalidate(&self, rejected: &str) {
        let mut auth = self.auth.write().await;
        if auth.token != rejected {
            return;
        }
        warn!("Plex token rejected, clearing credentials");
        auth.token.clear();
        auth.token_expiry = None;
        auth.save(self.settings.as_ref());
    }

    async fn settle<T: Clone>(
        &self,
        slot: &Tracked<T>,
        generation: u64,
        token: &str,
        outcome: Result<T>,
    ) -> Result<T> {
        match outcome {
            Ok(value) => {
                if slot.publish(generation, value.clone()) {
                    Ok(value)
                } else {
                    debug!("Discarding superseded result");
                    Err(Error::Superseded)
                }
            }
            Err(_) if !slot.is_current(generation) => Err(Error::Superseded),
            Err(Error::Unauthorized) => {
                self.invalidate(token).await;
                Err(Error::Unauthorized)
            }
            Err(err) => Err(err),
        }
    }

    // ---- Plex resources ----

    pub async fn fetch_sessions(&self) -> Result<Vec<Session>> {
        let (transports, token) = self.credentials().await?;
        let (generation, cancel) = self.sessions.begin(&self.shutdown);
        let outcome = self.plex.fetch_sessions(&transports, &token, &cancel).await;
        self.settle(&self.sessions, generation, &token, outcome).await
    }

    /// `Ok(None)` when the server has no item under `rating_key`; the
    /// previous snapshot is kept in that case. Only fetches of the same
    /// `rating_key` supersede each other.
    pub async fn fetch_movie_metadata(&self, rating_key: &str) -> Result<Option<MovieMetadata>> {
        let (transports, token) = self.credentials().await?;
        let slot = self.metadata.slot(rating_key);
        let (generation, cancel) = slot.begin(&self.shutdown);
        let outcome = self
            .plex
            .fetch_movie_metadata(&transports, &token, rating_key, &cancel)
            .await;
        match outcome {
            Ok(None) if slot.is_current(generation) => Ok(None),
            Ok(None) => Err(Error::Superseded),
            Ok(Some(item)) => {
                let published =
                    slot.publish_with(generation, item.clone(), |v| self.metadata.announce(v));
                if published {
                    Ok(Some(item))
                } else {
                    debug!(rating_key, "Discarding superseded metadata");
                    Err(Error::Superseded)
                }
            }
            Err(err) => self
                .settle(&*slot, generation, &token, Err(err))
                .await
                .map(Some),
        }
    }

    pub async fn fetch_server_info(&self) -> Result<ServerInfo> {
        let (transports, token) = self.credentials().await?;
        let (generation, cancel) = self.server.begin(&self.shutdown);
        let outcome = self.plex.fetch_server_info(&transports, &token, &cancel).await;
        self.settle(&self.server, generation, &token, outcome).await
    }

    pub fn last_sessions(&self) -> Option<Vec<Session>> {
        self.sessions.latest()
    }

    /// Last metadata fetched for `rating_key`.
    pub fn last_metadata(&self, rating_key: &str) -> Option<MovieMetadata> {
        self.metadata.get(rating_key)
    }

    pub fn last_server_info(&self) -> Option<ServerInfo> {
        self.server.latest()
    }

    pub fn subscribe_sessions(&self) -> watch::Receiver<Option<Vec<Session>>> {
        self.sessions.subscribe()
    }

    /// Every metadata record as it is published, whatever its key.
    pub fn subscribe_metadata(&self) -> watch::Receiver<Option<MovieMetadata>> {
        self.metadata.subscribe()
    }

    pub fn subscribe_server(&self) -> watch::Receiver<Option<ServerInfo>> {
        self.server.subscribe()
    }

    // ---- filmography ----

    pub fn provider_name(&self) -> &'static str {
        self.filmography.provider_name()
    }

    pub async fn fetch_filmography_person(&self, id: &str) -> Result<PersonRecord> {
        self.filmography.fetch_person(id, &self.shutdown).await
    }

    pub async fn fetch_person_credits(&self, id: &str) -> Result<Vec<PersonCredit>> {
        self.filmography.fetch_person_credits(id, &self.shutdown).await
    }

    pub async fn fetch_title(&self, id: &str) -> Result<TitleRecord> {
        self.filmography.fetch_title(id, &self.shutdown).await
    }

    pub async fn fetch_title_credits(&self, id: &str) -> Result<Vec<TitleCredit>> {
        self.filmography.fetch_title_credits(id, &self.shutdown).await
    }

    pub async fn search_titles(&self, query: &str) -> Result<Vec<TitleRecord>> {
        self.filmography.search_titles(query, &self.shutdown).await
    }

    pub async fn resolve_person(
        &self,
        name: &str,
        title_hint: Option<&str>,
    ) -> Result<Option<PersonRecord>> {
        self.filmography
            .resolve_person(name, title_hint, &self.shutdown)
            .await
    }

    // ---- sign-in ----

    pub fn login_state(&self) -> PinState {
        self.pin.state()
    }

    pub fn subscribe_login(&self) -> watch::Receiver<PinState> {
        self.pin.subscribe()
    }

    /// Run the PIN flow to completion and store the resulting token.
    pub async fn login(&self, cancel: &CancellationToken) -> Result<()> {
        let token = self.pin.run(cancel).await?;
        let mut auth = self.auth.write().await;
        // A logout or newer attempt may have landed while the lock was taken.
        if cancel.is_cancelled() {
            debug!("Discarding token from a cancelled sign-in");
            return Err(Error::Cancelled);
        }
        auth.token = token;
        auth.token_expiry = None;
        auth.save(self.settings.as_ref());
        info!("Signed in to Plex");
        Ok(())
    }

    /// Start a sign-in in the background, replacing any earlier attempt, and
    /// return once the PIN is issued (or requesting it failed).
    pub async fn begin_login(self: &Arc<Self>) -> PinState {
        let cancel = self.shutdown.child_token();
        let previous = self
            .login_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(cancel.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }
        self.pin.reset();

        let mut states = self.pin.subscribe();
        let service = Arc::clone(self);
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = service.login(&task_cancel).await {
                debug!(error = %err, "Background sign-in ended");
            }
        });

        let issued = states
            .wait_for(|state| cancel.is_cancelled() || !matches!(state, PinState::Idle))
            .await
            .map(|state| (*state).clone());
        issued.unwrap_or(PinState::Idle)
    }

    /// `true` when a sign-in attempt was running.
    pub fn cancel_login(&self) -> bool {
        let running = self.login_task.lock().unwrap_or_else(|e| e.into_inner()).take();
        match running {
            Some(cancel) => {
                cancel.cancel();
                true
            }
            None => false,
        }
    }
}
