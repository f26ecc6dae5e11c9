use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{Config, PRODUCT_NAME};
use crate::error::{Error, Result};
use crate::http::{decode_json, read_success_body};

/// A PIN as plex.tv reports it. `token` is set once the user approves it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinAuthorization {
    pub id: u64,
    pub code: String,
    pub token: Option<String>,
}

impl PinAuthorization {
    pub fn is_authorized(&self) -> bool {
        self.token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

#[async_trait]
pub trait PinApi: Send + Sync {
    async fn request_pin(&self) -> Result<PinAuthorization>;
    async fn check_pin(&self, id: u64) -> Result<PinAuthorization>;
    /// Page the user opens to approve `pin`.
    fn auth_url(&self, pin: &PinAuthorization) -> String;
}

/// Hands the approval page to the user: a browser, a QR code, a log line.
pub trait AuthHandoff: Send + Sync {
    fn open(&self, url: &str);
}

/// Prints the approval link to the log for headless setups.
#[derive(Debug, Default)]
pub struct LogHandoff;

impl AuthHandoff for LogHandoff {
    fn open(&self, url: &str) {
        info!("Open this link to approve sign-in: {}", url);
    }
}

#[derive(Debug, Clone)]
pub struct PlexAuthClient {
    client: Client,
    base: String,
    auth_app_url: String,
    client_id: String,
}

impl PlexAuthClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.secure_timeout)
            .user_agent(format!("rolecall/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::InvalidUrl(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base: config.plex_tv_base.trim_end_matches('/').to_string(),
            auth_app_url: config.auth_app_url.clone(),
            client_id: config.client_id.clone(),
        })
    }

    fn with_plex_headers(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header(header::ACCEPT, "application/json")
            .header("X-Plex-Product", PRODUCT_NAME)
            .header("X-Plex-Client-Identifier", &self.client_id)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PinResponse {
    id: u64,
    code: String,
    auth_token: Option<String>,
}

impl From<PinResponse> for PinAuthorization {
    fn from(p: PinResponse) -> Self {
        PinAuthorization {
            id: p.id,
            code: p.code,
            token: p.auth_token,
        }
    }
}

#[async_trait]
impl PinApi for PlexAuthClient {
    async fn request_pin(&self) -> Result<PinAuthorization> {
        let url = format!("{}/pins", self.base);
        debug!(%url, "POST");
        let req = self.client.post(&url).query(&[("strong", "true")]);
        let res = self.with_plex_headers(req).send().await?;
        let body = read_success_body(res).await?;
        let pin: PinResponse = decode_json("pins", &body)?;
        Ok(pin.into())
    }

    async fn check_pin(&self, id: u64) -> Result<PinAuthorization> {
        let url = format!("{}/pins/{}", self.base, id);
        debug!(%url, "GET");
        let res = self.with_plex_headers(self.client.get(&url)).send().await?;
        let body = read_success_body(res).await?;
        let pin: PinResponse = decode_json("pins/{id}", &body)?;
        Ok(pin.into())
    }

    fn auth_url(&self, pin: &PinAuthorization) -> String {
        format!(
            "{}#?clientID={}&code={}&{}={}",
            self.auth_app_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&pin.code),
            urlencoding::encode("context[device][product]"),
            urlencoding::encode(PRODUCT_NAME),
        )
    }
}

/// Observable progress of a sign-in attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PinState {
    Idle,
    PinRequested { code: String, auth_url: String },
    Polling { attempt: u32, max_attempts: u32 },
    Authorized,
    TimedOut,
    Failed { message: String },
}

/// Requests a PIN, hands its approval link off, then polls until plex.tv
/// reports a token or the attempt budget runs out.
pub struct PinFlow {
    api: Arc<dyn PinApi>,
    handoff: Arc<dyn AuthHandoff>,
    interval: Duration,
    max_attempts: u32,
    state: watch::Sender<PinState>,
    /// Bumped by every `run` and `reset`; only the newest attempt publishes.
    attempt: AtomicU64,
}

impl PinFlow {
    pub fn new(
        api: Arc<dyn PinApi>,
        handoff: Arc<dyn AuthHandoff>,
        interval: Duration,
        max_attempts: u32,
    ) -> Self {
        let (state, _) = watch::channel(PinState::Idle);
        Self {
            api,
            handoff,
            interval,
            max_attempts,
            state,
            attempt: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PinState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> PinState {
        self.state.borrow().clone()
    }

    /// Return to `Idle`, silencing any attempt still running.
    pub fn reset(&self) {
        self.attempt.fetch_add(1, Ordering::SeqCst);
        self.state.send_replace(PinState::Idle);
    }

    /// Publish `next` unless a newer attempt owns the state. The ownership
    /// check runs under the channel's lock.
    fn publish(&self, attempt: u64, next: PinState) {
        self.state.send_if_modified(|state| {
            if self.attempt.load(Ordering::SeqCst) != attempt {
                return false;
            }
            *state = next;
            true
        });
    }

    /// Run one sign-in attempt to completion and return the token.
    ///
    /// Poll failures are logged and polling continues; only the attempt
    /// budget or `cancel` end the loop early. Starting a run takes the
    /// published state over from any earlier one.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<String> {
        let owner = self.attempt.fetch_add(1, Ordering::SeqCst) + 1;
        let pin = tokio::select! {
            biased;
            _ = cancel.cancelled() => return self.cancelled(owner),
            pin = self.api.request_pin() => pin,
        };
        let pin = match pin {
            Ok(pin) => pin,
            Err(err) => {
                warn!(error = %err, "Could not request a sign-in PIN");
                self.publish(
                    owner,
                    PinState::Failed {
                        message: err.user_message(),
                    },
                );
                return Err(err);
            }
        };

        let auth_url = self.api.auth_url(&pin);
        info!(pin_id = pin.id, "Sign-in PIN issued");
        self.publish(
            owner,
            PinState::PinRequested {
                code: pin.code.clone(),
                auth_url: auth_url.clone(),
            },
        );
        self.handoff.open(&auth_url);

        for attempt in 1..=self.max_attempts {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.cancelled(owner),
                _ = tokio::time::sleep(self.interval) => {}
            }
            self.publish(
                owner,
                PinState::Polling {
                    attempt,
                    max_attempts: self.max_attempts,
                },
            );
            let checked = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.cancelled(owner),
                checked = self.api.check_pin(pin.id) => checked,
            };
            match checked {
                Ok(status) if status.is_authorized() => {
                    info!(attempt, "Sign-in approved");
                    self.publish(owner, PinState::Authorized);
                    return Ok(status.token.unwrap_or_default());
                }
                Ok(_) => debug!(attempt, "PIN not approved yet"),
                Err(err) => warn!(attempt, error = %err, "PIN status check failed"),
            }
        }

        warn!(attempts = self.max_attempts, "Sign-in was not approved in time");
        self.publish(owner, PinState::TimedOut);
        Err(Error::PinTimedOut {
            attempts: self.max_attempts,
        })
    }

    fn cancelled(&self, owner: u64) -> Result<String> {
        info!("Sign-in cancelled");
        self.publish(owner, PinState::Idle);
        Err(Error::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportKind;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;

    /// Approves the PIN on check number `approve_on`; fails check
    /// `fail_on` with a network error.
    struct FakePins {
        checks: AtomicU32,
        approve_on: Option<u32>,
        fail_on: Option<u32>,
    }

    impl FakePins {
        fn new(approve_on: Option<u32>, fail_on: Option<u32>) -> Self {
            Self {
                checks: AtomicU32::new(0),
                approve_on,
                fail_on,
            }
        }
    }

    #[async_trait]
    impl PinApi for FakePins {
        async fn request_pin(&self) -> Result<PinAuthorization> {
            Ok(PinAuthorization {
                id: 42,
                code: "ABCD".to_string(),
                token: None,
            })
        }

        async fn check_pin(&self, id: u64) -> Result<PinAuthorization> {
            let n = self.checks.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on == Some(n) {
                return Err(Error::transport(TransportKind::ConnectionLost, "reset"));
            }
            let token = (self.approve_on == Some(n)).then(|| "plex-token".to_string());
            Ok(PinAuthorization {
                id,
                code: "ABCD".to_string(),
                token,
            })
        }

        fn auth_url(&self, pin: &PinAuthorization) -> String {
            format!("https://auth.test/#?code={}", pin.code)
        }
    }

    #[derive(Default)]
    struct RecordingHandoff {
        opened: Mutex<Vec<String>>,
    }

    impl AuthHandoff for RecordingHandoff {
        fn open(&self, url: &str) {
            self.opened.lock().unwrap().push(url.to_string());
        }
    }

    fn flow(api: Arc<FakePins>, handoff: Arc<RecordingHandoff>, max_attempts: u32) -> PinFlow {
        PinFlow::new(api, handoff, Duration::from_secs(1), max_attempts)
    }

    #[tokio::test(start_paused = true)]
    async fn returns_token_once_approved() {
        let api = Arc::new(FakePins::new(Some(3), None));
        let handoff = Arc::new(RecordingHandoff::default());
        let flow = flow(api.clone(), handoff.clone(), 10);

        let token = flow.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(token, "plex-token");
        assert_eq!(api.checks.load(Ordering::SeqCst), 3);
        assert_eq!(flow.state(), PinState::Authorized);
        assert_eq!(
            handoff.opened.lock().unwrap().as_slice(),
            ["https://auth.test/#?code=ABCD"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_after_exactly_max_attempts() {
        let api = Arc::new(FakePins::new(None, None));
        let flow = flow(api.clone(), Arc::new(RecordingHandoff::default()), 5);
        let start = tokio::time::Instant::now();

        let err = flow.run(&CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, Error::PinTimedOut { attempts: 5 }));
        assert_eq!(api.checks.load(Ordering::SeqCst), 5);
        assert_eq!(start.elapsed(), Duration::from_secs(5));
        assert_eq!(flow.state(), PinState::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_polling_through_check_failures() {
        let api = Arc::new(FakePins::new(Some(2), Some(1)));
        let flow = flow(api.clone(), Arc::new(RecordingHandoff::default()), 5);

        let token = flow.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(token, "plex-token");
        assert_eq!(api.checks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_before_next_poll() {
        let api = Arc::new(FakePins::new(None, None));
        let flow = Arc::new(flow(api.clone(), Arc::new(RecordingHandoff::default()), 10));
        let cancel = CancellationToken::new();

        let handle = {
            let flow = flow.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { flow.run(&cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(2500)).await;
        cancel.cancel();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(api.checks.load(Ordering::SeqCst), 2);
        assert_eq!(flow.state(), PinState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_attempt_leaves_a_newer_one_in_charge() {
        let api = Arc::new(FakePins::new(None, None));
        let flow = Arc::new(flow(api, Arc::new(RecordingHandoff::default()), 10));
        let first_cancel = CancellationToken::new();

        let first = {
            let flow = flow.clone();
            let cancel = first_cancel.clone();
            tokio::spawn(async move { flow.run(&cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let second = {
            let flow = flow.clone();
            tokio::spawn(async move { flow.run(&CancellationToken::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(matches!(flow.state(), PinState::PinRequested { .. }));

        first_cancel.cancel();
        let err = first.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(matches!(flow.state(), PinState::PinRequested { .. }));

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(
            flow.state(),
            PinState::Polling {
                attempt: 1,
                max_attempts: 10
            }
        );
        second.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn reset_silences_a_running_attempt() {
        let api = Arc::new(FakePins::new(None, None));
        let flow = Arc::new(flow(api, Arc::new(RecordingHandoff::default()), 10));
        let running = {
            let flow = flow.clone();
            tokio::spawn(async move { flow.run(&CancellationToken::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(500)).await;
        flow.reset();

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(flow.state(), PinState::Idle);
        running.abort();
    }

    #[test]
    fn approval_url_carries_client_and_code() {
        let auth = PlexAuthClient::new(&Config::default()).unwrap();
        let url = auth.auth_url(&PinAuthorization {
            id: 1,
            code: "x y".to_string(),
            token: None,
        });
        assert!(url.starts_with("https://app.plex.tv/auth#?clientID=rolecall&code=x%20y&"));
        assert!(url.ends_with("context%5Bdevice%5D%5Bproduct%5D=RoleCall"));
    }
}
