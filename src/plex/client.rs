use reqwest::{header, Client};
use std::net::Ipv6Addr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::metadata::{parse_movie_metadata, MovieMetadata};
use super::server::{parse_server_info, ServerInfo};
use super::sessions::{parse_sessions, Session};
use crate::config::{Config, PRODUCT_NAME};
use crate::error::{Error, Result};
use crate::http::read_ok_body;
use crate::retry::RetryPolicy;

const DEFAULT_PORT: u16 = 32400;

/// One way of reaching the media server, tried in list order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transport {
    pub label: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl Transport {
    pub fn new(label: impl Into<String>, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            label: label.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    /// Build the transport list for a user-entered server address.
    ///
    /// A bare host (optionally with a port) yields HTTPS first and, only when
    /// `allow_insecure_fallback` is set, plain HTTP second. An address that
    /// already names its scheme is used as-is.
    pub fn for_server(address: &str, config: &Config) -> Result<Vec<Transport>> {
        let address = address.trim().trim_end_matches('/');
        if address.is_empty() {
            return Err(Error::InvalidUrl("no Plex server address configured".to_string()));
        }

        if let Some(rest) = address.strip_prefix("https://") {
            return Ok(vec![Transport::new(
                "secure",
                format!("https://{}", rest),
                config.secure_timeout,
            )]);
        }
        if let Some(rest) = address.strip_prefix("http://") {
            return Ok(vec![Transport::new(
                "insecure",
                format!("http://{}", rest),
                config.local_timeout,
            )]);
        }
        if address.contains("://") {
            return Err(Error::InvalidUrl(format!(
                "unsupported scheme in server address '{}'",
                address
            )));
        }

        let authority = if let Ok(ip) = address.parse::<Ipv6Addr>() {
            format!("[{}]:{}", ip, DEFAULT_PORT)
        } else if !address.starts_with('[') && address.matches(':').count() > 1 {
            return Err(Error::InvalidUrl(format!(
                "IPv6 server address '{}' must be written as [address]:port",
                address
            )));
        } else if has_port(address) {
            address.to_string()
        } else {
            format!("{}:{}", address, DEFAULT_PORT)
        };
        let mut transports = vec![Transport::new(
            "secure",
            format!("https://{}", authority),
            config.secure_timeout,
        )];
        if config.allow_insecure_fallback {
            transports.push(Transport::new(
                "insecure",
                format!("http://{}", authority),
                config.local_timeout,
            ));
        }
        Ok(transports)
    }
}

fn has_port(authority: &str) -> bool {
    // Bracketed IPv6 keeps its colons inside the brackets.
    let host_end = authority.rfind(']').map(|i| i + 1).unwrap_or(0);
    authority[host_end..]
        .rsplit_once(':')
        .map(|(_, port)| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
}

/// Name the endpoint a malformed body came from.
fn parse_failure(path: &str, err: Error) -> Error {
    warn!(endpoint = path, error = %err, "Could not parse Plex response");
    match err {
        Error::Parse(detail) => Error::decode(path, detail),
        other => other,
    }
}

#[derive(Debug, Clone)]
pub struct PlexClient {
    client: Client,
    client_id: String,
    retry: RetryPolicy,
}

impl PlexClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.local_timeout)
            .user_agent(format!("rolecall/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::InvalidUrl(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            client_id: config.client_id.clone(),
            retry: config.retry,
        })
    }

    pub async fn fetch_sessions(
        &self,
        transports: &[Transport],
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Session>> {
        let body = self
            .get_xml("/status/sessions", transports, token, cancel)
            .await?;
        let sessions = parse_sessions(&body).map_err(|e| parse_failure("/status/sessions", e))?;
        info!("Fetched {} active session(s)", sessions.len());
        Ok(sessions)
    }

    /// `Ok(None)` when the server knows no item with that key.
    pub async fn fetch_movie_metadata(
        &self,
        transports: &[Transport],
        token: &str,
        rating_key: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<MovieMetadata>> {
        let path = format!("/library/metadata/{}", urlencoding::encode(rating_key));
        let body = self.get_xml(&path, transports, token, cancel).await?;
        let mut items = parse_movie_metadata(&body).map_err(|e| parse_failure(&path, e))?;
        if items.is_empty() {
            debug!(rating_key, "Metadata lookup returned no items");
            return Ok(None);
        }
        Ok(Some(items.swap_remove(0)))
    }

    pub async fn fetch_server_info(
        &self,
        transports: &[Transport],
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<ServerInfo> {
        let body = self.get_xml("/", transports, token, cancel).await?;
        parse_server_info(&body).map_err(|e| parse_failure("/", e))
    }

    /// Try each transport in order. A 401 ends the walk immediately; any
    /// other failure moves on to the next transport.
    async fn get_xml(
        &self,
        path: &str,
        transports: &[Transport],
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let mut last_err = None;
        for (index, transport) in transports.iter().enumerate() {
            let url = format!("{}{}", transport.base_url, path);
            let outcome = self
                .retry
                .execute(cancel, || self.get_once(&url, transport, token))
                .await;
            match outcome {
                Ok(body) => {
                    if index > 0 {
                        warn!(transport = %transport.label, "Plex reached through fallback transport");
                    }
                    return Ok(body);
                }
                Err(Error::Unauthorized) => {
                    warn!(%url, "Plex rejected the token");
                    return Err(Error::Unauthorized);
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(err) => {
                    warn!(transport = %transport.label, %url, error = %err, "Plex request failed");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| Error::InvalidUrl("no Plex transports configured".to_string())))
    }

    async fn get_once(&self, url: &str, transport: &Transport, token: &str) -> Result<Vec<u8>> {
        debug!(%url, transport = %transport.label, "GET");
        let res = self
            .client
            .get(url)
            .query(&[("X-Plex-Token", token)])
            .header(header::ACCEPT, "application/xml")
            .header("X-Plex-Product", PRODUCT_NAME)
            .header("X-Plex-Client-Identifier", &self.client_id)
            .timeout(transport.timeout)
            .send()
            .await?;
        read_ok_body(res).await
    }
}
