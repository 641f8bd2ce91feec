use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::cookie::Jar;
use thiserror::Error;
use url::Url;

use crate::config::Config;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("failed to build http client: {0}")]
    Setup(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// A full page navigation.
    Document,
    /// A partial-update call against an AJAX behaviour (refresher, loot claim).
    Ajax,
}

/// One fetched response. Non-200 statuses are data, not errors; the caller
/// decides whether a status aborts the step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub status: u16,
    pub body: String,
    pub final_url: String,
}

impl Page {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// The authenticated channel to the game server. Implementations keep cookies
/// across calls; callers never authenticate through it.
#[async_trait]
pub trait HttpSession: Send + Sync {
    async fn get(&self, url: &str, kind: RequestKind) -> Result<Page, SessionError>;
}

/// Cookie-bearing reqwest client seeded from a profile's cookie header.
pub struct GameSession {
    client: reqwest::Client,
    base_url: Url,
    cookie: String,
    user_agent: String,
    timeout: Duration,
}

impl GameSession {
    pub fn new(config: &Config) -> Result<Self, SessionError> {
        let client = build_client(
            &config.base_url,
            &config.cookie,
            &config.user_agent,
            config.request_timeout,
        )?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            cookie: config.cookie.clone(),
            user_agent: config.user_agent.clone(),
            timeout: config.request_timeout,
        })
    }

    /// Drop all server-issued cookies and start again from the configured ones.
    pub fn reset(&mut self) -> Result<(), SessionError> {
        self.client = build_client(&self.base_url, &self.cookie, &self.user_agent, self.timeout)?;
        tracing::info!("http session reset for {}", self.base_url);
        Ok(())
    }
}

fn build_client(
    base_url: &Url,
    cookie: &str,
    user_agent: &str,
    timeout: Duration,
) -> Result<reqwest::Client, SessionError> {
    let jar = Arc::new(Jar::default());
    for pair in cookie.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        jar.add_cookie_str(pair, base_url);
    }

    reqwest::Client::builder()
        .cookie_provider(jar)
        .user_agent(user_agent)
        .timeout(timeout)
        .build()
        .map_err(|e| SessionError::Setup(e.to_string()))
}

fn classify(url: &str, err: reqwest::Error) -> SessionError {
    if err.is_timeout() {
        SessionError::Timeout { url: url.to_string() }
    } else {
        SessionError::Request { url: url.to_string(), reason: err.to_string() }
    }
}

#[async_trait]
impl HttpSession for GameSession {
    async fn get(&self, url: &str, kind: RequestKind) -> Result<Page, SessionError> {
        let mut request = self.client.get(url);
        if kind == RequestKind::Ajax {
            request = request
                .header("X-Requested-With", "XMLHttpRequest")
                .header("Wicket-Ajax", "true")
                .header("Accept", "text/xml");
        }

        let response = request.send().await.map_err(|e| classify(url, e))?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response.text().await.map_err(|e| classify(url, e))?;

        tracing::debug!("GET {url} -> {status} ({} bytes)", body.len());

        Ok(Page { status, body, final_url })
    }
}
