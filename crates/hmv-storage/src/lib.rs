//! HTTP transport, per-user state files and local caches for the HackMyVM client.

use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::HeaderValue;
use reqwest::{StatusCode, Url};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info_span, Instrument};
use uuid::Uuid;

pub mod cache;
pub mod download;
pub mod profile;

pub use cache::{
    file_needs_refresh, needs_refresh, AchievementCache, CacheRecord, FreshnessPolicy,
    IncrementalCacheStore, SnapshotCacheStore, WriteupCache,
};
pub use download::{download_package, package_file_name, DownloadError, DownloadOutcome};
pub use profile::{CredentialStore, SessionStore};

pub const CRATE_NAME: &str = "hmv-storage";

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    /// Origin whose cookies are exported into and restored from the session file.
    pub cookie_origin: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: Some(DEFAULT_USER_AGENT.to_string()),
            cookie_origin: hmv_core::SITE_ORIGIN.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// The network capability the session manager and orchestrator depend on.
///
/// Implementations keep a cookie store so that a successful login (or a
/// restored session) authenticates every later request made through the
/// same value.
#[async_trait]
pub trait SiteTransport: Send + Sync {
    /// GET `url` with `query` appended; returns the body of a 2xx response.
    async fn get_text(
        &self,
        url: &str,
        query: &[(&str, String)],
        timeout: Option<Duration>,
    ) -> Result<String, FetchError>;

    /// POST an urlencoded form, following redirects; returns the final 2xx body.
    async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<String, FetchError>;

    /// Current cookies for the site origin as a `Cookie` header value.
    fn export_cookies(&self) -> Option<String>;

    /// Seeds the cookie store from a previously exported header value.
    fn import_cookies(&self, cookies: &str);

    /// Forgets every cookie, as if the transport had just been built.
    fn clear_cookies(&self);
}

#[async_trait]
impl<T: SiteTransport + ?Sized> SiteTransport for Arc<T> {
    async fn get_text(
        &self,
        url: &str,
        query: &[(&str, String)],
        timeout: Option<Duration>,
    ) -> Result<String, FetchError> {
        (**self).get_text(url, query, timeout).await
    }

    async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<String, FetchError> {
        (**self).post_form(url, form).await
    }

    fn export_cookies(&self) -> Option<String> {
        (**self).export_cookies()
    }

    fn import_cookies(&self, cookies: &str) {
        (**self).import_cookies(cookies)
    }

    fn clear_cookies(&self) {
        (**self).clear_cookies()
    }
}

/// Cookie jar that can be emptied while the client still holds it.
#[derive(Debug, Default)]
struct SessionJar(RwLock<Jar>);

impl SessionJar {
    fn add_cookie_str(&self, cookie: &str, url: &Url) {
        if let Ok(jar) = self.0.read() {
            jar.add_cookie_str(cookie, url);
        }
    }

    fn reset(&self) {
        if let Ok(mut jar) = self.0.write() {
            *jar = Jar::default();
        }
    }
}

impl CookieStore for SessionJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        if let Ok(jar) = self.0.read() {
            jar.set_cookies(cookie_headers, url);
        }
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        self.0.read().ok()?.cookies(url)
    }
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    jar: Arc<SessionJar>,
    cookie_origin: Url,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let cookie_origin = Url::parse(&config.cookie_origin)
            .with_context(|| format!("parsing cookie origin {}", config.cookie_origin))?;
        let jar = Arc::new(SessionJar::default());
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .cookie_provider(Arc::clone(&jar))
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            jar,
            cookie_origin,
        })
    }

    async fn read_success_body(resp: reqwest::Response) -> Result<String, FetchError> {
        let status = resp.status();
        let final_url = resp.url().to_string();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }
        Ok(resp.text().await?)
    }
}

#[async_trait]
impl SiteTransport for HttpFetcher {
    async fn get_text(
        &self,
        url: &str,
        query: &[(&str, String)],
        timeout: Option<Duration>,
    ) -> Result<String, FetchError> {
        let span = info_span!("http_fetch", method = "GET", url);
        async {
            let mut request = self.client.get(url).query(query);
            if let Some(timeout) = timeout {
                request = request.timeout(timeout);
            }
            let resp = request.send().await?;
            Self::read_success_body(resp).await
        }
        .instrument(span)
        .await
    }

    async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<String, FetchError> {
        let span = info_span!("http_fetch", method = "POST", url);
        async {
            let resp = self.client.post(url).form(form).send().await?;
            Self::read_success_body(resp).await
        }
        .instrument(span)
        .await
    }

    fn export_cookies(&self) -> Option<String> {
        self.jar
            .cookies(&self.cookie_origin)
            .and_then(|value| value.to_str().ok().map(ToString::to_string))
            .filter(|value| !value.trim().is_empty())
    }

    fn import_cookies(&self, cookies: &str) {
        for pair in cookies.split(';').map(str::trim).filter(|p| p.contains('=')) {
            self.jar.add_cookie_str(pair, &self.cookie_origin);
        }
    }

    fn clear_cookies(&self) {
        self.jar.reset();
    }
}

pub fn is_redirect(status: StatusCode) -> bool {
    matches!(status, StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND)
}

/// Replaces `path` with `bytes` via a sibling temp file and rename.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::path::PathBuf::from("."),
    };
    fs::create_dir_all(&parent)
        .await
        .with_context(|| format!("creating directory {}", parent.display()))?;

    let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .with_context(|| format!("opening temp file {}", temp_path.display()))?;
    file.write_all(bytes)
        .await
        .with_context(|| format!("writing temp file {}", temp_path.display()))?;
    file.flush()
        .await
        .with_context(|| format!("flushing temp file {}", temp_path.display()))?;
    drop(file);

    match fs::rename(&temp_path, path).await {
        Ok(()) => Ok(()),
        Err(err) => {
            let _ = fs::remove_file(&temp_path).await;
            Err(err).with_context(|| {
                format!(
                    "atomically renaming {} -> {}",
                    temp_path.display(),
                    path.display()
                )
            })
        }
    }
}
