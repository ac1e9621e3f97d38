#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use hmv_core::{Credential, PersistedSession};
use hmv_storage::{FetchError, SiteTransport};
use hmv_sync::{AuthenticatedTransport, HmvConfig, SessionManager};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    pub url: String,
    pub params: Vec<(String, String)>,
}

#[derive(Debug)]
enum Reply {
    Body(String),
    Status(u16),
}

/// Canned site: one reply per URL, every request recorded.
#[derive(Debug, Default)]
pub struct FakeSite {
    gets: Mutex<HashMap<String, Reply>>,
    posts: Mutex<HashMap<String, Reply>>,
    /// Cookie the site sets when a POST succeeds.
    post_cookie: Mutex<Option<String>>,
    /// Name/value pairs in insertion order, merged by name like a jar.
    cookies: Mutex<Vec<(String, String)>>,
    get_log: Mutex<Vec<Recorded>>,
    post_log: Mutex<Vec<Recorded>>,
}

impl FakeSite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_get(&self, url: &str, body: impl Into<String>) {
        self.gets
            .lock()
            .unwrap()
            .insert(url.to_string(), Reply::Body(body.into()));
    }

    pub fn on_get_status(&self, url: &str, status: u16) {
        self.gets
            .lock()
            .unwrap()
            .insert(url.to_string(), Reply::Status(status));
    }

    pub fn on_post(&self, url: &str, body: impl Into<String>, sets_cookie: Option<&str>) {
        self.posts
            .lock()
            .unwrap()
            .insert(url.to_string(), Reply::Body(body.into()));
        *self.post_cookie.lock().unwrap() = sets_cookie.map(ToString::to_string);
    }

    pub fn gets(&self) -> Vec<Recorded> {
        self.get_log.lock().unwrap().clone()
    }

    pub fn posts(&self) -> Vec<Recorded> {
        self.post_log.lock().unwrap().clone()
    }

    pub fn cookies(&self) -> Option<String> {
        let jar = self.cookies.lock().unwrap();
        if jar.is_empty() {
            return None;
        }
        Some(
            jar.iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    fn set_cookie(&self, pair: &str) {
        let Some((name, value)) = pair.trim().split_once('=') else {
            return;
        };
        let mut jar = self.cookies.lock().unwrap();
        match jar.iter_mut().find(|(existing, _)| existing == name) {
            Some(slot) => slot.1 = value.to_string(),
            None => jar.push((name.to_string(), value.to_string())),
        }
    }

    fn reply(map: &Mutex<HashMap<String, Reply>>, url: &str) -> Result<String, FetchError> {
        match map.lock().unwrap().get(url) {
            Some(Reply::Body(body)) => Ok(body.clone()),
            Some(Reply::Status(status)) => Err(FetchError::HttpStatus {
                status: *status,
                url: url.to_string(),
            }),
            None => Err(FetchError::HttpStatus {
                status: 404,
                url: url.to_string(),
            }),
        }
    }
}

#[async_trait]
impl SiteTransport for FakeSite {
    async fn get_text(
        &self,
        url: &str,
        query: &[(&str, String)],
        _timeout: Option<Duration>,
    ) -> Result<String, FetchError> {
        self.get_log.lock().unwrap().push(Recorded {
            url: url.to_string(),
            params: query
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        });
        Self::reply(&self.gets, url)
    }

    async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<String, FetchError> {
        self.post_log.lock().unwrap().push(Recorded {
            url: url.to_string(),
            params: form
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        });
        let body = Self::reply(&self.posts, url)?;
        if let Some(cookie) = self.post_cookie.lock().unwrap().clone() {
            self.set_cookie(&cookie);
        }
        Ok(body)
    }

    fn export_cookies(&self) -> Option<String> {
        self.cookies()
    }

    fn import_cookies(&self, cookies: &str) {
        for pair in cookies.split(';') {
            self.set_cookie(pair);
        }
    }

    fn clear_cookies(&self) {
        self.cookies.lock().unwrap().clear();
    }
}

pub fn fixture(relative: &str) -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .join("fixtures")
        .join(relative);
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("reading {}: {e}", path.display()))
}

pub fn saved_session() -> PersistedSession {
    PersistedSession {
        cookies: "PHPSESSID=saved".into(),
        captured_at: Utc.with_ymd_and_hms(2026, 1, 10, 8, 0, 0).single().unwrap(),
    }
}

pub async fn seed_profile(config: &HmvConfig, session: Option<&PersistedSession>) {
    config
        .credential_store()
        .save(&Credential::new("alice", "s3cret"))
        .await
        .unwrap();
    if let Some(session) = session {
        config.session_store().save(session).await.unwrap();
    }
}

/// Logged-in transport restored from a saved session; the machines page
/// serves the listing fixture, which carries the auth marker.
pub async fn authenticated(
    site: &Arc<FakeSite>,
    config: &HmvConfig,
) -> AuthenticatedTransport<Arc<FakeSite>> {
    seed_profile(config, Some(&saved_session())).await;
    site.on_get(&config.endpoints().machines, fixture("machines/listing.html"));
    SessionManager::from_config(Arc::clone(site), config)
        .obtain_session()
        .await
        .expect("session")
}
