//! Session handling and cache synchronisation for the HackMyVM client.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use hmv_core::{DOWNLOADS_ORIGIN, SITE_ORIGIN};
use hmv_storage::{
    package_file_name, AchievementCache, CredentialStore, HttpClientConfig, SessionStore,
    WriteupCache, DEFAULT_USER_AGENT,
};
use tokio::fs;

pub mod orchestrator;
pub mod session;
pub mod stats;

pub use orchestrator::{
    write_export, AchievementSyncReport, ExportFormat, FlagVerdict, ListingLevel, MachinePage,
    MachineQuery, SyncError, SyncOrchestrator, WriteupRefresh,
};
pub use session::{
    configure_credentials, AuthenticatedTransport, SessionError, SessionManager, SessionOrigin,
};
pub use stats::{recent_first, AchievementFilter, AchievementStats};

pub const CRATE_NAME: &str = "hmv-sync";

pub const DEFAULT_ACHIEVEMENTS_URL: &str =
    "https://raw.githubusercontent.com/Yanxinwu946/hmv-stats-scraper/main/data/achievements.csv";

const HOME_DIR_NAME: &str = ".hmv";

#[derive(Debug, Clone)]
pub struct HmvConfig {
    pub home_dir: PathBuf,
    pub base_url: String,
    pub downloads_url: String,
    pub achievements_url: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
}

impl HmvConfig {
    pub fn from_env() -> Result<Self> {
        let home_dir = match std::env::var("HMV_HOME") {
            Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
            _ => dirs::home_dir()
                .ok_or_else(|| anyhow!("cannot determine home directory; set HMV_HOME"))?
                .join(HOME_DIR_NAME),
        };
        Ok(Self {
            home_dir,
            base_url: std::env::var("HMV_BASE_URL").unwrap_or_else(|_| SITE_ORIGIN.to_string()),
            downloads_url: std::env::var("HMV_DOWNLOADS_URL")
                .unwrap_or_else(|_| DOWNLOADS_ORIGIN.to_string()),
            achievements_url: std::env::var("HMV_ACHIEVEMENTS_URL")
                .unwrap_or_else(|_| DEFAULT_ACHIEVEMENTS_URL.to_string()),
            user_agent: std::env::var("HMV_USER_AGENT")
                .unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string()),
            http_timeout_secs: std::env::var("HMV_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
        })
    }

    /// Defaults rooted at `home_dir`, ignoring the environment.
    pub fn with_home(home_dir: impl Into<PathBuf>) -> Self {
        Self {
            home_dir: home_dir.into(),
            base_url: SITE_ORIGIN.to_string(),
            downloads_url: DOWNLOADS_ORIGIN.to_string(),
            achievements_url: DEFAULT_ACHIEVEMENTS_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            http_timeout_secs: 10,
        }
    }

    pub async fn ensure_home_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.home_dir)
            .await
            .with_context(|| format!("creating {}", self.home_dir.display()))
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.home_dir.join("config.json")
    }

    pub fn session_path(&self) -> PathBuf {
        self.home_dir.join("session.json")
    }

    pub fn achievements_path(&self) -> PathBuf {
        self.home_dir.join("achievements.csv")
    }

    pub fn writeups_path(&self) -> PathBuf {
        self.home_dir.join("writeups.csv")
    }

    pub fn credential_store(&self) -> CredentialStore {
        CredentialStore::new(self.credentials_path())
    }

    pub fn session_store(&self) -> SessionStore {
        SessionStore::new(self.session_path())
    }

    pub fn achievement_cache(&self) -> AchievementCache {
        AchievementCache::new(self.achievements_path())
    }

    pub fn writeup_cache(&self) -> WriteupCache {
        WriteupCache::new(self.writeups_path())
    }

    pub fn endpoints(&self) -> SiteEndpoints {
        SiteEndpoints::new(&self.base_url, &self.downloads_url, &self.achievements_url)
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            cookie_origin: self.base_url.clone(),
        }
    }
}

/// Every remote URL the client talks to, derived from the configured origins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteEndpoints {
    pub login: String,
    pub machines: String,
    pub writeups: String,
    pub check_flag: String,
    pub downloads: String,
    pub achievements: String,
}

impl SiteEndpoints {
    pub fn new(base_url: &str, downloads_url: &str, achievements_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            login: format!("{base}/login/auth.php"),
            machines: format!("{base}/machines/"),
            writeups: format!("{base}/hmv/writeupz.php"),
            check_flag: format!("{base}/machines/checkflag.php"),
            downloads: downloads_url.trim_end_matches('/').to_string(),
            achievements: achievements_url.to_string(),
        }
    }

    pub fn package_url(&self, machine_name: &str) -> String {
        format!("{}/{}", self.downloads, package_file_name(machine_name))
    }
}

impl Default for SiteEndpoints {
    fn default() -> Self {
        Self::new(SITE_ORIGIN, DOWNLOADS_ORIGIN, DEFAULT_ACHIEVEMENTS_URL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_follow_base_url() {
        let endpoints = SiteEndpoints::new("http://127.0.0.1:8080/", "http://dl.local", "http://data/a.csv");
        assert_eq!(endpoints.login, "http://127.0.0.1:8080/login/auth.php");
        assert_eq!(endpoints.machines, "http://127.0.0.1:8080/machines/");
        assert_eq!(endpoints.writeups, "http://127.0.0.1:8080/hmv/writeupz.php");
        assert_eq!(endpoints.check_flag, "http://127.0.0.1:8080/machines/checkflag.php");
        assert_eq!(endpoints.package_url("Hidden Door"), "http://dl.local/hidden door.zip");
    }

    #[test]
    fn default_endpoints_target_the_public_site() {
        let endpoints = SiteEndpoints::default();
        assert_eq!(endpoints.machines, "https://hackmyvm.eu/machines/");
        assert_eq!(endpoints.package_url("Gift"), "https://downloads.hackmyvm.eu/gift.zip");
    }

    #[test]
    fn state_files_live_under_home_dir() {
        let config = HmvConfig::with_home("/tmp/hmv-test");
        assert_eq!(config.credentials_path(), PathBuf::from("/tmp/hmv-test/config.json"));
        assert_eq!(config.session_path(), PathBuf::from("/tmp/hmv-test/session.json"));
        assert_eq!(config.achievements_path(), PathBuf::from("/tmp/hmv-test/achievements.csv"));
        assert_eq!(config.writeups_path(), PathBuf::from("/tmp/hmv-test/writeups.csv"));
        assert_eq!(config.http_client_config().timeout, Duration::from_secs(10));
    }
}
