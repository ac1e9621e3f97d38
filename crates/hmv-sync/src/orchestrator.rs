//! Fetch, extract and cache coordination for every remote data source.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use hmv_adapters::{
    extract_achievements, extract_machines, extract_writeups, parse_document, resolve_page_count,
    ExtractError,
};
use hmv_core::{AchievementRecord, Difficulty, ExportedMachine, MachineRecord, WriteupRecord};
use hmv_storage::{
    write_atomic, AchievementCache, FetchError, FreshnessPolicy, SiteTransport, WriteupCache,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::session::AuthenticatedTransport;
use crate::{HmvConfig, SiteEndpoints};

const WRITEUP_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error("invalid page number {page}; must be between 1 and {total}")]
    InvalidPage { page: u32, total: u32 },
    #[error("cache error: {0:#}")]
    Cache(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AchievementSyncReport {
    pub start_id: u64,
    /// Remote records above `start_id`.
    pub fetched: usize,
    pub skipped_rows: usize,
    pub appended: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteupRefresh {
    /// The snapshot is inside its freshness window; nothing was fetched.
    Fresh,
    Refreshed(usize),
    /// The page parsed but held no writeups; the existing snapshot was kept.
    EmptyFetch,
    Failed(String),
}

/// Server-side listing category (`l` query parameter).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingLevel {
    Easy,
    Medium,
    Hard,
    Windows,
    Linux,
    Size,
    Hacked,
    All,
}

impl ListingLevel {
    pub const NAMES: [&'static str; 8] = [
        "easy", "medium", "hard", "windows", "linux", "size", "hacked", "all",
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
            Self::Windows => "windows",
            Self::Linux => "linux",
            Self::Size => "size",
            Self::Hacked => "hacked",
            Self::All => "all",
        }
    }
}

impl FromStr for ListingLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(Self::Easy),
            "medium" => Ok(Self::Medium),
            "hard" => Ok(Self::Hard),
            "windows" => Ok(Self::Windows),
            "linux" => Ok(Self::Linux),
            "size" => Ok(Self::Size),
            "hacked" => Ok(Self::Hacked),
            "all" => Ok(Self::All),
            other => Err(format!(
                "unknown level `{other}` (expected one of: {})",
                Self::NAMES.join(", ")
            )),
        }
    }
}

impl fmt::Display for ListingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct MachineQuery {
    pub page: u32,
    pub level: Option<ListingLevel>,
    pub name: Option<String>,
    pub tag: Option<String>,
    /// Applied locally after extraction.
    pub difficulty: Option<Difficulty>,
}

impl Default for MachineQuery {
    fn default() -> Self {
        Self {
            page: 1,
            level: None,
            name: None,
            tag: None,
            difficulty: None,
        }
    }
}

impl MachineQuery {
    fn params(&self, page: u32) -> Vec<(&'static str, String)> {
        let mut params = vec![("p", page.to_string())];
        if let Some(level) = self.level {
            params.push(("l", level.as_str().to_string()));
        }
        if let Some(name) = self.name.as_deref().filter(|n| !n.trim().is_empty()) {
            params.push(("v", name.trim().to_string()));
        }
        if let Some(tag) = self.tag.as_deref().filter(|t| !t.trim().is_empty()) {
            params.push(("t", tag.trim().to_string()));
        }
        params
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachinePage {
    pub machines: Vec<MachineRecord>,
    pub page: u32,
    pub total_pages: u32,
    pub skipped_rows: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagVerdict {
    Correct,
    Wrong,
    Unknown,
}

impl FlagVerdict {
    pub fn from_response(body: &str) -> Self {
        let body = body.to_lowercase();
        if body.contains("wrong") {
            Self::Wrong
        } else if body.contains("correct") {
            Self::Correct
        } else {
            Self::Unknown
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn default_file_name(&self) -> &'static str {
        match self {
            Self::Json => "machines.json",
            Self::Csv => "machines.csv",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(format!("unknown export format `{other}` (expected json or csv)")),
        }
    }
}

#[derive(Serialize)]
struct ExportDocument<'a> {
    total_machines: usize,
    machines: &'a [ExportedMachine],
}

/// Writes the numbered listing to `path` in the requested format.
pub async fn write_export(
    machines: &[ExportedMachine],
    format: ExportFormat,
    path: &Path,
) -> anyhow::Result<()> {
    let bytes = match format {
        ExportFormat::Json => serde_json::to_vec_pretty(&ExportDocument {
            total_machines: machines.len(),
            machines,
        })
        .context("serializing machine export")?,
        ExportFormat::Csv => {
            let mut writer = csv::Writer::from_writer(Vec::new());
            for machine in machines {
                writer.serialize(machine).context("serializing export row")?;
            }
            writer
                .into_inner()
                .map_err(|err| anyhow!("flushing csv buffer: {}", err.error()))?
        }
    };
    write_atomic(path, &bytes).await?;
    info!(path = %path.display(), machines = machines.len(), "export written");
    Ok(())
}

pub struct SyncOrchestrator {
    endpoints: SiteEndpoints,
    achievements: AchievementCache,
    writeups: WriteupCache,
    freshness: FreshnessPolicy,
}

impl SyncOrchestrator {
    pub fn new(
        endpoints: SiteEndpoints,
        achievements: AchievementCache,
        writeups: WriteupCache,
    ) -> Self {
        Self {
            endpoints,
            achievements,
            writeups,
            freshness: FreshnessPolicy::daily(),
        }
    }

    pub fn from_config(config: &HmvConfig) -> Self {
        Self::new(
            config.endpoints(),
            config.achievement_cache(),
            config.writeup_cache(),
        )
    }

    pub fn endpoints(&self) -> &SiteEndpoints {
        &self.endpoints
    }

    pub async fn has_achievements(&self) -> bool {
        self.achievements.exists().await
    }

    /// Appends dataset records above `start_override` (or the cached last id).
    pub async fn sync_achievements<T: SiteTransport>(
        &self,
        transport: &T,
        start_override: Option<u64>,
    ) -> Result<AchievementSyncReport, SyncError> {
        let start_id = match start_override {
            Some(id) => id,
            None => self.achievements.last_id().await,
        };
        info!(start_id, url = %self.endpoints.achievements, "syncing achievement dataset");

        let body = transport
            .get_text(&self.endpoints.achievements, &[], None)
            .await?;
        let extraction = extract_achievements(&body)?;
        let mut fresh: Vec<AchievementRecord> = extraction
            .records
            .into_iter()
            .filter(|record| record.id > start_id)
            .collect();
        fresh.sort_by_key(|record| record.id);

        let appended = self.achievements.append(&fresh).await?;
        info!(
            fetched = fresh.len(),
            appended,
            skipped = extraction.skipped,
            "achievement sync complete"
        );
        Ok(AchievementSyncReport {
            start_id,
            fetched: fresh.len(),
            skipped_rows: extraction.skipped,
            appended,
        })
    }

    pub async fn read_achievements(&self) -> Result<Vec<AchievementRecord>, SyncError> {
        Ok(self.achievements.read_all().await?)
    }

    pub async fn has_writeups(&self) -> bool {
        self.writeups.exists().await
    }

    pub async fn writeups_need_refresh(&self, now: DateTime<Utc>) -> bool {
        self.freshness.file_is_stale(self.writeups.path(), now).await
    }

    /// Refetches the writeup table when the snapshot is stale.
    ///
    /// Failures are reported in the returned value and leave the existing
    /// snapshot in place.
    pub async fn refresh_writeups<T: SiteTransport>(
        &self,
        session: &AuthenticatedTransport<T>,
        now: DateTime<Utc>,
    ) -> WriteupRefresh {
        if !self.writeups_need_refresh(now).await {
            debug!(path = %self.writeups.path().display(), "writeup cache is fresh");
            return WriteupRefresh::Fresh;
        }

        info!("fetching writeup data");
        let outcome = match self.fetch_writeups(session.transport()).await {
            Ok(records) if records.is_empty() => WriteupRefresh::EmptyFetch,
            Ok(records) => match self.writeups.replace_all(&records).await {
                Ok(written) => WriteupRefresh::Refreshed(written),
                Err(err) => WriteupRefresh::Failed(format!("{err:#}")),
            },
            Err(err) => WriteupRefresh::Failed(err.to_string()),
        };
        match &outcome {
            WriteupRefresh::Refreshed(count) => info!(count, "writeup cache updated"),
            WriteupRefresh::EmptyFetch => warn!("writeup page contained no writeups; keeping cache"),
            WriteupRefresh::Failed(reason) => {
                warn!(reason = %reason, "writeup refresh failed; using cached data")
            }
            WriteupRefresh::Fresh => {}
        }
        outcome
    }

    async fn fetch_writeups<T: SiteTransport>(
        &self,
        transport: &T,
    ) -> Result<Vec<WriteupRecord>, SyncError> {
        let body = transport
            .get_text(&self.endpoints.writeups, &[], Some(WRITEUP_TIMEOUT))
            .await?;
        let document = parse_document(&body)?;
        Ok(extract_writeups(&document)?.records)
    }

    pub async fn read_writeups(&self) -> Result<Vec<WriteupRecord>, SyncError> {
        Ok(self.writeups.read_all().await?)
    }

    /// Cached writeups whose machine name contains `needle`, ignoring case.
    pub async fn search_writeups(&self, needle: &str) -> Result<Vec<WriteupRecord>, SyncError> {
        let needle = needle.trim().to_lowercase();
        Ok(self
            .read_writeups()
            .await?
            .into_iter()
            .filter(|w| w.vm_title.to_lowercase().contains(&needle))
            .collect())
    }

    /// One listing page. A level filter pins the listing to a single page.
    pub async fn list_machines<T: SiteTransport>(
        &self,
        session: &AuthenticatedTransport<T>,
        query: &MachineQuery,
    ) -> Result<MachinePage, SyncError> {
        let transport = session.transport();

        let (total_pages, first_body) = if query.level.is_some() {
            (1, None)
        } else {
            let body = transport
                .get_text(&self.endpoints.machines, &query.params(1), None)
                .await?;
            let total = resolve_page_count(&parse_document(&body)?);
            debug!(total, "resolved listing page count");
            (total, Some(body))
        };

        if query.page < 1 || query.page > total_pages {
            return Err(SyncError::InvalidPage {
                page: query.page,
                total: total_pages,
            });
        }

        let body = match first_body {
            Some(body) if query.page == 1 => body,
            _ => {
                transport
                    .get_text(&self.endpoints.machines, &query.params(query.page), None)
                    .await?
            }
        };
        let document = parse_document(&body)?;
        let extraction = extract_machines(&document)?;
        let machines = match query.difficulty {
            Some(wanted) => extraction
                .records
                .into_iter()
                .filter(|m| m.difficulty == wanted)
                .collect(),
            None => extraction.records,
        };

        Ok(MachinePage {
            machines,
            page: query.page,
            total_pages,
            skipped_rows: extraction.skipped,
        })
    }

    /// The full catalogue, numbered so the newest machine has the highest id.
    pub async fn export_machines<T: SiteTransport>(
        &self,
        session: &AuthenticatedTransport<T>,
    ) -> Result<Vec<ExportedMachine>, SyncError> {
        info!("fetching full machine listing");
        let params = [("l", ListingLevel::All.as_str().to_string())];
        let body = session
            .transport()
            .get_text(&self.endpoints.machines, &params, None)
            .await?;
        let document = parse_document(&body)?;
        let extraction = extract_machines(&document)?;
        if extraction.skipped > 0 {
            debug!(skipped = extraction.skipped, "skipped non-machine rows");
        }
        Ok(ExportedMachine::number_listing(&extraction.records))
    }

    pub async fn submit_flag<T: SiteTransport>(
        &self,
        session: &AuthenticatedTransport<T>,
        vm: &str,
        flag: &str,
    ) -> Result<FlagVerdict, SyncError> {
        let form = [("flag", flag), ("vm", vm)];
        let body = session
            .transport()
            .post_form(&self.endpoints.check_flag, &form)
            .await?;
        Ok(FlagVerdict::from_response(&body))
    }
}
