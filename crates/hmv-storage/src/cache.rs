//! CSV-backed local caches and the freshness rule that decides when to refetch.

use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use chrono::{DateTime, Duration, Utc};
use hmv_core::{AchievementRecord, WriteupRecord};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::write_atomic;

/// A row type stored in an [`IncrementalCacheStore`], keyed by a remote-assigned id.
pub trait CacheRecord: Serialize + DeserializeOwned {
    fn cache_id(&self) -> u64;
}

impl CacheRecord for AchievementRecord {
    fn cache_id(&self) -> u64 {
        self.id
    }
}

/// `true` when data last modified at `last_modified` is older than `window`.
/// Unknown age is always stale.
pub fn needs_refresh(
    last_modified: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    window: Duration,
) -> bool {
    match last_modified {
        None => true,
        Some(modified) => now - modified > window,
    }
}

/// Freshness check against a file's mtime; any metadata error counts as stale.
pub async fn file_needs_refresh(path: &Path, now: DateTime<Utc>, window: Duration) -> bool {
    needs_refresh(modified_at(path).await, now, window)
}

async fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    let metadata = fs::metadata(path).await.ok()?;
    metadata.modified().ok().map(DateTime::<Utc>::from)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
    pub window: Duration,
}

impl FreshnessPolicy {
    pub fn daily() -> Self {
        Self {
            window: Duration::hours(24),
        }
    }

    pub fn is_stale(&self, last_modified: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        needs_refresh(last_modified, now, self.window)
    }

    pub async fn file_is_stale(&self, path: &Path, now: DateTime<Utc>) -> bool {
        file_needs_refresh(path, now, self.window).await
    }
}

async fn read_existing(path: &Path) -> anyhow::Result<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", path.display())),
    }
}

fn decode_rows<R: DeserializeOwned>(bytes: &[u8], path: &Path) -> Vec<R> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(bytes);
    let mut rows = Vec::new();
    let mut undecodable = 0usize;
    for row in reader.deserialize::<R>() {
        match row {
            Ok(row) => rows.push(row),
            Err(err) => {
                undecodable += 1;
                debug!(path = %path.display(), error = %err, "skipping undecodable cache row");
            }
        }
    }
    if undecodable > 0 {
        warn!(path = %path.display(), undecodable, "cache contains rows that could not be decoded");
    }
    rows
}

fn encode_rows<R: Serialize>(records: &[&R], with_header: bool) -> anyhow::Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(with_header)
        .from_writer(Vec::new());
    for record in records {
        writer.serialize(record).context("serializing cache row")?;
    }
    writer
        .into_inner()
        .map_err(|err| anyhow!("flushing csv buffer: {}", err.error()))
}

/// Parsed `id` column of every row, `None` where a row has no readable id.
fn row_ids(bytes: &[u8]) -> Vec<Option<u64>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(bytes);
    let Some(id_column) = reader
        .headers()
        .ok()
        .and_then(|headers| headers.iter().position(|h| h.trim() == "id"))
    else {
        return Vec::new();
    };
    reader
        .records()
        .map(|row| {
            row.ok()
                .and_then(|row| row.get(id_column).and_then(|v| v.trim().parse().ok()))
        })
        .collect()
}

/// Id of the final data row, or 0 when there is none or it cannot be read.
fn last_id_in(bytes: &[u8]) -> u64 {
    row_ids(bytes).last().copied().flatten().unwrap_or(0)
}

/// Largest id stored anywhere in the file; a damaged tail row cannot lower it.
fn max_id_in(bytes: &[u8]) -> u64 {
    row_ids(bytes).into_iter().flatten().max().unwrap_or(0)
}

/// Append-only CSV log whose rows carry strictly increasing ids.
#[derive(Debug, Clone)]
pub struct IncrementalCacheStore<R> {
    path: PathBuf,
    _record: PhantomData<fn() -> R>,
}

impl<R: CacheRecord> IncrementalCacheStore<R> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _record: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn exists(&self) -> bool {
        fs::try_exists(&self.path).await.unwrap_or(false)
    }

    pub async fn last_id(&self) -> u64 {
        match fs::read(&self.path).await {
            Ok(bytes) => last_id_in(&bytes),
            Err(_) => 0,
        }
    }

    /// Appends the records whose ids are above the stored high-water mark.
    ///
    /// The mark is the largest id in the file. Records at or below it, and records that do not
    /// increase within the batch, are dropped. Returns the number written.
    pub async fn append(&self, records: &[R]) -> anyhow::Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let existing = read_existing(&self.path).await?;
        let mut high_water = existing.as_deref().map(max_id_in).unwrap_or(0);
        let fresh: Vec<&R> = records
            .iter()
            .filter(|record| {
                let id = record.cache_id();
                if id > high_water {
                    high_water = id;
                    true
                } else {
                    debug!(id, high_water, "dropping record at or below cache high-water mark");
                    false
                }
            })
            .collect();
        if fresh.is_empty() {
            return Ok(0);
        }

        let existing_len = existing.as_ref().map_or(0, Vec::len);
        let mut buf = Vec::new();
        if existing
            .as_deref()
            .is_some_and(|bytes| !bytes.is_empty() && !bytes.ends_with(b"\n"))
        {
            buf.push(b'\n');
        }
        buf.extend(encode_rows(&fresh, existing_len == 0)?);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating cache directory {}", parent.display()))?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("opening {} for append", self.path.display()))?;
        file.write_all(&buf)
            .await
            .with_context(|| format!("appending to {}", self.path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing {}", self.path.display()))?;

        Ok(fresh.len())
    }

    pub async fn read_all(&self) -> anyhow::Result<Vec<R>> {
        Ok(match read_existing(&self.path).await? {
            Some(bytes) => decode_rows(&bytes, &self.path),
            None => Vec::new(),
        })
    }
}

/// CSV snapshot that is rewritten wholesale on every refresh.
#[derive(Debug, Clone)]
pub struct SnapshotCacheStore<R> {
    path: PathBuf,
    _record: PhantomData<fn() -> R>,
}

impl<R: Serialize + DeserializeOwned> SnapshotCacheStore<R> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _record: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn exists(&self) -> bool {
        fs::try_exists(&self.path).await.unwrap_or(false)
    }

    /// Replaces the snapshot. An empty set is refused and the file is left as is.
    pub async fn replace_all(&self, records: &[R]) -> anyhow::Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let rows: Vec<&R> = records.iter().collect();
        let bytes = encode_rows(&rows, true)?;
        write_atomic(&self.path, &bytes).await?;
        Ok(records.len())
    }

    pub async fn read_all(&self) -> anyhow::Result<Vec<R>> {
        Ok(match read_existing(&self.path).await? {
            Some(bytes) => decode_rows(&bytes, &self.path),
            None => Vec::new(),
        })
    }
}

pub type AchievementCache = IncrementalCacheStore<AchievementRecord>;
pub type WriteupCache = SnapshotCacheStore<WriteupRecord>;
