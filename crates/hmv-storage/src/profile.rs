//! Credential and session files under the per-user directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use hmv_core::{Credential, PersistedSession};
use tokio::fs;
use tracing::warn;

use crate::write_atomic;

#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when nothing is configured; a malformed file is an error.
    pub async fn load(&self) -> anyhow::Result<Option<Credential>> {
        let text = match fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("reading {}", self.path.display()))
            }
        };
        let credential = serde_json::from_str(&text)
            .with_context(|| format!("parsing {}", self.path.display()))?;
        Ok(Some(credential))
    }

    pub async fn save(&self, credential: &Credential) -> anyhow::Result<()> {
        let bytes =
            serde_json::to_vec_pretty(credential).context("serializing credentials")?;
        write_atomic(&self.path, &bytes).await
    }
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing or unreadable session file both yield `None`.
    pub async fn load(&self) -> Option<PersistedSession> {
        let text = match fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "failed to read saved session");
                return None;
            }
        };
        match serde_json::from_str(&text) {
            Ok(session) => Some(session),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "ignoring corrupt saved session");
                None
            }
        }
    }

    pub async fn save(&self, session: &PersistedSession) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec_pretty(session).context("serializing session")?;
        write_atomic(&self.path, &bytes).await
    }

    /// Deletes the session file; returns whether one existed.
    pub async fn clear(&self) -> anyhow::Result<bool> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err).with_context(|| format!("removing {}", self.path.display())),
        }
    }
}
