//! One-shot machine package download.

use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use reqwest::header::{CONTENT_LENGTH, LOCATION};
use reqwest::redirect::Policy;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, info_span, warn, Instrument};

use crate::{is_redirect, FetchError, HttpClientConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Saved { path: PathBuf, bytes: u64 },
    /// The download host answered with a redirect; nothing was written.
    Redirected { status: u16, location: Option<String> },
    NotFound { status: u16 },
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

/// Package file name for a machine: the lowercased name with a `.zip` suffix.
pub fn package_file_name(machine_name: &str) -> String {
    format!("{}.zip", machine_name.trim().to_lowercase())
}

/// Streams `url` into `dest`, calling `progress(downloaded, total)` per chunk.
///
/// Redirects are reported, not followed. The body goes to a `.part` file
/// that is renamed into place once complete.
pub async fn download_package(
    config: &HttpClientConfig,
    url: &str,
    dest: &Path,
    mut progress: impl FnMut(u64, Option<u64>),
) -> Result<DownloadOutcome, DownloadError> {
    let mut builder = reqwest::Client::builder()
        .redirect(Policy::none())
        .connect_timeout(config.timeout);
    if let Some(user_agent) = &config.user_agent {
        builder = builder.user_agent(user_agent.clone());
    }
    let client = builder.build().map_err(FetchError::from)?;

    let span = info_span!("package_download", url);
    async {
        let mut resp = client.get(url).send().await.map_err(FetchError::from)?;
        let status = resp.status();

        if is_redirect(status) {
            let location = resp
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(ToString::to_string);
            return Ok(DownloadOutcome::Redirected {
                status: status.as_u16(),
                location,
            });
        }
        if !status.is_success() {
            return Ok(DownloadOutcome::NotFound {
                status: status.as_u16(),
            });
        }

        let total = resp
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|len| *len > 0);

        let part_path = dest.with_extension("zip.part");
        let downloaded = discard_part_on_error(&part_path, async {
            let mut file = fs::File::create(&part_path)
                .await
                .with_context(|| format!("creating {}", part_path.display()))?;
            let mut downloaded = 0u64;
            while let Some(chunk) = resp.chunk().await.map_err(FetchError::from)? {
                file.write_all(&chunk)
                    .await
                    .with_context(|| format!("writing {}", part_path.display()))?;
                downloaded += chunk.len() as u64;
                progress(downloaded, total);
            }
            file.flush()
                .await
                .with_context(|| format!("flushing {}", part_path.display()))?;
            drop(file);

            fs::rename(&part_path, dest)
                .await
                .with_context(|| format!("moving {} into place", dest.display()))?;
            Ok(downloaded)
        })
        .await?;
        info!(path = %dest.display(), bytes = downloaded, "package saved");

        Ok::<_, DownloadError>(DownloadOutcome::Saved {
            path: dest.to_path_buf(),
            bytes: downloaded,
        })
    }
    .instrument(span)
    .await
}

/// Runs `write` and deletes `part_path` if it fails partway.
async fn discard_part_on_error<F>(part_path: &Path, write: F) -> Result<u64, DownloadError>
where
    F: Future<Output = Result<u64, DownloadError>>,
{
    let result = write.await;
    if result.is_err() {
        if let Err(err) = fs::remove_file(part_path).await {
            if err.kind() != ErrorKind::NotFound {
                warn!(path = %part_path.display(), error = %err, "could not remove partial download");
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn package_names_are_lowercased_zips() {
        assert_eq!(package_file_name("Gift"), "gift.zip");
        assert_eq!(package_file_name(" TheHackersLabs "), "thehackerslabs.zip");
    }

    #[tokio::test]
    async fn failed_stream_removes_partial_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let part = dir.path().join("gift.zip.part");

        let err = discard_part_on_error(&part, async {
            fs::write(&part, b"half a zip").await.unwrap();
            Err(DownloadError::Io(anyhow!("connection reset")))
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("connection reset"));
        assert!(!part.exists());
    }

    #[tokio::test]
    async fn completed_stream_keeps_its_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let part = dir.path().join("gift.zip.part");
        let dest = dir.path().join("gift.zip");

        let bytes = discard_part_on_error(&part, async {
            fs::write(&part, b"zip").await.unwrap();
            fs::rename(&part, &dest).await.unwrap();
            Ok(3)
        })
        .await
        .unwrap();
        assert_eq!(bytes, 3);
        assert!(dest.exists());
    }
}
