//! Login and session reuse.

use std::time::Duration;

use chrono::Utc;
use hmv_core::{Credential, PersistedSession, AUTH_MARKER};
use hmv_storage::{CredentialStore, FetchError, SessionStore, SiteTransport};
use thiserror::Error;
use tracing::{info, warn};

use crate::{HmvConfig, SiteEndpoints};

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no credentials configured; run `hmv config` first")]
    NotConfigured,
    #[error("username and password must both be set; run `hmv config`")]
    IncompleteCredential,
    #[error("invalid credentials file: {0:#}")]
    Config(anyhow::Error),
    #[error("login rejected for user `{username}`")]
    Rejected { username: String },
    #[error("login request failed: {0}")]
    LoginTransport(#[from] FetchError),
    #[error("{0:#}")]
    Storage(anyhow::Error),
}

impl SessionError {
    /// Configuration problems the user fixes with `hmv config`.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::NotConfigured | Self::IncompleteCredential | Self::Config(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOrigin {
    Restored,
    LoggedIn,
}

/// A transport that has passed the liveness probe or a fresh login.
#[derive(Debug)]
pub struct AuthenticatedTransport<T> {
    transport: T,
    origin: SessionOrigin,
}

impl<T: SiteTransport> AuthenticatedTransport<T> {
    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn origin(&self) -> SessionOrigin {
        self.origin
    }
}

/// Produces an authenticated transport, reusing the saved session when it is still live.
///
/// Constructed once per command invocation; nothing here is global.
pub struct SessionManager<T> {
    transport: T,
    credentials: CredentialStore,
    sessions: SessionStore,
    endpoints: SiteEndpoints,
}

impl<T: SiteTransport> SessionManager<T> {
    pub fn new(
        transport: T,
        credentials: CredentialStore,
        sessions: SessionStore,
        endpoints: SiteEndpoints,
    ) -> Self {
        Self {
            transport,
            credentials,
            sessions,
            endpoints,
        }
    }

    pub fn from_config(transport: T, config: &HmvConfig) -> Self {
        Self::new(
            transport,
            config.credential_store(),
            config.session_store(),
            config.endpoints(),
        )
    }

    /// Issues at most one probe and at most one login POST.
    pub async fn obtain_session(self) -> Result<AuthenticatedTransport<T>, SessionError> {
        let credential = match self.credentials.load().await {
            Ok(Some(credential)) if credential.is_complete() => credential,
            Ok(Some(_)) => return Err(SessionError::IncompleteCredential),
            Ok(None) => return Err(SessionError::NotConfigured),
            Err(err) => return Err(SessionError::Config(err)),
        };

        if let Some(saved) = self.sessions.load().await {
            self.transport.import_cookies(&saved.cookies);
            if self.probe().await {
                info!(captured_at = %saved.captured_at, "using saved session");
                return Ok(AuthenticatedTransport {
                    transport: self.transport,
                    origin: SessionOrigin::Restored,
                });
            }
            info!("saved session is no longer valid; logging in again");
            self.discard_saved().await;
        }

        self.login(&credential).await?;
        self.persist().await;
        Ok(AuthenticatedTransport {
            transport: self.transport,
            origin: SessionOrigin::LoggedIn,
        })
    }

    async fn probe(&self) -> bool {
        match self
            .transport
            .get_text(&self.endpoints.machines, &[], Some(PROBE_TIMEOUT))
            .await
        {
            Ok(body) => body.contains(AUTH_MARKER),
            Err(err) => {
                warn!(error = %err, "session probe failed");
                false
            }
        }
    }

    /// Drops the dead session from disk and from the cookie jar.
    async fn discard_saved(&self) {
        self.transport.clear_cookies();
        if let Err(err) = self.sessions.clear().await {
            warn!(error = %format!("{err:#}"), "failed to delete stale session");
        }
    }

    async fn login(&self, credential: &Credential) -> Result<(), SessionError> {
        info!(username = %credential.username, "logging in");
        let form = [
            ("admin", credential.username.as_str()),
            ("password_usuario", credential.password.as_str()),
        ];
        let body = self.transport.post_form(&self.endpoints.login, &form).await?;
        if body.contains(AUTH_MARKER) {
            info!("login successful");
            Ok(())
        } else {
            Err(SessionError::Rejected {
                username: credential.username.clone(),
            })
        }
    }

    async fn persist(&self) {
        let Some(cookies) = self.transport.export_cookies() else {
            warn!("login succeeded but the site set no cookies; session not saved");
            return;
        };
        let session = PersistedSession {
            cookies,
            captured_at: Utc::now(),
        };
        if let Err(err) = self.sessions.save(&session).await {
            warn!(error = %format!("{err:#}"), "failed to save session");
        }
    }
}

/// Stores new credentials and discards any session tied to the old ones.
pub async fn configure_credentials(
    credentials: &CredentialStore,
    sessions: &SessionStore,
    credential: &Credential,
) -> Result<(), SessionError> {
    if !credential.is_complete() {
        return Err(SessionError::IncompleteCredential);
    }
    credentials
        .save(credential)
        .await
        .map_err(SessionError::Storage)?;
    if sessions.clear().await.map_err(SessionError::Storage)? {
        info!("discarded saved session");
    }
    Ok(())
}
