//! Mapping of HTTP failures to credential kinds

use reqwest::StatusCode;
use std::fmt;

/// Credential that a failed request points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKind {
    /// Session cookie for the history API
    Session,
    /// Bearer token for the backend
    BackendToken,
    /// Guild being crawled
    TargetId,
}

impl CredentialKind {
    /// Every kind, in prompt order
    pub const ALL: [CredentialKind; 3] = [
        CredentialKind::Session,
        CredentialKind::BackendToken,
        CredentialKind::TargetId,
    ];

    /// Environment variable / config file key holding this credential
    pub fn env_var(&self) -> &'static str {
        match self {
            CredentialKind::Session => "POESESSID",
            CredentialKind::BackendToken => "BPL_TOKEN",
            CredentialKind::TargetId => "GUILD_ID",
        }
    }

    /// Human readable name
    pub fn display_name(&self) -> &'static str {
        match self {
            CredentialKind::Session => "PoE session ID",
            CredentialKind::BackendToken => "backend token",
            CredentialKind::TargetId => "guild ID",
        }
    }

    /// Short label for metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialKind::Session => "session",
            CredentialKind::BackendToken => "backend_token",
            CredentialKind::TargetId => "target_id",
        }
    }

    /// Where to find a fresh value
    pub fn instructions(&self) -> &'static str {
        match self {
            CredentialKind::Session => {
                "1. Log in at https://www.pathofexile.com/\n\
                 2. Open the browser developer tools (F12)\n\
                 3. Go to Application (Chromium) / Storage (Firefox) > Cookies\n\
                 4. Copy the value of the POESESSID cookie\n\
                 The session ID grants full account access; keep it private."
            }
            CredentialKind::BackendToken => {
                "1. Log in at https://bpl-poe.com/\n\
                 2. Open the browser developer tools (F12)\n\
                 3. Go to Application (Chromium) / Storage (Firefox) > Local storage\n\
                 4. Copy the value stored under 'auth'"
            }
            CredentialKind::TargetId => {
                "1. Open https://www.pathofexile.com/my-guild and click \"Stash History\"\n\
                 2. The URL looks like https://www.pathofexile.com/guild/profile/408208/stash-history\n\
                 3. The number between 'profile' and 'stash-history' is the guild ID"
            }
        }
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Endpoints whose failures are classified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Paginated stash history (session cookie)
    StashHistory,
    /// Backend lookup of stored timestamps (bearer token)
    LatestTimestamp,
    /// Backend page upload (bearer token)
    HistoryUpload,
}

impl Endpoint {
    /// Metrics label
    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::StashHistory => "stash_history",
            Endpoint::LatestTimestamp => "latest_timestamp",
            Endpoint::HistoryUpload => "history_upload",
        }
    }
}

/// Credential kind implied by a failed status, or `None` for other failures
pub fn classify(endpoint: Endpoint, status: StatusCode) -> Option<CredentialKind> {
    match (endpoint, status) {
        (Endpoint::StashHistory, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => {
            Some(CredentialKind::Session)
        }
        (Endpoint::StashHistory, StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND) => {
            Some(CredentialKind::TargetId)
        }
        (
            Endpoint::LatestTimestamp,
            StatusCode::UNAUTHORIZED
            | StatusCode::FORBIDDEN
            | StatusCode::BAD_REQUEST
            | StatusCode::NOT_FOUND,
        ) => Some(CredentialKind::BackendToken),
        (Endpoint::HistoryUpload, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => {
            Some(CredentialKind::BackendToken)
        }
        _ => None,
    }
}

/// A request rejected because of a bad credential
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct CredentialError {
    /// Credential at fault
    pub kind: CredentialKind,
    /// Description including the status
    pub message: String,
    /// HTTP status code
    pub status_code: u16,
}

impl CredentialError {
    /// Build the error for a classified status
    pub fn from_status(kind: CredentialKind, status: StatusCode) -> Self {
        Self {
            kind,
            message: format!(
                "HTTP {} ({} most likely invalid)",
                status.as_u16(),
                kind.display_name()
            ),
            status_code: status.as_u16(),
        }
    }
}
