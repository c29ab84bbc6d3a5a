//! Credential values, validation and persistence
//!
//! Credentials come from CLI flags or environment variables first and from a
//! `KEY=VALUE` config file second. When a credential is replaced at runtime the
//! new value is written back to that file so the next run picks it up.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{info, warn};

use crate::fetcher::CredentialKind;

/// Credential errors
#[derive(Debug, thiserror::Error)]
pub enum CredentialsError {
    /// Guild ID is not a number
    #[error("invalid guild ID '{0}': expected digits only")]
    InvalidGuildId(String),

    /// Value is empty
    #[error("{} ({}) cannot be empty", .0.display_name(), .0.env_var())]
    Empty(CredentialKind),

    /// Config file could not be read
    #[error("failed to read config file {path}: {message}")]
    ConfigFile {
        /// File path
        path: String,
        /// Failure description
        message: String,
    },
}

/// Numeric guild identifier
///
/// # Examples
///
/// ```
/// use guild_stash_sync::GuildId;
///
/// let id = GuildId::parse(" 408208 ").unwrap();
/// assert_eq!(id.as_str(), "408208");
/// assert!(GuildId::parse("my-guild").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GuildId(String);

impl GuildId {
    /// Parse and validate a guild ID
    pub fn parse(s: &str) -> Result<Self, CredentialsError> {
        let trimmed = s.trim();
        if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit()) {
            return Err(CredentialsError::InvalidGuildId(s.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Guild ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The three values needed to crawl a guild
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    session_id: String,
    backend_token: String,
    guild_id: GuildId,
}

impl Credentials {
    /// Validate and build credentials
    pub fn new(
        session_id: impl Into<String>,
        backend_token: impl Into<String>,
        guild_id: &str,
    ) -> Result<Self, CredentialsError> {
        let session_id = non_empty(CredentialKind::Session, session_id.into())?;
        let backend_token = non_empty(CredentialKind::BackendToken, backend_token.into())?;
        Ok(Self {
            session_id,
            backend_token,
            guild_id: GuildId::parse(guild_id)?,
        })
    }

    /// PoE session cookie value
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Backend bearer token
    pub fn backend_token(&self) -> &str {
        &self.backend_token
    }

    /// Guild being crawled
    pub fn guild_id(&self) -> &GuildId {
        &self.guild_id
    }

    /// Replace one credential after validating it
    pub fn set(&mut self, kind: CredentialKind, value: &str) -> Result<(), CredentialsError> {
        match kind {
            CredentialKind::Session => {
                self.session_id = non_empty(kind, value.to_string())?;
            }
            CredentialKind::BackendToken => {
                self.backend_token = non_empty(kind, value.to_string())?;
            }
            CredentialKind::TargetId => {
                self.guild_id = GuildId::parse(value)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("session_id", &"<redacted>")
            .field("backend_token", &"<redacted>")
            .field("guild_id", &self.guild_id)
            .finish()
    }
}

fn non_empty(kind: CredentialKind, value: String) -> Result<String, CredentialsError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CredentialsError::Empty(kind));
    }
    Ok(trimmed.to_string())
}

/// Shared, updatable credentials
///
/// Clones share the same values. Every request reads the current value, so a
/// replacement takes effect on the next request.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    inner: Arc<RwLock<Credentials>>,
    config_file: Option<PathBuf>,
}

impl CredentialStore {
    /// Create a store without a backing file
    pub fn new(credentials: Credentials) -> Self {
        Self {
            inner: Arc::new(RwLock::new(credentials)),
            config_file: None,
        }
    }

    /// Persist replaced values to `path`
    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Backing config file, if any
    pub fn config_file(&self) -> Option<&Path> {
        self.config_file.as_deref()
    }

    /// Copy of the current credentials
    pub fn snapshot(&self) -> Credentials {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Current session cookie value
    pub fn session_id(&self) -> String {
        self.snapshot().session_id
    }

    /// Current backend token
    pub fn backend_token(&self) -> String {
        self.snapshot().backend_token
    }

    /// Current guild
    pub fn guild_id(&self) -> GuildId {
        self.snapshot().guild_id
    }

    /// Replace one credential and write it to the config file
    ///
    /// Validation failures leave the store unchanged. Failing to write the file
    /// is logged and otherwise ignored.
    pub fn replace(&self, kind: CredentialKind, value: &str) -> Result<(), CredentialsError> {
        let stored = {
            let mut credentials = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            credentials.set(kind, value)?;
            match kind {
                CredentialKind::Session => credentials.session_id.clone(),
                CredentialKind::BackendToken => credentials.backend_token.clone(),
                CredentialKind::TargetId => credentials.guild_id.to_string(),
            }
        };
        info!(credential = kind.as_str(), "Credential updated");

        if let Some(path) = &self.config_file {
            match persist_value(path, kind.env_var(), &stored) {
                Ok(()) => info!(path = %path.display(), key = kind.env_var(), "Saved to config file"),
                Err(e) => warn!(path = %path.display(), error = %e, "Could not update config file"),
            }
        }
        Ok(())
    }
}

/// Read `KEY=VALUE` pairs from a config file
///
/// A missing file yields an empty map.
pub fn load_config_file(path: &Path) -> Result<HashMap<String, String>, CredentialsError> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let config_error = |message: String| CredentialsError::ConfigFile {
        path: path.display().to_string(),
        message,
    };

    let mut values = HashMap::new();
    for item in dotenvy::from_path_iter(path).map_err(|e| config_error(e.to_string()))? {
        let (key, value) = item.map_err(|e| config_error(e.to_string()))?;
        values.insert(key, value);
    }
    Ok(values)
}

/// Quote `value` unless it reads back verbatim as a bare word
///
/// Single quotes are literal; double quotes are used only when the value
/// itself contains a single quote, escaping `\`, `"` and `$`.
fn quote_value(value: &str) -> String {
    let bare = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_.:/+=@,%".contains(c));
    if bare {
        return value.to_string();
    }
    if !value.contains('\'') {
        return format!("'{value}'");
    }

    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if matches!(c, '\\' | '"' | '$') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Set `key` in a config file, replacing an existing line or appending one
pub fn persist_value(path: &Path, key: &str, value: &str) -> io::Result<()> {
    let existing = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };

    let prefix = format!("{key}=");
    let replacement = format!("{key}={}", quote_value(value));
    let mut lines: Vec<String> = existing.lines().map(str::to_string).collect();
    match lines.iter_mut().find(|line| line.starts_with(&prefix)) {
        Some(line) => *line = replacement,
        None => lines.push(replacement),
    }

    let mut content = lines.join("\n");
    content.push('\n');
    std::fs::write(path, content)
}
