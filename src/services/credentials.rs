//! API key source
//!
//! How the key is stored at rest is left to the user; the daemon reads it
//! from the environment or a plain key file and keeps it in memory.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{info, warn};

/// Environment variable that takes precedence over the key file
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

/// In-memory API key shared with the describer
#[derive(Debug, Clone, Default)]
pub struct ApiKey {
    value: Arc<RwLock<Option<String>>>,
}

impl ApiKey {
    pub fn get(&self) -> Option<String> {
        self.value
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn set(&self, key: String) {
        *self
            .value
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(key);
    }
}

/// Where the `SetApiKey` command obtains a new key
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Re-read the key. Returns `false` when no key was found; the previous
    /// key, if any, stays in effect.
    async fn reload(&self) -> Result<bool>;

    /// Human-readable location of the key, for narration
    fn location(&self) -> String;
}

/// Reads the key from [`API_KEY_ENV`] or a key file
pub struct KeyFileCredentials {
    path: PathBuf,
    key: ApiKey,
}

impl KeyFileCredentials {
    pub fn new(path: PathBuf, key: ApiKey) -> Self {
        Self { path, key }
    }

    async fn read_candidate(&self) -> Result<Option<String>> {
        if let Ok(value) = std::env::var(API_KEY_ENV) {
            let value = value.trim().to_string();
            if !value.is_empty() {
                return Ok(Some(value));
            }
        }

        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let value = contents.trim().to_string();
                Ok((!value.is_empty()).then_some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", self.path.display())),
        }
    }
}

#[async_trait]
impl CredentialSource for KeyFileCredentials {
    async fn reload(&self) -> Result<bool> {
        match self.read_candidate().await? {
            Some(value) => {
                self.key.set(value);
                info!("API key loaded");
                Ok(true)
            }
            None => {
                warn!(path = %self.path.display(), "no API key found");
                Ok(false)
            }
        }
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}
