//! Environment-driven configuration and the YAML identity registry.

use std::path::{Path, PathBuf};
use std::time::Duration;

use plume_core::Identity;
use serde::Deserialize;
use thiserror::Error;
use tokio::fs;
use tracing::debug;

pub const MAX_SCRAPE_COUNT: usize = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name}={value:?} is invalid: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
    #[error("reading identity registry {path}: {source}")]
    RegistryIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing identity registry {path}: {source}")]
    RegistryParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("no identities configured (set PLUME_IDENTITIES or provide {0})")]
    NoIdentities(PathBuf),
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityRegistry {
    #[serde(default)]
    pub identities: Vec<IdentityEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityEntry {
    pub handle: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl IdentityRegistry {
    pub fn parse(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    /// Enabled identities in registry order, without duplicate handles.
    pub fn enabled(&self) -> Vec<Identity> {
        let mut out: Vec<Identity> = Vec::new();
        for entry in self.identities.iter().filter(|e| e.enabled) {
            let identity = Identity::new(&entry.handle);
            if identity.handle.is_empty() || out.contains(&identity) {
                continue;
            }
            out.push(identity);
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: Option<String>,
    pub openai_api_key: String,
    pub openai_base_url: Option<String>,
    pub openai_model: Option<String>,
    pub summary_language: String,
    pub identities: Vec<Identity>,
    pub identities_file: PathBuf,
    pub sync_cron: String,
    pub scheduler_enabled: bool,
    pub scrape_count: usize,
    pub target_count: usize,
    pub item_delay: Duration,
    pub web_port: u16,
    pub cookies_path: PathBuf,
    pub cookies_json: Option<String>,
    pub chrome_executable: Option<PathBuf>,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let openai_api_key = var("OPENAI_API_KEY").ok_or(ConfigError::Missing("OPENAI_API_KEY"))?;
        let identities = var("PLUME_IDENTITIES")
            .map(|list| parse_identity_list(&list))
            .unwrap_or_default();
        let scrape_count: usize = parse_or("PLUME_SCRAPE_COUNT", var("PLUME_SCRAPE_COUNT"), 3)?;
        if scrape_count == 0 {
            return Err(ConfigError::Invalid {
                name: "PLUME_SCRAPE_COUNT",
                value: scrape_count.to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            database_url: var("DATABASE_URL"),
            openai_api_key,
            openai_base_url: var("OPENAI_BASE_URL"),
            openai_model: var("OPENAI_MODEL"),
            summary_language: var("SUMMARY_LANGUAGE").unwrap_or_else(|| "English".to_string()),
            identities,
            identities_file: var("PLUME_IDENTITIES_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("identities.yaml")),
            sync_cron: var("PLUME_SYNC_CRON").unwrap_or_else(|| "0 0 */2 * * *".to_string()),
            scheduler_enabled: var("PLUME_SCHEDULER_ENABLED")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(true),
            scrape_count: scrape_count.min(MAX_SCRAPE_COUNT),
            target_count: parse_or("PLUME_TARGET_COUNT", var("PLUME_TARGET_COUNT"), 10)?,
            item_delay: Duration::from_millis(parse_or("PLUME_ITEM_DELAY_MS", var("PLUME_ITEM_DELAY_MS"), 3000)?),
            web_port: parse_or("PLUME_WEB_PORT", var("PLUME_WEB_PORT"), 8000)?,
            cookies_path: var("PLUME_COOKIES_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./session/cookies.json")),
            cookies_json: var("PLUME_COOKIES_JSON"),
            chrome_executable: var("PLUME_CHROME_PATH").map(PathBuf::from),
        })
    }

    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url.as_deref().ok_or(ConfigError::Missing("DATABASE_URL"))
    }

    /// Identities from `PLUME_IDENTITIES` when set, else the enabled entries of
    /// the registry file. A missing registry file yields no identities.
    pub async fn load_identities(&self) -> Result<Vec<Identity>, ConfigError> {
        if !self.identities.is_empty() {
            return Ok(self.identities.clone());
        }
        load_registry(&self.identities_file)
            .await
            .map(|registry| registry.map(|r| r.enabled()).unwrap_or_default())
    }

    /// Like [`load_identities`](Self::load_identities) but fails when none are
    /// configured.
    pub async fn require_identities(&self) -> Result<Vec<Identity>, ConfigError> {
        let identities = self.load_identities().await?;
        if identities.is_empty() {
            return Err(ConfigError::NoIdentities(self.identities_file.clone()));
        }
        Ok(identities)
    }

    /// Clamps an on-demand persist count hint into `1..=MAX_SCRAPE_COUNT`.
    pub fn scrape_count_for(&self, hint: Option<usize>) -> usize {
        hint.unwrap_or(self.scrape_count).clamp(1, MAX_SCRAPE_COUNT)
    }
}

async fn load_registry(path: &Path) -> Result<Option<IdentityRegistry>, ConfigError> {
    let text = match fs::read_to_string(path).await {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no identity registry file");
            return Ok(None);
        }
        Err(source) => {
            return Err(ConfigError::RegistryIo {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    IdentityRegistry::parse(&text)
        .map(Some)
        .map_err(|source| ConfigError::RegistryParse {
            path: path.to_path_buf(),
            source,
        })
}

fn parse_identity_list(list: &str) -> Vec<Identity> {
    let mut out: Vec<Identity> = Vec::new();
    for identity in list.split(',').map(Identity::new) {
        if !identity.handle.is_empty() && !out.contains(&identity) {
            out.push(identity);
        }
    }
    out
}

fn parse_or<T>(name: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(value) => value.parse().map_err(|err: T::Err| ConfigError::Invalid {
            name,
            reason: err.to_string(),
            value,
        }),
    }
}
