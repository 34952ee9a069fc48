//! Captured login cookies: loading the jar file and bootstrapping it from an
//! environment-provided blob.

use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

fn default_path() -> String {
    "/".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCookie {
    pub domain: String,
    pub name: String,
    pub value: String,
    #[serde(default = "default_path")]
    pub path: String,
    /// Unix seconds; absent or non-positive marks a session cookie.
    #[serde(default)]
    pub expires: Option<f64>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
}

impl SessionCookie {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires {
            Some(expires) if expires > 0.0 => expires <= now.timestamp() as f64,
            _ => false,
        }
    }

    /// Domain match in the cookie sense: `.x.com` and `x.com` both cover `x.com`.
    pub fn applies_to(&self, host: &str) -> bool {
        let domain = self.domain.trim_start_matches('.').to_ascii_lowercase();
        let host = host.to_ascii_lowercase();
        host == domain || host.ends_with(&format!(".{domain}"))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CookieJar {
    cookies: Vec<SessionCookie>,
}

impl CookieJar {
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        Ok(Self {
            cookies: serde_json::from_str(json)?,
        })
    }

    /// Reads the jar at `path`; a missing file yields an empty jar.
    pub async fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !fs::try_exists(path)
            .await
            .with_context(|| format!("checking cookie file {}", path.display()))?
        {
            debug!(path = %path.display(), "no cookie file");
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading cookie file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing cookie file {}", path.display()))
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Unexpired cookies that apply to `host`.
    pub fn valid_for(&self, host: &str, now: DateTime<Utc>) -> Vec<SessionCookie> {
        self.cookies
            .iter()
            .filter(|c| c.applies_to(host) && !c.is_expired(now))
            .cloned()
            .collect()
    }
}

/// Writes `blob` to `path` when no cookie file exists yet. Returns whether a file
/// was written. The blob must parse as a cookie array; the write goes through a
/// temp file and rename so readers never observe a partial jar.
pub async fn bootstrap_cookie_file(path: impl AsRef<Path>, blob: Option<&str>) -> anyhow::Result<bool> {
    let path = path.as_ref();
    let Some(blob) = blob.map(str::trim).filter(|b| !b.is_empty()) else {
        return Ok(false);
    };
    if fs::try_exists(path)
        .await
        .with_context(|| format!("checking cookie file {}", path.display()))?
    {
        return Ok(false);
    }

    let jar = CookieJar::parse(blob).context("cookie blob is not a cookie array")?;

    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("creating cookie directory {}", parent.display()))?;

    let temp_path = parent.join(format!(".{}.cookies.tmp", Uuid::new_v4()));
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .with_context(|| format!("opening temp cookie file {}", temp_path.display()))?;
    file.write_all(blob.as_bytes())
        .await
        .with_context(|| format!("writing temp cookie file {}", temp_path.display()))?;
    file.flush()
        .await
        .with_context(|| format!("flushing temp cookie file {}", temp_path.display()))?;
    drop(file);

    if let Err(err) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err).with_context(|| format!("renaming cookie file into {}", path.display()));
    }
    info!(path = %path.display(), cookies = jar.len(), "cookie file written from environment");
    Ok(true)
}
