use std::collections::HashMap;
use std::env;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use dlpipkle_resolver::{ClientOptions, DEFAULT_INDEX_URL};
use tracing::warn;
use url::Url;

use crate::net;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub(crate) struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub(crate) fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    pub(crate) fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    #[cfg(test)]
    pub(crate) fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) index: IndexConfig,
    pub(crate) network: NetworkConfig,
    pub(crate) download: DownloadConfig,
}

impl Config {
    /// Builds a configuration snapshot from the current process environment.
    ///
    /// # Errors
    /// Returns an error if `DLPIPKLE_INDEX_URL` is not a usable URL.
    pub fn from_env() -> Result<Self> {
        Self::from_snapshot(&EnvSnapshot::capture())
    }

    pub(crate) fn from_snapshot(snapshot: &EnvSnapshot) -> Result<Self> {
        let index_url = snapshot
            .var("DLPIPKLE_INDEX_URL")
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_INDEX_URL);
        let timeout = match snapshot.var("DLPIPKLE_HTTP_TIMEOUT") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .unwrap_or_else(|| {
                    warn!(value = raw, "ignoring invalid DLPIPKLE_HTTP_TIMEOUT");
                    DEFAULT_TIMEOUT_SECS
                }),
            None => DEFAULT_TIMEOUT_SECS,
        };
        Ok(Self {
            index: IndexConfig {
                url: validate_index_url(index_url)?,
            },
            network: NetworkConfig {
                timeout: Duration::from_secs(timeout),
                keep_proxies: net::keep_proxies(|key| snapshot.var(key).map(ToOwned::to_owned)),
            },
            download: DownloadConfig {
                python: snapshot
                    .var("DLPIPKLE_PYTHON")
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .map(ToOwned::to_owned),
            },
        })
    }

    /// Replace the index URL (command-line override).
    ///
    /// # Errors
    /// Returns an error if the URL is not http(s).
    pub fn with_index_url(mut self, url: &str) -> Result<Self> {
        self.index.url = validate_index_url(url)?;
        Ok(self)
    }

    #[must_use]
    pub fn index(&self) -> &IndexConfig {
        &self.index
    }

    #[must_use]
    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    #[must_use]
    pub fn download(&self) -> &DownloadConfig {
        &self.download
    }

    #[must_use]
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            index_url: self.index.url.clone(),
            timeout: self.network.timeout,
            keep_proxies: self.network.keep_proxies,
        }
    }
}

fn validate_index_url(raw: &str) -> Result<String> {
    let parsed = Url::parse(raw.trim()).with_context(|| format!("invalid index URL `{raw}`"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        bail!("index URL `{raw}` must use http or https");
    }
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

#[derive(Debug, Clone)]
pub struct IndexConfig {
    pub url: String,
}

#[derive(Debug, Clone, Copy)]
pub struct NetworkConfig {
    pub timeout: Duration,
    pub keep_proxies: bool,
}

#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Interpreter override for running pip.
    pub python: Option<String>,
}
