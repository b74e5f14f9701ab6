// src/config.rs
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::provider::{
    NewProvider, ProviderKind, Token, DEFAULT_SUMMARY_FORMAT, DEFAULT_UPDATE_FREQUENCY_MINS,
};

pub const ENV_PROVIDERS_PATH: &str = "PULSE_PROVIDERS_PATH";
pub const ENV_STATE_PATH: &str = "PULSE_STATE_PATH";
pub const ENV_LOOP_SECS: &str = "PULSE_LOOP_SECS";
pub const DEFAULT_STATE_PATH: &str = "state/pulse.json";

fn default_update_frequency() -> u32 {
    DEFAULT_UPDATE_FREQUENCY_MINS
}

fn default_summary_format() -> String {
    DEFAULT_SUMMARY_FORMAT.to_string()
}

/// Provider kind as written in configuration. Document providers may carry a
/// one-time `password` instead of a token.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KindConfig {
    Rss { url: String },
    Media { url: String },
    BuildSystem { url: String },
    Forum { url: String },
    Timeline { url: String },
    #[serde(rename = "filesystem_change")]
    FileSystemChange { path: String },
    DocumentRevision {
        api_base: String,
        account: String,
        #[serde(default)]
        password: Option<String>,
    },
}

impl KindConfig {
    /// Stored kind; `token` is carried over for document providers.
    pub fn to_kind(&self, token: Option<Token>) -> ProviderKind {
        match self {
            KindConfig::Rss { url } => ProviderKind::Rss { url: url.clone() },
            KindConfig::Media { url } => ProviderKind::Media { url: url.clone() },
            KindConfig::BuildSystem { url } => ProviderKind::BuildSystem { url: url.clone() },
            KindConfig::Forum { url } => ProviderKind::Forum { url: url.clone() },
            KindConfig::Timeline { url } => ProviderKind::Timeline { url: url.clone() },
            KindConfig::FileSystemChange { path } => ProviderKind::FileSystemChange { path: path.clone() },
            KindConfig::DocumentRevision { api_base, account, .. } => ProviderKind::DocumentRevision {
                api_base: api_base.clone(),
                account: account.clone(),
                token,
            },
        }
    }

    pub fn password(&self) -> Option<&str> {
        match self {
            KindConfig::DocumentRevision { password, .. } => password.as_deref().filter(|p| !p.is_empty()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderConfig {
    pub slug: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_update_frequency")]
    pub update_frequency: u32,
    #[serde(default = "default_summary_format")]
    pub summary_format: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub kind: KindConfig,
}

impl ProviderConfig {
    pub fn to_new_provider(&self, token: Option<Token>) -> NewProvider {
        NewProvider::new(self.slug.trim(), self.kind.to_kind(token))
            .named(self.name.trim())
            .every(self.update_frequency)
            .with_summary_format(self.summary_format.clone())
            .tagged(self.tags.iter().map(|t| t.trim()).filter(|t| !t.is_empty()))
    }
}

#[derive(Debug, Deserialize)]
struct ProvidersFile {
    #[serde(default)]
    providers: Vec<ProviderConfig>,
}

/// Load provider definitions from an explicit path. Supports TOML or JSON formats.
pub fn load_providers_from(path: &Path) -> Result<Vec<ProviderConfig>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading providers from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_providers(&content, ext.as_str())
        .with_context(|| format!("parsing providers from {}", path.display()))
}

/// Load provider definitions using env var + fallbacks:
/// 1) $PULSE_PROVIDERS_PATH
/// 2) config/providers.toml
/// 3) config/providers.json
pub fn load_providers_default() -> Result<Vec<ProviderConfig>> {
    if let Ok(p) = std::env::var(ENV_PROVIDERS_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_providers_from(&pb);
        } else {
            return Err(anyhow!("{ENV_PROVIDERS_PATH} points to non-existent path"));
        }
    }
    let toml_p = PathBuf::from("config/providers.toml");
    if toml_p.exists() {
        return load_providers_from(&toml_p);
    }
    let json_p = PathBuf::from("config/providers.json");
    if json_p.exists() {
        return load_providers_from(&json_p);
    }
    Ok(Vec::new())
}

pub fn state_path_default() -> PathBuf {
    std::env::var(ENV_STATE_PATH)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_STATE_PATH))
}

/// `Some(secs)` when the binary should poll forever.
pub fn loop_secs_default() -> Option<u64> {
    std::env::var(ENV_LOOP_SECS)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .filter(|s: &u64| *s > 0)
}

fn parse_providers(s: &str, hint_ext: &str) -> Result<Vec<ProviderConfig>> {
    let parsed = match hint_ext {
        "toml" => parse_toml(s),
        "json" => parse_json(s),
        _ => parse_toml(s).or_else(|_| parse_json(s)),
    }?;
    validate(parsed)
}

fn parse_toml(s: &str) -> Result<Vec<ProviderConfig>> {
    let v: ProvidersFile = toml::from_str(s)?;
    Ok(v.providers)
}

fn parse_json(s: &str) -> Result<Vec<ProviderConfig>> {
    let v: ProvidersFile = serde_json::from_str(s)?;
    Ok(v.providers)
}

fn validate(items: Vec<ProviderConfig>) -> Result<Vec<ProviderConfig>> {
    use std::collections::BTreeSet;
    let mut seen = BTreeSet::new();
    for it in &items {
        let slug = it.slug.trim();
        if slug.is_empty() {
            return Err(anyhow!("provider with empty slug"));
        }
        if !seen.insert(slug.to_string()) {
            return Err(anyhow!("duplicate provider slug '{slug}'"));
        }
    }
    Ok(items)
}
