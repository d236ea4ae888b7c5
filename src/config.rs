use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::update::{AssetPattern, PlatformMatcher, UpdateRequest};

/// Asset pattern as written in the config file: a bare string is a literal
/// substring, `{ regex = "..." }` a regular expression.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PatternConfig {
    Literal(String),
    Regex { regex: String },
}

impl PatternConfig {
    pub fn compile(&self) -> Result<AssetPattern> {
        match self {
            Self::Literal(needle) => Ok(AssetPattern::literal(needle.clone())),
            Self::Regex { regex } => Ok(AssetPattern::regex(regex)?),
        }
    }
}

#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct PatternsConfig {
    pub linux: Option<PatternConfig>,
    pub windows: Option<PatternConfig>,
    pub mac: Option<PatternConfig>,
}

impl PatternsConfig {
    pub fn to_matcher(&self) -> Result<PlatformMatcher> {
        let mut matcher = PlatformMatcher::default();
        if let Some(p) = &self.linux {
            matcher.linux = p.compile().context("Invalid linux pattern")?;
        }
        if let Some(p) = &self.windows {
            matcher.windows = p.compile().context("Invalid windows pattern")?;
        }
        if let Some(p) = &self.mac {
            matcher.mac = p.compile().context("Invalid mac pattern")?;
        }
        Ok(matcher)
    }
}

#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub token: Option<String>,

    #[serde(default)]
    pub install_path: Option<PathBuf>,

    #[serde(default)]
    pub staging_path: Option<PathBuf>,

    #[serde(default)]
    pub download_dir: Option<PathBuf>,

    /// Download the repository snapshot instead of a platform asset
    #[serde(default)]
    pub source_snapshot: bool,

    #[serde(default)]
    pub verbose: bool,

    /// Per-request timeout in seconds; unset means wait forever
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    #[serde(default)]
    pub patterns: PatternsConfig,
}

impl Config {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing default file yields the default config; a missing explicit
    /// file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default = Self::config_path();
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config {}", config_path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config {}", config_path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("git-auto-update")
            .join("config.toml")
    }

    /// Apply file settings on top of a freshly built request.
    pub fn apply(&self, mut request: UpdateRequest) -> Result<UpdateRequest> {
        if let Some(token) = &self.token {
            request.access_token = Some(token.clone());
        }
        if let Some(path) = &self.install_path {
            request.install_path = path.clone();
        }
        if let Some(path) = &self.staging_path {
            request.staging_path = path.clone();
        }
        if let Some(path) = &self.download_dir {
            request.download_dir = path.clone();
        }
        if let Some(secs) = self.timeout_secs {
            request.timeout = Some(Duration::from_secs(secs));
        }
        request.use_source_snapshot |= self.source_snapshot;
        request.verbose |= self.verbose;
        request.matcher = self.patterns.to_matcher()?;
        Ok(request)
    }
}
