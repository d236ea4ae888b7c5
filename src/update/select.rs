use std::fmt;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::debug;

use super::github::ReleaseInfo;
use crate::error::{Result, UpdateError};
use crate::report::Reporter;

/// Operating-system family an asset is published for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Linux,
    Windows,
    Mac,
}

impl Platform {
    /// Platform of the running binary, if it is one releases are published for.
    pub fn current() -> Option<Self> {
        match std::env::consts::OS {
            "linux" => Some(Self::Linux),
            "windows" => Some(Self::Windows),
            "macos" => Some(Self::Mac),
            _ => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Linux => "linux",
            Self::Windows => "windows",
            Self::Mac => "mac",
        })
    }
}

/// How an asset name is recognised as belonging to a platform.
#[derive(Debug, Clone)]
pub enum AssetPattern {
    Literal(String),
    Regex(Regex),
}

impl AssetPattern {
    pub fn literal(pattern: impl Into<String>) -> Self {
        Self::Literal(pattern.into())
    }

    pub fn regex(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(Self::Regex)
            .map_err(|source| UpdateError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })
    }

    pub fn is_match(&self, name: &str) -> bool {
        match self {
            Self::Literal(needle) => name.contains(needle.as_str()),
            Self::Regex(re) => re.is_match(name),
        }
    }
}

impl fmt::Display for AssetPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(needle) => write!(f, "{needle}"),
            Self::Regex(re) => write!(f, "/{}/", re.as_str()),
        }
    }
}

/// Per-platform asset name patterns.
#[derive(Debug, Clone)]
pub struct PlatformMatcher {
    pub linux: AssetPattern,
    pub windows: AssetPattern,
    pub mac: AssetPattern,
}

impl Default for PlatformMatcher {
    fn default() -> Self {
        Self {
            linux: AssetPattern::literal("-linux-"),
            windows: AssetPattern::literal("-windows-"),
            mac: AssetPattern::literal("-darwin-"),
        }
    }
}

impl PlatformMatcher {
    pub fn pattern_for(&self, platform: Platform) -> &AssetPattern {
        match platform {
            Platform::Linux => &self.linux,
            Platform::Windows => &self.windows,
            Platform::Mac => &self.mac,
        }
    }

    pub fn matches(&self, platform: Platform, name: &str) -> bool {
        self.pattern_for(platform).is_match(name)
    }
}

/// What to download and where the archive lands locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    pub source_url: String,
    pub file_name: String,
    pub staging_file_path: PathBuf,
}

/// Pick the single artifact to download for `platform`.
///
/// In snapshot mode the repository archive is used (zip preferred over tar).
/// Otherwise the first asset whose name matches the platform pattern wins.
/// `None` means nothing was published for this platform.
pub fn select_asset(
    info: &ReleaseInfo,
    platform: Platform,
    matcher: &PlatformMatcher,
    use_source_snapshot: bool,
    download_dir: &Path,
    reporter: &Reporter,
) -> Option<DownloadTarget> {
    if use_source_snapshot {
        let (url, ext) = match (&info.source_zip_url, &info.source_tar_url) {
            (Some(zip), _) => (zip, "zip"),
            (None, Some(tar)) => (tar, "tar.gz"),
            (None, None) => {
                reporter.error("Release does not offer a source snapshot.");
                return None;
            }
        };
        let file_name = format!("auto-update_{}.{}", sanitize(&info.tag_name), ext);
        return Some(DownloadTarget {
            source_url: url.clone(),
            staging_file_path: download_dir.join(&file_name),
            file_name,
        });
    }

    let pattern = matcher.pattern_for(platform);
    let mut selected: Option<DownloadTarget> = None;

    for asset in &info.assets {
        let Some(name) = asset.name.as_deref() else {
            reporter.warn("Release asset has no name; incompatible response from update server.");
            continue;
        };
        if !pattern.is_match(name) {
            continue;
        }
        if selected.is_some() {
            debug!("Ignoring additional {} asset {}", platform, name);
            continue;
        }
        match asset.download_url.as_deref() {
            Some(url) => {
                let file_name = sanitize(name);
                selected = Some(DownloadTarget {
                    source_url: url.to_string(),
                    staging_file_path: download_dir.join(&file_name),
                    file_name,
                });
            }
            None => reporter.warn(&format!("Download URL can not be found for asset {name}.")),
        }
    }

    if selected.is_none() {
        debug!("No asset matched {} for {}", pattern, platform);
    }
    selected
}

/// Keep only the final path component so a hostile asset name cannot escape the download dir.
fn sanitize(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    match base {
        "" | "." | ".." => "asset".to_string(),
        other => other.to_string(),
    }
}
