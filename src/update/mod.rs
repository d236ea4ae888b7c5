pub mod download;
pub mod github;
pub mod installer;
pub mod select;
pub mod version;

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{Result, UpdateError};
use crate::report::Reporter;

pub use github::{Asset, ReleaseInfo};
pub use select::{AssetPattern, DownloadTarget, Platform, PlatformMatcher};
pub use version::needs_update;

const SCRATCH_DIR: &str = "git-auto-update";

/// Everything one update run needs. Nothing is persisted between runs.
#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub endpoint: String,
    pub access_token: Option<String>,
    pub current_version: String,
    pub use_source_snapshot: bool,
    pub platform: Option<Platform>,
    pub matcher: PlatformMatcher,
    pub install_path: PathBuf,
    /// Directory archives are extracted into before relocation.
    pub staging_path: PathBuf,
    /// Directory the downloaded archive is written to.
    pub download_dir: PathBuf,
    pub verbose: bool,
    pub timeout: Option<Duration>,
}

impl UpdateRequest {
    pub fn new(endpoint: impl Into<String>, current_version: impl Into<String>) -> Self {
        let scratch = std::env::temp_dir().join(SCRATCH_DIR);
        Self {
            endpoint: endpoint.into(),
            access_token: None,
            current_version: current_version.into(),
            use_source_snapshot: false,
            platform: Platform::current(),
            matcher: PlatformMatcher::default(),
            install_path: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            staging_path: scratch.join("staging"),
            download_dir: scratch.join("downloads"),
            verbose: false,
            timeout: None,
        }
    }

    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn use_source_snapshot(mut self, enabled: bool) -> Self {
        self.use_source_snapshot = enabled;
        self
    }

    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn matcher(mut self, matcher: PlatformMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn install_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.install_path = path.into();
        self
    }

    pub fn staging_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.staging_path = path.into();
        self
    }

    pub fn download_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.download_dir = path.into();
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Result of a complete update run.
#[derive(Debug)]
pub enum Outcome {
    Updated { version: String },
    NotNeeded,
    NoArtifactForPlatform,
    Unreachable(UpdateError),
    Failed(UpdateError),
}

impl Outcome {
    pub fn is_updated(&self) -> bool {
        matches!(self, Self::Updated { .. })
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Updated { version } => write!(f, "updated to {version}"),
            Self::NotNeeded => f.write_str("already up to date"),
            Self::NoArtifactForPlatform => f.write_str("no download for this platform"),
            Self::Unreachable(e) => write!(f, "update server unreachable: {e}"),
            Self::Failed(e) => write!(f, "update failed: {e}"),
        }
    }
}

/// Check for a newer release without downloading anything.
///
/// `Ok(None)` covers both "already current" and "version could not be
/// compared"; the latter is reported as a warning.
pub async fn check_for_update(request: &UpdateRequest) -> Result<Option<ReleaseInfo>> {
    let reporter = Reporter::new(request.verbose);
    let client = github::build_client(request.timeout)?;
    let release = fetch(request, &client, &reporter).await?;

    if is_newer(&release, request, &reporter) {
        Ok(Some(release))
    } else {
        Ok(None)
    }
}

/// Run the whole pipeline: check, select, download, extract, relocate, clean up.
///
/// Never fails; every problem ends up in the returned [`Outcome`].
pub async fn run(request: &UpdateRequest) -> Outcome {
    let reporter = Reporter::new(request.verbose);

    let client = match github::build_client(request.timeout) {
        Ok(client) => client,
        Err(e) => return Outcome::Failed(e),
    };

    let release = match fetch(request, &client, &reporter).await {
        Ok(release) => release,
        Err(e) if e.is_unreachable() => return Outcome::Unreachable(e),
        Err(e) => return Outcome::Failed(e),
    };

    if !is_newer(&release, request, &reporter) {
        return Outcome::NotNeeded;
    }

    let Some(platform) = request.platform else {
        reporter.error("This operating system is not supported by the update server.");
        return Outcome::NoArtifactForPlatform;
    };

    let Some(target) = select::select_asset(
        &release,
        platform,
        &request.matcher,
        request.use_source_snapshot,
        &request.download_dir,
        &reporter,
    ) else {
        reporter.error(
            "There is no download for the latest version of the software for this operating system.",
        );
        return Outcome::NoArtifactForPlatform;
    };

    match install(request, &client, &target, &reporter).await {
        Ok(()) => {
            reporter.success("Update complete...");
            info!("Updated {} -> {}", request.current_version, release.tag_name);
            Outcome::Updated {
                version: release.tag_name,
            }
        }
        Err(e) => {
            reporter.error(&e.to_string());
            Outcome::Failed(e)
        }
    }
}

async fn fetch(
    request: &UpdateRequest,
    client: &reqwest::Client,
    reporter: &Reporter,
) -> Result<ReleaseInfo> {
    let url = github::endpoint_url(&request.endpoint, request.access_token.as_deref())?;

    github::fetch_release_info(client, &url).await.map_err(|e| {
        match &e {
            UpdateError::NetworkUnavailable { .. } => {
                reporter.error("Not connected to internet, can not check for updates.")
            }
            UpdateError::MalformedResponse { .. } => {
                reporter.error("Incompatible response from update server.")
            }
            _ => reporter.error("Can not reach the backend for updates."),
        }
        e
    })
}

fn is_newer(release: &ReleaseInfo, request: &UpdateRequest, reporter: &Reporter) -> bool {
    match version::needs_update(&release.tag_name, &request.current_version) {
        Ok(true) => {
            reporter.notice(&format!(
                "Found new update... {} > {}",
                release.tag_name, request.current_version
            ));
            true
        }
        Ok(false) => {
            debug!(
                "{} is not newer than {}",
                release.tag_name, request.current_version
            );
            false
        }
        Err(e) => {
            debug!("Cancelling update: {}", e);
            reporter.error("Semantic versioning is not valid. Cancelling update.");
            false
        }
    }
}

/// Steps 5 to 8. Only download and extraction failures are fatal.
async fn install(
    request: &UpdateRequest,
    client: &reqwest::Client,
    target: &DownloadTarget,
    reporter: &Reporter,
) -> Result<()> {
    let staging = request.staging_path.as_path();
    let install = request.install_path.as_path();
    let separate_staging = !same_path(staging, install);

    if separate_staging && install.starts_with(staging) {
        return Err(UpdateError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!(
                "staging path {} must not contain the install path {}",
                staging.display(),
                install.display()
            ),
        )));
    }

    if separate_staging {
        // leftovers of an interrupted run must not leak into this install;
        // cleared before the download since download_dir may sit inside staging
        installer::remove_dir_logged(staging).await;
    }

    info!("Downloading {} from {}", target.file_name, target.source_url);
    download::download_asset(
        client,
        &target.source_url,
        &target.staging_file_path,
        request.access_token.as_deref(),
        reporter,
    )
    .await?;

    reporter.step(&format!("Extracting {}...", target.file_name));
    if let Err(e) = installer::extract_archive(&target.staging_file_path, staging).await {
        if separate_staging {
            installer::remove_dir_logged(staging).await;
        }
        installer::remove_file_logged(&target.staging_file_path).await;
        return Err(e);
    }

    if separate_staging && target.staging_file_path.starts_with(staging) {
        // the archive itself must not be relocated along with its contents
        installer::remove_file_logged(&target.staging_file_path).await;
    }

    if separate_staging && staging.exists() {
        match installer::relocate(staging, install).await {
            Ok(count) => {
                debug!("Copied {} entries into {}", count, install.display());
                installer::remove_dir_logged(staging).await;
            }
            Err(e) => {
                warn!("{}; extracted files kept in {}", e, staging.display());
                reporter.warn(&format!(
                    "Could not move the update into place, files are in {}",
                    staging.display()
                ));
            }
        }
    }

    if !installer::remove_file_logged(&target.staging_file_path).await {
        reporter.warn("Could not clean up the downloaded archive.");
    }

    Ok(())
}

fn same_path(a: &Path, b: &Path) -> bool {
    let resolve = |p: &Path| std::fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf());
    a == b || resolve(a) == resolve(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_request_defaults() {
        let request = UpdateRequest::new("https://api.example.com/releases/latest", "1.0.0");
        assert!(!request.use_source_snapshot);
        assert!(!request.verbose);
        assert!(request.access_token.is_none());
        assert_ne!(request.staging_path, request.install_path);
        assert!(request.matcher.linux.is_match("tool-linux-x64.tar.gz"));
        assert!(request.matcher.windows.is_match("tool-windows-x64.zip"));
        assert!(request.matcher.mac.is_match("tool-darwin-arm64.tar.gz"));
    }

    #[test]
    fn test_same_path() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a");
        std::fs::create_dir(&nested).unwrap();

        assert!(same_path(&nested, &dir.path().join("a/../a")));
        assert!(!same_path(&nested, dir.path()));
    }

    #[tokio::test]
    async fn test_invalid_endpoint_fails() {
        let outcome = run(&UpdateRequest::new("::not a url::", "1.0.0")).await;
        assert!(matches!(
            outcome,
            Outcome::Failed(UpdateError::InvalidEndpoint { .. })
        ));
    }

    #[tokio::test]
    async fn test_offline_is_unreachable() {
        let request = UpdateRequest::new("http://127.0.0.1:1/releases/latest", "1.0.0");
        let outcome = run(&request).await;
        assert!(matches!(
            outcome,
            Outcome::Unreachable(UpdateError::NetworkUnavailable { .. })
        ));
    }
}
