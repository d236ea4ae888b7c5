use anyhow::{anyhow, Result};
use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use git_auto_update::config::Config;
use git_auto_update::update::{self, AssetPattern, Outcome, UpdateRequest};

#[derive(Parser, Debug)]
#[command(name = "git-auto-update", version)]
#[command(about = "Update an installation from the latest GitHub-style release", long_about = None)]
struct Cli {
    /// Release endpoint, e.g. https://api.github.com/repos/OWNER/REPO/releases/latest
    #[arg(long)]
    endpoint: Option<String>,

    /// Version currently installed
    #[arg(long, value_name = "VERSION")]
    current_version: String,

    /// Access token for private repositories
    #[arg(long, env = "GIT_AUTO_UPDATE_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Install the repository source snapshot instead of a platform asset
    #[arg(long)]
    source_snapshot: bool,

    /// Directory the update is installed into (defaults to current directory)
    #[arg(long)]
    install_path: Option<PathBuf>,

    /// Scratch directory archives are extracted into
    #[arg(long)]
    staging_path: Option<PathBuf>,

    /// Directory the downloaded archive is stored in
    #[arg(long)]
    download_dir: Option<PathBuf>,

    /// Substring identifying Linux assets (default: -linux-)
    #[arg(long)]
    linux_pattern: Option<String>,

    /// Substring identifying Windows assets (default: -windows-)
    #[arg(long)]
    windows_pattern: Option<String>,

    /// Substring identifying macOS assets (default: -darwin-)
    #[arg(long)]
    mac_pattern: Option<String>,

    /// Give up on any single HTTP request after this many seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Config file (defaults to <config dir>/git-auto-update/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Only check whether an update is available
    #[arg(long)]
    check: bool,

    /// Print progress and diagnostics
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let request = build_request(&cli)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_log_level(request.verbose))),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if cli.check {
        run_check_command(&request).await
    } else {
        run_update_command(&request).await
    }
}

/// Warnings are diagnostics too, so they only show up with `--verbose`.
fn default_log_level(verbose: bool) -> &'static str {
    if verbose {
        "warn"
    } else {
        "error"
    }
}

fn build_request(cli: &Cli) -> Result<UpdateRequest> {
    let config = Config::load(cli.config.as_deref())?;

    let endpoint = cli
        .endpoint
        .clone()
        .or_else(|| config.endpoint.clone())
        .ok_or_else(|| anyhow!("No release endpoint given (use --endpoint or the config file)"))?;

    let mut request = config.apply(UpdateRequest::new(endpoint, &cli.current_version))?;

    if let Some(token) = &cli.token {
        request.access_token = Some(token.clone());
    }
    if let Some(path) = &cli.install_path {
        request.install_path = path.clone();
    }
    if let Some(path) = &cli.staging_path {
        request.staging_path = path.clone();
    }
    if let Some(path) = &cli.download_dir {
        request.download_dir = path.clone();
    }
    if let Some(p) = &cli.linux_pattern {
        request.matcher.linux = AssetPattern::literal(p.clone());
    }
    if let Some(p) = &cli.windows_pattern {
        request.matcher.windows = AssetPattern::literal(p.clone());
    }
    if let Some(p) = &cli.mac_pattern {
        request.matcher.mac = AssetPattern::literal(p.clone());
    }
    if let Some(secs) = cli.timeout {
        request.timeout = Some(Duration::from_secs(secs));
    }
    request.use_source_snapshot |= cli.source_snapshot;
    request.verbose |= cli.verbose;

    Ok(request)
}

async fn run_check_command(request: &UpdateRequest) -> Result<()> {
    match update::check_for_update(request).await? {
        Some(release) => {
            println!(
                "{} New version available: {} → {}",
                "↑".yellow(),
                request.current_version.dimmed(),
                release.tag_name.green()
            );
        }
        None => {
            println!(
                "{} No newer release than {}",
                "✓".green(),
                request.current_version
            );
        }
    }
    Ok(())
}

async fn run_update_command(request: &UpdateRequest) -> Result<()> {
    match update::run(request).await {
        Outcome::Updated { version } => {
            println!("{} Updated to version {}", "✓".green(), version.green());
        }
        Outcome::NotNeeded => {
            println!(
                "{} You're running the latest version ({})",
                "✓".green(),
                request.current_version
            );
        }
        Outcome::NoArtifactForPlatform => {
            println!(
                "{} The latest release has no download for this platform",
                "⚠".yellow()
            );
        }
        Outcome::Unreachable(e) => {
            eprintln!("{} Could not check for updates: {}", "⚠".yellow(), e);
        }
        Outcome::Failed(e) => return Err(anyhow::Error::new(e).context("Update failed")),
    }
    Ok(())
}
