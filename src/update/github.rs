use std::time::Duration;

use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::{Result, UpdateError};

pub const USER_AGENT: &str = concat!("git-auto-update/", env!("CARGO_PKG_VERSION"));

/// Release descriptor as served by a GitHub-compatible `releases/latest` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReleaseInfo {
    #[serde(default)]
    pub tag_name: String,
    #[serde(default)]
    pub assets: Vec<Asset>,
    #[serde(default, rename = "zipball_url")]
    pub source_zip_url: Option<String>,
    #[serde(default, rename = "tarball_url")]
    pub source_tar_url: Option<String>,
}

/// One downloadable file of a release.
///
/// Descriptors expose the location as `url` (API endpoint, works with tokens),
/// `browser_download_url`, or both. `url` is preferred when present.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "AssetRecord")]
pub struct Asset {
    pub name: Option<String>,
    pub download_url: Option<String>,
}

#[derive(Deserialize)]
struct AssetRecord {
    name: Option<String>,
    url: Option<String>,
    browser_download_url: Option<String>,
}

impl From<AssetRecord> for Asset {
    fn from(record: AssetRecord) -> Self {
        Self {
            name: record.name,
            download_url: record.url.or(record.browser_download_url),
        }
    }
}

impl ReleaseInfo {
    /// Parse a release descriptor body.
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|source| UpdateError::MalformedResponse { source })
    }
}

/// Build the HTTP client used for one update run.
pub fn build_client(timeout: Option<Duration>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build().map_err(|e| UpdateError::BackendUnreachable {
        url: String::new(),
        reason: format!("failed to initialise HTTP client: {e}"),
    })
}

/// Parse the release endpoint, appending `access_token` when one is given.
pub fn endpoint_url(endpoint: &str, token: Option<&str>) -> Result<Url> {
    let mut url = Url::parse(endpoint).map_err(|source| UpdateError::InvalidEndpoint {
        url: endpoint.to_string(),
        source,
    })?;
    if let Some(token) = token {
        url.query_pairs_mut().append_pair("access_token", token);
    }
    Ok(url)
}

/// Fetch and parse the latest release descriptor.
///
/// A request that never reaches a server (refused, unresolvable, timed out)
/// is `NetworkUnavailable`. The check goes through `client`, so proxy
/// settings apply to it exactly as they do to the fetch.
pub async fn fetch_release_info(client: &reqwest::Client, url: &Url) -> Result<ReleaseInfo> {
    let redacted = redact(url);
    debug!("Fetching release info from {}", redacted);

    let unreachable = |reason: String| UpdateError::BackendUnreachable {
        url: redacted.clone(),
        reason,
    };

    let response = client.get(url.clone()).send().await.map_err(|e| {
        debug!("Request to {} failed: {}", redacted, e);
        if e.is_connect() || e.is_timeout() {
            UpdateError::NetworkUnavailable {
                host: url.host_str().unwrap_or_default().to_string(),
            }
        } else {
            unreachable(e.to_string())
        }
    })?;

    let status = response.status();
    if status != reqwest::StatusCode::OK {
        debug!("Release endpoint answered {}", status);
        return Err(unreachable(format!("unexpected status {status}")));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| unreachable(e.to_string()))?;

    ReleaseInfo::from_slice(&body)
}

/// Endpoint URL with the access token stripped, for logs and errors.
fn redact(url: &Url) -> String {
    let mut clean = url.clone();
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "access_token")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        clean.set_query(None);
    } else {
        clean.query_pairs_mut().clear().extend_pairs(kept);
    }
    clean.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_release_descriptor() {
        let body = br#"{
            "tag_name": "v2.0.0",
            "zipball_url": "https://x/zip",
            "assets": [
                {"name": "tool-linux-x64.tar.gz", "browser_download_url": "https://x/a"},
                {"name": "tool-windows-x64.zip", "url": "https://api/1", "browser_download_url": "https://x/b"},
                {"url": "https://api/2"}
            ]
        }"#;
        let info = ReleaseInfo::from_slice(body).unwrap();

        assert_eq!(info.tag_name, "v2.0.0");
        assert_eq!(info.source_zip_url.as_deref(), Some("https://x/zip"));
        assert_eq!(info.source_tar_url, None);
        assert_eq!(info.assets.len(), 3);
        assert_eq!(info.assets[0].download_url.as_deref(), Some("https://x/a"));
        assert_eq!(info.assets[1].download_url.as_deref(), Some("https://api/1"));
        assert_eq!(info.assets[2].name, None);
    }

    #[test]
    fn test_parse_tolerates_missing_fields() {
        let info = ReleaseInfo::from_slice(b"{}").unwrap();
        assert!(info.tag_name.is_empty());
        assert!(info.assets.is_empty());
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(
            ReleaseInfo::from_slice(b"<html>rate limited</html>"),
            Err(UpdateError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn test_endpoint_url_appends_token() {
        let url = endpoint_url("https://api.example.com/releases/latest", Some("s3cret")).unwrap();
        assert_eq!(url.query(), Some("access_token=s3cret"));
        assert_eq!(redact(&url), "https://api.example.com/releases/latest");

        let plain = endpoint_url("https://api.example.com/releases/latest", None).unwrap();
        assert_eq!(plain.query(), None);
    }

    #[test]
    fn test_endpoint_url_rejects_garbage() {
        assert!(matches!(
            endpoint_url("not a url", None),
            Err(UpdateError::InvalidEndpoint { .. })
        ));
    }

    #[tokio::test]
    async fn test_refused_connection_is_network_unavailable() {
        let client = build_client(None).unwrap();
        let url = Url::parse("http://127.0.0.1:1/releases/latest").unwrap();
        assert!(matches!(
            fetch_release_info(&client, &url).await,
            Err(UpdateError::NetworkUnavailable { host }) if host == "127.0.0.1"
        ));
    }
}
