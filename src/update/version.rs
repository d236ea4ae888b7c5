use std::sync::OnceLock;

use regex::Regex;
use semver::Version;

use crate::error::{Result, UpdateError};

fn version_core() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d+)(?:\.(\d+))?(?:\.(\d+))?").expect("version pattern is valid")
    })
}

/// Coerce a loosely formatted version string into `major.minor.patch`.
///
/// The first run of dot-separated numbers wins, so `v1.2`, `release-1.2.3-rc1`
/// and `1.2.3+build` become `1.2.0`, `1.2.3` and `1.2.3`. Pre-release and build
/// metadata never survive coercion.
pub fn coerce(input: &str) -> Result<Version> {
    let invalid = || UpdateError::InvalidVersion {
        version: input.to_string(),
    };

    let caps = version_core().captures(input).ok_or_else(invalid)?;
    let part = |idx: usize| -> Result<u64> {
        match caps.get(idx) {
            Some(m) => m.as_str().parse().map_err(|_| invalid()),
            None => Ok(0),
        }
    };

    Ok(Version::new(part(1)?, part(2)?, part(3)?))
}

/// Returns true if `remote_tag` is strictly newer than `local_version`.
pub fn needs_update(remote_tag: &str, local_version: &str) -> Result<bool> {
    let remote = coerce(remote_tag)?;
    let local = coerce(local_version)?;
    Ok(remote > local)
}
