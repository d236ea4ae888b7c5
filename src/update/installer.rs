use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{Result, UpdateError};

/// Archive format, decided from the file name alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    TarGz,
    Tar,
    Zip,
    Unknown,
}

impl ArchiveKind {
    pub fn detect(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        match ext.as_str() {
            "gz" | "tgz" => Self::TarGz,
            "tar" => Self::Tar,
            "zip" => Self::Zip,
            _ => Self::Unknown,
        }
    }
}

/// Unpack `archive_path` into `dest_dir` on the blocking pool.
///
/// Unknown extensions are treated as already extracted: nothing on disk is
/// touched and the call succeeds.
pub async fn extract_archive(archive_path: &Path, dest_dir: &Path) -> Result<ArchiveKind> {
    let archive = archive_path.to_path_buf();
    let dest = dest_dir.to_path_buf();

    tokio::task::spawn_blocking(move || extract_archive_blocking(&archive, &dest))
        .await
        .map_err(|e| UpdateError::ExtractionFailed {
            path: archive_path.to_path_buf(),
            source: io::Error::other(e),
        })?
}

/// Synchronous core of [`extract_archive`].
pub fn extract_archive_blocking(archive_path: &Path, dest_dir: &Path) -> Result<ArchiveKind> {
    let kind = ArchiveKind::detect(archive_path);
    let failed = |source: io::Error| UpdateError::ExtractionFailed {
        path: archive_path.to_path_buf(),
        source,
    };

    match kind {
        ArchiveKind::TarGz => {
            fs::create_dir_all(dest_dir).map_err(failed)?;
            let file = File::open(archive_path).map_err(failed)?;
            let decoder = GzDecoder::new(BufReader::new(file));
            tar::Archive::new(decoder).unpack(dest_dir).map_err(failed)?;
        }
        ArchiveKind::Tar => {
            fs::create_dir_all(dest_dir).map_err(failed)?;
            let file = File::open(archive_path).map_err(failed)?;
            tar::Archive::new(BufReader::new(file))
                .unpack(dest_dir)
                .map_err(failed)?;
        }
        ArchiveKind::Zip => {
            fs::create_dir_all(dest_dir).map_err(failed)?;
            let file = File::open(archive_path).map_err(failed)?;
            let mut archive =
                zip::ZipArchive::new(BufReader::new(file)).map_err(|e| failed(io::Error::other(e)))?;
            archive
                .extract(dest_dir)
                .map_err(|e| failed(io::Error::other(e)))?;
        }
        ArchiveKind::Unknown => {
            debug!(
                "{} is not an archive, nothing to extract",
                archive_path.display()
            );
        }
    }

    Ok(kind)
}

/// Copy everything under `staging` into `install`, replacing existing files.
pub async fn relocate(staging: &Path, install: &Path) -> Result<u64> {
    let src = staging.to_path_buf();
    let dst = install.to_path_buf();

    tokio::task::spawn_blocking(move || copy_tree(&src, &dst))
        .await
        .map_err(|e| UpdateError::Relocation {
            path: install.to_path_buf(),
            source: io::Error::other(e),
        })?
}

fn copy_tree(src: &Path, dst: &Path) -> Result<u64> {
    let relocation = |path: &Path, source: io::Error| UpdateError::Relocation {
        path: path.to_path_buf(),
        source,
    };

    fs::create_dir_all(dst).map_err(|e| relocation(dst, e))?;

    let mut copied = 0;
    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(|e| relocation(src, io::Error::from(e)))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| relocation(entry.path(), io::Error::other(e)))?;
        let target = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(|e| relocation(&target, e))?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target).map_err(|e| relocation(&target, e))?;
            copied += 1;
        } else {
            replace_file(entry.path(), &target).map_err(|e| relocation(&target, e))?;
            copied += 1;
        }
    }

    debug!("Relocated {} entries into {}", copied, dst.display());
    Ok(copied)
}

/// Replace `target` with a copy of `source` without ever truncating `target` in place.
///
/// The copy is written next to the target and renamed over it, which also works
/// when the target is the running executable on Unix. Windows refuses to rename
/// over a running binary, so the old file is moved aside first.
fn replace_file(source: &Path, target: &Path) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp = sibling(target, ".auto-update.tmp");
    fs::copy(source, &tmp)?;

    match fs::rename(&tmp, target) {
        Ok(()) => Ok(()),
        Err(e) if cfg!(windows) && e.kind() == io::ErrorKind::PermissionDenied => {
            let old = sibling(target, ".old");
            if old.exists() {
                fs::remove_file(&old)?;
            }
            fs::rename(target, &old)?;
            fs::rename(&tmp, target)
        }
        Err(e) => {
            if let Err(cleanup) = fs::remove_file(&tmp) {
                warn!("Failed to remove {}: {}", tmp.display(), cleanup);
            }
            Err(e)
        }
    }
}

#[cfg(unix)]
fn copy_symlink(source: &Path, target: &Path) -> io::Result<()> {
    let link = fs::read_link(source)?;
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    if fs::symlink_metadata(target).is_ok() {
        fs::remove_file(target)?;
    }
    std::os::unix::fs::symlink(link, target)
}

#[cfg(not(unix))]
fn copy_symlink(source: &Path, target: &Path) -> io::Result<()> {
    replace_file(source, target)
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

/// Remove a staging directory, logging instead of failing.
pub async fn remove_dir_logged(dir: &Path) -> bool {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => true,
        Err(e) => {
            warn!("Failed to remove {}: {}", dir.display(), e);
            false
        }
    }
}

/// Remove a downloaded archive, logging instead of failing.
pub async fn remove_file_logged(file: &Path) -> bool {
    match tokio::fs::remove_file(file).await {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => true,
        Err(e) => {
            warn!("Failed to remove {}: {}", file.display(), e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::io::Write;

    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::TempDir;

    const TREE: &[(&str, &[u8])] = &[
        ("tool", b"#!/bin/sh\necho tool\n"),
        ("README.md", b"# tool\n"),
        ("lib/data.bin", &[0, 1, 2, 3, 254, 255]),
        ("lib/nested/deep.txt", b"deep"),
    ];

    fn expected_tree() -> BTreeMap<String, Vec<u8>> {
        TREE.iter()
            .map(|(p, d)| (p.to_string(), d.to_vec()))
            .collect()
    }

    fn read_tree(root: &Path) -> BTreeMap<String, Vec<u8>> {
        WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                let rel = e.path().strip_prefix(root).unwrap();
                let key = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                (key, fs::read(e.path()).unwrap())
            })
            .collect()
    }

    fn write_tar<W: Write>(writer: W) -> W {
        let mut builder = tar::Builder::new(writer);
        for (path, data) in TREE {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            builder.append_data(&mut header, path, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn build_tar(dir: &Path) -> PathBuf {
        let path = dir.join("tool-linux-x64.tar");
        write_tar(File::create(&path).unwrap());
        path
    }

    fn build_tar_gz(dir: &Path) -> PathBuf {
        let path = dir.join("tool-linux-x64.tar.gz");
        let encoder = write_tar(GzEncoder::new(File::create(&path).unwrap(), Compression::default()));
        encoder.finish().unwrap();
        path
    }

    fn build_zip(dir: &Path) -> PathBuf {
        let path = dir.join("tool-windows-x64.zip");
        let mut zip = zip::ZipWriter::new(File::create(&path).unwrap());
        let options = zip::write::SimpleFileOptions::default();
        for (name, data) in TREE {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
        path
    }

    #[test]
    fn test_detect_kind() {
        assert_eq!(ArchiveKind::detect(Path::new("a-linux.tar.gz")), ArchiveKind::TarGz);
        assert_eq!(ArchiveKind::detect(Path::new("a.tgz")), ArchiveKind::TarGz);
        assert_eq!(ArchiveKind::detect(Path::new("a.tar")), ArchiveKind::Tar);
        assert_eq!(ArchiveKind::detect(Path::new("A.ZIP")), ArchiveKind::Zip);
        assert_eq!(ArchiveKind::detect(Path::new("tool.exe")), ArchiveKind::Unknown);
        assert_eq!(ArchiveKind::detect(Path::new("tool")), ArchiveKind::Unknown);
    }

    #[test]
    fn test_every_format_reproduces_tree() {
        let work = TempDir::new().unwrap();
        let archives = [
            (build_tar(work.path()), ArchiveKind::Tar),
            (build_tar_gz(work.path()), ArchiveKind::TarGz),
            (build_zip(work.path()), ArchiveKind::Zip),
        ];

        for (archive, kind) in archives {
            let dest = TempDir::new().unwrap();
            let out = extract_archive_blocking(&archive, dest.path()).unwrap();
            assert_eq!(out, kind);
            assert_eq!(read_tree(dest.path()), expected_tree(), "{:?}", archive);
        }
    }

    #[tokio::test]
    async fn test_async_extract() {
        let work = TempDir::new().unwrap();
        let archive = build_tar_gz(work.path());
        let dest = work.path().join("staging");

        extract_archive(&archive, &dest).await.unwrap();
        assert_eq!(read_tree(&dest), expected_tree());
    }

    #[test]
    fn test_unknown_extension_is_noop() {
        let work = TempDir::new().unwrap();
        let binary = work.path().join("tool.exe");
        fs::write(&binary, b"MZ").unwrap();
        let dest = work.path().join("never-created");

        let kind = extract_archive_blocking(&binary, &dest).unwrap();
        assert_eq!(kind, ArchiveKind::Unknown);
        assert!(!dest.exists());
    }

    #[test]
    fn test_corrupt_archives_fail() {
        let work = TempDir::new().unwrap();
        for name in ["broken.tar.gz", "broken.zip"] {
            let path = work.path().join(name);
            fs::write(&path, b"this is not an archive at all").unwrap();
            let err = extract_archive_blocking(&path, &work.path().join("out")).unwrap_err();
            assert!(matches!(err, UpdateError::ExtractionFailed { .. }), "{name}");
        }
    }

    #[tokio::test]
    async fn test_relocate_overwrites_and_keeps_unrelated() {
        let staging = TempDir::new().unwrap();
        let install = TempDir::new().unwrap();
        fs::create_dir_all(staging.path().join("bin")).unwrap();
        fs::write(staging.path().join("bin/tool"), b"v2").unwrap();
        fs::write(staging.path().join("VERSION"), b"2.0.0").unwrap();

        fs::create_dir_all(install.path().join("bin")).unwrap();
        fs::write(install.path().join("bin/tool"), b"v1").unwrap();
        fs::write(install.path().join("settings.toml"), b"keep = true").unwrap();

        let copied = relocate(staging.path(), install.path()).await.unwrap();

        assert_eq!(copied, 2);
        assert_eq!(fs::read(install.path().join("bin/tool")).unwrap(), b"v2");
        assert_eq!(fs::read(install.path().join("VERSION")).unwrap(), b"2.0.0");
        assert_eq!(fs::read(install.path().join("settings.toml")).unwrap(), b"keep = true");
        assert!(!install.path().join("bin/tool.auto-update.tmp").exists());
    }

    #[tokio::test]
    async fn test_relocate_failure_leaves_no_temp_file() {
        let staging = TempDir::new().unwrap();
        let install = TempDir::new().unwrap();
        fs::write(staging.path().join("tool"), b"v2").unwrap();
        fs::create_dir_all(install.path().join("tool/bin")).unwrap();

        let err = relocate(staging.path(), install.path()).await.unwrap_err();

        assert!(matches!(err, UpdateError::Relocation { .. }), "{err:?}");
        assert!(install.path().join("tool").is_dir());
        assert!(!install.path().join("tool.auto-update.tmp").exists());
    }

    #[tokio::test]
    async fn test_cleanup_helpers_tolerate_missing() {
        let work = TempDir::new().unwrap();
        assert!(remove_dir_logged(&work.path().join("gone")).await);
        assert!(remove_file_logged(&work.path().join("gone.zip")).await);
    }
}
