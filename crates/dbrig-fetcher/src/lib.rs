//! Fetcher: download-verify-install-register pipeline for engine binary
//! archives, grounded on the image-pull loop's pull/verify/report shape and
//! the model-cache download's retry-with-backoff policy.

use async_trait::async_trait;
use dbrig_common::engine_descriptor::EngineDescriptor;
use dbrig_common::error::{DbrigError, DbrigResult};
use dbrig_common::platform::{Os, PlatformTuple};
use dbrig_paths::DbrigRoot;
use dbrig_registry::{BinaryFetcher, Provenance, ToolRegistry};
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// `(downloaded, total)` progress callback, the way a `reqwest`-streamed
/// download reports bytes as they arrive.
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

const DEFAULT_REGISTRY_HOST: &str = "artifacts.dbrig.dev";
const MAX_DOWNLOAD_ATTEMPTS: u32 = 3;

/// Build the artifact URL per the external-interfaces template:
/// `https://<host>/<engine>-<fullVersion>/<engine>-<fullVersion>-<os>-<arch>.(tar.gz|zip)`.
pub fn artifact_url(registry_host: &str, engine: &str, full_version: &str, platform: PlatformTuple) -> String {
    let ext = if platform.os == Os::Win32 { "zip" } else { "tar.gz" };
    format!(
        "https://{registry_host}/{engine}-{full_version}/{engine}-{full_version}-{platform}.{ext}"
    )
}

/// Downloads, verifies, extracts, atomically installs, and registers the
/// bundled tools for an (engine, fullVersion, platform) triple.
pub struct Fetcher {
    client: reqwest::Client,
    registry_host: String,
    root: DbrigRoot,
    tool_registry: Arc<ToolRegistry>,
}

impl Fetcher {
    pub fn new(root: DbrigRoot, tool_registry: Arc<ToolRegistry>) -> Self {
        Self {
            client: reqwest::Client::new(),
            registry_host: DEFAULT_REGISTRY_HOST.to_string(),
            root,
            tool_registry,
        }
    }

    pub fn with_registry_host(mut self, host: impl Into<String>) -> Self {
        self.registry_host = host.into();
        self
    }

    /// Idempotent: if the install directory already passes verification,
    /// returns immediately without re-downloading.
    pub async fn ensure_binaries(
        &self,
        descriptor: &EngineDescriptor,
        full_version: &str,
        platform: PlatformTuple,
        progress: Option<ProgressCallback>,
    ) -> DbrigResult<PathBuf> {
        let engine = descriptor.name.as_str();
        let install_dir = self.root.binary_root(engine, full_version, platform);
        if verify_installation(&install_dir, descriptor, platform) {
            return Ok(install_dir);
        }

        let url = artifact_url(&self.registry_host, engine, full_version, platform);
        let staging_dir = self.root.bin_root().join(format!(
            "{engine}-{full_version}-{platform}.staging-{}",
            std::process::id()
        ));
        let archive_path = staging_dir.with_extension(if platform.os == Os::Win32 {
            "zip"
        } else {
            "tar.gz"
        });

        let result = self
            .download_with_retry(&url, &archive_path, progress)
            .await
            .and_then(|_| extract_archive(&archive_path, &staging_dir, platform))
            .and_then(|_| {
                if verify_installation(&staging_dir, descriptor, platform) {
                    Ok(())
                } else {
                    Err(DbrigError::dependency_missing(
                        format!("{engine} archive did not contain expected binaries"),
                        "the artifact registry entry for this version may be corrupt",
                    ))
                }
            });

        let _ = tokio::fs::remove_file(&archive_path).await;

        if let Err(err) = result {
            let _ = tokio::fs::remove_dir_all(&staging_dir).await;
            return Err(err);
        }

        if let Some(parent) = install_dir.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        let _ = tokio::fs::remove_dir_all(&install_dir).await;
        tokio::fs::rename(&staging_dir, &install_dir)
            .await
            .map_err(|err| {
                DbrigError::dependency_missing(
                    format!("failed to install {engine} {full_version}: {err}"),
                    "check disk space and permissions under the dbrig root",
                )
            })?;

        self.register_bundled_tools(descriptor, &install_dir, platform)
            .await;

        info!(engine, full_version, "fetched and installed binaries");
        Ok(install_dir)
    }

    async fn download_with_retry(
        &self,
        url: &str,
        dest: &Path,
        progress: Option<ProgressCallback>,
    ) -> DbrigResult<()> {
        if let Some(parent) = dest.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        let mut last_err = None;
        for attempt in 1..=MAX_DOWNLOAD_ATTEMPTS {
            match self.download_once(url, dest, progress.clone()).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!(url, attempt, %err, "download attempt failed");
                    last_err = Some(err);
                    if attempt < MAX_DOWNLOAD_ATTEMPTS {
                        let backoff = std::time::Duration::from_secs(2u64.pow(attempt));
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }
        Err(DbrigError::connection_failed(format!(
            "download failed after {MAX_DOWNLOAD_ATTEMPTS} attempts: {}",
            last_err.unwrap_or_else(|| "unknown error".to_string())
        )))
    }

    async fn download_once(
        &self,
        url: &str,
        dest: &Path,
        progress: Option<ProgressCallback>,
    ) -> Result<(), String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| err.to_string())?;
        let response = response.error_for_status().map_err(|err| err.to_string())?;
        let total = response.content_length().unwrap_or(0);
        let mut downloaded = 0u64;
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|err| err.to_string())?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|err| err.to_string())?;
            tokio::io::AsyncWriteExt::write_all(&mut file, &chunk)
                .await
                .map_err(|err| err.to_string())?;
            downloaded += chunk.len() as u64;
            if let Some(cb) = progress.as_ref() {
                cb(downloaded, total);
            }
        }
        Ok(())
    }

    async fn register_bundled_tools(
        &self,
        descriptor: &EngineDescriptor,
        install_dir: &Path,
        platform: PlatformTuple,
    ) {
        for tool in descriptor.required_tools {
            let path = install_dir
                .join("bin")
                .join(format!("{tool}{}", platform.executable_extension()));
            if path.exists() {
                self.tool_registry
                    .set_path(tool, &path.to_string_lossy(), Provenance::Bundled)
                    .await;
            }
        }
    }
}

#[async_trait]
impl BinaryFetcher for Fetcher {
    async fn fetch(
        &self,
        engine: &str,
        full_version: &str,
        platform: PlatformTuple,
    ) -> DbrigResult<PathBuf> {
        let descriptor = engine_descriptor_for_name(engine).ok_or_else(|| {
            DbrigError::dependency_missing(
                format!("unknown engine '{engine}'"),
                "use one of the supported engine names",
            )
        })?;
        self.ensure_binaries(&descriptor, full_version, platform, None)
            .await
    }
}

fn engine_descriptor_for_name(engine: &str) -> Option<EngineDescriptor> {
    dbrig_common::engine_descriptor::EngineName::from_str(engine)
        .map(EngineDescriptor::for_engine)
}

fn verify_installation(dir: &Path, descriptor: &EngineDescriptor, platform: PlatformTuple) -> bool {
    descriptor.required_tools.iter().all(|tool| {
        dir.join("bin")
            .join(format!("{tool}{}", platform.executable_extension()))
            .is_file()
    })
}

fn extract_archive(archive_path: &Path, dest: &Path, platform: PlatformTuple) -> DbrigResult<()> {
    std::fs::create_dir_all(dest).map_err(|err| {
        DbrigError::dependency_missing(
            format!("could not create staging directory: {err}"),
            "check disk space under the dbrig root",
        )
    })?;
    let result = if platform.os == Os::Win32 {
        extract_zip(archive_path, dest)
    } else {
        extract_tar_gz(archive_path, dest)
    };
    result.map_err(|err| {
        DbrigError::dependency_missing(
            format!("archive extraction failed: {err}"),
            "re-download the artifact; it may be corrupt",
        )
    })
}

fn extract_tar_gz(archive_path: &Path, dest: &Path) -> std::io::Result<()> {
    let file = std::fs::File::open(archive_path)?;
    let decoder = flate2::read::GzDecoder::new(file);
    let mut archive = tar::Archive::new(decoder);
    archive.unpack(dest)
}

fn extract_zip(archive_path: &Path, dest: &Path) -> std::io::Result<()> {
    let file = std::fs::File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
    archive
        .extract(dest)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbrig_common::platform::Arch;

    #[test]
    fn artifact_url_uses_zip_only_on_windows() {
        let linux = PlatformTuple::new(Os::Linux, Arch::X64);
        assert_eq!(
            artifact_url("example.test", "postgresql", "16.4.0", linux),
            "https://example.test/postgresql-16.4.0/postgresql-16.4.0-linux-x64.tar.gz"
        );
        let win = PlatformTuple::new(Os::Win32, Arch::X64);
        assert_eq!(
            artifact_url("example.test", "postgresql", "16.4.0", win),
            "https://example.test/postgresql-16.4.0/postgresql-16.4.0-win32-x64.zip"
        );
    }

    #[test]
    fn verify_installation_requires_every_tool() {
        let dir = std::env::temp_dir().join(format!("dbrig-fetch-verify-{}", std::process::id()));
        let bin = dir.join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        let descriptor =
            EngineDescriptor::for_engine(dbrig_common::engine_descriptor::EngineName::Redis);
        let platform = PlatformTuple::new(Os::Linux, Arch::X64);
        assert!(!verify_installation(&dir, &descriptor, platform));
        for tool in descriptor.required_tools {
            std::fs::write(bin.join(tool), b"").unwrap();
        }
        assert!(verify_installation(&dir, &descriptor, platform));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
