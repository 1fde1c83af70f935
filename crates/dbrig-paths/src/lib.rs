//! Paths Service: deterministic functions over a root directory. Every
//! function here is pure path arithmetic — no function in this crate creates,
//! removes, or writes a file, except `find_installed_binary_for_major`,
//! which only *reads* a directory listing to support self-healing.

use dbrig_common::platform::PlatformTuple;
use std::path::{Path, PathBuf};

/// The dbrig root directory (`~/.dbrig` by default, or `--root`/`DBRIG_ROOT`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbrigRoot(PathBuf);

impl DbrigRoot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// `<root>/config.json`, the Tool Registry document.
    pub fn config_file(&self) -> PathBuf {
        self.0.join("config.json")
    }

    pub fn bin_root(&self) -> PathBuf {
        self.0.join("bin")
    }

    pub fn containers_root(&self) -> PathBuf {
        self.0.join("containers")
    }

    /// `binaryRoot(engine, version, os, arch)`.
    pub fn binary_root(&self, engine: &str, full_version: &str, platform: PlatformTuple) -> PathBuf {
        self.bin_root()
            .join(format!("{engine}-{full_version}-{platform}"))
    }

    /// `containerRoot(engine, name)`.
    pub fn container_root(&self, engine: &str, name: &str) -> PathBuf {
        self.containers_root().join(engine).join(name)
    }

    pub fn manifest_file(&self, engine: &str, name: &str) -> PathBuf {
        self.container_root(engine, name).join("container.json")
    }

    /// `dataDir`.
    pub fn data_dir(&self, engine: &str, name: &str, data_subdir: &str) -> PathBuf {
        self.container_root(engine, name).join(data_subdir)
    }

    /// `logFile`.
    pub fn log_file(&self, engine: &str, name: &str, log_file_name: &str) -> PathBuf {
        self.container_root(engine, name).join(log_file_name)
    }

    /// `pidFile`.
    pub fn pid_file(&self, engine: &str, name: &str, pid_file_name: &str) -> PathBuf {
        self.container_root(engine, name).join(pid_file_name)
    }

    /// `configFile` — the engine's own config, for engines that need one
    /// (e.g. `postgresql.conf`, `redis.conf`).
    pub fn engine_config_file(&self, engine: &str, name: &str, conf_file_name: &str) -> PathBuf {
        self.container_root(engine, name).join(conf_file_name)
    }

    /// The path to a tool binary inside an installation directory:
    /// `bin/<tool><ext>`.
    pub fn tool_path(
        &self,
        engine: &str,
        full_version: &str,
        platform: PlatformTuple,
        tool: &str,
    ) -> PathBuf {
        self.binary_root(engine, full_version, platform)
            .join("bin")
            .join(format!("{tool}{}", platform.executable_extension()))
    }
}

/// `findInstalledBinaryForMajor(engine, majorVersion, os, arch)`: scans
/// `<root>/bin/` for any installed full-version directory whose major
/// component matches. Used by the Binary Registry's self-healing step 3.
/// Read-only; returns the first match found, preferring the highest patch if
/// more than one full version shares the major.
pub fn find_installed_binary_for_major(
    root: &DbrigRoot,
    engine: &str,
    major: u32,
    platform: PlatformTuple,
) -> std::io::Result<Option<String>> {
    let bin_root = root.bin_root();
    if !bin_root.is_dir() {
        return Ok(None);
    }
    let prefix = format!("{engine}-");
    let suffix = format!("-{platform}");
    let mut best: Option<(dbrig_common::Version, String)> = None;
    for entry in std::fs::read_dir(&bin_root)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(rest) = name.strip_prefix(&prefix) else {
            continue;
        };
        let Some(full_version) = rest.strip_suffix(&suffix) else {
            continue;
        };
        let Some(version) = dbrig_common::version::Version::parse(&dbrig_common::version::normalize_shape(full_version)) else {
            continue;
        };
        if version.major != major {
            continue;
        }
        if best.as_ref().map(|(v, _)| version > *v).unwrap_or(true) {
            best = Some((version, full_version.to_string()));
        }
    }
    Ok(best.map(|(_, v)| v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbrig_common::platform::{Arch, Os};

    fn platform() -> PlatformTuple {
        PlatformTuple::new(Os::Linux, Arch::X64)
    }

    #[test]
    fn path_layout_is_deterministic() {
        let root = DbrigRoot::new("/home/user/.dbrig");
        assert_eq!(
            root.binary_root("postgresql", "16.4.0", platform()),
            PathBuf::from("/home/user/.dbrig/bin/postgresql-16.4.0-linux-x64")
        );
        assert_eq!(
            root.container_root("postgresql", "mydb"),
            PathBuf::from("/home/user/.dbrig/containers/postgresql/mydb")
        );
        assert_eq!(
            root.manifest_file("postgresql", "mydb"),
            PathBuf::from("/home/user/.dbrig/containers/postgresql/mydb/container.json")
        );
    }

    #[test]
    fn never_touches_filesystem_for_pure_functions() {
        // Constructing and deriving paths from a root that doesn't exist on
        // disk must not fail or create anything.
        let root = DbrigRoot::new("/nonexistent/path/for/testing");
        let _ = root.config_file();
        let _ = root.log_file("redis", "cache", "redis.log");
        assert!(!root.as_path().exists());
    }

    #[test]
    fn finds_highest_patch_for_matching_major() {
        let dir = tempdir();
        std::fs::create_dir_all(dir.join("bin/postgresql-16.1.0-linux-x64")).unwrap();
        std::fs::create_dir_all(dir.join("bin/postgresql-16.4.0-linux-x64")).unwrap();
        std::fs::create_dir_all(dir.join("bin/postgresql-15.2.0-linux-x64")).unwrap();
        let root = DbrigRoot::new(&dir);
        let found = find_installed_binary_for_major(&root, "postgresql", 16, platform())
            .unwrap()
            .unwrap();
        assert_eq!(found, "16.4.0");
        std::fs::remove_dir_all(&dir).unwrap();
    }

    fn tempdir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("dbrig-paths-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
