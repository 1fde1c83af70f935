use dbrig_common::engine_descriptor::EngineDescriptor;
use dbrig_common::error::{DbrigError, DbrigResult};
use dbrig_common::platform::PlatformTuple;
use dbrig_common::version::{compare, major_of, normalize_version};
use dbrig_paths::DbrigRoot;
use std::cmp::Ordering;
use std::path::PathBuf;
use tracing::info;

/// Result of [`resolve_binary`]: the directory that holds the resolved
/// version's `bin/`, the version actually resolved to, and whether
/// self-healing had to substitute a different version than requested.
#[derive(Debug, Clone)]
pub struct ResolvedBinary {
    pub directory: PathBuf,
    pub actual_version: String,
    pub healed: bool,
}

/// A callback invoked when self-healing rewrites a container's declared
/// version, so the caller can persist the updated manifest. `None` when no
/// container name was supplied (e.g. resolving ahead of `create`).
pub type ManifestRewrite<'a> = Option<Box<dyn FnMut(&str) + Send + 'a>>;

/// Anything capable of fetching and installing a missing version, so
/// `resolve_binary` doesn't depend on `dbrig-fetcher` directly (it would
/// otherwise be a cyclic crate dependency, since the Fetcher registers tools
/// back into this crate's Tool Registry).
#[async_trait::async_trait]
pub trait BinaryFetcher: Send + Sync {
    async fn fetch(
        &self,
        engine: &str,
        full_version: &str,
        platform: PlatformTuple,
    ) -> DbrigResult<PathBuf>;
}

/// `resolveBinary(engine, requestedVersion, containerName?)`, implementing
/// all five self-healing steps: exact match, same-major installed fallback,
/// download-latest-for-major, unsupported-major failure.
pub async fn resolve_binary(
    root: &DbrigRoot,
    descriptor: &EngineDescriptor,
    requested_version: &str,
    platform: PlatformTuple,
    fetcher: &dyn BinaryFetcher,
    mut on_healed_version: ManifestRewrite<'_>,
) -> DbrigResult<ResolvedBinary> {
    let engine = descriptor.name.as_str();
    let requested = normalize_version(requested_version, &descriptor.version_map);
    let primary_tool = descriptor
        .required_tools
        .first()
        .copied()
        .unwrap_or("bin");

    // Step 2: exact match already installed.
    let exact_dir = root.binary_root(engine, &requested, platform);
    if exact_dir.join("bin").join(primary_tool).exists()
        || exact_dir
            .join("bin")
            .join(format!("{primary_tool}{}", platform.executable_extension()))
            .exists()
    {
        return Ok(ResolvedBinary {
            directory: exact_dir,
            actual_version: requested,
            healed: false,
        });
    }

    let Some(requested_major) = major_of(&requested) else {
        return Err(DbrigError::version_mismatch(
            format!("'{requested}' is not a recognizable version for {engine}"),
            format!("use one of the versions supported for {engine}"),
        ));
    };

    // Step 3: any installed same-major version.
    if let Some(found) =
        dbrig_paths::find_installed_binary_for_major(root, engine, requested_major, platform)
            .map_err(|err| {
                DbrigError::dependency_missing(
                    format!("could not scan binary root: {err}"),
                    "check permissions on the dbrig root directory",
                )
            })?
    {
        info!(engine, requested = %requested, healed_to = %found, "self-healed to installed same-major version");
        if let Some(cb) = on_healed_version.as_mut() {
            cb(&found);
        }
        return Ok(ResolvedBinary {
            directory: root.binary_root(engine, &found, platform),
            actual_version: found,
            healed: true,
        });
    }

    // Step 4: fetch the latest supported version for this major.
    let latest_major = normalize_version(descriptor.latest_major, &descriptor.version_map);
    let Some(latest_major_num) = major_of(&latest_major) else {
        return Err(unsupported_major_error(descriptor, requested_major));
    };
    if requested_major > latest_major_num {
        return Err(unsupported_major_error(descriptor, requested_major));
    }

    let latest_for_major = if requested_major == latest_major_num {
        latest_major
    } else {
        // No installed/known full version for this major beyond the
        // requested one; attempt the requested shape itself.
        requested.clone()
    };

    match fetcher.fetch(engine, &latest_for_major, platform).await {
        Ok(directory) => {
            info!(engine, requested = %requested, healed_to = %latest_for_major, "self-healed via download");
            if let Some(cb) = on_healed_version.as_mut() {
                cb(&latest_for_major);
            }
            Ok(ResolvedBinary {
                directory,
                actual_version: latest_for_major,
                healed: true,
            })
        }
        Err(err) => Err(err),
    }
}

fn unsupported_major_error(descriptor: &EngineDescriptor, major: u32) -> DbrigError {
    DbrigError::version_mismatch(
        format!(
            "{} major version {major} is not supported (supported up to major {})",
            descriptor.display_name, descriptor.latest_major
        ),
        format!(
            "use a supported {} version, up to {}",
            descriptor.display_name, descriptor.latest_major
        ),
    )
}

/// Ordering helper used by callers that want "pick the newest installed
/// version" semantics elsewhere in the stack (e.g. listing installed
/// binaries for `dbrig status --all`).
pub fn newest(a: &str, b: &str) -> Ordering {
    compare(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbrig_common::engine_descriptor::EngineName;
    use dbrig_common::platform::{Arch, Os};
    use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

    struct NeverFetch;
    #[async_trait::async_trait]
    impl BinaryFetcher for NeverFetch {
        async fn fetch(&self, _engine: &str, _v: &str, _p: PlatformTuple) -> DbrigResult<PathBuf> {
            panic!("fetch should not be called in this test");
        }
    }

    fn platform() -> PlatformTuple {
        PlatformTuple::new(Os::Linux, Arch::X64)
    }

    #[tokio::test]
    async fn exact_match_short_circuits_without_healing() {
        let dir = std::env::temp_dir().join(format!("dbrig-reg-test-{}", std::process::id()));
        let bin_dir = dir.join("bin/postgresql-16.4.0-linux-x64/bin");
        std::fs::create_dir_all(&bin_dir).unwrap();
        std::fs::write(bin_dir.join("psql"), b"").unwrap();
        let root = DbrigRoot::new(&dir);
        let descriptor = EngineDescriptor::for_engine(EngineName::Postgresql);

        let resolved = resolve_binary(&root, &descriptor, "16.4.0", platform(), &NeverFetch, None)
            .await
            .unwrap();
        assert!(!resolved.healed);
        assert_eq!(resolved.actual_version, "16.4.0");
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn same_major_fallback_heals_and_rewrites_manifest() {
        let dir = std::env::temp_dir().join(format!("dbrig-reg-test2-{}", std::process::id()));
        let bin_dir = dir.join("bin/postgresql-16.1.0-linux-x64/bin");
        std::fs::create_dir_all(&bin_dir).unwrap();
        std::fs::write(bin_dir.join("psql"), b"").unwrap();
        let root = DbrigRoot::new(&dir);
        let descriptor = EngineDescriptor::for_engine(EngineName::Postgresql);

        let rewritten = AtomicBool::new(false);
        let resolved = resolve_binary(
            &root,
            &descriptor,
            "16.9.9",
            platform(),
            &NeverFetch,
            Some(Box::new(|_v| rewritten.store(true, AtomicOrdering::SeqCst))),
        )
        .await
        .unwrap();
        assert!(resolved.healed);
        assert_eq!(resolved.actual_version, "16.1.0");
        assert!(rewritten.load(AtomicOrdering::SeqCst));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn unsupported_major_fails_with_listing() {
        let dir = std::env::temp_dir().join(format!("dbrig-reg-test3-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let root = DbrigRoot::new(&dir);
        let descriptor = EngineDescriptor::for_engine(EngineName::Postgresql);

        let err = resolve_binary(&root, &descriptor, "99", platform(), &NeverFetch, None)
            .await
            .unwrap_err();
        assert!(err.suggestion.contains("16"));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
