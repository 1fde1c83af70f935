use crate::platform::PlatformTuple;

/// (engine, full-version, platform) identifying a single installed binary
/// directory. Installations are immutable once verified; re-install replaces
/// the whole directory rather than patching it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BinaryInstallation {
    pub engine: String,
    pub full_version: String,
    pub platform: PlatformTuple,
}

impl BinaryInstallation {
    pub fn new(engine: impl Into<String>, full_version: impl Into<String>, platform: PlatformTuple) -> Self {
        Self {
            engine: engine.into(),
            full_version: full_version.into(),
            platform,
        }
    }

    /// Directory-name fragment used under `<root>/bin/`:
    /// `<engine>-<fullVersion>-<os>-<arch>`.
    pub fn dir_name(&self) -> String {
        format!("{}-{}-{}", self.engine, self.full_version, self.platform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{Arch, Os};

    #[test]
    fn dir_name_matches_artifact_layout() {
        let inst = BinaryInstallation::new(
            "postgresql",
            "16.4.0",
            PlatformTuple::new(Os::Linux, Arch::X64),
        );
        assert_eq!(inst.dir_name(), "postgresql-16.4.0-linux-x64");
    }
}
