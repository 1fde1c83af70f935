use serde::{Deserialize, Serialize};

/// Host operating system, restricted to the set the Fetcher knows how to
/// download artifacts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    Darwin,
    Linux,
    Win32,
}

impl Os {
    pub fn as_str(&self) -> &'static str {
        match self {
            Os::Darwin => "darwin",
            Os::Linux => "linux",
            Os::Win32 => "win32",
        }
    }

    /// The current host OS, or `None` on a platform dbrig does not support
    /// (BSD, other unix variants, etc).
    pub fn current() -> Option<Os> {
        match std::env::consts::OS {
            "macos" => Some(Os::Darwin),
            "linux" => Some(Os::Linux),
            "windows" => Some(Os::Win32),
            _ => None,
        }
    }
}

impl std::fmt::Display for Os {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    X64,
    Arm64,
}

impl Arch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::X64 => "x64",
            Arch::Arm64 => "arm64",
        }
    }

    pub fn current() -> Option<Arch> {
        match std::env::consts::ARCH {
            "x86_64" => Some(Arch::X64),
            "aarch64" => Some(Arch::Arm64),
            _ => None,
        }
    }
}

impl std::fmt::Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A (os, arch) pair, the unit the Binary Registry and Fetcher key artifacts
/// by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlatformTuple {
    pub os: Os,
    pub arch: Arch,
}

impl PlatformTuple {
    pub fn new(os: Os, arch: Arch) -> Self {
        Self { os, arch }
    }

    /// Probe the running process's OS/arch. Returns `None` on an
    /// unsupported host, mirroring `getPlatformInfo`'s rejection of anything
    /// outside {darwin,linux,win32} x {x64,arm64}.
    pub fn current() -> Option<PlatformTuple> {
        Some(PlatformTuple::new(Os::current()?, Arch::current()?))
    }

    /// Directory-name fragment used by `binaryRoot`: `<os>-<arch>`.
    pub fn dir_fragment(&self) -> String {
        format!("{}-{}", self.os, self.arch)
    }

    pub fn executable_extension(&self) -> &'static str {
        match self.os {
            Os::Win32 => ".exe",
            _ => "",
        }
    }
}

impl std::fmt::Display for PlatformTuple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.os, self.arch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_fragment_matches_artifact_naming() {
        let p = PlatformTuple::new(Os::Linux, Arch::X64);
        assert_eq!(p.dir_fragment(), "linux-x64");
    }

    #[test]
    fn windows_gets_exe_suffix() {
        let p = PlatformTuple::new(Os::Win32, Arch::X64);
        assert_eq!(p.executable_extension(), ".exe");
        let p = PlatformTuple::new(Os::Darwin, Arch::Arm64);
        assert_eq!(p.executable_extension(), "");
    }
}
