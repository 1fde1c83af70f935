use dbrig_common::error::{DbrigError, DbrigResult};
use dbrig_common::version::Version;
use std::sync::OnceLock;

fn version_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"(\d+)\.(\d+)(?:\.(\d+))?").expect("valid regex"))
}

/// `parseToolVersion`: regex `(\d+)\.(\d+)(?:\.(\d+))?` over the first line
/// of a tool's `--version` output; missing patch defaults to 0.
pub fn parse_tool_version(tool_version_output: &str) -> DbrigResult<Version> {
    let first_line = tool_version_output.lines().next().unwrap_or("");
    let caps = version_regex().captures(first_line).ok_or_else(|| {
        DbrigError::version_mismatch(
            format!("could not parse a version from '{first_line}'"),
            "verify the client tool reports a standard version string",
        )
    })?;
    let major = caps[1].parse().unwrap_or(0);
    let minor = caps[2].parse().unwrap_or(0);
    let patch = caps
        .get(3)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0);
    Ok(Version::new(major, minor, patch))
}

/// `parseDumpVersion` over plain-SQL text: greps the first 50 lines for
/// `Dumped from database version X.Y(.Z)?`. `None` if not found, matching
/// the "`null` dumpVersion is allowed" rule.
pub fn parse_dump_version_from_lines<'a>(lines: impl Iterator<Item = &'a str>) -> Option<Version> {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        regex::Regex::new(r"(?i)dumped from database version\s+(\d+)\.(\d+)(?:\.(\d+))?").unwrap()
    });
    for line in lines.take(50) {
        if let Some(caps) = re.captures(line) {
            let major = caps[1].parse().unwrap_or(0);
            let minor = caps[2].parse().unwrap_or(0);
            let patch = caps.get(3).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
            return Some(Version::new(major, minor, patch));
        }
    }
    None
}

/// `parseDumpVersion` for archive formats: invoke `<tool> --list` and grep
/// its output the same way.
pub async fn parse_dump_version_from_archive(tool_path: &str, dump_path: &std::path::Path) -> Option<Version> {
    let output = tokio::process::Command::new(tool_path)
        .arg("--list")
        .arg(dump_path)
        .output()
        .await
        .ok()?;
    let text = String::from_utf8_lossy(&output.stdout);
    parse_dump_version_from_lines(text.lines())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateResult {
    pub compatible: bool,
    pub error: Option<String>,
    pub warning: Option<String>,
}

/// `check(dump, tool)`: allows only tool >= dump (same family), warns on a
/// dump three or more majors behind the tool, and always treats an unknown
/// dump version as compatible with a warning.
pub fn check(dump: Option<Version>, tool: Version) -> GateResult {
    let Some(dump) = dump else {
        return GateResult {
            compatible: true,
            error: None,
            warning: Some("dump version unknown".to_string()),
        };
    };

    if dump.major > tool.major {
        return GateResult {
            compatible: false,
            error: Some(format!(
                "dump is from major version {} but the installed client tools are major version {} — install client tools for major {}",
                dump.major, tool.major, dump.major
            )),
            warning: None,
        };
    }

    if tool.major.saturating_sub(dump.major) >= 3 {
        return GateResult {
            compatible: true,
            error: None,
            warning: Some(format!(
                "dump is from a very old version ({dump}) compared to the installed tools ({tool})"
            )),
        };
    }

    GateResult {
        compatible: true,
        error: None,
        warning: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s5_tool_version_parsing() {
        let v = parse_tool_version("pg_restore (PostgreSQL) 14.9 (Homebrew)").unwrap();
        assert_eq!(v, Version::new(14, 9, 0));
    }

    #[test]
    fn s5_gate_trips_on_newer_dump() {
        let dump = Some(Version::new(17, 0, 0));
        let tool = Version::new(14, 9, 0);
        let result = check(dump, tool);
        assert!(!result.compatible);
        assert!(result.error.unwrap().contains("17"));
    }

    #[test]
    fn property_5_incompatible_implies_dump_major_greater() {
        for (dump_major, tool_major) in [(17, 14), (10, 9), (5, 4)] {
            let result = check(Some(Version::new(dump_major, 0, 0)), Version::new(tool_major, 0, 0));
            if !result.compatible {
                assert!(dump_major > tool_major);
            }
        }
        for (dump_major, tool_major) in [(14, 17), (9, 9), (4, 10)] {
            let result = check(Some(Version::new(dump_major, 0, 0)), Version::new(tool_major, 0, 0));
            assert!(tool_major >= dump_major);
            assert!(result.compatible || result.warning.is_some());
        }
    }

    #[test]
    fn null_dump_version_is_compatible_with_warning() {
        let result = check(None, Version::new(16, 0, 0));
        assert!(result.compatible);
        assert!(result.warning.unwrap().contains("unknown"));
    }

    #[test]
    fn very_old_dump_warns_but_is_compatible() {
        let result = check(Some(Version::new(10, 0, 0)), Version::new(16, 0, 0));
        assert!(result.compatible);
        assert!(result.warning.unwrap().contains("old"));
    }
}
