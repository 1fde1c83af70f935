use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a registered tool's binary came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Bundled,
    System,
}

/// A single cached tool-name -> path mapping, one entry of the Tool
/// Registry's `binaries` map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRegistration {
    pub tool: String,
    pub path: String,
    pub source: Provenance,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// A tool registration is stale if its `updated_at` is older than this many
/// days, at which point `refreshIfStale` clears and re-discovers it.
pub const STALE_AFTER_DAYS: i64 = 7;

impl ToolRegistration {
    pub fn new(
        tool: impl Into<String>,
        path: impl Into<String>,
        source: Provenance,
        version: Option<String>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            tool: tool.into(),
            path: path.into(),
            source,
            version,
            updated_at,
        }
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.updated_at) > chrono::Duration::days(STALE_AFTER_DAYS)
    }

    /// Invariant: every cached path must exist on disk; callers are expected
    /// to evict immediately when this returns false.
    pub fn path_exists(&self) -> bool {
        std::path::Path::new(&self.path).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn staleness_threshold_is_seven_days() {
        let now = Utc::now();
        let fresh = ToolRegistration::new("psql", "/bin/psql", Provenance::System, None, now);
        assert!(!fresh.is_stale(now));

        let stale_time = now - Duration::days(8);
        let stale = ToolRegistration::new("psql", "/bin/psql", Provenance::System, None, stale_time);
        assert!(stale.is_stale(now));
    }
}
