use serde::{Deserialize, Serialize};

/// The closed set of backup format tags. Produced by the Backup Format
/// Detector, consumed by the Version Gate and the restore dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatTag {
    Sql,
    Compressed,
    Custom,
    Tar,
    MysqlSql,
    PostgresqlSql,
    PostgresqlCustom,
    Rdb,
    Text,
    Snapshot,
    Unknown,
}

impl FormatTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatTag::Sql => "sql",
            FormatTag::Compressed => "compressed",
            FormatTag::Custom => "custom",
            FormatTag::Tar => "tar",
            FormatTag::MysqlSql => "mysql_sql",
            FormatTag::PostgresqlSql => "postgresql_sql",
            FormatTag::PostgresqlCustom => "postgresql_custom",
            FormatTag::Rdb => "rdb",
            FormatTag::Text => "text",
            FormatTag::Snapshot => "snapshot",
            FormatTag::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FormatTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// (format-tag, human description, suggested restore tool), returned by the
/// Backup Format Detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupDescriptor {
    pub format: FormatTag,
    pub description: String,
    pub suggested_tool: Option<String>,
}

impl BackupDescriptor {
    pub fn new(
        format: FormatTag,
        description: impl Into<String>,
        suggested_tool: Option<String>,
    ) -> Self {
        Self {
            format,
            description: description.into(),
            suggested_tool,
        }
    }
}

/// (dumpVersion, toolVersion) with a `null` dumpVersion allowed (unknown).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionPair {
    pub dump: Option<crate::version::Version>,
    pub tool: crate::version::Version,
}
