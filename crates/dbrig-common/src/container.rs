use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

fn container_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_-]*$").expect("valid regex"))
}

/// Validate a container name per the Container data model: starts with a
/// letter, followed by letters/digits/underscore/hyphen. Matches the S1
/// scenario's valid/invalid name lists.
pub fn validate_container_name(name: &str) -> bool {
    !name.is_empty() && container_name_regex().is_match(name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    Created,
    Running,
    Stopped,
}

/// The central domain object, persisted as `container.json`. `status` is
/// advisory only — the Process Supervisor's `isRunning` check is the source
/// of truth, per the Container invariant (d).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    pub engine: String,
    pub version: String,
    pub port: u16,
    pub database: String,
    pub databases: Vec<String>,
    pub created: DateTime<Utc>,
    pub status: ContainerStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloned_from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary_path: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Container {
    pub fn new(
        name: impl Into<String>,
        engine: impl Into<String>,
        version: impl Into<String>,
        port: u16,
        database: impl Into<String>,
        created: DateTime<Utc>,
    ) -> Self {
        let database = database.into();
        Self {
            name: name.into(),
            engine: engine.into(),
            version: version.into(),
            port,
            databases: vec![database.clone()],
            database,
            created,
            status: ContainerStatus::Created,
            cloned_from: None,
            binary_path: None,
            updated_at: created,
        }
    }

    /// Invariant (c): `databases` always contains `database`.
    pub fn has_consistent_databases(&self) -> bool {
        self.databases.iter().any(|d| d == &self.database)
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_valid_names() {
        for n in ["mydb", "my-db", "my_db", "A1", "test-1"] {
            assert!(validate_container_name(n), "{n} should be valid");
        }
    }

    #[test]
    fn s1_invalid_names() {
        for n in ["1db", "-db", "_db", "my db", "my.db", ""] {
            assert!(!validate_container_name(n), "{n} should be invalid");
        }
    }

    #[test]
    fn new_container_satisfies_database_invariant() {
        let c = Container::new("mydb", "postgresql", "16.4.0", 5432, "mydb", Utc::now());
        assert!(c.has_consistent_databases());
        assert_eq!(c.status, ContainerStatus::Created);
    }
}
