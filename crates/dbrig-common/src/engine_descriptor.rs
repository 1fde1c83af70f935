use std::collections::HashMap;

/// Which wire dialect an engine family speaks, used by the Engine Adapter
/// Contract to pick identifier quoting and restore tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineFamily {
    Postgres,
    Mysql,
    KeyValue,
    Http,
}

/// Static, one-per-supported-engine description. `EngineName` is the closed
/// set of engines dbrig knows; `EngineDescriptor` is the data the adapters
/// and Paths Service read off it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineName {
    Postgresql,
    Cockroachdb,
    Mysql,
    Mariadb,
    Redis,
    Valkey,
    Qdrant,
}

impl EngineName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineName::Postgresql => "postgresql",
            EngineName::Cockroachdb => "cockroachdb",
            EngineName::Mysql => "mysql",
            EngineName::Mariadb => "mariadb",
            EngineName::Redis => "redis",
            EngineName::Valkey => "valkey",
            EngineName::Qdrant => "qdrant",
        }
    }

    pub fn family(&self) -> EngineFamily {
        match self {
            EngineName::Postgresql | EngineName::Cockroachdb => EngineFamily::Postgres,
            EngineName::Mysql | EngineName::Mariadb => EngineFamily::Mysql,
            EngineName::Redis | EngineName::Valkey => EngineFamily::KeyValue,
            EngineName::Qdrant => EngineFamily::Http,
        }
    }

    pub fn from_str(s: &str) -> Option<EngineName> {
        match s {
            "postgresql" => Some(EngineName::Postgresql),
            "cockroachdb" => Some(EngineName::Cockroachdb),
            "mysql" => Some(EngineName::Mysql),
            "mariadb" => Some(EngineName::Mariadb),
            "redis" => Some(EngineName::Redis),
            "valkey" => Some(EngineName::Valkey),
            "qdrant" => Some(EngineName::Qdrant),
            _ => None,
        }
    }
}

impl std::fmt::Display for EngineName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static per-engine facts. One instance per `EngineName`, built by
/// [`EngineDescriptor::for_engine`].
#[derive(Debug, Clone)]
pub struct EngineDescriptor {
    pub name: EngineName,
    pub display_name: &'static str,
    pub default_port: u16,
    pub port_range: (u16, u16),
    pub default_superuser: &'static str,
    pub connection_scheme: &'static str,
    pub log_file_name: &'static str,
    pub pid_file_name: &'static str,
    pub data_subdir: &'static str,
    pub required_tools: &'static [&'static str],
    pub default_max_connections: u32,
    pub default_version: &'static str,
    pub latest_major: &'static str,
    pub version_map: HashMap<String, String>,
}

impl EngineDescriptor {
    pub fn for_engine(name: EngineName) -> EngineDescriptor {
        match name {
            EngineName::Postgresql => EngineDescriptor {
                name,
                display_name: "PostgreSQL",
                default_port: 5432,
                port_range: (5432, 5531),
                default_superuser: "postgres",
                connection_scheme: "postgresql",
                log_file_name: "postgresql.log",
                pid_file_name: "postgresql.pid",
                data_subdir: "data",
                required_tools: &["psql", "pg_dump", "pg_restore", "pg_ctl", "initdb"],
                default_max_connections: 100,
                default_version: "16",
                latest_major: "16",
                version_map: version_map(&[("latest", "16.4.0")]),
            },
            EngineName::Cockroachdb => EngineDescriptor {
                name,
                display_name: "CockroachDB",
                default_port: 26257,
                port_range: (26257, 26356),
                default_superuser: "root",
                connection_scheme: "postgresql",
                log_file_name: "cockroachdb.log",
                pid_file_name: "cockroachdb.pid",
                data_subdir: "data",
                required_tools: &["cockroach"],
                default_max_connections: 100,
                default_version: "23",
                latest_major: "23",
                version_map: version_map(&[("latest", "23.2.0")]),
            },
            EngineName::Mysql => EngineDescriptor {
                name,
                display_name: "MySQL",
                default_port: 3306,
                port_range: (3306, 3405),
                default_superuser: "root",
                connection_scheme: "mysql",
                log_file_name: "mysql.log",
                pid_file_name: "mysql.pid",
                data_subdir: "data",
                required_tools: &["mysql", "mysqldump", "mysqladmin", "mysql_install_db"],
                default_max_connections: 151,
                default_version: "8",
                latest_major: "8",
                version_map: version_map(&[("latest", "8.0.39")]),
            },
            EngineName::Mariadb => EngineDescriptor {
                name,
                display_name: "MariaDB",
                default_port: 3306,
                port_range: (3306, 3405),
                default_superuser: "root",
                connection_scheme: "mysql",
                log_file_name: "mariadb.log",
                pid_file_name: "mariadb.pid",
                data_subdir: "data",
                required_tools: &["mysql", "mysqldump", "mysqladmin", "mariadb-install-db"],
                default_max_connections: 151,
                default_version: "11",
                latest_major: "11",
                version_map: version_map(&[("latest", "11.4.0")]),
            },
            EngineName::Redis => EngineDescriptor {
                name,
                display_name: "Redis",
                default_port: 6379,
                port_range: (6379, 6478),
                default_superuser: "",
                connection_scheme: "redis",
                log_file_name: "redis.log",
                pid_file_name: "redis.pid",
                data_subdir: "data",
                required_tools: &["redis-server", "redis-cli"],
                default_max_connections: 10000,
                default_version: "7",
                latest_major: "7",
                version_map: version_map(&[("latest", "7.2.0")]),
            },
            EngineName::Valkey => EngineDescriptor {
                name,
                display_name: "Valkey",
                default_port: 6379,
                port_range: (6379, 6478),
                default_superuser: "",
                connection_scheme: "valkey",
                log_file_name: "valkey.log",
                pid_file_name: "valkey.pid",
                data_subdir: "data",
                required_tools: &["valkey-server", "valkey-cli"],
                default_max_connections: 10000,
                default_version: "8",
                latest_major: "8",
                version_map: version_map(&[("latest", "8.0.0")]),
            },
            EngineName::Qdrant => EngineDescriptor {
                name,
                display_name: "Qdrant",
                default_port: 6333,
                port_range: (6333, 6432),
                default_superuser: "",
                connection_scheme: "http",
                log_file_name: "qdrant.log",
                pid_file_name: "qdrant.pid",
                data_subdir: "storage",
                required_tools: &["qdrant"],
                default_max_connections: 0,
                default_version: "1",
                latest_major: "1",
                version_map: version_map(&[("latest", "1.10.0")]),
            },
        }
    }
}

fn version_map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_groups_match_wire_dialect() {
        assert_eq!(EngineName::Postgresql.family(), EngineFamily::Postgres);
        assert_eq!(EngineName::Cockroachdb.family(), EngineFamily::Postgres);
        assert_eq!(EngineName::Mysql.family(), EngineFamily::Mysql);
        assert_eq!(EngineName::Redis.family(), EngineFamily::KeyValue);
        assert_eq!(EngineName::Qdrant.family(), EngineFamily::Http);
    }

    #[test]
    fn round_trips_through_str() {
        for e in [
            EngineName::Postgresql,
            EngineName::Mariadb,
            EngineName::Valkey,
            EngineName::Qdrant,
        ] {
            assert_eq!(EngineName::from_str(e.as_str()), Some(e));
        }
        assert_eq!(EngineName::from_str("oracle"), None);
    }

    #[test]
    fn latest_resolves_via_version_map() {
        let d = EngineDescriptor::for_engine(EngineName::Postgresql);
        assert_eq!(d.version_map.get("latest").unwrap(), "16.4.0");
    }
}
