//! Key-Value family adapter: backs both `redis` and `valkey`. No SQL dialect
//! here, so the shape diverges from the two SQL-family adapters — a
//! generated config file instead of an init utility, numbered databases
//! instead of named ones, and a line-oriented remote-dump format instead of
//! INSERT statements.

use async_trait::async_trait;
use dbrig_common::backup::{BackupDescriptor, FormatTag};
use dbrig_common::container::Container;
use dbrig_common::engine_descriptor::{EngineDescriptor, EngineFamily, EngineName};
use dbrig_common::error::{DbrigError, DbrigResult};
use dbrig_common::platform::PlatformTuple;
use dbrig_paths::DbrigRoot;
use dbrig_registry::{BinaryFetcher, ToolRegistry};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

use crate::contract::*;
use crate::support::mask_connection_string;

const MAX_DATABASE_INDEX: u32 = 15;
const REMOTE_DUMP_KEY_WARNING_THRESHOLD: usize = 10_000;
const READINESS_TIMEOUT_SECS: u64 = 30;

pub struct RedisAdapter {
    root: DbrigRoot,
    descriptor: EngineDescriptor,
    platform: PlatformTuple,
    tool_registry: Arc<ToolRegistry>,
    fetcher: Arc<dyn BinaryFetcher>,
    is_valkey: bool,
}

impl RedisAdapter {
    pub fn new(
        root: DbrigRoot,
        platform: PlatformTuple,
        tool_registry: Arc<ToolRegistry>,
        fetcher: Arc<dyn BinaryFetcher>,
        is_valkey: bool,
    ) -> Self {
        let name = if is_valkey { EngineName::Valkey } else { EngineName::Redis };
        Self {
            root,
            descriptor: EngineDescriptor::for_engine(name),
            platform,
            tool_registry,
            fetcher,
            is_valkey,
        }
    }

    fn server_tool(&self) -> &'static str {
        if self.is_valkey { "valkey-server" } else { "redis-server" }
    }

    fn client_tool(&self) -> &'static str {
        if self.is_valkey { "valkey-cli" } else { "redis-cli" }
    }

    async fn tool_path(&self, tool: &str) -> DbrigResult<String> {
        self.tool_registry.get_path(tool).await.ok_or_else(|| {
            DbrigError::dependency_missing(
                format!("{tool} is not installed or registered"),
                format!("run `dbrig fetch {} <version>` to install it", self.descriptor.name),
            )
        })
    }

    fn data_dir(&self, container: &Container) -> PathBuf {
        self.root.data_dir(&container.engine, &container.name, self.descriptor.data_subdir)
    }

    fn pid_file(&self, container: &Container) -> PathBuf {
        self.root.pid_file(&container.engine, &container.name, self.descriptor.pid_file_name)
    }

    fn log_file(&self, container: &Container) -> PathBuf {
        self.root.log_file(&container.engine, &container.name, self.descriptor.log_file_name)
    }

    fn conf_file(&self, container: &Container) -> PathBuf {
        let name = if self.is_valkey { "valkey.conf" } else { "redis.conf" };
        self.root.engine_config_file(&container.engine, &container.name, name)
    }

    fn database_index(&self, container: &Container) -> DbrigResult<u32> {
        let idx: u32 = container
            .database
            .parse()
            .map_err(|_| DbrigError::invalid_identifier(&container.database))?;
        if idx > MAX_DATABASE_INDEX {
            return Err(DbrigError::invalid_identifier(&container.database));
        }
        Ok(idx)
    }

    /// Writes the generated config file: `daemonize yes` on POSIX (the
    /// server detaches itself), `no` on Windows (we detach it ourselves).
    async fn write_config(&self, container: &Container) -> DbrigResult<PathBuf> {
        let data_dir = self.data_dir(container);
        tokio::fs::create_dir_all(&data_dir).await.map_err(|err| {
            DbrigError::dependency_missing(format!("could not create data directory: {err}"), "check permissions on the dbrig root")
        })?;
        let daemonize = if cfg!(windows) { "no" } else { "yes" };
        let contents = format!(
            "port {}\nbind 127.0.0.1\ndir {}\npidfile {}\nlogfile {}\ndaemonize {daemonize}\nmaxclients {}\n",
            container.port,
            data_dir.display(),
            self.pid_file(container).display(),
            self.log_file(container).display(),
            self.descriptor.default_max_connections,
        );
        let conf_path = self.conf_file(container);
        tokio::fs::write(&conf_path, contents).await.map_err(|err| {
            DbrigError::dependency_missing(format!("could not write config file: {err}"), "check permissions on the dbrig root")
        })?;
        Ok(conf_path)
    }

    async fn run_client(&self, container: &Container, args: &[&str]) -> DbrigResult<String> {
        let tool = self.tool_path(self.client_tool()).await?;
        let output = Command::new(&tool)
            .args(["-h", "127.0.0.1", "-p"])
            .arg(container.port.to_string())
            .args(["-n"])
            .arg(self.database_index(container)?.to_string())
            .args(args)
            .output()
            .await
            .map_err(|err| DbrigError::connection_failed(format!("failed to run {}: {err}", self.client_tool())))?;
        if !output.status.success() {
            return Err(DbrigError::connection_failed(String::from_utf8_lossy(&output.stderr).to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    }
}

struct RedisReadiness {
    tool_registry: Arc<ToolRegistry>,
    client_tool: &'static str,
    port: u16,
}

#[async_trait]
impl dbrig_supervisor::ReadinessProbe for RedisReadiness {
    async fn probe(&self) -> bool {
        let Some(tool_path) = self.tool_registry.get_path(self.client_tool).await else {
            return false;
        };
        let output = Command::new(&tool_path)
            .args(["-h", "127.0.0.1", "-p"])
            .arg(self.port.to_string())
            .arg("PING")
            .output()
            .await;
        matches!(output, Ok(o) if o.status.success() && String::from_utf8_lossy(&o.stdout).trim() == "PONG")
    }
}

struct RedisGraceful {
    tool_path: String,
    port: u16,
}

#[async_trait]
impl dbrig_supervisor::GracefulShutdown for RedisGraceful {
    async fn request_shutdown(&self) -> bool {
        if self.tool_path.is_empty() {
            return false;
        }
        let output = Command::new(&self.tool_path)
            .args(["-h", "127.0.0.1", "-p"])
            .arg(self.port.to_string())
            .args(["SHUTDOWN", "NOSAVE"])
            .output()
            .await;
        // redis-cli reports a connection-reset error on a successful
        // SHUTDOWN since the server closes the socket before replying.
        matches!(output, Ok(_))
    }
}

#[async_trait]
impl EngineAdapter for RedisAdapter {
    fn engine_name(&self) -> &'static str {
        self.descriptor.name.as_str()
    }

    async fn fetch_available_versions(&self) -> DbrigResult<HashMap<u32, Vec<String>>> {
        let mut map: HashMap<u32, Vec<String>> = HashMap::new();
        for version in self.descriptor.version_map.values() {
            if let Some(major) = dbrig_common::version::major_of(version) {
                map.entry(major).or_default().push(version.clone());
            }
        }
        Ok(map)
    }

    async fn ensure_binaries(&self, version: &str, _progress: Option<ProgressCallback>) -> DbrigResult<PathBuf> {
        dbrig_registry::resolve_binary(&self.root, &self.descriptor, version, self.platform, self.fetcher.as_ref(), None)
            .await
            .map(|r| r.directory)
    }

    async fn is_binary_installed(&self, version: &str) -> bool {
        let normalized = dbrig_common::version::normalize_version(version, &self.descriptor.version_map);
        self.root
            .tool_path(self.engine_name(), &normalized, self.platform, self.server_tool())
            .exists()
    }

    async fn init_data_dir(&self, container: &Container, _version: &str, _opts: &HashMap<String, String>) -> DbrigResult<PathBuf> {
        let data_dir = self.data_dir(container);
        let pre_existing = data_dir.exists();
        match tokio::fs::create_dir_all(&data_dir).await {
            Ok(_) => Ok(data_dir),
            Err(err) => {
                if !pre_existing {
                    let _ = tokio::fs::remove_dir_all(&data_dir).await;
                }
                Err(DbrigError::dependency_missing(format!("could not create data directory: {err}"), "check permissions on the dbrig root"))
            }
        }
    }

    async fn start(&self, container: &Container, _progress: Option<ProgressCallback>) -> DbrigResult<StartResult> {
        self.database_index(container)?;
        let conf_path = self.write_config(container).await?;
        let server = self.tool_path(self.server_tool()).await?;

        let spec = dbrig_supervisor::SpawnSpec {
            program: PathBuf::from(server),
            args: vec![conf_path.to_string_lossy().to_string()],
            working_dir: None,
            env: vec![],
            log_file: self.log_file(container),
            pid_file: self.pid_file(container),
            // `daemonize yes` means the server forks and exits the parent,
            // so the supervisor discovers the real PID via the bound port.
            engine_writes_pid: !cfg!(windows),
            may_refork: !cfg!(windows),
            readiness_poll_interval: Duration::from_millis(200),
            start_timeout: Duration::from_secs(READINESS_TIMEOUT_SECS),
        };

        let readiness = RedisReadiness {
            tool_registry: self.tool_registry.clone(),
            client_tool: self.client_tool(),
            port: container.port,
        };
        let outcome = dbrig_supervisor::start(&spec, &readiness, Some(container.port)).await?;
        info!(container = %container.name, pid = outcome.pid, "key-value container started");

        let url = format!("{}://127.0.0.1:{}/{}", self.descriptor.connection_scheme, container.port, container.database);
        Ok(StartResult { port: container.port, url })
    }

    async fn stop(&self, container: &Container) {
        let tool_path = self.tool_registry.get_path(self.client_tool()).await.unwrap_or_default();
        let graceful = RedisGraceful { tool_path, port: container.port };
        if let Err(err) = dbrig_supervisor::stop(&self.pid_file(container), &graceful, &container.name, false).await {
            warn!(container = %container.name, %err, "stop escalated to forced termination and still failed");
        }
    }

    async fn status(&self, container: &Container) -> StatusResult {
        let report = dbrig_supervisor::status(&self.pid_file(container)).await;
        StatusResult { running: report.running, message: report.message }
    }

    async fn connect(&self, container: &Container, database: Option<&str>) -> DbrigResult<()> {
        let tool = self.tool_path(self.client_tool()).await?;
        let db_index = database.map(str::to_string).unwrap_or_else(|| container.database.clone());
        Command::new(&tool)
            .args(["-h", "127.0.0.1", "-p"])
            .arg(container.port.to_string())
            .args(["-n"])
            .arg(db_index)
            .status()
            .await
            .map_err(|err| DbrigError::dependency_missing(format!("failed to launch {}: {err}", self.client_tool()), "verify the client tool is installed"))?;
        Ok(())
    }

    async fn create_database(&self, _container: &Container, _name: &str) -> DbrigResult<()> {
        // Numbered databases are pre-allocated by the server; selecting an
        // in-range index is sufficient, nothing to create.
        Ok(())
    }

    async fn drop_database(&self, container: &Container, _name: &str) -> DbrigResult<()> {
        self.run_client(container, &["FLUSHDB"]).await?;
        Ok(())
    }

    async fn get_database_size(&self, container: &Container) -> Option<u64> {
        let info = self.run_client(container, &["INFO", "memory"]).await.ok()?;
        info.lines()
            .find_map(|line| line.strip_prefix("used_memory:"))
            .and_then(|v| v.trim().parse().ok())
    }

    async fn execute_query(&self, container: &Container, query: &str, _opts: &QueryOptions) -> DbrigResult<QueryResult> {
        let parts: Vec<&str> = query.split_whitespace().collect();
        if parts.is_empty() {
            return Ok(QueryResult { columns: vec![], rows: vec![] });
        }
        let output = self.run_client(container, &parts).await?;
        let rows = output.lines().map(|line| vec![line.to_string()]).collect();
        Ok(QueryResult { columns: vec!["reply".to_string()], rows })
    }

    async fn run_script(&self, container: &Container, input: &ScriptInput) -> DbrigResult<()> {
        let commands = if let Some(sql) = &input.sql {
            sql.clone()
        } else if let Some(file) = &input.file {
            tokio::fs::read_to_string(file).await.map_err(|err| {
                DbrigError::dependency_missing(format!("could not read script file: {err}"), "verify the script path exists")
            })?
        } else {
            return Ok(());
        };
        for line in commands.lines().filter(|l| !l.trim().is_empty()) {
            let parts: Vec<&str> = line.split_whitespace().collect();
            self.run_client(container, &parts).await?;
        }
        Ok(())
    }

    async fn backup(&self, container: &Container, out_path: &Path, opts: &BackupOptions) -> DbrigResult<BackupResult> {
        match opts.format {
            Some(FormatTag::Text) => {
                let dump = self.dump_text(container).await?;
                tokio::fs::write(out_path, &dump).await.map_err(|err| {
                    DbrigError::dependency_missing(format!("could not write backup file: {err}"), "check disk space at the output path")
                })?;
                Ok(BackupResult { path: out_path.to_path_buf(), format: FormatTag::Text, size: dump.len() as u64 })
            }
            _ => {
                let status = dbrig_supervisor::status(&self.pid_file(container)).await;
                if status.running {
                    return Err(DbrigError::connection_failed(
                        "the container must be stopped for an RDB file copy; use the text format to back up a running container",
                    ));
                }
                let rdb_path = self.data_dir(container).join("dump.rdb");
                tokio::fs::copy(&rdb_path, out_path).await.map_err(|err| {
                    DbrigError::dependency_missing(format!("could not copy dump.rdb: {err}"), "verify a snapshot file exists in the data directory")
                })?;
                let size = tokio::fs::metadata(out_path).await.map(|m| m.len()).unwrap_or(0);
                Ok(BackupResult { path: out_path.to_path_buf(), format: FormatTag::Rdb, size })
            }
        }
    }

    async fn restore(&self, container: &Container, backup_path: &Path, _opts: &RestoreOptions) -> DbrigResult<RestoreResult> {
        let descriptor = self.detect_backup_format(backup_path).await?;
        match descriptor.format {
            FormatTag::Rdb => {
                let status = dbrig_supervisor::status(&self.pid_file(container)).await;
                if status.running {
                    return Err(DbrigError::connection_failed(
                        "the container must be stopped to restore an RDB file; stop it first",
                    ));
                }
                let rdb_path = self.data_dir(container).join("dump.rdb");
                tokio::fs::copy(backup_path, &rdb_path).await.map_err(|err| {
                    DbrigError::dependency_missing(format!("could not copy RDB file into place: {err}"), "check disk space and permissions")
                })?;
                Ok(RestoreResult { format: FormatTag::Rdb, stdout: String::new(), stderr: String::new(), code: 0 })
            }
            FormatTag::Text => {
                let contents = tokio::fs::read_to_string(backup_path).await.map_err(|err| {
                    DbrigError::dependency_missing(format!("could not read backup file: {err}"), "verify the backup path exists")
                })?;
                let mut last_error = String::new();
                for line in contents.lines().filter(|l| !l.trim().is_empty()) {
                    let parts: Vec<&str> = line.split_whitespace().collect();
                    if let Err(err) = self.run_client(container, &parts).await {
                        last_error = err.to_string();
                    }
                }
                Ok(RestoreResult { format: FormatTag::Text, stdout: String::new(), stderr: last_error, code: 0 })
            }
            other => Err(DbrigError::wrong_engine_dump(format!("{other:?}"), self.engine_name(), self.engine_name())),
        }
    }

    async fn detect_backup_format(&self, path: &Path) -> DbrigResult<BackupDescriptor> {
        let header = dbrig_backup::read_header(path).await?;
        let format = dbrig_backup::detect_format(&header, path.extension().and_then(|e| e.to_str()), EngineFamily::KeyValue);
        Ok(dbrig_backup::describe(format))
    }

    async fn dump_from_connection_string(&self, connection_string: &str, out_path: &Path) -> DbrigResult<DumpResult> {
        let (host, port) = parse_redis_connection_string(connection_string).ok_or_else(|| {
            DbrigError::connection_failed(format!("could not parse connection string {}", mask_connection_string(connection_string)))
        })?;
        let cli = self.tool_path(self.client_tool()).await?;

        let keys_output = Command::new(&cli)
            .args(["-h", &host, "-p"])
            .arg(port.to_string())
            .arg("KEYS")
            .arg("*")
            .output()
            .await
            .map_err(|err| DbrigError::connection_failed(format!("KEYS against {host}:{port} failed: {err}")))?;
        if !keys_output.status.success() {
            return Err(DbrigError::connection_failed(String::from_utf8_lossy(&keys_output.stderr).to_string()));
        }
        let keys: Vec<String> = String::from_utf8_lossy(&keys_output.stdout).lines().map(str::to_string).collect();

        let mut warnings = Vec::new();
        if keys.len() > REMOTE_DUMP_KEY_WARNING_THRESHOLD {
            warnings.push(format!(
                "enumerated {} keys via KEYS *, which blocks the server O(N); consider SCAN for production use",
                keys.len()
            ));
        }

        let mut script = String::new();
        for key in &keys {
            let Some(command) = self.dump_key_command(&cli, &host, port, key).await? else {
                continue;
            };
            script.push_str(&command);
            script.push('\n');
        }

        tokio::fs::write(out_path, &script).await.map_err(|err| {
            DbrigError::dependency_missing(format!("could not write dump file: {err}"), "check disk space at the output path")
        })?;
        Ok(DumpResult { path: out_path.to_path_buf(), warnings })
    }

    async fn create_user(&self, _container: &Container, username: &str, _password: &str, _database: Option<&str>) -> DbrigResult<UserCredentials> {
        Err(DbrigError::unsupported_engine_op(self.engine_name(), format!("createUser({username})")))
    }

    async fn list_databases(&self, _container: &Container) -> DbrigResult<Vec<String>> {
        Ok((0..=MAX_DATABASE_INDEX).map(|i| i.to_string()).collect())
    }
}

impl RedisAdapter {
    /// Line-oriented command dump: `GET`/`HGETALL`/etc. rewritten as
    /// restorable `SET`/`HSET`/… commands, used for the text backup format.
    async fn dump_text(&self, container: &Container) -> DbrigResult<String> {
        let keys = self.run_client(container, &["KEYS", "*"]).await?;
        let cli = self.tool_path(self.client_tool()).await?;
        let mut script = String::new();
        for key in keys.lines().filter(|l| !l.is_empty()) {
            if let Some(command) = self.dump_key_command(&cli, "127.0.0.1", container.port, key).await? {
                script.push_str(&command);
                script.push('\n');
            }
        }
        Ok(script)
    }

    /// Fetches one key's type, value, and TTL and emits the restorable
    /// command, escaping values with `\`/`"`/`\n`/`\r`.
    async fn dump_key_command(&self, cli: &str, host: &str, port: u16, key: &str) -> DbrigResult<Option<String>> {
        let run = |args: Vec<String>| {
            let cli = cli.to_string();
            let host = host.to_string();
            async move {
                let output = Command::new(&cli)
                    .args(["-h", &host, "-p"])
                    .arg(port.to_string())
                    .args(&args)
                    .output()
                    .await
                    .map_err(|err| DbrigError::connection_failed(err.to_string()))?;
                Ok::<String, DbrigError>(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
            }
        };

        let key_type = run(vec!["TYPE".to_string(), key.to_string()]).await?;
        let ttl: i64 = run(vec!["TTL".to_string(), key.to_string()]).await?.parse().unwrap_or(-1);
        let escaped_key = escape_redis_value(key);

        let set_command = match key_type.as_str() {
            "string" => {
                let value = run(vec!["GET".to_string(), key.to_string()]).await?;
                format!("SET {escaped_key} \"{}\"", escape_redis_value(&value))
            }
            "hash" => {
                let fields = run(vec!["HGETALL".to_string(), key.to_string()]).await?;
                let pairs: Vec<String> = fields
                    .lines()
                    .collect::<Vec<_>>()
                    .chunks(2)
                    .filter(|c| c.len() == 2)
                    .map(|c| format!("\"{}\" \"{}\"", escape_redis_value(c[0]), escape_redis_value(c[1])))
                    .collect();
                if pairs.is_empty() {
                    return Ok(None);
                }
                format!("HSET {escaped_key} {}", pairs.join(" "))
            }
            "list" => {
                let items = run(vec!["LRANGE".to_string(), key.to_string(), "0".to_string(), "-1".to_string()]).await?;
                let values: Vec<String> = items.lines().map(|v| format!("\"{}\"", escape_redis_value(v))).collect();
                if values.is_empty() {
                    return Ok(None);
                }
                format!("RPUSH {escaped_key} {}", values.join(" "))
            }
            "set" => {
                let members = run(vec!["SMEMBERS".to_string(), key.to_string()]).await?;
                let values: Vec<String> = members.lines().map(|v| format!("\"{}\"", escape_redis_value(v))).collect();
                if values.is_empty() {
                    return Ok(None);
                }
                format!("SADD {escaped_key} {}", values.join(" "))
            }
            "zset" => {
                let members = run(vec!["ZRANGE".to_string(), key.to_string(), "0".to_string(), "-1".to_string(), "WITHSCORES".to_string()]).await?;
                let pairs: Vec<String> = members
                    .lines()
                    .collect::<Vec<_>>()
                    .chunks(2)
                    .filter(|c| c.len() == 2)
                    .map(|c| format!("{} \"{}\"", c[1], escape_redis_value(c[0])))
                    .collect();
                if pairs.is_empty() {
                    return Ok(None);
                }
                format!("ZADD {escaped_key} {}", pairs.join(" "))
            }
            "none" => return Ok(None),
            other => {
                warn!(key, key_type = other, "skipping key of unsupported type during remote dump");
                return Ok(None);
            }
        };

        if ttl > 0 {
            Ok(Some(format!("{set_command}\nEXPIRE {escaped_key} {ttl}")))
        } else {
            Ok(Some(set_command))
        }
    }
}

fn escape_redis_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n").replace('\r', "\\r")
}

/// Parses `redis://`, `rediss://`, `valkey://`, `valkeys://` into `(host,
/// port)`; the `s` variants imply TLS, which is not modeled further here
/// since both CLIs auto-negotiate it from the scheme when given a full URL.
fn parse_redis_connection_string(conn: &str) -> Option<(String, u16)> {
    let without_scheme = conn
        .strip_prefix("rediss://")
        .or_else(|| conn.strip_prefix("redis://"))
        .or_else(|| conn.strip_prefix("valkeys://"))
        .or_else(|| conn.strip_prefix("valkey://"))?;
    let host_port = without_scheme.split('/').next()?;
    let host_port = host_port.rsplit_once('@').map(|(_, hp)| hp).unwrap_or(host_port);
    let (host, port) = host_port.split_once(':')?;
    Some((host.to_string(), port.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_four_schemes() {
        assert_eq!(parse_redis_connection_string("redis://127.0.0.1:6379/0"), Some(("127.0.0.1".to_string(), 6379)));
        assert_eq!(parse_redis_connection_string("rediss://host:6380"), Some(("host".to_string(), 6380)));
        assert_eq!(parse_redis_connection_string("valkey://user@host:6379"), Some(("host".to_string(), 6379)));
        assert_eq!(parse_redis_connection_string("valkeys://host:6380/2"), Some(("host".to_string(), 6380)));
        assert_eq!(parse_redis_connection_string("postgresql://host:5432"), None);
    }

    #[test]
    fn escapes_control_characters() {
        assert_eq!(escape_redis_value("a\"b\\c\nd\re"), "a\\\"b\\\\c\\nd\\re");
    }
}
