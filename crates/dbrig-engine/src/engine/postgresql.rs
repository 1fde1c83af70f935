//! PostgreSQL-wire family adapter: backs both `postgresql` and, with minor
//! branching, `cockroachdb` (no native archive format, remote dump goes
//! through a synthetic CSV-to-INSERT pipeline instead of `pg_dump`). Shaped
//! on the `Cluster` struct this is grounded on: `initDataDir` mirrors
//! `create()`'s init-then-patch-config sequence, `start`/`stop` mirror
//! `start()`/`stop()`'s `pg_ctl`-driven lifecycle, and `createDatabase`/
//! `dropDatabase` mirror `createdb`/`dropdb`'s "already exists/does not
//! exist" idempotency.

use async_trait::async_trait;
use dbrig_common::backup::{BackupDescriptor, FormatTag};
use dbrig_common::container::Container;
use dbrig_common::engine_descriptor::{EngineDescriptor, EngineFamily, EngineName};
use dbrig_common::error::{DbrigError, DbrigResult};
use dbrig_common::identifier::quote_identifier;
use dbrig_common::platform::PlatformTuple;
use dbrig_common::sql::escape_sql_value;
use dbrig_paths::DbrigRoot;
use dbrig_registry::{BinaryFetcher, ToolRegistry};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{info, warn};

use crate::contract::*;
use crate::support::{mask_connection_string, parse_csv_records, require_valid_identifier};

const READINESS_TIMEOUT_SECS: u64 = 60;
const SYSTEM_DATABASES: &[&str] = &["postgres", "template0", "template1", "defaultdb", "system"];

pub struct PostgresAdapter {
    root: DbrigRoot,
    descriptor: EngineDescriptor,
    platform: PlatformTuple,
    tool_registry: Arc<ToolRegistry>,
    fetcher: Arc<dyn BinaryFetcher>,
    is_cockroach: bool,
}

impl PostgresAdapter {
    pub fn new(
        root: DbrigRoot,
        platform: PlatformTuple,
        tool_registry: Arc<ToolRegistry>,
        fetcher: Arc<dyn BinaryFetcher>,
        is_cockroach: bool,
    ) -> Self {
        let name = if is_cockroach {
            EngineName::Cockroachdb
        } else {
            EngineName::Postgresql
        };
        Self {
            root,
            descriptor: EngineDescriptor::for_engine(name),
            platform,
            tool_registry,
            fetcher,
            is_cockroach,
        }
    }

    fn client_tool(&self) -> &'static str {
        if self.is_cockroach { "cockroach" } else { "psql" }
    }

    fn server_tool(&self) -> &'static str {
        if self.is_cockroach { "cockroach" } else { "postgres" }
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
        self.root
            .data_dir(&container.engine, &container.name, self.descriptor.data_subdir)
    }

    fn pid_file(&self, container: &Container) -> PathBuf {
        self.root
            .pid_file(&container.engine, &container.name, self.descriptor.pid_file_name)
    }

    fn log_file(&self, container: &Container) -> PathBuf {
        self.root
            .log_file(&container.engine, &container.name, self.descriptor.log_file_name)
    }

    /// The database dbrig connects to for cluster-wide statements
    /// (`CREATE DATABASE`, `CREATE USER`, listing databases, readiness
    /// checks) rather than a specific user database.
    fn admin_database(&self) -> &'static str {
        if self.is_cockroach { "defaultdb" } else { "postgres" }
    }

    async fn run_query(&self, container: &Container, database: &str, sql: &str) -> DbrigResult<String> {
        let tool = self.tool_path(self.client_tool()).await?;
        let args = build_query_args(self.is_cockroach, container, self.descriptor.default_superuser, database, sql);
        let output = Command::new(&tool).args(&args).output().await.map_err(|err| {
            DbrigError::connection_failed(format!("failed to run {}: {err}", self.client_tool()))
        })?;
        if !output.status.success() {
            return Err(DbrigError::connection_failed(format!(
                "{} exited with {:?}: {}",
                self.client_tool(),
                output.status.code(),
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

struct PgReadiness {
    tool_registry: Arc<ToolRegistry>,
    is_cockroach: bool,
    default_superuser: &'static str,
    admin_database: &'static str,
    container: Container,
}

#[async_trait]
impl dbrig_supervisor::ReadinessProbe for PgReadiness {
    async fn probe(&self) -> bool {
        let client_tool = if self.is_cockroach { "cockroach" } else { "psql" };
        let Some(tool_path) = self.tool_registry.get_path(client_tool).await else {
            return false;
        };
        let args = build_query_args(self.is_cockroach, &self.container, self.default_superuser, self.admin_database, "SELECT 1");
        let output = Command::new(&tool_path).args(&args).output().await;
        matches!(output, Ok(o) if o.status.success())
    }
}

/// Client-tool args to run one query against a running container, using CSV
/// output so results are directly machine-parseable. A free function so the
/// readiness probe (which has no `&self` to call back into the adapter) can
/// share it with [`PostgresAdapter::run_query`].
fn build_query_args(is_cockroach: bool, container: &Container, user: &str, database: &str, sql: &str) -> Vec<String> {
    if is_cockroach {
        vec![
            "sql".to_string(),
            "--insecure".to_string(),
            format!("--host=127.0.0.1:{}", container.port),
            format!("--database={database}"),
            "--format=csv".to_string(),
            "-e".to_string(),
            sql.to_string(),
        ]
    } else {
        vec![
            "-h".to_string(),
            "127.0.0.1".to_string(),
            "-p".to_string(),
            container.port.to_string(),
            "-U".to_string(),
            user.to_string(),
            "-d".to_string(),
            database.to_string(),
            "--csv".to_string(),
            "-c".to_string(),
            sql.to_string(),
        ]
    }
}

struct PgGraceful {
    tool_path: String,
    data_dir: PathBuf,
    is_cockroach: bool,
}

#[async_trait]
impl dbrig_supervisor::GracefulShutdown for PgGraceful {
    async fn request_shutdown(&self) -> bool {
        if self.is_cockroach {
            // cockroach has no separate quiescence client command in the
            // single-node case; SIGTERM triggers its own drain sequence.
            return false;
        }
        let output = Command::new(&self.tool_path)
            .arg("stop")
            .arg("-D")
            .arg(&self.data_dir)
            .arg("-m")
            .arg("fast")
            .arg("-s")
            .output()
            .await;
        matches!(output, Ok(o) if o.status.success())
    }
}

#[async_trait]
impl EngineAdapter for PostgresAdapter {
    fn engine_name(&self) -> &'static str {
        self.descriptor.name.as_str()
    }

    async fn fetch_available_versions(&self) -> DbrigResult<HashMap<u32, Vec<String>>> {
        // No live artifact registry to query in this deployment; fall back
        // to the static per-engine version map, matching the "network
        // fail: cached or fallback map" error mode unconditionally.
        let mut map: HashMap<u32, Vec<String>> = HashMap::new();
        for version in self.descriptor.version_map.values() {
            if let Some(major) = dbrig_common::version::major_of(version) {
                map.entry(major).or_default().push(version.clone());
            }
        }
        Ok(map)
    }

    async fn ensure_binaries(
        &self,
        version: &str,
        _progress: Option<ProgressCallback>,
    ) -> DbrigResult<PathBuf> {
        dbrig_registry::resolve_binary(
            &self.root,
            &self.descriptor,
            version,
            self.platform,
            self.fetcher.as_ref(),
            None,
        )
        .await
        .map(|r| r.directory)
    }

    async fn is_binary_installed(&self, version: &str) -> bool {
        let normalized = dbrig_common::version::normalize_version(version, &self.descriptor.version_map);
        self.root
            .tool_path(self.engine_name(), &normalized, self.platform, self.server_tool())
            .exists()
    }

    async fn init_data_dir(
        &self,
        container: &Container,
        version: &str,
        opts: &HashMap<String, String>,
    ) -> DbrigResult<PathBuf> {
        let data_dir = self.data_dir(container);
        let pre_existing = data_dir.exists();
        let resolved = dbrig_registry::resolve_binary(
            &self.root,
            &self.descriptor,
            version,
            self.platform,
            self.fetcher.as_ref(),
            None,
        )
        .await?;

        let result = if self.is_cockroach {
            tokio::fs::create_dir_all(&data_dir).await.map_err(|err| {
                DbrigError::dependency_missing(format!("could not create data dir: {err}"), "check disk space")
            })
        } else {
            let initdb = resolved.directory.join("bin").join(format!("initdb{}", self.platform.executable_extension()));
            let output = Command::new(&initdb)
                .arg("--pgdata")
                .arg(&data_dir)
                .arg("--username")
                .arg(self.descriptor.default_superuser)
                .output()
                .await
                .map_err(|err| DbrigError::dependency_missing(format!("initdb failed to run: {err}"), "verify the PostgreSQL binaries are installed"))?;
            if !output.status.success() {
                Err(DbrigError::dependency_missing(
                    format!("initdb failed: {}", String::from_utf8_lossy(&output.stderr)),
                    "check the data directory is empty and writable",
                ))
            } else {
                patch_max_connections(&data_dir, opts.get("max_connections").map(String::as_str).unwrap_or(&self.descriptor.default_max_connections.to_string())).await
            }
        };

        if result.is_err() && !pre_existing {
            let _ = tokio::fs::remove_dir_all(&data_dir).await;
        }
        result.map(|_| data_dir)
    }

    async fn start(&self, container: &Container, _progress: Option<ProgressCallback>) -> DbrigResult<StartResult> {
        let data_dir = self.data_dir(container);
        let server = self.tool_path(self.server_tool()).await?;

        let args = if self.is_cockroach {
            vec![
                "start-single-node".to_string(),
                "--insecure".to_string(),
                format!("--store={}", data_dir.display()),
                format!("--listen-addr=127.0.0.1:{}", container.port),
                "--http-addr=127.0.0.1:0".to_string(),
            ]
        } else {
            vec![
                "-D".to_string(),
                data_dir.display().to_string(),
                "-p".to_string(),
                container.port.to_string(),
            ]
        };

        let spec = dbrig_supervisor::SpawnSpec {
            program: PathBuf::from(server),
            args,
            working_dir: None,
            env: vec![],
            log_file: self.log_file(container),
            pid_file: self.pid_file(container),
            engine_writes_pid: false,
            may_refork: false,
            readiness_poll_interval: std::time::Duration::from_millis(300),
            start_timeout: std::time::Duration::from_secs(READINESS_TIMEOUT_SECS),
        };

        let readiness = PgReadiness {
            tool_registry: self.tool_registry.clone(),
            is_cockroach: self.is_cockroach,
            default_superuser: self.descriptor.default_superuser,
            admin_database: self.admin_database(),
            container: container.clone(),
        };
        let outcome = dbrig_supervisor::start(&spec, &readiness, Some(container.port)).await?;
        info!(container = %container.name, pid = outcome.pid, "postgres-family container started");

        let scheme = self.descriptor.connection_scheme;
        let url = format!(
            "{scheme}://{}@127.0.0.1:{}/{}{}",
            self.descriptor.default_superuser,
            container.port,
            container.database,
            if self.is_cockroach { "" } else { "?sslmode=disable" }
        );
        Ok(StartResult { port: container.port, url })
    }

    async fn stop(&self, container: &Container) {
        let tool_path = self
            .tool_registry
            .get_path("pg_ctl")
            .await
            .unwrap_or_default();
        let graceful = PgGraceful {
            tool_path,
            data_dir: self.data_dir(container),
            is_cockroach: self.is_cockroach,
        };
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
        let db = database.unwrap_or(&container.database);
        let mut command = Command::new(&tool);
        if self.is_cockroach {
            command.args(["sql", "--insecure", &format!("--host=127.0.0.1:{}", container.port), &format!("--database={db}")]);
        } else {
            command.args(["-h", "127.0.0.1", "-p", &container.port.to_string(), "-U", self.descriptor.default_superuser, "-d", db]);
        }
        command.status().await.map_err(|err| {
            DbrigError::dependency_missing(format!("failed to launch {}: {err}", self.client_tool()), "verify the client tool is installed")
        })?;
        Ok(())
    }

    async fn create_database(&self, container: &Container, name: &str) -> DbrigResult<()> {
        require_valid_identifier(name)?;
        let quoted = quote_identifier(EngineFamily::Postgres, name);
        match self.run_query(container, self.admin_database(), &format!("CREATE DATABASE {quoted}")).await {
            Ok(_) => Ok(()),
            Err(err) if err.message.to_lowercase().contains("already exists") => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn drop_database(&self, container: &Container, name: &str) -> DbrigResult<()> {
        require_valid_identifier(name)?;
        if SYSTEM_DATABASES.contains(&name) {
            return Err(DbrigError::invalid_identifier(format!("{name} (refusing to drop a system database)")));
        }
        let quoted = quote_identifier(EngineFamily::Postgres, name);
        match self.run_query(container, self.admin_database(), &format!("DROP DATABASE {quoted}")).await {
            Ok(_) => Ok(()),
            Err(err) if err.message.to_lowercase().contains("does not exist") => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn get_database_size(&self, container: &Container) -> Option<u64> {
        let sql = format!("SELECT pg_database_size('{}')", container.database.replace('\'', "''"));
        let output = self.run_query(container, &container.database, &sql).await.ok()?;
        output.lines().nth(1)?.trim().parse().ok()
    }

    async fn execute_query(&self, container: &Container, query: &str, opts: &QueryOptions) -> DbrigResult<QueryResult> {
        let db = opts.database.as_deref().unwrap_or(&container.database);
        let output = self.run_query(container, db, query).await?;
        let records = parse_csv_records(&output, ',');
        let mut iter = records.into_iter();
        let columns = iter.next().unwrap_or_default();
        let rows: Vec<Vec<String>> = iter.collect();
        Ok(QueryResult { columns, rows })
    }

    async fn run_script(&self, container: &Container, input: &ScriptInput) -> DbrigResult<()> {
        let tool = self.tool_path(self.client_tool()).await?;
        let mut command = Command::new(&tool);
        if self.is_cockroach {
            command.args(["sql", "--insecure", &format!("--host=127.0.0.1:{}", container.port), &format!("--database={}", container.database)]);
        } else {
            command.args(["-h", "127.0.0.1", "-p", &container.port.to_string(), "-U", self.descriptor.default_superuser, "-d", &container.database]);
        }
        command.stdin(std::process::Stdio::piped());
        let mut child = command.spawn().map_err(|err| DbrigError::dependency_missing(format!("failed to launch {}: {err}", self.client_tool()), "verify the client tool is installed"))?;

        let sql_bytes = if let Some(sql) = &input.sql {
            sql.clone().into_bytes()
        } else if let Some(file) = &input.file {
            tokio::fs::read(file).await.map_err(|err| DbrigError::dependency_missing(format!("could not read script file: {err}"), "verify the script path exists"))?
        } else {
            Vec::new()
        };

        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(&sql_bytes).await;
        }
        let status = child.wait().await.map_err(|err| DbrigError::connection_failed(err.to_string()))?;
        if !status.success() {
            return Err(DbrigError::connection_failed(format!("{} exited with {:?}", self.client_tool(), status.code())));
        }
        Ok(())
    }

    async fn backup(&self, container: &Container, out_path: &Path, opts: &BackupOptions) -> DbrigResult<BackupResult> {
        if self.is_cockroach {
            return Err(DbrigError::unsupported_engine_op(self.engine_name(), "backup (no native archive format; use dump_from_connection_string)"));
        }
        let dump_tool = self.tool_path("pg_dump").await?;
        let db = opts.database.as_deref().unwrap_or(&container.database);
        let format = opts.format.unwrap_or(FormatTag::Custom);
        let format_flag = match format {
            FormatTag::Sql => "p",
            _ => "c",
        };
        let output = Command::new(&dump_tool)
            .args(["-h", "127.0.0.1", "-p", &container.port.to_string(), "-U", self.descriptor.default_superuser])
            .args(["-F", format_flag, "-f"])
            .arg(out_path)
            .arg(db)
            .output()
            .await
            .map_err(|err| DbrigError::dependency_missing(format!("pg_dump failed to run: {err}"), "verify pg_dump is installed"))?;
        if !output.status.success() {
            return Err(DbrigError::connection_failed(format!("pg_dump failed: {}", String::from_utf8_lossy(&output.stderr))));
        }
        let size = tokio::fs::metadata(out_path).await.map(|m| m.len()).unwrap_or(0);
        Ok(BackupResult { path: out_path.to_path_buf(), format, size })
    }

    async fn restore(&self, container: &Container, backup_path: &Path, opts: &RestoreOptions) -> DbrigResult<RestoreResult> {
        let descriptor = self.detect_backup_format(backup_path).await?;
        // `detect_format` only ever tags a dump `PostgresqlSql` when probed
        // against the MySQL family, so the only foreign tag reachable here
        // is `MysqlSql`; the fallback name is never actually surfaced.
        let foreign_engine = if descriptor.format == FormatTag::MysqlSql { "mysql" } else { self.engine_name() };
        dbrig_backup::assert_compatible_format(descriptor.format, self.engine_name(), foreign_engine)?;

        let db = opts.database.as_deref().unwrap_or(&container.database);

        if matches!(descriptor.format, FormatTag::Custom | FormatTag::Tar) {
            let restore_tool = self.tool_path("pg_restore").await?;
            if let Some(tool_path) = self.tool_registry.get_path("pg_restore").await {
                if let Some(tool_version_output) = Command::new(&tool_path).arg("--version").output().await.ok() {
                    let tool_version = dbrig_backup::parse_tool_version(&String::from_utf8_lossy(&tool_version_output.stdout)).ok();
                    let dump_version = dbrig_backup::parse_dump_version_from_archive(&tool_path, backup_path).await;
                    if let Some(tool_version) = tool_version {
                        let gate = dbrig_backup::check(dump_version, tool_version);
                        if !gate.compatible {
                            return Err(DbrigError::version_mismatch(
                                gate.error.unwrap_or_default(),
                                format!("install {} client tools for major {}", self.descriptor.display_name, dump_version.map(|v| v.major).unwrap_or(0)),
                            ));
                        }
                    }
                }
            }
            let output = Command::new(&restore_tool)
                .args(["-h", "127.0.0.1", "-p", &container.port.to_string(), "-U", self.descriptor.default_superuser])
                .args(["--no-owner", "--no-privileges", "-d", db])
                .arg(backup_path)
                .output()
                .await
                .map_err(|err| DbrigError::dependency_missing(format!("pg_restore failed to run: {err}"), "verify pg_restore is installed"))?;
            Ok(RestoreResult {
                format: descriptor.format,
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                code: output.status.code().unwrap_or(-1),
            })
        } else {
            let tool = self.tool_path(self.client_tool()).await?;
            let bytes = tokio::fs::read(backup_path).await.map_err(|err| DbrigError::dependency_missing(format!("could not read backup file: {err}"), "verify the backup path exists"))?;
            let mut command = Command::new(&tool);
            command.args(["-h", "127.0.0.1", "-p", &container.port.to_string(), "-U", self.descriptor.default_superuser, "-d", db]);
            command.stdin(std::process::Stdio::piped()).stdout(std::process::Stdio::piped()).stderr(std::process::Stdio::piped());
            let mut child = command.spawn().map_err(|err| DbrigError::dependency_missing(format!("failed to launch {}: {err}", self.client_tool()), "verify the client tool is installed"))?;
            if let Some(mut stdin) = child.stdin.take() {
                // EPIPE here just means the server closed its end early;
                // the real verdict comes from the exit code below.
                let _ = stdin.write_all(&bytes).await;
            }
            let output = child.wait_with_output().await.map_err(|err| DbrigError::connection_failed(err.to_string()))?;
            Ok(RestoreResult {
                format: descriptor.format,
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                code: output.status.code().unwrap_or(-1),
            })
        }
    }

    async fn detect_backup_format(&self, path: &Path) -> DbrigResult<BackupDescriptor> {
        let header = dbrig_backup::read_header(path).await?;
        let format = dbrig_backup::detect_format(&header, path.extension().and_then(|e| e.to_str()), EngineFamily::Postgres);
        Ok(dbrig_backup::describe(format))
    }

    async fn dump_from_connection_string(&self, connection_string: &str, out_path: &Path) -> DbrigResult<DumpResult> {
        if !self.is_cockroach {
            let dump_tool = self.tool_path("pg_dump").await?;
            let output = Command::new(&dump_tool).arg(connection_string).args(["-F", "c", "-f"]).arg(out_path).output().await.map_err(|err| {
                DbrigError::connection_failed(format!("pg_dump against {} failed: {err}", mask_connection_string(connection_string)))
            })?;
            if !output.status.success() {
                return Err(DbrigError::connection_failed(format!(
                    "pg_dump against {} failed: {}",
                    mask_connection_string(connection_string),
                    String::from_utf8_lossy(&output.stderr)
                )));
            }
            return Ok(DumpResult { path: out_path.to_path_buf(), warnings: vec![] });
        }

        self.dump_cockroach_remote(connection_string, out_path).await
    }

    async fn create_user(&self, container: &Container, username: &str, password: &str, database: Option<&str>) -> DbrigResult<UserCredentials> {
        require_valid_identifier(username)?;
        let quoted_user = quote_identifier(EngineFamily::Postgres, username);
        let escaped_password = password.replace('\'', "''");
        self.run_query(container, self.admin_database(), &format!("CREATE USER {quoted_user} WITH PASSWORD '{escaped_password}'")).await?;
        if let Some(db) = database {
            require_valid_identifier(db)?;
            let quoted_db = quote_identifier(EngineFamily::Postgres, db);
            self.run_query(container, self.admin_database(), &format!("GRANT ALL PRIVILEGES ON DATABASE {quoted_db} TO {quoted_user}")).await?;
        }
        Ok(UserCredentials { username: username.to_string(), password: password.to_string() })
    }

    async fn list_databases(&self, container: &Container) -> DbrigResult<Vec<String>> {
        let output = self
            .run_query(container, self.admin_database(), "SELECT datname FROM pg_database WHERE datistemplate = false")
            .await?;
        let records = parse_csv_records(&output, ',');
        Ok(records.into_iter().skip(1).filter_map(|mut r| r.pop()).collect())
    }
}

impl PostgresAdapter {
    /// Remote dump for CockroachDB, which has no native archive format:
    /// enumerate tables, pull each table's CREATE statement and CSV rows,
    /// and emit equivalent INSERT statements, preserving quoted-empty vs
    /// NULL semantics via `escape_sql_value`.
    async fn dump_cockroach_remote(&self, connection_string: &str, out_path: &Path) -> DbrigResult<DumpResult> {
        let tool = self.tool_path("cockroach").await?;
        let mut warnings = Vec::new();

        let tables_csv = Command::new(&tool)
            .args(["sql", "--insecure", "--format=csv", "-e", "SELECT table_name FROM information_schema.tables WHERE table_schema = 'public'"])
            .arg(format!("--url={connection_string}"))
            .output()
            .await
            .map_err(|err| DbrigError::connection_failed(format!("listing tables against {} failed: {err}", mask_connection_string(connection_string))))?;
        if !tables_csv.status.success() {
            return Err(DbrigError::connection_failed(format!(
                "listing tables against {} failed: {}",
                mask_connection_string(connection_string),
                String::from_utf8_lossy(&tables_csv.stderr)
            )));
        }
        let tables: Vec<String> = parse_csv_records(&String::from_utf8_lossy(&tables_csv.stdout), ',')
            .into_iter()
            .skip(1)
            .filter_map(|mut r| r.pop())
            .collect();

        let mut script = String::new();
        for table in &tables {
            if !dbrig_common::identifier::validate_identifier(table) {
                warnings.push(format!("skipped table with unsafe identifier: {table}"));
                continue;
            }
            let quoted_table = quote_identifier(EngineFamily::Postgres, table);

            let create_stmt = Command::new(&tool)
                .args(["sql", "--insecure", "--format=csv", "-e"])
                .arg(format!("SHOW CREATE TABLE {quoted_table}"))
                .arg(format!("--url={connection_string}"))
                .output()
                .await
                .ok();
            if let Some(output) = create_stmt {
                if output.status.success() {
                    if let Some(row) = parse_csv_records(&String::from_utf8_lossy(&output.stdout), ',').into_iter().nth(1) {
                        if let Some(ddl) = row.last() {
                            script.push_str(ddl);
                            script.push_str(";\n");
                        }
                    }
                }
            }

            let rows_csv = Command::new(&tool)
                .args(["sql", "--insecure", "--format=csv", "-e"])
                .arg(format!("SELECT * FROM {quoted_table}"))
                .arg(format!("--url={connection_string}"))
                .output()
                .await
                .map_err(|err| DbrigError::connection_failed(err.to_string()))?;
            let mut records = parse_csv_records(&String::from_utf8_lossy(&rows_csv.stdout), ',');
            if records.is_empty() {
                continue;
            }
            records.remove(0); // header row
            for row in records {
                // The CSV parser doesn't distinguish a quoted empty string
                // from a bare empty field, so an empty cell is always
                // treated as NULL here.
                let values: Vec<String> = row.iter().map(|v| escape_sql_value(v, false)).collect();
                script.push_str(&format!("INSERT INTO {quoted_table} VALUES ({});\n", values.join(", ")));
            }
        }

        tokio::fs::write(out_path, script).await.map_err(|err| {
            DbrigError::dependency_missing(format!("could not write dump file: {err}"), "check disk space at the output path")
        })?;

        Ok(DumpResult { path: out_path.to_path_buf(), warnings })
    }
}

async fn patch_max_connections(data_dir: &Path, max_connections: &str) -> DbrigResult<()> {
    let conf_path = data_dir.join("postgresql.conf");
    let mut contents = tokio::fs::read_to_string(&conf_path).await.map_err(|err| {
        DbrigError::dependency_missing(format!("could not read postgresql.conf: {err}"), "verify initdb completed successfully")
    })?;
    contents.push_str(&format!("\nmax_connections = {max_connections}\n"));
    tokio::fs::write(&conf_path, contents).await.map_err(|err| {
        DbrigError::dependency_missing(format!("could not patch postgresql.conf: {err}"), "check permissions on the data directory")
    })
}
