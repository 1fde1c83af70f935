//! MySQL-wire family adapter: backs both `mysql` and `mariadb`. Shaped the
//! same way as the PostgreSQL-family adapter (init/start/stop/query quartet
//! plus an arg-builder), with the two documented MySQL-specific wrinkles:
//! `mariadb-install-db`/`mysql_install_db` replaces `initdb`, and restore
//! retries once with a DYNAMIC-row-format/FK-disable prologue on
//! `ERROR 1118 (Row size too large)`.

use async_trait::async_trait;
use dbrig_common::backup::{BackupDescriptor, FormatTag};
use dbrig_common::container::Container;
use dbrig_common::engine_descriptor::{EngineDescriptor, EngineFamily, EngineName};
use dbrig_common::error::{DbrigError, DbrigResult};
use dbrig_common::identifier::quote_identifier;
use dbrig_common::platform::PlatformTuple;
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
const SYSTEM_DATABASES: &[&str] = &["mysql", "information_schema", "performance_schema", "sys"];
const ROW_SIZE_TOO_LARGE_MARKER: &str = "1118";

pub struct MysqlAdapter {
    root: DbrigRoot,
    descriptor: EngineDescriptor,
    platform: PlatformTuple,
    tool_registry: Arc<ToolRegistry>,
    fetcher: Arc<dyn BinaryFetcher>,
    is_mariadb: bool,
}

impl MysqlAdapter {
    pub fn new(
        root: DbrigRoot,
        platform: PlatformTuple,
        tool_registry: Arc<ToolRegistry>,
        fetcher: Arc<dyn BinaryFetcher>,
        is_mariadb: bool,
    ) -> Self {
        let name = if is_mariadb { EngineName::Mariadb } else { EngineName::Mysql };
        Self {
            root,
            descriptor: EngineDescriptor::for_engine(name),
            platform,
            tool_registry,
            fetcher,
            is_mariadb,
        }
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

    fn base_client_args(&self, container: &Container) -> Vec<String> {
        vec![
            "-h".to_string(),
            "127.0.0.1".to_string(),
            "-P".to_string(),
            container.port.to_string(),
            "-u".to_string(),
            self.descriptor.default_superuser.to_string(),
        ]
    }

    async fn run_query(&self, container: &Container, database: &str, sql: &str) -> DbrigResult<String> {
        let tool = self.tool_path("mysql").await?;
        let mut args = self.base_client_args(container);
        args.push(database.to_string());
        args.push("--batch".to_string());
        args.push("-e".to_string());
        args.push(sql.to_string());
        let output = Command::new(&tool).args(&args).output().await.map_err(|err| {
            DbrigError::connection_failed(format!("failed to run mysql: {err}"))
        })?;
        if !output.status.success() {
            return Err(DbrigError::connection_failed(format!(
                "mysql exited with {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

struct MysqlReadiness {
    tool_registry: Arc<ToolRegistry>,
    port: u16,
}

#[async_trait]
impl dbrig_supervisor::ReadinessProbe for MysqlReadiness {
    async fn probe(&self) -> bool {
        let Some(tool_path) = self.tool_registry.get_path("mysqladmin").await else {
            return false;
        };
        let output = Command::new(&tool_path)
            .args(["-h", "127.0.0.1", "-P", &self.port.to_string(), "ping"])
            .output()
            .await;
        matches!(output, Ok(o) if o.status.success())
    }
}

struct MysqlGraceful {
    tool_path: String,
    port: u16,
}

#[async_trait]
impl dbrig_supervisor::GracefulShutdown for MysqlGraceful {
    async fn request_shutdown(&self) -> bool {
        if self.tool_path.is_empty() {
            return false;
        }
        let output = Command::new(&self.tool_path)
            .args(["-h", "127.0.0.1", "-P", &self.port.to_string(), "shutdown"])
            .output()
            .await;
        matches!(output, Ok(o) if o.status.success())
    }
}

#[async_trait]
impl EngineAdapter for MysqlAdapter {
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
            .tool_path(self.engine_name(), &normalized, self.platform, "mysqld")
            .exists()
    }

    async fn init_data_dir(&self, container: &Container, version: &str, _opts: &HashMap<String, String>) -> DbrigResult<PathBuf> {
        let data_dir = self.data_dir(container);
        let pre_existing = data_dir.exists();
        let resolved = dbrig_registry::resolve_binary(&self.root, &self.descriptor, version, self.platform, self.fetcher.as_ref(), None).await?;

        let installer_name = if self.is_mariadb { "mariadb-install-db" } else { "mysql_install_db" };
        let installer = resolved.directory.join("bin").join(format!("{installer_name}{}", self.platform.executable_extension()));
        let mut command = Command::new(&installer);
        command
            .arg("--no-defaults")
            .arg(format!("--datadir={}", data_dir.display()))
            .arg(format!("--basedir={}", resolved.directory.display()));
        if !cfg!(windows) && !is_root_user() {
            command.arg(format!("--user={}", current_username()));
        }

        let result = command.output().await.map_err(|err| {
            DbrigError::dependency_missing(format!("{installer_name} failed to run: {err}"), "verify the MySQL/MariaDB binaries are installed")
        });

        let result = match result {
            Ok(output) if output.status.success() => Ok(()),
            Ok(output) => Err(DbrigError::dependency_missing(
                format!("{installer_name} failed: {}", String::from_utf8_lossy(&output.stderr)),
                "check the data directory is empty and writable",
            )),
            Err(err) => Err(err),
        };

        if result.is_err() && !pre_existing {
            let _ = tokio::fs::remove_dir_all(&data_dir).await;
        }
        result.map(|_| data_dir)
    }

    async fn start(&self, container: &Container, _progress: Option<ProgressCallback>) -> DbrigResult<StartResult> {
        let data_dir = self.data_dir(container);
        let server = self.tool_path("mysqld").await?;

        let spec = dbrig_supervisor::SpawnSpec {
            program: PathBuf::from(server),
            args: vec![
                "--no-defaults".to_string(),
                format!("--datadir={}", data_dir.display()),
                format!("--port={}", container.port),
                "--bind-address=127.0.0.1".to_string(),
                format!("--max-connections={}", self.descriptor.default_max_connections),
            ],
            working_dir: None,
            env: vec![],
            log_file: self.log_file(container),
            pid_file: self.pid_file(container),
            engine_writes_pid: false,
            may_refork: false,
            readiness_poll_interval: std::time::Duration::from_millis(300),
            start_timeout: std::time::Duration::from_secs(READINESS_TIMEOUT_SECS),
        };

        let readiness = MysqlReadiness { tool_registry: self.tool_registry.clone(), port: container.port };
        let outcome = dbrig_supervisor::start(&spec, &readiness, Some(container.port)).await?;
        info!(container = %container.name, pid = outcome.pid, "mysql-family container started");

        let url = format!(
            "{}://{}@127.0.0.1:{}/{}",
            self.descriptor.connection_scheme, self.descriptor.default_superuser, container.port, container.database
        );
        Ok(StartResult { port: container.port, url })
    }

    async fn stop(&self, container: &Container) {
        let tool_path = self.tool_registry.get_path("mysqladmin").await.unwrap_or_default();
        let graceful = MysqlGraceful { tool_path, port: container.port };
        if let Err(err) = dbrig_supervisor::stop(&self.pid_file(container), &graceful, &container.name, false).await {
            warn!(container = %container.name, %err, "stop escalated to forced termination and still failed");
        }
    }

    async fn status(&self, container: &Container) -> StatusResult {
        let report = dbrig_supervisor::status(&self.pid_file(container)).await;
        StatusResult { running: report.running, message: report.message }
    }

    async fn connect(&self, container: &Container, database: Option<&str>) -> DbrigResult<()> {
        let tool = self.tool_path("mysql").await?;
        let db = database.unwrap_or(&container.database);
        let mut args = self.base_client_args(container);
        args.push(db.to_string());
        Command::new(&tool)
            .args(&args)
            .status()
            .await
            .map_err(|err| DbrigError::dependency_missing(format!("failed to launch mysql: {err}"), "verify the mysql client is installed"))?;
        Ok(())
    }

    async fn create_database(&self, container: &Container, name: &str) -> DbrigResult<()> {
        require_valid_identifier(name)?;
        let quoted = quote_identifier(EngineFamily::Mysql, name);
        self.run_query(container, "mysql", &format!("CREATE DATABASE IF NOT EXISTS {quoted}")).await?;
        Ok(())
    }

    async fn drop_database(&self, container: &Container, name: &str) -> DbrigResult<()> {
        require_valid_identifier(name)?;
        if SYSTEM_DATABASES.contains(&name) {
            return Err(DbrigError::invalid_identifier(format!("{name} (refusing to drop a system database)")));
        }
        let quoted = quote_identifier(EngineFamily::Mysql, name);
        self.run_query(container, "mysql", &format!("DROP DATABASE IF EXISTS {quoted}")).await?;
        Ok(())
    }

    async fn get_database_size(&self, container: &Container) -> Option<u64> {
        let sql = format!(
            "SELECT SUM(data_length + index_length) FROM information_schema.tables WHERE table_schema = '{}'",
            container.database.replace('\'', "''")
        );
        let output = self.run_query(container, "information_schema", &sql).await.ok()?;
        output.lines().nth(1)?.trim().parse().ok()
    }

    async fn execute_query(&self, container: &Container, query: &str, opts: &QueryOptions) -> DbrigResult<QueryResult> {
        let db = opts.database.as_deref().unwrap_or(&container.database);
        let output = self.run_query(container, db, query).await?;
        let records = parse_csv_records(&output, '\t');
        let mut iter = records.into_iter();
        let columns = iter.next().unwrap_or_default();
        let rows: Vec<Vec<String>> = iter.collect();
        Ok(QueryResult { columns, rows })
    }

    async fn run_script(&self, container: &Container, input: &ScriptInput) -> DbrigResult<()> {
        let tool = self.tool_path("mysql").await?;
        let mut args = self.base_client_args(container);
        args.push(container.database.clone());
        let mut command = Command::new(&tool);
        command.args(&args).stdin(std::process::Stdio::piped());
        let mut child = command.spawn().map_err(|err| {
            DbrigError::dependency_missing(format!("failed to launch mysql: {err}"), "verify the mysql client is installed")
        })?;

        let sql_bytes = if let Some(sql) = &input.sql {
            sql.clone().into_bytes()
        } else if let Some(file) = &input.file {
            tokio::fs::read(file).await.map_err(|err| {
                DbrigError::dependency_missing(format!("could not read script file: {err}"), "verify the script path exists")
            })?
        } else {
            Vec::new()
        };

        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(&sql_bytes).await;
        }
        let status = child.wait().await.map_err(|err| DbrigError::connection_failed(err.to_string()))?;
        if !status.success() {
            return Err(DbrigError::connection_failed(format!("mysql exited with {:?}", status.code())));
        }
        Ok(())
    }

    async fn backup(&self, container: &Container, out_path: &Path, opts: &BackupOptions) -> DbrigResult<BackupResult> {
        let dump_tool = self.tool_path("mysqldump").await?;
        let db = opts.database.as_deref().unwrap_or(&container.database);
        let mut args = self.base_client_args(container);
        args.push(db.to_string());
        let output = Command::new(&dump_tool)
            .args(&args)
            .output()
            .await
            .map_err(|err| DbrigError::dependency_missing(format!("mysqldump failed to run: {err}"), "verify mysqldump is installed"))?;
        if !output.status.success() {
            return Err(DbrigError::connection_failed(format!("mysqldump failed: {}", String::from_utf8_lossy(&output.stderr))));
        }
        tokio::fs::write(out_path, &output.stdout).await.map_err(|err| {
            DbrigError::dependency_missing(format!("could not write backup file: {err}"), "check disk space at the output path")
        })?;
        let size = tokio::fs::metadata(out_path).await.map(|m| m.len()).unwrap_or(0);
        Ok(BackupResult { path: out_path.to_path_buf(), format: opts.format.unwrap_or(FormatTag::Sql), size })
    }

    async fn restore(&self, container: &Container, backup_path: &Path, opts: &RestoreOptions) -> DbrigResult<RestoreResult> {
        let descriptor = self.detect_backup_format(backup_path).await?;
        let foreign_engine = if descriptor.format == FormatTag::PostgresqlSql { "postgresql" } else { self.engine_name() };
        dbrig_backup::assert_compatible_format(descriptor.format, self.engine_name(), foreign_engine)?;

        let db = opts.database.as_deref().unwrap_or(&container.database);
        let bytes = tokio::fs::read(backup_path).await.map_err(|err| {
            DbrigError::dependency_missing(format!("could not read backup file: {err}"), "verify the backup path exists")
        })?;

        let result = self.stream_restore(container, db, &bytes, false).await?;
        if result.code != 0 && result.stderr.contains(ROW_SIZE_TOO_LARGE_MARKER) {
            info!(container = %container.name, "retrying restore with DYNAMIC row format prologue after ERROR 1118");
            return self.stream_restore(container, db, &bytes, true).await;
        }
        Ok(result)
    }

    async fn detect_backup_format(&self, path: &Path) -> DbrigResult<BackupDescriptor> {
        let header = dbrig_backup::read_header(path).await?;
        let format = dbrig_backup::detect_format(&header, path.extension().and_then(|e| e.to_str()), EngineFamily::Mysql);
        Ok(dbrig_backup::describe(format))
    }

    async fn dump_from_connection_string(&self, connection_string: &str, out_path: &Path) -> DbrigResult<DumpResult> {
        let dump_tool = self.tool_path("mysqldump").await?;
        let output = Command::new(&dump_tool)
            .arg(format!("--defaults-extra-file=/dev/null"))
            .arg(connection_string)
            .output()
            .await
            .map_err(|err| DbrigError::connection_failed(format!("mysqldump against {} failed: {err}", mask_connection_string(connection_string))))?;
        if !output.status.success() {
            return Err(DbrigError::connection_failed(format!(
                "mysqldump against {} failed: {}",
                mask_connection_string(connection_string),
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        tokio::fs::write(out_path, &output.stdout).await.map_err(|err| {
            DbrigError::dependency_missing(format!("could not write dump file: {err}"), "check disk space at the output path")
        })?;
        Ok(DumpResult { path: out_path.to_path_buf(), warnings: vec![] })
    }

    async fn create_user(&self, container: &Container, username: &str, password: &str, database: Option<&str>) -> DbrigResult<UserCredentials> {
        require_valid_identifier(username)?;
        let escaped_password = password.replace('\'', "''");
        self.run_query(
            container,
            "mysql",
            &format!("CREATE USER '{username}'@'%' IDENTIFIED BY '{escaped_password}'"),
        )
        .await?;
        if let Some(db) = database {
            require_valid_identifier(db)?;
            let quoted_db = quote_identifier(EngineFamily::Mysql, db);
            self.run_query(container, "mysql", &format!("GRANT ALL PRIVILEGES ON {quoted_db}.* TO '{username}'@'%'")).await?;
            self.run_query(container, "mysql", "FLUSH PRIVILEGES").await?;
        }
        Ok(UserCredentials { username: username.to_string(), password: password.to_string() })
    }

    async fn list_databases(&self, container: &Container) -> DbrigResult<Vec<String>> {
        let output = self.run_query(container, "information_schema", "SHOW DATABASES").await?;
        Ok(output
            .lines()
            .skip(1)
            .map(str::to_string)
            .filter(|name| !SYSTEM_DATABASES.contains(&name.as_str()))
            .collect())
    }
}

impl MysqlAdapter {
    /// Streams `sql_bytes` into `mysql`, optionally prefixed with a
    /// DYNAMIC-row-format/FK-disable prologue for the ERROR 1118 retry path.
    async fn stream_restore(&self, container: &Container, database: &str, sql_bytes: &[u8], compat_mode: bool) -> DbrigResult<RestoreResult> {
        let tool = self.tool_path("mysql").await?;
        let mut args = self.base_client_args(container);
        args.push(database.to_string());
        let mut command = Command::new(&tool);
        command
            .args(&args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());
        let mut child = command.spawn().map_err(|err| {
            DbrigError::dependency_missing(format!("failed to launch mysql: {err}"), "verify the mysql client is installed")
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            if compat_mode {
                let _ = stdin
                    .write_all(b"SET FOREIGN_KEY_CHECKS=0;\nSET SESSION sql_mode='';\nSET default_storage_engine=InnoDB;\nSET innodb_strict_mode=OFF;\n")
                    .await;
            }
            // EPIPE here just means the server closed its end early; the
            // real verdict comes from the exit code below.
            let _ = stdin.write_all(sql_bytes).await;
        }
        let output = child.wait_with_output().await.map_err(|err| DbrigError::connection_failed(err.to_string()))?;
        Ok(RestoreResult {
            format: FormatTag::MysqlSql,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            code: output.status.code().unwrap_or(-1),
        })
    }
}

fn is_root_user() -> bool {
    #[cfg(unix)]
    {
        unsafe { libc::geteuid() == 0 }
    }
    #[cfg(not(unix))]
    {
        false
    }
}

fn current_username() -> String {
    std::env::var("USER").or_else(|_| std::env::var("USERNAME")).unwrap_or_else(|_| "nobody".to_string())
}
