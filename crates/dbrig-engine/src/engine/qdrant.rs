//! HTTP vector/search family adapter. Only start/stop/status and
//! snapshot-file restore are meaningful here — SQL-shaped operations have no
//! equivalent in Qdrant's API and raise `UNSUPPORTED_ENGINE_OP`.

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
use tracing::{info, warn};

use crate::contract::*;

const READINESS_TIMEOUT_SECS: u64 = 30;
const HEALTH_CHECK_TIMEOUT_SECS: u64 = 3;

pub struct QdrantAdapter {
    root: DbrigRoot,
    descriptor: EngineDescriptor,
    platform: PlatformTuple,
    tool_registry: Arc<ToolRegistry>,
    fetcher: Arc<dyn BinaryFetcher>,
    http: reqwest::Client,
}

impl QdrantAdapter {
    pub fn new(root: DbrigRoot, platform: PlatformTuple, tool_registry: Arc<ToolRegistry>, fetcher: Arc<dyn BinaryFetcher>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HEALTH_CHECK_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            root,
            descriptor: EngineDescriptor::for_engine(EngineName::Qdrant),
            platform,
            tool_registry,
            fetcher,
            http,
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

    fn base_url(&self, container: &Container) -> String {
        format!("http://127.0.0.1:{}", container.port)
    }
}

struct QdrantReadiness {
    http: reqwest::Client,
    url: String,
}

#[async_trait]
impl dbrig_supervisor::ReadinessProbe for QdrantReadiness {
    async fn probe(&self) -> bool {
        matches!(self.http.get(format!("{}/readyz", self.url)).send().await, Ok(resp) if resp.status().is_success())
    }
}

struct QdrantGraceful;

#[async_trait]
impl dbrig_supervisor::GracefulShutdown for QdrantGraceful {
    async fn request_shutdown(&self) -> bool {
        // Qdrant has no documented HTTP quiescence endpoint; SIGTERM drains
        // in-flight requests on its own, so the state machine proceeds
        // straight to Signaled.
        false
    }
}

#[async_trait]
impl EngineAdapter for QdrantAdapter {
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
            .tool_path(self.engine_name(), &normalized, self.platform, "qdrant")
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
                Err(DbrigError::dependency_missing(format!("could not create storage directory: {err}"), "check permissions on the dbrig root"))
            }
        }
    }

    async fn start(&self, container: &Container, _progress: Option<ProgressCallback>) -> DbrigResult<StartResult> {
        let data_dir = self.data_dir(container);
        let server = self.tool_path("qdrant").await?;

        let spec = dbrig_supervisor::SpawnSpec {
            program: PathBuf::from(server),
            args: vec![],
            working_dir: None,
            env: vec![
                ("QDRANT__STORAGE__STORAGE_PATH".to_string(), data_dir.to_string_lossy().to_string()),
                ("QDRANT__SERVICE__HTTP_PORT".to_string(), container.port.to_string()),
                ("QDRANT__SERVICE__HOST".to_string(), "127.0.0.1".to_string()),
            ],
            log_file: self.log_file(container),
            pid_file: self.pid_file(container),
            engine_writes_pid: false,
            may_refork: false,
            readiness_poll_interval: Duration::from_millis(300),
            start_timeout: Duration::from_secs(READINESS_TIMEOUT_SECS),
        };

        let readiness = QdrantReadiness { http: self.http.clone(), url: self.base_url(container) };
        let outcome = dbrig_supervisor::start(&spec, &readiness, Some(container.port)).await?;
        info!(container = %container.name, pid = outcome.pid, "vector engine container started");

        Ok(StartResult { port: container.port, url: self.base_url(container) })
    }

    async fn stop(&self, container: &Container) {
        let graceful = QdrantGraceful;
        if let Err(err) = dbrig_supervisor::stop(&self.pid_file(container), &graceful, &container.name, false).await {
            warn!(container = %container.name, %err, "stop escalated to forced termination and still failed");
        }
    }

    async fn status(&self, container: &Container) -> StatusResult {
        let report = dbrig_supervisor::status(&self.pid_file(container)).await;
        StatusResult { running: report.running, message: report.message }
    }

    async fn connect(&self, _container: &Container, _database: Option<&str>) -> DbrigResult<()> {
        Err(DbrigError::unsupported_engine_op(self.engine_name(), "connect"))
    }

    async fn create_database(&self, container: &Container, name: &str) -> DbrigResult<()> {
        let url = format!("{}/collections/{name}", self.base_url(container));
        let resp = self
            .http
            .put(&url)
            .json(&serde_json::json!({ "vectors": { "size": 1, "distance": "Cosine" } }))
            .send()
            .await
            .map_err(|err| DbrigError::connection_failed(err.to_string()))?;
        if !resp.status().is_success() {
            return Err(DbrigError::connection_failed(format!("could not create collection {name}: HTTP {}", resp.status())));
        }
        Ok(())
    }

    async fn drop_database(&self, container: &Container, name: &str) -> DbrigResult<()> {
        let url = format!("{}/collections/{name}", self.base_url(container));
        let resp = self.http.delete(&url).send().await.map_err(|err| DbrigError::connection_failed(err.to_string()))?;
        if !resp.status().is_success() && resp.status().as_u16() != 404 {
            return Err(DbrigError::connection_failed(format!("could not drop collection {name}: HTTP {}", resp.status())));
        }
        Ok(())
    }

    async fn get_database_size(&self, container: &Container) -> Option<u64> {
        let url = format!("{}/collections/{}", self.base_url(container), container.database);
        let resp = self.http.get(&url).send().await.ok()?;
        let body: serde_json::Value = resp.json().await.ok()?;
        body.get("result")?.get("points_count")?.as_u64()
    }

    async fn execute_query(&self, _container: &Container, _query: &str, _opts: &QueryOptions) -> DbrigResult<QueryResult> {
        Err(DbrigError::unsupported_engine_op(self.engine_name(), "executeQuery"))
    }

    async fn run_script(&self, _container: &Container, _input: &ScriptInput) -> DbrigResult<()> {
        Err(DbrigError::unsupported_engine_op(self.engine_name(), "runScript"))
    }

    async fn backup(&self, container: &Container, out_path: &Path, _opts: &BackupOptions) -> DbrigResult<BackupResult> {
        let url = format!("{}/collections/{}/snapshots", self.base_url(container), container.database);
        let resp = self
            .http
            .post(&url)
            .send()
            .await
            .map_err(|err| DbrigError::connection_failed(err.to_string()))?;
        if !resp.status().is_success() {
            return Err(DbrigError::connection_failed(format!("snapshot creation failed: HTTP {}", resp.status())));
        }
        let body: serde_json::Value = resp.json().await.map_err(|err| DbrigError::connection_failed(err.to_string()))?;
        let snapshot_name = body
            .get("result")
            .and_then(|r| r.get("name"))
            .and_then(|n| n.as_str())
            .ok_or_else(|| DbrigError::connection_failed("snapshot response did not include a name"))?;

        let download_url = format!("{}/collections/{}/snapshots/{snapshot_name}", self.base_url(container), container.database);
        let bytes = self
            .http
            .get(&download_url)
            .send()
            .await
            .map_err(|err| DbrigError::connection_failed(err.to_string()))?
            .bytes()
            .await
            .map_err(|err| DbrigError::connection_failed(err.to_string()))?;
        tokio::fs::write(out_path, &bytes).await.map_err(|err| {
            DbrigError::dependency_missing(format!("could not write snapshot file: {err}"), "check disk space at the output path")
        })?;
        Ok(BackupResult { path: out_path.to_path_buf(), format: FormatTag::Snapshot, size: bytes.len() as u64 })
    }

    async fn restore(&self, container: &Container, backup_path: &Path, _opts: &RestoreOptions) -> DbrigResult<RestoreResult> {
        let descriptor = self.detect_backup_format(backup_path).await?;
        if descriptor.format != FormatTag::Snapshot {
            return Err(DbrigError::wrong_engine_dump(descriptor.format, self.engine_name(), self.engine_name()));
        }
        let bytes = tokio::fs::read(backup_path).await.map_err(|err| {
            DbrigError::dependency_missing(format!("could not read snapshot file: {err}"), "verify the backup path exists")
        })?;
        let url = format!(
            "{}/collections/{}/snapshots/upload?priority=snapshot",
            self.base_url(container),
            container.database
        );
        let part = reqwest::multipart::Part::bytes(bytes).file_name("snapshot");
        let form = reqwest::multipart::Form::new().part("snapshot", part);
        let resp = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|err| DbrigError::connection_failed(err.to_string()))?;
        let code = resp.status().as_u16() as i32;
        let body = resp.text().await.unwrap_or_default();
        Ok(RestoreResult { format: FormatTag::Snapshot, stdout: body, stderr: String::new(), code })
    }

    async fn detect_backup_format(&self, path: &Path) -> DbrigResult<BackupDescriptor> {
        let header = dbrig_backup::read_header(path).await?;
        let format = dbrig_backup::detect_format(&header, path.extension().and_then(|e| e.to_str()), EngineFamily::Http);
        Ok(dbrig_backup::describe(format))
    }

    async fn dump_from_connection_string(&self, connection_string: &str, _out_path: &Path) -> DbrigResult<DumpResult> {
        let _ = connection_string;
        Err(DbrigError::unsupported_engine_op(self.engine_name(), "dumpFromConnectionString"))
    }

    async fn create_user(&self, _container: &Container, username: &str, _password: &str, _database: Option<&str>) -> DbrigResult<UserCredentials> {
        Err(DbrigError::unsupported_engine_op(self.engine_name(), format!("createUser({username})")))
    }

    async fn list_databases(&self, container: &Container) -> DbrigResult<Vec<String>> {
        let url = format!("{}/collections", self.base_url(container));
        let resp = self.http.get(&url).send().await.map_err(|err| DbrigError::connection_failed(err.to_string()))?;
        let body: serde_json::Value = resp.json().await.map_err(|err| DbrigError::connection_failed(err.to_string()))?;
        let names = body
            .get("result")
            .and_then(|r| r.get("collections"))
            .and_then(|c| c.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.get("name").and_then(|n| n.as_str()).map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        Ok(names)
    }
}
