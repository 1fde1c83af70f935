use async_trait::async_trait;
use dbrig_common::backup::{BackupDescriptor, FormatTag};
use dbrig_common::container::Container;
use dbrig_common::error::DbrigResult;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// `(downloaded, total)` progress callback, threaded through from the
/// Fetcher to CLI-visible progress bars.
pub type ProgressCallback = std::sync::Arc<dyn Fn(u64, u64) + Send + Sync>;

pub struct StartResult {
    pub port: u16,
    pub url: String,
}

pub struct StatusResult {
    pub running: bool,
    pub message: String,
}

pub struct BackupOptions {
    pub database: Option<String>,
    pub format: Option<FormatTag>,
}

pub struct BackupResult {
    pub path: PathBuf,
    pub format: FormatTag,
    pub size: u64,
}

pub struct RestoreOptions {
    pub database: Option<String>,
}

pub struct RestoreResult {
    pub format: FormatTag,
    pub stdout: String,
    pub stderr: String,
    pub code: i32,
}

pub struct QueryOptions {
    pub database: Option<String>,
}

pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

pub struct ScriptInput {
    pub file: Option<PathBuf>,
    pub sql: Option<String>,
}

pub struct DumpResult {
    pub path: PathBuf,
    pub warnings: Vec<String>,
}

pub struct UserCredentials {
    pub username: String,
    pub password: String,
}

/// The uniform capability set every engine family exposes. Unsupported
/// operations raise `DbrigError::unsupported_engine_op` rather than being
/// absent from the trait, so callers get one consistent error shape
/// regardless of engine.
#[async_trait]
pub trait EngineAdapter: Send + Sync {
    fn engine_name(&self) -> &'static str;

    async fn fetch_available_versions(&self) -> DbrigResult<HashMap<u32, Vec<String>>>;

    async fn ensure_binaries(
        &self,
        version: &str,
        progress: Option<ProgressCallback>,
    ) -> DbrigResult<PathBuf>;

    async fn is_binary_installed(&self, version: &str) -> bool;

    async fn init_data_dir(
        &self,
        container: &Container,
        version: &str,
        opts: &HashMap<String, String>,
    ) -> DbrigResult<PathBuf>;

    async fn start(
        &self,
        container: &Container,
        progress: Option<ProgressCallback>,
    ) -> DbrigResult<StartResult>;

    async fn stop(&self, container: &Container);

    async fn status(&self, container: &Container) -> StatusResult;

    async fn connect(&self, container: &Container, database: Option<&str>) -> DbrigResult<()>;

    async fn create_database(&self, container: &Container, name: &str) -> DbrigResult<()>;

    async fn drop_database(&self, container: &Container, name: &str) -> DbrigResult<()>;

    async fn get_database_size(&self, container: &Container) -> Option<u64>;

    async fn execute_query(
        &self,
        container: &Container,
        query: &str,
        opts: &QueryOptions,
    ) -> DbrigResult<QueryResult>;

    async fn run_script(&self, container: &Container, input: &ScriptInput) -> DbrigResult<()>;

    async fn backup(
        &self,
        container: &Container,
        out_path: &Path,
        opts: &BackupOptions,
    ) -> DbrigResult<BackupResult>;

    async fn restore(
        &self,
        container: &Container,
        backup_path: &Path,
        opts: &RestoreOptions,
    ) -> DbrigResult<RestoreResult>;

    async fn detect_backup_format(&self, path: &Path) -> DbrigResult<BackupDescriptor>;

    async fn dump_from_connection_string(
        &self,
        connection_string: &str,
        out_path: &Path,
    ) -> DbrigResult<DumpResult>;

    async fn create_user(
        &self,
        container: &Container,
        username: &str,
        password: &str,
        database: Option<&str>,
    ) -> DbrigResult<UserCredentials>;

    async fn list_databases(&self, container: &Container) -> DbrigResult<Vec<String>>;
}
