pub mod mysql;
pub mod postgresql;
pub mod qdrant;
pub mod redis;

use dbrig_common::engine_descriptor::EngineName;
use dbrig_common::platform::PlatformTuple;
use dbrig_paths::DbrigRoot;
use dbrig_registry::{BinaryFetcher, ToolRegistry};
use std::sync::Arc;

use crate::contract::EngineAdapter;

/// Build the adapter for one engine family. `EngineName` is the closed set
/// the Paths Service and Tool Registry already key off, so there is no
/// unrecognized-engine fallback the way the string-keyed dispatch this is
/// grounded on needs one.
pub fn create_engine(
    name: EngineName,
    root: DbrigRoot,
    platform: PlatformTuple,
    tool_registry: Arc<ToolRegistry>,
    fetcher: Arc<dyn BinaryFetcher>,
) -> Box<dyn EngineAdapter> {
    match name {
        EngineName::Postgresql => Box::new(postgresql::PostgresAdapter::new(root, platform, tool_registry, fetcher, false)),
        EngineName::Cockroachdb => Box::new(postgresql::PostgresAdapter::new(root, platform, tool_registry, fetcher, true)),
        EngineName::Mysql => Box::new(mysql::MysqlAdapter::new(root, platform, tool_registry, fetcher, false)),
        EngineName::Mariadb => Box::new(mysql::MysqlAdapter::new(root, platform, tool_registry, fetcher, true)),
        EngineName::Redis => Box::new(redis::RedisAdapter::new(root, platform, tool_registry, fetcher, false)),
        EngineName::Valkey => Box::new(redis::RedisAdapter::new(root, platform, tool_registry, fetcher, true)),
        EngineName::Qdrant => Box::new(qdrant::QdrantAdapter::new(root, platform, tool_registry, fetcher)),
    }
}
