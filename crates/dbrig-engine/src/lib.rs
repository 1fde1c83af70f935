pub mod contract;
pub mod engine;
pub mod support;

pub use contract::{
    BackupOptions, BackupResult, DumpResult, EngineAdapter, ProgressCallback, QueryOptions,
    QueryResult, RestoreOptions, RestoreResult, ScriptInput, StartResult, StatusResult,
    UserCredentials,
};
pub use engine::create_engine;
