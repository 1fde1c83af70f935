mod args;
mod output;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use dbrig_common::engine_descriptor::{EngineDescriptor, EngineName};
use dbrig_common::error::{DbrigError, DbrigResult};
use dbrig_engine::{create_engine, BackupOptions, QueryOptions, RestoreOptions, ScriptInput};
use dbrig_fetcher::Fetcher;
use dbrig_paths::DbrigRoot;
use dbrig_registry::{FileToolStore, ToolRegistry};

use crate::args::{Args, Command};

fn default_root() -> PathBuf {
    dirs_home().join(".dbrig")
}

fn dirs_home() -> PathBuf {
    std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."))
}

fn resolve_engine(name: &str) -> DbrigResult<EngineDescriptor> {
    let engine_name = EngineName::from_str(name).ok_or_else(|| {
        DbrigError::invalid_identifier(format!("{name} (not a known engine; see --help for the supported list)"))
    })?;
    Ok(EngineDescriptor::for_engine(engine_name))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    if let Err(err) = run().await {
        eprintln!("✗ {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();
    let root = DbrigRoot::new(args.root.unwrap_or_else(default_root));

    let platform = dbrig_platform::get_platform_info()
        .ok_or_else(|| DbrigError::unsupported_platform(std::env::consts::OS, std::env::consts::ARCH))?;

    let tool_registry = Arc::new(ToolRegistry::new(Box::new(FileToolStore::new(root.config_file()))));
    let fetcher = Arc::new(Fetcher::new(root.clone(), tool_registry.clone()));

    match args.command {
        Command::Create { engine, name, version, port, database } => {
            let descriptor = resolve_engine(&engine)?;
            let version = version.unwrap_or_else(|| "latest".to_string());
            let database = database.unwrap_or_else(|| name.clone());
            let container = dbrig_container::create(&root, &descriptor, &name, &version, &database, port).await?;
            println!("✓ created container '{}' on port {}", container.name, container.port);
        }

        Command::Start { engine, name } => {
            let descriptor = resolve_engine(&engine)?;
            let container = dbrig_container::get(&root, &descriptor, &name).await?;
            let adapter = create_engine(descriptor.name, root.clone(), platform, tool_registry.clone(), fetcher.clone());
            let resolved_path = adapter.ensure_binaries(&container.version, None).await?;
            adapter.init_data_dir(&container, &container.version, &HashMap::new()).await.ok();
            let _ = resolved_path;
            let result = adapter.start(&container, None).await?;
            println!("✓ {} started at {}", container.name, result.url);
        }

        Command::Stop { engine, name } => {
            let descriptor = resolve_engine(&engine)?;
            let container = dbrig_container::get(&root, &descriptor, &name).await?;
            let adapter = create_engine(descriptor.name, root.clone(), platform, tool_registry.clone(), fetcher.clone());
            adapter.stop(&container).await;
            println!("✓ {} stopped", container.name);
        }

        Command::Status { engine, name } => {
            let descriptor = resolve_engine(&engine)?;
            let container = dbrig_container::get(&root, &descriptor, &name).await?;
            let adapter = create_engine(descriptor.name, root.clone(), platform, tool_registry.clone(), fetcher.clone());
            let status = adapter.status(&container).await;
            output::print_container_status(&container, status.running, &status.message);
        }

        Command::Ls { engine } => {
            let containers = dbrig_container::list(&root, engine.as_deref()).await?;
            output::print_container_list(&containers);
        }

        Command::Rm { engine, name } => {
            let descriptor = resolve_engine(&engine)?;
            dbrig_container::delete(&root, &descriptor, &name).await?;
            println!("✓ removed container '{name}'");
        }

        Command::Clone { engine, source, new_name } => {
            let descriptor = resolve_engine(&engine)?;
            let cloned = dbrig_container::clone_container(&root, &descriptor, &source, &new_name).await?;
            println!("✓ cloned '{source}' to '{}' on port {}", cloned.name, cloned.port);
        }

        Command::Rename { engine, old_name, new_name } => {
            let descriptor = resolve_engine(&engine)?;
            let renamed = dbrig_container::rename(&root, &descriptor, &old_name, &new_name).await?;
            println!("✓ renamed to '{}'", renamed.name);
        }

        Command::Shell { engine, name, database } => {
            let descriptor = resolve_engine(&engine)?;
            let container = dbrig_container::get(&root, &descriptor, &name).await?;
            let adapter = create_engine(descriptor.name, root.clone(), platform, tool_registry.clone(), fetcher.clone());
            adapter.connect(&container, database.as_deref()).await?;
        }

        Command::Exec { engine, name, query, database } => {
            let descriptor = resolve_engine(&engine)?;
            let container = dbrig_container::get(&root, &descriptor, &name).await?;
            let adapter = create_engine(descriptor.name, root.clone(), platform, tool_registry.clone(), fetcher.clone());
            let result = adapter.execute_query(&container, &query, &QueryOptions { database }).await?;
            output::print_query_result(&result);
        }

        Command::Script { engine, name, file, sql } => {
            let descriptor = resolve_engine(&engine)?;
            let container = dbrig_container::get(&root, &descriptor, &name).await?;
            let adapter = create_engine(descriptor.name, root.clone(), platform, tool_registry.clone(), fetcher.clone());
            adapter.run_script(&container, &ScriptInput { file, sql }).await?;
            println!("✓ script applied to '{}'", container.name);
        }

        Command::Backup { engine, name, out, database, format } => {
            let descriptor = resolve_engine(&engine)?;
            let container = dbrig_container::get(&root, &descriptor, &name).await?;
            let adapter = create_engine(descriptor.name, root.clone(), platform, tool_registry.clone(), fetcher.clone());
            let format = format.and_then(|f| parse_format_tag(&f));
            let result = adapter.backup(&container, &out, &BackupOptions { database, format }).await?;
            println!("✓ backed up '{}' to {} ({} bytes, {:?})", container.name, result.path.display(), result.size, result.format);
        }

        Command::Restore { engine, name, path, database } => {
            let descriptor = resolve_engine(&engine)?;
            let container = dbrig_container::get(&root, &descriptor, &name).await?;
            let adapter = create_engine(descriptor.name, root.clone(), platform, tool_registry.clone(), fetcher.clone());
            let detected = adapter.detect_backup_format(&path).await?;
            dbrig_backup::assert_compatible_format(detected.format, descriptor.display_name, &detected.description)?;
            let result = adapter.restore(&container, &path, &RestoreOptions { database }).await?;
            if result.code == 0 {
                println!("✓ restored into '{}'", container.name);
            } else {
                eprintln!("✗ restore exited with code {}: {}", result.code, result.stderr);
                std::process::exit(result.code.max(1));
            }
        }

        Command::Dump { engine, connection_string, out } => {
            let descriptor = resolve_engine(&engine)?;
            let adapter = create_engine(descriptor.name, root.clone(), platform, tool_registry.clone(), fetcher.clone());
            let result = adapter.dump_from_connection_string(&connection_string, &out).await?;
            println!("✓ dumped to {}", result.path.display());
            for warning in &result.warnings {
                println!("  warning: {warning}");
            }
        }

        Command::Createdb { engine, name, db_name } => {
            let descriptor = resolve_engine(&engine)?;
            let container = dbrig_container::get(&root, &descriptor, &name).await?;
            let adapter = create_engine(descriptor.name, root.clone(), platform, tool_registry.clone(), fetcher.clone());
            adapter.create_database(&container, &db_name).await?;
            dbrig_container::add_database(&root, &descriptor, &name, &db_name).await?;
            println!("✓ created database '{db_name}' in '{name}'");
        }

        Command::Dropdb { engine, name, db_name } => {
            let descriptor = resolve_engine(&engine)?;
            let container = dbrig_container::get(&root, &descriptor, &name).await?;
            let adapter = create_engine(descriptor.name, root.clone(), platform, tool_registry.clone(), fetcher.clone());
            adapter.drop_database(&container, &db_name).await?;
            dbrig_container::remove_database(&root, &descriptor, &name, &db_name).await?;
            println!("✓ dropped database '{db_name}' from '{name}'");
        }

        Command::Databases { engine, name } => {
            let descriptor = resolve_engine(&engine)?;
            let container = dbrig_container::get(&root, &descriptor, &name).await?;
            let adapter = create_engine(descriptor.name, root.clone(), platform, tool_registry.clone(), fetcher.clone());
            let names = adapter.list_databases(&container).await?;
            output::print_databases(&names);
        }

        Command::Createuser { engine, name, username, password, database } => {
            let descriptor = resolve_engine(&engine)?;
            let container = dbrig_container::get(&root, &descriptor, &name).await?;
            let adapter = create_engine(descriptor.name, root.clone(), platform, tool_registry.clone(), fetcher.clone());
            adapter.create_user(&container, &username, &password, database.as_deref()).await?;
            println!("✓ created user '{username}' in '{name}'");
        }
    }

    Ok(())
}

fn parse_format_tag(s: &str) -> Option<dbrig_common::backup::FormatTag> {
    use dbrig_common::backup::FormatTag;
    match s.to_ascii_lowercase().as_str() {
        "sql" => Some(FormatTag::Sql),
        "compressed" => Some(FormatTag::Compressed),
        "custom" => Some(FormatTag::Custom),
        "tar" => Some(FormatTag::Tar),
        "mysql_sql" | "mysql" => Some(FormatTag::MysqlSql),
        "postgresql_sql" => Some(FormatTag::PostgresqlSql),
        "postgresql_custom" => Some(FormatTag::PostgresqlCustom),
        "rdb" => Some(FormatTag::Rdb),
        "text" => Some(FormatTag::Text),
        "snapshot" => Some(FormatTag::Snapshot),
        _ => None,
    }
}
