//! Container Manager: create/clone/rename/delete plus status reconciliation
//! against the Process Supervisor, which is the actual source of truth for
//! `running` (Container invariant d — `status` on the manifest is advisory).

use chrono::Utc;
use dbrig_common::container::{validate_container_name, Container, ContainerStatus};
use dbrig_common::engine_descriptor::EngineDescriptor;
use dbrig_common::error::{DbrigError, DbrigResult};
use dbrig_paths::DbrigRoot;
use tracing::info;

use crate::manifest;

/// Find a free port in the engine's candidate range, skipping ports already
/// claimed by another *running* container of the same engine (invariant b)
/// and re-checking OS-level availability so a stale manifest doesn't steer
/// us into a port some unrelated process already holds.
pub async fn allocate_port(
    root: &DbrigRoot,
    descriptor: &EngineDescriptor,
    preferred: Option<u16>,
) -> DbrigResult<u16> {
    let existing = manifest::list_for_engine(root, descriptor.name.as_str())
        .await
        .unwrap_or_default();
    let mut claimed: Vec<u16> = Vec::new();
    for container in &existing {
        if dbrig_supervisor::is_running(&root.pid_file(&container.engine, &container.name, descriptor.pid_file_name)).await {
            claimed.push(container.port);
        }
    }

    if let Some(port) = preferred {
        if port < descriptor.port_range.0 || port > descriptor.port_range.1 {
            return Err(DbrigError::dependency_missing(
                format!(
                    "port {port} is outside {}'s range {}-{}",
                    descriptor.display_name, descriptor.port_range.0, descriptor.port_range.1
                ),
                format!("choose a port between {} and {}", descriptor.port_range.0, descriptor.port_range.1),
            ));
        }
        if claimed.contains(&port) || !dbrig_platform::is_port_available(port).await {
            return Err(DbrigError::dependency_missing(
                format!("port {port} is already in use"),
                "choose a different port or stop the container using it",
            ));
        }
        return Ok(port);
    }

    for port in descriptor.port_range.0..=descriptor.port_range.1 {
        if claimed.contains(&port) {
            continue;
        }
        if dbrig_platform::is_port_available(port).await {
            return Ok(port);
        }
    }

    Err(DbrigError::dependency_missing(
        format!(
            "no free port in {}'s range {}-{}",
            descriptor.display_name, descriptor.port_range.0, descriptor.port_range.1
        ),
        "stop an existing container or widen the port range",
    ))
}

/// Create a new container's manifest and on-disk root. Does not initialize
/// the data directory or start the process — those are Engine Adapter and
/// Process Supervisor responsibilities, invoked by the caller afterward.
pub async fn create(
    root: &DbrigRoot,
    descriptor: &EngineDescriptor,
    name: &str,
    version: &str,
    database: &str,
    port: Option<u16>,
) -> DbrigResult<Container> {
    if !validate_container_name(name) {
        return Err(DbrigError::invalid_identifier(name));
    }
    if manifest::load(root, descriptor.name.as_str(), name).await.is_some() {
        return Err(DbrigError::invalid_identifier(format!("{name} (a container with this name already exists)")));
    }

    let port = allocate_port(root, descriptor, port).await?;
    let now = Utc::now();
    let container = Container::new(name, descriptor.name.as_str(), version, port, database, now);

    tokio::fs::create_dir_all(root.container_root(&container.engine, &container.name))
        .await
        .map_err(|err| DbrigError::dependency_missing(format!("could not create container directory: {err}"), "check permissions on the dbrig root"))?;
    manifest::save(root, &container)
        .await
        .map_err(|err| DbrigError::dependency_missing(format!("could not persist container manifest: {err}"), "check permissions on the dbrig root"))?;

    info!(container = name, engine = %descriptor.name, port, "container created");
    Ok(container)
}

/// Copy an existing container's entire subtree (binaries are shared and
/// live elsewhere — only the container root, including its data directory,
/// is copied) under a new name and a freshly allocated port.
pub async fn clone_container(
    root: &DbrigRoot,
    descriptor: &EngineDescriptor,
    source_name: &str,
    new_name: &str,
) -> DbrigResult<Container> {
    if !validate_container_name(new_name) {
        return Err(DbrigError::invalid_identifier(new_name));
    }
    let source = get(root, descriptor, source_name).await?;
    if source.status == ContainerStatus::Running {
        return Err(DbrigError::connection_failed(format!("{source_name} must be stopped before cloning")));
    }
    if manifest::load(root, descriptor.name.as_str(), new_name).await.is_some() {
        return Err(DbrigError::invalid_identifier(format!("{new_name} (a container with this name already exists)")));
    }

    let port = allocate_port(root, descriptor, None).await?;
    let source_root = root.container_root(&source.engine, &source.name);
    let dest_root = root.container_root(&source.engine, new_name);
    copy_dir_recursive(&source_root, &dest_root).await.map_err(|err| {
        DbrigError::dependency_missing(format!("could not copy container directory: {err}"), "check disk space and permissions")
    })?;

    let now = Utc::now();
    let mut cloned = source;
    cloned.name = new_name.to_string();
    cloned.port = port;
    cloned.status = ContainerStatus::Created;
    cloned.cloned_from = Some(source_name.to_string());
    cloned.created = now;
    cloned.touch(now);

    manifest::save(root, &cloned)
        .await
        .map_err(|err| DbrigError::dependency_missing(format!("could not persist cloned manifest: {err}"), "check permissions on the dbrig root"))?;
    info!(source = source_name, clone = new_name, "container cloned");
    Ok(cloned)
}

/// Move a container's directory tree to a new name, preserving its port and
/// data.
pub async fn rename(root: &DbrigRoot, descriptor: &EngineDescriptor, old_name: &str, new_name: &str) -> DbrigResult<Container> {
    if !validate_container_name(new_name) {
        return Err(DbrigError::invalid_identifier(new_name));
    }
    let mut container = get(root, descriptor, old_name).await?;
    if container.status == ContainerStatus::Running {
        return Err(DbrigError::connection_failed(format!("{old_name} must be stopped before renaming")));
    }
    if manifest::load(root, descriptor.name.as_str(), new_name).await.is_some() {
        return Err(DbrigError::invalid_identifier(format!("{new_name} (a container with this name already exists)")));
    }

    let old_root = root.container_root(&container.engine, old_name);
    let new_root = root.container_root(&container.engine, new_name);
    tokio::fs::rename(&old_root, &new_root).await.map_err(|err| {
        DbrigError::dependency_missing(format!("could not rename container directory: {err}"), "check permissions on the dbrig root")
    })?;

    container.name = new_name.to_string();
    container.touch(Utc::now());
    manifest::save(root, &container)
        .await
        .map_err(|err| DbrigError::dependency_missing(format!("could not persist renamed manifest: {err}"), "check permissions on the dbrig root"))?;
    info!(old = old_name, new = new_name, "container renamed");
    Ok(container)
}

/// Delete a container's entire subtree. Refuses while the supervisor
/// reports the process as running — callers must stop it first.
pub async fn delete(root: &DbrigRoot, descriptor: &EngineDescriptor, name: &str) -> DbrigResult<()> {
    let container = get(root, descriptor, name).await?;
    if container.status == ContainerStatus::Running {
        return Err(DbrigError::connection_failed(format!("{name} must be stopped before deletion")));
    }
    let container_root = root.container_root(&container.engine, &container.name);
    tokio::fs::remove_dir_all(&container_root).await.map_err(|err| {
        DbrigError::dependency_missing(format!("could not remove container directory: {err}"), "check permissions on the dbrig root")
    })?;
    info!(container = name, "container deleted");
    Ok(())
}

/// Load a container's manifest and reconcile `status` against the
/// supervisor's live view before returning it.
pub async fn get(root: &DbrigRoot, descriptor: &EngineDescriptor, name: &str) -> DbrigResult<Container> {
    let container = manifest::load(root, descriptor.name.as_str(), name).await.ok_or_else(|| {
        DbrigError::invalid_identifier(format!("{name} (no such container)"))
    })?;
    Ok(reconcile(root, descriptor, container).await)
}

/// List every container, optionally filtered to one engine, each with its
/// status reconciled against the supervisor.
pub async fn list(root: &DbrigRoot, engine: Option<&str>) -> DbrigResult<Vec<Container>> {
    let raw = match engine {
        Some(engine) => manifest::list_for_engine(root, engine).await,
        None => manifest::list_all(root).await,
    }
    .map_err(|err| DbrigError::dependency_missing(format!("could not scan containers directory: {err}"), "check permissions on the dbrig root"))?;

    let mut out = Vec::with_capacity(raw.len());
    for container in raw {
        let descriptor = EngineDescriptor::for_engine(
            dbrig_common::engine_descriptor::EngineName::from_str(&container.engine)
                .unwrap_or(dbrig_common::engine_descriptor::EngineName::Postgresql),
        );
        out.push(reconcile(root, &descriptor, container).await);
    }
    Ok(out)
}

/// Record a newly created/dropped database against the manifest so
/// `databases` stays consistent with what the engine adapter actually did
/// (Container invariant c).
pub async fn add_database(root: &DbrigRoot, descriptor: &EngineDescriptor, name: &str, database: &str) -> DbrigResult<Container> {
    let mut container = get(root, descriptor, name).await?;
    if !container.databases.iter().any(|d| d == database) {
        container.databases.push(database.to_string());
        container.touch(Utc::now());
        manifest::save(root, &container)
            .await
            .map_err(|err| DbrigError::dependency_missing(format!("could not persist manifest: {err}"), "check permissions on the dbrig root"))?;
    }
    Ok(container)
}

pub async fn remove_database(root: &DbrigRoot, descriptor: &EngineDescriptor, name: &str, database: &str) -> DbrigResult<Container> {
    let mut container = get(root, descriptor, name).await?;
    container.databases.retain(|d| d != database);
    if container.database == database {
        // The primary database was dropped; invariant (c) still requires
        // `database` to be a member of `databases`, so fall back to
        // whatever remains, or leave it as a dangling name if none do.
        if let Some(first) = container.databases.first().cloned() {
            container.database = first;
        }
    }
    container.touch(Utc::now());
    manifest::save(root, &container)
        .await
        .map_err(|err| DbrigError::dependency_missing(format!("could not persist manifest: {err}"), "check permissions on the dbrig root"))?;
    Ok(container)
}

async fn reconcile(root: &DbrigRoot, descriptor: &EngineDescriptor, mut container: Container) -> Container {
    let pid_file = root.pid_file(&container.engine, &container.name, descriptor.pid_file_name);
    let running = dbrig_supervisor::is_running(&pid_file).await;
    container.status = if running {
        ContainerStatus::Running
    } else if container.status == ContainerStatus::Running {
        ContainerStatus::Stopped
    } else {
        container.status
    };
    container
}

fn copy_dir_recursive<'a>(
    from: &'a std::path::Path,
    to: &'a std::path::Path,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = std::io::Result<()>> + Send + 'a>> {
    Box::pin(async move {
        tokio::fs::create_dir_all(to).await?;
        let mut entries = tokio::fs::read_dir(from).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let dest = to.join(entry.file_name());
            if file_type.is_dir() {
                copy_dir_recursive(&entry.path(), &dest).await?;
            } else if file_type.is_file() {
                tokio::fs::copy(entry.path(), &dest).await?;
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbrig_common::engine_descriptor::EngineName;

    fn tempdir(label: &str) -> DbrigRoot {
        let dir = std::env::temp_dir().join(format!("dbrig-container-test-{label}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        DbrigRoot::new(dir)
    }

    #[tokio::test]
    async fn create_rejects_duplicate_names() {
        let root = tempdir("dup");
        let descriptor = EngineDescriptor::for_engine(EngineName::Postgresql);
        create(&root, &descriptor, "mydb", "16.4.0", "mydb", None).await.unwrap();
        let err = create(&root, &descriptor, "mydb", "16.4.0", "mydb", None).await.unwrap_err();
        assert_eq!(err.code, dbrig_common::error::ErrorCode::InvalidIdentifier);
    }

    #[tokio::test]
    async fn create_assigns_a_port_in_range() {
        let root = tempdir("port");
        let descriptor = EngineDescriptor::for_engine(EngineName::Postgresql);
        let container = create(&root, &descriptor, "mydb", "16.4.0", "mydb", None).await.unwrap();
        assert!(container.port >= descriptor.port_range.0 && container.port <= descriptor.port_range.1);
    }

    #[tokio::test]
    async fn rename_moves_directory_and_manifest() {
        let root = tempdir("rename");
        let descriptor = EngineDescriptor::for_engine(EngineName::Postgresql);
        create(&root, &descriptor, "old", "16.4.0", "old", None).await.unwrap();
        let renamed = rename(&root, &descriptor, "old", "new").await.unwrap();
        assert_eq!(renamed.name, "new");
        assert!(get(&root, &descriptor, "new").await.is_ok());
        assert!(get(&root, &descriptor, "old").await.is_err());
    }

    #[tokio::test]
    async fn add_and_remove_database_keeps_invariant_c() {
        let root = tempdir("dbs");
        let descriptor = EngineDescriptor::for_engine(EngineName::Postgresql);
        create(&root, &descriptor, "mydb", "16.4.0", "mydb", None).await.unwrap();
        let with_extra = add_database(&root, &descriptor, "mydb", "analytics").await.unwrap();
        assert!(with_extra.databases.contains(&"analytics".to_string()));

        let after_drop = remove_database(&root, &descriptor, "mydb", "mydb").await.unwrap();
        assert!(after_drop.has_consistent_databases());
    }
}
