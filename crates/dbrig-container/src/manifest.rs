//! Manifest persistence: `container.json`, one per container, serialized
//! with the same whole-file write-then-rename discipline the Tool
//! Registry's `FileToolStore` uses — the manifest has a single writer at a
//! time (the Container Manager call holding the container), so there is no
//! need for the Tool Registry's last-writer-wins tolerance.

use dbrig_common::container::Container;
use dbrig_paths::DbrigRoot;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub async fn load(root: &DbrigRoot, engine: &str, name: &str) -> Option<Container> {
    let path = root.manifest_file(engine, name);
    let bytes = tokio::fs::read(&path).await.ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(container) => Some(container),
        Err(err) => {
            warn!(path = %path.display(), %err, "corrupt container manifest");
            None
        }
    }
}

pub async fn save(root: &DbrigRoot, container: &Container) -> std::io::Result<()> {
    let path = root.manifest_file(&container.engine, &container.name);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(container)?;
    let tmp_path = tmp_path_for(&path);
    tokio::fs::write(&tmp_path, &bytes).await?;
    tokio::fs::rename(&tmp_path, &path).await?;
    info!(container = %container.name, engine = %container.engine, "container manifest persisted");
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    path.with_file_name(format!("container.json.{}.tmp", std::process::id()))
}

/// Scans `<root>/containers/<engine>/*` for manifests; used by `list`.
pub async fn list_for_engine(root: &DbrigRoot, engine: &str) -> std::io::Result<Vec<Container>> {
    let engine_root = root.containers_root().join(engine);
    let mut out = Vec::new();
    let mut entries = match tokio::fs::read_dir(&engine_root).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(err) => return Err(err),
    };
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(container) = load(root, engine, &name).await {
            out.push(container);
        }
    }
    Ok(out)
}

/// Scans every engine subdirectory under `<root>/containers/`.
pub async fn list_all(root: &DbrigRoot) -> std::io::Result<Vec<Container>> {
    let containers_root = root.containers_root();
    let mut out = Vec::new();
    let mut entries = match tokio::fs::read_dir(&containers_root).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(err) => return Err(err),
    };
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let engine = entry.file_name().to_string_lossy().to_string();
        out.extend(list_for_engine(root, &engine).await?);
    }
    Ok(out)
}
