use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dbrig_common::tool_registration::{Provenance, ToolRegistration, STALE_AFTER_DAYS};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// The `config.json` document: `{ binaries: { <tool>: {...} }, updatedAt }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolRegistryDocument {
    #[serde(default)]
    pub binaries: HashMap<String, ToolRegistration>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

/// Abstraction over the Tool Registry's storage, separating the real
/// file-backed store from an in-memory test double. The "real"
/// implementation is a single JSON file with whole-file atomic replace,
/// since dbrig has no cluster coordinator to shard state across.
#[async_trait]
pub trait ToolStore: Send + Sync {
    async fn load(&self) -> ToolRegistryDocument;
    async fn save(&self, doc: &ToolRegistryDocument) -> std::io::Result<()>;
}

/// Persists the Tool Registry as `config.json` next to the dbrig root, using
/// serialize-then-rename so concurrent writers never observe a partial file.
pub struct FileToolStore {
    path: PathBuf,
}

impl FileToolStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ToolStore for FileToolStore {
    async fn load(&self) -> ToolRegistryDocument {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => match serde_json::from_slice::<ToolRegistryDocument>(&bytes) {
                Ok(doc) => doc,
                Err(err) => {
                    warn!(path = %self.path.display(), %err, "corrupt tool registry, resetting to defaults");
                    ToolRegistryDocument::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => ToolRegistryDocument::default(),
            Err(err) => {
                warn!(path = %self.path.display(), %err, "unreadable tool registry, resetting to defaults");
                ToolRegistryDocument::default()
            }
        }
    }

    async fn save(&self, doc: &ToolRegistryDocument) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(doc)?;
        let tmp_path = tmp_path_for(&self.path);
        tokio::fs::write(&tmp_path, &bytes).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        info!(path = %self.path.display(), "tool registry persisted");
        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "config.json".to_string());
    name.push_str(&format!(".{}.tmp", std::process::id()));
    path.with_file_name(name)
}

/// In-memory test double, mirroring `MemoryMetaStore`'s role: unit tests for
/// the Tool Registry and its callers (Fetcher, Binary Registry) use this
/// instead of touching the real filesystem.
#[derive(Default)]
pub struct MemoryToolStore {
    doc: tokio::sync::Mutex<ToolRegistryDocument>,
}

impl MemoryToolStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ToolStore for MemoryToolStore {
    async fn load(&self) -> ToolRegistryDocument {
        self.doc.lock().await.clone()
    }

    async fn save(&self, doc: &ToolRegistryDocument) -> std::io::Result<()> {
        *self.doc.lock().await = doc.clone();
        Ok(())
    }
}

/// The Tool Registry itself: `getPath`/`setPath`/`clear`/`clearAll`/
/// `isStale`/`refreshIfStale`, backed by any [`ToolStore`].
pub struct ToolRegistry {
    store: Box<dyn ToolStore>,
}

impl ToolRegistry {
    pub fn new(store: Box<dyn ToolStore>) -> Self {
        Self { store }
    }

    /// `getPath(tool)`: return the cached path if it still exists on disk;
    /// otherwise probe `PATH` and auto-register with provenance `system`;
    /// else `None`.
    pub async fn get_path(&self, tool: &str) -> Option<String> {
        let mut doc = self.store.load().await;
        if let Some(reg) = doc.binaries.get(tool) {
            if reg.path_exists() {
                return Some(reg.path.clone());
            }
            info!(tool, path = %reg.path, "registered tool path vanished, evicting");
            doc.binaries.remove(tool);
            let _ = self.store.save(&doc).await;
        }
        let found = dbrig_platform::find_tool_on_path(tool)?;
        let path = found.to_string_lossy().to_string();
        self.set_path(tool, &path, Provenance::System).await;
        Some(path)
    }

    /// `setPath(tool, path, provenance)`: also probes `<path> --version`
    /// best-effort and records the detected version.
    pub async fn set_path(&self, tool: &str, path: &str, provenance: Provenance) {
        let version = probe_version(path).await;
        let mut doc = self.store.load().await;
        doc.binaries.insert(
            tool.to_string(),
            ToolRegistration::new(tool, path, provenance, version, Utc::now()),
        );
        doc.updated_at = Utc::now();
        if let Err(err) = self.store.save(&doc).await {
            warn!(tool, %err, "failed to persist tool registration");
        }
    }

    pub async fn clear(&self, tool: &str) {
        let mut doc = self.store.load().await;
        doc.binaries.remove(tool);
        let _ = self.store.save(&doc).await;
    }

    pub async fn clear_all(&self) {
        let doc = ToolRegistryDocument::default();
        let _ = self.store.save(&doc).await;
    }

    /// `isStale()`: true if the document's `updatedAt` is older than 7 days.
    pub async fn is_stale(&self) -> bool {
        let doc = self.store.load().await;
        Utc::now().signed_duration_since(doc.updated_at) > chrono::Duration::days(STALE_AFTER_DAYS)
    }

    /// `refreshIfStale()`: clears and lets the next `getPath` re-discover.
    pub async fn refresh_if_stale(&self) {
        if self.is_stale().await {
            self.clear_all().await;
        }
    }
}

async fn probe_version(path: &str) -> Option<String> {
    let output = tokio::process::Command::new(path)
        .arg("--version")
        .output()
        .await
        .ok()?;
    let text = String::from_utf8_lossy(&output.stdout);
    let first_line = text.lines().next()?;
    let caps = regex_first_version(first_line)?;
    Some(caps)
}

fn regex_first_version(line: &str) -> Option<String> {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = RE.get_or_init(|| regex::Regex::new(r"(\d+)\.(\d+)(?:\.(\d+))?").unwrap());
    re.find(line).map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let registry = ToolRegistry::new(Box::new(MemoryToolStore::new()));
        // Use a binary guaranteed to exist in a POSIX test environment.
        registry.set_path("true_tool", "/bin/true", Provenance::Bundled).await;
        let path = registry.get_path("true_tool").await;
        assert_eq!(path, Some("/bin/true".to_string()));
    }

    #[tokio::test]
    async fn vanished_path_is_evicted_not_returned_stale() {
        let registry = ToolRegistry::new(Box::new(MemoryToolStore::new()));
        registry
            .set_path("ghost", "/nonexistent/binary/xyz", Provenance::Bundled)
            .await;
        let resolved = registry.get_path("ghost").await;
        // Either re-discovered on PATH (unlikely for this name) or None —
        // never the stale nonexistent path.
        assert_ne!(resolved, Some("/nonexistent/binary/xyz".to_string()));
    }

    #[tokio::test]
    async fn clear_all_resets_document() {
        let registry = ToolRegistry::new(Box::new(MemoryToolStore::new()));
        registry.set_path("true_tool", "/bin/true", Provenance::Bundled).await;
        registry.clear_all().await;
        assert!(!registry.is_stale().await);
        let doc = registry.store.load().await;
        assert!(doc.binaries.is_empty());
    }
}
