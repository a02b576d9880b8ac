use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

/// Named projection schemas served to list queries.
///
/// The backing file is a JSON object mapping projection names to
/// field-inclusion documents, e.g. `{"summary": {"name": 1, "status": 1}}`.
/// Loaded once at startup; `reload` re-reads the file in place.
#[derive(Debug)]
pub struct ProjectionCache {
    path: Option<PathBuf>,
    projections: RwLock<HashMap<String, Value>>,
}

impl ProjectionCache {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let cache = Self {
            path: Some(path.into()),
            projections: RwLock::new(HashMap::new()),
        };
        cache.reload()?;
        Ok(cache)
    }

    /// Cache with no backing file; every lookup misses.
    pub fn empty() -> Self {
        Self {
            path: None,
            projections: RwLock::new(HashMap::new()),
        }
    }

    pub fn reload(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read projection file {}", path.display()))?;
        let parsed: HashMap<String, Value> = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid projection file {}", path.display()))?;

        let mut projections = self
            .projections
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire projection lock - possible poisoning"))?;
        *projections = parsed;

        tracing::info!("Projection cache holds {} entries", projections.len());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.projections
            .read()
            .ok()
            .and_then(|projections| projections.get(name).cloned())
    }
}
