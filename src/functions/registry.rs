// src/functions/registry.rs
//! Tenant function registry
//!
//! Functions live in a `DashMap` keyed by name. A directory of `*.js` files
//! can be loaded in one go; the file stem is the function name. An optional
//! `functions.yaml` next to the scripts carries per-function settings:
//!
//! ```yaml
//! functions:
//!   weather:
//!     enabled: true
//!     timeout_ms: 2000
//!     description: Current conditions for the footer widget
//! ```

use crate::utils::errors::{EngineError, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Manifest file name looked up inside a functions directory
pub const MANIFEST_FILE: &str = "functions.yaml";

/// An administrator-authored script unit
#[derive(Debug, Clone, PartialEq)]
pub struct TenantFunction {
    pub name: String,

    /// Script source defining `get`, `post` and/or `run`
    pub code: String,

    pub enabled: bool,

    /// Overrides the service's default execution timeout
    pub timeout: Option<Duration>,

    pub description: Option<String>,

    pub loaded_at: DateTime<Utc>,
}

impl TenantFunction {
    pub fn new(name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
            enabled: true,
            timeout: None,
            description: None,
            loaded_at: Utc::now(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[derive(Debug, Default, Deserialize)]
struct Manifest {
    #[serde(default)]
    functions: HashMap<String, ManifestEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ManifestEntry {
    enabled: Option<bool>,
    timeout_ms: Option<u64>,
    description: Option<String>,
}

impl ManifestEntry {
    fn apply(&self, function: &mut TenantFunction) {
        if let Some(enabled) = self.enabled {
            function.enabled = enabled;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            function.timeout = Some(Duration::from_millis(timeout_ms));
        }
        if let Some(description) = &self.description {
            function.description = Some(description.clone());
        }
    }
}

/// Concurrent store of tenant functions
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    functions: DashMap<String, Arc<TenantFunction>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a function, returning the one it replaced
    pub fn register(&self, function: TenantFunction) -> Result<Option<Arc<TenantFunction>>> {
        validate_name(&function.name)?;
        debug!(function = %function.name, enabled = function.enabled, "Registering function");
        Ok(self
            .functions
            .insert(function.name.clone(), Arc::new(function)))
    }

    pub fn get(&self, name: &str) -> Option<Arc<TenantFunction>> {
        self.functions.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Resolve a function that may be invoked
    pub fn resolve(&self, name: &str) -> Result<Arc<TenantFunction>> {
        let function = self
            .get(name)
            .ok_or_else(|| EngineError::FunctionNotFound(name.to_string()))?;

        if !function.enabled {
            return Err(EngineError::FunctionDisabled(name.to_string()));
        }

        Ok(function)
    }

    pub fn remove(&self, name: &str) -> Option<Arc<TenantFunction>> {
        self.functions.remove(name).map(|(_, function)| function)
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let mut entry = self
            .functions
            .get_mut(name)
            .ok_or_else(|| EngineError::FunctionNotFound(name.to_string()))?;
        Arc::make_mut(entry.value_mut()).enabled = enabled;
        Ok(())
    }

    /// Function names, sorted
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Load every `*.js` file in `dir`, applying `functions.yaml` if present
    ///
    /// Returns the number of functions loaded.
    pub async fn load_directory(&self, dir: impl AsRef<Path>) -> Result<usize> {
        let dir = dir.as_ref();
        let manifest = load_manifest(dir).await?;

        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut loaded = 0;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("js") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                warn!(path = %path.display(), "Skipping script with non UTF-8 name");
                continue;
            };

            let code = tokio::fs::read_to_string(&path).await?;
            let mut function = TenantFunction::new(name, code);
            if let Some(settings) = manifest.functions.get(name) {
                settings.apply(&mut function);
            }

            match self.register(function) {
                Ok(_) => loaded += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping script"),
            }
        }

        for name in manifest.functions.keys() {
            if self.get(name).is_none() {
                warn!(function = %name, "Manifest entry has no matching script");
            }
        }

        info!(directory = %dir.display(), loaded, "Loaded tenant functions");
        Ok(loaded)
    }
}

async fn load_manifest(dir: &Path) -> Result<Manifest> {
    let path = dir.join(MANIFEST_FILE);
    match tokio::fs::read_to_string(&path).await {
        Ok(text) => serde_yaml::from_str(&text).map_err(|e| {
            EngineError::ConfigError(format!("invalid {}: {}", path.display(), e))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Manifest::default()),
        Err(e) => Err(e.into()),
    }
}

/// Names become URL path segments, so keep them to `[A-Za-z0-9_-]`
fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');

    if valid {
        Ok(())
    } else {
        Err(EngineError::ConfigError(format!("invalid function name: {:?}", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_register_and_resolve() {
        let registry = FunctionRegistry::new();
        assert!(registry.is_empty());

        registry
            .register(TenantFunction::new("hello", "function get() { return 'hi'; }"))
            .unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.resolve("hello").unwrap().name, "hello");

        assert!(matches!(
            registry.resolve("missing"),
            Err(EngineError::FunctionNotFound(_))
        ));
    }

    #[test]
    fn test_replace_returns_previous() {
        let registry = FunctionRegistry::new();
        registry.register(TenantFunction::new("f", "1")).unwrap();
        let previous = registry.register(TenantFunction::new("f", "2")).unwrap();
        assert_eq!(previous.unwrap().code, "1");
        assert_eq!(registry.get("f").unwrap().code, "2");
    }

    #[test]
    fn test_disable() {
        let registry = FunctionRegistry::new();
        registry.register(TenantFunction::new("f", "")).unwrap();

        registry.set_enabled("f", false).unwrap();
        assert!(matches!(
            registry.resolve("f"),
            Err(EngineError::FunctionDisabled(_))
        ));

        registry.set_enabled("f", true).unwrap();
        assert!(registry.resolve("f").is_ok());
        assert!(registry.set_enabled("nope", true).is_err());
    }

    #[test]
    fn test_invalid_names() {
        let registry = FunctionRegistry::new();
        assert!(registry.register(TenantFunction::new("", "")).is_err());
        assert!(registry.register(TenantFunction::new("a/b", "")).is_err());
        assert!(registry.register(TenantFunction::new("ok_name-1", "")).is_ok());
    }

    #[test]
    fn test_remove_and_list() {
        let registry = FunctionRegistry::new();
        registry.register(TenantFunction::new("b", "")).unwrap();
        registry.register(TenantFunction::new("a", "")).unwrap();
        assert_eq!(registry.list(), vec!["a", "b"]);

        assert!(registry.remove("a").is_some());
        assert!(registry.remove("a").is_none());
        assert_eq!(registry.list(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_load_directory_with_manifest() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("weather.js"), "function get() { return 'sunny'; }").unwrap();
        fs::write(dir.path().join("nightly.js"), "function run() {}").unwrap();
        fs::write(dir.path().join("README.md"), "not a function").unwrap();
        fs::write(
            dir.path().join(MANIFEST_FILE),
            "functions:\n  weather:\n    timeout_ms: 1500\n    description: Footer widget\n  nightly:\n    enabled: false\n",
        )
        .unwrap();

        let registry = FunctionRegistry::new();
        let loaded = registry.load_directory(dir.path()).await.unwrap();
        assert_eq!(loaded, 2);

        let weather = registry.get("weather").unwrap();
        assert_eq!(weather.timeout, Some(Duration::from_millis(1500)));
        assert_eq!(weather.description.as_deref(), Some("Footer widget"));
        assert!(weather.enabled);

        assert!(!registry.get("nightly").unwrap().enabled);
    }

    #[tokio::test]
    async fn test_load_directory_without_manifest() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("one.js"), "").unwrap();

        let registry = FunctionRegistry::new();
        assert_eq!(registry.load_directory(dir.path()).await.unwrap(), 1);
        assert!(registry.get("one").unwrap().timeout.is_none());
    }

    #[tokio::test]
    async fn test_invalid_manifest() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), "functions: [not, a, map]").unwrap();

        let registry = FunctionRegistry::new();
        assert!(matches!(
            registry.load_directory(dir.path()).await,
            Err(EngineError::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_directory() {
        let registry = FunctionRegistry::new();
        assert!(matches!(
            registry.load_directory("/definitely/not/here").await,
            Err(EngineError::Io(_))
        ));
    }
}
