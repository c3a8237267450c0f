//! # Host Capabilities
//!
//! Everything the orchestrator needs from the page it runs in:
//!
//! - [`PageHost`]: best-effort navigation ids, structure probe, user attributes
//! - [`AssetLoader`]: fetches and executes stylesheets and scripts
//! - [`EntryPointRegistrar`]: where an executing asset registers the
//!   zero-argument entry point of its application
//!
//! The registrar is the only string-keyed lookup in the crate. Assets that
//! cannot be changed keep their naming convention there; the coordinator
//! never scans a global namespace.

use async_trait::async_trait;
use dashmap::DashMap;
use mockall::automock;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::registry::AssetRef;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum AssetError {
    #[error("Failed to fetch {url}: {message}")]
    Fetch { url: String, message: String },
    #[error("Failed to execute {url}: {message}")]
    Execute { url: String, message: String },
}

pub type AssetResult<T> = Result<T, AssetError>;

/// Page-side capabilities. All lookups are best effort and may come back
/// empty.
#[automock]
#[async_trait]
pub trait PageHost: Send + Sync {
    /// Section id the host currently reports, if any
    fn current_section(&self) -> Option<String>;

    /// Sub-view id the host currently reports, if any
    fn current_view(&self) -> Option<String>;

    /// Whether an element matching `selector` is currently rendered
    fn element_exists(&self, selector: &str) -> bool;

    /// User role or attribute lookup; `None` when unavailable or malformed
    async fn user_attribute(&self, name: &str) -> Option<String>;
}

#[automock]
#[async_trait]
pub trait AssetLoader: Send + Sync {
    async fn load_stylesheet(&self, asset: &AssetRef) -> AssetResult<()>;

    /// Loads and executes a script. An application script registers its
    /// entry point on `registrar` while executing.
    async fn load_script(&self, asset: &AssetRef, registrar: &EntryPointRegistrar)
    -> AssetResult<()>;
}

pub type EntryResult = Result<(), String>;

pub type EntryPoint = Arc<dyn Fn() -> EntryResult + Send + Sync>;

/// Entry points registered by loaded assets, keyed by their documented name.
#[derive(Clone, Default)]
pub struct EntryPointRegistrar {
    entries: Arc<DashMap<String, EntryPoint>>,
}

impl EntryPointRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the entry point for `name`.
    pub fn register<F>(&self, name: impl Into<String>, entry: F)
    where
        F: Fn() -> EntryResult + Send + Sync + 'static,
    {
        let name = name.into();
        debug!(entry_point = %name, "entry point registered");
        self.entries.insert(name, Arc::new(entry));
    }

    pub fn get(&self, name: &str) -> Option<EntryPoint> {
        self.entries.get(name).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn remove(&self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }
}

impl std::fmt::Debug for EntryPointRegistrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        f.debug_struct("EntryPointRegistrar")
            .field("entries", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_register_and_invoke() {
        let registrar = EntryPointRegistrar::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        registrar.register("initChat", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let entry = registrar.get("initChat").unwrap();
        assert_eq!(entry(), Ok(()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(registrar.get("initOther").is_none());
    }

    #[test]
    fn test_clones_share_entries() {
        let registrar = EntryPointRegistrar::new();
        let handle = registrar.clone();
        handle.register("start", || Err("boom".to_string()));
        assert!(registrar.contains("start"));
        assert!(registrar.remove("start"));
        assert!(!handle.contains("start"));
    }

    #[tokio::test]
    async fn test_mock_host_attribute() {
        let mut host = MockPageHost::new();
        host.expect_user_attribute()
            .withf(|name| name == "role")
            .returning(|_| Some("manager".to_string()));
        assert_eq!(host.user_attribute("role").await.as_deref(), Some("manager"));
    }
}
