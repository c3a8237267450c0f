//! # Application Registry
//!
//! Static table of [`AppDescriptor`]s supplied once at startup. Each descriptor
//! says when an application applies (section and view match), which assets it
//! needs, how its configuration is built, where that configuration is
//! published and which entry point starts it.
//!
//! ```rust,no_run
//! # use stagehand::registry::{AppDescriptor, AssetRef, Registry, SectionMatch, ViewMatch};
//! # use serde_json::json;
//! let registry = Registry::new(vec![
//!     AppDescriptor::builder("reports", AssetRef::script("/apps/reports.js"))
//!         .sections(SectionMatch::only(["S1"]))
//!         .views(ViewMatch::Any)
//!         .config_builder(|_, section, _| json!({ "section": section }))
//!         .config_slot("reportsConfig")
//!         .entry_point("initReports")
//!         .build(),
//! ])
//! .unwrap();
//! assert!(registry.get("reports").is_some());
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::config::SharedConfig;

pub const ALL_SECTIONS: &str = "all";
pub const ANY_VIEW: &str = "any";

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("Application key must not be empty")]
    EmptyKey,
    #[error("Application already registered: {key}")]
    DuplicateKey { key: String },
    #[error("Only one persistent application is allowed: {first} and {second}")]
    MultiplePersistent { first: String, second: String },
    #[error("Rule for section {section} references unknown application: {key}")]
    UnknownRuleKey { section: String, key: String },
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Sections an application applies to. `["all"]` in a manifest is the
/// universal match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub enum SectionMatch {
    All,
    Only(Vec<String>),
}

impl SectionMatch {
    pub fn only<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Only(ids.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, section: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(ids) => ids.iter().any(|id| id == section),
        }
    }

    /// True only for an explicit listing, never for the wildcard.
    pub fn names(&self, section: &str) -> bool {
        matches!(self, Self::Only(ids) if ids.iter().any(|id| id == section))
    }

    pub fn first(&self) -> Option<&str> {
        match self {
            Self::All => None,
            Self::Only(ids) => ids.first().map(String::as_str),
        }
    }
}

impl From<Vec<String>> for SectionMatch {
    fn from(ids: Vec<String>) -> Self {
        if ids.iter().any(|id| id == ALL_SECTIONS) {
            Self::All
        } else {
            Self::Only(ids)
        }
    }
}

impl From<SectionMatch> for Vec<String> {
    fn from(value: SectionMatch) -> Self {
        match value {
            SectionMatch::All => vec![ALL_SECTIONS.to_string()],
            SectionMatch::Only(ids) => ids,
        }
    }
}

/// Sub-views an application applies to. A list containing `"any"` is the
/// wildcard.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub enum ViewMatch {
    #[default]
    Any,
    Only(Vec<String>),
}

impl ViewMatch {
    pub fn only<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Only(ids.into_iter().map(Into::into).collect())
    }

    /// An unknown view only satisfies the wildcard.
    pub fn contains(&self, view: Option<&str>) -> bool {
        match (self, view) {
            (Self::Any, _) => true,
            (Self::Only(ids), Some(view)) => ids.iter().any(|id| id == view),
            (Self::Only(_), None) => false,
        }
    }

    pub fn first(&self) -> Option<&str> {
        match self {
            Self::Any => None,
            Self::Only(ids) => ids.first().map(String::as_str),
        }
    }
}

impl From<Vec<String>> for ViewMatch {
    fn from(ids: Vec<String>) -> Self {
        if ids.iter().any(|id| id == ANY_VIEW) {
            Self::Any
        } else {
            Self::Only(ids)
        }
    }
}

impl From<ViewMatch> for Vec<String> {
    fn from(value: ViewMatch) -> Self {
        match value {
            ViewMatch::Any => vec![ANY_VIEW.to_string()],
            ViewMatch::Only(ids) => ids,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AssetKind {
    Stylesheet,
    #[default]
    Script,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetRef {
    #[serde(default)]
    pub kind: AssetKind,
    pub url: String,
}

impl AssetRef {
    pub fn script(url: impl Into<String>) -> Self {
        Self {
            kind: AssetKind::Script,
            url: url.into(),
        }
    }

    pub fn stylesheet(url: impl Into<String>) -> Self {
        Self {
            kind: AssetKind::Stylesheet,
            url: url.into(),
        }
    }

    pub fn is_stylesheet(&self) -> bool {
        self.kind == AssetKind::Stylesheet
    }
}

impl fmt::Display for AssetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.url)
    }
}

/// Pure function from (shared config, section id, view id) to the config an
/// application receives.
pub type ConfigBuilder = Arc<dyn Fn(&SharedConfig, &str, Option<&str>) -> Value + Send + Sync>;

/// # Application Descriptor
///
/// Immutable registration record for one downstream application.
#[derive(Clone)]
pub struct AppDescriptor {
    pub key: String,
    pub sections: SectionMatch,
    pub views: ViewMatch,
    pub primary: AssetRef,
    /// Loaded in declared order before `primary`
    pub prerequisites: Vec<AssetRef>,
    pub config_builder: ConfigBuilder,
    pub config_slot: String,
    /// `None` for self-initializing assets
    pub entry_point: Option<String>,
    /// Survives section changes
    pub persistent: bool,
    /// Probed to detect whether a persistent application is already mounted
    pub root_selector: Option<String>,
    /// Never marked active, so every pipeline run activates it again
    pub always_reevaluate: bool,
    pub completion_marker: Option<String>,
}

impl fmt::Debug for AppDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppDescriptor")
            .field("key", &self.key)
            .field("sections", &self.sections)
            .field("views", &self.views)
            .field("primary", &self.primary)
            .field("prerequisites", &self.prerequisites)
            .field("config_slot", &self.config_slot)
            .field("entry_point", &self.entry_point)
            .field("persistent", &self.persistent)
            .field("always_reevaluate", &self.always_reevaluate)
            .finish_non_exhaustive()
    }
}

impl AppDescriptor {
    pub fn builder(key: impl Into<String>, primary: AssetRef) -> AppDescriptorBuilder {
        AppDescriptorBuilder::new(key.into(), primary)
    }

    pub fn is_universal(&self) -> bool {
        self.sections == SectionMatch::All
    }

    pub fn matches(&self, section: &str, view: Option<&str>) -> bool {
        self.sections.contains(section) && self.views.contains(view)
    }

    pub fn build_config(&self, shared: &SharedConfig, section: &str, view: Option<&str>) -> Value {
        (self.config_builder)(shared, section, view)
    }
}

pub struct AppDescriptorBuilder {
    descriptor: AppDescriptor,
}

impl AppDescriptorBuilder {
    fn new(key: String, primary: AssetRef) -> Self {
        let config_slot = format!("{}Config", key);
        Self {
            descriptor: AppDescriptor {
                key,
                sections: SectionMatch::All,
                views: ViewMatch::Any,
                primary,
                prerequisites: Vec::new(),
                config_builder: Arc::new(|_, _, _| Value::Object(Default::default())),
                config_slot,
                entry_point: None,
                persistent: false,
                root_selector: None,
                always_reevaluate: false,
                completion_marker: None,
            },
        }
    }

    pub fn sections(mut self, sections: SectionMatch) -> Self {
        self.descriptor.sections = sections;
        self
    }

    pub fn views(mut self, views: ViewMatch) -> Self {
        self.descriptor.views = views;
        self
    }

    pub fn prerequisite(mut self, asset: AssetRef) -> Self {
        self.descriptor.prerequisites.push(asset);
        self
    }

    pub fn config_builder<F>(mut self, builder: F) -> Self
    where
        F: Fn(&SharedConfig, &str, Option<&str>) -> Value + Send + Sync + 'static,
    {
        self.descriptor.config_builder = Arc::new(builder);
        self
    }

    pub fn config_slot(mut self, slot: impl Into<String>) -> Self {
        self.descriptor.config_slot = slot.into();
        self
    }

    pub fn entry_point(mut self, name: impl Into<String>) -> Self {
        self.descriptor.entry_point = Some(name.into());
        self
    }

    pub fn persistent(mut self, root_selector: impl Into<String>) -> Self {
        self.descriptor.persistent = true;
        self.descriptor.root_selector = Some(root_selector.into());
        self
    }

    pub fn always_reevaluate(mut self) -> Self {
        self.descriptor.always_reevaluate = true;
        self
    }

    pub fn completion_marker(mut self, marker: impl Into<String>) -> Self {
        self.descriptor.completion_marker = Some(marker.into());
        self
    }

    pub fn build(self) -> AppDescriptor {
        self.descriptor
    }
}

/// Ordered, immutable set of descriptors. Iteration order is registration
/// order, which is the order of the declarative scan.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    descriptors: Vec<Arc<AppDescriptor>>,
    index: HashMap<String, usize>,
    persistent: Option<usize>,
}

impl Registry {
    pub fn new(descriptors: Vec<AppDescriptor>) -> RegistryResult<Self> {
        let mut registry = Self::default();
        for descriptor in descriptors {
            registry.insert(descriptor)?;
        }
        Ok(registry)
    }

    fn insert(&mut self, descriptor: AppDescriptor) -> RegistryResult<()> {
        if descriptor.key.trim().is_empty() {
            return Err(RegistryError::EmptyKey);
        }
        if self.index.contains_key(&descriptor.key) {
            return Err(RegistryError::DuplicateKey {
                key: descriptor.key,
            });
        }
        let position = self.descriptors.len();
        if descriptor.persistent {
            if let Some(existing) = self.persistent {
                return Err(RegistryError::MultiplePersistent {
                    first: self.descriptors[existing].key.clone(),
                    second: descriptor.key,
                });
            }
            self.persistent = Some(position);
        }
        self.index.insert(descriptor.key.clone(), position);
        self.descriptors.push(Arc::new(descriptor));
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Arc<AppDescriptor>> {
        self.index.get(key).map(|&i| &self.descriptors[i])
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<AppDescriptor>> {
        self.descriptors.iter()
    }

    pub fn persistent(&self) -> Option<&Arc<AppDescriptor>> {
        self.persistent.map(|i| &self.descriptors[i])
    }

    pub fn persistent_key(&self) -> Option<&str> {
        self.persistent().map(|d| d.key.as_str())
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
