//! # Activation Engine
//!
//! Runs the activation pipeline for each candidate key, one key at a time:
//!
//! ```text
//! idempotence check → concrete ids → config build
//!   → stylesheets (spawned, not awaited)
//!   → prerequisite scripts (sequential)
//!   → primary asset → publish config → entry point → mark active
//! ```
//!
//! Later assets may depend on globals set up by earlier ones, so a script
//! never starts loading before the previous one has resolved. Every failure is
//! local to its key: it is logged, published on the error channel and
//! reported, and the engine moves on to the next candidate. Any configuration
//! published for a failed key is cleared.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SharedConfig;
use crate::context::LoaderContext;
use crate::event_bus::{ErrorEvent, EventBus, LoaderEvent};
use crate::host::{AssetError, AssetLoader, EntryPoint, PageHost};
use crate::navigation::NavigationState;
use crate::registry::{AppDescriptor, AssetRef, Registry};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ActivationError {
    #[error("{key}: failed to load {asset}: {source}")]
    AssetLoad {
        key: String,
        asset: String,
        source: AssetError,
    },
    #[error("{key}: no usable section id")]
    ConfigResolution { key: String },
    #[error("{key}: entry point {entry_point} was not registered")]
    EntryPointMissing { key: String, entry_point: String },
    #[error("{key}: entry point {entry_point} failed: {message}")]
    EntryPointThrew {
        key: String,
        entry_point: String,
        message: String,
    },
    #[error("{key}: {capability} unavailable")]
    CapabilityUnavailable { key: String, capability: String },
    #[error("{key}: not registered")]
    UnknownApplication { key: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AssetLoadFailure,
    ConfigResolutionFailure,
    EntryPointMissing,
    EntryPointThrew,
    CapabilityUnavailable,
    UnknownApplication,
}

impl ActivationError {
    pub fn key(&self) -> &str {
        match self {
            Self::AssetLoad { key, .. }
            | Self::ConfigResolution { key }
            | Self::EntryPointMissing { key, .. }
            | Self::EntryPointThrew { key, .. }
            | Self::CapabilityUnavailable { key, .. }
            | Self::UnknownApplication { key } => key,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AssetLoad { .. } => ErrorKind::AssetLoadFailure,
            Self::ConfigResolution { .. } => ErrorKind::ConfigResolutionFailure,
            Self::EntryPointMissing { .. } => ErrorKind::EntryPointMissing,
            Self::EntryPointThrew { .. } => ErrorKind::EntryPointThrew,
            Self::CapabilityUnavailable { .. } => ErrorKind::CapabilityUnavailable,
            Self::UnknownApplication { .. } => ErrorKind::UnknownApplication,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SkipReason {
    /// Already activated for the current context
    AlreadyActive,
    /// The persistent application's root element is mounted
    RootPresent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum KeyOutcome {
    Activated {
        section: String,
        view: Option<String>,
    },
    Skipped {
        reason: SkipReason,
    },
    Failed {
        kind: ErrorKind,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyReport {
    pub key: String,
    #[serde(flatten)]
    pub outcome: KeyOutcome,
}

/// Result of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub section: Option<String>,
    pub view: Option<String>,
    pub outcomes: Vec<KeyReport>,
}

impl ActivationReport {
    pub fn empty(section: Option<String>, view: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            started_at: now,
            finished_at: now,
            section,
            view,
            outcomes: Vec::new(),
        }
    }

    pub fn outcome(&self, key: &str) -> Option<&KeyOutcome> {
        self.outcomes
            .iter()
            .find(|report| report.key == key)
            .map(|report| &report.outcome)
    }

    pub fn activated(&self) -> Vec<&str> {
        self.keys_where(|outcome| matches!(outcome, KeyOutcome::Activated { .. }))
    }

    pub fn skipped(&self) -> Vec<&str> {
        self.keys_where(|outcome| matches!(outcome, KeyOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> Vec<&str> {
        self.keys_where(|outcome| matches!(outcome, KeyOutcome::Failed { .. }))
    }

    fn keys_where(&self, predicate: impl Fn(&KeyOutcome) -> bool) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|report| predicate(&report.outcome))
            .map(|report| report.key.as_str())
            .collect()
    }
}

enum Activation {
    Done {
        section: String,
        view: Option<String>,
    },
    Skipped(SkipReason),
}

pub struct ActivationEngine {
    registry: Arc<Registry>,
    context: Arc<LoaderContext>,
    loader: Arc<dyn AssetLoader>,
    host: Arc<dyn PageHost>,
    shared: Arc<SharedConfig>,
    event_bus: Arc<EventBus>,
    merge_shared: bool,
}

impl ActivationEngine {
    pub fn new(
        registry: Arc<Registry>,
        context: Arc<LoaderContext>,
        loader: Arc<dyn AssetLoader>,
        host: Arc<dyn PageHost>,
        shared: Arc<SharedConfig>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            registry,
            context,
            loader,
            host,
            shared,
            event_bus,
            merge_shared: true,
        }
    }

    pub fn with_shared_merge(mut self, enabled: bool) -> Self {
        self.merge_shared = enabled;
        self
    }

    /// Activates `keys` strictly in order. Never fails as a whole; per-key
    /// outcomes are in the report.
    #[tracing::instrument(skip(self, navigation), level = "debug")]
    pub async fn activate(&self, keys: &[String], navigation: &NavigationState) -> ActivationReport {
        let mut report =
            ActivationReport::empty(navigation.last_section.clone(), navigation.last_view.clone());

        for key in keys {
            let outcome = match self.activate_one(key, navigation).await {
                Ok(Activation::Done { section, view }) => {
                    info!(key = %key, section = %section, view = ?view, "application activated");
                    self.event_bus.publish(LoaderEvent::Activated {
                        key: key.clone(),
                        section: section.clone(),
                        view: view.clone(),
                    });
                    KeyOutcome::Activated { section, view }
                }
                Ok(Activation::Skipped(reason)) => {
                    debug!(key = %key, reason = %reason, "activation skipped");
                    self.event_bus.publish(LoaderEvent::Skipped {
                        key: key.clone(),
                        reason,
                    });
                    KeyOutcome::Skipped { reason }
                }
                Err(err) => {
                    warn!(key = %key, kind = %err.kind(), error = %err, "activation failed");
                    self.discard_config(key);
                    self.event_bus.publish_error(ErrorEvent::from(&err));
                    KeyOutcome::Failed {
                        kind: err.kind(),
                        message: err.to_string(),
                    }
                }
            };
            report.outcomes.push(KeyReport {
                key: key.clone(),
                outcome,
            });
        }

        report.finished_at = Utc::now();
        report
    }

    async fn activate_one(
        &self,
        key: &str,
        navigation: &NavigationState,
    ) -> Result<Activation, ActivationError> {
        let descriptor = self
            .registry
            .get(key)
            .cloned()
            .ok_or_else(|| ActivationError::UnknownApplication {
                key: key.to_string(),
            })?;
        let records = self.context.records();

        if descriptor.persistent {
            if let Some(selector) = &descriptor.root_selector {
                if self.host.element_exists(selector) {
                    return Ok(Activation::Skipped(SkipReason::RootPresent));
                }
                if records.clear(key) {
                    warn!(key, selector = %selector, "root element missing, clearing stale active flag");
                }
            }
        }

        if !descriptor.always_reevaluate && records.is_active(key) {
            return Ok(Activation::Skipped(SkipReason::AlreadyActive));
        }

        let (section, view) = self.concrete_ids(&descriptor, navigation).ok_or_else(|| {
            ActivationError::ConfigResolution {
                key: key.to_string(),
            }
        })?;

        let config = descriptor.build_config(&self.shared, &section, view.as_deref());
        let config = if self.merge_shared {
            self.shared.merge_into(config)
        } else {
            config
        };

        // only a registration made by this load counts
        if let Some(name) = &descriptor.entry_point {
            self.context.entry_points().remove(name);
        }

        self.load_prerequisites(&descriptor).await?;
        self.load_asset(&descriptor, &descriptor.primary).await?;

        self.context.slots().publish(&descriptor.config_slot, config);

        if let Some(name) = &descriptor.entry_point {
            let entry = self.context.entry_points().get(name).ok_or_else(|| {
                ActivationError::EntryPointMissing {
                    key: key.to_string(),
                    entry_point: name.clone(),
                }
            })?;
            invoke(&entry).map_err(|message| ActivationError::EntryPointThrew {
                key: key.to_string(),
                entry_point: name.clone(),
                message,
            })?;
        }

        if !descriptor.always_reevaluate {
            records.mark_active(key);
        }
        if let Some(marker) = &descriptor.completion_marker {
            self.context.set_marker(marker);
        }
        Ok(Activation::Done { section, view })
    }

    /// Host-reported ids inside the descriptor's sets win, then last-known
    /// ids, then the descriptor's first declared ids.
    fn concrete_ids(
        &self,
        descriptor: &AppDescriptor,
        navigation: &NavigationState,
    ) -> Option<(String, Option<String>)> {
        let section = self
            .host
            .current_section()
            .filter(|s| !s.trim().is_empty() && descriptor.sections.contains(s))
            .or_else(|| {
                navigation
                    .last_section
                    .clone()
                    .filter(|s| descriptor.sections.contains(s))
            })
            .or_else(|| descriptor.sections.first().map(str::to_string))?;

        let view = self
            .host
            .current_view()
            .filter(|v| !v.trim().is_empty() && descriptor.views.contains(Some(v.as_str())))
            .or_else(|| {
                navigation
                    .last_view
                    .clone()
                    .filter(|v| descriptor.views.contains(Some(v.as_str())))
            })
            .or_else(|| descriptor.views.first().map(str::to_string));

        Some((section, view))
    }

    async fn load_prerequisites(&self, descriptor: &AppDescriptor) -> Result<(), ActivationError> {
        for asset in descriptor.prerequisites.iter().filter(|a| a.is_stylesheet()) {
            let loader = self.loader.clone();
            let asset = asset.clone();
            let key = descriptor.key.clone();
            tokio::spawn(async move {
                if let Err(err) = loader.load_stylesheet(&asset).await {
                    warn!(key = %key, asset = %asset, error = %err, "stylesheet failed to load");
                }
            });
        }

        for asset in descriptor.prerequisites.iter().filter(|a| !a.is_stylesheet()) {
            self.load_asset(descriptor, asset).await?;
        }
        Ok(())
    }

    async fn load_asset(
        &self,
        descriptor: &AppDescriptor,
        asset: &AssetRef,
    ) -> Result<(), ActivationError> {
        debug!(key = %descriptor.key, asset = %asset, "loading");
        let result = if asset.is_stylesheet() {
            self.loader.load_stylesheet(asset).await
        } else {
            self.loader
                .load_script(asset, self.context.entry_points())
                .await
        };
        result.map_err(|source| ActivationError::AssetLoad {
            key: descriptor.key.clone(),
            asset: asset.url.clone(),
            source,
        })
    }

    fn discard_config(&self, key: &str) {
        if let Some(descriptor) = self.registry.get(key) {
            if self
                .context
                .slots()
                .clear(&descriptor.config_slot)
                .is_some()
            {
                debug!(key, slot = %descriptor.config_slot, "published config cleared");
            }
        }
    }
}

fn invoke(entry: &EntryPoint) -> Result<(), String> {
    match catch_unwind(AssertUnwindSafe(|| entry())) {
        Ok(result) => result,
        Err(panic) => Err(panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "entry point panicked".to_string())),
    }
}
