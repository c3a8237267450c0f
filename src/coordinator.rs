//! # Coordinator
//!
//! Owns one [`LoaderContext`] and every pipeline component. Hosts feed it
//! navigation events through synchronous handlers; each handler updates the
//! tracker, resets activation memory on section change and wakes the
//! pipeline.
//!
//! ## Driving the pipeline
//!
//! Either call [`Coordinator::run_pipeline`] after dispatching events, or run
//! [`Coordinator::run`] on a task: it waits for wake-ups and re-derives the
//! navigation context from the tracker every time. Several events arriving
//! while a run is in flight collapse into one follow-up run.
//!
//! ```rust,ignore
//! let coordinator = Arc::new(Coordinator::new(config, registry, rules, shared, host, loader)?);
//! let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
//! tokio::spawn({
//!     let coordinator = coordinator.clone();
//!     async move { coordinator.run(shutdown_rx).await }
//! });
//! coordinator.on_section_rendered("S1");
//! coordinator.on_view_rendered("V1");
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, broadcast};
use tracing::{debug, info};

use crate::LoaderResult;
use crate::activation::{ActivationEngine, ActivationError, ActivationReport};
use crate::config::{LoaderConfig, SharedConfig};
use crate::context::LoaderContext;
use crate::event_bus::{EventBus, LoaderEvent};
use crate::host::{AssetLoader, PageHost};
use crate::lifecycle::LifecycleReset;
use crate::manifest::Manifest;
use crate::navigation::NavigationTracker;
use crate::registry::Registry;
use crate::resolver::{Resolver, StructuralRule};

/// Navigation events delivered by the host's event bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum HostEvent {
    SectionRendered(String),
    ViewRendered(String),
}

pub struct Coordinator {
    config: LoaderConfig,
    registry: Arc<Registry>,
    tracker: NavigationTracker,
    resolver: Resolver,
    engine: ActivationEngine,
    lifecycle: LifecycleReset,
    context: Arc<LoaderContext>,
    event_bus: Arc<EventBus>,
    host: Arc<dyn PageHost>,
    wake: Notify,
    pipeline: Mutex<()>,
}

impl Coordinator {
    pub fn new(
        config: LoaderConfig,
        registry: Registry,
        rules: Vec<StructuralRule>,
        shared: SharedConfig,
        host: Arc<dyn PageHost>,
        loader: Arc<dyn AssetLoader>,
    ) -> LoaderResult<Self> {
        let registry = Arc::new(registry);
        let resolver = Resolver::new(registry.clone(), rules)?;
        let context = Arc::new(LoaderContext::new());
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let engine = ActivationEngine::new(
            registry.clone(),
            context.clone(),
            loader,
            host.clone(),
            Arc::new(shared),
            event_bus.clone(),
        )
        .with_shared_merge(config.merge_shared_config);
        let lifecycle = LifecycleReset::new(registry.persistent_key().map(str::to_string));

        info!(
            applications = registry.len(),
            rules = resolver.rules().len(),
            persistent = ?lifecycle.persistent_key(),
            "coordinator ready"
        );

        Ok(Self {
            config,
            registry,
            tracker: NavigationTracker::new(),
            resolver,
            engine,
            lifecycle,
            context,
            event_bus,
            host,
            wake: Notify::new(),
            pipeline: Mutex::new(()),
        })
    }

    pub fn from_manifest(
        config: LoaderConfig,
        manifest: Manifest,
        host: Arc<dyn PageHost>,
        loader: Arc<dyn AssetLoader>,
    ) -> LoaderResult<Self> {
        let (registry, rules, shared) = manifest.into_parts()?;
        Self::new(config, registry, rules, shared, host, loader)
    }

    /// "Section rendered" handler.
    pub fn on_section_rendered(&self, id: &str) {
        if let Some(change) = self.tracker.record_section(id) {
            self.event_bus.publish(LoaderEvent::SectionChanged {
                previous: change.previous.clone(),
                current: change.current.clone(),
            });
            let cleared = self
                .lifecycle
                .on_section_changed(&change, self.context.records());
            if !cleared.is_empty() {
                self.event_bus.publish(LoaderEvent::RecordsReset { cleared });
            }
        }
        self.wake.notify_one();
    }

    /// "Sub-view rendered" handler.
    pub fn on_view_rendered(&self, id: &str) {
        if self.tracker.record_view(id) {
            self.event_bus.publish(LoaderEvent::ViewChanged {
                view: id.trim().to_string(),
            });
        }
        self.wake.notify_one();
    }

    pub fn dispatch(&self, event: &HostEvent) {
        match event {
            HostEvent::SectionRendered(id) => self.on_section_rendered(id),
            HostEvent::ViewRendered(id) => self.on_view_rendered(id),
        }
    }

    /// Dispatches `event` and runs the pipeline for the resulting context.
    pub async fn handle(&self, event: &HostEvent) -> ActivationReport {
        self.dispatch(event);
        self.run_pipeline().await
    }

    /// Resolves the current context and activates the candidates. Runs are
    /// serialized.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn run_pipeline(&self) -> ActivationReport {
        let _guard = self.pipeline.lock().await;
        let navigation = self.tracker.current();
        let resolution = self.resolver.resolve(&navigation, self.host.as_ref()).await;

        self.event_bus.publish(LoaderEvent::Resolved {
            section: resolution.section.clone(),
            view: resolution.view.clone(),
            keys: resolution.keys.clone(),
        });

        let mut report = if resolution.keys.is_empty() {
            debug!(section = ?resolution.section, "no candidates");
            ActivationReport::empty(None, None)
        } else {
            self.engine.activate(&resolution.keys, &navigation).await
        };
        report.section = resolution.section;
        report.view = resolution.view;
        report
    }

    /// Runs the pipeline whenever a navigation handler fires, until
    /// `shutdown_rx` yields or its sender is dropped.
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> LoaderResult<()> {
        if self.config.activate_on_start {
            self.run_pipeline().await;
        }
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("coordinator received shutdown signal");
                    break;
                }
                _ = self.wake.notified() => {
                    let report = self.run_pipeline().await;
                    debug!(
                        run_id = %report.run_id,
                        activated = ?report.activated(),
                        failed = ?report.failed(),
                        "pipeline finished"
                    );
                }
            }
        }
        Ok(())
    }

    pub fn context(&self) -> &Arc<LoaderContext> {
        &self.context
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.event_bus.clone()
    }

    pub fn navigation(&self) -> &NavigationTracker {
        &self.tracker
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Configuration published for application `key`, if any.
    pub fn published_config(&self, key: &str) -> LoaderResult<Option<serde_json::Value>> {
        let descriptor = self
            .registry
            .get(key)
            .ok_or_else(|| ActivationError::UnknownApplication {
                key: key.to_string(),
            })?;
        Ok(self.context.published_config(&descriptor.config_slot))
    }
}
