//! # Scenario Replay
//!
//! A scripted [`PageHost`] and [`AssetLoader`] that replay a recorded
//! navigation scenario against a manifest. Used by the `stagehand` binary to
//! check a registration table offline, and by the integration tests.
//!
//! The scripted loader registers each application's declared entry point
//! when its primary asset loads, unless the asset is listed as `silent`.
//! Assets listed as `failing` fail to load; entry points listed as
//! `throwing` return an error when invoked.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::LoaderResult;
use crate::activation::ActivationReport;
use crate::config::{self, ConfigResult, LoaderConfig};
use crate::coordinator::{Coordinator, HostEvent};
use crate::host::{AssetError, AssetLoader, AssetResult, EntryPointRegistrar, PageHost};
use crate::manifest::Manifest;
use crate::registry::{AssetRef, Registry};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplayStep {
    /// Host event: section rendered; runs the pipeline
    Section { id: String },
    /// Host event: sub-view rendered; runs the pipeline
    View { id: String },
    ShowElement { selector: String },
    HideElement { selector: String },
    SetAttribute { name: String, value: Option<String> },
    /// What the host reports as its current section (`None` to clear)
    HostSection { id: Option<String> },
    /// What the host reports as its current sub-view (`None` to clear)
    HostView { id: Option<String> },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub elements: Vec<String>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default)]
    pub failing: Vec<String>,
    #[serde(default)]
    pub silent: Vec<String>,
    #[serde(default)]
    pub throwing: Vec<String>,
    pub steps: Vec<ReplayStep>,
}

impl Scenario {
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        config::from_file(path)
    }

    pub fn from_str(s: &str) -> ConfigResult<Self> {
        config::from_str(s)
    }
}

#[derive(Debug, Default)]
pub struct ScriptedHost {
    elements: DashSet<String>,
    attributes: DashMap<String, String>,
    current_section: RwLock<Option<String>>,
    current_view: RwLock<Option<String>>,
}

impl ScriptedHost {
    pub fn new(scenario: &Scenario) -> Self {
        let host = Self::default();
        for selector in &scenario.elements {
            host.show(selector);
        }
        for (name, value) in &scenario.attributes {
            host.set_attribute(name, Some(value.clone()));
        }
        host
    }

    pub fn show(&self, selector: &str) {
        self.elements.insert(selector.to_string());
    }

    pub fn hide(&self, selector: &str) {
        self.elements.remove(selector);
    }

    pub fn set_attribute(&self, name: &str, value: Option<String>) {
        match value {
            Some(value) => {
                self.attributes.insert(name.to_string(), value);
            }
            None => {
                self.attributes.remove(name);
            }
        }
    }

    pub fn set_current_section(&self, id: Option<String>) {
        if let Ok(mut current) = self.current_section.write() {
            *current = id;
        }
    }

    pub fn set_current_view(&self, id: Option<String>) {
        if let Ok(mut current) = self.current_view.write() {
            *current = id;
        }
    }
}

#[async_trait]
impl PageHost for ScriptedHost {
    fn current_section(&self) -> Option<String> {
        self.current_section
            .read()
            .ok()
            .and_then(|current| current.clone())
    }

    fn current_view(&self) -> Option<String> {
        self.current_view
            .read()
            .ok()
            .and_then(|current| current.clone())
    }

    fn element_exists(&self, selector: &str) -> bool {
        self.elements.contains(selector)
    }

    async fn user_attribute(&self, name: &str) -> Option<String> {
        self.attributes.get(name).map(|value| value.clone())
    }
}

pub struct ScriptedLoader {
    /// primary asset url -> entry point name
    entry_points: HashMap<String, String>,
    failing: HashSet<String>,
    silent: HashSet<String>,
    throwing: HashSet<String>,
    requests: Mutex<Vec<String>>,
    invocations: Arc<DashMap<String, usize>>,
}

impl ScriptedLoader {
    pub fn new(registry: &Registry, scenario: &Scenario) -> Self {
        let entry_points = registry
            .iter()
            .filter_map(|d| {
                d.entry_point
                    .as_ref()
                    .map(|entry| (d.primary.url.clone(), entry.clone()))
            })
            .collect();
        Self {
            entry_points,
            failing: scenario.failing.iter().cloned().collect(),
            silent: scenario.silent.iter().cloned().collect(),
            throwing: scenario.throwing.iter().cloned().collect(),
            requests: Mutex::new(Vec::new()),
            invocations: Arc::new(DashMap::new()),
        }
    }

    /// Every requested asset url, in request order.
    pub async fn requests(&self) -> Vec<String> {
        self.requests.lock().await.clone()
    }

    pub fn invocations(&self, entry_point: &str) -> usize {
        self.invocations
            .get(entry_point)
            .map(|count| *count)
            .unwrap_or(0)
    }

    async fn request(&self, asset: &AssetRef) -> AssetResult<()> {
        self.requests.lock().await.push(asset.url.clone());
        if self.failing.contains(&asset.url) {
            return Err(AssetError::Fetch {
                url: asset.url.clone(),
                message: "scripted failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl AssetLoader for ScriptedLoader {
    async fn load_stylesheet(&self, asset: &AssetRef) -> AssetResult<()> {
        self.request(asset).await
    }

    async fn load_script(
        &self,
        asset: &AssetRef,
        registrar: &EntryPointRegistrar,
    ) -> AssetResult<()> {
        self.request(asset).await?;
        if self.silent.contains(&asset.url) {
            return Ok(());
        }
        if let Some(entry) = self.entry_points.get(&asset.url) {
            let name = entry.clone();
            let throws = self.throwing.contains(entry);
            let invocations = self.invocations.clone();
            registrar.register(entry.clone(), move || {
                *invocations.entry(name.clone()).or_insert(0) += 1;
                if throws {
                    Err(format!("{name} threw"))
                } else {
                    Ok(())
                }
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub step: usize,
    pub action: ReplayStep,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ActivationReport>,
}

pub struct Replay {
    coordinator: Coordinator,
    host: Arc<ScriptedHost>,
    loader: Arc<ScriptedLoader>,
    steps: Vec<ReplayStep>,
}

impl Replay {
    pub fn new(config: LoaderConfig, manifest: Manifest, scenario: Scenario) -> LoaderResult<Self> {
        let (registry, rules, shared) = manifest.into_parts()?;
        let host = Arc::new(ScriptedHost::new(&scenario));
        let loader = Arc::new(ScriptedLoader::new(&registry, &scenario));
        let coordinator = Coordinator::new(
            config,
            registry,
            rules,
            shared,
            host.clone(),
            loader.clone(),
        )?;
        Ok(Self {
            coordinator,
            host,
            loader,
            steps: scenario.steps,
        })
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn host(&self) -> &ScriptedHost {
        &self.host
    }

    pub fn loader(&self) -> &ScriptedLoader {
        &self.loader
    }

    /// Applies every step in order; navigation steps run the pipeline.
    pub async fn run(&self) -> Vec<StepReport> {
        let mut reports = Vec::with_capacity(self.steps.len());
        for (step, action) in self.steps.iter().enumerate() {
            let report = self.apply(action).await;
            if let Some(report) = &report {
                info!(
                    step,
                    activated = ?report.activated(),
                    skipped = ?report.skipped(),
                    failed = ?report.failed(),
                    "replayed navigation step"
                );
            }
            reports.push(StepReport {
                step,
                action: action.clone(),
                report,
            });
        }
        reports
    }

    async fn apply(&self, action: &ReplayStep) -> Option<ActivationReport> {
        debug!(?action, "replay step");
        match action {
            ReplayStep::Section { id } => Some(
                self.coordinator
                    .handle(&HostEvent::SectionRendered(id.clone()))
                    .await,
            ),
            ReplayStep::View { id } => Some(
                self.coordinator
                    .handle(&HostEvent::ViewRendered(id.clone()))
                    .await,
            ),
            ReplayStep::ShowElement { selector } => {
                self.host.show(selector);
                None
            }
            ReplayStep::HideElement { selector } => {
                self.host.hide(selector);
                None
            }
            ReplayStep::SetAttribute { name, value } => {
                self.host.set_attribute(name, value.clone());
                None
            }
            ReplayStep::HostSection { id } => {
                self.host.set_current_section(id.clone());
                None
            }
            ReplayStep::HostView { id } => {
                self.host.set_current_view(id.clone());
                None
            }
        }
    }
}
