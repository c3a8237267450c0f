//! # Resolver
//!
//! Turns the navigation context into an ordered, de-duplicated list of
//! application keys to activate.
//!
//! ## Resolution order
//!
//! 1. Structural rules for the current section, in declaration order. Rules
//!    cover sections where declarative data cannot tell two descriptors apart
//!    and the rendered page (or a user attribute) has to decide.
//! 2. Universal descriptors (`SectionMatch::All`).
//! 3. Declarative scan of the remaining descriptors in registration order.
//!
//! A rule that yields at least one key claims its section: descriptors that
//! name that section explicitly are not added by the declarative scan. Keys
//! a rule governs are never added declaratively while the rule applies.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::activation::ActivationError;
use crate::host::PageHost;
use crate::navigation::NavigationState;
use crate::registry::{Registry, RegistryError, RegistryResult, ViewMatch};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeCandidate {
    pub selector: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeCandidate {
    pub value: String,
    pub key: String,
}

/// Disambiguation rule for a section with more than one plausible
/// application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StructuralRule {
    /// Each candidate whose container is rendered is selected, in order.
    ContainerProbe {
        section: String,
        candidates: Vec<ProbeCandidate>,
    },
    /// Equivalent applications for one section and view; a user attribute
    /// picks one. Missing or unmapped values select `default_key`.
    AttributeChoice {
        section: String,
        #[serde(default)]
        views: ViewMatch,
        attribute: String,
        choices: Vec<AttributeCandidate>,
        default_key: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The rule does not cover this section/view
    NotApplicable,
    /// The rule selected these keys and claims the section
    Claimed(Vec<String>),
    /// The rule applies but nothing on the page matched
    Unclaimed,
}

impl StructuralRule {
    pub fn section(&self) -> &str {
        match self {
            Self::ContainerProbe { section, .. } | Self::AttributeChoice { section, .. } => section,
        }
    }

    pub fn applies_to(&self, section: &str, view: Option<&str>) -> bool {
        match self {
            Self::ContainerProbe { section: s, .. } => s == section,
            Self::AttributeChoice {
                section: s, views, ..
            } => s == section && views.contains(view),
        }
    }

    /// Every key the rule can select.
    pub fn keys(&self) -> Vec<&str> {
        match self {
            Self::ContainerProbe { candidates, .. } => {
                candidates.iter().map(|c| c.key.as_str()).collect()
            }
            Self::AttributeChoice {
                choices,
                default_key,
                ..
            } => choices
                .iter()
                .map(|c| c.key.as_str())
                .chain(std::iter::once(default_key.as_str()))
                .collect(),
        }
    }
}

/// Evaluates one rule against the page.
pub async fn decide(
    rule: &StructuralRule,
    section: &str,
    view: Option<&str>,
    host: &dyn PageHost,
) -> Decision {
    if !rule.applies_to(section, view) {
        return Decision::NotApplicable;
    }
    match rule {
        StructuralRule::ContainerProbe { candidates, .. } => {
            let keys: Vec<String> = candidates
                .iter()
                .filter(|c| host.element_exists(&c.selector))
                .map(|c| c.key.clone())
                .collect();
            if keys.is_empty() {
                Decision::Unclaimed
            } else {
                Decision::Claimed(keys)
            }
        }
        StructuralRule::AttributeChoice {
            attribute,
            choices,
            default_key,
            ..
        } => {
            let value = host
                .user_attribute(attribute)
                .await
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty());
            let chosen = value
                .as_deref()
                .and_then(|v| choices.iter().find(|c| c.value == v))
                .map(|c| c.key.clone());
            match chosen {
                Some(key) => Decision::Claimed(vec![key]),
                None => {
                    let err = ActivationError::CapabilityUnavailable {
                        key: default_key.clone(),
                        capability: format!("user attribute {attribute}"),
                    };
                    warn!(%err, value = ?value, fallback = %default_key, "using default application");
                    Decision::Claimed(vec![default_key.clone()])
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SectionSource {
    Host,
    LastKnown,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub section: Option<String>,
    pub view: Option<String>,
    pub section_source: SectionSource,
    pub keys: Vec<String>,
}

pub struct Resolver {
    registry: Arc<Registry>,
    rules: Vec<StructuralRule>,
}

impl Resolver {
    pub fn new(registry: Arc<Registry>, rules: Vec<StructuralRule>) -> RegistryResult<Self> {
        for rule in &rules {
            if let Some(key) = rule.keys().into_iter().find(|k| !registry.contains(k)) {
                return Err(RegistryError::UnknownRuleKey {
                    section: rule.section().to_string(),
                    key: key.to_string(),
                });
            }
        }
        Ok(Self { registry, rules })
    }

    pub fn rules(&self) -> &[StructuralRule] {
        &self.rules
    }

    /// Resolves against the host-reported ids, falling back to the last
    /// known ones.
    #[tracing::instrument(skip(self, host), level = "debug")]
    pub async fn resolve(&self, navigation: &NavigationState, host: &dyn PageHost) -> Resolution {
        let (section, section_source) = match host.current_section() {
            Some(section) if !section.trim().is_empty() => (Some(section), SectionSource::Host),
            _ => match &navigation.last_section {
                Some(section) => (Some(section.clone()), SectionSource::LastKnown),
                None => (None, SectionSource::Unavailable),
            },
        };
        let view = host
            .current_view()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| navigation.last_view.clone());

        let keys = match &section {
            Some(section) => self.resolve_for(section, view.as_deref(), host).await,
            None => {
                debug!(view = ?view, "no section known yet, nothing to resolve");
                Vec::new()
            }
        };

        Resolution {
            section,
            view,
            section_source,
            keys,
        }
    }

    pub async fn resolve_for(
        &self,
        section: &str,
        view: Option<&str>,
        host: &dyn PageHost,
    ) -> Vec<String> {
        let mut keys: IndexSet<String> = IndexSet::new();
        let mut governed: HashSet<&str> = HashSet::new();
        let mut claimed = false;

        for rule in &self.rules {
            if !rule.applies_to(section, view) {
                continue;
            }
            governed.extend(rule.keys());
            if let Decision::Claimed(selected) = decide(rule, section, view, host).await {
                claimed = true;
                keys.extend(selected);
            }
        }

        keys.extend(
            self.registry
                .iter()
                .filter(|d| d.is_universal())
                .map(|d| d.key.clone()),
        );

        for descriptor in self.registry.iter() {
            if descriptor.is_universal() || governed.contains(descriptor.key.as_str()) {
                continue;
            }
            if claimed && descriptor.sections.names(section) {
                continue;
            }
            if descriptor.matches(section, view) {
                keys.insert(descriptor.key.clone());
            }
        }

        debug!(section, view = ?view, keys = ?keys, "resolved");
        keys.into_iter().collect()
    }
}
