//! JSON form of the registration table.
//!
//! ```json
//! {
//!   "shared": { "tenant": { "id": "acme" } },
//!   "applications": [
//!     {
//!       "key": "reports",
//!       "sections": ["S1"],
//!       "views": ["any"],
//!       "primary": { "url": "/apps/reports.js" },
//!       "prerequisites": [{ "kind": "stylesheet", "url": "/apps/reports.css" }],
//!       "config": { "theme": "dark" },
//!       "entry_point": "initReports"
//!     }
//!   ],
//!   "rules": []
//! }
//! ```
//!
//! A manifest entry's config builder copies its `config` template and adds
//! the concrete `section` and `view` ids.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

use crate::LoaderResult;
use crate::config::{self, ConfigResult, SharedConfig, SharedConfigFile};
use crate::registry::{AppDescriptor, AssetRef, Registry, SectionMatch, ViewMatch};
use crate::resolver::StructuralRule;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationManifest {
    pub key: String,
    pub sections: SectionMatch,
    #[serde(default)]
    pub views: ViewMatch,
    pub primary: AssetRef,
    #[serde(default)]
    pub prerequisites: Vec<AssetRef>,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub config_slot: Option<String>,
    #[serde(default)]
    pub entry_point: Option<String>,
    #[serde(default)]
    pub persistent: bool,
    #[serde(default)]
    pub root_selector: Option<String>,
    #[serde(default)]
    pub always_reevaluate: bool,
    #[serde(default)]
    pub completion_marker: Option<String>,
}

impl ApplicationManifest {
    pub fn into_descriptor(self) -> AppDescriptor {
        let template = self.config;
        let mut builder = AppDescriptor::builder(self.key, self.primary)
            .sections(self.sections)
            .views(self.views)
            .config_builder(move |_, section, view| {
                let mut config = template.clone();
                config.insert("section".to_string(), Value::String(section.to_string()));
                config.insert(
                    "view".to_string(),
                    view.map_or(Value::Null, |v| Value::String(v.to_string())),
                );
                Value::Object(config)
            });
        for asset in self.prerequisites {
            builder = builder.prerequisite(asset);
        }
        if let Some(slot) = self.config_slot {
            builder = builder.config_slot(slot);
        }
        if let Some(entry) = self.entry_point {
            builder = builder.entry_point(entry);
        }
        if self.always_reevaluate {
            builder = builder.always_reevaluate();
        }
        if let Some(marker) = self.completion_marker {
            builder = builder.completion_marker(marker);
        }

        let mut descriptor = builder.build();
        descriptor.persistent = self.persistent;
        descriptor.root_selector = self.root_selector;
        descriptor
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub shared: SharedConfigFile,
    pub applications: Vec<ApplicationManifest>,
    #[serde(default)]
    pub rules: Vec<StructuralRule>,
}

impl Manifest {
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        config::from_file(path)
    }

    pub fn from_str(s: &str) -> ConfigResult<Self> {
        config::from_str(s)
    }

    /// Builds the validated registry; rules are checked against it when the
    /// coordinator is built.
    pub fn into_parts(self) -> LoaderResult<(Registry, Vec<StructuralRule>, SharedConfig)> {
        let registry = Registry::new(
            self.applications
                .into_iter()
                .map(ApplicationManifest::into_descriptor)
                .collect(),
        )?;
        Ok((registry, self.rules, self.shared.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LoaderError;
    use crate::registry::{AssetKind, RegistryError};
    use serde_json::json;

    const MANIFEST: &str = r##"{
        "shared": {"tenant": {"id": "acme"}, "credentials": {"user_id": "u1", "token": "tk"}},
        "applications": [
            {
                "key": "header",
                "sections": ["all"],
                "primary": {"url": "/header.js"},
                "persistent": true,
                "root_selector": "#app-header",
                "entry_point": "initHeader"
            },
            {
                "key": "reports",
                "sections": ["S1", "S2"],
                "views": ["V1"],
                "primary": {"url": "/reports.js"},
                "prerequisites": [
                    {"kind": "stylesheet", "url": "/reports.css"},
                    {"url": "/vendor/charts.js"}
                ],
                "config": {"theme": "dark"},
                "config_slot": "reportSettings",
                "entry_point": "initReports",
                "completion_marker": "reportsReady"
            }
        ],
        "rules": [
            {"kind": "container_probe", "section": "S2",
             "candidates": [{"selector": "#reports-grid", "key": "reports"}]}
        ]
    }"##;

    #[test]
    fn test_manifest_into_parts() {
        let manifest = Manifest::from_str(MANIFEST).unwrap();
        let (registry, rules, shared) = manifest.into_parts().unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(rules.len(), 1);
        assert_eq!(shared.tenant.id, "acme");
        assert_eq!(registry.persistent_key(), Some("header"));

        let header = registry.get("header").unwrap();
        assert!(header.is_universal());
        assert_eq!(header.root_selector.as_deref(), Some("#app-header"));

        let reports = registry.get("reports").unwrap();
        assert_eq!(reports.config_slot, "reportSettings");
        assert_eq!(reports.views, ViewMatch::only(["V1"]));
        assert_eq!(reports.prerequisites[0].kind, AssetKind::Stylesheet);
        assert_eq!(reports.prerequisites[1].kind, AssetKind::Script);
        assert_eq!(reports.completion_marker.as_deref(), Some("reportsReady"));
    }

    #[test]
    fn test_template_config_builder() {
        let (registry, _, shared) = Manifest::from_str(MANIFEST).unwrap().into_parts().unwrap();
        let reports = registry.get("reports").unwrap();
        assert_eq!(
            reports.build_config(&shared, "S2", Some("V1")),
            json!({"theme": "dark", "section": "S2", "view": "V1"})
        );
        assert_eq!(
            reports.build_config(&shared, "S1", None),
            json!({"theme": "dark", "section": "S1", "view": null})
        );
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let manifest = Manifest::from_str(
            r#"{"applications": [
                {"key": "a", "sections": ["S1"], "primary": {"url": "/a.js"}},
                {"key": "a", "sections": ["S2"], "primary": {"url": "/a2.js"}}
            ]}"#,
        )
        .unwrap();
        let err = manifest.into_parts().unwrap_err();
        assert!(matches!(
            err,
            LoaderError::Registry(RegistryError::DuplicateKey { .. })
        ));
    }
}
