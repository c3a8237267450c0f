use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::json;
use stagehand::{
    Coordinator, HostEvent,
    activation::{ErrorKind, KeyOutcome, SkipReason},
    config::{LoaderConfig, SharedConfig},
    host::{AssetError, AssetLoader, AssetResult, EntryPointRegistrar},
    registry::{AppDescriptor, AssetRef, Registry, SectionMatch, ViewMatch},
    replay::{Scenario, ScriptedHost, ScriptedLoader},
    resolver::{ProbeCandidate, StructuralRule},
};
use tokio::sync::Mutex;

fn app(key: &str, sections: &[&str], views: ViewMatch) -> AppDescriptor {
    AppDescriptor::builder(key, AssetRef::script(format!("/{key}.js")))
        .sections(SectionMatch::only(sections.iter().copied()))
        .views(views)
        .config_builder(|_, section, view| json!({"section": section, "view": view}))
        .entry_point(format!("init-{key}"))
        .build()
}

fn header() -> AppDescriptor {
    AppDescriptor::builder("header", AssetRef::script("/header.js"))
        .persistent("#header")
        .entry_point("init-header")
        .build()
}

struct Fixture {
    coordinator: Coordinator,
    host: Arc<ScriptedHost>,
    loader: Arc<ScriptedLoader>,
}

fn fixture(descriptors: Vec<AppDescriptor>, rules: Vec<StructuralRule>, scenario: Scenario) -> Fixture {
    let registry = Registry::new(descriptors).unwrap();
    let host = Arc::new(ScriptedHost::new(&scenario));
    let loader = Arc::new(ScriptedLoader::new(&registry, &scenario));
    let coordinator = Coordinator::new(
        LoaderConfig::default(),
        registry,
        rules,
        SharedConfig::default(),
        host.clone(),
        loader.clone(),
    )
    .unwrap();
    Fixture {
        coordinator,
        host,
        loader,
    }
}

fn section(id: &str) -> HostEvent {
    HostEvent::SectionRendered(id.to_string())
}

fn view(id: &str) -> HostEvent {
    HostEvent::ViewRendered(id.to_string())
}

#[tokio::test]
async fn test_single_declarative_match() {
    let f = fixture(
        vec![
            app("alpha", &["S1"], ViewMatch::only(["V1"])),
            app("other", &["S9"], ViewMatch::Any),
        ],
        vec![],
        Scenario::default(),
    );

    f.coordinator.handle(&section("S1")).await;
    let report = f.coordinator.handle(&view("V1")).await;

    assert_eq!(report.activated(), vec!["alpha"]);
    assert_eq!(
        f.coordinator.published_config("alpha").unwrap().unwrap()["section"],
        json!("S1")
    );
    assert_eq!(f.loader.invocations("init-alpha"), 1);
}

#[tokio::test]
async fn test_probe_claims_section_over_declarative_view() {
    let rules = vec![StructuralRule::ContainerProbe {
        section: "S2".to_string(),
        candidates: vec![ProbeCandidate {
            selector: "#x".to_string(),
            key: "beta".to_string(),
        }],
    }];
    let scenario = Scenario {
        elements: vec!["#x".to_string()],
        ..Default::default()
    };
    let f = fixture(
        vec![
            app("beta", &["S2"], ViewMatch::Any),
            app("gamma", &["S2"], ViewMatch::only(["V2"])),
        ],
        rules,
        scenario,
    );

    f.coordinator.dispatch(&section("S2"));
    let report = f.coordinator.handle(&view("V3")).await;

    assert_eq!(report.activated(), vec!["beta"]);
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(f.loader.invocations("init-gamma"), 0);
}

#[tokio::test]
async fn test_view_before_any_section_does_nothing() {
    let f = fixture(
        vec![app("alpha", &["S1"], ViewMatch::only(["V1"]))],
        vec![],
        Scenario::default(),
    );
    let (_, mut errors) = f.coordinator.event_bus().subscribe();

    let report = f.coordinator.handle(&view("V1")).await;

    assert!(report.outcomes.is_empty());
    assert_eq!(report.section, None);
    assert!(f.loader.requests().await.is_empty());
    assert!(
        tokio::time::timeout(Duration::from_millis(50), errors.recv())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_failed_primary_isolated_to_its_key() {
    let scenario = Scenario {
        failing: vec!["/delta.js".to_string()],
        ..Default::default()
    };
    let f = fixture(
        vec![
            app("delta", &["S3"], ViewMatch::Any),
            app("epsilon", &["S3"], ViewMatch::Any),
        ],
        vec![],
        scenario,
    );
    let (_, mut errors) = f.coordinator.event_bus().subscribe();

    let report = f.coordinator.handle(&section("S3")).await;

    assert!(matches!(
        report.outcome("delta"),
        Some(KeyOutcome::Failed {
            kind: ErrorKind::AssetLoadFailure,
            ..
        })
    ));
    assert_eq!(report.activated(), vec!["epsilon"]);
    assert_eq!(f.coordinator.published_config("delta").unwrap(), None);
    assert!(!f.coordinator.context().records().is_active("delta"));

    let error = errors.recv().await.unwrap();
    assert_eq!(error.key, "delta");
    assert_eq!(error.kind, ErrorKind::AssetLoadFailure);
}

#[tokio::test]
async fn test_section_change_keeps_persistent_application() {
    let f = fixture(
        vec![header(), app("alpha", &["S1"], ViewMatch::only(["V1"]))],
        vec![],
        Scenario::default(),
    );

    let report = f.coordinator.handle(&section("S1")).await;
    assert_eq!(report.activated(), vec!["header"]);
    // the header's entry point mounts its root
    f.host.show("#header");

    let report = f.coordinator.handle(&view("V1")).await;
    assert_eq!(report.activated(), vec!["alpha"]);

    let report = f.coordinator.handle(&section("S5")).await;
    let records = f.coordinator.context().records();
    assert!(!records.is_active("alpha"));
    assert!(records.is_active("header"));
    assert_eq!(
        report.outcome("header"),
        Some(&KeyOutcome::Skipped {
            reason: SkipReason::RootPresent
        })
    );
    assert_eq!(f.loader.invocations("init-header"), 1);

    // back on S1 with V1 still the last view, alpha comes up again
    let report = f.coordinator.handle(&section("S1")).await;
    assert_eq!(report.activated(), vec!["alpha"]);
    assert_eq!(f.loader.invocations("init-alpha"), 2);
    assert_eq!(f.loader.invocations("init-header"), 1);
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let f = fixture(
        vec![app("alpha", &["S1"], ViewMatch::Any)],
        vec![],
        Scenario::default(),
    );

    f.coordinator.handle(&section("S1")).await;
    for _ in 0..3 {
        let report = f.coordinator.run_pipeline().await;
        assert_eq!(report.skipped(), vec!["alpha"]);
    }
    // repeating the same section id is not a section change
    f.coordinator.handle(&section("S1")).await;

    assert_eq!(f.loader.invocations("init-alpha"), 1);
    assert_eq!(f.loader.requests().await, vec!["/alpha.js"]);
}

#[tokio::test]
async fn test_host_reported_section_preferred() {
    let f = fixture(
        vec![app("alpha", &["S1"], ViewMatch::only(["V1"]))],
        vec![],
        Scenario::default(),
    );
    f.host.set_current_section(Some("S1".to_string()));

    // no section event has fired, but the host knows where it is
    let report = f.coordinator.handle(&view("V1")).await;
    assert_eq!(
        report.outcome("alpha"),
        Some(&KeyOutcome::Activated {
            section: "S1".to_string(),
            view: Some("V1".to_string()),
        })
    );
}

#[tokio::test]
async fn test_last_known_section_fallback() {
    let f = fixture(
        vec![app("alpha", &["S1"], ViewMatch::only(["V1"]))],
        vec![],
        Scenario::default(),
    );

    f.coordinator.dispatch(&section("S1"));
    f.host.set_current_section(None);
    let report = f.coordinator.handle(&view("V1")).await;

    assert_eq!(report.section.as_deref(), Some("S1"));
    assert_eq!(report.activated(), vec!["alpha"]);
    assert_eq!(
        f.coordinator.published_config("alpha").unwrap().unwrap(),
        json!({
            "section": "S1",
            "view": "V1",
            "tenant": {"id": "", "name": null, "locale": null},
            "credentials": {"user_id": "", "token": ""},
            "notifications": {"enabled": true, "channel": null, "poll_interval": 30000},
        })
    );
}

#[tokio::test]
async fn test_wildcard_included_once_per_context() {
    let banner = AppDescriptor::builder("banner", AssetRef::script("/banner.js"))
        .entry_point("init-banner")
        .build();
    let rules = vec![StructuralRule::ContainerProbe {
        section: "S2".to_string(),
        candidates: vec![ProbeCandidate {
            selector: "#banner-slot".to_string(),
            key: "banner".to_string(),
        }],
    }];
    let scenario = Scenario {
        elements: vec!["#banner-slot".to_string()],
        ..Default::default()
    };
    let f = fixture(
        vec![banner, app("beta", &["S2"], ViewMatch::Any)],
        rules,
        scenario,
    );

    for id in ["S1", "S2", "S7"] {
        let report = f.coordinator.handle(&section(id)).await;
        let seen = report.outcomes.iter().filter(|o| o.key == "banner").count();
        assert_eq!(seen, 1, "section {id}");
        assert_eq!(report.activated()[0], "banner");

        f.coordinator.run_pipeline().await;
    }
    // once per section visited
    assert_eq!(f.loader.invocations("init-banner"), 3);
}

/// Loader that records when each script starts and finishes.
struct TimelineLoader {
    failing: &'static str,
    timeline: Mutex<Vec<String>>,
}

#[async_trait]
impl AssetLoader for TimelineLoader {
    async fn load_stylesheet(&self, _asset: &AssetRef) -> AssetResult<()> {
        Ok(())
    }

    async fn load_script(
        &self,
        asset: &AssetRef,
        _registrar: &EntryPointRegistrar,
    ) -> AssetResult<()> {
        self.timeline.lock().await.push(format!("start {}", asset.url));
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.timeline.lock().await.push(format!("end {}", asset.url));
        if asset.url == self.failing {
            return Err(AssetError::Execute {
                url: asset.url.clone(),
                message: "syntax error".to_string(),
            });
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_prerequisites_load_sequentially() {
    let descriptor = AppDescriptor::builder("reports", AssetRef::script("/reports.js"))
        .sections(SectionMatch::only(["S1"]))
        .prerequisite(AssetRef::script("/a.js"))
        .prerequisite(AssetRef::script("/b.js"))
        .prerequisite(AssetRef::script("/c.js"))
        .build();
    let loader = Arc::new(TimelineLoader {
        failing: "/b.js",
        timeline: Mutex::new(Vec::new()),
    });
    let coordinator = Coordinator::new(
        LoaderConfig::default(),
        Registry::new(vec![descriptor]).unwrap(),
        vec![],
        SharedConfig::default(),
        Arc::new(ScriptedHost::default()),
        loader.clone(),
    )
    .unwrap();

    let report = coordinator.handle(&section("S1")).await;

    assert_eq!(report.failed(), vec!["reports"]);
    assert_eq!(
        *loader.timeline.lock().await,
        vec!["start /a.js", "end /a.js", "start /b.js", "end /b.js"]
    );
}

#[tokio::test]
async fn test_missing_entry_point_reported() {
    let scenario = Scenario {
        silent: vec!["/alpha.js".to_string()],
        ..Default::default()
    };
    let f = fixture(
        vec![app("alpha", &["S1"], ViewMatch::Any)],
        vec![],
        scenario,
    );

    let report = f.coordinator.handle(&section("S1")).await;
    assert!(matches!(
        report.outcome("alpha"),
        Some(KeyOutcome::Failed {
            kind: ErrorKind::EntryPointMissing,
            ..
        })
    ));
    assert_eq!(f.coordinator.published_config("alpha").unwrap(), None);

    // failed keys are retried on the next run
    let report = f.coordinator.run_pipeline().await;
    assert_eq!(report.failed(), vec!["alpha"]);
}

/// Registers `init-alpha` on the first script load only.
struct OneShotLoader {
    loads: AtomicUsize,
}

#[async_trait]
impl AssetLoader for OneShotLoader {
    async fn load_stylesheet(&self, _asset: &AssetRef) -> AssetResult<()> {
        Ok(())
    }

    async fn load_script(
        &self,
        _asset: &AssetRef,
        registrar: &EntryPointRegistrar,
    ) -> AssetResult<()> {
        if self.loads.fetch_add(1, Ordering::SeqCst) == 0 {
            registrar.register("init-alpha", || Ok(()));
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_stale_entry_point_not_reused() {
    let loader = Arc::new(OneShotLoader {
        loads: AtomicUsize::new(0),
    });
    let coordinator = Coordinator::new(
        LoaderConfig::default(),
        Registry::new(vec![app("alpha", &["S1"], ViewMatch::Any)]).unwrap(),
        vec![],
        SharedConfig::default(),
        Arc::new(ScriptedHost::default()),
        loader.clone(),
    )
    .unwrap();

    let report = coordinator.handle(&section("S1")).await;
    assert_eq!(report.activated(), vec!["alpha"]);
    coordinator.handle(&section("S5")).await;

    // the second load registers nothing
    let report = coordinator.handle(&section("S1")).await;
    assert!(matches!(
        report.outcome("alpha"),
        Some(KeyOutcome::Failed {
            kind: ErrorKind::EntryPointMissing,
            ..
        })
    ));
    assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
    assert_eq!(coordinator.published_config("alpha").unwrap(), None);
    assert!(!coordinator.context().records().is_active("alpha"));
}

/// Stylesheets either fail at once or never finish; scripts register
/// `init-reports`.
struct StylesheetLoader {
    stall: bool,
    invocations: Arc<AtomicUsize>,
}

#[async_trait]
impl AssetLoader for StylesheetLoader {
    async fn load_stylesheet(&self, asset: &AssetRef) -> AssetResult<()> {
        if self.stall {
            std::future::pending::<()>().await;
        }
        Err(AssetError::Fetch {
            url: asset.url.clone(),
            message: "404".to_string(),
        })
    }

    async fn load_script(
        &self,
        _asset: &AssetRef,
        registrar: &EntryPointRegistrar,
    ) -> AssetResult<()> {
        let invocations = self.invocations.clone();
        registrar.register("init-reports", move || {
            invocations.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        Ok(())
    }
}

fn styled_reports() -> AppDescriptor {
    AppDescriptor::builder("reports", AssetRef::script("/reports.js"))
        .sections(SectionMatch::only(["S1"]))
        .prerequisite(AssetRef::stylesheet("/reports.css"))
        .prerequisite(AssetRef::script("/vendor/charts.js"))
        .entry_point("init-reports")
        .build()
}

#[tokio::test]
async fn test_stylesheet_failure_does_not_abort() {
    for stall in [false, true] {
        let invocations = Arc::new(AtomicUsize::new(0));
        let coordinator = Coordinator::new(
            LoaderConfig::default(),
            Registry::new(vec![styled_reports()]).unwrap(),
            vec![],
            SharedConfig::default(),
            Arc::new(ScriptedHost::default()),
            Arc::new(StylesheetLoader {
                stall,
                invocations: invocations.clone(),
            }),
        )
        .unwrap();

        let report = tokio::time::timeout(
            Duration::from_secs(2),
            coordinator.handle(&section("S1")),
        )
        .await
        .expect("activation waited on a stylesheet");

        assert_eq!(report.activated(), vec!["reports"], "stall: {stall}");
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }
}
