//! # Navigation State Tracker
//!
//! Holds the latest known section id and sub-view id. The two ids arrive from
//! independent host events with no ordering guarantee between them, so every
//! consumer re-reads [`NavigationTracker::current`] instead of trusting an
//! event payload.
//!
//! Updates are synchronous and idempotent. A section update that changes the
//! value yields a [`SectionChange`], which the coordinator feeds to
//! [`crate::lifecycle::LifecycleReset`].

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationState {
    pub last_section: Option<String>,
    pub last_view: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionChange {
    pub previous: Option<String>,
    pub current: String,
}

pub struct NavigationTracker {
    state: watch::Sender<NavigationState>,
}

impl Default for NavigationTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl NavigationTracker {
    pub fn new() -> Self {
        let (state, _) = watch::channel(NavigationState::default());
        Self { state }
    }

    /// Records a rendered section. Returns the change when the section
    /// differs from the last known one; blank ids are ignored.
    pub fn record_section(&self, id: &str) -> Option<SectionChange> {
        let id = normalize(id)?;
        let mut change = None;
        self.state.send_if_modified(|state| {
            if state.last_section.as_deref() == Some(id) {
                return false;
            }
            change = Some(SectionChange {
                previous: state.last_section.replace(id.to_string()),
                current: id.to_string(),
            });
            true
        });
        if let Some(change) = &change {
            debug!(previous = ?change.previous, current = %change.current, "section changed");
        }
        change
    }

    /// Records a rendered sub-view. Returns true if the value changed.
    pub fn record_view(&self, id: &str) -> bool {
        let Some(id) = normalize(id) else {
            return false;
        };
        self.state.send_if_modified(|state| {
            if state.last_view.as_deref() == Some(id) {
                return false;
            }
            state.last_view = Some(id.to_string());
            true
        })
    }

    pub fn current(&self) -> NavigationState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<NavigationState> {
        self.state.subscribe()
    }
}

fn normalize(id: &str) -> Option<&str> {
    let id = id.trim();
    (!id.is_empty()).then_some(id)
}
