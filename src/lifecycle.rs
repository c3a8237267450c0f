//! # Lifecycle Reset

use tracing::info;

use crate::context::ActivationRecords;
use crate::navigation::SectionChange;

/// Clears activation memory when the section changes so the pipeline can run
/// again for the new context. The persistent application keeps its flag.
#[derive(Debug, Clone, Default)]
pub struct LifecycleReset {
    persistent_key: Option<String>,
}

impl LifecycleReset {
    pub fn new(persistent_key: Option<String>) -> Self {
        Self { persistent_key }
    }

    pub fn persistent_key(&self) -> Option<&str> {
        self.persistent_key.as_deref()
    }

    /// Returns the keys whose flag was cleared.
    pub fn on_section_changed(
        &self,
        change: &SectionChange,
        records: &ActivationRecords,
    ) -> Vec<String> {
        let cleared = records.reset_except(self.persistent_key());
        info!(
            previous = ?change.previous,
            current = %change.current,
            cleared = ?cleared,
            "activation records reset"
        );
        cleared
    }
}
