//! Records as they arrive from the CRM.

use super::ItemValue;
use serde::{Deserialize, Serialize};

/// One CRM record before it becomes an [`super::Item`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingRecord {
    /// External ID in the CRM.
    pub distant_id: String,
    /// Raw properties.
    #[serde(default)]
    pub value: ItemValue,
    /// External ID of the record this one was merged into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_in_distant_id: Option<String>,
}

impl IncomingRecord {
    /// Creates a live record.
    #[must_use]
    pub fn new(distant_id: impl Into<String>, value: ItemValue) -> Self {
        Self {
            distant_id: distant_id.into(),
            value,
            merged_in_distant_id: None,
        }
    }

    /// Marks the record as merged into another one.
    #[must_use]
    pub fn merged_into(mut self, distant_id: impl Into<String>) -> Self {
        self.merged_in_distant_id = Some(distant_id.into());
        self
    }
}
