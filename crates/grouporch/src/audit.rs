//! Structured audit trail for group lifecycle and southbound activity.
//!
//! Every group transition, southbound batch, and provider registration
//! produces an [`AuditRecord`]. Records go to the `audit` tracing target
//! with the full record attached as JSON, so they can be filtered and
//! shipped separately from diagnostic logs.
//!
//! Outcome picks the level: success at info, in-progress at debug, failure
//! at warn.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of activity a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditCategory {
    /// Group accepted or confirmed on the device
    ResourceCreate,
    /// Bucket mutation requested or confirmed
    ResourceModify,
    /// Group removal requested, confirmed, or purged
    ResourceDelete,
    /// Device report processed
    Reconciliation,
    /// Operations handed to a provider or driver
    SouthboundDispatch,
    ProviderRegistration,
    /// Configuration loaded or overridden
    ConfigurationChange,
    SystemLifecycle,
    /// Southbound failure reported
    ErrorCondition,
}

impl AuditCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditCategory::ResourceCreate => "RESOURCE_CREATE",
            AuditCategory::ResourceModify => "RESOURCE_MODIFY",
            AuditCategory::ResourceDelete => "RESOURCE_DELETE",
            AuditCategory::Reconciliation => "RECONCILIATION",
            AuditCategory::SouthboundDispatch => "SOUTHBOUND_DISPATCH",
            AuditCategory::ProviderRegistration => "PROVIDER_REGISTRATION",
            AuditCategory::ConfigurationChange => "CONFIGURATION_CHANGE",
            AuditCategory::SystemLifecycle => "SYSTEM_LIFECYCLE",
            AuditCategory::ErrorCondition => "ERROR_CONDITION",
        }
    }
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    InProgress,
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AuditOutcome::Success => "success",
            AuditOutcome::Failure => "failure",
            AuditOutcome::InProgress => "in_progress",
        })
    }
}

/// One audit trail entry, built with the `with_*` methods and then passed
/// to [`audit_log!`](crate::audit_log).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub category: AuditCategory,
    /// Component that produced the record, e.g. `GroupManager`.
    pub source: String,
    pub action: String,
    pub outcome: AuditOutcome,
    /// Device-scoped object, e.g. `of:0000000000000001/0x1`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Ties a southbound batch to the records it caused.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl AuditRecord {
    /// New record stamped now, with outcome `InProgress`.
    pub fn new(category: AuditCategory, source: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            category,
            source: source.into(),
            action: action.into(),
            outcome: AuditOutcome::InProgress,
            object_id: None,
            object_type: None,
            details: None,
            error: None,
            correlation_id: None,
        }
    }

    pub fn with_outcome(self, outcome: AuditOutcome) -> Self {
        Self { outcome, ..self }
    }

    pub fn with_object_id(self, id: impl Into<String>) -> Self {
        Self {
            object_id: Some(id.into()),
            ..self
        }
    }

    pub fn with_object_type(self, object_type: impl Into<String>) -> Self {
        Self {
            object_type: Some(object_type.into()),
            ..self
        }
    }

    pub fn with_details(self, details: serde_json::Value) -> Self {
        Self {
            details: Some(details),
            ..self
        }
    }

    /// Records the error and marks the outcome `Failure`.
    pub fn with_error(self, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            outcome: AuditOutcome::Failure,
            ..self
        }
    }

    pub fn with_correlation_id(self, id: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(id.into()),
            ..self
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            serde_json::json!({ "error": "serialization_failed", "message": e.to_string() }).to_string()
        })
    }

    /// Writes the record to the `audit` target.
    pub fn emit(&self) {
        let object = self.object_id.as_deref().unwrap_or("-");
        let json = self.to_json();
        match self.outcome {
            AuditOutcome::Success => tracing::info!(
                target: "audit",
                category = self.category.as_str(),
                source = %self.source,
                object,
                audit_json = %json,
                "AUDIT {} {} {}",
                self.category,
                self.action,
                self.outcome
            ),
            AuditOutcome::InProgress => tracing::debug!(
                target: "audit",
                category = self.category.as_str(),
                source = %self.source,
                object,
                audit_json = %json,
                "AUDIT {} {} {}",
                self.category,
                self.action,
                self.outcome
            ),
            AuditOutcome::Failure => tracing::warn!(
                target: "audit",
                category = self.category.as_str(),
                source = %self.source,
                object,
                error = self.error.as_deref().unwrap_or(""),
                audit_json = %json,
                "AUDIT {} {} {}",
                self.category,
                self.action,
                self.outcome
            ),
        }
    }
}

/// Emits an [`AuditRecord`] on the `audit` target.
///
/// ```ignore
/// audit_log!(
///     AuditRecord::new(AuditCategory::ResourceCreate, "GroupManager", "add_group")
///         .with_outcome(AuditOutcome::Success)
///         .with_object_id("of:1/0x1")
/// );
/// ```
#[macro_export]
macro_rules! audit_log {
    ($record:expr) => {
        $crate::audit::AuditRecord::emit(&$record)
    };
}

/// Output format of the process-wide subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStyle {
    /// One JSON object per line, for collectors.
    Json,
    /// Multi-line human-readable output.
    Pretty,
}

/// Installs the global subscriber. `RUST_LOG` wins over `log_level`.
///
/// `log` records are bridged into the subscriber as well.
pub fn init_logging(log_level: &str, style: LogStyle) -> Result<(), tracing_subscriber::util::TryInitError> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let registry = tracing_subscriber::registry().with(filter);

    match style {
        LogStyle::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init(),
        LogStyle::Pretty => registry
            .with(fmt::layer().pretty().with_target(true))
            .try_init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_builder_sets_fields() {
        let record = AuditRecord::new(AuditCategory::ResourceCreate, "GroupManager", "add_group")
            .with_outcome(AuditOutcome::Success)
            .with_object_id("of:1/0x1")
            .with_object_type("group");

        assert_eq!(record.category, AuditCategory::ResourceCreate);
        assert_eq!(record.source, "GroupManager");
        assert_eq!(record.outcome, AuditOutcome::Success);
        assert_eq!(record.object_id.as_deref(), Some("of:1/0x1"));
        assert_eq!(record.object_type.as_deref(), Some("group"));
    }

    #[test]
    fn test_with_error_marks_failure() {
        let record = AuditRecord::new(AuditCategory::ErrorCondition, "GroupManager", "group_operation_failed")
            .with_outcome(AuditOutcome::Success)
            .with_error("ADD SELECT 0x3 rejected by device");

        assert_eq!(record.outcome, AuditOutcome::Failure);
        assert_eq!(record.error.as_deref(), Some("ADD SELECT 0x3 rejected by device"));
    }

    #[test]
    fn test_json_omits_unset_fields() {
        let record = AuditRecord::new(AuditCategory::SouthboundDispatch, "GroupManager", "perform_group_operation")
            .with_outcome(AuditOutcome::InProgress)
            .with_correlation_id("batch-1")
            .with_details(serde_json::json!({ "adds": 2, "deletes": 1 }));

        let json: serde_json::Value = serde_json::from_str(&record.to_json()).unwrap();
        assert_eq!(json["category"], "SOUTHBOUND_DISPATCH");
        assert_eq!(json["outcome"], "in_progress");
        assert_eq!(json["correlation_id"], "batch-1");
        assert_eq!(json["details"]["adds"], 2);
        assert!(json.get("object_id").is_none());
    }

    #[test]
    fn test_emit_without_subscriber() {
        audit_log!(AuditRecord::new(AuditCategory::SystemLifecycle, "test", "noop"));
        assert_eq!(AuditCategory::ProviderRegistration.to_string(), "PROVIDER_REGISTRATION");
    }
}
