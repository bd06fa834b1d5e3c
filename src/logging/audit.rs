//! Access audit trail
//!
//! Records who was shown which organizations and who acted on them. Each
//! event is one JSON line on the `audit` tracing target so a log router can
//! send it to the secure log sink. National ids only ever appear here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// Tracing target for audit events
pub const AUDIT_TARGET: &str = "audit";

/// Audit event types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// Entitlement grants were resolved for a user
    GrantsResolved,
    /// A signing job was submitted for an organization
    SigningStarted,
    /// A completed signing was recorded
    SigningCompleted,
    /// A signed document was downloaded
    DocumentRead,
    /// A new agreement template replaced the current one
    TemplatePublished,
}

/// One audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    /// National id of the acting user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Altinn service code the grants were resolved for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_code: Option<String>,
    /// Organizations involved
    #[serde(default)]
    pub orgnrs: Vec<String>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            subject: None,
            service_code: None,
            orgnrs: Vec::new(),
        }
    }

    pub fn with_subject(mut self, subject: &str) -> Self {
        self.subject = Some(subject.to_string());
        self
    }

    pub fn with_service_code(mut self, service_code: &str) -> Self {
        self.service_code = Some(service_code.to_string());
        self
    }

    pub fn with_orgnrs<I, S>(mut self, orgnrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.orgnrs = orgnrs.into_iter().map(Into::into).collect();
        self
    }

    /// Convert to JSONL line
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Emit on the audit target
    pub fn emit(&self) {
        match self.to_jsonl() {
            Ok(line) => info!(target: AUDIT_TARGET, event = %line, "audit"),
            Err(e) => error!("Failed to serialize audit event: {}", e),
        }
    }
}
