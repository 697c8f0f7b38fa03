//! Security audit events.
//!
//! Every authentication-relevant action produces one [`SecurityEvent`]. The
//! log fans events out to its sinks; sinks swallow their own failures so that
//! recording an event can never abort the request that caused it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
};
use tracing::{info, warn};

/// `tracing` target for the audit trail.
pub const SECURITY_TARGET: &str = "security";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    AuthSuccess,
    AuthFailure,
    Lockout,
    SessionExpired,
    SuspiciousActivity,
}

impl SecurityEventType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AuthSuccess => "auth_success",
            Self::AuthFailure => "auth_failure",
            Self::Lockout => "lockout",
            Self::SessionExpired => "session_expired",
            Self::SuspiciousActivity => "suspicious_activity",
        }
    }

    const fn is_alarming(self) -> bool {
        matches!(self, Self::Lockout | Self::SuspiciousActivity)
    }
}

impl fmt::Display for SecurityEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    #[serde(rename = "type")]
    pub event_type: SecurityEventType,
    pub source_ip: String,
    pub user_agent: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub metadata: Map<String, Value>,
}

impl SecurityEvent {
    #[must_use]
    pub fn new(
        event_type: SecurityEventType,
        source_ip: impl Into<String>,
        user_agent: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type,
            source_ip: source_ip.into(),
            user_agent,
            timestamp,
            metadata: Map::new(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

pub trait EventSink: Send + Sync {
    fn record(&self, event: &SecurityEvent);
}

/// Emits events through `tracing` under the `security` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: &SecurityEvent) {
        let metadata = Value::Object(event.metadata.clone());
        let user_agent = event.user_agent.as_deref().unwrap_or("unknown");
        let timestamp = event.timestamp.to_rfc3339();
        if event.event_type.is_alarming() {
            warn!(
                target: SECURITY_TARGET,
                event_type = event.event_type.as_str(),
                source_ip = %event.source_ip,
                user_agent,
                timestamp = %timestamp,
                metadata = %metadata,
                "security event"
            );
        } else {
            info!(
                target: SECURITY_TARGET,
                event_type = event.event_type.as_str(),
                source_ip = %event.source_ip,
                user_agent,
                timestamp = %timestamp,
                metadata = %metadata,
                "security event"
            );
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<SecurityEvent>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<SecurityEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn of_type(&self, event_type: SecurityEventType) -> Vec<SecurityEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.event_type == event_type)
            .collect()
    }
}

impl EventSink for MemorySink {
    fn record(&self, event: &SecurityEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

#[derive(Clone)]
pub struct SecurityEventLog {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl SecurityEventLog {
    /// Log backed by [`TracingSink`] only.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sinks: vec![Arc::new(TracingSink)],
        }
    }

    /// Log with no sinks at all.
    #[must_use]
    pub fn empty() -> Self {
        Self { sinks: Vec::new() }
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn log(&self, event: &SecurityEvent) {
        for sink in &self.sinks {
            sink.record(event);
        }
    }
}

impl Default for SecurityEventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SecurityEventLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityEventLog")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}
