//! Audit trail.
//!
//! Every repository operation emits exactly one [`AuditEvent`] through the
//! [`AuditLog`]. Recording is best effort: a failing sink is logged and
//! counted, the operation that triggered it still succeeds.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use keystone_core::{AuditError, AuditStatus, Clock, Timestamp};
use prometheus::IntCounter;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{error, info, warn};

/// One audited operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: Timestamp,
    pub actor_id: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub status: AuditStatus,
    pub details: JsonValue,
}

/// Destination for audit events.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent) -> Result<(), AuditError>;
}

// ============================================================================
// SINKS
// ============================================================================

/// Emits each event as a structured `tracing` event on `keystone::audit`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let resource_id = event.resource_id.as_deref().unwrap_or("");
        match event.status {
            AuditStatus::Success => info!(
                target: "keystone::audit",
                actor_id = %event.actor_id,
                action = %event.action,
                resource_type = %event.resource_type,
                resource_id,
                status = %event.status,
                details = %event.details,
                "audit"
            ),
            AuditStatus::Failure => warn!(
                target: "keystone::audit",
                actor_id = %event.actor_id,
                action = %event.action,
                resource_type = %event.resource_type,
                resource_id,
                status = %event.status,
                details = %event.details,
                "audit"
            ),
        }
        Ok(())
    }
}

/// Bounded in-memory buffer. The oldest events are evicted first.
#[derive(Debug)]
pub struct MemoryAuditSink {
    capacity: usize,
    events: Mutex<VecDeque<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: Mutex::new(VecDeque::new()),
        }
    }

    /// All buffered events, oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Buffered events whose status is `status`.
    pub fn with_status(&self, status: AuditStatus) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.status == status)
            .collect()
    }

    /// Buffered events recorded for `actor_id`.
    pub fn for_actor(&self, actor_id: &str) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.actor_id == actor_id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|events| events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let mut events = self.events.lock().map_err(|_| AuditError::LockPoisoned)?;
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event.clone());
        Ok(())
    }
}

/// Appends events as JSON lines to any writer (a file, a pipe, a buffer).
#[derive(Debug)]
pub struct WriterAuditSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> WriterAuditSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Recover the writer.
    pub fn into_inner(self) -> Result<W, AuditError> {
        self.writer.into_inner().map_err(|_| AuditError::LockPoisoned)
    }
}

impl<W: Write + Send> AuditSink for WriterAuditSink<W> {
    fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(event).map_err(|e| AuditError::Serialization {
            reason: e.to_string(),
        })?;
        line.push(b'\n');
        let mut writer = self.writer.lock().map_err(|_| AuditError::LockPoisoned)?;
        writer
            .write_all(&line)
            .and_then(|_| writer.flush())
            .map_err(|e| AuditError::SinkUnavailable {
                reason: e.to_string(),
            })
    }
}

// ============================================================================
// AUDIT LOG
// ============================================================================

/// Fans events out to the configured sinks.
pub struct AuditLog {
    sinks: Vec<Arc<dyn AuditSink>>,
    clock: Arc<dyn Clock>,
    dropped: AtomicU64,
    dropped_counter: Option<IntCounter>,
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("sinks", &self.sinks.len())
            .field("dropped", &self.dropped())
            .finish()
    }
}

impl AuditLog {
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>, clock: Arc<dyn Clock>) -> Self {
        Self {
            sinks,
            clock,
            dropped: AtomicU64::new(0),
            dropped_counter: None,
        }
    }

    /// Also count dropped events in a Prometheus counter.
    pub fn with_dropped_counter(mut self, counter: IntCounter) -> Self {
        self.dropped_counter = Some(counter);
        self
    }

    /// Record one event on every sink. Never fails.
    pub fn log_audit_event(
        &self,
        action: &str,
        resource_type: &str,
        actor_id: &str,
        resource_id: Option<&str>,
        status: AuditStatus,
        details: JsonValue,
    ) {
        let event = AuditEvent {
            timestamp: self.clock.now(),
            actor_id: actor_id.to_string(),
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.map(str::to_string),
            status,
            details,
        };
        self.record(&event);
    }

    /// Record a prepared event on every sink. Never fails.
    pub fn record(&self, event: &AuditEvent) {
        for sink in &self.sinks {
            if let Err(e) = sink.record(event) {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                if let Some(counter) = &self.dropped_counter {
                    counter.inc();
                }
                error!(
                    error = %e,
                    action = %event.action,
                    resource_type = %event.resource_type,
                    actor_id = %event.actor_id,
                    "Failed to record audit event"
                );
            }
        }
    }

    /// Number of sink writes that failed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
