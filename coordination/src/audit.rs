//! Structured audit trail for admission decisions and calls.
//!
//! Purely observational: nothing in the core reads audit records back, and a
//! logger that fails to persist a record must not affect the run.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::admission::LimiterKind;
use crate::aggregate::RunStatus;
use crate::classify::ErrorCategory;
use crate::orchestrator::state_machine::RunState;

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    RunStarted {
        models: Vec<String>,
        max_concurrent: usize,
    },
    StateTransition {
        from: RunState,
        to: RunState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    AdmissionGranted {
        model: String,
        limiter: LimiterKind,
        waited_ms: u64,
    },
    AdmissionDenied {
        model: String,
        limiter: LimiterKind,
        reason: String,
    },
    CallStarted {
        model: String,
        index: usize,
        prompt_chars: usize,
    },
    CallFinished {
        model: String,
        index: usize,
        duration_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        category: Option<ErrorCategory>,
    },
    OutputSaved {
        model: String,
        path: String,
    },
    RunFinished {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<RunStatus>,
        exit_code: i32,
    },
}

/// An event stamped with time and run identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub run_id: Uuid,
    #[serde(flatten)]
    pub event: AuditEvent,
}

impl AuditRecord {
    pub fn new(run_id: Uuid, event: AuditEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            run_id,
            event,
        }
    }
}

/// Append-only sink for audit records.
pub trait AuditLogger: Send + Sync {
    fn record(&self, record: AuditRecord);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditLogger;

impl AuditLogger for NoopAuditLogger {
    fn record(&self, _record: AuditRecord) {}
}

/// Keeps records in memory, mainly for inspection in tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryAuditLogger {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.records().into_iter().map(|r| r.event).collect()
    }
}

impl AuditLogger for MemoryAuditLogger {
    fn record(&self, record: AuditRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_flattens_event_tag() {
        let record = AuditRecord::new(
            Uuid::nil(),
            AuditEvent::AdmissionGranted {
                model: "gpt-4o".into(),
                limiter: LimiterKind::RateLimit,
                waited_ms: 12,
            },
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["event"], "admission_granted");
        assert_eq!(json["limiter"], "rate_limit");
        assert_eq!(json["waited_ms"], 12);
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn memory_logger_keeps_order() {
        let logger = MemoryAuditLogger::new();
        for index in 0..3 {
            logger.record(AuditRecord::new(
                Uuid::nil(),
                AuditEvent::CallStarted {
                    model: "m".into(),
                    index,
                    prompt_chars: 1,
                },
            ));
        }
        let indices: Vec<usize> = logger
            .events()
            .into_iter()
            .filter_map(|e| match e {
                AuditEvent::CallStarted { index, .. } => Some(index),
                _ => None,
            })
            .collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }
}
