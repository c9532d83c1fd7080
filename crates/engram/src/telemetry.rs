//! Best-effort operation telemetry.
//!
//! [`AgentMemory`](crate::AgentMemory) reports one [`OpEvent`] per
//! operation to a [`TelemetrySink`]. Sinks must not block and cannot fail;
//! a sink that drops events never changes the outcome of an operation.

use std::sync::Mutex;
use std::time::Duration;

use tracing::debug;

/// One completed façade operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OpEvent {
    /// Operation name (`learn`, `recall`, `update`, ...).
    pub op: &'static str,
    /// Wall time of the operation.
    pub duration: Duration,
    /// Whether the operation returned `Ok`.
    pub success: bool,
    /// Merges of concurrent histories performed by the operation.
    pub conflicts: usize,
    /// The embedding service was unavailable and the operation degraded.
    pub degraded: bool,
}

/// Receiver for [`OpEvent`]s.
pub trait TelemetrySink: Send + Sync {
    /// Record one event. Must return quickly.
    fn record(&self, event: OpEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn record(&self, _event: OpEvent) {}
}

/// Emits every event as a `tracing` debug event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn record(&self, event: OpEvent) {
        debug!(
            target: "engram::telemetry",
            op = event.op,
            duration_us = event.duration.as_micros() as u64,
            success = event.success,
            conflicts = event.conflicts,
            degraded = event.degraded,
            "operation finished"
        );
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<OpEvent>>,
}

impl RecordingTelemetry {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded events, oldest first.
    pub fn events(&self) -> Vec<OpEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Recorded events for `op`.
    pub fn events_for(&self, op: &str) -> Vec<OpEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.op == op)
            .collect()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn record(&self, event: OpEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(op: &'static str) -> OpEvent {
        OpEvent {
            op,
            duration: Duration::from_millis(1),
            success: true,
            conflicts: 0,
            degraded: false,
        }
    }

    #[test]
    fn recorder_keeps_order() {
        let sink = RecordingTelemetry::new();
        sink.record(event("learn"));
        sink.record(event("recall"));
        sink.record(event("learn"));

        let ops: Vec<_> = sink.events().iter().map(|e| e.op).collect();
        assert_eq!(ops, vec!["learn", "recall", "learn"]);
        assert_eq!(sink.events_for("learn").len(), 2);
    }

    #[test]
    fn noop_and_tracing_accept_events() {
        NoopTelemetry.record(event("learn"));
        TracingTelemetry.record(event("learn"));
    }
}
