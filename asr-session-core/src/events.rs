//! Host-facing emission sinks.
//!
//! The orchestrator depends on the [`EventSink`] trait rather than a
//! concrete transport, decoupling it from however the host extension
//! runtime actually delivers `asr_result` / `asr_error` / `asr_finalize_end`
//! / `asr_metrics` to its message bus (an explicit non-goal of this crate).

use serde::{Deserialize, Serialize};
use serde_json::Map;

/// A single ASR result emission (`spec.md` §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AsrResultEvent {
    pub text: String,
    #[serde(rename = "final")]
    pub is_final: bool,
    pub start_ms: i64,
    pub duration_ms: i64,
    pub language: String,
    #[serde(default)]
    pub words: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, serde_json::Value>,
}

/// Vendor-supplied context attached to an `asr_error` emission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VendorErrorInfo {
    pub vendor: String,
    pub code: String,
    pub message: String,
}

/// An `asr_finalize_end` emission, gated on at least one final utterance
/// having been part of the drained finalize batch (`spec.md` §4.7, §9).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AsrFinalizeEndEvent {
    pub finalize_id: String,
    #[serde(default)]
    pub metadata: Map<String, serde_json::Value>,
}

/// A module-level error emission (`asr_error`), carrying the session's own
/// error code plus optional vendor context. Kept as a concrete type rather
/// than generic over [`crate::error::SessionError`] so [`EventSink`] stays
/// object-safe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AsrErrorEvent {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_info: Option<VendorErrorInfo>,
}

/// Sink for all host-visible emissions from a session.
///
/// Implementations decide how these cross into the host extension runtime
/// (e.g. pushing onto a message bus); the session core only knows this
/// trait.
pub trait EventSink: Send + Sync {
    /// Emits a partial or final ASR result.
    fn emit_result(&self, event: AsrResultEvent);

    /// Emits a module error, with optional vendor context.
    fn emit_error(&self, event: AsrErrorEvent);

    /// Emits the end-of-finalize signal.
    fn emit_finalize_end(&self, event: AsrFinalizeEndEvent);

    /// Emits a metrics snapshot (e.g. two-pass delay).
    fn emit_metrics(&self, metrics: Map<String, serde_json::Value>);
}

/// No-op sink, useful for tests or headless embeddings that don't care
/// about emissions.
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit_result(&self, _event: AsrResultEvent) {}
    fn emit_error(&self, _event: AsrErrorEvent) {}
    fn emit_finalize_end(&self, _event: AsrFinalizeEndEvent) {}
    fn emit_metrics(&self, _metrics: Map<String, serde_json::Value>) {}
}

/// Logging sink that traces every emission at debug level; useful for
/// development and as a building block for richer sinks.
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit_result(&self, event: AsrResultEvent) {
        tracing::debug!(?event, "asr_result");
    }

    fn emit_error(&self, event: AsrErrorEvent) {
        tracing::warn!(?event, "asr_error");
    }

    fn emit_finalize_end(&self, event: AsrFinalizeEndEvent) {
        tracing::debug!(?event, "asr_finalize_end");
    }

    fn emit_metrics(&self, metrics: Map<String, serde_json::Value>) {
        tracing::debug!(?metrics, "asr_metrics");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        results: Mutex<Vec<AsrResultEvent>>,
        finalize_ends: Mutex<Vec<AsrFinalizeEndEvent>>,
    }

    impl EventSink for RecordingSink {
        fn emit_result(&self, event: AsrResultEvent) {
            self.results.lock().push(event);
        }
        fn emit_error(&self, _event: AsrErrorEvent) {}
        fn emit_finalize_end(&self, event: AsrFinalizeEndEvent) {
            self.finalize_ends.lock().push(event);
        }
        fn emit_metrics(&self, _metrics: Map<String, serde_json::Value>) {}
    }

    #[test]
    fn recording_sink_collects_results() {
        let sink = RecordingSink::default();
        sink.emit_result(AsrResultEvent {
            text: "hello".into(),
            is_final: true,
            start_ms: 0,
            duration_ms: 1000,
            language: "en-US".into(),
            words: vec![],
            metadata: Map::new(),
        });
        assert_eq!(sink.results.lock().len(), 1);
    }
}
