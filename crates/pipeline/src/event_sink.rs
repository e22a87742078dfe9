//! Structured pipeline event logging (spec.md §2 "Event sink").
//!
//! Stages collect events on their `StageContext`; the executor hands
//! each finished stage's events to a sink once the stage completes. The
//! in-memory sink never blocks stage execution — it pushes onto a
//! bounded queue guarded by a lock and is drained by `flush`, mirroring
//! the append-then-drain shape of the run store used elsewhere in this
//! codebase.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tf_domain::entities::PipelineEvent;
use tf_domain::stage::StageEvent;
use uuid::Uuid;

pub trait EventSink: Send + Sync {
    fn record(&self, pipeline_run_id: Uuid, stage: String, event: StageEvent);

    /// Drain and return everything recorded so far.
    fn flush(&self) -> Vec<PipelineEvent>;
}

/// Discards everything. Used in tests and anywhere a caller doesn't need
/// the event stream (e.g. a dry-run DAG validation pass).
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn record(&self, _pipeline_run_id: Uuid, _stage: String, _event: StageEvent) {}
    fn flush(&self) -> Vec<PipelineEvent> {
        Vec::new()
    }
}

/// Bounded in-memory queue, snapshotted to JSONL by the gateway
/// (SPEC_FULL.md §D). Oldest events are dropped once `capacity` is
/// exceeded rather than blocking the pipeline.
pub struct InMemoryEventSink {
    queue: Mutex<VecDeque<PipelineEvent>>,
    capacity: usize,
}

impl InMemoryEventSink {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        })
    }
}

impl EventSink for InMemoryEventSink {
    fn record(&self, pipeline_run_id: Uuid, stage: String, event: StageEvent) {
        let mut data = event.data;
        if let Some(obj) = data.as_object_mut() {
            obj.entry("stage").or_insert_with(|| stage.clone().into());
        }
        let entry = PipelineEvent {
            id: Uuid::new_v4(),
            pipeline_run_id,
            kind: event.kind,
            data,
            timestamp: event.timestamp,
            session_id: None,
            request_id: None,
        };

        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            queue.pop_front();
        }
        queue.push_back(entry);
    }

    fn flush(&self) -> Vec<PipelineEvent> {
        self.queue.lock().drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_event(kind: &str) -> StageEvent {
        StageEvent {
            kind: kind.to_string(),
            data: json!({}),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn records_and_flushes_in_order() {
        let sink = InMemoryEventSink::new(10);
        let run_id = Uuid::new_v4();
        sink.record(run_id, "llm".into(), sample_event("llm.started"));
        sink.record(run_id, "llm".into(), sample_event("llm.first_token"));
        let drained = sink.flush();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].kind, "llm.started");
        assert_eq!(drained[1].kind, "llm.first_token");
    }

    #[test]
    fn flush_drains_queue() {
        let sink = InMemoryEventSink::new(10);
        sink.record(Uuid::new_v4(), "a".into(), sample_event("x"));
        assert_eq!(sink.flush().len(), 1);
        assert_eq!(sink.flush().len(), 0);
    }

    #[test]
    fn drops_oldest_once_capacity_exceeded() {
        let sink = InMemoryEventSink::new(2);
        let run_id = Uuid::new_v4();
        sink.record(run_id, "a".into(), sample_event("one"));
        sink.record(run_id, "a".into(), sample_event("two"));
        sink.record(run_id, "a".into(), sample_event("three"));
        let drained = sink.flush();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].kind, "two");
        assert_eq!(drained[1].kind, "three");
    }

    #[test]
    fn null_sink_discards_everything() {
        let sink = NullEventSink;
        sink.record(Uuid::new_v4(), "a".into(), sample_event("x"));
        assert!(sink.flush().is_empty());
    }
}
