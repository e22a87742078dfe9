//! Provider call logging (spec.md §2).
//!
//! Every LLM dispatch produces one `ProviderCall` row recording the prompt,
//! output, token usage, latency, and cost, independent of whether the call
//! succeeded. Mirrors the shape of [`crate::event_sink::EventSink`]: a
//! trait the stage writes to, with a null and a bounded in-memory
//! implementation for tests and for wiring before real persistence exists.

use std::collections::VecDeque;
use std::sync::Mutex;

use tf_domain::entities::ProviderCall;

/// Receives one `ProviderCall` row per LLM dispatch.
pub trait ProviderCallSink: Send + Sync {
    fn record(&self, call: ProviderCall);
}

/// Discards every call. Used by tests and topologies that don't care
/// about call accounting.
pub struct NullProviderCallSink;

impl ProviderCallSink for NullProviderCallSink {
    fn record(&self, _call: ProviderCall) {}
}

/// Bounded FIFO buffer, drops the oldest call on overflow. Same
/// overflow behavior as `InMemoryEventSink`: a busy pipeline shouldn't
/// block stage execution on call-log backpressure.
pub struct InMemoryProviderCallSink {
    capacity: usize,
    calls: Mutex<VecDeque<ProviderCall>>,
}

impl InMemoryProviderCallSink {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, calls: Mutex::new(VecDeque::with_capacity(capacity)) }
    }

    /// Drain and return every buffered call.
    pub fn flush(&self) -> Vec<ProviderCall> {
        let mut calls = self.calls.lock().unwrap();
        calls.drain(..).collect()
    }
}

impl ProviderCallSink for InMemoryProviderCallSink {
    fn record(&self, call: ProviderCall) {
        let mut calls = self.calls.lock().unwrap();
        if calls.len() >= self.capacity {
            calls.pop_front();
        }
        calls.push_back(call);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tf_domain::entities::ProviderOperation;
    use uuid::Uuid;

    fn call(provider: &str) -> ProviderCall {
        ProviderCall {
            id: Uuid::new_v4(),
            pipeline_run_id: None,
            session_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            service: "chat".into(),
            operation: ProviderOperation::Llm,
            provider: provider.into(),
            model_id: "test-model".into(),
            prompt_messages: None,
            output_content: Some("hi".into()),
            output_parsed: None,
            latency_ms: 10,
            tokens_in: Some(5),
            tokens_out: Some(2),
            audio_duration_ms: None,
            cost_cents: None,
            success: true,
            error: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn in_memory_sink_drops_oldest_past_capacity() {
        let sink = InMemoryProviderCallSink::new(2);
        sink.record(call("a"));
        sink.record(call("b"));
        sink.record(call("c"));
        let calls = sink.flush();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].provider, "b");
        assert_eq!(calls[1].provider, "c");
    }

    #[test]
    fn flush_empties_the_buffer() {
        let sink = InMemoryProviderCallSink::new(8);
        sink.record(call("a"));
        assert_eq!(sink.flush().len(), 1);
        assert_eq!(sink.flush().len(), 0);
    }
}
