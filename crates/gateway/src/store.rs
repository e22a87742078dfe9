//! Pulse read store — bounded in-memory rings of `PipelineRun`,
//! `PipelineEvent`, `ProviderCall`, and `DeadLetterQueue` rows, each
//! snapshotted to its own JSONL file under `persistence.state_dir`.
//!
//! Mirrors the teacher's `RunStore`: a `VecDeque` ring plus a `HashMap`
//! index from ID to logical sequence number, so lookups by ID stay O(1)
//! while the ring drops the oldest entry once its cap is hit.

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use uuid::Uuid;

use tf_domain::entities::{DeadLetterQueue, DlqStatus, PipelineEvent, PipelineRun, ProviderCall};

struct Ring<T> {
    items: VecDeque<(Uuid, T)>,
    index: HashMap<Uuid, usize>,
    base_seq: usize,
    cap: usize,
    log_path: PathBuf,
}

impl<T: Clone + serde::Serialize + serde::de::DeserializeOwned> Ring<T> {
    fn new(log_path: PathBuf, cap: usize, id_of: impl Fn(&T) -> Uuid) -> Self {
        let mut items = VecDeque::new();
        if let Ok(content) = std::fs::read_to_string(&log_path) {
            for line in content.lines().rev().take(cap) {
                if let Ok(item) = serde_json::from_str::<T>(line) {
                    let id = id_of(&item);
                    items.push_front((id, item));
                }
            }
        }
        let mut index = HashMap::with_capacity(items.len());
        for (i, (id, _)) in items.iter().enumerate() {
            index.insert(*id, i);
        }
        Self { items, index, base_seq: 0, cap, log_path }
    }

    fn push(&mut self, item: T, id: Uuid) {
        if let Ok(json) = serde_json::to_string(&item) {
            if let Ok(mut file) = std::fs::OpenOptions::new().create(true).append(true).open(&self.log_path) {
                let _ = writeln!(file, "{json}");
            }
        }
        let seq = self.base_seq + self.items.len();
        self.index.insert(id, seq);
        self.items.push_back((id, item));
        if self.items.len() > self.cap {
            if let Some((evicted_id, _)) = self.items.pop_front() {
                self.index.remove(&evicted_id);
            }
            self.base_seq += 1;
        }
    }

    fn get(&self, id: Uuid) -> Option<&T> {
        let seq = *self.index.get(&id)?;
        self.items.get(seq - self.base_seq).map(|(_, item)| item)
    }

    fn iter_newest_first(&self) -> impl Iterator<Item = &T> {
        self.items.iter().rev().map(|(_, item)| item)
    }
}

/// Bounded in-memory store for the four Pulse read-surface entities.
pub struct PulseStore {
    runs: RwLock<Ring<PipelineRun>>,
    events: RwLock<Ring<PipelineEvent>>,
    provider_calls: RwLock<Ring<ProviderCall>>,
    dlq: RwLock<Ring<DeadLetterQueue>>,
}

impl PulseStore {
    pub fn new(state_dir: &Path, max_runs: usize, max_events: usize) -> Self {
        std::fs::create_dir_all(state_dir).ok();
        Self {
            runs: RwLock::new(Ring::new(state_dir.join("pipeline_runs.jsonl"), max_runs, |r: &PipelineRun| r.id)),
            events: RwLock::new(Ring::new(state_dir.join("pipeline_events.jsonl"), max_events, |e: &PipelineEvent| e.id)),
            provider_calls: RwLock::new(Ring::new(state_dir.join("provider_calls.jsonl"), max_events, |c: &ProviderCall| c.id)),
            dlq: RwLock::new(Ring::new(state_dir.join("dlq.jsonl"), max_runs, |d: &DeadLetterQueue| d.id)),
        }
    }

    pub fn insert_run(&self, run: PipelineRun) {
        let id = run.id;
        self.runs.write().push(run, id);
    }

    pub fn insert_events(&self, events: Vec<PipelineEvent>) {
        let mut ring = self.events.write();
        for event in events {
            let id = event.id;
            ring.push(event, id);
        }
    }

    pub fn insert_provider_call(&self, call: ProviderCall) {
        let id = call.id;
        self.provider_calls.write().push(call, id);
    }

    pub fn insert_dlq(&self, row: DeadLetterQueue) {
        let id = row.id;
        self.dlq.write().push(row, id);
    }

    pub fn get_run(&self, run_id: Uuid) -> Option<PipelineRun> {
        self.runs.read().get(run_id).cloned()
    }

    pub fn events_for_run(&self, run_id: Uuid) -> Vec<PipelineEvent> {
        self.events
            .read()
            .iter_newest_first()
            .filter(|e| e.pipeline_run_id == run_id)
            .cloned()
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn list_runs(
        &self,
        hours: u32,
        service: Option<&str>,
        success: Option<bool>,
        org_id: Option<Uuid>,
        session_id: Option<Uuid>,
        limit: usize,
        offset: usize,
    ) -> (Vec<PipelineRun>, u64) {
        let cutoff = chrono::Utc::now() - chrono::Duration::hours(hours as i64);
        let runs = self.runs.read();
        let filtered: Vec<&PipelineRun> = runs
            .iter_newest_first()
            .filter(|r| r.started_at >= cutoff)
            .filter(|r| service.map_or(true, |s| r.service == s))
            .filter(|r| success.map_or(true, |s| r.success == s))
            .filter(|r| org_id.map_or(true, |o| r.org_id == Some(o)))
            .filter(|r| session_id.map_or(true, |s| r.session_id == s))
            .collect();
        let total = filtered.len() as u64;
        let page = filtered.into_iter().skip(offset as usize).take(limit as usize).cloned().collect();
        (page, total)
    }

    pub fn list_provider_calls(
        &self,
        hours: u32,
        provider: Option<&str>,
        session_id: Option<Uuid>,
        limit: usize,
        offset: usize,
    ) -> (Vec<ProviderCall>, u64) {
        let cutoff = chrono::Utc::now() - chrono::Duration::hours(hours as i64);
        let calls = self.provider_calls.read();
        let filtered: Vec<&ProviderCall> = calls
            .iter_newest_first()
            .filter(|c| c.created_at >= cutoff)
            .filter(|c| provider.map_or(true, |p| c.provider == p))
            .filter(|c| session_id.map_or(true, |s| c.session_id == s))
            .collect();
        let total = filtered.len() as u64;
        let page = filtered.into_iter().skip(offset as usize).take(limit as usize).cloned().collect();
        (page, total)
    }

    pub fn list_dlq(&self, status: Option<DlqStatus>, limit: usize, offset: usize) -> (Vec<DeadLetterQueue>, u64) {
        let dlq = self.dlq.read();
        let filtered: Vec<&DeadLetterQueue> =
            dlq.iter_newest_first().filter(|d| status.map_or(true, |s| d.status == s)).collect();
        let total = filtered.len() as u64;
        let page = filtered.into_iter().skip(offset as usize).take(limit as usize).cloned().collect();
        (page, total)
    }

    /// Aggregate stats for `/pulse/stats` (spec.md §6.2).
    pub fn stats(&self, hours: u32, org_id: Option<Uuid>) -> (f64, u64, u64, u64, f64, u64) {
        let cutoff = chrono::Utc::now() - chrono::Duration::hours(hours as i64);
        let runs = self.runs.read();
        let window: Vec<&PipelineRun> = runs
            .iter_newest_first()
            .filter(|r| r.started_at >= cutoff)
            .filter(|r| org_id.map_or(true, |o| r.org_id == Some(o)))
            .collect();

        let total = window.len();
        let success_count = window.iter().filter(|r| r.success).count();
        let success_rate = if total == 0 { 1.0 } else { success_count as f64 / total as f64 };

        let mut latencies: Vec<u64> = window.iter().filter_map(|r| r.total_latency_ms).collect();
        latencies.sort_unstable();
        let p50 = percentile(&latencies, 0.50);
        let p95 = percentile(&latencies, 0.95);

        let total_tokens: u64 = window
            .iter()
            .map(|r| r.tokens_in.unwrap_or(0) as u64 + r.tokens_out.unwrap_or(0) as u64)
            .sum();
        let total_cost_cents: f64 = window.iter().filter_map(|r| r.cost_cents).sum();

        let dlq_count = self.dlq.read().iter_newest_first().filter(|d| d.status == DlqStatus::Pending).count() as u64;

        (success_rate, p50, p95, total_tokens, total_cost_cents, dlq_count)
    }

    /// Hourly latency buckets for `/pulse/latency-series`.
    pub fn latency_series(&self, hours: u32, service: Option<&str>) -> Vec<(chrono::DateTime<chrono::Utc>, u64, u64, u64)> {
        let cutoff = chrono::Utc::now() - chrono::Duration::hours(hours as i64);
        let runs = self.runs.read();
        let mut by_hour: HashMap<chrono::DateTime<chrono::Utc>, Vec<u64>> = HashMap::new();
        for run in runs.iter_newest_first() {
            if run.started_at < cutoff {
                continue;
            }
            if service.is_some_and(|s| run.service != s) {
                continue;
            }
            let Some(latency) = run.total_latency_ms else { continue };
            let hour = run.started_at.date_naive().and_hms_opt(run.started_at.time().hour(), 0, 0).unwrap().and_utc();
            by_hour.entry(hour).or_default().push(latency);
        }
        let mut buckets: Vec<_> = by_hour
            .into_iter()
            .map(|(hour, mut latencies)| {
                latencies.sort_unstable();
                (hour, percentile(&latencies, 0.50), percentile(&latencies, 0.95), latencies.len() as u64)
            })
            .collect();
        buckets.sort_by_key(|b| b.0);
        buckets
    }
}

use chrono::Timelike;

fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}
