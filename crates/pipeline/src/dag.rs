//! Stage model and DAG executor (spec.md §4.1, §4.2).
//!
//! Pipelines are built by explicit constructors that wire up [`StageSpec`]
//! tuples — no decorator-based registration, no import-time side effects
//! (spec.md §9). The executor schedules stages via Kahn-style topological
//! ordering, running independent stages concurrently.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use tf_domain::stage::{
    Channel, ContextSnapshot, StageContext, StageInputs, StageKind, StageOutput, StagePorts,
    StageStatus,
};

use crate::cancel::CancelToken;
use crate::event_sink::EventSink;

/// One unit of work within a pipeline. Concrete stages implement this;
/// `StageSpec` carries the declared metadata (name, kind, dependencies)
/// alongside the runner.
#[async_trait::async_trait]
pub trait Stage: Send + Sync {
    async fn execute(&self, ctx: StageContext) -> StageOutput;
}

/// Wires a named stage into the graph with its declared dependencies.
/// `retry_budget` caps `StageStatus::Retry` re-invocations (default 0,
/// per spec.md §9 Open Questions: "implementers should make the cap
/// configurable per stage spec").
pub struct StageSpec {
    pub name: String,
    pub kind: StageKind,
    pub dependencies: Vec<String>,
    pub conditional: bool,
    pub retry_budget: u32,
    pub runner: Arc<dyn Stage>,
}

impl StageSpec {
    pub fn new(name: impl Into<String>, kind: StageKind, runner: Arc<dyn Stage>) -> Self {
        Self {
            name: name.into(),
            kind,
            dependencies: Vec::new(),
            conditional: false,
            retry_budget: 0,
            runner,
        }
    }

    pub fn depends_on(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn conditional(mut self, conditional: bool) -> Self {
        self.conditional = conditional;
        self
    }

    pub fn retries(mut self, budget: u32) -> Self {
        self.retry_budget = budget;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DagError {
    #[error("duplicate stage name: {0}")]
    DuplicateStageName(String),
    #[error("stage '{stage}' declares undeclared dependency '{dep}'")]
    UndeclaredDependency { stage: String, dep: String },
    #[error("cycle detected in stage graph")]
    CycleDetected,
}

/// Outcome of a full DAG run (spec.md §9: "keep as sum types" rather than
/// exception-driven control flow).
pub enum PipelineOutcome {
    Completed(HashMap<String, StageOutput>),
    Cancelled { stage: String, reason: String, partial: HashMap<String, StageOutput> },
    Failed { stage: String, error: String },
}

pub struct DagExecutor {
    specs: Vec<StageSpec>,
    /// Topological layers precomputed at construction so cycles are
    /// rejected synchronously (spec.md §8 boundary behavior).
    order: Vec<String>,
}

impl DagExecutor {
    pub fn new(specs: Vec<StageSpec>) -> Result<Self, DagError> {
        let mut seen = HashSet::new();
        for spec in &specs {
            if !seen.insert(spec.name.clone()) {
                return Err(DagError::DuplicateStageName(spec.name.clone()));
            }
        }
        let names: HashSet<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        for spec in &specs {
            for dep in &spec.dependencies {
                if !names.contains(dep.as_str()) {
                    return Err(DagError::UndeclaredDependency {
                        stage: spec.name.clone(),
                        dep: dep.clone(),
                    });
                }
            }
        }

        let order = topo_order(&specs)?;
        Ok(Self { specs, order })
    }

    /// Run every stage to completion, in parallel where the graph permits.
    pub async fn run(
        &self,
        snapshot: ContextSnapshot,
        ports: StagePorts,
        event_sink: Arc<dyn EventSink>,
        cancel: CancelToken,
    ) -> PipelineOutcome {
        let by_name: HashMap<&str, &StageSpec> =
            self.specs.iter().map(|s| (s.name.as_str(), s)).collect();

        let mut completed: HashMap<String, StageOutput> = HashMap::new();
        let mut remaining_deps: HashMap<String, HashSet<String>> = self
            .specs
            .iter()
            .map(|s| (s.name.clone(), s.dependencies.iter().cloned().collect()))
            .collect();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for s in &self.specs {
            for dep in &s.dependencies {
                dependents.entry(dep.clone()).or_default().push(s.name.clone());
            }
        }

        let mut ready: VecDeque<String> = self
            .order
            .iter()
            .filter(|name| remaining_deps.get(*name).map(|d| d.is_empty()).unwrap_or(false))
            .cloned()
            .collect();

        let mut retries_used: HashMap<String, u32> = HashMap::new();
        let mut in_flight: FuturesUnordered<StageFuture> = FuturesUnordered::new();

        loop {
            if cancel.is_cancelled() {
                let stage = ready.front().cloned().unwrap_or_default();
                return PipelineOutcome::Cancelled {
                    stage,
                    reason: "cancelled before dispatch".into(),
                    partial: completed,
                };
            }

            // Dispatch every currently-ready stage concurrently; readiness is
            // recomputed below as each one finishes, so a stage unblocked by
            // this batch joins the in-flight set on the next iteration.
            while let Some(name) = ready.pop_front() {
                let spec = by_name[name.as_str()];

                let prior_outputs: HashMap<String, StageOutput> = spec
                    .dependencies
                    .iter()
                    .filter_map(|d| completed.get(d).map(|o| (d.clone(), o.clone())))
                    .collect();

                let inputs = StageInputs::new(
                    snapshot.clone(),
                    prior_outputs,
                    spec.dependencies.clone(),
                    ports.clone(),
                );
                let ctx = StageContext::new(snapshot.clone(), inputs);
                let runner = spec.runner.clone();

                in_flight.push(Box::pin(async move {
                    let output = runner.execute(ctx).await;
                    (name, output)
                }));
            }

            let Some((name, output)) = in_flight.next().await else {
                break;
            };

            for event in &output.events {
                event_sink.record(snapshot.pipeline_run_id, name.clone(), event.clone());
            }

            let spec = by_name[name.as_str()];

            match output.status {
                StageStatus::Ok | StageStatus::Skip => {
                    completed.insert(name.clone(), output);
                    if let Some(children) = dependents.get(&name) {
                        for child in children {
                            if let Some(deps) = remaining_deps.get_mut(child) {
                                deps.remove(&name);
                                if deps.is_empty() {
                                    ready.push_back(child.clone());
                                }
                            }
                        }
                    }
                }
                StageStatus::Cancel => {
                    return PipelineOutcome::Cancelled {
                        stage: name.clone(),
                        reason: output.error.unwrap_or_default(),
                        partial: completed,
                    };
                }
                StageStatus::Retry => {
                    let used = retries_used.entry(name.clone()).or_insert(0);
                    if *used < spec.retry_budget {
                        *used += 1;
                        ready.push_back(name);
                    } else {
                        return PipelineOutcome::Failed {
                            stage: name.clone(),
                            error: output.error.unwrap_or_else(|| "retry budget exhausted".into()),
                        };
                    }
                }
                StageStatus::Fail => {
                    return PipelineOutcome::Failed {
                        stage: name.clone(),
                        error: output.error.unwrap_or_default(),
                    };
                }
            }
        }

        PipelineOutcome::Completed(completed)
    }
}

type StageFuture = Pin<Box<dyn Future<Output = (String, StageOutput)> + Send>>;

fn topo_order(specs: &[StageSpec]) -> Result<Vec<String>, DagError> {
    let mut indegree: HashMap<&str, usize> =
        specs.iter().map(|s| (s.name.as_str(), s.dependencies.len())).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for s in specs {
        for dep in &s.dependencies {
            dependents.entry(dep.as_str()).or_default().push(s.name.as_str());
        }
    }

    let mut queue: VecDeque<&str> =
        indegree.iter().filter(|(_, &d)| d == 0).map(|(n, _)| *n).collect();
    let mut order = Vec::with_capacity(specs.len());

    while let Some(name) = queue.pop_front() {
        order.push(name.to_string());
        if let Some(children) = dependents.get(name) {
            for child in children {
                let entry = indegree.get_mut(child).unwrap();
                *entry -= 1;
                if *entry == 0 {
                    queue.push_back(child);
                }
            }
        }
    }

    if order.len() != specs.len() {
        return Err(DagError::CycleDetected);
    }
    Ok(order)
}

/// Required by `StagePorts`/`ContextSnapshot` fan-out; re-exported here
/// so stage implementations don't need to depend on `tf_domain::stage`
/// directly for the channel enum used by routing.
pub use tf_domain::stage::Topology;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap as Map;
    use tf_domain::stage::{Behavior, StagePorts};
    use uuid::Uuid;

    struct EchoStage(&'static str);

    #[async_trait::async_trait]
    impl Stage for EchoStage {
        async fn execute(&self, _ctx: StageContext) -> StageOutput {
            StageOutput::ok(Map::from([("who".to_string(), serde_json::json!(self.0))]))
        }
    }

    struct FailStage;

    #[async_trait::async_trait]
    impl Stage for FailStage {
        async fn execute(&self, _ctx: StageContext) -> StageOutput {
            StageOutput::fail("boom")
        }
    }

    struct CancelStage;

    #[async_trait::async_trait]
    impl Stage for CancelStage {
        async fn execute(&self, _ctx: StageContext) -> StageOutput {
            StageOutput::cancel("empty transcript", Map::new())
        }
    }

    fn snapshot() -> ContextSnapshot {
        ContextSnapshot {
            pipeline_run_id: Uuid::new_v4(),
            request_id: "r1".into(),
            session_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            org_id: None,
            interaction_id: None,
            topology: Topology::ChatFast,
            channel: Channel::TextChannel,
            behavior: Behavior::FreeConversation,
            messages: vec![],
            profile: None,
            memory: None,
            skills: None,
            documents: None,
            web_results: None,
            input_text: Some("hi".into()),
            input_audio_duration_ms: None,
            exercise_id: None,
            assessment_state: None,
            routing_decision: None,
            created_at: Utc::now(),
        }
    }

    fn ports() -> StagePorts {
        StagePorts::new(Arc::new(|_, _, _| {}), Arc::new(|_| {}))
    }

    #[test]
    fn rejects_cycle_at_construction() {
        let a = StageSpec::new("a", StageKind::Transform, Arc::new(EchoStage("a")))
            .depends_on(["b"]);
        let b = StageSpec::new("b", StageKind::Transform, Arc::new(EchoStage("b")))
            .depends_on(["a"]);
        let err = DagExecutor::new(vec![a, b]).unwrap_err();
        assert!(matches!(err, DagError::CycleDetected));
    }

    #[test]
    fn rejects_undeclared_dependency() {
        let a = StageSpec::new("a", StageKind::Transform, Arc::new(EchoStage("a")))
            .depends_on(["ghost"]);
        let err = DagExecutor::new(vec![a]).unwrap_err();
        assert!(matches!(err, DagError::UndeclaredDependency { .. }));
    }

    #[tokio::test]
    async fn diamond_dependency_restricts_inputs_view() {
        struct CheckD;
        #[async_trait::async_trait]
        impl Stage for CheckD {
            async fn execute(&self, ctx: StageContext) -> StageOutput {
                assert!(!ctx.inputs.has_output("a"));
                assert!(ctx.inputs.has_output("b"));
                assert!(ctx.inputs.has_output("c"));
                assert_eq!(
                    ctx.inputs.get_from("b", "who", None),
                    Some(serde_json::json!("b"))
                );
                StageOutput::ok(Map::new())
            }
        }

        let a = StageSpec::new("a", StageKind::Transform, Arc::new(EchoStage("a")));
        let b = StageSpec::new("b", StageKind::Transform, Arc::new(EchoStage("b")))
            .depends_on(["a"]);
        let c = StageSpec::new("c", StageKind::Transform, Arc::new(EchoStage("c")))
            .depends_on(["a"]);
        let d = StageSpec::new("d", StageKind::Transform, Arc::new(CheckD))
            .depends_on(["b", "c"]);

        let exec = DagExecutor::new(vec![a, b, c, d]).unwrap();
        let sink: Arc<dyn EventSink> = Arc::new(crate::event_sink::NullEventSink);
        let outcome = exec.run(snapshot(), ports(), sink, CancelToken::new()).await;
        assert!(matches!(outcome, PipelineOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn independent_stages_with_no_deps_all_complete() {
        let a = StageSpec::new("a", StageKind::Transform, Arc::new(EchoStage("a")));
        let b = StageSpec::new("b", StageKind::Transform, Arc::new(EchoStage("b")));
        let exec = DagExecutor::new(vec![a, b]).unwrap();
        let sink: Arc<dyn EventSink> = Arc::new(crate::event_sink::NullEventSink);
        let outcome = exec.run(snapshot(), ports(), sink, CancelToken::new()).await;
        match outcome {
            PipelineOutcome::Completed(outputs) => assert_eq!(outputs.len(), 2),
            _ => panic!("expected completion"),
        }
    }

    #[tokio::test]
    async fn failing_stage_raises_stage_execution_error() {
        let a = StageSpec::new("a", StageKind::Transform, Arc::new(FailStage));
        let exec = DagExecutor::new(vec![a]).unwrap();
        let sink: Arc<dyn EventSink> = Arc::new(crate::event_sink::NullEventSink);
        let outcome = exec.run(snapshot(), ports(), sink, CancelToken::new()).await;
        assert!(matches!(outcome, PipelineOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn cancel_status_is_terminal_for_whole_run() {
        let a = StageSpec::new("a", StageKind::Work, Arc::new(CancelStage));
        let b = StageSpec::new("b", StageKind::Transform, Arc::new(EchoStage("b")))
            .depends_on(["a"]);
        let exec = DagExecutor::new(vec![a, b]).unwrap();
        let sink: Arc<dyn EventSink> = Arc::new(crate::event_sink::NullEventSink);
        let outcome = exec.run(snapshot(), ports(), sink, CancelToken::new()).await;
        assert!(matches!(outcome, PipelineOutcome::Cancelled { .. }));
    }

    #[tokio::test]
    async fn pre_cancelled_token_stops_before_dispatch() {
        let a = StageSpec::new("a", StageKind::Transform, Arc::new(EchoStage("a")));
        let exec = DagExecutor::new(vec![a]).unwrap();
        let sink: Arc<dyn EventSink> = Arc::new(crate::event_sink::NullEventSink);
        let cancel = CancelToken::new();
        cancel.cancel();
        let outcome = exec.run(snapshot(), ports(), sink, cancel).await;
        assert!(matches!(outcome, PipelineOutcome::Cancelled { .. }));
    }
}
