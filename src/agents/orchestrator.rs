//! Orchestrator - drives one investigation from mode selection to result.
//!
//! # Run Flow
//! 1. Select a mode from the caller's factors
//! 2. Agentic: run phases until the state machine completes or a stop
//!    condition forces finalization; deterministic: run the fixed pipeline
//! 3. On a run-level failure, fall back to the pipeline if enabled
//! 4. Fold the outcome into the mode statistics and emit the result
//!
//! # Invariants
//! - phases of one session run strictly one after another
//! - every state change goes through [`SessionManager::update_session`] or
//!   [`SessionManager::switch_model`]
//! - a stop condition is checked before every phase: cancellation, the run
//!   deadline, [`BudgetTracker::is_exceeded`], then fallback advice
//! - a stop condition jumps to finalization when the reason permits one more
//!   synthesis call and the budget allows it; otherwise the report is
//!   assembled from session state
//! - the result's `success` flag is true iff a report was produced

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::context::PhaseContext;
use super::phases::PhaseHandlers;
use super::transition::{next_transition, Transition};
use super::types::{ForcedReason, PhaseType};
use crate::budget::{BudgetTracker, CapabilityTier};
use crate::config::{RunConfig, ServiceConfig};
use crate::error::OrchestratorError;
use crate::events::{EventSink, ProgressEvent};
use crate::llm::{BackendCaller, CapabilityBackend};
use crate::mode::{InvestigationMode, ModeSelectionFactors, ModeSelector, ModeStatsError};
use crate::pipeline::{DeterministicPipeline, FixedPipeline};
use crate::report::{FinalReport, InvestigationResult, PhaseMetrics, RunMetadata};
use crate::routing::{phase_token_estimate, CapabilityRouter, RouterConfig};
use crate::session::{
    ErrorRecord, SessionId, SessionManager, SessionState, SessionUpdate, COMPACTION_SOURCE,
};
use crate::tools::{ExecutionContext, ToolCaller, ToolInvoker};

/// What to investigate and under which limits.
#[derive(Debug, Clone)]
pub struct InvestigationRequest {
    pub subject_id: String,
    pub factors: ModeSelectionFactors,
    pub config: RunConfig,
    /// Checked at phase boundaries
    pub cancel: Option<CancellationToken>,
}

impl InvestigationRequest {
    pub fn new(subject_id: impl Into<String>, config: RunConfig) -> Self {
        Self {
            subject_id: subject_id.into(),
            factors: ModeSelectionFactors::default(),
            config,
            cancel: None,
        }
    }

    pub fn with_factors(mut self, factors: ModeSelectionFactors) -> Self {
        self.factors = factors;
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Runs investigations. Cheap to clone; clones share sessions, mode
/// statistics and the event sink.
#[derive(Clone)]
pub struct Orchestrator {
    tools: Arc<dyn ToolInvoker>,
    backend: Arc<dyn CapabilityBackend>,
    pipeline: Arc<dyn DeterministicPipeline>,
    sessions: SessionManager,
    selector: Arc<RwLock<ModeSelector>>,
    router_config: RouterConfig,
    handlers: PhaseHandlers,
    events: EventSink,
    stats_path: Option<PathBuf>,
}

impl Orchestrator {
    pub fn new(tools: Arc<dyn ToolInvoker>, backend: Arc<dyn CapabilityBackend>) -> Self {
        Self {
            tools,
            backend,
            pipeline: Arc::new(FixedPipeline::default()),
            sessions: SessionManager::default(),
            selector: Arc::new(RwLock::new(ModeSelector::default())),
            router_config: RouterConfig::default(),
            handlers: PhaseHandlers::default(),
            events: EventSink::default(),
            stats_path: None,
        }
    }

    /// Orchestrator wired from process configuration.
    pub fn from_config(
        config: &ServiceConfig,
        tools: Arc<dyn ToolInvoker>,
        backend: Arc<dyn CapabilityBackend>,
    ) -> Self {
        let mut orchestrator = Self::new(tools, backend);
        orchestrator.sessions = SessionManager::new(config.sessions.clone());
        orchestrator.router_config = config.router.clone();
        orchestrator.stats_path = config.mode_stats_path.clone();
        orchestrator
    }

    pub fn with_pipeline(mut self, pipeline: Arc<dyn DeterministicPipeline>) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn with_sessions(mut self, sessions: SessionManager) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn with_selector(mut self, selector: Arc<RwLock<ModeSelector>>) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_router_config(mut self, config: RouterConfig) -> Self {
        self.router_config = config;
        self
    }

    pub fn with_handlers(mut self, handlers: PhaseHandlers) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Persist mode statistics here after every run.
    pub fn with_stats_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.stats_path = Some(path.into());
        self
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn selector(&self) -> Arc<RwLock<ModeSelector>> {
        Arc::clone(&self.selector)
    }

    /// Load mode statistics from the stats path, if it is set and exists.
    ///
    /// # Returns
    /// `true` if statistics were loaded.
    pub async fn restore_mode_stats(&self) -> Result<bool, ModeStatsError> {
        let Some(path) = &self.stats_path else {
            return Ok(false);
        };
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(false);
        }
        let mut selector = self.selector.write().await;
        let config = selector.config().clone();
        *selector = ModeSelector::load_from_path(config, path).await?;
        tracing::info!(path = %path.display(), "Restored mode statistics");
        Ok(true)
    }

    /// Run one investigation to completion.
    ///
    /// Never fails: run-level errors become a failure result.
    pub async fn investigate(&self, request: InvestigationRequest) -> InvestigationResult {
        let started = Instant::now();
        let selection = self.selector.read().await.select_mode(&request.factors);
        tracing::info!(
            subject_id = %request.subject_id,
            mode = %selection.mode,
            confidence = selection.confidence,
            fallback_recommended = selection.fallback_recommended,
            "Starting investigation"
        );

        let mut budget = BudgetTracker::new(request.config.caps.clone());
        let tools = ToolCaller::new(
            Arc::clone(&self.tools),
            request.config.call_policy(),
            request.config.caching_enabled,
        );

        let (session_id, result) = match selection.mode {
            InvestigationMode::Deterministic => {
                self.events.emit(ProgressEvent::RunStarted {
                    session_id: None,
                    subject_id: request.subject_id.clone(),
                    mode: selection.mode,
                });
                let result = self
                    .run_deterministic(&request, &tools, &mut budget, None, false)
                    .await;
                (None, result)
            }
            InvestigationMode::Agentic => {
                let id = self
                    .sessions
                    .create_session(&request.subject_id, request.config.clone())
                    .await;
                self.events.emit(ProgressEvent::RunStarted {
                    session_id: Some(id),
                    subject_id: request.subject_id.clone(),
                    mode: selection.mode,
                });
                let result = match self.run_agentic(&request, id, &tools, &mut budget).await {
                    Ok(result) => result,
                    Err(err) => self.recover(&request, id, err, &tools, &mut budget).await,
                };
                if let Err(e) = self.sessions.end_session(id).await {
                    tracing::warn!(session_id = %id, error = %e, "Failed to end session");
                }
                (Some(id), result)
            }
        };

        self.record_performance(&result, started).await;
        tracing::info!(
            subject_id = %request.subject_id,
            success = result.success,
            mode = %result.mode_used,
            fallback_used = result.fallback_used,
            cost_usd = result.usage.total_cost_usd,
            tool_calls = result.usage.tool_calls,
            "Investigation finished"
        );
        self.events.emit(ProgressEvent::RunCompleted {
            session_id,
            result: Box::new(result.clone()),
        });
        result
    }

    async fn run_agentic(
        &self,
        request: &InvestigationRequest,
        session_id: SessionId,
        tools: &ToolCaller,
        budget: &mut BudgetTracker,
    ) -> Result<InvestigationResult, OrchestratorError> {
        let config = &request.config;
        let backend = BackendCaller::new(Arc::clone(&self.backend), config.call_policy());
        let mut router = CapabilityRouter::new(self.router_config.clone());
        let deadline = Instant::now() + config.timeout;

        let mut metadata = RunMetadata::new(InvestigationMode::Agentic);
        metadata.session_id = Some(session_id);
        let mut draft = None;
        let mut phase = PhaseType::ContextGathering;
        let mut forced = false;

        loop {
            let mut state = self.sessions.get_session(session_id).await?;
            if !forced {
                if let Some(reason) = self.stop_reason(request, budget, deadline, &state).await {
                    let synthesize = reason.permits_synthesis()
                        && budget.can_execute(
                            PhaseType::Finalization.operation_kind(),
                            Some(phase_token_estimate(PhaseType::Finalization)),
                        );
                    tracing::warn!(
                        session_id = %session_id,
                        phase = %phase,
                        reason = %reason,
                        synthesize,
                        "Forcing finalization"
                    );
                    self.events.emit(ProgressEvent::Warning {
                        session_id: Some(session_id),
                        message: format!("forcing finalization before {}: {}", phase, reason),
                    });
                    metadata.forced_finalization = Some(reason);
                    if !synthesize {
                        break;
                    }
                    forced = true;
                    phase = PhaseType::Finalization;
                }
            }

            let decision = router.route(phase, &state, &budget.snapshot());
            if decision.tier != state.active_tier {
                let compaction = self
                    .sessions
                    .switch_model(session_id, state.active_tier, decision.tier)
                    .await?;
                if let Some(report) = compaction.filter(|r| !r.is_lossless()) {
                    self.events.emit(ProgressEvent::Warning {
                        session_id: Some(session_id),
                        message: format!(
                            "compacted state for {}: dropped {} candidates, {} tool calls, {} patterns",
                            decision.tier,
                            report.dropped_candidates,
                            report.dropped_tool_calls,
                            report.dropped_patterns
                        ),
                    });
                }
                state = self.sessions.get_session(session_id).await?;
            }

            let handler = self
                .handlers
                .get(phase)
                .ok_or(OrchestratorError::MissingHandler(phase))?;
            tracing::info!(
                session_id = %session_id,
                phase = %phase,
                tier = %decision.tier,
                reason = %decision.reason,
                "Running phase"
            );
            self.events.emit(ProgressEvent::PhaseStarted {
                session_id,
                phase,
                tier: decision.tier,
                reason: decision.reason,
            });

            let phase_started = Instant::now();
            let mut result = {
                let mut ctx = PhaseContext {
                    session_id,
                    mode: InvestigationMode::Agentic,
                    phase,
                    tier: decision.tier,
                    config,
                    budget: &mut *budget,
                    tools,
                    backend: &backend,
                };
                handler.run(&mut ctx, &state).await?
            };
            result.duration = phase_started.elapsed();

            let update = std::mem::take(&mut result.update);
            let state = self.sessions.update_session(session_id, update).await?;

            if let Some(content) = result.reasoning.take() {
                self.events.emit(ProgressEvent::ReasoningText {
                    session_id,
                    phase,
                    content,
                });
            }
            let metrics = PhaseMetrics {
                phase,
                tier: result.tier,
                tool_calls: result.tool_calls,
                tokens: result.tokens,
                cost_usd: result.cost_usd,
                duration: result.duration,
            };
            if config.telemetry_enabled {
                metadata.phase_metrics.push(metrics.clone());
            }
            self.events.emit(ProgressEvent::PhaseCompleted { session_id, metrics });
            metadata.phases_run += 1;
            if let Some(d) = result.draft.take() {
                draft = Some(d);
            }

            match next_transition(&result, &state) {
                Transition::Run(next) => phase = next,
                Transition::Complete => break,
            }
        }

        metadata.tier_switches = router.switch_count();
        let usage = budget.usage();
        let metadata = metadata.with_usage(&usage);
        let state = self.sessions.get_session(session_id).await?;
        let report = FinalReport::from_session(&state, draft, metadata);
        Ok(InvestigationResult::succeeded(report, usage))
    }

    /// First stop condition that holds, if any.
    async fn stop_reason(
        &self,
        request: &InvestigationRequest,
        budget: &mut BudgetTracker,
        deadline: Instant,
        state: &SessionState,
    ) -> Option<ForcedReason> {
        if request.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
            return Some(ForcedReason::Cancelled);
        }
        if Instant::now() >= deadline {
            return Some(ForcedReason::Deadline);
        }
        if budget.is_exceeded() {
            let fields = budget
                .exceeded_fields()
                .into_iter()
                .map(String::from)
                .collect();
            return Some(ForcedReason::BudgetExceeded { fields });
        }

        let errors = state
            .errors
            .iter()
            .filter(|e| e.source != COMPACTION_SOURCE)
            .count() as u32;
        let tokens = budget.usage().reasoning_tokens;
        let advised = self.selector.read().await.should_fallback(
            InvestigationMode::Agentic,
            budget.elapsed(),
            tokens,
            errors,
        );
        advised.then_some(ForcedReason::FallbackAdvised)
    }

    /// Handle a failed agentic run: log it, then fall back or fail.
    async fn recover(
        &self,
        request: &InvestigationRequest,
        session_id: SessionId,
        err: OrchestratorError,
        tools: &ToolCaller,
        budget: &mut BudgetTracker,
    ) -> InvestigationResult {
        tracing::error!(
            session_id = %session_id,
            code = err.code(),
            error = %err,
            "Agentic run failed"
        );
        let record = ErrorRecord::unrecoverable(err.code(), err.to_string());
        if let Err(e) = self
            .sessions
            .update_session(session_id, SessionUpdate::default().with_error(record))
            .await
        {
            tracing::warn!(session_id = %session_id, error = %e, "Could not log run failure");
        }
        self.events.emit(ProgressEvent::Error {
            session_id: Some(session_id),
            message: err.to_string(),
        });

        if !request.config.fallback_enabled {
            return InvestigationResult::failed(
                InvestigationMode::Agentic,
                false,
                err.code(),
                err.to_string(),
                budget.usage(),
            );
        }

        self.events.emit(ProgressEvent::Warning {
            session_id: Some(session_id),
            message: "falling back to the deterministic pipeline".to_string(),
        });
        self.run_deterministic(request, tools, budget, Some(session_id), true)
            .await
    }

    async fn run_deterministic(
        &self,
        request: &InvestigationRequest,
        tools: &ToolCaller,
        budget: &mut BudgetTracker,
        session_id: Option<SessionId>,
        fallback_used: bool,
    ) -> InvestigationResult {
        let ctx = ExecutionContext {
            session_id: session_id.unwrap_or_default(),
            request_id: uuid::Uuid::new_v4(),
            mode: InvestigationMode::Deterministic,
            tier: CapabilityTier::Low,
            remaining: budget.remaining(),
        };

        match self
            .pipeline
            .run(&request.subject_id, tools, &ctx, budget)
            .await
        {
            Ok(mut report) => {
                let usage = budget.usage();
                let mut metadata = RunMetadata::new(InvestigationMode::Deterministic).with_usage(&usage);
                metadata.session_id = session_id;
                metadata.fallback_used = fallback_used;
                report.metadata = metadata;
                InvestigationResult::succeeded(report, usage)
            }
            Err(e) => {
                let err = OrchestratorError::from(e);
                tracing::error!(
                    subject_id = %request.subject_id,
                    error = %err,
                    "Deterministic pipeline failed"
                );
                self.events.emit(ProgressEvent::Error {
                    session_id,
                    message: err.to_string(),
                });
                InvestigationResult::failed(
                    InvestigationMode::Deterministic,
                    fallback_used,
                    err.code(),
                    err.to_string(),
                    budget.usage(),
                )
            }
        }
    }

    async fn record_performance(&self, result: &InvestigationResult, started: Instant) {
        let quality = result
            .primary_pattern
            .as_ref()
            .filter(|p| !p.is_empty())
            .map(|p| p.confidence);

        let mut selector = self.selector.write().await;
        selector.update_performance(
            result.mode_used,
            result.success,
            started.elapsed(),
            result.usage.total_cost_usd,
            quality,
        );
        if let Some(path) = &self.stats_path {
            if let Err(e) = selector.save_to_path(path).await {
                tracing::warn!(path = %path.display(), error = %e, "Failed to save mode statistics");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::context::PhaseHandler;
    use crate::agents::phases::Validation;
    use crate::agents::testing::{quick_config, registry, MockBackend, MockTools};
    use crate::agents::types::{PhaseError, PhaseResult};
    use crate::budget::BudgetCaps;
    use crate::llm::PromptTemplate;
    use crate::tools::{BATCH_SCORE, SIMILARITY_SEARCH, SUBJECT_METADATA};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::broadcast::Receiver;

    fn agentic() -> ModeSelectionFactors {
        ModeSelectionFactors {
            user_preference: Some(InvestigationMode::Agentic),
            quota_available: true,
            ..Default::default()
        }
    }

    fn request(config: RunConfig) -> InvestigationRequest {
        InvestigationRequest::new("vid", config).with_factors(agentic())
    }

    fn drain(rx: &mut Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn names(events: &[ProgressEvent]) -> Vec<&'static str> {
        events.iter().map(|e| e.event_name()).collect()
    }

    /// Fails every time; stands in for a crashing phase.
    struct Exploding;

    #[async_trait]
    impl PhaseHandler for Exploding {
        fn phase(&self) -> PhaseType {
            PhaseType::HypothesisGeneration
        }

        async fn run(
            &self,
            _ctx: &mut PhaseContext<'_>,
            _state: &SessionState,
        ) -> Result<PhaseResult, PhaseError> {
            Err(PhaseError::unrecoverable(self.phase(), "backend contract violated"))
        }
    }

    #[tokio::test]
    async fn test_agentic_run_completes() {
        let tools = Arc::new(MockTools::new());
        let backend = Arc::new(MockBackend::new());
        let orchestrator = Orchestrator::new(tools, backend.clone());
        let mut rx = orchestrator.events().subscribe();

        let result = orchestrator.investigate(request(quick_config())).await;

        assert!(result.success);
        assert_eq!(result.mode_used, InvestigationMode::Agentic);
        assert!(!result.fallback_used);
        let report = result.report.unwrap();
        assert_eq!(report.primary_pattern.statement, "Opening hook drives retention");
        assert_eq!(report.metadata.phases_run, 6);
        assert!(report.metadata.forced_finalization.is_none());
        assert!(report.metadata.phase_metrics.is_empty());
        assert_eq!(backend.calls(PromptTemplate::Report), 1);

        let events = drain(&mut rx);
        let names = names(&events);
        assert_eq!(names.first(), Some(&"run_started"));
        assert_eq!(names.last(), Some(&"run_completed"));
        assert_eq!(names.iter().filter(|n| **n == "phase_started").count(), 6);
        assert_eq!(names.iter().filter(|n| **n == "phase_completed").count(), 6);
    }

    #[tokio::test]
    async fn test_registry_serves_as_tool_invoker() {
        let tools = Arc::new(MockTools::new());
        let backend = Arc::new(MockBackend::new());
        let orchestrator = Orchestrator::new(Arc::new(registry(tools.clone())), backend.clone());

        let result = orchestrator.investigate(request(quick_config())).await;

        assert!(result.success);
        assert!(!result.fallback_used);
        let report = result.report.unwrap();
        assert_eq!(report.metadata.phases_run, 6);
        assert_eq!(tools.calls(SUBJECT_METADATA), 1);
        assert!(tools.calls(BATCH_SCORE) >= 1);
        assert!(tools.calls(SIMILARITY_SEARCH) >= 1);
    }

    #[tokio::test]
    async fn test_single_fanout_forces_finalization_after_search() {
        let backend = Arc::new(MockBackend::new());
        let tools = Arc::new(MockTools::new());
        let orchestrator = Orchestrator::new(tools.clone(), backend.clone());
        let mut config = quick_config();
        config.caps = BudgetCaps {
            max_fanouts: 1,
            ..BudgetCaps::default()
        };

        let result = orchestrator.investigate(request(config)).await;

        assert!(result.success);
        assert_eq!(result.usage.fanouts, 1);
        let report = result.report.unwrap();
        // context, hypothesis, search, then straight to finalization
        assert_eq!(report.metadata.phases_run, 4);
        assert_eq!(
            report.metadata.forced_finalization,
            Some(ForcedReason::BudgetExceeded {
                fields: vec!["fanouts".to_string()]
            })
        );
        assert_eq!(backend.calls(PromptTemplate::Report), 1);
        assert_eq!(report.primary_pattern.statement, "Opening hook drives retention");
        assert_eq!(tools.calls(BATCH_SCORE), 0);
    }

    #[tokio::test]
    async fn test_exhausted_tool_calls_assemble_report_locally() {
        let backend = Arc::new(MockBackend::new());
        let orchestrator = Orchestrator::new(Arc::new(MockTools::new()), backend.clone());
        let mut config = quick_config();
        config.caps = BudgetCaps {
            max_tool_calls: 2,
            ..BudgetCaps::default()
        };

        let result = orchestrator.investigate(request(config)).await;

        assert!(result.success);
        let report = result.report.unwrap();
        assert_eq!(report.metadata.phases_run, 2);
        assert_eq!(
            report.metadata.forced_finalization,
            Some(ForcedReason::BudgetExceeded {
                fields: vec!["tool_calls".to_string()]
            })
        );
        // no backend call left; built from the hypothesis
        assert_eq!(backend.calls(PromptTemplate::Report), 0);
        assert_eq!(report.primary_pattern.statement, "Strong opening hook");
    }

    #[tokio::test]
    async fn test_validation_repeats_while_evidence_is_needed() {
        let tools = Arc::new(MockTools::new());
        let handlers = PhaseHandlers::default().with(Arc::new(Validation { batch_size: 3 }));
        let orchestrator = Orchestrator::new(tools.clone(), Arc::new(MockBackend::new().incomplete()))
            .with_handlers(handlers);
        let mut rx = orchestrator.events().subscribe();

        let result = orchestrator.investigate(request(quick_config())).await;

        assert!(result.success);
        let batches = tools.calls(BATCH_SCORE);
        assert!(batches >= 2);
        assert_eq!(result.usage.validation_batches, batches);
        let report = result.report.unwrap();
        assert_eq!(report.metadata.phases_run, 5 + batches);
        assert!(report.metadata.forced_finalization.is_none());

        let validations = drain(&mut rx)
            .iter()
            .filter(|e| matches!(e, ProgressEvent::PhaseStarted { phase: PhaseType::Validation, .. }))
            .count() as u32;
        assert_eq!(validations, batches);
    }

    #[tokio::test]
    async fn test_failure_falls_back_to_pipeline() {
        let handlers = PhaseHandlers::default().with(Arc::new(Exploding));
        let orchestrator = Orchestrator::new(Arc::new(MockTools::new()), Arc::new(MockBackend::new()))
            .with_handlers(handlers);

        let result = orchestrator.investigate(request(quick_config())).await;

        assert!(result.success);
        assert!(result.fallback_used);
        assert_eq!(result.mode_used, InvestigationMode::Deterministic);
        let report = result.report.unwrap();
        assert_eq!(report.primary_pattern.statement, "Outperformers share 'hook' (3 of 3 matches)");

        let session_id = report.metadata.session_id.unwrap();
        let state = orchestrator.sessions().get_session(session_id).await.unwrap();
        assert!(state.has_unrecoverable_error());
        assert!(orchestrator.sessions().active_sessions().await.is_empty());
    }

    #[tokio::test]
    async fn test_failure_without_fallback() {
        let handlers = PhaseHandlers::default().with(Arc::new(Exploding));
        let orchestrator = Orchestrator::new(Arc::new(MockTools::new()), Arc::new(MockBackend::new()))
            .with_handlers(handlers);
        let mut config = quick_config();
        config.fallback_enabled = false;

        let result = orchestrator.investigate(request(config)).await;

        assert!(!result.success);
        assert!(result.report.is_none());
        assert_eq!(result.mode_used, InvestigationMode::Agentic);
        assert_eq!(result.failure.unwrap().code, "phase_failed");
    }

    #[tokio::test]
    async fn test_fallback_failure_reported() {
        let tools = Arc::new(MockTools::new().failing(SUBJECT_METADATA));
        let orchestrator = Orchestrator::new(tools, Arc::new(MockBackend::new()));

        let result = orchestrator.investigate(request(quick_config())).await;

        assert!(!result.success);
        assert!(result.fallback_used);
        assert_eq!(result.failure.unwrap().code, "pipeline_failed");
    }

    #[tokio::test]
    async fn test_deterministic_mode_skips_backend() {
        let backend = Arc::new(MockBackend::new());
        let orchestrator = Orchestrator::new(Arc::new(MockTools::new()), backend.clone());
        let factors = ModeSelectionFactors {
            quota_available: false,
            ..Default::default()
        };

        let result = orchestrator
            .investigate(InvestigationRequest::new("vid", quick_config()).with_factors(factors))
            .await;

        assert!(result.success);
        assert!(!result.fallback_used);
        assert_eq!(result.mode_used, InvestigationMode::Deterministic);
        assert_eq!(backend.calls(PromptTemplate::Hypothesis), 0);
        assert!(orchestrator.sessions().is_empty().await);
    }

    #[tokio::test]
    async fn test_cancelled_run_finalizes_immediately() {
        let orchestrator = Orchestrator::new(Arc::new(MockTools::new()), Arc::new(MockBackend::new()));
        let token = CancellationToken::new();
        token.cancel();

        let result = orchestrator
            .investigate(request(quick_config()).with_cancel(token))
            .await;

        assert!(result.success);
        let report = result.report.unwrap();
        assert_eq!(report.metadata.phases_run, 0);
        assert_eq!(report.metadata.forced_finalization, Some(ForcedReason::Cancelled));
        assert!(report.primary_pattern.is_empty());
    }

    #[tokio::test]
    async fn test_deadline_forces_finalization() {
        let backend = Arc::new(MockBackend::new());
        let orchestrator = Orchestrator::new(Arc::new(MockTools::new()), backend.clone());
        let mut config = quick_config();
        config.timeout = Duration::ZERO;

        let result = orchestrator.investigate(request(config)).await;
        let metadata = result.report.unwrap().metadata;
        assert_eq!(metadata.forced_finalization, Some(ForcedReason::Deadline));
        // only the synthesis call runs
        assert_eq!(metadata.phases_run, 1);
        assert_eq!(backend.calls(PromptTemplate::Hypothesis), 0);
        assert_eq!(backend.calls(PromptTemplate::Report), 1);
    }

    #[tokio::test]
    async fn test_telemetry_and_performance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats").join("modes.json");
        let orchestrator = Orchestrator::new(Arc::new(MockTools::new()), Arc::new(MockBackend::new()))
            .with_stats_path(&path);
        let mut config = quick_config();
        config.telemetry_enabled = true;

        let result = orchestrator.investigate(request(config)).await;

        let metadata = result.report.unwrap().metadata;
        assert_eq!(metadata.phase_metrics.len() as u32, metadata.phases_run);
        assert_eq!(
            orchestrator
                .selector()
                .read()
                .await
                .performance(InvestigationMode::Agentic)
                .samples,
            1
        );
        assert!(path.exists());

        let restored = Orchestrator::new(Arc::new(MockTools::new()), Arc::new(MockBackend::new()))
            .with_stats_path(&path);
        assert!(restored.restore_mode_stats().await.unwrap());
        assert_eq!(
            restored
                .selector()
                .read()
                .await
                .performance(InvestigationMode::Agentic)
                .samples,
            1
        );
    }

    #[tokio::test]
    async fn test_concurrent_runs_are_independent() {
        let orchestrator = Orchestrator::new(Arc::new(MockTools::new()), Arc::new(MockBackend::new()));
        let a = orchestrator.clone();
        let b = orchestrator.clone();

        let (ra, rb) = tokio::join!(
            a.investigate(request(quick_config())),
            b.investigate(InvestigationRequest::new("other", quick_config()).with_factors(agentic())),
        );

        assert!(ra.success && rb.success);
        let (ra, rb) = (ra.report.unwrap(), rb.report.unwrap());
        assert_eq!(ra.subject_id, "vid");
        assert_eq!(rb.subject_id, "other");
        assert_ne!(ra.metadata.session_id, rb.metadata.session_id);
    }
}
