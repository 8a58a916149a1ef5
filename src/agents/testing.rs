//! In-crate test doubles for the tool invoker and capability backend.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::budget::{BudgetTracker, CapabilityTier};
use crate::config::RunConfig;
use crate::llm::{BackendError, CapabilityBackend, GenerationOutput, GenerationRequest, PromptTemplate, TokenUsage};
use crate::mode::InvestigationMode;
use crate::session::{Candidate, Enrichment, SessionId, SubjectContext};
use crate::tools::{
    CandidateScore, ExecutionContext, Tool, ToolError, ToolInvoker, ToolOutput, ToolRegistry, ToolResponse, BATCH_SCORE,
    ENRICH_CANDIDATE, SIMILARITY_SEARCH, SUBJECT_METADATA,
};

/// Scripted tools with per-tool call counters.
pub(crate) struct MockTools {
    candidates_per_query: usize,
    failing: HashSet<&'static str>,
    calls: Mutex<HashMap<String, u32>>,
}

impl MockTools {
    pub fn new() -> Self {
        Self {
            candidates_per_query: 6,
            failing: HashSet::new(),
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_candidates(mut self, n: usize) -> Self {
        self.candidates_per_query = n;
        self
    }

    /// Make `tool` fail permanently.
    pub fn failing(mut self, tool: &'static str) -> Self {
        self.failing.insert(tool);
        self
    }

    pub fn calls(&self, tool: &str) -> u32 {
        self.calls.lock().unwrap().get(tool).copied().unwrap_or(0)
    }

    fn respond(&self, tool: &str, params: &Value) -> Result<ToolOutput, ToolError> {
        match tool {
            SUBJECT_METADATA => Ok(ToolOutput::SubjectContext {
                context: SubjectContext {
                    subject_id: params["subject_id"].as_str().unwrap_or_default().to_string(),
                    title: "How I cook rice".into(),
                    niche: Some("cooking".into()),
                    views: 900_000,
                    baseline_views: 100_000,
                    tags: vec!["hook".into(), "recipe".into()],
                    ..Default::default()
                },
            }),
            SIMILARITY_SEARCH => {
                let query = params["query"].as_str().unwrap_or_default();
                let limit = params["limit"].as_u64().unwrap_or(u64::MAX) as usize;
                let with_tags = params["include_tags"].as_bool().unwrap_or(false);
                let slug = query.replace(' ', "_");
                let candidates = (0..self.candidates_per_query.min(limit))
                    .map(|i| {
                        let mut c = Candidate::new(format!("{}-{}", slug, i), format!("{} #{}", query, i), 1.0 - i as f64 * 0.1);
                        if with_tags {
                            let tag = if i % 2 == 0 { "hook" } else { "recipe" };
                            c.enrichment = Some(Enrichment {
                                tags: vec![tag.to_string()],
                                ..Default::default()
                            });
                        }
                        c
                    })
                    .collect();
                Ok(ToolOutput::Search { candidates })
            }
            ENRICH_CANDIDATE => Ok(ToolOutput::Enrichment {
                candidate_id: params["candidate_id"].as_str().unwrap_or_default().to_string(),
                enrichment: Enrichment {
                    niche: Some("cooking".into()),
                    tags: vec!["hook".into()],
                    ..Default::default()
                },
            }),
            BATCH_SCORE => {
                let scores = params["candidate_ids"]
                    .as_array()
                    .map(|ids| {
                        ids.iter()
                            .enumerate()
                            .map(|(i, id)| CandidateScore {
                                candidate_id: id.as_str().unwrap_or_default().to_string(),
                                matches: i % 2 == 0,
                                strength: 0.7,
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(ToolOutput::Statistics { scores })
            }
            other => Err(ToolError::permanent(other, "unknown tool")),
        }
    }
}

#[async_trait]
impl ToolInvoker for MockTools {
    async fn execute(&self, tool: &str, params: Value, _ctx: &ExecutionContext) -> Result<ToolResponse, ToolError> {
        *self.calls.lock().unwrap().entry(tool.to_string()).or_insert(0) += 1;
        if self.failing.contains(tool) {
            return Err(ToolError::permanent(tool, "scripted failure"));
        }
        let output = self.respond(tool, &params)?;
        Ok(ToolResponse {
            output,
            tokens: 10,
            cost_usd: 0.001,
        })
    }
}

/// One named tool answered by a shared [`MockTools`].
struct Scripted {
    name: &'static str,
    inner: Arc<MockTools>,
}

#[async_trait]
impl Tool for Scripted {
    fn name(&self) -> &str {
        self.name
    }

    async fn execute(&self, params: Value, ctx: &ExecutionContext) -> Result<ToolResponse, ToolError> {
        self.inner.execute(self.name, params, ctx).await
    }
}

/// Registry holding the four investigation tools, all backed by `inner`.
pub(crate) fn registry(inner: Arc<MockTools>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for name in [SUBJECT_METADATA, SIMILARITY_SEARCH, ENRICH_CANDIDATE, BATCH_SCORE] {
        registry.register(Arc::new(Scripted {
            name,
            inner: inner.clone(),
        }));
    }
    registry
}

/// Scripted backend answering every template with valid JSON.
pub(crate) struct MockBackend {
    validation_incomplete: bool,
    failing: HashSet<PromptTemplate>,
    calls: Mutex<HashMap<PromptTemplate, u32>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            validation_incomplete: false,
            failing: HashSet::new(),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Every validation verdict is incomplete.
    pub fn incomplete(mut self) -> Self {
        self.validation_incomplete = true;
        self
    }

    /// Reject every request for `template`.
    pub fn failing(mut self, template: PromptTemplate) -> Self {
        self.failing.insert(template);
        self
    }

    pub fn calls(&self, template: PromptTemplate) -> u32 {
        self.calls.lock().unwrap().get(&template).copied().unwrap_or(0)
    }

    fn content(&self, template: PromptTemplate) -> String {
        match template {
            PromptTemplate::Hypothesis => format!(
                "Here is my hypothesis:\n```json\n{}\n```",
                json!({
                    "statement": "Strong opening hook",
                    "confidence": 0.6,
                    "rationale": "The payoff is shown in the first seconds",
                    "signals": ["retention spike"]
                })
            ),
            PromptTemplate::SearchPlan => json!({
                "queries": ["rice hook", "cooking hook"],
                "limit_per_query": 5
            })
            .to_string(),
            PromptTemplate::Validation => json!({
                "complete": !self.validation_incomplete,
                "patterns": [{
                    "statement": "Opening hook",
                    "support": 3,
                    "strength": 0.7,
                    "evidence": ["rice_hook-0"]
                }],
                "confidence": 0.7
            })
            .to_string(),
            PromptTemplate::Report => json!({
                "primary_pattern": {
                    "statement": "Opening hook drives retention",
                    "confidence": 0.8,
                    "strength": 0.7,
                    "evidence": ["rice_hook-0"],
                    "niches": ["cooking"]
                },
                "recommendations": ["Open with the payoff"]
            })
            .to_string(),
        }
    }
}

#[async_trait]
impl CapabilityBackend for MockBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput, BackendError> {
        *self.calls.lock().unwrap().entry(request.template).or_insert(0) += 1;
        if self.failing.contains(&request.template) {
            return Err(BackendError::rejected("scripted rejection"));
        }
        Ok(GenerationOutput {
            content: self.content(request.template),
            usage: TokenUsage::new(100, 50),
        })
    }
}

/// Run configuration without retries.
pub(crate) fn quick_config() -> RunConfig {
    RunConfig {
        retry_attempts: 0,
        ..RunConfig::default()
    }
}

pub(crate) fn execution_context(tracker: &BudgetTracker) -> ExecutionContext {
    ExecutionContext {
        session_id: SessionId::new(),
        request_id: uuid::Uuid::new_v4(),
        mode: InvestigationMode::Agentic,
        tier: CapabilityTier::Mid,
        remaining: tracker.remaining(),
    }
}
