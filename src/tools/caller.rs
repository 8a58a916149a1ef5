//! Policy-wrapped tool calls with an optional per-run result cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;

use super::{ExecutionContext, ToolError, ToolInvoker, ToolResponse};
use crate::retry::{run_with_policy, CallPolicy};

/// What happened on one logical tool call.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub tool: String,
    pub result: Result<ToolResponse, ToolError>,
    pub attempts: u32,
    pub duration: Duration,
    /// Served from cache; not an invocation
    pub cached: bool,
}

impl CallOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Tokens to report, zero for cache hits and failures.
    pub fn billable_tokens(&self) -> u64 {
        match (&self.result, self.cached) {
            (Ok(r), false) => r.tokens,
            _ => 0,
        }
    }

    pub fn billable_cost(&self) -> f64 {
        match (&self.result, self.cached) {
            (Ok(r), false) => r.cost_usd,
            _ => 0.0,
        }
    }
}

/// Calls tools through an invoker under a [`CallPolicy`].
///
/// One caller lives for one run, so the cache never crosses runs.
pub struct ToolCaller {
    invoker: Arc<dyn ToolInvoker>,
    policy: CallPolicy,
    cache: Option<Mutex<HashMap<String, ToolResponse>>>,
}

impl ToolCaller {
    pub fn new(invoker: Arc<dyn ToolInvoker>, policy: CallPolicy, caching: bool) -> Self {
        Self {
            invoker,
            policy,
            cache: caching.then(|| Mutex::new(HashMap::new())),
        }
    }

    pub fn policy(&self) -> &CallPolicy {
        &self.policy
    }

    /// Execute `tool` with retry and timeout, consulting the cache first.
    pub async fn call(&self, tool: &str, params: Value, ctx: &ExecutionContext) -> CallOutcome {
        let key = format!("{}:{}", tool, params);
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.lock().await.get(&key) {
                tracing::debug!(tool = %tool, session_id = %ctx.session_id, "Tool cache hit");
                return CallOutcome {
                    tool: tool.to_string(),
                    result: Ok(hit.clone()),
                    attempts: 0,
                    duration: Duration::ZERO,
                    cached: true,
                };
            }
        }

        let request = ctx.for_request();
        let invoker = Arc::clone(&self.invoker);
        let attempted = run_with_policy(&self.policy, tool, |_| {
            let invoker = Arc::clone(&invoker);
            let params = params.clone();
            let request = request.clone();
            let tool = tool.to_string();
            async move { invoker.execute(&tool, params, &request).await }
        })
        .await;

        let result = attempted.result.map_err(|mut e| {
            if e.tool.is_empty() {
                e.tool = tool.to_string();
            }
            e
        });

        if let (Some(cache), Ok(response)) = (&self.cache, &result) {
            cache.lock().await.insert(key, response.clone());
        }
        if let Err(e) = &result {
            tracing::warn!(
                tool = %tool,
                session_id = %ctx.session_id,
                attempts = attempted.attempts,
                error = %e,
                "Tool call failed"
            );
        }

        CallOutcome {
            tool: tool.to_string(),
            result,
            attempts: attempted.attempts,
            duration: attempted.elapsed,
            cached: false,
        }
    }

    /// Execute several calls, concurrently when `parallel` is set.
    ///
    /// Outcomes are returned in request order. One failure does not affect
    /// the others.
    pub async fn call_many(
        &self,
        calls: Vec<(String, Value)>,
        ctx: &ExecutionContext,
        parallel: bool,
    ) -> Vec<CallOutcome> {
        if parallel {
            let futures = calls
                .iter()
                .map(|(tool, params)| self.call(tool, params.clone(), ctx));
            futures::future::join_all(futures).await
        } else {
            let mut outcomes = Vec::with_capacity(calls.len());
            for (tool, params) in calls {
                outcomes.push(self.call(&tool, params, ctx).await);
            }
            outcomes
        }
    }
}
