//! Progress events streamed to the caller.
//!
//! Events are broadcast in execution order. Slow subscribers may lag; the
//! stream adapter reports lag as an [`ProgressEvent::Error`] instead of
//! silently skipping.

use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::agents::PhaseType;
use crate::budget::CapabilityTier;
use crate::mode::InvestigationMode;
use crate::report::{InvestigationResult, PhaseMetrics};
use crate::session::SessionId;

/// A structured event emitted during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    RunStarted {
        session_id: Option<SessionId>,
        subject_id: String,
        mode: InvestigationMode,
    },
    PhaseStarted {
        session_id: SessionId,
        phase: PhaseType,
        tier: CapabilityTier,
        reason: String,
    },
    PhaseCompleted {
        session_id: SessionId,
        metrics: PhaseMetrics,
    },
    /// Model text produced during a phase
    ReasoningText {
        session_id: SessionId,
        phase: PhaseType,
        content: String,
    },
    Warning {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
        message: String,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
        message: String,
    },
    RunCompleted {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
        result: Box<InvestigationResult>,
    },
}

impl ProgressEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::PhaseStarted { .. } => "phase_started",
            Self::PhaseCompleted { .. } => "phase_completed",
            Self::ReasoningText { .. } => "reasoning_text",
            Self::Warning { .. } => "warning",
            Self::Error { .. } => "error",
            Self::RunCompleted { .. } => "run_completed",
        }
    }
}

/// Fan-out point for progress events.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<ProgressEvent>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: ProgressEvent) {
        tracing::trace!(event = event.event_name(), "Progress event");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    /// Subscribe as a stream that ends when every sink clone is dropped.
    pub fn subscribe_stream(&self) -> impl Stream<Item = ProgressEvent> {
        let mut rx = self.tx.subscribe();
        async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        yield ProgressEvent::Error {
                            session_id: None,
                            message: format!("event stream lagged; {} events were dropped", skipped),
                        };
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new(1024)
    }
}
