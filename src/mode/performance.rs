//! Learned per-mode performance, folded with exponential moving averages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::InvestigationMode;

/// Running performance of one mode.
///
/// # Invariants
/// - `success_rate` and `avg_quality` stay in `[0, 1]`
/// - `samples` counts every observation, including failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModePerformance {
    pub mode: InvestigationMode,
    pub samples: u64,
    pub success_rate: f64,
    pub avg_duration_ms: f64,
    pub avg_cost_usd: f64,
    pub avg_quality: f64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ModePerformance {
    /// Priors used before any run has been observed.
    pub fn prior(mode: InvestigationMode) -> Self {
        match mode {
            InvestigationMode::Agentic => Self {
                mode,
                samples: 0,
                success_rate: 0.7,
                avg_duration_ms: 120_000.0,
                avg_cost_usd: 0.50,
                avg_quality: 0.7,
                updated_at: None,
            },
            InvestigationMode::Deterministic => Self {
                mode,
                samples: 0,
                success_rate: 0.9,
                avg_duration_ms: 30_000.0,
                avg_cost_usd: 0.05,
                avg_quality: 0.5,
                updated_at: None,
            },
        }
    }

    /// Fold one observation in.
    ///
    /// # Formula
    /// `avg = (1 - alpha) * avg + alpha * observed` for every tracked average.
    /// Quality is left unchanged when not supplied.
    pub fn observe(
        &mut self,
        alpha: f64,
        success: bool,
        duration_ms: u64,
        cost_usd: f64,
        quality: Option<f64>,
    ) {
        let alpha = alpha.clamp(0.0, 1.0);
        let ema = |old: f64, new: f64| (1.0 - alpha) * old + alpha * new;

        self.success_rate = ema(self.success_rate, if success { 1.0 } else { 0.0 }).clamp(0.0, 1.0);
        self.avg_duration_ms = ema(self.avg_duration_ms, duration_ms as f64);
        self.avg_cost_usd = ema(self.avg_cost_usd, cost_usd.max(0.0));
        if let Some(q) = quality {
            self.avg_quality = ema(self.avg_quality, q.clamp(0.0, 1.0)).clamp(0.0, 1.0);
        }
        self.samples += 1;
        self.updated_at = Some(Utc::now());
    }
}
