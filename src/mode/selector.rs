//! Up-front choice between agentic investigation and the fixed pipeline.
//!
//! # Algorithm
//! 1. An explicit user preference is obeyed with confidence 1.0
//! 2. No reasoning quota forces deterministic
//! 3. Repeated prior agentic failures force deterministic
//! 4. Otherwise each factor adds weight to one side; the higher score wins
//!    and confidence is the normalized gap between the scores
//!
//! The selector also learns per-mode performance and advises mid-run
//! fallback. Advice only: the orchestrator decides what to do with it.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::performance::ModePerformance;
use super::types::{InvestigationMode, ModeSelectionFactors, ModeSelectionResult};

/// Errors persisting learned mode statistics.
#[derive(Debug, Error)]
pub enum ModeStatsError {
    #[error("Failed to access mode stats file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid mode stats JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Tunables of the selector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeSelectorConfig {
    /// EMA smoothing factor
    pub ema_alpha: f64,
    /// Samples before the agentic success rate counts as evidence
    pub min_samples: u64,
    /// Prior agentic failures at which agentic is no longer attempted
    pub max_prior_failures: u32,
    /// Agentic confidence below which fallback is recommended
    pub low_confidence: f64,
    /// Errors in one run that trigger fallback advice
    pub fallback_error_count: u32,
    /// Multiple of the agentic average duration that triggers fallback advice
    pub fallback_duration_factor: f64,
    /// Absolute token ceiling that triggers fallback advice
    pub fallback_token_ceiling: u64,
}

impl Default for ModeSelectorConfig {
    fn default() -> Self {
        Self {
            ema_alpha: 0.1,
            min_samples: 5,
            max_prior_failures: 2,
            low_confidence: 0.3,
            fallback_error_count: 3,
            fallback_duration_factor: 2.0,
            fallback_token_ceiling: 150_000,
        }
    }
}

/// Learned statistics, the persisted part of a selector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeStats {
    pub agentic: ModePerformance,
    pub deterministic: ModePerformance,
}

impl Default for ModeStats {
    fn default() -> Self {
        Self {
            agentic: ModePerformance::prior(InvestigationMode::Agentic),
            deterministic: ModePerformance::prior(InvestigationMode::Deterministic),
        }
    }
}

/// Picks a mode per run and learns from outcomes.
#[derive(Debug, Clone, Default)]
pub struct ModeSelector {
    config: ModeSelectorConfig,
    stats: ModeStats,
}

impl ModeSelector {
    pub fn new(config: ModeSelectorConfig) -> Self {
        Self {
            config,
            stats: ModeStats::default(),
        }
    }

    pub fn with_stats(config: ModeSelectorConfig, stats: ModeStats) -> Self {
        Self { config, stats }
    }

    pub fn config(&self) -> &ModeSelectorConfig {
        &self.config
    }

    pub fn stats(&self) -> &ModeStats {
        &self.stats
    }

    pub fn performance(&self, mode: InvestigationMode) -> &ModePerformance {
        match mode {
            InvestigationMode::Agentic => &self.stats.agentic,
            InvestigationMode::Deterministic => &self.stats.deterministic,
        }
    }

    /// Decide how the run should proceed.
    pub fn select_mode(&self, factors: &ModeSelectionFactors) -> ModeSelectionResult {
        if let Some(mode) = factors.user_preference {
            return ModeSelectionResult::decided(
                self.performance(mode),
                format!("user preference: {}", mode),
            );
        }
        if !factors.quota_available {
            return ModeSelectionResult::decided(
                self.performance(InvestigationMode::Deterministic),
                "no reasoning quota available",
            );
        }
        if factors.prior_failures >= self.config.max_prior_failures {
            return ModeSelectionResult::decided(
                self.performance(InvestigationMode::Deterministic),
                format!("{} prior agentic failures", factors.prior_failures),
            );
        }

        let mut agentic = 0u32;
        let mut deterministic = 0u32;
        let mut reasoning = Vec::new();
        let mut vote = |mode: InvestigationMode, weight: u32, why: &str| {
            match mode {
                InvestigationMode::Agentic => agentic += weight,
                InvestigationMode::Deterministic => deterministic += weight,
            }
            reasoning.push(format!("+{} {}: {}", mode, weight, why));
        };

        if factors.has_anomaly {
            vote(InvestigationMode::Agentic, 3, "anomalous outperformance");
        }
        if factors.has_pattern_density {
            vote(InvestigationMode::Agentic, 2, "dense comparable content");
        }
        if factors.has_competitive_data {
            vote(InvestigationMode::Agentic, 2, "competitive data available");
        } else {
            vote(InvestigationMode::Deterministic, 1, "no competitive data");
        }
        if factors.has_semantic_density {
            vote(InvestigationMode::Agentic, 3, "semantic neighbours are dense");
        } else {
            vote(InvestigationMode::Deterministic, 2, "sparse semantic neighbours");
        }
        let agentic_avg = Duration::from_millis(self.stats.agentic.avg_duration_ms.max(0.0) as u64);
        if let Some(limit) = factors.time_constraint {
            if limit < agentic_avg {
                vote(
                    InvestigationMode::Deterministic,
                    3,
                    "time constraint shorter than agentic average",
                );
            }
        }
        if self.stats.agentic.success_rate > 0.8 && self.stats.agentic.samples >= self.config.min_samples {
            vote(InvestigationMode::Agentic, 1, "agentic history is strong");
        }

        let total = agentic + deterministic;
        let confidence = if total == 0 {
            0.0
        } else {
            agentic.abs_diff(deterministic) as f64 / total as f64
        };
        let mode = if agentic > deterministic {
            InvestigationMode::Agentic
        } else {
            InvestigationMode::Deterministic
        };
        let fallback_recommended =
            mode == InvestigationMode::Agentic && confidence < self.config.low_confidence;

        tracing::debug!(
            mode = %mode,
            agentic,
            deterministic,
            confidence,
            fallback_recommended,
            "Selected investigation mode"
        );

        let perf = self.performance(mode);
        ModeSelectionResult {
            mode,
            confidence,
            reasoning,
            fallback_recommended,
            agentic_score: agentic,
            deterministic_score: deterministic,
            estimated_cost_usd: perf.avg_cost_usd,
            estimated_duration_ms: perf.avg_duration_ms.max(0.0) as u64,
        }
    }

    /// Fold a finished run into the mode's statistics.
    pub fn update_performance(
        &mut self,
        mode: InvestigationMode,
        success: bool,
        duration: Duration,
        cost_usd: f64,
        quality: Option<f64>,
    ) {
        let alpha = self.config.ema_alpha;
        let perf = match mode {
            InvestigationMode::Agentic => &mut self.stats.agentic,
            InvestigationMode::Deterministic => &mut self.stats.deterministic,
        };
        perf.observe(alpha, success, duration.as_millis() as u64, cost_usd, quality);
    }

    /// Whether a running agentic investigation should give up.
    ///
    /// Always `false` for deterministic runs.
    pub fn should_fallback(
        &self,
        mode: InvestigationMode,
        elapsed: Duration,
        tokens_used: u64,
        error_count: u32,
    ) -> bool {
        if mode != InvestigationMode::Agentic {
            return false;
        }
        let limit_ms = self.stats.agentic.avg_duration_ms * self.config.fallback_duration_factor;
        error_count >= self.config.fallback_error_count
            || elapsed.as_millis() as f64 > limit_ms
            || tokens_used > self.config.fallback_token_ceiling
    }

    /// Load learned statistics from a JSON file.
    pub async fn load_from_path(config: ModeSelectorConfig, path: &Path) -> Result<Self, ModeStatsError> {
        let content = tokio::fs::read_to_string(path).await?;
        let stats: ModeStats = serde_json::from_str(&content)?;
        Ok(Self::with_stats(config, stats))
    }

    /// Save learned statistics as pretty JSON, creating parent directories.
    pub async fn save_to_path(&self, path: &Path) -> Result<(), ModeStatsError> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }
        let content = serde_json::to_string_pretty(&self.stats)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_agentic() -> ModeSelectionFactors {
        ModeSelectionFactors {
            has_anomaly: true,
            has_pattern_density: true,
            has_competitive_data: true,
            has_semantic_density: true,
            quota_available: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_user_preference_obeyed() {
        let selector = ModeSelector::default();
        let mut factors = all_agentic();
        factors.user_preference = Some(InvestigationMode::Deterministic);

        let result = selector.select_mode(&factors);
        assert_eq!(result.mode, InvestigationMode::Deterministic);
        assert_eq!(result.confidence, 1.0);

        // Even with no quota
        factors.user_preference = Some(InvestigationMode::Agentic);
        factors.quota_available = false;
        let result = selector.select_mode(&factors);
        assert_eq!(result.mode, InvestigationMode::Agentic);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_no_quota_and_prior_failures() {
        let selector = ModeSelector::default();

        let mut factors = all_agentic();
        factors.quota_available = false;
        assert_eq!(selector.select_mode(&factors).mode, InvestigationMode::Deterministic);

        let mut factors = all_agentic();
        factors.prior_failures = 2;
        assert_eq!(selector.select_mode(&factors).mode, InvestigationMode::Deterministic);

        factors.prior_failures = 1;
        assert_eq!(selector.select_mode(&factors).mode, InvestigationMode::Agentic);
    }

    #[test]
    fn test_all_agentic_factors() {
        let result = ModeSelector::default().select_mode(&all_agentic());

        assert_eq!(result.mode, InvestigationMode::Agentic);
        assert_eq!(result.agentic_score, 10);
        assert_eq!(result.deterministic_score, 0);
        assert_eq!(result.confidence, 1.0);
        assert!(!result.fallback_recommended);
        assert!(result.reasoning.iter().any(|r| r.starts_with("+agentic")));
    }

    #[test]
    fn test_sparse_factors_choose_deterministic() {
        let factors = ModeSelectionFactors {
            quota_available: true,
            time_constraint: Some(Duration::from_secs(10)),
            ..Default::default()
        };
        let result = ModeSelector::default().select_mode(&factors);
        assert_eq!(result.mode, InvestigationMode::Deterministic);
        assert_eq!(result.deterministic_score, 6);
        assert!(result.reasoning.iter().any(|r| r.starts_with("+deterministic 3")));
    }

    #[test]
    fn test_low_confidence_agentic_recommends_fallback() {
        // anomaly +3 vs no competitive +1, no semantic +2: 3 vs 3 -> deterministic on tie
        let mut factors = ModeSelectionFactors {
            has_anomaly: true,
            quota_available: true,
            ..Default::default()
        };
        assert_eq!(
            ModeSelector::default().select_mode(&factors).mode,
            InvestigationMode::Deterministic
        );

        // 5 vs 3: confidence 0.25
        factors.has_pattern_density = true;
        let result = ModeSelector::default().select_mode(&factors);
        assert_eq!(result.mode, InvestigationMode::Agentic);
        assert!((result.confidence - 0.25).abs() < 1e-9);
        assert!(result.fallback_recommended);
    }

    #[test]
    fn test_history_bonus_needs_samples() {
        let mut selector = ModeSelector::default();
        for _ in 0..4 {
            selector.update_performance(InvestigationMode::Agentic, true, Duration::from_secs(60), 0.2, None);
        }
        assert_eq!(selector.select_mode(&all_agentic()).agentic_score, 10);

        for _ in 0..20 {
            selector.update_performance(InvestigationMode::Agentic, true, Duration::from_secs(60), 0.2, None);
        }
        assert!(selector.performance(InvestigationMode::Agentic).success_rate > 0.8);
        assert_eq!(selector.select_mode(&all_agentic()).agentic_score, 11);
    }

    #[test]
    fn test_update_performance_increments_samples() {
        let mut selector = ModeSelector::default();
        selector.update_performance(InvestigationMode::Deterministic, false, Duration::ZERO, 0.0, Some(0.1));
        selector.update_performance(InvestigationMode::Deterministic, true, Duration::ZERO, 0.0, None);
        assert_eq!(selector.performance(InvestigationMode::Deterministic).samples, 2);
        assert_eq!(selector.performance(InvestigationMode::Agentic).samples, 0);
    }

    #[test]
    fn test_estimate_follows_learned_averages() {
        let mut selector = ModeSelector::default();
        let result = selector.select_mode(&all_agentic());
        assert_eq!(result.estimated_duration_ms, 120_000);
        assert!((result.estimated_cost_usd - 0.50).abs() < 1e-9);

        selector.update_performance(InvestigationMode::Agentic, true, Duration::from_secs(20), 0.10, None);
        // 0.9 * 120s + 0.1 * 20s, 0.9 * 0.50 + 0.1 * 0.10
        let result = selector.select_mode(&all_agentic());
        assert!(result.estimated_duration_ms.abs_diff(110_000) <= 1);
        assert!((result.estimated_cost_usd - 0.46).abs() < 1e-9);

        let mut factors = all_agentic();
        factors.quota_available = false;
        let result = selector.select_mode(&factors);
        assert_eq!(result.mode, InvestigationMode::Deterministic);
        assert_eq!(result.estimated_duration_ms, 30_000);
        assert!((result.estimated_cost_usd - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_should_fallback() {
        let selector = ModeSelector::default();
        let avg_ms = selector.performance(InvestigationMode::Agentic).avg_duration_ms as u64;
        let three_x = Duration::from_millis(avg_ms * 3);

        assert!(selector.should_fallback(InvestigationMode::Agentic, three_x, 0, 0));
        assert!(!selector.should_fallback(InvestigationMode::Deterministic, three_x, 0, 0));
        assert!(!selector.should_fallback(InvestigationMode::Agentic, Duration::from_secs(1), 0, 0));
        assert!(selector.should_fallback(InvestigationMode::Agentic, Duration::ZERO, 0, 3));
        assert!(selector.should_fallback(InvestigationMode::Agentic, Duration::ZERO, 150_001, 0));
        assert!(!selector.should_fallback(InvestigationMode::Agentic, Duration::ZERO, 150_000, 2));
    }

    #[tokio::test]
    async fn test_stats_persist_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("mode_stats.json");

        let mut selector = ModeSelector::default();
        selector.update_performance(InvestigationMode::Agentic, false, Duration::from_secs(400), 2.0, Some(0.2));
        selector.save_to_path(&path).await.unwrap();

        let loaded = ModeSelector::load_from_path(ModeSelectorConfig::default(), &path)
            .await
            .unwrap();
        assert_eq!(loaded.stats(), selector.stats());
    }

    #[tokio::test]
    async fn test_load_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = ModeSelector::load_from_path(ModeSelectorConfig::default(), &dir.path().join("none.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, ModeStatsError::Io(_)));
    }
}
