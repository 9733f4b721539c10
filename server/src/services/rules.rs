//! Rule Library
//!
//! Immutable per-domain classification tables. Analyzers never embed numeric
//! thresholds inline; everything they classify against lives here and is
//! overridable from the `[rules]` section of the configuration file. Built
//! once at process start, read-only afterwards.

use crate::config::RulesConfig;
use once_cell::sync::OnceCell;
use serde::Serialize;

static LIBRARY: OnceCell<RuleLibrary> = OnceCell::new();

/// Install the process-wide library. Later calls are ignored; tests build
/// their own instances instead of going through the global.
pub fn init(config: &RulesConfig) {
    let _ = LIBRARY.set(RuleLibrary::from_config(config));
}

/// The process-wide library, defaulting when [`init`] was never called.
pub fn library() -> &'static RuleLibrary {
    LIBRARY.get_or_init(RuleLibrary::default)
}

// ============================================================================
// Bands
// ============================================================================

/// Totally ordered classification band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Band {
    Excellent,
    Normal,
    Warning,
    Critical,
    Emergency,
}

impl Band {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Normal => "normal",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Emergency => "emergency",
        }
    }
}

// ============================================================================
// Compaction
// ============================================================================

#[derive(Debug, Clone)]
pub struct CompactionRules {
    /// Compaction-score band boundaries (lower bounds except excellent).
    pub score_excellent: f64,
    pub score_normal: f64,
    pub score_warning: f64,
    pub score_critical: f64,
    pub score_emergency: f64,

    /// Thread sizing relative to BE cores.
    pub min_threads_per_core: f64,
    pub max_threads_per_core: f64,
    pub abs_min_threads: i64,
    pub abs_max_threads: i64,

    /// Task execution health.
    pub max_healthy_tasks_per_node: i64,
    pub slow_task_hours: f64,
    pub max_task_retries: i64,
    pub healthy_success_pct: f64,

    /// FE `lake_compaction_max_tasks` semantics.
    pub fe_disabled_value: i64,
    pub fe_adaptive_value: i64,
    pub fe_adaptive_multiplier: i64,
    pub min_recommended_max_tasks: i64,

    /// Capacity saturation thresholds against effective max tasks.
    pub capacity_warning_ratio: f64,
    pub capacity_critical_ratio: f64,
    pub capacity_headroom: f64,
}

impl Default for CompactionRules {
    fn default() -> Self {
        Self {
            score_excellent: 10.0,
            score_normal: 50.0,
            score_warning: 100.0,
            score_critical: 500.0,
            score_emergency: 1000.0,
            min_threads_per_core: 0.25,
            max_threads_per_core: 0.5,
            abs_min_threads: 4,
            abs_max_threads: 64,
            max_healthy_tasks_per_node: 8,
            slow_task_hours: 2.0,
            max_task_retries: 5,
            healthy_success_pct: 90.0,
            fe_disabled_value: 0,
            fe_adaptive_value: -1,
            fe_adaptive_multiplier: 16,
            min_recommended_max_tasks: 64,
            capacity_warning_ratio: 0.8,
            capacity_critical_ratio: 1.5,
            capacity_headroom: 1.5,
        }
    }
}

impl CompactionRules {
    /// Classify a partition's max compaction score.
    pub fn classify_score(&self, score: f64) -> Band {
        if score >= self.score_emergency {
            Band::Emergency
        } else if score >= self.score_critical {
            Band::Critical
        } else if score >= self.score_warning {
            Band::Warning
        } else if score < self.score_excellent {
            Band::Excellent
        } else {
            Band::Normal
        }
    }

    /// Effective task capacity for a `lake_compaction_max_tasks` setting.
    /// Adaptive (-1) scales with the compute-node count; 0 disables.
    pub fn effective_max_tasks(&self, configured: i64, node_count: i64) -> i64 {
        if configured == self.fe_adaptive_value {
            self.fe_adaptive_multiplier * node_count
        } else if configured <= self.fe_disabled_value {
            0
        } else {
            configured
        }
    }

    /// Recommended thread count for a BE with the given core count.
    pub fn recommended_threads(&self, cores: i64) -> (i64, i64) {
        let min = ((cores as f64 * self.min_threads_per_core).round() as i64)
            .clamp(self.abs_min_threads, self.abs_max_threads);
        let max = ((cores as f64 * self.max_threads_per_core).round() as i64)
            .clamp(self.abs_min_threads, self.abs_max_threads);
        (min, max)
    }

    /// Composite predicate: does a BE's compaction thread count violate the
    /// per-core band? Returns the reason and the violation band
    /// (`Warning` when undersized, `Normal` when merely oversized).
    pub fn threads_violation(&self, threads: i64, cores: i64) -> Option<(String, Band)> {
        let (min, max) = self.recommended_threads(cores);
        if threads < min {
            Some((
                format!(
                    "{} compaction thread(s) configured; {}-{} recommended for {} cores",
                    threads, min, max, cores
                ),
                Band::Warning,
            ))
        } else if threads > max {
            Some((
                format!(
                    "{} compaction threads configured; above the {}-{} band for {} cores",
                    threads, min, max, cores
                ),
                Band::Normal,
            ))
        } else {
            None
        }
    }
}

// ============================================================================
// Ingestion
// ============================================================================

#[derive(Debug, Clone)]
pub struct IngestionRules {
    pub pending_critical: usize,
    pub pending_warning: usize,
    pub long_running_hours: f64,
    pub failure_rate_warning_pct: f64,
    pub failure_rate_critical_pct: f64,
    /// Below this sample size the failure-rate pass reports insufficient data.
    pub min_jobs_for_rate: usize,
    pub frequency_per_min_warning: f64,
    pub history_dedup_window_secs: u64,
}

impl Default for IngestionRules {
    fn default() -> Self {
        Self {
            pending_critical: 10,
            pending_warning: 5,
            long_running_hours: 2.0,
            failure_rate_warning_pct: 10.0,
            failure_rate_critical_pct: 30.0,
            min_jobs_for_rate: 5,
            frequency_per_min_warning: 60.0,
            history_dedup_window_secs: 120,
        }
    }
}

// ============================================================================
// Memory
// ============================================================================

#[derive(Debug, Clone)]
pub struct MemoryRules {
    pub usage_pct_excellent: f64,
    pub usage_pct_normal: f64,
    pub usage_pct_warning: f64,
    pub usage_pct_critical: f64,
    /// One tracker holding more than this share of process memory is worth a
    /// finding on its own.
    pub tracker_share_warning: f64,
}

impl Default for MemoryRules {
    fn default() -> Self {
        Self {
            usage_pct_excellent: 60.0,
            usage_pct_normal: 75.0,
            usage_pct_warning: 85.0,
            usage_pct_critical: 95.0,
            tracker_share_warning: 0.5,
        }
    }
}

impl MemoryRules {
    pub fn classify_usage(&self, pct: f64) -> Band {
        if pct >= self.usage_pct_critical {
            Band::Critical
        } else if pct >= self.usage_pct_warning {
            Band::Warning
        } else if pct < self.usage_pct_excellent {
            Band::Excellent
        } else {
            Band::Normal
        }
    }
}

// ============================================================================
// Query performance
// ============================================================================

#[derive(Debug, Clone)]
pub struct QueryPerfRules {
    pub slow_query_warning_secs: f64,
    pub slow_query_critical_secs: f64,
    pub scan_rows_large: i64,
    pub queue_pending_warning: usize,
}

impl Default for QueryPerfRules {
    fn default() -> Self {
        Self {
            slow_query_warning_secs: 60.0,
            slow_query_critical_secs: 300.0,
            scan_rows_large: 1_000_000_000,
            queue_pending_warning: 10,
        }
    }
}

// ============================================================================
// Operations
// ============================================================================

#[derive(Debug, Clone)]
pub struct OperationsRules {
    pub disk_used_pct_warning: f64,
    pub disk_used_pct_critical: f64,
    pub tablet_skew_ratio: f64,
}

impl Default for OperationsRules {
    fn default() -> Self {
        Self { disk_used_pct_warning: 85.0, disk_used_pct_critical: 95.0, tablet_skew_ratio: 2.0 }
    }
}

impl OperationsRules {
    pub fn classify_disk(&self, used_pct: f64) -> Band {
        if used_pct >= self.disk_used_pct_critical {
            Band::Critical
        } else if used_pct >= self.disk_used_pct_warning {
            Band::Warning
        } else {
            Band::Normal
        }
    }
}

// ============================================================================
// Load profile analysis
// ============================================================================

#[derive(Debug, Clone)]
pub struct ProfileRules {
    /// A single wait component above this share of AddChunkTime is a
    /// bottleneck finding.
    pub wait_ratio: f64,
    /// Replica sync is held to a tighter bound.
    pub replica_wait_ratio: f64,
    /// Above this share the bottleneck escalates to critical.
    pub severe_wait_ratio: f64,
    /// Unaccounted share of the summary total worth a missing_time finding.
    pub unaccounted_ratio: f64,
}

impl Default for ProfileRules {
    fn default() -> Self {
        Self {
            wait_ratio: 0.30,
            replica_wait_ratio: 0.20,
            severe_wait_ratio: 0.60,
            unaccounted_ratio: 0.50,
        }
    }
}

// ============================================================================
// Library
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct RuleLibrary {
    pub compaction: CompactionRules,
    pub ingestion: IngestionRules,
    pub memory: MemoryRules,
    pub query_perf: QueryPerfRules,
    pub operations: OperationsRules,
    pub profile: ProfileRules,
}

impl RuleLibrary {
    pub fn from_config(config: &RulesConfig) -> Self {
        let mut lib = Self::default();

        macro_rules! apply {
            ($dst:expr, $src:expr) => {
                if let Some(v) = $src {
                    $dst = v;
                }
            };
        }

        let c = &config.compaction;
        apply!(lib.compaction.score_excellent, c.score_excellent);
        apply!(lib.compaction.score_normal, c.score_normal);
        apply!(lib.compaction.score_warning, c.score_warning);
        apply!(lib.compaction.score_critical, c.score_critical);
        apply!(lib.compaction.score_emergency, c.score_emergency);
        apply!(lib.compaction.min_threads_per_core, c.min_threads_per_core);
        apply!(lib.compaction.max_threads_per_core, c.max_threads_per_core);
        apply!(lib.compaction.abs_min_threads, c.abs_min_threads);
        apply!(lib.compaction.abs_max_threads, c.abs_max_threads);
        apply!(lib.compaction.max_healthy_tasks_per_node, c.max_healthy_tasks_per_node);
        apply!(lib.compaction.slow_task_hours, c.slow_task_hours);
        apply!(lib.compaction.max_task_retries, c.max_task_retries);
        apply!(lib.compaction.healthy_success_pct, c.healthy_success_pct);
        apply!(lib.compaction.min_recommended_max_tasks, c.min_recommended_max_tasks);

        let i = &config.ingestion;
        apply!(lib.ingestion.pending_critical, i.pending_critical);
        apply!(lib.ingestion.pending_warning, i.pending_warning);
        apply!(lib.ingestion.long_running_hours, i.long_running_hours);
        apply!(lib.ingestion.failure_rate_warning_pct, i.failure_rate_warning_pct);
        apply!(lib.ingestion.failure_rate_critical_pct, i.failure_rate_critical_pct);
        apply!(lib.ingestion.min_jobs_for_rate, i.min_jobs_for_rate);
        apply!(lib.ingestion.frequency_per_min_warning, i.frequency_per_min_warning);

        let m = &config.memory;
        apply!(lib.memory.usage_pct_excellent, m.usage_pct_excellent);
        apply!(lib.memory.usage_pct_normal, m.usage_pct_normal);
        apply!(lib.memory.usage_pct_warning, m.usage_pct_warning);
        apply!(lib.memory.usage_pct_critical, m.usage_pct_critical);
        apply!(lib.memory.tracker_share_warning, m.tracker_share_warning);

        let q = &config.query_perf;
        apply!(lib.query_perf.slow_query_warning_secs, q.slow_query_warning_secs);
        apply!(lib.query_perf.slow_query_critical_secs, q.slow_query_critical_secs);
        apply!(lib.query_perf.scan_rows_large, q.scan_rows_large);
        apply!(lib.query_perf.queue_pending_warning, q.queue_pending_warning);

        let o = &config.operations;
        apply!(lib.operations.disk_used_pct_warning, o.disk_used_pct_warning);
        apply!(lib.operations.disk_used_pct_critical, o.disk_used_pct_critical);
        apply!(lib.operations.tablet_skew_ratio, o.tablet_skew_ratio);

        let p = &config.profile;
        apply!(lib.profile.wait_ratio, p.wait_ratio);
        apply!(lib.profile.replica_wait_ratio, p.replica_wait_ratio);
        apply!(lib.profile.severe_wait_ratio, p.severe_wait_ratio);
        apply!(lib.profile.unaccounted_ratio, p.unaccounted_ratio);

        lib
    }

    /// Fold the configured dedup window into the library (config value wins).
    pub fn with_dedup_window(mut self, secs: u64) -> Self {
        self.ingestion.history_dedup_window_secs = secs;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_bands_match_thresholds() {
        let rules = CompactionRules::default();
        assert_eq!(rules.classify_score(5.0), Band::Excellent);
        assert_eq!(rules.classify_score(30.0), Band::Normal);
        assert_eq!(rules.classify_score(100.0), Band::Warning);
        assert_eq!(rules.classify_score(500.0), Band::Critical);
        assert_eq!(rules.classify_score(1500.0), Band::Emergency);
    }

    #[test]
    fn classify_is_idempotent_off_boundary() {
        // Re-classifying a value strictly inside a band yields the same band.
        let rules = CompactionRules::default();
        for x in [3.0, 25.0, 120.0, 700.0, 2000.0] {
            let band = rules.classify_score(x);
            // probe a nearby value in the same band
            assert_eq!(rules.classify_score(x + 0.5), band);
        }
    }

    #[test]
    fn effective_max_tasks_semantics() {
        let rules = CompactionRules::default();
        assert_eq!(rules.effective_max_tasks(-1, 4), 64); // adaptive
        assert_eq!(rules.effective_max_tasks(0, 4), 0); // disabled
        assert_eq!(rules.effective_max_tasks(32, 4), 32);
    }

    #[test]
    fn recommended_threads_clamps() {
        let rules = CompactionRules::default();
        assert_eq!(rules.recommended_threads(8), (4, 4));
        assert_eq!(rules.recommended_threads(64), (16, 32));
        assert_eq!(rules.recommended_threads(512), (64, 64));
    }

    #[test]
    fn threads_violation_bands() {
        let rules = CompactionRules::default();
        // 16 cores -> band 4..8
        let (reason, band) = rules.threads_violation(2, 16).unwrap();
        assert_eq!(band, Band::Warning);
        assert!(reason.contains("4-8"));
        let (_, band) = rules.threads_violation(20, 16).unwrap();
        assert_eq!(band, Band::Normal);
        assert!(rules.threads_violation(6, 16).is_none());
    }

    #[test]
    fn config_overrides_apply() {
        let mut config = RulesConfig::default();
        config.compaction.score_warning = Some(80.0);
        config.ingestion.pending_critical = Some(20);
        let lib = RuleLibrary::from_config(&config);
        assert_eq!(lib.compaction.score_warning, 80.0);
        assert_eq!(lib.ingestion.pending_critical, 20);
        // untouched values keep defaults
        assert_eq!(lib.compaction.score_critical, 500.0);
    }

    #[test]
    fn bands_are_totally_ordered() {
        assert!(Band::Emergency > Band::Critical);
        assert!(Band::Critical > Band::Warning);
        assert!(Band::Warning > Band::Normal);
        assert!(Band::Normal > Band::Excellent);
    }
}
