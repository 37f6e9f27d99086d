// Metrics hooks for pipeline runs.
//
// Callers install a global `PipelineMetrics` implementation via
// [`set_pipeline_metrics`]; every `Pipeline::run` then reports per-stage
// latency and the run totals. No metrics backend is assumed.
use std::sync::{Arc, RwLock};
use std::time::Duration;

use once_cell::sync::OnceCell;

/// Pipeline stages reported to [`PipelineMetrics::record_stage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Preprocess,
    Rules,
    Tfidf,
    Embedding,
    Rank,
    Validate,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Preprocess => "preprocess",
            Stage::Rules => "rules",
            Stage::Tfidf => "tfidf",
            Stage::Embedding => "embedding",
            Stage::Rank => "rank",
            Stage::Validate => "validate",
        }
    }
}

/// Metrics observer for pipeline runs.
pub trait PipelineMetrics: Send + Sync {
    /// Wall-clock time spent in one stage of one run.
    fn record_stage(&self, stage: Stage, latency: Duration);

    /// Totals for a finished run: `traces` ranked entries, `orphans` orphan
    /// children, `degraded` children with a failed embedding.
    fn record_run(&self, latency: Duration, traces: usize, orphans: usize, degraded: usize);
}

fn metrics_lock() -> &'static RwLock<Option<Arc<dyn PipelineMetrics>>> {
    static METRICS: OnceCell<RwLock<Option<Arc<dyn PipelineMetrics>>>> = OnceCell::new();
    METRICS.get_or_init(|| RwLock::new(None))
}

pub(crate) fn metrics_recorder() -> Option<Arc<dyn PipelineMetrics>> {
    let guard = metrics_lock()
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    guard.clone()
}

/// Install or clear the global pipeline metrics recorder.
pub fn set_pipeline_metrics(recorder: Option<Arc<dyn PipelineMetrics>>) {
    let mut guard = metrics_lock()
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = recorder;
}

pub(crate) fn record_stage(stage: Stage, latency: Duration) {
    if let Some(recorder) = metrics_recorder() {
        recorder.record_stage(stage, latency);
    }
}
