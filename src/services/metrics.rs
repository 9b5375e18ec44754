//! In-process counters surfaced on the metrics endpoint. Deliberately
//! simple atomics rather than a registry crate, matching the teacher's
//! hand-rolled `Metrics` struct.

use std::sync::atomic::{AtomicU64, Ordering};

pub struct Metrics {
    pub events_ingested: AtomicU64,
    pub events_processed: AtomicU64,
    pub events_failed: AtomicU64,
    pub scoring_applications: AtomicU64,
    pub intent_detections: AtomicU64,
    pub automation_actions: AtomicU64,
    pub routing_decisions: AtomicU64,
    pub jobs_retried: AtomicU64,
    pub jobs_dead_lettered: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            events_ingested: AtomicU64::new(0),
            events_processed: AtomicU64::new(0),
            events_failed: AtomicU64::new(0),
            scoring_applications: AtomicU64::new(0),
            intent_detections: AtomicU64::new(0),
            automation_actions: AtomicU64::new(0),
            routing_decisions: AtomicU64::new(0),
            jobs_retried: AtomicU64::new(0),
            jobs_dead_lettered: AtomicU64::new(0),
        }
    }

    pub fn inc_events_ingested(&self) {
        self.events_ingested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_events_processed(&self) {
        self.events_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_events_failed(&self) {
        self.events_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_scoring_applications(&self) {
        self.scoring_applications.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_intent_detections(&self) {
        self.intent_detections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_automation_actions(&self) {
        self.automation_actions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_routing_decisions(&self) {
        self.routing_decisions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_jobs_retried(&self) {
        self.jobs_retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_jobs_dead_lettered(&self) {
        self.jobs_dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    /// Export metrics in Prometheus text format.
    pub fn prometheus(&self) -> String {
        format!(
            r#"# HELP leadflow_events_ingested_total Total events accepted at ingest
# TYPE leadflow_events_ingested_total counter
leadflow_events_ingested_total {}

# HELP leadflow_events_processed_total Total events fully processed by the event worker
# TYPE leadflow_events_processed_total counter
leadflow_events_processed_total {}

# HELP leadflow_events_failed_total Total event jobs that exhausted retries
# TYPE leadflow_events_failed_total counter
leadflow_events_failed_total {}

# HELP leadflow_scoring_applications_total Total scoring rule applications
# TYPE leadflow_scoring_applications_total counter
leadflow_scoring_applications_total {}

# HELP leadflow_intent_detections_total Total intent signals recorded
# TYPE leadflow_intent_detections_total counter
leadflow_intent_detections_total {}

# HELP leadflow_automation_actions_total Total automation actions executed
# TYPE leadflow_automation_actions_total counter
leadflow_automation_actions_total {}

# HELP leadflow_routing_decisions_total Total routing jobs processed
# TYPE leadflow_routing_decisions_total counter
leadflow_routing_decisions_total {}

# HELP leadflow_jobs_retried_total Total job retries scheduled
# TYPE leadflow_jobs_retried_total counter
leadflow_jobs_retried_total {}

# HELP leadflow_jobs_dead_lettered_total Total jobs that exhausted max_attempts
# TYPE leadflow_jobs_dead_lettered_total counter
leadflow_jobs_dead_lettered_total {}
"#,
            self.events_ingested.load(Ordering::Relaxed),
            self.events_processed.load(Ordering::Relaxed),
            self.events_failed.load(Ordering::Relaxed),
            self.scoring_applications.load(Ordering::Relaxed),
            self.intent_detections.load(Ordering::Relaxed),
            self.automation_actions.load(Ordering::Relaxed),
            self.routing_decisions.load(Ordering::Relaxed),
            self.jobs_retried.load(Ordering::Relaxed),
            self.jobs_dead_lettered.load(Ordering::Relaxed),
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_increment() {
        let metrics = Metrics::new();
        assert_eq!(metrics.events_ingested.load(Ordering::Relaxed), 0);
        metrics.inc_events_ingested();
        metrics.inc_events_ingested();
        assert_eq!(metrics.events_ingested.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn prometheus_output_includes_all_counters() {
        let metrics = Metrics::new();
        metrics.inc_routing_decisions();
        let output = metrics.prometheus();
        assert!(output.contains("leadflow_routing_decisions_total 1"));
    }
}
