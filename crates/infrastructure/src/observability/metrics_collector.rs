//! Metrics collector for the scheduling engine
//!
//! Handles are registered against whatever global recorder is installed
//! (the Prometheus exporter in production, a no-op recorder in tests).

use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};
use tracing::debug;

/// Metrics collector shared by the dispatcher and the import runner
pub struct MetricsCollector {
    // Scheduled event metrics
    events_fired_total: Counter,
    event_fire_failures_total: Counter,
    event_fire_duration: Histogram,
    due_events: Gauge,
    dispatch_cycle_duration: Histogram,

    // Import pipeline metrics
    import_steps_total: Counter,
    import_step_duration: Histogram,
    import_issues_created_total: Counter,
    import_mismatches_total: Counter,
    import_retries_total: Counter,
    import_jobs_succeeded_total: Counter,
    import_jobs_failed_total: Counter,
    import_cycle_duration: Histogram,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            events_fired_total: counter!("scheduler_events_fired_total"),
            event_fire_failures_total: counter!("scheduler_event_fire_failures_total"),
            event_fire_duration: histogram!("scheduler_event_fire_duration_seconds"),
            due_events: gauge!("scheduler_due_events"),
            dispatch_cycle_duration: histogram!("scheduler_dispatch_cycle_duration_seconds"),
            import_steps_total: counter!("scheduler_import_steps_total"),
            import_step_duration: histogram!("scheduler_import_step_duration_seconds"),
            import_issues_created_total: counter!("scheduler_import_issues_created_total"),
            import_mismatches_total: counter!("scheduler_import_mismatches_total"),
            import_retries_total: counter!("scheduler_import_retries_total"),
            import_jobs_succeeded_total: counter!("scheduler_import_jobs_succeeded_total"),
            import_jobs_failed_total: counter!("scheduler_import_jobs_failed_total"),
            import_cycle_duration: histogram!("scheduler_import_cycle_duration_seconds"),
        }
    }

    // Scheduled event metrics

    pub fn record_event_fired(&self, duration_seconds: f64) {
        self.events_fired_total.increment(1);
        self.event_fire_duration.record(duration_seconds);
    }

    pub fn record_event_fire_failure(&self, duration_seconds: f64) {
        self.event_fire_failures_total.increment(1);
        self.event_fire_duration.record(duration_seconds);
    }

    pub fn update_due_events(&self, count: f64) {
        self.due_events.set(count);
    }

    pub fn record_dispatch_cycle(&self, duration_seconds: f64) {
        self.dispatch_cycle_duration.record(duration_seconds);
    }

    // Lock metrics

    /// Another instance won the claim
    pub fn record_claim_contention(&self, target: &str) {
        counter!("scheduler_claim_contention_total", "target" => target.to_string()).increment(1);
        debug!(target_table = target, "Claim contended");
    }

    /// A token-checked write was rejected
    pub fn record_lost_lock(&self, target: &str) {
        counter!("scheduler_lost_locks_total", "target" => target.to_string()).increment(1);
    }

    // Import pipeline metrics

    pub fn record_import_step(&self, duration_seconds: f64, created: u64, mismatches: u64) {
        self.import_steps_total.increment(1);
        self.import_step_duration.record(duration_seconds);
        self.import_issues_created_total.increment(created);
        self.import_mismatches_total.increment(mismatches);
    }

    pub fn record_import_retry(&self) {
        self.import_retries_total.increment(1);
    }

    pub fn record_import_succeeded(&self) {
        self.import_jobs_succeeded_total.increment(1);
    }

    pub fn record_import_failed(&self) {
        self.import_jobs_failed_total.increment(1);
    }

    pub fn record_import_cycle(&self, duration_seconds: f64) {
        self.import_cycle_duration.record(duration_seconds);
    }
}
