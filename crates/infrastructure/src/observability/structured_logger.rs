//! Structured logging utilities
//!
//! One function per lifecycle event so that field names stay stable
//! across the dispatcher and the import runner.

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Structured logging utilities
pub struct StructuredLogger;

impl StructuredLogger {
    /// Log a scheduled event that fired successfully
    pub fn log_event_fired(event_id: Uuid, user_id: i64, due_at: DateTime<Utc>, duration_ms: u64) {
        info!(
            event = "scheduled_event_fired",
            scheduled_event.id = %event_id,
            scheduled_event.user_id = user_id,
            scheduled_event.due_at = %due_at,
            scheduled_event.duration_ms = duration_ms,
            "Scheduled event fired"
        );
    }

    /// Log a failed fire; events above the poison threshold are reported at error level
    pub fn log_event_fire_failed(event_id: Uuid, retry_count: i32, poison_threshold: i32, reason: &str) {
        if retry_count >= poison_threshold {
            error!(
                event = "scheduled_event_poison",
                scheduled_event.id = %event_id,
                scheduled_event.retry_count = retry_count,
                scheduled_event.error = reason,
                "Scheduled event keeps failing and will be retried again"
            );
        } else {
            warn!(
                event = "scheduled_event_fire_failed",
                scheduled_event.id = %event_id,
                scheduled_event.retry_count = retry_count,
                scheduled_event.error = reason,
                "Scheduled event fire failed, released for the next cycle"
            );
        }
    }

    /// Log a claim lost to another instance
    pub fn log_claim_contended(target: &str, record_id: Uuid) {
        debug!(
            event = "claim_contended",
            lock.target = target,
            lock.record_id = %record_id,
            "Record already claimed by another instance"
        );
    }

    /// Log a write rejected because the claim token no longer matches
    pub fn log_lock_lost(target: &str, record_id: Uuid, operation: &str) {
        warn!(
            event = "lock_lost",
            lock.target = target,
            lock.record_id = %record_id,
            lock.operation = operation,
            "Claim token no longer matches, write discarded"
        );
    }

    /// Log a completed import step
    pub fn log_import_step(
        job_id: Uuid,
        pages_processed: u32,
        created: u64,
        existing: u64,
        skipped: u64,
        finished: bool,
    ) {
        info!(
            event = "import_step_completed",
            import_job.id = %job_id,
            import_job.pages_processed = pages_processed,
            import_job.created = created,
            import_job.existing = existing,
            import_job.skipped = skipped,
            import_job.finished = finished,
            "Import step checkpointed"
        );
    }

    /// Log a recorded mismatch
    pub fn log_mismatch_recorded(job_id: Uuid, mismatch_type: &str, external_id: &str) {
        info!(
            event = "import_mismatch_recorded",
            import_job.id = %job_id,
            mismatch.kind = mismatch_type,
            mismatch.external_id = external_id,
            "Import mismatch recorded"
        );
    }

    /// Log a transient import failure scheduled for retry
    pub fn log_import_retry(job_id: Uuid, retry_count: i32, max_retries: i32, retry_after: DateTime<Utc>, reason: &str) {
        warn!(
            event = "import_retry",
            import_job.id = %job_id,
            import_job.retry_count = retry_count,
            import_job.max_retries = max_retries,
            import_job.retry_after = %retry_after,
            import_job.error = reason,
            "Import job requeued with backoff"
        );
    }

    /// Log a terminal import failure
    pub fn log_import_failed(job_id: Uuid, retry_count: i32, reason: &str) {
        error!(
            event = "import_failed",
            import_job.id = %job_id,
            import_job.retry_count = retry_count,
            import_job.error = reason,
            "Import job failed permanently"
        );
    }

    /// Log a successful import
    pub fn log_import_succeeded(job_id: Uuid, imported: u64, mismatches: u64) {
        info!(
            event = "import_succeeded",
            import_job.id = %job_id,
            import_job.imported = imported,
            import_job.mismatches = mismatches,
            "Import job succeeded"
        );
    }

    /// Log system error
    pub fn log_system_error(component: &str, operation: &str, error: &dyn std::error::Error) {
        error!(
            event = "system_error",
            error.component = component,
            error.operation = operation,
            error.message = %error,
            "System error occurred"
        );
    }
}
