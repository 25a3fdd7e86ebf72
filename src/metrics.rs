//! Pipeline metrics, grouped by phase.
//!
//! Recording goes through the `metrics` facade; without an installed recorder
//! every call is a no-op, so embedding binaries decide whether to export.

/// Builds metric names following `fx_{phase}_{name}` (counters get `_total`)
macro_rules! phase_metric {
    (counter, $phase:literal, $name:literal) => {
        concat!("fx_", $phase, "_", $name, "_total")
    };
    (histogram, $phase:literal, $name:literal) => {
        concat!("fx_", $phase, "_", $name)
    };
}

pub mod ingest {
    pub fn request_success(duration_secs: f64, payload_bytes: usize) {
        ::metrics::counter!(phase_metric!(counter, "ingest", "requests_success")).increment(1);
        ::metrics::histogram!(phase_metric!(histogram, "ingest", "request_duration_seconds"))
            .record(duration_secs);
        ::metrics::histogram!(phase_metric!(histogram, "ingest", "payload_bytes"))
            .record(payload_bytes as f64);
    }

    pub fn request_error() {
        ::metrics::counter!(phase_metric!(counter, "ingest", "requests_error")).increment(1);
    }

    pub fn validation_failed() {
        ::metrics::counter!(phase_metric!(counter, "ingest", "validation_failures")).increment(1);
    }

    pub fn snapshot_written(pairs: usize) {
        ::metrics::counter!(phase_metric!(counter, "ingest", "snapshots_written")).increment(1);
        ::metrics::histogram!(phase_metric!(histogram, "ingest", "pairs_per_snapshot"))
            .record(pairs as f64);
    }
}

pub mod transform {
    pub fn records_kept(count: usize) {
        ::metrics::counter!(phase_metric!(counter, "transform", "records_kept"))
            .increment(count as u64);
    }

    pub fn records_dropped(reason: &'static str, count: usize) {
        ::metrics::counter!(phase_metric!(counter, "transform", "records_dropped"), "reason" => reason)
            .increment(count as u64);
    }

    pub fn empty_day() {
        ::metrics::counter!(phase_metric!(counter, "transform", "empty_days")).increment(1);
    }
}

pub mod load {
    pub fn groups_aggregated(count: usize) {
        ::metrics::counter!(phase_metric!(counter, "load", "groups_aggregated"))
            .increment(count as u64);
    }

    pub fn mirror_rows_appended(count: usize) {
        ::metrics::counter!(phase_metric!(counter, "load", "mirror_rows_appended"))
            .increment(count as u64);
    }

    pub fn mirror_error() {
        ::metrics::counter!(phase_metric!(counter, "load", "mirror_errors")).increment(1);
    }
}

pub mod narrative {
    pub fn completion(duration_secs: f64, tokens_used: Option<u32>) {
        ::metrics::counter!(phase_metric!(counter, "narrative", "completions")).increment(1);
        ::metrics::histogram!(phase_metric!(histogram, "narrative", "completion_duration_seconds"))
            .record(duration_secs);
        if let Some(tokens) = tokens_used {
            ::metrics::histogram!(phase_metric!(histogram, "narrative", "tokens_used"))
                .record(tokens as f64);
        }
    }

    pub fn completion_error() {
        ::metrics::counter!(phase_metric!(counter, "narrative", "completion_errors")).increment(1);
    }
}

pub mod pipeline {
    pub fn run_completed(duration_secs: f64) {
        ::metrics::counter!(phase_metric!(counter, "pipeline", "runs_completed")).increment(1);
        ::metrics::histogram!(phase_metric!(histogram, "pipeline", "run_duration_seconds"))
            .record(duration_secs);
    }

    pub fn run_failed(stage: &'static str) {
        ::metrics::counter!(phase_metric!(counter, "pipeline", "runs_failed"), "stage" => stage)
            .increment(1);
    }
}
