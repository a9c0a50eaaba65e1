use geotrail_domain::replay::ReplayResult;
use metrics::counter;

const INGEST_OUTCOMES_TOTAL: &str = "geotrail_management_ingest_total";
const REMOTE_FAILURES_TOTAL: &str = "geotrail_management_remote_failures_total";

pub const INGEST_COMMITTED: &str = "committed";
pub const INGEST_INCONSISTENT: &str = "inconsistent";
pub const INGEST_REJECTED: &str = "rejected";
pub const INGEST_LOCAL_FAILED: &str = "local_failed";

pub fn register_ingest_outcome(outcome: &'static str) {
    counter!(INGEST_OUTCOMES_TOTAL, "outcome" => outcome).increment(1);
}

pub fn register_remote_failure(operation: &'static str, kind: &'static str) {
    counter!(
        REMOTE_FAILURES_TOTAL,
        "operation" => operation,
        "kind" => kind
    )
    .increment(1);
}

pub fn register_replay_result(result: &ReplayResult) {
    geotrail_infra::observability::register_replay_result(result.as_str());
}
