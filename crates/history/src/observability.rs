use metrics::{counter, histogram};

const RECORD_OUTCOMES_TOTAL: &str = "geotrail_history_record_total";
const TRAVEL_QUERY_POINTS: &str = "geotrail_history_travel_query_points";

pub const RECORD_STORED: &str = "stored";
pub const RECORD_DUPLICATE: &str = "duplicate";
pub const RECORD_REJECTED: &str = "rejected";
pub const RECORD_CONFLICT: &str = "conflict";
pub const RECORD_FAILED: &str = "failed";

pub fn register_record_outcome(outcome: &'static str) {
    counter!(RECORD_OUTCOMES_TOTAL, "outcome" => outcome).increment(1);
}

pub fn register_travel_query(point_count: usize) {
    histogram!(TRAVEL_QUERY_POINTS).record(point_count as f64);
}
