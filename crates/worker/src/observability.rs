use std::net::SocketAddr;

use anyhow::Result;
use geotrail_domain::replay::ReplayResult;
use geotrail_infra::jobs::JobQueueSnapshot;
use metrics::gauge;

const QUEUE_READY_GAUGE: &str = "geotrail_worker_queue_ready_total";
const QUEUE_DELAYED_GAUGE: &str = "geotrail_worker_queue_delayed_total";
const QUEUE_PROCESSING_GAUGE: &str = "geotrail_worker_queue_processing_total";

pub fn init_metrics(addr: SocketAddr) -> Result<()> {
    geotrail_infra::observability::install_exporter(addr)
}

pub fn register_replay(result: &ReplayResult) {
    geotrail_infra::observability::register_replay_result(result.as_str());
}

pub fn set_queue_depth_gauge(snapshot: &JobQueueSnapshot) {
    gauge!(QUEUE_READY_GAUGE).set(snapshot.ready as f64);
    gauge!(QUEUE_DELAYED_GAUGE).set(snapshot.delayed as f64);
    gauge!(QUEUE_PROCESSING_GAUGE).set(snapshot.processing as f64);
}
