use prometheus::{
    exponential_buckets, register_counter, register_histogram, Counter, Histogram, HistogramOpts,
    Opts,
};
use std::sync::LazyLock;

// Counters
pub static INBOUND_REST: LazyLock<Counter> = LazyLock::new(|| {
    register_counter!(Opts::new(
        "tallyd_inbound_rest_total",
        "The total number of inbound REST requests"
    ))
    .unwrap()
});

pub static SCORE_SUBMISSIONS: LazyLock<Counter> = LazyLock::new(|| {
    register_counter!(Opts::new(
        "tallyd_score_submissions_total",
        "The total number of accepted score submissions"
    ))
    .unwrap()
});

pub static RATE_LIMITED: LazyLock<Counter> = LazyLock::new(|| {
    register_counter!(Opts::new(
        "tallyd_rate_limited_total",
        "The total number of requests rejected by the rate limiter"
    ))
    .unwrap()
});

pub static VERSION_ROLLOVERS: LazyLock<Counter> = LazyLock::new(|| {
    register_counter!(Opts::new(
        "tallyd_version_rollovers_total",
        "The total number of leaderboard version rollovers"
    ))
    .unwrap()
});

// Histograms
pub static SUBMIT_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(HistogramOpts::new(
        "tallyd_submit_duration_seconds",
        "Duration of score submission handling in seconds"
    )
    .buckets(exponential_buckets(0.001, 2.0, 12).unwrap()))
    .unwrap()
});

/// Initialize all metrics with default values
pub fn init_metrics() {
    INBOUND_REST.inc_by(0.0);
    SCORE_SUBMISSIONS.inc_by(0.0);
    RATE_LIMITED.inc_by(0.0);
    VERSION_ROLLOVERS.inc_by(0.0);
}
