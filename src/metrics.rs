use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, TextEncoder, register_counter,
    register_counter_vec, register_gauge, register_histogram,
};

lazy_static! {
    pub static ref REQUESTS_QUEUED: Counter =
        register_counter!("ai_requests_queued_total", "Total prompts queued").unwrap();
    pub static ref REQUESTS_DISPATCHED: Counter =
        register_counter!("ai_requests_dispatched_total", "Requests sent to the API").unwrap();
    pub static ref CACHE_HITS: Counter =
        register_counter!("ai_cache_hits_total", "Total cache hits").unwrap();
    pub static ref CACHE_MISSES: Counter =
        register_counter!("ai_cache_misses_total", "Total cache misses").unwrap();
    pub static ref RATE_LIMITED: Counter = register_counter!(
        "ai_rate_limited_total",
        "Admissions refused by the client-side limiter"
    )
    .unwrap();
    pub static ref REQUEST_ERRORS: CounterVec = register_counter_vec!(
        "ai_request_errors_total",
        "Failed requests by kind",
        &["kind"]
    )
    .unwrap();
    pub static ref REQUEST_LATENCY: Histogram = register_histogram!(
        "ai_request_latency_seconds",
        "Dispatch to completion latency in seconds"
    )
    .unwrap();
    pub static ref CACHE_SIZE: Gauge =
        register_gauge!("ai_cache_size", "Current number of items in cache").unwrap();
    pub static ref QUEUE_DEPTH: Gauge =
        register_gauge!("ai_queue_depth", "Prompts waiting for admission").unwrap();
}

// Text exposition of everything registered
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        return format!("# failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
