//! Process-wide prometheus registry and thin macros for declaring metrics,
//! in the style of the teacher's `metrics` crate but wired directly against
//! the upstream `prometheus` crate instead of a VictoriaMetrics-flavored
//! fork, since this repo has no dependency on that fork.

use std::sync::LazyLock;

pub use prometheus;
use prometheus::{
    Histogram,
    HistogramOpts,
    IntCounter,
    IntCounterVec,
    Opts,
    Registry,
};

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Register a counter with the process registry and store it in a static.
#[macro_export]
macro_rules! register_counter {
    ($name:ident, $help:literal) => {
        static $name: std::sync::LazyLock<$crate::prometheus::IntCounter> =
            std::sync::LazyLock::new(|| {
                let counter = $crate::prometheus::IntCounter::new(
                    stringify!($name).to_lowercase(),
                    $help,
                )
                .expect("metric definition is valid");
                $crate::REGISTRY
                    .register(Box::new(counter.clone()))
                    .expect("metric name collision");
                counter
            });
    };
}

/// Register a labeled counter vector with the process registry.
#[macro_export]
macro_rules! register_counter_vec {
    ($name:ident, $help:literal, $labels:expr) => {
        static $name: std::sync::LazyLock<$crate::prometheus::IntCounterVec> =
            std::sync::LazyLock::new(|| {
                let opts = $crate::prometheus::Opts::new(stringify!($name).to_lowercase(), $help);
                let counter = $crate::prometheus::IntCounterVec::new(opts, $labels)
                    .expect("metric definition is valid");
                $crate::REGISTRY
                    .register(Box::new(counter.clone()))
                    .expect("metric name collision");
                counter
            });
    };
}

/// Register a histogram with the process registry.
#[macro_export]
macro_rules! register_histogram {
    ($name:ident, $help:literal) => {
        static $name: std::sync::LazyLock<$crate::prometheus::Histogram> =
            std::sync::LazyLock::new(|| {
                let histogram = $crate::prometheus::Histogram::with_opts(
                    $crate::prometheus::HistogramOpts::new(stringify!($name).to_lowercase(), $help),
                )
                .expect("metric definition is valid");
                $crate::REGISTRY
                    .register(Box::new(histogram.clone()))
                    .expect("metric name collision");
                histogram
            });
    };
}

/// Times a block via `Drop`, recording the elapsed seconds into `histogram`
/// when it goes out of scope. Mirrors the teacher's `StatusTimer`, minus the
/// per-status label breakdown this crate doesn't need.
pub struct Timer<'a> {
    histogram: &'a Histogram,
    start: std::time::Instant,
}

impl<'a> Timer<'a> {
    pub fn new(histogram: &'a Histogram) -> Self {
        Self {
            histogram,
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for Timer<'_> {
    fn drop(&mut self) {
        self.histogram.observe(self.start.elapsed().as_secs_f64());
    }
}

pub fn log_counter(counter: &IntCounter) {
    counter.inc();
}

pub fn log_counter_by(counter: &IntCounter, by: u64) {
    counter.inc_by(by);
}

pub fn log_labeled_counter(counter: &IntCounterVec, label_values: &[&str]) {
    counter.with_label_values(label_values).inc();
}

pub fn log_distribution(histogram: &Histogram, value: f64) {
    histogram.observe(value);
}

/// Render the registry in the Prometheus text exposition format. The actual
/// `/metrics` HTTP endpoint wiring is outside this crate's scope (it's part
/// of the excluded CLI/listener plumbing), but the encoder belongs here.
pub fn encode_to_string() -> anyhow::Result<String> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let mut buf = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buf)?;
    Ok(String::from_utf8(buf)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    register_counter!(TEST_TOTAL, "a test counter");
    register_histogram!(TEST_SECONDS, "a test histogram");

    #[test]
    fn counter_and_histogram_record() {
        log_counter(&TEST_TOTAL);
        assert_eq!(TEST_TOTAL.get(), 1);
        {
            let _t = Timer::new(&TEST_SECONDS);
        }
        assert_eq!(TEST_SECONDS.get_sample_count(), 1);
    }
}
