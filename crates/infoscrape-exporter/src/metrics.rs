//! Internal metrics for the exporter itself.

use std::time::Duration;

use infoscrape::{Counter, Histogram, Registry};

/// Latency buckets in seconds.
const LATENCY_BUCKETS: [f64; 9] = [0.001, 0.005, 0.025, 0.1, 0.25, 1.0, 5.0, 30.0, 120.0];

#[derive(Debug)]
pub(crate) struct ExporterMetrics {
    /// Duration of collecting metrics for a scrape, including failed ones.
    pub scrape_duration: Histogram,
    /// Number of scrapes that failed to collect metrics.
    pub scrape_errors: Counter,
}

impl Default for ExporterMetrics {
    fn default() -> Self {
        Self {
            scrape_duration: Histogram::new(LATENCY_BUCKETS.into_iter()),
            scrape_errors: Counter::default(),
        }
    }
}

impl ExporterMetrics {
    const PREFIX: &'static str = "infoscrape_exporter";

    pub fn observe_scrape(&self, latency: Duration, is_success: bool) {
        self.scrape_duration.observe(latency.as_secs_f64());
        if !is_success {
            self.scrape_errors.inc();
        }
    }

    /// Registers metrics in `registry`. Metrics are shared, so they keep their values across
    /// registries created for different scrapes.
    pub fn register(&self, registry: &mut Registry) {
        let prefix = Self::PREFIX;
        registry.register_histogram(
            &format!("{prefix}_scrape_duration_seconds"),
            "Duration of collecting metrics for a scrape",
            self.scrape_duration.clone(),
        );
        registry.register_counter(
            &format!("{prefix}_scrape_errors"),
            "Number of scrapes that failed to collect metrics",
            self.scrape_errors.clone(),
        );
    }
}
