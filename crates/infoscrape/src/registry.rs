//! Wrapper around the `prometheus-client` registry.

use std::{collections::BTreeMap, fmt};

use prometheus_client::{
    encoding::{text, EncodeMetric, MetricEncoder},
    metrics::{counter::Counter, histogram::Histogram, MetricType},
    registry::Registry as RegistryInner,
};

use crate::{
    format::{Format, PrometheusWriter},
    observations::GaugeFamily,
};

#[derive(Debug, Clone)]
enum RegisteredMetric {
    Gauges(GaugeFamily),
    Counter(Counter),
    Histogram(Histogram),
}

impl EncodeMetric for RegisteredMetric {
    fn encode(&self, encoder: MetricEncoder<'_>) -> fmt::Result {
        match self {
            Self::Gauges(family) => family.encode(encoder),
            Self::Counter(counter) => counter.encode(encoder),
            Self::Histogram(histogram) => histogram.encode(encoder),
        }
    }

    fn metric_type(&self) -> MetricType {
        match self {
            Self::Gauges(family) => family.metric_type(),
            Self::Counter(counter) => counter.metric_type(),
            Self::Histogram(histogram) => histogram.metric_type(),
        }
    }
}

#[derive(Debug)]
struct Registration {
    help: String,
    metric: RegisteredMetric,
}

/// Metrics registry encoding its families in name order, so that output is reproducible.
#[derive(Debug, Default)]
pub struct Registry {
    families: BTreeMap<String, Registration>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn empty() -> Self {
        Self::default()
    }

    fn register(&mut self, name: String, help: String, metric: RegisteredMetric) {
        let registration = Registration { help, metric };
        if self.families.insert(name.clone(), registration).is_some() {
            tracing::warn!(name = name.as_str(), "Metric family was registered twice; keeping the last one");
        }
    }

    /// Registers a family of gauges under its own name.
    pub fn register_gauges(&mut self, family: GaugeFamily) {
        let name = family.name().to_owned();
        let help = family.help().to_owned();
        self.register(name, help, RegisteredMetric::Gauges(family));
    }

    /// Registers a counter. The counter is shared with the caller, so later increments are visible.
    pub fn register_counter(&mut self, name: &str, help: &str, counter: Counter) {
        self.register(name.to_owned(), help.to_owned(), RegisteredMetric::Counter(counter));
    }

    /// Registers a histogram. The histogram is shared with the caller.
    pub fn register_histogram(&mut self, name: &str, help: &str, histogram: Histogram) {
        self.register(
            name.to_owned(),
            help.to_owned(),
            RegisteredMetric::Histogram(histogram),
        );
    }

    /// Number of registered families.
    pub fn family_count(&self) -> usize {
        self.families.len()
    }

    /// Names of registered families in encoding order.
    pub fn family_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.families.keys().map(String::as_str)
    }

    /// Encodes all families using the specified format.
    ///
    /// # Errors
    ///
    /// Proxies formatting errors of the provided `writer`.
    pub fn encode<W: fmt::Write>(&self, writer: &mut W, format: Format) -> fmt::Result {
        let mut inner = RegistryInner::default();
        for (name, registration) in &self.families {
            inner.register(
                name.as_str(),
                registration.help.as_str(),
                registration.metric.clone(),
            );
        }

        match format {
            Format::OpenMetrics => text::encode(writer, &inner),
            Format::Prometheus => {
                let counters: Vec<_> = self
                    .families
                    .iter()
                    .filter(|(_, registration)| {
                        matches!(registration.metric, RegisteredMetric::Counter(_))
                    })
                    .map(|(name, _)| name.as_str())
                    .collect();
                let mut writer = PrometheusWriter::new(writer, &counters);
                text::encode(&mut writer, &inner)?;
                writer.finish()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gauge(name: &str, value: i64) -> GaugeFamily {
        let mut family = GaugeFamily::new(name, "Test gauge");
        family.push(value);
        family
    }

    #[test]
    fn families_are_encoded_in_name_order() {
        let mut registry = Registry::empty();
        registry.register_gauges(gauge("zeta", 1));
        registry.register_gauges(gauge("alpha", 2));
        registry.register_gauges(gauge("mid", 3));

        let mut buffer = String::new();
        registry.encode(&mut buffer, Format::Prometheus).unwrap();
        let value_lines: Vec<_> = buffer.lines().filter(|line| !line.starts_with('#')).collect();
        assert_eq!(value_lines, ["alpha 2", "mid 3", "zeta 1"]);
        assert!(buffer.contains("# HELP alpha Test gauge.\n# TYPE alpha gauge\n"));
    }

    #[test]
    fn re_registration_replaces_family() {
        let mut registry = Registry::empty();
        registry.register_gauges(gauge("test", 1));
        registry.register_gauges(gauge("test", 5));
        assert_eq!(registry.family_count(), 1);

        let mut buffer = String::new();
        registry.encode(&mut buffer, Format::Prometheus).unwrap();
        assert!(buffer.lines().any(|line| line == "test 5"), "{buffer}");
    }

    #[test]
    fn encoding_counters_in_both_formats() {
        let counter = Counter::<u64>::default();
        let mut registry = Registry::empty();
        registry.register_counter("scrape_errors", "Number of failed scrapes", counter.clone());
        counter.inc_by(3);

        let mut buffer = String::new();
        registry.encode(&mut buffer, Format::OpenMetrics).unwrap();
        let lines: Vec<_> = buffer.lines().collect();
        assert!(lines.contains(&"# TYPE scrape_errors counter"), "{lines:#?}");
        assert!(lines.contains(&"scrape_errors_total 3"), "{lines:#?}");
        assert_eq!(lines.last(), Some(&"# EOF"));

        let mut buffer = String::new();
        registry.encode(&mut buffer, Format::Prometheus).unwrap();
        let lines: Vec<_> = buffer.lines().collect();
        assert!(lines.contains(&"scrape_errors 3"), "{lines:#?}");
        assert!(!lines.contains(&"# EOF"), "{lines:#?}");
    }

    #[test]
    fn labeled_and_float_samples() {
        let mut family = GaugeFamily::new("ttl_seconds", "TTL");
        family.push_labeled(vec![("database".into(), "1".into())], 0.5);
        family.push_labeled(vec![("database".into(), "7".into())], 2.0);
        let mut registry = Registry::empty();
        registry.register_gauges(family);

        let mut buffer = String::new();
        registry.encode(&mut buffer, Format::Prometheus).unwrap();
        let lines: Vec<_> = buffer.lines().collect();
        assert!(lines.contains(&r#"ttl_seconds{database="1"} 0.5"#), "{lines:#?}");
        assert!(lines.contains(&r#"ttl_seconds{database="7"} 2.0"#), "{lines:#?}");
    }
}
