//! Observations produced by a single collection.

use std::{borrow::Cow, fmt};

use prometheus_client::{
    encoding::{EncodeMetric, MetricEncoder},
    metrics::{MetricType, TypedMetric},
};

use crate::{format::Format, registry::Registry};

/// Value of a gauge sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GaugeValue {
    /// Signed integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
}

impl From<i64> for GaugeValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u64> for GaugeValue {
    #[allow(clippy::cast_precision_loss)] // OK for reporting
    fn from(value: u64) -> Self {
        i64::try_from(value).map_or_else(|_| Self::Float(value as f64), Self::Int)
    }
}

impl From<f64> for GaugeValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl GaugeValue {
    /// Returns the value as a float.
    #[allow(clippy::cast_precision_loss)] // OK for reporting
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int(value) => value as f64,
            Self::Float(value) => value,
        }
    }

    fn encode(self, encoder: &mut MetricEncoder<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => encoder.encode_gauge(&value),
            Self::Float(value) => encoder.encode_gauge(&value),
        }
    }
}

/// Single gauge sample: label pairs and a value.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Label name / value pairs in encoding order.
    pub labels: Vec<(String, String)>,
    /// Observed value.
    pub value: GaugeValue,
}

/// Named family of gauge samples sharing help text.
#[derive(Debug, Clone, PartialEq)]
pub struct GaugeFamily {
    name: String,
    help: String,
    samples: Vec<Sample>,
}

impl GaugeFamily {
    /// Creates a family without samples.
    pub fn new(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            samples: Vec::new(),
        }
    }

    /// Adds a sample without labels.
    pub fn push(&mut self, value: impl Into<GaugeValue>) {
        self.push_labeled(Vec::new(), value);
    }

    /// Adds a labeled sample.
    pub fn push_labeled(&mut self, labels: Vec<(String, String)>, value: impl Into<GaugeValue>) {
        self.samples.push(Sample {
            labels,
            value: value.into(),
        });
    }

    /// Name of the family.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Help text without the trailing full stop.
    pub fn help(&self) -> &str {
        &self.help
    }

    /// Samples in encoding order.
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Finds the value of the sample with the given label value (or the unlabeled sample
    /// if `label` is `None`).
    pub fn value(&self, label: Option<(&str, &str)>) -> Option<GaugeValue> {
        let sample = self.samples.iter().find(|sample| match label {
            None => sample.labels.is_empty(),
            Some((name, value)) => sample
                .labels
                .iter()
                .any(|(label_name, label_value)| label_name == name && label_value == value),
        })?;
        Some(sample.value)
    }
}

/// Escapes a label value for the text exposition formats (backslash, double quote and newline).
pub(crate) fn escape_label_value(value: &str) -> Cow<'_, str> {
    if !value.contains(['\\', '"', '\n']) {
        return Cow::Borrowed(value);
    }
    let mut escaped = String::with_capacity(value.len() + 2);
    for ch in value.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            _ => escaped.push(ch),
        }
    }
    Cow::Owned(escaped)
}

impl EncodeMetric for GaugeFamily {
    fn encode(&self, mut encoder: MetricEncoder<'_>) -> fmt::Result {
        for sample in &self.samples {
            if sample.labels.is_empty() {
                sample.value.encode(&mut encoder)?;
            } else {
                // `prometheus-client` writes label values verbatim.
                let labels: Vec<(String, String)> = sample
                    .labels
                    .iter()
                    .map(|(name, value)| (name.clone(), escape_label_value(value).into_owned()))
                    .collect();
                let mut sample_encoder = encoder.encode_family(&labels)?;
                sample.value.encode(&mut sample_encoder)?;
            }
        }
        Ok(())
    }

    fn metric_type(&self) -> MetricType {
        <Self as TypedMetric>::TYPE
    }
}

impl TypedMetric for GaugeFamily {
    const TYPE: MetricType = MetricType::Gauge;
}

/// All metrics emitted for one scrape.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservationSet {
    families: Vec<GaugeFamily>,
    skipped_fields: usize,
}

impl ObservationSet {
    pub(crate) fn push(&mut self, family: GaugeFamily) {
        self.families.push(family);
    }

    pub(crate) fn skip_field(&mut self) {
        self.skipped_fields += 1;
    }

    /// Families in the order they were assembled.
    pub fn families(&self) -> &[GaugeFamily] {
        &self.families
    }

    /// Looks up a family by its full name.
    pub fn family(&self, name: &str) -> Option<&GaugeFamily> {
        self.families.iter().find(|family| family.name == name)
    }

    /// Number of INFO fields dropped because they cannot be expressed as metric or label names.
    pub fn skipped_fields(&self) -> usize {
        self.skipped_fields
    }

    /// Registers all families in `registry`.
    pub fn register(&self, registry: &mut Registry) {
        for family in &self.families {
            registry.register_gauges(family.clone());
        }
    }

    /// Encodes this set on its own, with families ordered by name.
    ///
    /// # Errors
    ///
    /// Proxies formatting errors of the provided `writer`.
    pub fn encode<W: fmt::Write>(&self, writer: &mut W, format: Format) -> fmt::Result {
        let mut registry = Registry::empty();
        self.register(&mut registry);
        registry.encode(writer, format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escaping_label_values() {
        assert!(matches!(escape_label_value("noeviction"), Cow::Borrowed("noeviction")));
        assert_eq!(escape_label_value(r"C:\redis"), r"C:\\redis");
        assert_eq!(escape_label_value(r#"say "hi""#), r#"say \"hi\""#);
        assert_eq!(escape_label_value("a\nb"), r"a\nb");
    }

    #[test]
    fn encoding_escapes_label_values() {
        let mut family = GaugeFamily::new("redis_info_non_numerical", "Non-numerical data");
        let labels = vec![("config_file".to_owned(), r#"C:\redis "prod".conf"#.to_owned())];
        family.push_labeled(labels, 1_i64);
        let mut observations = ObservationSet::default();
        observations.push(family);

        let mut buffer = String::new();
        observations.encode(&mut buffer, Format::Prometheus).unwrap();
        let expected = r#"redis_info_non_numerical{config_file="C:\\redis \"prod\".conf"} 1"#;
        assert!(buffer.contains(expected), "{buffer}");
        // Raw values stay available for lookups.
        let family = observations.family("redis_info_non_numerical").unwrap();
        assert_eq!(family.samples()[0].labels[0].1, r#"C:\redis "prod".conf"#);
    }
}
