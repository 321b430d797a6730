//! Text exposition formats.

use std::{fmt, mem};

/// Metrics export format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Format {
    /// [OpenMetrics text format][om], as produced by `prometheus-client`.
    ///
    /// [om]: https://github.com/OpenObservability/OpenMetrics/blob/main/specification/OpenMetrics.md
    OpenMetrics,
    /// [Prometheus text format][prom]. Obtained by a streaming transform of OpenMetrics text that
    /// removes `_total` suffixes from counter samples and drops the `# EOF` terminator.
    ///
    /// [prom]: https://prometheus.io/docs/instrumenting/exposition_formats/
    #[default]
    Prometheus,
}

impl Format {
    /// Content type for the OpenMetrics format.
    pub const OPEN_METRICS_CONTENT_TYPE: &'static str =
        "application/openmetrics-text; version=1.0.0; charset=utf-8";
    /// Content type for the Prometheus format.
    pub const PROMETHEUS_CONTENT_TYPE: &'static str = "text/plain; version=0.0.4; charset=utf-8";

    /// Returns the HTTP content type for this format.
    pub fn content_type(self) -> &'static str {
        match self {
            Self::OpenMetrics => Self::OPEN_METRICS_CONTENT_TYPE,
            Self::Prometheus => Self::PROMETHEUS_CONTENT_TYPE,
        }
    }
}

/// Writer adapter producing Prometheus text from OpenMetrics text emitted for a [`Registry`].
///
/// The registry knows which of its families are counters, so sample lines are matched against
/// those names directly instead of tracking `# TYPE` lines.
///
/// [`Registry`]: crate::Registry
#[must_use = "Must be `finish()`ed to not lose the last line"]
#[derive(Debug)]
pub(crate) struct PrometheusWriter<'a, W> {
    writer: &'a mut W,
    counters: &'a [&'a str],
    line: String,
}

impl<'a, W: fmt::Write> PrometheusWriter<'a, W> {
    pub(crate) fn new(writer: &'a mut W, counters: &'a [&'a str]) -> Self {
        Self {
            writer,
            counters,
            line: String::new(),
        }
    }

    /// Returns the counter name if `line` is a sample of one of the registered counters.
    fn counter_sample(&self, line: &str) -> Option<&'a str> {
        self.counters.iter().copied().find(|&counter| {
            line.strip_prefix(counter)
                .and_then(|rest| rest.strip_prefix("_total"))
                .is_some_and(|rest| rest.starts_with(['{', ' ']))
        })
    }

    fn write_line(&mut self) -> fmt::Result {
        let line = mem::take(&mut self.line);
        if line == "# EOF" {
            return Ok(());
        }
        match self.counter_sample(&line) {
            Some(counter) => {
                let rest = &line[counter.len() + "_total".len()..];
                writeln!(self.writer, "{counter}{rest}")
            }
            None => writeln!(self.writer, "{line}"),
        }
    }

    pub(crate) fn finish(mut self) -> fmt::Result {
        if self.line.is_empty() {
            Ok(())
        } else {
            self.write_line()
        }
    }
}

impl<W: fmt::Write> fmt::Write for PrometheusWriter<'_, W> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let mut parts = s.split('\n');
        if let Some(first) = parts.next() {
            self.line.push_str(first);
        }
        for part in parts {
            self.write_line()?;
            self.line.push_str(part);
        }
        Ok(())
    }
}
