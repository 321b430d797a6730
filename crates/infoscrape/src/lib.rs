//! Collection pipeline turning the text of Redis `INFO` sections into typed Prometheus metrics.
//!
//! # Overview
//!
//! - An [`InfoSource`] returns the raw text of `INFO <section>`. [`RedisClient`](client::RedisClient)
//!   implements it over RESP; [`MockSource`](testing::MockSource) serves canned replies.
//! - [`parse_section()`] and [`parse_keyspace()`] turn raw text into a [`MetricMap`] and
//!   [`KeyspaceRecord`]s respectively.
//! - [`classify()`] splits a merged map into numeric and non-numeric fields.
//! - [`InfoCollector`] drives a single collection: fetches all configured sections concurrently,
//!   merges them and assembles an [`ObservationSet`] of gauge families.
//! - Observations are encoded via a [`Registry`] in the OpenMetrics or Prometheus text [`Format`].
//!
//! # Examples
//!
//! ```
//! use infoscrape::{testing::MockSource, CollectorConfig, Format, InfoCollector};
//!
//! # async fn test_wrapper() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CollectorConfig::new(["Clients", "Memory"], vec![1, 2, 3])?;
//! let collector = InfoCollector::new(MockSource::with_samples(), config);
//! let observations = collector.collect().await?;
//!
//! let mut buffer = String::new();
//! observations.encode(&mut buffer, Format::Prometheus)?;
//! assert!(buffer.contains("redis_clients_connected_total 3.0\n"));
//! # Ok(())
//! # }
//! ```

// Linter settings.
#![warn(missing_debug_implementations, missing_docs, bare_trait_objects)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::must_use_candidate, clippy::module_name_repetitions)]

pub use prometheus_client::metrics::{counter::Counter, histogram::Histogram};

mod classify;
pub mod client;
mod collector;
mod format;
mod observations;
mod parser;
mod registry;
mod source;
pub mod testing;
mod validation;

pub use crate::{
    classify::{classify, parse_numeric, ClassifiedMetrics},
    collector::{
        check_databases, CollectionError, CollectorConfig, DatabaseConfigError, InfoCollector,
        CONNECTED_CLIENTS_FIELD, DATABASE_LABEL,
    },
    format::Format,
    observations::{GaugeFamily, GaugeValue, ObservationSet, Sample},
    parser::{
        parse_keyspace, parse_section, KeyspaceRecord, MetricMap, ParseError, ParseErrorReason,
        KEYSPACE_SECTION,
    },
    registry::Registry,
    source::{FetchCause, FetchError, InfoSource},
    validation::{validate_label_name, validate_metric_name},
};
