//! Collection orchestrator: one scrape from raw INFO text to an [`ObservationSet`].

use std::collections::{BTreeMap, BTreeSet};

use futures::future;
use thiserror::Error;
use tokio::time::{self, Instant};

use crate::{
    classify::classify,
    observations::{GaugeFamily, ObservationSet},
    parser::{parse_keyspace, parse_section, KeyspaceRecord, MetricMap, ParseError, KEYSPACE_SECTION},
    source::{FetchError, InfoSource},
    validation::{validate_label_name, validate_metric_name},
};

/// Name of the numeric INFO field holding the number of connected clients.
pub const CONNECTED_CLIENTS_FIELD: &str = "connected_clients";
/// Label carrying the configured database index on per-database gauges.
pub const DATABASE_LABEL: &str = "database";

/// Error aborting a whole collection. No partial observations are ever returned.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CollectionError {
    /// Fetching a section failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// A section reply is malformed.
    #[error("failed parsing INFO section `{section}`: {source}")]
    Parse {
        /// Name of the section.
        section: String,
        /// Parsing error.
        #[source]
        source: ParseError,
    },
    /// The keyspace section lists a different number of databases than configured.
    #[error(
        "backend reported {reported} databases in the keyspace section, \
         but {configured} databases are configured"
    )]
    ConfigMismatch {
        /// Number of configured databases.
        configured: usize,
        /// Number of keyspace records reported by the backend.
        reported: usize,
    },
    /// A field required to build observations is missing or not numeric.
    #[error("INFO field `{0}` is missing or not numeric")]
    MissingField(&'static str),
    /// The caller-supplied deadline expired before the collection completed.
    #[error("collection deadline exceeded")]
    DeadlineExceeded,
}

/// Invalid list of configured databases.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum DatabaseConfigError {
    /// No databases are configured.
    #[error("at least one database must be configured")]
    Empty,
    /// A database index occurs more than once.
    #[error("database {0} is configured more than once")]
    Duplicate(u32),
}

/// Checks that `databases` is non-empty and has no repeated indices.
///
/// # Errors
///
/// Returns the first problem found.
pub fn check_databases(databases: &[u32]) -> Result<(), DatabaseConfigError> {
    if databases.is_empty() {
        return Err(DatabaseConfigError::Empty);
    }
    let mut seen = BTreeSet::new();
    for &database in databases {
        if !seen.insert(database) {
            return Err(DatabaseConfigError::Duplicate(database));
        }
    }
    Ok(())
}

/// Static configuration of a collector, fixed for its lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorConfig {
    sections: Vec<String>,
    databases: Vec<u32>,
    namespace: String,
}

impl CollectorConfig {
    /// Default namespace of emitted metrics.
    pub const DEFAULT_NAMESPACE: &'static str = "redis";

    /// Creates a configuration with the default namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if `databases` is empty or contains duplicates.
    pub fn new<S: Into<String>>(
        sections: impl IntoIterator<Item = S>,
        databases: Vec<u32>,
    ) -> Result<Self, DatabaseConfigError> {
        check_databases(&databases)?;
        Ok(Self {
            sections: sections.into_iter().map(Into::into).collect(),
            databases,
            namespace: Self::DEFAULT_NAMESPACE.to_owned(),
        })
    }

    /// INFO sections to request, in merge order. The keyspace section is always fetched
    /// separately and is skipped here if present.
    pub fn sections(&self) -> &[String] {
        &self.sections
    }

    /// Indices of configured databases, matched positionally with keyspace records.
    pub fn databases(&self) -> &[u32] {
        &self.databases
    }

    /// Namespace prepended to all metric names.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Sets the namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    fn generic_sections(&self) -> impl Iterator<Item = &str> + '_ {
        self.sections
            .iter()
            .map(String::as_str)
            .filter(|section| !section.eq_ignore_ascii_case(KEYSPACE_SECTION))
    }
}

/// Names and help of the families a collector emits; resolved once per collector.
#[derive(Debug)]
struct Descriptors {
    info_prefix: String,
    non_numerical: String,
    clients_connected_total: String,
    keys_per_database: String,
    expiring_keys: String,
    average_key_ttl: String,
}

impl Descriptors {
    const INFO_HELP: &'static str = "Data gathered from Redis INFO";
    const NON_NUMERICAL_HELP: &'static str = "Non-numerical data gathered from Redis INFO";
    const CLIENTS_HELP: &'static str = "Total number of clients connected to Redis";
    const KEYS_HELP: &'static str = "Number of keys per Redis database";
    const EXPIRING_KEYS_HELP: &'static str = "Number of expiring keys per Redis database";
    const AVERAGE_TTL_HELP: &'static str = "Average key TTL in seconds";

    fn new(namespace: &str) -> Self {
        let qualify = |name: &str| {
            if namespace.is_empty() {
                name.to_owned()
            } else {
                format!("{namespace}_{name}")
            }
        };
        Self {
            info_prefix: qualify("info_"),
            non_numerical: qualify("info_non_numerical"),
            clients_connected_total: qualify("clients_connected_total"),
            keys_per_database: qualify("keys_per_database_count"),
            expiring_keys: qualify("expiring_keys_count"),
            average_key_ttl: qualify("average_key_ttl_seconds"),
        }
    }

    fn fixed_names(&self) -> [&str; 5] {
        [
            &self.non_numerical,
            &self.clients_connected_total,
            &self.keys_per_database,
            &self.expiring_keys,
            &self.average_key_ttl,
        ]
    }
}

/// Collector turning INFO replies of a single backend into observations on each call.
///
/// The collector holds no mutable state: concurrent calls to [`Self::collect()`] are independent.
#[derive(Debug)]
pub struct InfoCollector<S> {
    source: S,
    config: CollectorConfig,
    descriptors: Descriptors,
}

impl<S: InfoSource> InfoCollector<S> {
    /// Creates a collector reading INFO from `source`.
    pub fn new(source: S, config: CollectorConfig) -> Self {
        let descriptors = Descriptors::new(&config.namespace);
        tracing::debug!(
            sections = ?config.sections,
            databases = ?config.databases,
            namespace = config.namespace.as_str(),
            "Created INFO collector"
        );
        Self {
            source,
            config,
            descriptors,
        }
    }

    /// Returns the collector configuration.
    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Returns the INFO source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Runs a collection, aborting it once `deadline` is reached.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::DeadlineExceeded`] on expiry; see [`Self::collect()`] for other errors.
    pub async fn collect_with_deadline(
        &self,
        deadline: Instant,
    ) -> Result<ObservationSet, CollectionError> {
        time::timeout_at(deadline, self.collect())
            .await
            .map_err(|_| CollectionError::DeadlineExceeded)?
    }

    /// Runs a collection: fetches all configured sections and the keyspace section concurrently,
    /// merges sections in configured order and assembles observations.
    ///
    /// # Errors
    ///
    /// Returns the first fetch or parse error, or an error if the keyspace section does not match
    /// configured databases or the connected clients count is unavailable.
    pub async fn collect(&self) -> Result<ObservationSet, CollectionError> {
        let sections = self
            .config
            .generic_sections()
            .map(|section| self.fetch_section(section));
        let (maps, records) =
            future::try_join(future::try_join_all(sections), self.fetch_keyspace()).await?;

        let section_count = maps.len();
        let mut merged = MetricMap::new();
        for map in maps {
            merged.merge(map);
        }
        self.assemble(section_count, merged, &records)
    }

    async fn fetch_section(&self, section: &str) -> Result<MetricMap, CollectionError> {
        let raw = self.source.info(section).await?;
        parse_section(&raw).map_err(|source| CollectionError::Parse {
            section: section.to_owned(),
            source,
        })
    }

    async fn fetch_keyspace(&self) -> Result<Vec<KeyspaceRecord>, CollectionError> {
        let raw = self.source.info(KEYSPACE_SECTION).await?;
        parse_keyspace(&raw).map_err(|source| CollectionError::Parse {
            section: KEYSPACE_SECTION.to_owned(),
            source,
        })
    }

    fn assemble(
        &self,
        section_count: usize,
        merged: MetricMap,
        records: &[KeyspaceRecord],
    ) -> Result<ObservationSet, CollectionError> {
        let databases = &self.config.databases;
        if records.len() != databases.len() {
            return Err(CollectionError::ConfigMismatch {
                configured: databases.len(),
                reported: records.len(),
            });
        }

        let classified = classify(merged);
        let numeric_count = classified.numeric.len();
        let non_numeric_count = classified.non_numeric.len();
        let connected_clients = classified
            .numeric
            .get(CONNECTED_CLIENTS_FIELD)
            .copied()
            .ok_or(CollectionError::MissingField(CONNECTED_CLIENTS_FIELD))?;

        let names = &self.descriptors;
        let mut observations = ObservationSet::default();

        let mut clients = GaugeFamily::new(&names.clients_connected_total, Descriptors::CLIENTS_HELP);
        clients.push(connected_clients);
        observations.push(clients);

        for (field, value) in classified.numeric {
            let name = format!("{}{field}", names.info_prefix);
            if let Err(err) = validate_metric_name(&name) {
                tracing::warn!(field = field.as_str(), err, "Skipping numeric INFO field with unusable name");
                observations.skip_field();
                continue;
            }
            if names.fixed_names().contains(&name.as_str()) {
                tracing::warn!(field = field.as_str(), "Skipping numeric INFO field clashing with a fixed metric");
                observations.skip_field();
                continue;
            }
            let mut family = GaugeFamily::new(name, Descriptors::INFO_HELP);
            family.push(value);
            observations.push(family);
        }

        let non_numerical = self.non_numerical_family(classified.non_numeric, &mut observations);
        observations.push(non_numerical);
        self.push_keyspace_families(records, &mut observations);

        tracing::debug!(
            section_count,
            numeric_count,
            non_numeric_count,
            database_count = records.len(),
            skipped_fields = observations.skipped_fields(),
            "Collected INFO observations"
        );
        Ok(observations)
    }

    fn non_numerical_family(
        &self,
        non_numeric: BTreeMap<String, String>,
        observations: &mut ObservationSet,
    ) -> GaugeFamily {
        let mut labels = Vec::with_capacity(non_numeric.len());
        for (field, value) in non_numeric {
            if let Err(err) = validate_label_name(&field) {
                tracing::warn!(field = field.as_str(), err, "Skipping non-numeric INFO field with unusable name");
                observations.skip_field();
                continue;
            }
            labels.push((field, value));
        }

        let mut family = GaugeFamily::new(
            &self.descriptors.non_numerical,
            Descriptors::NON_NUMERICAL_HELP,
        );
        family.push_labeled(labels, 1_i64);
        family
    }

    fn push_keyspace_families(&self, records: &[KeyspaceRecord], observations: &mut ObservationSet) {
        let names = &self.descriptors;
        let mut keys = GaugeFamily::new(&names.keys_per_database, Descriptors::KEYS_HELP);
        let mut expiring = GaugeFamily::new(&names.expiring_keys, Descriptors::EXPIRING_KEYS_HELP);
        let mut average_ttl =
            GaugeFamily::new(&names.average_key_ttl, Descriptors::AVERAGE_TTL_HELP);

        for (record, database) in records.iter().zip(&self.config.databases) {
            let labels = vec![(DATABASE_LABEL.to_owned(), database.to_string())];
            keys.push_labeled(labels.clone(), record.keys);
            expiring.push_labeled(labels.clone(), record.expires);
            // Redis reports `avg_ttl` in milliseconds.
            #[allow(clippy::cast_precision_loss)]
            let ttl_seconds = record.avg_ttl as f64 / 1_000.0;
            average_ttl.push_labeled(labels, ttl_seconds);
        }

        observations.push(keys);
        observations.push(expiring);
        observations.push(average_ttl);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;

    use super::*;
    use crate::{
        observations::GaugeValue,
        parser::ParseErrorReason,
        source::FetchCause,
        testing::MockSource,
    };

    fn sample_config() -> CollectorConfig {
        CollectorConfig::new(["Clients", "Keyspace", "Memory"], vec![1, 2, 3]).unwrap()
    }

    #[tokio::test]
    async fn collecting_sample_observations() {
        let collector = InfoCollector::new(MockSource::with_samples(), sample_config());
        let observations = collector.collect().await.unwrap();

        let clients = observations.family("redis_clients_connected_total").unwrap();
        assert_eq!(clients.value(None), Some(GaugeValue::Float(3.0)));
        let used_memory = observations.family("redis_info_used_memory").unwrap();
        assert_eq!(used_memory.value(None), Some(GaugeValue::Float(862_632.0)));

        let keys = observations.family("redis_keys_per_database_count").unwrap();
        assert_eq!(keys.value(Some(("database", "1"))), Some(GaugeValue::Int(2)));
        assert_eq!(keys.value(Some(("database", "3"))), Some(GaugeValue::Int(1)));
        assert_eq!(keys.value(Some(("database", "0"))), None);

        let non_numerical = observations.family("redis_info_non_numerical").unwrap();
        let sample = &non_numerical.samples()[0];
        assert_eq!(sample.value, GaugeValue::Int(1));
        let label_names: Vec<_> = sample.labels.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(
            label_names,
            [
                "maxmemory_human",
                "maxmemory_policy",
                "mem_allocator",
                "total_system_memory_human",
                "used_memory_human",
                "used_memory_lua_human",
                "used_memory_peak_human",
                "used_memory_rss_human",
            ]
        );
        assert_eq!(observations.skipped_fields(), 0);
    }

    #[test]
    fn invalid_database_lists_are_rejected() {
        let err = CollectorConfig::new(["Clients"], vec![]).unwrap_err();
        assert_eq!(err, DatabaseConfigError::Empty);
        let err = CollectorConfig::new(["Clients"], vec![1, 2, 1, 1]).unwrap_err();
        assert_eq!(err, DatabaseConfigError::Duplicate(1));
        assert_eq!(err.to_string(), "database 1 is configured more than once");

        let config = CollectorConfig::new(["Clients"], vec![3, 0]).unwrap();
        assert_eq!(config.databases(), [3, 0]);
    }

    #[tokio::test]
    async fn keyspace_is_fetched_once_and_never_parsed_as_generic_section() {
        let source = MockSource::with_samples();
        let config = CollectorConfig::new(["keyspace", "Clients"], vec![1, 2, 3]).unwrap();
        let collector = InfoCollector::new(&source, config);
        collector.collect().await.unwrap();

        let mut requests = source.requests();
        requests.sort();
        assert_eq!(requests, ["Clients", "Keyspace"]);
    }

    #[tokio::test]
    async fn later_sections_overwrite_earlier_fields() {
        let source = MockSource::with_samples()
            .with_section("Server", "# Server\nconnected_clients:10\nuptime_in_seconds:5\n");
        let config = CollectorConfig::new(["Clients", "Server"], vec![1, 2, 3]).unwrap();
        let observations = InfoCollector::new(source, config).collect().await.unwrap();

        let clients = observations.family("redis_clients_connected_total").unwrap();
        assert_eq!(clients.value(None), Some(GaugeValue::Float(10.0)));
        assert!(observations.family("redis_info_uptime_in_seconds").is_some());
    }

    #[tokio::test]
    async fn database_labels_use_configured_indices() {
        let source = MockSource::with_samples().with_section(
            "Keyspace",
            "# Keyspace\ndb0:keys=5,expires=1,avg_ttl=2500\ndb7:keys=9,expires=0,avg_ttl=0\n",
        );
        let config = CollectorConfig::new(["Clients"], vec![4, 7]).unwrap();
        let observations = InfoCollector::new(source, config).collect().await.unwrap();

        let keys = observations.family("redis_keys_per_database_count").unwrap();
        assert_eq!(keys.value(Some(("database", "4"))), Some(GaugeValue::Int(5)));
        assert_eq!(keys.value(Some(("database", "7"))), Some(GaugeValue::Int(9)));
        let ttl = observations.family("redis_average_key_ttl_seconds").unwrap();
        assert_eq!(ttl.value(Some(("database", "4"))), Some(GaugeValue::Float(2.5)));
    }

    #[tokio::test]
    async fn custom_namespace() {
        let config = sample_config().with_namespace("cache");
        let observations = InfoCollector::new(MockSource::with_samples(), config)
            .collect()
            .await
            .unwrap();
        assert!(observations.family("cache_clients_connected_total").is_some());
        assert!(observations.family("cache_info_maxmemory").is_some());
        assert!(observations.family("redis_info_maxmemory").is_none());
    }

    #[tokio::test]
    async fn malformed_line_aborts_collection() {
        let source = MockSource::with_samples()
            .with_section("Memory", "# Memory\nused_memory:1\nbroken line\n");
        let err = InfoCollector::new(source, sample_config())
            .collect()
            .await
            .unwrap_err();

        assert_matches!(
            err,
            CollectionError::Parse { section, source }
                if section == "Memory" && source.line == 3
                    && source.reason == ParseErrorReason::MissingDelimiter
        );
    }

    #[tokio::test]
    async fn malformed_keyspace_aborts_collection() {
        let source = MockSource::with_samples()
            .with_section("Keyspace", "# Keyspace\ndb1:keys=2,expires=0\n");
        let config = CollectorConfig::new(["Clients"], vec![1]).unwrap();
        let err = InfoCollector::new(source, config)
            .collect()
            .await
            .unwrap_err();
        assert_matches!(err, CollectionError::Parse { section, .. } if section == "Keyspace");
    }

    #[tokio::test]
    async fn fetch_failure_aborts_collection() {
        let source = MockSource::with_samples().with_failure("Memory", "LOADING");
        let err = InfoCollector::new(source, sample_config())
            .collect()
            .await
            .unwrap_err();

        let err = assert_matches!(err, CollectionError::Fetch(err) => err);
        assert_eq!(err.section, "Memory");
        assert_matches!(err.cause, FetchCause::Backend(message) if message == "LOADING");
    }

    #[tokio::test]
    async fn database_count_mismatch_is_reported() {
        let config = CollectorConfig::new(["Clients"], vec![1, 2]).unwrap();
        let err = InfoCollector::new(MockSource::with_samples(), config)
            .collect()
            .await
            .unwrap_err();
        assert_matches!(
            err,
            CollectionError::ConfigMismatch {
                configured: 2,
                reported: 3
            }
        );
    }

    #[tokio::test]
    async fn missing_connected_clients_is_an_error() {
        let config = CollectorConfig::new(["Memory"], vec![1, 2, 3]).unwrap();
        let err = InfoCollector::new(MockSource::with_samples(), config)
            .collect()
            .await
            .unwrap_err();
        assert_matches!(err, CollectionError::MissingField(CONNECTED_CLIENTS_FIELD));
    }

    #[tokio::test]
    async fn unusable_field_names_are_skipped() {
        let source = MockSource::with_samples().with_section(
            "Odd",
            "# Odd\nmodule-count:2\nweird name:value\nnon_numerical:4\n__name__:foo\n",
        );
        let config = CollectorConfig::new(["Clients", "Odd"], vec![1, 2, 3]).unwrap();
        let observations = InfoCollector::new(source, config).collect().await.unwrap();

        assert_eq!(observations.skipped_fields(), 4);
        assert!(observations.family("redis_info_module-count").is_none());
        let non_numerical = observations.family("redis_info_non_numerical").unwrap();
        assert!(non_numerical.samples()[0].labels.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_aborts_collection() {
        let source = MockSource::with_samples().with_hang("Memory");
        let collector = InfoCollector::new(source, sample_config());
        let deadline = Instant::now() + Duration::from_secs(1);
        let err = collector.collect_with_deadline(deadline).await.unwrap_err();
        assert_matches!(err, CollectionError::DeadlineExceeded);
    }

    #[tokio::test]
    async fn concurrent_collections_are_independent() {
        let collector = InfoCollector::new(MockSource::with_samples(), sample_config());
        let (first, second) = tokio::join!(collector.collect(), collector.collect());
        assert_eq!(first.unwrap(), second.unwrap());
    }
}
