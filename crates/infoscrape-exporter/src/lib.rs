//! HTTP scrape endpoint for metrics collected by [`infoscrape`].
//!
//! Each request to the endpoint runs a fresh collection using an [`InfoCollector`](infoscrape::InfoCollector);
//! nothing is cached between requests. Besides metrics derived from `INFO`, the endpoint reports
//! the exporter's own metrics (scrape duration and failed scrapes).
//!
//! # Examples
//!
//! ```no_run
//! use std::{net::Ipv4Addr, sync::Arc};
//!
//! use infoscrape::{
//!     client::{ClientOptions, ClientSet},
//!     CollectorConfig, InfoCollector,
//! };
//! use infoscrape_exporter::MetricsExporter;
//!
//! # async fn test_wrapper() -> Result<(), Box<dyn std::error::Error>> {
//! let clients = ClientSet::new(ClientOptions::new("127.0.0.1:6379"), &[0])?;
//! let config = CollectorConfig::new(["Clients", "Memory"], clients.databases())?;
//! let collector = InfoCollector::new(clients.primary().clone(), config);
//!
//! let (shutdown_sender, mut shutdown_receiver) = tokio::sync::watch::channel(());
//! let exporter = MetricsExporter::new(Arc::new(collector)).with_graceful_shutdown(async move {
//!     shutdown_receiver.changed().await.ok();
//! });
//! let bind_address = (Ipv4Addr::UNSPECIFIED, 9121).into();
//! tokio::spawn(exporter.start(bind_address));
//!
//! // Then, once the app is shutting down:
//! shutdown_sender.send_replace(());
//! # Ok(())
//! # }
//! ```

// Linter settings.
#![warn(missing_debug_implementations, missing_docs, bare_trait_objects)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::must_use_candidate, clippy::module_name_repetitions)]

pub use crate::exporter::{MetricsExporter, MetricsServer};

mod exporter;
mod metrics;
