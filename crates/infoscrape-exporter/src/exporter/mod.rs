//! `MetricsExporter` and closely related types.

use std::{
    convert::Infallible,
    fmt,
    future::{self, Future},
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    time::{Duration, Instant},
};

use hyper::{
    header::{self, HeaderValue},
    server::conn::http1,
    service::service_fn,
    Method, Response, StatusCode,
};
use hyper_util::rt::TokioIo;
use infoscrape::{CollectionError, Format, InfoCollector, InfoSource, Registry};
use thiserror::Error;
use tokio::{io, net::TcpListener, sync::watch};

use crate::metrics::ExporterMetrics;


/// Paths serving metrics.
const METRICS_PATHS: [&str; 2] = ["/metrics", "/"];

#[derive(Debug, Error)]
enum ScrapeError {
    #[error(transparent)]
    Collection(#[from] CollectionError),
    #[error("failed encoding metrics")]
    Encoding(#[from] fmt::Error),
}

impl ScrapeError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Collection(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Encoding(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn text_response(status: StatusCode, content_type: &'static str, body: String) -> Response<String> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

const PLAIN_TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

struct MetricsExporterInner<S> {
    collector: Arc<InfoCollector<S>>,
    metrics: Arc<ExporterMetrics>,
    format: Format,
    scrape_timeout: Duration,
}

// Cannot be derived since `S` is not required to be `Clone`.
impl<S> Clone for MetricsExporterInner<S> {
    fn clone(&self) -> Self {
        Self {
            collector: Arc::clone(&self.collector),
            metrics: Arc::clone(&self.metrics),
            format: self.format,
            scrape_timeout: self.scrape_timeout,
        }
    }
}

impl<S: InfoSource> MetricsExporterInner<S> {
    async fn render_body(&self) -> Result<String, ScrapeError> {
        let started_at = Instant::now();
        let deadline = tokio::time::Instant::now() + self.scrape_timeout;
        let result = self.collector.collect_with_deadline(deadline).await;
        let latency = started_at.elapsed();
        self.metrics.observe_scrape(latency, result.is_ok());
        let observations = result?;

        let mut registry = Registry::empty();
        observations.register(&mut registry);
        self.metrics.register(&mut registry);
        let mut buffer = String::with_capacity(4_096);
        registry.encode(&mut buffer, self.format)?;

        let scraped_size = buffer.len();
        tracing::debug!(
            latency_sec = latency.as_secs_f64(),
            scraped_size,
            skipped_fields = observations.skipped_fields(),
            "Scraped metrics in {latency:?} (scraped size: {scraped_size}B)"
        );
        Ok(buffer)
    }

    async fn render(&self) -> Response<String> {
        match self.render_body().await {
            Ok(body) => text_response(StatusCode::OK, self.format.content_type(), body),
            Err(err) => {
                tracing::warn!(%err, "Failed scraping metrics");
                let status = err.status_code();
                text_response(status, PLAIN_TEXT_CONTENT_TYPE, format!("{err}\n"))
            }
        }
    }

    async fn handle(&self, method: &Method, path: &str) -> Response<String> {
        if !METRICS_PATHS.contains(&path) {
            let body = format!("no route for `{path}`\n");
            return text_response(StatusCode::NOT_FOUND, PLAIN_TEXT_CONTENT_TYPE, body);
        }
        if *method != Method::GET {
            let body = format!("method {method} is not allowed\n");
            let mut response =
                text_response(StatusCode::METHOD_NOT_ALLOWED, PLAIN_TEXT_CONTENT_TYPE, body);
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static("GET"));
            return response;
        }
        self.render().await
    }
}

/// Metrics exporter to Prometheus.
///
/// An exporter runs a collection using the provided [`InfoCollector`] on each scrape.
///
/// # Examples
///
/// See crate-level docs for the examples of usage.
pub struct MetricsExporter<'a, S> {
    inner: MetricsExporterInner<S>,
    shutdown_future: Pin<Box<dyn Future<Output = ()> + Send + 'a>>,
}

impl<S: InfoSource> fmt::Debug for MetricsExporter<'_, S> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("MetricsExporter")
            .field("config", self.inner.collector.config())
            .field("format", &self.inner.format)
            .field("scrape_timeout", &self.inner.scrape_timeout)
            .finish_non_exhaustive()
    }
}

impl<'a, S: InfoSource + 'static> MetricsExporter<'a, S> {
    /// Default timeout for a single scrape.
    pub const DEFAULT_SCRAPE_TIMEOUT: Duration = Duration::from_secs(10);

    /// Creates an exporter based on the provided collector. Note that the collector
    /// is in `Arc`, meaning it can be used elsewhere.
    pub fn new(collector: Arc<InfoCollector<S>>) -> Self {
        let config = collector.config();
        tracing::info!(
            sections = ?config.sections(),
            databases = ?config.databases(),
            "Created metrics exporter with namespace `{}`",
            config.namespace()
        );
        Self {
            inner: MetricsExporterInner {
                collector,
                metrics: Arc::default(),
                format: Format::default(),
                scrape_timeout: Self::DEFAULT_SCRAPE_TIMEOUT,
            },
            shutdown_future: Box::pin(future::pending()),
        }
    }

    /// Sets the export [`Format`]. By default, [`Format::Prometheus`] is used.
    #[must_use]
    pub fn with_format(mut self, format: Format) -> Self {
        self.inner.format = format;
        self
    }

    /// Sets the timeout for a single scrape. If the collection doesn't complete in time,
    /// the scrape fails with 503 Service Unavailable.
    #[must_use]
    pub fn with_scrape_timeout(mut self, timeout: Duration) -> Self {
        self.inner.scrape_timeout = timeout;
        self
    }

    /// Configures graceful shutdown for the exporter server.
    #[must_use]
    pub fn with_graceful_shutdown<F>(mut self, shutdown: F) -> Self
    where
        F: Future<Output = ()> + Send + 'a,
    {
        self.shutdown_future = Box::pin(shutdown);
        self
    }

    /// Starts the server on the specified address. This future resolves when the server is shut down.
    ///
    /// The server will expose the following endpoints:
    ///
    /// - `GET /metrics` and `GET /`: serve the metrics in the text format configured
    ///   using [`Self::with_format()`]
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the specified address fails.
    pub async fn start(self, bind_address: SocketAddr) -> io::Result<()> {
        tracing::info!("Starting Prometheus exporter web server on {bind_address}");
        self.bind(bind_address).await?.start().await?;
        tracing::info!("Prometheus metrics exporter server shut down");
        Ok(())
    }

    /// Creates an HTTP exporter server and binds it to the specified address.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the specified address fails.
    pub async fn bind(mut self, bind_address: SocketAddr) -> io::Result<MetricsServer<'a>> {
        let listener = TcpListener::bind(bind_address).await?;
        let local_addr = listener.local_addr()?;
        let server = async move {
            let (started_shutdown_sender, started_shutdown) = watch::channel(());
            loop {
                let stream = tokio::select! {
                    res = listener.accept() => res?.0,
                    () = &mut self.shutdown_future => break,
                };

                let io = TokioIo::new(stream);
                let inner = self.inner.clone();
                let mut started_shutdown = started_shutdown.clone();
                tokio::spawn(async move {
                    let conn = http1::Builder::new().serve_connection(
                        io,
                        service_fn(|request| {
                            let inner = inner.clone();
                            let method = request.method().clone();
                            let path = request.uri().path().to_owned();
                            async move { Ok::<_, Infallible>(inner.handle(&method, &path).await) }
                        }),
                    );
                    tokio::pin!(conn);

                    let res = tokio::select! {
                        _ = started_shutdown.changed() => {
                            conn.as_mut().graceful_shutdown();
                            conn.await
                        }
                        res = conn.as_mut() => res,
                    };
                    if let Err(err) = res {
                        tracing::warn!(%err, "Error serving connection");
                    }
                });
            }

            tracing::info!("Stop signal received, Prometheus metrics exporter is shutting down");
            // Send the graceful shutdown signal to all alive connections.
            drop(started_shutdown);
            started_shutdown_sender.send_replace(());
            // Wait until all connections are dropped.
            started_shutdown_sender.closed().await;

            Ok(())
        };

        Ok(MetricsServer {
            server: Box::pin(server),
            local_addr,
        })
    }
}

/// Metrics server bound to a certain local address returned by [`MetricsExporter::bind()`].
///
/// Useful e.g. if you need to find out which port the server was bound to if the 0th port was specified.
#[must_use = "Server should be `start()`ed"]
pub struct MetricsServer<'a> {
    server: Pin<Box<dyn Future<Output = io::Result<()>> + Send + 'a>>,
    local_addr: SocketAddr,
}

impl fmt::Debug for MetricsServer<'_> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("MetricsServer")
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

impl MetricsServer<'_> {
    /// Returns the local address this server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts this server. Resolves once the server is shut down.
    ///
    /// # Errors
    ///
    /// Returns an error if accepting connections fails.
    pub async fn start(self) -> io::Result<()> {
        self.server.await
    }
}
