//! Helpers for testing code built on top of the collection pipeline without a real backend.

use std::{
    collections::HashMap,
    future::{self, Future},
    sync::Mutex,
};

use crate::source::{FetchCause, FetchError, InfoSource};

/// Sample `INFO` replies captured from a Redis 3.2 instance with databases 1–3 populated.
pub mod samples {
    /// `INFO Clients`.
    pub const CLIENTS: &str = "# Clients\n\
        connected_clients:3\n\
        client_longest_output_list:0\n\
        client_biggest_input_buf:0\n\
        blocked_clients:0\n";

    /// `INFO Keyspace`.
    pub const KEYSPACE: &str = "# Keyspace\n\
        db1:keys=2,expires=0,avg_ttl=0\n\
        db2:keys=1,expires=0,avg_ttl=0\n\
        db3:keys=1,expires=0,avg_ttl=0\n";

    /// `INFO Memory`.
    pub const MEMORY: &str = "# Memory\n\
        used_memory:862632\n\
        used_memory_human:842.41K\n\
        used_memory_rss:7655424\n\
        used_memory_rss_human:7.30M\n\
        used_memory_peak:945504\n\
        used_memory_peak_human:923.34K\n\
        total_system_memory:13347020800\n\
        total_system_memory_human:12.43G\n\
        used_memory_lua:37888\n\
        used_memory_lua_human:37.00K\n\
        maxmemory:0\n\
        maxmemory_human:0B\n\
        maxmemory_policy:noeviction\n\
        mem_fragmentation_ratio:8.87\n\
        mem_allocator:jemalloc-4.0.3\n";
}

#[derive(Debug, Clone)]
enum MockReply {
    Text(String),
    Failure(String),
    Hang,
}

/// In-memory [`InfoSource`] returning canned replies and recording requested sections.
///
/// Sections without a configured reply get an empty string, like Redis does for unknown sections.
#[derive(Debug, Default)]
pub struct MockSource {
    replies: HashMap<String, MockReply>,
    requests: Mutex<Vec<String>>,
}

impl MockSource {
    /// Creates a source with the Clients, Memory and Keyspace [`samples`].
    pub fn with_samples() -> Self {
        Self::default()
            .with_section("Clients", samples::CLIENTS)
            .with_section("Memory", samples::MEMORY)
            .with_section("Keyspace", samples::KEYSPACE)
    }

    /// Sets the reply text for a section.
    #[must_use]
    pub fn with_section(mut self, section: &str, text: impl Into<String>) -> Self {
        self.replies
            .insert(section.to_owned(), MockReply::Text(text.into()));
        self
    }

    /// Makes fetching a section fail with a backend error.
    #[must_use]
    pub fn with_failure(mut self, section: &str, message: impl Into<String>) -> Self {
        self.replies
            .insert(section.to_owned(), MockReply::Failure(message.into()));
        self
    }

    /// Makes fetching a section never complete.
    #[must_use]
    pub fn with_hang(mut self, section: &str) -> Self {
        self.replies.insert(section.to_owned(), MockReply::Hang);
        self
    }

    /// Returns all sections requested so far, in request order.
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

impl InfoSource for MockSource {
    fn info(&self, section: &str) -> impl Future<Output = Result<String, FetchError>> + Send {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(section.to_owned());
        }
        let reply = self.replies.get(section).cloned();
        let section = section.to_owned();
        async move {
            match reply {
                None => Ok(String::new()),
                Some(MockReply::Text(text)) => Ok(text),
                Some(MockReply::Failure(message)) => {
                    Err(FetchError::new(section, FetchCause::Backend(message)))
                }
                Some(MockReply::Hang) => future::pending().await,
            }
        }
    }
}
