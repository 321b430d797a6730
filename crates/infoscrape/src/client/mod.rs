//! RESP backend client implementing [`InfoSource`].

use std::{future::Future, sync::Arc, time::Duration};

use tokio::{sync::Mutex, time};

pub use self::{
    connection::{Connection, ConnectionError},
    resp::RespValue,
};
use self::connection::info_text;
use crate::{
    collector::{check_databases, DatabaseConfigError},
    source::{FetchError, InfoSource},
};

mod connection;
pub mod resp;

/// Connection options shared by all clients of a [`ClientSet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Backend address in the `host:port` form.
    pub address: String,
    /// Password sent with `AUTH` after connecting, if any.
    pub password: Option<String>,
    /// Timeout for a single request, including (re)connecting.
    pub request_timeout: Duration,
}

impl ClientOptions {
    /// Default request timeout.
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

    /// Creates options for the specified address without a password.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            password: None,
            request_timeout: Self::DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Sets the password.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Lazily connected client bound to a single database.
///
/// Requests are serialized on a single connection. After any failure other than an error reply,
/// the connection is dropped and re-established on the next request.
#[derive(Debug)]
pub struct RedisClient {
    options: Arc<ClientOptions>,
    database: u32,
    connection: Mutex<Option<Connection>>,
}

impl RedisClient {
    /// Creates a client. No connection is established until the first request.
    pub fn new(options: impl Into<Arc<ClientOptions>>, database: u32) -> Self {
        Self {
            options: options.into(),
            database,
            connection: Mutex::new(None),
        }
    }

    /// Returns the database index this client selects.
    pub fn database(&self) -> u32 {
        self.database
    }

    /// Executes a raw command.
    ///
    /// # Errors
    ///
    /// Returns connection errors, error replies and [`ConnectionError::Timeout`].
    pub async fn command(&self, args: &[&[u8]]) -> Result<RespValue, ConnectionError> {
        let timeout = self.options.request_timeout;
        time::timeout(timeout, self.command_inner(args))
            .await
            .map_err(|_| ConnectionError::Timeout(timeout))?
    }

    async fn command_inner(&self, args: &[&[u8]]) -> Result<RespValue, ConnectionError> {
        let mut slot = self.connection.lock().await;
        // The connection is taken out of the slot for the duration of the request, so that
        // a cancelled request leaves the slot empty rather than holding a half-read connection.
        let mut connection = match slot.take() {
            Some(connection) => connection,
            None => {
                let options = &self.options;
                Connection::connect(&options.address, options.password.as_deref(), self.database)
                    .await?
            }
        };

        let result = connection.command(args).await;
        match &result {
            Err(err) if !err.keeps_connection() => {
                tracing::warn!(
                    address = self.options.address.as_str(),
                    database = self.database,
                    %err,
                    "Dropping backend connection after failure"
                );
            }
            _ => *slot = Some(connection),
        }
        result
    }

    /// Returns the raw text of `INFO <section>`.
    ///
    /// # Errors
    ///
    /// See [`Self::command()`]; additionally fails on non-text replies.
    pub async fn info_text(&self, section: &str) -> Result<String, ConnectionError> {
        let reply = self
            .command(&[b"INFO".as_slice(), section.as_bytes()])
            .await?;
        info_text(reply)
    }

    /// Sets a string key in the database of this client.
    ///
    /// # Errors
    ///
    /// See [`Self::command()`]; additionally fails on replies other than `OK`.
    pub async fn set(&self, key: &str, value: &str) -> Result<(), ConnectionError> {
        let reply = self
            .command(&[b"SET".as_slice(), key.as_bytes(), value.as_bytes()])
            .await?;
        match reply {
            RespValue::SimpleString(status) if status == "OK" => Ok(()),
            other => Err(ConnectionError::UnexpectedReply {
                command: "SET",
                actual: other.kind(),
            }),
        }
    }
}

impl InfoSource for RedisClient {
    fn info(&self, section: &str) -> impl Future<Output = Result<String, FetchError>> + Send {
        async move {
            self.info_text(section)
                .await
                .map_err(|err| FetchError::new(section, err))
        }
    }
}

/// Clients for all configured databases of a single backend, in configured order.
#[derive(Debug, Clone)]
pub struct ClientSet {
    clients: Vec<Arc<RedisClient>>,
}

impl ClientSet {
    /// Key written by [`Self::seed()`].
    pub const SEED_KEY: &'static str = "infoscrape:seed";

    /// Creates a client per database.
    ///
    /// # Errors
    ///
    /// Returns an error if `databases` is empty or contains duplicates.
    pub fn new(options: ClientOptions, databases: &[u32]) -> Result<Self, DatabaseConfigError> {
        check_databases(databases)?;
        let options = Arc::new(options);
        let clients = databases
            .iter()
            .map(|&database| Arc::new(RedisClient::new(options.clone(), database)))
            .collect();
        Ok(Self { clients })
    }

    /// Returns the client for the first configured database. Server-wide sections
    /// are fetched through it.
    pub fn primary(&self) -> &Arc<RedisClient> {
        &self.clients[0]
    }

    /// Returns all clients in configured order.
    pub fn clients(&self) -> &[Arc<RedisClient>] {
        &self.clients
    }

    /// Returns configured database indices in order.
    pub fn databases(&self) -> Vec<u32> {
        self.clients.iter().map(|client| client.database()).collect()
    }

    /// Writes [`Self::SEED_KEY`] into every configured database, so that each of them is listed
    /// in the keyspace section.
    ///
    /// # Errors
    ///
    /// Returns the first failure.
    pub async fn seed(&self) -> Result<(), ConnectionError> {
        for client in &self.clients {
            let value = client.database().to_string();
            client.set(Self::SEED_KEY, &value).await?;
            tracing::info!(database = client.database(), "Seeded database");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        net::TcpListener,
    };

    use super::*;
    use crate::source::FetchCause;

    /// Accepts connections and answers every command read line-by-line with `reply`,
    /// closing each connection after `replies_per_connection` commands.
    async fn spawn_backend(reply: &'static [u8], replies_per_connection: usize) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let mut stream = BufReader::new(stream);
                for _ in 0..replies_per_connection {
                    // Commands have the form `*N`, then N `$len` / payload pairs.
                    let mut line = String::new();
                    if stream.read_line(&mut line).await.unwrap() == 0 {
                        break;
                    }
                    let arg_count: usize = line.trim_end()[1..].parse().unwrap();
                    let args = (0..arg_count * 2).map(|_| String::new());
                    for mut arg in args {
                        stream.read_line(&mut arg).await.unwrap();
                    }
                    stream.get_mut().write_all(reply).await.unwrap();
                }
            }
        });
        address
    }

    #[tokio::test]
    async fn client_reconnects_after_connection_loss() {
        // `SELECT` and one `INFO` per connection.
        let address = spawn_backend(b"+OK\r\n", 2).await;
        let client = RedisClient::new(ClientOptions::new(address), 0);

        let err = client.info_text("Clients").await.unwrap_err();
        assert_matches!(
            err,
            ConnectionError::UnexpectedReply {
                command: "INFO",
                actual: "simple string"
            }
        );
        // The unexpected reply kept the connection, which the backend has closed since.
        let err = client.info_text("Clients").await.unwrap_err();
        assert_matches!(err, ConnectionError::Io(_));
        // Reconnected.
        client.set("key", "value").await.unwrap();
    }

    #[tokio::test]
    async fn fetch_errors_carry_section() {
        let address = spawn_backend(b"+OK\r\n", 2).await;
        let client = RedisClient::new(ClientOptions::new(address), 1);
        let err = client.info("Memory").await.unwrap_err();
        assert_eq!(err.section, "Memory");
        assert_matches!(err.cause, FetchCause::UnexpectedReply(_));
    }

    #[tokio::test]
    async fn request_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let options = ClientOptions::new(address).with_request_timeout(Duration::from_millis(50));
        let client = RedisClient::new(options, 0);

        // The listener accepts at the OS level but never answers `SELECT`.
        let err = client.info_text("Clients").await.unwrap_err();
        assert_matches!(err, ConnectionError::Timeout(timeout) if timeout.as_millis() == 50);
        drop(listener);
    }

    #[test]
    fn client_set_validates_databases() {
        let err = ClientSet::new(ClientOptions::new("127.0.0.1:6379"), &[]).unwrap_err();
        assert_eq!(err.to_string(), "at least one database must be configured");
        let err = ClientSet::new(ClientOptions::new("127.0.0.1:6379"), &[0, 2, 2]).unwrap_err();
        assert_eq!(err, DatabaseConfigError::Duplicate(2));

        let clients = ClientSet::new(ClientOptions::new("127.0.0.1:6379"), &[3, 1]).unwrap();
        assert_eq!(clients.primary().database(), 3);
        assert_eq!(clients.databases(), [3, 1]);
    }
}
